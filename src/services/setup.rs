use crate::core::config::Config;
use crate::services::workflow::PROMPT_DELIMITER;
use anyhow::{anyhow, Result};
use inquire::{Select, Text};

/// Asks for a preset when none is configured, then saves the choice.
pub fn run_setup(config: &mut Config) -> Result<()> {
    if config.unattended || config.comic.preset.is_some() {
        return Ok(());
    }

    let presets = config.all_presets();
    let choice = Select::new("Select a comic preset:", presets)
        .prompt()
        .map_err(|e| anyhow!("Preset selection cancelled: {}", e))?;

    config.comic.preset = Some(choice.id);
    config.save()?;
    println!("Preset saved to config.yml");
    Ok(())
}

pub fn ask_prompt() -> Result<String> {
    let prompt = Text::new("What is the comic about?")
        .with_help_message(&format!(
            "Format: <style> {} <story>, e.g. noir detective {} a rainy city at night",
            PROMPT_DELIMITER, PROMPT_DELIMITER
        ))
        .prompt()
        .map_err(|e| anyhow!("Prompt cancelled: {}", e))?;

    if prompt.trim().is_empty() {
        return Err(anyhow!("The prompt cannot be empty"));
    }
    Ok(prompt)
}
