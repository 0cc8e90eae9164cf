use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::services::llm::LlmConfig;
use crate::services::preset::{self, Preset};

pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub unattended: bool,

    pub llm: LlmConfig,

    #[serde(default)]
    pub comic: ComicConfig,

    /// Extra presets; an entry whose id matches a built-in replaces it.
    #[serde(default)]
    pub presets: Vec<Preset>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ComicConfig {
    pub preset: Option<String>,

    #[serde(default = "default_total_panels")]
    pub total_panels: usize,

    #[serde(default = "default_font")]
    pub font: String,
}

impl Default for ComicConfig {
    fn default() -> Self {
        Self {
            preset: None,
            total_panels: default_total_panels(),
            font: default_font(),
        }
    }
}

fn default_total_panels() -> usize {
    4
}
fn default_font() -> String {
    "actionman".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(DEFAULT_CONFIG_PATH)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.comic.total_panels == 0 {
            anyhow::bail!("comic.total_panels must be at least 1");
        }
        if let Some(id) = &self.comic.preset {
            if self.find_preset(id).is_none() {
                anyhow::bail!("Unknown preset: {}", id);
            }
        }
        self.llm.validate()
    }

    /// Built-in presets overlaid with the ones declared in the config file.
    pub fn all_presets(&self) -> Vec<Preset> {
        let mut presets = preset::builtin_presets();
        for custom in &self.presets {
            match presets.iter_mut().find(|p| p.id == custom.id) {
                Some(existing) => *existing = custom.clone(),
                None => presets.push(custom.clone()),
            }
        }
        presets
    }

    pub fn find_preset(&self, id: &str) -> Option<Preset> {
        self.all_presets().into_iter().find(|p| p.id == id)
    }

    /// The configured preset, or the neutral one when none was picked.
    pub fn active_preset(&self) -> Result<Preset> {
        let id = self.comic.preset.as_deref().unwrap_or(preset::DEFAULT_PRESET_ID);
        self.find_preset(id)
            .with_context(|| format!("Unknown preset: {}", id))
    }
}
