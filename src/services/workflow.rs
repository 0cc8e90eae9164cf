use crate::core::config::Config;
use crate::core::state::{GenerationRequest, GenerationStatus, PanelRecord};
use crate::core::store::{RunToken, StoryStore};
use crate::services::cleaner::clean_panel;
use crate::services::continuation::Continuation;
use crate::services::llm::LlmClient;
use crate::services::preset::Preset;
use crate::services::prompt::{truncate_style_prompt, PanelPrefixes};
use crate::services::sanitize::Sanitizer;
use anyhow::Result;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Panels are always requested two at a time.
pub const PANELS_PER_CHUNK: usize = 2;

/// Separates the style part from the story part of a submitted prompt.
pub const PROMPT_DELIMITER: &str = "||";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every chunk was generated and published.
    Completed,
    /// A chunk failed; chunks published before it stay visible.
    Failed,
    /// A newer run took over the store; this run stopped publishing.
    Superseded,
    /// The prompt was blank, nothing was started.
    Skipped,
}

/// Splits `"<style>||<story>"` and trims both sides. The story is empty when
/// there is no delimiter. Returns `None` for a blank prompt.
pub fn split_prompt(prompt: &str) -> Option<(String, String)> {
    if prompt.trim().is_empty() {
        return None;
    }
    let (style, story) = prompt.split_once(PROMPT_DELIMITER).unwrap_or((prompt, ""));
    Some((style.trim().to_string(), story.trim().to_string()))
}

pub struct WorkflowManager {
    llm: Arc<dyn LlmClient>,
    store: StoryStore,
    preset: Preset,
    sanitizer: Sanitizer,
    total_panels: usize,
    retry_delay: Duration,
}

impl WorkflowManager {
    pub fn new(config: &Config, llm: Arc<dyn LlmClient>, store: StoryStore) -> Result<Self> {
        Ok(Self {
            llm,
            store,
            preset: config.active_preset()?,
            sanitizer: Sanitizer::default(),
            total_panels: config.comic.total_panels,
            retry_delay: Duration::from_millis(config.llm.retry_delay_ms),
        })
    }

    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn store(&self) -> &StoryStore {
        &self.store
    }

    /// Generates a whole story for `prompt`, publishing after every chunk.
    ///
    /// Starting a run invalidates any run still in flight: its later writes
    /// are discarded by the store.
    pub async fn run(&self, prompt: &str) -> RunOutcome {
        let Some((style, story)) = split_prompt(prompt) else {
            return RunOutcome::Skipped;
        };

        let token = self.store.begin_run(prompt);
        info!("Run #{}: generating {} panels", token.id(), self.total_panels);

        let style = truncate_style_prompt(&style).text;
        let prefixes = PanelPrefixes::new(&self.preset, &style, &story);
        let step = Continuation {
            llm: self.llm.as_ref(),
            preset: &self.preset,
            sanitizer: &self.sanitizer,
            retry_delay: self.retry_delay,
        };

        let mut existing_panels: Vec<PanelRecord> = Vec::new();
        let mut captions: Vec<String> = Vec::new();
        let mut image_prompts: Vec<String> = Vec::new();

        let mut current_panel = 0;
        while current_panel < self.total_panels {
            let nb_panels = PANELS_PER_CHUNK.min(self.total_panels - current_panel);
            let request = GenerationRequest {
                style_prompt: style.clone(),
                user_story_prompt: story.clone(),
                panel_count_requested: nb_panels,
                existing_panels: existing_panels.clone(),
            };

            let mut candidates = match step.next_panels(&request).await {
                Ok(panels) => panels,
                Err(e) => {
                    warn!("Failed to generate the story, aborting here: {}", e);
                    return self.finish(&token, GenerationStatus::Failed, RunOutcome::Failed);
                }
            };
            info!("LLM generated {} new panels", candidates.len());

            candidates.truncate(nb_panels);
            let end = current_panel + nb_panels;
            // The model's own numbering restarts or skips; the position in the story wins.
            for (i, mut panel) in candidates.into_iter().enumerate() {
                panel.index = (current_panel + i) as u32;
                existing_panels.push(panel);
            }
            while existing_panels.len() < end {
                let index = existing_panels.len() as u32;
                existing_panels.push(clean_panel(PanelRecord::new(index, "", "")));
            }

            for panel in &existing_panels[current_panel..end] {
                let image_prompt = prefixes.image_prompt_for(panel);
                debug!("Image prompt for panel {} => \"{}\"", captions.len(), image_prompt);
                captions.push(panel.caption.clone());
                image_prompts.push(image_prompt);
            }

            if !self.store.publish(&token, &captions, &image_prompts) {
                return RunOutcome::Superseded;
            }

            current_panel = end;
            if current_panel < self.total_panels && current_panel * 2 > self.total_panels {
                debug!("Past the halfway mark, {} panels left", self.total_panels - current_panel);
            }
        }

        self.finish(&token, GenerationStatus::Idle, RunOutcome::Completed)
    }

    fn finish(&self, token: &RunToken, status: GenerationStatus, outcome: RunOutcome) -> RunOutcome {
        if self.store.finish(token, status) {
            outcome
        } else {
            info!("Run #{} was replaced by a newer prompt", token.id());
            RunOutcome::Superseded
        }
    }
}
