use serde::{Deserialize, Deserializer, Serialize};

/// One comic panel as described by the model.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
pub struct PanelRecord {
    #[serde(rename = "panel")]
    pub index: u32,
    #[serde(default, deserialize_with = "nullable_string")]
    pub instructions: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub caption: String,
}

impl PanelRecord {
    pub fn new(index: u32, instructions: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            index,
            instructions: instructions.into(),
            caption: caption.into(),
        }
    }

    pub fn has_instructions(&self) -> bool {
        !self.instructions.trim().is_empty()
    }
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Input of a single continuation step. Built fresh for every chunk.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub style_prompt: String,
    pub user_story_prompt: String,
    pub panel_count_requested: usize,
    pub existing_panels: Vec<PanelRecord>,
}

#[derive(Serialize, Deserialize, Default, Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationStatus {
    #[default]
    Idle,
    Generating,
    Failed,
}

/// Session-wide state read by the renderer.
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct StoryState {
    /// Id of the run allowed to write; bumped on every new prompt.
    pub run_id: u64,
    pub status: GenerationStatus,
    pub wait_longer: bool,
    pub prompt: String,
    pub font: String,
    pub panel_image_prompts: Vec<String>,
    pub panel_captions: Vec<String>,
}

impl StoryState {
    pub fn is_generating(&self) -> bool {
        self.status == GenerationStatus::Generating
    }
}
