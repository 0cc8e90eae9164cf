use crate::core::state::PanelRecord;

pub const CAPTION_PLACEHOLDER: &str = "...";

/// Normalizes one parsed panel. Idempotent.
///
/// Only surrounding whitespace is removed; quotes and punctuation inside a
/// caption are dialogue and stay as the model wrote them. Missing instructions
/// stay empty: the orchestrator needs to see them to pick the degraded image
/// prefix.
pub fn clean_panel(panel: PanelRecord) -> PanelRecord {
    let caption = panel.caption.trim();
    PanelRecord {
        index: panel.index,
        instructions: panel.instructions.trim().to_string(),
        caption: if caption.is_empty() {
            CAPTION_PLACEHOLDER.to_string()
        } else {
            caption.to_string()
        },
    }
}
