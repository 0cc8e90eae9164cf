use crate::core::state::PanelRecord;
use log::{debug, warn};

/// Fragment separator used by models that answer with a bullet list.
pub const FALLBACK_DELIMITER: char = '*';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// The text was a JSON array of panels.
    Structured(Vec<PanelRecord>),
    /// Strict parsing failed; panels were recovered by splitting on `*`.
    Degraded(Vec<PanelRecord>),
    /// Neither path produced a single panel.
    Unrecoverable,
}

impl ParseOutcome {
    pub fn into_panels(self) -> Option<Vec<PanelRecord>> {
        match self {
            ParseOutcome::Structured(panels) | ParseOutcome::Degraded(panels) => Some(panels),
            ParseOutcome::Unrecoverable => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ParseOutcome::Degraded(_))
    }
}

pub fn parse_panels(sanitized: &str) -> ParseOutcome {
    match serde_json::from_str::<Vec<PanelRecord>>(sanitized) {
        Ok(panels) => ParseOutcome::Structured(panels),
        Err(e) => {
            warn!("Failed to read LLM response as JSON ({}), splitting on '{}'", e, FALLBACK_DELIMITER);
            debug!("Unparsed response: {}", sanitized);

            let panels = split_fallback(sanitized);
            if panels.is_empty() {
                ParseOutcome::Unrecoverable
            } else {
                ParseOutcome::Degraded(panels)
            }
        }
    }
}

/// One panel per non-empty `*`-separated fragment, the fragment serving as
/// both caption and instructions. Never fails.
pub fn split_fallback(text: &str) -> Vec<PanelRecord> {
    text.split(FALLBACK_DELIMITER)
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
        .enumerate()
        .map(|(i, fragment)| PanelRecord::new(i as u32, fragment, fragment))
        .collect()
}
