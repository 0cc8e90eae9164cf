use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_PRESET_ID: &str = "neutral";

/// Placeholder inside `image_prompt` replaced by the user's style text.
pub const STYLE_TOKEN: &str = "{style}";

/// A drawing style: the genre the writer model impersonates plus the
/// fragments that make up every panel image prompt.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Preset {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub llm_prompt: String,
    #[serde(default = "default_image_prompt")]
    pub image_prompt: Vec<String>,
}

fn default_image_prompt() -> Vec<String> {
    vec![STYLE_TOKEN.to_string()]
}

impl Preset {
    pub fn image_prompt(&self, style: &str) -> Vec<String> {
        self.image_prompt
            .iter()
            .map(|fragment| {
                if fragment == STYLE_TOKEN {
                    style.to_string()
                } else {
                    fragment.clone()
                }
            })
            .collect()
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.id)
    }
}

fn preset(id: &str, label: &str, llm_prompt: &str, image_prompt: &[&str]) -> Preset {
    Preset {
        id: id.to_string(),
        label: label.to_string(),
        llm_prompt: llm_prompt.to_string(),
        image_prompt: image_prompt.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn builtin_presets() -> Vec<Preset> {
    vec![
        preset(DEFAULT_PRESET_ID, "Neutral", "", &[STYLE_TOKEN]),
        preset(
            "japanese_manga",
            "Japanese",
            "japanese manga",
            &["grayscale", "detailed drawing", "japanese manga", STYLE_TOKEN],
        ),
        preset(
            "american_comic_90",
            "American (modern)",
            "american comic",
            &[
                "digital color comicbook style",
                "modern american comic",
                STYLE_TOKEN,
                "detailed drawing",
            ],
        ),
        preset(
            "franco_belgian",
            "Franco-Belgian",
            "Franco-Belgian comic (a \"bande dessinée\"), in the style of Franco-Belgian artists",
            &[
                "bande dessinée",
                "franco-belgian comic",
                STYLE_TOKEN,
                "comic album",
                "detailed drawing",
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_token_is_substituted_in_place() {
        let manga = builtin_presets()
            .into_iter()
            .find(|p| p.id == "japanese_manga")
            .unwrap();

        assert_eq!(
            manga.image_prompt("rainy rooftop"),
            vec!["grayscale", "detailed drawing", "japanese manga", "rainy rooftop"]
        );
    }

    #[test]
    fn test_builtin_ids_are_unique() {
        let presets = builtin_presets();
        for (i, p) in presets.iter().enumerate() {
            assert!(presets[i + 1..].iter().all(|other| other.id != p.id));
        }
        assert_eq!(presets[0].id, DEFAULT_PRESET_ID);
    }
}
