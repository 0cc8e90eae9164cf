use crate::core::state::{GenerationRequest, PanelRecord};
use crate::services::preset::Preset;
use anyhow::Result;
use log::info;

/// Longer style prompts crowd out the preset fragments in the image prompt.
pub const STYLE_PROMPT_MAX_CHARS: usize = 77;

/// Appended after the conversation so the model opens a JSON array right away.
pub const JSON_PRIMER: &str = "\n[{";

/// A system/user conversation plus the trailing primer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub primer: String,
}

impl Prompt {
    /// Same prompt with a trailing period, so a retry does not hit a cached failure.
    pub fn perturbed(&self) -> Self {
        Self {
            primer: format!("{}.", self.primer),
            ..self.clone()
        }
    }

    /// Zephyr chat template, for backends that take a single text input.
    pub fn to_zephyr(&self) -> String {
        format!(
            "<|system|>\n{}</s>\n<|user|>\n{}</s>\n<|assistant|>{}",
            self.system, self.user, self.primer
        )
    }

    /// User message for chat backends, which have no raw assistant prefix.
    pub fn user_with_primer(&self) -> String {
        format!("{}{}", self.user, self.primer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncatedStyle {
    pub text: String,
    pub truncated: bool,
}

/// Hard cut at [`STYLE_PROMPT_MAX_CHARS`] characters, ignoring word boundaries.
pub fn truncate_style_prompt(style: &str) -> TruncatedStyle {
    if style.chars().count() <= STYLE_PROMPT_MAX_CHARS {
        return TruncatedStyle {
            text: style.to_string(),
            truncated: false,
        };
    }

    let text: String = style.chars().take(STYLE_PROMPT_MAX_CHARS).collect();
    info!("Style prompt was cut to: {}", text);
    TruncatedStyle {
        text,
        truncated: true,
    }
}

/// Trims each fragment, drops the empty ones and joins the rest with `", "`.
pub fn join_words<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .filter_map(|w| {
            let w = w.as_ref().trim();
            (!w.is_empty()).then(|| w.to_string())
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Image prompt prefixes for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelPrefixes {
    /// Style only; the model's instructions carry the scene.
    pub light: String,
    /// Style plus the whole story, for panels the model left without instructions.
    pub degraded: String,
}

impl PanelPrefixes {
    pub fn new(preset: &Preset, style: &str, story: &str) -> Self {
        let fragments = preset.image_prompt(style);
        let light = join_words(&fragments);
        let degraded = join_words(fragments.iter().map(String::as_str).chain([story]));
        Self { light, degraded }
    }

    pub fn image_prompt_for(&self, panel: &PanelRecord) -> String {
        let prefix = if panel.has_instructions() {
            &self.light
        } else {
            &self.degraded
        };
        join_words([prefix.as_str(), panel.instructions.as_str()])
    }
}

pub fn build_continuation_prompt(preset: &Preset, request: &GenerationRequest) -> Result<Prompt> {
    let n = request.panel_count_requested;

    let mut lines = vec![
        format!("You are a writer specialized in {}", preset.llm_prompt),
        format!(
            "Please write detailed drawing instructions and short (2-3 sentences long) speech captions for the next {n} panels of a new story, but keep it open-ended (it will be continued and expanded later). Please make sure each of those {n} panels include info about character gender, age, origin, clothes, colors, location, lights, etc."
        ),
        "Give your response as a VALID JSON array like this: `Array<{ panel: number; instructions: string; caption: string; }>`.".to_string(),
        format!(
            "Be brief in your {n} instructions and narrative captions, don't add your own comments. The captions must be captivating, smart, entertaining. Be straight to the point, and never reply things like \"Sure, I can..\" etc. Reply using valid JSON!! Important: Write valid JSON!"
        ),
    ];

    if !request.style_prompt.trim().is_empty() {
        lines.push(format!("The visual style of the comic is: {}.", request.style_prompt.trim()));
    }

    if !request.existing_panels.is_empty() {
        lines.push(format!(
            "To help you, here are the previous panels and their captions (note: if you see an anomaly here eg. no caption or the same description repeated multiple times, do not hesitate to fix the story): {}",
            serde_json::to_string_pretty(&request.existing_panels)?
        ));
    }

    let topic = if request.user_story_prompt.trim().is_empty() {
        request.style_prompt.trim()
    } else {
        request.user_story_prompt.trim()
    };

    Ok(Prompt {
        system: lines.join("\n"),
        user: format!("The story is about: {}.", topic),
        primer: JSON_PRIMER.to_string(),
    })
}
