use crate::core::error::GenerationError;
use crate::core::state::{GenerationRequest, PanelRecord};
use crate::services::cleaner::clean_panel;
use crate::services::llm::{predict_with_retry, LlmClient};
use crate::services::parser::parse_panels;
use crate::services::preset::Preset;
use crate::services::prompt::build_continuation_prompt;
use crate::services::sanitize::Sanitizer;
use log::debug;
use std::time::Duration;

/// Everything one continuation step needs besides the request itself.
pub struct Continuation<'a> {
    pub llm: &'a dyn LlmClient,
    pub preset: &'a Preset,
    pub sanitizer: &'a Sanitizer,
    pub retry_delay: Duration,
}

impl Continuation<'_> {
    /// Prompt, predict (with one retry), sanitize, parse and clean.
    pub async fn next_panels(&self, request: &GenerationRequest) -> Result<Vec<PanelRecord>, GenerationError> {
        let prompt = build_continuation_prompt(self.preset, request)
            .map_err(|e| GenerationError::Backend(format!("could not build prompt: {:#}", e)))?;

        let raw = predict_with_retry(self.llm, &prompt, request.panel_count_requested, self.retry_delay).await?;
        debug!("Raw response from LLM: {}", raw);

        let sanitized = self.sanitizer.sanitize(&raw);
        let panels = parse_panels(&sanitized)
            .into_panels()
            .ok_or(GenerationError::Unparseable)?;

        Ok(panels.into_iter().map(clean_panel).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm::mock::ScriptedLlm;
    use crate::services::preset::builtin_presets;

    fn request() -> GenerationRequest {
        GenerationRequest {
            style_prompt: "noir".to_string(),
            user_story_prompt: "a heist".to_string(),
            panel_count_requested: 2,
            existing_panels: vec![],
        }
    }

    async fn run(llm: &ScriptedLlm) -> Result<Vec<PanelRecord>, GenerationError> {
        let preset = builtin_presets().remove(0);
        let sanitizer = Sanitizer::default();
        let step = Continuation {
            llm,
            preset: &preset,
            sanitizer: &sanitizer,
            retry_delay: Duration::ZERO,
        };
        step.next_panels(&request()).await
    }

    #[tokio::test]
    async fn test_primed_json_is_parsed_and_cleaned() {
        let llm = ScriptedLlm::new(vec![Ok(
            "\"panel\": 1, \"instructions\": \" a vault door \", \"caption\": \"\"}, {\"panel\": 2, \"instructions\": \"\", \"caption\": \"Go!\"}]",
        )]);
        let panels = run(&llm).await.unwrap();

        assert_eq!(
            panels,
            vec![
                PanelRecord::new(1, "a vault door", "..."),
                PanelRecord::new(2, "", "Go!"),
            ]
        );
        assert_eq!(llm.calls.lock().unwrap()[0].1, 2);
    }

    #[tokio::test]
    async fn test_dialogue_caption_survives_the_pipeline() {
        let llm = ScriptedLlm::new(vec![Ok(
            "\"panel\": 0, \"instructions\": \"a cop in an alley\", \"caption\": \"\\\"Freeze!\\\" yells the cop. \\\"You're under arrest!\\\"\"}]",
        )]);
        let panels = run(&llm).await.unwrap();

        assert_eq!(panels.len(), 1);
        assert_eq!(panels[0].caption, "\"Freeze!\" yells the cop. \"You're under arrest!\"");
    }

    #[tokio::test]
    async fn test_markdown_answer_degrades() {
        let llm = ScriptedLlm::new(vec![Ok("* A hero stands.\n* A villain lurks.")]);
        let panels = run(&llm).await.unwrap();

        let captions: Vec<_> = panels.iter().map(|p| p.caption.as_str()).collect();
        assert_eq!(captions, vec!["A hero stands.", "A villain lurks."]);
    }

    #[tokio::test]
    async fn test_unrecoverable_output_is_an_error() {
        let llm = ScriptedLlm::new(vec![Ok("***")]);
        assert!(matches!(run(&llm).await, Err(GenerationError::Unparseable)));
    }

    #[tokio::test]
    async fn test_double_failure_propagates() {
        let llm = ScriptedLlm::new(vec![Err("down"), Err("still down")]);
        assert!(matches!(run(&llm).await, Err(GenerationError::Exhausted { .. })));
        assert_eq!(llm.call_count(), 2);
    }
}
