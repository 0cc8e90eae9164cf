use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("inference backend returned an empty result")]
    EmptyResponse,

    #[error("inference backend failed: {0}")]
    Backend(String),

    #[error("failed to generate the story after {attempts} attempts: {last}")]
    Exhausted {
        attempts: usize,
        last: Box<GenerationError>,
    },

    #[error("model output could not be turned into panels")]
    Unparseable,
}
