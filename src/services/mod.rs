pub mod cleaner;
pub mod continuation;
pub mod llm;
pub mod parser;
pub mod preset;
pub mod prompt;
pub mod sanitize;
pub mod setup;
pub mod workflow;
