use crate::core::state::{GenerationStatus, StoryState};
use log::info;
use std::sync::Arc;
use tokio::sync::watch;

/// Proof that a run was started; writes made with a stale token are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunToken(u64);

impl RunToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Cloneable handle to the shared [`StoryState`].
///
/// The orchestrator is the only writer. Renderers call [`StoryStore::subscribe`]
/// and react to every publish.
#[derive(Clone, Debug)]
pub struct StoryStore {
    tx: Arc<watch::Sender<StoryState>>,
}

impl StoryStore {
    pub fn new(font: &str) -> Self {
        let (tx, _rx) = watch::channel(StoryState {
            font: font.to_string(),
            ..Default::default()
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<StoryState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> StoryState {
        self.tx.borrow().clone()
    }

    pub fn is_current(&self, token: &RunToken) -> bool {
        self.tx.borrow().run_id == token.0
    }

    /// Resets the panel arrays and marks the session as generating.
    pub fn begin_run(&self, prompt: &str) -> RunToken {
        let mut run_id = 0;
        self.tx.send_modify(|state| {
            state.run_id += 1;
            state.status = GenerationStatus::Generating;
            state.wait_longer = false;
            state.prompt = prompt.to_string();
            state.panel_captions.clear();
            state.panel_image_prompts.clear();
            run_id = state.run_id;
        });
        RunToken(run_id)
    }

    /// Replaces the published arrays. Returns `false` if `token` is stale.
    pub fn publish(&self, token: &RunToken, captions: &[String], image_prompts: &[String]) -> bool {
        let accepted = self.tx.send_if_modified(|state| {
            if state.run_id != token.0 {
                return false;
            }
            state.panel_captions = captions.to_vec();
            state.panel_image_prompts = image_prompts.to_vec();
            true
        });
        if !accepted {
            info!("Discarding panels from stale run #{}", token.0);
        }
        accepted
    }

    /// Moves the run to a terminal status. Returns `false` if `token` is stale.
    pub fn finish(&self, token: &RunToken, status: GenerationStatus) -> bool {
        self.tx.send_if_modified(|state| {
            if state.run_id != token.0 {
                return false;
            }
            state.status = status;
            true
        })
    }
}
