use anyhow::Result;
use comic_factory::core::config::Config;
use comic_factory::core::state::StoryState;
use comic_factory::core::store::StoryStore;
use comic_factory::services::llm::create_llm;
use comic_factory::services::setup;
use comic_factory::services::workflow::{RunOutcome, WorkflowManager};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load config
    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please ensure 'config.yml' exists with valid LLM settings.");
            return Err(e);
        }
    };

    // 2. Interactive setup (preset selection)
    setup::run_setup(&mut config)?;

    let prompt = match std::env::args().nth(1) {
        Some(prompt) if !prompt.trim().is_empty() => prompt,
        _ => setup::ask_prompt()?,
    };

    // 3. Pipeline
    let llm = create_llm(&config)?;
    let store = StoryStore::new(&config.comic.font);
    let manager = WorkflowManager::new(&config, llm, store.clone())?;

    let renderer = tokio::spawn(render(store.subscribe(), config.comic.total_panels));

    match manager.run(&prompt).await {
        RunOutcome::Completed => println!("Story complete!"),
        RunOutcome::Failed => println!("Failed to generate the story, see the logs for details."),
        RunOutcome::Superseded | RunOutcome::Skipped => {}
    }

    drop(manager);
    drop(store);
    renderer.await?;
    Ok(())
}

/// Prints panels as they are published, until the store goes away.
async fn render(mut rx: watch::Receiver<StoryState>, total_panels: usize) {
    let pb = ProgressBar::new(total_panels as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} panels")
    {
        pb.set_style(style.progress_chars("#>-"));
    }

    let mut shown = 0;
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        if state.panel_captions.len() < shown {
            shown = 0;
        }
        for (i, (caption, image_prompt)) in state
            .panel_captions
            .iter()
            .zip(&state.panel_image_prompts)
            .enumerate()
            .skip(shown)
        {
            pb.println(format!("Panel {}: {}\n  image: {}", i + 1, caption, image_prompt));
        }
        shown = state.panel_captions.len();
        pb.set_position(shown as u64);
    }

    pb.finish_with_message("done");
}
