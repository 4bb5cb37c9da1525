// folio3d: an interactive 3D portfolio room

// Module declarations
mod app;
mod assets;
mod camera;
mod clips;
mod config;
mod debug_ui;
mod effects;
mod interaction;
mod lamp;
mod lighting;
mod links;
mod math;
mod picking;
mod registry;
mod renderer;
mod scene;
mod screen;
mod tween;

use std::path::Path;

use anyhow::Context;
use winit::event_loop::EventLoop;

use crate::config::SceneConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // The first argument overrides the config location
    let config = match std::env::args().nth(1) {
        Some(path) => SceneConfig::load_from_path(Path::new(&path)),
        None => SceneConfig::load(),
    };

    // Create event loop
    let event_loop = EventLoop::new().context("failed to create event loop")?;

    // Create the window, renderer and scene state
    let app = app::App::new(&event_loop, config)
        .await
        .context("failed to initialise renderer")?;

    // Run until the window closes
    app.run(event_loop)?;
    Ok(())
}
