//! glbview - touch-driven GLB/glTF model viewer
//!
//! Runs headless by default: mounts the viewer, waits for the model, replays
//! an optional gesture script and prints a summary. `--window` opens a winit
//! window and drives the viewer with mouse or touch input.

mod app;

use clap::Parser;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = app::Cli::parse();
    app::run(cli)
}
