//! Triveni - multi-camera frameset synchronization daemon

use std::env;
use std::process::ExitCode;
use triveni::{App, Config, Result};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Triveni v{} starting...", env!("CARGO_PKG_VERSION"));

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| triveni::config::DEFAULT_CONFIG_PATH.to_string());

    log::info!("Using config: {}", config_path);
    let config = Config::load(&config_path)?;

    let mut app = App::new(config);
    app.install_signal_handler()?;

    let mut count = 0u64;
    let stats = app.run(|timestamp, _frames| {
        count += 1;
        log::info!("Received frameset {} with timestamp {}", count, timestamp);
    })?;

    log::info!(
        "Clean stop after {} framesets ({} frames recycled)",
        stats.framesets,
        stats.recycled
    );
    Ok(())
}
