pub mod api;
pub mod commands;
pub mod config;
pub mod db;
pub mod repl;
pub mod state;

use config::Config;
use state::AppState;

/// Build the application state from `config` and run the interactive session.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = AppState::new(config)?;
    repl::run(&state).await
}
