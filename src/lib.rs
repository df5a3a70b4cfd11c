pub mod app;

use app::commands::init_app_state;
use app::config::load_config;
use app::error::AppError;
use app::logging::init_logging;
use app::state::AppState;

/// Loads the config, installs logging and builds the shared state for an embedding caller.
pub fn bootstrap(trace_id: &str) -> Result<AppState, AppError> {
    let config = load_config().map_err(|err| AppError::new(err.code, err.error, trace_id))?;
    init_logging(&config.logging);
    init_app_state(config, trace_id)
}
