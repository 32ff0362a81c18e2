//! Process plumbing around the quarry app host: logging setup, runner
//! settings, loading apps at startup and the tick loop.

mod autoload;
pub mod logging;
mod settings;
mod tick_loop;

use std::sync::Arc;

use anyhow::Result;
use quarry_host::{AppRegistry, Evaluator, HostEnvironment};

pub use autoload::{app_source_path, autoload_apps, APP_EXTENSION};
pub use logging::init_logging;
pub use settings::RunnerSettings;
pub use tick_loop::{lock_registry, run_tick_loop, shutdown_on_ctrl_c, SharedRegistry};

/// A registry backed by the file store in `settings.data_dir`
pub fn build_registry(
    settings: &RunnerSettings,
    evaluator: Arc<dyn Evaluator>,
    environment: Arc<dyn HostEnvironment>,
) -> Result<AppRegistry> {
    let store = settings.blob_store()?;
    Ok(AppRegistry::new(evaluator, environment, Arc::new(store))
        .with_save_debounce(settings.save_debounce_ticks))
}
