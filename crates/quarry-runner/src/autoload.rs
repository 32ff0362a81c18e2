use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use quarry_host::{AppRegistry, LoadRequest, PrincipalRef};
use tracing::{debug, info, warn};

/// File extension of app sources
pub const APP_EXTENSION: &str = "sc";

pub fn app_source_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.{}", name, APP_EXTENSION))
}

fn read_source(dir: &Path, name: &str) -> Result<String> {
    let path = app_source_path(dir, name);
    fs::read_to_string(&path).with_context(|| format!("Failed to read app source {}", path.display()))
}

/// Load each named app from `<dir>/<name>.sc`. Apps that fail to read or
/// load are skipped. Returns the names that loaded.
pub fn autoload_apps(
    registry: &mut AppRegistry,
    dir: &Path,
    names: &[String],
    operator: &PrincipalRef,
) -> Vec<String> {
    debug!(target: "apphost", "Loading apps from {}", dir.display());

    let mut loaded = Vec::new();
    for name in names {
        let source = match read_source(dir, name) {
            Ok(source) => source,
            Err(e) => {
                warn!(target: "apphost", "Skipping app '{}': {:#}", name, e);
                continue;
            }
        };
        match registry.load_app(LoadRequest::new(name.clone(), source, operator.clone())) {
            Ok(()) => loaded.push(name.clone()),
            Err(e) => warn!(target: "apphost", "Skipping app '{}': {}", name, e),
        }
    }

    if !loaded.is_empty() {
        info!(target: "apphost", "Loaded {} app(s)", loaded.len());
    }
    loaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_host::testing::{MemoryBlobStore, Program, ScriptedEvaluator, TestEnvironment};
    use std::sync::Arc;

    #[test]
    fn test_missing_and_failing_apps_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(app_source_path(dir.path(), "good"), "// good").unwrap();
        fs::write(app_source_path(dir.path(), "broken"), "// broken").unwrap();

        let evaluator = Arc::new(ScriptedEvaluator::new());
        evaluator.define_app("good", Program::new());
        // "broken" has no program, so it fails to compile
        let env = Arc::new(TestEnvironment::new());
        let mut registry = AppRegistry::new(evaluator, env.clone(), Arc::new(MemoryBlobStore::new()));

        let operator: PrincipalRef = env.server();
        let names = ["good", "broken", "absent"].map(String::from);
        let loaded = autoload_apps(&mut registry, dir.path(), &names, &operator);

        assert_eq!(loaded, vec!["good".to_string()]);
        assert_eq!(registry.app("good").unwrap().app().source(), "// good");
    }
}
