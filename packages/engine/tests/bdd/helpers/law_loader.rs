//! Law loader for BDD tests
//!
//! Loads all YAML rule specifications from the `laws/` directory.

use machine_law_engine::{EngineError, LawExecutionService};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Root of the `laws/` directory, relative to the package manifest.
pub fn laws_dir() -> Option<PathBuf> {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent() // packages/
        .and_then(|p| p.parent()) // project root
        .map(|p| p.join("laws"))
}

/// Load every `.yaml` file under `laws/` into the service.
///
/// A file that fails to load aborts the run: a broken law would otherwise
/// surface as confusing scenario failures.
pub fn load_all_laws(service: &LawExecutionService) -> Result<usize, EngineError> {
    let laws_dir =
        laws_dir().ok_or_else(|| EngineError::LoadError("Could not find laws directory".to_string()))?;

    if !laws_dir.exists() {
        return Err(EngineError::LoadError(format!(
            "Laws directory not found: {}",
            laws_dir.display()
        )));
    }

    let mut count = 0;

    for entry in WalkDir::new(&laws_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "yaml") {
            let id = service.load_file(path)?;
            tracing::debug!(id = %id, path = %path.display(), "Loaded law");
            count += 1;
        }
    }

    tracing::info!(count = count, "Loaded laws");
    Ok(count)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::load_all_laws;
    use machine_law_engine::LawExecutionService;

    #[test]
    fn test_load_all_laws() {
        let service = LawExecutionService::new();
        let count = load_all_laws(&service).expect("Failed to load laws");
        assert!(count >= 4, "Expected every law file to load, got {}", count);
    }

    #[test]
    fn test_specific_laws_loaded() {
        let service = LawExecutionService::new();
        load_all_laws(&service).expect("Failed to load laws");

        assert!(service.has_law("TOESLAGEN", "zorgtoeslagwet"));
        assert!(service.has_law("RvIG", "wet_brp"));
        assert!(service.has_law("BELASTINGDIENST", "wet_inkomstenbelasting"));
        // two versions of zorgtoeslagwet share one (service, law) pair
        assert_eq!(service.law_count(), 3);
    }
}
