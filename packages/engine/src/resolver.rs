//! Registry of loaded rule specifications
//!
//! Specifications are indexed by `(service, law)`. One law can have several
//! versions, each with its own `valid_from`. A lookup for a reference date
//! selects the version with the most recent `valid_from` that is not after
//! that date; a version without `valid_from` is valid from the beginning of
//! time.
//!
//! The registry holds at most [`crate::config::MAX_LOADED_SPECS`] versions.

use crate::config;
use crate::error::{EngineError, Result};
use crate::rulespec::RuleSpecification;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Loaded specifications by service and law.
///
/// ```ignore
/// use machine_law_engine::RuleResolver;
///
/// let mut resolver = RuleResolver::new();
/// resolver.load_from_yaml(zorgtoeslag_2024)?; // valid_from: 2024-01-01
/// resolver.load_from_yaml(zorgtoeslag_2025)?; // valid_from: 2025-01-01
///
/// let spec = resolver.get_rule_spec("TOESLAGEN", "zorgtoeslagwet", date)?;
/// ```
#[derive(Debug, Default)]
pub struct RuleResolver {
    /// Versions per (service, law), newest `valid_from` first
    versions: HashMap<(String, String), Vec<Arc<RuleSpecification>>>,
}

impl RuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a specification, replacing a loaded version of the same law with
    /// the same `valid_from`.
    pub fn load_spec(&mut self, spec: RuleSpecification) -> Result<Arc<RuleSpecification>> {
        let key = (spec.service.clone(), spec.law.clone());
        let valid_from = spec.valid_from;

        let total = self.version_count();
        let replaces = self
            .versions
            .get(&key)
            .is_some_and(|versions| versions.iter().any(|v| v.valid_from == valid_from));
        if !replaces && total >= config::MAX_LOADED_SPECS {
            tracing::warn!(
                current = total,
                max = config::MAX_LOADED_SPECS,
                service = %key.0,
                law = %key.1,
                "Maximum specification count exceeded"
            );
            return Err(EngineError::LoadError(format!(
                "Maximum number of specifications exceeded ({})",
                config::MAX_LOADED_SPECS
            )));
        }

        let spec = Arc::new(spec);
        let versions = self.versions.entry(key.clone()).or_default();
        match versions.iter().position(|v| v.valid_from == valid_from) {
            Some(idx) => {
                tracing::debug!(service = %key.0, law = %key.1, valid_from = ?valid_from, "Replacing existing version");
                versions[idx] = Arc::clone(&spec);
            }
            None => {
                tracing::debug!(service = %key.0, law = %key.1, valid_from = ?valid_from, "Adding new version");
                versions.push(Arc::clone(&spec));
            }
        }
        // None sorts before Some, so undated versions end up last
        versions.sort_by(|a, b| b.valid_from.cmp(&a.valid_from));

        tracing::debug!(
            service = %key.0,
            law = %key.1,
            id = %spec.id(),
            total = self.version_count(),
            "Specification loaded"
        );
        Ok(spec)
    }

    /// Load a specification from YAML, returning its id.
    pub fn load_from_yaml(&mut self, yaml: &str) -> Result<String> {
        let spec = self.load_spec(RuleSpecification::from_yaml_str(yaml)?)?;
        Ok(spec.id().to_string())
    }

    /// Load a specification file, returning its id.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<String> {
        let spec = self.load_spec(RuleSpecification::from_yaml_file(path)?)?;
        Ok(spec.id().to_string())
    }

    /// Version of `(service, law)` in force on `reference_date`.
    pub fn get_rule_spec(
        &self,
        service: &str,
        law: &str,
        reference_date: NaiveDate,
    ) -> Result<Arc<RuleSpecification>> {
        self.versions
            .get(&(service.to_string(), law.to_string()))
            .and_then(|versions| {
                versions
                    .iter()
                    .find(|v| v.valid_from.is_none_or(|from| from <= reference_date))
            })
            .cloned()
            .ok_or_else(|| EngineError::RuleSpecNotFound {
                service: service.to_string(),
                law: law.to_string(),
                date: reference_date.format("%Y-%m-%d").to_string(),
            })
    }

    /// Services with at least one loaded law, sorted.
    pub fn list_services(&self) -> Vec<&str> {
        let mut services: Vec<&str> = self.versions.keys().map(|(s, _)| s.as_str()).collect();
        services.sort_unstable();
        services.dedup();
        services
    }

    /// Laws loaded for a service, sorted.
    pub fn list_laws(&self, service: &str) -> Vec<&str> {
        let mut laws: Vec<&str> = self
            .versions
            .keys()
            .filter(|(s, _)| s == service)
            .map(|(_, l)| l.as_str())
            .collect();
        laws.sort_unstable();
        laws
    }

    pub fn has_law(&self, service: &str, law: &str) -> bool {
        self.versions
            .contains_key(&(service.to_string(), law.to_string()))
    }

    /// Number of distinct (service, law) pairs.
    pub fn law_count(&self) -> usize {
        self.versions.len()
    }

    /// Total number of loaded versions.
    pub fn version_count(&self) -> usize {
        self.versions.values().map(Vec::len).sum()
    }

    /// Remove every version of a law.
    pub fn unload_law(&mut self, service: &str, law: &str) -> bool {
        self.versions
            .remove(&(service.to_string(), law.to_string()))
            .is_some()
    }
}
