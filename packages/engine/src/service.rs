//! Service layer for cross-law evaluation
//!
//! A field with a `service_reference` is computed by evaluating another law.
//! The engine asks a [`ServiceProvider`] for that evaluation;
//! [`LawExecutionService`] is the provider backed by a [`RuleResolver`].
//!
//! # Example
//!
//! ```ignore
//! use machine_law_engine::{Evaluation, LawExecutionService};
//!
//! let service = LawExecutionService::new();
//! service.load_yaml(zorgtoeslagwet_yaml)?;
//! service.load_yaml(wet_brp_yaml)?;
//!
//! let request = Evaluation::for_date("2025-01-01")?
//!     .with_parameter("BSN", "999993653");
//!
//! // service references in zorgtoeslagwet are evaluated against wet_brp
//! let result = service.evaluate_law("TOESLAGEN", "zorgtoeslagwet", request)?;
//! ```

use crate::cache::ValueCache;
use crate::claims::{Claims, ExternalClaimResolver};
use crate::config;
use crate::engine::{Evaluation, OverwriteInput, RuleResult, RulesEngine};
use crate::error::{EngineError, Result};
use crate::resolver::RuleResolver;
use crate::rulespec::RuleSpecification;
use crate::sources::{ExternalSourceResolver, SourceDataFrame};
use crate::types::Record;
use chrono::NaiveDate;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Request to evaluate another law for one of its outputs
#[derive(Debug, Clone)]
pub struct ServiceCall {
    pub service: String,
    pub law: String,
    pub parameters: Record,
    pub reference_date: NaiveDate,
    pub effective_date: NaiveDate,
    pub overwrite_input: OverwriteInput,
    /// Tables of the calling evaluation
    pub sources: Option<Arc<dyn SourceDataFrame>>,
    pub requested_output: Option<String>,
    pub approved: bool,
    /// Nesting level of the call; the top-level evaluation is 0
    pub depth: usize,
}

/// Evaluates laws on behalf of the service resolver.
pub trait ServiceProvider: Send + Sync {
    fn evaluate(&self, call: ServiceCall) -> Result<RuleResult>;

    /// Counter that changes whenever data held by the provider (such as
    /// registered claims) changes; cached results of earlier generations
    /// are not reused.
    fn generation(&self) -> u64 {
        0
    }
}

/// Registry-backed [`ServiceProvider`].
///
/// Engines are built once per specification and reused; lookups are cached
/// in one [`ValueCache`] shared by every engine. All methods take `&self`,
/// so the service can be shared between threads and loaded while serving.
pub struct LawExecutionService {
    resolver: RwLock<RuleResolver>,
    engines: DashMap<String, Arc<RulesEngine>>,
    cache: Arc<ValueCache>,
    sources: Option<Arc<dyn SourceDataFrame>>,
    external_sources: Option<Arc<dyn ExternalSourceResolver>>,
    external_claims: Option<Arc<dyn ExternalClaimResolver>>,
    claims: DashMap<(String, String), Claims>,
    claims_generation: AtomicU64,
}

impl Default for LawExecutionService {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LawExecutionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LawExecutionService")
            .field("laws", &self.resolver.read().law_count())
            .field("engines", &self.engines.len())
            .field("cached", &self.cache.len())
            .field("claims_generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl LawExecutionService {
    pub fn new() -> Self {
        Self::with_resolver(RuleResolver::new())
    }

    pub fn with_resolver(resolver: RuleResolver) -> Self {
        Self {
            resolver: RwLock::new(resolver),
            engines: DashMap::new(),
            cache: Arc::new(ValueCache::new()),
            sources: None,
            external_sources: None,
            external_claims: None,
            claims: DashMap::new(),
            claims_generation: AtomicU64::new(0),
        }
    }

    /// Tables used when a request carries none.
    pub fn with_sources(mut self, sources: Arc<dyn SourceDataFrame>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn with_external_sources(mut self, resolver: Arc<dyn ExternalSourceResolver>) -> Self {
        self.external_sources = Some(resolver);
        self.engines.clear();
        self
    }

    pub fn with_external_claims(mut self, resolver: Arc<dyn ExternalClaimResolver>) -> Self {
        self.external_claims = Some(resolver);
        self.engines.clear();
        self.cache.clear();
        self
    }

    pub fn with_cache(mut self, cache: Arc<ValueCache>) -> Self {
        self.cache = cache;
        self.engines.clear();
        self
    }

    pub fn cache(&self) -> &Arc<ValueCache> {
        &self.cache
    }

    /// Register a specification, returning its id.
    pub fn load_spec(&self, spec: RuleSpecification) -> Result<String> {
        let spec = self.resolver.write().load_spec(spec)?;
        // a reloaded document may reuse its uuid
        self.engines.remove(spec.id());
        Ok(spec.id().to_string())
    }

    pub fn load_yaml(&self, yaml: &str) -> Result<String> {
        self.load_spec(RuleSpecification::from_yaml_str(yaml)?)
    }

    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<String> {
        self.load_spec(RuleSpecification::from_yaml_file(path)?)
    }

    pub fn has_law(&self, service: &str, law: &str) -> bool {
        self.resolver.read().has_law(service, law)
    }

    pub fn law_count(&self) -> usize {
        self.resolver.read().law_count()
    }

    /// Current claims for one law; they replace earlier claims for it.
    ///
    /// Cached nested results computed before the change are no longer used.
    pub fn set_claims(&self, service: &str, law: &str, claims: Claims) {
        self.claims
            .insert((service.to_string(), law.to_string()), claims);
        self.claims_changed();
    }

    pub fn clear_claims(&self) {
        self.claims.clear();
        self.claims_changed();
    }

    fn claims_changed(&self) {
        let generation = self.claims_generation.fetch_add(1, Ordering::SeqCst) + 1;
        // entries of older generations can never be hit again
        self.cache.clear();
        tracing::debug!(generation, "Registered claims changed");
    }

    /// Evaluate the version of `(service, law)` in force on the request's
    /// reference date.
    ///
    /// A request without sources or claims gets the service's defaults;
    /// nested calls carry the sources of the evaluation that made them.
    pub fn evaluate_law(&self, service: &str, law: &str, request: Evaluation) -> Result<RuleResult> {
        if request.depth > config::MAX_CROSS_LAW_DEPTH {
            tracing::warn!(
                service = %service,
                law = %law,
                depth = request.depth,
                "Cross-law evaluation nested too deeply"
            );
            return Err(EngineError::CircularReference(format!(
                "{}/{} reached nesting depth {} (maximum {})",
                service,
                law,
                request.depth,
                config::MAX_CROSS_LAW_DEPTH
            )));
        }

        let spec = self
            .resolver
            .read()
            .get_rule_spec(service, law, request.reference_date)?;
        let engine = self.engine_for(spec);

        let mut request = request;
        if request.sources.is_none() {
            request.sources = self.sources.clone();
        }
        if request.claims.is_empty() {
            if let Some(claims) = self.claims.get(&(service.to_string(), law.to_string())) {
                request.claims = claims.value().clone();
            }
        }

        tracing::debug!(
            service = %service,
            law = %law,
            depth = request.depth,
            requested_output = ?request.requested_output,
            "Evaluating law"
        );
        let result = engine.evaluate_with(&request, Some(self))?;
        tracing::debug!(
            service = %service,
            law = %law,
            requirements_met = result.requirements_met,
            missing_required = result.missing_required,
            "Law evaluated"
        );
        Ok(result)
    }

    fn engine_for(&self, spec: Arc<RuleSpecification>) -> Arc<RulesEngine> {
        let id = spec.id().to_string();
        if let Some(engine) = self.engines.get(&id) {
            return Arc::clone(engine.value());
        }
        let mut engine = RulesEngine::from_shared(spec).with_cache(Arc::clone(&self.cache));
        if let Some(external) = &self.external_sources {
            engine = engine.with_external_sources(Arc::clone(external));
        }
        if let Some(external) = &self.external_claims {
            engine = engine.with_external_claims(Arc::clone(external));
        }
        let engine = Arc::new(engine);
        self.engines.insert(id, Arc::clone(&engine));
        engine
    }
}

impl ServiceProvider for LawExecutionService {
    fn evaluate(&self, call: ServiceCall) -> Result<RuleResult> {
        let mut request = Evaluation::new(call.reference_date)
            .with_parameters(call.parameters)
            .with_effective_date(call.effective_date);
        request.overwrite_input = call.overwrite_input;
        request.sources = call.sources;
        request.requested_output = call.requested_output;
        request.approved = call.approved;
        request.depth = call.depth;
        self.evaluate_law(&call.service, &call.law, request)
    }

    fn generation(&self) -> u64 {
        self.claims_generation.load(Ordering::SeqCst)
    }
}
