//! Evaluation context for one rule evaluation
//!
//! A [`RuleContext`] is created per call and owns everything that changes
//! while actions run: computed outputs, the FOREACH scope, the
//! `missing_required` flag, the resolved-input record and the trace. The
//! specification, request and shared cache are borrowed read-only.
//!
//! # Resolution
//!
//! `$name` references resolve in this order:
//! 1. **Date shortcuts** - `calculation_date`, `january_first`,
//!    `prev_january_first`, `year`
//! 2. **Dotted paths** - `a.b.c` resolves `a`, then navigates records,
//!    lists (numeric index) and dates (`year`, `month`, `day`)
//! 3. **Resolver chain** - claim, local, definition, parameter, output,
//!    overwrite, source, service; first match wins
//!
//! A name nothing answers yields `null`. If its property is marked
//! required, `missing_required` is set and stays set.

use crate::cache::ValueCache;
use crate::claims::{applicable_claims, Claims, ExternalClaimResolver};
use crate::config::MAX_PROPERTY_DEPTH;
use crate::engine::Evaluation;
use crate::error::{EngineError, Result};
use crate::operations::ValueResolver;
use crate::resolution::RESOLVER_CHAIN;
use crate::rulespec::RuleSpecification;
use crate::service::ServiceProvider;
use crate::sources::{ExternalSourceResolver, SourceDataFrame};
use crate::trace::TraceBuilder;
use crate::types::{PathNodeType, Record, ResolveType, Value};
use chrono::{Datelike, NaiveDate};

/// Mutable state of a single evaluation
pub struct RuleContext<'a> {
    spec: &'a RuleSpecification,
    request: &'a Evaluation,
    claims: Claims,
    sources: Option<&'a dyn SourceDataFrame>,
    external_sources: Option<&'a dyn ExternalSourceResolver>,
    external_claims: Option<&'a dyn ExternalClaimResolver>,
    services: Option<&'a dyn ServiceProvider>,
    cache: &'a ValueCache,
    local: Option<Record>,
    outputs: Record,
    resolved: Record,
    missing_required: bool,
    trace: TraceBuilder,
}

/// What an evaluation leaves behind
#[derive(Debug)]
pub struct ContextParts {
    pub outputs: Record,
    pub resolved: Record,
    pub missing_required: bool,
    pub trace: TraceBuilder,
}

impl<'a> RuleContext<'a> {
    pub fn new(spec: &'a RuleSpecification, request: &'a Evaluation, cache: &'a ValueCache) -> Self {
        Self {
            spec,
            request,
            claims: applicable_claims(&request.claims, request.approved),
            sources: request.sources.as_deref(),
            external_sources: None,
            external_claims: None,
            services: None,
            cache,
            local: None,
            outputs: Record::new(),
            resolved: Record::new(),
            missing_required: false,
            trace: TraceBuilder::new(),
        }
    }

    pub fn with_services(mut self, services: Option<&'a dyn ServiceProvider>) -> Self {
        self.services = services;
        self
    }

    pub fn with_external_sources(
        mut self,
        external_sources: Option<&'a dyn ExternalSourceResolver>,
    ) -> Self {
        self.external_sources = external_sources;
        self
    }

    pub fn with_external_claims(
        mut self,
        external_claims: Option<&'a dyn ExternalClaimResolver>,
    ) -> Self {
        self.external_claims = external_claims;
        self
    }

    pub fn spec(&self) -> &'a RuleSpecification {
        self.spec
    }

    pub fn request(&self) -> &'a Evaluation {
        self.request
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.request.reference_date
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn local(&self) -> Option<&Record> {
        self.local.as_ref()
    }

    pub fn sources(&self) -> Option<&'a dyn SourceDataFrame> {
        self.sources
    }

    pub fn external_sources(&self) -> Option<&'a dyn ExternalSourceResolver> {
        self.external_sources
    }

    pub fn external_claims(&self) -> Option<&'a dyn ExternalClaimResolver> {
        self.external_claims
    }

    pub fn services(&self) -> Option<&'a dyn ServiceProvider> {
        self.services
    }

    pub fn cache(&self) -> &'a ValueCache {
        self.cache
    }

    pub fn outputs(&self) -> &Record {
        &self.outputs
    }

    pub fn set_output(&mut self, name: impl Into<String>, value: Value) {
        self.outputs.insert(name.into(), value);
    }

    pub fn mark_missing_required(&mut self) {
        self.missing_required = true;
    }

    pub fn trace_mut(&mut self) -> &mut TraceBuilder {
        &mut self.trace
    }

    pub fn into_parts(self) -> ContextParts {
        ContextParts {
            outputs: self.outputs,
            resolved: self.resolved,
            missing_required: self.missing_required,
            trace: self.trace,
        }
    }

    /// Resolve a `$` reference (without the `$`), recording a trace node.
    pub fn resolve_path(&mut self, path: &str) -> Result<Value> {
        self.trace.push(path, PathNodeType::Resolve);
        let result = self.resolve_unrecorded(path);
        if let Ok(value) = &result {
            self.trace.set_result(value.clone());
            self.resolved.insert(path.to_string(), value.clone());
        }
        self.trace.pop();
        result
    }

    fn resolve_unrecorded(&mut self, path: &str) -> Result<Value> {
        if let Some(value) = self.date_shortcut(path) {
            self.trace.set_resolve_type(ResolveType::Date);
            return Ok(value);
        }

        if let Some((root, rest)) = path.split_once('.') {
            let segments: Vec<&str> = rest.split('.').collect();
            if segments.len() + 1 > MAX_PROPERTY_DEPTH {
                return Err(EngineError::Configuration(format!(
                    "reference '{}' exceeds maximum property depth of {}",
                    path, MAX_PROPERTY_DEPTH
                )));
            }
            let mut value = self.resolve_path(root)?;
            for segment in segments {
                value = match value.property(segment) {
                    Some(next) => next,
                    None => {
                        tracing::debug!(path = %path, segment = %segment, "Property not found");
                        Value::Null
                    }
                };
                if value.is_null() {
                    break;
                }
            }
            self.trace.set_resolve_type(ResolveType::Property);
            return Ok(value);
        }

        self.resolve_name(path)
    }

    fn date_shortcut(&self, name: &str) -> Option<Value> {
        let date = self.reference_date();
        match name {
            "calculation_date" => Some(Value::Date(date)),
            "january_first" => Some(Value::String(format!("{:04}-01-01", date.year()))),
            "prev_january_first" => Some(Value::String(format!("{:04}-01-01", date.year() - 1))),
            "year" => Some(Value::Int(i64::from(date.year()))),
            _ => None,
        }
    }

    fn resolve_name(&mut self, name: &str) -> Result<Value> {
        let spec = self.spec;
        let property = spec.property_spec(name);
        let declared_required = property.is_some_and(|p| p.required);

        for resolver in RESOLVER_CHAIN {
            let Some(resolved) = resolver.resolve(self, name, property)? else {
                continue;
            };
            self.trace.set_resolve_type(resolver.resolve_type());
            self.trace
                .set_required(declared_required || resolved.required);
            for (key, detail) in resolved.type_details {
                self.trace.add_detail(key, detail);
            }
            if resolved.missing_required {
                self.missing_required = true;
            }
            return Ok(resolved.value);
        }

        self.trace.set_resolve_type(ResolveType::None);
        self.trace.set_required(declared_required);
        if declared_required {
            tracing::warn!(
                field = %name,
                service = %spec.service,
                law = %spec.law,
                "Required value could not be resolved"
            );
            self.missing_required = true;
        } else {
            tracing::debug!(field = %name, "No resolver matched");
        }
        Ok(Value::Null)
    }
}

impl ValueResolver for RuleContext<'_> {
    fn resolve(&mut self, path: &str) -> Result<Value> {
        self.resolve_path(path)
    }

    fn replace_local(&mut self, scope: Option<Record>) -> Option<Record> {
        std::mem::replace(&mut self.local, scope)
    }

    fn trace(&mut self) -> &mut TraceBuilder {
        &mut self.trace
    }

    fn missing_required(&self) -> bool {
        self.missing_required
    }
}
