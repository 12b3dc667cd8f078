//! Rule evaluation engine
//!
//! A [`RulesEngine`] wraps one parsed [`RuleSpecification`] and evaluates it
//! for an [`Evaluation`] request:
//!
//! 1. warn about missing required parameters
//! 2. evaluate the requirements
//! 3. when met, evaluate the actions needed for the requested output in
//!    dependency order, stopping once a required value is missing
//! 4. when a required value was missing, discard every output
//!
//! # Example
//!
//! ```ignore
//! use machine_law_engine::{Evaluation, RulesEngine};
//!
//! let engine = RulesEngine::from_yaml_str(yaml)?;
//! let request = Evaluation::for_date("2025-01-01")?
//!     .with_parameter("BSN", "999993653")
//!     .requesting("hoogte_toeslag");
//!
//! let result = engine.evaluate(&request)?;
//! println!("{:?}", result.output);
//! ```

use crate::cache::ValueCache;
use crate::claims::{Claim, Claims, ExternalClaimResolver};
use crate::context::RuleContext;
use crate::dependencies::get_required_actions;
use crate::error::{EngineError, Result};
use crate::expression::Action;
use crate::operations::{evaluate, evaluate_requirements, ValueResolver};
use crate::rulespec::RuleSpecification;
use crate::service::ServiceProvider;
use crate::sources::{ExternalSourceResolver, SourceDataFrame};
use crate::trace::PathNode;
use crate::types::{parse_date, PathNodeType, Record, Value};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// What-if values per service, then per field
pub type OverwriteInput = BTreeMap<String, Record>;

/// One evaluation request
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub parameters: Record,
    pub overwrite_input: OverwriteInput,
    pub sources: Option<Arc<dyn SourceDataFrame>>,
    pub claims: Claims,
    pub reference_date: NaiveDate,
    /// Date the decision takes effect; the reference date when unset
    pub effective_date: Option<NaiveDate>,
    /// Output to compute; every output when `None`
    pub requested_output: Option<String>,
    /// Use approved claims only
    pub approved: bool,
    /// Nesting level of cross-law evaluation
    pub(crate) depth: usize,
}

impl Evaluation {
    pub fn new(reference_date: NaiveDate) -> Self {
        Self {
            parameters: Record::new(),
            overwrite_input: OverwriteInput::new(),
            sources: None,
            claims: Claims::new(),
            reference_date,
            effective_date: None,
            requested_output: None,
            approved: false,
            depth: 0,
        }
    }

    /// Request for a `YYYY-MM-DD` reference date.
    pub fn for_date(reference_date: &str) -> Result<Self> {
        parse_date(reference_date)
            .map(Self::new)
            .ok_or_else(|| EngineError::InvalidDate(reference_date.to_string()))
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Record) -> Self {
        self.parameters.extend(parameters);
        self
    }

    /// Overwrite `field` of `service` with `value`.
    pub fn with_overwrite(
        mut self,
        service: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.overwrite_input
            .entry(service.into())
            .or_default()
            .insert(field.into(), value.into());
        self
    }

    pub fn with_sources(mut self, sources: Arc<dyn SourceDataFrame>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn with_claims(mut self, claims: Claims) -> Self {
        self.claims = claims;
        self
    }

    pub fn with_claim(mut self, field: impl Into<String>, claim: Claim) -> Self {
        self.claims.insert(field.into(), claim);
        self
    }

    pub fn with_effective_date(mut self, effective_date: NaiveDate) -> Self {
        self.effective_date = Some(effective_date);
        self
    }

    pub fn requesting(mut self, output: impl Into<String>) -> Self {
        self.requested_output = Some(output.into());
        self
    }

    pub fn approved_only(mut self) -> Self {
        self.approved = true;
        self
    }

    pub fn effective_date(&self) -> NaiveDate {
        self.effective_date.unwrap_or(self.reference_date)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Outcome of an evaluation
#[derive(Debug, Clone, Serialize)]
pub struct RuleResult {
    /// Every `$` reference resolved during the evaluation, by path
    pub input: Record,
    /// Computed outputs; empty when a required value was missing
    pub output: Record,
    pub requirements_met: bool,
    pub missing_required: bool,
    /// Trace of the evaluation
    pub path: PathNode,
    pub rulespec_id: String,
}

impl RuleResult {
    pub fn output_value(&self, name: &str) -> Option<&Value> {
        self.output.get(name)
    }
}

/// Evaluates one rule specification.
///
/// The engine is immutable after construction and can serve concurrent
/// evaluations; per-call state lives in a fresh [`RuleContext`].
pub struct RulesEngine {
    spec: Arc<RuleSpecification>,
    external_sources: Option<Arc<dyn ExternalSourceResolver>>,
    external_claims: Option<Arc<dyn ExternalClaimResolver>>,
    cache: Arc<ValueCache>,
}

impl fmt::Debug for RulesEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RulesEngine")
            .field("service", &self.spec.service)
            .field("law", &self.spec.law)
            .field("rulespec_id", &self.spec.id())
            .field("external_sources", &self.external_sources.is_some())
            .field("external_claims", &self.external_claims.is_some())
            .finish_non_exhaustive()
    }
}

impl RulesEngine {
    pub fn new(spec: RuleSpecification) -> Self {
        Self::from_shared(Arc::new(spec))
    }

    pub fn from_shared(spec: Arc<RuleSpecification>) -> Self {
        Self {
            spec,
            external_sources: None,
            external_claims: None,
            cache: Arc::new(ValueCache::new()),
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(Self::new(RuleSpecification::from_yaml_str(yaml)?))
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(RuleSpecification::from_yaml_file(path)?))
    }

    /// Resolver for source tables the request does not carry.
    pub fn with_external_sources(mut self, resolver: Arc<dyn ExternalSourceResolver>) -> Self {
        self.external_sources = Some(resolver);
        self
    }

    /// Claim store asked for fields the request has no claim for.
    pub fn with_external_claims(mut self, resolver: Arc<dyn ExternalClaimResolver>) -> Self {
        self.external_claims = Some(resolver);
        self
    }

    /// Share a lookup cache with other engines.
    pub fn with_cache(mut self, cache: Arc<ValueCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn spec(&self) -> &RuleSpecification {
        &self.spec
    }

    pub fn cache(&self) -> &Arc<ValueCache> {
        &self.cache
    }

    /// Evaluate without cross-law support; service references stay
    /// unresolved.
    pub fn evaluate(&self, request: &Evaluation) -> Result<RuleResult> {
        self.evaluate_with(request, None)
    }

    /// Evaluate, resolving service references through `services`.
    pub fn evaluate_with(
        &self,
        request: &Evaluation,
        services: Option<&dyn ServiceProvider>,
    ) -> Result<RuleResult> {
        let spec = self.spec.as_ref();
        tracing::debug!(
            service = %spec.service,
            law = %spec.law,
            reference_date = %request.reference_date,
            requested_output = ?request.requested_output,
            "Evaluating rule specification"
        );

        for parameter in spec.required_parameters() {
            if !request.parameters.contains_key(&parameter.name) {
                tracing::warn!(
                    parameter = %parameter.name,
                    law = %spec.law,
                    "Required parameter not provided"
                );
            }
        }

        let mut ctx = RuleContext::new(spec, request, &self.cache)
            .with_services(services)
            .with_external_sources(self.external_sources.as_deref())
            .with_external_claims(self.external_claims.as_deref());

        let trace = ctx.trace_mut();
        trace.push("evaluation", PathNodeType::Root);
        trace.add_detail("service", spec.service.as_str());
        trace.add_detail("law", spec.law.as_str());
        trace.add_detail("reference_date", Value::Date(request.reference_date));
        if let Some(output) = &request.requested_output {
            trace.add_detail("requested_output", output.as_str());
        }

        ctx.trace_mut()
            .push("requirements", PathNodeType::Requirements);
        let mut requirements_met = evaluate_requirements(&spec.requirements, &mut ctx)?;
        ctx.trace_mut().set_result(Value::Bool(requirements_met));
        ctx.trace_mut().pop();

        if requirements_met && !ctx.missing_required() {
            let actions = get_required_actions(request.requested_output.as_deref(), &spec.actions)?;
            for action in actions {
                evaluate_action(action, &mut ctx)?;
                if ctx.missing_required() {
                    tracing::debug!(output = %action.output, "Stopping after missing required value");
                    break;
                }
            }
        }

        let missing_required = ctx.missing_required();
        if missing_required {
            requirements_met = false;
        }
        ctx.trace_mut().set_result(Value::Bool(requirements_met));

        let parts = ctx.into_parts();
        let output = if missing_required {
            Record::new()
        } else {
            parts.outputs
        };
        let path = parts
            .trace
            .build()
            .unwrap_or_else(|| PathNode::new(PathNodeType::Root, "evaluation"));

        Ok(RuleResult {
            input: parts.resolved,
            output,
            requirements_met,
            missing_required,
            path,
            rulespec_id: spec.id().to_string(),
        })
    }
}

/// Evaluate one action into the context's outputs, applying an
/// action-level overwrite and the declared output type.
fn evaluate_action(action: &Action, ctx: &mut RuleContext<'_>) -> Result<()> {
    let spec = ctx.spec();
    ctx.trace_mut()
        .push(action.output.as_str(), PathNodeType::Action);

    let overwrite = ctx
        .request()
        .overwrite_input
        .get(&spec.service)
        .and_then(|fields| fields.get(&action.output))
        .cloned();
    let raw = match overwrite {
        Some(value) => {
            tracing::debug!(output = %action.output, "Using overwritten action value");
            ctx.trace_mut().add_detail("overwritten", true);
            value
        }
        None => evaluate(&action.expr, ctx)?,
    };

    let value = match spec.output_spec(&action.output) {
        Some(output_spec) => output_spec.enforce(raw),
        None => raw,
    };
    ctx.trace_mut().set_result(value.clone());
    ctx.trace_mut().pop();
    ctx.set_output(action.output.as_str(), value);
    Ok(())
}
