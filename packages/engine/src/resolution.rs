//! Resolver chain for `$name` references
//!
//! Each strategy answers a plain name from one value source. The chain
//! order is fixed and the first strategy that answers wins:
//!
//! | # | resolver | source |
//! |---|----------|--------|
//! | 1 | [`ClaimResolver`] | citizen claims |
//! | 2 | [`LocalResolver`] | FOREACH bindings |
//! | 3 | [`DefinitionResolver`] | law constants |
//! | 4 | [`ParameterResolver`] | caller parameters |
//! | 5 | [`OutputResolver`] | outputs of earlier actions |
//! | 6 | [`OverwriteResolver`] | what-if overrides |
//! | 7 | [`SourceResolver`] | tabular data (local, then external) |
//! | 8 | [`ServiceResolver`] | evaluation of another law |

use crate::cache::{cache_key, CacheScope, CachedValue};
use crate::context::RuleContext;
use crate::error::Result;
use crate::expression::Expr;
use crate::operations::{evaluate, ValueResolver};
use crate::rulespec::{PropertySpec, SourceReference};
use crate::service::ServiceCall;
use crate::sources::{DataFrame, FilterOp, RecordFrame, SourceFilter};
use crate::types::{PathNodeType, Record, ResolveType, Value};

/// A value answered by a resolver
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub value: Value,
    pub required: bool,
    /// The value came from an evaluation that itself missed required data
    pub missing_required: bool,
    pub type_details: Record,
}

impl Resolved {
    fn new(value: Value, property: Option<&PropertySpec>) -> Self {
        Self {
            value,
            required: property.is_some_and(|p| p.required),
            missing_required: false,
            type_details: property.map(PropertySpec::type_details).unwrap_or_default(),
        }
    }
}

/// One value source in the chain.
pub trait Resolver: Sync {
    fn resolve_type(&self) -> ResolveType;

    /// Answer `name`, or `None` to let the next resolver try.
    fn resolve<'a>(
        &self,
        ctx: &mut RuleContext<'a>,
        name: &str,
        property: Option<&'a PropertySpec>,
    ) -> Result<Option<Resolved>>;
}

/// The chain in precedence order.
pub const RESOLVER_CHAIN: [&dyn Resolver; 8] = [
    &ClaimResolver,
    &LocalResolver,
    &DefinitionResolver,
    &ParameterResolver,
    &OutputResolver,
    &OverwriteResolver,
    &SourceResolver,
    &ServiceResolver,
];

// =============================================================================
// In-memory resolvers
// =============================================================================

/// Claims carried by the request, then the external claim store for
/// declared input and source fields.
pub struct ClaimResolver;

impl Resolver for ClaimResolver {
    fn resolve_type(&self) -> ResolveType {
        ResolveType::Claim
    }

    fn resolve<'a>(
        &self,
        ctx: &mut RuleContext<'a>,
        name: &str,
        property: Option<&'a PropertySpec>,
    ) -> Result<Option<Resolved>> {
        let request_claim = ctx.claims().get(name).cloned();
        let claim = match request_claim {
            Some(claim) => Some(claim),
            None => match (ctx.external_claims(), property) {
                (Some(external), Some(_)) => {
                    let request = ctx.request();
                    let claim = external
                        .lookup(&ctx.spec().law, name, &request.parameters)?
                        .filter(|claim| claim.applies(request.approved));
                    if claim.is_some() {
                        ctx.trace().add_detail("external", true);
                    }
                    claim
                }
                _ => None,
            },
        };
        Ok(claim.map(|claim| {
            let mut resolved = Resolved::new(claim.value, property);
            resolved.required |= claim.required;
            resolved
        }))
    }
}

pub struct LocalResolver;

impl Resolver for LocalResolver {
    fn resolve_type(&self) -> ResolveType {
        ResolveType::Local
    }

    fn resolve<'a>(
        &self,
        ctx: &mut RuleContext<'a>,
        name: &str,
        property: Option<&'a PropertySpec>,
    ) -> Result<Option<Resolved>> {
        Ok(ctx
            .local()
            .and_then(|scope| scope.get(name))
            .map(|value| Resolved::new(value.clone(), property)))
    }
}

pub struct DefinitionResolver;

impl Resolver for DefinitionResolver {
    fn resolve_type(&self) -> ResolveType {
        ResolveType::Definition
    }

    fn resolve<'a>(
        &self,
        ctx: &mut RuleContext<'a>,
        name: &str,
        property: Option<&'a PropertySpec>,
    ) -> Result<Option<Resolved>> {
        let Some(definition) = ctx.spec().definition(name) else {
            return Ok(None);
        };
        // `legal_basis` is documentation only
        let value = match definition {
            Value::Object(map) if map.contains_key("value") && map.contains_key("legal_basis") => {
                map.get("value").cloned().unwrap_or_default()
            }
            other => other.clone(),
        };
        Ok(Some(Resolved::new(value, property)))
    }
}

pub struct ParameterResolver;

impl Resolver for ParameterResolver {
    fn resolve_type(&self) -> ResolveType {
        ResolveType::Parameter
    }

    fn resolve<'a>(
        &self,
        ctx: &mut RuleContext<'a>,
        name: &str,
        property: Option<&'a PropertySpec>,
    ) -> Result<Option<Resolved>> {
        Ok(ctx
            .request()
            .parameters
            .get(name)
            .map(|value| Resolved::new(value.clone(), property)))
    }
}

pub struct OutputResolver;

impl Resolver for OutputResolver {
    fn resolve_type(&self) -> ResolveType {
        ResolveType::Output
    }

    fn resolve<'a>(
        &self,
        ctx: &mut RuleContext<'a>,
        name: &str,
        property: Option<&'a PropertySpec>,
    ) -> Result<Option<Resolved>> {
        Ok(ctx
            .outputs()
            .get(name)
            .map(|value| Resolved::new(value.clone(), property)))
    }
}

/// Answers service-backed fields from `overwrite_input[service][field]`.
pub struct OverwriteResolver;

impl Resolver for OverwriteResolver {
    fn resolve_type(&self) -> ResolveType {
        ResolveType::Overwrite
    }

    fn resolve<'a>(
        &self,
        ctx: &mut RuleContext<'a>,
        _name: &str,
        property: Option<&'a PropertySpec>,
    ) -> Result<Option<Resolved>> {
        let Some(reference) = property.and_then(|p| p.service_reference.as_ref()) else {
            return Ok(None);
        };
        Ok(ctx
            .request()
            .overwrite_input
            .get(&reference.service)
            .and_then(|fields| fields.get(&reference.field))
            .map(|value| Resolved::new(value.clone(), property)))
    }
}

// =============================================================================
// Source resolver
// =============================================================================

/// Looks up `source_reference` fields in tabular data.
///
/// A table held locally is filtered in memory; lookup errors there are
/// logged and treated as no match. Otherwise an external resolver is asked
/// (at least one filter required) and its errors abort the evaluation.
pub struct SourceResolver;

impl Resolver for SourceResolver {
    fn resolve_type(&self) -> ResolveType {
        ResolveType::Source
    }

    fn resolve<'a>(
        &self,
        ctx: &mut RuleContext<'a>,
        name: &str,
        property: Option<&'a PropertySpec>,
    ) -> Result<Option<Resolved>> {
        let Some(reference) = property.and_then(|p| p.source_reference.as_ref()) else {
            return Ok(None);
        };
        let Some(table) = reference.table.as_deref() else {
            tracing::debug!(field = %name, "Source reference without table");
            return Ok(None);
        };

        let filters = source_filters(reference, ctx)?;

        if let Some(frame) = ctx.sources().and_then(|sources| sources.get(table)) {
            return match query_local(frame, &filters) {
                Ok(filtered) => {
                    let view: &dyn DataFrame = match &filtered {
                        Some(filtered) => filtered.as_ref(),
                        None => frame,
                    };
                    Ok(shape(view, reference).map(|value| Resolved::new(value, property)))
                }
                Err(err) => {
                    tracing::warn!(table = %table, field = %name, error = %err, "Source lookup failed");
                    Ok(None)
                }
            };
        }

        let Some(external) = ctx.external_sources() else {
            return Ok(None);
        };
        if filters.is_empty() {
            tracing::debug!(table = %table, "External source lookup needs at least one filter");
            return Ok(None);
        }

        let key_params: Record = filters
            .iter()
            .map(|f| (format!("{} {}", f.column, f.op), f.value.clone()))
            .collect();
        let key = cache_key(
            &format!("source:{}", table),
            &key_params,
            ctx.reference_date(),
            CacheScope::default(),
            false,
        );
        let records = match ctx.cache().get(&key) {
            Some(cached) => {
                ctx.trace_mut().add_detail("cached", true);
                cached.value
            }
            None => {
                let records = external
                    .lookup(table, &filters)?
                    .map(|rows| Value::Array(rows.into_iter().map(Value::Object).collect()))
                    .unwrap_or_default();
                ctx.cache().insert(
                    key,
                    CachedValue {
                        value: records.clone(),
                        missing_required: false,
                    },
                );
                records
            }
        };

        let Value::Array(rows) = records else {
            return Ok(None);
        };
        let frame = RecordFrame::new(
            rows.into_iter()
                .filter_map(|row| match row {
                    Value::Object(record) => Some(record),
                    _ => None,
                })
                .collect(),
        );
        Ok(shape(&frame, reference).map(|value| Resolved::new(value, property)))
    }
}

fn source_filters(reference: &SourceReference, ctx: &mut RuleContext<'_>) -> Result<Vec<SourceFilter>> {
    let mut filters = Vec::with_capacity(reference.select_on.len());
    for select in &reference.select_on {
        let (op, value) = match &select.value {
            Expr::Membership {
                negated: false,
                values,
                ..
            } => (FilterOp::In, evaluate(values, ctx)?),
            other => (FilterOp::Equals, evaluate(other, ctx)?),
        };
        filters.push(SourceFilter {
            column: select.name.clone(),
            op,
            value,
        });
    }
    Ok(filters)
}

/// Apply the filters in order; `None` when there are none.
fn query_local(
    frame: &dyn DataFrame,
    filters: &[SourceFilter],
) -> Result<Option<Box<dyn DataFrame>>> {
    let mut current: Option<Box<dyn DataFrame>> = None;
    for filter in filters {
        let next = match &current {
            Some(filtered) => filtered.filter(&filter.column, filter.op, &filter.value)?,
            None => frame.filter(&filter.column, filter.op, &filter.value)?,
        };
        current = Some(next);
    }
    Ok(current)
}

/// Turn matching rows into the field's value: `fields` keeps records,
/// `field` takes one column, neither keeps whole rows. One row unwraps,
/// none is no match.
fn shape(frame: &dyn DataFrame, reference: &SourceReference) -> Option<Value> {
    let mut values: Vec<Value> = if let Some(fields) = &reference.fields {
        frame
            .select(fields)
            .to_records()
            .into_iter()
            .map(Value::Object)
            .collect()
    } else if let Some(field) = &reference.field {
        if !frame.has_column(field) {
            tracing::debug!(field = %field, "Source column not present");
            return None;
        }
        frame.column_values(field)
    } else {
        frame.to_records().into_iter().map(Value::Object).collect()
    };

    match values.len() {
        0 => None,
        1 => values.pop(),
        _ => Some(Value::Array(values)),
    }
}

// =============================================================================
// Service resolver
// =============================================================================

/// Evaluates the law named in `service_reference` and takes its output.
///
/// Results are cached in the shared cache, keyed on the service path, the
/// resolved parameters, the reference date, the approved flag and the data
/// the nested law reads: overwrite input, source table fingerprint and the
/// provider's claims generation. Results over tables without a fingerprint
/// are not cached.
pub struct ServiceResolver;

impl Resolver for ServiceResolver {
    fn resolve_type(&self) -> ResolveType {
        ResolveType::Service
    }

    fn resolve<'a>(
        &self,
        ctx: &mut RuleContext<'a>,
        name: &str,
        property: Option<&'a PropertySpec>,
    ) -> Result<Option<Resolved>> {
        let Some(reference) = property.and_then(|p| p.service_reference.as_ref()) else {
            return Ok(None);
        };
        let Some(provider) = ctx.services() else {
            tracing::warn!(
                field = %name,
                service = %reference.service,
                law = %reference.law,
                "No service provider for service reference"
            );
            return Ok(None);
        };
        let request = ctx.request();

        let mut parameters = request.parameters.clone();
        for parameter in &reference.parameters {
            let value = evaluate(&parameter.reference, ctx)?;
            parameters.insert(parameter.name.clone(), value);
        }

        let mut reference_date = request.reference_date;
        if let Some(temporal) = property.and_then(|p| p.temporal.as_ref()) {
            if let Some(expr) = &temporal.reference {
                if let Some(date) = evaluate(expr, ctx)?.as_date() {
                    reference_date = date;
                }
            }
        }

        let path = format!("{}.{}.{}", reference.service, reference.law, reference.field);
        // tables without a fingerprint cannot be told apart, so nothing is cached
        let fingerprint = match &request.sources {
            Some(sources) => sources.fingerprint().map(Some),
            None => Some(None),
        };
        let key = fingerprint.map(|fingerprint| {
            let scope = CacheScope {
                overwrite: Some(&request.overwrite_input),
                sources: fingerprint.as_deref(),
                generation: provider.generation(),
            };
            cache_key(&path, &parameters, reference_date, scope, request.approved)
        });

        let mut resolved = Resolved::new(Value::Null, property);
        ctx.trace()
            .push(format!("Service: {}", path), PathNodeType::ServiceEvaluation);
        ctx.trace().add_detail("service", reference.service.as_str());
        ctx.trace().add_detail("law", reference.law.as_str());
        ctx.trace().add_detail("field", reference.field.as_str());

        if let Some(cached) = key.as_deref().and_then(|key| ctx.cache().get(key)) {
            tracing::debug!(path = %path, "Service result from cache");
            ctx.trace().add_detail("cached", true);
            resolved.value = cached.value;
            resolved.missing_required = cached.missing_required;
        } else {
            let call = ServiceCall {
                service: reference.service.clone(),
                law: reference.law.clone(),
                parameters,
                reference_date,
                effective_date: request.effective_date(),
                overwrite_input: request.overwrite_input.clone(),
                sources: request.sources.clone(),
                requested_output: Some(reference.field.clone()),
                approved: request.approved,
                depth: request.depth + 1,
            };
            let result = match provider.evaluate(call) {
                Ok(result) => result,
                Err(err) => {
                    ctx.trace().pop();
                    return Err(err);
                }
            };
            resolved.value = result.output.get(&reference.field).cloned().unwrap_or_default();
            resolved.missing_required = result.missing_required;
            ctx.trace().attach(result.path);
            if let Some(key) = key {
                ctx.cache().insert(
                    key,
                    CachedValue {
                        value: resolved.value.clone(),
                        missing_required: resolved.missing_required,
                    },
                );
            }
        }

        ctx.trace().set_result(resolved.value.clone());
        ctx.trace().pop();
        Ok(Some(resolved))
    }
}
