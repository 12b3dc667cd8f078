//! Rule specification loader
//!
//! A [`RuleSpecification`] is one version of one law as offered by one
//! service: its parameters, inputs, sources, outputs, definitions,
//! requirements and actions. Documents are YAML (or JSON) and are parsed
//! exactly once; the loaded value is immutable for the rest of its life.
//!
//! # Security Considerations
//!
//! - Document size is limited to [`config::MAX_YAML_SIZE`]
//! - Lists are limited to [`config::MAX_ARRAY_SIZE`] elements
//! - Expression nesting is limited to [`config::MAX_OPERATION_DEPTH`]

use crate::config;
use crate::error::{EngineError, Result};
use crate::expression::{self, Action, Expr, Requirement};
use crate::types::{parse_date, Record, Value};
use crate::typespec::TypeSpec;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

fn expression<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Expr, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    expression::parse_value(&raw).map_err(serde::de::Error::custom)
}

fn optional_expression<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Expr>, D::Error> {
    expression(deserializer).map(Some)
}

/// Caller-supplied parameter declaration
#[derive(Debug, Clone, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default, rename = "type")]
    pub value_type: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// Time semantics of a field; `reference` overrides the date used for
/// nested service calls (e.g. `$prev_january_first`).
#[derive(Debug, Clone, Deserialize)]
pub struct Temporal {
    #[serde(default, rename = "type")]
    pub temporal_type: Option<String>,
    #[serde(default)]
    pub period_type: Option<String>,
    #[serde(default, deserialize_with = "optional_expression")]
    pub reference: Option<Expr>,
}

/// Parameter passed to another service
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceParameter {
    pub name: String,
    #[serde(deserialize_with = "expression")]
    pub reference: Expr,
}

/// Field computed by evaluating another law
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceReference {
    pub service: String,
    pub law: String,
    pub field: String,
    #[serde(default)]
    pub parameters: Vec<ServiceParameter>,
}

/// Filter applied to a source table. A value of the form
/// `{operation: IN, values: ...}` matches any of the listed values.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectOn {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub value_type: Option<String>,
    #[serde(deserialize_with = "expression")]
    pub value: Expr,
}

/// Field looked up in a tabular source
#[derive(Debug, Clone, Deserialize)]
pub struct SourceReference {
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub select_on: Vec<SelectOn>,
}

/// Declaration of an input or source field
#[derive(Debug, Clone, Deserialize)]
pub struct PropertySpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub value_type: Option<String>,
    #[serde(default)]
    pub type_spec: Option<TypeSpec>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub temporal: Option<Temporal>,
    #[serde(default)]
    pub service_reference: Option<ServiceReference>,
    #[serde(default)]
    pub source_reference: Option<SourceReference>,
}

impl PropertySpec {
    /// Type metadata recorded on resolve trace nodes.
    pub fn type_details(&self) -> Record {
        let mut details = Record::new();
        if let Some(ref t) = self.value_type {
            details.insert("type".to_string(), Value::String(t.clone()));
        }
        if let Some(ref spec) = self.type_spec {
            if let Some(ref unit) = spec.unit {
                details.insert("unit".to_string(), Value::String(unit.clone()));
            }
            if let Some(precision) = spec.precision {
                details.insert("precision".to_string(), Value::Int(i64::from(precision)));
            }
            if let Some(min) = spec.min {
                details.insert("min".to_string(), Value::Float(min));
            }
            if let Some(max) = spec.max {
                details.insert("max".to_string(), Value::Float(max));
            }
        }
        details
    }
}

/// Declaration of an output; `type_spec` always carries the output type
/// after loading.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(default, rename = "type")]
    pub value_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub type_spec: Option<TypeSpec>,
    #[serde(default)]
    pub temporal: Option<Temporal>,
}

impl OutputSpec {
    /// Apply the declared type to a computed value.
    pub fn enforce(&self, value: Value) -> Value {
        match self.type_spec {
            Some(ref spec) => spec.enforce(value),
            None => value,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Properties {
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub input: Vec<PropertySpec>,
    #[serde(default)]
    pub sources: Vec<PropertySpec>,
    #[serde(default)]
    pub output: Vec<OutputSpec>,
    #[serde(default)]
    pub definitions: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawSpecification {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    name: Option<String>,
    law: String,
    service: String,
    #[serde(default)]
    valid_from: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    properties: Properties,
    #[serde(default)]
    requirements: Vec<Value>,
    #[serde(default)]
    actions: Vec<Value>,
}

/// One loaded version of a law
#[derive(Debug, Clone)]
pub struct RuleSpecification {
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub law: String,
    pub service: String,
    pub valid_from: Option<NaiveDate>,
    pub description: Option<String>,
    pub properties: Properties,
    pub requirements: Vec<Requirement>,
    pub actions: Vec<Action>,
    id: String,
}

impl RuleSpecification {
    /// Load a specification from a YAML file.
    ///
    /// Errors do not expose the path.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        tracing::debug!(path = %path_ref.display(), "Loading rule specification from YAML file");

        let metadata = fs::metadata(path_ref).map_err(|_| {
            EngineError::LoadError("Failed to access specification file".to_string())
        })?;
        if metadata.len() as usize > config::MAX_YAML_SIZE {
            return Err(EngineError::LoadError(format!(
                "File exceeds maximum size limit ({} bytes)",
                config::MAX_YAML_SIZE
            )));
        }

        let content = fs::read_to_string(path_ref)?;
        Self::from_yaml_str(&content)
    }

    /// Parse a specification from a YAML string.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        check_size(content)?;
        let raw: RawSpecification = serde_yaml_ng::from_str(content)?;
        Self::from_raw(raw, content.as_bytes())
    }

    /// Parse a specification from a JSON string.
    pub fn from_json_str(content: &str) -> Result<Self> {
        check_size(content)?;
        let raw: RawSpecification = serde_json::from_str(content)?;
        Self::from_raw(raw, content.as_bytes())
    }

    fn from_raw(raw: RawSpecification, source: &[u8]) -> Result<Self> {
        let RawSpecification {
            uuid,
            name,
            law,
            service,
            valid_from,
            description,
            mut properties,
            requirements,
            actions,
        } = raw;

        for (what, len) in [
            ("parameters", properties.parameters.len()),
            ("input", properties.input.len()),
            ("sources", properties.sources.len()),
            ("output", properties.output.len()),
            ("actions", actions.len()),
        ] {
            if len > config::MAX_ARRAY_SIZE {
                return Err(EngineError::LoadError(format!(
                    "Too many {} ({}, max {})",
                    what,
                    len,
                    config::MAX_ARRAY_SIZE
                )));
            }
        }

        let valid_from = match valid_from {
            Some(s) => Some(parse_date(&s).ok_or(EngineError::InvalidDate(s))?),
            None => None,
        };

        for output in &mut properties.output {
            let mut spec = output.type_spec.take().unwrap_or_default();
            if spec.value_type.is_none() {
                spec.value_type = output.value_type.clone();
            }
            output.type_spec = Some(spec);
        }

        let requirements = expression::parse_requirements(&requirements)?;
        let actions = actions
            .iter()
            .map(Action::parse)
            .collect::<Result<Vec<_>>>()?;

        let mut seen = BTreeSet::new();
        for action in &actions {
            if !seen.insert(action.output.as_str()) {
                return Err(EngineError::Configuration(format!(
                    "duplicate action output '{}'",
                    action.output
                )));
            }
        }

        let id = match uuid {
            Some(ref uuid) => uuid.clone(),
            None => hex::encode(Sha256::digest(source)),
        };

        tracing::debug!(
            service = %service,
            law = %law,
            actions = actions.len(),
            "Parsed rule specification"
        );

        Ok(Self {
            uuid,
            name,
            law,
            service,
            valid_from,
            description,
            properties,
            requirements,
            actions,
            id,
        })
    }

    /// Identifier reported in results: the document uuid, or the SHA-256
    /// of the document when it has none.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Input or source declaration for a field.
    pub fn property_spec(&self, name: &str) -> Option<&PropertySpec> {
        self.properties
            .input
            .iter()
            .chain(self.properties.sources.iter())
            .find(|spec| spec.name == name)
    }

    pub fn output_spec(&self, name: &str) -> Option<&OutputSpec> {
        self.properties.output.iter().find(|spec| spec.name == name)
    }

    pub fn definition(&self, name: &str) -> Option<&Value> {
        self.properties.definitions.get(name)
    }

    pub fn action(&self, output: &str) -> Option<&Action> {
        self.actions.iter().find(|action| action.output == output)
    }

    /// Names of all outputs produced by actions, in declared order.
    pub fn output_names(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.output.as_str()).collect()
    }

    /// Declared parameters marked required.
    pub fn required_parameters(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.properties.parameters.iter().filter(|p| p.required)
    }
}

fn check_size(content: &str) -> Result<()> {
    if content.len() > config::MAX_YAML_SIZE {
        tracing::warn!(
            size = content.len(),
            max = config::MAX_YAML_SIZE,
            "Specification exceeds size limit"
        );
        return Err(EngineError::LoadError(format!(
            "Specification exceeds maximum size limit ({} bytes)",
            config::MAX_YAML_SIZE
        )));
    }
    Ok(())
}
