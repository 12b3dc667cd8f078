//! End-to-end scenarios for the rules engine.
//!
//! Each test loads a small specification, evaluates it and checks the
//! observable result: outputs, flags, resolved inputs and the trace.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use machine_law_engine::{
    Claim, Claims, EngineError, Evaluation, ExternalSourceResolver, LawExecutionService,
    PathNodeType, Record, RecordFrame, ResolveType, Result, RulesEngine, SourceFilter,
    SourceTables, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn on(date: &str) -> Evaluation {
    Evaluation::for_date(date).expect("valid date")
}

fn record(entries: &[(&str, Value)]) -> Record {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// =============================================================================
// Demand-driven evaluation
// =============================================================================

const NET_INCOME: &str = r#"
service: TEST
law: netto
properties:
  output:
    - {name: gross, type: amount}
    - {name: net, type: amount}
actions:
  - output: gross
    value: {operation: ADD, values: [$income, $benefit]}
  - output: bonus
    value: {operation: MULTIPLY, values: [$income, 0.1]}
  - output: net
    value: {operation: SUBTRACT, values: [$gross, $tax]}
"#;

#[test]
fn requested_output_evaluates_its_dependencies_only() {
    let engine = RulesEngine::from_yaml_str(NET_INCOME).unwrap();
    let request = on("2025-01-01")
        .with_parameter("income", 1000)
        .with_parameter("benefit", 200)
        .with_parameter("tax", 150)
        .requesting("net");

    let result = engine.evaluate(&request).unwrap();

    assert!(result.requirements_met);
    assert!(!result.missing_required);
    assert_eq!(result.output_value("net"), Some(&Value::Int(1050)));
    assert_eq!(
        result.output.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["gross", "net"]
    );

    let actions: Vec<&str> = result
        .path
        .children
        .iter()
        .filter(|n| n.node_type == PathNodeType::Action)
        .map(|n| n.name.as_str())
        .collect();
    assert_eq!(actions, vec!["gross", "net"]);
}

#[test]
fn repeated_evaluation_is_identical() {
    let engine = RulesEngine::from_yaml_str(NET_INCOME).unwrap();
    let request = on("2025-01-01")
        .with_parameter("income", 1000)
        .with_parameter("benefit", 200)
        .with_parameter("tax", 150);

    let first = engine.evaluate(&request).unwrap();
    let second = engine.evaluate(&request).unwrap();

    assert_eq!(
        serde_json::to_string(&first.output).unwrap(),
        serde_json::to_string(&second.output).unwrap()
    );
    assert_eq!(first.requirements_met, second.requirements_met);
    assert_eq!(first.path.node_count(), second.path.node_count());
}

#[test]
fn circular_actions_fail() {
    let engine = RulesEngine::from_yaml_str(
        r#"
service: TEST
law: cyclus
actions:
  - output: a
    value: $b
  - output: b
    value: $a
"#,
    )
    .unwrap();

    let err = engine.evaluate(&on("2025-01-01")).unwrap_err();
    assert!(matches!(err, EngineError::CircularDependency(_)));
}

// =============================================================================
// FOREACH
// =============================================================================

const SUM_AMOUNTS: &str = r#"
service: TEST
law: optelling
properties:
  parameters:
    - {name: items, type: array}
actions:
  - output: total
    value:
      operation: FOREACH
      subject: $items
      value: $item.amount
      combine: ADD
"#;

#[test]
fn foreach_sums_item_fields() {
    let engine = RulesEngine::from_yaml_str(SUM_AMOUNTS).unwrap();
    let items = Value::Array(vec![
        Value::Object(record(&[("amount", Value::Int(5))])),
        Value::Object(record(&[("amount", Value::Int(7))])),
        Value::Object(record(&[("amount", Value::Int(3))])),
    ]);

    let result = engine
        .evaluate(&on("2025-01-01").with_parameter("items", items))
        .unwrap();

    assert_eq!(result.output_value("total"), Some(&Value::Int(15)));
}

#[test]
fn foreach_over_nothing_is_zero() {
    let engine = RulesEngine::from_yaml_str(SUM_AMOUNTS).unwrap();

    let result = engine
        .evaluate(&on("2025-01-01").with_parameter("items", Value::Null))
        .unwrap();

    assert_eq!(result.output_value("total"), Some(&Value::Int(0)));
    assert!(!result.missing_required);
}

// =============================================================================
// Requirements
// =============================================================================

const ADULT_WITH_ID: &str = r#"
service: TEST
law: identificatie
requirements:
  - all:
      - {operation: GREATER_OR_EQUAL, subject: $age, value: 18}
      - {operation: EQUALS, subject: $has_id, value: true}
actions:
  - output: eligible
    value: true
"#;

#[test]
fn unmet_requirements_skip_every_action() {
    let engine = RulesEngine::from_yaml_str(ADULT_WITH_ID).unwrap();
    let request = on("2025-01-01")
        .with_parameter("age", 16)
        .with_parameter("has_id", true);

    let result = engine.evaluate(&request).unwrap();

    assert!(!result.requirements_met);
    assert!(result.output.is_empty());
    assert_eq!(result.path.children.len(), 1);
    assert_eq!(result.path.children[0].node_type, PathNodeType::Requirements);
    // ALL stops at the first false member
    assert!(result.path.find("has_id").is_none());
    assert!(!result.input.contains_key("has_id"));
}

#[test]
fn met_requirements_produce_outputs() {
    let engine = RulesEngine::from_yaml_str(ADULT_WITH_ID).unwrap();
    let request = on("2025-01-01")
        .with_parameter("age", 30)
        .with_parameter("has_id", true);

    let result = engine.evaluate(&request).unwrap();

    assert!(result.requirements_met);
    assert_eq!(result.output_value("eligible"), Some(&Value::Bool(true)));
}

#[test]
fn or_group_stops_at_first_true_member() {
    let engine = RulesEngine::from_yaml_str(
        r#"
service: TEST
law: alternatief
requirements:
  - or:
      - {operation: EQUALS, subject: $student, value: true}
      - {operation: EQUALS, subject: $werkloos, value: true}
actions:
  - output: eligible
    value: true
"#,
    )
    .unwrap();

    let result = engine
        .evaluate(&on("2025-01-01").with_parameter("student", true))
        .unwrap();

    assert!(result.requirements_met);
    assert!(result.path.find("werkloos").is_none());
}

// =============================================================================
// Resolution and missing data
// =============================================================================

const BIRTH_REGISTRY: &str = r#"
service: RvIG
law: wet_brp
properties:
  parameters:
    - {name: BSN, type: string, required: true}
  sources:
    - name: geboortedatum
      type: date
      required: true
      source_reference:
        table: personen
        field: geboortedatum
        select_on:
          - {name: bsn, value: $BSN}
  output:
    - {name: leeftijd, type: number}
    - {name: bsn_bekend, type: boolean}
actions:
  - output: bsn_bekend
    value: {operation: NOT_NULL, subject: $BSN}
  - output: leeftijd
    value:
      operation: SUBTRACT_DATE
      values: [$calculation_date, $geboortedatum]
      unit: years
"#;

fn personen() -> Arc<SourceTables> {
    Arc::new(SourceTables::new().with_table(
        "personen",
        RecordFrame::from_rows(
            &["bsn", "geboortedatum"],
            vec![vec![Value::from("999993653"), Value::from("1990-03-15")]],
        ),
    ))
}

#[test]
fn source_lookup_fills_field() {
    let engine = RulesEngine::from_yaml_str(BIRTH_REGISTRY).unwrap();
    let request = on("2025-01-01")
        .with_parameter("BSN", "999993653")
        .with_sources(personen());

    let result = engine.evaluate(&request).unwrap();

    assert_eq!(result.output_value("leeftijd"), Some(&Value::Int(34)));
    assert_eq!(
        result.input.get("geboortedatum"),
        Some(&Value::from("1990-03-15"))
    );
    let node = result.path.find("geboortedatum").unwrap();
    assert_eq!(node.resolve_type, Some(ResolveType::Source));
    assert!(node.required);
}

#[test]
fn missing_required_field_blanks_every_output() {
    let engine = RulesEngine::from_yaml_str(BIRTH_REGISTRY).unwrap();
    let request = on("2025-01-01")
        .with_parameter("BSN", "111111110")
        .with_sources(personen());

    let result = engine.evaluate(&request).unwrap();

    assert!(result.missing_required);
    assert!(!result.requirements_met);
    // bsn_bekend was computed before the miss and is discarded
    assert!(result.output.is_empty());
    assert!(result.path.find("bsn_bekend").is_some());
}

#[test]
fn claim_wins_over_source() {
    let engine = RulesEngine::from_yaml_str(BIRTH_REGISTRY).unwrap();
    let request = on("2025-01-01")
        .with_parameter("BSN", "999993653")
        .with_sources(personen())
        .with_claim("geboortedatum", Claim::new("2000-01-01"));

    let result = engine.evaluate(&request).unwrap();

    assert_eq!(result.output_value("leeftijd"), Some(&Value::Int(25)));
    assert_eq!(
        result.path.find("geboortedatum").and_then(|n| n.resolve_type),
        Some(ResolveType::Claim)
    );
}

#[test]
fn rejected_claims_are_ignored() {
    let engine = RulesEngine::from_yaml_str(BIRTH_REGISTRY).unwrap();
    let claim = Claim::new("2000-01-01").with_status(machine_law_engine::ClaimStatus::Rejected);
    let request = on("2025-01-01")
        .with_parameter("BSN", "999993653")
        .with_sources(personen())
        .with_claim("geboortedatum", claim);

    let result = engine.evaluate(&request).unwrap();

    assert_eq!(result.output_value("leeftijd"), Some(&Value::Int(34)));
}

#[test]
fn unparseable_date_is_an_error() {
    let engine = RulesEngine::from_yaml_str(BIRTH_REGISTRY).unwrap();
    let request = on("2025-01-01")
        .with_parameter("BSN", "999993653")
        .with_claim("geboortedatum", Claim::new("vijftien maart"));

    let err = engine.evaluate(&request).unwrap_err();
    assert!(matches!(err, EngineError::InvalidDate(_)));
}

// =============================================================================
// External sources
// =============================================================================

#[derive(Default)]
struct IncomeRegistry {
    lookups: AtomicUsize,
}

impl ExternalSourceResolver for IncomeRegistry {
    fn lookup(&self, table: &str, filters: &[SourceFilter]) -> Result<Option<Vec<Record>>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if table != "inkomens" {
            return Ok(None);
        }
        let bsn = filters
            .iter()
            .find(|f| f.column == "bsn")
            .and_then(|f| f.value.as_str().map(str::to_string));
        Ok(match bsn.as_deref() {
            Some("999993653") => Some(vec![
                record(&[("bedrag", Value::Int(2_000_000))]),
                record(&[("bedrag", Value::Int(500_000))]),
            ]),
            _ => None,
        })
    }
}

const INCOME: &str = r#"
service: BELASTINGDIENST
law: inkomen
properties:
  sources:
    - name: inkomens
      source_reference:
        table: inkomens
        fields: [bedrag]
        select_on:
          - {name: bsn, value: $BSN}
actions:
  - output: totaal
    value:
      operation: FOREACH
      subject: $inkomens
      value: $bedrag
      combine: ADD
"#;

#[test]
fn external_source_is_queried_once_per_filter_set() {
    let registry = Arc::new(IncomeRegistry::default());
    let engine =
        RulesEngine::from_yaml_str(INCOME).unwrap().with_external_sources(registry.clone());
    let request = on("2025-01-01").with_parameter("BSN", "999993653");

    let first = engine.evaluate(&request).unwrap();
    let second = engine.evaluate(&request).unwrap();

    assert_eq!(first.output_value("totaal"), Some(&Value::Int(2_500_000)));
    assert_eq!(second.output_value("totaal"), Some(&Value::Int(2_500_000)));
    assert_eq!(registry.lookups.load(Ordering::SeqCst), 1);
}

#[test]
fn external_source_without_rows_is_no_match() {
    let registry = Arc::new(IncomeRegistry::default());
    let engine = RulesEngine::from_yaml_str(INCOME).unwrap().with_external_sources(registry);

    let result = engine
        .evaluate(&on("2025-01-01").with_parameter("BSN", "111111110"))
        .unwrap();

    assert_eq!(result.output_value("totaal"), Some(&Value::Int(0)));
}

// =============================================================================
// Cross-law evaluation
// =============================================================================

const ALLOWANCE: &str = r#"
service: TOESLAGEN
law: toeslag
properties:
  parameters:
    - {name: BSN, type: string, required: true}
  input:
    - name: leeftijd
      type: number
      required: true
      service_reference:
        service: RvIG
        law: wet_brp
        field: leeftijd
        parameters:
          - {name: BSN, reference: $BSN}
requirements:
  - {operation: GREATER_OR_EQUAL, subject: $leeftijd, value: 18}
actions:
  - output: bedrag
    value: {operation: MULTIPLY, values: [$leeftijd, 100]}
"#;

fn allowance_service() -> LawExecutionService {
    let service = LawExecutionService::new().with_sources(personen());
    service.load_yaml(BIRTH_REGISTRY).unwrap();
    service.load_yaml(ALLOWANCE).unwrap();
    service
}

#[test]
fn service_reference_evaluates_other_law() {
    let service = allowance_service();
    let request = on("2025-01-01").with_parameter("BSN", "999993653");

    let result = service.evaluate_law("TOESLAGEN", "toeslag", request).unwrap();

    assert!(result.requirements_met);
    assert_eq!(result.output_value("bedrag"), Some(&Value::Int(3400)));

    let call = result.path.find("Service: RvIG.wet_brp.leeftijd").unwrap();
    assert_eq!(call.node_type, PathNodeType::ServiceEvaluation);
    // the nested evaluation only computed the requested output
    let nested = call
        .children
        .iter()
        .find(|n| n.node_type == PathNodeType::Root)
        .unwrap();
    assert!(nested.find("leeftijd").is_some());
    assert!(nested.find("bsn_bekend").is_none());
}

#[test]
fn missing_data_in_other_law_propagates() {
    let service = allowance_service();
    let request = on("2025-01-01").with_parameter("BSN", "111111110");

    let result = service.evaluate_law("TOESLAGEN", "toeslag", request).unwrap();

    assert!(result.missing_required);
    assert!(!result.requirements_met);
    assert!(result.output.is_empty());
}

#[test]
fn overwrite_replaces_service_value() {
    let service = allowance_service();
    let request = on("2025-01-01")
        .with_parameter("BSN", "111111110")
        .with_overwrite("RvIG", "leeftijd", 40);

    let result = service.evaluate_law("TOESLAGEN", "toeslag", request).unwrap();

    assert!(!result.missing_required);
    assert_eq!(result.output_value("bedrag"), Some(&Value::Int(4000)));
    assert!(result.path.find("Service: RvIG.wet_brp.leeftijd").is_none());
}

#[test]
fn cross_law_results_are_shared_through_the_cache() {
    let service = allowance_service();
    let request = on("2025-01-01").with_parameter("BSN", "999993653");

    service
        .evaluate_law("TOESLAGEN", "toeslag", request.clone())
        .unwrap();
    let entries = service.cache().len();
    let again = service.evaluate_law("TOESLAGEN", "toeslag", request).unwrap();

    assert_eq!(service.cache().len(), entries);
    assert_eq!(again.output_value("bedrag"), Some(&Value::Int(3400)));
}

#[test]
fn cached_results_follow_tables_and_claims() {
    let service = allowance_service();
    let request = on("2025-01-01").with_parameter("BSN", "999993653");
    let older = Arc::new(SourceTables::new().with_table(
        "personen",
        RecordFrame::from_rows(
            &["bsn", "geboortedatum"],
            vec![vec![Value::from("999993653"), Value::from("1980-03-15")]],
        ),
    ));

    let first = service
        .evaluate_law("TOESLAGEN", "toeslag", request.clone())
        .unwrap();
    let other_tables = service
        .evaluate_law("TOESLAGEN", "toeslag", request.clone().with_sources(older))
        .unwrap();

    let mut claims = Claims::new();
    claims.insert("geboortedatum".into(), Claim::new("2000-03-15"));
    service.set_claims("RvIG", "wet_brp", claims);
    let claimed = service.evaluate_law("TOESLAGEN", "toeslag", request).unwrap();

    assert_eq!(first.output_value("bedrag"), Some(&Value::Int(3400)));
    assert_eq!(other_tables.output_value("bedrag"), Some(&Value::Int(4400)));
    assert_eq!(claimed.output_value("bedrag"), Some(&Value::Int(2400)));
}

#[test]
fn mutually_dependent_laws_hit_the_depth_limit() {
    let service = LawExecutionService::new();
    service
        .load_yaml(
            r#"
service: A
law: eerste
properties:
  input:
    - name: waarde
      service_reference: {service: B, law: tweede, field: resultaat}
actions:
  - output: resultaat
    value: $waarde
"#,
        )
        .unwrap();
    service
        .load_yaml(
            r#"
service: B
law: tweede
properties:
  input:
    - name: waarde
      service_reference: {service: A, law: eerste, field: resultaat}
actions:
  - output: resultaat
    value: $waarde
"#,
        )
        .unwrap();

    let err = service
        .evaluate_law("A", "eerste", on("2025-01-01"))
        .unwrap_err();
    assert!(matches!(err, EngineError::CircularReference(_)));
}
