//! Given step definitions
//!
//! Steps that set up the initial state for scenarios.

use cucumber::{gherkin::Step, given};
use machine_law_engine::{Claim, Value};

use crate::helpers::value_conversion::{convert_gherkin_value, parse_table_to_records};
use crate::world::MachineLawWorld;

// =============================================================================
// Background steps
// =============================================================================

#[given(expr = "the calculation date is {string}")]
fn set_calculation_date(world: &mut MachineLawWorld, date: String) {
    world.calculation_date = date;
}

#[given(regex = r#"^the following "(\S+)" data:$"#)]
fn set_table_data(world: &mut MachineLawWorld, table_name: String, step: &Step) {
    if let Some(table) = &step.table {
        world
            .tables
            .insert(table_name, parse_table_to_records(table));
    }
}

// =============================================================================
// Citizen steps
// =============================================================================

#[given(expr = "a citizen with BSN {string}")]
fn set_citizen(world: &mut MachineLawWorld, bsn: String) {
    world
        .parameters
        .insert("BSN".to_string(), Value::String(bsn));
}

#[given(expr = "the citizen claims {string} is {string} for {string} of service {string}")]
fn add_claim(
    world: &mut MachineLawWorld,
    field: String,
    value: String,
    law: String,
    service: String,
) {
    world
        .claims
        .entry((service, law))
        .or_default()
        .insert(field, Claim::new(convert_gherkin_value(&value)));
}

// =============================================================================
// Overwrite steps
// =============================================================================

#[given(expr = "the value of {string} from service {string} is overwritten with {string}")]
fn overwrite_service_value(
    world: &mut MachineLawWorld,
    field: String,
    service: String,
    value: String,
) {
    world
        .overwrites
        .entry(service)
        .or_default()
        .insert(field, convert_gherkin_value(&value));
}
