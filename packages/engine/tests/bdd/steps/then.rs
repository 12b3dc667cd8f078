//! Then step definitions
//!
//! Steps that verify outcomes and assertions.

use cucumber::then;

use crate::helpers::value_conversion::{convert_gherkin_value, values_equal_with_tolerance};
use crate::world::MachineLawWorld;

// =============================================================================
// Requirement steps
// =============================================================================

#[then("the requirements are met")]
fn assert_requirements_met(world: &mut MachineLawWorld) {
    let result = world.expect_result();
    assert!(
        result.requirements_met,
        "Expected requirements to be met, trace:\n{}",
        result.path.render()
    );
}

#[then("the requirements are not met")]
fn assert_requirements_not_met(world: &mut MachineLawWorld) {
    let result = world.expect_result();
    assert!(
        !result.requirements_met,
        "Expected requirements not to be met, outputs: {:?}",
        result.output
    );
}

#[then("required data is missing")]
fn assert_missing_required(world: &mut MachineLawWorld) {
    assert!(
        world.expect_result().missing_required,
        "Expected missing required data"
    );
}

#[then("no required data is missing")]
fn assert_nothing_missing(world: &mut MachineLawWorld) {
    let result = world.expect_result();
    assert!(
        !result.missing_required,
        "Expected no missing required data, trace:\n{}",
        result.path.render()
    );
}

// =============================================================================
// Output and input steps
// =============================================================================

#[then(regex = r#"^the output "(\S+)" is "([^"]*)"$"#)]
fn assert_output(world: &mut MachineLawWorld, name: String, expected: String) {
    world.expect_result();
    let expected = convert_gherkin_value(&expected);
    let actual = world.get_output(&name);
    assert!(
        actual.is_some_and(|v| values_equal_with_tolerance(v, &expected)),
        "Expected output {} to be {:?}, got {:?}",
        name,
        expected,
        actual
    );
}

#[then(regex = r#"^the output "(\S+)" is absent$"#)]
fn assert_output_absent(world: &mut MachineLawWorld, name: String) {
    world.expect_result();
    assert!(
        world.get_output(&name).is_none(),
        "Expected output {} to be absent, got {:?}",
        name,
        world.get_output(&name)
    );
}

#[then("there are no outputs")]
fn assert_no_outputs(world: &mut MachineLawWorld) {
    let result = world.expect_result();
    assert!(
        result.output.is_empty(),
        "Expected no outputs, got {:?}",
        result.output
    );
}

#[then(regex = r#"^the input "(\S+)" is "([^"]*)"$"#)]
fn assert_input(world: &mut MachineLawWorld, name: String, expected: String) {
    world.expect_result();
    let expected = convert_gherkin_value(&expected);
    let actual = world.get_input(&name);
    assert!(
        actual.is_some_and(|v| values_equal_with_tolerance(v, &expected)),
        "Expected input {} to be {:?}, got {:?}",
        name,
        expected,
        actual
    );
}

// =============================================================================
// Trace steps
// =============================================================================

#[then(expr = "the trace contains a node {string}")]
fn assert_trace_node(world: &mut MachineLawWorld, name: String) {
    let result = world.expect_result();
    assert!(
        result.path.find(&name).is_some(),
        "Expected trace node '{}', trace:\n{}",
        name,
        result.path.render()
    );
}

#[then(regex = r#"^"(\S+)" was resolved by ([A-Z_]+)$"#)]
fn assert_resolved_by(world: &mut MachineLawWorld, name: String, resolve_type: String) {
    let result = world.expect_result();
    let node = result
        .path
        .find(&name)
        .unwrap_or_else(|| panic!("No trace node for '{}'", name));
    assert_eq!(
        node.resolve_type.map(|rt| rt.as_str()),
        Some(resolve_type.as_str()),
        "Unexpected resolver for '{}'",
        name
    );
}

// =============================================================================
// Error steps
// =============================================================================

#[then(regex = r#"^the evaluation fails with "([^"]+)"$"#)]
fn assert_evaluation_fails_with(world: &mut MachineLawWorld, expected_message: String) {
    assert!(
        world.error.is_some(),
        "Expected execution to fail, but it succeeded with result: {:?}",
        world.result
    );

    let error_msg = world.error_message().unwrap_or_default();
    assert!(
        error_msg
            .to_lowercase()
            .contains(&expected_message.to_lowercase()),
        "Expected error to contain '{}', got: '{}'",
        expected_message,
        error_msg
    );
}
