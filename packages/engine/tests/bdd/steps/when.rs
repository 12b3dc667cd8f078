//! When step definitions
//!
//! Steps that execute actions (law evaluations).

use cucumber::when;

use crate::world::MachineLawWorld;

#[when(regex = r#"^the law "(\S+)" of service "(\S+)" is evaluated$"#)]
fn evaluate_law(world: &mut MachineLawWorld, law: String, service: String) {
    world.execute_law(&service, &law, None);
}

#[when(regex = r#"^the output "(\S+)" of law "(\S+)" of service "(\S+)" is requested$"#)]
fn request_output(world: &mut MachineLawWorld, output: String, law: String, service: String) {
    world.execute_law(&service, &law, Some(&output));
}
