use overlay_versions::{UpdateOutcome, ValidationOutcome};
use schemars::schema_for;

fn main() {
    let schemas = serde_json::json!({
        "validation": schema_for!(ValidationOutcome),
        "update": schema_for!(UpdateOutcome),
    });
    print!("{}", serde_yaml::to_string(&schemas).unwrap());
}
