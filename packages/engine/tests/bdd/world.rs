//! World struct for Cucumber BDD tests
//!
//! Contains the test state that persists across steps in a scenario.

use cucumber::World;
use machine_law_engine::{
    Claims, EngineError, Evaluation, LawExecutionService, OverwriteInput, Record, RecordFrame,
    RuleResult, SourceTables, Value,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::helpers::law_loader::load_all_laws;

/// Test world that holds state across steps in a Cucumber scenario.
#[derive(World)]
#[world(init = Self::new)]
pub struct MachineLawWorld {
    /// Law execution service with all laws loaded
    pub service: LawExecutionService,
    /// Calculation date for the current scenario
    pub calculation_date: String,
    /// Parameters for law execution
    pub parameters: Record,
    /// Source tables by name
    pub tables: BTreeMap<String, Vec<Record>>,
    /// Overwritten service values
    pub overwrites: OverwriteInput,
    /// Citizen claims per (service, law)
    pub claims: BTreeMap<(String, String), Claims>,
    /// Last execution result (if successful)
    pub result: Option<RuleResult>,
    /// Last error (if execution failed)
    pub error: Option<EngineError>,
}

impl fmt::Debug for MachineLawWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineLawWorld")
            .field("calculation_date", &self.calculation_date)
            .field("parameters", &self.parameters)
            .field("tables", &self.tables.keys().collect::<Vec<_>>())
            .field("result", &self.result)
            .field("error", &self.error.as_ref().map(|e| e.to_string()))
            .field(
                "service",
                &format!("<{} laws loaded>", self.service.law_count()),
            )
            .finish()
    }
}

impl Default for MachineLawWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl MachineLawWorld {
    /// Create a new world with all laws loaded.
    pub fn new() -> Self {
        let service = LawExecutionService::new();
        if let Err(e) = load_all_laws(&service) {
            panic!("Failed to load laws: {}", e);
        }

        Self {
            service,
            calculation_date: "2025-01-01".to_string(),
            parameters: Record::new(),
            tables: BTreeMap::new(),
            overwrites: OverwriteInput::new(),
            claims: BTreeMap::new(),
            result: None,
            error: None,
        }
    }

    /// Evaluate a law and store the result or error.
    pub fn execute_law(&mut self, service: &str, law: &str, requested_output: Option<&str>) {
        let mut tables = SourceTables::new();
        for (name, records) in &self.tables {
            tables.insert(name.clone(), RecordFrame::new(records.clone()));
        }
        // the service is rebuilt around this scenario's tables
        self.service = std::mem::take(&mut self.service).with_sources(Arc::new(tables));
        for ((claim_service, claim_law), claims) in &self.claims {
            self.service
                .set_claims(claim_service, claim_law, claims.clone());
        }

        let outcome = Evaluation::for_date(&self.calculation_date).and_then(|request| {
            let mut request = request.with_parameters(self.parameters.clone());
            request.overwrite_input = self.overwrites.clone();
            if let Some(output) = requested_output {
                request = request.requesting(output);
            }
            self.service.evaluate_law(service, law, request)
        });

        match outcome {
            Ok(result) => {
                self.result = Some(result);
                self.error = None;
            }
            Err(e) => {
                self.result = None;
                self.error = Some(e);
            }
        }
    }

    /// Get an output value from the last result
    pub fn get_output(&self, name: &str) -> Option<&Value> {
        self.result.as_ref()?.output.get(name)
    }

    /// Get a resolved input value from the last result
    pub fn get_input(&self, name: &str) -> Option<&Value> {
        self.result.as_ref()?.input.get(name)
    }

    /// The last result, failing the step when execution errored.
    pub fn expect_result(&self) -> &RuleResult {
        match &self.result {
            Some(result) => result,
            None => panic!(
                "Expected successful execution, got error: {:?}",
                self.error_message()
            ),
        }
    }

    /// Get error message if execution failed
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}
