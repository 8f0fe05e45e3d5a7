// Invocation context shared between the orchestrator and a running action
// Holds late-bound variables, collected validation failures and outcomes

use crate::errors::{ActionError, ValidationFailure};
use crate::models::ActionOutcome;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Matches ${name}; names may contain dots and dashes (e.g. ${ftp.files.copied})
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.\-]*)\}").expect("Invalid placeholder pattern")
    })
}

/// Returns true when the value still carries a `${...}` placeholder
pub fn contains_macro(value: &str) -> bool {
    placeholder_pattern().is_match(value)
}

/// Context for one action invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionContext {
    pub execution_id: Uuid,
    pub variables: HashMap<String, String>,
    pub outcomes: Vec<ActionOutcome>,
    #[serde(skip)]
    failures: Vec<ValidationFailure>,
}

impl Default for ActionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionContext {
    pub fn new() -> Self {
        Self::with_variables(HashMap::new())
    }

    pub fn with_variables(variables: HashMap<String, String>) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            variables,
            outcomes: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn get_variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        debug!(variable = %name, value_len = value.len(), "Setting context variable");
        self.variables.insert(name, value);
    }

    /// Collect a configuration failure; reported together by `get_or_fail`
    pub fn report_failure(&mut self, message: impl Into<String>, field: Option<&str>) {
        self.failures.push(ValidationFailure::new(message, field));
    }

    pub fn failures(&self) -> &[ValidationFailure] {
        &self.failures
    }

    /// Drain the collected failures, failing if there were any
    pub fn get_or_fail(&mut self) -> Result<(), ActionError> {
        if self.failures.is_empty() {
            return Ok(());
        }
        let failures = std::mem::take(&mut self.failures);
        warn!(
            failure_count = failures.len(),
            "Configuration validation failed"
        );
        Err(ActionError::InvalidConfiguration(failures))
    }

    pub fn record_outcome(&mut self, outcome: ActionOutcome) {
        self.outcomes.push(outcome);
    }

    /// Substitute `${name}` placeholders from the context variables
    ///
    /// Returns the names of undefined variables on failure.
    #[instrument(skip(self), fields(template_len = template.len()))]
    pub fn resolve(&self, template: &str) -> Result<String, Vec<String>> {
        let mut undefined = Vec::new();
        let resolved = placeholder_pattern().replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            match self.variables.get(name) {
                Some(value) => value.clone(),
                None => {
                    undefined.push(name.to_string());
                    caps[0].to_string()
                }
            }
        });

        if undefined.is_empty() {
            Ok(resolved.into_owned())
        } else {
            Err(undefined)
        }
    }

    /// Resolve one config field, reporting undefined placeholders as a failure on it
    pub fn resolve_field(&mut self, field: &str, value: &str) -> String {
        match self.resolve(value) {
            Ok(resolved) => resolved,
            Err(undefined) => {
                self.report_failure(
                    format!("Undefined macro(s) {}", undefined.join(", ")),
                    Some(field),
                );
                value.to_string()
            }
        }
    }

    pub fn resolve_optional_field(&mut self, field: &str, value: Option<&str>) -> Option<String> {
        value.map(|v| self.resolve_field(field, v))
    }
}
