//! Scenario definitions and the process-wide registry.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use super::{Params, RunContext};
use crate::error::{PipelineError, Result};

/// One named unit of work inside a scenario.
///
/// A step reads what earlier steps left in the context's results slot and
/// writes its own output there. Between external actions it must call
/// `ctx.check()` (or go through `Checkpoint::settle`); the engine adds a
/// checkpoint before every step on top of that.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &mut RunContext) -> Result<()>;
}

/// Immutable, ordered step sequence registered under a unique id
pub struct Scenario {
    id: String,
    name: String,
    description: String,
    required_params: Vec<String>,
    steps: Vec<Arc<dyn Step>>,
}

impl Scenario {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            required_params: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare a string parameter that must be present and non-blank
    pub fn with_required_param(mut self, key: impl Into<String>) -> Self {
        self.required_params.push(key.into());
        self
    }

    pub fn with_step<S: Step + 'static>(mut self, step: S) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn with_shared_step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    /// Wrap a single step so it can be run (and cancelled, and observed)
    /// like any registered scenario.
    pub fn single(step: Arc<dyn Step>) -> Self {
        let id = format!("step:{}", step.name());
        let name = step.name().to_string();
        Self::new(id, name).with_shared_step(step)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    /// Reject a run request whose required parameters are missing or blank.
    pub fn validate_params(&self, params: &Params) -> Result<()> {
        for key in &self.required_params {
            let present = params
                .get_str(key)
                .map_or(false, |value| !value.trim().is_empty());
            if !present {
                return Err(PipelineError::Precondition(format!(
                    "Scenario '{}' requires a non-empty '{}' parameter",
                    self.id, key
                )));
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> ScenarioSummary {
        ScenarioSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            steps: self.steps.iter().map(|s| s.name().to_string()).collect(),
        }
    }
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("id", &self.id)
            .field("name", &self.name)
            .field(
                "steps",
                &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Listing view of a registered scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<String>,
}

/// Scenario id -> definition. Populated at startup, read-mostly afterwards.
#[derive(Default)]
pub struct ScenarioRegistry {
    scenarios: RwLock<HashMap<String, Arc<Scenario>>>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duplicate ids are rejected rather than overwritten.
    pub fn register(&self, scenario: Scenario) -> Result<Arc<Scenario>> {
        let mut scenarios = self
            .scenarios
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if scenarios.contains_key(scenario.id()) {
            return Err(PipelineError::DuplicateScenario(scenario.id().to_string()));
        }

        let scenario = Arc::new(scenario);
        scenarios.insert(scenario.id().to_string(), Arc::clone(&scenario));
        Ok(scenario)
    }

    pub fn get(&self, id: &str) -> Result<Arc<Scenario>> {
        self.scenarios
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownScenario(id.to_string()))
    }

    /// Summaries sorted by id
    pub fn list(&self) -> Vec<ScenarioSummary> {
        let mut summaries: Vec<_> = self
            .scenarios
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|s| s.summary())
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub fn len(&self) -> usize {
        self.scenarios
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    #[async_trait]
    impl Step for Noop {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, _ctx: &mut RunContext) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = ScenarioRegistry::new();
        registry
            .register(Scenario::new("demo", "Demo").with_step(Noop("a")))
            .unwrap();

        let err = registry
            .register(Scenario::new("demo", "Other demo"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateScenario(id) if id == "demo"));
        assert_eq!(registry.get("demo").unwrap().name(), "Demo");
    }

    #[test]
    fn test_unknown_scenario() {
        let registry = ScenarioRegistry::new();
        assert!(matches!(
            registry.get("nope"),
            Err(PipelineError::UnknownScenario(_))
        ));
    }

    #[test]
    fn test_summary_lists_step_names_in_order() {
        let scenario = Scenario::new("demo", "Demo")
            .with_description("two steps")
            .with_step(Noop("first"))
            .with_step(Noop("second"));

        let summary = scenario.summary();
        assert_eq!(summary.steps, vec!["first", "second"]);
        assert_eq!(summary.description, "two steps");
    }

    #[test]
    fn test_required_params() {
        let scenario = Scenario::new("q", "Query").with_required_param("userQuery");
        assert!(scenario.validate_params(&Params::new()).is_err());
        assert!(scenario
            .validate_params(&Params::new().with("userQuery", "   "))
            .is_err());
        assert!(scenario
            .validate_params(&Params::new().with("userQuery", "rust"))
            .is_ok());
    }

    #[test]
    fn test_single_step_scenario() {
        let scenario = Scenario::single(Arc::new(Noop("scroll")));
        assert_eq!(scenario.id(), "step:scroll");
        assert_eq!(scenario.steps().len(), 1);
    }
}
