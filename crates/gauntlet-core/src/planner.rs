//! Provider-backed planning
//!
//! Turns a task into a validated [`Plan`] by prompting the completion
//! provider with the task, the available tools and the required response
//! shape, then parsing and structurally validating the reply. The planner
//! never trusts the provider: everything goes through [`Plan`] validation.

use std::sync::Arc;

use serde_json::json;

use crate::config::ModelConfig;
use crate::error::{AgentError, PlanError};
use crate::plan::{Plan, RawPlan};
use crate::provider::CompletionProvider;
use crate::tools::ToolRegistry;
use gauntlet_schema::Schema;

/// Extra context fed into the planning prompt.
#[derive(Debug, Clone, Default)]
pub struct PlanContext {
    /// Free-form notes appended to the prompt, one paragraph each
    pub notes: Vec<String>,
}

impl PlanContext {
    /// Empty context.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a note.
    #[inline]
    #[must_use]
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

/// Generates and refines plans through the completion provider.
pub struct Planner {
    provider: Arc<dyn CompletionProvider>,
    registry: Arc<ToolRegistry>,
    allowed: Vec<String>,
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner").finish_non_exhaustive()
    }
}

impl Planner {
    /// Create a planner over the given provider and tool table.
    #[must_use]
    pub fn new(provider: Arc<dyn CompletionProvider>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            registry,
            allowed: Vec::new(),
        }
    }

    /// Restrict the advertised catalog to the run's tool allowlist.
    ///
    /// An empty list advertises every registered tool.
    #[must_use]
    pub fn with_allowed_tools(mut self, allowed: Vec<String>) -> Self {
        self.allowed = allowed;
        self
    }

    /// Produce a validated plan for a task.
    ///
    /// # Errors
    /// Provider failures and [`PlanError`]s (malformed JSON, empty plan,
    /// duplicate ids, forward or unknown dependencies).
    pub async fn generate_plan(
        &self,
        task: &str,
        context: &PlanContext,
        model: &ModelConfig,
    ) -> Result<Plan, AgentError> {
        let prompt = self.planning_prompt(task, context);
        let schema = plan_response_schema();
        let response = self
            .provider
            .complete(&prompt, model, Some(&schema))
            .await?;
        Ok(parse_plan(&response, 0)?)
    }

    /// Revise an existing plan in response to feedback.
    ///
    /// The current plan and the feedback go back to the provider; the reply
    /// is validated from scratch and gets the next revision number.
    ///
    /// # Errors
    /// Same failure modes as [`Planner::generate_plan`].
    pub async fn refine_plan(
        &self,
        plan: &Plan,
        feedback: &str,
        model: &ModelConfig,
    ) -> Result<Plan, AgentError> {
        let current = serde_json::to_string_pretty(&plan.steps)
            .map_err(|e| PlanError::Json(e.to_string()))?;
        let prompt = format!(
            "Revise the following plan.\n\nCurrent plan:\n{current}\n\n\
             Feedback:\n{feedback}\n\n{}",
            response_contract()
        );
        let schema = plan_response_schema();
        let response = self
            .provider
            .complete(&prompt, model, Some(&schema))
            .await?;
        Ok(parse_plan(&response, plan.revision + 1)?)
    }

    fn planning_prompt(&self, task: &str, context: &PlanContext) -> String {
        let mut prompt = format!("Break this task into executable steps.\n\nTask: {task}\n");

        let mut tools = self.registry.list();
        if !self.allowed.is_empty() {
            tools.retain(|tool| self.allowed.contains(&tool.name));
        }
        if tools.is_empty() {
            prompt.push_str("\nNo tools are available; every step is answered directly.\n");
        } else {
            prompt.push_str("\nAvailable tools:\n");
            for tool in tools {
                prompt.push_str(&format!(
                    "- {}: {} (input schema: {})\n",
                    tool.name,
                    tool.description,
                    tool.schema.to_document()
                ));
            }
        }

        for note in &context.notes {
            prompt.push('\n');
            prompt.push_str(note);
            prompt.push('\n');
        }

        prompt.push('\n');
        prompt.push_str(&response_contract());
        prompt
    }
}

fn response_contract() -> String {
    "Respond with a single JSON object:\n\
     {\"steps\": [{\"id\": \"...\", \"description\": \"...\", \"tool\": null, \
     \"input\": null, \"expected_output\": null, \"depends_on\": []}], \
     \"confidence\": 0.0}\n\
     Step ids must be unique and depends_on may only reference earlier steps."
        .to_string()
}

fn plan_response_schema() -> Schema {
    Schema::Json(json!({
        "type": "object",
        "properties": {
            "steps": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "description": { "type": "string" },
                        "tool": { "type": ["string", "null"] },
                        "input": {},
                        "expected_output": { "type": ["string", "null"] },
                        "depends_on": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["id", "description"]
                }
            },
            "confidence": { "type": ["number", "null"] }
        },
        "required": ["steps"]
    }))
}

/// Parse a provider reply into a validated plan.
fn parse_plan(response: &str, revision: u32) -> Result<Plan, PlanError> {
    let json = extract_json(response)?;
    let raw: RawPlan = serde_json::from_str(json).map_err(|e| PlanError::Json(e.to_string()))?;
    Plan::from_raw(raw, revision)
}

/// Pull the JSON payload out of a possibly chatty provider reply.
///
/// Accepts a bare object, a fenced ```json block, or an object embedded in
/// surrounding prose.
pub(crate) fn extract_json(text: &str) -> Result<&str, PlanError> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Ok(trimmed);
    }

    if let Some(fence_start) = trimmed.find("```json") {
        let after = &trimmed[fence_start + "```json".len()..];
        if let Some(fence_end) = after.find("```") {
            return Ok(after[..fence_end].trim());
        }
    }

    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if start < end => Ok(trimmed[start..=end].trim()),
        _ => Err(PlanError::Json("no JSON object in response".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Returns canned responses in order.
    struct Scripted {
        responses: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for Scripted {
        async fn complete(
            &self,
            _prompt: &str,
            _model: &ModelConfig,
            _schema: Option<&Schema>,
        ) -> Result<String, ProviderError> {
            self.responses
                .lock()
                .pop()
                .ok_or_else(|| ProviderError::Malformed("script exhausted".to_string()))
        }
    }

    fn planner(responses: Vec<&str>) -> Planner {
        Planner::new(
            Arc::new(Scripted::new(responses)),
            Arc::new(ToolRegistry::new()),
        )
    }

    const TWO_STEPS: &str = r#"{
        "steps": [
            {"id": "a", "description": "first"},
            {"id": "b", "description": "second", "depends_on": ["a"]}
        ],
        "confidence": 0.9
    }"#;

    #[tokio::test]
    async fn plan_is_parsed_and_validated() {
        let planner = planner(vec![TWO_STEPS]);
        let plan = planner
            .generate_plan("demo", &PlanContext::new(), &ModelConfig::default())
            .await
            .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.revision, 0);
        assert_eq!(plan.confidence, Some(0.9));
    }

    #[tokio::test]
    async fn fenced_response_is_accepted() {
        let fenced = format!("Here is the plan:\n```json\n{TWO_STEPS}\n```\nDone.");
        let planner = planner(vec![&fenced]);
        let plan = planner
            .generate_plan("demo", &PlanContext::new(), &ModelConfig::default())
            .await
            .unwrap();
        assert_eq!(plan.len(), 2);
    }

    #[tokio::test]
    async fn prose_without_json_is_rejected() {
        let planner = planner(vec!["I cannot help with that."]);
        let err = planner
            .generate_plan("demo", &PlanContext::new(), &ModelConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Planner(PlanError::Json(_))));
    }

    #[tokio::test]
    async fn empty_plan_is_rejected() {
        let planner = planner(vec![r#"{"steps": []}"#]);
        let err = planner
            .generate_plan("demo", &PlanContext::new(), &ModelConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Planner(PlanError::Empty)));
    }

    #[tokio::test]
    async fn refinement_bumps_the_revision() {
        let planner = planner(vec![TWO_STEPS, TWO_STEPS]);
        let model = ModelConfig::default();
        let plan = planner
            .generate_plan("demo", &PlanContext::new(), &model)
            .await
            .unwrap();
        let refined = planner
            .refine_plan(&plan, "add error handling", &model)
            .await
            .unwrap();
        assert_eq!(refined.revision, 1);
    }

    #[tokio::test]
    async fn catalog_is_filtered_by_the_allowlist() {
        use crate::tools::Tool;
        use serde_json::Value;

        struct Named(&'static str);

        #[async_trait]
        impl Tool for Named {
            fn name(&self) -> &str {
                self.0
            }

            fn description(&self) -> &str {
                "a tool"
            }

            async fn execute(&self, _input: Value) -> Result<Value, String> {
                Ok(Value::Null)
            }
        }

        /// Captures the prompt it is handed.
        struct Capture {
            prompt: Mutex<String>,
        }

        #[async_trait]
        impl CompletionProvider for Capture {
            async fn complete(
                &self,
                prompt: &str,
                _model: &ModelConfig,
                _schema: Option<&Schema>,
            ) -> Result<String, ProviderError> {
                *self.prompt.lock() = prompt.to_string();
                Ok(TWO_STEPS.to_string())
            }
        }

        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(Named("calculator"))).unwrap();
        registry.register(Arc::new(Named("echo"))).unwrap();

        let provider = Arc::new(Capture {
            prompt: Mutex::new(String::new()),
        });
        let planner = Planner::new(
            Arc::clone(&provider) as Arc<dyn CompletionProvider>,
            registry,
        )
        .with_allowed_tools(vec!["calculator".to_string()]);
        planner
            .generate_plan("demo", &PlanContext::new(), &ModelConfig::default())
            .await
            .unwrap();

        let prompt = provider.prompt.lock().clone();
        assert!(prompt.contains("calculator"));
        assert!(!prompt.contains("echo"));
    }

    #[test]
    fn json_extraction_variants() {
        assert!(extract_json("{\"a\":1}").is_ok());
        assert!(extract_json("prefix {\"a\":1} suffix").is_ok());
        assert!(extract_json("```json\n{\"a\":1}\n```").is_ok());
        assert!(extract_json("nothing here").is_err());
    }
}
