//! Plan structure and validation
//!
//! A plan is an ordered list of steps whose dependencies may only point
//! backward. That single rule keeps every accepted plan acyclic without a
//! separate cycle check, and makes scheduling a left-to-right sweep.

use std::collections::HashMap;

use gauntlet_trace::StepId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PlanError;

/// Step identifier as the planner wrote it, before internal ids are assigned.
pub type RawStepId = String;

/// One unit of work in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Internal step identifier
    pub id: StepId,
    /// Planner-assigned name, unique within the plan
    pub name: RawStepId,
    /// What the step is supposed to accomplish
    pub description: String,
    /// Tool to invoke; a step without one is answered by the provider
    pub tool: Option<String>,
    /// Literal tool input, if the planner supplied one
    pub input: Option<Value>,
    /// Planner's description of the expected result
    pub expected_output: Option<String>,
    /// Earlier steps whose outputs this step consumes
    pub depends_on: Vec<StepId>,
}

/// A validated, immutable execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Steps in planner order; dependencies always point to earlier entries
    pub steps: Vec<PlanStep>,
    /// Planner's self-reported confidence, clamped to `[0, 1]`
    pub confidence: Option<f64>,
    /// Zero for the initial plan, bumped on every refinement
    pub revision: u32,
}

/// Wire shape of a single step as emitted by the planning prompt.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawStep {
    pub id: RawStepId,
    pub description: String,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub expected_output: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<RawStepId>,
}

/// Wire shape of a whole plan response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawPlan {
    pub steps: Vec<RawStep>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl Plan {
    /// Validate a raw planner response into an executable plan.
    ///
    /// Rejects empty plans, duplicate step ids, references to unknown steps
    /// and any dependency on a step that appears later in the list.
    ///
    /// # Errors
    /// Returns the first [`PlanError`] encountered, in list order.
    pub(crate) fn from_raw(raw: RawPlan, revision: u32) -> Result<Self, PlanError> {
        if raw.steps.is_empty() {
            return Err(PlanError::Empty);
        }

        // First pass assigns ids and positions so a forward reference can be
        // told apart from a reference to nothing.
        let mut index: HashMap<RawStepId, (usize, StepId)> =
            HashMap::with_capacity(raw.steps.len());
        for (position, raw_step) in raw.steps.iter().enumerate() {
            if index
                .insert(raw_step.id.clone(), (position, StepId::new()))
                .is_some()
            {
                return Err(PlanError::DuplicateStep(raw_step.id.clone()));
            }
        }

        let mut steps = Vec::with_capacity(raw.steps.len());
        for (position, raw_step) in raw.steps.into_iter().enumerate() {
            let mut depends_on = Vec::with_capacity(raw_step.depends_on.len());
            for dependency in &raw_step.depends_on {
                match index.get(dependency) {
                    Some((dep_position, dep_id)) if *dep_position < position => {
                        depends_on.push(*dep_id);
                    }
                    Some(_) => {
                        return Err(PlanError::ForwardDependency {
                            step: raw_step.id,
                            dependency: dependency.clone(),
                        });
                    }
                    None => {
                        return Err(PlanError::UnknownDependency {
                            step: raw_step.id,
                            dependency: dependency.clone(),
                        });
                    }
                }
            }

            let id = index[&raw_step.id].1;
            steps.push(PlanStep {
                id,
                name: raw_step.id,
                description: raw_step.description,
                tool: raw_step.tool,
                input: raw_step.input,
                expected_output: raw_step.expected_output,
                depends_on,
            });
        }

        Ok(Self {
            steps,
            confidence: raw.confidence.map(|c| c.clamp(0.0, 1.0)),
            revision,
        })
    }

    /// Steps with no dependencies.
    #[must_use]
    pub fn roots(&self) -> Vec<&PlanStep> {
        self.steps.iter().filter(|s| s.depends_on.is_empty()).collect()
    }

    /// Look up a step by its internal id.
    #[must_use]
    pub fn step(&self, id: StepId) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Number of steps.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps. Validated plans never do.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
