//! SagaDefinition - 不変の step 列
//!
//! # 設計原則
//! - 構築後は変更しない（orchestrator は `Arc<SagaDefinition>` を共有するだけ）
//! - step 名は一意（checkpoint は step を名前で参照する）
//! - 空の定義は作れない

use std::collections::HashSet;

use super::step::SagaStep;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("saga definition '{0}' has no steps")]
    Empty(String),

    #[error("saga definition '{definition}' declares step '{step}' twice")]
    DuplicateStep { definition: String, step: String },
}

#[derive(Debug, Clone)]
pub struct SagaDefinition {
    name: String,
    steps: Vec<SagaStep>,
}

impl SagaDefinition {
    pub fn builder(name: impl Into<String>) -> SagaDefinitionBuilder {
        SagaDefinitionBuilder {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[SagaStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, name: &str) -> Option<&SagaStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Whether `names` is exactly the first `names.len()` steps, in order.
    pub fn is_prefix(&self, names: &[String]) -> bool {
        names.len() <= self.steps.len()
            && names
                .iter()
                .zip(&self.steps)
                .all(|(name, step)| *name == step.name)
    }
}

pub struct SagaDefinitionBuilder {
    name: String,
    steps: Vec<SagaStep>,
}

impl SagaDefinitionBuilder {
    pub fn step(mut self, step: SagaStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn build(self) -> Result<SagaDefinition, DefinitionError> {
        if self.steps.is_empty() {
            return Err(DefinitionError::Empty(self.name));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(DefinitionError::DuplicateStep {
                    definition: self.name.clone(),
                    step: step.name.clone(),
                });
            }
        }
        Ok(SagaDefinition {
            name: self.name,
            steps: self.steps,
        })
    }
}
