use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};
use crate::models::AgentName;

/// One specific prompt a given agent formats, e.g. the selector's schema
/// pruning prompt or the refiner's repair prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKey {
    SchemaPruning,
    QueryDecomposition,
    SimpleSqlGeneration,
    CotSqlGeneration,
    SqlValidation,
    SqlRefinement,
}

impl PromptKey {
    pub fn agent(&self) -> AgentName {
        match self {
            Self::SchemaPruning => AgentName::Selector,
            Self::QueryDecomposition | Self::SimpleSqlGeneration | Self::CotSqlGeneration => AgentName::Decomposer,
            Self::SqlValidation | Self::SqlRefinement => AgentName::Refiner,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SchemaPruning => "schema_pruning",
            Self::QueryDecomposition => "query_decomposition",
            Self::SimpleSqlGeneration => "simple_sql_generation",
            Self::CotSqlGeneration => "cot_sql_generation",
            Self::SqlValidation => "sql_validation",
            Self::SqlRefinement => "sql_refinement",
        }
    }
}

/// `(system_prompt, user_template, parameters, description)`. Formatting
/// substitutes each declared `{parameter}` placeholder found in either
/// template half and fails if the caller's value map is missing one.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub system_prompt: String,
    pub user_template: String,
    pub parameters: Vec<String>,
    pub description: String,
}

impl PromptTemplate {
    pub fn new(
        system_prompt: impl Into<String>,
        user_template: impl Into<String>,
        parameters: Vec<&str>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_template: user_template.into(),
            parameters: parameters.into_iter().map(String::from).collect(),
            description: description.into(),
        }
    }

    /// Render `(system_prompt, user_prompt)`, substituting `{name}`
    /// placeholders from `values`. Every declared parameter must be
    /// present in `values` or formatting fails.
    pub fn format(&self, values: &HashMap<&str, &str>) -> CoreResult<(String, String)> {
        for param in &self.parameters {
            if !values.contains_key(param.as_str()) {
                return Err(CoreError::ConfigError(format!(
                    "prompt template missing required parameter `{param}`"
                )));
            }
        }

        let mut system_prompt = self.system_prompt.clone();
        let mut user_prompt = self.user_template.clone();
        for (key, value) in values {
            let placeholder = format!("{{{key}}}");
            system_prompt = system_prompt.replace(&placeholder, value);
            user_prompt = user_prompt.replace(&placeholder, value);
        }

        Ok((system_prompt, user_prompt))
    }
}
