use std::collections::HashMap;

use super::template::{PromptKey, PromptTemplate};
use super::text;

/// Registry of every prompt the three agents use, keyed by `(agent,
/// prompt_type)` via [`PromptKey`]. Built once and never mutated
/// afterward — there is no `insert`/`remove` exposed past construction.
#[derive(Debug, Clone)]
pub struct PromptRegistry {
    templates: HashMap<PromptKey, PromptTemplate>,
}

impl PromptRegistry {
    pub fn get(&self, key: PromptKey) -> &PromptTemplate {
        self.templates.get(&key).expect("PromptRegistry is exhaustively populated for every PromptKey variant")
    }
}

impl Default for PromptRegistry {
    fn default() -> Self {
        let mut templates = HashMap::new();

        templates.insert(
            PromptKey::SchemaPruning,
            PromptTemplate::new(
                text::SCHEMA_PRUNING_SYSTEM,
                text::SCHEMA_PRUNING_USER,
                vec!["schema", "foreign_keys", "question", "evidence"],
                "Selector: prune a large schema down to the tables/columns a question plausibly needs.",
            ),
        );

        templates.insert(
            PromptKey::QueryDecomposition,
            PromptTemplate::new(
                text::QUERY_DECOMPOSITION_SYSTEM,
                text::QUERY_DECOMPOSITION_USER,
                vec!["schema", "foreign_keys", "max_sub_questions", "question", "evidence"],
                "Decomposer: split a complex question into an ordered sub-question plan.",
            ),
        );

        templates.insert(
            PromptKey::SimpleSqlGeneration,
            PromptTemplate::new(
                text::SIMPLE_SQL_GENERATION_SYSTEM,
                text::SIMPLE_SQL_GENERATION_USER,
                vec![
                    "schema",
                    "foreign_keys",
                    "db_type",
                    "retrieved_context",
                    "conversation_history",
                    "error_context",
                    "question",
                    "evidence",
                ],
                "Decomposer: synthesise SQL directly from a single sub-question.",
            ),
        );

        templates.insert(
            PromptKey::CotSqlGeneration,
            PromptTemplate::new(
                text::COT_SQL_GENERATION_SYSTEM,
                text::COT_SQL_GENERATION_USER,
                vec!["schema", "foreign_keys", "db_type", "sub_questions", "retrieved_context", "error_context", "question", "evidence"],
                "Decomposer: synthesise a single SQL statement that follows an ordered sub-question plan.",
            ),
        );

        templates.insert(
            PromptKey::SqlValidation,
            PromptTemplate::new(text::SQL_VALIDATION_SYSTEM, text::SQL_VALIDATION_USER, vec!["schema", "sql"], "Refiner: advisory pre-execution review."),
        );

        templates.insert(
            PromptKey::SqlRefinement,
            PromptTemplate::new(
                text::SQL_REFINEMENT_SYSTEM,
                text::SQL_REFINEMENT_USER,
                vec!["schema", "foreign_keys", "question", "failed_sql", "error_message", "attempt_history"],
                "Refiner: repair a SQL statement that failed to execute.",
            ),
        );

        Self { templates }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_prompt_key_is_registered() {
        let registry = PromptRegistry::default();
        let keys = [
            PromptKey::SchemaPruning,
            PromptKey::QueryDecomposition,
            PromptKey::SimpleSqlGeneration,
            PromptKey::CotSqlGeneration,
            PromptKey::SqlValidation,
            PromptKey::SqlRefinement,
        ];
        for key in keys {
            let _ = registry.get(key);
        }
    }

    #[test]
    fn schema_pruning_formats_with_full_parameter_set() {
        let registry = PromptRegistry::default();
        let tpl = registry.get(PromptKey::SchemaPruning);
        let mut values = HashMap::new();
        values.insert("schema", "schools(id, city)");
        values.insert("foreign_keys", "(none)");
        values.insert("question", "List schools in LA");
        values.insert("evidence", "");
        let (system, user) = tpl.format(&values).unwrap();
        assert!(system.contains("schools(id, city)"));
        assert!(user.contains("List schools in LA"));
    }
}
