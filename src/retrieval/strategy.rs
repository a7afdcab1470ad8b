use crate::models::TrainingDataType;

/// How `retrieve_context` weights its per-type search budget (spec.md
/// §4.5). The decomposer picks a strategy from the dataset profile it was
/// configured with (BIRD → context-focused, Spider → SQL-focused, generic
/// → balanced).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStrategy {
    Balanced,
    QaFocused,
    SqlFocused,
    ContextFocused,
}

impl RetrievalStrategy {
    /// The number of records of `data_type` to keep after filtering, given
    /// a baseline `max_examples_per_type`. Halved budgets round up so a
    /// baseline of 1 never collapses to zero.
    pub fn budget(&self, data_type: TrainingDataType, max_examples_per_type: usize) -> usize {
        let half = max_examples_per_type.div_ceil(2);
        let double = max_examples_per_type * 2;

        use TrainingDataType::*;
        match (self, data_type) {
            (Self::Balanced, _) => max_examples_per_type,

            (Self::QaFocused, QaPair) => double,
            (Self::QaFocused, _) => half,

            (Self::SqlFocused, SqlExample) => double,
            (Self::SqlFocused, _) => half,

            (Self::ContextFocused, Documentation | DomainKnowledge) => double,
            (Self::ContextFocused, SqlExample | QaPair) => half,
            (Self::ContextFocused, Ddl) => max_examples_per_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_gives_every_type_equal_budget() {
        for dt in TrainingDataType::ALL {
            assert_eq!(RetrievalStrategy::Balanced.budget(dt, 3), 3);
        }
    }

    #[test]
    fn qa_focused_doubles_qa_and_halves_others() {
        assert_eq!(RetrievalStrategy::QaFocused.budget(TrainingDataType::QaPair, 3), 6);
        assert_eq!(RetrievalStrategy::QaFocused.budget(TrainingDataType::SqlExample, 3), 2);
    }

    #[test]
    fn context_focused_favours_documentation_and_domain_knowledge() {
        assert_eq!(RetrievalStrategy::ContextFocused.budget(TrainingDataType::Documentation, 3), 6);
        assert_eq!(RetrievalStrategy::ContextFocused.budget(TrainingDataType::DomainKnowledge, 3), 6);
        assert_eq!(RetrievalStrategy::ContextFocused.budget(TrainingDataType::SqlExample, 3), 2);
    }
}
