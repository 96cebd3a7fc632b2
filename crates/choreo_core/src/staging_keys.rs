use crate::workflow::StepKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagedKind {
    /// Output of the predecessor, consumed as this step's handler input.
    StagedInput,
    /// Auxiliary data placed ahead of time for this step.
    PrefetchData,
}

impl StagedKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::StagedInput => "staged_input",
            Self::PrefetchData => "prefetch_data",
        }
    }
}

pub fn partition_prefix(base_prefix: &str, kind: StagedKind, run_id: &str) -> String {
    let trimmed = base_prefix.trim_matches('/');
    if trimmed.is_empty() {
        format!("dataset={}/run_id={run_id}", kind.as_str())
    } else {
        format!("{trimmed}/dataset={}/run_id={run_id}", kind.as_str())
    }
}

pub fn staged_object_key(base_prefix: &str, kind: StagedKind, key: &StepKey) -> String {
    format!(
        "{}/step_id={}/function={}/part-0.json",
        partition_prefix(base_prefix, kind, &key.run_id),
        key.step_id,
        key.function_name,
    )
}

pub fn staged_input_object_key(base_prefix: &str, key: &StepKey) -> String {
    staged_object_key(base_prefix, StagedKind::StagedInput, key)
}

pub fn prefetch_data_object_key(base_prefix: &str, key: &StepKey) -> String {
    staged_object_key(base_prefix, StagedKind::PrefetchData, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Step;

    fn sample_key() -> StepKey {
        StepKey::new("run-123", &Step::new(4, "classify"))
    }

    #[test]
    fn builds_staged_input_key_with_expected_partitions() {
        let key = staged_input_object_key("choreography/staging/", &sample_key());
        assert_eq!(
            key,
            "choreography/staging/dataset=staged_input/run_id=run-123/step_id=4/function=classify/part-0.json"
        );
    }

    #[test]
    fn builds_prefetch_data_key() {
        let key = prefetch_data_object_key("/staging", &sample_key());
        assert_eq!(
            key,
            "staging/dataset=prefetch_data/run_id=run-123/step_id=4/function=classify/part-0.json"
        );
    }

    #[test]
    fn empty_prefix_yields_relative_key() {
        let key = staged_input_object_key("/", &sample_key());
        assert_eq!(
            key,
            "dataset=staged_input/run_id=run-123/step_id=4/function=classify/part-0.json"
        );
    }
}
