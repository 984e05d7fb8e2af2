use promptdesk_core::{AutonomyConfig, AutonomyLevel, EditSuggestion, EditType};

/// Canonical policy for each autonomy level.
#[must_use]
pub fn resolve_config(level: AutonomyLevel) -> AutonomyConfig {
    let (threshold, require_confirmation, max_batch_size, allowed) = match level {
        AutonomyLevel::Manual => (1.0, true, 1, vec![EditType::Custom]),
        AutonomyLevel::Partial => (0.9, true, 3, EditType::ALL.to_vec()),
        AutonomyLevel::Assisted => (0.8, false, 5, EditType::ALL.to_vec()),
        AutonomyLevel::Autonomous => (0.7, false, 10, EditType::ALL.to_vec()),
    };
    AutonomyConfig {
        level,
        auto_apply_threshold: threshold,
        require_confirmation,
        max_batch_size,
        allowed_edit_types: allowed,
    }
}

/// Resolve a level by name. Unknown names are an error, never a default level.
pub fn resolve_named(level: &str) -> Result<AutonomyConfig, promptdesk_core::EditError> {
    Ok(resolve_config(level.parse()?))
}

#[must_use]
pub fn is_auto_apply_eligible(suggestion: &EditSuggestion, config: &AutonomyConfig) -> bool {
    !config.require_confirmation
        && suggestion.confidence >= config.auto_apply_threshold
        && config.allows(suggestion.edit_type)
}

/// Which suggestions of a round may be applied without confirmation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoApplyPlan {
    /// Indices into the suggestion list, in source order, at most `max_batch_size`.
    pub auto_apply: Vec<usize>,
    /// Everything else, in source order.
    pub hold: Vec<usize>,
}

#[must_use]
pub fn partition_for_auto_apply(
    suggestions: &[EditSuggestion],
    config: &AutonomyConfig,
) -> AutoApplyPlan {
    let mut plan = AutoApplyPlan::default();
    for (idx, suggestion) in suggestions.iter().enumerate() {
        if plan.auto_apply.len() < config.max_batch_size
            && is_auto_apply_eligible(suggestion, config)
        {
            plan.auto_apply.push(idx);
        } else {
            plan.hold.push(idx);
        }
    }
    plan
}

/// Session-scoped policy holder. `set_level` is the only mutation path; rounds
/// work from a [`AutonomyPolicy::snapshot`].
#[derive(Debug, Clone)]
pub struct AutonomyPolicy {
    active: AutonomyConfig,
}

impl AutonomyPolicy {
    pub fn new(level: AutonomyLevel) -> Self {
        Self {
            active: resolve_config(level),
        }
    }

    pub fn level(&self) -> AutonomyLevel {
        self.active.level
    }

    pub fn config(&self) -> &AutonomyConfig {
        &self.active
    }

    pub fn snapshot(&self) -> AutonomyConfig {
        self.active.clone()
    }

    /// Returns true when the level actually changed.
    pub fn set_level(&mut self, level: AutonomyLevel) -> bool {
        if self.active.level == level {
            return false;
        }
        self.active = resolve_config(level);
        true
    }
}

impl Default for AutonomyPolicy {
    fn default() -> Self {
        Self::new(AutonomyLevel::Partial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn suggestion(edit_type: EditType, confidence: f64) -> EditSuggestion {
        EditSuggestion {
            id: Uuid::now_v7(),
            edit_type,
            original_text: "hey".to_string(),
            suggested_text: "Hello".to_string(),
            confidence,
            reasoning: String::new(),
            intermediate_steps: vec![],
            citations: vec![],
            timestamp: Utc::now(),
        }
    }

    fn edit_type_strategy() -> impl Strategy<Value = EditType> {
        prop_oneof![
            Just(EditType::Replacement),
            Just(EditType::Insertion),
            Just(EditType::Deletion),
            Just(EditType::Formatting),
            Just(EditType::Custom),
        ]
    }

    fn level_strategy() -> impl Strategy<Value = AutonomyLevel> {
        prop_oneof![
            Just(AutonomyLevel::Manual),
            Just(AutonomyLevel::Partial),
            Just(AutonomyLevel::Assisted),
            Just(AutonomyLevel::Autonomous),
        ]
    }

    #[test]
    fn canonical_table_is_reproduced_exactly() {
        let expected = [
            (AutonomyLevel::Manual, 1.0, true, 1, vec![EditType::Custom]),
            (AutonomyLevel::Partial, 0.9, true, 3, EditType::ALL.to_vec()),
            (AutonomyLevel::Assisted, 0.8, false, 5, EditType::ALL.to_vec()),
            (AutonomyLevel::Autonomous, 0.7, false, 10, EditType::ALL.to_vec()),
        ];
        for (level, threshold, confirm, batch, allowed) in expected {
            let cfg = resolve_config(level);
            assert_eq!(cfg.level, level);
            assert_eq!(cfg.auto_apply_threshold, threshold, "{level}");
            assert_eq!(cfg.require_confirmation, confirm, "{level}");
            assert_eq!(cfg.max_batch_size, batch, "{level}");
            assert_eq!(cfg.allowed_edit_types, allowed, "{level}");
        }
    }

    #[test]
    fn named_resolution_fails_fast_on_unknown_level() {
        assert!(resolve_named("assisted").is_ok());
        assert!(matches!(
            resolve_named("turbo"),
            Err(promptdesk_core::EditError::UnknownAutonomyLevel(_))
        ));
    }

    proptest! {
        #[test]
        fn require_confirmation_blocks_every_suggestion(
            level in level_strategy(),
            edit_type in edit_type_strategy(),
            confidence in 0.0f64..=1.0,
        ) {
            let mut cfg = resolve_config(level);
            cfg.require_confirmation = true;
            prop_assert!(!is_auto_apply_eligible(&suggestion(edit_type, confidence), &cfg));
        }

        #[test]
        fn manual_policy_never_auto_applies(
            edit_type in edit_type_strategy(),
            confidence in 0.0f64..=1.0,
        ) {
            let cfg = resolve_config(AutonomyLevel::Manual);
            prop_assert!(!is_auto_apply_eligible(&suggestion(edit_type, confidence), &cfg));
        }

        #[test]
        fn partition_never_exceeds_batch_size(
            level in level_strategy(),
            confidences in prop::collection::vec(0.0f64..=1.0, 0..16),
        ) {
            let cfg = resolve_config(level);
            let suggestions: Vec<_> = confidences
                .iter()
                .map(|c| suggestion(EditType::Replacement, *c))
                .collect();
            let plan = partition_for_auto_apply(&suggestions, &cfg);
            prop_assert!(plan.auto_apply.len() <= cfg.max_batch_size);
            prop_assert_eq!(plan.auto_apply.len() + plan.hold.len(), suggestions.len());
        }
    }

    #[test]
    fn assisted_accepts_confidence_at_threshold_but_not_below() {
        let cfg = resolve_config(AutonomyLevel::Assisted);
        assert!(is_auto_apply_eligible(&suggestion(EditType::Replacement, 0.8), &cfg));
        assert!(is_auto_apply_eligible(&suggestion(EditType::Replacement, 0.85), &cfg));
        assert!(!is_auto_apply_eligible(&suggestion(EditType::Replacement, 0.79), &cfg));
    }

    #[test]
    fn disallowed_type_is_held_regardless_of_confidence() {
        let mut cfg = resolve_config(AutonomyLevel::Autonomous);
        cfg.allowed_edit_types = vec![EditType::Formatting];
        assert!(!is_auto_apply_eligible(&suggestion(EditType::Deletion, 1.0), &cfg));
        assert!(is_auto_apply_eligible(&suggestion(EditType::Formatting, 0.7), &cfg));
    }

    #[test]
    fn five_eligible_suggestions_with_batch_of_three() {
        let mut cfg = resolve_config(AutonomyLevel::Assisted);
        cfg.max_batch_size = 3;
        let suggestions: Vec<_> = (0..5)
            .map(|_| suggestion(EditType::Replacement, 0.95))
            .collect();
        let plan = partition_for_auto_apply(&suggestions, &cfg);
        assert_eq!(plan.auto_apply, vec![0, 1, 2]);
        assert_eq!(plan.hold, vec![3, 4]);
    }

    #[test]
    fn set_level_reports_changes_only() {
        let mut policy = AutonomyPolicy::default();
        assert_eq!(policy.level(), AutonomyLevel::Partial);
        assert!(!policy.set_level(AutonomyLevel::Partial));
        assert!(policy.set_level(AutonomyLevel::Autonomous));
        assert_eq!(policy.config().max_batch_size, 10);

        let snapshot = policy.snapshot();
        policy.set_level(AutonomyLevel::Manual);
        assert_eq!(snapshot.level, AutonomyLevel::Autonomous);
    }

    #[test]
    fn config_round_trips_through_json_with_wire_names() {
        let cfg = resolve_config(AutonomyLevel::Partial);
        let value = serde_json::to_value(&cfg).expect("serialize");
        assert_eq!(value["autoApplyThreshold"], 0.9);
        assert_eq!(value["requireConfirmation"], true);
        assert_eq!(value["allowedEditTypes"].as_array().map(Vec::len), Some(5));
    }
}
