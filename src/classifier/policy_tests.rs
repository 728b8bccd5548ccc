//! Tests for `RecoveryPolicy`.

use super::{BudgetScope, RecoveryPolicy, RetryRule};
use std::time::Duration;

mod recovery_policy_defaults {
    use super::*;

    #[test]
    fn new_creates_policy_with_defaults() {
        let policy = RecoveryPolicy::new();

        assert_eq!(
            policy.empty_response,
            RetryRule::enabled(Duration::from_millis(500))
        );
        assert_eq!(policy.query_limit, RetryRule::enabled(Duration::from_secs(1)));
        assert_eq!(
            policy.operation_time_limit,
            RetryRule::enabled(Duration::from_secs(5))
        );
        assert_eq!(policy.attempts_limit, 6);
        assert_eq!(policy.budget_scope, BudgetScope::PerCall);
        assert_eq!(policy.max_dispatch_attempts, 32);
    }

    #[test]
    fn default_trait_matches_new() {
        assert_eq!(RecoveryPolicy::new(), RecoveryPolicy::default());
    }

    #[test]
    fn default_budget_scope_is_per_call() {
        assert_eq!(BudgetScope::default(), BudgetScope::PerCall);
    }
}

mod recovery_policy_builder {
    use super::*;

    #[test]
    fn with_query_limit_sets_rule() {
        let policy = RecoveryPolicy::new().with_query_limit(false, Duration::from_secs(2));

        assert_eq!(policy.query_limit, RetryRule::disabled(Duration::from_secs(2)));
    }

    #[test]
    fn with_operation_time_limit_sets_rule() {
        let policy =
            RecoveryPolicy::new().with_operation_time_limit(true, Duration::from_millis(10));

        assert_eq!(
            policy.operation_time_limit,
            RetryRule::enabled(Duration::from_millis(10))
        );
    }

    #[test]
    fn with_empty_response_sets_rule() {
        let policy = RecoveryPolicy::new().with_empty_response(false, Duration::ZERO);

        assert!(!policy.empty_response.enabled);
    }

    #[test]
    fn with_attempts_limit_sets_value() {
        let policy = RecoveryPolicy::new().with_attempts_limit(3);
        assert_eq!(policy.attempts_limit, 3);
    }

    #[test]
    #[should_panic(expected = "attempts_limit must be at least 1")]
    fn with_attempts_limit_zero_panics() {
        let _ = RecoveryPolicy::new().with_attempts_limit(0);
    }

    #[test]
    #[should_panic(expected = "max_dispatch_attempts must be at least 1")]
    fn with_max_dispatch_attempts_zero_panics() {
        let _ = RecoveryPolicy::new().with_max_dispatch_attempts(0);
    }

    #[test]
    fn builder_methods_chain() {
        let policy = RecoveryPolicy::new()
            .with_budget_scope(BudgetScope::PerClient)
            .with_max_dispatch_attempts(4)
            .with_attempts_limit(2);

        assert_eq!(policy.budget_scope, BudgetScope::PerClient);
        assert_eq!(policy.max_dispatch_attempts, 4);
        assert_eq!(policy.attempts_limit, 2);
    }
}
