//! Property tests for the failure-policy decision ladder (`SPEC_FULL.md` §8,
//! invariant list items 1-8's decision-order guarantee, scenarios S1-S4/S7)
//! and the no-result enrichment cap.

use proptest::prelude::*;

use super::{decide_next_action, diagnose_no_result, enrich_reason, FailureContext, NextAction, ENRICHMENT_CAP};
use crate::model::types::{FailureType, Priority};

fn arb_failure_type() -> impl Strategy<Value = FailureType> {
    prop_oneof![
        Just(FailureType::CodingFailure),
        Just(FailureType::ReviewRejection),
        Just(FailureType::NoResult),
        Just(FailureType::Timeout),
        Just(FailureType::AgentCrash),
        Just(FailureType::MergeConflict),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// The decision ladder is checked in a fixed priority order regardless
    /// of the inputs: diagnosis beats infrastructure retry beats backoff
    /// threshold beats priority-at-max.
    #[test]
    fn decision_ladder_honors_documented_priority_order(
        failure_type in arb_failure_type(),
        reason in "[a-z0-9 ]{0,40}",
        infra_retries in 0u32..6,
        max_infra_retries in 0u32..6,
        cumulative_attempts in 0u32..50,
        backoff_threshold in 0u32..10,
        priority_value in 0u8..=Priority::MAX,
    ) {
        let priority = Priority::new(priority_value).unwrap();
        let ctx = FailureContext {
            failure_type,
            reason: &reason,
            infra_retries,
            cumulative_attempts,
            priority,
            backoff_threshold,
            max_infra_retries,
        };
        let action = decide_next_action(&ctx);

        if diagnose_no_result(failure_type, &reason) {
            prop_assert_eq!(action, NextAction::Block { reason: failure_type.block_reason().to_owned() });
        } else if failure_type.is_infrastructure() && infra_retries < max_infra_retries {
            prop_assert_eq!(action, NextAction::InfrastructureRetry);
        } else if backoff_threshold == 0 || cumulative_attempts % backoff_threshold != 0 {
            prop_assert_eq!(action, NextAction::Requeue);
        } else if priority.is_max() {
            prop_assert_eq!(action, NextAction::Block { reason: failure_type.block_reason().to_owned() });
        } else {
            prop_assert_eq!(action, NextAction::Demote { new_priority: priority.demoted() });
        }
    }

    #[test]
    fn enriched_reason_never_exceeds_the_cap(
        failure_type in arb_failure_type(),
        reason in ".{0,80}",
        output_log in ".{0,4000}",
    ) {
        let enriched = enrich_reason(failure_type, &reason, &output_log);
        prop_assert!(enriched.chars().count() <= ENRICHMENT_CAP);
    }
}
