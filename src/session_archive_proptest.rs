//! Property tests for session truncation (`SPEC_FULL.md` §8, invariant 8 and
//! scenario S8): the truncation marker appears iff the field exceeded the
//! threshold it was truncated against, and truncation never splits a
//! multi-byte UTF-8 character.

use proptest::prelude::*;

use super::{truncate_field, TRUNCATION_MARKER};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn truncation_marker_appears_iff_field_exceeded_threshold(
        field in ".{0,4000}",
        threshold in 0usize..2000,
    ) {
        let exceeded = field.len() > threshold;
        let result = truncate_field(field.clone(), threshold);
        prop_assert_eq!(result.ends_with(TRUNCATION_MARKER), exceeded);
        if !exceeded {
            prop_assert_eq!(result, field);
        }
    }

    #[test]
    fn truncated_output_is_always_valid_utf8_and_bounded(
        field in ".{0,4000}",
        threshold in 0usize..2000,
    ) {
        // truncate_field returns a String, so valid UTF-8 is guaranteed by
        // the type system as long as the function doesn't panic on a
        // non-char-boundary split; this asserts it never does, across a
        // wide range of multi-byte input.
        let result = truncate_field(field, threshold);
        prop_assert!(result.len() <= threshold + TRUNCATION_MARKER.len());
    }
}
