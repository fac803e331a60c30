//! Global subscriber installation runs in its own test binary so it cannot
//! race the per-test subscribers used by the library tests.

use circleci_provider::try_init_logging;

#[test]
fn test_try_init_is_idempotent() {
    assert!(try_init_logging());
    assert!(!try_init_logging());
}
