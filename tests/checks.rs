use std::collections::HashMap;

use icd_check::checks::{Check, DistinctCountCheck, IsUniqueCheck, new_builtin};
use icd_check::errors::IcdError;

fn field_names() -> Vec<String> {
    "branch_id customer_id first_name surname gender date_of_birth"
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn row_map<'a>(values: &[(&'a str, &'a str)]) -> HashMap<&'a str, &'a str> {
    values.iter().copied().collect()
}

fn assert_check_syntax(result: Result<IsUniqueCheck, IcdError>) {
    let err = result.expect_err("construction must fail");
    assert!(matches!(err, IcdError::CheckSyntax(_)), "{err}");
}

fn assert_count_syntax(rule: &str) {
    let err =
        DistinctCountCheck::new("broken", rule, &field_names()).expect_err("construction must fail");
    assert!(matches!(err, IcdError::CheckSyntax(_)), "{err}");
}

#[test]
fn is_unique_flags_duplicate_keys_citing_first_row() {
    let mut check = IsUniqueCheck::new("test check", "branch_id, customer_id", &field_names())
        .expect("check parses");
    let first = row_map(&[("branch_id", "38000"), ("customer_id", "23")]);
    let second = row_map(&[("branch_id", "38000"), ("customer_id", "59")]);

    check.check_row(1, &first).unwrap();
    check.record_row(1, &first);
    check.check_row(2, &second).unwrap();
    check.record_row(2, &second);

    let err = check.check_row(3, &second).expect_err("duplicate key");
    assert!(matches!(err, IcdError::Check(_)), "{err}");
    assert!(err.to_string().contains("row 2"), "{err}");

    check.check_at_end().expect("no end-of-data assertion");
}

#[test]
fn is_unique_distinguishes_key_positions() {
    let mut check =
        IsUniqueCheck::new("test check", "branch_id,customer_id", &field_names()).unwrap();
    let ab = row_map(&[("branch_id", "a"), ("customer_id", "b")]);
    let ba = row_map(&[("branch_id", "b"), ("customer_id", "a")]);
    check.check_row(1, &ab).unwrap();
    check.record_row(1, &ab);
    check.check_row(2, &ba).expect("swapped keys differ");
}

#[test]
fn is_unique_probe_does_not_register() {
    let mut check = IsUniqueCheck::new("test check", "branch_id", &field_names()).unwrap();
    let row = row_map(&[("branch_id", "38000")]);
    check.check_row(1, &row).unwrap();
    // Not recorded, so the same key probes clean again.
    check.check_row(2, &row).unwrap();
    check.record_row(2, &row);
    assert!(check.check_row(3, &row).is_err());
}

#[test]
fn is_unique_reset_clears_seen_keys() {
    let mut check = IsUniqueCheck::new("test check", "branch_id", &field_names()).unwrap();
    let row = row_map(&[("branch_id", "38000")]);
    check.record_row(1, &row);
    assert!(check.check_row(2, &row).is_err());
    check.reset();
    check.check_row(1, &row).expect("state is empty again");
}

#[test]
fn is_unique_rejects_broken_field_lists() {
    assert_check_syntax(IsUniqueCheck::new("test check", "", &field_names()));
    assert_check_syntax(IsUniqueCheck::new("test check", "   ", &field_names()));
    assert_check_syntax(IsUniqueCheck::new(
        "test check",
        "branch_id,,customer_id",
        &field_names(),
    ));
    assert_check_syntax(IsUniqueCheck::new("test check", "branch_id,,", &field_names()));
    assert_check_syntax(IsUniqueCheck::new("test check", ",branch_id", &field_names()));
    assert_check_syntax(IsUniqueCheck::new(
        "test check",
        "branch_id, customer-id",
        &field_names(),
    ));
    assert_check_syntax(IsUniqueCheck::new(
        "test check",
        "branch_id customer_id",
        &field_names(),
    ));
}

#[test]
fn is_unique_rejects_unknown_field_names() {
    let err = IsUniqueCheck::new("test check", "branch_id, hugo", &field_names())
        .expect_err("unknown field");
    assert!(matches!(err, IcdError::FieldLookup(_)), "{err}");
}

#[test]
fn distinct_count_evaluates_at_end() {
    let mut check =
        DistinctCountCheck::new("test check", "branch_id < 3", &field_names()).unwrap();
    check.record_row(1, &row_map(&[("branch_id", "38000")]));
    check.record_row(2, &row_map(&[("branch_id", "38001")]));
    check.check_at_end().expect("two distinct values");

    // The same value again adds nothing.
    check.record_row(3, &row_map(&[("branch_id", "38001")]));
    check.check_at_end().expect("still two distinct values");

    check.record_row(4, &row_map(&[("branch_id", "38003")]));
    let err = check.check_at_end().expect_err("three distinct values");
    assert!(matches!(err, IcdError::Check(_)), "{err}");
    assert!(err.to_string().contains('3'), "{err}");
}

#[test]
fn distinct_count_accepts_compact_and_spaced_rules() {
    DistinctCountCheck::new("test check", "branch_id<3", &field_names()).unwrap();
    DistinctCountCheck::new("test check", "  branch_id  <=  3  ", &field_names()).unwrap();
}

#[test]
fn distinct_count_supports_all_relational_operators() {
    let cases = [
        ("branch_id < 2", 1, true),
        ("branch_id < 2", 2, false),
        ("branch_id <= 2", 2, true),
        ("branch_id <= 2", 3, false),
        ("branch_id = 2", 2, true),
        ("branch_id = 2", 1, false),
        ("branch_id != 2", 1, true),
        ("branch_id != 2", 2, false),
        ("branch_id >= 2", 2, true),
        ("branch_id >= 2", 1, false),
        ("branch_id > 2", 3, true),
        ("branch_id > 2", 2, false),
    ];
    for (rule, distinct_values, expected_ok) in cases {
        let mut check = DistinctCountCheck::new("test check", rule, &field_names()).unwrap();
        for index in 0..distinct_values {
            let value = format!("branch-{index}");
            check.record_row(index + 1, &row_map(&[("branch_id", value.as_str())]));
        }
        assert_eq!(
            check.check_at_end().is_ok(),
            expected_ok,
            "rule {rule:?} with {distinct_values} distinct value(s)"
        );
    }
}

#[test]
fn distinct_count_rejects_broken_expressions() {
    assert_count_syntax("");
    assert_count_syntax(" ");
    assert_count_syntax("branch_id");
    assert_count_syntax("branch_id <");
    assert_count_syntax("< 3");
    assert_count_syntax("branch_id ! broken ^ 5ynt4x ?!?");
    assert_count_syntax("branch_id + 123");
    assert_count_syntax("branch_id < (100 / 0)");
    assert_count_syntax("branch_id < 3 4");
    assert_count_syntax("branch_id == 3");
}

#[test]
fn distinct_count_rejects_unknown_field_names() {
    let err = DistinctCountCheck::new("broken", "hugo < 3", &field_names())
        .expect_err("unknown field");
    assert!(matches!(err, IcdError::FieldLookup(_)), "{err}");
}

#[test]
fn distinct_count_reset_clears_values() {
    let mut check =
        DistinctCountCheck::new("test check", "branch_id < 2", &field_names()).unwrap();
    check.record_row(1, &row_map(&[("branch_id", "a")]));
    check.record_row(2, &row_map(&[("branch_id", "b")]));
    assert!(check.check_at_end().is_err());
    check.reset();
    check.check_at_end().expect("state is empty again");
}

#[test]
fn builtin_factory_matches_type_tokens_case_insensitively() {
    new_builtin("IsUnique", "d", "branch_id", &field_names()).unwrap();
    new_builtin("isunique", "d", "branch_id", &field_names()).unwrap();
    new_builtin("DistinctCount", "d", "branch_id < 3", &field_names()).unwrap();
    let err = new_builtin("NoSuchCheck", "d", "", &field_names()).expect_err("unknown type");
    assert!(matches!(err, IcdError::CheckSyntax(_)), "{err}");
}
