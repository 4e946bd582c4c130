use super::{render, render_collecting_errors, render_to_string_sink};
use std::collections::HashMap;
use tagweave::{ErrorPolicy, Value};

#[test]
fn empty_template_produces_empty_output() {
    assert_eq!(render("", HashMap::new()).unwrap(), "");
}

#[test]
fn literal_only_template_is_an_identity_round_trip() {
    let tpl = "just plain text, no sigils at all.";
    assert_eq!(render(tpl, HashMap::new()).unwrap(), tpl);
}

#[test]
fn variable_not_supplied_renders_as_nothing() {
    let tpl = "[<=missing/>]";
    assert_eq!(render(tpl, HashMap::new()).unwrap(), "[]");
}

#[test]
fn cond_with_no_matching_case_emits_nothing_end_to_end() {
    let tpl = "before<:cond><:case 0>never</:case></:cond>after";
    assert_eq!(render(tpl, HashMap::new()).unwrap(), "beforeafter");
}

#[test]
fn output_policy_injects_prefixed_error_text_and_records_one_diagnostic() {
    let tpl = r#"before<: die "boom" />after"#;
    let (out, errors) = render_collecting_errors(tpl, HashMap::new(), ErrorPolicy::Output);
    assert_eq!(out.unwrap(), "before[T]boomafter");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "boom");
}

#[test]
fn warn_policy_substitutes_nothing_but_still_records_a_diagnostic() {
    let tpl = r#"before<: die "boom" />after"#;
    let (out, errors) = render_collecting_errors(tpl, HashMap::new(), ErrorPolicy::Warn);
    assert_eq!(out.unwrap(), "beforeafter");
    assert_eq!(errors.len(), 1);
}

#[test]
fn die_policy_aborts_the_whole_evaluation() {
    let tpl = r#"before<: die "boom" />after"#;
    let (out, _errors) = render_collecting_errors(tpl, HashMap::new(), ErrorPolicy::Die);
    assert!(out.is_err());
}

#[test]
fn clear_errors_drains_and_next_call_starts_fresh() {
    let tpl = r#"<: die "boom" />"#;
    let (_out, first) = render_collecting_errors(tpl, HashMap::new(), ErrorPolicy::Warn);
    assert_eq!(first.len(), 1);
    let (_out, second) = render_collecting_errors(tpl, HashMap::new(), ErrorPolicy::Warn);
    assert_eq!(second.len(), 1);
}

#[test]
fn evaluate_to_sink_matches_evaluate() {
    let tpl = "hello <=name/>!";
    let mut params = HashMap::new();
    params.insert("name".to_string(), Value::scalar("world"));
    let via_sink = render_to_string_sink(tpl, params.clone());
    let direct = render(tpl, params).unwrap();
    assert_eq!(via_sink, direct);
}
