use super::render;
use std::collections::HashMap;
use tagweave::Value;

fn params1(name: &str, value: Value) -> HashMap<String, Value> {
    let mut p = HashMap::new();
    p.insert(name.to_string(), value);
    p
}

pub mod scalar_binding {
    use super::*;

    #[test]
    fn renders_scalar_body_current_value() {
        let out = render("<=v/>", params1("v", Value::scalar("hello"))).unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn matched_close_form_with_literal_body() {
        let out = render("<=v>ignored</=v>", params1("v", Value::scalar("x"))).unwrap();
        assert_eq!(out, "ignored");
    }

    #[test]
    fn type_filter_scalar_skips_array() {
        let out = render(
            "<=v type=scalar>shown</=v>",
            params1("v", Value::list(vec![Value::scalar("a")])),
        )
        .unwrap();
        assert_eq!(out, "");
    }
}

pub mod list_expansion {
    use super::*;

    fn list_params() -> HashMap<String, Value> {
        params1(
            "xs",
            Value::list(vec![
                Value::scalar("a"),
                Value::scalar("b"),
                Value::scalar("c"),
            ]),
        )
    }

    #[test]
    fn bare_code_renders_each_element() {
        let out = render("<=xs><:/>,</=xs>", list_params()).unwrap();
        assert_eq!(out, "a,b,c,");
    }

    #[test]
    fn empty_list_suppresses_pre_and_post() {
        let out = render(
            r#"<=xs pre="[" post="]"><:/></=xs>"#,
            params1("xs", Value::list(vec![])),
        )
        .unwrap();
        assert_eq!(out, "");
    }

    #[test]
    fn nonempty_list_emits_pre_and_post() {
        let out = render(r#"<=xs pre="[" post="]"><:/></=xs>"#, list_params()).unwrap();
        assert_eq!(out, "[abc]");
    }

    #[test]
    fn first_and_last_take_precedence_over_code() {
        let out = render(
            r#"<=xs first="F<:/>" last="L<:/>" code="<:/>"/>"#,
            list_params(),
        )
        .unwrap();
        assert_eq!(out, "FabLc");
    }

    #[test]
    fn single_element_list_uses_first_not_last() {
        let out = render(
            r#"<=xs first="F<:/>" last="L<:/>"/>"#,
            params1("xs", Value::list(vec![Value::scalar("only")])),
        )
        .unwrap();
        assert_eq!(out, "Fonly");
    }
}

pub mod transforms {
    use super::*;

    fn digits() -> HashMap<String, Value> {
        params1(
            "xs",
            Value::list(vec![
                Value::scalar("3"),
                Value::scalar("1"),
                Value::scalar("2"),
            ]),
        )
    }

    #[test]
    fn grep_attribute_filters_elements() {
        let out = render(r#"<=xs grep="$_ != 2"><:/>,</=xs>"#, digits()).unwrap();
        assert_eq!(out, "3,1,");
    }

    #[test]
    fn map_attribute_transforms_elements() {
        let out = render(r#"<=xs map="$_ ~ \"!\""><:/>,</=xs>"#, digits()).unwrap();
        assert_eq!(out, "3!,1!,2!,");
    }

    #[test]
    fn sort_attribute_orders_elements_numerically() {
        // the default `expr` executor has no arithmetic subtraction, so a
        // signed comparator is built from boolean short-circuiting:
        // true branches of `&&` surface a nonzero literal, `||` picks the
        // first truthy branch, `0` is the equal fallback.
        let out = render(
            r#"<=xs sort="(a<b)&&-1||(a>b)&&1||0"><:/>,</=xs>"#,
            digits(),
        )
        .unwrap();
        assert_eq!(out, "1,2,3,");
    }

    #[test]
    fn child_section_transforms_apply_in_source_order() {
        // `<:map>` is written before `<:grep>`, so the grep condition sees
        // already-mapped values ("30"/"10"/"20"), not the original digits.
        let out = render(
            r#"<=xs><:map>$_ ~ "0"</:map><:grep>$_ != "10"</:grep><:/>,</=xs>"#,
            digits(),
        )
        .unwrap();
        assert_eq!(out, "30,20,");
    }
}
