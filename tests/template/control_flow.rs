use super::{render, render_with_policy, render_with_search_path};
use std::collections::HashMap;
use tagweave::{ErrorPolicy, Value};

fn params1(name: &str, value: Value) -> HashMap<String, Value> {
    let mut p = HashMap::new();
    p.insert(name.to_string(), value);
    p
}

pub mod for_loop {
    use super::*;

    #[test]
    fn cartesian_product_is_declared_last_varies_slowest() {
        // `x` is declared after `y`, so `x` holds its value across a
        // full sweep of `y` before advancing.
        let tpl = "<:for y=\"<:[1,2,3]/>\" x=\"<:[10,20]/>\"><:code><=x/>-<=y/>;</:code></:for>";
        assert_eq!(
            render(tpl, HashMap::new()).unwrap(),
            "10-1;10-2;10-3;20-1;20-2;20-3;"
        );
    }

    #[test]
    fn scalar_binding_runs_body_once() {
        let tpl = r#"<:for n="5"><=n/>;</:for>"#;
        assert_eq!(render(tpl, HashMap::new()).unwrap(), "5;");
    }

    #[test]
    fn without_inherit_only_declared_bindings_are_visible() {
        let tpl = r#"<:for n="1"><=outer/>-<=n/></:for>"#;
        assert_eq!(
            render(tpl, params1("outer", Value::scalar("O"))).unwrap(),
            "-1"
        );
    }

    #[test]
    fn inherit_keyword_passes_through_outer_bindings() {
        let tpl = r#"<:for n="1" :inherit><=outer/>-<=n/></:for>"#;
        assert_eq!(
            render(tpl, params1("outer", Value::scalar("O"))).unwrap(),
            "O-1"
        );
    }

    #[test]
    fn inner_binding_shadows_outer_of_same_name() {
        let tpl = r#"<=n/>|<:for n="inner" :inherit><=n/></:for>"#;
        assert_eq!(
            render(tpl, params1("n", Value::scalar("outer"))).unwrap(),
            "outer|inner"
        );
    }

    #[test]
    fn only_code_child_renders_per_expansion() {
        let tpl = "before<:for x=\"<:[1,2]/>\">noise<:code><=x/></:code>after</:for>";
        assert_eq!(render(tpl, HashMap::new()).unwrap(), "before12");
    }
}

pub mod eval_control {
    use super::*;

    #[test]
    fn renders_generated_template_text() {
        // The body fragment returns a *string* containing tag syntax as
        // data; <:eval> reparses that string and evaluates it against
        // the enclosing scope, so `v` resolves here even though the
        // body itself never mentions `v` directly.
        let tpl = r#"<:eval><: "literal <=v/> text" /></:eval>"#;
        let out = render(tpl, params1("v", Value::scalar("X"))).unwrap();
        assert_eq!(out, "literal X text");
    }

    #[test]
    fn reparse_uses_enclosing_scope_not_binding_augmented() {
        // `bound` only exists in the scope the body fragment runs in,
        // not in the enclosing scope the reparsed text is evaluated
        // against, so it comes back unset.
        let tpl = r#"<:eval bound="Z"><: "bound is <=bound/>" /></:eval>"#;
        let out = render(tpl, HashMap::new()).unwrap();
        assert_eq!(out, "bound is ");
    }
}

pub mod include {
    use super::*;
    use std::fs;

    #[test]
    fn resolves_against_search_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("greeting.tmpl"), "hello <=name/>").unwrap();
        let tpl = r#"<:include greeting.tmpl name="world"/>"#;
        let out = render_with_search_path(tpl, HashMap::new(), vec![dir.path().to_path_buf()]).unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn without_inherit_sees_only_explicit_bindings() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("inner.tmpl"), "[<=outer/>][<=mine/>]").unwrap();
        let tpl = r#"<:include inner.tmpl mine="yes"/>"#;
        let out = render_with_search_path(
            tpl,
            params1("outer", Value::scalar("leaked?")),
            vec![dir.path().to_path_buf()],
        )
        .unwrap();
        assert_eq!(out, "[][yes]");
    }

    #[test]
    fn inherit_keyword_exposes_outer_bindings() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("inner.tmpl"), "[<=outer/>][<=mine/>]").unwrap();
        let tpl = r#"<:include inner.tmpl mine="yes" :inherit/>"#;
        let out = render_with_search_path(
            tpl,
            params1("outer", Value::scalar("visible")),
            vec![dir.path().to_path_buf()],
        )
        .unwrap();
        assert_eq!(out, "[visible][yes]");
    }

    #[test]
    fn set_children_contribute_bindings() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("inner.tmpl"), "<=mine/>").unwrap();
        let tpl = r#"<:include inner.tmpl><:set mine>from-set</:set></:include>"#;
        let out = render_with_search_path(tpl, HashMap::new(), vec![dir.path().to_path_buf()]).unwrap();
        assert_eq!(out, "from-set");
    }

    #[test]
    fn self_include_cycle_is_reported_not_infinite() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("loop.tmpl"), "a<:include loop.tmpl/>b").unwrap();
        let tpl = "<:include loop.tmpl/>";
        let out = render_with_search_path(tpl, HashMap::new(), vec![dir.path().to_path_buf()]).unwrap();
        assert_eq!(out, "ab");
    }

    #[test]
    fn missing_template_reports_load_error_and_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let tpl = "before<:include missing.tmpl/>after";
        let out = render_with_search_path(tpl, HashMap::new(), vec![dir.path().to_path_buf()]).unwrap();
        assert_eq!(out, "beforeafter");
    }
}

pub mod cond {
    use super::*;

    #[test]
    fn first_truthy_case_wins() {
        let tpl = "<:cond><:case 0>A</:case><:case 1>B</:case><:case 1>C</:case></:cond>";
        assert_eq!(render(tpl, HashMap::new()).unwrap(), "B");
    }

    #[test]
    fn no_matching_case_emits_nothing() {
        let tpl = "<:cond><:case 0>A</:case></:cond>";
        assert_eq!(render(tpl, HashMap::new()).unwrap(), "");
    }

    #[test]
    fn cases_after_first_truthy_are_never_evaluated() {
        // If the second case's condition were evaluated, its die() would
        // abort the whole evaluation under the Die policy.
        let tpl = r#"<:cond><:case 1>A</:case><:case die("should not run")>B</:case></:cond>"#;
        let out = render_with_policy(tpl, HashMap::new(), ErrorPolicy::Die);
        assert_eq!(out.unwrap(), "A");
    }

    #[test]
    fn var_names_bind_the_current_param_map_value() {
        let tpl = "<:cond v><:case $v==\"yes\">matched</:case></:cond>";
        assert_eq!(
            render(tpl, params1("v", Value::scalar("yes"))).unwrap(),
            "matched"
        );
    }
}
