//! Template expansion for definition strings
//!
//! Definitions embed `{{ ... }}` actions in URLs, inputs, filter arguments
//! and field defaults. This module holds the variable context those actions
//! read from and the expander itself.
//!
//! Supported actions:
//! - `{{ .Var }}` substitution
//! - `{{ re_replace .Var "regex" "replacement" }}`
//! - `{{ join .Var "," }}`
//! - `{{ and .A .B }}`, `{{ or .A .B }}`, `{{ eq .A "x" }}`, `{{ ne .A "x" }}`
//! - `{{ if cond }}...{{ else if cond }}...{{ else }}...{{ end }}`
//! - `{{ range $i, $x := .List }}...{{ . }}...{{ end }}`
//!
//! Nesting works for every construct.

mod eval;
mod parse;

use std::collections::HashMap;

use crate::error::Result;

/// Value of a context variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Str(String),
    List(Vec<String>),
}

impl Value {
    /// null is false, strings need a non-whitespace character, lists an element
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Str(s) => !s.trim().is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    /// Text form used when a value is written into the output
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Str(s) => s.clone(),
            Value::List(items) => items.join(","),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Option<String>> for Value {
    fn from(s: Option<String>) -> Self {
        s.map_or(Value::Null, Value::Str)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items)
    }
}

/// Variables visible to templates, keyed by their dotted name (`.Query.Q`)
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    vars: HashMap<String, Value>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn set_null(&mut self, name: impl Into<String>) {
        self.vars.insert(name.into(), Value::Null);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// String value of a variable, `None` when unset, null or a list
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.vars.get(name).and_then(Value::as_str)
    }

    /// Removes every variable starting with `prefix`
    pub fn clear_prefix(&mut self, prefix: &str) {
        self.vars.retain(|k, _| !k.starts_with(prefix));
    }
}

/// Expands every action in `template`
///
/// Strings without `{{` are returned unchanged.
pub fn expand(template: &str, ctx: &TemplateContext) -> Result<String> {
    expand_with(template, ctx, None)
}

/// Expands `template`, passing each value an action produces through `modifier`
///
/// Literal template text is never modified.
pub fn expand_with(
    template: &str,
    ctx: &TemplateContext,
    modifier: Option<&dyn Fn(&str) -> String>,
) -> Result<String> {
    if !template.contains("{{") {
        return Ok(template.to_string());
    }
    let nodes = parse::parse(template)?;
    eval::render(&nodes, ctx, modifier)
}

/// Rewrites .NET style group references (`$1`) into the `${1}` form
/// the regex crate expects, so `$1x` keeps meaning "group 1, then x".
pub(crate) fn regex_replacement(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(d) if d.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                    digits.push(*d);
                    chars.next();
                }
                out.push_str("${");
                out.push_str(&digits);
                out.push('}');
            }
            Some('$') => {
                chars.next();
                out.push_str("$$");
            }
            Some('{') => out.push('$'),
            _ => out.push_str("$$"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ctx() -> TemplateContext {
        let mut ctx = TemplateContext::new();
        ctx.set(".Keywords", "ubuntu server");
        ctx.set(".Query.Q", "ubuntu server");
        ctx.set(".Config.sort", "date");
        ctx.set(".True", "True");
        ctx.set_null(".False");
        ctx.set(".Empty", "   ");
        ctx.set(
            ".Categories",
            vec!["1".to_string(), "5".to_string(), "9".to_string()],
        );
        ctx.set(".NoCategories", Vec::<String>::new());
        ctx
    }

    #[test]
    fn test_no_braces_is_pass_through() {
        let ctx = TemplateContext::new();
        assert_eq!(expand("browse.php?c=1", &ctx).unwrap(), "browse.php?c=1");
        assert_eq!(expand("{ .NotAnAction }", &ctx).unwrap(), "{ .NotAnAction }");
    }

    proptest! {
        #[test]
        fn prop_strings_without_actions_are_unchanged(s in "[^{]*") {
            let ctx = TemplateContext::new();
            prop_assert_eq!(expand(&s, &ctx).unwrap(), s);
        }
    }

    #[test]
    fn test_variable_substitution() {
        let out = expand("search?q={{ .Keywords }}&sort={{.Config.sort}}", &ctx()).unwrap();
        assert_eq!(out, "search?q=ubuntu server&sort=date");
    }

    #[test]
    fn test_undefined_variable_is_an_error() {
        let err = expand("{{ .Missing }}", &ctx()).unwrap_err();
        assert!(err.to_string().contains(".Missing"));
    }

    #[test]
    fn test_modifier_applies_to_values_only() {
        let encode = |s: &str| s.replace(' ', "+");
        let out = expand_with("q={{ .Keywords }} end", &ctx(), Some(&encode)).unwrap();
        assert_eq!(out, "q=ubuntu+server end");
    }

    #[test]
    fn test_re_replace() {
        let out = expand(r#"{{ re_replace .Keywords "\s+" "%" }}"#, &ctx()).unwrap();
        assert_eq!(out, "ubuntu%server");
    }

    #[test]
    fn test_re_replace_group_reference() {
        let out = expand(r#"{{ re_replace .Keywords "(\w+) (\w+)" "$2-$1" }}"#, &ctx()).unwrap();
        assert_eq!(out, "server-ubuntu");
    }

    #[test]
    fn test_re_replace_replacement_is_expanded() {
        let out = expand(
            r#"{{ re_replace .Keywords "server" "{{ .Config.sort }}" }}"#,
            &ctx(),
        )
        .unwrap();
        assert_eq!(out, "ubuntu date");
    }

    #[test]
    fn test_join() {
        let out = expand(r#"cats={{ join .Categories "," }}"#, &ctx()).unwrap();
        assert_eq!(out, "cats=1,5,9");
    }

    #[test]
    fn test_and_returns_first_falsy_else_last() {
        let mut c = ctx();
        c.set(".A", "a");
        c.set(".B", "b");
        assert_eq!(expand("{{ and .A .B }}", &c).unwrap(), "b");
        c.set_null(".A");
        assert_eq!(expand("{{ and .A .B }}", &c).unwrap(), "");
        c.set(".A", "  ");
        assert_eq!(expand("{{ and .A .B }}", &c).unwrap(), "  ");
    }

    #[test]
    fn test_or_returns_first_truthy_else_last() {
        let mut c = ctx();
        c.set_null(".A");
        c.set(".B", "b");
        assert_eq!(expand("{{ or .A .B }}", &c).unwrap(), "b");
        c.set(".A", "a");
        assert_eq!(expand("{{ or .A .B }}", &c).unwrap(), "a");
        assert_eq!(expand("{{ or .Unset .False }}", &c).unwrap(), "");
    }

    #[test]
    fn test_eq_and_ne() {
        let mut c = ctx();
        c.set(".A", "x");
        assert_eq!(expand(r#"{{ eq .A "x" }}"#, &c).unwrap(), "True");
        assert_eq!(expand(r#"{{ eq .A "y" }}"#, &c).unwrap(), "");
        assert_eq!(expand(r#"{{ ne .A "y" }}"#, &c).unwrap(), "True");
        assert_eq!(expand(r#"{{ ne .A "x" }}"#, &c).unwrap(), "");
    }

    #[test]
    fn test_nested_logic_functions() {
        let mut c = ctx();
        c.set(".A", "x");
        c.set(".B", "y");
        let template = r#"{{ if and eq (.A) "x" eq (.B) "y" }}yes{{ else }}no{{ end }}"#;
        assert_eq!(expand(template, &c).unwrap(), "yes");
        c.set(".B", "z");
        assert_eq!(expand(template, &c).unwrap(), "no");
    }

    #[test]
    fn test_parenthesized_nested_logic() {
        let mut c = ctx();
        c.set(".A", "x");
        c.set_null(".B");
        let template = r#"{{ if or (eq .A "y") (.B) }}yes{{ else }}no{{ end }}"#;
        assert_eq!(expand(template, &c).unwrap(), "no");
        c.set(".B", "set");
        assert_eq!(expand(template, &c).unwrap(), "yes");
    }

    #[test]
    fn test_if_else_truthiness() {
        let mut c = ctx();
        let template = "{{ if .A }}if{{ else }}else{{ end }}";
        assert_eq!(expand(template, &c).unwrap(), "else");
        c.set(".A", "foo");
        assert_eq!(expand(template, &c).unwrap(), "if");
        c.set(".A", Vec::<String>::new());
        assert_eq!(expand(template, &c).unwrap(), "else");
        c.set(".A", vec!["x".to_string()]);
        assert_eq!(expand(template, &c).unwrap(), "if");
        c.set(".A", " \t");
        assert_eq!(expand(template, &c).unwrap(), "else");
    }

    #[test]
    fn test_if_without_else() {
        assert_eq!(
            expand("a{{ if .Keywords }}&q={{ .Keywords }}{{ end }}b", &ctx()).unwrap(),
            "a&q=ubuntu serverb"
        );
        assert_eq!(expand("a{{ if .False }}x{{ end }}b", &ctx()).unwrap(), "ab");
    }

    #[test]
    fn test_nested_if() {
        let mut c = ctx();
        c.set(".A", "a");
        let template = "{{ if .A }}{{ if .B }}both{{ else }}only-a{{ end }}{{ else }}none{{ end }}";
        assert_eq!(expand(template, &c).unwrap(), "only-a");
        c.set(".B", "b");
        assert_eq!(expand(template, &c).unwrap(), "both");
    }

    #[test]
    fn test_else_if_chain() {
        let mut c = ctx();
        c.set(".Mode", "tv");
        let template =
            r#"{{ if eq .Mode "movie" }}m{{ else if eq .Mode "tv" }}t{{ else }}o{{ end }}"#;
        assert_eq!(expand(template, &c).unwrap(), "t");
    }

    #[test]
    fn test_range_with_index() {
        let mut c = ctx();
        c.set(".Items", vec!["a".to_string(), "b".to_string()]);
        let out = expand("{{ range $i, $x := .Items }}[{{.}}]{{end}}", &c).unwrap();
        assert_eq!(out, "[a][b]");
        let out = expand("{{ range $i, $x := .Items }}{{$i}}={{$x}};{{end}}", &c).unwrap();
        assert_eq!(out, "0=a;1=b;");
    }

    #[test]
    fn test_range_over_categories() {
        let out = expand("{{ range .Categories }}&c[]={{.}}{{end}}", &ctx()).unwrap();
        assert_eq!(out, "&c[]=1&c[]=5&c[]=9");
        let out = expand("{{ range .NoCategories }}&c[]={{.}}{{end}}", &ctx()).unwrap();
        assert_eq!(out, "");
    }

    #[test]
    fn test_range_elements_pass_through_modifier() {
        let mut c = ctx();
        c.set(".Items", vec!["a b".to_string()]);
        let encode = |s: &str| s.replace(' ', "%20");
        let out = expand_with("{{ range .Items }}[{{.}}]{{end}}", &c, Some(&encode)).unwrap();
        assert_eq!(out, "[a%20b]");
    }

    #[test]
    fn test_regex_replacement_conversion() {
        assert_eq!(regex_replacement("$1x"), "${1}x");
        assert_eq!(regex_replacement("a$12b"), "a${12}b");
        assert_eq!(regex_replacement("cost $"), "cost $$");
        assert_eq!(regex_replacement("plain"), "plain");
    }
}
