//! Evaluation of parsed templates against a [`TemplateContext`]

use std::collections::HashMap;

use regex::Regex;

use super::parse::{Expr, Func, Node};
use super::{TemplateContext, Value, expand, regex_replacement};
use crate::error::{CardigannError, Result};

/// Truthy sentinel produced by `eq`/`ne`
const TRUE: &str = "True";

struct Env<'a> {
    ctx: &'a TemplateContext,
    modifier: Option<&'a dyn Fn(&str) -> String>,
}

/// Bindings introduced by `range`
#[derive(Debug, Clone, Default)]
struct Scope {
    dot: Option<String>,
    locals: HashMap<String, String>,
}

pub(super) fn render(
    nodes: &[Node],
    ctx: &TemplateContext,
    modifier: Option<&dyn Fn(&str) -> String>,
) -> Result<String> {
    let env = Env { ctx, modifier };
    let mut out = String::new();
    env.render_into(nodes, &Scope::default(), &mut out)?;
    Ok(out)
}

impl Env<'_> {
    fn render_into(&self, nodes: &[Node], scope: &Scope, out: &mut String) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Output(expr) => {
                    let text = self.eval(expr, scope, false)?.render();
                    match self.modifier {
                        Some(modify) => out.push_str(&modify(&text)),
                        None => out.push_str(&text),
                    }
                }
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let mut taken = None;
                    for (cond, body) in branches {
                        if self.eval(cond, scope, true)?.is_truthy() {
                            taken = Some(body);
                            break;
                        }
                    }
                    self.render_into(taken.unwrap_or(otherwise), scope, out)?;
                }
                Node::Range {
                    index,
                    element,
                    list,
                    body,
                } => {
                    let items = match self.eval(list, scope, false)? {
                        Value::List(items) => items,
                        Value::Null => Vec::new(),
                        Value::Str(_) => {
                            return Err(CardigannError::Template(
                                "range expects a list value".to_string(),
                            ));
                        }
                    };
                    for (i, item) in items.into_iter().enumerate() {
                        let mut inner = scope.clone();
                        if let Some(name) = index {
                            inner.locals.insert(name.clone(), i.to_string());
                        }
                        if let Some(name) = element {
                            inner.locals.insert(name.clone(), item.clone());
                        }
                        inner.dot = Some(item);
                        self.render_into(body, &inner, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Evaluates an expression; `tolerant` turns undefined variables into null
    fn eval(&self, expr: &Expr, scope: &Scope, tolerant: bool) -> Result<Value> {
        match expr {
            Expr::Var(name) => match self.ctx.get(name) {
                Some(value) => Ok(value.clone()),
                None if tolerant => Ok(Value::Null),
                None => Err(CardigannError::Template(format!(
                    "undefined variable {}",
                    name
                ))),
            },
            Expr::Dot => scope
                .dot
                .clone()
                .map(Value::Str)
                .ok_or_else(|| CardigannError::Template("{{.}} outside of range".to_string())),
            Expr::Local(name) => scope
                .locals
                .get(name)
                .cloned()
                .map(Value::Str)
                .ok_or_else(|| CardigannError::Template(format!("undefined variable {}", name))),
            Expr::Literal(text) => Ok(Value::Str(text.clone())),
            Expr::Call { func, args } => self.call(*func, args, scope, tolerant),
        }
    }

    fn call(&self, func: Func, args: &[Expr], scope: &Scope, tolerant: bool) -> Result<Value> {
        match func {
            Func::And | Func::Or => {
                let want = func == Func::Or;
                let mut last = Value::Null;
                for arg in args {
                    let value = self.eval(arg, scope, true)?;
                    if value.is_truthy() == want {
                        return Ok(value);
                    }
                    last = value;
                }
                Ok(last)
            }
            Func::Eq | Func::Ne => {
                let left = self.eval(&args[0], scope, tolerant)?.render();
                let right = self.eval(&args[1], scope, tolerant)?.render();
                let equal = left == right;
                if equal == (func == Func::Eq) {
                    Ok(Value::Str(TRUE.to_string()))
                } else {
                    Ok(Value::Null)
                }
            }
            Func::ReReplace => {
                let source = self.eval(&args[0], scope, tolerant)?.render();
                let (Expr::Literal(pattern), Expr::Literal(replacement)) = (&args[1], &args[2])
                else {
                    return Err(CardigannError::Template(
                        "re_replace expects literal pattern and replacement".to_string(),
                    ));
                };
                let re = Regex::new(pattern).map_err(|e| {
                    CardigannError::Template(format!("invalid regex \"{}\": {}", pattern, e))
                })?;
                let replacement = regex_replacement(&expand(replacement, self.ctx)?);
                Ok(Value::Str(
                    re.replace_all(&source, replacement.as_str()).into_owned(),
                ))
            }
            Func::Join => {
                let Expr::Literal(delimiter) = &args[1] else {
                    return Err(CardigannError::Template(
                        "join expects a literal delimiter".to_string(),
                    ));
                };
                Ok(match self.eval(&args[0], scope, tolerant)? {
                    Value::List(items) => Value::Str(items.join(delimiter)),
                    other => Value::Str(other.render()),
                })
            }
        }
    }
}
