use std::sync::{Arc, OnceLock};

use regex::Regex;

use waypoint_core::types::SystemContext;

/// Predicate over the run's context, guarding a conditional branch.
#[derive(Clone)]
pub enum Condition {
    /// Always taken.
    Always,
    /// Taken if the source node's result succeeded.
    OnSuccess,
    /// Taken if the source node's result failed.
    OnFailure,
    /// Comparison expression evaluated against the context.
    /// Supported: `path == "v"`, `!=`, `contains`, `<`, `<=`, `>`, `>=`.
    Expr(String),
    /// Arbitrary caller-supplied predicate.
    Predicate(Arc<dyn Fn(&SystemContext) -> bool + Send + Sync>),
}

impl Condition {
    pub fn expr(expr: impl Into<String>) -> Self {
        Self::Expr(expr.into())
    }

    pub fn predicate(f: impl Fn(&SystemContext) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(f))
    }

    /// Parse a flow-definition condition string.
    pub fn parse(text: &str) -> Self {
        match text.trim() {
            "always" => Self::Always,
            "on_success" => Self::OnSuccess,
            "on_failure" => Self::OnFailure,
            other => Self::Expr(other.to_string()),
        }
    }

    /// Evaluate for a branch leaving `source`.
    pub fn evaluate(&self, source: &str, ctx: &SystemContext) -> bool {
        match self {
            Self::Always => true,
            Self::OnSuccess => ctx.output(source).is_some_and(|r| r.is_success()),
            Self::OnFailure => ctx.output(source).is_some_and(|r| !r.is_success()),
            Self::Expr(expr) => evaluate_expression(expr, ctx),
            Self::Predicate(f) => f(ctx),
        }
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::OnSuccess => write!(f, "OnSuccess"),
            Self::OnFailure => write!(f, "OnFailure"),
            Self::Expr(expr) => f.debug_tuple("Expr").field(expr).finish(),
            Self::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

fn expression_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*([A-Za-z0-9_.\-]+)\s*(==|!=|<=|>=|<|>|\scontains\s)\s*(.*?)\s*$"#).ok()
    })
    .as_ref()
}

/// Evaluate a comparison expression against the context.
///
/// The left side is a dotted path resolved by [`SystemContext::lookup`].
/// Values compare as strings, except the ordering operators which compare
/// numerically. Returns `false` for unparseable expressions and missing
/// paths.
pub fn evaluate_expression(expr: &str, ctx: &SystemContext) -> bool {
    let Some(caps) = expression_regex().and_then(|re| re.captures(expr)) else {
        return false;
    };
    let path = &caps[1];
    let op = caps[2].trim();
    let expected = caps[3].trim_matches('"');

    let Some(actual) = ctx.lookup(path) else {
        return false;
    };
    let actual = match actual {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    };

    match op {
        "==" => actual == expected,
        "!=" => actual != expected,
        "contains" => actual.contains(expected),
        ordering => {
            let (Ok(a), Ok(b)) = (actual.parse::<f64>(), expected.parse::<f64>()) else {
                return false;
            };
            match ordering {
                "<" => a < b,
                "<=" => a <= b,
                ">" => a > b,
                ">=" => a >= b,
                _ => false,
            }
        }
    }
}
