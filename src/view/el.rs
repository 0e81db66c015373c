//! Value expressions embedded in template text and attributes.
//!
//! Inside `#{…}` or `${…}` the engine understands:
//! - a variable path: `title`, `param.q`
//! - a quoted literal: `'text'` or `"text"`
//! - a function call: `fn:toUpperCase(title, 'x')`, arguments being any of
//!   the three forms
//!
//! Anything richer belongs to a real expression language and is out of
//! reach on purpose. Undefined variables evaluate to the empty string.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::error::{ViewError, ViewResult};
use crate::utils::html::escape;

/// Looks up variables for expression evaluation.
pub trait VariableResolver {
    fn resolve_variable(&self, name: &str) -> Option<String>;
}

/// A function callable from expressions.
pub type ElFunction = Arc<dyn Fn(&[String]) -> Result<String, String> + Send + Sync>;

// ============================================================================
// Function Mapper
// ============================================================================

/// Registry of `prefix:name` functions.
#[derive(Clone, Default)]
pub struct FunctionMapper {
    functions: FxHashMap<String, ElFunction>,
}

impl FunctionMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapper preloaded with the `fn:` string functions.
    pub fn with_builtins() -> Self {
        let mut mapper = Self::new();
        mapper.register("fn:length", |args| {
            arity(args, 1).map(|a| a[0].chars().count().to_string())
        });
        mapper.register("fn:toUpperCase", |args| arity(args, 1).map(|a| a[0].to_uppercase()));
        mapper.register("fn:toLowerCase", |args| arity(args, 1).map(|a| a[0].to_lowercase()));
        mapper.register("fn:trim", |args| arity(args, 1).map(|a| a[0].trim().to_string()));
        mapper.register("fn:escapeXml", |args| arity(args, 1).map(|a| escape(&a[0]).into_owned()));
        mapper.register("fn:contains", |args| {
            arity(args, 2).map(|a| a[0].contains(a[1].as_str()).to_string())
        });
        mapper.register("fn:startsWith", |args| {
            arity(args, 2).map(|a| a[0].starts_with(a[1].as_str()).to_string())
        });
        mapper.register("fn:endsWith", |args| {
            arity(args, 2).map(|a| a[0].ends_with(a[1].as_str()).to_string())
        });
        mapper.register("fn:replace", |args| {
            arity(args, 3).map(|a| a[0].replace(a[1].as_str(), &a[2]))
        });
        mapper
    }

    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[String]) -> Result<String, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<&ElFunction> {
        self.functions.get(name)
    }
}

impl fmt::Debug for FunctionMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FunctionMapper").field("functions", &names).finish()
    }
}

fn arity(args: &[String], expected: usize) -> Result<&[String], String> {
    if args.len() == expected {
        Ok(args)
    } else {
        Err(format!("expected {expected} argument(s), got {}", args.len()))
    }
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Variable(String),
    Literal(String),
    Call { name: String, args: Vec<Term> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Text(String),
    Expr { source: String, term: Term },
}

/// A string with embedded expressions, parsed once at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValueExpr {
    parts: Vec<Part>,
}

impl ValueExpr {
    /// Parse `input`. The error message describes the first malformed
    /// expression.
    pub fn parse(input: &str) -> Result<Self, String> {
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut rest = input;

        while let Some(start) = find_open(rest) {
            let (before, after) = rest.split_at(start);
            // `\#{` stays literal
            if let Some(stripped) = before.strip_suffix('\\') {
                text.push_str(stripped);
                text.push_str(&after[..2]);
                rest = &after[2..];
                continue;
            }
            text.push_str(before);

            let body = &after[2..];
            let end = find_close(body)
                .ok_or_else(|| format!("unterminated expression in `{input}`"))?;
            let source = &body[..end];
            let term = parse_term(source)?;
            if !text.is_empty() {
                parts.push(Part::Text(std::mem::take(&mut text)));
            }
            parts.push(Part::Expr {
                source: after[..end + 3].to_string(),
                term,
            });
            rest = &body[end + 1..];
        }
        text.push_str(rest);
        if !text.is_empty() {
            parts.push(Part::Text(text));
        }
        Ok(Self { parts })
    }

    pub fn literal(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.is_empty() {
            return Self::default();
        }
        Self {
            parts: vec![Part::Text(text)],
        }
    }

    /// Whether the value contains no expression.
    pub fn is_literal(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, Part::Text(_)))
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Evaluate to a string. With `escape_values`, expression results are
    /// markup-escaped while literal text is kept as written.
    pub fn evaluate(
        &self,
        vars: &dyn VariableResolver,
        functions: &FunctionMapper,
        escape_values: bool,
    ) -> ViewResult<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Expr { source, term } => {
                    let value = eval_term(term, source, vars, functions)?;
                    if escape_values {
                        out.push_str(&escape(&value));
                    } else {
                        out.push_str(&value);
                    }
                }
            }
        }
        Ok(out)
    }
}

fn find_open(s: &str) -> Option<usize> {
    let hash = s.find("#{");
    let dollar = s.find("${");
    match (hash, dollar) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Index of the `}` closing an expression body, skipping quoted text.
fn find_close(body: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in body.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '}') => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_term(source: &str) -> Result<Term, String> {
    let s = source.trim();
    if s.is_empty() {
        return Err("empty expression".into());
    }

    if let Some(q) = s.chars().next().filter(|c| matches!(c, '\'' | '"')) {
        return s[1..]
            .strip_suffix(q)
            .filter(|inner| !inner.contains(q))
            .map(|inner| Term::Literal(inner.to_string()))
            .ok_or_else(|| format!("malformed literal `{s}`"));
    }

    if let Some(open) = s.find('(') {
        let name = s[..open].trim();
        let inner = s[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| format!("missing `)` in `{s}`"))?;
        if !is_identifier(name, true) {
            return Err(format!("invalid function name `{name}`"));
        }
        let args = split_args(inner)?
            .into_iter()
            .map(parse_term)
            .collect::<Result<_, _>>()?;
        return Ok(Term::Call {
            name: name.to_string(),
            args,
        });
    }

    if is_identifier(s, false) {
        Ok(Term::Variable(s.to_string()))
    } else {
        Err(format!("unsupported expression `{s}`"))
    }
}

/// Split call arguments on top-level commas.
fn split_args(inner: &str) -> Result<Vec<&str>, String> {
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut quote = None;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| format!("unbalanced `)` in `{inner}`"))?;
            }
            (None, ',') if depth == 0 => {
                args.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    args.push(&inner[start..]);
    Ok(args)
}

/// `a.b_c` for variables; `prefix:name` for functions.
fn is_identifier(s: &str, function: bool) -> bool {
    let mut chars = s.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let sep = if function { ':' } else { '.' };
    first_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == sep)
}

fn eval_term(
    term: &Term,
    source: &str,
    vars: &dyn VariableResolver,
    functions: &FunctionMapper,
) -> ViewResult<String> {
    match term {
        Term::Literal(text) => Ok(text.clone()),
        Term::Variable(name) => Ok(vars.resolve_variable(name).unwrap_or_default()),
        Term::Call { name, args } => {
            let function = functions.get(name).ok_or_else(|| ViewError::Evaluation {
                expression: source.to_string(),
                message: format!("unknown function `{name}`"),
            })?;
            let values = args
                .iter()
                .map(|arg| eval_term(arg, source, vars, functions))
                .collect::<ViewResult<Vec<_>>>()?;
            function(&values).map_err(|message| ViewError::Evaluation {
                expression: source.to_string(),
                message,
            })
        }
    }
}
