/// Turns a parsed template back into SQL text.
///
/// Two strategies are supported:
///
/// - `Bound` (default): every reference becomes `$n`, where `n` is the 1-based
///   index of the parameter, and values travel separately to the driver.
///   Numbers carry a cast (`$n::int8`, `$n::float8`); strings stay untyped so
///   the server infers their type from context. Argument text never becomes
///   part of the statement.
/// - `Textual`: values are spliced into the statement. Strings are wrapped in
///   single quotes with each embedded `'` doubled, numbers are written in
///   their canonical form. Kept for parity with deployments that relied on
///   literal SQL; not injection-proof against every server setting (for
///   example `standard_conforming_strings = off`).
use std::fmt::Write;

use serde::{Deserialize, Serialize};

use super::types::{ParamValue, ParameterType, ParsedTemplate, Segment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Materialization {
    #[default]
    Bound,
    Textual,
}

/// Render the statement sent to the driver in bound mode.
pub fn bound_sql(template: &ParsedTemplate) -> String {
    let mut sql = String::new();
    for segment in &template.segments {
        match segment {
            Segment::Literal(text) => sql.push_str(text),
            Segment::Param(index) => {
                let _ = match template.parameters[*index].ty.pg_cast() {
                    Some(cast) => write!(sql, "${}::{}", index + 1, cast),
                    None => write!(sql, "${}", index + 1),
                };
            }
        }
    }
    sql
}

/// Render the statement with validated values spliced in.
///
/// `args` must be ordered like `template.parameters`.
pub fn textual_sql(template: &ParsedTemplate, args: &[ParamValue]) -> String {
    let mut sql = String::new();
    for segment in &template.segments {
        match segment {
            Segment::Literal(text) => sql.push_str(text),
            Segment::Param(index) => match &args[*index] {
                ParamValue::Text(s) => sql.push_str(&quote_literal(s)),
                ParamValue::Integer(i) => sql.push_str(&i.to_string()),
                ParamValue::Float(f) => sql.push_str(&f.to_string()),
            },
        }
    }
    sql
}

/// Human-readable form of the textual statement, with `{name}` markers where
/// values will go. Returned to operators when they compile in textual mode.
pub fn textual_preview(template: &ParsedTemplate) -> String {
    let mut sql = String::new();
    for segment in &template.segments {
        match segment {
            Segment::Literal(text) => sql.push_str(text),
            Segment::Param(index) => {
                let param = &template.parameters[*index];
                match param.ty {
                    ParameterType::String => {
                        let _ = write!(sql, "'{{{}}}'", param.name);
                    }
                    ParameterType::Integer | ParameterType::Float => {
                        let _ = write!(sql, "{{{}}}", param.name);
                    }
                }
            }
        }
    }
    sql
}

/// Quote a string as a SQL literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
