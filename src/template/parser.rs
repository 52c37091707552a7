/// Placeholder parser.
///
/// Splits a SQL template into literal text and typed parameter references.
/// Slots look like `#{name}` or `#{name, type}`; the type defaults to
/// `string` when omitted.
use std::sync::LazyLock;

use regex::Regex;

use super::types::{ParameterSpec, ParameterType, ParsedTemplate, Segment};
use crate::error::CompileError;

/// Non-greedy, single line. `#{}` does not match and stays literal.
static SLOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\{.+?\}").expect("slot pattern is a valid regex"));

/// Parse a SQL template in one left-to-right pass.
///
/// A name that appears more than once keeps the position of its first
/// occurrence and the type of its last one.
pub fn parse_template(sql: &str) -> Result<ParsedTemplate, CompileError> {
    let mut segments = Vec::new();
    let mut parameters: Vec<ParameterSpec> = Vec::new();
    let mut cursor = 0;

    for slot in SLOT.find_iter(sql) {
        if slot.start() > cursor {
            segments.push(Segment::Literal(sql[cursor..slot.start()].to_string()));
        }

        let param = parse_slot(slot.as_str())?;
        let index = match parameters.iter().position(|p| p.name == param.name) {
            Some(existing) => {
                parameters[existing].ty = param.ty;
                existing
            }
            None => {
                parameters.push(param);
                parameters.len() - 1
            }
        };
        segments.push(Segment::Param(index));
        cursor = slot.end();
    }

    if cursor < sql.len() {
        segments.push(Segment::Literal(sql[cursor..].to_string()));
    }

    Ok(ParsedTemplate {
        segments,
        parameters,
    })
}

fn parse_slot(slot: &str) -> Result<ParameterSpec, CompileError> {
    let inner = &slot[2..slot.len() - 1];
    let (name, annotation) = match inner.split_once(',') {
        Some((name, annotation)) => (name.trim(), Some(annotation)),
        None => (inner.trim(), None),
    };

    if name.is_empty() {
        return Err(CompileError::MissingParameterName {
            slot: slot.to_string(),
        });
    }

    let ty = match annotation {
        None => ParameterType::String,
        Some(raw) => ParameterType::from_annotation(raw).ok_or_else(|| {
            CompileError::InvalidTypeAnnotation {
                name: name.to_string(),
                annotation: raw.trim().to_string(),
            }
        })?,
    };

    Ok(ParameterSpec {
        name: name.to_string(),
        ty,
    })
}
