//! Types shared by the placeholder parser, the compiler and the executor.
//!
//! A compiled template is a flat list of [`Segment`]s. Parameter segments do
//! not carry names; they index into the template's parameter list so every
//! reference is guaranteed to have a recorded type.

use serde::Serialize;
use std::fmt;

/// Declared type of a template parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Integer,
    Float,
}

impl ParameterType {
    /// Look up a slot annotation such as `int` or ` VARCHAR `.
    ///
    /// Matching ignores case and surrounding whitespace. Returns `None` for
    /// anything outside the fixed table; callers must treat that as an error
    /// rather than falling back to a default.
    pub fn from_annotation(annotation: &str) -> Option<Self> {
        match annotation.trim().to_lowercase().as_str() {
            "string" | "str" | "varchar" | "char" => Some(ParameterType::String),
            "int" | "integer" => Some(ParameterType::Integer),
            "float" | "double" => Some(ParameterType::Float),
            _ => None,
        }
    }

    /// PostgreSQL type used for the explicit cast on a bound placeholder.
    ///
    /// Strings get no cast: like a quoted literal, the placeholder takes the
    /// type the server infers from context (timestamptz, uuid, an enum...)
    /// and the value is parsed by that type's input function.
    pub fn pg_cast(&self) -> Option<&'static str> {
        match self {
            ParameterType::String => None,
            ParameterType::Integer => Some("int8"),
            ParameterType::Float => Some("float8"),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Integer => "integer",
            ParameterType::Float => "float",
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named, typed parameter of an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParameterType,
}

/// One piece of a compiled template.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// SQL text copied verbatim.
    Literal(String),
    /// Reference to `parameters[index]`.
    Param(usize),
}

/// Output of the placeholder parser.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedTemplate {
    pub segments: Vec<Segment>,
    /// Ordered by first appearance, deduplicated by name.
    pub parameters: Vec<ParameterSpec>,
}

impl ParsedTemplate {
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Iterate over the literal text only, skipping parameter references.
    pub fn literals(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Literal(text) => Some(text.as_str()),
            Segment::Param(_) => None,
        })
    }
}

/// A validated request argument, ready to be bound or rendered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl ParamValue {
    pub fn ty(&self) -> ParameterType {
        match self {
            ParamValue::Text(_) => ParameterType::String,
            ParamValue::Integer(_) => ParameterType::Integer,
            ParamValue::Float(_) => ParameterType::Float,
        }
    }
}
