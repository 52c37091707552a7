/// SQL template compilation.
///
/// A template is plain SQL with typed `#{name[, type]}` slots. Compilation
/// turns it into an [`EndpointSpec`] that the executor can interpret at
/// request time:
///
/// ```text
/// SQL template
///       ↓
/// Placeholder parser   (parser.rs)
///       ↓
/// Segments + params    (types.rs)
///       ↓
/// Endpoint compiler    (compiler.rs)
///       ↓
/// Statement rendering  (render.rs, at request time)
/// ```
pub mod compiler;
pub mod parser;
pub mod render;
pub mod types;

pub use compiler::{compile, CompileRequest, EndpointSpec};
pub use parser::parse_template;
pub use render::Materialization;
pub use types::*;
