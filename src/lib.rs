pub mod ast;
pub mod backend;
pub mod decode;
pub mod error;
pub mod origin;
pub mod parser;
pub mod primitives;
pub mod projection;
pub mod source;
pub mod theory;
pub mod typecheck;
pub mod types;
pub mod unfold;

pub use backend::{FixpointBackend, RecordingBackend, Term};
pub use error::{Error, Result};
pub use parser::{parse_program, parse_query, parse_rules};
pub use theory::{QueryAnswer, QueryCell, Theory};

#[cfg(test)]
mod tests;
