//! String predicates used by request matching.

mod string_match;

pub use string_match::{CompiledStringMatch, StringMatch, StringMatchError};
