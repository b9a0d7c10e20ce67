//! Summary generation stage.
//!
//! Four modules connected in a straight line:
//! `prompt` renders the clinical context with a fixed few-shot example and
//! the output schema; `worker` drives the retry loop and the raw-before-parse
//! write order; `parser` recovers a JSON object from whatever shape the
//! model answered in; `sanitize` coerces it into the fixed output schema.

pub mod parser;
pub mod prompt;
pub mod sanitize;
pub mod worker;

pub use parser::parse_summary_response;
pub use sanitize::sanitize_summary;
pub use worker::{run_summary, SummaryDeps};
