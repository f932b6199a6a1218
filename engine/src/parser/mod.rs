//! Decoders for the output formats of each external tool.
//!
//! Every decoder is synchronous and tolerant: malformed input degrades to
//! fewer records, never to an error.

pub mod banner;
pub mod diagnostics;
pub mod jsonl;
pub mod metadata;
pub mod signature;

pub use banner::classify_banners;
pub use diagnostics::extract_error_message;
pub use jsonl::{parse_jsonl, parse_jsonl_file};
pub use metadata::parse_metadata;
pub use signature::parse_signature_table;
