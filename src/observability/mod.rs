//! Observability
//!
//! Structured logging through `tracing`. Events carry the collection name,
//! the operation and the underlying cause as fields.

mod logger;

pub use logger::init_logging;
