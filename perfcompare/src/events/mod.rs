//! Pipeline event emission.
//!
//! The stage machine reports progress through an [`EventSink`]. The binary
//! uses [`LoggingEventSink`]; tests use [`CollectingEventSink`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent};
