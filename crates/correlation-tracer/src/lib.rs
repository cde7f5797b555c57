//! # Correlation Tracer
//!
//! Follows a correlation id through the stages of an event-driven pipeline.
//! The id is attached to the triggering artifact (object metadata or a
//! message envelope) and every downstream record that mentions it is
//! evidence that the stage was reached.
//!
//! A trace is [`TraceOutcome::Complete`] when every expected stage produced
//! at least one event. Missing stages yield a [`PartialTrace`] rather than an
//! error, so callers can poll until the pipeline catches up.

pub mod stage;
pub mod tracer;

pub use stage::{EventOutcome, PartialTrace, Stage, StageTarget, Trace, TraceEvent, TraceOutcome};
pub use tracer::CorrelationTracer;
