//! Execution-scoped context and trace identity propagation.
//!
//! `tracewire` carries an immutable, typed bag of cross-cutting values
//! (trace identity, sampling decision, vendor-specific state) through call
//! chains and across process boundaries, without requiring every intermediate
//! function to know about tracing. It contains:
//!
//! - **[`Context`]**: an immutable, structurally shared collection of values
//!   with thread-scoped "current context" semantics. Deriving a new context
//!   never invalidates or copies existing ones, so contexts can be captured
//!   by closures and shared across threads freely.
//! - **[`propagation`]**: the [`TextMapPropagator`] contract over
//!   caller-supplied carriers ([`Injector`] / [`Extractor`]), plus
//!   combinators that compose several propagators into one.
//! - **[`trace`]**: the [`SpanContext`] trace identity value
//!   (trace id, span id, sampling flags, and the bounded, vendor-extensible
//!   [`TraceState`]) and its [`Context`] integration.
//! - **[`global`]**: the process-wide default propagator registry.
//!
//! The W3C Trace Context wire codec over `traceparent`/`tracestate` lives in
//! the companion `tracewire-w3c` crate.
//!
//! # Getting Started
//!
//! ```
//! use tracewire::{Context, ContextKey};
//!
//! fn do_work(request_id: &ContextKey<u64>) {
//!     // values attached by callers are visible here without being passed
//!     // through every intermediate signature
//!     assert_eq!(Context::current().get(request_id), Some(&7));
//! }
//!
//! let request_id = ContextKey::new("request-id");
//! let _guard = Context::new().with_value(&request_id, 7u64).attach();
//! do_work(&request_id);
//! ```
//!
//! # Feature Flags
//!
//! The following crate feature flags are available:
//!
//! * `trace`: Includes the trace identity types.
//! * `futures`: Context integration for futures, streams, and sinks.
//! * `internal-logs`: Enables internal diagnostics via `tracing`.
//!
//! All three are enabled by default.
//!
//! [`TextMapPropagator`]: propagation::TextMapPropagator
//! [`Injector`]: propagation::Injector
//! [`Extractor`]: propagation::Extractor
//! [`SpanContext`]: trace::SpanContext
//! [`TraceState`]: trace::TraceState
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod context;
pub mod global;
pub mod hex;
mod internal_logging;
pub mod propagation;

#[cfg(feature = "trace")]
pub mod trace;
#[cfg(feature = "trace")]
mod trace_context;

pub use context::{Context, ContextGuard, ContextKey};

#[cfg(feature = "futures")]
pub use context::{FutureContextExt, SinkContextExt, StreamContextExt, WithContext};

#[cfg(feature = "trace")]
pub use trace_context::{SpanId, TraceFlags, TraceId};

#[cfg(feature = "internal-logs")]
#[doc(hidden)]
pub mod _private {
    pub use tracing::{debug, error, info, warn};
}
