//! Trace identity types and their [`Context`] integration.
//!
//! A [`SpanContext`] is the unit of trace identity: trace id, span id,
//! sampling flags, and the vendor-extensible [`TraceState`]. Propagators read
//! it from and write it into a [`Context`] through [`TraceContextExt`], so
//! intermediate code never needs to know about tracing to carry it along.
//!
//! [`Context`]: crate::Context

mod span_context;

pub use crate::trace_context::{SpanId, TraceFlags, TraceId};
pub use span_context::{SpanContext, TraceState, TraceStateBuilder, TraceStateError};

use crate::{Context, ContextKey};
use std::sync::OnceLock;

fn span_context_key() -> &'static ContextKey<SpanContext> {
    static SPAN_CONTEXT_KEY: OnceLock<ContextKey<SpanContext>> = OnceLock::new();
    SPAN_CONTEXT_KEY.get_or_init(|| ContextKey::new("span-context"))
}

/// Methods for storing and retrieving trace identity in a [`Context`].
pub trait TraceContextExt {
    /// Returns a clone of this context with the given span context attached.
    ///
    /// Used at inbound boundaries to record the identity extracted from a
    /// carrier; the span context should carry `is_remote == true` in that
    /// case.
    fn with_remote_span_context(&self, span_context: SpanContext) -> Self;

    /// Returns the span context carried by this context, if any.
    fn span_context(&self) -> Option<&SpanContext>;

    /// Returns `true` if this context carries a span context.
    fn has_span_context(&self) -> bool;
}

impl TraceContextExt for Context {
    fn with_remote_span_context(&self, span_context: SpanContext) -> Self {
        self.with_value(span_context_key(), span_context)
    }

    fn span_context(&self) -> Option<&SpanContext> {
        self.get(span_context_key())
    }

    fn has_span_context(&self) -> bool {
        self.span_context().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_carries_span_context() {
        let cx = Context::new();
        assert!(!cx.has_span_context());
        assert_eq!(cx.span_context(), None);

        let span_context = SpanContext::new(
            TraceId::from(1u128),
            SpanId::from(2u64),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        let cx_with_span = cx.with_remote_span_context(span_context.clone());

        assert!(cx_with_span.has_span_context());
        assert_eq!(cx_with_span.span_context(), Some(&span_context));
        assert!(cx_with_span.span_context().map_or(false, SpanContext::is_remote));

        // The original context is unchanged.
        assert!(!cx.has_span_context());
    }

    #[test]
    fn replacing_span_context() {
        let first = SpanContext::new(
            TraceId::from(1u128),
            SpanId::from(1u64),
            TraceFlags::NOT_SAMPLED,
            true,
            TraceState::default(),
        );
        let second = SpanContext::new(
            TraceId::from(2u128),
            SpanId::from(2u64),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );

        let cx = Context::new().with_remote_span_context(first.clone());
        let updated = cx.with_remote_span_context(second.clone());

        assert_eq!(cx.span_context(), Some(&first));
        assert_eq!(updated.span_context(), Some(&second));
    }
}
