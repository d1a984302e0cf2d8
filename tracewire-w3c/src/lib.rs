//! # W3C Trace Context Propagator
//!
//! A [`TextMapPropagator`] over the two [W3C TraceContext] wire headers,
//! `traceparent` and `tracestate`.
//!
//! The `traceparent` header represents the incoming request in a tracing
//! system in a common format, understood by all vendors. Here's an example of
//! a `traceparent` header.
//!
//! `traceparent: 00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01`
//!
//! It has four fields:
//!
//!    - version
//!    - trace-id
//!    - parent-id
//!    - trace-flags
//!
//! The `tracestate` header provides additional vendor-specific trace
//! identification information across different distributed tracing systems.
//! Here's an example of a `tracestate` header
//!
//! `tracestate: vendorname1=opaqueValue1,vendorname2=opaqueValue2`
//!
//! Parsing is total: malformed wire input never fails extraction, it degrades
//! to an unchanged context (`traceparent`) or to per-entry omission
//! (`tracestate`), so trace propagation can never break the request it rides
//! along with.
//!
//! See the [w3c trace-context docs] for more details.
//!
//! [w3c trace-context docs]: https://w3c.github.io/trace-context/
//! [W3C TraceContext]: https://www.w3.org/TR/trace-context/
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]

use std::sync::OnceLock;
use tracewire::{
    hex,
    propagation::{Extractor, FieldIter, Injector, TextMapPropagator},
    trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState},
    Context,
};

const SUPPORTED_VERSION: u8 = 0;
const INVALID_VERSION: u8 = 0xff;
const VERSION_LEN: usize = 2;
const FLAGS_LEN: usize = 2;
const TRACEPARENT_HEADER: &str = "traceparent";
const TRACESTATE_HEADER: &str = "tracestate";

static TRACE_CONTEXT_HEADER_FIELDS: OnceLock<[String; 2]> = OnceLock::new();

fn trace_context_header_fields() -> &'static [String; 2] {
    TRACE_CONTEXT_HEADER_FIELDS
        .get_or_init(|| [TRACEPARENT_HEADER.to_owned(), TRACESTATE_HEADER.to_owned()])
}

/// Propagates trace identity in [W3C TraceContext] format under the
/// `traceparent` and `tracestate` headers.
///
/// Extraction composes the two headers independently: `traceparent`
/// determines trace/span id and flags, while `tracestate` entries are
/// validated individually and attached to the resulting
/// [`SpanContext`]. A missing, empty, or wholly invalid `tracestate` never
/// affects the `traceparent`-derived identity.
///
/// Injection emits `traceparent` for any valid [`SpanContext`] regardless of
/// its sampling decision, emits `tracestate` only when non-empty, and emits
/// nothing at all for an invalid [`SpanContext`].
///
/// [W3C TraceContext]: https://www.w3.org/TR/trace-context/
#[derive(Clone, Debug, Default)]
pub struct TraceContextPropagator {
    _private: (),
}

impl TraceContextPropagator {
    /// Create a new `TraceContextPropagator`.
    pub fn new() -> Self {
        TraceContextPropagator { _private: () }
    }

    /// Extract a span context from the w3c trace-context headers.
    fn extract_span_context(&self, extractor: &dyn Extractor) -> Result<SpanContext, ()> {
        let header_value = extractor.get(TRACEPARENT_HEADER).ok_or(())?;
        let header_value = header_value.trim();
        let parts = header_value.split('-').collect::<Vec<&str>>();
        // Ensure parts are not out of range.
        if parts.len() < 4 {
            return Err(());
        }

        // Version must be exactly two lowercase hex chars and not `ff`.
        if parts[0].len() != VERSION_LEN || !hex::is_valid_hex(parts[0]) {
            return Err(());
        }
        let version = u8::from_str_radix(parts[0], 16).map_err(|_| ())?;
        if version == INVALID_VERSION {
            return Err(());
        }
        // For version 0 exactly four segments are required; versions above 0
        // may carry additional trailing segments, which are ignored.
        if version == SUPPORTED_VERSION && parts.len() != 4 {
            return Err(());
        }

        // Trace and span id must be exactly the fixed hex width; the id types
        // reject short, long, and uppercase input.
        let trace_id = TraceId::from_hex(parts[1]).map_err(|_| ())?;
        let span_id = SpanId::from_hex(parts[2]).map_err(|_| ())?;

        // Flags must be exactly two lowercase hex chars. Bits other than
        // `sampled` are not defined by this layer and are masked off.
        if parts[3].len() != FLAGS_LEN || !hex::is_valid_hex(parts[3]) {
            return Err(());
        }
        let opts = u8::from_str_radix(parts[3], 16).map_err(|_| ())?;
        let trace_flags = TraceFlags::new(opts) & TraceFlags::SAMPLED;

        // `tracestate` is composed independently; invalid entries are dropped
        // one by one without invalidating the trace/span ids.
        let trace_state = extractor
            .get(TRACESTATE_HEADER)
            .map(|header| TraceState::from_header(&header))
            .unwrap_or_default();

        let span_context = SpanContext::new(trace_id, span_id, trace_flags, true, trace_state);

        // An all-zero trace or span id is lexically valid but yields an
        // overall-invalid span context.
        if !span_context.is_valid() {
            return Err(());
        }

        Ok(span_context)
    }
}

impl TextMapPropagator for TraceContextPropagator {
    /// Properly encodes the values of the `SpanContext` carried by the
    /// [`Context`] and injects them into the `Injector`.
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        if let Some(span_context) = cx.span_context() {
            if span_context.is_valid() {
                let header_value = format!(
                    "{:02x}-{}-{}-{:02x}",
                    SUPPORTED_VERSION,
                    span_context.trace_id(),
                    span_context.span_id(),
                    span_context.trace_flags() & TraceFlags::SAMPLED
                );
                injector.set(TRACEPARENT_HEADER, header_value);

                let trace_state = span_context.trace_state();
                if !trace_state.is_empty() {
                    injector.set(TRACESTATE_HEADER, trace_state.header());
                }
            }
        }
    }

    /// Retrieves encoded `SpanContext`s using the `Extractor`. It decodes the
    /// `SpanContext` and returns it. If no `SpanContext` was retrieved OR if
    /// the retrieved data is invalid, then the given [`Context`] is returned
    /// unchanged.
    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        self.extract_span_context(extractor)
            .map(|sc| cx.with_remote_span_context(sc))
            .unwrap_or_else(|_| cx.clone())
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(trace_context_header_fields())
    }
}
