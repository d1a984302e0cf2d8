//! # Text propagator
//!
//! [`TextMapPropagator`] is a formalized propagator that injects values into
//! and extracts values from carriers as string key/value pairs.
use crate::propagation::{Extractor, Injector};
use crate::Context;
use std::fmt::Debug;
use std::slice;

/// Methods to inject and extract a value as text into injectors and extractors
/// that travel in-band across process boundaries.
///
/// Implementations degrade gracefully on bad input: `extract` never fails, it
/// returns the incoming context unchanged when the carrier holds nothing
/// usable, and `inject` simply writes nothing when the context carries nothing
/// to propagate.
pub trait TextMapPropagator: Debug {
    /// Properly encodes the values of the current [`Context`] and injects them
    /// into the [`Injector`].
    ///
    /// [`Context`]: crate::Context
    fn inject(&self, injector: &mut dyn Injector) {
        Context::map_current(|cx| self.inject_context(cx, injector))
    }

    /// Properly encodes the values of the [`Context`] and injects them into
    /// the [`Injector`].
    ///
    /// [`Context`]: crate::Context
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector);

    /// Retrieves encoded data using the provided [`Extractor`]. If no data for
    /// this format was retrieved OR if the retrieved data is invalid, then the
    /// current [`Context`] is returned.
    ///
    /// [`Context`]: crate::Context
    fn extract(&self, extractor: &dyn Extractor) -> Context {
        Context::map_current(|cx| self.extract_with_context(cx, extractor))
    }

    /// Retrieves encoded data using the provided [`Extractor`]. If no data for
    /// this format was retrieved OR if the retrieved data is invalid, then the
    /// given [`Context`] is returned.
    ///
    /// [`Context`]: crate::Context
    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context;

    /// Returns iter of fields used by [`TextMapPropagator`]
    fn fields(&self) -> FieldIter<'_>;
}

impl<P: TextMapPropagator + ?Sized> TextMapPropagator for std::sync::Arc<P> {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        (**self).inject_context(cx, injector)
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        (**self).extract_with_context(cx, extractor)
    }

    fn fields(&self) -> FieldIter<'_> {
        (**self).fields()
    }
}

/// An iterator over fields of a [`TextMapPropagator`]
#[derive(Debug)]
pub struct FieldIter<'a>(slice::Iter<'a, String>);

impl<'a> FieldIter<'a> {
    /// Create a new `FieldIter` from a slice of propagator fields
    pub fn new(fields: &'a [String]) -> Self {
        FieldIter(fields.iter())
    }
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|field| field.as_str())
    }
}

/// A propagator that performs no injection and no extraction.
///
/// Useful as the default where a propagator is required but none has been
/// configured, and as the zero-delegate result of the combinator builders.
#[derive(Debug, Default)]
pub struct NoopTextMapPropagator {
    _private: (),
}

impl NoopTextMapPropagator {
    /// Create a new `NoopTextMapPropagator`.
    pub fn new() -> Self {
        NoopTextMapPropagator { _private: () }
    }
}

impl TextMapPropagator for NoopTextMapPropagator {
    /// Ignores calls to inject.
    fn inject_context(&self, _cx: &Context, _injector: &mut dyn Injector) {
        // Ignored
    }

    /// Returns the incoming context unchanged.
    fn extract_with_context(&self, cx: &Context, _extractor: &dyn Extractor) -> Context {
        cx.clone()
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContextKey;
    use std::collections::HashMap;

    #[test]
    fn noop_injects_nothing() {
        let propagator = NoopTextMapPropagator::new();
        let mut injector = HashMap::new();
        propagator.inject_context(&Context::new(), &mut injector);
        propagator.inject(&mut injector);

        assert!(injector.is_empty());
    }

    #[test]
    fn noop_extract_returns_input_context() {
        let key = ContextKey::new("value");
        let propagator = NoopTextMapPropagator::new();

        let mut extractor = HashMap::new();
        extractor.insert("traceparent".to_string(), "not-relevant".to_string());

        let cx = Context::new().with_value(&key, 42u64);
        let extracted = propagator.extract_with_context(&cx, &extractor);
        assert_eq!(extracted.get(&key), Some(&42));
    }

    #[test]
    fn noop_has_no_fields() {
        let propagator = NoopTextMapPropagator::new();
        assert_eq!(propagator.fields().count(), 0);
    }
}
