//! # Composite Propagator
//!
//! A utility over multiple `Propagator`s to group multiple propagators from
//! different cross-cutting concerns in order to leverage them as a single
//! entity.
//!
//! Each composite propagator will implement a specific propagator type, such
//! as [`TextMapPropagator`], as different propagator types will likely operate
//! on different data types.
use crate::{
    propagation::{
        text_map_propagator::FieldIter, Extractor, Injector, NoopTextMapPropagator,
        TextMapPropagator,
    },
    Context,
};
use std::sync::{Arc, OnceLock};

/// A propagator shared between the injector and extractor roles of a
/// [`MultiTextMapPropagator`].
pub type SharedTextMapPropagator = Arc<dyn TextMapPropagator + Send + Sync>;

fn noop_text_map_propagator() -> SharedTextMapPropagator {
    static NOOP: OnceLock<Arc<NoopTextMapPropagator>> = OnceLock::new();
    NOOP.get_or_init(|| Arc::new(NoopTextMapPropagator::new()))
        .clone()
}

/// De-duplicated union of the delegates' fields, first occurrence order
/// preserved. Callers rely on the order for precedence between concerns that
/// write the same wire field.
fn union_of_fields<'a>(
    propagators: impl IntoIterator<Item = &'a SharedTextMapPropagator>,
) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for propagator in propagators {
        for field in propagator.fields() {
            if !fields.iter().any(|existing| existing == field) {
                fields.push(field.to_string());
            }
        }
    }
    fields
}

/// Composite propagator for [`TextMapPropagator`]s.
///
/// A propagator that chains multiple [`TextMapPropagator`] propagators
/// together, injecting or extracting by their respective HTTP header names.
///
/// Injection and extraction from this propagator will preserve the order of
/// the injectors and extractors passed in during initialization.
///
/// # Examples
///
/// ```
/// use tracewire::{
///     propagation::{TextMapPropagator, TextMapCompositePropagator},
///     trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState},
///     Context,
/// };
/// use tracewire_w3c::TraceContextPropagator;
/// use std::collections::HashMap;
///
/// // First create 1 or more propagators
/// let trace_context_propagator = TraceContextPropagator::new();
///
/// // Then create a composite propagator
/// let composite_propagator = TextMapCompositePropagator::new(vec![
///     Box::new(trace_context_propagator),
/// ]);
///
/// // Then for a given implementation of `Injector`
/// let mut injector = HashMap::new();
///
/// // And a given trace identity
/// let span_context = SpanContext::new(
///     TraceId::from(1u128),
///     SpanId::from(1u64),
///     TraceFlags::SAMPLED,
///     false,
///     TraceState::default(),
/// );
///
/// // with a context carrying it, call inject to add the headers
/// composite_propagator.inject_context(
///     &Context::new().with_remote_span_context(span_context),
///     &mut injector,
/// );
///
/// // The injector now has the `traceparent` header
/// assert!(injector.get("traceparent").is_some());
/// ```
#[derive(Debug)]
pub struct TextMapCompositePropagator {
    propagators: Vec<Box<dyn TextMapPropagator + Send + Sync>>,
    fields: Vec<String>,
}

impl TextMapCompositePropagator {
    /// Constructs a new propagator out of instances of [`TextMapPropagator`].
    ///
    /// [`TextMapPropagator`]: TextMapPropagator
    pub fn new(propagators: Vec<Box<dyn TextMapPropagator + Send + Sync>>) -> Self {
        let mut fields: Vec<String> = Vec::new();
        for propagator in &propagators {
            for field in propagator.fields() {
                if !fields.iter().any(|existing| existing == field) {
                    fields.push(field.to_string());
                }
            }
        }

        TextMapCompositePropagator {
            propagators,
            fields,
        }
    }
}

impl TextMapPropagator for TextMapCompositePropagator {
    /// Encodes the values of the `Context` and injects them into the
    /// `Injector`.
    fn inject_context(&self, context: &Context, injector: &mut dyn Injector) {
        for propagator in &self.propagators {
            propagator.inject_context(context, injector)
        }
    }

    /// Retrieves encoded `Context` information using the `Extractor`. Each
    /// propagator's output context becomes the next propagator's input. If no
    /// data was retrieved OR if the retrieved data is invalid, then the
    /// current `Context` is returned.
    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        self.propagators
            .iter()
            .fold(cx.clone(), |current_cx, propagator| {
                propagator.extract_with_context(&current_cx, extractor)
            })
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(self.fields.as_slice())
    }
}

/// A combinator with distinct injector and extractor sets and configurable
/// extraction behavior.
///
/// Like [`TextMapCompositePropagator`], but propagators can be registered for
/// injection only, extraction only, or both, and extraction can be configured
/// to short-circuit: stop at the first delegate whose output context differs
/// from its input, skipping the remaining delegates. An optional reverse mode
/// changes the delegate visitation order for extraction only; injection order
/// is always registration order.
///
/// Constructed through [`MultiTextMapPropagator::builder`].
#[derive(Debug)]
pub struct MultiTextMapPropagator {
    injectors: Vec<SharedTextMapPropagator>,
    extractors: Vec<SharedTextMapPropagator>,
    fields: Vec<String>,
    stop_on_first_match: bool,
    reverse_extract_order: bool,
}

impl MultiTextMapPropagator {
    /// Returns a builder to assemble the injector and extractor sets.
    pub fn builder() -> MultiTextMapPropagatorBuilder {
        MultiTextMapPropagatorBuilder::default()
    }
}

impl TextMapPropagator for MultiTextMapPropagator {
    fn inject_context(&self, context: &Context, injector: &mut dyn Injector) {
        for propagator in &self.injectors {
            propagator.inject_context(context, injector)
        }
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        let extractors: Box<dyn Iterator<Item = &SharedTextMapPropagator> + '_> =
            if self.reverse_extract_order {
                Box::new(self.extractors.iter().rev())
            } else {
                Box::new(self.extractors.iter())
            };

        let mut current_cx = cx.clone();
        for propagator in extractors {
            let next_cx = propagator.extract_with_context(&current_cx, extractor);
            let changed = !next_cx.same_instance(&current_cx);
            current_cx = next_cx;
            if self.stop_on_first_match && changed {
                break;
            }
        }
        current_cx
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(self.fields.as_slice())
    }
}

/// Builder for [`MultiTextMapPropagator`].
#[derive(Debug, Default)]
pub struct MultiTextMapPropagatorBuilder {
    injectors: Vec<SharedTextMapPropagator>,
    extractors: Vec<SharedTextMapPropagator>,
    stop_on_first_match: bool,
    reverse_extract_order: bool,
}

impl MultiTextMapPropagatorBuilder {
    /// Registers a propagator for both injection and extraction.
    pub fn with_propagator(
        mut self,
        propagator: impl TextMapPropagator + Send + Sync + 'static,
    ) -> Self {
        let shared: SharedTextMapPropagator = Arc::new(propagator);
        self.injectors.push(shared.clone());
        self.extractors.push(shared);
        self
    }

    /// Registers a propagator for injection only.
    pub fn with_injector(
        mut self,
        propagator: impl TextMapPropagator + Send + Sync + 'static,
    ) -> Self {
        self.injectors.push(Arc::new(propagator));
        self
    }

    /// Registers a propagator for extraction only.
    pub fn with_extractor(
        mut self,
        propagator: impl TextMapPropagator + Send + Sync + 'static,
    ) -> Self {
        self.extractors.push(Arc::new(propagator));
        self
    }

    /// Stops extraction at the first delegate that produced a context
    /// different from its input.
    pub fn with_stop_on_first_match(mut self, enabled: bool) -> Self {
        self.stop_on_first_match = enabled;
        self
    }

    /// Visits the extractor set in reverse registration order during
    /// extraction. Injection order is unaffected.
    pub fn with_reverse_extract_order(mut self, enabled: bool) -> Self {
        self.reverse_extract_order = enabled;
        self
    }

    /// Builds the combined propagator.
    ///
    /// Zero registered delegates produce the shared no-op propagator; a
    /// single delegate registered for both roles is returned unwrapped, with
    /// no combinator overhead.
    pub fn build(self) -> SharedTextMapPropagator {
        if self.injectors.is_empty() && self.extractors.is_empty() {
            return noop_text_map_propagator();
        }

        if self.injectors.len() == 1
            && self.extractors.len() == 1
            && Arc::ptr_eq(&self.injectors[0], &self.extractors[0])
        {
            let mut injectors = self.injectors;
            return injectors.remove(0);
        }

        let fields = union_of_fields(self.injectors.iter().chain(self.extractors.iter()));
        Arc::new(MultiTextMapPropagator {
            injectors: self.injectors,
            extractors: self.extractors,
            fields,
            stop_on_first_match: self.stop_on_first_match,
            reverse_extract_order: self.reverse_extract_order,
        })
    }
}
