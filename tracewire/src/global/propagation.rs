//! Process-wide default propagator.
//!
//! Instrumentation that has no propagator configured explicitly falls back to
//! the global one, which defaults to the no-op propagator until the
//! application installs a real one during startup.

use crate::propagation::{NoopTextMapPropagator, TextMapPropagator};
use std::sync::{OnceLock, RwLock};

/// The current global `TextMapPropagator` propagator.
static GLOBAL_TEXT_MAP_PROPAGATOR: OnceLock<RwLock<Box<dyn TextMapPropagator + Send + Sync>>> =
    OnceLock::new();

/// The global default `TextMapPropagator` propagator.
static DEFAULT_TEXT_MAP_PROPAGATOR: OnceLock<NoopTextMapPropagator> = OnceLock::new();

/// Ensures the `GLOBAL_TEXT_MAP_PROPAGATOR` is initialized with a
/// `NoopTextMapPropagator`.
#[inline]
fn global_text_map_propagator() -> &'static RwLock<Box<dyn TextMapPropagator + Send + Sync>> {
    GLOBAL_TEXT_MAP_PROPAGATOR.get_or_init(|| RwLock::new(Box::new(NoopTextMapPropagator::new())))
}

/// Ensures the `DEFAULT_TEXT_MAP_PROPAGATOR` is initialized.
#[inline]
fn default_text_map_propagator() -> &'static NoopTextMapPropagator {
    DEFAULT_TEXT_MAP_PROPAGATOR.get_or_init(NoopTextMapPropagator::new)
}

/// Sets the given [`TextMapPropagator`] propagator as the current global
/// propagator.
pub fn set_text_map_propagator<P: TextMapPropagator + Send + Sync + 'static>(propagator: P) {
    let _lock = global_text_map_propagator()
        .write()
        .map(|mut global_propagator| *global_propagator = Box::new(propagator));
}

/// Executes a closure with a reference to the current global
/// [`TextMapPropagator`] propagator.
pub fn get_text_map_propagator<T, F>(mut f: F) -> T
where
    F: FnMut(&dyn TextMapPropagator) -> T,
{
    global_text_map_propagator()
        .read()
        .map(|propagator| f(&**propagator))
        .unwrap_or_else(|_| {
            let default_propagator = default_text_map_propagator();
            f(default_propagator as &dyn TextMapPropagator)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::{Extractor, FieldIter, Injector};
    use crate::Context;

    #[derive(Debug)]
    struct TestPropagator {
        fields: Vec<String>,
    }

    impl TextMapPropagator for TestPropagator {
        fn inject_context(&self, _cx: &Context, injector: &mut dyn Injector) {
            injector.set("test-header", "1".to_string());
        }

        fn extract_with_context(&self, cx: &Context, _extractor: &dyn Extractor) -> Context {
            cx.clone()
        }

        fn fields(&self) -> FieldIter<'_> {
            FieldIter::new(self.fields.as_slice())
        }
    }

    #[test]
    fn global_propagator_is_replaceable() {
        // Defaults to the noop propagator.
        get_text_map_propagator(|propagator| {
            assert_eq!(propagator.fields().count(), 0);
        });

        set_text_map_propagator(TestPropagator {
            fields: vec!["test-header".to_string()],
        });
        get_text_map_propagator(|propagator| {
            assert_eq!(propagator.fields().collect::<Vec<_>>(), vec!["test-header"]);

            let mut injector = std::collections::HashMap::new();
            propagator.inject(&mut injector);
            assert_eq!(
                Extractor::get(&injector, "test-header").as_deref(),
                Some("1")
            );
        });
    }
}
