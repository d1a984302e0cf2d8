//! # Propagator interface
//!
//! Cross-cutting concerns send their state to the next process using
//! propagators, which are defined as objects used to read and write context
//! data to and from messages exchanged by the applications.
//!
//! Propagators leverage the [`Context`] to inject and extract data for each
//! cross-cutting concern, such as trace identity.
//!
//! The propagation module is expected to be leveraged by users writing
//! instrumentation libraries.
//!
//! Propagators use [`Injector`] and [`Extractor`] to read and write context
//! data to and from messages. Each specific propagator type defines its
//! expected carrier type, such as a string map.
//!
//! [`Context`]: crate::Context
use std::borrow::Cow;
use std::collections::HashMap;
use std::env;

pub mod composite;
pub mod text_map_propagator;

pub use composite::{
    MultiTextMapPropagator, MultiTextMapPropagatorBuilder, SharedTextMapPropagator,
    TextMapCompositePropagator,
};
pub use text_map_propagator::{FieldIter, NoopTextMapPropagator, TextMapPropagator};

/// Injector provides an interface for adding fields from an underlying struct
/// like `HashMap`
pub trait Injector {
    /// Add a key and value to the underlying data.
    fn set(&mut self, key: &str, value: String);

    #[allow(unused_variables)]
    /// Hint to reserve capacity for at least `additional` more entries to be
    /// inserted.
    fn reserve(&mut self, additional: usize) {}
}

/// Extractor provides an interface for removing fields from an underlying
/// struct like `HashMap`
pub trait Extractor {
    /// Get a value from a key from the underlying data.
    fn get(&self, key: &str) -> Option<Cow<'_, str>>;

    /// Collect all the keys from the underlying data.
    fn keys(&self) -> Vec<Cow<'_, str>>;

    /// Get all values from a key from the underlying data.
    fn get_all(&self, key: &str) -> Option<Vec<Cow<'_, str>>> {
        self.get(key).map(|value| vec![value])
    }
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    /// Set a key and value in the HashMap.
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }

    /// Reserves capacity for at least `additional` more entries to be
    /// inserted.
    fn reserve(&mut self, additional: usize) {
        self.reserve(additional);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    /// Get a value for a key from the HashMap.
    fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        self.get(&key.to_lowercase())
            .map(|v| Cow::Borrowed(v.as_str()))
    }

    /// Collect all the keys from the HashMap.
    fn keys(&self) -> Vec<Cow<'_, str>> {
        self.keys()
            .map(|k| Cow::Borrowed(k.as_str()))
            .collect::<Vec<_>>()
    }
}

/// Injector for `std::process::Command` that sets environment variables for
/// child processes.
///
/// Keys are converted to uppercase.
impl Injector for std::process::Command {
    fn set(&mut self, key: &str, value: String) {
        self.env(key.to_uppercase(), value);
    }
}

/// Extractor for environment variables.
///
/// Keys are case-insensitive and automatically converted to uppercase.
#[derive(Debug, Default)]
pub struct EnvExtractor {
    _private: (),
}

impl EnvExtractor {
    /// Create a new extractor that reads from environment variables.
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Extractor for EnvExtractor {
    fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        env::var(key.to_uppercase()).ok().map(Cow::Owned)
    }

    fn keys(&self) -> Vec<Cow<'_, str>> {
        env::vars()
            .map(|(k, _)| Cow::Owned(k.to_lowercase()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_map_get() {
        let mut carrier = HashMap::new();
        carrier.set("headerName", "value".to_string());

        assert_eq!(
            Extractor::get(&carrier, "HEADERNAME"),
            Some(Cow::Borrowed("value")),
            "case insensitive extraction"
        );
    }

    #[test]
    fn hash_map_get_all() {
        let mut carrier = HashMap::new();
        carrier.set("headerName", "value".to_string());

        assert_eq!(
            Extractor::get_all(&carrier, "HEADERNAME"),
            Some(vec![Cow::Borrowed("value")]),
            "case insensitive get_all extraction"
        );
    }

    #[test]
    fn hash_map_get_all_missing_key() {
        let mut carrier = HashMap::new();
        carrier.set("headerName", "value".to_string());

        assert_eq!(
            Extractor::get_all(&carrier, "missing_key"),
            None,
            "case insensitive get_all extraction"
        );
    }

    #[test]
    fn hash_map_keys() {
        let mut carrier = HashMap::new();
        carrier.set("headerName1", "value1".to_string());
        carrier.set("headerName2", "value2".to_string());

        let got = Extractor::keys(&carrier);
        assert_eq!(got.len(), 2);
        assert!(got.contains(&Cow::Borrowed("headername1")));
        assert!(got.contains(&Cow::Borrowed("headername2")));
    }

    #[test]
    fn injector_reserve() {
        let mut carrier: HashMap<String, String> = HashMap::new();
        Injector::reserve(&mut carrier, 5);
        let initial_capacity = carrier.capacity();
        assert!(initial_capacity >= 5);

        for i in 0..3 {
            Injector::set(&mut carrier, &format!("key{}", i), format!("value{}", i));
        }
        assert!(carrier.capacity() >= initial_capacity);

        // Default impl is a no-op that must not interfere with set.
        struct TestInjector;
        impl Injector for TestInjector {
            fn set(&mut self, _key: &str, _value: String) {}
        }
        let mut test_injector = TestInjector;
        Injector::reserve(&mut test_injector, 4711);
        Injector::set(&mut test_injector, "key", "value".to_string());
    }

    #[test]
    fn env_extractor_get() {
        const TRACEPARENT_VALUE: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

        temp_env::with_var("TRACEPARENT", Some(TRACEPARENT_VALUE), || {
            let extractor = EnvExtractor::new();

            assert_eq!(
                extractor.get("traceparent"),
                Some(Cow::Owned(TRACEPARENT_VALUE.to_string())),
            );
            assert_eq!(
                extractor.get("TRACEPARENT"),
                Some(Cow::Owned(TRACEPARENT_VALUE.to_string())),
            );
        });
    }

    #[test]
    fn env_extractor_get_missing() {
        temp_env::with_var_unset("TRACEPARENT", || {
            let extractor = EnvExtractor::new();

            assert_eq!(extractor.get("TRACEPARENT"), None);
        });
    }

    #[test]
    fn env_extractor_keys() {
        const TRACEPARENT_VALUE: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";
        const TRACESTATE_VALUE: &str = "vendor1=value1,vendor2=value2";

        temp_env::with_vars(
            [
                ("TRACEPARENT", Some(TRACEPARENT_VALUE)),
                ("TRACESTATE", Some(TRACESTATE_VALUE)),
            ],
            || {
                let extractor = EnvExtractor::new();
                let keys = extractor.keys();

                assert!(keys.contains(&Cow::Owned("traceparent".to_string())));
                assert!(keys.contains(&Cow::Owned("tracestate".to_string())));
            },
        );
    }

    #[test]
    fn command_injector() {
        use std::process::Command;

        const TRACEPARENT_VALUE: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo $TRACEPARENT");
        Injector::set(&mut cmd, "traceparent", TRACEPARENT_VALUE.to_string());

        let output = cmd.output().expect("failed to execute command");
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert_eq!(stdout.trim(), TRACEPARENT_VALUE);
    }
}
