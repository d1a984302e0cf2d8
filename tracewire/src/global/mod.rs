//! Utilities for the process-wide default propagator.
//!
//! Applications configure propagation once during startup; instrumentation
//! libraries then pick the configured propagator up through
//! [`get_text_map_propagator`] without being handed one explicitly.
//!
//! # Examples
//!
//! ```
//! use std::collections::HashMap;
//! use tracewire::global;
//! use tracewire_w3c::TraceContextPropagator;
//!
//! // Configure once, application-wide.
//! global::set_text_map_propagator(TraceContextPropagator::new());
//!
//! // Instrumentation anywhere in the process can now inject and extract.
//! let mut headers: HashMap<String, String> = HashMap::new();
//! global::get_text_map_propagator(|propagator| {
//!     propagator.inject(&mut headers);
//! });
//! ```

mod propagation;

pub use propagation::{get_text_map_propagator, set_text_map_propagator};
