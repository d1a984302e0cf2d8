use crate::{SpanId, TraceFlags, TraceId};
use std::collections::VecDeque;
use thiserror::Error;

/// TraceState carries vendor-specific configuration data, represented as a
/// list of key-value pairs. TraceState allows multiple tracing systems to
/// participate in the same trace.
///
/// The list is bounded at [`TraceState::MAX_ENTRIES`] entries and keeps
/// most-recently-written entries at the logical head.
///
/// Please review the [W3C specification] for details on this field.
///
/// [W3C specification]: https://www.w3.org/TR/trace-context/#tracestate-header
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct TraceState(Option<VecDeque<(String, String)>>);

impl TraceState {
    /// The default `TraceState`, as a constant
    pub const NONE: TraceState = TraceState(None);

    /// Maximum number of entries a `TraceState` retains.
    pub const MAX_ENTRIES: usize = 32;

    /// Validates that the given `TraceState` list-member key is valid per the
    /// [W3 Spec].
    ///
    /// A key may start with a digit only in its multi-tenant (`tenant@vendor`)
    /// form; the vendor part must start with a lowercase letter and is at most
    /// 14 characters.
    ///
    /// [W3 Spec]: https://www.w3.org/TR/trace-context/#key
    fn valid_key(key: &str) -> bool {
        if key.is_empty() || key.len() > 256 {
            return false;
        }

        let allowed = |b: u8| {
            b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'_' | b'-' | b'*' | b'/')
        };
        let bytes = key.as_bytes();
        match bytes.iter().position(|&b| b == b'@') {
            None => bytes[0].is_ascii_lowercase() && bytes[1..].iter().all(|&b| allowed(b)),
            Some(at) => {
                let (tenant, vendor) = (&bytes[..at], &bytes[at + 1..]);
                if tenant.is_empty() || tenant.len() > 241 || vendor.is_empty() || vendor.len() > 14
                {
                    return false;
                }
                // A second `@` in the vendor part fails the charset check.
                (tenant[0].is_ascii_lowercase() || tenant[0].is_ascii_digit())
                    && tenant[1..].iter().all(|&b| allowed(b))
                    && vendor[0].is_ascii_lowercase()
                    && vendor[1..].iter().all(|&b| allowed(b))
            }
        }
    }

    /// Validates that the given `TraceState` list-member value is valid per
    /// the [W3 Spec]: 1-256 printable ASCII characters excluding `,` and `=`,
    /// not ending in a space.
    ///
    /// [W3 Spec]: https://www.w3.org/TR/trace-context/#value
    fn valid_value(value: &str) -> bool {
        if value.is_empty() || value.len() > 256 {
            return false;
        }

        value
            .bytes()
            .all(|b| (0x20..=0x7e).contains(&b) && b != b',' && b != b'=')
            && !value.ends_with(' ')
    }

    /// Returns a builder for programmatic construction.
    ///
    /// Builder mutation silently ignores grammar-violating input, so untrusted
    /// multi-tenant data can be folded in without error handling on the hot
    /// path.
    pub fn builder() -> TraceStateBuilder {
        TraceStateBuilder::default()
    }

    /// Creates a new `TraceState` from the given key-value collection.
    ///
    /// Unlike the builder, this is the strict entry point: the first invalid
    /// key or value fails the whole construction with a descriptive error.
    ///
    /// # Examples
    ///
    /// ```
    /// use tracewire::trace::TraceState;
    ///
    /// let kvs = vec![("foo", "bar"), ("apple", "banana")];
    /// let trace_state = TraceState::from_key_value(kvs);
    ///
    /// assert!(trace_state.is_ok());
    /// assert_eq!(trace_state.unwrap().header(), String::from("foo=bar,apple=banana"))
    /// ```
    pub fn from_key_value<T, K, V>(trace_state: T) -> Result<Self, TraceStateError>
    where
        T: IntoIterator<Item = (K, V)>,
        K: ToString,
        V: ToString,
    {
        let ordered_data = trace_state
            .into_iter()
            .map(|(key, value)| {
                let (key, value) = (key.to_string(), value.to_string());
                if !TraceState::valid_key(key.as_str()) {
                    return Err(TraceStateError::Key(key));
                }
                if !TraceState::valid_value(value.as_str()) {
                    return Err(TraceStateError::Value(value));
                }

                Ok((key, value))
            })
            .collect::<Result<VecDeque<_>, TraceStateError>>()?;

        if ordered_data.len() > TraceState::MAX_ENTRIES {
            return Err(TraceStateError::Capacity);
        }

        if ordered_data.is_empty() {
            Ok(TraceState(None))
        } else {
            Ok(TraceState(Some(ordered_data)))
        }
    }

    /// Parses a `tracestate` header value.
    ///
    /// This is the lenient wire-side entry point and never fails: list members
    /// are trimmed of surrounding whitespace, members without a `=`, with an
    /// invalid key, or with an invalid value are dropped individually, the
    /// first occurrence of a duplicate key wins, and at most
    /// [`TraceState::MAX_ENTRIES`] entries are retained.
    ///
    /// Valid members are folded through [`TraceStateBuilder::set`], so the
    /// resulting order is most-recently-parsed first.
    ///
    /// # Examples
    ///
    /// ```
    /// use tracewire::trace::TraceState;
    ///
    /// let trace_state = TraceState::from_header("foo=bar,bar=baz");
    /// assert_eq!(trace_state.header(), "bar=baz,foo=bar");
    ///
    /// // One bad member never invalidates the rest.
    /// let trace_state = TraceState::from_header("foo=bar,=broken");
    /// assert_eq!(trace_state.header(), "foo=bar");
    /// ```
    pub fn from_header(header: &str) -> TraceState {
        let mut builder = TraceState::builder();
        for member in header.split(',') {
            let member = member.trim();
            if member.is_empty() {
                continue;
            }
            let Some((key, value)) = member.split_once('=') else {
                continue;
            };
            // First occurrence wins; a later duplicate must not reorder or
            // overwrite the entry already retained.
            if builder.contains(key) {
                continue;
            }
            builder = builder.set(key, value);
        }
        builder.build()
    }

    /// Retrieves a value for a given key from the `TraceState` if it exists.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.as_ref().and_then(|kvs| {
            kvs.iter().find_map(|item| {
                if item.0.as_str() == key {
                    Some(item.1.as_str())
                } else {
                    None
                }
            })
        })
    }

    /// Returns `true` if the `TraceState` contains no entries.
    pub fn is_empty(&self) -> bool {
        self.0.as_ref().map_or(true, |kvs| kvs.is_empty())
    }

    /// Returns the number of entries in the `TraceState`.
    pub fn len(&self) -> usize {
        self.0.as_ref().map_or(0, |kvs| kvs.len())
    }

    /// Inserts the given key-value pair into the `TraceState`. If a value
    /// already exists for the given key, this updates the value and moves the
    /// entry to the logical head. If the key or value are invalid per the
    /// [W3 Spec], or the insert of a new key would exceed
    /// [`TraceState::MAX_ENTRIES`], an `Err` is returned; else a new
    /// `TraceState` with the updated key/value is returned.
    ///
    /// [W3 Spec]: https://www.w3.org/TR/trace-context/#mutating-the-tracestate-field
    pub fn insert<K, V>(&self, key: K, value: V) -> Result<TraceState, TraceStateError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let (key, value) = (key.into(), value.into());
        if !TraceState::valid_key(key.as_str()) {
            return Err(TraceStateError::Key(key));
        }
        if !TraceState::valid_value(value.as_str()) {
            return Err(TraceStateError::Value(value));
        }
        if self.get(&key).is_none() && self.len() >= TraceState::MAX_ENTRIES {
            return Err(TraceStateError::Capacity);
        }

        let mut trace_state = self.delete_from_deque(&key);
        let kvs = trace_state.0.get_or_insert(VecDeque::with_capacity(1));

        kvs.push_front((key, value));

        Ok(trace_state)
    }

    /// Removes the given key-value pair from the `TraceState`. If the key is
    /// invalid per the [W3 Spec] an `Err` is returned. Else, a new
    /// `TraceState` with the removed entry is returned.
    ///
    /// If the key is not in `TraceState`, the original `TraceState` will be
    /// cloned and returned.
    ///
    /// [W3 Spec]: https://www.w3.org/TR/trace-context/#mutating-the-tracestate-field
    pub fn delete<K: Into<String>>(&self, key: K) -> Result<TraceState, TraceStateError> {
        let key = key.into();
        if !TraceState::valid_key(key.as_str()) {
            return Err(TraceStateError::Key(key));
        }

        Ok(self.delete_from_deque(&key))
    }

    /// Delete key from trace state's deque. The key MUST be valid
    fn delete_from_deque(&self, key: &str) -> TraceState {
        let mut owned = self.clone();
        if let Some(kvs) = owned.0.as_mut() {
            if let Some(index) = kvs.iter().position(|x| x.0 == key) {
                kvs.remove(index);
            }
        }
        owned
    }

    /// Creates a new `TraceState` header string, delimiting each key and value
    /// with a `=` and each entry with a `,`.
    pub fn header(&self) -> String {
        self.header_delimited("=", ",")
    }

    /// Creates a new `TraceState` header string, with the given key/value
    /// delimiter and entry delimiter.
    pub fn header_delimited(&self, entry_delimiter: &str, list_delimiter: &str) -> String {
        self.0
            .as_ref()
            .map(|kvs| {
                kvs.iter()
                    .map(|(key, value)| format!("{}{}{}", key, entry_delimiter, value))
                    .collect::<Vec<String>>()
                    .join(list_delimiter)
            })
            .unwrap_or_default()
    }
}

/// Builder for [`TraceState`], tolerant of untrusted input.
///
/// Mutations that violate the key/value grammar are silently ignored rather
/// than raised: the builder is routinely fed noisy multi-tenant data and a bad
/// entry must not take down the request it rides along with. The strict
/// counterparts are [`TraceState::from_key_value`] and [`TraceState::insert`].
#[derive(Clone, Debug, Default)]
pub struct TraceStateBuilder {
    entries: VecDeque<(String, String)>,
}

impl TraceStateBuilder {
    /// Sets `key` to `value`.
    ///
    /// An existing key is updated and moved to the logical head; a new key is
    /// prepended. The call is a no-op when the key or value is invalid, or
    /// when a new key would grow the state beyond
    /// [`TraceState::MAX_ENTRIES`] (existing entries are never evicted).
    pub fn set<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let (key, value) = (key.into(), value.into());
        if !TraceState::valid_key(key.as_str()) || !TraceState::valid_value(value.as_str()) {
            return self;
        }

        if let Some(index) = self.entries.iter().position(|(k, _)| *k == key) {
            self.entries.remove(index);
            self.entries.push_front((key, value));
        } else if self.entries.len() < TraceState::MAX_ENTRIES {
            self.entries.push_front((key, value));
        }
        self
    }

    /// Removes `key` if present. Absent or invalid keys are a no-op.
    pub fn remove(mut self, key: &str) -> Self {
        if let Some(index) = self.entries.iter().position(|(k, _)| k == key) {
            self.entries.remove(index);
        }
        self
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Consumes the builder, producing an immutable [`TraceState`].
    pub fn build(self) -> TraceState {
        if self.entries.is_empty() {
            TraceState(None)
        } else {
            TraceState(Some(self.entries))
        }
    }
}

/// Error returned by strict `TraceState` operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TraceStateError {
    /// The key is invalid.
    ///
    /// See <https://www.w3.org/TR/trace-context/#key> for requirement for
    /// keys.
    #[error("{0} is not a valid key in TraceState, see https://www.w3.org/TR/trace-context/#key for more details")]
    Key(String),

    /// The value is invalid.
    ///
    /// See <https://www.w3.org/TR/trace-context/#value> for requirement for
    /// values.
    #[error("{0} is not a valid value in TraceState, see https://www.w3.org/TR/trace-context/#value for more details")]
    Value(String),

    /// The operation would grow the state beyond [`TraceState::MAX_ENTRIES`].
    #[error("TraceState is bounded at 32 entries, see https://www.w3.org/TR/trace-context/#tracestate-header-field-values for more details")]
    Capacity,
}

/// Immutable trace identity which can be serialized and propagated.
///
/// This representation conforms to the [W3C TraceContext specification].
///
/// Contexts that do not have the `sampled` flag set in their [`TraceFlags`]
/// will be ignored by most tracing tools.
///
/// [W3C TraceContext specification]: https://www.w3.org/TR/trace-context
#[derive(Clone, Debug, PartialEq, Hash, Eq)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: SpanId,
    trace_flags: TraceFlags,
    is_remote: bool,
    trace_state: TraceState,
}

impl SpanContext {
    /// An invalid span context
    pub const NONE: SpanContext = SpanContext {
        trace_id: TraceId::INVALID,
        span_id: SpanId::INVALID,
        trace_flags: TraceFlags::NOT_SAMPLED,
        is_remote: false,
        trace_state: TraceState::NONE,
    };

    /// Create an invalid empty span context
    pub fn empty_context() -> Self {
        SpanContext::NONE
    }

    /// Construct a new `SpanContext`
    pub fn new(
        trace_id: TraceId,
        span_id: SpanId,
        trace_flags: TraceFlags,
        is_remote: bool,
        trace_state: TraceState,
    ) -> Self {
        SpanContext {
            trace_id,
            span_id,
            trace_flags,
            is_remote,
            trace_state,
        }
    }

    /// The [`TraceId`] for this span context.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// The [`SpanId`] for this span context.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// Returns details about the trace.
    ///
    /// Unlike `TraceState` values, these are present in all traces. The
    /// current version of the specification only supports a single flag
    /// [`TraceFlags::SAMPLED`].
    pub fn trace_flags(&self) -> TraceFlags {
        self.trace_flags
    }

    /// Returns `true` if the span context has a valid (non-zero) `trace_id`
    /// and a valid (non-zero) `span_id`.
    pub fn is_valid(&self) -> bool {
        self.trace_id != TraceId::INVALID && self.span_id != SpanId::INVALID
    }

    /// Returns `true` if the span context was propagated from a remote parent.
    pub fn is_remote(&self) -> bool {
        self.is_remote
    }

    /// Returns `true` if the `sampled` trace flag is set.
    ///
    /// Spans that are not sampled will be ignored by most tracing tools.
    pub fn is_sampled(&self) -> bool {
        self.trace_flags.is_sampled()
    }

    /// A reference to the span context's [`TraceState`].
    pub fn trace_state(&self) -> &TraceState {
        &self.trace_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rustfmt::skip]
    fn trace_state_test_data() -> Vec<(TraceState, &'static str, &'static str)> {
        vec![
            (TraceState::from_key_value(vec![("foo", "bar")]).unwrap(), "foo=bar", "foo"),
            (TraceState::from_key_value(vec![("foo", "bar"), ("apple", "banana")]).unwrap(), "foo=bar,apple=banana", "apple"),
        ]
    }

    #[test]
    fn test_trace_state() {
        for test_case in trace_state_test_data() {
            assert_eq!(test_case.0.clone().header(), test_case.1);

            let new_value = format!("{}-{}", test_case.0.get(test_case.2).unwrap(), "test");

            let updated_trace_state = test_case.0.insert(test_case.2, new_value.clone());
            assert!(updated_trace_state.is_ok());
            let updated_trace_state = updated_trace_state.unwrap();

            let updated = format!("{}={}", test_case.2, new_value);

            let index = updated_trace_state.clone().header().find(&updated);

            assert!(index.is_some());
            assert_eq!(index.unwrap(), 0);

            let deleted_trace_state = updated_trace_state.delete(test_case.2.to_string());
            assert!(deleted_trace_state.is_ok());

            let deleted_trace_state = deleted_trace_state.unwrap();

            assert!(deleted_trace_state.get(test_case.2).is_none());
        }
    }

    #[test]
    fn test_trace_state_key() {
        let test_data: Vec<(&'static str, bool)> = vec![
            ("bar", true),
            ("foo@bar", true),
            ("t61rcwb076gbao@vendor", true),
            ("0mytenant@vendor", true),
            // digit start is only allowed in tenant-id form
            ("123", false),
            ("1foo", false),
            // vendor part must start with a lowercase letter and fit 14 chars
            ("foo@0123456789", false),
            ("foo@0123456789abcdef", false),
            ("foo@vendorpartxx", false),
            ("foo@bar@baz", false),
            ("foo@", false),
            ("@bar", false),
            ("FOO@BAR", false),
            ("$_key", false),
            ("", false),
            ("你好", false),
        ];

        for (key, expected) in test_data {
            assert_eq!(TraceState::valid_key(key), expected, "test key: {:?}", key);
        }

        assert!(TraceState::valid_key(&"a".repeat(256)));
        assert!(!TraceState::valid_key(&"a".repeat(257)));
    }

    #[test]
    fn test_trace_state_value() {
        let test_data: Vec<(&'static str, bool)> = vec![
            ("bar", true),
            ("bar;test", true),
            ("spaces inside", true),
            // `,` and `=` are list/member delimiters
            ("first,second", false),
            ("first=second", false),
            // must not end in a space
            ("bar ", false),
            ("", false),
            ("tab\tchar", false),
            ("caf\u{e9}", false),
        ];

        for (value, expected) in test_data {
            assert_eq!(
                TraceState::valid_value(value),
                expected,
                "test value: {:?}",
                value
            );
        }

        assert!(TraceState::valid_value(&"v".repeat(256)));
        assert!(!TraceState::valid_value(&"v".repeat(257)));
    }

    #[test]
    fn test_trace_state_insert() {
        let trace_state = TraceState::from_key_value(vec![("foo", "bar")]).unwrap();
        let inserted_trace_state = trace_state.insert("testkey", "testvalue").unwrap();
        assert!(trace_state.get("testkey").is_none()); // The original state doesn't change
        assert_eq!(inserted_trace_state.get("testkey").unwrap(), "testvalue");
    }

    #[test]
    fn test_trace_state_insert_capacity() {
        let full =
            TraceState::from_key_value((0..32).map(|i| (format!("key{i}"), "v"))).unwrap();
        assert_eq!(full.len(), 32);

        // A new key is refused...
        assert!(matches!(
            full.insert("onemore", "v"),
            Err(TraceStateError::Capacity)
        ));
        // ...but updating an existing one still works.
        let updated = full.insert("key7", "updated").unwrap();
        assert_eq!(updated.len(), 32);
        assert_eq!(updated.get("key7"), Some("updated"));
    }

    #[test]
    fn builder_orders_most_recent_first() {
        let trace_state = TraceState::builder()
            .set("foo", "bar")
            .set("apple", "banana")
            .build();
        assert_eq!(trace_state.header(), "apple=banana,foo=bar");

        // Updating an existing key moves it to the head.
        let trace_state = TraceState::builder()
            .set("foo", "bar")
            .set("apple", "banana")
            .set("foo", "baz")
            .build();
        assert_eq!(trace_state.header(), "foo=baz,apple=banana");
    }

    #[test]
    fn builder_silently_rejects_bad_entries() {
        let trace_state = TraceState::builder()
            .set("valid", "entry")
            .set("$_key", "value")
            .set("key", "first,second")
            .set("key", "trailing space ")
            .build();
        assert_eq!(trace_state.header(), "valid=entry");
    }

    #[test]
    fn builder_remove() {
        let trace_state = TraceState::builder()
            .set("foo", "bar")
            .set("apple", "banana")
            .remove("foo")
            .remove("never-set")
            .build();
        assert_eq!(trace_state.header(), "apple=banana");
    }

    #[test]
    fn trace_state_cap_drops_new_entries() {
        let mut builder = TraceState::builder();
        for i in 0..40 {
            builder = builder.set(format!("key{i}"), "v");
        }
        let trace_state = builder.clone().build();

        assert_eq!(trace_state.len(), 32);
        // The first 32 sets are retained; the rest were dropped without
        // disturbing existing entries.
        assert_eq!(trace_state.get("key0"), Some("v"));
        assert_eq!(trace_state.get("key31"), Some("v"));
        assert_eq!(trace_state.get("key32"), None);
        assert_eq!(trace_state.get("key39"), None);

        // Updates to retained keys still succeed at capacity and move to the
        // head.
        let updated = builder.set("key5", "updated").build();
        assert_eq!(updated.len(), 32);
        assert_eq!(updated.get("key5"), Some("updated"));
        assert!(updated.header().starts_with("key5=updated,"));
    }

    #[test]
    fn from_header_reverses_wire_order() {
        let trace_state = TraceState::from_header("foo=bar,bar=baz");
        assert_eq!(trace_state.header(), "bar=baz,foo=bar");
    }

    #[test]
    fn from_header_trims_member_whitespace() {
        let trace_state = TraceState::from_header(" foo=bar ,\tbar=baz ");
        assert_eq!(trace_state.header(), "bar=baz,foo=bar");
    }

    #[test]
    fn from_header_keeps_first_duplicate() {
        let trace_state = TraceState::from_header("a=1,b=2,a=3");
        assert_eq!(trace_state.get("a"), Some("1"));
        assert_eq!(trace_state.header(), "b=2,a=1");
    }

    #[test]
    fn from_header_drops_invalid_members_individually() {
        let trace_state = TraceState::from_header("key=value,malformed");
        assert_eq!(trace_state.header(), "key=value");

        let trace_state = TraceState::from_header("=value1,key2=value2,=value3");
        assert_eq!(trace_state.header(), "key2=value2");

        let trace_state = TraceState::from_header("key1=value1,,key2=value2");
        assert_eq!(trace_state.header(), "key2=value2,key1=value1");

        // values may not be empty
        let trace_state = TraceState::from_header("key1=,key2=value2");
        assert_eq!(trace_state.header(), "key2=value2");
    }

    #[test]
    fn from_header_with_no_valid_members_is_empty() {
        // The whole header is one member whose value contains `=`.
        let trace_state = TraceState::from_header("foo=bar;test=test");
        assert!(trace_state.is_empty());
        assert_eq!(trace_state.header(), "");

        assert!(TraceState::from_header("").is_empty());
        assert!(TraceState::from_header("   ").is_empty());
    }

    #[test]
    fn from_header_caps_retained_entries() {
        let header = (0..40)
            .map(|i| format!("key{i}=v{i}"))
            .collect::<Vec<_>>()
            .join(",");
        let trace_state = TraceState::from_header(&header);
        assert_eq!(trace_state.len(), 32);
        assert_eq!(trace_state.get("key31"), Some("v31"));
        assert_eq!(trace_state.get("key32"), None);
    }

    #[test]
    fn span_context_validity() {
        let valid = SpanContext::new(
            TraceId::from(1u128),
            SpanId::from(1u64),
            TraceFlags::default(),
            false,
            TraceState::default(),
        );
        assert!(valid.is_valid());
        assert!(!valid.is_sampled());

        let zero_trace_id = SpanContext::new(
            TraceId::INVALID,
            SpanId::from(1u64),
            TraceFlags::SAMPLED,
            false,
            TraceState::default(),
        );
        assert!(!zero_trace_id.is_valid());

        let zero_span_id = SpanContext::new(
            TraceId::from(1u128),
            SpanId::INVALID,
            TraceFlags::SAMPLED,
            false,
            TraceState::default(),
        );
        assert!(!zero_span_id.is_valid());

        assert!(!SpanContext::empty_context().is_valid());
        assert!(!SpanContext::NONE.is_remote());
    }
}
