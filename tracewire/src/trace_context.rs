use crate::hex::{self, HexError};
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

/// Flags that can be set on a [`SpanContext`].
///
/// The current version of the W3C TraceContext specification only supports a
/// single flag, [`TraceFlags::SAMPLED`].
///
/// See the specification's [trace-flags] section for more details.
///
/// [`SpanContext`]: crate::trace::SpanContext
/// [trace-flags]: https://www.w3.org/TR/trace-context/#trace-flags
#[derive(Clone, Debug, Default, PartialEq, Eq, Copy, Hash)]
pub struct TraceFlags(u8);

impl TraceFlags {
    /// Trace flags with the `sampled` flag set to `0`.
    ///
    /// Spans that are not sampled will be ignored by most tracing tools.
    pub const NOT_SAMPLED: TraceFlags = TraceFlags(0x00);

    /// Trace flags with the `sampled` flag set to `1`.
    pub const SAMPLED: TraceFlags = TraceFlags(0x01);

    /// Construct new trace flags.
    pub const fn new(flags: u8) -> Self {
        TraceFlags(flags)
    }

    /// Returns `true` if the `sampled` flag is set.
    pub fn is_sampled(&self) -> bool {
        (*self & TraceFlags::SAMPLED) == TraceFlags::SAMPLED
    }

    /// Returns a copy of the current flags with the `sampled` flag set.
    pub fn with_sampled(&self, sampled: bool) -> Self {
        if sampled {
            *self | TraceFlags::SAMPLED
        } else {
            *self & !TraceFlags::SAMPLED
        }
    }

    /// Returns the flags as a `u8`.
    pub fn to_u8(self) -> u8 {
        self.0
    }
}

impl BitAnd for TraceFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for TraceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl Not for TraceFlags {
    type Output = Self;

    fn not(self) -> Self::Output {
        Self(!self.0)
    }
}

impl fmt::LowerHex for TraceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// A 16-byte value which identifies a given trace.
///
/// The id is valid if it contains at least one non-zero byte.
#[derive(Clone, PartialEq, Eq, Copy, Hash)]
pub struct TraceId(u128);

impl TraceId {
    /// Invalid trace id.
    pub const INVALID: TraceId = TraceId(0);

    /// Number of hex characters in the wire representation.
    pub const HEX_LEN: usize = 2 * hex::U64_HEX_LEN;

    /// Create a trace id from a `u128`.
    pub const fn from_u128(value: u128) -> Self {
        TraceId(value)
    }

    /// Create a trace id from its representation as a byte array.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        TraceId(u128::from_be_bytes(bytes))
    }

    /// Return the representation of this trace id as a byte array.
    pub const fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    /// Converts exactly 32 lowercase hex characters to a trace id.
    ///
    /// Shorter, longer, or uppercase input is rejected so that wire parsing
    /// keeps exact byte semantics.
    ///
    /// # Examples
    ///
    /// ```
    /// use tracewire::trace::TraceId;
    ///
    /// assert!(TraceId::from_hex("58406520a006649127e371903a2de979").is_ok());
    ///
    /// assert!(TraceId::from_hex("42").is_err());
    /// assert!(TraceId::from_hex("58406520A006649127E371903A2DE979").is_err());
    /// ```
    pub fn from_hex(hex_str: &str) -> Result<Self, HexError> {
        let src = hex_str.as_bytes();
        if src.len() != Self::HEX_LEN {
            return Err(HexError::InvalidLength {
                expected: Self::HEX_LEN,
                actual: src.len(),
            });
        }
        let high = hex::decode_u64(src, 0)?;
        let low = hex::decode_u64(src, hex::U64_HEX_LEN)?;
        Ok(TraceId((u128::from(high) << 64) | u128::from(low)))
    }
}

impl From<u128> for TraceId {
    fn from(value: u128) -> Self {
        TraceId(value)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:032x}", self.0))
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:032x}", self.0))
    }
}

impl fmt::LowerHex for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// An 8-byte value which identifies a given span.
///
/// The id is valid if it contains at least one non-zero byte.
#[derive(Clone, PartialEq, Eq, Copy, Hash)]
pub struct SpanId(u64);

impl SpanId {
    /// Invalid span id.
    pub const INVALID: SpanId = SpanId(0);

    /// Number of hex characters in the wire representation.
    pub const HEX_LEN: usize = hex::U64_HEX_LEN;

    /// Create a span id from a `u64`.
    pub const fn from_u64(value: u64) -> Self {
        SpanId(value)
    }

    /// Create a span id from its representation as a byte array.
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        SpanId(u64::from_be_bytes(bytes))
    }

    /// Return the representation of this span id as a byte array.
    pub const fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Converts exactly 16 lowercase hex characters to a span id.
    ///
    /// # Examples
    ///
    /// ```
    /// use tracewire::trace::SpanId;
    ///
    /// assert!(SpanId::from_hex("58406520a0066491").is_ok());
    ///
    /// assert!(SpanId::from_hex("42").is_err());
    /// assert!(SpanId::from_hex("not_hex_at_all!!").is_err());
    /// ```
    pub fn from_hex(hex_str: &str) -> Result<Self, HexError> {
        let src = hex_str.as_bytes();
        if src.len() != Self::HEX_LEN {
            return Err(HexError::InvalidLength {
                expected: Self::HEX_LEN,
                actual: src.len(),
            });
        }
        hex::decode_u64(src, 0).map(SpanId)
    }
}

impl From<u64> for SpanId {
    fn from(value: u64) -> Self {
        SpanId(value)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

impl fmt::LowerHex for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rustfmt::skip]
    fn trace_id_test_data() -> Vec<(TraceId, &'static str, [u8; 16])> {
        vec![
            (TraceId(0), "00000000000000000000000000000000", [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
            (TraceId(42), "0000000000000000000000000000002a", [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 42]),
            (TraceId(126642714606581564793456114182061442190), "5f467fe7bf42676c05e20ba4a90e448e", [95, 70, 127, 231, 191, 66, 103, 108, 5, 226, 11, 164, 169, 14, 68, 142])
        ]
    }

    #[rustfmt::skip]
    fn span_id_test_data() -> Vec<(SpanId, &'static str, [u8; 8])> {
        vec![
            (SpanId(0), "0000000000000000", [0, 0, 0, 0, 0, 0, 0, 0]),
            (SpanId(42), "000000000000002a", [0, 0, 0, 0, 0, 0, 0, 42]),
            (SpanId(5508496025762705295), "4c721bf33e3caf8f", [76, 114, 27, 243, 62, 60, 175, 143])
        ]
    }

    #[test]
    fn test_trace_id() {
        for test_case in trace_id_test_data() {
            assert_eq!(format!("{}", test_case.0), test_case.1);
            assert_eq!(format!("{:032x}", test_case.0), test_case.1);
            assert_eq!(test_case.0.to_bytes(), test_case.2);

            assert_eq!(test_case.0, TraceId::from_hex(test_case.1).unwrap());
            assert_eq!(test_case.0, TraceId::from_bytes(test_case.2));
        }
    }

    #[test]
    fn test_span_id() {
        for test_case in span_id_test_data() {
            assert_eq!(format!("{}", test_case.0), test_case.1);
            assert_eq!(format!("{:016x}", test_case.0), test_case.1);
            assert_eq!(test_case.0.to_bytes(), test_case.2);

            assert_eq!(test_case.0, SpanId::from_hex(test_case.1).unwrap());
            assert_eq!(test_case.0, SpanId::from_bytes(test_case.2));
        }
    }

    #[test]
    fn from_hex_requires_exact_width() {
        assert!(TraceId::from_hex("5f467fe7bf42676c").is_err());
        assert!(TraceId::from_hex("5f467fe7bf42676c05e20ba4a90e448e00").is_err());
        assert!(SpanId::from_hex("4c721bf33e3caf8f00").is_err());
        assert!(SpanId::from_hex("4c721bf3").is_err());
    }

    #[test]
    fn from_hex_rejects_uppercase() {
        assert!(TraceId::from_hex("5F467FE7BF42676C05E20BA4A90E448E").is_err());
        assert!(SpanId::from_hex("4C721BF33E3CAF8F").is_err());
    }

    #[test]
    fn flags_sampled_masking() {
        assert!(TraceFlags::new(0x01).is_sampled());
        assert!(!TraceFlags::new(0x00).is_sampled());
        assert!(TraceFlags::new(0xff).is_sampled());
        assert!(!TraceFlags::new(0xfe).is_sampled());

        assert_eq!(
            TraceFlags::new(0xff) & TraceFlags::SAMPLED,
            TraceFlags::SAMPLED
        );
        assert_eq!(
            TraceFlags::SAMPLED.with_sampled(false),
            TraceFlags::NOT_SAMPLED
        );
        assert_eq!(
            TraceFlags::NOT_SAMPLED.with_sampled(true),
            TraceFlags::SAMPLED
        );
    }
}
