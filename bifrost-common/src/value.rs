use bytemuck::{Pod, Zeroable};

use crate::ptr::Ptr;

/// Discriminant for [`StorageValueWire`], matching the original
/// `SMStorageValue::EType` enumeration (bool / int / double / string).
/// `Bytes` is added for opaque payloads per spec §3's tagged-value model.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
#[cfg_attr(feature = "host", derive(serde::Serialize, serde::Deserialize))]
pub struct ValueTag(pub u8);

impl ValueTag {
    pub const UNKNOWN: ValueTag = ValueTag(0);
    pub const BOOL: ValueTag = ValueTag(1);
    pub const INT: ValueTag = ValueTag(2);
    pub const DOUBLE: ValueTag = ValueTag(3);
    pub const STRING: ValueTag = ValueTag(4);
    pub const BYTES: ValueTag = ValueTag(5);
}

/// Number of bytes of a string/byte payload that fit inline in a
/// [`StorageValueWire`] without a secondary arena allocation.
///
/// Chosen to match the original `SMStorageValue`'s in-place storage array
/// (`sizeof(SMString)`, 51 usable bytes after accounting for the tag and
/// length fields below).
pub const INLINE_STRING_CAPACITY: usize = 51;

/// The arena-resident representation of a single store value.
///
/// Strings/bytes up to [`INLINE_STRING_CAPACITY`] are stored inline in
/// `inline_bytes`; longer payloads are a separate arena allocation addressed
/// by `heap_ptr`/`heap_len`, with `inline_len` left at zero.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct StorageValueWire {
    pub tag: ValueTag,
    _pad: [u8; 7],
    pub as_bool: u8,
    _pad2: [u8; 7],
    pub as_int: i64,
    pub as_double: f64,
    pub inline_len: u32,
    pub inline_bytes: [u8; INLINE_STRING_CAPACITY],
    pub heap_ptr: Ptr<u8>,
    pub heap_len: u64,
}

impl StorageValueWire {
    pub fn zeroed() -> Self {
        Self {
            tag: ValueTag::UNKNOWN,
            _pad: [0; 7],
            as_bool: 0,
            _pad2: [0; 7],
            as_int: 0,
            as_double: 0.0,
            inline_len: 0,
            inline_bytes: [0; INLINE_STRING_CAPACITY],
            heap_ptr: Ptr::null(),
            heap_len: 0,
        }
    }

    pub fn is_inline_string(&self) -> bool {
        self.tag == ValueTag::STRING && self.heap_ptr.is_null()
    }
}

/// The host-side, owned counterpart of [`StorageValueWire`] used by
/// `bifrost-core::shared::Storage`'s public API.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "host", derive(serde::Serialize, serde::Deserialize))]
pub enum StorageValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl StorageValue {
    /// Implicit numeric/string conversions matching the original
    /// `SMStorageValue::As*` family: bool<->int<->double convert
    /// numerically, string<->numeric parses/stringifies, bytes are opaque
    /// and only convertible to themselves.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            Self::Int(v) => Some(*v != 0),
            Self::Double(v) => Some(*v != 0.0),
            Self::String(s) => s.parse::<bool>().ok().or_else(|| match s.as_str() {
                "1" => Some(true),
                "0" => Some(false),
                _ => None,
            }),
            Self::Bytes(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(v) => Some(*v as i64),
            Self::Int(v) => Some(*v),
            Self::Double(v) => Some(*v as i64),
            Self::String(s) => s.parse().ok(),
            Self::Bytes(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::Int(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            Self::String(s) => s.parse().ok(),
            Self::Bytes(_) => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::Bool(v) => Some(v.to_string()),
            Self::Int(v) => Some(v.to_string()),
            Self::Double(v) => Some(v.to_string()),
            Self::String(s) => Some(s.clone()),
            Self::Bytes(_) => None,
        }
    }

    pub fn tag(&self) -> ValueTag {
        match self {
            Self::Bool(_) => ValueTag::BOOL,
            Self::Int(_) => ValueTag::INT,
            Self::Double(_) => ValueTag::DOUBLE,
            Self::String(_) => ValueTag::STRING,
            Self::Bytes(_) => ValueTag::BYTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_value_is_plain_old_data() {
        fn assert_pod<T: Pod>() {}
        assert_pod::<StorageValueWire>();
    }

    #[test]
    fn numeric_conversions_round_trip() {
        let v = StorageValue::Int(42);
        assert_eq!(v.as_bool(), Some(true));
        assert_eq!(v.as_f64(), Some(42.0));
        assert_eq!(v.as_string(), Some("42".to_string()));
    }

    #[test]
    fn string_parses_back_to_numeric() {
        let v = StorageValue::String("3.5".to_string());
        assert_eq!(v.as_f64(), Some(3.5));
        assert_eq!(StorageValue::String("nope".into()).as_f64(), None);
    }

    #[test]
    fn bytes_do_not_convert() {
        let v = StorageValue::Bytes(vec![1, 2, 3]);
        assert_eq!(v.as_bool(), None);
        assert_eq!(v.as_string(), None);
    }
}
