//! The value bridge: a tagged intermediate representation shared across the
//! host/guest boundary, plus the pure conversion functions between it and
//! both sides.
//!
//! The tag order below is part of the crate's external contract: embedders
//! may depend on discriminant stability, so new variants must only ever be
//! appended, never inserted.

/// The bridge value type. Arrays and hashes own their elements; there is no
/// separate `free` step here, since ownership is expressed directly through
/// the type system. The conversion functions below still fail and clean up
/// any already-converted elements rather than leaking partial work, since
/// that's an observable property (no leaked host-side handles on a
/// conversion error), not just a memory detail.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `nil`
    Nil,
    /// `true`
    True,
    /// `false`
    False,
    /// A 64-bit signed integer. Values outside `i64` range are rejected at
    /// the bridge with an explicit conversion error rather than narrowed.
    Integer(i64),
    /// A 64-bit float.
    Float(f64),
    /// A binary-safe string (not NUL-delimited; length is explicit).
    String(Vec<u8>),
    /// An ordered array of values.
    Array(Vec<Value>),
    /// An ordered association of key/value pairs. Modeled as a `Vec` of
    /// pairs (not a `HashMap`) so that guest-side insertion order is
    /// preserved on a round trip, matching the guest language's own
    /// insertion-ordered hash semantics. Keys are unrestricted `Value`s —
    /// the guest language allows any hashable object as a hash key, and the
    /// bridge only ever rejects a value once, by variant, never twice by
    /// position.
    Hash(Vec<(Value, Value)>),
}

/// Error raised when converting a host- or guest-side value that isn't one
/// of the supported bridge variants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported type for sandbox: {0}")]
pub struct UnsupportedType(pub String);

impl Value {
    /// Convenience constructor for a UTF-8 string value.
    pub fn from_str(s: &str) -> Self {
        Value::String(s.as_bytes().to_vec())
    }

    /// Best-effort lossy string view, for the output-buffer overrides that
    /// need a `to_s`/`inspect` rendering of a value already on the bridge
    /// (used by tests and by the host-side half of the bridge; the guest
    /// side always produces its own `inspect` via the FFI layer).
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Nil => "".to_string(),
            Value::True => "true".to_string(),
            Value::False => "false".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(Value::to_display_string).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Hash(pairs) => {
                let parts: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| format!("{}=>{}", k.to_display_string(), v.to_display_string()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
        }
    }
}

/// This is the host half of the value bridge: in this crate the "host" is
/// just the embedding Rust program, so this conversion is the identity —
/// integer overflow is already excluded by `Value::Integer` being `i64` —
/// but it's kept as its own named function, mirroring the guest-facing
/// conversion pair in `ffi.rs`, so the two sides of the bridge stay
/// symmetric in the API surface.
pub fn host_to_intermediate(v: Value) -> Result<Value, UnsupportedType> {
    Ok(v)
}

/// Inverse of [`host_to_intermediate`].
pub fn intermediate_to_host(v: Value) -> Value {
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_values() -> Vec<Value> {
        vec![
            Value::Nil,
            Value::True,
            Value::False,
            Value::Integer(42),
            Value::Integer(-1),
            Value::Float(1.5),
            Value::from_str("hello"),
            Value::Array(vec![Value::Integer(1), Value::from_str("x")]),
            Value::Array(vec![
                Value::Integer(1),
                Value::Array(vec![Value::Integer(2), Value::Integer(3)]),
            ]),
            Value::Hash(vec![
                (Value::from_str("a"), Value::Integer(1)),
                (Value::Integer(2), Value::True),
                (Value::Nil, Value::Nil),
                (Value::Float(1.5), Value::from_str("float key")),
                (Value::Array(vec![Value::Integer(1)]), Value::Integer(9)),
            ]),
        ]
    }

    #[test]
    fn round_trips_every_supported_variant() {
        for v in sample_values() {
            let bridged = host_to_intermediate(v.clone()).expect("supported");
            let back = intermediate_to_host(bridged);
            assert_eq!(back, v);
        }
    }

    #[test]
    fn nested_containers_round_trip() {
        let v = Value::Array(vec![Value::Hash(vec![(
            Value::from_str("k"),
            Value::Array(vec![Value::Integer(1), Value::Integer(2)]),
        )])]);
        let bridged = host_to_intermediate(v.clone()).unwrap();
        assert_eq!(intermediate_to_host(bridged), v);
    }
}
