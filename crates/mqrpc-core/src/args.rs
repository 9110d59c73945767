//! Positional argument marshaling
//!
//! Requests carry their arguments as an ordered sequence of JSON values.
//! The server resolves a handler by command name alone, so typed decoding
//! is deferred until the handler's parameter list is known: [`RawArgs`]
//! keeps every position in its raw encoded form, and [`FromArgs`] decodes
//! each position independently against the declared parameter type.
//!
//! A position that fails typed decoding is retried against its raw string
//! form before being reported, since argument types are not knowable when
//! the client encodes the request.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::type_name;
use std::fmt;

/// Raw, not-yet-typed arguments of one request, indexed by position.
///
/// Positions absent from the envelope read as missing; a missing position
/// decodes as JSON `null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawArgs {
    slots: Vec<Option<Value>>,
}

impl RawArgs {
    /// Build from a dense, ordered list of values
    pub fn from_values(values: Vec<Value>) -> Self {
        Self {
            slots: values.into_iter().map(Some).collect(),
        }
    }

    pub(crate) fn from_slots(slots: Vec<Option<Value>>) -> Self {
        Self { slots }
    }

    /// Number of positions, including gaps
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no arguments were supplied
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Raw value at `index`, if present
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Iterate positions in order
    pub fn iter(&self) -> impl Iterator<Item = Option<&Value>> {
        self.slots.iter().map(Option::as_ref)
    }

    /// Decode the argument at `index` into `T`.
    ///
    /// Tries the raw value first. When that fails and the value is a
    /// string, the string is parsed as JSON text; any other non-null value
    /// is offered as its JSON text.
    pub fn decode<T: DeserializeOwned>(&self, index: usize) -> Result<T, ArgumentError> {
        let raw = self.get(index).cloned().unwrap_or(Value::Null);
        let first = match serde_json::from_value::<T>(raw.clone()) {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let fallback = match &raw {
            Value::Null => None,
            Value::String(text) => serde_json::from_str::<T>(text).ok(),
            other => serde_json::from_value::<T>(Value::String(other.to_string())).ok(),
        };

        fallback.ok_or_else(|| ArgumentError {
            index,
            expected: type_name::<T>(),
            reason: first.to_string(),
        })
    }
}

/// Descriptor of one declared handler parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamType {
    /// Position in the argument list
    pub index: usize,
    /// Rust type name the position decodes into
    pub type_name: &'static str,
}

impl ParamType {
    /// Descriptor for a parameter of type `T` at `index`
    pub fn of<T>(index: usize) -> Self {
        Self {
            index,
            type_name: type_name::<T>(),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}: {}", self.index, self.type_name)
    }
}

/// Failure to decode one positional argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentError {
    /// Position that failed
    pub index: usize,
    /// Expected Rust type
    pub expected: &'static str,
    /// Decoder message
    pub reason: String,
}

impl fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "argument {} (expected {}): {}",
            self.index, self.expected, self.reason
        )
    }
}

/// Every argument failure of one call, collected after decoding all
/// positions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentErrors(Vec<ArgumentError>);

impl fmt::Display for ArgumentErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} argument(s) failed to decode", self.0.len())?;
        for (i, error) in self.0.iter().enumerate() {
            f.write_str(if i == 0 { ": " } else { "; " })?;
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ArgumentErrors {}

impl ArgumentErrors {
    /// Whether no failure was recorded
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Recorded failures, in position order
    pub fn errors(&self) -> &[ArgumentError] {
        &self.0
    }

    /// Keep a successful decode, record a failed one
    pub fn capture<T>(&mut self, decoded: Result<T, ArgumentError>) -> Option<T> {
        match decoded {
            Ok(value) => Some(value),
            Err(error) => {
                self.0.push(error);
                None
            }
        }
    }
}

/// Values that can be sent as a positional argument list
pub trait IntoArgs {
    /// Encode into the ordered argument sequence
    fn into_args(self) -> Result<Vec<Value>, serde_json::Error>;
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> Result<Vec<Value>, serde_json::Error> {
        Ok(self)
    }
}

impl IntoArgs for () {
    fn into_args(self) -> Result<Vec<Value>, serde_json::Error> {
        Ok(Vec::new())
    }
}

/// Handler parameter lists that can be decoded from [`RawArgs`]
pub trait FromArgs: Sized {
    /// Declared parameter descriptors, in order
    fn param_types() -> Vec<ParamType>;

    /// Decode every position independently; fail with all errors collected
    fn from_args(args: &RawArgs) -> Result<Self, ArgumentErrors>;
}

impl FromArgs for () {
    fn param_types() -> Vec<ParamType> {
        Vec::new()
    }

    fn from_args(_args: &RawArgs) -> Result<Self, ArgumentErrors> {
        Ok(())
    }
}

macro_rules! tuple_args {
    ($(($ty:ident, $var:ident, $idx:tt)),+) => {
        impl<$($ty: Serialize),+> IntoArgs for ($($ty,)+) {
            fn into_args(self) -> Result<Vec<Value>, serde_json::Error> {
                Ok(vec![$(serde_json::to_value(self.$idx)?),+])
            }
        }

        impl<$($ty: DeserializeOwned),+> FromArgs for ($($ty,)+) {
            fn param_types() -> Vec<ParamType> {
                vec![$(ParamType::of::<$ty>($idx)),+]
            }

            fn from_args(args: &RawArgs) -> Result<Self, ArgumentErrors> {
                let mut errors = ArgumentErrors::default();
                $(let $var = errors.capture(args.decode::<$ty>($idx));)+
                match ($($var,)+) {
                    ($(Some($var),)+) => Ok(($($var,)+)),
                    _ => Err(errors),
                }
            }
        }
    };
}

tuple_args!((A, a, 0));
tuple_args!((A, a, 0), (B, b, 1));
tuple_args!((A, a, 0), (B, b, 1), (C, c, 2));
tuple_args!((A, a, 0), (B, b, 1), (C, c, 2), (D, d, 3));
tuple_args!((A, a, 0), (B, b, 1), (C, c, 2), (D, d, 3), (E, e, 4));
tuple_args!((A, a, 0), (B, b, 1), (C, c, 2), (D, d, 3), (E, e, 4), (F, f, 5));
tuple_args!(
    (A, a, 0),
    (B, b, 1),
    (C, c, 2),
    (D, d, 3),
    (E, e, 4),
    (F, f, 5),
    (G, g, 6)
);
tuple_args!(
    (A, a, 0),
    (B, b, 1),
    (C, c, 2),
    (D, d, 3),
    (E, e, 4),
    (F, f, 5),
    (G, g, 6),
    (H, h, 7)
);
