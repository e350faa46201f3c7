use base64::{engine::general_purpose, Engine as _};

/// Untyped value exchanged with storage tiers.
pub type StoreValue = serde_json::Value;

/// Conversion between a typed value and the raw value a tier stores.
///
/// Decoding never fails loudly: data that does not fit `Self` is `None`.
pub trait Storable: Sized {
    /// Last component of the canonical key name. Part of the on-disk contract.
    fn type_tag() -> &'static str;

    fn to_store_value(&self) -> Option<StoreValue>;

    fn from_store_value(value: &StoreValue) -> Option<Self>;
}

impl Storable for String {
    fn type_tag() -> &'static str {
        "String"
    }

    fn to_store_value(&self) -> Option<StoreValue> {
        Some(StoreValue::String(self.clone()))
    }

    fn from_store_value(value: &StoreValue) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl Storable for bool {
    fn type_tag() -> &'static str {
        "bool"
    }

    fn to_store_value(&self) -> Option<StoreValue> {
        Some(StoreValue::Bool(*self))
    }

    fn from_store_value(value: &StoreValue) -> Option<Self> {
        value.as_bool()
    }
}

macro_rules! storable_int {
    ($($ty:ty => $read:ident),* $(,)?) => {
        $(
            impl Storable for $ty {
                fn type_tag() -> &'static str {
                    stringify!($ty)
                }

                fn to_store_value(&self) -> Option<StoreValue> {
                    Some(StoreValue::from(*self))
                }

                fn from_store_value(value: &StoreValue) -> Option<Self> {
                    value.$read().and_then(|n| <$ty>::try_from(n).ok())
                }
            }
        )*
    };
}

storable_int!(i32 => as_i64, i64 => as_i64, u32 => as_u64, u64 => as_u64);

impl Storable for f64 {
    fn type_tag() -> &'static str {
        "f64"
    }

    // NaN and infinities have no JSON form.
    fn to_store_value(&self) -> Option<StoreValue> {
        serde_json::Number::from_f64(*self).map(StoreValue::Number)
    }

    fn from_store_value(value: &StoreValue) -> Option<Self> {
        value.as_f64()
    }
}

impl Storable for f32 {
    fn type_tag() -> &'static str {
        "f32"
    }

    fn to_store_value(&self) -> Option<StoreValue> {
        serde_json::Number::from_f64(f64::from(*self)).map(StoreValue::Number)
    }

    fn from_store_value(value: &StoreValue) -> Option<Self> {
        value.as_f64().map(|n| n as f32)
    }
}

/// Raw bytes travel as standard base64 strings.
impl Storable for Vec<u8> {
    fn type_tag() -> &'static str {
        "Bytes"
    }

    fn to_store_value(&self) -> Option<StoreValue> {
        Some(StoreValue::String(general_purpose::STANDARD.encode(self)))
    }

    fn from_store_value(value: &StoreValue) -> Option<Self> {
        general_purpose::STANDARD.decode(value.as_str()?).ok()
    }
}

impl Storable for StoreValue {
    fn type_tag() -> &'static str {
        "json"
    }

    fn to_store_value(&self) -> Option<StoreValue> {
        Some(self.clone())
    }

    fn from_store_value(value: &StoreValue) -> Option<Self> {
        Some(value.clone())
    }
}

/// Implements [`Storable`] for serde types by storing them as JSON documents.
/// The type tag defaults to the type's name.
///
/// ```
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Profile {
///     name: String,
/// }
///
/// tierstore_core::json_storable!(Profile);
/// ```
#[macro_export]
macro_rules! json_storable {
    ($ty:ty) => {
        $crate::json_storable!($ty, stringify!($ty));
    };
    ($ty:ty, $tag:expr) => {
        impl $crate::Storable for $ty {
            fn type_tag() -> &'static str {
                $tag
            }

            fn to_store_value(&self) -> Option<$crate::StoreValue> {
                $crate::__private::serde_json::to_value(self).ok()
            }

            fn from_store_value(value: &$crate::StoreValue) -> Option<Self> {
                $crate::__private::serde_json::from_value(value.clone()).ok()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        age: u32,
    }

    crate::json_storable!(Profile);

    #[test]
    fn integers_reject_out_of_range_values() {
        let big = json!(u64::MAX);
        assert_eq!(i32::from_store_value(&big), None);
        assert_eq!(u64::from_store_value(&big), Some(u64::MAX));
        assert_eq!(u32::from_store_value(&json!(-1)), None);
    }

    #[test]
    fn mismatched_types_decode_to_none() {
        assert_eq!(String::from_store_value(&json!(42)), None);
        assert_eq!(bool::from_store_value(&json!("true")), None);
        assert_eq!(Profile::from_store_value(&json!({ "name": "x" })), None);
    }

    #[test]
    fn bytes_are_base64_strings() {
        let raw = b"hello world".to_vec().to_store_value().expect("encode");
        assert_eq!(raw, json!("aGVsbG8gd29ybGQ="));
        assert_eq!(Vec::<u8>::from_store_value(&raw), Some(b"hello world".to_vec()));
        assert_eq!(Vec::<u8>::from_store_value(&json!("%%%")), None);
    }

    #[test]
    fn serde_types_use_their_name_as_tag() {
        assert_eq!(Profile::type_tag(), "Profile");
        let profile = Profile {
            name: "testName".into(),
            age: 123,
        };
        let raw = profile.to_store_value().expect("encode");
        assert_eq!(Profile::from_store_value(&raw), Some(profile));
    }

    #[test]
    fn non_finite_floats_are_not_storable() {
        assert_eq!(f64::NAN.to_store_value(), None);
        assert_eq!(f32::from_store_value(&json!(1234)), Some(1234.0));
    }
}
