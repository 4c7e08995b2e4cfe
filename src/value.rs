/// Admission of caller values into documents.
///
/// Documents hold ordered collections, maps, and scalars. A fixed-size
/// array (`[T; N]`) or tuple serializes through `serialize_tuple`, which is
/// how it is told apart from a `Vec` or slice and rejected.

use serde::ser::{self, Impossible, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::error::DocumentError;

/// Convert a caller value to a document value
///
/// # Example
/// ```
/// use docpath::value::to_document_value;
/// use serde_json::json;
///
/// assert_eq!(to_document_value(&vec![1, 2]).unwrap(), json!([1, 2]));
/// assert!(to_document_value(&[1, 2]).is_err());
/// ```
pub fn to_document_value<T>(value: &T) -> Result<Value, DocumentError>
where
    T: Serialize + ?Sized,
{
    match value.serialize(ShapeProbe) {
        Err(Probe::FixedSize) => {
            return Err(DocumentError::unsupported_value(
                "fixed-size arrays and tuples cannot be stored; use a Vec",
            ));
        }
        Err(Probe::Custom(message)) => return Err(DocumentError::unsupported_value(message)),
        Ok(()) | Err(Probe::Collection) => {}
    }

    serde_json::to_value(value).map_err(|err| DocumentError::unsupported_value(err.to_string()))
}

/// Early exit signals from the probe; only the top-level shape matters
#[derive(Debug)]
enum Probe {
    FixedSize,
    Collection,
    Custom(String),
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Probe::FixedSize => write!(f, "fixed-size sequence"),
            Probe::Collection => write!(f, "collection"),
            Probe::Custom(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for Probe {}

impl ser::Error for Probe {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Probe::Custom(msg.to_string())
    }
}

struct ShapeProbe;

impl Serializer for ShapeProbe {
    type Ok = ();
    type Error = Probe;
    type SerializeSeq = Impossible<(), Probe>;
    type SerializeTuple = Impossible<(), Probe>;
    type SerializeTupleStruct = Impossible<(), Probe>;
    type SerializeTupleVariant = Impossible<(), Probe>;
    type SerializeMap = Impossible<(), Probe>;
    type SerializeStruct = Impossible<(), Probe>;
    type SerializeStructVariant = Impossible<(), Probe>;

    fn serialize_bool(self, _: bool) -> Result<(), Probe> {
        Ok(())
    }

    fn serialize_i8(self, _: i8) -> Result<(), Probe> {
        Ok(())
    }

    fn serialize_i16(self, _: i16) -> Result<(), Probe> {
        Ok(())
    }

    fn serialize_i32(self, _: i32) -> Result<(), Probe> {
        Ok(())
    }

    fn serialize_i64(self, _: i64) -> Result<(), Probe> {
        Ok(())
    }

    fn serialize_u8(self, _: u8) -> Result<(), Probe> {
        Ok(())
    }

    fn serialize_u16(self, _: u16) -> Result<(), Probe> {
        Ok(())
    }

    fn serialize_u32(self, _: u32) -> Result<(), Probe> {
        Ok(())
    }

    fn serialize_u64(self, _: u64) -> Result<(), Probe> {
        Ok(())
    }

    fn serialize_f32(self, _: f32) -> Result<(), Probe> {
        Ok(())
    }

    fn serialize_f64(self, _: f64) -> Result<(), Probe> {
        Ok(())
    }

    fn serialize_char(self, _: char) -> Result<(), Probe> {
        Ok(())
    }

    fn serialize_str(self, _: &str) -> Result<(), Probe> {
        Ok(())
    }

    fn serialize_bytes(self, _: &[u8]) -> Result<(), Probe> {
        Err(Probe::Collection)
    }

    fn serialize_none(self) -> Result<(), Probe> {
        Ok(())
    }

    fn serialize_some<T>(self, value: &T) -> Result<(), Probe>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), Probe> {
        Ok(())
    }

    fn serialize_unit_struct(self, _: &'static str) -> Result<(), Probe> {
        Ok(())
    }

    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Result<(), Probe> {
        Ok(())
    }

    fn serialize_newtype_struct<T>(self, _: &'static str, value: &T) -> Result<(), Probe>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: &T,
    ) -> Result<(), Probe>
    where
        T: Serialize + ?Sized,
    {
        Err(Probe::Collection)
    }

    fn serialize_seq(self, _: Option<usize>) -> Result<Self::SerializeSeq, Probe> {
        Err(Probe::Collection)
    }

    fn serialize_tuple(self, _: usize) -> Result<Self::SerializeTuple, Probe> {
        Err(Probe::FixedSize)
    }

    fn serialize_tuple_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeTupleStruct, Probe> {
        Err(Probe::FixedSize)
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeTupleVariant, Probe> {
        Err(Probe::Collection)
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self::SerializeMap, Probe> {
        Err(Probe::Collection)
    }

    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self::SerializeStruct, Probe> {
        Err(Probe::Collection)
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeStructVariant, Probe> {
        Err(Probe::Collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct Item {
        sku: String,
        qty: u32,
    }

    #[test]
    fn test_scalars_and_collections_pass() {
        assert_eq!(to_document_value(&5).unwrap(), json!(5));
        assert_eq!(to_document_value("x").unwrap(), json!("x"));
        assert_eq!(to_document_value(&vec!["a", "b"]).unwrap(), json!(["a", "b"]));
        assert_eq!(to_document_value(&[1, 2][..]).unwrap(), json!([1, 2]));
        assert_eq!(to_document_value(&Some(3)).unwrap(), json!(3));
        assert_eq!(to_document_value(&json!({"a": [1]})).unwrap(), json!({"a": [1]}));

        let mut map = BTreeMap::new();
        map.insert("k", 1);
        assert_eq!(to_document_value(&map).unwrap(), json!({"k": 1}));
    }

    #[test]
    fn test_structs_pass() {
        let item = Item {
            sku: "A-1".into(),
            qty: 2,
        };
        assert_eq!(
            to_document_value(&item).unwrap(),
            json!({"sku": "A-1", "qty": 2})
        );
    }

    #[test]
    fn test_fixed_size_arrays_rejected() {
        let err = to_document_value(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, DocumentError::UnsupportedValueType { .. }));
        assert!(to_document_value(&(1, "a")).is_err());
        assert!(to_document_value(&Some([0u8; 4])).is_err());
    }

    #[test]
    fn test_nested_fixed_arrays_are_fine() {
        // Only the top-level value has to be an ordered collection or scalar
        assert_eq!(
            to_document_value(&vec![[1, 2], [3, 4]]).unwrap(),
            json!([[1, 2], [3, 4]])
        );
    }
}
