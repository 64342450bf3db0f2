//! Document codec: plain values ↔ the store's variant-typed wire format.
//!
//! Every field value stored in the document database is a single-key JSON
//! object naming its variant:
//!
//! ```text
//! {"stringValue": "abc"}            {"integerValue": "42"}
//! {"doubleValue": 1.5}              {"booleanValue": true}
//! {"timestampValue": "2024-..Z"}    {"nullValue": null}
//! {"arrayValue": {"values": [..]}}  {"mapValue": {"fields": {..}}}
//! {"geoPointValue": {"latitude": .., "longitude": ..}}
//! {"referenceValue": "projects/../documents/a/b"}
//! ```
//!
//! [`DocValue`] is the plain side of the mapping. [`encode`] and [`decode`]
//! are inverses for every value this module produces. Documents authored by
//! other writers go through [`decode_fields`], which drops fields whose
//! variant tag it does not recognise instead of failing the whole read.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A plain structured value as seen by business code.
#[derive(Debug, Clone, PartialEq)]
pub enum DocValue {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<DocValue>),
    Map(BTreeMap<String, DocValue>),
    GeoPoint { latitude: f64, longitude: f64 },
    Reference(String),
}

/// A decoded document body: field name → plain value.
pub type DocObject = BTreeMap<String, DocValue>;

/// The wire representation of one field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TypedValue {
    NullValue(()),
    StringValue(String),
    BooleanValue(bool),
    /// 64-bit integers travel as decimal strings.
    IntegerValue(String),
    /// Non-finite values travel as `"NaN"`, `"Infinity"` or `"-Infinity"`.
    DoubleValue(#[serde(with = "wire_double")] f64),
    /// RFC3339, UTC.
    TimestampValue(String),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
    GeoPointValue(LatLng),
    ReferenceValue(String),
}

mod wire_double {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_sign_positive() {
            serializer.serialize_str("Infinity")
        } else {
            serializer.serialize_str("-Infinity")
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Wire::deserialize(deserializer)? {
            Wire::Number(n) => Ok(n),
            Wire::Text(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                other => other
                    .parse::<f64>()
                    .map_err(|_| de::Error::custom(format!("invalid doubleValue '{}'", other))),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<TypedValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapValue {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, TypedValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

/// Encode a plain value into its wire representation.
pub fn encode(value: &DocValue) -> TypedValue {
    match value {
        DocValue::Null => TypedValue::NullValue(()),
        DocValue::Bool(b) => TypedValue::BooleanValue(*b),
        DocValue::Integer(i) => TypedValue::IntegerValue(i.to_string()),
        DocValue::Double(d) => TypedValue::DoubleValue(*d),
        DocValue::String(s) => TypedValue::StringValue(s.clone()),
        DocValue::Timestamp(ts) => {
            TypedValue::TimestampValue(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
        DocValue::Array(items) => TypedValue::ArrayValue(ArrayValue {
            values: items.iter().map(encode).collect(),
        }),
        DocValue::Map(fields) => TypedValue::MapValue(MapValue {
            fields: encode_fields(fields),
        }),
        DocValue::GeoPoint {
            latitude,
            longitude,
        } => TypedValue::GeoPointValue(LatLng {
            latitude: *latitude,
            longitude: *longitude,
        }),
        DocValue::Reference(r) => TypedValue::ReferenceValue(r.clone()),
    }
}

/// Encode every field of an object.
pub fn encode_fields(fields: &DocObject) -> BTreeMap<String, TypedValue> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), encode(v)))
        .collect()
}

/// Encode an arbitrary JSON value (see [`DocValue::from_json`]).
pub fn encode_json(value: &serde_json::Value) -> TypedValue {
    encode(&DocValue::from_json(value))
}

/// Decode a wire value. Total over every variant.
///
/// Malformed scalars from foreign writers (an `integerValue` that is not a
/// number, an unparseable timestamp) degrade to their string form.
pub fn decode(value: &TypedValue) -> DocValue {
    match value {
        TypedValue::NullValue(()) => DocValue::Null,
        TypedValue::StringValue(s) => DocValue::String(s.clone()),
        TypedValue::BooleanValue(b) => DocValue::Bool(*b),
        TypedValue::IntegerValue(s) => s
            .parse::<i64>()
            .map(DocValue::Integer)
            .unwrap_or_else(|_| DocValue::String(s.clone())),
        TypedValue::DoubleValue(d) => DocValue::Double(*d),
        TypedValue::TimestampValue(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| DocValue::Timestamp(dt.with_timezone(&Utc)))
            .unwrap_or_else(|_| DocValue::String(s.clone())),
        TypedValue::ArrayValue(arr) => DocValue::Array(arr.values.iter().map(decode).collect()),
        TypedValue::MapValue(map) => DocValue::Map(
            map.fields
                .iter()
                .map(|(k, v)| (k.clone(), decode(v)))
                .collect(),
        ),
        TypedValue::GeoPointValue(ll) => DocValue::GeoPoint {
            latitude: ll.latitude,
            longitude: ll.longitude,
        },
        TypedValue::ReferenceValue(r) => DocValue::Reference(r.clone()),
    }
}

/// Best-effort decode of a raw wire value authored by someone else.
///
/// Returns `None` when the variant tag is unknown. Nested arrays and maps
/// drop only the offending elements.
pub fn decode_raw(raw: &serde_json::Value) -> Option<DocValue> {
    let obj = raw.as_object()?;
    let (tag, inner) = obj.iter().next()?;
    let value = match tag.as_str() {
        "arrayValue" => {
            let values = inner
                .get("values")
                .and_then(|v| v.as_array())
                .map(|items| items.iter().filter_map(decode_raw).collect())
                .unwrap_or_default();
            DocValue::Array(values)
        }
        "mapValue" => {
            let fields = inner
                .get("fields")
                .and_then(|v| v.as_object())
                .map(|f| {
                    f.iter()
                        .filter_map(|(k, v)| decode_raw(v).map(|d| (k.clone(), d)))
                        .collect()
                })
                .unwrap_or_default();
            DocValue::Map(fields)
        }
        // Some writers send integers as JSON numbers rather than strings.
        "integerValue" if inner.is_number() => match inner.as_i64() {
            Some(i) => DocValue::Integer(i),
            None => DocValue::Double(inner.as_f64()?),
        },
        _ => match serde_json::from_value::<TypedValue>(raw.clone()) {
            Ok(typed) => decode(&typed),
            Err(_) => {
                tracing::debug!(tag = %tag, "skipping field with unknown value type");
                return None;
            }
        },
    };
    Some(value)
}

/// Decode the `fields` map of a stored document, skipping unknown variants.
pub fn decode_fields(fields: &serde_json::Map<String, serde_json::Value>) -> DocObject {
    fields
        .iter()
        .filter_map(|(k, v)| decode_raw(v).map(|d| (k.clone(), d)))
        .collect()
}

impl DocValue {
    /// Convert a JSON value.
    ///
    /// Numbers without a fractional component become integers. Numbers that
    /// fit neither `i64` nor a finite `f64` fall back to their string form so
    /// writes are never blocked on an odd value.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => DocValue::Null,
            serde_json::Value::Bool(b) => DocValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DocValue::Integer(i)
                } else if n.is_u64() {
                    DocValue::String(n.to_string())
                } else {
                    match n.as_f64() {
                        Some(f)
                            if f.fract() == 0.0
                                && f >= i64::MIN as f64
                                && f < i64::MAX as f64 =>
                        {
                            DocValue::Integer(f as i64)
                        }
                        Some(f) if f.is_finite() => DocValue::Double(f),
                        _ => DocValue::String(n.to_string()),
                    }
                }
            }
            serde_json::Value::String(s) => DocValue::String(s.clone()),
            serde_json::Value::Array(items) => {
                DocValue::Array(items.iter().map(DocValue::from_json).collect())
            }
            serde_json::Value::Object(map) => DocValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), DocValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert into JSON. Timestamps become RFC3339 strings, geo-points
    /// `{latitude, longitude}` objects and references their path string.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            DocValue::Null => serde_json::Value::Null,
            DocValue::Bool(b) => serde_json::Value::Bool(*b),
            DocValue::Integer(i) => serde_json::Value::from(*i),
            DocValue::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            DocValue::String(s) => serde_json::Value::String(s.clone()),
            DocValue::Timestamp(ts) => {
                serde_json::Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            DocValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(DocValue::to_json).collect())
            }
            DocValue::Map(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            DocValue::GeoPoint {
                latitude,
                longitude,
            } => serde_json::json!({ "latitude": latitude, "longitude": longitude }),
            DocValue::Reference(r) => serde_json::Value::String(r.clone()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DocValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Convert a decoded object into a JSON object.
pub fn object_to_json(obj: &DocObject) -> serde_json::Value {
    serde_json::Value::Object(obj.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
}

/// Convert a JSON object into a plain object. Non-object input yields `None`.
pub fn object_from_json(value: &serde_json::Value) -> Option<DocObject> {
    match DocValue::from_json(value) {
        DocValue::Map(fields) => Some(fields),
        _ => None,
    }
}
