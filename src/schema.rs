//! Delta schema JSON shape (spec §6) plus schema inference and compatibility
//! checking used by the write path (spec §4.4 steps 3-4).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{DeltaResult, Error};
use crate::value::Value;

/// Field type atoms plus the complex types, per spec §6.
#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
    Boolean,
    Byte,
    Short,
    Integer,
    Long,
    Float,
    Double,
    Decimal(u8, u8),
    Date,
    Timestamp,
    TimestampNtz,
    String,
    Binary,
    Variant,
    Array(Box<DataType>, bool),
    Map(Box<DataType>, Box<DataType>, bool),
    Struct(StructType),
}

impl DataType {
    /// Numeric-promotion lattice used by schema inference and compatibility
    /// checking (spec §4.4 step 3: `int32⊂int64⊂double; float⊂double`).
    fn numeric_rank(&self) -> Option<u8> {
        match self {
            DataType::Integer => Some(0),
            DataType::Long => Some(1),
            DataType::Float => Some(2),
            DataType::Double => Some(3),
            _ => None,
        }
    }

    /// The least upper bound of two types under the promotion lattice, or
    /// `None` if they are simply incompatible (caller falls back to `string`
    /// or rejects, depending on context).
    pub fn promote(a: &DataType, b: &DataType) -> Option<DataType> {
        if a == b {
            return Some(a.clone());
        }
        match (a.numeric_rank(), b.numeric_rank()) {
            (Some(ra), Some(rb)) => {
                let winner = if ra >= rb { a } else { b };
                // int32/int64 only ever widen to double when mixed with a
                // float-family type; otherwise widen within the integer or
                // float family.
                let is_int = |t: &DataType| matches!(t, DataType::Integer | DataType::Long);
                let is_flt = |t: &DataType| matches!(t, DataType::Float | DataType::Double);
                if is_int(a) && is_flt(b) || is_flt(a) && is_int(b) {
                    Some(DataType::Double)
                } else {
                    Some(winner.clone())
                }
            }
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            DataType::Boolean => "boolean",
            DataType::Byte => "byte",
            DataType::Short => "short",
            DataType::Integer => "integer",
            DataType::Long => "long",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::Decimal(..) => "decimal",
            DataType::Date => "date",
            DataType::Timestamp => "timestamp",
            DataType::TimestampNtz => "timestamp_ntz",
            DataType::String => "string",
            DataType::Binary => "binary",
            DataType::Variant => "variant",
            DataType::Array(..) => "array",
            DataType::Map(..) => "map",
            DataType::Struct(..) => "struct",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Decimal(p, s) => write!(f, "decimal({p},{s})"),
            other => write!(f, "{}", other.type_name()),
        }
    }
}

/// Column-mapping metadata carried on a field (spec §4.7).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMetadata {
    pub column_mapping_id: Option<i64>,
    pub physical_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub metadata: FieldMetadata,
}

impl StructField {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
            metadata: FieldMetadata::default(),
        }
    }

    /// The column identifier this field is written under: its
    /// `physicalName` if column mapping is enabled, otherwise its logical
    /// `name` (spec §4.7).
    pub fn physical_name(&self) -> &str {
        self.metadata.physical_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructType {
    pub fields: Vec<StructField>,
}

impl StructType {
    pub fn new(fields: impl IntoIterator<Item = StructField>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Merge two struct schemas, widening shared fields per
    /// [`DataType::promote`] and making any field absent from one side
    /// nullable (spec §4.4 step 4). Returns `SchemaIncompatible` if two
    /// shared fields have conflicting, non-promotable types.
    pub fn merge_compatible(&self, other: &StructType) -> DeltaResult<StructType> {
        let mut fields: Vec<StructField> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for existing in &self.fields {
            seen.insert(existing.name.clone());
            match other.field(&existing.name) {
                Some(incoming) => {
                    let merged_type = DataType::promote(&existing.data_type, &incoming.data_type)
                        .ok_or_else(|| {
                            Error::SchemaIncompatible(format!(
                                "field `{}`: incompatible types {} and {}",
                                existing.name, existing.data_type, incoming.data_type
                            ))
                        })?;
                    fields.push(StructField {
                        name: existing.name.clone(),
                        data_type: merged_type,
                        nullable: existing.nullable || incoming.nullable,
                        metadata: existing.metadata.clone(),
                    });
                }
                None => {
                    let mut widened = existing.clone();
                    widened.nullable = true;
                    fields.push(widened);
                }
            }
        }
        for incoming in &other.fields {
            if !seen.contains(&incoming.name) {
                let mut widened = incoming.clone();
                widened.nullable = true;
                fields.push(widened);
            }
        }
        Ok(StructType { fields })
    }
}

// ---------------------------------------------------------------------
// JSON (de)serialization, per spec §6's schema JSON shape.
// ---------------------------------------------------------------------

impl Serialize for StructType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        schema_to_json(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StructType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let json = Json::deserialize(deserializer)?;
        schema_from_json(&json).map_err(serde::de::Error::custom)
    }
}

fn schema_to_json(s: &StructType) -> Json {
    Json::Object(
        [
            ("type".to_string(), Json::String("struct".to_string())),
            (
                "fields".to_string(),
                Json::Array(s.fields.iter().map(field_to_json).collect()),
            ),
        ]
        .into_iter()
        .collect(),
    )
}

fn field_to_json(f: &StructField) -> Json {
    let mut meta = serde_json::Map::new();
    if let Some(id) = f.metadata.column_mapping_id {
        meta.insert("delta.columnMapping.id".to_string(), Json::from(id));
    }
    if let Some(name) = &f.metadata.physical_name {
        meta.insert(
            "delta.columnMapping.physicalName".to_string(),
            Json::String(name.clone()),
        );
    }
    Json::Object(
        [
            ("name".to_string(), Json::String(f.name.clone())),
            ("type".to_string(), data_type_to_json(&f.data_type)),
            ("nullable".to_string(), Json::Bool(f.nullable)),
            ("metadata".to_string(), Json::Object(meta)),
        ]
        .into_iter()
        .collect(),
    )
}

fn data_type_to_json(t: &DataType) -> Json {
    match t {
        DataType::Array(elem, contains_null) => Json::Object(
            [
                ("type".to_string(), Json::String("array".to_string())),
                ("elementType".to_string(), data_type_to_json(elem)),
                ("containsNull".to_string(), Json::Bool(*contains_null)),
            ]
            .into_iter()
            .collect(),
        ),
        DataType::Map(key, value, value_contains_null) => Json::Object(
            [
                ("type".to_string(), Json::String("map".to_string())),
                ("keyType".to_string(), data_type_to_json(key)),
                ("valueType".to_string(), data_type_to_json(value)),
                (
                    "valueContainsNull".to_string(),
                    Json::Bool(*value_contains_null),
                ),
            ]
            .into_iter()
            .collect(),
        ),
        DataType::Struct(s) => schema_to_json(s),
        DataType::Decimal(p, s) => Json::String(format!("decimal({p},{s})")),
        other => Json::String(other.type_name().to_string()),
    }
}

/// Parse a `schemaString` payload into a [`StructType`], per invariant I5: it
/// must describe a struct with named fields. An empty object `{}` is
/// permitted only for bootstrap metadata (callers that need that leniency
/// should catch `MalformedData` and substitute an empty [`StructType`]).
pub fn schema_from_json(json: &Json) -> DeltaResult<StructType> {
    let obj = json
        .as_object()
        .ok_or_else(|| Error::malformed("schema must be a JSON object"))?;
    if obj.is_empty() {
        return Ok(StructType::default());
    }
    let ty = obj
        .get("type")
        .and_then(Json::as_str)
        .ok_or_else(|| Error::malformed("schema object missing `type`"))?;
    if ty != "struct" {
        return Err(Error::malformed(format!(
            "top-level schema type must be `struct`, got `{ty}`"
        )));
    }
    let fields_json = obj
        .get("fields")
        .and_then(Json::as_array)
        .ok_or_else(|| Error::malformed("struct schema missing `fields` array"))?;
    let fields = fields_json
        .iter()
        .map(field_from_json)
        .collect::<DeltaResult<Vec<_>>>()?;
    Ok(StructType { fields })
}

fn field_from_json(json: &Json) -> DeltaResult<StructField> {
    let obj = json
        .as_object()
        .ok_or_else(|| Error::malformed("struct field must be a JSON object"))?;
    let name = obj
        .get("name")
        .and_then(Json::as_str)
        .ok_or_else(|| Error::malformed("struct field missing `name`"))?
        .to_string();
    let type_json = obj
        .get("type")
        .ok_or_else(|| Error::malformed(format!("field `{name}` missing `type`")))?;
    let data_type = data_type_from_json(type_json)?;
    let nullable = obj
        .get("nullable")
        .and_then(Json::as_bool)
        .ok_or_else(|| Error::malformed(format!("field `{name}` missing `nullable`")))?;
    let mut metadata = FieldMetadata::default();
    if let Some(meta_obj) = obj.get("metadata").and_then(Json::as_object) {
        metadata.column_mapping_id = meta_obj
            .get("delta.columnMapping.id")
            .and_then(Json::as_i64);
        metadata.physical_name = meta_obj
            .get("delta.columnMapping.physicalName")
            .and_then(Json::as_str)
            .map(str::to_string);
    }
    Ok(StructField {
        name,
        data_type,
        nullable,
        metadata,
    })
}

fn data_type_from_json(json: &Json) -> DeltaResult<DataType> {
    if let Some(s) = json.as_str() {
        return parse_type_atom(s);
    }
    let obj = json
        .as_object()
        .ok_or_else(|| Error::malformed("type must be a string or object"))?;
    let ty = obj
        .get("type")
        .and_then(Json::as_str)
        .ok_or_else(|| Error::malformed("complex type missing `type`"))?;
    match ty {
        "array" => {
            let elem = obj
                .get("elementType")
                .ok_or_else(|| Error::malformed("array type missing `elementType`"))?;
            let contains_null = obj
                .get("containsNull")
                .and_then(Json::as_bool)
                .ok_or_else(|| Error::malformed("array type missing `containsNull`"))?;
            Ok(DataType::Array(
                Box::new(data_type_from_json(elem)?),
                contains_null,
            ))
        }
        "map" => {
            let key = obj
                .get("keyType")
                .ok_or_else(|| Error::malformed("map type missing `keyType`"))?;
            let value = obj
                .get("valueType")
                .ok_or_else(|| Error::malformed("map type missing `valueType`"))?;
            let value_contains_null = obj
                .get("valueContainsNull")
                .and_then(Json::as_bool)
                .ok_or_else(|| Error::malformed("map type missing `valueContainsNull`"))?;
            Ok(DataType::Map(
                Box::new(data_type_from_json(key)?),
                Box::new(data_type_from_json(value)?),
                value_contains_null,
            ))
        }
        "struct" => Ok(DataType::Struct(schema_from_json(json)?)),
        other => Err(Error::malformed(format!("unknown complex type `{other}`"))),
    }
}

fn parse_type_atom(s: &str) -> DeltaResult<DataType> {
    if let Some(rest) = s.strip_prefix("decimal(").and_then(|r| r.strip_suffix(')')) {
        let (p, sc) = rest
            .split_once(',')
            .ok_or_else(|| Error::malformed(format!("invalid decimal type `{s}`")))?;
        let precision: u8 = p
            .trim()
            .parse()
            .map_err(|_| Error::malformed(format!("invalid decimal precision in `{s}`")))?;
        let scale: u8 = sc
            .trim()
            .parse()
            .map_err(|_| Error::malformed(format!("invalid decimal scale in `{s}`")))?;
        return Ok(DataType::Decimal(precision, scale));
    }
    Ok(match s {
        "boolean" => DataType::Boolean,
        "byte" => DataType::Byte,
        "short" => DataType::Short,
        "integer" => DataType::Integer,
        "long" => DataType::Long,
        "float" => DataType::Float,
        "double" => DataType::Double,
        "date" => DataType::Date,
        "timestamp" => DataType::Timestamp,
        "timestamp_ntz" => DataType::TimestampNtz,
        "string" => DataType::String,
        "binary" => DataType::Binary,
        "variant" => DataType::Variant,
        other => return Err(Error::malformed(format!("unknown type atom `{other}`"))),
    })
}

/// Infer a schema from a row batch (spec §4.4 step 3). Scans every row so
/// that a field which is `null` in early rows but typed in a later one is
/// still correctly typed; fields that are never non-null anywhere are typed
/// `string` and marked nullable.
pub fn infer_schema(rows: &[HashMap<String, Value>]) -> DeltaResult<StructType> {
    if rows.is_empty() {
        return Err(Error::validation("cannot infer a schema from an empty batch"));
    }
    let mut order: Vec<String> = Vec::new();
    let mut seen_order = std::collections::HashSet::new();
    let mut types: HashMap<String, Option<DataType>> = HashMap::new();
    let mut nullable: HashMap<String, bool> = HashMap::new();
    let mut present_everywhere: HashMap<String, bool> = HashMap::new();

    for row in rows {
        for key in row.keys() {
            if seen_order.insert(key.clone()) {
                order.push(key.clone());
                present_everywhere.insert(key.clone(), true);
            }
        }
    }

    for row in rows {
        for field in &order {
            match row.get(field) {
                None => {
                    nullable.insert(field.clone(), true);
                    present_everywhere.insert(field.clone(), false);
                }
                Some(Value::Null) => {
                    nullable.insert(field.clone(), true);
                }
                Some(v) => {
                    let observed = value_data_type(v);
                    let entry = types.entry(field.clone()).or_insert(None);
                    *entry = Some(match entry.take() {
                        None => observed,
                        Some(existing) => DataType::promote(&existing, &observed)
                            .unwrap_or(DataType::String),
                    });
                }
            }
        }
    }

    let fields = order
        .into_iter()
        .map(|name| {
            let data_type = types.remove(&name).flatten().unwrap_or(DataType::String);
            let is_nullable = *nullable.get(&name).unwrap_or(&false);
            StructField::new(name, data_type, is_nullable)
        })
        .collect();
    Ok(StructType { fields })
}

fn value_data_type(v: &Value) -> DataType {
    match v {
        Value::Null => DataType::String,
        Value::Bool(_) => DataType::Boolean,
        Value::I32(_) => DataType::Integer,
        Value::I64(_) => DataType::Long,
        Value::F32(_) => DataType::Float,
        Value::F64(_) => DataType::Double,
        Value::Str(_) => DataType::String,
        Value::Bytes(_) => DataType::Binary,
        Value::Instant(_) => DataType::Timestamp,
        Value::Variant(_) => DataType::Variant,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn round_trips_struct_schema_json() {
        let schema = StructType::new([
            StructField::new("id", DataType::String, false),
            StructField::new("n", DataType::Long, true),
        ]);
        let json = schema_to_json(&schema);
        let parsed = schema_from_json(&json).unwrap();
        assert_eq!(schema, parsed);
    }

    #[test]
    fn empty_object_is_valid_bootstrap_schema() {
        let parsed = schema_from_json(&serde_json::json!({})).unwrap();
        assert_eq!(parsed, StructType::default());
    }

    #[test]
    fn rejects_non_struct_schema() {
        let err = schema_from_json(&serde_json::json!({"type": "array"}));
        assert!(err.is_err());
    }

    #[test]
    fn infers_across_leading_nulls_and_promotes_int_to_double() {
        let mut r1 = HashMap::new();
        r1.insert("n".to_string(), Value::Null);
        let mut r2 = HashMap::new();
        r2.insert("n".to_string(), Value::I32(3));
        let mut r3 = HashMap::new();
        r3.insert("n".to_string(), Value::F64(1.5));

        let schema = infer_schema(&[r1, r2, r3]).unwrap();
        let field = schema.field("n").unwrap();
        assert_eq!(field.data_type, DataType::Double);
        assert!(field.nullable);
    }

    #[test]
    fn merge_compatible_widens_missing_fields_to_nullable() {
        let a = StructType::new([StructField::new("id", DataType::String, false)]);
        let b = StructType::new([StructField::new("n", DataType::Integer, false)]);
        let merged = a.merge_compatible(&b).unwrap();
        assert!(merged.field("id").unwrap().nullable);
        assert!(merged.field("n").unwrap().nullable);
    }

    #[test]
    fn merge_rejects_incompatible_types() {
        let a = StructType::new([StructField::new("id", DataType::String, false)]);
        let b = StructType::new([StructField::new("id", DataType::Boolean, false)]);
        assert!(a.merge_compatible(&b).is_err());
    }
}
