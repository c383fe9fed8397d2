//! Record streams and schema conformance
//!
//! Records travel as `serde_json::Value` objects from a [`RecordSource`] to
//! the materializer. Each record is checked against the target Arrow schema
//! before serialization so a mismatch names the offending field instead of
//! being coerced.

use crate::error::{EtlError, Result};
use crate::sra::mirror::MirrorEntry;
use arrow::datatypes::{DataType, Field, Fields, Schema};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;

pub type Record = Value;

/// Lazy, finite stream of records
pub type RecordStream = BoxStream<'static, Result<Record>>;

/// Produces the records behind one input (a mirror entry by default). Each
/// call to `open` starts a fresh pass over the resource.
#[async_trait]
pub trait RecordSource<E: Sync = MirrorEntry>: Send + Sync {
    async fn open(&self, entry: &E) -> Result<RecordStream>;
}

/// Stream over records already in memory
pub fn records_from_vec(records: Vec<Record>) -> RecordStream {
    stream::iter(records.into_iter().map(Ok)).boxed()
}

/// Check a record against `schema`. Absent keys count as null, unknown keys
/// are ignored.
pub fn validate_record(schema: &Schema, record: &Value) -> Result<()> {
    let obj = record
        .as_object()
        .ok_or_else(|| EtlError::schema("$", format!("expected object, found {}", kind(record))))?;
    for field in schema.fields() {
        let value = obj.get(field.name()).unwrap_or(&Value::Null);
        validate_value(field, value, field.name())?;
    }
    Ok(())
}

fn validate_value(field: &Field, value: &Value, path: &str) -> Result<()> {
    if value.is_null() {
        if field.is_nullable() {
            return Ok(());
        }
        return Err(EtlError::schema(path, "required field is absent or null"));
    }

    let ok = match field.data_type() {
        DataType::Utf8 | DataType::LargeUtf8 => value.is_string(),
        DataType::Boolean => value.is_boolean(),
        DataType::Int32 => value
            .as_i64()
            .map(|v| i32::try_from(v).is_ok())
            .unwrap_or(false),
        DataType::Int64 => value.as_i64().is_some(),
        DataType::Float32 | DataType::Float64 => value.is_number(),
        DataType::List(item) | DataType::LargeList(item) => {
            let items = value.as_array().ok_or_else(|| mismatch(path, "list", value))?;
            for (i, v) in items.iter().enumerate() {
                validate_value(item, v, &format!("{}[{}]", path, i))?;
            }
            true
        },
        DataType::Struct(children) => {
            validate_struct(children, value, path)?;
            true
        },
        other => {
            return Err(EtlError::schema(path, format!("unsupported column type {}", other)));
        },
    };

    if ok {
        Ok(())
    } else {
        Err(mismatch(path, &field.data_type().to_string(), value))
    }
}

fn validate_struct(children: &Fields, value: &Value, path: &str) -> Result<()> {
    let obj = value.as_object().ok_or_else(|| mismatch(path, "struct", value))?;
    for child in children {
        let v = obj.get(child.name()).unwrap_or(&Value::Null);
        validate_value(child, v, &format!("{}.{}", path, child.name()))?;
    }
    Ok(())
}

fn mismatch(path: &str, expected: &str, found: &Value) -> EtlError {
    EtlError::schema(path, format!("expected {}, found {}", expected, kind(found)))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
