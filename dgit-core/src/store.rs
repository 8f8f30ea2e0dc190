//! Interfaces to the relational dataset store and the record serializer
//!
//! Both are owned by the host application. Calls are synchronous and may
//! block; the engine only invokes them from blocking tasks or between
//! object store operations.

use serde_json::Value;

use crate::model::{CategoryInfo, CategoryPath, DatasetDescriptor, DatasetState, ModelType};

/// Read access to the live dataset
pub trait DatasetStore: Send + Sync {
    /// Model types that currently hold at least one dataset or category
    fn model_types(&self) -> anyhow::Result<Vec<ModelType>>;

    /// Direct child categories of `parent`
    fn child_categories(&self, model_type: ModelType, parent: &CategoryPath) -> anyhow::Result<Vec<CategoryInfo>>;

    /// Datasets placed directly in `category`
    fn datasets(&self, model_type: ModelType, category: &CategoryPath) -> anyhow::Result<Vec<DatasetDescriptor>>;

    /// Full record and its version stamp, `None` if the dataset is gone
    fn record(&self, model_type: ModelType, ref_id: &str) -> anyhow::Result<Option<(DatasetState, Value)>>;
}

/// Turns a record into the bytes stored in a blob.
///
/// Must be deterministic: the same record always yields the same bytes.
pub trait RecordSerializer: Send + Sync {
    fn serialize(&self, model_type: ModelType, record: &Value) -> anyhow::Result<Vec<u8>>;
}

/// Pretty-printed JSON with a trailing newline
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl RecordSerializer for JsonSerializer {
    fn serialize(&self, _model_type: ModelType, record: &Value) -> anyhow::Result<Vec<u8>> {
        let mut data = serde_json::to_vec_pretty(record)?;
        data.push(b'\n');
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_serializer_is_stable() {
        let record = json!({"@id": "rec1", "name": "Steel", "version": 3});
        let a = JsonSerializer.serialize(ModelType::Flow, &record).unwrap();
        let b = JsonSerializer.serialize(ModelType::Flow, &record.clone()).unwrap();
        assert_eq!(a, b);
        assert!(a.ends_with(b"\n"));
        let parsed: Value = serde_json::from_slice(&a).unwrap();
        assert_eq!(parsed, record);
    }
}
