//! Input document shapes
//!
//! Datasets arrive in a handful of layouts. The records are pulled out for
//! partitioning and the surrounding envelope is kept so the combined output
//! can be written back in the same layout:
//!
//! - a top-level array of records
//! - an object with a `data` array
//! - an object whose first array-valued field holds the records
//! - a single object, treated as one record

use crate::error::{PipelineError, Result};
use crate::record::Record;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

const DATA_FIELD: &str = "data";

/// Layout of the input document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentShape {
    List,
    /// Records live in `field`; `envelope` is the rest of the object with that
    /// field emptied
    Field { field: String, envelope: Value },
    Single,
}

impl DocumentShape {
    /// Rebuild a document of this shape around `payloads`
    pub fn wrap(&self, payloads: Vec<Value>) -> Value {
        match self {
            DocumentShape::List => Value::Array(payloads),
            DocumentShape::Field { field, envelope } => {
                let mut document = envelope.clone();
                if let Some(object) = document.as_object_mut() {
                    object.insert(field.clone(), Value::Array(payloads));
                }
                document
            },
            DocumentShape::Single => payloads
                .into_iter()
                .next()
                .unwrap_or_else(|| Value::Object(Map::new())),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            DocumentShape::List => "list".to_string(),
            DocumentShape::Field { field, .. } => format!("object field '{}'", field),
            DocumentShape::Single => "single object".to_string(),
        }
    }
}

/// Parsed input: its shape plus the records in input order
#[derive(Debug, Clone)]
pub struct InputDocument {
    pub shape: DocumentShape,
    pub records: Vec<Record>,
}

impl InputDocument {
    /// Read and split a JSON document from disk
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PipelineError::configuration(format!(
                "input file not found: {}",
                path.display()
            )));
        }

        let value: Value = polish_common::fs::read_json(path)?;
        Ok(Self::from_value(value))
    }

    /// Split an in-memory document into shape and records
    pub fn from_value(value: Value) -> Self {
        let (shape, items) = match value {
            Value::Array(items) => (DocumentShape::List, items),
            Value::Object(mut object) => match list_field(&object) {
                Some(field) => {
                    let items = match object.insert(field.clone(), Value::Array(Vec::new())) {
                        Some(Value::Array(items)) => items,
                        _ => Vec::new(),
                    };
                    let shape = DocumentShape::Field {
                        field,
                        envelope: Value::Object(object),
                    };
                    (shape, items)
                },
                None => (DocumentShape::Single, vec![Value::Object(object)]),
            },
            other => (DocumentShape::Single, vec![other]),
        };

        let records = items
            .into_iter()
            .enumerate()
            .map(|(original_index, payload)| Record {
                original_index,
                payload,
            })
            .collect();

        Self { shape, records }
    }
}

fn list_field(object: &Map<String, Value>) -> Option<String> {
    if matches!(object.get(DATA_FIELD), Some(Value::Array(_))) {
        return Some(DATA_FIELD.to_string());
    }
    object
        .iter()
        .find(|(_, value)| value.is_array())
        .map(|(key, _)| key.clone())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_document() {
        let doc = InputDocument::from_value(json!([{"output": "a"}, {"output": "b"}]));

        assert_eq!(doc.shape, DocumentShape::List);
        assert_eq!(doc.records.len(), 2);
        assert_eq!(doc.records[1].original_index, 1);
        assert_eq!(doc.records[1].payload["output"], "b");
    }

    #[test]
    fn test_data_field_preferred_over_other_lists() {
        let doc = InputDocument::from_value(json!({
            "tags": ["x"],
            "version": 2,
            "data": [{"output": "a"}]
        }));

        match &doc.shape {
            DocumentShape::Field { field, envelope } => {
                assert_eq!(field, "data");
                assert_eq!(envelope["version"], 2);
                assert_eq!(envelope["data"], json!([]));
            },
            other => panic!("unexpected shape {:?}", other),
        }
        assert_eq!(doc.records.len(), 1);
    }

    #[test]
    fn test_first_list_field() {
        let doc = InputDocument::from_value(json!({
            "name": "vulns",
            "entries": [{"output": "a"}, {"output": "b"}],
            "other": [1]
        }));

        assert!(matches!(&doc.shape, DocumentShape::Field { field, .. } if field == "entries"));
        assert_eq!(doc.records.len(), 2);
    }

    #[test]
    fn test_single_object() {
        let doc = InputDocument::from_value(json!({"output": "only"}));

        assert_eq!(doc.shape, DocumentShape::Single);
        assert_eq!(doc.records.len(), 1);
        assert_eq!(doc.shape.wrap(vec![json!({"output": "better"})]), json!({"output": "better"}));
    }

    #[test]
    fn test_wrap_restores_envelope() {
        let doc = InputDocument::from_value(json!({"name": "vulns", "data": [{"output": "a"}]}));
        let wrapped = doc.shape.wrap(vec![json!({"output": "A"})]);

        assert_eq!(wrapped, json!({"name": "vulns", "data": [{"output": "A"}]}));
    }

    #[test]
    fn test_missing_input_is_configuration_error() {
        let err = InputDocument::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
