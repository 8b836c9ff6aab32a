//! Records, fragments and the field conventions used to mark them

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 1-based fragment identity, shared by the worker that owns the fragment
///
/// It is also the stable index under which the fragment's input file and
/// checkpoint are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(u32);

impl FragmentId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Fragment id for the zero-based position in the manifest
    pub fn from_position(position: usize) -> Self {
        Self(position as u32 + 1)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for FragmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One input record and its stable position in the full input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub original_index: usize,
    pub payload: Value,
}

/// How a record left the processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordOutcome {
    /// Target field replaced with generated text
    Enhanced,
    /// Retries exhausted, original payload kept and tagged
    Failed { error: String },
    /// Not processed yet (partial combine only)
    Pending,
}

/// A record after processing, carrying its output payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedRecord {
    pub original_index: usize,
    pub payload: Value,
    #[serde(flatten)]
    pub outcome: RecordOutcome,
}

impl EnhancedRecord {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, RecordOutcome::Failed { .. })
    }
}

/// Contiguous slice of the input owned by one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub fragment_id: FragmentId,
    /// `original_index` of the first record
    pub start_index: usize,
    pub records: Vec<Record>,
}

impl Fragment {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `original_index` one past the last record
    pub fn end_index(&self) -> usize {
        self.start_index + self.records.len()
    }
}

/// Names of the payload fields the pipeline reads and writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Field whose text is sent for enhancement and replaced
    pub target_field: String,
    /// Field passed to the prompt as context (e.g. the code sample)
    pub context_field: String,
    /// Field added to a record whose enhancement failed
    pub error_field: String,
    /// Field added to a record not processed yet in a partial combine
    pub pending_field: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            target_field: "output".to_string(),
            context_field: "input".to_string(),
            error_field: "enhancement_error".to_string(),
            pending_field: "enhancement_pending".to_string(),
        }
    }
}

impl FieldMapping {
    /// Text of the field to enhance, empty when absent or not a string
    pub fn target_text<'a>(&self, payload: &'a Value) -> &'a str {
        payload
            .get(&self.target_field)
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Text of the context field, empty when absent or not a string
    pub fn context_text<'a>(&self, payload: &'a Value) -> &'a str {
        payload
            .get(&self.context_field)
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Payload with the target field replaced by `text`
    pub fn enhanced(&self, record: &Record, text: String) -> EnhancedRecord {
        let mut payload = record.payload.clone();
        if let Some(object) = payload.as_object_mut() {
            object.insert(self.target_field.clone(), Value::String(text));
        }
        EnhancedRecord {
            original_index: record.original_index,
            payload,
            outcome: RecordOutcome::Enhanced,
        }
    }

    /// Original payload tagged with the error marker
    pub fn failed(&self, record: &Record, error: String) -> EnhancedRecord {
        let mut payload = record.payload.clone();
        if let Some(object) = payload.as_object_mut() {
            object.insert(self.error_field.clone(), Value::String(error.clone()));
        }
        EnhancedRecord {
            original_index: record.original_index,
            payload,
            outcome: RecordOutcome::Failed { error },
        }
    }

    /// Original payload tagged as not yet enhanced
    pub fn pending(&self, record: &Record) -> EnhancedRecord {
        let mut payload = record.payload.clone();
        if let Some(object) = payload.as_object_mut() {
            object.insert(self.pending_field.clone(), Value::Bool(true));
        }
        EnhancedRecord {
            original_index: record.original_index,
            payload,
            outcome: RecordOutcome::Pending,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Record {
        Record {
            original_index: 7,
            payload: json!({"id": "CVE-1", "input": "strcpy(buf, s);", "output": "bad copy"}),
        }
    }

    #[test]
    fn test_enhanced_replaces_only_target_field() {
        let fields = FieldMapping::default();
        let enhanced = fields.enhanced(&record(), "Unbounded copy into buf".to_string());

        assert_eq!(enhanced.original_index, 7);
        assert_eq!(enhanced.payload["output"], "Unbounded copy into buf");
        assert_eq!(enhanced.payload["id"], "CVE-1");
        assert_eq!(enhanced.payload["input"], "strcpy(buf, s);");
        assert_eq!(enhanced.outcome, RecordOutcome::Enhanced);
    }

    #[test]
    fn test_failed_keeps_original_and_tags_error() {
        let fields = FieldMapping::default();
        let failed = fields.failed(&record(), "connection refused".to_string());

        assert_eq!(failed.payload["output"], "bad copy");
        assert_eq!(failed.payload["enhancement_error"], "connection refused");
        assert!(failed.is_failed());
    }

    #[test]
    fn test_pending_marker() {
        let fields = FieldMapping::default();
        let pending = fields.pending(&record());

        assert_eq!(pending.payload["enhancement_pending"], true);
        assert_eq!(pending.outcome, RecordOutcome::Pending);
    }

    #[test]
    fn test_field_text_defaults_to_empty() {
        let fields = FieldMapping::default();
        let payload = json!({"output": 42});

        assert_eq!(fields.target_text(&payload), "");
        assert_eq!(fields.context_text(&payload), "");
    }

    #[test]
    fn test_enhanced_record_serialization_is_flat() {
        let fields = FieldMapping::default();
        let failed = fields.failed(&record(), "timeout".to_string());
        let value = serde_json::to_value(&failed).unwrap();

        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"], "timeout");
        assert_eq!(value["original_index"], 7);

        let back: EnhancedRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, failed);
    }

    #[test]
    fn test_fragment_id_from_position() {
        assert_eq!(FragmentId::from_position(0), FragmentId::new(1));
        assert_eq!(FragmentId::from_position(3).to_string(), "4");
    }
}
