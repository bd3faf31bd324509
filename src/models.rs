use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// One row of input data scored by the remote evaluators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationItem {
    pub query: String,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<String>,
}

/// How one remote scoring function reads an `EvaluationItem`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorSpec {
    /// Name of the criterion inside the definition
    pub name: String,
    /// Remote evaluator identifier, e.g. `builtin.relevance`
    pub evaluator_kind: String,
    /// Evaluator input name -> `{{item.<field>}}` template, passed through unevaluated
    pub field_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub init_parameters: BTreeMap<String, Value>,
}

/// Shape of an `EvaluationItem` as announced to the service
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ItemSchema {
    /// String-typed properties
    pub properties: Vec<String>,
    #[serde(default)]
    pub required: Vec<String>,
}

/// An evaluation definition request; immutable once built
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationDefinition {
    pub name: String,
    pub schema: ItemSchema,
    pub evaluators: Vec<EvaluatorSpec>,
}

/// Reference to a definition created on the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionRef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Lifecycle state of a remote evaluation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal statuses admit no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<String> for RunStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "queued" => Self::Queued,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            // in_progress, running and anything newer the service reports
            _ => Self::Running,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-side reference to a remote evaluation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHandle {
    pub id: String,
    pub eval_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub report_url: Option<String>,
}

/// Score of one evaluator for one output item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputResult {
    pub name: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub passed: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Remote-computed scoring result for one `EvaluationItem`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputItem {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub datasource_item_id: Option<u64>,
    #[serde(default)]
    pub results: Vec<OutputResult>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Uploaded dataset file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRef {
    pub id: String,
    pub name: String,
    pub version: String,
}

/// Rows handed to a run: an uploaded file or inline items
#[derive(Debug, Clone, PartialEq)]
pub enum DataSource {
    FileId(String),
    Inline(Vec<EvaluationItem>),
}

impl DataSource {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::FileId(id) => id.trim().is_empty(),
            Self::Inline(items) => items.is_empty(),
        }
    }

    pub fn len_hint(&self) -> Option<usize> {
        match self {
            Self::FileId(_) => None,
            Self::Inline(items) => Some(items.len()),
        }
    }
}

/// Per-evaluator aggregate over the collected output items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorSummary {
    pub name: String,
    pub scored: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    /// Share of items with `passed == true` among those reporting it
    pub pass_rate: Option<f64>,
}
