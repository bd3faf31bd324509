use crate::error::{EvalError, Result};
use crate::generation::ResponseGenerator;
use crate::models::{DataSource, EvaluationItem};
use crate::poll::Waiter;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;

/// Placeholder response for a row whose generation call failed
pub const GENERATION_ERROR_RESPONSE: &str = "Error generating response";

/// Context recorded when the agent retrieves its own context
pub const AGENT_CONTEXT: &str = "Context handled by agent.";

/// Pause before each generation call
pub const DEFAULT_ROW_DELAY: Duration = Duration::from_secs(2);

/// One input row of a local ground-truth file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceRecord {
    pub query: String,
    #[serde(default)]
    pub ground_truth: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
}

/// Wrap an uploaded dataset id as a data source
pub fn file_backed(dataset_id: impl Into<String>) -> DataSource {
    DataSource::FileId(dataset_id.into())
}

/// Parse JSONL records; blank lines are skipped
pub fn parse_records(content: &str) -> Result<Vec<SourceRecord>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| {
                EvalError::config(format!("invalid record on line {}: {e}", index + 1))
            })
        })
        .collect()
}

/// Read JSONL records from a local file
pub fn read_records(path: &Path) -> Result<Vec<SourceRecord>> {
    let content = std::fs::read_to_string(path).map_err(|source| EvalError::InputFile {
        path: path.to_path_buf(),
        source,
    })?;
    parse_records(&content)
}

/// Generates one evaluation item per source record, in order
pub struct InlineGenerator<'a, G: ?Sized, W: ?Sized> {
    generator: &'a G,
    waiter: &'a W,
    row_delay: Duration,
}

impl<'a, G, W> InlineGenerator<'a, G, W>
where
    G: ResponseGenerator + ?Sized,
    W: Waiter + ?Sized,
{
    pub fn new(generator: &'a G, waiter: &'a W) -> Self {
        Self {
            generator,
            waiter,
            row_delay: DEFAULT_ROW_DELAY,
        }
    }

    pub fn with_row_delay(mut self, row_delay: Duration) -> Self {
        self.row_delay = row_delay;
        self
    }

    /// Generate responses for every record. A failed call keeps the row with a placeholder response.
    pub async fn generate(&self, records: &[SourceRecord]) -> Vec<EvaluationItem> {
        let total = records.len();
        let mut items = Vec::with_capacity(total);

        for (index, record) in records.iter().enumerate() {
            self.waiter.wait(self.row_delay).await;

            let response = match self.generator.generate(&record.query).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(row = index + 1, error = %e, "error generating response");
                    GENERATION_ERROR_RESPONSE.to_string()
                }
            };
            tracing::info!(
                row = index + 1,
                total,
                query = %preview(&record.query),
                response = %preview(&response),
                "generated response"
            );

            items.push(EvaluationItem {
                query: record.query.clone(),
                response,
                context: Some(
                    record
                        .context
                        .clone()
                        .unwrap_or_else(|| AGENT_CONTEXT.to_string()),
                ),
                ground_truth: record.ground_truth.clone(),
            });
        }

        items
    }
}

/// First 30 characters, for log lines
fn preview(text: &str) -> String {
    match text.char_indices().nth(30) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

impl DataSource {
    /// Wire form of the run's `data_source`
    pub fn to_payload(&self) -> Value {
        let source = match self {
            Self::FileId(id) => json!({"type": "file_id", "id": id}),
            Self::Inline(items) => {
                let content: Vec<Value> = items.iter().map(|item| json!({"item": item})).collect();
                json!({"type": "file_content", "content": content})
            }
        };
        json!({"type": "jsonl", "source": source})
    }
}
