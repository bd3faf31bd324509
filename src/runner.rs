use crate::client::EvalService;
use crate::config::EvaluatorsFile;
use crate::data_source::{self, DEFAULT_ROW_DELAY, InlineGenerator, SourceRecord};
use crate::definition::{DefinitionBuilder, batch_preset, rag_preset};
use crate::error::{EvalError, Result};
use crate::generation::ResponseGenerator;
use crate::models::{
    DataSource, EvaluationDefinition, EvaluatorSpec, EvaluatorSummary, ItemSchema, RunHandle,
};
use crate::output;
use crate::poll::{PollPolicy, Waiter, poll_until_terminal};
use crate::workflow::{self, CollectOutcome};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DATASET_VERSION: &str = "1";
pub const RAG_EVAL_NAME: &str = "rag-eval-custom";
pub const RAG_RUN_NAME: &str = "rag-eval-run-inline";

/// Where the rows of a batch evaluation come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetInput {
    /// A dataset uploaded by an earlier step
    Existing(String),
    /// A local JSONL file, uploaded before the run
    Upload(PathBuf),
}

/// Knobs shared by both workflows
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Deployment the built-in evaluators grade with
    pub deployment_name: String,
    pub poll: PollPolicy,
    pub output_dir: PathBuf,
    pub row_delay: Duration,
    /// Replaces the workflow's built-in evaluator preset
    pub evaluators: Option<EvaluatorsFile>,
}

impl RunOptions {
    pub fn new(deployment_name: impl Into<String>) -> Self {
        Self {
            deployment_name: deployment_name.into(),
            poll: PollPolicy::default(),
            output_dir: PathBuf::from("."),
            row_delay: DEFAULT_ROW_DELAY,
            evaluators: None,
        }
    }
}

/// Outcome of one submit/poll/collect cycle
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub eval_id: String,
    pub run: RunHandle,
    pub collection: CollectOutcome,
    pub summary: Vec<EvaluatorSummary>,
}

/// Orchestrates an evaluation workflow against one service
pub struct Runner<'a, S: ?Sized, W: ?Sized> {
    service: &'a S,
    waiter: &'a W,
    options: RunOptions,
    timestamp: String,
}

impl<'a, S, W> Runner<'a, S, W>
where
    S: EvalService + ?Sized,
    W: Waiter + ?Sized,
{
    /// Create a runner; names and artifacts are stamped with the current UTC time
    pub fn new(service: &'a S, waiter: &'a W, options: RunOptions) -> Self {
        Self {
            service,
            waiter,
            options,
            timestamp: chrono::Utc::now().format("%Y%m%d%H%M%S").to_string(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// Build a definition from the evaluators file when given, else from `preset`
    fn definition(
        &self,
        name: &str,
        preset: fn(&str) -> (ItemSchema, Vec<EvaluatorSpec>),
    ) -> Result<EvaluationDefinition> {
        let (mut schema, mut evaluators) = preset(&self.options.deployment_name);

        if let Some(file) = &self.options.evaluators {
            evaluators = file.evaluator_specs(&self.options.deployment_name);
            if let Some(custom) = &file.schema {
                schema = custom.clone();
            }
        }

        DefinitionBuilder::new(name)
            .schema(schema)
            .evaluators(evaluators)
            .build()
    }

    /// Evaluate an uploaded (or to-be-uploaded) dataset
    pub async fn run_batch(&self, dataset: &DatasetInput) -> Result<WorkflowReport> {
        let definition = self.definition(&format!("cloud-eval-{}", self.timestamp), batch_preset)?;

        let dataset_id = match dataset {
            DatasetInput::Existing(id) => id.clone(),
            DatasetInput::Upload(path) => self.upload(path).await?,
        };

        let run_name = format!("cloud-eval-run-{}", self.timestamp);
        let (created, run) = workflow::submit(
            self.service,
            &definition,
            &run_name,
            &data_source::file_backed(dataset_id),
        )
        .await?;

        self.finish(created.id, run).await
    }

    /// Generate responses for `records`, then evaluate them inline
    pub async fn run_rag<G>(&self, records: &[SourceRecord], generator: &G) -> Result<WorkflowReport>
    where
        G: ResponseGenerator + ?Sized,
    {
        let definition = self.definition(RAG_EVAL_NAME, rag_preset)?;
        if records.is_empty() {
            return Err(EvalError::config("no records to evaluate"));
        }

        tracing::info!(rows = records.len(), "generating responses");
        let items = InlineGenerator::new(generator, self.waiter)
            .with_row_delay(self.options.row_delay)
            .generate(records)
            .await;

        let (created, run) = workflow::submit(
            self.service,
            &definition,
            RAG_RUN_NAME,
            &DataSource::Inline(items),
        )
        .await?;

        self.finish(created.id, run).await
    }

    async fn upload(&self, path: &Path) -> Result<String> {
        if !path.is_file() {
            return Err(EvalError::InputFile {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "data file not found"),
            });
        }

        let name = format!("dataset-test-eval-{}", self.timestamp);
        tracing::info!(dataset = %name, version = DATASET_VERSION, "uploading dataset");
        let dataset = self
            .service
            .upload_dataset(&name, DATASET_VERSION, path)
            .await?;
        tracing::info!(id = %dataset.id, name = %dataset.name, version = %dataset.version, "dataset ready");
        Ok(dataset.id)
    }

    async fn finish(&self, eval_id: String, run: RunHandle) -> Result<WorkflowReport> {
        let run = poll_until_terminal(self.service, self.waiter, self.options.poll, run).await?;
        let (collection, items) =
            workflow::collect(self.service, &run, &self.options.output_dir, &self.timestamp).await;

        Ok(WorkflowReport {
            eval_id,
            run,
            collection,
            summary: output::summarize(&items),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluatorEntry;
    use crate::models::RunStatus;
    use crate::poll::tests::CountingWaiter;
    use crate::workflow::tests::RecordingService;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::io::Write;
    use tempfile::{NamedTempFile, tempdir};

    struct EchoGenerator;

    #[async_trait]
    impl ResponseGenerator for EchoGenerator {
        async fn generate(&self, query: &str) -> Result<String> {
            Ok(format!("answer to {query}"))
        }
    }

    fn options(output_dir: &Path) -> RunOptions {
        let mut options = RunOptions::new("gpt-4o");
        options.output_dir = output_dir.to_path_buf();
        options.row_delay = Duration::from_millis(1);
        options
    }

    #[tokio::test]
    async fn test_batch_with_existing_dataset() {
        let service = RecordingService::default();
        let waiter = CountingWaiter::default();
        let dir = tempdir().unwrap();

        let report = Runner::new(&service, &waiter, options(dir.path()))
            .with_timestamp("20261019070000")
            .run_batch(&DatasetInput::Existing("file-123".to_string()))
            .await
            .unwrap();

        assert_eq!(report.eval_id, "eval_1");
        assert_eq!(report.run.status, RunStatus::Completed);
        assert_eq!(
            report.collection,
            CollectOutcome::Saved {
                path: dir.path().join("eval_results_20261019070000.json"),
                items: 2,
            }
        );
        assert_eq!(report.summary.len(), 1);
        assert_eq!(report.summary[0].pass_rate, Some(0.5));
        assert_eq!(
            service.calls(),
            vec![
                "evals.create",
                "evals.runs.create",
                "evals.runs.retrieve",
                "evals.runs.output_items.list"
            ]
        );
    }

    #[tokio::test]
    async fn test_batch_uploads_local_file_first() {
        let service = RecordingService::default();
        let waiter = CountingWaiter::default();
        let dir = tempdir().unwrap();
        let mut data = NamedTempFile::new().unwrap();
        writeln!(data, r#"{{"query": "q", "response": "r"}}"#).unwrap();

        Runner::new(&service, &waiter, options(dir.path()))
            .run_batch(&DatasetInput::Upload(data.path().to_path_buf()))
            .await
            .unwrap();

        assert_eq!(service.calls()[0], "datasets.upload");
    }

    #[tokio::test]
    async fn test_batch_missing_file_fails_before_remote_calls() {
        let service = RecordingService::default();
        let waiter = CountingWaiter::default();
        let dir = tempdir().unwrap();

        let err = Runner::new(&service, &waiter, options(dir.path()))
            .run_batch(&DatasetInput::Upload(PathBuf::from("/nonexistent/data.jsonl")))
            .await
            .unwrap_err();

        assert!(err.is_config());
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_run_is_not_collected() {
        let service = RecordingService {
            retrieve_status: Some(RunStatus::Failed),
            ..Default::default()
        };
        let waiter = CountingWaiter::default();
        let dir = tempdir().unwrap();

        let report = Runner::new(&service, &waiter, options(dir.path()))
            .run_batch(&DatasetInput::Existing("file-123".to_string()))
            .await
            .unwrap();

        assert_eq!(
            report.collection,
            CollectOutcome::Skipped {
                status: RunStatus::Failed
            }
        );
        assert!(report.summary.is_empty());
        assert!(!service.calls().contains(&"evals.runs.output_items.list"));
    }

    #[tokio::test]
    async fn test_rag_generates_then_submits_inline() {
        let service = RecordingService::default();
        let waiter = CountingWaiter::default();
        let dir = tempdir().unwrap();
        let records = data_source::parse_records(
            "{\"query\": \"a\", \"ground_truth\": \"x\"}\n{\"query\": \"b\"}\n",
        )
        .unwrap();

        let report = Runner::new(&service, &waiter, options(dir.path()))
            .run_rag(&records, &EchoGenerator)
            .await
            .unwrap();

        assert_eq!(report.run.status, RunStatus::Completed);
        // two row delays plus one poll wait
        assert_eq!(
            waiter.waits.load(std::sync::atomic::Ordering::SeqCst),
            3
        );
        assert_eq!(service.calls()[0], "evals.create");
    }

    #[tokio::test]
    async fn test_empty_evaluators_file_is_rejected() {
        let service = RecordingService::default();
        let waiter = CountingWaiter::default();
        let dir = tempdir().unwrap();
        let mut opts = options(dir.path());
        opts.evaluators = Some(EvaluatorsFile {
            schema: None,
            evaluators: vec![],
        });

        let err = Runner::new(&service, &waiter, opts)
            .run_batch(&DatasetInput::Existing("file-123".to_string()))
            .await
            .unwrap_err();

        assert!(err.is_config());
        assert!(service.calls().is_empty());
    }

    #[test]
    fn test_evaluators_file_overrides_preset() {
        let service = RecordingService::default();
        let waiter = CountingWaiter::default();
        let mut opts = RunOptions::new("gpt-4o");
        let mut data_mapping = BTreeMap::new();
        data_mapping.insert("response".to_string(), "{{item.response}}".to_string());
        opts.evaluators = Some(EvaluatorsFile {
            schema: None,
            evaluators: vec![EvaluatorEntry {
                name: "fluency".to_string(),
                evaluator_name: "builtin.fluency".to_string(),
                data_mapping,
                initialization_parameters: BTreeMap::new(),
            }],
        });

        let runner = Runner::new(&service, &waiter, opts);
        let definition = runner.definition(RAG_EVAL_NAME, rag_preset).unwrap();
        assert_eq!(definition.evaluators.len(), 1);
        assert_eq!(definition.evaluators[0].name, "fluency");
        assert_eq!(definition.schema.required, vec!["query", "response", "context"]);
    }
}
