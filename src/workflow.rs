use crate::client::EvalService;
use crate::error::{EvalError, Result};
use crate::models::{
    DataSource, DefinitionRef, EvaluationDefinition, OutputItem, RunHandle, RunStatus,
};
use crate::output;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Create the definition and start one run over `data_source`.
///
/// Nothing is sent when the definition has no evaluators or the data source
/// is empty. Remote rejections propagate without retry.
pub async fn submit<S>(
    service: &S,
    definition: &EvaluationDefinition,
    run_name: &str,
    data_source: &DataSource,
) -> Result<(DefinitionRef, RunHandle)>
where
    S: EvalService + ?Sized,
{
    if definition.evaluators.is_empty() {
        return Err(EvalError::config("evaluation definition has no evaluators"));
    }
    if data_source.is_empty() {
        return Err(EvalError::config("data source is empty"));
    }

    tracing::info!(name = %definition.name, "creating evaluation definition");
    let created = service.create_eval(definition).await?;

    tracing::info!(eval_id = %created.id, name = ?created.name, "evaluation definition ready");
    tracing::info!(eval_id = %created.id, run_name, rows = ?data_source.len_hint(), "starting evaluation run");
    let run = service.create_run(&created.id, run_name, data_source).await?;
    tracing::info!(run_id = %run.id, report_url = ?run.report_url, "evaluation run submitted");

    Ok((created, run))
}

/// What happened when results were collected for a finished run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CollectOutcome {
    /// Output items were written to `path`
    Saved { path: PathBuf, items: usize },
    /// The run did not complete, so nothing was fetched
    Skipped { status: RunStatus },
    /// Fetching or writing failed; the run's status is unaffected
    FetchFailed { message: String },
}

/// Fetch a completed run's output items and persist them under `output_dir`
pub async fn collect<S>(
    service: &S,
    run: &RunHandle,
    output_dir: &Path,
    timestamp: &str,
) -> (CollectOutcome, Vec<OutputItem>)
where
    S: EvalService + ?Sized,
{
    if run.status != RunStatus::Completed {
        tracing::info!(run_id = %run.id, status = %run.status, "run did not complete, skipping result collection");
        return (CollectOutcome::Skipped { status: run.status }, Vec::new());
    }

    let items = match service.list_output_items(&run.id, &run.eval_id).await {
        Ok(items) => items,
        Err(e) => {
            tracing::error!(run_id = %run.id, error = %e, "failed to retrieve results");
            return (
                CollectOutcome::FetchFailed {
                    message: e.to_string(),
                },
                Vec::new(),
            );
        }
    };

    match output::write_results(output_dir, timestamp, &items) {
        Ok(path) => {
            tracing::info!(path = %path.display(), items = items.len(), "evaluation results saved");
            let count = items.len();
            (CollectOutcome::Saved { path, items: count }, items)
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to save results");
            (
                CollectOutcome::FetchFailed {
                    message: e.to_string(),
                },
                items,
            )
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::definition::{DefinitionBuilder, rag_preset};
    use crate::models::{DatasetRef, EvaluationItem, OutputResult};
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Records every call; scripted to fail selected operations
    #[derive(Default)]
    pub(crate) struct RecordingService {
        pub calls: Mutex<Vec<&'static str>>,
        pub reject_create_eval: bool,
        pub fail_output_items: bool,
        pub retrieve_status: Option<RunStatus>,
    }

    impl RecordingService {
        pub fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }
    }

    pub(crate) fn scored_item(id: &str, score: f64, passed: bool) -> OutputItem {
        OutputItem {
            id: id.to_string(),
            status: Some(if passed { "pass" } else { "fail" }.to_string()),
            datasource_item_id: None,
            results: vec![OutputResult {
                name: "relevance".to_string(),
                score: Some(score),
                passed: Some(passed),
                extra: Map::new(),
            }],
            extra: Map::new(),
        }
    }

    #[async_trait]
    impl EvalService for RecordingService {
        async fn upload_dataset(&self, name: &str, version: &str, _: &Path) -> Result<DatasetRef> {
            self.record("datasets.upload");
            Ok(DatasetRef {
                id: format!("file-{name}"),
                name: name.to_string(),
                version: version.to_string(),
            })
        }

        async fn create_eval(&self, definition: &EvaluationDefinition) -> Result<DefinitionRef> {
            self.record("evals.create");
            if self.reject_create_eval {
                return Err(EvalError::Remote {
                    operation: "evals.create",
                    status: Some(400),
                    message: "malformed schema".to_string(),
                });
            }
            Ok(DefinitionRef {
                id: "eval_1".to_string(),
                name: Some(definition.name.clone()),
            })
        }

        async fn create_run(&self, eval_id: &str, _: &str, _: &DataSource) -> Result<RunHandle> {
            self.record("evals.runs.create");
            Ok(RunHandle {
                id: "run_1".to_string(),
                eval_id: eval_id.to_string(),
                status: RunStatus::Queued,
                report_url: Some("https://portal/run_1".to_string()),
            })
        }

        async fn retrieve_run(&self, run_id: &str, eval_id: &str) -> Result<RunHandle> {
            self.record("evals.runs.retrieve");
            Ok(RunHandle {
                id: run_id.to_string(),
                eval_id: eval_id.to_string(),
                status: self.retrieve_status.unwrap_or(RunStatus::Completed),
                report_url: Some("https://portal/run_1".to_string()),
            })
        }

        async fn list_output_items(&self, _: &str, _: &str) -> Result<Vec<OutputItem>> {
            self.record("evals.runs.output_items.list");
            if self.fail_output_items {
                return Err(EvalError::Remote {
                    operation: "evals.runs.output_items.list",
                    status: Some(500),
                    message: "internal error".to_string(),
                });
            }
            Ok(vec![scored_item("oi_1", 4.0, true), scored_item("oi_2", 2.0, false)])
        }
    }

    fn definition() -> EvaluationDefinition {
        let (schema, evaluators) = rag_preset("gpt-4o");
        DefinitionBuilder::new("rag-eval-custom")
            .schema(schema)
            .evaluators(evaluators)
            .build()
            .unwrap()
    }

    fn inline_source() -> DataSource {
        DataSource::Inline(vec![EvaluationItem {
            query: "q".to_string(),
            response: "r".to_string(),
            context: Some("c".to_string()),
            ground_truth: None,
        }])
    }

    fn run(status: RunStatus) -> RunHandle {
        RunHandle {
            id: "run_1".to_string(),
            eval_id: "eval_1".to_string(),
            status,
            report_url: None,
        }
    }

    #[tokio::test]
    async fn test_submit_creates_definition_then_run() {
        let service = RecordingService::default();
        let (created, handle) = submit(&service, &definition(), "rag-eval-run-inline", &inline_source())
            .await
            .unwrap();

        assert_eq!(created.id, "eval_1");
        assert_eq!(handle.status, RunStatus::Queued);
        assert_eq!(service.calls(), vec!["evals.create", "evals.runs.create"]);
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_evaluator_list() {
        let service = RecordingService::default();
        let mut empty = definition();
        empty.evaluators.clear();

        let err = submit(&service, &empty, "run", &inline_source())
            .await
            .unwrap_err();

        assert!(err.is_config());
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_data_source() {
        let service = RecordingService::default();
        let err = submit(&service, &definition(), "run", &DataSource::Inline(vec![]))
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejection_skips_run_create() {
        let service = RecordingService {
            reject_create_eval: true,
            ..Default::default()
        };
        let err = submit(&service, &definition(), "run", &inline_source())
            .await
            .unwrap_err();

        assert!(matches!(err, EvalError::Remote { status: Some(400), .. }));
        assert_eq!(service.calls(), vec!["evals.create"]);
    }

    #[tokio::test]
    async fn test_collect_saves_completed_run() {
        let service = RecordingService::default();
        let dir = tempdir().unwrap();

        let (outcome, items) = collect(&service, &run(RunStatus::Completed), dir.path(), "20260101120000").await;

        let expected_path = dir.path().join("eval_results_20260101120000.json");
        assert_eq!(
            outcome,
            CollectOutcome::Saved {
                path: expected_path.clone(),
                items: 2
            }
        );
        assert_eq!(items.len(), 2);
        let saved: Vec<OutputItem> =
            serde_json::from_str(&std::fs::read_to_string(expected_path).unwrap()).unwrap();
        assert_eq!(saved, items);
    }

    #[tokio::test]
    async fn test_collect_skips_failed_and_cancelled_runs() {
        let service = RecordingService::default();
        let dir = tempdir().unwrap();

        for status in [RunStatus::Failed, RunStatus::Cancelled] {
            let (outcome, items) = collect(&service, &run(status), dir.path(), "ts").await;
            assert_eq!(outcome, CollectOutcome::Skipped { status });
            assert!(items.is_empty());
        }
        assert!(service.calls().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_collect_reports_fetch_failure() {
        let service = RecordingService {
            fail_output_items: true,
            ..Default::default()
        };
        let dir = tempdir().unwrap();
        let completed = run(RunStatus::Completed);

        let (outcome, _) = collect(&service, &completed, dir.path(), "ts").await;

        match outcome {
            CollectOutcome::FetchFailed { message } => assert!(message.contains("internal error")),
            other => panic!("expected fetch failure, got {other:?}"),
        }
        assert_eq!(completed.status, RunStatus::Completed);
    }
}
