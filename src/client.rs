use crate::config::{Credential, Settings};
use crate::error::{EvalError, Result};
use crate::models::{
    DataSource, DatasetRef, DefinitionRef, EvaluationDefinition, OutputItem, RunHandle, RunStatus,
};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, multipart};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;

/// Page size requested when listing output items
const OUTPUT_PAGE_SIZE: &str = "100";

/// Operations the evaluation workflow needs from the remote project
#[async_trait]
pub trait EvalService: Send + Sync {
    /// Upload a local JSONL file and return a reference usable as a file data source
    async fn upload_dataset(&self, name: &str, version: &str, path: &Path) -> Result<DatasetRef>;

    /// Create an evaluation definition
    async fn create_eval(&self, definition: &EvaluationDefinition) -> Result<DefinitionRef>;

    /// Start a run of `eval_id` over `data_source`
    async fn create_run(
        &self,
        eval_id: &str,
        run_name: &str,
        data_source: &DataSource,
    ) -> Result<RunHandle>;

    /// Re-fetch a run's current state
    async fn retrieve_run(&self, run_id: &str, eval_id: &str) -> Result<RunHandle>;

    /// All output items of a run, in service order
    async fn list_output_items(&self, run_id: &str, eval_id: &str) -> Result<Vec<OutputItem>>;
}

/// HTTP client for a project endpoint's OpenAI-compatible routes.
///
/// Created once per process and borrowed by every operation; its connection
/// pool is released when it is dropped.
pub struct ProjectClient {
    http: reqwest::Client,
    endpoint: String,
    api_version: String,
    credential: Credential,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct WireRun {
    id: String,
    #[serde(default)]
    eval_id: Option<String>,
    status: RunStatus,
    #[serde(default)]
    report_url: Option<String>,
}

#[derive(Deserialize)]
struct Page<T> {
    data: Vec<T>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    last_id: Option<String>,
}

#[derive(Deserialize)]
struct FileObject {
    id: String,
}

#[derive(Deserialize)]
struct Conversation {
    id: String,
}

impl ProjectClient {
    /// Connect to the project described by `settings`
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        tracing::info!(endpoint = %settings.endpoint, "connecting to project");
        Ok(Self::with_http(
            http,
            &settings.endpoint,
            &settings.api_version,
            settings.credential.clone(),
        ))
    }

    pub fn with_http(
        http: reqwest::Client,
        endpoint: &str,
        api_version: &str,
        credential: Credential,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_version: api_version.to_string(),
            credential,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/openai{}", self.endpoint, path);
        let builder = self
            .http
            .request(method, url)
            .query(&[("api-version", self.api_version.as_str())]);

        match &self.credential {
            Credential::Bearer(token) => builder.bearer_auth(token),
            Credential::ApiKey(key) => builder.header("api-key", key),
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(envelope) => envelope.error.message,
                Err(_) if body.trim().is_empty() => status.to_string(),
                Err(_) => body,
            };
            tracing::error!(operation, status = status.as_u16(), %message, "remote call failed");
            return Err(EvalError::Remote {
                operation,
                status: Some(status.as_u16()),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| EvalError::Remote {
            operation,
            status: Some(status.as_u16()),
            message: format!("unexpected response body: {e}"),
        })
    }

    fn into_handle(run: WireRun, eval_id: &str) -> RunHandle {
        RunHandle {
            id: run.id,
            eval_id: run.eval_id.unwrap_or_else(|| eval_id.to_string()),
            status: run.status,
            report_url: run.report_url,
        }
    }

    /// Open a conversation for one generation call
    pub async fn create_conversation(&self) -> Result<String> {
        let builder = self.request(Method::POST, "/conversations").json(&json!({}));
        let conversation: Conversation = self.send("conversations.create", builder).await?;
        Ok(conversation.id)
    }

    /// Ask `agent_name` to answer `input` inside `conversation_id`; returns the output text
    pub async fn create_response(
        &self,
        conversation_id: &str,
        agent_name: &str,
        input: &str,
    ) -> Result<String> {
        let body = json!({
            "conversation": conversation_id,
            "agent": {"name": agent_name, "type": "agent_reference"},
            "input": input,
        });
        let builder = self.request(Method::POST, "/responses").json(&body);
        let response: Value = self.send("responses.create", builder).await?;

        output_text(&response).ok_or_else(|| EvalError::Remote {
            operation: "responses.create",
            status: None,
            message: "response carried no output text".to_string(),
        })
    }
}

impl Drop for ProjectClient {
    fn drop(&mut self) {
        tracing::debug!(endpoint = %self.endpoint, "closing project client");
    }
}

/// Aggregate text of a Responses API payload
pub(crate) fn output_text(response: &Value) -> Option<String> {
    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        return Some(text.to_string());
    }

    let parts: Vec<&str> = response
        .get("output")?
        .as_array()?
        .iter()
        .filter_map(|message| message.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.concat())
    }
}

#[async_trait]
impl EvalService for ProjectClient {
    async fn upload_dataset(&self, name: &str, version: &str, path: &Path) -> Result<DatasetRef> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| EvalError::InputFile {
                path: path.to_path_buf(),
                source,
            })?;

        let part = multipart::Part::bytes(bytes)
            .file_name(format!("{name}-{version}.jsonl"))
            .mime_str("application/jsonl")?;
        let form = multipart::Form::new()
            .text("purpose", "evals")
            .part("file", part);

        let builder = self.request(Method::POST, "/files").multipart(form);
        let file: FileObject = self.send("datasets.upload", builder).await?;
        tracing::info!(dataset = name, version, id = %file.id, "dataset uploaded");

        Ok(DatasetRef {
            id: file.id,
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    async fn create_eval(&self, definition: &EvaluationDefinition) -> Result<DefinitionRef> {
        let builder = self
            .request(Method::POST, "/evals")
            .json(&definition.to_payload());
        let created: DefinitionRef = self.send("evals.create", builder).await?;
        tracing::debug!(eval_id = %created.id, name = %definition.name, "evaluation definition created");
        Ok(created)
    }

    async fn create_run(
        &self,
        eval_id: &str,
        run_name: &str,
        data_source: &DataSource,
    ) -> Result<RunHandle> {
        let body = json!({
            "name": run_name,
            "data_source": data_source.to_payload(),
        });
        let builder = self
            .request(Method::POST, &format!("/evals/{eval_id}/runs"))
            .json(&body);
        let run: WireRun = self.send("evals.runs.create", builder).await?;
        Ok(Self::into_handle(run, eval_id))
    }

    async fn retrieve_run(&self, run_id: &str, eval_id: &str) -> Result<RunHandle> {
        let builder = self.request(Method::GET, &format!("/evals/{eval_id}/runs/{run_id}"));
        let run: WireRun = self.send("evals.runs.retrieve", builder).await?;
        Ok(Self::into_handle(run, eval_id))
    }

    async fn list_output_items(&self, run_id: &str, eval_id: &str) -> Result<Vec<OutputItem>> {
        let path = format!("/evals/{eval_id}/runs/{run_id}/output_items");
        let mut items = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut builder = self
                .request(Method::GET, &path)
                .query(&[("limit", OUTPUT_PAGE_SIZE)]);
            if let Some(cursor) = &after {
                builder = builder.query(&[("after", cursor.as_str())]);
            }

            let page: Page<OutputItem> = self.send("evals.runs.output_items.list", builder).await?;
            let cursor = page
                .last_id
                .or_else(|| page.data.last().map(|item| item.id.clone()));
            let fetched = page.data.len();
            items.extend(page.data);

            match cursor {
                Some(cursor) if page.has_more && fetched > 0 => after = Some(cursor),
                _ => break,
            }
        }

        tracing::debug!(run_id, count = items.len(), "output items fetched");
        Ok(items)
    }
}
