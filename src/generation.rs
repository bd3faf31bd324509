use crate::client::ProjectClient;
use crate::config::{Credential, Settings};
use crate::error::{EvalError, Result};
use async_openai::Client;
use async_openai::config::AzureConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
};
use async_trait::async_trait;

/// Produces the system-under-test's answer for one query
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, query: &str) -> Result<String>;
}

/// Answers queries through a deployed agent, one fresh conversation per query
pub struct AgentGenerator<'a> {
    client: &'a ProjectClient,
    agent_name: String,
}

impl<'a> AgentGenerator<'a> {
    pub fn new(client: &'a ProjectClient, agent_name: impl Into<String>) -> Self {
        Self {
            client,
            agent_name: agent_name.into(),
        }
    }
}

#[async_trait]
impl ResponseGenerator for AgentGenerator<'_> {
    async fn generate(&self, query: &str) -> Result<String> {
        let conversation = self.client.create_conversation().await?;
        self.client
            .create_response(&conversation, &self.agent_name, query)
            .await
    }
}

/// Answers queries by calling a chat model deployment directly
pub struct ModelGenerator {
    client: Client<AzureConfig>,
    deployment_name: String,
}

impl ModelGenerator {
    /// Build a generator for the settings' model deployment; needs an API key credential
    pub fn new(settings: &Settings) -> Result<Self> {
        let api_key = match &settings.credential {
            Credential::ApiKey(key) => key.clone(),
            Credential::Bearer(_) => {
                return Err(EvalError::config(
                    "direct model generation needs an API key credential",
                ));
            }
        };

        let azure_config = AzureConfig::new()
            .with_api_base(&settings.model_endpoint)
            .with_api_version(&settings.api_version)
            .with_deployment_id(&settings.deployment_name)
            .with_api_key(api_key);

        Ok(Self {
            client: Client::with_config(azure_config),
            deployment_name: settings.deployment_name.clone(),
        })
    }

    /// Build the chat completion request for one query
    fn build_request(&self, query: &str) -> Result<CreateChatCompletionRequest> {
        let user_message: ChatCompletionRequestMessage =
            ChatCompletionRequestUserMessageArgs::default()
                .content(query.to_string())
                .build()
                .map_err(|e| EvalError::Generation(format!("failed to build user message: {e}")))?
                .into();

        CreateChatCompletionRequestArgs::default()
            .model(&self.deployment_name)
            .messages([user_message])
            .temperature(0.0)
            .build()
            .map_err(|e| EvalError::Generation(format!("failed to build request: {e}")))
    }
}

/// Text of the first choice, empty when the model returned none
fn first_choice_text(response: CreateChatCompletionResponse) -> String {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default()
}

#[async_trait]
impl ResponseGenerator for ModelGenerator {
    async fn generate(&self, query: &str) -> Result<String> {
        let request = self.build_request(query)?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| EvalError::Generation(e.to_string()))?;

        Ok(first_choice_text(response))
    }
}
