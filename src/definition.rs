use crate::error::{EvalError, Result};
use crate::models::{EvaluationDefinition, EvaluatorSpec, ItemSchema};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Criterion type understood by the project evaluation service
const CRITERION_TYPE: &str = "azure_ai_evaluator";

/// Build a `{{item.<field>}}` reference. The service resolves it, never this crate.
pub fn item_ref(field: &str) -> String {
    format!("{{{{item.{field}}}}}")
}

/// Builder for an evaluation definition request
#[derive(Debug, Clone)]
pub struct DefinitionBuilder {
    name: String,
    schema: ItemSchema,
    evaluators: Vec<EvaluatorSpec>,
}

impl DefinitionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: ItemSchema::default(),
            evaluators: Vec::new(),
        }
    }

    pub fn schema(mut self, schema: ItemSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn evaluator(mut self, evaluator: EvaluatorSpec) -> Self {
        self.evaluators.push(evaluator);
        self
    }

    pub fn evaluators(mut self, evaluators: impl IntoIterator<Item = EvaluatorSpec>) -> Self {
        self.evaluators.extend(evaluators);
        self
    }

    /// Validate and produce the definition
    pub fn build(self) -> Result<EvaluationDefinition> {
        if self.name.trim().is_empty() {
            return Err(EvalError::config("evaluation definition needs a name"));
        }
        if self.evaluators.is_empty() {
            return Err(EvalError::config("evaluation definition has no evaluators"));
        }
        for field in &self.schema.required {
            if !self.schema.properties.contains(field) {
                return Err(EvalError::config(format!(
                    "required field {field:?} is not a schema property"
                )));
            }
        }

        Ok(EvaluationDefinition {
            name: self.name,
            schema: self.schema,
            evaluators: self.evaluators,
        })
    }
}

/// Construct a built-in evaluator reading `fields` from each item
pub fn builtin_evaluator(name: &str, fields: &[&str], deployment_name: &str) -> EvaluatorSpec {
    let field_mapping = fields
        .iter()
        .map(|field| (field.to_string(), item_ref(field)))
        .collect();

    let mut init_parameters = BTreeMap::new();
    init_parameters.insert("deployment_name".to_string(), json!(deployment_name));

    EvaluatorSpec {
        name: name.to_string(),
        evaluator_kind: format!("builtin.{name}"),
        field_mapping,
        init_parameters,
    }
}

/// Relevance and coherence over uploaded `{query, response}` rows
pub fn batch_preset(deployment_name: &str) -> (ItemSchema, Vec<EvaluatorSpec>) {
    let schema = ItemSchema {
        properties: vec!["query".to_string(), "response".to_string()],
        required: vec![],
    };
    let evaluators = vec![
        builtin_evaluator("relevance", &["query", "response"], deployment_name),
        builtin_evaluator("coherence", &["query", "response"], deployment_name),
    ];
    (schema, evaluators)
}

/// Groundedness and relevance over generated RAG rows
pub fn rag_preset(deployment_name: &str) -> (ItemSchema, Vec<EvaluatorSpec>) {
    let schema = ItemSchema {
        properties: vec![
            "context".to_string(),
            "query".to_string(),
            "response".to_string(),
            "ground_truth".to_string(),
        ],
        required: vec![
            "query".to_string(),
            "response".to_string(),
            "context".to_string(),
        ],
    };
    let evaluators = vec![
        builtin_evaluator("groundedness", &["context", "query", "response"], deployment_name),
        builtin_evaluator("relevance", &["query", "response"], deployment_name),
    ];
    (schema, evaluators)
}

impl EvaluationDefinition {
    /// Request body for `evals.create`
    pub fn to_payload(&self) -> Value {
        let properties: Map<String, Value> = self
            .schema
            .properties
            .iter()
            .map(|field| (field.clone(), json!({"type": "string"})))
            .collect();

        let testing_criteria: Vec<Value> = self
            .evaluators
            .iter()
            .map(|evaluator| {
                json!({
                    "type": CRITERION_TYPE,
                    "name": evaluator.name,
                    "evaluator_name": evaluator.evaluator_kind,
                    "data_mapping": evaluator.field_mapping,
                    "initialization_parameters": evaluator.init_parameters,
                })
            })
            .collect();

        json!({
            "name": self.name,
            "data_source_config": {
                "type": "custom",
                "item_schema": {
                    "type": "object",
                    "properties": properties,
                    "required": self.schema.required,
                },
                "include_sample_schema": true,
            },
            "testing_criteria": testing_criteria,
        })
    }
}
