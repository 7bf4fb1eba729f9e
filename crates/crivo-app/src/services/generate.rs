//! Structured-output generation: capability seams for the chat and
//! multi-modal providers, plus the block generator that parses answers into
//! typed payloads.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::pipeline::blocks::{BlockResult, BlockSpec, FullChecklistPayload};

const RETRY_SUFFIX: &str =
    "\n\nATENÇÃO: a resposta anterior era inválida. Retorne apenas JSON válido conforme o schema.";
const DEFAULT_MAX_ATTEMPTS: u8 = 2;

/// System prompt for the legacy single-call path; per-block prompts live in
/// the block table.
pub(crate) const FULL_CHECKLIST_SYSTEM_PROMPT: &str = "Você é um especialista em licitações brasileiras. Preencha o checklist estruturado completo com base no documento do edital, seguindo o schema. Use string vazia quando não encontrar a informação e false para booleanos não aplicáveis. Inclua evidencia (trecho, ref, page) sempre que possível.";

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("failed to read upload source: {0}")]
    Io(#[from] std::io::Error),
    #[error("chat provider returned {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("provider answer carried no content")]
    MissingContent,
    #[error("provider answer is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("block `{block}` answer does not match its schema: {source}")]
    Schema {
        block: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Chat-structured capability: one system + user exchange constrained by a
/// JSON schema, returning the parsed object.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat_structured(
        &self,
        system: &str,
        user: &str,
        schema_name: &str,
        schema: &JsonValue,
    ) -> Result<JsonValue, GenerateError>;
}

/// Multi-modal structured capability: file upload plus schema-constrained
/// responses against the uploaded file.
#[async_trait]
pub trait FileChatClient: Send + Sync {
    async fn upload_file(&self, path: &Path, file_name: &str) -> Result<String, GenerateError>;

    async fn respond_structured(
        &self,
        file_ref: &str,
        system: &str,
        instruction: &str,
        schema_name: &str,
        schema: &JsonValue,
    ) -> Result<JsonValue, GenerateError>;
}

/// Drives per-block structured calls and parses answers into typed payloads.
/// An out-of-schema answer is re-prompted once with a retry suffix before it
/// becomes a fatal error; transport-level retries belong to the wire client.
#[derive(Debug, Clone)]
pub struct BlockGenerator {
    max_attempts: u8,
}

impl Default for BlockGenerator {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BlockGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn generate_block(
        &self,
        chat: &dyn ChatClient,
        spec: &BlockSpec,
        context: &str,
        file_name: &str,
    ) -> Result<BlockResult, GenerateError> {
        debug_assert!(self.max_attempts > 0);

        let schema = spec.schema();
        let schema_name = format!("checklist_block_{}", spec.key);
        let user = block_user_payload(context, file_name);

        let mut attempt = 0u8;
        let mut last_error: Option<GenerateError> = None;
        while attempt < self.max_attempts {
            let mut payload = user.clone();
            if attempt > 0 {
                payload.push_str(RETRY_SUFFIX);
            }
            match chat
                .chat_structured(spec.system_prompt, &payload, &schema_name, &schema)
                .await
            {
                Ok(answer) => match spec.parse(answer) {
                    Ok(result) => return Ok(result),
                    Err(source) => {
                        last_error = Some(GenerateError::Schema {
                            block: spec.key.to_string(),
                            source,
                        });
                    }
                },
                Err(err) => return Err(err),
            }
            attempt += 1;
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        Err(last_error.expect("at least one attempt executed"))
    }

    pub async fn generate_block_from_file(
        &self,
        files: &dyn FileChatClient,
        file_ref: &str,
        spec: &BlockSpec,
    ) -> Result<BlockResult, GenerateError> {
        debug_assert!(self.max_attempts > 0);

        let schema = spec.schema();
        let schema_name = format!("checklist_block_{}", spec.key);
        let instruction = "Com base no edital de licitação anexado, extraia apenas a parte do checklist correspondente a este bloco e retorne em JSON.";

        let mut attempt = 0u8;
        let mut last_error: Option<GenerateError> = None;
        while attempt < self.max_attempts {
            let mut payload = instruction.to_string();
            if attempt > 0 {
                payload.push_str(RETRY_SUFFIX);
            }
            match files
                .respond_structured(file_ref, spec.system_prompt, &payload, &schema_name, &schema)
                .await
            {
                Ok(answer) => match spec.parse(answer) {
                    Ok(result) => return Ok(result),
                    Err(source) => {
                        last_error = Some(GenerateError::Schema {
                            block: spec.key.to_string(),
                            source,
                        });
                    }
                },
                Err(err) => return Err(err),
            }
            attempt += 1;
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        Err(last_error.expect("at least one attempt executed"))
    }

    /// Legacy single-call path: the whole checklist in one structured answer.
    pub async fn generate_full(
        &self,
        chat: &dyn ChatClient,
        context: &str,
        file_name: &str,
    ) -> Result<FullChecklistPayload, GenerateError> {
        let schema = FullChecklistPayload::schema();
        let user = block_user_payload(context, file_name);
        let answer = chat
            .chat_structured(
                FULL_CHECKLIST_SYSTEM_PROMPT,
                &user,
                "licitacao_checklist",
                &schema,
            )
            .await?;
        serde_json::from_value(answer).map_err(|source| GenerateError::Schema {
            block: "full_checklist".to_string(),
            source,
        })
    }
}

fn block_user_payload(context: &str, file_name: &str) -> String {
    let name = if file_name.is_empty() {
        "document"
    } else {
        file_name
    };
    format!(
        "Contexto do documento ({name}):\n\n{context}\n\nExtraia apenas a parte do checklist correspondente a este bloco e retorne em JSON."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::blocks::{BlockKey, spec_for};
    use serde_json::json;
    use std::sync::Mutex;

    /// Scripted chat stub: pops canned answers in order.
    struct ScriptedChat {
        answers: Mutex<Vec<JsonValue>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedChat {
        fn new(answers: Vec<JsonValue>) -> Self {
            Self {
                answers: Mutex::new(answers),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedChat {
        async fn chat_structured(
            &self,
            _system: &str,
            user: &str,
            _schema_name: &str,
            _schema: &JsonValue,
        ) -> Result<JsonValue, GenerateError> {
            self.calls
                .lock()
                .expect("call log mutex poisoned")
                .push(user.to_string());
            let mut answers = self.answers.lock().expect("answer mutex poisoned");
            if answers.is_empty() {
                return Err(GenerateError::MissingContent);
            }
            Ok(answers.remove(0))
        }
    }

    #[tokio::test]
    async fn out_of_schema_answer_is_retried_with_the_suffix() {
        let chat = ScriptedChat::new(vec![
            json!({"visitaTecnica": {"value": ["not", "a", "bool"]}}),
            json!({
                "visitaTecnica": {"value": true},
                "proposta": {"validadeProposta": {"value": "60 dias"}}
            }),
        ]);
        let generator = BlockGenerator::new();
        let spec = spec_for(BlockKey::VisitaProposta);

        let result = generator
            .generate_block(&chat, spec, "contexto", "edital.pdf")
            .await
            .expect("second attempt parses");
        let BlockResult::VisitaProposta(payload) = result else {
            panic!("wrong payload variant");
        };
        assert!(payload.visita_tecnica.value);

        let calls = chat.calls.lock().expect("call log mutex poisoned");
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].contains("ATENÇÃO"));
        assert!(calls[1].contains("ATENÇÃO"), "retry must carry the suffix");
    }

    #[tokio::test]
    async fn persistent_schema_violation_is_fatal_with_the_block_key() {
        let bad = json!({"visitaTecnica": {"value": ["still"]}});
        let chat = ScriptedChat::new(vec![bad.clone(), bad]);
        let generator = BlockGenerator::new();
        let spec = spec_for(BlockKey::VisitaProposta);

        let err = generator
            .generate_block(&chat, spec, "contexto", "edital.pdf")
            .await
            .expect_err("must fail after retries");
        match err {
            GenerateError::Schema { block, .. } => assert_eq!(block, "visita_proposta"),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn provider_errors_are_not_retried_by_the_generator() {
        let chat = ScriptedChat::new(Vec::new());
        let generator = BlockGenerator::new();
        let spec = spec_for(BlockKey::Analise);

        let err = generator
            .generate_block(&chat, spec, "contexto", "edital.pdf")
            .await
            .expect_err("provider error propagates");
        assert!(matches!(err, GenerateError::MissingContent));
        assert_eq!(chat.calls.lock().expect("call log mutex poisoned").len(), 1);
    }
}
