//! End-to-end synthesis scenarios with scripted providers: no network, no
//! database. Covers the happy text-mode path, a schema-invalid block, the
//! sparse CSV path, the PDF-native branch, and payment-mechanism
//! sanitisation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};

use crivo_app::pipeline::blocks::BlockKey;
use crivo_app::pipeline::parse::Segment;
use crivo_app::services::{
    BlockGenerator, ChatClient, EmbedClient, EmbedError, Embedder, FileChatClient, GenerateError,
    IngestError, Stage, SynthesisOptions, synthesize_from_pdf, synthesize_from_segments,
};

/// Deterministic embedder: every text maps to the same direction, so
/// similarities are uniform and the hint boost decides ranking.
struct UniformEmbed {
    dim: usize,
    calls: Mutex<usize>,
}

impl UniformEmbed {
    fn new(dim: usize) -> Self {
        Self {
            dim,
            calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl EmbedClient for UniformEmbed {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        *self.calls.lock().expect("call counter mutex poisoned") += 1;
        Ok(texts.iter().map(|_| vec![1.0; self.dim]).collect())
    }

    fn dimensions(&self) -> usize {
        self.dim
    }
}

/// Chat stub answering per block schema name; unknown blocks get `{}` so the
/// payload defaults apply.
struct BlockChat {
    answers: HashMap<String, JsonValue>,
    calls: Mutex<Vec<String>>,
}

impl BlockChat {
    fn new(answers: &[(BlockKey, JsonValue)]) -> Self {
        Self {
            answers: answers
                .iter()
                .map(|(key, value)| (format!("checklist_block_{key}"), value.clone()))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().expect("call log mutex poisoned").len()
    }
}

#[async_trait]
impl ChatClient for BlockChat {
    async fn chat_structured(
        &self,
        _system: &str,
        _user: &str,
        schema_name: &str,
        _schema: &JsonValue,
    ) -> Result<JsonValue, GenerateError> {
        self.calls
            .lock()
            .expect("call log mutex poisoned")
            .push(schema_name.to_string());
        Ok(self
            .answers
            .get(schema_name)
            .cloned()
            .unwrap_or_else(|| json!({})))
    }
}

/// Multi-modal stub for the PDF-native branch.
struct PdfFiles {
    answers: HashMap<String, JsonValue>,
    uploads: Mutex<usize>,
    responds: Mutex<usize>,
}

impl PdfFiles {
    fn new(answers: &[(BlockKey, JsonValue)]) -> Self {
        Self {
            answers: answers
                .iter()
                .map(|(key, value)| (format!("checklist_block_{key}"), value.clone()))
                .collect(),
            uploads: Mutex::new(0),
            responds: Mutex::new(0),
        }
    }
}

#[async_trait]
impl FileChatClient for PdfFiles {
    async fn upload_file(&self, _path: &Path, _file_name: &str) -> Result<String, GenerateError> {
        *self.uploads.lock().expect("upload counter mutex poisoned") += 1;
        Ok("file-123".to_string())
    }

    async fn respond_structured(
        &self,
        file_ref: &str,
        _system: &str,
        _instruction: &str,
        schema_name: &str,
        _schema: &JsonValue,
    ) -> Result<JsonValue, GenerateError> {
        assert_eq!(file_ref, "file-123");
        *self.responds.lock().expect("respond counter mutex poisoned") += 1;
        Ok(self
            .answers
            .get(schema_name)
            .cloned()
            .unwrap_or_else(|| json!({})))
    }
}

fn field(value: &str) -> JsonValue {
    json!({"value": value})
}

fn pdf_segments(pages: usize) -> Vec<Segment> {
    (0..pages)
        .map(|page| Segment {
            text: format!(
                "Página {page}. A cláusula estabelece condições gerais do certame, \
                 incluindo obrigações das partes e critérios de julgamento. "
            )
            .repeat(12),
            page_number: Some(page as u32 + 1),
        })
        .collect()
}

fn happy_answers() -> Vec<(BlockKey, JsonValue)> {
    vec![
        (
            BlockKey::Edital,
            json!({"edital": {
                "orgao": {
                    "value": "Prefeitura Municipal de X",
                    "evidencia": {"trecho": "PREFEITURA MUNICIPAL DE X", "ref": "1.1", "page": 1}
                },
                "objeto": field("Registro de preços de material escolar"),
                "totalReais": field("1.234,56"),
                "dataSessao": field("2026-02-10")
            }}),
        ),
        (
            BlockKey::ModalidadeParticipacao,
            json!({
                "modalidadeLicitacao": field("Pregão Eletrônico"),
                "participacao": {
                    "permiteConsorcio": {"value": "não"},
                    "beneficiosMPE": {"value": "sim"},
                    "itemEdital": field("4.1")
                }
            }),
        ),
        (
            BlockKey::Prazos,
            json!({"prazos": {
                "enviarPropostaAte": {"data": field("10 de fevereiro de 2026"), "horario": field("9h00")},
                "contatoEsclarecimentoImpugnacao": field("Licitar Digital")
            }}),
        ),
        (
            BlockKey::Documentos,
            json!({"requisitos": [
                {"categoria": "Documentação", "referencia": "6.1", "documento": "Contrato social", "solicitado": true},
                {"categoria": "Documentação", "referencia": "6.1", "documento": "Contrato social", "solicitado": true},
                {"categoria": "Atestado Técnico", "referencia": "6.2.1", "documento": "Atestado de capacidade técnica", "solicitado": "sim",
                 "evidencia": {"trecho": "atestado emitido por pessoa jurídica", "ref": "6.2.1", "page": 14}}
            ]}),
        ),
        (
            BlockKey::VisitaProposta,
            json!({
                "visitaTecnica": {"value": false},
                "proposta": {"validadeProposta": field("60 dias")}
            }),
        ),
        (
            BlockKey::SessaoDisputa,
            json!({"sessao": {"abertoFechado": field("aberto")}}),
        ),
        (
            BlockKey::PagamentoContrato,
            json!({"outrosEdital": {
                "mecanismoPagamento": field("Pagamento em 30 dias', 'evidencia':{'trecho':'...'}}}")
            }}),
        ),
        (
            BlockKey::Analise,
            json!({
                "pontuacao": 72,
                "recomendacao": field("Recomenda-se participar; prazos adequados.")
            }),
        ),
    ]
}

#[tokio::test]
async fn happy_path_text_mode_produces_a_normalised_checklist() {
    let segments = pdf_segments(50);
    let embedder = Embedder::new(std::sync::Arc::new(UniformEmbed::new(8)));
    let chat = BlockChat::new(&happy_answers());
    let generator = BlockGenerator::new();

    let checklist = synthesize_from_segments(
        &segments,
        &embedder,
        &chat,
        &generator,
        &SynthesisOptions::default(),
        "edital.pdf",
    )
    .await
    .expect("synthesis succeeds");

    assert_eq!(chat.call_count(), 8, "one structured call per block");

    assert_eq!(checklist.edital.orgao, "Prefeitura Municipal de X");
    assert_eq!(checklist.pontuacao, 72);
    assert_eq!(checklist.schema_version, 2);

    // Normalisation applied through the same pass.
    assert_eq!(checklist.edital.data_sessao, "10/02/2026");
    assert_eq!(checklist.edital.total_reais, "R$ 1.234,56");
    assert_eq!(checklist.prazos.enviar_proposta_ate.data, "10/02/2026");
    assert_eq!(checklist.prazos.enviar_proposta_ate.horario, "9h00");
    assert_eq!(
        checklist.outros_edital.mecanismo_pagamento,
        "Pagamento em 30 dias"
    );

    // Boolean coercion at the boundary.
    assert!(!checklist.participacao.permite_consorcio);
    assert!(checklist.participacao.beneficios_mpe);
    assert!(!checklist.visita_tecnica);

    // Requisito dedup plus derived grouping.
    assert_eq!(checklist.requisitos.len(), 2);
    assert_eq!(checklist.documentos.len(), 2);
    assert_eq!(checklist.documentos[0].categoria, "Documentação");
    assert!(checklist.requisitos[1].solicitado, "\"sim\" coerces to true");

    // Evidence lives in the side map keyed by block.
    let edital_evidence = &checklist.evidence["edital"]["edital.orgao"];
    assert_eq!(edital_evidence.referencia, "1.1");
    assert_eq!(edital_evidence.page, Some(1));
    assert!(checklist.evidence.contains_key("documentos"));
}

#[tokio::test]
async fn schema_invalid_block_fails_the_job_with_its_key() {
    let mut answers = happy_answers();
    // Block 3 (prazos) answers with a non-string leaf on every attempt.
    for (key, value) in &mut answers {
        if *key == BlockKey::Prazos {
            *value = json!({"prazos": {"enviarPropostaAte": {"data": {"value": 5}}}});
        }
    }
    let segments = pdf_segments(10);
    let embedder = Embedder::new(std::sync::Arc::new(UniformEmbed::new(8)));
    let chat = BlockChat::new(&answers);
    let generator = BlockGenerator::new();

    let err = synthesize_from_segments(
        &segments,
        &embedder,
        &chat,
        &generator,
        &SynthesisOptions::default(),
        "edital.pdf",
    )
    .await
    .expect_err("schema violation must fail the job");

    assert_eq!(err.stage(), Stage::BlockGenerate);
    assert_eq!(err.block_key(), Some(BlockKey::Prazos));
    match err {
        IngestError::BlockGenerate { block, .. } => assert_eq!(block, BlockKey::Prazos),
        other => panic!("expected block generation error, got {other:?}"),
    }
}

#[tokio::test]
async fn csv_upload_runs_retrieval_over_few_chunks() {
    // Five row-group segments, no page numbers; retrieval trivially returns
    // everything and the checklist comes back sparse but schema-complete.
    let segments: Vec<Segment> = (0..5)
        .map(|group| Segment {
            text: format!("orgao;objeto;valor\nPrefeitura {group};Fornecimento {group};1.000,00"),
            page_number: None,
        })
        .collect();
    let embedder = Embedder::new(std::sync::Arc::new(UniformEmbed::new(8)));
    let chat = BlockChat::new(&[]);
    let generator = BlockGenerator::new();

    let checklist = synthesize_from_segments(
        &segments,
        &embedder,
        &chat,
        &generator,
        &SynthesisOptions::default(),
        "notice.csv",
    )
    .await
    .expect("sparse synthesis succeeds");

    assert_eq!(chat.call_count(), 8);
    assert_eq!(checklist.schema_version, 2);
    assert_eq!(checklist.edital.orgao, "");
    assert!(checklist.requisitos.is_empty());
    assert!(checklist.documentos.is_empty());
    assert_eq!(checklist.pontuacao, 0);
}

#[tokio::test]
async fn pdf_native_mode_bypasses_chunking_and_embedding() {
    let files = PdfFiles::new(&happy_answers());
    let generator = BlockGenerator::new();

    let temp = tempfile::NamedTempFile::new().expect("temp pdf");
    let checklist = synthesize_from_pdf(
        temp.path(),
        "edital.pdf",
        &files,
        &generator,
        &SynthesisOptions::default(),
    )
    .await
    .expect("pdf-native synthesis succeeds");

    assert_eq!(*files.uploads.lock().expect("upload counter"), 1);
    assert_eq!(*files.responds.lock().expect("respond counter"), 8);
    assert_eq!(checklist.schema_version, 2);
    assert_eq!(checklist.edital.orgao, "Prefeitura Municipal de X");
    assert_eq!(
        checklist.outros_edital.mecanismo_pagamento,
        "Pagamento em 30 dias"
    );
}
