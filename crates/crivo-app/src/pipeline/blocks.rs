//! The eight checklist blocks, modelled as data: key, canonical retrieval
//! query, section-hint tags, system prompt, JSON schema, and the projection
//! of the typed payload into the checklist accumulator.

use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::pipeline::checklist::{
    BoolField, ChecklistDraft, DocumentoGrupo, DocumentoItem, Evidence, EvidenceMap, Field, Prazo,
    Requisito, coerce_bool, coerce_score, merge_bool_field, merge_field, merge_list,
    record_evidence,
};
use crate::pipeline::chunk::SectionHint;

/// Fixed merge order; iteration order of the enum is the contract.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    AsRefStr,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BlockKey {
    Edital,
    ModalidadeParticipacao,
    Prazos,
    Documentos,
    VisitaProposta,
    SessaoDisputa,
    PagamentoContrato,
    Analise,
}

/// Static description of one checklist block.
pub struct BlockSpec {
    pub key: BlockKey,
    /// Canonical Portuguese retrieval query.
    pub query: &'static str,
    /// Tags used both to boost retrieval and to expand the query.
    pub hints: &'static [SectionHint],
    pub system_prompt: &'static str,
}

impl BlockSpec {
    /// Query expanded with the hint phrases of the block's tags.
    pub fn search_query(&self) -> String {
        let mut query = self.query.to_string();
        for hint in self.hints {
            for phrase in hint.phrases() {
                query.push(' ');
                query.push_str(phrase);
            }
        }
        query
    }

    /// Strict JSON schema for the block's structured output.
    pub fn schema(&self) -> JsonValue {
        let schema = match self.key {
            BlockKey::Edital => schema_for!(EditalPayload),
            BlockKey::ModalidadeParticipacao => schema_for!(ModalidadeParticipacaoPayload),
            BlockKey::Prazos => schema_for!(PrazosPayload),
            BlockKey::Documentos => schema_for!(DocumentosPayload),
            BlockKey::VisitaProposta => schema_for!(VisitaPropostaPayload),
            BlockKey::SessaoDisputa => schema_for!(SessaoDisputaPayload),
            BlockKey::PagamentoContrato => schema_for!(PagamentoContratoPayload),
            BlockKey::Analise => schema_for!(AnalisePayload),
        };
        let value = serde_json::to_value(&schema).expect("schema is serializable");
        strictify_schema(value)
    }

    /// Parses a structured answer into the block's typed payload.
    pub fn parse(&self, value: JsonValue) -> Result<BlockResult, serde_json::Error> {
        Ok(match self.key {
            BlockKey::Edital => BlockResult::Edital(serde_json::from_value(value)?),
            BlockKey::ModalidadeParticipacao => {
                BlockResult::ModalidadeParticipacao(serde_json::from_value(value)?)
            }
            BlockKey::Prazos => BlockResult::Prazos(serde_json::from_value(value)?),
            BlockKey::Documentos => BlockResult::Documentos(serde_json::from_value(value)?),
            BlockKey::VisitaProposta => BlockResult::VisitaProposta(serde_json::from_value(value)?),
            BlockKey::SessaoDisputa => BlockResult::SessaoDisputa(serde_json::from_value(value)?),
            BlockKey::PagamentoContrato => {
                BlockResult::PagamentoContrato(serde_json::from_value(value)?)
            }
            BlockKey::Analise => BlockResult::Analise(serde_json::from_value(value)?),
        })
    }
}

/// All blocks in merge order.
pub fn block_specs() -> impl Iterator<Item = &'static BlockSpec> {
    BLOCK_SPECS.iter()
}

pub fn spec_for(key: BlockKey) -> &'static BlockSpec {
    BLOCK_SPECS
        .iter()
        .find(|spec| spec.key == key)
        .expect("every block key has a spec")
}

static BLOCK_SPECS: [BlockSpec; 8] = [
    BlockSpec {
        key: BlockKey::Edital,
        query: "identificação do edital órgão objeto número do edital processo interno valor total data da sessão portal vigência",
        hints: &[SectionHint::Edital],
        system_prompt: "Você é um especialista em licitações brasileiras. Extraia APENAS os dados de IDENTIFICAÇÃO DO EDITAL: licitacao (entidade realizadora), edital (número), orgao, objeto (resumo), dataSessao (DD/MM/AAAA HH:MM quando houver), portal, numeroProcessoInterno, totalReais (valor em R$), valorEnergia e volumeEnergia quando o edital for de energia, vigenciaContrato, modalidadeConcessionaria, prazoInicioInjecao. Responda somente em JSON conforme o schema. Cada campo tem value e, quando possível, evidencia com trecho, ref (item do edital) e page. Use string vazia quando não encontrar. Não invente dados.",
    },
    BlockSpec {
        key: BlockKey::ModalidadeParticipacao,
        query: "modalidade da licitação pregão eletrônico concorrência participação em consórcio benefícios microempresa pequeno porte",
        hints: &[SectionHint::Modalidade],
        system_prompt: "Você é um especialista em licitações brasileiras. Extraia APENAS MODALIDADE E PARTICIPAÇÃO: modalidadeLicitacao (ex.: Pregão Eletrônico); participacao.permiteConsorcio (true somente se o edital permite consórcio); participacao.beneficiosMPE (true somente se há benefícios a ME/EPP); participacao.itemEdital (referência do edital que trata do tema). Responda somente em JSON conforme o schema, com evidencia quando possível. Use false quando não informado.",
    },
    BlockSpec {
        key: BlockKey::Prazos,
        query: "prazos enviar proposta esclarecimentos impugnação data horário limite contato",
        hints: &[SectionHint::Prazos],
        system_prompt: "Você é um especialista em licitações brasileiras. Extraia APENAS os PRAZOS do edital, separando data e horário: prazos.enviarPropostaAte, prazos.esclarecimentosAte, prazos.impugnacaoAte (cada um com data DD/MM/AAAA e horario como impresso), prazos.contatoEsclarecimentoImpugnacao (canal ou sistema). Responda somente em JSON conforme o schema, com evidencia quando possível. Use strings vazias quando não encontrado.",
    },
    BlockSpec {
        key: BlockKey::Documentos,
        query: "documentos exigidos habilitação qualificação técnica jurídica fiscal econômica declarações atestados",
        hints: &[SectionHint::Documentos],
        system_prompt: "Você é um especialista em licitações brasileiras. Extraia APENAS a lista de DOCUMENTOS exigidos, um requisito por item do edital, sem resumir. Para cada requisito: categoria (exatamente uma de: Atestado Técnico, Documentação, Qualificação Jurídica-Fiscal, Qualificação Econômica, Declarações, Proposta, Outros), referencia (item, ex.: 6.2.1.1.1), local (TR ou ED quando indicado), documento (texto completo exigido), solicitado (true se exigido), status (string vazia), observacao, e evidencia com o trecho citado. Responda somente em JSON conforme o schema. Retorne lista vazia se não houver seção de documentos.",
    },
    BlockSpec {
        key: BlockKey::VisitaProposta,
        query: "visita técnica obrigatória validade da proposta prazo em dias",
        hints: &[SectionHint::Proposta],
        system_prompt: "Você é um especialista em licitações brasileiras. Extraia APENAS VISITA TÉCNICA e PROPOSTA: visitaTecnica (true SOMENTE se a visita técnica for obrigatória); proposta.validadeProposta (prazo de validade, ex.: 60 dias). Responda somente em JSON conforme o schema, com evidencia quando possível. Use string vazia quando não informado.",
    },
    BlockSpec {
        key: BlockKey::SessaoDisputa,
        query: "sessão pública disputa lances diferença entre lances modo aberto fechado proposta ajustada",
        hints: &[SectionHint::SessaoDisputa],
        system_prompt: "Você é um especialista em licitações brasileiras. Extraia APENAS dados da SESSÃO DE DISPUTA: sessao.diferencaEntreLances (valor ou percentual mínimo), sessao.horasPropostaAjustada (prazo para proposta ajustada), sessao.abertoFechado (modo da disputa). Responda somente em JSON conforme o schema, com evidencia quando possível. Use string vazia quando não encontrado.",
    },
    BlockSpec {
        key: BlockKey::PagamentoContrato,
        query: "mecanismo de pagamento faturamento medição condições de pagamento do contrato",
        hints: &[SectionHint::Pagamento],
        system_prompt: "Você é um especialista em licitações brasileiras. Extraia APENAS o MECANISMO DE PAGAMENTO do contrato: outrosEdital.mecanismoPagamento (forma de pagamento, ex.: faturamento mensal mediante medição). Responda somente em JSON conforme o schema, com evidencia quando possível. Use string vazia quando não encontrado.",
    },
    BlockSpec {
        key: BlockKey::Analise,
        query: "análise do edital valor do contrato clareza viabilidade de participação prazos recomendação",
        hints: &[SectionHint::Analise],
        system_prompt: "Você é um especialista em licitações brasileiras. Com base no contexto, preencha a ANÁLISE FINAL: responsavelAnalise (string vazia, preenchido depois pelo usuário), pontuacao (inteiro de 0 a 100 considerando valor do contrato, clareza, viabilidade e prazos), recomendacao (uma ou duas frases objetivas). Responda somente em JSON conforme o schema.",
    },
];

// ---------------------------------------------------------------------------
// Typed block payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct EditalFields {
    pub licitacao: Field,
    pub edital: Field,
    pub orgao: Field,
    pub objeto: Field,
    pub data_sessao: Field,
    pub portal: Field,
    pub numero_processo_interno: Field,
    pub total_reais: Field,
    pub valor_energia: Field,
    pub volume_energia: Field,
    pub vigencia_contrato: Field,
    pub modalidade_concessionaria: Field,
    pub prazo_inicio_injecao: Field,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EditalPayload {
    pub edital: EditalFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ParticipacaoPayload {
    pub permite_consorcio: BoolField,
    #[serde(rename = "beneficiosMPE")]
    pub beneficios_mpe: BoolField,
    pub item_edital: Field,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ModalidadeParticipacaoPayload {
    pub modalidade_licitacao: Field,
    pub participacao: ParticipacaoPayload,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PrazoPayload {
    pub data: Field,
    pub horario: Field,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PrazosFields {
    pub enviar_proposta_ate: PrazoPayload,
    pub esclarecimentos_ate: PrazoPayload,
    pub impugnacao_ate: PrazoPayload,
    pub contato_esclarecimento_impugnacao: Field,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PrazosPayload {
    pub prazos: PrazosFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RequisitoPayload {
    pub categoria: String,
    pub referencia: String,
    pub local: String,
    pub documento: String,
    #[serde(deserialize_with = "coerce_bool")]
    pub solicitado: bool,
    pub status: String,
    pub observacao: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidencia: Option<Evidence>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DocumentosPayload {
    pub requisitos: Vec<RequisitoPayload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PropostaPayload {
    pub validade_proposta: Field,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct VisitaPropostaPayload {
    pub visita_tecnica: BoolField,
    pub proposta: PropostaPayload,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct SessaoFields {
    pub diferenca_entre_lances: Field,
    pub horas_proposta_ajustada: Field,
    pub aberto_fechado: Field,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SessaoDisputaPayload {
    pub sessao: SessaoFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct OutrosEditalPayload {
    pub mecanismo_pagamento: Field,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PagamentoContratoPayload {
    pub outros_edital: OutrosEditalPayload,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalisePayload {
    pub responsavel_analise: Field,
    #[serde(deserialize_with = "coerce_score")]
    pub pontuacao: i64,
    pub recomendacao: Field,
}

/// Union of the eight payloads, used by the legacy single-call path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FullChecklistPayload {
    #[serde(flatten)]
    pub edital: EditalPayload,
    #[serde(flatten)]
    pub modalidade_participacao: ModalidadeParticipacaoPayload,
    #[serde(flatten)]
    pub prazos: PrazosPayload,
    #[serde(flatten)]
    pub documentos: DocumentosPayload,
    #[serde(flatten)]
    pub visita_proposta: VisitaPropostaPayload,
    #[serde(flatten)]
    pub sessao_disputa: SessaoDisputaPayload,
    #[serde(flatten)]
    pub pagamento_contrato: PagamentoContratoPayload,
    #[serde(flatten)]
    pub analise: AnalisePayload,
}

impl FullChecklistPayload {
    pub fn schema() -> JsonValue {
        let schema = schema_for!(FullChecklistPayload);
        strictify_schema(serde_json::to_value(&schema).expect("schema is serializable"))
    }

    /// Applies the union in the fixed block order.
    pub fn apply(self, draft: &mut ChecklistDraft) {
        BlockResult::Edital(self.edital).apply(draft);
        BlockResult::ModalidadeParticipacao(self.modalidade_participacao).apply(draft);
        BlockResult::Prazos(self.prazos).apply(draft);
        BlockResult::Documentos(self.documentos).apply(draft);
        BlockResult::VisitaProposta(self.visita_proposta).apply(draft);
        BlockResult::SessaoDisputa(self.sessao_disputa).apply(draft);
        BlockResult::PagamentoContrato(self.pagamento_contrato).apply(draft);
        BlockResult::Analise(self.analise).apply(draft);
    }
}

/// A block answer parsed against its schema.
#[derive(Debug, Clone)]
pub enum BlockResult {
    Edital(EditalPayload),
    ModalidadeParticipacao(ModalidadeParticipacaoPayload),
    Prazos(PrazosPayload),
    Documentos(DocumentosPayload),
    VisitaProposta(VisitaPropostaPayload),
    SessaoDisputa(SessaoDisputaPayload),
    PagamentoContrato(PagamentoContratoPayload),
    Analise(AnalisePayload),
}

impl BlockResult {
    pub fn key(&self) -> BlockKey {
        match self {
            BlockResult::Edital(_) => BlockKey::Edital,
            BlockResult::ModalidadeParticipacao(_) => BlockKey::ModalidadeParticipacao,
            BlockResult::Prazos(_) => BlockKey::Prazos,
            BlockResult::Documentos(_) => BlockKey::Documentos,
            BlockResult::VisitaProposta(_) => BlockKey::VisitaProposta,
            BlockResult::SessaoDisputa(_) => BlockKey::SessaoDisputa,
            BlockResult::PagamentoContrato(_) => BlockKey::PagamentoContrato,
            BlockResult::Analise(_) => BlockKey::Analise,
        }
    }

    /// Projects the payload into the accumulator. Scalars follow the
    /// earlier-wins precedence; evidence goes to the side map.
    pub fn apply(self, draft: &mut ChecklistDraft) {
        let ChecklistDraft { data, evidence } = draft;
        match self {
            BlockResult::Edital(payload) => {
                const B: &str = "edital";
                let e = payload.edital;
                let target = &mut data.edital;
                merge_field(&mut target.licitacao, e.licitacao, evidence, B, "edital.licitacao");
                merge_field(&mut target.edital, e.edital, evidence, B, "edital.edital");
                merge_field(&mut target.orgao, e.orgao, evidence, B, "edital.orgao");
                merge_field(&mut target.objeto, e.objeto, evidence, B, "edital.objeto");
                merge_field(&mut target.data_sessao, e.data_sessao, evidence, B, "edital.dataSessao");
                merge_field(&mut target.portal, e.portal, evidence, B, "edital.portal");
                merge_field(
                    &mut target.numero_processo_interno,
                    e.numero_processo_interno,
                    evidence,
                    B,
                    "edital.numeroProcessoInterno",
                );
                merge_field(&mut target.total_reais, e.total_reais, evidence, B, "edital.totalReais");
                merge_field(&mut target.valor_energia, e.valor_energia, evidence, B, "edital.valorEnergia");
                merge_field(&mut target.volume_energia, e.volume_energia, evidence, B, "edital.volumeEnergia");
                merge_field(
                    &mut target.vigencia_contrato,
                    e.vigencia_contrato,
                    evidence,
                    B,
                    "edital.vigenciaContrato",
                );
                merge_field(
                    &mut target.modalidade_concessionaria,
                    e.modalidade_concessionaria,
                    evidence,
                    B,
                    "edital.modalidadeConcessionaria",
                );
                merge_field(
                    &mut target.prazo_inicio_injecao,
                    e.prazo_inicio_injecao,
                    evidence,
                    B,
                    "edital.prazoInicioInjecao",
                );
            }
            BlockResult::ModalidadeParticipacao(payload) => {
                const B: &str = "modalidade_participacao";
                merge_field(
                    &mut data.modalidade_licitacao,
                    payload.modalidade_licitacao,
                    evidence,
                    B,
                    "modalidadeLicitacao",
                );
                let p = payload.participacao;
                merge_bool_field(
                    &mut data.participacao.permite_consorcio,
                    p.permite_consorcio,
                    evidence,
                    B,
                    "participacao.permiteConsorcio",
                );
                merge_bool_field(
                    &mut data.participacao.beneficios_mpe,
                    p.beneficios_mpe,
                    evidence,
                    B,
                    "participacao.beneficiosMPE",
                );
                merge_field(
                    &mut data.participacao.item_edital,
                    p.item_edital,
                    evidence,
                    B,
                    "participacao.itemEdital",
                );
            }
            BlockResult::Prazos(payload) => {
                const B: &str = "prazos";
                let p = payload.prazos;
                apply_prazo(
                    &mut data.prazos.enviar_proposta_ate,
                    p.enviar_proposta_ate,
                    evidence,
                    B,
                    "prazos.enviarPropostaAte",
                );
                apply_prazo(
                    &mut data.prazos.esclarecimentos_ate,
                    p.esclarecimentos_ate,
                    evidence,
                    B,
                    "prazos.esclarecimentosAte",
                );
                apply_prazo(
                    &mut data.prazos.impugnacao_ate,
                    p.impugnacao_ate,
                    evidence,
                    B,
                    "prazos.impugnacaoAte",
                );
                merge_field(
                    &mut data.prazos.contato_esclarecimento_impugnacao,
                    p.contato_esclarecimento_impugnacao,
                    evidence,
                    B,
                    "prazos.contatoEsclarecimentoImpugnacao",
                );
            }
            BlockResult::Documentos(payload) => {
                const B: &str = "documentos";
                let mut requisitos = Vec::with_capacity(payload.requisitos.len());
                for (idx, item) in payload.requisitos.into_iter().enumerate() {
                    if let Some(record) = item.evidencia {
                        record_evidence(evidence, B, &format!("requisitos[{idx}]"), record);
                    }
                    requisitos.push(Requisito {
                        categoria: item.categoria,
                        referencia: item.referencia,
                        local: item.local,
                        documento: item.documento,
                        solicitado: item.solicitado,
                        status: item.status,
                        observacao: item.observacao,
                    });
                }
                merge_list(&mut data.requisitos, requisitos);
            }
            BlockResult::VisitaProposta(payload) => {
                const B: &str = "visita_proposta";
                merge_bool_field(
                    &mut data.visita_tecnica,
                    payload.visita_tecnica,
                    evidence,
                    B,
                    "visitaTecnica",
                );
                merge_field(
                    &mut data.proposta.validade_proposta,
                    payload.proposta.validade_proposta,
                    evidence,
                    B,
                    "proposta.validadeProposta",
                );
            }
            BlockResult::SessaoDisputa(payload) => {
                const B: &str = "sessao_disputa";
                let s = payload.sessao;
                merge_field(
                    &mut data.sessao.diferenca_entre_lances,
                    s.diferenca_entre_lances,
                    evidence,
                    B,
                    "sessao.diferencaEntreLances",
                );
                merge_field(
                    &mut data.sessao.horas_proposta_ajustada,
                    s.horas_proposta_ajustada,
                    evidence,
                    B,
                    "sessao.horasPropostaAjustada",
                );
                merge_field(
                    &mut data.sessao.aberto_fechado,
                    s.aberto_fechado,
                    evidence,
                    B,
                    "sessao.abertoFechado",
                );
            }
            BlockResult::PagamentoContrato(payload) => {
                const B: &str = "pagamento_contrato";
                merge_field(
                    &mut data.outros_edital.mecanismo_pagamento,
                    payload.outros_edital.mecanismo_pagamento,
                    evidence,
                    B,
                    "outrosEdital.mecanismoPagamento",
                );
            }
            BlockResult::Analise(payload) => {
                const B: &str = "analise";
                merge_field(
                    &mut data.responsavel_analise,
                    payload.responsavel_analise,
                    evidence,
                    B,
                    "responsavelAnalise",
                );
                if data.pontuacao == 0 {
                    data.pontuacao = payload.pontuacao;
                }
                merge_field(&mut data.recomendacao, payload.recomendacao, evidence, B, "recomendacao");
            }
        }
    }
}

fn apply_prazo(
    target: &mut Prazo,
    payload: PrazoPayload,
    evidence: &mut EvidenceMap,
    block: &str,
    path: &str,
) {
    merge_field(
        &mut target.data,
        payload.data,
        evidence,
        block,
        &format!("{path}.data"),
    );
    merge_field(
        &mut target.horario,
        payload.horario,
        evidence,
        block,
        &format!("{path}.horario"),
    );
}

/// Reduces a sequence of block results into a draft, enforcing the fixed
/// merge order regardless of the order results were produced in.
pub fn merge_block_results(results: Vec<BlockResult>) -> ChecklistDraft {
    let mut draft = ChecklistDraft::default();
    for key in BlockKey::iter() {
        for result in results.iter().filter(|result| result.key() == key) {
            result.clone().apply(&mut draft);
        }
    }
    draft
}

/// Groups the flat requisito list by categoria, preserving encounter order.
pub fn requisitos_to_documentos(requisitos: &[Requisito]) -> Vec<DocumentoGrupo> {
    let mut grupos: Vec<DocumentoGrupo> = Vec::new();
    for requisito in requisitos {
        let item = DocumentoItem {
            referencia: requisito.referencia.clone(),
            local: requisito.local.clone(),
            documento: requisito.documento.clone(),
            solicitado: requisito.solicitado,
            status: requisito.status.clone(),
            observacao: requisito.observacao.clone(),
        };
        match grupos
            .iter_mut()
            .find(|grupo| grupo.categoria == requisito.categoria)
        {
            Some(grupo) => grupo.itens.push(item),
            None => grupos.push(DocumentoGrupo {
                categoria: requisito.categoria.clone(),
                itens: vec![item],
            }),
        }
    }
    grupos
}

/// Walks a schemars document and pins every object to
/// `additionalProperties: false` with all properties required, as the
/// provider's strict structured-output mode expects.
fn strictify_schema(mut schema: JsonValue) -> JsonValue {
    strictify_node(&mut schema);
    schema
}

fn strictify_node(node: &mut JsonValue) {
    let JsonValue::Object(map) = node else {
        return;
    };
    let property_keys = match map.get("properties") {
        Some(JsonValue::Object(properties)) => Some(
            properties
                .keys()
                .cloned()
                .map(JsonValue::String)
                .collect::<Vec<_>>(),
        ),
        _ => None,
    };
    if let Some(keys) = property_keys {
        map.insert("required".to_string(), JsonValue::Array(keys));
        map.insert("additionalProperties".to_string(), JsonValue::Bool(false));
    }
    for value in map.values_mut() {
        match value {
            JsonValue::Object(_) => strictify_node(value),
            JsonValue::Array(items) => {
                for item in items {
                    strictify_node(item);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(value: &str) -> Field {
        Field {
            value: value.to_string(),
            evidencia: None,
        }
    }

    #[test]
    fn every_block_key_has_a_spec_in_merge_order() {
        let keys: Vec<BlockKey> = BLOCK_SPECS.iter().map(|spec| spec.key).collect();
        let expected: Vec<BlockKey> = BlockKey::iter().collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn search_query_expands_hint_phrases() {
        let spec = spec_for(BlockKey::Documentos);
        let query = spec.search_query();
        assert!(query.starts_with(spec.query));
        assert!(query.contains("documentação de habilitação"));
    }

    #[test]
    fn schemas_are_strict_objects() {
        for spec in block_specs() {
            let schema = spec.schema();
            assert_eq!(
                schema["additionalProperties"],
                json!(false),
                "block {} schema must forbid extra keys",
                spec.key
            );
            assert!(schema["properties"].is_object());
            assert!(schema["required"].is_array());
        }
    }

    #[test]
    fn block_answer_parses_into_typed_payload() {
        let spec = spec_for(BlockKey::ModalidadeParticipacao);
        let answer = json!({
            "modalidadeLicitacao": {"value": "Pregão Eletrônico"},
            "participacao": {
                "permiteConsorcio": {"value": "não"},
                "beneficiosMPE": {"value": true},
                "itemEdital": {"value": "4.1", "evidencia": {"trecho": "item 4.1", "ref": "4.1"}}
            }
        });
        let result = spec.parse(answer).expect("answer matches schema");
        let BlockResult::ModalidadeParticipacao(payload) = result else {
            panic!("wrong payload variant");
        };
        assert_eq!(payload.modalidade_licitacao.value, "Pregão Eletrônico");
        assert!(!payload.participacao.permite_consorcio.value);
        assert!(payload.participacao.beneficios_mpe.value);
    }

    #[test]
    fn merge_respects_fixed_order_for_overlapping_keys() {
        // Both the edital block and the modalidade block can describe the
        // modality; the modalidade block owns `modalidadeLicitacao`, and a
        // later empty answer must not erase it.
        let modalidade = BlockResult::ModalidadeParticipacao(ModalidadeParticipacaoPayload {
            modalidade_licitacao: field("Pregão Eletrônico"),
            ..ModalidadeParticipacaoPayload::default()
        });
        let analise = BlockResult::Analise(AnalisePayload {
            recomendacao: field("Recomenda-se participar."),
            pontuacao: 72,
            ..AnalisePayload::default()
        });

        // Feed results out of order; the reducer must still apply the fixed
        // sequence.
        let draft = merge_block_results(vec![analise, modalidade]);
        assert_eq!(draft.data.modalidade_licitacao, "Pregão Eletrônico");
        assert_eq!(draft.data.pontuacao, 72);
        assert_eq!(draft.data.recomendacao, "Recomenda-se participar.");
    }

    #[test]
    fn merging_an_empty_block_is_identity() {
        let modalidade = BlockResult::ModalidadeParticipacao(ModalidadeParticipacaoPayload {
            modalidade_licitacao: field("Concorrência"),
            ..ModalidadeParticipacaoPayload::default()
        });
        let baseline = merge_block_results(vec![modalidade.clone()]);

        let with_empty = merge_block_results(vec![
            modalidade,
            BlockResult::SessaoDisputa(SessaoDisputaPayload::default()),
        ]);
        assert_eq!(baseline.data, with_empty.data);
    }

    #[test]
    fn evidence_lands_in_the_side_map_not_the_data() {
        let payload = EditalPayload {
            edital: EditalFields {
                orgao: Field {
                    value: "Prefeitura Municipal de X".to_string(),
                    evidencia: Some(Evidence {
                        trecho: "PREFEITURA MUNICIPAL DE X".to_string(),
                        referencia: "1.1".to_string(),
                        page: Some(1),
                    }),
                },
                ..EditalFields::default()
            },
        };
        let draft = merge_block_results(vec![BlockResult::Edital(payload)]);
        assert_eq!(draft.data.edital.orgao, "Prefeitura Municipal de X");
        let record = &draft.evidence["edital"]["edital.orgao"];
        assert_eq!(record.referencia, "1.1");
        assert!(draft.data.evidence.is_empty(), "data tree carries no evidence yet");
    }

    #[test]
    fn requisitos_group_by_categoria_in_encounter_order() {
        let requisitos = vec![
            Requisito {
                categoria: "Documentação".to_string(),
                documento: "Contrato social".to_string(),
                ..Requisito::default()
            },
            Requisito {
                categoria: "Atestado Técnico".to_string(),
                documento: "Atestado de capacidade".to_string(),
                ..Requisito::default()
            },
            Requisito {
                categoria: "Documentação".to_string(),
                documento: "CNPJ".to_string(),
                ..Requisito::default()
            },
        ];
        let grupos = requisitos_to_documentos(&requisitos);
        assert_eq!(grupos.len(), 2);
        assert_eq!(grupos[0].categoria, "Documentação");
        assert_eq!(grupos[0].itens.len(), 2);
        assert_eq!(grupos[1].categoria, "Atestado Técnico");
    }

    #[test]
    fn full_payload_schema_covers_all_blocks() {
        let schema = FullChecklistPayload::schema();
        let properties = schema["properties"].as_object().expect("object schema");
        for key in ["edital", "prazos", "requisitos", "sessao", "outrosEdital", "pontuacao"] {
            assert!(properties.contains_key(key), "missing property {key}");
        }
    }
}
