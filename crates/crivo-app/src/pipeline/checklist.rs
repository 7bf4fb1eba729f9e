//! Typed schema-v2 checklist model.
//!
//! Generator output is deserialised into these types at the provider
//! boundary; everything downstream (merge, defaulting, normalisation,
//! persistence) works on typed values. Leaves returned by the generator are
//! `Field`/`BoolField` wrappers carrying optional [`Evidence`]; the persisted
//! checklist keeps plain values and accumulates evidence in a sibling map
//! keyed by block, so quotes never collide with data during the merge.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::CHECKLIST_SCHEMA_VERSION;

/// Source quote backing an extracted field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Evidence {
    /// Verbatim excerpt the model relied on.
    #[serde(default)]
    pub trecho: String,
    /// Edital item or section reference, e.g. `6.2.1.1.1`.
    #[serde(rename = "ref", default)]
    pub referencia: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// String-valued leaf returned by the generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Field {
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidencia: Option<Evidence>,
}

/// Boolean leaf; deserialisation is lenient because providers occasionally
/// answer with `"sim"`, `"não"`, `0` or `1` despite the schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BoolField {
    #[serde(default, deserialize_with = "coerce_bool")]
    pub value: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidencia: Option<Evidence>,
}

/// Evidence records grouped `block key → field path → evidence`.
pub type EvidenceMap = BTreeMap<String, BTreeMap<String, Evidence>>;

/// Identification header of the notice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EditalInfo {
    pub licitacao: String,
    pub edital: String,
    pub orgao: String,
    pub objeto: String,
    pub data_sessao: String,
    pub portal: String,
    pub numero_processo_interno: String,
    pub total_reais: String,
    pub valor_energia: String,
    pub volume_energia: String,
    pub vigencia_contrato: String,
    pub modalidade_concessionaria: String,
    pub prazo_inicio_injecao: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Participacao {
    pub permite_consorcio: bool,
    #[serde(rename = "beneficiosMPE")]
    pub beneficios_mpe: bool,
    pub item_edital: String,
}

/// A deadline split into date and time as printed in the notice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Prazo {
    pub data: String,
    pub horario: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Prazos {
    pub enviar_proposta_ate: Prazo,
    pub esclarecimentos_ate: Prazo,
    pub impugnacao_ate: Prazo,
    pub contato_esclarecimento_impugnacao: String,
}

/// One required document, flat with its categoria.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Requisito {
    pub categoria: String,
    pub referencia: String,
    pub local: String,
    pub documento: String,
    pub solicitado: bool,
    pub status: String,
    pub observacao: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentoItem {
    pub referencia: String,
    pub local: String,
    pub documento: String,
    pub solicitado: bool,
    pub status: String,
    pub observacao: String,
}

/// Requirements grouped by categoria, derived from `requisitos`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentoGrupo {
    pub categoria: String,
    pub itens: Vec<DocumentoItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Proposta {
    pub validade_proposta: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sessao {
    pub diferenca_entre_lances: String,
    pub horas_proposta_ajustada: String,
    pub aberto_fechado: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutrosEdital {
    pub mecanismo_pagamento: String,
}

/// The merged, defaulted, normalised checklist persisted per document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Checklist {
    pub edital: EditalInfo,
    pub modalidade_licitacao: String,
    pub participacao: Participacao,
    pub prazos: Prazos,
    pub documentos: Vec<DocumentoGrupo>,
    pub requisitos: Vec<Requisito>,
    pub visita_tecnica: bool,
    pub proposta: Proposta,
    pub sessao: Sessao,
    pub outros_edital: OutrosEdital,
    pub responsavel_analise: String,
    pub pontuacao: i64,
    pub recomendacao: String,
    pub schema_version: u32,
    pub evidence: EvidenceMap,
}

/// Accumulator threaded through the eight block applications. Data and
/// evidence stay in sibling trees; they are stitched together by
/// [`crate::pipeline::normalize::finalize`].
#[derive(Debug, Clone, Default)]
pub struct ChecklistDraft {
    pub data: Checklist,
    pub evidence: EvidenceMap,
}

impl Checklist {
    pub fn is_current_schema(&self) -> bool {
        self.schema_version == CHECKLIST_SCHEMA_VERSION
    }
}

/// Later value wins only when the earlier one is empty.
pub(crate) fn merge_text(target: &mut String, incoming: &str) {
    if target.trim().is_empty() && !incoming.is_empty() {
        *target = incoming.to_string();
    }
}

pub(crate) fn merge_flag(target: &mut bool, incoming: bool) {
    *target = *target || incoming;
}

/// Lists are replaced wholesale by the later block.
pub(crate) fn merge_list<T>(target: &mut Vec<T>, incoming: Vec<T>) {
    if !incoming.is_empty() {
        *target = incoming;
    }
}

pub(crate) fn record_evidence(
    evidence: &mut EvidenceMap,
    block: &str,
    path: &str,
    record: Evidence,
) {
    if record.trecho.trim().is_empty() && record.referencia.trim().is_empty() {
        return;
    }
    evidence
        .entry(block.to_string())
        .or_default()
        .insert(path.to_string(), record);
}

pub(crate) fn merge_field(
    target: &mut String,
    field: Field,
    evidence: &mut EvidenceMap,
    block: &str,
    path: &str,
) {
    if let Some(record) = field.evidencia {
        record_evidence(evidence, block, path, record);
    }
    merge_text(target, &field.value);
}

pub(crate) fn merge_bool_field(
    target: &mut bool,
    field: BoolField,
    evidence: &mut EvidenceMap,
    block: &str,
    path: &str,
) {
    if let Some(record) = field.evidencia {
        record_evidence(evidence, block, path, record);
    }
    merge_flag(target, field.value);
}

/// `"sim"`/`"yes"`/`"true"`/`1` are true; `""`/`"não"`/`"no"`/`"false"`/`0`
/// are false; any other non-empty string is true.
pub(crate) fn truthy(raw: &str) -> bool {
    !matches!(
        raw.trim().to_lowercase().as_str(),
        "" | "false" | "não" | "nao" | "no" | "0"
    )
}

pub(crate) fn coerce_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flex {
        Bool(bool),
        Int(i64),
        Float(f64),
        Text(String),
        Null,
    }

    Ok(match Flex::deserialize(deserializer)? {
        Flex::Bool(value) => value,
        Flex::Int(value) => value != 0,
        Flex::Float(value) => value != 0.0,
        Flex::Text(value) => truthy(&value),
        Flex::Null => false,
    })
}

pub(crate) fn coerce_score<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flex {
        Int(i64),
        Float(f64),
        Text(String),
        Null,
    }

    Ok(match Flex::deserialize(deserializer)? {
        Flex::Int(value) => value,
        Flex::Float(value) => value as i64,
        Flex::Text(value) => value.trim().parse().unwrap_or(0),
        Flex::Null => 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_text_prefers_the_earlier_non_empty_value() {
        let mut target = String::new();
        merge_text(&mut target, "Pregão Eletrônico");
        assert_eq!(target, "Pregão Eletrônico");

        merge_text(&mut target, "Concorrência");
        assert_eq!(target, "Pregão Eletrônico", "earlier value must win");

        let mut target = "Pregão Eletrônico".to_string();
        merge_text(&mut target, "");
        assert_eq!(target, "Pregão Eletrônico", "empty never overwrites");
    }

    #[test]
    fn merge_list_ignores_empty_incoming() {
        let mut target = vec![1, 2];
        merge_list(&mut target, Vec::new());
        assert_eq!(target, vec![1, 2]);
        merge_list(&mut target, vec![3]);
        assert_eq!(target, vec![3]);
    }

    #[test]
    fn bool_field_accepts_provider_shaped_booleans() {
        for (raw, expected) in [
            (json!({"value": true}), true),
            (json!({"value": "sim"}), true),
            (json!({"value": "yes"}), true),
            (json!({"value": 1}), true),
            (json!({"value": "exige visita"}), true),
            (json!({"value": "não"}), false),
            (json!({"value": "nao"}), false),
            (json!({"value": "no"}), false),
            (json!({"value": "false"}), false),
            (json!({"value": 0}), false),
            (json!({"value": ""}), false),
            (json!({"value": null}), false),
        ] {
            let field: BoolField = serde_json::from_value(raw.clone()).expect("bool field parses");
            assert_eq!(field.value, expected, "input {raw}");
        }
    }

    #[test]
    fn evidence_ref_serialises_as_ref() {
        let record = Evidence {
            trecho: "item 6.2".to_string(),
            referencia: "6.2".to_string(),
            page: Some(12),
        };
        let value = serde_json::to_value(&record).expect("serialises");
        assert_eq!(value["ref"], "6.2");
        assert_eq!(value["page"], 12);
    }

    #[test]
    fn empty_evidence_records_are_dropped() {
        let mut evidence = EvidenceMap::new();
        record_evidence(&mut evidence, "edital", "edital.orgao", Evidence::default());
        assert!(evidence.is_empty());

        record_evidence(
            &mut evidence,
            "edital",
            "edital.orgao",
            Evidence {
                trecho: "Prefeitura de X".to_string(),
                ..Evidence::default()
            },
        );
        assert_eq!(evidence["edital"].len(), 1);
    }

    #[test]
    fn checklist_round_trips_with_camel_case_keys() {
        let mut checklist = Checklist::default();
        checklist.edital.orgao = "Prefeitura Municipal de X".to_string();
        checklist.participacao.beneficios_mpe = true;
        checklist.schema_version = CHECKLIST_SCHEMA_VERSION;

        let value = serde_json::to_value(&checklist).expect("serialises");
        assert_eq!(value["edital"]["orgao"], "Prefeitura Municipal de X");
        assert_eq!(value["participacao"]["beneficiosMPE"], true);
        assert_eq!(value["schemaVersion"], 2);
        assert_eq!(value["visitaTecnica"], false);

        let back: Checklist = serde_json::from_value(value).expect("deserialises");
        assert_eq!(back, checklist);
    }
}
