//! Final pass over the merged checklist: total defaults, date and money
//! normalisation, requisito deduplication, and payment-mechanism
//! sanitisation. The whole pass is idempotent.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::constants::CHECKLIST_SCHEMA_VERSION;
use crate::pipeline::blocks::requisitos_to_documentos;
use crate::pipeline::checklist::{Checklist, ChecklistDraft};

const MECANISMO_MAX_CHARS: usize = 600;

/// Turns the merged draft into the persisted checklist: stitches the
/// evidence map in, pins the schema version, derives `documentos` from
/// `requisitos`, and normalises every field. Defaults are total by
/// construction because the typed model carries every required key.
pub fn finalize(draft: ChecklistDraft) -> Checklist {
    let ChecklistDraft { mut data, evidence } = draft;
    data.evidence = evidence;
    data.schema_version = CHECKLIST_SCHEMA_VERSION;
    normalize(&mut data);
    data
}

/// Normalises a checklist in place. Safe to run repeatedly.
pub fn normalize(checklist: &mut Checklist) {
    checklist.schema_version = CHECKLIST_SCHEMA_VERSION;
    checklist.pontuacao = checklist.pontuacao.clamp(0, 100);

    dedup_requisitos(checklist);
    checklist.documentos = requisitos_to_documentos(&checklist.requisitos);

    for_each_text(checklist, |text| {
        let normalised = normalize_scalar(text);
        if normalised != *text {
            *text = normalised;
        }
    });

    let mecanismo = sanitize_mecanismo(&checklist.outros_edital.mecanismo_pagamento);
    checklist.outros_edital.mecanismo_pagamento = mecanismo;
}

fn normalize_scalar(value: &str) -> String {
    let value = normalize_date(value);
    normalize_money(&value)
}

/// Removes duplicate requisitos by `(categoria, documento, referencia)`,
/// keeping the first occurrence, so the derived `documentos` groups carry no
/// duplicate itens.
fn dedup_requisitos(checklist: &mut Checklist) {
    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    checklist.requisitos.retain(|requisito| {
        seen.insert((
            requisito.categoria.clone(),
            requisito.documento.clone(),
            requisito.referencia.clone(),
        ))
    });
}

static DATE_ISO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d{4})-(\d{2})-(\d{2})\s*$").expect("iso date regex"));
static DATE_DASHED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d{2})-(\d{2})-(\d{4})\s*$").expect("dashed date regex"));
static DATE_SLASHED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d{2})/(\d{2})/(\d{4})\s*$").expect("slashed date regex"));
static DATE_WRITTEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(\d{1,2})\s+de\s+(\p{L}+)\s+de\s+(\d{4})\s*$").expect("written date regex")
});

/// Rewrites recognised date shapes to `DD/MM/YYYY`; anything else (including
/// calendar-invalid matches) passes through unchanged.
pub fn normalize_date(value: &str) -> String {
    if let Some(caps) = DATE_SLASHED.captures(value) {
        // Already canonical; strip stray padding only.
        return format!("{}/{}/{}", &caps[1], &caps[2], &caps[3]);
    }
    if let Some(caps) = DATE_ISO.captures(value) {
        return rebuild_date(&caps[3], &caps[2], &caps[1], value);
    }
    if let Some(caps) = DATE_DASHED.captures(value) {
        return rebuild_date(&caps[1], &caps[2], &caps[3], value);
    }
    if let Some(caps) = DATE_WRITTEN.captures(value) {
        if let Some(month) = month_number(&caps[2]) {
            let day = format!("{:0>2}", &caps[1]);
            return rebuild_date(&day, &format!("{month:02}"), &caps[3], value);
        }
    }
    value.to_string()
}

fn rebuild_date(day: &str, month: &str, year: &str, original: &str) -> String {
    let valid = year
        .parse::<i32>()
        .ok()
        .zip(month.parse::<u32>().ok())
        .zip(day.parse::<u32>().ok())
        .and_then(|((y, m), d)| NaiveDate::from_ymd_opt(y, m, d))
        .is_some();
    if valid {
        format!("{day}/{month}/{year}")
    } else {
        original.to_string()
    }
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "janeiro",
        "fevereiro",
        "março",
        "abril",
        "maio",
        "junho",
        "julho",
        "agosto",
        "setembro",
        "outubro",
        "novembro",
        "dezembro",
    ];
    let lowered = name.to_lowercase();
    MONTHS
        .iter()
        .position(|month| *month == lowered)
        .map(|idx| idx as u32 + 1)
}

static MONEY_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d{1,3}(\.\d{3})*,\d{2}\s*$").expect("money regex"));

/// Prefixes bare Brazilian currency amounts with `R$ `.
pub fn normalize_money(value: &str) -> String {
    if MONEY_BARE.is_match(value) {
        format!("R$ {}", value.trim())
    } else {
        value.to_string()
    }
}

static EVIDENCE_FRAGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)[,'"]\s*["']?evidencia["']?\s*[:{]|["']?trecho["']?\s*:"#)
        .expect("evidence fragment regex")
});

/// Strips JSON-evidence debris the model sometimes appends to the payment
/// mechanism, trims dangling delimiters, and caps the length.
pub fn sanitize_mecanismo(value: &str) -> String {
    let mut cleaned = match EVIDENCE_FRAGMENT.find(value) {
        Some(found) => &value[..found.start()],
        None => value,
    }
    .trim()
    .to_string();

    while let Some(last) = cleaned.chars().next_back() {
        if matches!(last, '}' | '`' | '"' | '\'' | ',' | '{') {
            cleaned.pop();
            while cleaned.ends_with(char::is_whitespace) {
                cleaned.pop();
            }
        } else {
            break;
        }
    }

    if cleaned.chars().count() > MECANISMO_MAX_CHARS {
        let truncated: String = cleaned.chars().take(MECANISMO_MAX_CHARS - 1).collect();
        return format!("{}…", truncated.trim_end());
    }
    cleaned
}

/// Applies `f` to every free-text field of the checklist.
fn for_each_text<F: FnMut(&mut String)>(checklist: &mut Checklist, mut f: F) {
    let edital = &mut checklist.edital;
    for text in [
        &mut edital.licitacao,
        &mut edital.edital,
        &mut edital.orgao,
        &mut edital.objeto,
        &mut edital.data_sessao,
        &mut edital.portal,
        &mut edital.numero_processo_interno,
        &mut edital.total_reais,
        &mut edital.valor_energia,
        &mut edital.volume_energia,
        &mut edital.vigencia_contrato,
        &mut edital.modalidade_concessionaria,
        &mut edital.prazo_inicio_injecao,
    ] {
        f(text);
    }

    f(&mut checklist.modalidade_licitacao);
    f(&mut checklist.participacao.item_edital);

    let prazos = &mut checklist.prazos;
    for prazo in [
        &mut prazos.enviar_proposta_ate,
        &mut prazos.esclarecimentos_ate,
        &mut prazos.impugnacao_ate,
    ] {
        f(&mut prazo.data);
        f(&mut prazo.horario);
    }
    f(&mut prazos.contato_esclarecimento_impugnacao);

    for requisito in &mut checklist.requisitos {
        f(&mut requisito.referencia);
        f(&mut requisito.local);
        f(&mut requisito.documento);
        f(&mut requisito.status);
        f(&mut requisito.observacao);
    }
    for grupo in &mut checklist.documentos {
        for item in &mut grupo.itens {
            f(&mut item.referencia);
            f(&mut item.local);
            f(&mut item.documento);
            f(&mut item.status);
            f(&mut item.observacao);
        }
    }

    f(&mut checklist.proposta.validade_proposta);
    f(&mut checklist.sessao.diferenca_entre_lances);
    f(&mut checklist.sessao.horas_proposta_ajustada);
    f(&mut checklist.sessao.aberto_fechado);
    f(&mut checklist.outros_edital.mecanismo_pagamento);
    f(&mut checklist.responsavel_analise);
    f(&mut checklist.recomendacao);
}
