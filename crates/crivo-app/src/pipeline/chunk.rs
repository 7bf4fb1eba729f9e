//! Re-segmentation of parser output into retrieval-sized chunks.
//!
//! Chunks carry a heading-derived section hint and a best-effort page number.
//! All operations are pure; embedding vectors are attached later by the
//! ingestion orchestrator.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, EnumString};

use crate::constants::{
    DEFAULT_CHUNK_MAX_CHARS, DEFAULT_CHUNK_MIN_CHARS, DEFAULT_CHUNK_OVERLAP_CHARS,
};
use crate::pipeline::parse::Segment;

/// Closed tag set matching chunks to checklist blocks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SectionHint {
    Documentos,
    Prazos,
    SessaoDisputa,
    Proposta,
    Pagamento,
    Analise,
    Edital,
    Modalidade,
}

impl SectionHint {
    /// Hint phrases appended to a block's canonical query during retrieval.
    pub fn phrases(self) -> &'static [&'static str] {
        match self {
            SectionHint::Documentos => &[
                "documentação de habilitação",
                "qualificação técnica jurídica fiscal econômica",
                "atestado de capacidade técnica",
            ],
            SectionHint::Prazos => &[
                "prazo para envio da proposta",
                "pedidos de esclarecimento",
                "impugnação ao edital",
            ],
            SectionHint::SessaoDisputa => &[
                "sessão pública de disputa",
                "lances modo aberto fechado",
            ],
            SectionHint::Proposta => &["validade da proposta", "visita técnica"],
            SectionHint::Pagamento => &["condições de pagamento", "faturamento medição"],
            SectionHint::Analise => &["valor estimado do contrato", "condições de participação"],
            SectionHint::Edital => &[
                "órgão número do edital objeto",
                "data da sessão portal processo",
            ],
            SectionHint::Modalidade => &[
                "modalidade pregão eletrônico",
                "participação consórcio microempresa",
            ],
        }
    }
}

/// Heading patterns anchored to line starts; first match wins.
static HEADING_PATTERNS: LazyLock<Vec<(Regex, SectionHint)>> = LazyLock::new(|| {
    let table: &[(&str, SectionHint)] = &[
        (r"DOCUMENTA[ÇC][ÃA]O|HABILITA[ÇC][ÃA]O", SectionHint::Documentos),
        (r"PRAZOS?\b|IMPUGNA[ÇC][ÃA]O", SectionHint::Prazos),
        (r"SESS[ÃA]O|DISPUTA|LANCES", SectionHint::SessaoDisputa),
        (r"PROPOSTA", SectionHint::Proposta),
        (r"PAGAMENTO", SectionHint::Pagamento),
        (r"EDITAL|OBJETO", SectionHint::Edital),
        (
            r"MODALIDADE|CONS[ÓO]RCIO|PARTICIPA[ÇC][ÃA]O",
            SectionHint::Modalidade,
        ),
    ];
    table
        .iter()
        .map(|(pattern, hint)| {
            let anchored = format!(
                r"(?im)^\s*(?:[\d.]+\s*[-–.)]?\s*)?(?:d[aoe]s?\s+)?(?:{pattern})"
            );
            (Regex::new(&anchored).expect("heading regex compiles"), *hint)
        })
        .collect()
});

/// Scans chunk text for heading patterns; ties resolved by table order.
pub fn detect_section_hint(text: &str) -> Option<SectionHint> {
    HEADING_PATTERNS
        .iter()
        .find(|(regex, _)| regex.is_match(text))
        .map(|(_, hint)| *hint)
}

/// A retrieval-ready chunk of the source document.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedChunk {
    /// Ordinal position in the chunk stream; doubles as the tie-break id.
    pub id: usize,
    pub text: String,
    pub page_number: Option<u32>,
    pub section_hint: Option<SectionHint>,
    /// Attached after the embedding pass; empty until then.
    pub embedding: Vec<f32>,
}

/// Chunking thresholds, in characters. Overlap counts toward the length of
/// the chunk it is prepended to.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerOptions {
    pub min_chars: usize,
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        Self {
            min_chars: DEFAULT_CHUNK_MIN_CHARS,
            max_chars: DEFAULT_CHUNK_MAX_CHARS,
            overlap_chars: DEFAULT_CHUNK_OVERLAP_CHARS,
        }
    }
}

/// Merges parser segments into overlapping chunks.
///
/// Every chunk except possibly the last has a length in
/// `[min(min_chars, total), max_chars]`; for adjacent chunks the
/// `overlap_chars`-suffix of the former equals the prefix of the latter.
pub fn chunk_segments(segments: &[Segment], options: &ChunkerOptions) -> Vec<NormalizedChunk> {
    debug_assert!(options.min_chars > 0);
    debug_assert!(options.max_chars >= options.min_chars);
    debug_assert!(options.overlap_chars < options.min_chars);

    let mut chars: Vec<char> = Vec::new();
    let mut spans: Vec<(usize, usize, Option<u32>)> = Vec::with_capacity(segments.len());
    for (idx, segment) in segments.iter().enumerate() {
        if idx > 0 {
            chars.push('\n');
        }
        let start = chars.len();
        chars.extend(segment.text.chars());
        spans.push((start, chars.len(), segment.page_number));
    }

    let total = chars.len();
    if total == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut covered = 0usize;
    while covered < total {
        let start = if chunks.is_empty() {
            0
        } else {
            covered.saturating_sub(options.overlap_chars)
        };
        let remaining = total - start;
        let end = if remaining <= options.max_chars {
            total
        } else {
            find_break(&chars, start + options.min_chars, start + options.max_chars)
        };

        let text: String = chars[start..end].iter().collect();
        let page_number = earliest_page(&spans, start, end);
        let section_hint = detect_section_hint(&text);
        chunks.push(NormalizedChunk {
            id: chunks.len(),
            text,
            page_number,
            section_hint,
            embedding: Vec::new(),
        });
        covered = end;
    }

    chunks
}

/// Picks a break position in `[lo, hi]`: sentence boundary if one exists,
/// otherwise the last whitespace, otherwise a hard cut at `hi`.
fn find_break(chars: &[char], lo: usize, hi: usize) -> usize {
    debug_assert!(lo <= hi);
    debug_assert!(hi < chars.len());

    for idx in (lo..=hi).rev() {
        if is_sentence_boundary(chars, idx) {
            return idx;
        }
    }
    for idx in (lo..=hi).rev() {
        if chars[idx].is_whitespace() {
            return idx;
        }
    }
    hi
}

/// A boundary sits after `.`/`;` followed by whitespace, or after a newline
/// followed by a capital. Dots inside numeric tokens (`6.2.1`) never qualify
/// because the follower must be whitespace.
fn is_sentence_boundary(chars: &[char], idx: usize) -> bool {
    if idx == 0 || idx >= chars.len() {
        return false;
    }
    let prev = chars[idx - 1];
    let here = chars[idx];
    if matches!(prev, '.' | ';') && here.is_whitespace() {
        return true;
    }
    prev == '\n' && here.is_uppercase()
}

fn earliest_page(spans: &[(usize, usize, Option<u32>)], start: usize, end: usize) -> Option<u32> {
    spans
        .iter()
        .filter(|(span_start, span_end, _)| *span_end > start && *span_start < end)
        .find_map(|(_, _, page)| *page)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence_stream(sentences: usize) -> String {
        (0..sentences)
            .map(|idx| format!("A cláusula {idx} estabelece condições para o certame público."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn single_segment(text: String) -> Vec<Segment> {
        vec![Segment {
            text,
            page_number: Some(1),
        }]
    }

    #[test]
    fn short_input_yields_one_whole_chunk() {
        let segments = single_segment("Objeto: aquisição de material escolar.".to_string());
        let chunks = chunk_segments(&segments, &ChunkerOptions::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, segments[0].text);
        assert_eq!(chunks[0].page_number, Some(1));
    }

    #[test]
    fn chunk_lengths_stay_within_bounds() {
        let options = ChunkerOptions::default();
        let segments = single_segment(sentence_stream(200));
        let chunks = chunk_segments(&segments, &options);
        assert!(chunks.len() > 1);
        for chunk in &chunks[..chunks.len() - 1] {
            let len = chunk.text.chars().count();
            assert!(
                (options.min_chars..=options.max_chars).contains(&len),
                "chunk {} length {len} out of bounds",
                chunk.id
            );
        }
        let last = chunks.last().expect("at least one chunk");
        assert!(last.text.chars().count() <= options.max_chars);
    }

    #[test]
    fn concatenated_chunks_reconstruct_the_source() {
        let options = ChunkerOptions::default();
        let source = sentence_stream(150);
        let segments = single_segment(source.clone());
        let chunks = chunk_segments(&segments, &options);

        let mut rebuilt = String::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let skip = if idx == 0 { 0 } else { options.overlap_chars };
            rebuilt.extend(chunk.text.chars().skip(skip));
        }
        assert_eq!(rebuilt, source);
    }

    #[test]
    fn adjacent_chunks_share_the_overlap() {
        let options = ChunkerOptions::default();
        let segments = single_segment(sentence_stream(150));
        let chunks = chunk_segments(&segments, &options);
        assert!(chunks.len() > 2);

        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].text.chars().collect();
            let next: Vec<char> = pair[1].text.chars().collect();
            if prev.len() < 300 || next.len() < 300 {
                continue;
            }
            let suffix: String = prev[prev.len() - options.overlap_chars..].iter().collect();
            let prefix: String = next[..options.overlap_chars].iter().collect();
            assert_eq!(suffix, prefix, "overlap mismatch at chunk {}", pair[1].id);
        }
    }

    #[test]
    fn chunks_never_split_words() {
        let options = ChunkerOptions::default();
        let segments = single_segment(sentence_stream(150));
        let chunks = chunk_segments(&segments, &options);
        for pair in chunks.windows(2) {
            let prev_last = pair[0].text.chars().next_back().expect("non-empty chunk");
            let next_new_first = pair[1]
                .text
                .chars()
                .nth(options.overlap_chars)
                .expect("next chunk longer than the overlap");
            assert!(
                !(prev_last.is_alphanumeric() && next_new_first.is_alphanumeric()),
                "word split across chunks {} and {}",
                pair[0].id,
                pair[1].id
            );
        }
    }

    #[test]
    fn chunk_inherits_earliest_covered_page() {
        let options = ChunkerOptions {
            min_chars: 80,
            max_chars: 120,
            overlap_chars: 20,
        };
        let segments = vec![
            Segment {
                text: sentence_stream(2),
                page_number: Some(3),
            },
            Segment {
                text: sentence_stream(2),
                page_number: Some(4),
            },
        ];
        let chunks = chunk_segments(&segments, &options);
        assert_eq!(chunks[0].page_number, Some(3));
        assert_eq!(
            chunks.last().expect("chunks").page_number,
            Some(4),
            "tail chunk should come from the second page"
        );
    }

    #[test]
    fn detects_heading_hints_with_first_match_winning() {
        assert_eq!(
            detect_section_hint("6. DOCUMENTAÇÃO DE HABILITAÇÃO\nOs licitantes..."),
            Some(SectionHint::Documentos)
        );
        assert_eq!(
            detect_section_hint("12.1 PRAZOS\nEnviar proposta até..."),
            Some(SectionHint::Prazos)
        );
        assert_eq!(
            detect_section_hint("DA SESSÃO DE LANCES\ndiferença mínima..."),
            Some(SectionHint::SessaoDisputa)
        );
        assert_eq!(
            detect_section_hint("9. DA PROPOSTA\nvalidade de 60 dias"),
            Some(SectionHint::Proposta)
        );
        assert_eq!(
            detect_section_hint("15. DO PAGAMENTO\nmediante medição"),
            Some(SectionHint::Pagamento)
        );
        // Both DOCUMENTAÇÃO and PROPOSTA appear; table order decides.
        assert_eq!(
            detect_section_hint("DOCUMENTAÇÃO\n...\nPROPOSTA\n..."),
            Some(SectionHint::Documentos)
        );
        assert_eq!(detect_section_hint("texto corrido sem títulos"), None);
    }

    #[test]
    fn heading_must_be_anchored_to_a_line_start() {
        let text = "O atraso no pagamento gera multa prevista em contrato.";
        assert_eq!(detect_section_hint(text), None);
    }
}
