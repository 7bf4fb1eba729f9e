use std::sync::LazyLock;

use regex::Regex;

/// Normalizes raw text extracted from a document before chunking.
///
/// Line structure is preserved: section-hint detection depends on headings
/// staying anchored at line starts.
pub fn cleanup_segment_text(text: &str) -> String {
    let mut cleaned = text
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n'))
        .collect::<String>();

    cleaned = join_hyphenated_words(&cleaned);
    cleaned = collapse_blank_lines(&cleaned);

    cleaned
        .lines()
        .map(collapse_inline_whitespace)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn join_hyphenated_words(input: &str) -> String {
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\p{L}+)-\s*\n\s*(\p{L}+)").expect("hyphenation regex"));
    RE.replace_all(input, "$1$2").into_owned()
}

fn collapse_blank_lines(input: &str) -> String {
    static RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank-line regex"));
    RE.replace_all(input, "\n\n").into_owned()
}

fn collapse_inline_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_repeated_spaces_within_lines() {
        let input = "DOCUMENTAÇÃO  DE   HABILITAÇÃO\nOs  licitantes deverão apresentar.";
        assert_eq!(
            cleanup_segment_text(input),
            "DOCUMENTAÇÃO DE HABILITAÇÃO\nOs licitantes deverão apresentar."
        );
    }

    #[test]
    fn keeps_headings_at_line_starts() {
        let input = "objeto da licitação\n\n\n\nPRAZOS\nEnviar proposta até 10/02/2026.";
        let cleaned = cleanup_segment_text(input);
        assert!(cleaned.lines().any(|line| line == "PRAZOS"));
    }

    #[test]
    fn joins_words_hyphenated_across_lines() {
        let input = "qualifica-\nção técnica";
        assert_eq!(cleanup_segment_text(input), "qualificação técnica");
    }

    #[test]
    fn strips_control_characters() {
        let input = "valor\u{0} total\u{7}: R$ 1.234,56";
        assert_eq!(cleanup_segment_text(input), "valor total: R$ 1.234,56");
    }
}
