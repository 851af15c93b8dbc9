//! Message intent detection for retrieval steering.
//!
//! Pure text analysis: does the message ask about recent conversations,
//! does it reference files, and can the search question be enriched with
//! semantic hint terms so factual content ranks above conversational
//! noise.

use std::sync::LazyLock;

use regex::Regex;

/// Fixed literal triggers for "what did we talk about recently" phrasing.
const RECENCY_PHRASES: &[&str] = &[
    "vad pratade vi om sist",
    "vad sa vi sist",
    "vad diskuterade vi sist",
    "vad pratade vi om senast",
    "vad sa vi senast",
    "vad diskuterade vi senast",
    "vad pratade vi om förra",
    "vad sa vi förra",
    "vad diskuterade vi förra",
    "senaste konversation",
    "senaste diskussion",
    "senaste prat",
    "fortsätta på den konversationen",
    "fortsätta därifrån",
];

/// Words that mark the message as being about a file or document.
const FILE_WORDS: &[&str] = &[
    "fil",
    "filen",
    "dokument",
    "pdf",
    "word",
    "excel",
    "xlsx",
    "docx",
    "ppt",
    "presentation",
    "bilaga",
    "bifogad",
    "attachment",
    "rapport",
    "avtal",
    "kontrakt",
    "specifikation",
];

/// Hint terms appended to a "vad vet du om X" subject so the store ranks
/// factual content about X above chat transcripts that merely mention X.
const SUBJECT_ENHANCERS: &[&str] = &[
    "projekt",
    "företag",
    "verktyg",
    "tjänst",
    "produkt",
    "plattform",
    "system",
    "funktionalitet",
];

const GENERAL_QUESTION_WORDS: &[&str] = &["vad", "berätta", "förklara", "hur", "varför"];

static SUBJECT_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"vad vet du om\s+(.+?)[?.]*$",
        r"berätta om\s+(.+?)[?.]*$",
        r"vad är\s+(.+?)[?.]*$",
        r"vad handlar\s+(.+?)\s+om[?.]*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// What a message asks for, as far as retrieval is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageIntents {
    /// "What did we talk about recently" — bias the date filter toward
    /// the last days and sort hits by recency.
    pub recency: bool,

    /// File/document reference — constrain retrieval to file content.
    pub file: bool,

    /// The question to send to the retrieval store, possibly enriched.
    pub search_terms: String,
}

/// Analyze one user message.
pub fn analyze(message: &str) -> MessageIntents {
    let lower = message.to_lowercase();

    let recency = RECENCY_PHRASES.iter().any(|p| lower.contains(p));
    let file = FILE_WORDS.iter().any(|w| lower.contains(w));

    let search_terms = match extract_subject(&lower) {
        Some(subject) => format!("{subject} {}", SUBJECT_ENHANCERS.join(" ")),
        None if GENERAL_QUESTION_WORDS.iter().any(|w| lower.contains(w)) => {
            format!("{message} information fakta detaljer specifikt beskrivning")
        }
        None => message.to_string(),
    };

    MessageIntents {
        recency,
        file,
        search_terms,
    }
}

/// Extract the subject X from "vad vet du om X" style questions.
fn extract_subject(lower: &str) -> Option<String> {
    for re in SUBJECT_RES.iter() {
        if let Some(caps) = re.captures(lower) {
            let subject = caps[1].trim();
            if !subject.is_empty() {
                return Some(subject.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_statement_keeps_original_terms() {
        let intents = analyze("Jag gillar kaffe");
        assert!(!intents.recency);
        assert!(!intents.file);
        assert_eq!(intents.search_terms, "Jag gillar kaffe");
    }

    #[test]
    fn recency_phrases_are_detected() {
        assert!(analyze("Vad pratade vi om sist?").recency);
        assert!(analyze("kan vi fortsätta därifrån").recency);
        assert!(!analyze("vad tycker du om kaffe?").recency);
    }

    #[test]
    fn file_words_are_detected() {
        assert!(analyze("kan du sammanfatta rapporten?").file);
        assert!(analyze("vad står det i den bifogade pdf:en?").file);
        assert!(!analyze("hej på dig").file);
    }

    #[test]
    fn subject_extraction_enriches_search() {
        let intents = analyze("Vad vet du om bygger.ai?");
        assert!(intents.search_terms.starts_with("bygger.ai "));
        assert!(intents.search_terms.contains("projekt"));
        assert!(intents.search_terms.contains("plattform"));
        assert!(!intents.search_terms.contains('?'));
    }

    #[test]
    fn subject_extraction_handles_berattta_om() {
        let intents = analyze("Berätta om reemove");
        assert!(intents.search_terms.starts_with("reemove "));
    }

    #[test]
    fn general_questions_get_hint_terms() {
        let intents = analyze("Hur fungerar plattformen?");
        assert!(intents.search_terms.starts_with("Hur fungerar plattformen?"));
        assert!(intents.search_terms.contains("information fakta"));
    }
}
