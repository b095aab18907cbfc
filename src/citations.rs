//! Citation extraction over a configurable grammar registry.
//!
//! Two citation shapes are recognized:
//!
//! - neutral citations, `[year] CODE number` (e.g. `[2020] HKCFI 123`);
//! - law-report citations, `[year] volume CODE page` (e.g. `[1996] 2 HKLR 401`).
//!
//! The registry of recognized court and report codes comes from
//! configuration, so new jurisdictions and report series can be added
//! without touching extraction logic. Normalization collapses whitespace
//! runs and uppercases the code token, and is idempotent.
//!
//! Citations whose occurrences all fall within the header/caption region
//! are candidate alternate identifiers for the document itself; citations
//! seen in the body are outgoing references. Unmatched citation-shaped
//! text is simply excluded — ambiguity is not an error.

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::CitationsConfig;
use crate::models::CitationMention;

/// Compiled citation grammars plus the header-region boundary.
pub struct CitationRegistry {
    neutral_re: Regex,
    report_re: Regex,
    case_name_re: Regex,
    header_chars: usize,
}

/// Everything the extractor learned from one document's raw text.
#[derive(Debug, Clone, Default)]
pub struct CitationExtraction {
    /// Deduplicated outgoing references, unresolved at this stage.
    pub outgoing: Vec<CitationMention>,
    /// Citations confined to the header/caption region: candidate
    /// alternate identifiers for the document itself.
    pub header_identifiers: Vec<String>,
}

impl CitationRegistry {
    pub fn new(config: &CitationsConfig) -> Result<Self> {
        let neutral_alt = code_alternation(&config.neutral_codes);
        let report_alt = code_alternation(&config.report_codes);

        let neutral_re = Regex::new(&format!(
            r"(?i)\[(\d{{4}})\]\s*({neutral_alt})\s*(\d+)"
        ))
        .context("building neutral citation regex")?;

        let report_re = Regex::new(&format!(
            r"(?i)\[(\d{{4}})\]\s*(\d+)\s*({report_alt})\s*(\d+)"
        ))
        .context("building law-report citation regex")?;

        // "Name v Name" (or a bare capitalized phrase) directly before the
        // citation's opening bracket.
        let case_name_re = Regex::new(
            r"([A-Z][A-Za-z.,'\-\s]*?\s+v\.?\s+[A-Z][A-Za-z.,'\-\s]*?)\s*$",
        )
        .context("building case name regex")?;

        Ok(Self {
            neutral_re,
            report_re,
            case_name_re,
            header_chars: config.header_chars,
        })
    }

    /// Normalize a citation string: single spaces, uppercased code token,
    /// bracketed year. `normalize(normalize(x)) == normalize(x)`.
    pub fn normalize(&self, raw: &str) -> String {
        if let Some(c) = self.report_re.captures(raw) {
            return format!(
                "[{}] {} {} {}",
                &c[1],
                &c[2],
                c[3].to_uppercase(),
                &c[4]
            );
        }
        if let Some(c) = self.neutral_re.captures(raw) {
            return format!("[{}] {} {}", &c[1], c[2].to_uppercase(), &c[3]);
        }
        // Unrecognized: collapse whitespace only, which is also idempotent.
        raw.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Extract all recognized citations from a document's raw text.
    ///
    /// The result is deduplicated by normalized text (a set, not a
    /// multiset). Case names are attached best-effort from the preceding
    /// context; their absence is not an error.
    pub fn extract(&self, source_doc_id: &str, raw_text: &str) -> CitationExtraction {
        let mut found: Vec<(String, usize)> = Vec::new();

        // Law-report form first: a report citation also contains a
        // neutral-looking prefix, so report matches shadow neutral ones at
        // the same offset.
        for m in self.report_re.find_iter(raw_text) {
            found.push((self.normalize(m.as_str()), m.start()));
        }
        for m in self.neutral_re.find_iter(raw_text) {
            let covered = found
                .iter()
                .any(|(_, start)| *start <= m.start() && m.start() < *start + 40);
            if !covered {
                found.push((self.normalize(m.as_str()), m.start()));
            }
        }
        found.sort_by_key(|(_, start)| *start);

        let mut extraction = CitationExtraction::default();
        let mut seen: Vec<String> = Vec::new();

        for (citation, _) in &found {
            if seen.iter().any(|s| s == citation) {
                continue;
            }
            seen.push(citation.clone());

            let occurrences: Vec<usize> = found
                .iter()
                .filter(|(c, _)| c == citation)
                .map(|(_, s)| *s)
                .collect();

            let header_only = occurrences.iter().all(|s| *s < self.header_chars)
                && raw_text.len() > self.header_chars;

            if header_only {
                extraction.header_identifiers.push(citation.clone());
                continue;
            }

            let case_name = occurrences
                .iter()
                .find_map(|&pos| self.case_name_before(raw_text, pos));

            extraction.outgoing.push(CitationMention {
                source_doc_id: source_doc_id.to_string(),
                citation: citation.clone(),
                case_name,
                resolved_doc_id: None,
                is_in_corpus: false,
            });
        }

        extraction
    }

    /// Best-effort case name from up to 100 characters before a citation.
    fn case_name_before(&self, text: &str, citation_start: usize) -> Option<String> {
        let window_start = citation_start.saturating_sub(100);
        let window_start = snap_to_char_boundary(text, window_start);
        let window = &text[window_start..citation_start];

        let m = self.case_name_re.captures(window)?;
        let mut name = m[1].trim().to_string();
        for prefix in ["in ", "see ", "per ", "following ", "citing "] {
            if name.to_lowercase().starts_with(prefix) {
                name = name[prefix.len()..].trim().to_string();
            }
        }
        // Re-capitalized fragments shorter than a plausible party name are
        // noise from sentence boundaries.
        if name.len() > 3 {
            Some(name)
        } else {
            None
        }
    }
}

fn code_alternation(codes: &[String]) -> String {
    let mut escaped: Vec<String> = codes.iter().map(|c| regex::escape(c)).collect();
    // Longest first so HKLRD wins over HKLR inside the alternation.
    escaped.sort_by_key(|c| std::cmp::Reverse(c.len()));
    escaped.join("|")
}

fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
