//! Paragraph-respecting, overlapping document chunker.
//!
//! Splits judgment or statute text into ordered [`Chunk`]s under a
//! character budget. Splitting happens only on paragraph boundaries:
//! blank lines, or explicit numbered markers (`[n]`, `(n)`, `n.` followed
//! by a capitalized word) common in judgment text. A paragraph is never
//! split; one that exceeds the budget on its own becomes an oversized
//! chunk. Successive chunks overlap by whole paragraphs, which appear
//! verbatim at the start of the following chunk — intentional duplication
//! for retrieval context, not an error.
//!
//! Chunking is a pure function of its inputs: identical input always
//! yields identical boundaries, indices, type labels, and ids.
//! `chunk_index` values are referenced later by snippet highlighting and
//! must stay stable.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use uuid::Uuid;

use crate::error::ChunkingError;
use crate::models::{Chunk, ChunkType, DocType};

/// Chunker tuning knobs, fixed per ingestion run.
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    /// Character budget per chunk (≈800–1500 tokens at 3–4 chars/token).
    pub max_chars: usize,
    /// Whole paragraphs carried into the next chunk for overlap.
    pub overlap_paragraphs: usize,
    /// Structural path for statute sections, e.g. `"Part 3 > s.4 > (2)"`.
    pub section_path: Option<String>,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_chars: 4000,
            overlap_paragraphs: 2,
            section_path: None,
        }
    }
}

fn para_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // [12]   (12)   12. Followed by a capitalized word
        Regex::new(r"^\s*(\[\d+\]|\(\d+\)|\d+\.\s+[A-Z])").expect("paragraph marker regex")
    })
}

fn para_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[\[\(]?(\d+)[\]\)\.]").expect("paragraph number regex"))
}

/// Split a document into ordered, typed, overlapping chunks.
///
/// Empty or whitespace-only input yields an empty sequence, not an error.
pub fn chunk(
    doc_id: &str,
    doc_type: DocType,
    raw_text: &str,
    options: &ChunkOptions,
) -> Result<Vec<Chunk>, ChunkingError> {
    if options.max_chars == 0 {
        return Err(ChunkingError::ZeroBudget);
    }

    if raw_text.trim().is_empty() {
        return Ok(Vec::new());
    }

    match doc_type {
        DocType::Case => Ok(chunk_case(doc_id, raw_text, options)),
        DocType::StatuteSection => Ok(chunk_statute_section(doc_id, raw_text, options)),
    }
}

fn chunk_case(doc_id: &str, raw_text: &str, options: &ChunkOptions) -> Vec<Chunk> {
    let paragraphs = split_paragraphs(raw_text, true);
    let groups = group_paragraphs(&paragraphs, options.max_chars, options.overlap_paragraphs);

    let total = groups.len();
    groups
        .iter()
        .enumerate()
        .map(|(idx, group)| {
            let text = group.paragraphs.join("\n");
            let para_nums: Vec<u32> = group
                .paragraphs
                .iter()
                .filter_map(|p| leading_paragraph_number(p))
                .collect();
            let chunk_type = label_case_chunk(idx, total, &text);
            make_chunk(
                doc_id,
                idx as i64,
                &text,
                chunk_type,
                if para_nums.is_empty() {
                    None
                } else {
                    Some(para_nums)
                },
                None,
            )
        })
        .collect()
}

fn chunk_statute_section(doc_id: &str, raw_text: &str, options: &ChunkOptions) -> Vec<Chunk> {
    let text = raw_text.trim();

    if text.len() <= options.max_chars {
        return vec![make_chunk(
            doc_id,
            0,
            text,
            ChunkType::SectionBody,
            None,
            options.section_path.clone(),
        )];
    }

    // Long sections split on blank lines with a single paragraph of overlap,
    // every piece keeping the section path.
    let paragraphs = split_paragraphs(text, false);
    let groups = group_paragraphs(&paragraphs, options.max_chars, 1);

    groups
        .iter()
        .enumerate()
        .map(|(idx, group)| {
            make_chunk(
                doc_id,
                idx as i64,
                &group.paragraphs.join("\n\n"),
                ChunkType::SectionBody,
                None,
                options.section_path.clone(),
            )
        })
        .collect()
}

/// Split text into paragraphs on blank lines, and (for judgment text) on
/// explicit numbered paragraph markers even without a blank line.
fn split_paragraphs(text: &str, detect_markers: bool) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in normalized.split('\n') {
        if line.trim().is_empty() {
            flush(&mut current, &mut paragraphs);
            continue;
        }
        if detect_markers && para_marker_re().is_match(line) && !current.is_empty() {
            flush(&mut current, &mut paragraphs);
        }
        current.push(line);
    }
    flush(&mut current, &mut paragraphs);

    paragraphs
}

fn flush(current: &mut Vec<&str>, out: &mut Vec<String>) {
    if current.is_empty() {
        return;
    }
    let joined = current
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if !joined.is_empty() {
        out.push(joined);
    }
    current.clear();
}

/// A run of paragraphs destined for one chunk, remembering how many of
/// its leading paragraphs are overlap repeated from the previous chunk.
#[derive(Debug)]
pub(crate) struct ParagraphGroup {
    pub paragraphs: Vec<String>,
    /// Leading paragraphs duplicated from the previous group.
    pub overlap: usize,
}

/// Greedily accumulate paragraphs into groups under the character budget.
///
/// A single paragraph over the budget forms an oversized group on its own;
/// paragraphs are never split. Each group after the first starts with up
/// to `overlap` paragraphs repeated from the end of the previous group.
pub(crate) fn group_paragraphs(
    paragraphs: &[String],
    max_chars: usize,
    overlap: usize,
) -> Vec<ParagraphGroup> {
    let mut groups: Vec<ParagraphGroup> = Vec::new();
    let n = paragraphs.len();
    let mut start = 0usize;

    while start < n {
        let mut end = start;
        let mut length = 0usize;

        while end < n && length + paragraphs[end].len() <= max_chars {
            length += paragraphs[end].len();
            end += 1;
        }
        if end == start {
            // Oversized paragraph: take it whole.
            end = start + 1;
        }

        let overlap_here = start_overlap(start, &groups, overlap);
        groups.push(ParagraphGroup {
            paragraphs: paragraphs[start..end].to_vec(),
            overlap: overlap_here,
        });

        if end >= n {
            break;
        }
        // Seed the next chunk with the last `overlap` paragraphs, but always
        // make forward progress.
        start = if end > start + overlap {
            end - overlap
        } else {
            end
        };
    }

    groups
}

// How many of this group's leading paragraphs repeat the previous group.
fn start_overlap(start: usize, groups: &[ParagraphGroup], overlap: usize) -> usize {
    let consumed: usize = groups
        .iter()
        .map(|g| g.paragraphs.len() - g.overlap)
        .sum::<usize>();
    consumed.saturating_sub(start).min(overlap)
}

fn leading_paragraph_number(paragraph: &str) -> Option<u32> {
    para_number_re()
        .captures(paragraph)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

const ISSUES_MARKERS: &[&str] = &[
    "the issue",
    "the issues",
    "issues in this appeal",
    "question for determination",
    "questions for determination",
];

const DISPOSAL_MARKERS: &[&str] = &[
    "disposed of",
    "order nisi",
    "order of the court",
    "appeal is dismissed",
    "appeal is allowed",
    "costs of this",
];

fn label_case_chunk(idx: usize, total: usize, text: &str) -> ChunkType {
    if idx == 0 {
        return ChunkType::Facts;
    }
    if idx == total - 1 {
        return ChunkType::Order;
    }
    let lower = text.to_lowercase();
    if ISSUES_MARKERS.iter().any(|m| lower.contains(m)) {
        return ChunkType::Issues;
    }
    if DISPOSAL_MARKERS.iter().any(|m| lower.contains(m)) {
        return ChunkType::Order;
    }
    ChunkType::Reasoning
}

fn make_chunk(
    doc_id: &str,
    index: i64,
    text: &str,
    chunk_type: ChunkType,
    paragraph_numbers: Option<Vec<u32>>,
    section_path: Option<String>,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: chunk_id(doc_id, index),
        doc_id: doc_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        chunk_type,
        paragraph_numbers,
        section_path,
        hash,
    }
}

/// Deterministic chunk id derived from `(doc_id, chunk_index)`.
pub fn chunk_id(doc_id: &str, index: i64) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{doc_id}:{index}").as_bytes(),
    )
    .to_string()
}
