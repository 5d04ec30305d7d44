//! Incident chunker.
//!
//! Renders an [`IncidentRecord`] as labelled lines of text and packs those
//! lines into [`DocumentChunk`]s that respect a `max_tokens` budget. Every
//! chunk starts with the incident identifier so that any retrieved piece can
//! be cited on its own.
//!
//! Chunk ids are derived from the incident id and chunk index, which makes
//! re-indexing the same data overwrite rather than duplicate vectors.

use sha2::{Digest, Sha256};

use crate::models::{ChunkMetadata, DocumentChunk, IncidentRecord};

/// Approximate chars-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Render an incident as the text that gets embedded.
pub fn render_incident(record: &IncidentRecord) -> String {
    let mut lines = vec![
        format!("State: {}", record.state),
        format!("Priority: {}", record.priority),
    ];
    if !record.short_description.is_empty() {
        lines.push(format!("Short description: {}", record.short_description));
    }
    let optional = [
        ("Description", &record.description),
        ("Assigned to", &record.assigned_to),
        ("Tag", &record.tag),
        ("Opened at", &record.opened_at),
        ("Updated at", &record.updated_at),
        ("Work notes", &record.work_notes),
        ("Resolution", &record.resolution),
    ];
    for (label, value) in optional {
        if let Some(v) = value {
            lines.push(format!("{}: {}", label, v));
        }
    }
    lines.join("\n")
}

/// Split an incident into chunks no longer than roughly `max_tokens` each.
///
/// Always returns at least one chunk, with contiguous indices from 0.
pub fn chunk_incident(record: &IncidentRecord, source: &str, max_tokens: usize) -> Vec<DocumentChunk> {
    let header = format!("Incident {}", record.id);
    let body = render_incident(record);
    // Header is repeated on every chunk; budget the body around it.
    let max_body = (max_tokens * CHARS_PER_TOKEN)
        .saturating_sub(header.len() + 1)
        .max(CHARS_PER_TOKEN * 8);

    let metadata = ChunkMetadata {
        priority: record.priority.clone(),
        state: record.state.clone(),
        assigned_to: record.assigned_to.clone(),
        tag: record.tag.clone(),
        opened_at: record.opened_at.clone(),
        updated_at: record.updated_at.clone(),
    };

    pack_lines(&body, max_body)
        .into_iter()
        .enumerate()
        .map(|(index, piece)| {
            let text = format!("{}\n{}", header, piece);
            DocumentChunk {
                id: chunk_id(&record.id, index),
                incident_id: record.id.clone(),
                chunk_index: index,
                source: source.to_string(),
                hash: sha256_hex(&text),
                text,
                metadata: metadata.clone(),
            }
        })
        .collect()
}

/// Chunk every record, preserving record order.
pub fn chunk_incidents(records: &[IncidentRecord], source: &str, max_tokens: usize) -> Vec<DocumentChunk> {
    records
        .iter()
        .flat_map(|r| chunk_incident(r, source, max_tokens))
        .collect()
}

pub fn chunk_id(incident_id: &str, index: usize) -> String {
    format!("{}#{}", incident_id, index)
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Greedily pack lines into pieces of at most `max_chars`, hard-splitting
/// any single line that is longer on a whitespace boundary.
fn pack_lines(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut buf = String::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let would_be = if buf.is_empty() {
            line.len()
        } else {
            buf.len() + 1 + line.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if line.len() > max_chars {
            let mut remaining = line;
            while !remaining.is_empty() {
                let split_at = floor_char_boundary(remaining, max_chars.min(remaining.len()));
                let cut = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind(' ')
                        .filter(|&pos| pos > 0)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                let cut = if cut == 0 { remaining.len() } else { cut };
                pieces.push(remaining[..cut].trim().to_string());
                remaining = remaining[cut..].trim_start();
            }
        } else {
            if !buf.is_empty() {
                buf.push('\n');
            }
            buf.push_str(line);
        }
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }
    if pieces.is_empty() {
        pieces.push(String::new());
    }
    pieces
}

pub(crate) fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{UNKNOWN_STATE, UNSPECIFIED_PRIORITY};

    fn record(id: &str) -> IncidentRecord {
        IncidentRecord {
            id: id.to_string(),
            short_description: "Email server unreachable".to_string(),
            description: None,
            priority: UNSPECIFIED_PRIORITY.to_string(),
            state: UNKNOWN_STATE.to_string(),
            assigned_to: None,
            work_notes: None,
            resolution: Some("Restarted service".to_string()),
            tag: None,
            opened_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_small_record_single_chunk() {
        let chunks = chunk_incident(&record("INC0000039"), "incidents", 400);
        assert_eq!(chunks.len(), 1);
        let c = &chunks[0];
        assert_eq!(c.id, "INC0000039#0");
        assert_eq!(c.incident_id, "INC0000039");
        assert!(c.text.starts_with("Incident INC0000039\n"));
        assert!(c.text.contains("Resolution: Restarted service"));
        assert_eq!(c.metadata.state, UNKNOWN_STATE);
    }

    #[test]
    fn test_long_record_splits_with_header_on_every_chunk() {
        let mut r = record("INC7");
        r.work_notes = Some("checked the logs again ".repeat(60));
        let chunks = chunk_incident(&r, "incidents", 40);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert_eq!(c.id, chunk_id("INC7", i));
            assert!(c.text.starts_with("Incident INC7"));
            assert!(c.text.len() <= 40 * CHARS_PER_TOKEN + 1);
        }
    }

    #[test]
    fn test_multibyte_text_does_not_panic() {
        let mut r = record("INC8");
        r.description = Some("é".repeat(500));
        let chunks = chunk_incident(&r, "incidents", 10);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn test_every_chunk_traces_to_one_record() {
        let records = vec![record("INC1"), record("INC2"), record("INC3")];
        let chunks = chunk_incidents(&records, "incidents", 20);
        for c in &chunks {
            assert!(records.iter().any(|r| r.id == c.incident_id));
            assert!(c.id.starts_with(&format!("{}#", c.incident_id)));
        }
    }

    #[test]
    fn test_deterministic() {
        let r = record("INC9");
        let a = chunk_incident(&r, "incidents", 30);
        let b = chunk_incident(&r, "incidents", 30);
        assert_eq!(a, b);
    }
}
