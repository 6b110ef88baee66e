//! Paragraph-boundary chunker for extracted file text.
//!
//! Paragraphs (separated by blank lines) are packed greedily into chunks of
//! at most `max_tokens * CHARS_PER_TOKEN` bytes. A paragraph longer than
//! that is hard-split on the last newline or space before the limit, never
//! inside a UTF-8 character. Whitespace-only input yields no chunks.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Rough chars-per-token ratio used to size chunks.
const CHARS_PER_TOKEN: usize = 4;

pub fn chunk_text(filename: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if para.len() > max_chars {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
            }
            pieces.extend(hard_split(para, max_chars));
            continue;
        }

        let joined_len = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };
        if joined_len > max_chars {
            pieces.push(std::mem::take(&mut buf));
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }
    if !buf.is_empty() {
        pieces.push(buf);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| make_chunk(filename, i as i64, piece))
        .collect()
}

fn hard_split(para: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = para;

    while !rest.is_empty() {
        if rest.len() <= max_chars {
            out.push(rest.trim().to_string());
            break;
        }
        let mut limit = max_chars;
        while !rest.is_char_boundary(limit) {
            limit -= 1;
        }
        let split_at = rest[..limit]
            .rfind(['\n', ' '])
            .map(|pos| pos + 1)
            .unwrap_or(if limit == 0 {
                // First char alone exceeds the limit.
                rest.chars().next().map(char::len_utf8).unwrap_or(rest.len())
            } else {
                limit
            });

        let piece = rest[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        rest = &rest[split_at..];
    }

    out
}

fn make_chunk(filename: &str, index: i64, text: String) -> Chunk {
    let hash = hex::encode(Sha256::digest(text.as_bytes()));
    let id = hex::encode(Sha256::digest(format!("{}:{}", filename, index).as_bytes()));

    Chunk {
        id,
        filename: filename.to_string(),
        chunk_index: index,
        text,
        hash,
    }
}
