// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound reply formatting and chunking.
//!
//! Long replies are split into chunks that respect the channel's maximum
//! message length. Fenced code blocks stay intact; splits prefer paragraph
//! boundaries, then sentence boundaries, before falling back to a hard cut.

/// Default maximum outbound message length when the channel reports none.
pub const MAX_MESSAGE_DEFAULT: usize = 4000;

/// Channel-specific formatting applied before splitting.
///
/// Plain channels get trimmed text unchanged; transports with their own
/// markup live behind the channel adapter and do their own escaping.
pub fn format_for_channel(content: &str, _channel: &str) -> String {
    content.trim().to_string()
}

/// Splits `content` into chunks of at most `max_len` bytes.
pub fn split_message(content: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 || content.len() <= max_len {
        return vec![content.to_string()];
    }

    let blocks = parse_blocks(content);
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for block in blocks {
        let pieces = if block.len() <= max_len {
            vec![block]
        } else {
            split_oversized_block(&block, max_len)
        };

        for piece in pieces {
            if current.is_empty() {
                current = piece;
            } else if current.len() + 2 + piece.len() <= max_len {
                current.push_str("\n\n");
                current.push_str(&piece);
            } else {
                chunks.push(std::mem::take(&mut current));
                current = piece;
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    if chunks.is_empty() {
        chunks.push(String::new());
    }
    chunks
}

/// Splits content into atomic blocks: fenced code blocks and paragraphs.
fn parse_blocks(content: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut remaining = content;

    while let Some(fence_start) = remaining.find("```") {
        let before = &remaining[..fence_start];
        push_paragraphs(before, &mut blocks);

        let after_fence = &remaining[fence_start + 3..];
        match after_fence.find("```") {
            Some(fence_end) => {
                let block = &remaining[fence_start..fence_start + 3 + fence_end + 3];
                blocks.push(block.to_string());
                remaining = &remaining[fence_start + 3 + fence_end + 3..];
            }
            None => {
                // Unclosed fence: treat the rest as one block.
                blocks.push(remaining[fence_start..].to_string());
                remaining = "";
            }
        }
    }
    push_paragraphs(remaining, &mut blocks);
    blocks
}

fn push_paragraphs(text: &str, blocks: &mut Vec<String>) {
    for para in text.split("\n\n") {
        let para = para.trim();
        if !para.is_empty() {
            blocks.push(para.to_string());
        }
    }
}

/// Splits a single oversized block: code fences are re-wrapped per piece,
/// text is split at sentence boundaries, then hard-cut.
fn split_oversized_block(block: &str, max_len: usize) -> Vec<String> {
    if let Some(inner) = block.strip_prefix("```") {
        let inner = inner.strip_suffix("```").unwrap_or(inner);
        // Reserve room for re-wrapping fences on each piece.
        let budget = max_len.saturating_sub(8).max(1);
        return hard_split(inner, budget)
            .into_iter()
            .map(|piece| format!("```\n{}\n```", piece.trim_matches('\n')))
            .collect();
    }

    // Sentence-boundary split.
    let mut pieces = Vec::new();
    let mut current = String::new();
    for sentence in split_sentences(block) {
        if sentence.len() > max_len {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.extend(hard_split(&sentence, max_len));
        } else if current.is_empty() {
            current = sentence;
        } else if current.len() + 1 + sentence.len() <= max_len {
            current.push(' ');
            current.push_str(&sentence);
        } else {
            pieces.push(std::mem::take(&mut current));
            current = sentence;
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Splits text after ". ", "! ", "? " boundaries.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?') && bytes[i + 1] == b' ' {
            sentences.push(text[start..=i].trim().to_string());
            start = i + 2;
            i += 2;
        } else {
            i += 1;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

/// Cuts text into pieces of at most `max_len` bytes on char boundaries.
fn hard_split(text: &str, max_len: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while rest.len() > max_len {
        let mut end = max_len;
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        pieces.push(rest[..end].to_string());
        rest = &rest[end..];
    }
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_message_is_one_chunk() {
        let chunks = split_message("hello", 4000);
        assert_eq!(chunks, vec!["hello"]);
    }

    #[test]
    fn splits_at_paragraph_boundaries() {
        let content = format!("{}\n\n{}", "a".repeat(60), "b".repeat(60));
        let chunks = split_message(&content, 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(60));
        assert_eq!(chunks[1], "b".repeat(60));
    }

    #[test]
    fn packs_paragraphs_while_they_fit() {
        let content = "one\n\ntwo\n\nthree";
        let chunks = split_message(content, 4000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "one\n\ntwo\n\nthree");
    }

    #[test]
    fn code_fence_stays_intact() {
        let code = format!("```\n{}\n```", "let x = 1;\n".repeat(5));
        let content = format!("Intro paragraph.\n\n{code}\n\nOutro.");
        let chunks = split_message(&content, 100);
        // The fence block is atomic: it appears whole in exactly one chunk.
        let with_fence: Vec<&String> =
            chunks.iter().filter(|c| c.contains("```")).collect();
        assert_eq!(with_fence.len(), 1);
        assert_eq!(with_fence[0].matches("```").count(), 2);
    }

    #[test]
    fn oversized_code_fence_is_rewrapped() {
        let code = format!("```\n{}```", "echo line\n".repeat(100));
        let chunks = split_message(&code, 200);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.starts_with("```"), "chunk not fenced: {chunk}");
            assert!(chunk.ends_with("```"));
            assert!(chunk.len() <= 200);
        }
    }

    #[test]
    fn oversized_paragraph_splits_at_sentences() {
        let content = format!(
            "{} {} {}",
            "First sentence here.",
            "Second sentence follows.",
            "Third one closes."
        );
        let chunks = split_message(&content, 30);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].contains("First sentence"));
        for chunk in &chunks {
            assert!(chunk.len() <= 30);
        }
    }

    #[test]
    fn hard_split_as_last_resort() {
        let content = "x".repeat(250);
        let chunks = split_message(&content, 100);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 100));
        assert_eq!(chunks.concat(), content);
    }

    #[test]
    fn every_chunk_respects_max_len() {
        let content = format!(
            "{}\n\n```\n{}\n```\n\n{}",
            "Long paragraph sentence one. And sentence two follows here. ".repeat(10),
            "code line\n".repeat(50),
            "Tail text. More tail."
        );
        for max in [120, 300, 1000] {
            for chunk in split_message(&content, max) {
                assert!(chunk.len() <= max, "len {} > {max}", chunk.len());
            }
        }
    }

    #[test]
    fn format_trims_whitespace() {
        assert_eq!(format_for_channel("  hi \n", "any"), "hi");
    }
}
