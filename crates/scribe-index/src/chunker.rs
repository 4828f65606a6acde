//! Structure-aware document chunking: headings, then paragraphs, then sentences.
//!
//! Markdown ATX headings (`#` .. `######`) outside fenced code blocks open a
//! new section and update the running heading stack. Section bodies are cut
//! at blank lines, small paragraphs are packed up to the target size, and
//! paragraphs above the maximum are split at sentence ends, then at
//! whitespace. Parsing never fails: anything that is not a heading is text.

use std::collections::VecDeque;
use std::mem;
use std::str::Lines;

use uuid::Uuid;

/// Namespace for chunk ids derived from `file_path:position_index`.
const CHUNK_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x5c, 0x72, 0x1b, 0xe0, 0x3f, 0x4d, 0x4e, 0x8a, 0x9d, 0x61, 0x0c, 0xa1, 0x55, 0x7e, 0x2b, 0x90,
]);

/// One contiguous slice of a source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub file_path: String,
    /// Ancestor headings, outermost first.
    pub section_path: Vec<String>,
    pub position_index: usize,
    pub text: String,
    pub content_hash: String,
    pub char_length: usize,
}

/// Which heading markers open a new section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadingRules {
    /// Deepest ATX level treated as a boundary; deeper headings stay body text.
    pub max_level: usize,
}

impl Default for HeadingRules {
    fn default() -> Self {
        Self { max_level: 6 }
    }
}

/// Chunk size band, in characters.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Fragments shorter than this merge forward within their section (default: 100).
    pub min_size: usize,
    /// Paragraphs are packed together up to this size (default: 800).
    pub target_size: usize,
    /// Paragraphs longer than this are split at sentence boundaries (default: 1500).
    pub max_size: usize,
    pub headings: HeadingRules,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: 100,
            target_size: 800,
            max_size: 1500,
            headings: HeadingRules::default(),
        }
    }
}

/// Deterministic id for the chunk at `position_index` of `file_path`.
#[must_use]
pub fn chunk_id(file_path: &str, position_index: usize) -> String {
    Uuid::new_v5(
        &CHUNK_ID_NAMESPACE,
        format!("{file_path}:{position_index}").as_bytes(),
    )
    .to_string()
}

/// Text sent to the embedding provider: heading context, blank line, body.
#[must_use]
pub fn embedding_text(chunk: &Chunk) -> String {
    if chunk.section_path.is_empty() {
        return chunk.text.clone();
    }
    format!("{}\n\n{}", chunk.section_path.join(" > "), chunk.text)
}

/// Lazily chunk `text` from `file_path`.
///
/// The iterator is finite and yields the same chunks in the same order for
/// the same input. Empty or whitespace-only input yields nothing.
#[must_use]
pub fn chunk<'a>(text: &'a str, file_path: &'a str, config: &'a ChunkerConfig) -> Chunks<'a> {
    Chunks {
        sections: Sections {
            lines: text.lines(),
            in_fence: false,
            heading_stack: Vec::new(),
            body: String::new(),
            finished: false,
            max_level: config.headings.max_level,
        },
        pending: VecDeque::new(),
        file_path,
        config,
        next_position: 0,
    }
}

pub struct Chunks<'a> {
    sections: Sections<'a>,
    pending: VecDeque<Chunk>,
    file_path: &'a str,
    config: &'a ChunkerConfig,
    next_position: usize,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(chunk);
            }
            let (section_path, body) = self.sections.next_section()?;
            for text in pack_section(&body, self.config) {
                let position_index = self.next_position;
                self.next_position += 1;
                self.pending.push_back(Chunk {
                    id: chunk_id(self.file_path, position_index),
                    file_path: self.file_path.to_owned(),
                    section_path: section_path.clone(),
                    position_index,
                    content_hash: blake3_hex(&text),
                    char_length: text.chars().count(),
                    text,
                });
            }
        }
    }
}

struct Sections<'a> {
    lines: Lines<'a>,
    in_fence: bool,
    heading_stack: Vec<(usize, String)>,
    body: String,
    finished: bool,
    max_level: usize,
}

impl Sections<'_> {
    fn path(&self) -> Vec<String> {
        self.heading_stack
            .iter()
            .filter(|(_, title)| !title.is_empty())
            .map(|(_, title)| title.clone())
            .collect()
    }

    /// Next `(section_path, body)` with a non-blank body.
    fn next_section(&mut self) -> Option<(Vec<String>, String)> {
        while !self.finished {
            let Some(line) = self.lines.next() else {
                self.finished = true;
                let body = mem::take(&mut self.body);
                if body.trim().is_empty() {
                    return None;
                }
                return Some((self.path(), body));
            };

            if is_fence(line) {
                self.in_fence = !self.in_fence;
            } else if !self.in_fence
                && let Some((level, title)) = parse_heading(line, self.max_level)
            {
                let body = mem::take(&mut self.body);
                let path = self.path();
                while self.heading_stack.last().is_some_and(|(l, _)| *l >= level) {
                    self.heading_stack.pop();
                }
                self.heading_stack.push((level, title));
                if body.trim().is_empty() {
                    continue;
                }
                return Some((path, body));
            }

            self.body.push_str(line);
            self.body.push('\n');
        }
        None
    }
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// `## Title ##` -> `(2, "Title")`. Up to three leading spaces are allowed.
fn parse_heading(line: &str, max_level: usize) -> Option<(usize, String)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let level = rest.bytes().take_while(|b| *b == b'#').count();
    if level == 0 || level > 6 || level > max_level {
        return None;
    }
    let after = &rest[level..];
    if !after.is_empty() && !after.starts_with([' ', '\t']) {
        return None;
    }
    let title = after.trim().trim_end_matches('#').trim_end();
    Some((level, title.to_owned()))
}

/// Blank-line separated paragraphs; blank lines inside fences do not split.
fn paragraphs(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_fence = false;
    for line in body.lines() {
        if is_fence(line) {
            in_fence = !in_fence;
        }
        if !in_fence && line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n").trim_end().to_owned());
                current.clear();
            }
            continue;
        }
        current.push(line);
    }
    if !current.is_empty() {
        out.push(current.join("\n").trim_end().to_owned());
    }
    out.retain(|p| !p.trim().is_empty());
    out
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn pack_section(body: &str, config: &ChunkerConfig) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0usize;

    for paragraph in paragraphs(body) {
        let pieces = if char_len(&paragraph) > config.max_size {
            split_oversized(&paragraph, config.target_size, config.max_size)
        } else {
            vec![paragraph]
        };
        for piece in pieces {
            let piece_len = char_len(&piece);
            if buf.is_empty() {
                buf = piece;
                buf_len = piece_len;
                continue;
            }
            let combined = buf_len + 2 + piece_len;
            let fits_target = combined <= config.target_size;
            let undersized = buf_len < config.min_size && combined <= config.max_size;
            if fits_target || undersized {
                buf.push_str("\n\n");
                buf.push_str(&piece);
                buf_len = combined;
            } else {
                chunks.push(mem::replace(&mut buf, piece));
                buf_len = piece_len;
            }
        }
    }

    if !buf.is_empty() {
        if buf_len < config.min_size
            && let Some(last) = chunks.last_mut()
            && char_len(last) + 2 + buf_len <= config.max_size
        {
            last.push_str("\n\n");
            last.push_str(&buf);
        } else {
            chunks.push(buf);
        }
    }
    chunks
}

/// Sentence-level split of a paragraph longer than `max`; sentences that are
/// themselves too long fall back to whitespace splitting.
fn split_oversized(paragraph: &str, target: usize, max: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0usize;

    for sentence in sentences(paragraph) {
        let pieces = if char_len(sentence) > max {
            split_words(sentence, target)
        } else {
            vec![sentence.to_owned()]
        };
        for piece in pieces {
            let piece_len = char_len(&piece);
            if !buf.is_empty() && buf_len + 1 + piece_len > target {
                out.push(mem::take(&mut buf));
                buf_len = 0;
            }
            if !buf.is_empty() {
                buf.push(' ');
                buf_len += 1;
            }
            buf.push_str(&piece);
            buf_len += piece_len;
        }
    }
    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

/// Split after `.`, `!` or `?` followed by whitespace.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?')
            && let Some(&(_, next)) = chars.peek()
            && next.is_whitespace()
        {
            let end = i + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Pack whitespace-separated words up to `target`. A single word longer
/// than `target` becomes its own piece.
fn split_words(text: &str, target: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0usize;
    for word in text.split_whitespace() {
        let word_len = char_len(word);
        if !buf.is_empty() && buf_len + 1 + word_len > target {
            out.push(mem::take(&mut buf));
            buf_len = 0;
        }
        if !buf.is_empty() {
            buf.push(' ');
            buf_len += 1;
        }
        buf.push_str(word);
        buf_len += word_len;
    }
    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

pub(crate) fn blake3_hex(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}
