//! Prompt assembly: system rules, retrieved context, conversation window.

use std::fmt::Write;

use scribe_index::RetrievedChunk;
use scribe_llm::provider::Message;
use scribe_memory::{Conversation, TurnRole};

/// Stands in for the context block when retrieval found nothing.
pub const NO_CONTEXT_FOUND: &str = "NO_CONTEXT_FOUND";

const SYSTEM_PROMPT: &str = "\
You answer questions from the user's knowledge base.\n\
\n\
## Rules\n\
- Answer only from the numbered excerpts inside <context>. \
Do not use outside knowledge and do not guess.\n\
- After each statement, cite the file it came from as [source: <path>], \
using the path exactly as shown in the excerpt header.\n\
- If <context> contains NO_CONTEXT_FOUND, or the excerpts do not answer the \
question, say plainly that the knowledge base has no information on it.\n\
- <conversation> holds earlier turns for resolving follow-up questions. \
It is not a source and must not be cited.\n\
- Be concise.";

/// Render the last `max_turns` turns as role-labeled text, oldest first.
///
/// Returns an empty string when there is nothing to show.
#[must_use]
pub fn format_context(conversation: &Conversation, max_turns: usize) -> String {
    let skip = conversation.turns.len().saturating_sub(max_turns);
    let mut out = String::new();
    for turn in conversation.turns.iter().skip(skip) {
        if !out.is_empty() {
            out.push('\n');
        }
        let label = match turn.role {
            TurnRole::User => "User",
            TurnRole::Assistant => "Assistant",
        };
        let _ = write!(out, "{label}: {}", turn.text.trim());
    }
    out
}

/// Numbered excerpts, each headed by its path and section path.
#[must_use]
pub fn format_chunks(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT_FOUND.to_owned();
    }
    let mut out = String::new();
    for (i, retrieved) in chunks.iter().enumerate() {
        let chunk = &retrieved.chunk;
        if i > 0 {
            out.push_str("\n\n");
        }
        let _ = write!(out, "[{}] {}", i + 1, chunk.file_path);
        if !chunk.section_path.is_empty() {
            let _ = write!(out, " ({})", chunk.section_path.join(" > "));
        }
        out.push('\n');
        out.push_str(chunk.text.trim_end());
    }
    out
}

/// System and user messages for one question.
#[must_use]
pub fn build_prompt(question: &str, chunks: &[RetrievedChunk], history: &str) -> Vec<Message> {
    let mut user = String::new();
    let _ = write!(user, "<context>\n{}\n</context>\n\n", format_chunks(chunks));
    if !history.is_empty() {
        let _ = write!(user, "<conversation>\n{history}\n</conversation>\n\n");
    }
    let _ = write!(user, "Question: {}", question.trim());
    vec![Message::system(SYSTEM_PROMPT), Message::user(user)]
}
