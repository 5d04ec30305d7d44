//! Prompt assembly.
//!
//! Builds the message list sent to the chat model: system instructions with
//! the retrieved context, a handful of few-shot exchanges, then the user's
//! question. Context is packed best chunk first until the token budget runs
//! out; the chunk that crosses the budget is truncated, and chunks after it
//! are left out and not cited.

use crate::chunk::{floor_char_boundary, CHARS_PER_TOKEN};
use crate::llm::ChatMessage;
use crate::models::ScoredChunk;

const SYSTEM_INSTRUCTIONS: &str = "\
You are an IT incident management assistant.

Greetings and small talk:
- If the user greets you, greet them back and offer help with incident questions.
- For conversation unrelated to incidents, answer politely and steer back to incident management.

Incident questions:
- Base every statement about incidents ONLY on the context below.
- If the answer is not in the context, say \"I don't have enough information to answer that question.\"
- Always include the incident number when it is available.
- Never invent incident details, resolutions, or states.";

const NO_CONTEXT: &str = "(no incident records were retrieved for this question)";

const FEW_SHOT: &[(&str, &str)] = &[
    (
        "Hi there!",
        "Hello! I'm your incident assistant. How can I help you with incident management today?",
    ),
    (
        "Good morning",
        "Good morning! I'm here to help with any incident questions you have. What can I look up for you?",
    ),
    (
        "How was this incident resolved?",
        "I'll check the resolution details recorded for that incident in the context.",
    ),
    (
        "How's the weather?",
        "I'm focused on IT incidents. Would you like to ask about a specific incident?",
    ),
];

/// The assembled prompt and which chunks made it into the context block.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub messages: Vec<ChatMessage>,
    /// Indices into the input chunk slice that were included.
    pub included: Vec<usize>,
}

/// Assemble the prompt for `question` over `context`, keeping the context
/// block within `token_budget` tokens.
///
/// Chunks are taken in rank order. The first chunk that does not fit is cut
/// at a char boundary to the remaining budget and packing stops there.
pub fn build_prompt(question: &str, context: &[ScoredChunk], token_budget: usize) -> Prompt {
    let budget_chars = token_budget.saturating_mul(CHARS_PER_TOKEN);
    let mut used = 0;
    let mut included = Vec::new();
    let mut blocks: Vec<&str> = Vec::new();

    for (i, sc) in context.iter().enumerate() {
        let text = sc.chunk.text.trim();
        // Blocks are joined by a blank line.
        let sep = if blocks.is_empty() { 0 } else { 2 };
        let remaining = budget_chars.saturating_sub(used + sep);
        if text.len() <= remaining {
            used += sep + text.len();
            included.push(i);
            blocks.push(text);
            continue;
        }

        let cut = floor_char_boundary(text, remaining.min(text.len()));
        let truncated = text[..cut].trim_end();
        if !truncated.is_empty() {
            included.push(i);
            blocks.push(truncated);
        }
        break;
    }

    let context_block = if blocks.is_empty() {
        NO_CONTEXT.to_string()
    } else {
        blocks.join("\n\n")
    };

    let mut messages = Vec::with_capacity(FEW_SHOT.len() * 2 + 2);
    messages.push(ChatMessage::system(format!(
        "{}\n\nContext:\n{}",
        SYSTEM_INSTRUCTIONS, context_block
    )));
    for (user, assistant) in FEW_SHOT {
        messages.push(ChatMessage::user(*user));
        messages.push(ChatMessage::assistant(*assistant));
    }
    messages.push(ChatMessage::user(question.trim()));

    Prompt { messages, included }
}
