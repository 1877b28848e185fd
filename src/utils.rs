use crate::models::ChatMessage;

/// Rough characters-per-token ratio used when the API reports no usage.
const CHARS_PER_TOKEN: usize = 4;

/// Per-message framing overhead (role markers etc.) in the estimate.
const TOKENS_PER_MESSAGE: u32 = 4;

/// Tokens the API adds to prime the reply.
const REPLY_PRIMING_TOKENS: u32 = 3;

pub fn estimate_tokens_from_chars(chars: usize) -> u32 {
    u32::try_from(chars.div_ceil(CHARS_PER_TOKEN)).unwrap_or(u32::MAX)
}

pub fn estimate_tokens(text: &str) -> u32 {
    estimate_tokens_from_chars(text.chars().count())
}

/// Estimated prompt size of a whole conversation.
pub fn estimate_conversation_tokens(messages: &[ChatMessage]) -> u32 {
    messages
        .iter()
        .map(|m| estimate_tokens(&m.content).saturating_add(TOKENS_PER_MESSAGE))
        .fold(0u32, u32::saturating_add)
}

/// Most tokens a conversation can encode to.
///
/// Byte-level BPE never emits more tokens than input bytes, so UTF-8 length
/// plus framing bounds the prompt whatever the script.
pub fn max_conversation_tokens(messages: &[ChatMessage]) -> u32 {
    messages
        .iter()
        .map(|m| {
            u32::try_from(m.content.len())
                .unwrap_or(u32::MAX)
                .saturating_add(TOKENS_PER_MESSAGE)
        })
        .fold(REPLY_PRIMING_TOKENS, u32::saturating_add)
}
