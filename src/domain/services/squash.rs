#[cfg(test)]
#[path = "squash_test.rs"]
mod tests;

use crate::domain::models::Chat;
use crate::domain::models::Message;
use crate::domain::models::MessageMetadata;

/// Assistant replies containing this marker, along with the user prompt
/// right before them, are dropped when a chat is persisted.
pub const IRRELEVANT_MARKER: &str = "<irrelevant>";

/// Trims a committed chat for persistence. Everything after the last
/// assistant message goes, then every adjacent user/assistant pair whose
/// reply carries the irrelevant marker. Metadata is trimmed alongside the
/// messages so both lists keep the same length.
pub fn squash_chat(chat: &Chat) -> Chat {
    let mut squashed = chat.clone();

    let mut kept: Vec<(Message, Option<MessageMetadata>)> = vec![];
    for (idx, message) in chat.messages.iter().enumerate() {
        let metadata = chat.message_metadata.get(idx).cloned();
        let closes_irrelevant_pair = message.is_assistant()
            && message.contains(IRRELEVANT_MARKER)
            && kept
                .last()
                .map(|(previous, _)| return previous.is_user())
                .unwrap_or(false);

        if closes_irrelevant_pair {
            kept.pop();
            continue;
        }

        kept.push((message.clone(), metadata));
    }

    // Removing pairs can expose a prompt that never got an answer.
    let keep = kept
        .iter()
        .rposition(|(message, _)| return message.is_assistant())
        .map(|idx| return idx + 1)
        .unwrap_or(0);
    kept.truncate(keep);

    squashed.messages = kept
        .iter()
        .map(|(message, _)| return message.clone())
        .collect();
    squashed.message_metadata = kept
        .into_iter()
        .filter_map(|(_, metadata)| return metadata)
        .collect();

    return squashed;
}
