//! Prompt assembly for the conversation pipeline.
//!
//! A prompt has three parts: retrieved context, a transcript of recent
//! history, and the user's question. The history section header is always
//! rendered, even when there is no history.

use crate::models::{ChatMessage, Exchange};

/// Number of history exchanges kept by default.
pub const DEFAULT_MAX_HISTORY: usize = 10;

const INSTRUCTIONS: &str = "You are a friendly assistant answering questions about this \
organization. Use the context below to give a detailed, well-explained answer. \
Some of the context may be unrelated to the question; ignore anything that \
does not help. If the context does not contain the answer, say so plainly \
instead of guessing.";

/// Join retrieved chunk texts with a blank line, keeping their order.
pub fn join_context<S: AsRef<str>>(texts: &[S]) -> String {
    texts
        .iter()
        .map(|t| t.as_ref())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Render the last `cap` exchanges as a `Human:` / `Assistant:` transcript,
/// oldest first. Older exchanges are dropped.
pub fn format_history(history: &[Exchange], cap: usize) -> String {
    let skip = history.len().saturating_sub(cap);
    history[skip..]
        .iter()
        .map(|e| format!("Human: {}\nAssistant: {}", e.human, e.assistant))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the full completion prompt.
///
/// ```rust
/// use tenant_rag_core::prompt::render_prompt;
///
/// let prompt = render_prompt("Opening hours are 9-5.", "", "When do you open?");
/// assert!(prompt.contains("Conversation so far:\n\n"));
/// assert!(prompt.ends_with("Question: When do you open?\nAnswer:"));
/// ```
pub fn render_prompt(context: &str, history: &str, query: &str) -> String {
    format!(
        "{INSTRUCTIONS}\n\nContext:\n{context}\n\nConversation so far:\n{history}\n\nQuestion: {query}\nAnswer:"
    )
}

/// Convert a role-tagged chat transcript into history plus the pending query.
///
/// The last message is the query. Every earlier `user` message opens an
/// exchange; the next `assistant` message fills in its reply. Returns `None`
/// for an empty transcript.
pub fn history_from_messages(messages: &[ChatMessage]) -> Option<(Vec<Exchange>, String)> {
    let (last, earlier) = messages.split_last()?;
    let mut history: Vec<Exchange> = Vec::new();
    for msg in earlier {
        match msg.role.as_str() {
            "user" => history.push(Exchange::new(msg.content.clone(), String::new())),
            "assistant" => {
                if let Some(open) = history.last_mut().filter(|e| e.assistant.is_empty()) {
                    open.assistant = msg.content.clone();
                }
            }
            _ => {}
        }
    }
    Some((history, last.content.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_join_context_blank_line() {
        assert_eq!(join_context(&["a", "b"]), "a\n\nb");
        assert_eq!(join_context::<&str>(&[]), "");
    }

    #[test]
    fn test_format_history_caps_to_most_recent() {
        let history: Vec<Exchange> = (0..12)
            .map(|i| Exchange::new(format!("q{}", i), format!("a{}", i)))
            .collect();
        let text = format_history(&history, 10);
        assert!(!text.contains("q0\n"));
        assert!(!text.contains("Human: q1\n"));
        assert!(text.starts_with("Human: q2\nAssistant: a2"));
        assert!(text.ends_with("Human: q11\nAssistant: a11"));
        assert_eq!(text.lines().count(), 20);
    }

    #[test]
    fn test_empty_history_section_present() {
        let prompt = render_prompt("ctx", &format_history(&[], 10), "What is X?");
        assert!(prompt.contains("Context:\nctx\n"));
        assert!(prompt.contains("Conversation so far:\n\n\nQuestion: What is X?"));
    }

    #[test]
    fn test_history_from_messages_pairs_replies() {
        let messages = vec![
            msg("user", "hi"),
            msg("assistant", "hello"),
            msg("user", "prices?"),
            msg("user", "and hours?"),
            msg("assistant", "9-5"),
            msg("user", "thanks"),
        ];
        let (history, query) = history_from_messages(&messages).unwrap();
        assert_eq!(query, "thanks");
        assert_eq!(
            history,
            vec![
                Exchange::new("hi", "hello"),
                Exchange::new("prices?", ""),
                Exchange::new("and hours?", "9-5"),
            ]
        );
        assert!(history_from_messages(&[]).is_none());
    }
}
