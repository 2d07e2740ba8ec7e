//! Grounding prompt assembly.
//!
//! Wraps retrieved passages in a fixed instruction template that tells the
//! downstream model to answer only from the supplied context and to reply
//! in the language of the question. No length capping is applied; the
//! caller bounds the context through `top_k`.

use crate::models::RetrievalResult;

const INSTRUCTIONS: &str = "Answer the question using only the information in the context below. \
If the context does not contain the answer, say that you don't know instead of guessing. \
Answer in the same language as the question.";

/// Build the prompt sent to the model for one chat turn.
///
/// With no results the user message is returned unchanged.
///
/// ```rust
/// use kb_harness_core::prompt::build_prompt;
///
/// assert_eq!(build_prompt("hi", &[]), "hi");
/// ```
pub fn build_prompt(user_message: &str, results: &[RetrievalResult]) -> String {
    if results.is_empty() {
        return user_message.to_string();
    }

    let context = results
        .iter()
        .map(context_block)
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "{}\n\nContext:\n{}\n\nQuestion: {}",
        INSTRUCTIONS, context, user_message
    )
}

fn context_block(result: &RetrievalResult) -> String {
    match result.page_number {
        Some(page) => format!(
            "--- {} (page {}) ---\n{}",
            result.file_name, page, result.content
        ),
        None => format!("--- {} ---\n{}", result.file_name, result.content),
    }
}
