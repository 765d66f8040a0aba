//! Prompt text sent alongside the screenshot

use crate::context::ContextSnapshot;

/// Default system prompt when `ASSISTANT_SYSTEM_PROMPT` is not set
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a context-aware desktop assistant. Use the \
screenshot and context to understand what the user is doing right now. Reply in short, \
practical sentences with clear next-step suggestions.";

/// Render context facts as one `- key: value` line each, in snapshot order
#[must_use]
pub fn build_context_block(context: &ContextSnapshot) -> String {
    let lines = context.flatten();
    if lines.is_empty() {
        return "No structured context was collected.".to_string();
    }

    lines
        .into_iter()
        .map(|(key, value)| format!("- {key}: {value}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the user message that accompanies the screenshot
///
/// With a note, the reply answers the note and only leans on the screen when
/// it helps. Without one, the reply is a brief check-in about what is visible.
#[must_use]
pub fn build_user_prompt(context: &ContextSnapshot, note: Option<&str>) -> String {
    let context_block = build_context_block(context);
    let note = note.map(str::trim).filter(|n| !n.is_empty());

    match note {
        Some(note) => format!(
            "You are talking with the user in real time, like a friend looking over their shoulder.\n\
             Your main job is to answer the user's note.\n\n\
             Rules:\n\
             - Answer the note first.\n\
             - Use the screenshot and context only where they make the answer better.\n\
             - For a request for help, give concrete steps.\n\
             - For small talk, stay friendly and light.\n\
             - No unsolicited productivity coaching.\n\
             - For recommendations, give one top pick and two to four alternatives.\n\
             - Keep it to one to four sentences unless asked for more.\n\n\
             User note:\n{note}\n\n\
             Structured context:\n{context_block}\n\n\
             Return only the spoken reply."
        ),
        None => format!(
            "The user has not asked anything.\n\
             Look at the screenshot and structured context and give a short, friendly check-in.\n\n\
             Rules:\n\
             - Sound like a person, not a report.\n\
             - Mention one thing you notice.\n\
             - Optionally suggest one useful next step.\n\
             - Do not judge how the user spends their time.\n\
             - One or two sentences.\n\n\
             Structured context:\n{context_block}\n\n\
             Return only the spoken reply."
        ),
    }
}
