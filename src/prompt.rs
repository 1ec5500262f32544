//! Chat prompt construction.

use crate::llm::ChatMessage;

pub const SYSTEM_PROMPT: &str = "\
You are a terminal command assistant. Your job is to generate the exact terminal \
command that accomplishes what the user describes.

Rules:
- Return ONLY valid JSON matching this schema: \
{\"command\": \"<the command>\", \"explanation\": \"<one sentence>\", \"source\": \"<doc section or null>\"}
- The command must be a single, copy-pasteable terminal command
- Use pipes, &&, or ; to chain commands if needed
- Do not wrap the command in backticks or code blocks
- Keep the explanation to one sentence
- If the request is ambiguous, make reasonable assumptions and note them in the explanation
";

/// System message plus one user message carrying host info, docs, and the request.
#[must_use]
pub fn build_messages(
    cmd: Option<&str>,
    query: &str,
    context: &str,
    system_info: &str,
) -> Vec<ChatMessage> {
    let mut parts = Vec::new();
    if !system_info.is_empty() {
        parts.push(format!("System:\n{system_info}"));
    }
    if let Some(cmd) = cmd {
        parts.push(format!("Command: {cmd}"));
        parts.push(format!("Context:\n{context}"));
    }
    parts.push(format!("What I want to do: {query}"));

    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(parts.join("\n\n")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_text_only_prompt() {
        let messages = build_messages(None, "list files", "", "");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].content, "What I want to do: list files");
    }

    #[test]
    fn command_prompt_includes_context_and_system() {
        let messages = build_messages(
            Some("git"),
            "undo last commit",
            "=== git --help ===\nusage",
            "OS: Linux\nShell: /bin/bash",
        );
        assert_eq!(
            messages[1].content,
            "System:\nOS: Linux\nShell: /bin/bash\n\nCommand: git\n\nContext:\n=== git --help ===\nusage\n\nWhat I want to do: undo last commit"
        );
    }

    #[test]
    fn system_prompt_asks_for_json() {
        assert!(SYSTEM_PROMPT.contains("Return ONLY valid JSON"));
        assert!(SYSTEM_PROMPT.contains("\"command\""));
    }
}
