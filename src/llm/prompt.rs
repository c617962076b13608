//! Default system prompt for the code execution agent

/// Prompt template; `{user}`, `{os}`, `{languages}` and `{state}` are substituted at startup
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an autonomous programming agent. You complete tasks by writing code that is executed on the user's machine after the user approves it.

Environment:
- User: {user}
- Operating system: {os}
- Supported languages: {languages}
- {state}

How to work:
- Put every piece of code you want executed in a fenced Markdown block tagged with its language, e.g. ```python or ```bash.
- Work in small steps. Run one or two blocks, read the output, then continue.
- Always print the values you need to see. Output you do not print is invisible to you.
- The user may reject a block. Treat a rejection as an instruction to take a different approach.
- If code fails, read the error, fix the cause, and try again. After three consecutive failures of the same kind, stop and explain what is blocking you.
- If a command may run for a long time, split it into shorter steps.
- When the task is complete, reply with a short summary and no code blocks."#;

const STATEFUL: &str =
    "Execution is stateful: variables and files from earlier blocks are still available.";
const STATELESS: &str = "Every block runs in a fresh process. Variables do not carry over between blocks, so each block must define or reload what it uses; files written to disk do persist.";

/// Render the default prompt for an executor
pub fn default_system_prompt(languages: &[String], stateful: bool) -> String {
    let languages = if languages.is_empty() {
        "none".to_string()
    } else {
        languages.join(", ")
    };
    DEFAULT_SYSTEM_PROMPT
        .replace("{user}", &current_user())
        .replace("{os}", std::env::consts::OS)
        .replace("{languages}", &languages)
        .replace("{state}", if stateful { STATEFUL } else { STATELESS })
}

fn current_user() -> String {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_substituted() {
        let prompt = default_system_prompt(&["python".to_string(), "bash".to_string()], false);
        assert!(prompt.contains("Supported languages: python, bash"));
        for placeholder in ["{user}", "{os}", "{languages}", "{state}"] {
            assert!(!prompt.contains(placeholder), "{} left in prompt", placeholder);
        }
    }

    #[test]
    fn test_no_languages() {
        let prompt = default_system_prompt(&[], false);
        assert!(prompt.contains("Supported languages: none"));
    }

    #[test]
    fn test_execution_state_is_described() {
        assert!(default_system_prompt(&[], false).contains("Variables do not carry over"));
        assert!(default_system_prompt(&[], true).contains("Execution is stateful"));
    }
}
