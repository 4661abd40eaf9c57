// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! One-shot command construction for non-interactive agents.

use crate::types::{AgentCli, BrokerError, Result};

/// Build the exact argv for a one-shot, non-interactive invocation of a
/// CLI. The first element is the program name.
///
/// `cursor` has no one-shot form and is rejected.
pub fn one_shot_command(cli: AgentCli, task: &str, model: Option<&str>) -> Result<Vec<String>> {
    let mut argv: Vec<String> = match cli {
        AgentCli::Claude => vec!["claude".into(), "-p".into(), task.into()],
        AgentCli::Codex => vec!["codex".into(), "exec".into(), task.into()],
        AgentCli::Gemini => vec!["gemini".into(), "-p".into(), task.into()],
        AgentCli::Opencode => vec!["opencode".into(), "--prompt".into(), task.into()],
        AgentCli::Droid => vec!["droid".into(), "exec".into(), task.into()],
        AgentCli::Aider => vec![
            "aider".into(),
            "--message".into(),
            task.into(),
            "--yes-always".into(),
            "--no-git".into(),
        ],
        AgentCli::Goose => vec![
            "goose".into(),
            "run".into(),
            "--text".into(),
            task.into(),
            "--no-session".into(),
        ],
        AgentCli::Cursor => return Err(BrokerError::UnsupportedCli(cli)),
    };

    if let Some(model) = model {
        argv.push("--model".into());
        argv.push(model.into());
    }

    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claude_argv() {
        let argv = one_shot_command(AgentCli::Claude, "do it", None).unwrap();
        assert_eq!(argv, vec!["claude", "-p", "do it"]);
    }

    #[test]
    fn test_model_flag_appended_last() {
        let argv = one_shot_command(AgentCli::Codex, "task", Some("o3")).unwrap();
        assert_eq!(argv, vec!["codex", "exec", "task", "--model", "o3"]);
    }

    #[test]
    fn test_aider_flags() {
        let argv = one_shot_command(AgentCli::Aider, "fix", None).unwrap();
        assert_eq!(argv, vec!["aider", "--message", "fix", "--yes-always", "--no-git"]);
    }

    #[test]
    fn test_goose_flags() {
        let argv = one_shot_command(AgentCli::Goose, "build", Some("gpt-4o")).unwrap();
        assert_eq!(
            argv,
            vec!["goose", "run", "--text", "build", "--no-session", "--model", "gpt-4o"]
        );
    }

    #[test]
    fn test_cursor_rejected() {
        assert!(matches!(
            one_shot_command(AgentCli::Cursor, "t", None),
            Err(BrokerError::UnsupportedCli(AgentCli::Cursor))
        ));
    }
}
