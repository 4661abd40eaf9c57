// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! Inline step verification.

use crate::config::VerificationCheck;
use crate::error::{RelayError, Result};
use std::path::Path;

/// Run a verification predicate against a step's output.
///
/// `exit_code` performs no check (a clean exit is implicit proof) and
/// `custom` is delegated to callers.
pub fn run_verification(
    check: Option<&VerificationCheck>,
    output: &str,
    step_name: &str,
) -> Result<()> {
    let Some(check) = check else {
        return Ok(());
    };

    match check {
        VerificationCheck::OutputContains(needle) => {
            if output.contains(needle.as_str()) {
                Ok(())
            } else {
                Err(RelayError::Verification {
                    step: step_name.to_string(),
                    detail: format!("output does not contain \"{}\"", needle),
                })
            }
        }
        VerificationCheck::FileExists(path) => {
            if Path::new(path).exists() {
                Ok(())
            } else {
                Err(RelayError::Verification {
                    step: step_name.to_string(),
                    detail: format!("file \"{}\" does not exist", path),
                })
            }
        }
        VerificationCheck::ExitCode(_) | VerificationCheck::Custom(_) => Ok(()),
    }
}

/// Target path of a `file_exists` check, used by the timeout rescue.
pub fn file_exists_target(check: Option<&VerificationCheck>) -> Option<&str> {
    match check {
        Some(VerificationCheck::FileExists(path)) => Some(path),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_no_check_passes() {
        assert!(run_verification(None, "anything", "s").is_ok());
    }

    #[test]
    fn test_output_contains() {
        let check = VerificationCheck::OutputContains("deployed".to_string());
        assert!(run_verification(Some(&check), "app deployed ok", "s").is_ok());

        let err = run_verification(Some(&check), "failed", "s").unwrap_err();
        assert!(matches!(err, RelayError::Verification { .. }));
    }

    #[test]
    fn test_file_exists() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("out.txt");
        std::fs::write(&file, "done").unwrap();

        let present = VerificationCheck::FileExists(file.display().to_string());
        assert!(run_verification(Some(&present), "", "s").is_ok());

        let absent = VerificationCheck::FileExists(
            dir.path().join("missing.txt").display().to_string(),
        );
        assert!(run_verification(Some(&absent), "", "s").is_err());
    }

    #[test]
    fn test_exit_code_and_custom_are_noops() {
        assert!(run_verification(Some(&VerificationCheck::ExitCode(0)), "", "s").is_ok());
        assert!(run_verification(
            Some(&VerificationCheck::Custom(serde_json::json!({"cmd": "x"}))),
            "",
            "s"
        )
        .is_ok());
    }

    #[test]
    fn test_file_exists_target_extraction() {
        let check = VerificationCheck::FileExists("./out.txt".to_string());
        assert_eq!(file_exists_target(Some(&check)), Some("./out.txt"));
        assert_eq!(
            file_exists_target(Some(&VerificationCheck::ExitCode(0))),
            None
        );
    }
}
