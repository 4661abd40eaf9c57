// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! `{{key}}` template interpolation.
//!
//! Substitution runs in two phases. Load-time interpolation resolves every
//! placeholder from user-provided variables, except `steps.*` keys which
//! are deferred. Execution-time interpolation resolves only
//! `{{steps.<name>.output}}` from completed step outputs, leaving anything
//! else literal for the agent to interpret.

use crate::error::{RelayError, Result};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([\w][\w.\-]*)\}\}").expect("placeholder regex"))
}

fn step_output_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{steps\.([\w\-]+)\.output\}\}").expect("step output regex"))
}

/// Load-time interpolation over user-provided variables.
///
/// Every `{{key}}` is replaced, except keys starting with `steps.`. Keys
/// are dot-paths walked through nested maps. An unresolved key is a
/// [`RelayError::Template`].
pub fn interpolate_vars(text: &str, vars: &Value) -> Result<String> {
    let mut result = String::with_capacity(text.len());
    let mut last = 0;

    for caps in placeholder_re().captures_iter(text) {
        let whole = caps.get(0).expect("capture 0");
        let key = &caps[1];
        result.push_str(&text[last..whole.start()]);
        last = whole.end();

        if key.starts_with("steps.") {
            // Deferred to execution time.
            result.push_str(whole.as_str());
            continue;
        }

        match lookup_path(vars, key) {
            Some(value) => result.push_str(&value_to_string(value)),
            None => {
                return Err(RelayError::Template(format!(
                    "unresolved template variable \"{}\"",
                    key
                )))
            }
        }
    }
    result.push_str(&text[last..]);
    Ok(result)
}

/// Execution-time interpolation of `{{steps.<name>.output}}` placeholders.
///
/// Outputs come from the in-memory map of completed steps; on a miss,
/// `rehydrate` is consulted (backed by the on-disk step-output file).
/// Placeholders that still cannot be resolved are left literal.
pub fn interpolate_step_outputs(
    text: &str,
    outputs: &HashMap<String, String>,
    mut rehydrate: impl FnMut(&str) -> Option<String>,
) -> String {
    let mut result = String::with_capacity(text.len());
    let mut last = 0;

    for caps in step_output_re().captures_iter(text) {
        let whole = caps.get(0).expect("capture 0");
        let step_name = &caps[1];
        result.push_str(&text[last..whole.start()]);
        last = whole.end();

        if let Some(output) = outputs.get(step_name) {
            result.push_str(output);
        } else if let Some(output) = rehydrate(step_name) {
            result.push_str(&output);
        } else {
            // Possibly intended for the agent itself.
            result.push_str(whole.as_str());
        }
    }
    result.push_str(&text[last..]);
    result
}

fn lookup_path<'a>(vars: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = vars;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
