// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! Config loading and validation.

use crate::config::types::RelayConfig;
use crate::error::{RelayError, Result};
use crate::template::interpolate_vars;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

/// Load, interpolate, and validate a config file.
///
/// `vars` feeds load-time template interpolation of agent and step tasks;
/// `steps.*` placeholders are deferred to execution time.
pub fn load_config(path: &Path, vars: &Value) -> Result<RelayConfig> {
    let source = path.display().to_string();
    let content = std::fs::read_to_string(path)
        .map_err(|e| RelayError::config(&source, format!("failed to read file: {}", e)))?;
    load_config_str(&content, vars, &source)
}

/// Load a config from a YAML string. `source` labels errors.
pub fn load_config_str(yaml: &str, vars: &Value, source: &str) -> Result<RelayConfig> {
    let mut config: RelayConfig = serde_yaml::from_str(yaml)
        .map_err(|e| RelayError::config(source, e.to_string()))?;

    interpolate_config(&mut config, vars)?;
    validate(&config, source)?;
    Ok(config)
}

fn interpolate_config(config: &mut RelayConfig, vars: &Value) -> Result<()> {
    for agent in &mut config.agents {
        if let Some(task) = &agent.task {
            agent.task = Some(interpolate_vars(task, vars)?);
        }
    }
    for workflow in &mut config.workflows {
        for step in &mut workflow.steps {
            step.task = interpolate_vars(&step.task, vars)?;
        }
    }
    Ok(())
}

/// Structural validation beyond what deserialization enforces.
pub fn validate(config: &RelayConfig, source: &str) -> Result<()> {
    if config.name.trim().is_empty() {
        return Err(RelayError::config(source, "`name` must not be empty"));
    }
    if config.agents.is_empty() {
        return Err(RelayError::config(source, "`agents` must not be empty"));
    }

    let mut agent_names = HashSet::new();
    for agent in &config.agents {
        if !agent_names.insert(agent.name.as_str()) {
            return Err(RelayError::config(
                source,
                format!("duplicate agent name \"{}\"", agent.name),
            ));
        }
    }

    for workflow in &config.workflows {
        if workflow.steps.is_empty() {
            return Err(RelayError::config(
                source,
                format!("workflow \"{}\" has no steps", workflow.name),
            ));
        }

        let mut step_names = HashSet::new();
        for step in &workflow.steps {
            if !step_names.insert(step.name.as_str()) {
                return Err(RelayError::config(
                    source,
                    format!(
                        "duplicate step name \"{}\" in workflow \"{}\"",
                        step.name, workflow.name
                    ),
                ));
            }
            if !agent_names.contains(step.agent.as_str()) {
                return Err(RelayError::config(
                    source,
                    format!(
                        "step \"{}\" references unknown agent \"{}\"",
                        step.name, step.agent
                    ),
                ));
            }
        }

        for step in &workflow.steps {
            for dep in &step.depends_on {
                if !step_names.contains(dep.as_str()) {
                    return Err(RelayError::config(
                        source,
                        format!(
                            "step \"{}\" depends on unknown step \"{}\"",
                            step.name, dep
                        ),
                    ));
                }
            }
        }

        check_acyclic(workflow.steps.iter().map(|s| (s.name.as_str(), &s.depends_on)), source, &workflow.name)?;
    }

    Ok(())
}

fn check_acyclic<'a>(
    steps: impl Iterator<Item = (&'a str, &'a Vec<String>)>,
    source: &str,
    workflow: &str,
) -> Result<()> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    let collected: Vec<(&str, &Vec<String>)> = steps.collect();

    for (name, _) in &collected {
        graph.add_node(name);
    }
    for (name, deps) in &collected {
        for dep in deps.iter() {
            graph.add_edge(dep.as_str(), name, ());
        }
    }

    toposort(&graph, None).map_err(|cycle| {
        RelayError::config(
            source,
            format!(
                "dependency cycle in workflow \"{}\" involving step \"{}\"",
                workflow,
                cycle.node_id()
            ),
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VALID: &str = r#"
version: "1"
name: demo
swarm:
  pattern: pipeline
agents:
  - name: planner
    cli: claude
  - name: builder
    cli: codex
    interactive: false
workflows:
  - name: ship
    steps:
      - name: plan
        agent: planner
        task: "plan the {{feature}}"
      - name: build
        agent: builder
        task: "build from {{steps.plan.output}}"
        dependsOn: [plan]
"#;

    #[test]
    fn test_valid_config_loads() {
        let config = load_config_str(VALID, &json!({"feature": "login page"}), "relay.yaml").unwrap();

        assert_eq!(config.name, "demo");
        assert_eq!(config.agents.len(), 2);
        let wf = &config.workflows[0];
        assert_eq!(wf.steps[0].task, "plan the login page");
        // steps.* placeholders survive load-time interpolation.
        assert_eq!(wf.steps[1].task, "build from {{steps.plan.output}}");
        assert_eq!(wf.steps[1].depends_on, vec!["plan"]);
    }

    #[test]
    fn test_missing_required_field_is_config_error() {
        let yaml = "version: \"1\"\nswarm:\n  pattern: mesh\nagents:\n  - name: a\n    cli: claude\n";
        let err = load_config_str(yaml, &json!({}), "bad.yaml").unwrap_err();
        match err {
            RelayError::Config { path, message } => {
                assert_eq!(path, "bad.yaml");
                assert!(message.contains("name"), "got: {}", message);
            }
            other => panic!("expected config error, got {other}"),
        }
    }

    #[test]
    fn test_empty_agents_rejected() {
        let yaml = "version: \"1\"\nname: x\nswarm:\n  pattern: mesh\nagents: []\n";
        let err = load_config_str(yaml, &json!({}), "x.yaml").unwrap_err();
        assert!(err.to_string().contains("`agents` must not be empty"));
    }

    #[test]
    fn test_unknown_cli_rejected() {
        let yaml =
            "version: \"1\"\nname: x\nswarm:\n  pattern: mesh\nagents:\n  - name: a\n    cli: chatgpt\n";
        assert!(load_config_str(yaml, &json!({}), "x.yaml").is_err());
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let yaml = r#"
version: "1"
name: x
swarm:
  pattern: dag
agents:
  - name: a
    cli: claude
workflows:
  - name: wf
    steps:
      - name: s1
        agent: a
        task: t
        dependsOn: [ghost]
"#;
        let err = load_config_str(yaml, &json!({}), "x.yaml").unwrap_err();
        assert!(err.to_string().contains("unknown step \"ghost\""));
    }

    #[test]
    fn test_unknown_agent_rejected() {
        let yaml = r#"
version: "1"
name: x
swarm:
  pattern: dag
agents:
  - name: a
    cli: claude
workflows:
  - name: wf
    steps:
      - name: s1
        agent: nobody
        task: t
"#;
        let err = load_config_str(yaml, &json!({}), "x.yaml").unwrap_err();
        assert!(err.to_string().contains("unknown agent \"nobody\""));
    }

    #[test]
    fn test_cycle_rejected_with_node_named() {
        let yaml = r#"
version: "1"
name: x
swarm:
  pattern: dag
agents:
  - name: a
    cli: claude
workflows:
  - name: wf
    steps:
      - name: s1
        agent: a
        task: t
        dependsOn: [s2]
      - name: s2
        agent: a
        task: t
        dependsOn: [s1]
"#;
        let err = load_config_str(yaml, &json!({}), "x.yaml").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("cycle"), "got: {}", msg);
        assert!(msg.contains("s1") || msg.contains("s2"), "got: {}", msg);
    }

    #[test]
    fn test_duplicate_step_name_rejected() {
        let yaml = r#"
version: "1"
name: x
swarm:
  pattern: dag
agents:
  - name: a
    cli: claude
workflows:
  - name: wf
    steps:
      - name: s1
        agent: a
        task: t
      - name: s1
        agent: a
        task: t
"#;
        let err = load_config_str(yaml, &json!({}), "x.yaml").unwrap_err();
        assert!(err.to_string().contains("duplicate step name"));
    }

    #[test]
    fn test_unresolved_template_is_fatal_at_load() {
        let yaml = r#"
version: "1"
name: x
swarm:
  pattern: mesh
agents:
  - name: a
    cli: claude
workflows:
  - name: wf
    steps:
      - name: s1
        agent: a
        task: "use {{nope}}"
"#;
        let err = load_config_str(yaml, &json!({}), "x.yaml").unwrap_err();
        assert!(matches!(err, RelayError::Template(_)));
    }
}
