// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! Per-pattern communication topology.
//!
//! The topology is handed to the broker; the engine itself only schedules
//! on step dependencies. Edges are directed: `edges[a]` lists the agents
//! `a` talks to.

use crate::config::RelayConfig;
use crate::pattern::SwarmPattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Communication graph for a chosen pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    /// Pattern the graph was built for.
    pub pattern: SwarmPattern,

    /// All agent names, in authored order.
    pub agents: Vec<String>,

    /// Directed adjacency: agent → agents it talks to.
    pub edges: BTreeMap<String, Vec<String>>,

    /// Hub agent for star-shaped patterns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub: Option<String>,

    /// Stage order for pipeline-shaped patterns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_order: Option<Vec<String>>,
}

impl Topology {
    /// One-line human-readable summary.
    pub fn describe(&self) -> String {
        match (&self.hub, &self.pipeline_order) {
            (Some(hub), _) => format!(
                "{}: hub \"{}\" with {} spokes",
                self.pattern,
                hub,
                self.agents.len().saturating_sub(1)
            ),
            (None, Some(order)) => format!("{}: {}", self.pattern, order.join(" -> ")),
            (None, None) => format!("{}: {} agents", self.pattern, self.agents.len()),
        }
    }

    fn add_edge(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        let targets = self.edges.entry(from.to_string()).or_default();
        if !targets.iter().any(|t| t == to) {
            targets.push(to.to_string());
        }
    }
}

fn role_is(config: &RelayConfig, name: &str, candidates: &[&str]) -> bool {
    config
        .agent(name)
        .and_then(|a| a.role.as_deref())
        .map(str::to_lowercase)
        .map(|r| candidates.contains(&r.as_str()))
        .unwrap_or(false)
}

fn pick_hub(config: &RelayConfig) -> String {
    config
        .agents
        .iter()
        .find(|a| {
            a.role
                .as_deref()
                .map(str::to_lowercase)
                .map(|r| matches!(r.as_str(), "lead" | "hub" | "coordinator"))
                .unwrap_or(false)
        })
        .unwrap_or(&config.agents[0])
        .name
        .clone()
}

/// Build the communication graph for a pattern.
pub fn build_topology(config: &RelayConfig, pattern: SwarmPattern) -> Topology {
    let agents: Vec<String> = config.agents.iter().map(|a| a.name.clone()).collect();
    let mut topology = Topology {
        pattern,
        agents: agents.clone(),
        edges: agents.iter().map(|a| (a.clone(), Vec::new())).collect(),
        hub: None,
        pipeline_order: None,
    };

    match pattern {
        // Star around a hub.
        SwarmPattern::FanOut
        | SwarmPattern::HubSpoke
        | SwarmPattern::Hierarchical
        | SwarmPattern::ScatterGather
        | SwarmPattern::Supervisor
        | SwarmPattern::Auction
        | SwarmPattern::Saga => {
            let hub = pick_hub(config);
            for agent in &agents {
                topology.add_edge(&hub, agent);
                topology.add_edge(agent, &hub);
            }
            topology.hub = Some(hub);
        }

        // Chain following the first workflow's step agents.
        SwarmPattern::Pipeline | SwarmPattern::Handoff => {
            let mut order: Vec<String> = Vec::new();
            if let Some(workflow) = config.workflows.first() {
                for step in &workflow.steps {
                    if !order.contains(&step.agent) {
                        order.push(step.agent.clone());
                    }
                }
            }
            if order.is_empty() {
                order = agents.clone();
            }
            for pair in order.windows(2) {
                topology.add_edge(&pair[0], &pair[1]);
            }
            topology.pipeline_order = Some(order);
        }

        // Chain over agents as authored.
        SwarmPattern::Cascade | SwarmPattern::CircuitBreaker => {
            for pair in agents.windows(2) {
                topology.add_edge(&pair[0], &pair[1]);
            }
        }

        // Fully connected.
        SwarmPattern::Mesh
        | SwarmPattern::Consensus
        | SwarmPattern::Debate
        | SwarmPattern::Blackboard => {
            for from in &agents {
                for to in &agents {
                    topology.add_edge(from, to);
                }
            }
        }

        // Reconstructed from step dependencies.
        SwarmPattern::Dag => {
            for workflow in &config.workflows {
                for step in &workflow.steps {
                    for dep in &step.depends_on {
                        if let Some(dep_step) = workflow.step(dep) {
                            topology.add_edge(&dep_step.agent, &step.agent);
                        }
                    }
                }
            }
        }

        SwarmPattern::MapReduce => {
            let coordinator = pick_hub(config);
            let mappers: Vec<&String> = agents
                .iter()
                .filter(|a| role_is(config, a, &["mapper"]))
                .collect();
            let reducers: Vec<&String> = agents
                .iter()
                .filter(|a| role_is(config, a, &["reducer"]))
                .collect();

            for mapper in &mappers {
                topology.add_edge(&coordinator, mapper);
                if reducers.is_empty() {
                    topology.add_edge(mapper, &coordinator);
                } else {
                    for reducer in &reducers {
                        topology.add_edge(mapper, reducer);
                    }
                }
            }
            for reducer in &reducers {
                topology.add_edge(reducer, &coordinator);
            }
            // Everyone else attaches as a bare spoke.
            for agent in &agents {
                let is_special = *agent == coordinator
                    || mappers.iter().any(|m| *m == agent)
                    || reducers.iter().any(|r| *r == agent);
                if !is_special {
                    topology.add_edge(&coordinator, agent);
                    topology.add_edge(agent, &coordinator);
                }
            }
            topology.hub = Some(coordinator);
        }

        SwarmPattern::Reflection => {
            let critic = agents
                .iter()
                .find(|a| role_is(config, a, &["critic"]))
                .cloned();
            match critic {
                Some(critic) => {
                    for agent in &agents {
                        topology.add_edge(agent, &critic);
                        topology.add_edge(&critic, agent);
                    }
                }
                None => {
                    for from in &agents {
                        for to in &agents {
                            topology.add_edge(from, to);
                        }
                    }
                }
            }
        }

        SwarmPattern::RedTeam => {
            let attackers: Vec<&String> = agents
                .iter()
                .filter(|a| role_is(config, a, &["attacker", "red-team"]))
                .collect();
            let defenders: Vec<&String> = agents
                .iter()
                .filter(|a| role_is(config, a, &["defender", "blue-team"]))
                .collect();

            for attacker in &attackers {
                for defender in &defenders {
                    topology.add_edge(attacker, defender);
                    topology.add_edge(defender, attacker);
                }
            }
            // Judges mediate both sides.
            for agent in &agents {
                let sided = attackers.iter().any(|a| *a == agent)
                    || defenders.iter().any(|d| *d == agent);
                if !sided {
                    for other in attackers.iter().chain(defenders.iter()) {
                        topology.add_edge(agent, other);
                        topology.add_edge(other, agent);
                    }
                }
            }
        }

        SwarmPattern::Verifier => {
            let verifiers: Vec<&String> = agents
                .iter()
                .filter(|a| role_is(config, a, &["verifier"]))
                .collect();
            for agent in &agents {
                if verifiers.iter().any(|v| *v == agent) {
                    continue;
                }
                for verifier in &verifiers {
                    topology.add_edge(agent, verifier);
                    topology.add_edge(verifier, agent);
                }
            }
        }

        SwarmPattern::Escalation => {
            let mut ordered = agents.clone();
            let tier_of = |name: &str| -> Option<u32> {
                config
                    .agent(name)
                    .and_then(|a| a.role.as_deref())
                    .and_then(|r| r.strip_prefix("tier-"))
                    .and_then(|n| n.parse().ok())
            };
            if ordered.iter().all(|a| tier_of(a).is_some()) {
                ordered.sort_by_key(|a| tier_of(a).unwrap_or(u32::MAX));
            }
            for pair in ordered.windows(2) {
                topology.add_edge(&pair[0], &pair[1]);
                topology.add_edge(&pair[1], &pair[0]);
            }
        }

        SwarmPattern::Swarm => {
            let hive = agents
                .iter()
                .find(|a| role_is(config, a, &["hive-mind"]))
                .cloned();
            let n = agents.len();
            if n > 1 {
                for (i, agent) in agents.iter().enumerate() {
                    let prev = &agents[(i + n - 1) % n];
                    let next = &agents[(i + 1) % n];
                    topology.add_edge(agent, prev);
                    topology.add_edge(agent, next);
                }
            }
            if let Some(hive) = hive {
                for agent in &agents {
                    topology.add_edge(agent, &hive);
                    topology.add_edge(&hive, agent);
                }
            }
        }
    }

    topology
}
