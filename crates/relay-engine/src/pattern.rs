// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! Swarm patterns and heuristic pattern selection.

use crate::config::RelayConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Communication pattern governing topology and scheduling hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwarmPattern {
    #[serde(rename = "fan-out")]
    FanOut,
    #[serde(rename = "pipeline")]
    Pipeline,
    #[serde(rename = "hub-spoke")]
    HubSpoke,
    #[serde(rename = "consensus")]
    Consensus,
    #[serde(rename = "mesh")]
    Mesh,
    #[serde(rename = "handoff")]
    Handoff,
    #[serde(rename = "cascade")]
    Cascade,
    #[serde(rename = "dag")]
    Dag,
    #[serde(rename = "debate")]
    Debate,
    #[serde(rename = "hierarchical")]
    Hierarchical,
    #[serde(rename = "map-reduce")]
    MapReduce,
    #[serde(rename = "scatter-gather")]
    ScatterGather,
    #[serde(rename = "supervisor")]
    Supervisor,
    #[serde(rename = "reflection")]
    Reflection,
    #[serde(rename = "red-team")]
    RedTeam,
    #[serde(rename = "verifier")]
    Verifier,
    #[serde(rename = "auction")]
    Auction,
    #[serde(rename = "escalation")]
    Escalation,
    #[serde(rename = "saga")]
    Saga,
    #[serde(rename = "circuit-breaker")]
    CircuitBreaker,
    #[serde(rename = "blackboard")]
    Blackboard,
    #[serde(rename = "swarm")]
    Swarm,
}

impl SwarmPattern {
    /// Wire name of the pattern.
    pub fn as_str(&self) -> &str {
        match self {
            Self::FanOut => "fan-out",
            Self::Pipeline => "pipeline",
            Self::HubSpoke => "hub-spoke",
            Self::Consensus => "consensus",
            Self::Mesh => "mesh",
            Self::Handoff => "handoff",
            Self::Cascade => "cascade",
            Self::Dag => "dag",
            Self::Debate => "debate",
            Self::Hierarchical => "hierarchical",
            Self::MapReduce => "map-reduce",
            Self::ScatterGather => "scatter-gather",
            Self::Supervisor => "supervisor",
            Self::Reflection => "reflection",
            Self::RedTeam => "red-team",
            Self::Verifier => "verifier",
            Self::Auction => "auction",
            Self::Escalation => "escalation",
            Self::Saga => "saga",
            Self::CircuitBreaker => "circuit-breaker",
            Self::Blackboard => "blackboard",
            Self::Swarm => "swarm",
        }
    }

    /// All known patterns, for diagnostics.
    pub fn all() -> &'static [SwarmPattern] {
        &[
            Self::FanOut,
            Self::Pipeline,
            Self::HubSpoke,
            Self::Consensus,
            Self::Mesh,
            Self::Handoff,
            Self::Cascade,
            Self::Dag,
            Self::Debate,
            Self::Hierarchical,
            Self::MapReduce,
            Self::ScatterGather,
            Self::Supervisor,
            Self::Reflection,
            Self::RedTeam,
            Self::Verifier,
            Self::Auction,
            Self::Escalation,
            Self::Saga,
            Self::CircuitBreaker,
            Self::Blackboard,
            Self::Swarm,
        ]
    }
}

impl fmt::Display for SwarmPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwarmPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown swarm pattern: {}", s))
    }
}

/// Pick the pattern for a config.
///
/// An explicitly configured pattern wins. Otherwise the first matching
/// rule of a priority-ordered heuristic list applies, falling back to
/// `fan-out`.
pub fn select_pattern(config: &RelayConfig) -> SwarmPattern {
    if let Some(pattern) = config.swarm.pattern {
        return pattern;
    }

    let roles: Vec<String> = config
        .agents
        .iter()
        .filter_map(|a| a.role.as_deref())
        .map(str::to_lowercase)
        .collect();
    let has_role = |r: &str| roles.iter().any(|role| role == r);

    // 1. Any dependsOn at all means the author drew a DAG.
    if config
        .workflows
        .iter()
        .flat_map(|w| &w.steps)
        .any(|s| !s.depends_on.is_empty())
    {
        return SwarmPattern::Dag;
    }

    // 2. Consensus strategy configured.
    if config
        .coordination
        .as_ref()
        .and_then(|c| c.consensus_strategy.as_ref())
        .is_some()
    {
        return SwarmPattern::Consensus;
    }

    // 3. Mapper and reducer roles both present.
    if has_role("mapper") && has_role("reducer") {
        return SwarmPattern::MapReduce;
    }

    // 4. An attacker-class role facing a defender-class role.
    let attacker = roles.iter().any(|r| r == "attacker" || r == "red-team");
    let defender = roles.iter().any(|r| r == "defender" || r == "blue-team");
    if attacker && defender {
        return SwarmPattern::RedTeam;
    }

    // 5. A critic reviews producers.
    if has_role("critic") {
        return SwarmPattern::Reflection;
    }

    // 6. Tiered roles escalate.
    if roles.iter().any(|r| r.starts_with("tier-")) {
        return SwarmPattern::Escalation;
    }

    // 7–13. Single distinguishing roles.
    if has_role("auctioneer") {
        return SwarmPattern::Auction;
    }
    if has_role("saga-orchestrator") || has_role("compensate-handler") {
        return SwarmPattern::Saga;
    }
    if has_role("fallback") || has_role("backup") || has_role("primary") {
        return SwarmPattern::CircuitBreaker;
    }
    if has_role("blackboard") || has_role("shared-workspace") {
        return SwarmPattern::Blackboard;
    }
    if has_role("hive-mind") || has_role("swarm-agent") {
        return SwarmPattern::Swarm;
    }
    if has_role("verifier") {
        return SwarmPattern::Verifier;
    }
    if has_role("supervisor") {
        return SwarmPattern::Supervisor;
    }

    // 14. A lead over a larger team.
    if config.agents.len() > 3 && has_role("lead") {
        return SwarmPattern::Hierarchical;
    }

    // 15. An explicit hub.
    if has_role("hub") || has_role("coordinator") {
        return SwarmPattern::HubSpoke;
    }

    // 16. A linear workflow across distinct agents.
    if config.workflows.iter().any(|w| {
        let agents: Vec<&str> = w.steps.iter().map(|s| s.agent.as_str()).collect();
        let mut unique = agents.clone();
        unique.sort_unstable();
        unique.dedup();
        agents.len() > 2 && unique.len() == agents.len()
    }) {
        return SwarmPattern::Pipeline;
    }

    // 17. Default.
    SwarmPattern::FanOut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::{agent, agent_with_role, config_with, step, workflow};

    #[test]
    fn test_pattern_round_trip() {
        for pattern in SwarmPattern::all() {
            let parsed: SwarmPattern = pattern.as_str().parse().unwrap();
            assert_eq!(parsed, *pattern);
        }
        assert!("tree".parse::<SwarmPattern>().is_err());
    }

    #[test]
    fn test_explicit_pattern_wins() {
        let mut config = config_with(vec![agent_with_role("a", "critic")], vec![]);
        config.swarm.pattern = Some(SwarmPattern::Mesh);
        assert_eq!(select_pattern(&config), SwarmPattern::Mesh);
    }

    #[test]
    fn test_depends_on_selects_dag() {
        let config = config_with(
            vec![agent("a"), agent("b")],
            vec![workflow(
                "wf",
                vec![step("s1", "a", vec![]), step("s2", "b", vec!["s1"])],
            )],
        );
        assert_eq!(select_pattern(&config), SwarmPattern::Dag);
    }

    #[test]
    fn test_mapper_reducer_selects_map_reduce() {
        let config = config_with(
            vec![
                agent_with_role("m1", "mapper"),
                agent_with_role("r1", "reducer"),
            ],
            vec![],
        );
        assert_eq!(select_pattern(&config), SwarmPattern::MapReduce);
    }

    #[test]
    fn test_red_team_requires_both_sides() {
        let only_attacker = config_with(vec![agent_with_role("a", "attacker")], vec![]);
        assert_ne!(select_pattern(&only_attacker), SwarmPattern::RedTeam);

        let both = config_with(
            vec![
                agent_with_role("a", "attacker"),
                agent_with_role("d", "defender"),
            ],
            vec![],
        );
        assert_eq!(select_pattern(&both), SwarmPattern::RedTeam);
    }

    #[test]
    fn test_critic_selects_reflection() {
        let config = config_with(
            vec![agent("writer"), agent_with_role("reviewer", "critic")],
            vec![],
        );
        assert_eq!(select_pattern(&config), SwarmPattern::Reflection);
    }

    #[test]
    fn test_tier_roles_select_escalation() {
        let config = config_with(
            vec![
                agent_with_role("l1", "tier-1"),
                agent_with_role("l2", "tier-2"),
            ],
            vec![],
        );
        assert_eq!(select_pattern(&config), SwarmPattern::Escalation);
    }

    #[test]
    fn test_hierarchical_needs_more_than_three_agents() {
        let small = config_with(
            vec![
                agent_with_role("l", "lead"),
                agent("a"),
                agent("b"),
            ],
            vec![],
        );
        assert_ne!(select_pattern(&small), SwarmPattern::Hierarchical);

        let large = config_with(
            vec![
                agent_with_role("l", "lead"),
                agent("a"),
                agent("b"),
                agent("c"),
            ],
            vec![],
        );
        assert_eq!(select_pattern(&large), SwarmPattern::Hierarchical);
    }

    #[test]
    fn test_distinct_agent_workflow_selects_pipeline() {
        let config = config_with(
            vec![agent("a"), agent("b"), agent("c")],
            vec![workflow(
                "wf",
                vec![
                    step("s1", "a", vec![]),
                    step("s2", "b", vec![]),
                    step("s3", "c", vec![]),
                ],
            )],
        );
        assert_eq!(select_pattern(&config), SwarmPattern::Pipeline);
    }

    #[test]
    fn test_default_is_fan_out() {
        let config = config_with(vec![agent("a"), agent("b")], vec![]);
        assert_eq!(select_pattern(&config), SwarmPattern::FanOut);
    }
}
