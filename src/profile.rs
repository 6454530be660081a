// src/profile.rs
//
// Canonical strategy-profile identity for one run: the sorted tally of
// strategy names, reduced by the role-group size. The key doubles as a
// map key and as the human-readable profile label in emitted reports.

use std::collections::BTreeMap;
use std::fmt;

use crate::sample::Agent;

/// Canonical profile key, e.g. `"2 GD 2 ZIP"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProfileKey(String);

impl ProfileKey {
    /// Wraps an already-canonical key string (e.g. parsed from a report).
    pub fn from_string(key: String) -> Self {
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tallies strategy occurrences, sorted by strategy name.
pub fn strategy_tallies(agents: &[Agent]) -> BTreeMap<String, u32> {
    let mut tallies = BTreeMap::new();
    for agent in agents {
        *tallies.entry(agent.strategy.clone()).or_insert(0) += 1;
    }
    tallies
}

/// Derives the canonical profile key for a run's agents.
///
/// Tallies are integer-divided by `group_size`; fractional remainders
/// truncate, an accepted approximation given fixed-size strategy groups.
/// Identical strategy multisets always yield byte-identical keys,
/// regardless of agent ordering.
pub fn profile_key(agents: &[Agent], group_size: u32) -> ProfileKey {
    let tallies = strategy_tallies(agents);
    let mut tokens = Vec::with_capacity(tallies.len() * 2);
    for (strategy, count) in &tallies {
        tokens.push((count / group_size).to_string());
        tokens.push(strategy.clone());
    }
    ProfileKey(tokens.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: u32, strategy: &str) -> Agent {
        Agent {
            id,
            strategy: strategy.to_string(),
            values: vec![2.0, 1.0],
            score: None,
        }
    }

    #[test]
    fn key_sorts_strategies_lexicographically() {
        let agents = vec![agent(0, "ZIP"), agent(1, "GD"), agent(2, "GD"), agent(3, "ZIP")];
        assert_eq!(profile_key(&agents, 1).as_str(), "2 GD 2 ZIP");
    }

    #[test]
    fn key_is_permutation_invariant() {
        let mut agents = vec![
            agent(0, "KAPLAN"),
            agent(1, "ZI"),
            agent(2, "KAPLAN"),
            agent(3, "ZI"),
            agent(4, "GDX"),
            agent(5, "GDX"),
        ];
        let expected = profile_key(&agents, 2);
        // Rotate through several permutations; the key never changes.
        for _ in 0..agents.len() {
            agents.rotate_left(1);
            assert_eq!(profile_key(&agents, 2), expected);
        }
        assert_eq!(expected.as_str(), "1 GDX 1 KAPLAN 1 ZI");
    }

    #[test]
    fn group_division_truncates() {
        let agents: Vec<Agent> = (0..7).map(|i| agent(i, "ZI")).collect();
        assert_eq!(profile_key(&agents, 4).as_str(), "1 ZI");
    }

    #[test]
    fn four_per_group_reduces_counts() {
        let mut agents = Vec::new();
        for i in 0..8 {
            agents.push(agent(i, "GD"));
        }
        for i in 8..16 {
            agents.push(agent(i, "ZIP"));
        }
        assert_eq!(profile_key(&agents, 4).as_str(), "2 GD 2 ZIP");
    }
}
