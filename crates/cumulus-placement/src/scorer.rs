//! Host scoring for placement decisions.
//!
//! A host's score is its weighted usage plus a malus for every hosted
//! workload whose name looks like a sibling of the new workload's name.
//! Lower is better. Siblings are numbered replicas such as `web-1`/`web-2`
//! or near-identical names; keeping them apart spreads failure domains.

use cumulus_core::PlacementConfig;
use cumulus_state::HostUsage;
use serde::Serialize;

const GIB: u64 = 1024 * 1024 * 1024;

/// A candidate host as seen by the scheduler.
#[derive(Debug, Clone)]
pub struct HostLoad {
    pub host_id: String,
    pub usage: HostUsage,
    /// Names of the workloads already hosted.
    pub instance_names: Vec<String>,
}

/// Integer weights of the score components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringWeights {
    pub instance: u64,
    pub vcpu: u64,
    pub memory_gib: u64,
    pub sibling_malus: u64,
    pub sibling_max_distance: usize,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self::from(&PlacementConfig::default())
    }
}

impl From<&PlacementConfig> for ScoringWeights {
    fn from(config: &PlacementConfig) -> Self {
        Self {
            instance: config.instance_weight,
            vcpu: config.vcpu_weight,
            memory_gib: config.memory_gib_weight,
            sibling_malus: config.sibling_malus,
            sibling_max_distance: config.sibling_max_distance,
        }
    }
}

/// Scored placement result for a single host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostScore {
    pub host_id: String,
    pub usage: u64,
    pub siblings: u64,
    /// `usage + siblings × malus`.
    pub total: u64,
}

/// Weighted usage of a host. Memory counts in whole GiB.
pub fn usage_score(usage: &HostUsage, weights: &ScoringWeights) -> u64 {
    u64::from(usage.instances) * weights.instance
        + u64::from(usage.vcpus) * weights.vcpu
        + (usage.memory_bytes / GIB) * weights.memory_gib
}

/// The name with its last character incremented (`web-1` → `web-2`).
pub fn successor(name: &str) -> Option<String> {
    let mut chars: Vec<char> = name.chars().collect();
    let last = chars.pop()?;
    let next = char::from_u32(u32::from(last) + 1)?;
    chars.push(next);
    Some(chars.into_iter().collect())
}

/// Edit distance between two strings, by characters.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != *cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Whether two workload names look like replicas of each other.
pub fn is_sibling(a: &str, b: &str, max_distance: usize) -> bool {
    successor(a).as_deref() == Some(b)
        || successor(b).as_deref() == Some(a)
        || levenshtein(a, b) <= max_distance
}

/// Score a host for a new workload called `name`.
pub fn score_host(name: &str, host: &HostLoad, weights: &ScoringWeights) -> HostScore {
    let usage = usage_score(&host.usage, weights);
    let siblings = host
        .instance_names
        .iter()
        .filter(|other| is_sibling(name, other, weights.sibling_max_distance))
        .count() as u64;

    HostScore {
        host_id: host.host_id.clone(),
        usage,
        siblings,
        total: usage + siblings * weights.sibling_malus,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(id: &str, instances: u32, vcpus: u32, memory_gib: u64, names: &[&str]) -> HostLoad {
        HostLoad {
            host_id: id.to_string(),
            usage: HostUsage {
                vcpus,
                memory_bytes: memory_gib * GIB,
                instances,
            },
            instance_names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    #[test]
    fn usage_score_uses_default_weights() {
        let weights = ScoringWeights::default();
        let usage = HostUsage {
            vcpus: 8,
            memory_bytes: 16 * GIB + GIB / 2,
            instances: 3,
        };
        // 3×4 + 8×2 + 16×1
        assert_eq!(usage_score(&usage, &weights), 44);
    }

    #[test]
    fn weights_follow_config() {
        let config = PlacementConfig {
            instance_weight: 10,
            sibling_malus: 7,
            ..Default::default()
        };
        let weights = ScoringWeights::from(&config);
        assert_eq!(weights.instance, 10);
        assert_eq!(weights.vcpu, 2);
        assert_eq!(weights.sibling_malus, 7);
    }

    #[test]
    fn successor_increments_last_char() {
        assert_eq!(successor("web-1").as_deref(), Some("web-2"));
        assert_eq!(successor("db-a").as_deref(), Some("db-b"));
        assert_eq!(successor(""), None);
    }

    #[test]
    fn levenshtein_distances() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("web", "web"), 0);
        assert_eq!(levenshtein("web-01", "web-02"), 1);
    }

    #[test]
    fn sibling_detection() {
        assert!(is_sibling("web-1", "web-2", 2));
        assert!(is_sibling("web-2", "web-1", 2));
        assert!(is_sibling("api", "apx", 2));
        assert!(is_sibling("frontend-9", "frontend-:", 0));
        assert!(!is_sibling("web-1", "database", 2));
        assert!(!is_sibling("web-1", "web-3", 0));
    }

    #[test]
    fn sibling_malus_applies_once_per_sibling() {
        let weights = ScoringWeights::default();
        let crowded = host("h1", 2, 2, 0, &["web-1", "web-3"]);

        let score = score_host("web-2", &crowded, &weights);
        assert_eq!(score.usage, 2 * 4 + 2 * 2);
        assert_eq!(score.siblings, 2);
        assert_eq!(score.total, score.usage + 20_000);
    }

    #[test]
    fn unrelated_names_carry_no_malus() {
        let weights = ScoringWeights::default();
        let h = host("h1", 1, 1, 1, &["postgres-primary"]);
        assert_eq!(score_host("web-1", &h, &weights).siblings, 0);
    }
}
