//! Election of hosts and zones.
//!
//! All elections are deterministic: the strictly lowest score wins and ties
//! go to the candidate that comes first.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::error::{PlacementError, PlacementResult};
use crate::scorer::{HostLoad, HostScore, ScoringWeights, score_host, usage_score};

/// A zone and its candidate hosts.
#[derive(Debug, Clone)]
pub struct ZoneLoad {
    pub zone_id: String,
    pub hosts: Vec<HostLoad>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneScore {
    pub zone_id: String,
    /// Sum of the hosts' usage scores.
    pub score: u64,
}

/// Pick the best host for a workload called `name`.
pub fn elect_host(name: &str, candidates: &[HostLoad], weights: &ScoringWeights) -> PlacementResult<HostScore> {
    let mut best: Option<HostScore> = None;
    for host in candidates {
        let score = score_host(name, host, weights);
        debug!(host_id = %score.host_id, usage = score.usage, siblings = score.siblings, total = score.total, "host scored");
        if best.as_ref().is_none_or(|b| score.total < b.total) {
            best = Some(score);
        }
    }
    best.ok_or_else(|| PlacementError::NoHosts(format!("no host to place {name}")))
}

/// Exhaust-then-reset spreading: hosts already picked are skipped until
/// every candidate has been picked once, then the slate is wiped.
#[derive(Debug, Clone, Default)]
pub struct HostSpread {
    used: HashSet<String>,
}

impl HostSpread {
    /// Start with `hosts` already counted as picked.
    pub fn excluding<I: IntoIterator<Item = String>>(hosts: I) -> Self {
        Self {
            used: hosts.into_iter().collect(),
        }
    }

    pub fn elect(&mut self, name: &str, candidates: &[HostLoad], weights: &ScoringWeights) -> PlacementResult<HostScore> {
        if candidates.is_empty() {
            return Err(PlacementError::NoHosts(format!("no host to place {name}")));
        }
        let mut pool: Vec<HostLoad> = candidates
            .iter()
            .filter(|h| !self.used.contains(&h.host_id))
            .cloned()
            .collect();
        if pool.is_empty() {
            self.used.clear();
            pool = candidates.to_vec();
        }
        let pick = elect_host(name, &pool, weights)?;
        self.used.insert(pick.host_id.clone());
        Ok(pick)
    }
}

/// Pick `count` hosts, avoiding repeats until every candidate has been used.
pub fn elect_hosts(
    name: &str,
    candidates: &[HostLoad],
    count: usize,
    weights: &ScoringWeights,
) -> PlacementResult<Vec<HostScore>> {
    if candidates.is_empty() {
        return Err(PlacementError::NoHosts(format!("no host to place {name}")));
    }
    let mut spread = HostSpread::default();
    (0..count).map(|_| spread.elect(name, candidates, weights)).collect()
}

/// The `count` least-loaded zones, or all of them when there are fewer.
pub fn elect_zones(zones: &[ZoneLoad], count: usize, weights: &ScoringWeights) -> PlacementResult<Vec<ZoneScore>> {
    if zones.is_empty() {
        return Err(PlacementError::NoZones("zone list is empty".to_string()));
    }

    let mut scored: Vec<ZoneScore> = zones
        .iter()
        .map(|z| ZoneScore {
            zone_id: z.zone_id.clone(),
            score: z.hosts.iter().map(|h| usage_score(&h.usage, weights)).sum(),
        })
        .collect();
    // Stable sort keeps input order among equal scores.
    scored.sort_by_key(|z| z.score);
    scored.truncate(count);
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cumulus_state::HostUsage;

    fn host(id: &str, instances: u32, names: &[&str]) -> HostLoad {
        HostLoad {
            host_id: id.to_string(),
            usage: HostUsage {
                vcpus: 0,
                memory_bytes: 0,
                instances,
            },
            instance_names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    fn zone(id: &str, hosts: Vec<HostLoad>) -> ZoneLoad {
        ZoneLoad {
            zone_id: id.to_string(),
            hosts,
        }
    }

    #[test]
    fn least_loaded_host_wins() {
        let hosts = vec![host("busy", 5, &[]), host("idle", 1, &[]), host("mid", 3, &[])];
        let pick = elect_host("web", &hosts, &ScoringWeights::default()).unwrap();
        assert_eq!(pick.host_id, "idle");
    }

    #[test]
    fn ties_go_to_first_candidate() {
        let hosts = vec![host("a", 1, &[]), host("b", 1, &[]), host("c", 1, &[])];
        let weights = ScoringWeights::default();
        for _ in 0..10 {
            assert_eq!(elect_host("web", &hosts, &weights).unwrap().host_id, "a");
        }
    }

    #[test]
    fn sibling_avoidance_beats_lower_usage() {
        // h1 is emptier but already runs web-1.
        let hosts = vec![host("h1", 1, &["web-1"]), host("h2", 50, &["db"])];
        let pick = elect_host("web-2", &hosts, &ScoringWeights::default()).unwrap();
        assert_eq!(pick.host_id, "h2");
    }

    #[test]
    fn empty_candidates_fail() {
        assert!(matches!(
            elect_host("web", &[], &ScoringWeights::default()),
            Err(PlacementError::NoHosts(_))
        ));
        assert!(elect_hosts("web", &[], 2, &ScoringWeights::default()).is_err());
    }

    #[test]
    fn elect_hosts_spreads_then_resets() {
        let hosts = vec![host("a", 0, &[]), host("b", 1, &[])];
        let picks = elect_hosts("web", &hosts, 3, &ScoringWeights::default()).unwrap();
        let ids: Vec<&str> = picks.iter().map(|p| p.host_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "a"]);
    }

    #[test]
    fn elect_zones_picks_least_loaded() {
        let zones = vec![
            zone("z1", vec![host("h1", 4, &[])]),
            zone("z2", vec![host("h2", 1, &[])]),
            zone("z3", vec![host("h3", 1, &[]), host("h4", 1, &[])]),
        ];
        let picks = elect_zones(&zones, 2, &ScoringWeights::default()).unwrap();
        let ids: Vec<&str> = picks.iter().map(|z| z.zone_id.as_str()).collect();
        assert_eq!(ids, vec!["z2", "z3"]);
    }

    #[test]
    fn elect_zones_returns_all_when_short() {
        let zones = vec![zone("z1", vec![]), zone("z2", vec![])];
        let picks = elect_zones(&zones, 5, &ScoringWeights::default()).unwrap();
        assert_eq!(picks.len(), 2);
        assert_eq!(picks[0].zone_id, "z1");
        assert!(matches!(
            elect_zones(&[], 1, &ScoringWeights::default()),
            Err(PlacementError::NoZones(_))
        ));
    }
}
