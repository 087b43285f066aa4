//! Work distribution across the runner pool.
//!
//! Each cycle the engine spreads a list of items (actions or asserts) over
//! the pool's hostnames using one of two strategies:
//!
//! | Strategy | Shape | RPCs per cycle |
//! |----------|-------|----------------|
//! | `parallel` | every hostname runs the entire list | `hostnames × items` |
//! | `series` | items round-robin across hostnames, each runs once | `items` |
//!
//! Shards execute concurrently and their results fold into the cycle's seed
//! data with the associative merges from [`state`](crate::state); ordering
//! between shards is unspecified, ordering within a shard is input order.

use futures::future::join_all;

use crate::config::{Action, Assert};
use crate::engine::dispatch::{run_actions, run_asserts};
use crate::error::{EngineError, EngineResult};
use crate::messaging::RunnerTransport;
use crate::state::{ActionsData, Statuses, combine_action_data, combine_statuses};

/// How a list of items is spread across hostnames within one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionStrategy {
    /// Fan the whole list out to every hostname.
    Parallel,
    /// Round-robin the items so each executes exactly once per cycle.
    Series,
}

impl DistributionStrategy {
    /// Parses a strategy field, naming the field in the error message.
    pub fn parse_field(field: &str, value: &str) -> EngineResult<Self> {
        match value {
            "parallel" => Ok(Self::Parallel),
            "series" => Ok(Self::Series),
            other => Err(EngineError::InvalidConfig(format!(
                "{field} must be 'parallel' or 'series', got '{other}'"
            ))),
        }
    }
}

/// Round-robins `items` across `hostnames`, preserving input order within
/// each shard. Hostnames left without items produce no shard.
fn round_robin<'a, T>(items: &'a [T], hostnames: &'a [String]) -> Vec<(&'a str, Vec<&'a T>)> {
    let mut shards: Vec<(&str, Vec<&T>)> = hostnames
        .iter()
        .map(|hostname| (hostname.as_str(), Vec::new()))
        .collect();

    for (index, item) in items.iter().enumerate() {
        shards[index % hostnames.len()].1.push(item);
    }

    shards.retain(|(_, shard)| !shard.is_empty());
    shards
}

/// Distributes `actions` across `hostnames` and folds the shard results
/// into `seed` (the test's current actions data).
pub async fn distribute_actions(
    strategy: DistributionStrategy,
    transport: &dyn RunnerTransport,
    actions: &[Action],
    seed: ActionsData,
    hostnames: &[String],
    seconds_between: f64,
) -> ActionsData {
    let shard_results = match strategy {
        DistributionStrategy::Parallel => {
            let shards = hostnames.iter().map(|hostname| {
                run_actions(transport, actions, &seed, hostname, seconds_between)
            });
            join_all(shards).await
        }
        DistributionStrategy::Series => {
            let assignments = round_robin(actions, hostnames);
            let shards = assignments.iter().map(|(hostname, shard)| {
                let shard: Vec<Action> = shard.iter().map(|action| (*action).clone()).collect();
                let seed = &seed;
                async move {
                    run_actions(transport, &shard, seed, hostname, seconds_between).await
                }
            });
            join_all(shards).await
        }
    };

    shard_results.into_iter().fold(seed, combine_action_data)
}

/// Distributes `asserts` (already filtered to the remaining ones) across
/// `hostnames` and folds the shard results into `seed`.
pub async fn distribute_asserts(
    strategy: DistributionStrategy,
    transport: &dyn RunnerTransport,
    asserts: &[Assert],
    seed: Statuses,
    hostnames: &[String],
    seconds_between: f64,
) -> Statuses {
    let shard_results = match strategy {
        DistributionStrategy::Parallel => {
            let shards = hostnames
                .iter()
                .map(|hostname| run_asserts(transport, asserts, hostname, seconds_between));
            join_all(shards).await
        }
        DistributionStrategy::Series => {
            let assignments = round_robin(asserts, hostnames);
            let shards = assignments.iter().map(|(hostname, shard)| {
                let shard: Vec<Assert> = shard.iter().map(|asrt| (*asrt).clone()).collect();
                async move { run_asserts(transport, &shard, hostname, seconds_between).await }
            });
            join_all(shards).await
        }
    };

    shard_results.into_iter().fold(seed, combine_statuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockTransport;

    fn actions(names: &[&str]) -> Vec<Action> {
        names
            .iter()
            .map(|name| {
                serde_json::from_value(serde_json::json!({"type": "POST", "name": name})).unwrap()
            })
            .collect()
    }

    fn asserts(names: &[&str]) -> Vec<Assert> {
        names
            .iter()
            .map(|name| {
                serde_json::from_value(serde_json::json!({"type": "JSON", "name": name})).unwrap()
            })
            .collect()
    }

    fn hostnames(count: usize) -> Vec<String> {
        (1..=count).map(|i| format!("h{i}:50051")).collect()
    }

    #[test]
    fn unknown_strategy_is_invalid_config() {
        let err = DistributionStrategy::parse_field("actionDistributionStrategy", "scatter")
            .unwrap_err();
        assert!(
            err.to_string()
                .contains("actionDistributionStrategy must be 'parallel' or 'series'")
        );
    }

    #[tokio::test]
    async fn parallel_sends_every_item_to_every_hostname() {
        let transport = MockTransport::new();
        let actions = actions(&["a1", "a2", "a3"]);
        let hosts = hostnames(2);

        distribute_actions(
            DistributionStrategy::Parallel,
            &transport,
            &actions,
            ActionsData::new(),
            &hosts,
            0.0,
        )
        .await;

        // m hostnames x k items RPCs per cycle.
        assert_eq!(transport.action_log().len(), 6);
        for host in &hosts {
            let on_host: Vec<_> = transport
                .action_log()
                .into_iter()
                .filter(|(hostname, _)| hostname == host)
                .map(|(_, name)| name)
                .collect();
            assert_eq!(on_host, vec!["a1", "a2", "a3"]);
        }
    }

    #[tokio::test]
    async fn series_round_robins_items_across_hostnames() {
        let transport = MockTransport::new();
        let actions = actions(&["a1", "a2", "a3"]);
        let hosts = hostnames(2);

        distribute_actions(
            DistributionStrategy::Series,
            &transport,
            &actions,
            ActionsData::new(),
            &hosts,
            0.0,
        )
        .await;

        // k RPCs per cycle regardless of pool size.
        let log = transport.action_log();
        assert_eq!(log.len(), 3);

        let on_host = |host: &str| -> Vec<String> {
            log.iter()
                .filter(|(hostname, _)| hostname == host)
                .map(|(_, name)| name.clone())
                .collect()
        };
        assert_eq!(on_host("h1:50051"), vec!["a1", "a3"]);
        assert_eq!(on_host("h2:50051"), vec!["a2"]);
    }

    #[tokio::test]
    async fn series_with_more_hostnames_than_items_skips_idle_hosts() {
        let transport = MockTransport::new();
        let asserts = asserts(&["only"]);

        distribute_asserts(
            DistributionStrategy::Series,
            &transport,
            &asserts,
            Statuses::new(),
            &hostnames(3),
            0.0,
        )
        .await;

        let log = transport.assert_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, "h1:50051");
    }

    #[tokio::test]
    async fn parallel_asserts_fold_into_seed_statuses() {
        let transport = MockTransport::new();
        let asserts = asserts(&["found"]);

        let seed = Statuses::from([(
            "earlier".to_string(),
            crate::state::AssertStatus {
                passed: true,
                ..Default::default()
            },
        )]);

        let statuses = distribute_asserts(
            DistributionStrategy::Parallel,
            &transport,
            &asserts,
            seed,
            &hostnames(2),
            0.0,
        )
        .await;

        assert!(statuses["earlier"].passed);
        assert!(statuses["found"].passed);
        assert_eq!(transport.assert_log().len(), 2);
    }
}
