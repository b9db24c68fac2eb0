// Copyright 2024 Developers of the relaysim project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Aggregates the merged per-node statistics into the printed report:
//! bandwidth totals, reconciliation outcomes, the difference histogram and
//! the propagation-latency table.

use std::collections::BTreeMap;

use crate::config::{NodeMode, DIFFS_DISTR_SIZE};
use crate::stats::NodeStats;
use crate::TxId;

/// Steps of the propagation-latency table.
pub const GRANULARITY: usize = 20;

/// Mean relay time to one coverage fraction, and how many transactions
/// reached that fraction at all.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RelayTimeBucket {
    pub mean_secs: f64,
    pub txs: usize,
}

#[derive(Clone, Debug)]
pub struct Report {
    pub inv_received_total: u64,
    pub useless_inv_received_total: u64,
    pub recon_inv_received_total: u64,
    pub recon_useless_inv_received_total: u64,
    pub on_the_fly_collisions: u64,
    pub reconciliations: u64,
    pub reconciliations_failed: u64,
    /// Sum of estimated diffs over successful exchanges.
    pub total_syndromes_sent: i64,
    /// Sum of overestimation over successful exchanges.
    pub extra_syndromes_sent: i64,
    /// Histogram of per-exchange diff sizes; the last bucket is overflow.
    pub diffs_distr: Vec<u64>,
    pub relay_times: Vec<RelayTimeBucket>,
}

impl Report {
    /// Black-hole nodes are excluded from every aggregate.
    pub fn build(stats: &[NodeStats]) -> Report {
        let active_nodes = stats
            .iter()
            .filter(|s| s.mode != NodeMode::BlackHole.as_u8())
            .count();

        let mut report = Report {
            inv_received_total: 0,
            useless_inv_received_total: 0,
            recon_inv_received_total: 0,
            recon_useless_inv_received_total: 0,
            on_the_fly_collisions: 0,
            reconciliations: 0,
            reconciliations_failed: 0,
            total_syndromes_sent: 0,
            extra_syndromes_sent: 0,
            diffs_distr: vec![0; DIFFS_DISTR_SIZE],
            relay_times: vec![RelayTimeBucket::default(); GRANULARITY],
        };

        let mut all_tx_relay_times: BTreeMap<TxId, Vec<f64>> = BTreeMap::new();
        for node in stats {
            if node.mode == NodeMode::BlackHole.as_u8() {
                continue;
            }
            for record in &node.reconcil_data {
                let bucket = (record.diff_size as usize).min(DIFFS_DISTR_SIZE - 1);
                report.diffs_distr[bucket] += 1;
                if record.estimated_diff < record.diff_size as i64 {
                    report.reconciliations_failed += 1;
                } else {
                    report.total_syndromes_sent += record.estimated_diff;
                    report.extra_syndromes_sent +=
                        record.estimated_diff - record.diff_size as i64;
                }
                report.reconciliations += 1;
            }
            report.inv_received_total += node.inv_received_messages;
            report.useless_inv_received_total += node.useless_inv_received_messages;
            report.recon_inv_received_total += node.recon_inv_received_messages;
            report.recon_useless_inv_received_total += node.recon_useless_inv_received_messages;
            report.on_the_fly_collisions += node.on_the_fly_collisions;
            for sighting in &node.tx_received_times {
                all_tx_relay_times
                    .entry(sighting.tx_hash)
                    .or_default()
                    .push(sighting.tx_time);
            }
        }

        let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); GRANULARITY];
        for times in all_tx_relay_times.values_mut() {
            times.sort_by(f64::total_cmp);
            for (i, bucket) in buckets.iter_mut().enumerate() {
                let fraction = (i + 1) as f64 / GRANULARITY as f64 - 0.01;
                // only count a transaction towards fractions it reached
                if times.len() as f64 <= active_nodes as f64 * fraction {
                    break;
                }
                let index = (times.len() as f64 * fraction) as usize;
                bucket.push(times[index] - times[0]);
            }
        }
        for (i, bucket) in buckets.iter().enumerate() {
            report.relay_times[i] = RelayTimeBucket {
                mean_secs: mean(bucket),
                txs: bucket.len(),
            };
        }

        report
    }

    pub fn print(&self) {
        println!("INVs sent in the network: {}", self.inv_received_total);
        println!(
            "Useless % INVs in the network: {:.4}",
            ratio(self.useless_inv_received_total, self.inv_received_total)
        );
        println!(
            "Recon INVs sent in the network: {}",
            self.recon_inv_received_total
        );
        println!(
            "Recon Useless % INVs in the network: {:.4}",
            ratio(
                self.recon_useless_inv_received_total,
                self.recon_inv_received_total
            )
        );
        println!("On-the-fly collisions: {}", self.on_the_fly_collisions);
        println!("Total syndromes sent: {}", self.total_syndromes_sent);
        println!(
            "Extra syndromes sent (overestimation): {}",
            self.extra_syndromes_sent
        );
        println!("Reconciliations: {}", self.reconciliations);
        println!("Reconciliations failed: {}", self.reconciliations_failed);
        let histogram: Vec<String> = self.diffs_distr.iter().map(u64::to_string).collect();
        println!("{}", histogram.join(", "));
        for (i, bucket) in self.relay_times.iter().enumerate() {
            println!(
                "{}% to relay time: {:.3}, txs: {}",
                (i + 1) * (100 / GRANULARITY) - 1,
                bucket.mean_secs,
                bucket.txs
            );
        }
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{NodeMode, DIFFS_DISTR_SIZE};
    use crate::stats::{NodeStats, ReconcilRecord, TxRecvTime};

    use super::{Report, GRANULARITY};

    fn node_with_records(node_id: u32, records: &[(u32, i64)]) -> NodeStats {
        let mut stats = NodeStats::new(node_id, 8, NodeMode::Regular.as_u8());
        for &(diff_size, estimated_diff) in records {
            stats.reconcil_data.push(ReconcilRecord {
                node_id,
                set_in_size: 0,
                set_out_size: 0,
                diff_size,
                estimated_diff,
            });
        }
        stats
    }

    #[test]
    fn counts_failures_and_syndromes() {
        // diff 5 overestimated by 3, diff 10 underestimated, diff 400 overflows
        let stats = vec![node_with_records(0, &[(5, 8), (10, 9), (400, 400)])];
        let report = Report::build(&stats);
        assert_eq!(report.reconciliations, 3);
        assert_eq!(report.reconciliations_failed, 1);
        assert_eq!(report.total_syndromes_sent, 8 + 400);
        assert_eq!(report.extra_syndromes_sent, 3);
        assert_eq!(report.diffs_distr[5], 1);
        assert_eq!(report.diffs_distr[10], 1);
        assert_eq!(report.diffs_distr[DIFFS_DISTR_SIZE - 1], 1);
    }

    #[test]
    fn black_holes_are_excluded() {
        let mut black_hole = node_with_records(1, &[(5, 8)]);
        black_hole.mode = NodeMode::BlackHole.as_u8();
        black_hole.inv_received_messages = 99;
        let stats = vec![node_with_records(0, &[]), black_hole];
        let report = Report::build(&stats);
        assert_eq!(report.reconciliations, 0);
        assert_eq!(report.inv_received_total, 0);
    }

    #[test]
    fn relay_table_gates_on_coverage() {
        // 8 active nodes, but the transaction reached only 4 of them
        let mut stats: Vec<NodeStats> = (0..8u32)
            .map(|id| NodeStats::new(id, 4, NodeMode::Regular.as_u8()))
            .collect();
        for (id, time) in [(0u32, 1.0), (1, 2.0), (2, 3.0), (3, 4.0)] {
            stats[id as usize].tx_received_times.push(TxRecvTime {
                node_id: id,
                tx_hash: 42,
                tx_time: time,
            });
        }
        let report = Report::build(&stats);
        assert_eq!(report.relay_times.len(), GRANULARITY);
        // coverage 4/8 stops the table at the 50% step
        for bucket in &report.relay_times[..10] {
            assert_eq!(bucket.txs, 1);
        }
        for bucket in &report.relay_times[10..] {
            assert_eq!(bucket.txs, 0);
        }
        // the first step reads the earliest sighting
        assert_eq!(report.relay_times[0].mean_secs, 0.0);
        // the last populated step (49%) reads the second sighting
        assert_eq!(report.relay_times[9].mean_secs, 1.0);
    }
}
