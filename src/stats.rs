// Copyright 2024 Developers of the relaysim project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Provides the per-node statistics record, its cross-partition wire
//! encoding, and the end-of-run merge.

//! The scalar field order is part of the transfer format: partitions encode
//! with `bincode`, which serializes fields in declaration order, and the
//! aggregating side decodes with the same layout. The two trailing vectors
//! are the variable-length payloads.

use serde::{Deserialize, Serialize};

use crate::{NodeId, TxId};

/// One observed first sighting of a transaction.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct TxRecvTime {
    pub node_id: NodeId,
    pub tx_hash: TxId,
    pub tx_time: f64,
}

/// One completed reconciliation exchange, recorded by the initiator.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ReconcilRecord {
    pub node_id: NodeId,
    pub set_in_size: u32,
    pub set_out_size: u32,
    pub diff_size: u32,
    pub estimated_diff: i64,
}

/// Counters of one node, assembled into the report after every node has
/// stopped. Scalar fields are in transfer order; do not reorder them.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct NodeStats {
    pub node_id: NodeId,
    pub inv_received_messages: u64,
    pub useless_inv_received_messages: u64,
    pub recon_inv_received_messages: u64,
    pub recon_useless_inv_received_messages: u64,
    pub tx_created: u64,
    pub connections: u32,
    pub first_spy_success: f64,
    pub tx_received: u32,
    pub system_id: u32,
    pub ignored_filters: u32,
    pub reconcil_diffs_average: f64,
    pub reconcil_set_size_average: u32,
    pub reconcils: u32,
    pub mode: u8,
    pub tx_received_times: Vec<TxRecvTime>,
    pub reconcil_data: Vec<ReconcilRecord>,
    /// Local observability only; not part of the transfer layout.
    #[serde(skip)]
    pub on_the_fly_collisions: u64,
}

impl NodeStats {
    pub fn new(node_id: NodeId, connections: usize, mode: u8) -> NodeStats {
        NodeStats {
            node_id,
            connections: connections as u32,
            mode,
            ..NodeStats::default()
        }
    }

    /// Fill in the derived averages from the recorded exchanges.
    pub fn finalize(&mut self) {
        if self.reconcil_data.is_empty() {
            return;
        }
        let n = self.reconcil_data.len() as f64;
        let diffs: u64 = self.reconcil_data.iter().map(|r| r.diff_size as u64).sum();
        let sets: u64 = self
            .reconcil_data
            .iter()
            .map(|r| r.set_out_size as u64)
            .sum();
        self.reconcil_diffs_average = diffs as f64 / n;
        self.reconcil_set_size_average = (sets as f64 / n) as u32;
    }

    pub fn to_wire(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap()
    }

    pub fn from_wire(bytes: &[u8]) -> Result<NodeStats, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Merge the records received from every partition into one table indexed by
/// node id.
pub fn merge_partitions(
    partitions: Vec<Vec<Vec<u8>>>,
    total_nodes: usize,
) -> Result<Vec<NodeStats>, bincode::Error> {
    let mut merged = vec![NodeStats::default(); total_nodes];
    for partition in partitions {
        for bytes in partition {
            let stats = NodeStats::from_wire(&bytes)?;
            let slot = stats.node_id as usize;
            merged[slot] = stats;
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::{merge_partitions, NodeStats, ReconcilRecord, TxRecvTime};

    fn sample(node_id: u32) -> NodeStats {
        let mut stats = NodeStats::new(node_id, 8, 0);
        stats.inv_received_messages = 120;
        stats.useless_inv_received_messages = 40;
        stats.tx_received = 2;
        stats.tx_received_times = vec![
            TxRecvTime {
                node_id,
                tx_hash: 1_000_001,
                tx_time: 5.25,
            },
            TxRecvTime {
                node_id,
                tx_hash: 2_000_001,
                tx_time: 9.0,
            },
        ];
        stats.reconcil_data = vec![ReconcilRecord {
            node_id,
            set_in_size: 2,
            set_out_size: 3,
            diff_size: 3,
            estimated_diff: 1,
        }];
        stats.reconcils = 1;
        stats
    }

    #[test]
    fn wire_round_trip() {
        let stats = sample(7);
        let decoded = NodeStats::from_wire(&stats.to_wire()).unwrap();
        assert_eq!(decoded, stats);
    }

    #[test]
    fn merge_places_records_by_node_id() {
        let partition_a = vec![sample(0).to_wire(), sample(2).to_wire()];
        let partition_b = vec![sample(1).to_wire()];
        let merged = merge_partitions(vec![partition_a, partition_b], 3).unwrap();
        assert_eq!(merged.len(), 3);
        for (id, stats) in merged.iter().enumerate() {
            assert_eq!(stats.node_id, id as u32);
            assert_eq!(stats.tx_received, 2);
        }
    }

    #[test]
    fn finalize_computes_averages() {
        let mut stats = NodeStats::new(0, 4, 0);
        for (diff, out) in [(2, 10), (4, 30)] {
            stats.reconcil_data.push(ReconcilRecord {
                node_id: 0,
                set_in_size: 0,
                set_out_size: out,
                diff_size: diff,
                estimated_diff: 0,
            });
        }
        stats.finalize();
        assert_eq!(stats.reconcil_diffs_average, 3.0);
        assert_eq!(stats.reconcil_set_size_average, 20);
    }
}
