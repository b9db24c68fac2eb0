// Copyright 2024 Developers of the relaysim project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The pairwise set-reconciliation engine.

//! Periodically a node picks one outbound peer and asks for its outgoing
//! reconciliation set. The responder ships the set and clears it; the
//! initiator computes the mutual differences, learns what it was missing,
//! INVs the remainder back (tagged with the sentinel hop), and feeds the
//! outcome into the adaptive difference estimator.

use std::collections::HashSet;

use events::SimTime;
use tracing::{debug, trace};

use crate::config::{NodeMode, ReconcileMode, RECON_HOP, RECON_MAX_SET_SIZE};
use crate::message::Message;
use crate::node::Node;
use crate::sim::{Event, Outbox};
use crate::stats::ReconcilRecord;
use crate::{NodeId, TxId};

/// Expected set difference for an exchange between sets of the given sizes.
pub fn estimate_difference(set_size_a: usize, set_size_b: usize, coeff: f64) -> i64 {
    (set_size_a.abs_diff(set_size_b) as f64 + coeff * set_size_a.min(set_size_b) as f64) as i64
}

impl Node {
    /// Periodic initiation: pick a counterparty and send it a request.
    pub(crate) fn reconcile_tick(&mut self, out: &mut Outbox) {
        let peer = match self.config.protocol.reconciliation_mode {
            ReconcileMode::Off => return,
            ReconcileMode::TimeBased => {
                let Some(&front) = self.reconcile_peers.front() else {
                    return;
                };
                let mut peer = front;
                if self.config.protocol.bh_detection
                    && self.peer(peer).learned_mode == Some(NodeMode::BlackHole)
                {
                    // drop the black hole from the rotation for good
                    self.reconcile_peers.pop_front();
                    match self.reconcile_peers.front() {
                        Some(&next) => peer = next,
                        None => {
                            out.schedule(self.recon_interval, Event::Reconcile { node: self.id });
                            return;
                        }
                    }
                }
                self.reconcile_peers.pop_front();
                self.reconcile_peers.push_back(peer);
                peer
            }
            ReconcileMode::SetSizeBased => {
                let found = self
                    .reconcile_peers
                    .iter()
                    .copied()
                    .find(|&peer| self.peer(peer).recon_set.len() > RECON_MAX_SET_SIZE);
                match found {
                    Some(peer) => peer,
                    None => {
                        out.schedule(self.recon_interval, Event::Reconcile { node: self.id });
                        return;
                    }
                }
            }
        };

        let set_size = self.peer(peer).recon_set.len();
        trace!("node {} requests reconciliation with {peer} (set size {set_size})", self.id);
        self.send_message(peer, &Message::ReconcileReq { set_size }, out);

        if self.t_stop < out.now() {
            return;
        }
        out.schedule(self.recon_interval, Event::Reconcile { node: self.id });
    }

    /// Responder side, after the scheduled delay: ship the outgoing set for
    /// `to`, mark everything in it as known by that peer, and clear it.
    pub(crate) fn respond_reconcile(&mut self, to: NodeId, out: &mut Outbox) {
        let transactions = {
            let record = self.peer_mut(to);
            let transactions = std::mem::take(&mut record.recon_set);
            for &tx in &transactions {
                record.knows_tx.insert(tx);
            }
            transactions
        };
        debug!(
            "node {} responds to reconciliation with {to}: {} transactions",
            self.id,
            transactions.len()
        );
        self.send_message(to, &Message::ReconcileResp { transactions }, out);
    }

    /// Initiator side: the peer's set arrived; compute both halves of the
    /// difference and settle the exchange.
    pub(crate) fn on_reconcile_response(
        &mut self,
        from: NodeId,
        transactions: Vec<TxId>,
        out: &mut Outbox,
    ) {
        let now = out.now();
        let local_set: Vec<TxId> = self.peer(from).recon_set.clone();
        let remote_set: HashSet<TxId> = transactions.iter().copied().collect();

        // what the peer had that we were missing
        let mut we_missed = 0u32;
        for &tx in &transactions {
            self.peer_mut(from).knows_tx.insert(tx);
            if local_set.contains(&tx) || self.known_tx.contains(&tx) {
                continue;
            }
            we_missed += 1;
            self.save_tx_data(tx, Some(from), now);
        }

        // what we had that the peer was missing; announce those back
        let mut peer_missed = 0u32;
        for &tx in &local_set {
            if !remote_set.contains(&tx) {
                out.schedule(
                    SimTime::from_secs_f64(0.1),
                    Event::SendInv {
                        node: self.id,
                        to: from,
                        tx,
                        hop: RECON_HOP,
                    },
                );
                peer_missed += 1;
            }
        }
        self.peer_mut(from).recon_set.clear();

        let diff_size = we_missed + peer_missed;
        debug!(
            "node {} reconciled with {from}: out {} / in {} / diff {diff_size}",
            self.id,
            local_set.len(),
            transactions.len()
        );
        if self.in_warm_down(now) {
            return;
        }

        let set_out_size = local_set.len();
        let set_in_size = transactions.len();
        let estimated_diff = (estimate_difference(set_out_size, set_in_size, self.prev_a) as f64
            + self.config.protocol.q_estimation_multiplier) as i64;
        if set_out_size * set_in_size != 0 && estimated_diff >= (set_out_size + set_in_size) as i64
        {
            self.prev_a = (diff_size as f64 - set_out_size.abs_diff(set_in_size) as f64)
                / set_out_size.min(set_in_size) as f64;
        }

        self.stats.reconcil_data.push(ReconcilRecord {
            node_id: self.id,
            set_in_size: set_in_size as u32,
            set_out_size: set_out_size as u32,
            diff_size,
            estimated_diff,
        });
        self.stats.reconcils += 1;
    }
}
