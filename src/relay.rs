// Copyright 2024 Developers of the relaysim project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The relay policy: how a node schedules INVs for a freshly learned
//! transaction.

//! STANDARD floods every peer with a Poissonized per-edge delay; the
//! preferred-destination variants announce to a small random subset instead.
//! Actual sending happens later, when the scheduled [`Event::SendInv`]
//! fires, so an INV that crossed the edge in the meantime suppresses the
//! send.

use events::SimTime;
use rand::Rng;
use tracing::trace;

use crate::config::Protocol;
use crate::message::Message;
use crate::node::Node;
use crate::poisson::poisson_interval;
use crate::sim::{Event, Outbox};
use crate::{NodeId, TxId};

impl Node {
    /// Dispatch a newly learned transaction according to the configured
    /// protocol. `from` is the peer it was learned from, or `None` when the
    /// node emitted it itself.
    pub(crate) fn advertise(&mut self, from: Option<NodeId>, tx: TxId, hop: u32, out: &mut Outbox) {
        match self.config.protocol.protocol {
            Protocol::Standard => self.advertise_standard(from, tx, hop, out),
            Protocol::PreferredOut => {
                let candidates = self.out_peers.clone();
                let fanout = self.config.protocol.lowfanout_order_out;
                self.select_and_schedule(from, tx, hop, &candidates, fanout, out);
            }
            Protocol::PreferredAll => {
                let candidates = self.out_peers.clone();
                let fanout = self.config.protocol.lowfanout_order_out;
                self.select_and_schedule(from, tx, hop, &candidates, fanout, out);
                let candidates = self.in_peers.clone();
                let fanout = self.config.protocol.lowfanout_order_in_percent;
                self.select_and_schedule(from, tx, hop, &candidates, fanout, out);
            }
            // reserved variants relay nothing
            Protocol::FiltersOnIncoming | Protocol::OutgoingFilters | Protocol::DandelionMapping => {
            }
        }
    }

    fn advertise_standard(&mut self, from: Option<NodeId>, tx: TxId, hop: u32, out: &mut Outbox) {
        let now = out.now();
        for peer in self.peers.clone() {
            if Some(peer) == from {
                continue;
            }
            let delay_secs = if self.out_peers.contains(&peer) {
                self.poisson_next_send(self.config.protocol.inv_interval_secs >> 1, now)
            } else {
                poisson_interval(&mut self.rng, self.config.protocol.inv_interval_secs) as f64
            };
            out.schedule(
                SimTime::from_secs_f64(0.1 + delay_secs),
                Event::SendInv {
                    node: self.id,
                    to: peer,
                    tx,
                    hop,
                },
            );
        }
    }

    /// Poisson delay towards outbound peers, paced by a shared send slot:
    /// while the slot lies in the future, new INVs batch onto it.
    fn poisson_next_send(&mut self, mean_secs: u32, now: SimTime) -> f64 {
        if self.last_inv_scheduled < now {
            let delay = poisson_interval(&mut self.rng, mean_secs);
            self.last_inv_scheduled = now + SimTime::from_secs(delay);
            delay as f64
        } else {
            (self.last_inv_scheduled - now).as_secs_f64()
        }
    }

    /// Announce to up to `relay_to` distinct random peers from `candidates`,
    /// skipping the source peer, the ends of the reconciliation rotation
    /// queue, and peers that already know the transaction. Gives up after a
    /// full round of unsuccessful draws.
    pub(crate) fn select_and_schedule(
        &mut self,
        from: Option<NodeId>,
        tx: TxId,
        hop: u32,
        candidates: &[NodeId],
        relay_to: usize,
        out: &mut Outbox,
    ) {
        if candidates.len() < relay_to {
            return;
        }
        let mut remaining = relay_to;
        let mut tries = candidates.len();
        while remaining > 0 {
            let peer = candidates[self.rng.gen_range(0..candidates.len())];
            let from_peer = Some(peer) == from;
            // a peer at either end of the rotation queue may have an
            // exchange in flight; announcing to it now could race it
            let recently_reconciled = self.reconcile_peers.front() == Some(&peer)
                || self.reconcile_peers.back() == Some(&peer);
            let already_knows = self.peer(peer).knows_tx.contains(&tx);
            if from_peer || recently_reconciled || already_knows {
                tries -= 1;
                if tries == 0 {
                    break;
                }
                continue;
            }
            let delay =
                0.1 + poisson_interval(&mut self.rng, self.config.protocol.inv_interval_secs) as f64;
            out.schedule(
                SimTime::from_secs_f64(delay),
                Event::SendInv {
                    node: self.id,
                    to: peer,
                    tx,
                    hop,
                },
            );
            remaining -= 1;
            tries = candidates.len();
        }
    }

    /// Fires when a scheduled INV comes due. Dropped if the peer learned the
    /// transaction while the INV was pending.
    pub(crate) fn send_inv(&mut self, to: NodeId, tx: TxId, hop: u32, out: &mut Outbox) {
        if self.peer(to).knows_tx.contains(&tx) {
            trace!("node {} suppresses inv of {tx} to {to}", self.id);
            return;
        }
        self.send_message(
            to,
            &Message::Inv {
                inv: vec![tx],
                hop,
            },
            out,
        );
        self.peer_mut(to).knows_tx.insert(tx);
        self.remove_from_recon_set(to, tx);
    }
}
