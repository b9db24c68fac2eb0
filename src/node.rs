// Copyright 2024 Developers of the relaysim project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Provides the per-node relay state machine: peer table, known-transaction
//! index, incoming-message dispatch and the transaction emitter.

//! The relay policy lives in [`relay`](crate::relay) and the reconciliation
//! engine in [`recon`](crate::recon); both are `impl Node` extensions of the
//! state defined here. A node owns all of its state exclusively; it talks to
//! the rest of the world only through the frames and events it pushes into
//! the [`Outbox`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use events::SimTime;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use topology::Topology;
use tracing::{debug, trace, warn};

use crate::config::{
    NodeMode, Protocol, ReconcileMode, SimConfig, A_ESTIMATOR, DANDELION_ROTATION_SECONDS,
    RECON_HOP, TIME_NOT_TO_COUNT,
};
use crate::message::{Message, RecvBuffer};
use crate::poisson::poisson_interval;
use crate::sim::{Event, Outbox};
use crate::stats::{NodeStats, TxRecvTime};
use crate::{NodeId, TxId};

/// Everything a node tracks about one of its peers. The record carries the
/// remote address only; peers never reference each other's state.
#[derive(Debug)]
pub struct PeerRecord {
    pub(crate) learned_mode: Option<NodeMode>,
    pub(crate) recv_buffer: RecvBuffer,
    /// Transactions queued to be told to this peer at the next exchange,
    /// unless an ordinary INV crosses the edge first.
    pub(crate) recon_set: Vec<TxId>,
    /// Transactions this peer is known to have, via an INV sent to it or
    /// received from it.
    pub(crate) knows_tx: HashSet<TxId>,
    pub(crate) latency: SimTime,
}

/// One simulated node.
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) mode: NodeMode,
    pub(crate) out_peers: Vec<NodeId>,
    pub(crate) in_peers: Vec<NodeId>,
    /// `out_peers` followed by `in_peers`; the two are disjoint.
    pub(crate) peers: Vec<NodeId>,
    pub(crate) peer_records: HashMap<NodeId, PeerRecord>,
    pub(crate) known_tx: HashSet<TxId>,
    /// Rotation queue of reconciliation counterparties (outbound peers).
    pub(crate) reconcile_peers: VecDeque<NodeId>,
    /// Next free send slot towards outbound peers; paces STANDARD relay.
    pub(crate) last_inv_scheduled: SimTime,
    /// Adaptive difference-estimator coefficient.
    pub(crate) prev_a: f64,
    /// Node-local reconciliation period, scaled by `peers / out_peers`.
    pub(crate) recon_interval: SimTime,
    pub(crate) rng: StdRng,
    pub(crate) config: Rc<SimConfig>,
    pub(crate) t_stop: SimTime,
    pub(crate) stats: NodeStats,
}

impl Node {
    pub fn new(id: NodeId, mode: NodeMode, topology: &Topology, config: Rc<SimConfig>) -> Node {
        let links = topology.links(id);
        let out_peers = links.out_peers.clone();
        let in_peers = links.in_peers.clone();
        let mut peers = out_peers.clone();
        peers.extend_from_slice(&in_peers);

        let mut peer_records = HashMap::new();
        for &peer in &peers {
            peer_records.insert(
                peer,
                PeerRecord {
                    learned_mode: None,
                    recv_buffer: RecvBuffer::new(),
                    recon_set: Vec::new(),
                    knows_tx: HashSet::new(),
                    latency: SimTime::from_secs_f64(topology.latency(id, peer)),
                },
            );
        }

        let reconcile_peers = if config.protocol.reconciliation_mode != ReconcileMode::Off {
            out_peers.iter().copied().collect()
        } else {
            VecDeque::new()
        };

        let scale = if out_peers.is_empty() {
            1
        } else {
            peers.len() / out_peers.len()
        };
        let recon_interval =
            SimTime::from_secs(config.protocol.reconciliation_interval_secs as u64 * scale as u64);

        let rng =
            StdRng::seed_from_u64(config.seed ^ 0x9E37_79B9_7F4A_7C15u64.wrapping_mul(id as u64 + 1));
        let stats = NodeStats::new(id, peers.len(), mode.as_u8());
        let t_stop = SimTime::from_secs(config.sim_time_secs);

        Node {
            id,
            mode,
            out_peers,
            in_peers,
            peers,
            peer_records,
            known_tx: HashSet::new(),
            reconcile_peers,
            last_inv_scheduled: SimTime::ZERO,
            prev_a: A_ESTIMATOR,
            recon_interval,
            rng,
            config,
            t_stop,
            stats,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn mode(&self) -> NodeMode {
        self.mode
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn knows(&self, tx: TxId) -> bool {
        self.known_tx.contains(&tx)
    }

    /// The outgoing reconciliation set towards `peer`.
    pub fn recon_set(&self, peer: NodeId) -> &[TxId] {
        self.peer_records
            .get(&peer)
            .map(|record| record.recon_set.as_slice())
            .unwrap_or(&[])
    }

    /// Current value of the adaptive estimator coefficient.
    pub fn diff_estimator_coeff(&self) -> f64 {
        self.prev_a
    }

    /// All peers, outbound first.
    pub fn peer_ids(&self) -> &[NodeId] {
        &self.peers
    }

    /// Whether `peer` is known to have `tx`, via an INV either sent to it or
    /// received from it.
    pub fn peer_knows_tx(&self, peer: NodeId, tx: TxId) -> bool {
        self.peer_records
            .get(&peer)
            .map(|record| record.knows_tx.contains(&tx))
            .unwrap_or(false)
    }

    /// Seed a reconciliation set directly, recording the transactions as
    /// locally known. Used to set up an exchange without relaying.
    pub fn inject_recon_set(&mut self, peer: NodeId, txs: &[TxId]) {
        for &tx in txs {
            self.known_tx.insert(tx);
        }
        let record = self
            .peer_records
            .get_mut(&peer)
            .expect("injecting a set for an unknown peer");
        record.recon_set.extend_from_slice(txs);
    }

    pub(crate) fn peer(&self, id: NodeId) -> &PeerRecord {
        self.peer_records.get(&id).expect("unknown peer")
    }

    pub(crate) fn peer_mut(&mut self, id: NodeId) -> &mut PeerRecord {
        self.peer_records.get_mut(&id).expect("unknown peer")
    }

    /// Entering `Running`: announce our mode to every peer, then start the
    /// periodic machinery. Black holes stop after the announce.
    pub(crate) fn start(&mut self, out: &mut Outbox) {
        debug!(
            "node {} starting: mode {:?}, {} out / {} in peers",
            self.id,
            self.mode,
            self.out_peers.len(),
            self.in_peers.len()
        );
        for peer in self.peers.clone() {
            self.send_message(peer, &Message::Mode { mode: self.mode }, out);
        }
        if self.mode == NodeMode::TxEmitter {
            out.schedule(SimTime::from_secs(5), Event::EmitTick { node: self.id });
        }
        if self.mode == NodeMode::BlackHole {
            return;
        }
        if self.config.protocol.protocol == Protocol::DandelionMapping {
            self.rotate_dandelion(out);
        }
        if self.config.protocol.reconciliation_mode != ReconcileMode::Off
            && !self.reconcile_peers.is_empty()
        {
            out.schedule(SimTime::from_secs(10), Event::Reconcile { node: self.id });
        }
    }

    /// Bytes arrived on the edge from `from`: reassemble frames, parse and
    /// dispatch them. A record that fails to parse is dropped and the stream
    /// continues. Black holes ignore everything after startup.
    pub(crate) fn deliver(&mut self, from: NodeId, bytes: &[u8], out: &mut Outbox) {
        if self.mode == NodeMode::BlackHole {
            return;
        }
        let Some(record) = self.peer_records.get_mut(&from) else {
            warn!("node {} received bytes from unknown peer {from}", self.id);
            return;
        };
        record.recv_buffer.push_bytes(bytes);
        while let Some(frame) = self.peer_mut(from).recv_buffer.pop_frame() {
            match Message::decode(&frame) {
                Err(err) => warn!("node {} dropping record from peer {from}: {err}", self.id),
                Ok(Message::Mode { mode }) => {
                    trace!("node {} learned mode {mode:?} of peer {from}", self.id);
                    self.peer_mut(from).learned_mode = Some(mode);
                }
                Ok(Message::ReconcileReq { set_size }) => {
                    trace!(
                        "node {} got reconcile request from {from} (remote set size {set_size})",
                        self.id
                    );
                    let delay = poisson_interval(&mut self.rng, 2);
                    out.schedule(
                        SimTime::from_secs(delay),
                        Event::RespondRecon {
                            node: self.id,
                            to: from,
                        },
                    );
                }
                Ok(Message::ReconcileResp { transactions }) => {
                    self.on_reconcile_response(from, transactions, out)
                }
                Ok(Message::Inv { inv, hop }) => self.handle_inv(from, inv, hop, out),
                Ok(Message::Tx) => debug!("node {} ignoring reserved tx message", self.id),
            }
        }
    }

    fn handle_inv(&mut self, from: NodeId, inv: Vec<TxId>, hop: u32, out: &mut Outbox) {
        let now = out.now();
        for tx in inv {
            if self.peer(from).knows_tx.contains(&tx) {
                self.stats.on_the_fly_collisions += 1;
            }
            if hop == RECON_HOP {
                self.stats.recon_inv_received_messages += 1;
            } else {
                self.stats.inv_received_messages += 1;
            }
            self.peer_mut(from).knows_tx.insert(tx);
            if self.config.protocol.reconciliation_mode != ReconcileMode::Off {
                self.remove_from_recon_set(from, tx);
            }
            if self.known_tx.contains(&tx) {
                if hop == RECON_HOP {
                    self.stats.recon_useless_inv_received_messages += 1;
                } else {
                    self.stats.useless_inv_received_messages += 1;
                }
                continue;
            }
            self.save_tx_data(tx, Some(from), now);
            self.advertise(Some(from), tx, hop + 1, out);
        }
    }

    /// Record a first sighting. Calling this for a transaction that is
    /// already known is a programming error.
    pub(crate) fn save_tx_data(&mut self, tx: TxId, from: Option<NodeId>, now: SimTime) {
        debug_assert!(!self.known_tx.contains(&tx), "tx {tx} recorded twice");
        self.stats.tx_received_times.push(TxRecvTime {
            node_id: self.id,
            tx_hash: tx,
            tx_time: now.as_secs_f64(),
        });
        self.known_tx.insert(tx);
        self.stats.tx_received += 1;
        if self.config.protocol.reconciliation_mode != ReconcileMode::Off {
            self.add_to_recon_sets(tx, from, now);
        }
    }

    fn add_to_recon_sets(&mut self, tx: TxId, from: Option<NodeId>, now: SimTime) {
        if self.in_warm_down(now) {
            return;
        }
        for &q in &self.peers {
            if Some(q) == from {
                continue;
            }
            let record = self.peer_records.get_mut(&q).expect("unknown peer");
            if record.learned_mode == Some(NodeMode::BlackHole) {
                continue;
            }
            record.recon_set.push(tx);
        }
    }

    pub(crate) fn remove_from_recon_set(&mut self, peer: NodeId, tx: TxId) {
        let record = self.peer_mut(peer);
        if let Some(position) = record.recon_set.iter().position(|&t| t == tx) {
            record.recon_set.remove(position);
        }
    }

    /// One second of emitter time. The draw happens every tick; whether it
    /// emits depends on the configured rate for the current minute.
    pub(crate) fn emit_tick(&mut self, out: &mut Outbox) {
        let now = out.now();
        let minute = now.as_secs() / 60;
        let rate = self.config.rate_at(minute).max(1);
        let emitters = self.config.tx_emitters.max(1) as u32;
        let rev_probability = (emitters / rate).max(1);
        let emit = self.rng.gen_range(0..rev_probability) == 0;
        // transactions emitted this close to the stop time would never settle
        if self.in_warm_down(now) {
            return;
        }
        if emit {
            self.emit_transaction(out);
        }
        out.schedule(SimTime::from_secs(1), Event::EmitTick { node: self.id });
    }

    fn emit_transaction(&mut self, out: &mut Outbox) {
        self.stats.tx_created += 1;
        let tx = self.id * 1_000_000 + self.stats.tx_created as TxId;
        debug!("node {} emits tx {tx}", self.id);
        self.advertise(None, tx, 0, out);
        self.save_tx_data(tx, None, out.now());
    }

    /// Reserved Dandelion destination mapping; only the rotation cadence is
    /// kept.
    pub(crate) fn rotate_dandelion(&mut self, out: &mut Outbox) {
        if self.t_stop < out.now() {
            return;
        }
        out.schedule(
            SimTime::from_secs(DANDELION_ROTATION_SECONDS),
            Event::RotateDandelion { node: self.id },
        );
    }

    /// Frame `message` and schedule its delivery over the edge to `peer`.
    pub(crate) fn send_message(&mut self, peer: NodeId, message: &Message, out: &mut Outbox) {
        let mut bytes = Vec::new();
        message.encode_into(&mut bytes);
        let latency = self.peer(peer).latency;
        out.schedule(
            latency,
            Event::Deliver {
                to: peer,
                from: self.id,
                bytes,
            },
        );
    }

    /// True once new transactions are too close to the stop time to count.
    pub(crate) fn in_warm_down(&self, now: SimTime) -> bool {
        self.t_stop < now + SimTime::from_secs(TIME_NOT_TO_COUNT)
    }
}
