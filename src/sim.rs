// Copyright 2024 Developers of the relaysim project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Provides the [`Simulation`] driver: it owns the nodes and the event
//! queue, and runs the dispatch loop.

//! Handlers never touch another node directly; they emit [`Event`]s into an
//! [`Outbox`] which the driver feeds back into the queue. Frame deliveries
//! carry a constant per-edge latency, so per-edge ordering is FIFO.

use std::rc::Rc;

use events::{EventQueue, SimTime};
use topology::Topology;
use tracing::{debug, info};

use crate::config::{NodeMode, SimConfig};
use crate::node::Node;
use crate::stats::NodeStats;
use crate::{NodeId, TxId};

/// Everything that can be scheduled. Closures over node state are spelled
/// out as variants carrying the node id plus arguments, which keeps the
/// queue inspectable and the run replayable.
#[derive(Clone, Debug)]
pub enum Event {
    Start { node: NodeId },
    EmitTick { node: NodeId },
    Reconcile { node: NodeId },
    RespondRecon { node: NodeId, to: NodeId },
    RotateDandelion { node: NodeId },
    SendInv { node: NodeId, to: NodeId, tx: TxId, hop: u32 },
    Deliver { to: NodeId, from: NodeId, bytes: Vec<u8> },
}

/// Collects what one handler wants scheduled; drained into the queue after
/// the handler returns.
pub struct Outbox {
    now: SimTime,
    scheduled: Vec<(SimTime, Event)>,
}

impl Outbox {
    fn new(now: SimTime) -> Outbox {
        Outbox {
            now,
            scheduled: Vec::new(),
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn schedule(&mut self, delay: SimTime, event: Event) {
        self.scheduled.push((self.now + delay, event));
    }
}

/// One partition of the experiment; with a single partition, the whole of
/// it. All cross-node communication goes through the event queue.
pub struct Simulation {
    config: Rc<SimConfig>,
    nodes: Vec<Node>,
    queue: EventQueue<Event>,
}

impl Simulation {
    /// Build the nodes over a generated topology. The first `tx_emitters`
    /// ids emit, the next `black_holes` ids drop everything.
    pub fn new(config: SimConfig, topology: &Topology) -> Simulation {
        assert_eq!(config.nodes, topology.node_count());
        assert!(
            config.tx_emitters + config.black_holes <= config.nodes,
            "more special nodes than nodes"
        );
        let config = Rc::new(config);
        let nodes = (0..config.nodes)
            .map(|id| {
                let mode = if id < config.tx_emitters {
                    NodeMode::TxEmitter
                } else if id < config.tx_emitters + config.black_holes {
                    NodeMode::BlackHole
                } else {
                    NodeMode::Regular
                };
                Node::new(id as NodeId, mode, topology, Rc::clone(&config))
            })
            .collect();
        Simulation {
            config,
            nodes,
            queue: EventQueue::new(),
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id as usize]
    }

    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    /// Run to completion and return the per-node statistics, finalized.
    pub fn run(&mut self) -> Vec<NodeStats> {
        for id in 0..self.nodes.len() {
            self.queue
                .schedule_at(SimTime::ZERO, Event::Start { node: id as NodeId });
        }
        // nothing scheduled past the stop time plus a tenth of a minute fires
        self.queue.stop(
            SimTime::from_secs(self.config.sim_time_secs) + SimTime::from_secs_f64(6.0),
        );

        let mut fired: u64 = 0;
        while let Some((now, event)) = self.queue.pop() {
            let mut outbox = Outbox::new(now);
            self.dispatch(event, &mut outbox);
            for (at, event) in outbox.scheduled {
                self.queue.schedule_at(at, event);
            }
            fired += 1;
        }
        info!(
            "drained after {fired} events at {}; {} discarded",
            self.queue.now(),
            self.queue.len()
        );

        self.nodes
            .iter_mut()
            .map(|node| {
                node.stats.finalize();
                node.stats.clone()
            })
            .collect()
    }

    fn dispatch(&mut self, event: Event, out: &mut Outbox) {
        match event {
            Event::Start { node } => self.nodes[node as usize].start(out),
            Event::EmitTick { node } => self.nodes[node as usize].emit_tick(out),
            Event::Reconcile { node } => self.nodes[node as usize].reconcile_tick(out),
            Event::RespondRecon { node, to } => self.nodes[node as usize].respond_reconcile(to, out),
            Event::RotateDandelion { node } => self.nodes[node as usize].rotate_dandelion(out),
            Event::SendInv { node, to, tx, hop } => {
                self.nodes[node as usize].send_inv(to, tx, hop, out)
            }
            Event::Deliver { to, from, bytes } => {
                debug!("delivering {} bytes {from} -> {to}", bytes.len());
                self.nodes[to as usize].deliver(from, &bytes, out)
            }
        }
    }
}
