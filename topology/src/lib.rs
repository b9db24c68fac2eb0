//! Generates the overlay an experiment runs on: per-node outbound and
//! inbound peer lists, per-node link speeds, and a constant latency for every
//! directed edge.

//! The latency of an edge never changes once generated, which is what keeps
//! delivery FIFO per directed edge when the driver schedules one delivery
//! event per frame.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub type NodeId = u32;

/// Base propagation latency of an edge, in seconds.
const BASE_LATENCY: f64 = 0.01;
/// Nominal size of a framed record used to derive the transmission part of
/// an edge's latency, in bytes.
const NOMINAL_FRAME_BYTES: f64 = 126.0;

/// Latency used for every edge of a hand-built topology.
pub const DEFAULT_LATENCY: f64 = 0.01;

/// Peer lists of one node. A peer appears in at most one of the two lists.
#[derive(Clone, Debug, Default)]
pub struct NodeLinks {
    pub out_peers: Vec<NodeId>,
    pub in_peers: Vec<NodeId>,
}

impl NodeLinks {
    pub fn degree(&self) -> usize {
        self.out_peers.len() + self.in_peers.len()
    }
}

/// Parameters of a randomly generated overlay.
#[derive(Clone, Debug)]
pub struct TopologyParams {
    pub nodes: usize,
    pub min_connections: usize,
    pub max_connections: usize,
    /// Only the first `public_nodes` node ids accept inbound connections.
    pub public_nodes: usize,
}

/// A generated overlay: who connects to whom, and how fast each edge is.
#[derive(Clone, Debug)]
pub struct Topology {
    links: Vec<NodeLinks>,
    latencies: HashMap<(NodeId, NodeId), f64>,
}

impl Topology {
    /// Generate a random overlay. Every node opens outbound connections to
    /// distinct publicly reachable peers, within the per-node connection
    /// bounds. The same seed always yields the same overlay.
    pub fn random(params: &TopologyParams, seed: u64) -> Topology {
        let n = params.nodes;
        let mut rng = StdRng::seed_from_u64(seed);

        // download/upload speeds in Mbps
        let speeds: Vec<(f64, f64)> = (0..n)
            .map(|_| (rng.gen_range(20.0..100.0), rng.gen_range(20.0..100.0)))
            .collect();

        let publics: Vec<NodeId> = (0..params.public_nodes.min(n) as NodeId).collect();
        let mut links = vec![NodeLinks::default(); n];
        let mut latencies = HashMap::new();
        let mut connected: HashSet<(NodeId, NodeId)> = HashSet::new();

        let min_out = (params.min_connections / 2).max(1);
        let max_out = (params.max_connections / 2).max(min_out);

        for i in 0..n as NodeId {
            if publics.is_empty() {
                break;
            }
            let want = rng.gen_range(min_out..=max_out);
            let mut attempts = 4 * n.max(8);
            while links[i as usize].out_peers.len() < want && attempts > 0 {
                attempts -= 1;
                let j = publics[rng.gen_range(0..publics.len())];
                let pair = (i.min(j), i.max(j));
                if j == i
                    || connected.contains(&pair)
                    || links[j as usize].degree() >= params.max_connections
                    || links[i as usize].degree() >= params.max_connections
                {
                    continue;
                }
                connected.insert(pair);
                links[i as usize].out_peers.push(j);
                links[j as usize].in_peers.push(i);
                latencies.insert((i, j), edge_latency(&speeds, i, j, &mut rng));
                latencies.insert((j, i), edge_latency(&speeds, j, i, &mut rng));
            }
        }

        Topology { links, latencies }
    }

    /// Build an explicit overlay from directed edges `(u, v)`, meaning `u`
    /// opens an outbound connection to `v`. Every edge gets
    /// [`DEFAULT_LATENCY`] in both directions.
    pub fn from_edges(nodes: usize, edges: &[(NodeId, NodeId)]) -> Topology {
        let mut links = vec![NodeLinks::default(); nodes];
        let mut latencies = HashMap::new();
        for &(u, v) in edges {
            debug_assert!(u != v, "self edge {u}");
            debug_assert!(
                !latencies.contains_key(&(u, v)),
                "duplicate edge {u} -> {v}"
            );
            links[u as usize].out_peers.push(v);
            links[v as usize].in_peers.push(u);
            latencies.insert((u, v), DEFAULT_LATENCY);
            latencies.insert((v, u), DEFAULT_LATENCY);
        }
        Topology { links, latencies }
    }

    pub fn node_count(&self) -> usize {
        self.links.len()
    }

    pub fn links(&self, id: NodeId) -> &NodeLinks {
        &self.links[id as usize]
    }

    /// Latency of the directed edge `from -> to`, in seconds.
    pub fn latency(&self, from: NodeId, to: NodeId) -> f64 {
        self.latencies
            .get(&(from, to))
            .copied()
            .unwrap_or(DEFAULT_LATENCY)
    }
}

fn edge_latency(speeds: &[(f64, f64)], from: NodeId, to: NodeId, rng: &mut StdRng) -> f64 {
    let upload = speeds[from as usize].1;
    let download = speeds[to as usize].0;
    let bottleneck_mbps = upload.min(download);
    let transmission = NOMINAL_FRAME_BYTES * 8.0 / (bottleneck_mbps * 1e6);
    BASE_LATENCY + rng.gen_range(0.0..0.04) + transmission
}
