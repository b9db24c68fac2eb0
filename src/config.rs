// Copyright 2024 Developers of the relaysim project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Simulation-wide constants and the configuration structs passed by
//! reference through node construction.

/// Default number of transaction-emitting nodes.
pub const TX_EMITTERS: usize = 200;
/// Set-size threshold that triggers an exchange under
/// [`ReconcileMode::SetSizeBased`].
pub const RECON_MAX_SET_SIZE: usize = 1600;
/// Refresh period of the reserved Dandelion destination mapping.
pub const DANDELION_ROTATION_SECONDS: u64 = 1000;
/// Buckets of the per-exchange difference histogram; the last is overflow.
pub const DIFFS_DISTR_SIZE: usize = 350;
/// Sentinel hop value flagging an INV produced by a reconciliation exchange.
pub const RECON_HOP: u32 = 999;
/// Warm-down window before the stop time during which new transactions stop
/// being recorded.
pub const TIME_NOT_TO_COUNT: u64 = 20;
/// Initial value of the adaptive difference-estimator coefficient.
pub const A_ESTIMATOR: f64 = 0.1;

/// Relay protocol variants, in wire order.
///
/// `FiltersOnIncoming`, `OutgoingFilters` and `DandelionMapping` are
/// reserved: they parse but relay nothing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Protocol {
    Standard,
    FiltersOnIncoming,
    OutgoingFilters,
    PreferredOut,
    PreferredAll,
    DandelionMapping,
}

impl Protocol {
    pub fn from_index(index: u32) -> Option<Protocol> {
        match index {
            0 => Some(Protocol::Standard),
            1 => Some(Protocol::FiltersOnIncoming),
            2 => Some(Protocol::OutgoingFilters),
            3 => Some(Protocol::PreferredOut),
            4 => Some(Protocol::PreferredAll),
            5 => Some(Protocol::DandelionMapping),
            _ => None,
        }
    }
}

/// When, if ever, a node initiates reconciliation exchanges.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReconcileMode {
    Off,
    TimeBased,
    SetSizeBased,
}

impl ReconcileMode {
    pub fn from_index(index: u32) -> Option<ReconcileMode> {
        match index {
            0 => Some(ReconcileMode::Off),
            1 => Some(ReconcileMode::TimeBased),
            2 => Some(ReconcileMode::SetSizeBased),
            _ => None,
        }
    }
}

/// Behavioural class of a node, announced to peers at startup.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeMode {
    Regular,
    TxEmitter,
    BlackHole,
}

impl NodeMode {
    pub fn as_u8(self) -> u8 {
        match self {
            NodeMode::Regular => 0,
            NodeMode::TxEmitter => 1,
            NodeMode::BlackHole => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<NodeMode> {
        match value {
            0 => Some(NodeMode::Regular),
            1 => Some(NodeMode::TxEmitter),
            2 => Some(NodeMode::BlackHole),
            _ => None,
        }
    }
}

/// Knobs of the relay and reconciliation protocols.
#[derive(Clone, Debug)]
pub struct ProtocolConfig {
    pub protocol: Protocol,
    /// Mean of the Poisson INV scheduling interval, in seconds.
    pub inv_interval_secs: u32,
    pub reconciliation_mode: ReconcileMode,
    /// Base reconciliation period; each node scales it by
    /// `peers / out_peers`.
    pub reconciliation_interval_secs: u32,
    /// Peer count for the low-fanout relay to outbound peers.
    pub lowfanout_order_out: usize,
    /// Peer count for the low-fanout relay to inbound peers. Despite the
    /// name this is used literally, not as a percentage.
    pub lowfanout_order_in_percent: usize,
    /// Informational; no behavioural branch reads it.
    pub loop_accomodation: u32,
    /// Additive constant of the difference estimator.
    pub q_estimation_multiplier: f64,
    /// Skip peers announced as black holes when rotating reconciliation
    /// counterparties.
    pub bh_detection: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            protocol: Protocol::Standard,
            inv_interval_secs: 1,
            reconciliation_mode: ReconcileMode::Off,
            reconciliation_interval_secs: 30,
            lowfanout_order_out: 0,
            lowfanout_order_in_percent: 0,
            loop_accomodation: 0,
            q_estimation_multiplier: 0.0,
            bh_detection: false,
        }
    }
}

/// Everything a run needs to know, loaded once at startup.
#[derive(Clone, Debug)]
pub struct SimConfig {
    pub nodes: usize,
    /// Simulated seconds available to the nodes.
    pub sim_time_secs: u64,
    /// The first `tx_emitters` node ids emit transactions.
    pub tx_emitters: usize,
    /// The next `black_holes` node ids after the emitters drop everything.
    pub black_holes: usize,
    /// Target emission rate per minute of simulated time, in tx/s across all
    /// emitters; the last entry applies to every later minute.
    pub transaction_rates: Vec<u32>,
    pub seed: u64,
    pub protocol: ProtocolConfig,
}

impl SimConfig {
    /// Emission rate for a given minute of simulated time.
    pub fn rate_at(&self, minute: u64) -> u32 {
        let index = (minute as usize).min(self.transaction_rates.len().saturating_sub(1));
        self.transaction_rates.get(index).copied().unwrap_or(0)
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            nodes: 16,
            sim_time_secs: 1024,
            tx_emitters: TX_EMITTERS,
            black_holes: 0,
            transaction_rates: vec![7],
            seed: 42,
            protocol: ProtocolConfig::default(),
        }
    }
}
