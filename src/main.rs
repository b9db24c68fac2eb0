use chrono::Utc;
use clap::Parser;
use tracing::info;

use topology::{Topology, TopologyParams};

use relaysim::config::{Protocol, ProtocolConfig, ReconcileMode, SimConfig, TX_EMITTERS};
use relaysim::report::Report;
use relaysim::sim::Simulation;
use relaysim::stats;

#[derive(Parser)]
struct Args {
    /// The total number of nodes in the network
    #[arg(long, default_value_t = 16)]
    nodes: usize,
    /// Lower bound on connections per node
    #[arg(long, default_value_t = 8)]
    min_connections: usize,
    /// Upper bound on connections per node
    #[arg(long, default_value_t = 16)]
    max_connections: usize,
    /// Simulation time in seconds
    #[arg(long, default_value_t = 1024)]
    simul_time: u64,
    /// How many nodes have a public IP
    #[arg(long, default_value_t = 8)]
    public_ip_nodes: usize,
    /// Used protocol: 0 — standard, 3 — preferred out, 4 — preferred all
    #[arg(long, default_value_t = 0)]
    protocol: u32,
    /// Reconciliation mode: 0 — off, 1 — time based, 2 — set size based
    #[arg(long, default_value_t = 0)]
    reconciliation_mode: u32,
    #[arg(long, default_value_t = 1)]
    inv_interval_seconds: u32,
    #[arg(long, default_value_t = 30)]
    reconciliation_interval_seconds: u32,
    /// Transaction-emitting nodes (the first ids)
    #[arg(long, default_value_t = TX_EMITTERS)]
    tx_emitters: usize,
    /// Black hole nodes (the ids after the emitters)
    #[arg(long, default_value_t = 0)]
    black_holes: usize,
    /// Low-fanout order to out connections, in units
    #[arg(long, default_value_t = 0)]
    lowfanout_order_out: usize,
    /// Low-fanout order to in connections
    #[arg(long, default_value_t = 0)]
    lowfanout_order_in_percent: usize,
    /// 0 - no, 1 - yes
    #[arg(long, default_value_t = 0)]
    loop_accomodation: u32,
    /// Additive constant of the difference estimator
    #[arg(long, default_value_t = 0.0)]
    q_estimation_multiplier: f64,
    /// Skip announced black holes when rotating reconciliation peers
    #[arg(long)]
    bh_detection: bool,
    /// Emission rate per minute of simulated time, in tx/s
    #[arg(long, value_delimiter = ',', default_value = "7")]
    transaction_rates: Vec<u32>,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(short, long, default_value_t = tracing::Level::INFO)]
    log_level: tracing::Level,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    let Some(protocol) = Protocol::from_index(args.protocol) else {
        eprintln!("unknown protocol {}", args.protocol);
        std::process::exit(2);
    };
    let Some(reconciliation_mode) = ReconcileMode::from_index(args.reconciliation_mode) else {
        eprintln!("unknown reconciliation mode {}", args.reconciliation_mode);
        std::process::exit(2);
    };
    if args.tx_emitters + args.black_holes > args.nodes {
        eprintln!(
            "{} emitters + {} black holes exceed {} nodes",
            args.tx_emitters, args.black_holes, args.nodes
        );
        std::process::exit(2);
    }

    let config = SimConfig {
        nodes: args.nodes,
        sim_time_secs: args.simul_time,
        tx_emitters: args.tx_emitters,
        black_holes: args.black_holes,
        transaction_rates: args.transaction_rates,
        seed: args.seed,
        protocol: ProtocolConfig {
            protocol,
            inv_interval_secs: args.inv_interval_seconds,
            reconciliation_mode,
            reconciliation_interval_secs: args.reconciliation_interval_seconds,
            lowfanout_order_out: args.lowfanout_order_out,
            lowfanout_order_in_percent: args.lowfanout_order_in_percent,
            loop_accomodation: args.loop_accomodation,
            q_estimation_multiplier: args.q_estimation_multiplier,
            bh_detection: args.bh_detection,
        },
    };

    let started = Utc::now();
    let topology = Topology::random(
        &TopologyParams {
            nodes: config.nodes,
            min_connections: args.min_connections,
            max_connections: args.max_connections,
            public_nodes: args.public_ip_nodes,
        },
        config.seed,
    );
    let mut simulation = Simulation::new(config.clone(), &topology);
    let setup_done = Utc::now();
    info!(
        "{} nodes set up in {}ms; running {}s of simulated time",
        config.nodes,
        (setup_done - started).num_milliseconds(),
        config.sim_time_secs
    );

    let node_stats = simulation.run();

    // single partition here; the wire round-trip is the same path a
    // multi-partition run uses to ship records to the aggregating side
    let partition: Vec<Vec<u8>> = node_stats.iter().map(|s| s.to_wire()).collect();
    let merged = match stats::merge_partitions(vec![partition], config.nodes) {
        Ok(merged) => merged,
        Err(err) => {
            eprintln!("failed to merge statistics: {err}");
            std::process::exit(1);
        }
    };

    let report = Report::build(&merged);
    report.print();

    let finished = Utc::now();
    let elapsed = (finished - started).num_milliseconds() as f64 / 1000.0;
    info!(
        "the simulation ran for {elapsed:.2}s simulating {}s, {:.0}x faster than realtime",
        config.sim_time_secs,
        config.sim_time_secs as f64 / elapsed.max(0.001)
    );
}
