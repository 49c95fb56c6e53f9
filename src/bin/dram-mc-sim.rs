//! dram-mc-sim - trace harness / demo driver.
//!
//! Builds a `Controller` from a JSON `Config`, replays a scripted or
//! file-sourced request trace cycle-by-cycle, and prints the final
//! `StatsSnapshot`. Stands in for an external discrete-event framework
//! with a trivial cycle loop; it carries no DRAM timing semantics of its
//! own.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use dram_mc_sim::stats::StatsSnapshot;
use dram_mc_sim::{AccessType, Config, RequestDescriptor};

/// Cycle-accurate DRAM memory-controller demo driver.
#[derive(Parser)]
#[command(name = "dram-mc-sim", about = "DRAM memory-controller core demo driver", version)]
struct Args {
    /// Path to a JSON `Config` file; see `Config::default()` for the
    /// full set of fields it must provide. Omit to run with defaults.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Path to a request trace file. Each non-empty, non-'#' line is
    /// "cycle address kind [size] [core_id] [pc] [latency_factor]",
    /// kind in {fetch, load, store, writeback}. Without this flag a
    /// small built-in trace runs instead.
    #[arg(short, long, value_name = "PATH")]
    trace: Option<PathBuf>,

    /// Upper bound on simulated cycles; the run also stops early once
    /// the controller goes idle with no further trace entries pending.
    #[arg(long, default_value = "100000")]
    max_cycles: u64,

    /// Print the final statistics snapshot as JSON instead of a table.
    #[arg(long)]
    json: bool,

    /// Increase verbosity (-v debug, -vv trace). Default is info.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode: errors only.
    #[arg(short, long)]
    quiet: bool,
}

/// Errors confined to the demo binary: bad CLI input or trace/config
/// files never become part of the library's own `ConfigError`.
#[derive(Debug)]
enum DriverError {
    Io(PathBuf, std::io::Error),
    BadConfig(PathBuf, serde_json::Error),
    BadTraceLine { path: PathBuf, line_no: usize, text: String },
    Config(dram_mc_sim::ConfigError),
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverError::Io(path, e) => write!(f, "reading {}: {e}", path.display()),
            DriverError::BadConfig(path, e) => write!(f, "parsing config {}: {e}", path.display()),
            DriverError::BadTraceLine { path, line_no, text } => {
                write!(f, "{}:{line_no}: malformed trace line: {text:?}", path.display())
            }
            DriverError::Config(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DriverError {}

impl From<dram_mc_sim::ConfigError> for DriverError {
    fn from(e: dram_mc_sim::ConfigError) -> Self {
        DriverError::Config(e)
    }
}

/// One entry of a request trace: the cycle it arrives on plus the
/// descriptor to hand to `Controller::on_request`.
struct TraceEntry {
    cycle: u64,
    descriptor: RequestDescriptor,
}

fn parse_access_type(tag: &str) -> Option<AccessType> {
    Some(match tag.to_ascii_lowercase().as_str() {
        "fetch" => AccessType::Fetch,
        "load" => AccessType::Load,
        "store" => AccessType::Store,
        "writeback" => AccessType::Writeback,
        _ => return None,
    })
}

fn parse_trace_file(path: &PathBuf) -> Result<Vec<TraceEntry>, DriverError> {
    let contents = fs::read_to_string(path).map_err(|e| DriverError::Io(path.clone(), e))?;
    let mut entries = Vec::new();
    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            return Err(DriverError::BadTraceLine {
                path: path.clone(),
                line_no: idx + 1,
                text: raw_line.to_string(),
            });
        }
        let malformed = || DriverError::BadTraceLine {
            path: path.clone(),
            line_no: idx + 1,
            text: raw_line.to_string(),
        };
        let cycle: u64 = fields[0].parse().map_err(|_| malformed())?;
        let address_field = fields[1].trim_start_matches("0x");
        let address = u64::from_str_radix(address_field, 16)
            .or_else(|_| fields[1].parse::<u64>())
            .map_err(|_| malformed())?;
        let kind = parse_access_type(fields[2]).ok_or_else(malformed)?;
        let mut descriptor = RequestDescriptor::new(address, kind);
        if let Some(size) = fields.get(3) {
            descriptor.size = size.parse().map_err(|_| malformed())?;
        }
        if let Some(core_id) = fields.get(4) {
            descriptor.core_id = core_id.parse().map_err(|_| malformed())?;
        }
        if let Some(pc) = fields.get(5) {
            descriptor.pc = pc.parse().map_err(|_| malformed())?;
        }
        if let Some(factor) = fields.get(6) {
            descriptor.mem_op_latency_factor = factor.parse().map_err(|_| malformed())?;
        }
        entries.push(TraceEntry { cycle, descriptor });
    }
    entries.sort_by_key(|e| e.cycle);
    Ok(entries)
}

/// A handful of requests exercising a row hit, a row conflict, and a
/// write-allocate store, so `dram-mc-sim` produces interesting output
/// with no trace file supplied.
fn builtin_trace() -> Vec<TraceEntry> {
    vec![
        TraceEntry { cycle: 0, descriptor: RequestDescriptor::new(0x0, AccessType::Load) },
        TraceEntry { cycle: 1, descriptor: RequestDescriptor::new(0x20, AccessType::Load) },
        TraceEntry { cycle: 2, descriptor: RequestDescriptor::new(0x40, AccessType::Fetch) },
        TraceEntry { cycle: 5, descriptor: RequestDescriptor::new(0x10000, AccessType::Store) },
        TraceEntry { cycle: 6, descriptor: RequestDescriptor::new(0x10020, AccessType::Writeback) },
    ]
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_snapshot_table(snapshot: &StatsSnapshot) {
    println!("{:<10} {:>10} {:>12} {:>14} {:>14}", "type", "requests", "bytes", "avg svc lat", "avg q lat");
    for (name, s) in [
        ("fetch", &snapshot.fetch),
        ("load", &snapshot.load),
        ("store", &snapshot.store),
        ("writeback", &snapshot.writeback),
    ] {
        println!(
            "{:<10} {:>10} {:>12} {:>14.2} {:>14.2}",
            name,
            s.requests,
            s.bytes,
            s.avg_service_latency(),
            s.avg_queue_latency()
        );
    }
    println!("total requests: {}", snapshot.total_requests());
    println!(
        "queue occupancy: avg={:.2} max={}",
        snapshot.avg_queue_occupancy, snapshot.max_queue_occupancy
    );
}

fn run(args: Args) -> Result<(), DriverError> {
    let config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|e| DriverError::Io(path.clone(), e))?;
            serde_json::from_str::<Config>(&text).map_err(|e| DriverError::BadConfig(path.clone(), e))?
        }
        None => Config::default(),
    };

    let mut controller = config.build()?;

    let mut entries = match &args.trace {
        Some(path) => parse_trace_file(path)?,
        None => {
            info!("no --trace given, running built-in demo trace");
            builtin_trace()
        }
    };
    entries.reverse(); // pop from the back in ascending cycle order

    let last_arrival = entries.first().map(|e| e.cycle).unwrap_or(0);
    let mut total_acks = 0u64;

    for cycle in 0..=args.max_cycles {
        while matches!(entries.last(), Some(e) if e.cycle == cycle) {
            let entry = entries.pop().unwrap();
            let id = controller.on_request(entry.descriptor, cycle);
            tracing::debug!(request_id = id, cycle, "trace entry submitted");
        }

        let result = controller.tick(cycle);
        total_acks += result.acks.len() as u64;

        if entries.is_empty() && controller.is_idle() && cycle >= last_arrival {
            break;
        }
    }

    if total_acks == 0 {
        warn!("no acknowledgements were produced; check the trace and configuration");
    }

    let snapshot = controller.snapshot();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot).expect("snapshot serializes"));
    } else {
        print_snapshot_table(&snapshot);
    }

    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);
    if let Err(err) = run(args) {
        eprintln!("dram-mc-sim: error: {err}");
        std::process::exit(1);
    }
}
