//! ft-replay: load a flow file into a flow table and report its state.
//!
//! Replays the adds from a YAML or JSON flow file, applies any checksum
//! bucket resizes, prints per-table checksums and dumps the flows selected by
//! an optional cookie filter through an iteration task.

use anyhow::{bail, Context};
use clap::Parser;
use log::{error, info, warn};
use ofstate_ft::ofstate_types::{
    Action, FlowAdd, FlowId, FlowQuery, Instructions, MaskedValue, MatchField, Minimatch, TableId,
};
use ofstate_ft::{
    gather_text, FlowEntry, FlowTable, FlowTableConfig, FlowTableCounters, IterTaskScheduler,
};
use prometheus::Registry;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Flow table replay and checksum tool
#[derive(Parser, Debug)]
#[command(name = "ft-replay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Flow file (YAML, or JSON when the extension is .json)
    flows: PathBuf,

    /// Flow table configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Checksum bucket count for a table, as TABLE=SIZE (repeatable)
    #[arg(long = "checksum-buckets", value_parser = parse_bucket_size)]
    checksum_buckets: Vec<(u8, u32)>,

    /// Only dump flows in this table
    #[arg(short = 't', long)]
    table: Option<u8>,

    /// Cookie value to filter the dump on
    #[arg(long, value_parser = parse_u64, default_value = "0")]
    cookie: u64,

    /// Cookie mask applied with --cookie
    #[arg(long, value_parser = parse_u64, default_value = "0")]
    cookie_mask: u64,

    /// Entries visited per iteration task turn (overrides the config file)
    #[arg(short = 'b', long)]
    batch: Option<usize>,

    /// Print Prometheus counters after the replay
    #[arg(long)]
    metrics: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

/// One flow in the replay file.
#[derive(Debug, Deserialize)]
struct FlowRecord {
    id: u64,
    #[serde(default)]
    table: u8,
    #[serde(default)]
    priority: u16,
    #[serde(default)]
    cookie: u64,
    #[serde(default)]
    idle_timeout: u16,
    #[serde(default)]
    hard_timeout: u16,
    /// Match fields, as "value" or "value/mask".
    #[serde(default, rename = "match")]
    fields: BTreeMap<MatchField, String>,
    /// Output ports.
    #[serde(default)]
    output: Vec<u32>,
}

impl FlowRecord {
    fn to_flow_add(&self) -> anyhow::Result<(FlowId, FlowAdd, Minimatch)> {
        let table_id = TableId::new(self.table)?;

        let mut minimatch = Minimatch::new(self.priority);
        for (field, value) in &self.fields {
            let value: MaskedValue = value
                .parse()
                .with_context(|| format!("flow {}: bad value for {}", self.id, field))?;
            minimatch.set_field(*field, value);
        }

        let actions = self
            .output
            .iter()
            .map(|&port| Action::Output { port })
            .collect::<Vec<_>>();
        let instructions = if actions.is_empty() {
            Instructions::new()
        } else {
            Instructions::apply(actions)
        };

        let flow_add = FlowAdd::new(table_id)
            .with_cookie(self.cookie)
            .with_timeouts(self.idle_timeout, self.hard_timeout)
            .with_instructions(instructions);
        Ok((FlowId::new(self.id), flow_add, minimatch))
    }
}

fn parse_u64(value: &str) -> Result<u64, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|err| format!("invalid number '{}': {}", value, err))
}

fn parse_bucket_size(value: &str) -> Result<(u8, u32), String> {
    let (table, size) = value
        .split_once('=')
        .ok_or_else(|| format!("expected TABLE=SIZE, got '{}'", value))?;
    let table = table
        .trim()
        .parse()
        .map_err(|err| format!("invalid table '{}': {}", table, err))?;
    let size = size
        .trim()
        .parse()
        .map_err(|err| format!("invalid size '{}': {}", size, err))?;
    Ok((table, size))
}

fn load_flows(path: &Path) -> anyhow::Result<Vec<FlowRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let records = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?,
        _ => serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?,
    };
    Ok(records)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => FlowTableConfig::from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => FlowTableConfig::default(),
    };
    if let Some(batch) = args.batch {
        config = config.with_iter_task_batch(batch);
    }

    let registry = Registry::new();
    let counters = FlowTableCounters::new()?;
    counters.register(&registry)?;

    let mut table = FlowTable::new(config, counters)?;
    let records = load_flows(&args.flows)?;
    info!("Replaying {} flows from {}", records.len(), args.flows.display());

    let mut rejected = 0;
    for record in &records {
        let (id, flow_add, minimatch) = record.to_flow_add()?;
        if let Err(err) = table.add(id, &flow_add, minimatch) {
            rejected += 1;
            println!("rejected flow {}: {} ({})", id, err, err.minimatch);
        }
    }

    for &(table_id, size) in &args.checksum_buckets {
        table
            .set_checksum_buckets_size(table_id, size)
            .with_context(|| format!("failed to resize checksum buckets of table {}", table_id))?;
    }

    println!("{} flows installed, {} rejected", table.len(), rejected);
    for table_id in TableId::all() {
        let buckets = table.checksum_buckets(table_id);
        if table.checksum(table_id) == 0 && buckets.len() == 1 {
            continue;
        }
        println!("table {}: checksum {:#018x}", table_id, table.checksum(table_id));
        for (index, sum) in buckets.iter().enumerate().filter(|(_, sum)| **sum != 0) {
            println!("  bucket {:>5}: {:#018x}", index, sum);
        }
    }

    let mut query = FlowQuery::all().with_cookie(args.cookie, args.cookie_mask);
    if let Some(table_id) = args.table {
        query = query.with_table(TableId::new(table_id)?);
    }

    let mut scheduler = IterTaskScheduler::from_config(table.config());
    let dumped = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dumped);
    scheduler.spawn(
        &mut table,
        Some(query),
        move |entry: Option<&FlowEntry>| match entry {
            Some(entry) => {
                counter.fetch_add(1, Ordering::Relaxed);
                println!(
                    "  {} idle={} hard={} created={}",
                    entry,
                    entry.idle_timeout(),
                    entry.hard_timeout(),
                    entry.created_at().format("%H:%M:%S%.3f")
                );
            }
            None => println!("-- end of dump"),
        },
        0,
    )?;

    let table = Mutex::new(table);
    scheduler.drive(&table).await;
    println!("{} flows dumped", dumped.load(Ordering::Relaxed));

    if args.metrics {
        print!("{}", gather_text(&registry));
    }

    let table = table.into_inner();
    if let Err(err) = table.check_invariants() {
        bail!("flow table audit failed: {}", err);
    }
    info!("Flow table audit passed");
    table.destroy();

    if rejected > 0 {
        warn!("{} flows were rejected", rejected);
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
