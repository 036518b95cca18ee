use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use config::{Config, Environment, File};
use fabric_mr_registry::{
    AccessFlags, ClosePolicy, Iovec, MrAttr, MrError, MrKey, MrMode, MrRegistry, RegistryConfig,
    SharedMrRegistry,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Unregistered bytes left between consecutive iovecs of one registration.
const IOVEC_GAP: usize = 64;

/// Rights granted to every registration the driver creates.
const GRANTED: AccessFlags = AccessFlags::READ
    .union(AccessFlags::WRITE)
    .union(AccessFlags::REMOTE_READ)
    .union(AccessFlags::REMOTE_WRITE);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Assigned,
    CallerSupplied,
}

impl From<ModeArg> for MrMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Assigned => MrMode::Assigned,
            ModeArg::CallerSupplied => MrMode::CallerSupplied,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ClosePolicyArg {
    Reject,
    Drain,
}

impl From<ClosePolicyArg> for ClosePolicy {
    fn from(policy: ClosePolicyArg) -> Self {
        match policy {
            ClosePolicyArg::Reject => ClosePolicy::Reject,
            ClosePolicyArg::Drain => ClosePolicy::Drain,
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Memory region registry workload driver", long_about = None)]
struct Args {
    /// Optional TOML file with registry and workload settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Addressing mode of the registry
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Behaviour of close when registrations are still live
    #[arg(long, value_enum)]
    close_policy: Option<ClosePolicyArg>,

    /// Number of registrations to create
    #[arg(long)]
    count: Option<u64>,

    /// Iovecs per registration
    #[arg(long)]
    iovecs: Option<usize>,

    /// Bytes per iovec
    #[arg(long)]
    region_size: Option<usize>,

    /// Remote access probes issued after each registration
    #[arg(long)]
    probes: Option<u32>,

    /// Worker threads sharing the registry
    #[arg(long)]
    workers: Option<usize>,

    /// Seed for the probe generator
    #[arg(long)]
    seed: Option<u64>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

/// Registry settings plus workload parameters.
///
/// Read from the same file and `FABRIC_MR_*` environment as
/// [`RegistryConfig`]; command-line flags win over both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct MrloadConfig {
    mode: MrMode,
    close_policy: ClosePolicy,
    count: u64,
    iovecs: usize,
    region_size: usize,
    probes: u32,
    workers: usize,
    seed: u64,
    log_level: String,
}

impl Default for MrloadConfig {
    fn default() -> Self {
        Self {
            mode: MrMode::default(),
            close_policy: ClosePolicy::default(),
            count: 10_000,
            iovecs: 2,
            region_size: 4096,
            probes: 4,
            workers: 4,
            seed: 7,
            log_level: "info,fabric_mr_registry=error".to_string(),
        }
    }
}

impl MrloadConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix(RegistryConfig::ENV_PREFIX));

        builder
            .build()
            .context("read mrload configuration")?
            .try_deserialize()
            .context("parse mrload configuration")
    }

    fn apply(&mut self, args: &Args) {
        if let Some(mode) = args.mode {
            self.mode = mode.into();
        }
        if let Some(policy) = args.close_policy {
            self.close_policy = policy.into();
        }
        if let Some(count) = args.count {
            self.count = count;
        }
        if let Some(iovecs) = args.iovecs {
            self.iovecs = iovecs;
        }
        if let Some(region_size) = args.region_size {
            self.region_size = region_size;
        }
        if let Some(probes) = args.probes {
            self.probes = probes;
        }
        if let Some(workers) = args.workers {
            self.workers = workers;
        }
        if let Some(seed) = args.seed {
            self.seed = seed;
        }
        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }
    }

    fn validate(&self) -> Result<()> {
        if self.count == 0 {
            bail!("count must be greater than zero");
        }
        if self.iovecs == 0 {
            bail!("iovecs must be greater than zero");
        }
        if self.region_size == 0 {
            bail!("region-size must be greater than zero");
        }
        if self.workers == 0 {
            bail!("workers must be greater than zero");
        }
        if self
            .region_size
            .checked_add(IOVEC_GAP)
            .and_then(|stride| stride.checked_mul(self.iovecs))
            .is_none()
        {
            bail!(
                "region-size {} with {} iovecs overflows the buffer size",
                self.region_size,
                self.iovecs
            );
        }
        Ok(())
    }

    fn registry(&self) -> RegistryConfig {
        RegistryConfig::new(self.mode).with_close_policy(self.close_policy)
    }
}

/// Locally owned buffer standing in for a provider registration.
struct LocalRegion {
    id: u64,
    buffer: Vec<u8>,
}

impl LocalRegion {
    /// Allocate `iovecs` slices of `region_size` bytes, separated by gaps,
    /// inside one buffer. Sizes must have passed `MrloadConfig::validate`.
    fn allocate(id: u64, iovecs: usize, region_size: usize) -> (Self, Vec<Iovec>) {
        let stride = region_size + IOVEC_GAP;
        let buffer = vec![0u8; stride * iovecs];
        let ranges = buffer
            .chunks(stride)
            .map(|chunk| Iovec::from_slice(&chunk[..region_size]))
            .collect();
        (Self { id, buffer }, ranges)
    }

    fn byte_at(&self, address: u64) -> Option<u8> {
        let index = address.checked_sub(self.buffer.as_ptr() as u64)?;
        self.buffer.get(usize::try_from(index).ok()?).copied()
    }
}

struct LiveRegistration {
    key: MrKey,
    id: u64,
    iovecs: Vec<Iovec>,
}

#[derive(Default)]
struct Counters {
    inserted: AtomicU64,
    retrieved: AtomicU64,
    denied: AtomicU64,
    erased: AtomicU64,
    unexpected: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    mode: MrMode,
    close_policy: ClosePolicy,
    workers: usize,
    inserted: u64,
    retrieved: u64,
    denied: u64,
    erased: u64,
    unexpected: u64,
    elapsed_ms: f64,
    ops_per_sec: f64,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Address a peer would quote for `absolute`, given the registration's
/// iovecs. Registrations are made with a zero offset.
fn remote_address(mode: MrMode, iovecs: &[Iovec], absolute: u64) -> u64 {
    match mode {
        MrMode::Assigned => absolute,
        MrMode::CallerSupplied => absolute - iovecs[0].base,
    }
}

fn probe(
    shared: &SharedMrRegistry<LocalRegion>,
    config: &MrloadConfig,
    counters: &Counters,
    target: &LiveRegistration,
    rng: &mut StdRng,
) {
    let iov = target.iovecs[rng.gen_range(0..target.iovecs.len())];
    let (absolute, length, access, expect_granted) = match rng.gen_range(0..3) {
        0 => {
            let start = rng.gen_range(0..iov.len);
            let length = rng.gen_range(1..=iov.len - start);
            let access = match rng.gen_range(0..3) {
                0 => AccessFlags::REMOTE_READ,
                1 => AccessFlags::REMOTE_WRITE,
                _ => AccessFlags::REMOTE_READ | AccessFlags::REMOTE_WRITE,
            };
            (iov.base + start, length, access, true)
        }
        // Last byte of the iovec plus the first byte of the gap after it.
        1 => (iov.base + iov.len - 1, 2, AccessFlags::REMOTE_READ, false),
        _ => (iov.base, 1, AccessFlags::REMOTE_ATOMIC, false),
    };

    let address = remote_address(config.mode, &target.iovecs, absolute);
    let outcome = shared.with_retrieved(target.key, address, length, access, |region| {
        (region.id, region.byte_at(absolute))
    });

    match outcome {
        Ok((id, Some(_))) if expect_granted && id == target.id => {
            Counters::bump(&counters.retrieved);
        }
        Err(MrError::PermissionDenied { .. }) if !expect_granted => {
            Counters::bump(&counters.denied);
        }
        other => {
            Counters::bump(&counters.unexpected);
            warn!(key = target.key, address, length, ?access, outcome = ?other, "unexpected probe outcome");
        }
    }
}

fn run_worker(
    worker: usize,
    shared: &SharedMrRegistry<LocalRegion>,
    config: &MrloadConfig,
    counters: &Counters,
    next_id: &AtomicU64,
) {
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(worker as u64));
    let mut live: Vec<LiveRegistration> = Vec::new();

    loop {
        let id = next_id.fetch_add(1, Ordering::Relaxed);
        if id >= config.count {
            break;
        }

        let (region, iovecs) = LocalRegion::allocate(id, config.iovecs, config.region_size);
        let attr = MrAttr::new(iovecs.clone(), GRANTED).with_requested_key(id);
        match shared.insert(&attr, region) {
            Ok(key) => {
                Counters::bump(&counters.inserted);
                live.push(LiveRegistration { key, id, iovecs });
            }
            Err(rejected) => {
                Counters::bump(&counters.unexpected);
                warn!(worker, id, error = %rejected.error, "registration refused");
                continue;
            }
        }

        for _ in 0..config.probes {
            let target = &live[rng.gen_range(0..live.len())];
            probe(shared, config, counters, target, &mut rng);
        }
    }

    for registration in live {
        match shared.erase(registration.key) {
            Ok(region) if region.id == registration.id => Counters::bump(&counters.erased),
            Ok(region) => {
                Counters::bump(&counters.unexpected);
                warn!(key = registration.key, expected = registration.id, found = region.id, "erase returned a foreign handle");
            }
            Err(error) => {
                Counters::bump(&counters.unexpected);
                warn!(key = registration.key, %error, "erase failed");
            }
        }
    }
    debug!(worker, "worker finished");
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = MrloadConfig::load(args.config.as_deref())?;
    config.apply(&args);
    config.validate()?;
    init_logging(&config.log_level);

    info!(
        mode = ?config.mode,
        count = config.count,
        iovecs = config.iovecs,
        workers = config.workers,
        "starting registration workload"
    );

    let shared: SharedMrRegistry<LocalRegion> =
        SharedMrRegistry::new(MrRegistry::with_config(config.registry()));
    let counters = Counters::default();
    let next_id = AtomicU64::new(0);

    let start = Instant::now();
    thread::scope(|scope| {
        for worker in 0..config.workers {
            let (shared, config, counters, next_id) = (&shared, &config, &counters, &next_id);
            scope.spawn(move || run_worker(worker, shared, config, counters, next_id));
        }
    });
    let elapsed = start.elapsed();

    shared.close().context("close registry")?;

    let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
    let (inserted, retrieved, denied, erased) = (
        load(&counters.inserted),
        load(&counters.retrieved),
        load(&counters.denied),
        load(&counters.erased),
    );
    let operations = inserted + retrieved + denied + erased;
    let summary = Summary {
        mode: config.mode,
        close_policy: config.close_policy,
        workers: config.workers,
        inserted,
        retrieved,
        denied,
        erased,
        unexpected: load(&counters.unexpected),
        elapsed_ms: elapsed.as_secs_f64() * 1_000.0,
        ops_per_sec: operations as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.unexpected > 0 {
        bail!("{} operations produced unexpected outcomes", summary.unexpected);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocated_iovecs_are_disjoint_and_owned() {
        let (region, iovecs) = LocalRegion::allocate(3, 3, 128);
        assert_eq!(iovecs.len(), 3);
        for pair in iovecs.windows(2) {
            assert_eq!(pair[1].base - pair[0].base, (128 + IOVEC_GAP) as u64);
        }
        for iov in &iovecs {
            assert_eq!(iov.len, 128);
            assert_eq!(region.byte_at(iov.base), Some(0));
        }
        assert_eq!(region.byte_at(iovecs[0].base - 1), None);
    }

    #[test]
    fn test_caller_supplied_addresses_are_relative_to_first_iovec() {
        let iovecs = [Iovec::new(0x1000, 0x10), Iovec::new(0x1050, 0x10)];
        assert_eq!(remote_address(MrMode::CallerSupplied, &iovecs, 0x1058), 0x58);
        assert_eq!(remote_address(MrMode::Assigned, &iovecs, 0x1058), 0x1058);
    }

    #[test]
    fn test_cli_flags_override_loaded_settings() {
        let args = Args::parse_from([
            "fabric-mrload",
            "--mode",
            "caller-supplied",
            "--count",
            "12",
            "--close-policy",
            "drain",
        ]);
        let mut config = MrloadConfig::default();
        config.apply(&args);

        assert_eq!(config.mode, MrMode::CallerSupplied);
        assert_eq!(config.close_policy, ClosePolicy::Drain);
        assert_eq!(config.count, 12);
        assert_eq!(config.iovecs, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_oversized_buffers_rejected() {
        let config = MrloadConfig {
            region_size: usize::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MrloadConfig {
            region_size: usize::MAX / 2,
            iovecs: 4,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_every_probe_matches_its_expectation() {
        let config = MrloadConfig {
            mode: MrMode::CallerSupplied,
            count: 64,
            iovecs: 3,
            region_size: 256,
            probes: 8,
            workers: 1,
            ..Default::default()
        };
        let shared = SharedMrRegistry::new(MrRegistry::with_config(config.registry()));
        let counters = Counters::default();
        run_worker(0, &shared, &config, &counters, &AtomicU64::new(0));

        assert_eq!(counters.inserted.load(Ordering::Relaxed), 64);
        assert_eq!(counters.erased.load(Ordering::Relaxed), 64);
        assert_eq!(counters.unexpected.load(Ordering::Relaxed), 0);
        assert_eq!(
            counters.retrieved.load(Ordering::Relaxed) + counters.denied.load(Ordering::Relaxed),
            64 * 8
        );
        shared.close().unwrap();
    }
}
