// SPDX-License-Identifier: GPL-2.0

mod aggregate;
mod input;
mod rank;
mod render;
mod snapshot;
mod topology;

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use log::debug;
use log::warn;

use aggregate::aggregate;
use aggregate::carry;
use aggregate::CpuCounts;
use aggregate::IrqStat;
use input::spawn_listener;
use input::Mailbox;
use input::RawModeGuard;
use input::ViewRequest;
use rank::rank;
use rank::SortKey;
use render::Renderer;
use render::ViewMode;
use render::ViewState;
use snapshot::Snapshot;
use topology::Topology;
use topology::TopologySource;

const PROC_INTERRUPTS: &str = "/proc/interrupts";

/// Slice size for the inter-cycle sleep, so a cancellation request is
/// noticed well before a full interval elapses.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// irqtop: a NUMA-aware interrupt activity monitor
///
/// Samples the kernel's per-CPU interrupt counters at a fixed interval,
/// maps every CPU to its NUMA node, and prints a ranked table of
/// per-interval deltas. The default view shows one aggregate column per
/// node; pressing a digit key narrows the table to that node with one
/// column per CPU, and 't' returns to the totals view. Any other key
/// ends the session.
///
/// Node membership comes from `numactl --hardware` unless a static
/// topology file is supplied, and is refreshed automatically when a
/// previously unseen CPU shows up in the counter table.
#[derive(Debug, Parser)]
struct Opts {
    /// Sampling interval in seconds.
    #[clap(short = 'i', long, default_value = "2.0")]
    interval: f64,

    /// Number of delta cycles to run before exiting. 0 runs forever.
    #[clap(short = 'c', long, default_value = "0")]
    count: u64,

    /// Maximum number of rows displayed per cycle. 0 shows all rows.
    #[clap(short = 'r', long, default_value = "20")]
    rows: usize,

    /// Sort key: "totals", "irq-number", "name", or a node id.
    #[clap(short = 's', long, default_value = "totals")]
    sort: SortKey,

    /// Hide rows whose delta in the current view is zero.
    #[clap(short = 'a', long, action = clap::ArgAction::SetTrue)]
    active: bool,

    /// Keep only rows whose name contains one of these substrings.
    /// Repeat the flag to provide several.
    #[clap(short = 'F', long = "filter")]
    filters: Vec<String>,

    /// Include pseudo-rows with non-numeric ids (NMI, LOC, ERR, ...).
    #[clap(short = 'x', long, action = clap::ArgAction::SetTrue)]
    extra: bool,

    /// Start in single-node view for this node instead of totals.
    #[clap(short = 'n', long)]
    node: Option<usize>,

    /// Counter source to sample, in /proc/interrupts format.
    /// Defaults to /proc/interrupts.
    #[clap(short = 'f', long)]
    file: Option<PathBuf>,

    /// Second counter source: compute one delta of --file against this
    /// snapshot and exit. Requires an explicit --file.
    #[clap(long)]
    diff: Option<PathBuf>,

    /// Static topology source containing `node <id> cpus: ...` lines,
    /// used instead of invoking numactl.
    #[clap(long)]
    topology_file: Option<PathBuf>,

    /// Print the cumulative since-boot counts once before the first
    /// delta cycle.
    #[clap(short = 'o', long, action = clap::ArgAction::SetTrue)]
    overall: bool,

    /// Batch mode: no raw terminal, no key handling, just periodic
    /// output.
    #[clap(short = 'b', long, action = clap::ArgAction::SetTrue)]
    batch: bool,

    /// Enable verbose output. Specify multiple times to increase
    /// verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn validate_opts(opts: &Opts) -> Result<()> {
    if opts.diff.is_some() && opts.file.is_none() {
        bail!("--diff needs an explicit --file as the baseline snapshot");
    }
    if !opts.interval.is_finite() || opts.interval <= 0.0 {
        bail!("--interval must be positive");
    }
    Ok(())
}

struct Monitor {
    topo: Topology,
    topo_source: TopologySource,
    view: ViewState,
    renderer: Renderer,
    prev: BTreeMap<String, CpuCounts>,
    mailbox: Arc<Mailbox>,
    out: Box<dyn Write + Send>,

    counters: PathBuf,
    diff: Option<PathBuf>,
    include_all: bool,
    overall: bool,
    interactive: bool,
    interval: Duration,
    count: u64,
}

impl Monitor {
    fn init(opts: &Opts) -> Result<Self> {
        let topo_source = match &opts.topology_file {
            Some(path) => TopologySource::File(path.clone()),
            None => TopologySource::Numactl,
        };
        let topo = Topology::resolve(&topo_source)?;

        let mode = match opts.node {
            Some(node) if topo.has_node(node) => ViewMode::Node(node),
            Some(node) => {
                warn!("node {} does not exist, starting in totals view", node);
                ViewMode::Totals
            }
            None => ViewMode::Totals,
        };

        Ok(Self {
            topo,
            topo_source,
            view: ViewState {
                mode,
                sort: opts.sort,
                filters: opts.filters.clone(),
                show_zero: !opts.active,
                max_rows: opts.rows,
            },
            renderer: Renderer::new(),
            prev: BTreeMap::new(),
            mailbox: Arc::new(Mailbox::new()),
            out: Box::new(std::io::stdout()),

            counters: opts
                .file
                .clone()
                .unwrap_or_else(|| PathBuf::from(PROC_INTERRUPTS)),
            diff: opts.diff.clone(),
            include_all: opts.extra,
            overall: opts.overall,
            interactive: !opts.batch && opts.diff.is_none(),
            interval: Duration::from_secs_f64(opts.interval),
            count: opts.count,
        })
    }

    /// Rebuild the topology if @snap mentions a CPU we cannot place on
    /// a node. A CPU still unplaced after the rebuild is fatal.
    fn refresh_topology(&mut self, snap: &Snapshot) -> Result<()> {
        if snap.cpus.iter().all(|cpu| self.topo.has_cpu(*cpu)) {
            return Ok(());
        }
        debug!("topology: unseen CPU in counter header, re-resolving");
        self.topo = Topology::resolve(&self.topo_source)?;
        for cpu in &snap.cpus {
            if !self.topo.has_cpu(*cpu) {
                bail!("CPU {} is not listed on any NUMA node", cpu);
            }
        }
        Ok(())
    }

    /// Apply the latest pending keystroke, if any. An out-of-range
    /// node selection silently falls back to the totals view.
    fn consume_pending_key(&mut self) {
        let Some(req) = self.mailbox.take() else {
            return;
        };
        self.view.mode = match req {
            ViewRequest::Totals => ViewMode::Totals,
            ViewRequest::Node(node) if self.topo.has_node(node) => ViewMode::Node(node),
            ViewRequest::Node(node) => {
                debug!("node {} does not exist, falling back to totals", node);
                ViewMode::Totals
            }
        };
    }

    fn sample(&mut self) -> Result<Vec<IrqStat>> {
        let snap = Snapshot::read(&self.counters, self.include_all)?;
        self.refresh_topology(&snap)?;
        Ok(aggregate(&snap, &self.topo, &self.prev))
    }

    fn paint(&mut self, rows: &[IrqStat], first_cycle: bool) -> Result<()> {
        // Raw mode needs an explicit carriage return per line.
        let eol = if self.interactive { "\r\n" } else { "\n" };
        let lines = self
            .renderer
            .render(rows, &self.view, &self.topo, first_cycle);

        for line in lines {
            write!(self.out, "{}{}", line, eol)?;
        }
        write!(self.out, "{}", eol)?;
        self.out.flush().context("Failed to write table")?;
        Ok(())
    }

    /// Sleep one interval in slices, bailing out early when @shutdown
    /// gets raised.
    fn sleep_interruptibly(&self, shutdown: &AtomicBool) {
        let mut left = self.interval;
        while !left.is_zero() && !shutdown.load(Ordering::Relaxed) {
            let slice = left.min(SLEEP_SLICE);
            std::thread::sleep(slice);
            left -= slice;
        }
    }

    fn run(&mut self, shutdown: Arc<AtomicBool>) -> Result<()> {
        let _raw = if self.interactive {
            spawn_listener(self.mailbox.clone(), shutdown.clone());
            Some(RawModeGuard::new()?)
        } else {
            None
        };

        // Cycle 0 only establishes the baseline; nothing is printed
        // unless the cumulative pre-pass was requested.
        let rows = self.sample()?;
        if self.overall {
            let ranked = rank(rows.clone(), &self.view);
            self.paint(&ranked, true)?;
        }
        self.prev = carry(&rows);

        // Two-file comparison: exactly one delta cycle, no polling.
        if let Some(diff) = self.diff.take() {
            let snap = Snapshot::read(&diff, self.include_all)?;
            self.refresh_topology(&snap)?;
            let rows = aggregate(&snap, &self.topo, &self.prev);
            let ranked = rank(rows, &self.view);
            return self.paint(&ranked, false);
        }

        let mut cycles = 0;
        while !shutdown.load(Ordering::Relaxed) {
            self.sleep_interruptibly(&shutdown);
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            self.consume_pending_key();
            let rows = self.sample()?;
            let ranked = rank(rows.clone(), &self.view);
            self.paint(&ranked, false)?;
            self.prev = carry(&rows);

            cycles += 1;
            if self.count != 0 && cycles >= self.count {
                break;
            }
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    validate_opts(&opts)?;

    let llv = match opts.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::Relaxed);
    })
    .context("Error setting Ctrl-C handler")?;

    let mut monitor = Monitor::init(&opts)?;
    monitor.run(shutdown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn base_opts() -> Opts {
        Opts::parse_from(["irqtop"])
    }

    #[test]
    fn test_diff_requires_explicit_file() {
        let mut opts = base_opts();
        opts.diff = Some(PathBuf::from("/tmp/b"));
        assert!(validate_opts(&opts).is_err());
        opts.file = Some(PathBuf::from("/tmp/a"));
        assert!(validate_opts(&opts).is_ok());
    }

    #[test]
    fn test_invalid_sort_key_rejected_at_parse() {
        assert!(Opts::try_parse_from(["irqtop", "-s", "bogus"]).is_err());
        assert!(Opts::try_parse_from(["irqtop", "-s", "1"]).is_ok());
    }

    fn write_tmp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{}", content).unwrap();
        f
    }

    fn monitor_for(topo: &Path, counters: &Path) -> Monitor {
        let mut opts = base_opts();
        opts.topology_file = Some(topo.to_path_buf());
        opts.file = Some(counters.to_path_buf());
        opts.batch = true;
        Monitor::init(&opts).unwrap()
    }

    #[test]
    fn test_unseen_cpu_triggers_reresolve() {
        let topo1 = write_tmp("node 0 cpus: 0\n");
        let counters = write_tmp("CPU0 CPU1\n3: 1 2 timer\n");
        let mut mon = monitor_for(topo1.path(), counters.path());

        // CPU1 is unknown and the re-read of the same file cannot
        // place it either.
        assert!(mon.sample().is_err());

        // Grow the topology file in place; the lazy rebuild picks the
        // new CPU up.
        std::fs::write(topo1.path(), "node 0 cpus: 0\nnode 1 cpus: 1\n").unwrap();
        let rows = mon.sample().unwrap();
        assert_eq!(rows[0].cur.per_node[&1], 2);
    }

    #[test]
    fn test_pending_key_fallback_to_totals() {
        let topo = write_tmp("node 0 cpus: 0\n");
        let counters = write_tmp("CPU0\n3: 1 timer\n");
        let mut mon = monitor_for(topo.path(), counters.path());

        mon.mailbox.post(ViewRequest::Node(0));
        mon.consume_pending_key();
        assert_eq!(mon.view.mode, ViewMode::Node(0));

        mon.mailbox.post(ViewRequest::Node(9));
        mon.consume_pending_key();
        assert_eq!(mon.view.mode, ViewMode::Totals);

        // No pending key leaves the mode alone.
        mon.view.mode = ViewMode::Node(0);
        mon.consume_pending_key();
        assert_eq!(mon.view.mode, ViewMode::Node(0));
    }

    /// Write sink the tests can read back after `run()` consumes the
    /// Monitor's output handle.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_two_file_mode_single_delta_no_polling() {
        let topo = write_tmp("node 0 cpus: 0 1\nnode 1 cpus: 2 3\n");
        let first = write_tmp("CPU0 CPU1 CPU2 CPU3\n16: 100 50 0 0 eth0\n");
        let second = write_tmp("CPU0 CPU1 CPU2 CPU3\n16: 110 60 0 0 eth0\n");

        let mut opts = base_opts();
        opts.topology_file = Some(topo.path().to_path_buf());
        opts.file = Some(first.path().to_path_buf());
        opts.diff = Some(second.path().to_path_buf());
        let mut mon = Monitor::init(&opts).unwrap();
        // A long interval proves the comparison path never sleeps.
        mon.interval = Duration::from_secs(60);
        let buf = SharedBuf::default();
        mon.out = Box::new(buf.clone());

        let start = std::time::Instant::now();
        mon.run(Arc::new(AtomicBool::new(false))).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));

        // The first source is the baseline, the second the one and
        // only delta cycle.
        assert_eq!(mon.prev["16"].total, 150);
        let text = buf.text();
        assert_eq!(text.matches("TOTAL").count(), 1);
        let row: Vec<&str> = text
            .lines()
            .find(|l| l.trim_start().starts_with("16"))
            .unwrap()
            .split_whitespace()
            .collect();
        assert_eq!(row, vec!["16", "20", "20", "0", "eth0"]);
    }

    #[test]
    fn test_baseline_cycle_prints_nothing_without_overall() {
        let topo = write_tmp("node 0 cpus: 0\n");
        let counters = write_tmp("CPU0\n3: 7 timer\n");
        let mut mon = monitor_for(topo.path(), counters.path());
        mon.count = 1;
        mon.interval = Duration::from_millis(1);
        let buf = SharedBuf::default();
        mon.out = Box::new(buf.clone());

        mon.run(Arc::new(AtomicBool::new(false))).unwrap();

        // One delta cycle painted, no baseline table.
        let text = buf.text();
        assert_eq!(text.matches("TOTAL").count(), 1);
        let row: Vec<&str> = text
            .lines()
            .find(|l| l.trim_start().starts_with('3'))
            .unwrap()
            .split_whitespace()
            .collect();
        assert_eq!(row, vec!["3", "0", "0", "timer"]);
    }

    #[test]
    fn test_overall_prepass_prints_cumulative_first() {
        let topo = write_tmp("node 0 cpus: 0 1\nnode 1 cpus: 2 3\n");
        let first = write_tmp("CPU0 CPU1 CPU2 CPU3\n16: 100 50 0 0 eth0\n");
        let second = write_tmp("CPU0 CPU1 CPU2 CPU3\n16: 110 60 0 0 eth0\n");

        let mut opts = base_opts();
        opts.topology_file = Some(topo.path().to_path_buf());
        opts.file = Some(first.path().to_path_buf());
        opts.diff = Some(second.path().to_path_buf());
        opts.overall = true;
        let mut mon = Monitor::init(&opts).unwrap();
        let buf = SharedBuf::default();
        mon.out = Box::new(buf.clone());

        mon.run(Arc::new(AtomicBool::new(false))).unwrap();

        let text = buf.text();
        assert_eq!(text.matches("TOTAL").count(), 2);
        let rows: Vec<Vec<&str>> = text
            .lines()
            .filter(|l| l.trim_start().starts_with("16"))
            .map(|l| l.split_whitespace().collect())
            .collect();
        // Cumulative pre-pass against the zero baseline, then the
        // actual delta.
        assert_eq!(rows[0], vec!["16", "150", "150", "0", "eth0"]);
        assert_eq!(rows[1], vec!["16", "20", "20", "0", "eth0"]);
    }

    #[test]
    fn test_sleep_observes_cancellation_quickly() {
        let topo = write_tmp("node 0 cpus: 0\n");
        let counters = write_tmp("CPU0\n3: 1 timer\n");
        let mut mon = monitor_for(topo.path(), counters.path());
        mon.interval = Duration::from_secs(60);

        let shutdown = AtomicBool::new(true);
        let start = std::time::Instant::now();
        mon.sleep_interruptibly(&shutdown);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
