use rayon::ThreadPoolBuilder;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{info, warn};

static SIMULATION_THREADS: OnceLock<usize> = OnceLock::new();

/// Sizes the global rayon pool used by parallel path filling, once per process.
///
/// `MONTESTOCK_THREADS` caps the pool; otherwise every logical core is used.
/// Returns the width of the pool the simulator will actually run on.
pub fn init_cpu_parallelism() -> usize {
    *SIMULATION_THREADS.get_or_init(|| {
        let requested = simulation_threads();
        match ThreadPoolBuilder::new()
            .num_threads(requested)
            .thread_name(|i| format!("montestock-path-{}", i))
            .build_global()
        {
            Ok(()) => info!("Path simulation pool ready with {} threads", requested),
            Err(e) => warn!(
                "Keeping existing rayon pool of {} threads for path simulation ({})",
                rayon::current_num_threads(),
                e
            ),
        }
        rayon::current_num_threads()
    })
}

fn simulation_threads() -> usize {
    std::env::var("MONTESTOCK_THREADS")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&v| v > 0)
        .unwrap_or_else(num_cpus::get)
        .max(1)
}

/// Directory for cached history responses. `MONTESTOCK_CACHE_DIR` overrides `.cache`.
pub fn cache_dir() -> PathBuf {
    std::env::var("MONTESTOCK_CACHE_DIR")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".cache"))
}

pub fn fetch_attempts() -> usize {
    std::env::var("MONTESTOCK_FETCH_ATTEMPTS")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .map(|v| v.clamp(1, 8))
        .unwrap_or(FETCH_ATTEMPTS)
}

pub const DEFAULT_SYMBOL: &str = "MSFT";
/// How far back the history window reaches by default.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 365;
/// Start date may not be later than this many days before today.
pub const MIN_LOOKBACK_DAYS: i64 = 60;
/// Synthetic closes served by `--mock`; covers the default window.
pub const MOCK_HISTORY_DAYS: usize = 400;
pub const DEFAULT_TIME_HORIZON: usize = 30;
pub const DEFAULT_NUM_SIMULATIONS: usize = 1000;
pub const DEFAULT_SEED: u64 = 1024;

/// Horizons offered by the dashboard.
pub const TIME_HORIZON_OPTIONS: &[usize] = &[30, 60, 90];
/// Path counts offered by the dashboard.
pub const NUM_SIMULATION_OPTIONS: &[usize] = &[250, 500, 1000];

/// Lower-tail percentile used for VaR at 95% confidence.
pub const VAR_PERCENTILE: f64 = 5.0;
pub const HISTOGRAM_BINS: usize = 50;
pub const TRADING_DAYS: f64 = 252.0;

pub const FETCH_ATTEMPTS: usize = 3;
pub const FETCH_RETRY_DELAY_SECS: u64 = 2;
pub const CACHE_TTL_SECS: u64 = 86400;
