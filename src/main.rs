use anyhow::{Result, bail};
use chrono::{Duration, NaiveDate, Utc};
use clap::Parser;
use montestock::config::{
    self, DEFAULT_NUM_SIMULATIONS, DEFAULT_SEED, DEFAULT_SYMBOL, DEFAULT_TIME_HORIZON,
    HISTOGRAM_BINS, MIN_LOOKBACK_DAYS, MOCK_HISTORY_DAYS, NUM_SIMULATION_OPTIONS, TIME_HORIZON_OPTIONS, TRADING_DAYS,
};
use montestock::data::{MockHistoryLoader, YahooHistoryLoader};
use montestock::pipeline::{Analysis, AnalysisRequest, run_analysis};
use montestock::risk::percentile_bands;
use montestock::simulator::SimulationMode;
use serde_json::json;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Monte Carlo simulation of a stock's closing price with Value-at-Risk",
    after_help = "EXAMPLES:
    # One year of MSFT history, 30-day horizon, 1000 paths
    cargo run --release -- --symbol MSFT

    # 90-day horizon with 500 paths on all cores
    cargo run --release -- --symbol AAPL --horizon 90 --simulations 500 --parallel

    # Offline run on synthetic history
    cargo run --release -- --mock --json"
)]
struct Args {
    /// Ticker symbol to analyse
    #[arg(long, default_value = DEFAULT_SYMBOL)]
    symbol: String,

    /// First day of history (YYYY-MM-DD). Default: one year ago.
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Day after the last day of history (YYYY-MM-DD). Default: yesterday.
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Number of future trading days to simulate
    #[arg(long, default_value_t = DEFAULT_TIME_HORIZON)]
    horizon: usize,

    /// Number of simulated paths
    #[arg(long, default_value_t = DEFAULT_NUM_SIMULATIONS)]
    simulations: usize,

    /// Random generator seed
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Fill paths on the rayon pool with one generator stream per path
    #[arg(long)]
    parallel: bool,

    /// Use seeded synthetic history instead of Yahoo Finance
    #[arg(long)]
    mock: bool,

    /// Daily volatility of the synthetic history (with --mock)
    #[arg(long, default_value_t = 0.015)]
    mock_sigma: f64,

    /// Histogram bins for the terminal price distribution
    #[arg(long, default_value_t = HISTOGRAM_BINS)]
    bins: usize,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn request(&self) -> Result<AnalysisRequest> {
        let defaults = AnalysisRequest::default();
        let today = Utc::now().date_naive();
        let start = self.start.unwrap_or(defaults.start);
        let end = self.end.unwrap_or(defaults.end);

        if start > today - Duration::days(MIN_LOOKBACK_DAYS) {
            bail!(
                "start date {} must be at least {} days before today",
                start,
                MIN_LOOKBACK_DAYS
            );
        }
        if start >= end {
            bail!("start date {} must precede end date {}", start, end);
        }
        if !TIME_HORIZON_OPTIONS.contains(&self.horizon) {
            warn!("Horizon {} is outside the usual options {:?}", self.horizon, TIME_HORIZON_OPTIONS);
        }
        if !NUM_SIMULATION_OPTIONS.contains(&self.simulations) {
            warn!(
                "Simulation count {} is outside the usual options {:?}",
                self.simulations, NUM_SIMULATION_OPTIONS
            );
        }

        Ok(AnalysisRequest {
            symbol: self.symbol.trim().to_uppercase(),
            start,
            end,
            time_horizon_days: self.horizon,
            num_simulations: self.simulations,
            seed: self.seed,
            mode: if self.parallel {
                SimulationMode::Parallel
            } else {
                SimulationMode::Sequential
            },
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("montestock=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    if args.parallel {
        let threads = config::init_cpu_parallelism();
        debug!("Parallel mode: one generator stream per path across {} threads", threads);
    }

    let request = args.request()?;
    let result = if args.mock {
        let loader =
            MockHistoryLoader::synthetic(&request.symbol, MOCK_HISTORY_DAYS, args.mock_sigma, args.seed)?;
        run_analysis(&loader, &request).await
    } else {
        run_analysis(&YahooHistoryLoader::new(), &request).await
    };

    let analysis = match result {
        Ok(analysis) => analysis,
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            return Err(e);
        }
    };

    if args.json {
        print_json(&analysis, args.bins)?;
    } else {
        print_summary(&analysis, &request)?;
    }
    Ok(())
}

fn print_json(analysis: &Analysis, bins: usize) -> Result<()> {
    let report = &analysis.report;
    let payload = json!({
        "symbol": analysis.symbol,
        "observations": analysis.observations,
        "daily_volatility": analysis.stats.volatility.value(),
        "annual_volatility": analysis.stats.volatility.annualized(TRADING_DAYS),
        "params": analysis.ensemble.params(),
        "last_observed_price": report.last_observed_price,
        "percentile_5": report.percentile_5,
        "median": report.median(),
        "percentile_95": report.percentile_95(),
        "value_at_risk": report.value_at_risk,
        "expected_shortfall": report.expected_shortfall(),
        "probability_of_loss": report.probability_of_loss(),
        "histogram": report.histogram(bins)?,
        "message": report.var_message(),
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn print_summary(analysis: &Analysis, request: &AnalysisRequest) -> Result<()> {
    let report = &analysis.report;
    let vol = analysis.stats.volatility;

    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!(
        "║  Monte Carlo simulation for {:<6} next {:>3} days           ║",
        analysis.symbol, request.time_horizon_days
    );
    println!("╠════════════════════════════════════════════════════════════╣");
    println!("║  History        : {} .. {} ({:>4} closes)      ║", request.start, request.end, analysis.observations);
    println!("║  Paths / Seed   : {:>6} / {:<10}                       ║", request.num_simulations, request.seed);
    println!(
        "║  Daily Vol      : {:>7.4}%   Annual Vol : {:>7.2}%          ║",
        vol.value() * 100.0,
        vol.annualized(TRADING_DAYS) * 100.0
    );
    println!("║  Current Price  : ${:>9.2}                                ║", report.last_observed_price);
    println!("╠════════════════════════════════════════════════════════════╣");
    println!(
        "║  P5=${:>8.2}  P50=${:>8.2}  P95=${:>8.2}              ║",
        report.percentile_5,
        report.median(),
        report.percentile_95()
    );
    println!(
        "║  Mean=${:>8.2}  P(loss)={:>5.1}%  ES=${:>8.2}               ║",
        report.mean(),
        report.probability_of_loss() * 100.0,
        report.expected_shortfall()
    );

    let bands = percentile_bands(&analysis.ensemble, &[10.0, 50.0, 90.0])?;
    println!("╠════════════════════════════════════════════════════════════╣");
    println!("║  Day      P10        P50        P90                        ║");
    let days = request.time_horizon_days;
    let step = (days / 6).max(1);
    for day in (step - 1..days).step_by(step) {
        println!(
            "║  {:>3}  ${:>9.2} ${:>9.2} ${:>9.2}                     ║",
            day + 1,
            bands[0].values[day],
            bands[1].values[day],
            bands[2].values[day]
        );
    }
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
    println!("{}", report.var_message());
    Ok(())
}
