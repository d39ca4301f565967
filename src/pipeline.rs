use crate::config::{
    DEFAULT_LOOKBACK_DAYS, DEFAULT_NUM_SIMULATIONS, DEFAULT_SEED, DEFAULT_SYMBOL,
    DEFAULT_TIME_HORIZON,
};
use crate::data::{HistoryLoader, PriceHistory};
use crate::error::{Result as SimResult, SimulationError};
use crate::estimator::{self, ReturnStatistics, VolatilityEstimate};
use crate::risk::{self, RiskReport};
use crate::simulator::{self, SimulationEnsemble, SimulationMode, SimulationParameters};
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Monte Carlo run over one symbol's closing-price history.
///
/// Volatility is derived once at construction. Each call to
/// [`MonteCarlo::run_simulation`] replaces the previous ensemble; reports are
/// recomputed from the current ensemble on every read.
#[derive(Debug)]
pub struct MonteCarlo {
    history: PriceHistory,
    stats: ReturnStatistics,
    params: SimulationParameters,
    mode: SimulationMode,
    ensemble: Option<SimulationEnsemble>,
}

impl MonteCarlo {
    pub fn new(
        history: PriceHistory,
        time_horizon_days: usize,
        num_simulations: usize,
        seed: u64,
    ) -> SimResult<Self> {
        let stats = estimator::return_statistics(&history)?;
        let params = SimulationParameters::new(
            time_horizon_days,
            num_simulations,
            seed,
            history.last_close(),
        )?;

        Ok(Self {
            history,
            stats,
            params,
            mode: SimulationMode::Sequential,
            ensemble: None,
        })
    }

    pub fn with_mode(mut self, mode: SimulationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn history(&self) -> &PriceHistory {
        &self.history
    }

    pub fn volatility(&self) -> VolatilityEstimate {
        self.stats.volatility
    }

    pub fn return_statistics(&self) -> &ReturnStatistics {
        &self.stats
    }

    pub fn params(&self) -> &SimulationParameters {
        &self.params
    }

    pub fn last_observed_price(&self) -> f64 {
        self.params.last_observed_price
    }

    pub fn run_simulation(&mut self) -> SimResult<&SimulationEnsemble> {
        let ensemble = simulator::simulate_with_mode(self.mode, self.stats.volatility, &self.params)?;
        Ok(self.ensemble.insert(ensemble))
    }

    pub fn ensemble(&self) -> Option<&SimulationEnsemble> {
        self.ensemble.as_ref()
    }

    pub fn report(&self) -> SimResult<RiskReport> {
        let ensemble = self.ensemble.as_ref().ok_or_else(|| {
            SimulationError::invalid_parameters("simulation has not been run yet")
        })?;
        risk::summarize(ensemble, self.params.last_observed_price)
    }

    pub fn value_at_risk(&self) -> SimResult<String> {
        self.report().map(|r| r.var_message())
    }
}

/// Inputs for one analysis request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub symbol: String,
    pub start: NaiveDate,
    /// Exclusive.
    pub end: NaiveDate,
    pub time_horizon_days: usize,
    pub num_simulations: usize,
    pub seed: u64,
    pub mode: SimulationMode,
}

impl Default for AnalysisRequest {
    fn default() -> Self {
        let today = Utc::now().date_naive();
        Self {
            symbol: DEFAULT_SYMBOL.to_string(),
            start: today - Duration::days(DEFAULT_LOOKBACK_DAYS),
            end: today - Duration::days(1),
            time_horizon_days: DEFAULT_TIME_HORIZON,
            num_simulations: DEFAULT_NUM_SIMULATIONS,
            seed: DEFAULT_SEED,
            mode: SimulationMode::Sequential,
        }
    }
}

/// Everything a presentation layer needs from one request.
#[derive(Debug)]
pub struct Analysis {
    pub symbol: String,
    pub observations: usize,
    pub stats: ReturnStatistics,
    pub ensemble: SimulationEnsemble,
    pub report: RiskReport,
}

/// Load, estimate, simulate and summarize for one request.
pub async fn run_analysis<L: HistoryLoader>(loader: &L, request: &AnalysisRequest) -> Result<Analysis> {
    info!(
        "Loading {} closes from {} to {}",
        request.symbol, request.start, request.end
    );
    let history = loader
        .load(&request.symbol, request.start, request.end)
        .await
        .with_context(|| format!("failed to load history for {}", request.symbol))?;

    let mut mc = MonteCarlo::new(
        history,
        request.time_horizon_days,
        request.num_simulations,
        request.seed,
    )?
    .with_mode(request.mode);

    info!(
        "{}: {} closes, last={:.2}, daily volatility={:.6}",
        mc.history().symbol(),
        mc.history().len(),
        mc.last_observed_price(),
        mc.volatility().value()
    );

    mc.run_simulation()?;
    let report = mc.report()?;
    info!("{}", report.var_message());

    let MonteCarlo {
        history,
        stats,
        ensemble,
        ..
    } = mc;
    let ensemble = ensemble.context("simulation produced no ensemble")?;

    Ok(Analysis {
        symbol: history.symbol().to_string(),
        observations: history.len(),
        stats,
        ensemble,
        report,
    })
}
