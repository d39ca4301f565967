use crate::config::{HISTOGRAM_BINS, VAR_PERCENTILE};
use crate::error::{Result, SimulationError};
use crate::simulator::SimulationEnsemble;
use serde::Serialize;

/// Percentile of `values` by linear interpolation between the two bracketing
/// order statistics at rank `q / 100 * (n - 1)`.
pub fn percentile(values: &[f64], q: f64) -> Result<f64> {
    if values.is_empty() {
        return Err(SimulationError::insufficient_data(1, 0));
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile_of_sorted(&sorted, q)
}

fn percentile_of_sorted(sorted: &[f64], q: f64) -> Result<f64> {
    if sorted.is_empty() {
        return Err(SimulationError::insufficient_data(1, 0));
    }
    if !(0.0..=100.0).contains(&q) {
        return Err(SimulationError::invalid_parameters(format!(
            "percentile must be within [0, 100], got {}",
            q
        )));
    }

    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let t = rank - lo as f64;
    let (a, b) = (sorted[lo], sorted[hi]);
    let diff = b - a;
    // Interpolate from the nearer endpoint.
    Ok(if t >= 0.5 { b - diff * (1.0 - t) } else { a + diff * t })
}

/// Equal-width histogram over `[min, max]`; the last bin includes its right edge.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Histogram {
    pub edges: Vec<f64>,
    pub counts: Vec<usize>,
}

impl Histogram {
    pub fn new(values: &[f64], bins: usize) -> Result<Self> {
        if bins == 0 {
            return Err(SimulationError::invalid_parameters("histogram needs at least 1 bin"));
        }
        if values.is_empty() {
            return Err(SimulationError::insufficient_data(1, 0));
        }

        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let (lo, hi) = if min == max { (min - 0.5, max + 0.5) } else { (min, max) };
        let width = (hi - lo) / bins as f64;

        let edges: Vec<f64> = (0..=bins).map(|i| lo + width * i as f64).collect();
        let mut counts = vec![0usize; bins];
        for &v in values {
            let idx = (((v - lo) / width) as usize).min(bins - 1);
            counts[idx] += 1;
        }

        Ok(Self { edges, counts })
    }
}

/// Distribution of simulated terminal prices and the VaR derived from it.
///
/// Computed from an ensemble on demand, so it always matches that ensemble.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RiskReport {
    /// Price on the last simulated day, in path order.
    pub terminal_prices: Vec<f64>,
    pub last_observed_price: f64,
    pub percentile_5: f64,
    /// `last_observed_price - percentile_5`. Negative when the lower tail
    /// sits above the starting price.
    pub value_at_risk: f64,
    #[serde(skip)]
    sorted: Vec<f64>,
}

impl RiskReport {
    pub fn percentile(&self, q: f64) -> Result<f64> {
        percentile_of_sorted(&self.sorted, q)
    }

    pub fn median(&self) -> f64 {
        self.percentile(50.0).unwrap_or(f64::NAN)
    }

    pub fn percentile_95(&self) -> f64 {
        self.percentile(95.0).unwrap_or(f64::NAN)
    }

    pub fn interquartile_range(&self) -> f64 {
        match (self.percentile(75.0), self.percentile(25.0)) {
            (Ok(q3), Ok(q1)) => q3 - q1,
            _ => f64::NAN,
        }
    }

    pub fn mean(&self) -> f64 {
        self.terminal_prices.iter().sum::<f64>() / self.terminal_prices.len() as f64
    }

    pub fn min(&self) -> f64 {
        self.sorted.first().copied().unwrap_or(f64::NAN)
    }

    pub fn max(&self) -> f64 {
        self.sorted.last().copied().unwrap_or(f64::NAN)
    }

    /// Share of paths ending below the last observed price.
    pub fn probability_of_loss(&self) -> f64 {
        let losses = self
            .terminal_prices
            .iter()
            .filter(|&&p| p < self.last_observed_price)
            .count();
        losses as f64 / self.terminal_prices.len() as f64
    }

    /// Expected loss over the tail at or below the 5th percentile.
    pub fn expected_shortfall(&self) -> f64 {
        let tail: Vec<f64> = self
            .sorted
            .iter()
            .copied()
            .take_while(|&p| p <= self.percentile_5)
            .collect();
        if tail.is_empty() {
            return self.value_at_risk;
        }
        self.last_observed_price - tail.iter().sum::<f64>() / tail.len() as f64
    }

    pub fn histogram(&self, bins: usize) -> Result<Histogram> {
        Histogram::new(&self.terminal_prices, bins)
    }

    pub fn default_histogram(&self) -> Result<Histogram> {
        self.histogram(HISTOGRAM_BINS)
    }

    pub fn var_message(&self) -> String {
        format!(
            "VaR at 95% confidence interval is {:.2} USD",
            self.value_at_risk
        )
    }
}

/// Reduces an ensemble's terminal row to a [`RiskReport`].
pub fn summarize(ensemble: &SimulationEnsemble, last_observed_price: f64) -> Result<RiskReport> {
    if !last_observed_price.is_finite() || last_observed_price <= 0.0 {
        return Err(SimulationError::invalid_parameters(format!(
            "last_observed_price must be positive and finite, got {}",
            last_observed_price
        )));
    }

    let terminal_prices = ensemble.terminal_prices();
    let mut sorted = terminal_prices.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let percentile_5 = percentile_of_sorted(&sorted, VAR_PERCENTILE)?;

    Ok(RiskReport {
        terminal_prices,
        last_observed_price,
        percentile_5,
        value_at_risk: last_observed_price - percentile_5,
        sorted,
    })
}

/// Per-day percentile cone for one percentile level.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PercentileBand {
    pub percentile: f64,
    /// One value per simulated day.
    pub values: Vec<f64>,
}

/// Percentile cones across every simulated day, e.g. p10/p50/p90.
pub fn percentile_bands(ensemble: &SimulationEnsemble, levels: &[f64]) -> Result<Vec<PercentileBand>> {
    let mut bands: Vec<PercentileBand> = levels
        .iter()
        .map(|&percentile| PercentileBand {
            percentile,
            values: Vec::with_capacity(ensemble.time_horizon_days()),
        })
        .collect();

    for day in 0..ensemble.time_horizon_days() {
        let Some(mut slice) = ensemble.day(day) else {
            break;
        };
        slice.sort_by(|a, b| a.total_cmp(b));
        for band in bands.iter_mut() {
            band.values.push(percentile_of_sorted(&slice, band.percentile)?);
        }
    }

    Ok(bands)
}
