use crate::data::PriceHistory;
use crate::error::{Result, SimulationError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Standard deviation of simple daily returns. Always non-negative.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64")]
pub struct VolatilityEstimate(f64);

impl TryFrom<f64> for VolatilityEstimate {
    type Error = SimulationError;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl VolatilityEstimate {
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(SimulationError::invalid_parameters(format!(
                "volatility must be finite and >= 0, got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Scales daily volatility by `sqrt(trading_days)`.
    pub fn annualized(self, trading_days: f64) -> f64 {
        self.0 * trading_days.sqrt()
    }
}

/// Summary of the return series behind a volatility estimate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReturnStatistics {
    pub mean: f64,
    pub volatility: VolatilityEstimate,
    pub observations: usize,
}

/// Simple percentage returns over consecutive closes: `(p[i+1] - p[i]) / p[i]`.
pub fn daily_returns(history: &PriceHistory) -> Vec<f64> {
    let closes: Vec<f64> = history.closes().collect();
    closes.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect()
}

/// Mean and population standard deviation (divide by N, not N-1).
fn mean_and_population_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

pub fn return_statistics(history: &PriceHistory) -> Result<ReturnStatistics> {
    if history.len() < 2 {
        return Err(SimulationError::insufficient_data(2, history.len()));
    }

    let returns = daily_returns(history);
    let (mean, std) = mean_and_population_std(&returns);
    let stats = ReturnStatistics {
        mean,
        volatility: VolatilityEstimate::new(std)?,
        observations: returns.len(),
    };

    debug!(
        "{}: {} returns, mean={:.6}, volatility={:.6}",
        history.symbol(),
        stats.observations,
        stats.mean,
        std
    );
    Ok(stats)
}

/// Estimates mean-zero daily volatility from a price history.
pub fn estimate(history: &PriceHistory) -> Result<VolatilityEstimate> {
    return_statistics(history).map(|s| s.volatility)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    #[test]
    fn test_daily_returns() {
        let history = PriceHistory::from_closes("TEST", start(), &[100.0, 110.0, 99.0]).unwrap();
        let returns = daily_returns(&history);
        assert_eq!(returns.len(), 2);
        assert!((returns[0] - 0.10).abs() < 1e-12);
        assert!((returns[1] + 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_population_std_not_sample() {
        // returns: +0.10, -0.10 -> mean 0, population std 0.10 (sample std would be ~0.1414)
        let history = PriceHistory::from_closes("TEST", start(), &[100.0, 110.0, 99.0]).unwrap();
        let vol = estimate(&history).unwrap();
        assert!((vol.value() - 0.10).abs() < 1e-12, "got {}", vol.value());
    }

    #[test]
    fn test_rejects_single_observation() {
        let history = PriceHistory::from_closes("TEST", start(), &[100.0]).unwrap();
        assert_eq!(
            estimate(&history).unwrap_err(),
            SimulationError::insufficient_data(2, 1)
        );
    }

    #[test]
    fn test_constant_prices_give_zero_volatility() {
        let history = PriceHistory::from_closes("TEST", start(), &[50.0; 10]).unwrap();
        assert_eq!(estimate(&history).unwrap().value(), 0.0);
    }

    #[test]
    fn test_known_sigma_from_252_closes() {
        // 251 returns alternating +s / -s: 126 ups, 125 downs.
        let s = 0.015;
        let mut closes = vec![100.0];
        for i in 0..251 {
            let r = if i % 2 == 0 { s } else { -s };
            let last = *closes.last().unwrap();
            closes.push(last * (1.0 + r));
        }
        let history = PriceHistory::from_closes("TEST", start(), &closes).unwrap();
        assert_eq!(history.len(), 252);

        let expected = 2.0 * s * (126.0_f64 * 125.0).sqrt() / 251.0;
        let vol = estimate(&history).unwrap();
        assert!(
            (vol.value() - expected).abs() < 1e-12,
            "expected {}, got {}",
            expected,
            vol.value()
        );
    }

    #[test]
    fn test_synthetic_history_recovers_sigma() {
        let sigma = 0.02;
        let history = PriceHistory::synthetic("TEST", 252, sigma, 42).unwrap();
        let vol = estimate(&history).unwrap().value();
        assert!((vol - sigma).abs() / sigma < 0.2, "estimated {} for sigma {}", vol, sigma);
    }

    #[test]
    fn test_annualized() {
        let vol = VolatilityEstimate::new(0.01).unwrap();
        assert!((vol.annualized(252.0) - 0.01 * 252.0_f64.sqrt()).abs() < 1e-15);
        assert!(VolatilityEstimate::new(-0.1).is_err());
        assert!(VolatilityEstimate::new(f64::NAN).is_err());
    }
}
