//! Geometric random-walk price-path simulation.
//!
//! Reproducibility contract, fixed for every run:
//!
//! - Generator: xoshiro256++ whose four state words are the first four
//!   SplitMix64 outputs for the run seed (SplitMix64 state = seed).
//! - Uniforms: `(next_u64 >> 11) * 2^-53`, in `[0, 1)`.
//! - Normals: Box-Muller, cosine branch only. Each draw consumes exactly two
//!   uniforms, `u1 = 1 - U` (so `u1` is in `(0, 1]`) then `u2 = U`.
//! - Order: path-major. Path 0 draws all of its days, then path 1, and so on.
//!
//! [`simulate`] is the reference. [`simulate_parallel`] gives path `j` its own
//! generator, the reference generator advanced by `j` xoshiro jumps (2^128
//! steps each). It is reproducible for a given seed regardless of thread
//! count but produces different numbers than [`simulate`].

use crate::error::{Result, SimulationError};
use crate::estimator::VolatilityEstimate;
use rand::{RngCore, SeedableRng};
use rand_xoshiro::{SplitMix64, Xoshiro256PlusPlus};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use tracing::{debug, info, warn};

/// Immutable configuration of one simulation run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationParameters {
    /// Future trading days per path.
    pub time_horizon_days: usize,
    /// Independent paths.
    pub num_simulations: usize,
    pub seed: u64,
    /// Common starting price of every path.
    pub last_observed_price: f64,
}

impl SimulationParameters {
    pub fn new(
        time_horizon_days: usize,
        num_simulations: usize,
        seed: u64,
        last_observed_price: f64,
    ) -> Result<Self> {
        let params = Self {
            time_horizon_days,
            num_simulations,
            seed,
            last_observed_price,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.time_horizon_days < 1 {
            return Err(SimulationError::invalid_parameters(
                "time_horizon_days must be >= 1",
            ));
        }
        if self.num_simulations < 1 {
            return Err(SimulationError::invalid_parameters(
                "num_simulations must be >= 1",
            ));
        }
        if !self.last_observed_price.is_finite() || self.last_observed_price <= 0.0 {
            return Err(SimulationError::invalid_parameters(format!(
                "last_observed_price must be positive and finite, got {}",
                self.last_observed_price
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulationMode {
    /// Single generator stream, path-major.
    #[default]
    Sequential,
    /// One jumped generator per path, paths filled on the rayon pool.
    Parallel,
}

/// Simulated prices for every path and day of one run.
///
/// Stored path-major: the `time_horizon_days` prices of path 0, then path 1.
/// Read-only once constructed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEnsemble")]
pub struct SimulationEnsemble {
    prices: Vec<f64>,
    params: SimulationParameters,
    volatility: VolatilityEstimate,
}

#[derive(Deserialize)]
struct RawEnsemble {
    prices: Vec<f64>,
    params: SimulationParameters,
    volatility: VolatilityEstimate,
}

impl TryFrom<RawEnsemble> for SimulationEnsemble {
    type Error = SimulationError;

    fn try_from(raw: RawEnsemble) -> Result<Self> {
        raw.params.validate()?;
        let cells = raw
            .params
            .num_simulations
            .checked_mul(raw.params.time_horizon_days);
        if cells != Some(raw.prices.len()) {
            return Err(SimulationError::invalid_parameters(format!(
                "ensemble of {} paths x {} days cannot hold {} prices",
                raw.params.num_simulations,
                raw.params.time_horizon_days,
                raw.prices.len()
            )));
        }
        if let Some(bad) = raw.prices.iter().find(|p| !p.is_finite() || **p <= 0.0) {
            return Err(SimulationError::invalid_parameters(format!(
                "simulated prices must be positive and finite, got {}",
                bad
            )));
        }
        Ok(Self {
            prices: raw.prices,
            params: raw.params,
            volatility: raw.volatility,
        })
    }
}

impl SimulationEnsemble {
    pub fn num_simulations(&self) -> usize {
        self.params.num_simulations
    }

    pub fn time_horizon_days(&self) -> usize {
        self.params.time_horizon_days
    }

    pub fn last_observed_price(&self) -> f64 {
        self.params.last_observed_price
    }

    pub fn volatility(&self) -> VolatilityEstimate {
        self.volatility
    }

    pub fn params(&self) -> &SimulationParameters {
        &self.params
    }

    /// Prices of path `index`, one per simulated day.
    pub fn path(&self, index: usize) -> Option<&[f64]> {
        if index >= self.num_simulations() {
            return None;
        }
        let days = self.time_horizon_days();
        Some(&self.prices[index * days..(index + 1) * days])
    }

    pub fn paths(&self) -> impl Iterator<Item = &[f64]> {
        self.prices.chunks_exact(self.time_horizon_days())
    }

    pub fn price(&self, day: usize, path: usize) -> Option<f64> {
        if day >= self.time_horizon_days() {
            return None;
        }
        self.path(path).map(|p| p[day])
    }

    /// Prices of every path on `day`, in path order.
    pub fn day(&self, day: usize) -> Option<Vec<f64>> {
        if day >= self.time_horizon_days() {
            return None;
        }
        Some(self.paths().map(|p| p[day]).collect())
    }

    /// Prices on the last simulated day, in path order.
    pub fn terminal_prices(&self) -> Vec<f64> {
        self.paths().map(|p| p[p.len() - 1]).collect()
    }
}

/// Reference generator for a run seed.
pub fn seeded_generator(seed: u64) -> Xoshiro256PlusPlus {
    let mut splitmix = SplitMix64::from_seed(seed.to_le_bytes());
    let mut state = [0u8; 32];
    for chunk in state.chunks_exact_mut(8) {
        chunk.copy_from_slice(&splitmix.next_u64().to_le_bytes());
    }
    Xoshiro256PlusPlus::from_seed(state)
}

fn next_uniform<R: RngCore + ?Sized>(rng: &mut R) -> f64 {
    (rng.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

/// Box-Muller standard normal draw. Always consumes two uniforms.
pub fn standard_normal<R: RngCore + ?Sized>(rng: &mut R) -> f64 {
    let u1 = 1.0 - next_uniform(rng);
    let u2 = next_uniform(rng);
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}

/// Walks one path forward from `start`, returning how many steps were clamped.
///
/// A step with `r <= -1` would make the price non-positive; it is clamped to
/// `f64::MIN_POSITIVE`.
fn fill_path<R: RngCore>(path: &mut [f64], start: f64, sigma: f64, rng: &mut R) -> usize {
    let mut price = start;
    let mut clamped = 0;
    for slot in path.iter_mut() {
        let r = sigma * standard_normal(rng);
        price *= 1.0 + r;
        if price <= 0.0 {
            clamped += 1;
            price = f64::MIN_POSITIVE;
        }
        *slot = price;
    }
    clamped
}

fn allocate(params: &SimulationParameters) -> Result<Vec<f64>> {
    let oom = || SimulationError::out_of_memory(params.num_simulations, params.time_horizon_days);
    let cells = params
        .num_simulations
        .checked_mul(params.time_horizon_days)
        .ok_or_else(oom)?;
    let mut prices = Vec::new();
    prices.try_reserve_exact(cells).map_err(|_| oom())?;
    prices.resize(cells, 0.0);
    Ok(prices)
}

fn finish(
    prices: Vec<f64>,
    params: &SimulationParameters,
    volatility: VolatilityEstimate,
    clamped: usize,
) -> SimulationEnsemble {
    if clamped > 0 {
        warn!(
            "{} simulated steps fell to or below zero and were clamped to f64::MIN_POSITIVE",
            clamped
        );
    }
    debug!("Ensemble ready: {} prices", prices.len());
    SimulationEnsemble {
        prices,
        params: *params,
        volatility,
    }
}

/// Simulates `num_simulations` paths of `time_horizon_days` days with daily
/// returns drawn from `Normal(0, volatility)`.
///
/// Same seed and parameters always give a bit-identical ensemble. Zero
/// volatility still consumes the generator in full and yields constant paths.
pub fn simulate(
    volatility: VolatilityEstimate,
    params: &SimulationParameters,
) -> Result<SimulationEnsemble> {
    params.validate()?;
    let mut prices = allocate(params)?;

    info!(
        "Simulating {} paths x {} days (seed={}, volatility={:.6})",
        params.num_simulations,
        params.time_horizon_days,
        params.seed,
        volatility.value()
    );

    let mut rng = seeded_generator(params.seed);
    let mut clamped = 0;
    for path in prices.chunks_exact_mut(params.time_horizon_days) {
        clamped += fill_path(path, params.last_observed_price, volatility.value(), &mut rng);
    }

    Ok(finish(prices, params, volatility, clamped))
}

/// Parallel variant with one jumped generator stream per path.
pub fn simulate_parallel(
    volatility: VolatilityEstimate,
    params: &SimulationParameters,
) -> Result<SimulationEnsemble> {
    params.validate()?;
    let mut prices = allocate(params)?;

    info!(
        "Simulating {} paths x {} days in parallel on {} threads (seed={}, volatility={:.6})",
        params.num_simulations,
        params.time_horizon_days,
        rayon::current_num_threads(),
        params.seed,
        volatility.value()
    );

    let mut base = seeded_generator(params.seed);
    let streams: Vec<Xoshiro256PlusPlus> = (0..params.num_simulations)
        .map(|_| {
            let stream = base.clone();
            base.jump();
            stream
        })
        .collect();

    let clamped: usize = prices
        .par_chunks_mut(params.time_horizon_days)
        .zip(streams.into_par_iter())
        .map(|(path, mut rng)| {
            fill_path(path, params.last_observed_price, volatility.value(), &mut rng)
        })
        .sum();

    Ok(finish(prices, params, volatility, clamped))
}

pub fn simulate_with_mode(
    mode: SimulationMode,
    volatility: VolatilityEstimate,
    params: &SimulationParameters,
) -> Result<SimulationEnsemble> {
    match mode {
        SimulationMode::Sequential => simulate(volatility, params),
        SimulationMode::Parallel => simulate_parallel(volatility, params),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vol(v: f64) -> VolatilityEstimate {
        VolatilityEstimate::new(v).unwrap()
    }

    fn params(days: usize, paths: usize, seed: u64) -> SimulationParameters {
        SimulationParameters::new(days, paths, seed, 100.0).unwrap()
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-12 * expected.abs(),
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_parameter_validation() {
        assert!(matches!(
            SimulationParameters::new(0, 10, 1, 100.0),
            Err(SimulationError::InvalidParameters { .. })
        ));
        assert!(matches!(
            SimulationParameters::new(10, 0, 1, 100.0),
            Err(SimulationError::InvalidParameters { .. })
        ));
        assert!(matches!(
            SimulationParameters::new(10, 10, 1, 0.0),
            Err(SimulationError::InvalidParameters { .. })
        ));
        assert!(matches!(
            SimulationParameters::new(10, 10, 1, f64::NAN),
            Err(SimulationError::InvalidParameters { .. })
        ));

        let bad = SimulationParameters {
            time_horizon_days: 5,
            num_simulations: 5,
            seed: 1,
            last_observed_price: -3.0,
        };
        assert!(matches!(
            simulate(vol(0.01), &bad),
            Err(SimulationError::InvalidParameters { .. })
        ));
    }

    #[test]
    fn test_generator_state_from_seed() {
        // First xoshiro256++ output for state words [1, 2, 3, 4].
        let mut state = [0u8; 32];
        for (i, chunk) in state.chunks_exact_mut(8).enumerate() {
            chunk.copy_from_slice(&(i as u64 + 1).to_le_bytes());
        }
        let mut rng = Xoshiro256PlusPlus::from_seed(state);
        assert_eq!(rng.next_u64(), 41943041);
        assert_eq!(rng.next_u64(), 58720359);

        // SplitMix64 reference output for state 1234567.
        let mut splitmix = SplitMix64::from_seed(1234567u64.to_le_bytes());
        assert_eq!(splitmix.next_u64(), 6457827717110365317);
    }

    #[test]
    fn test_pinned_output_for_seed_1024() {
        let ensemble = simulate(vol(0.02), &params(3, 2, 1024)).unwrap();
        let expected = [
            [101.86846802242728, 99.01291159702079, 103.34733907619919],
            [96.6085651836432, 96.5775959382521, 99.15025393379496],
        ];
        for (path, want) in ensemble.paths().zip(expected.iter()) {
            for (&got, &want) in path.iter().zip(want.iter()) {
                assert_close(got, want);
            }
        }
    }

    #[test]
    fn test_pinned_parallel_output_for_seed_1024() {
        let ensemble = simulate_parallel(vol(0.02), &params(3, 2, 1024)).unwrap();
        let expected = [
            [101.86846802242728, 99.01291159702079, 103.34733907619919],
            [99.28613655268147, 97.05793960542842, 97.29516953890113],
        ];
        for (path, want) in ensemble.paths().zip(expected.iter()) {
            for (&got, &want) in path.iter().zip(want.iter()) {
                assert_close(got, want);
            }
        }
    }

    #[test]
    fn test_deterministic_for_same_seed() {
        let p = params(30, 200, 1024);
        let a = simulate(vol(0.015), &p).unwrap();
        let b = simulate(vol(0.015), &p).unwrap();
        assert_eq!(a, b);

        let c = simulate(vol(0.015), &params(30, 200, 1025)).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_parallel_deterministic() {
        let p = params(20, 300, 7);
        let a = simulate_parallel(vol(0.02), &p).unwrap();
        let b = simulate_parallel(vol(0.02), &p).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_path_major_draw_order() {
        // Path 1 of a 2x3 run consumes draws 3..6, the same draws as days 3..6
        // of a single 6-day path. Compare the implied returns.
        let split = simulate(vol(0.02), &params(3, 2, 99)).unwrap();
        let long = simulate(vol(0.02), &params(6, 1, 99)).unwrap();

        let long_path = long.path(0).unwrap();
        let second = split.path(1).unwrap();

        let long_returns: Vec<f64> = (3..6).map(|t| long_path[t] / long_path[t - 1] - 1.0).collect();
        let mut prev = 100.0;
        for (day, &price) in second.iter().enumerate() {
            let r = price / prev - 1.0;
            assert!((r - long_returns[day]).abs() < 1e-12);
            prev = price;
        }

        assert_eq!(split.path(0).unwrap(), &long_path[..3]);
    }

    #[test]
    fn test_shape_and_positivity() {
        let ensemble = simulate(vol(0.03), &params(45, 120, 3)).unwrap();
        assert_eq!(ensemble.num_simulations(), 120);
        assert_eq!(ensemble.time_horizon_days(), 45);
        assert_eq!(ensemble.paths().count(), 120);
        assert!(ensemble.paths().all(|p| p.len() == 45));
        assert!(ensemble.paths().flatten().all(|&v| v.is_finite() && v > 0.0));
        assert_eq!(ensemble.terminal_prices().len(), 120);
        assert_eq!(ensemble.day(44).unwrap(), ensemble.terminal_prices());
        assert!(ensemble.day(45).is_none());
        assert!(ensemble.path(120).is_none());
        assert_eq!(ensemble.price(0, 0), Some(ensemble.path(0).unwrap()[0]));
    }

    #[test]
    fn test_zero_volatility_constant_paths() {
        let ensemble = simulate(vol(0.0), &params(10, 25, 1024)).unwrap();
        assert!(ensemble.paths().flatten().all(|&v| v == 100.0));

        let parallel = simulate_parallel(vol(0.0), &params(10, 25, 1024)).unwrap();
        assert!(parallel.paths().flatten().all(|&v| v == 100.0));
    }

    #[test]
    fn test_extreme_volatility_is_clamped_positive() {
        let ensemble = simulate(vol(5.0), &params(20, 50, 11)).unwrap();
        assert!(ensemble.paths().flatten().all(|&v| v > 0.0));
    }

    #[test]
    fn test_out_of_memory_instead_of_partial() {
        let overflow = SimulationParameters {
            time_horizon_days: 3,
            num_simulations: usize::MAX / 2,
            seed: 1,
            last_observed_price: 100.0,
        };
        assert_eq!(
            simulate(vol(0.01), &overflow).unwrap_err(),
            SimulationError::out_of_memory(usize::MAX / 2, 3)
        );

        let too_large = SimulationParameters {
            time_horizon_days: 1 << 20,
            num_simulations: 1 << 40,
            seed: 1,
            last_observed_price: 100.0,
        };
        assert!(matches!(
            simulate_parallel(vol(0.01), &too_large),
            Err(SimulationError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn test_deserialize_rejects_inconsistent_ensemble() {
        let zero_days = r#"{"prices":[1.0,2.0],"params":{"time_horizon_days":0,
            "num_simulations":2,"seed":1,"last_observed_price":100.0},"volatility":0.01}"#;
        assert!(serde_json::from_str::<SimulationEnsemble>(zero_days).is_err());

        let short = r#"{"prices":[1.0,2.0],"params":{"time_horizon_days":2,
            "num_simulations":5,"seed":1,"last_observed_price":100.0},"volatility":0.01}"#;
        let err = serde_json::from_str::<SimulationEnsemble>(short).unwrap_err();
        assert!(err.to_string().contains("cannot hold 2 prices"), "{}", err);

        let negative_vol = r#"{"prices":[1.0,2.0],"params":{"time_horizon_days":2,
            "num_simulations":1,"seed":1,"last_observed_price":100.0},"volatility":-0.5}"#;
        assert!(serde_json::from_str::<SimulationEnsemble>(negative_vol).is_err());

        let ensemble = simulate(vol(0.02), &params(4, 3, 8)).unwrap();
        let json = serde_json::to_string(&ensemble).unwrap();
        let restored: SimulationEnsemble = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.params(), ensemble.params());
        for (&got, &want) in restored.paths().flatten().zip(ensemble.paths().flatten()) {
            assert_close(got, want);
        }
    }

    #[test]
    fn test_mode_dispatch() {
        let p = params(5, 4, 2);
        assert_eq!(
            simulate_with_mode(SimulationMode::Sequential, vol(0.01), &p).unwrap(),
            simulate(vol(0.01), &p).unwrap()
        );
        assert_eq!(
            simulate_with_mode(SimulationMode::Parallel, vol(0.01), &p).unwrap(),
            simulate_parallel(vol(0.01), &p).unwrap()
        );
    }
}
