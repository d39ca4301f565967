//! Monte Carlo price-path simulation and Value-at-Risk for a single stock.
//!
//! The pipeline is strictly sequential:
//!
//! 1. a [`data::HistoryLoader`] supplies daily closes,
//! 2. [`estimator::estimate`] derives mean-zero daily volatility,
//! 3. [`simulator::simulate`] generates the path ensemble,
//! 4. [`risk::summarize`] reduces the terminal prices to a VaR report.
//!
//! ```no_run
//! use montestock::data::PriceHistory;
//! use montestock::pipeline::MonteCarlo;
//!
//! let history = PriceHistory::synthetic("MSFT", 252, 0.015, 7)?;
//! let mut mc = MonteCarlo::new(history, 30, 1000, 1024)?;
//! mc.run_simulation()?;
//! println!("{}", mc.value_at_risk()?);
//! # Ok::<(), montestock::error::SimulationError>(())
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod estimator;
pub mod pipeline;
pub mod risk;
pub mod simulator;

pub mod prelude {
    pub use crate::data::{HistoryLoader, MockHistoryLoader, PriceHistory, PricePoint, YahooHistoryLoader};
    pub use crate::error::{Result, SimulationError};
    pub use crate::estimator::{VolatilityEstimate, daily_returns, estimate};
    pub use crate::pipeline::{Analysis, AnalysisRequest, MonteCarlo, run_analysis};
    pub use crate::risk::{Histogram, PercentileBand, RiskReport, percentile, percentile_bands, summarize};
    pub use crate::simulator::{
        SimulationEnsemble, SimulationMode, SimulationParameters, simulate, simulate_parallel,
    };
}
