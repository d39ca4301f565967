use crate::config::{self, CACHE_TTL_SECS, FETCH_RETRY_DELAY_SECS};
use crate::error::{Result as SimResult, SimulationError};
use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A single daily close.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Ordered daily closing prices for one symbol.
///
/// Construction enforces the invariants the estimator relies on: at least one
/// observation, strictly increasing dates, finite positive closes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPriceHistory")]
pub struct PriceHistory {
    symbol: String,
    points: Vec<PricePoint>,
}

#[derive(Deserialize)]
struct RawPriceHistory {
    symbol: String,
    points: Vec<PricePoint>,
}

impl TryFrom<RawPriceHistory> for PriceHistory {
    type Error = SimulationError;

    fn try_from(raw: RawPriceHistory) -> SimResult<Self> {
        Self::new(raw.symbol, raw.points)
    }
}

impl PriceHistory {
    pub fn new(symbol: impl Into<String>, points: Vec<PricePoint>) -> SimResult<Self> {
        if points.is_empty() {
            return Err(SimulationError::insufficient_data(1, 0));
        }

        for (i, point) in points.iter().enumerate() {
            if !point.close.is_finite() || point.close <= 0.0 {
                return Err(SimulationError::invalid_history(format!(
                    "close at {} must be positive and finite, got {}",
                    point.date, point.close
                )));
            }
            if i > 0 && point.date <= points[i - 1].date {
                return Err(SimulationError::invalid_history(format!(
                    "dates must be strictly increasing: {} follows {}",
                    point.date,
                    points[i - 1].date
                )));
            }
        }

        Ok(Self {
            symbol: symbol.into(),
            points,
        })
    }

    /// Builds a history from bare closes on consecutive business days.
    pub fn from_closes(symbol: impl Into<String>, start: NaiveDate, closes: &[f64]) -> SimResult<Self> {
        let points = business_days(start)
            .zip(closes.iter())
            .map(|(date, &close)| PricePoint { date, close })
            .collect();
        Self::new(symbol, points)
    }

    /// Seeded synthetic history: `days` closes starting at 100.0 whose simple
    /// daily returns are drawn from `Normal(0, sigma)`.
    pub fn synthetic(symbol: &str, days: usize, sigma: f64, seed: u64) -> SimResult<Self> {
        let normal = Normal::new(0.0, sigma)
            .map_err(|e| SimulationError::invalid_parameters(format!("synthetic sigma: {}", e)))?;
        let mut rng = StdRng::seed_from_u64(seed);

        let mut closes = Vec::with_capacity(days);
        let mut price = 100.0_f64;
        for _ in 0..days {
            closes.push(price);
            let change: f64 = normal.sample(&mut rng);
            price = (price * (1.0 + change)).max(0.01);
        }

        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap_or_default();
        Self::from_closes(symbol, start, &closes)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn closes(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.close)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Most recent close, the common starting point of every simulated path.
    pub fn last_close(&self) -> f64 {
        // Non-empty by construction.
        self.points[self.points.len() - 1].close
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }
}

fn business_days(start: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    std::iter::successors(Some(start), |d| d.succ_opt())
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
}

/// Source of daily closing prices for `[start, end)`.
///
/// Implementations return closes in ascending date order. Retry policy, if
/// any, lives here rather than in the simulation core.
#[allow(async_fn_in_trait)]
pub trait HistoryLoader {
    async fn load(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceHistory>;
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooQuote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

/// Daily history from the Yahoo Finance chart API, cached on disk for a day.
#[derive(Clone, Debug)]
pub struct YahooHistoryLoader {
    client: reqwest::Client,
    cache_dir: PathBuf,
    max_attempts: usize,
}

impl Default for YahooHistoryLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl YahooHistoryLoader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            cache_dir: config::cache_dir(),
            max_attempts: config::fetch_attempts(),
        }
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    async fn fetch_chart(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<YahooChartResponse> {
        if !self.cache_dir.exists() {
            std::fs::create_dir_all(&self.cache_dir)?;
        }
        let cache_file = self
            .cache_dir
            .join(format!("{}_{}_{}.json", symbol, start.format("%Y%m%d"), end.format("%Y%m%d")));

        if cache_file.exists() {
            let metadata = std::fs::metadata(&cache_file)?;
            let age = std::time::SystemTime::now().duration_since(metadata.modified()?)?;
            if age.as_secs() < CACHE_TTL_SECS {
                info!("Loading {} from cache...", symbol);
                let file = std::fs::File::open(&cache_file)?;
                let reader = std::io::BufReader::new(file);
                return Ok(serde_json::from_reader(reader)?);
            }
            info!("Cache expired for {}, fetching...", symbol);
        } else {
            info!("Cache miss for {}, fetching...", symbol);
        }

        self.fetch_from_api(symbol, start, end, &cache_file).await
    }

    async fn fetch_from_api(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        cache_path: &Path,
    ) -> Result<YahooChartResponse> {
        let url = format!(
            "https://query1.finance.yahoo.com/v8/finance/chart/{}?period1={}&period2={}&interval=1d",
            symbol,
            day_start_timestamp(start),
            day_start_timestamp(end)
        );

        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = match self
                .client
                .get(&url)
                .header("User-Agent", "Mozilla/5.0")
                .timeout(std::time::Duration::from_secs(15))
                .send()
                .await
            {
                Ok(resp) => resp.json::<YahooChartResponse>().await.map_err(anyhow::Error::from),
                Err(e) => Err(e.into()),
            };

            match outcome {
                Ok(parsed) => {
                    let file = std::fs::File::create(cache_path)?;
                    let writer = std::io::BufWriter::new(file);
                    serde_json::to_writer(writer, &parsed)?;
                    return Ok(parsed);
                }
                Err(e) if attempts >= self.max_attempts => return Err(e),
                Err(e) => {
                    warn!(
                        "Failed to fetch history for {} (attempt {}/{}): {}",
                        symbol, attempts, self.max_attempts, e
                    );
                }
            }

            tokio::time::sleep(std::time::Duration::from_secs(FETCH_RETRY_DELAY_SECS)).await;
        }
    }
}

fn day_start_timestamp(date: NaiveDate) -> i64 {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)).timestamp()
}

impl HistoryLoader for YahooHistoryLoader {
    async fn load(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceHistory> {
        if start >= end {
            anyhow::bail!("start date {} must precede end date {}", start, end);
        }
        let symbol = symbol.trim().to_uppercase();
        let response = self.fetch_chart(&symbol, start, end).await?;
        let points = chart_to_points(&response);
        info!("Loaded {} daily closes for {}", points.len(), symbol);
        Ok(PriceHistory::new(symbol, points)?)
    }
}

/// Converts chart rows into ordered points, skipping null closes. A repeated
/// date keeps the later quote.
fn chart_to_points(response: &YahooChartResponse) -> Vec<PricePoint> {
    let Some(result) = response.chart.result.as_ref().and_then(|r| r.first()) else {
        return Vec::new();
    };
    let Some(quote) = result.indicators.quote.first() else {
        return Vec::new();
    };

    let mut points: Vec<PricePoint> = Vec::with_capacity(result.timestamp.len());
    for (i, &timestamp) in result.timestamp.iter().enumerate() {
        let Some(Some(close)) = quote.close.get(i).copied() else {
            continue;
        };
        let Some(date) = Utc.timestamp_opt(timestamp, 0).single().map(|dt| dt.date_naive()) else {
            continue;
        };

        match points.last().map(|p| p.date) {
            Some(prev) if prev == date => {
                debug!("Duplicate row for {}, keeping latest close", date);
                if let Some(last) = points.last_mut() {
                    last.close = close;
                }
            }
            Some(prev) if prev > date => continue,
            _ => points.push(PricePoint { date, close }),
        }
    }
    points
}

/// In-memory loader keyed by symbol; filters stored history to the requested window.
#[derive(Clone, Debug, Default)]
pub struct MockHistoryLoader {
    histories: HashMap<String, PriceHistory>,
}

impl MockHistoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(mut self, history: PriceHistory) -> Self {
        self.histories.insert(history.symbol().to_uppercase(), history);
        self
    }

    /// A loader serving `days` synthetic closes ending just before today.
    pub fn synthetic(symbol: &str, days: usize, sigma: f64, seed: u64) -> SimResult<Self> {
        let base = PriceHistory::synthetic(symbol, days, sigma, seed)?;
        let today = Utc::now().date_naive();
        let closes: Vec<f64> = base.closes().collect();
        let start = today - Duration::days(((days as i64) * 7 / 5) + 7);
        let history = PriceHistory::from_closes(symbol, start, &closes)?;
        Ok(Self::new().with_history(history))
    }
}

impl HistoryLoader for MockHistoryLoader {
    async fn load(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceHistory> {
        let key = symbol.trim().to_uppercase();
        let history = self
            .histories
            .get(&key)
            .ok_or_else(|| anyhow::anyhow!("No mock history registered for {}", key))?;

        let points: Vec<PricePoint> = history
            .points()
            .iter()
            .filter(|p| p.date >= start && p.date < end)
            .copied()
            .collect();
        Ok(PriceHistory::new(key, points)?)
    }
}
