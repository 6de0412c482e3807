use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{CACHE_DIR, CACHE_TTL_SECS, FETCH_ATTEMPTS};

/// Represents a single candlestick data point (OHLCV).
#[derive(Clone, Debug, PartialEq)]
pub struct Candle {
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Holds historical stock data for a specific symbol.
#[derive(Clone, Debug)]
pub struct StockData {
    pub symbol: String,
    pub history: Vec<Candle>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
    error: Option<YahooError>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooError {
    code: Option<String>,
    description: Option<String>,
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
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

fn yahoo_to_stock_data(symbol: &str, response: &YahooChartResponse) -> Result<StockData> {
    if let Some(err) = &response.chart.error {
        return Err(anyhow::anyhow!(
            "Yahoo returned an error for {}: {} ({})",
            symbol,
            err.description.as_deref().unwrap_or("unknown error"),
            err.code.as_deref().unwrap_or("-")
        ));
    }

    let result = response
        .chart
        .result
        .as_ref()
        .and_then(|r| r.first())
        .ok_or(anyhow::anyhow!("No data found for {}", symbol))?;
    let quotes = result
        .indicators
        .quote
        .first()
        .ok_or(anyhow::anyhow!("No quote result for {}", symbol))?;

    let at = |v: &Vec<Option<f64>>, i: usize| v.get(i).copied().flatten();

    let mut history = Vec::with_capacity(result.timestamp.len());
    for (i, &timestamp) in result.timestamp.iter().enumerate() {
        // Rows without a close are holidays or partial sessions.
        let Some(close) = at(&quotes.close, i) else {
            continue;
        };
        let Some(date) = Utc.timestamp_opt(timestamp, 0).single() else {
            continue;
        };
        history.push(Candle {
            date,
            open: at(&quotes.open, i).unwrap_or(close),
            high: at(&quotes.high, i).unwrap_or(close),
            low: at(&quotes.low, i).unwrap_or(close),
            close,
            volume: at(&quotes.volume, i).unwrap_or(0.0),
        });
    }
    history.sort_by_key(|c| c.date);

    Ok(StockData {
        symbol: symbol.to_uppercase(),
        history,
    })
}

/// Uppercases `symbol` and rejects anything that is not a plain ticker.
///
/// The result is used both as a file name under the cache directory and as a
/// URL path segment, so only `A-Z 0-9 . ^ = -` pass.
pub fn normalize_symbol(symbol: &str) -> Result<String> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(anyhow::anyhow!("stock symbol is empty"));
    }
    if let Some(bad) = symbol
        .chars()
        .find(|c| !(c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '.' | '^' | '=' | '-')))
    {
        return Err(anyhow::anyhow!(
            "invalid stock symbol {:?}: unexpected character {:?}",
            symbol,
            bad
        ));
    }
    Ok(symbol)
}

fn cache_file_for(symbol: &str, from: NaiveDate, to: NaiveDate) -> PathBuf {
    Path::new(CACHE_DIR).join(format!(
        "{}_{}_{}.json",
        symbol,
        from.format("%Y%m%d"),
        to.format("%Y%m%d")
    ))
}

fn read_fresh_cache(cache_file: &Path) -> Option<YahooChartResponse> {
    let modified = std::fs::metadata(cache_file).ok()?.modified().ok()?;
    let age = std::time::SystemTime::now().duration_since(modified).ok()?;
    if age.as_secs() >= CACHE_TTL_SECS {
        debug!("Cache expired: {}", cache_file.display());
        return None;
    }

    let file = std::fs::File::open(cache_file).ok()?;
    match serde_json::from_reader(std::io::BufReader::new(file)) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!("Ignoring unreadable cache {}: {}", cache_file.display(), e);
            None
        }
    }
}

/// Fetches daily candles for `[from, to]` from Yahoo Finance, reusing a recent
/// on-disk copy when one exists.
pub async fn fetch_window(symbol: &str, from: NaiveDate, to: NaiveDate) -> Result<StockData> {
    let symbol = normalize_symbol(symbol)?;
    if from > to {
        return Err(anyhow::anyhow!("invalid data window {} > {}", from, to));
    }

    let cache_dir = Path::new(CACHE_DIR);
    if !cache_dir.exists() {
        std::fs::create_dir_all(cache_dir)
            .with_context(|| format!("cannot create {}", cache_dir.display()))?;
    }

    let cache_file = cache_file_for(&symbol, from, to);
    let response = match read_fresh_cache(&cache_file) {
        Some(cached) => {
            info!("Loading {} {}..{} from cache", symbol, from, to);
            cached
        }
        None => {
            info!("Cache miss for {} {}..{}, fetching...", symbol, from, to);
            fetch_from_api(&symbol, from, to, &cache_file).await?
        }
    };

    let data = yahoo_to_stock_data(&symbol, &response)?;
    let from_ts = start_of_day(from);
    let to_ts = start_of_day(to) + Duration::days(1);
    let history = data
        .history
        .into_iter()
        .filter(|c| c.date >= from_ts && c.date < to_ts)
        .collect();

    Ok(StockData {
        symbol: data.symbol,
        history,
    })
}

async fn fetch_from_api(
    symbol: &str,
    from: NaiveDate,
    to: NaiveDate,
    cache_path: &Path,
) -> Result<YahooChartResponse> {
    // period2 is exclusive on Yahoo's side.
    let url = format!(
        "https://query1.finance.yahoo.com/v8/finance/chart/{}?period1={}&period2={}&interval=1d",
        symbol,
        start_of_day(from).timestamp(),
        (start_of_day(to) + Duration::days(1)).timestamp()
    );

    let client = reqwest::Client::new();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let outcome = match client
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
            Ok(resp_json) => {
                if let Err(e) = write_cache(cache_path, &resp_json) {
                    warn!("Failed to write cache {}: {}", cache_path.display(), e);
                }
                return Ok(resp_json);
            }
            Err(e) => {
                if attempts >= FETCH_ATTEMPTS {
                    return Err(e.context(format!("failed to fetch market data for {}", symbol)));
                }
                warn!(
                    "Failed to fetch data for {} (attempt {}/{}): {}",
                    symbol, attempts, FETCH_ATTEMPTS, e
                );
            }
        }

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    }
}

fn write_cache(cache_path: &Path, response: &YahooChartResponse) -> Result<()> {
    let file = std::fs::File::create(cache_path)?;
    serde_json::to_writer(std::io::BufWriter::new(file), response)?;
    Ok(())
}

pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| Utc.from_utc_datetime(&dt))
        .unwrap_or_default()
}

impl StockData {
    /// Candles dated on or before `as_of`.
    pub fn up_to(&self, as_of: DateTime<Utc>) -> Vec<Candle> {
        self.history
            .iter()
            .filter(|c| c.date <= as_of)
            .cloned()
            .collect()
    }

    pub fn trailing(candles: &[Candle], n: usize) -> &[Candle] {
        &candles[candles.len().saturating_sub(n)..]
    }

    pub fn new_mock(symbol: &str, days: usize) -> Self {
        Self::new_mock_until(symbol, days, Utc::now())
    }

    /// Random-walk weekday candles, the last one dated on or before `end`.
    pub fn new_mock_until(symbol: &str, days: usize, end: DateTime<Utc>) -> Self {
        let mut rng = rand::thread_rng();
        let mut dates = Vec::with_capacity(days);
        let mut cursor = start_of_day(end.date_naive());
        while dates.len() < days {
            if !matches!(cursor.weekday(), Weekday::Sat | Weekday::Sun) {
                dates.push(cursor);
            }
            cursor -= Duration::days(1);
        }
        dates.reverse();

        let mut history = Vec::with_capacity(days);
        let mut current_price: f64 = 100.0;
        for date in dates {
            let volatility = 0.02; // 2% daily volatility
            let change_pct: f64 = rng.gen_range(-volatility..volatility);
            let open = current_price;
            let close = open * (1.0 + change_pct);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
            let volume = rng.gen_range(1000.0..10000.0);

            history.push(Candle {
                date,
                open,
                high,
                low,
                close,
                volume,
            });
            current_price = close;
        }

        Self {
            symbol: symbol.to_uppercase(),
            history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_mock_skips_weekends_and_is_ordered() {
        let end = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap(); // Sunday
        let mock = StockData::new_mock_until("spy", 12, end);
        assert_eq!(mock.symbol, "SPY");
        assert_eq!(mock.history.len(), 12);
        assert!(mock
            .history
            .iter()
            .all(|c| !matches!(c.date.weekday(), Weekday::Sat | Weekday::Sun)));
        assert!(mock.history.windows(2).all(|w| w[0].date < w[1].date));
        assert_eq!(
            mock.history.last().unwrap().date.date_naive(),
            NaiveDate::from_ymd_opt(2024, 3, 8).unwrap()
        );
        assert!(mock.history.iter().all(|c| c.low <= c.close && c.close <= c.high));
    }

    #[test]
    fn test_trailing_and_up_to() {
        let end = Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap();
        let mock = StockData::new_mock_until("SPY", 10, end);
        assert_eq!(StockData::trailing(&mock.history, 3).len(), 3);
        assert_eq!(StockData::trailing(&mock.history, 50).len(), 10);

        let cutoff = mock.history[4].date;
        let upto = mock.up_to(cutoff);
        assert_eq!(upto.len(), 5);
        assert_eq!(upto.last().unwrap().date, cutoff);
    }

    #[test]
    fn test_yahoo_parse_skips_null_closes() {
        let raw = r#"{
            "chart": {
                "result": [{
                    "timestamp": [1709217000, 1709303400, 1709562600],
                    "indicators": {"quote": [{
                        "open": [100.0, null, 102.0],
                        "high": [101.0, null, 103.0],
                        "low": [99.0, null, 101.5],
                        "close": [100.5, null, 102.5],
                        "volume": [1000.0, null, null]
                    }]}
                }],
                "error": null
            }
        }"#;
        let parsed: YahooChartResponse = serde_json::from_str(raw).unwrap();
        let data = yahoo_to_stock_data("aapl", &parsed).unwrap();
        assert_eq!(data.symbol, "AAPL");
        assert_eq!(data.history.len(), 2);
        assert_eq!(data.history[1].close, 102.5);
        assert_eq!(data.history[1].volume, 0.0);
    }

    #[test]
    fn test_yahoo_error_is_reported() {
        let raw = r#"{"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}}"#;
        let parsed: YahooChartResponse = serde_json::from_str(raw).unwrap();
        let err = yahoo_to_stock_data("ZZZZ", &parsed).unwrap_err();
        assert!(err.to_string().contains("delisted"));
    }

    #[test]
    fn test_normalize_symbol_accepts_tickers() {
        assert_eq!(normalize_symbol(" brk.b ").unwrap(), "BRK.B");
        assert_eq!(normalize_symbol("^gspc").unwrap(), "^GSPC");
        assert_eq!(normalize_symbol("EURUSD=X").unwrap(), "EURUSD=X");
        assert_eq!(normalize_symbol("BTC-USD").unwrap(), "BTC-USD");
    }

    #[test]
    fn test_normalize_symbol_rejects_paths_and_query_chars() {
        for bad in ["../../tmp/evil", "a/b", "AAPL?x=1", "AAPL&period1=0", "A B", "C:\\X"] {
            let err = normalize_symbol(bad).unwrap_err();
            assert!(err.to_string().contains("invalid stock symbol"), "{}", bad);
        }
    }

    #[tokio::test]
    async fn test_fetch_window_rejects_traversal_before_touching_disk() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let err = fetch_window("../../TMP/EVIL", day, day).await.unwrap_err();
        assert!(err.to_string().contains("invalid stock symbol"));
    }

    #[tokio::test]
    async fn test_fetch_window_rejects_empty_symbol() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let err = fetch_window("  ", day, day).await.unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
