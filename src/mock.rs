use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::DAYS_MAX;
use crate::data::{Candle, StockData};
use crate::predictor::{BacktestRecord, Predictor, Query};

/// Trading days generated per symbol; covers the longest lookback plus a year of backtest.
const MOCK_SERIES_LEN: usize = DAYS_MAX as usize + 260;

/// Offline predictor for `--demo`: synthetic random-walk prices and a drift
/// forecast (last close extended by the mean daily return of the lookback window).
pub struct MockPredictor {
    series: RwLock<HashMap<String, StockData>>,
}

impl MockPredictor {
    pub fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
        }
    }

    async fn series_for(&self, symbol: &str) -> Result<StockData> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(anyhow::anyhow!("stock symbol is empty"));
        }

        if let Some(data) = self.series.read().await.get(&symbol) {
            return Ok(data.clone());
        }

        let data = StockData::new_mock(&symbol, MOCK_SERIES_LEN);
        debug!("Generated {} mock candles for {}", data.history.len(), symbol);
        self.series.write().await.insert(symbol, data.clone());
        Ok(data)
    }
}

impl Default for MockPredictor {
    fn default() -> Self {
        Self::new()
    }
}

pub fn drift_forecast(context: &[Candle]) -> Option<f64> {
    let last = context.last()?.close;
    if context.len() < 2 {
        return None;
    }
    let returns: Vec<f64> = context
        .windows(2)
        .map(|w| w[1].close / w[0].close - 1.0)
        .collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    Some(last * (1.0 + mean))
}

#[async_trait]
impl Predictor for MockPredictor {
    fn name(&self) -> &str {
        "Demo"
    }

    async fn predict_next_day(&self, query: &Query, verbose: bool) -> Result<f64> {
        let history = self.historical_data(query, Utc::now()).await?;
        let prediction = drift_forecast(&history)
            .ok_or(anyhow::anyhow!("not enough history for {}", query.symbol))?;
        if verbose {
            info!("{} (demo): predicted next close {:.2}", query.symbol, prediction);
        } else {
            debug!("{} (demo): predicted next close {:.2}", query.symbol, prediction);
        }
        Ok(prediction)
    }

    async fn historical_data(&self, query: &Query, as_of: DateTime<Utc>) -> Result<Vec<Candle>> {
        let data = self.series_for(&query.symbol).await?;
        let candles = data.up_to(as_of);
        Ok(StockData::trailing(&candles, query.days as usize).to_vec())
    }

    async fn backtest(
        &self,
        query: &Query,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        verbose: bool,
    ) -> Result<Vec<BacktestRecord>> {
        let data = self.series_for(&query.symbol).await?;
        let (first, last) = (start.date_naive(), end.date_naive());
        let lookback = query.days as usize;

        let records: Vec<BacktestRecord> = data
            .history
            .iter()
            .enumerate()
            .filter(|(_, c)| (first..=last).contains(&c.date.date_naive()))
            .filter_map(|(i, candle)| {
                let context = &data.history[i.saturating_sub(lookback)..i];
                drift_forecast(context).map(|p| BacktestRecord::new(candle.date, candle.close, p))
            })
            .collect();

        if verbose {
            info!(
                "{} (demo): backtest {}..{} produced {} records",
                query.symbol,
                first,
                last,
                records.len()
            );
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{day, history_ending_at};

    #[test]
    fn test_drift_forecast_extends_trend() {
        let mut history = history_ending_at(3, 102.0);
        history[0].close = 100.0;
        history[1].close = 101.0;
        let forecast = drift_forecast(&history).unwrap();
        assert!(forecast > 102.0);
        assert!(drift_forecast(&history[..1]).is_none());
    }

    #[tokio::test]
    async fn test_mock_history_respects_days() {
        let predictor = MockPredictor::new();
        let query = Query { symbol: "demo".to_string(), days: 30 };
        let history = predictor.historical_data(&query, Utc::now()).await.unwrap();
        assert_eq!(history.len(), 30);

        // Same series on every call for a given symbol.
        let again = predictor.historical_data(&query, Utc::now()).await.unwrap();
        assert_eq!(history, again);
    }

    #[tokio::test]
    async fn test_mock_backtest_stays_in_range() {
        let predictor = MockPredictor::new();
        let query = Query { symbol: "DEMO".to_string(), days: 10 };
        let end = Utc::now();
        let start = end - chrono::Duration::days(20);
        let records = predictor.backtest(&query, start, end, false).await.unwrap();
        assert!(!records.is_empty());
        assert!(records
            .iter()
            .all(|r| r.date.date_naive() >= start.date_naive() && r.date.date_naive() <= end.date_naive()));
    }

    #[tokio::test]
    async fn test_mock_backtest_before_series_is_empty() {
        let predictor = MockPredictor::new();
        let query = Query { symbol: "DEMO".to_string(), days: 10 };
        let records = predictor
            .backtest(&query, day(1990, 1, 1), day(1990, 2, 1), true)
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_mock_rejects_empty_symbol() {
        let predictor = MockPredictor::new();
        let query = Query { symbol: " ".to_string(), days: 10 };
        assert!(predictor.predict_next_day(&query, false).await.is_err());
    }
}
