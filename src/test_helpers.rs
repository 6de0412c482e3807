//! Stub predictor and fixtures shared by the unit tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::data::Candle;
use crate::predictor::{BacktestRecord, Predictor, Query};

pub fn day(year: i32, month: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, d, 0, 0, 0).unwrap()
}

fn weekdays_from(start: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
    let mut out = Vec::with_capacity(n);
    let mut cursor = start;
    while out.len() < n {
        if !matches!(cursor.weekday(), Weekday::Sat | Weekday::Sun) {
            out.push(cursor);
        }
        cursor += Duration::days(1);
    }
    out
}

/// `n` weekday candles starting 2024-03-01, closes rising by 0.5 and ending at `last_close`.
pub fn history_ending_at(n: usize, last_close: f64) -> Vec<Candle> {
    weekdays_from(day(2024, 3, 1), n)
        .into_iter()
        .enumerate()
        .map(|(i, date)| {
            let close = last_close - 0.5 * (n - 1 - i) as f64;
            Candle {
                date,
                open: close - 0.25,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000.0,
            }
        })
        .collect()
}

/// Records on consecutive weekdays from 2024-03-01.
pub fn records_from(actual: &[f64], predicted: &[f64]) -> Vec<BacktestRecord> {
    weekdays_from(day(2024, 3, 1), actual.len())
        .into_iter()
        .zip(actual.iter().zip(predicted))
        .map(|(date, (a, p))| BacktestRecord::new(date, *a, *p))
        .collect()
}

/// Predictor with canned answers and call counters.
pub struct StubPredictor {
    pub prediction: Result<f64, String>,
    pub history: Result<Vec<Candle>, String>,
    pub backtest: Result<Vec<BacktestRecord>, String>,
    pub predict_calls: AtomicUsize,
    pub backtest_calls: AtomicUsize,
    pub last_query: Mutex<Option<Query>>,
}

impl Default for StubPredictor {
    fn default() -> Self {
        Self {
            prediction: Ok(100.0),
            history: Ok(Vec::new()),
            backtest: Ok(Vec::new()),
            predict_calls: AtomicUsize::new(0),
            backtest_calls: AtomicUsize::new(0),
            last_query: Mutex::new(None),
        }
    }
}

impl StubPredictor {
    pub fn predict_calls(&self) -> usize {
        self.predict_calls.load(Ordering::SeqCst)
    }

    pub fn backtest_calls(&self) -> usize {
        self.backtest_calls.load(Ordering::SeqCst)
    }

    pub fn last_query(&self) -> Option<Query> {
        self.last_query.lock().unwrap().clone()
    }

    fn remember(&self, query: &Query) {
        *self.last_query.lock().unwrap() = Some(query.clone());
    }
}

#[async_trait]
impl Predictor for StubPredictor {
    fn name(&self) -> &str {
        "Stub"
    }

    async fn predict_next_day(&self, query: &Query, _verbose: bool) -> Result<f64> {
        self.predict_calls.fetch_add(1, Ordering::SeqCst);
        self.remember(query);
        self.prediction.clone().map_err(|e| anyhow::anyhow!(e))
    }

    async fn historical_data(&self, query: &Query, _as_of: DateTime<Utc>) -> Result<Vec<Candle>> {
        self.remember(query);
        self.history.clone().map_err(|e| anyhow::anyhow!(e))
    }

    async fn backtest(
        &self,
        query: &Query,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _verbose: bool,
    ) -> Result<Vec<BacktestRecord>> {
        self.backtest_calls.fetch_add(1, Ordering::SeqCst);
        self.remember(query);
        self.backtest.clone().map_err(|e| anyhow::anyhow!(e))
    }
}
