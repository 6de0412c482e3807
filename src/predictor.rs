use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::Config;
use crate::data::Candle;
use crate::llm::GeminiPredictor;
use crate::mock::MockPredictor;

/// Symbol and lookback window for a single predictor call.
///
/// Passed explicitly on every call so edits made in the control panel are
/// always observed by a predictor that was constructed once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    pub symbol: String,
    pub days: u32,
}

/// One replayed trading day of a backtest.
#[derive(Clone, Debug, PartialEq)]
pub struct BacktestRecord {
    pub date: DateTime<Utc>,
    pub actual: f64,
    pub predicted: f64,
    pub error: f64,
    pub pct_error: f64,
}

impl BacktestRecord {
    /// `error = actual - predicted`, `pct_error = 100 * error / actual`.
    pub fn new(date: DateTime<Utc>, actual: f64, predicted: f64) -> Self {
        let error = actual - predicted;
        let pct_error = if actual != 0.0 { 100.0 * error / actual } else { 0.0 };
        Self {
            date,
            actual,
            predicted,
            error,
            pct_error,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeriesStyle {
    Primary,
    Secondary,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Series {
    pub name: String,
    pub style: SeriesStyle,
    /// `(unix seconds, price)`
    pub points: Vec<(f64, f64)>,
}

/// Front-end independent description of a line chart.
#[derive(Clone, Debug, PartialEq)]
pub struct ChartSpec {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub series: Vec<Series>,
}

impl ChartSpec {
    pub fn x_bounds(&self) -> Option<(f64, f64)> {
        bounds(self.series.iter().flat_map(|s| s.points.iter().map(|p| p.0)))
    }

    pub fn y_bounds(&self) -> Option<(f64, f64)> {
        bounds(self.series.iter().flat_map(|s| s.points.iter().map(|p| p.1)))
    }

    pub fn is_empty(&self) -> bool {
        self.series.iter().all(|s| s.points.is_empty())
    }
}

fn bounds(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// The forecasting collaborator behind the dashboard.
///
/// Implementations own data retrieval, model invocation and chart shaping.
/// Every fallible call surfaces its failure as an error; the dashboard decides
/// how far that failure propagates.
#[async_trait]
pub trait Predictor: Send + Sync {
    fn name(&self) -> &str;

    async fn predict_next_day(&self, query: &Query, verbose: bool) -> Result<f64>;

    /// Up to `query.days` daily candles on or before `as_of`, oldest first.
    async fn historical_data(&self, query: &Query, as_of: DateTime<Utc>) -> Result<Vec<Candle>>;

    /// Replays every trading day in `[start, end]` (compared by calendar date).
    async fn backtest(
        &self,
        query: &Query,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        verbose: bool,
    ) -> Result<Vec<BacktestRecord>>;

    fn plot_history(&self, history: &[Candle]) -> ChartSpec {
        ChartSpec {
            title: "Price History".to_string(),
            x_label: "Date".to_string(),
            y_label: "Close".to_string(),
            series: vec![Series {
                name: "Close".to_string(),
                style: SeriesStyle::Primary,
                points: history
                    .iter()
                    .map(|c| (c.date.timestamp() as f64, c.close))
                    .collect(),
            }],
        }
    }

    fn plot_results(&self, results: &[BacktestRecord]) -> ChartSpec {
        let mut ordered: Vec<&BacktestRecord> = results.iter().collect();
        ordered.sort_by_key(|r| r.date);

        ChartSpec {
            title: "Actual vs Predicted".to_string(),
            x_label: "Date".to_string(),
            y_label: "Price".to_string(),
            series: vec![
                Series {
                    name: "Actual".to_string(),
                    style: SeriesStyle::Primary,
                    points: ordered
                        .iter()
                        .map(|r| (r.date.timestamp() as f64, r.actual))
                        .collect(),
                },
                Series {
                    name: "Predicted".to_string(),
                    style: SeriesStyle::Secondary,
                    points: ordered
                        .iter()
                        .map(|r| (r.date.timestamp() as f64, r.predicted))
                        .collect(),
                },
            ],
        }
    }
}

/// Builds the process-wide predictor handle.
pub fn init_predictor(config: &Config, demo: bool) -> Result<Arc<dyn Predictor>> {
    if demo {
        return Ok(Arc::new(MockPredictor::new()));
    }
    Ok(Arc::new(GeminiPredictor::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{StubPredictor, day};

    #[test]
    fn test_backtest_record_derives_errors() {
        let r = BacktestRecord::new(day(2024, 3, 1), 102.0, 101.0);
        assert_eq!(r.error, 1.0);
        assert!((r.pct_error - 100.0 / 102.0).abs() < 1e-12);

        let over = BacktestRecord::new(day(2024, 3, 4), 103.0, 104.0);
        assert_eq!(over.error, -1.0);
        assert!(over.pct_error < 0.0);
    }

    #[test]
    fn test_backtest_record_zero_actual_has_zero_pct() {
        let r = BacktestRecord::new(day(2024, 3, 1), 0.0, 1.0);
        assert_eq!(r.pct_error, 0.0);
    }

    #[test]
    fn test_plot_results_orders_series_by_date() {
        let stub = StubPredictor::default();
        let results = vec![
            BacktestRecord::new(day(2024, 3, 5), 104.0, 103.0),
            BacktestRecord::new(day(2024, 3, 1), 100.0, 99.0),
        ];
        let chart = stub.plot_results(&results);
        assert_eq!(chart.series.len(), 2);
        assert_eq!(chart.series[0].points[0].1, 100.0);
        assert_eq!(chart.series[1].points[1].1, 103.0);
        assert_eq!(chart.y_bounds(), Some((99.0, 104.0)));
    }

    #[test]
    fn test_empty_chart_has_no_bounds() {
        let stub = StubPredictor::default();
        let chart = stub.plot_history(&[]);
        assert!(chart.is_empty());
        assert_eq!(chart.x_bounds(), None);
    }
}
