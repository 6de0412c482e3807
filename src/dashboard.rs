//! Dashboard state and the view models rendered by every front end.
//!
//! A widget change becomes a [`ControlChange`]; [`Dashboard::apply`] routes it
//! through the config setters and answers with the sections that must be
//! rebuilt. Section builders never fail: predictor errors are folded into the
//! section's own `Failed` state so the rest of the page keeps rendering.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{Config, DEFAULT_BACKTEST_LOOKBACK_DAYS};
use crate::data::{StockData, start_of_day};
use crate::metrics::{BacktestMetrics, format_percent};
use crate::predictor::{BacktestRecord, ChartSpec, Predictor, Query};

pub const APP_TITLE: &str = "FinSight : An LLM Powered Financial Forecasting Agent";
pub const APP_SUBTITLE: &str = "Using Gemini AI for stock price predictions";
pub const PREDICTION_HEADER: &str = "Next Trading Day Prediction";
pub const BACKTEST_HEADER: &str = "Backtesting Performance";
pub const METRICS_HEADER: &str = "Model Performance Metrics";
pub const PERFORMANCE_HEADER: &str = "Prediction Performance";
pub const DETAILS_HEADER: &str = "View Detailed Results";
pub const PREDICTION_LOADING: &str = "Generating prediction...";
pub const INVALID_RANGE_WARNING: &str = "End date must be after start date";
pub const EMPTY_BACKTEST_WARNING: &str = "No valid predictions were generated during backtest";
pub const DISCLAIMER: [&str; 4] = [
    "Note:",
    "- Predictions are AI-generated estimates",
    "- Not financial advice",
    "- Results may vary based on market conditions",
];

/// Values held by the control panel besides the symbol and lookback window,
/// which live on [`Config`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Controls {
    pub backtest_start: NaiveDate,
    pub backtest_end: NaiveDate,
    pub predict_next: bool,
    pub run_backtest: bool,
    /// Kept for parity with the control layout; no section reads it.
    pub show_raw_data: bool,
}

impl Controls {
    pub fn with_defaults(today: NaiveDate) -> Self {
        Self {
            backtest_start: today - Duration::days(DEFAULT_BACKTEST_LOOKBACK_DAYS),
            backtest_end: today,
            predict_next: true,
            run_backtest: false,
            show_raw_data: false,
        }
    }

    pub fn backtest_gate(&self) -> BacktestGate {
        if !self.run_backtest {
            BacktestGate::Disabled
        } else if self.backtest_start >= self.backtest_end {
            BacktestGate::InvalidRange
        } else {
            BacktestGate::Run {
                start: start_of_day(self.backtest_start),
                end: start_of_day(self.backtest_end),
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BacktestGate {
    Disabled,
    InvalidRange,
    Run {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ControlChange {
    Symbol(String),
    Days(i64),
    BacktestStart(NaiveDate),
    BacktestEnd(NaiveDate),
    PredictNext(bool),
    RunBacktest(bool),
    ShowRawData(bool),
}

/// Sections that must be rebuilt after a change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Invalidation {
    pub prediction: bool,
    pub backtest: bool,
}

impl Invalidation {
    pub const NONE: Self = Self {
        prediction: false,
        backtest: false,
    };
    pub const ALL: Self = Self {
        prediction: true,
        backtest: true,
    };
    pub const PREDICTION: Self = Self {
        prediction: true,
        backtest: false,
    };
    pub const BACKTEST: Self = Self {
        prediction: false,
        backtest: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.prediction && !self.backtest
    }
}

impl std::ops::BitOr for Invalidation {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            prediction: self.prediction || rhs.prediction,
            backtest: self.backtest || rhs.backtest,
        }
    }
}

impl std::ops::BitOrAssign for Invalidation {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetricCard {
    pub label: String,
    pub value: String,
    pub help: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistoryRow {
    pub date: String,
    pub close: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetailRow {
    pub date: String,
    pub actual: String,
    pub predicted: String,
    pub error: String,
    pub pct_error: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PredictionReport {
    pub symbol: String,
    pub price: f64,
    pub card: MetricCard,
    pub history_rows: Vec<HistoryRow>,
    pub chart: ChartSpec,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BacktestReport {
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub metrics: BacktestMetrics,
    pub cards: Vec<MetricCard>,
    pub chart: ChartSpec,
    /// Newest first.
    pub rows: Vec<DetailRow>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PredictionSection {
    Disabled,
    Loading,
    Ready(PredictionReport),
    Failed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum BacktestSection {
    Disabled,
    InvalidRange,
    Loading { start: NaiveDate, end: NaiveDate },
    Ready(BacktestReport),
    Empty,
    Failed(String),
}

impl BacktestSection {
    pub fn loading_message(start: NaiveDate, end: NaiveDate) -> String {
        format!("Running backtest from {} to {}...", start, end)
    }
}

pub fn format_price(price: f64) -> String {
    format!("${:.2}", price)
}

pub async fn build_prediction(
    predictor: &dyn Predictor,
    query: &Query,
    rows_to_show: usize,
) -> PredictionSection {
    let outcome = async {
        let price = predictor.predict_next_day(query, true).await?;
        let history = predictor.historical_data(query, Utc::now()).await?;
        anyhow::Ok((price, history))
    }
    .await;

    match outcome {
        Ok((price, history)) => {
            let history_rows = StockData::trailing(&history, rows_to_show)
                .iter()
                .map(|c| HistoryRow {
                    date: c.date.format("%Y-%m-%d").to_string(),
                    close: format!("{:.2}", c.close),
                })
                .collect();
            info!("Prediction for {}: {:.2}", query.symbol, price);

            PredictionSection::Ready(PredictionReport {
                symbol: query.symbol.clone(),
                price,
                card: MetricCard {
                    label: "Predicted Closing Price".to_string(),
                    value: format_price(price),
                    help: None,
                },
                history_rows,
                chart: predictor.plot_history(&history),
            })
        }
        Err(e) => {
            error!("Prediction failed for {}: {:#}", query.symbol, e);
            PredictionSection::Failed(format!("Prediction failed: {:#}", e))
        }
    }
}

pub async fn build_backtest(
    predictor: &dyn Predictor,
    query: &Query,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> BacktestSection {
    let results = match predictor.backtest(query, start, end, true).await {
        Ok(results) => results,
        Err(e) => {
            error!("Backtest failed for {}: {:#}", query.symbol, e);
            return BacktestSection::Failed(format!("Backtest failed: {:#}", e));
        }
    };

    let Some(metrics) = BacktestMetrics::compute(&results) else {
        warn!("Backtest for {} produced no predictions", query.symbol);
        return BacktestSection::Empty;
    };

    let cards = metrics
        .cards()
        .into_iter()
        .map(|(label, value)| MetricCard {
            label: label.to_string(),
            value,
            help: Some(format!("{} metric", label)),
        })
        .collect();

    info!(
        "Backtest for {}: {} days, RMSE={:.4} MAE={:.4} R2={:.4} MAPE={:.4}%",
        query.symbol,
        results.len(),
        metrics.rmse,
        metrics.mae,
        metrics.r2,
        metrics.mape
    );

    BacktestSection::Ready(BacktestReport {
        symbol: query.symbol.clone(),
        start: start.date_naive(),
        end: end.date_naive(),
        metrics,
        cards,
        chart: predictor.plot_results(&results),
        rows: detail_rows(&results),
    })
}

fn detail_rows(results: &[BacktestRecord]) -> Vec<DetailRow> {
    let mut ordered: Vec<&BacktestRecord> = results.iter().collect();
    ordered.sort_by(|a, b| b.date.cmp(&a.date));
    ordered
        .into_iter()
        .map(|r| DetailRow {
            date: r.date.format("%Y-%m-%d").to_string(),
            actual: format!("{:.2}", r.actual),
            predicted: format!("{:.2}", r.predicted),
            error: format!("{:.2}", r.error),
            pct_error: format_percent(r.pct_error),
        })
        .collect()
}

/// Process-wide dashboard state: built once at startup and handed to whichever
/// front end is running.
pub struct Dashboard {
    config: Config,
    predictor: Arc<dyn Predictor>,
    pub controls: Controls,
    pub prediction: PredictionSection,
    pub backtest: BacktestSection,
    pub details_expanded: bool,
}

impl Dashboard {
    pub fn new(config: Config, predictor: Arc<dyn Predictor>, today: NaiveDate) -> Self {
        Self {
            config,
            predictor,
            controls: Controls::with_defaults(today),
            prediction: PredictionSection::Disabled,
            backtest: BacktestSection::Disabled,
            details_expanded: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn predictor(&self) -> Arc<dyn Predictor> {
        Arc::clone(&self.predictor)
    }

    pub fn apply(&mut self, change: ControlChange) -> Invalidation {
        let c = &mut self.controls;
        match change {
            ControlChange::Symbol(symbol) => {
                if self.config.set_stock_symbol(&symbol) {
                    info!("Symbol set to {}", self.config.stock_symbol());
                    Invalidation::ALL
                } else {
                    Invalidation::NONE
                }
            }
            ControlChange::Days(days) => {
                if self.config.set_days(days) {
                    info!("Days of history set to {}", self.config.days());
                    Invalidation::ALL
                } else {
                    Invalidation::NONE
                }
            }
            ControlChange::BacktestStart(date) => changed(&mut c.backtest_start, date, Invalidation::BACKTEST),
            ControlChange::BacktestEnd(date) => changed(&mut c.backtest_end, date, Invalidation::BACKTEST),
            ControlChange::PredictNext(on) => changed(&mut c.predict_next, on, Invalidation::PREDICTION),
            ControlChange::RunBacktest(on) => changed(&mut c.run_backtest, on, Invalidation::BACKTEST),
            ControlChange::ShowRawData(on) => {
                c.show_raw_data = on;
                debug!("show_raw_data={} (no section consumes it)", on);
                Invalidation::NONE
            }
        }
    }

    /// Moves invalidated sections to their next state without calling the
    /// predictor. Returns the sections that still need a predictor call.
    pub fn begin(&mut self, invalidation: Invalidation) -> Invalidation {
        let mut pending = Invalidation::NONE;

        if invalidation.prediction {
            if self.controls.predict_next {
                self.prediction = PredictionSection::Loading;
                pending.prediction = true;
            } else {
                self.prediction = PredictionSection::Disabled;
            }
        }

        if invalidation.backtest {
            match self.controls.backtest_gate() {
                BacktestGate::Disabled => self.backtest = BacktestSection::Disabled,
                BacktestGate::InvalidRange => {
                    warn!(
                        "Backtest skipped: start {} is not before end {}",
                        self.controls.backtest_start, self.controls.backtest_end
                    );
                    self.backtest = BacktestSection::InvalidRange;
                }
                BacktestGate::Run { .. } => {
                    self.backtest = BacktestSection::Loading {
                        start: self.controls.backtest_start,
                        end: self.controls.backtest_end,
                    };
                    pending.backtest = true;
                }
            }
        }

        pending
    }

    /// `begin` followed by the predictor calls, awaited in place.
    pub async fn refresh(&mut self, invalidation: Invalidation) {
        let pending = self.begin(invalidation);
        self.run(pending).await;
    }

    /// Predictor calls for sections already moved to `Loading` by [`Self::begin`].
    pub async fn run(&mut self, pending: Invalidation) {
        let query = self.config.query();

        if pending.prediction {
            self.prediction = build_prediction(
                self.predictor.as_ref(),
                &query,
                self.config.history_days_to_show(),
            )
            .await;
        }

        if pending.backtest {
            if let BacktestGate::Run { start, end } = self.controls.backtest_gate() {
                self.backtest = build_backtest(self.predictor.as_ref(), &query, start, end).await;
            }
        }
    }

    pub fn toggle_details(&mut self) {
        self.details_expanded = !self.details_expanded;
    }
}

fn changed<T: PartialEq>(slot: &mut T, value: T, on_change: Invalidation) -> Invalidation {
    if *slot == value {
        return Invalidation::NONE;
    }
    *slot = value;
    on_change
}
