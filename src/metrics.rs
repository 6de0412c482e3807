use crate::predictor::BacktestRecord;

/// Accuracy of a backtest run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BacktestMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
    /// Mean of `|pct_error|`, already in percent.
    pub mape: f64,
}

impl BacktestMetrics {
    /// `None` for an empty run: there is nothing to average.
    pub fn compute(records: &[BacktestRecord]) -> Option<Self> {
        if records.is_empty() {
            return None;
        }
        let n = records.len() as f64;

        let ss_res: f64 = records.iter().map(|r| (r.actual - r.predicted).powi(2)).sum();
        let abs_err: f64 = records.iter().map(|r| (r.actual - r.predicted).abs()).sum();
        let mape = records.iter().map(|r| r.pct_error.abs()).sum::<f64>() / n;

        let mean_actual = records.iter().map(|r| r.actual).sum::<f64>() / n;
        let ss_tot: f64 = records.iter().map(|r| (r.actual - mean_actual).powi(2)).sum();

        Some(Self {
            rmse: (ss_res / n).sqrt(),
            mae: abs_err / n,
            r2: r_squared(ss_res, ss_tot),
            mape,
        })
    }

    /// Card labels and display values, in display order.
    pub fn cards(&self) -> [(&'static str, String); 4] {
        [
            ("RMSE", format!("{:.2}", self.rmse)),
            ("MAE", format!("{:.2}", self.mae)),
            ("R²", format!("{:.2}", self.r2)),
            ("MAPE", format_percent(self.mape)),
        ]
    }
}

// A constant target has no variance to explain: perfect fit scores 1, anything else 0.
fn r_squared(ss_res: f64, ss_tot: f64) -> f64 {
    if ss_tot == 0.0 {
        if ss_res == 0.0 { 1.0 } else { 0.0 }
    } else {
        1.0 - ss_res / ss_tot
    }
}

pub fn format_percent(value: f64) -> String {
    format!("{:.2}%", value)
}
