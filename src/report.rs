//! One-pass text rendering of the dashboard for `--report`.

use std::fmt::Write;

use crate::dashboard::{
    APP_SUBTITLE, APP_TITLE, BACKTEST_HEADER, BacktestSection, DETAILS_HEADER, DISCLAIMER,
    Dashboard, EMPTY_BACKTEST_WARNING, INVALID_RANGE_WARNING, Invalidation, METRICS_HEADER,
    PREDICTION_HEADER, PredictionSection,
};

const WIDTH: usize = 64;

pub async fn run(dashboard: &mut Dashboard) {
    dashboard.refresh(Invalidation::ALL).await;
    println!("{}", render(dashboard));
}

fn rule(out: &mut String, left: char, right: char) {
    let _ = writeln!(out, "{}{}{}", left, "═".repeat(WIDTH - 2), right);
}

fn row(out: &mut String, text: &str) {
    let _ = writeln!(out, "║ {:<width$} ║", text, width = WIDTH - 4);
}

pub fn render(dashboard: &Dashboard) -> String {
    let mut out = String::new();
    let config = dashboard.config();
    let controls = &dashboard.controls;

    rule(&mut out, '╔', '╗');
    row(&mut out, APP_TITLE);
    row(&mut out, APP_SUBTITLE);
    rule(&mut out, '╠', '╣');
    row(
        &mut out,
        &format!(
            "Symbol: {}   Days of History: {}   Rows: {}",
            config.stock_symbol(),
            config.days(),
            config.history_days_to_show()
        ),
    );
    row(
        &mut out,
        &format!("Backtest window: {} to {}", controls.backtest_start, controls.backtest_end),
    );
    rule(&mut out, '╠', '╣');

    match &dashboard.prediction {
        PredictionSection::Disabled => {}
        PredictionSection::Loading => row(&mut out, PREDICTION_HEADER),
        PredictionSection::Failed(msg) => {
            row(&mut out, PREDICTION_HEADER);
            row(&mut out, &format!("ERROR: {}", msg));
            rule(&mut out, '╠', '╣');
        }
        PredictionSection::Ready(report) => {
            row(&mut out, PREDICTION_HEADER);
            row(&mut out, &format!("{}: {}", report.card.label, report.card.value));
            row(&mut out, "");
            row(&mut out, &format!("{:<14}{:>10}", "Date", "Close"));
            for r in &report.history_rows {
                row(&mut out, &format!("{:<14}{:>10}", r.date, r.close));
            }
            rule(&mut out, '╠', '╣');
        }
    }

    match &dashboard.backtest {
        BacktestSection::Disabled => {}
        BacktestSection::InvalidRange => {
            row(&mut out, BACKTEST_HEADER);
            row(&mut out, &format!("WARNING: {}", INVALID_RANGE_WARNING));
        }
        BacktestSection::Loading { start, end } => {
            row(&mut out, &BacktestSection::loading_message(*start, *end))
        }
        BacktestSection::Empty => {
            row(&mut out, BACKTEST_HEADER);
            row(&mut out, &format!("WARNING: {}", EMPTY_BACKTEST_WARNING));
        }
        BacktestSection::Failed(msg) => {
            row(&mut out, BACKTEST_HEADER);
            row(&mut out, &format!("ERROR: {}", msg));
        }
        BacktestSection::Ready(report) => {
            row(&mut out, BACKTEST_HEADER);
            row(&mut out, METRICS_HEADER);
            let cards: Vec<String> = report
                .cards
                .iter()
                .map(|c| format!("{}: {}", c.label, c.value))
                .collect();
            row(&mut out, &cards.join("   "));
            row(&mut out, "");
            row(&mut out, DETAILS_HEADER);
            row(
                &mut out,
                &format!("{:<12}{:>10}{:>11}{:>9}{:>10}", "Date", "Actual", "Predicted", "Error", "Error %"),
            );
            for r in &report.rows {
                row(
                    &mut out,
                    &format!(
                        "{:<12}{:>10}{:>11}{:>9}{:>10}",
                        r.date, r.actual, r.predicted, r.error, r.pct_error
                    ),
                );
            }
        }
    }

    rule(&mut out, '╚', '╝');
    for line in DISCLAIMER {
        let _ = writeln!(out, "{}", line);
    }
    out
}
