mod app;
mod config;
mod dashboard;
mod data;
mod gui;
mod llm;
mod metrics;
mod mock;
mod predictor;
mod report;
mod tui;
mod ui;

#[cfg(test)]
mod test_helpers;

use app::App;
use chrono::{Local, NaiveDate};
use clap::Parser;
use dashboard::{ControlChange, Dashboard};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "FinSight-TUI: LLM-powered next-day stock price predictions and backtests",
    after_help = "EXAMPLES:
    # Terminal dashboard using config.json
    cargo run --release

    # Offline demo with synthetic prices (no API key needed)
    cargo run --release -- --demo

    # Desktop dashboard
    cargo run --release -- --gui

    # One-shot text report with a backtest over March 2024
    cargo run --release -- --report --backtest --start 2024-03-01 --end 2024-03-29"
)]
struct Args {
    /// Path to the JSON config (default: $FINSIGHT_CONFIG or config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Launch in GUI mode
    #[arg(long)]
    gui: bool,

    /// Print a text report to stdout and exit
    #[arg(long)]
    report: bool,

    /// Use the offline demo predictor instead of Gemini
    #[arg(long)]
    demo: bool,

    /// Start with "Run Backtest" enabled
    #[arg(long)]
    backtest: bool,

    /// Start with "Predict Next Day" disabled
    #[arg(long)]
    no_predict: bool,

    /// Backtest start date, YYYY-MM-DD (default: 30 days ago)
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Backtest end date, YYYY-MM-DD (default: today)
    #[arg(long)]
    end: Option<NaiveDate>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Tui,
    Gui,
    Report,
}

impl Args {
    fn mode(&self) -> Mode {
        if self.report {
            Mode::Report
        } else if self.gui {
            Mode::Gui
        } else {
            Mode::Tui
        }
    }
}

fn init_logging(mode: Mode) -> io::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("finsight_tui=info,wgpu_core=error,wgpu_hal=error")
    });

    if mode == Mode::Tui {
        // The terminal belongs to the dashboard.
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(config::log_file_path())?;
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(false)
            .with_writer(Arc::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .init();
    }
    Ok(())
}

/// Loads config and builds the predictor. The error string is the user-facing fatal message.
fn build_dashboard(args: &Args) -> Result<Dashboard, String> {
    let path = config::config_path(args.config.as_deref());
    let config = config::load_config(&path).map_err(|e| format!("Failed to load config: {:#}", e))?;
    let predictor = predictor::init_predictor(&config, args.demo)
        .map_err(|e| format!("Initialization failed: {:#}", e))?;
    info!("Using {} predictor for {}", predictor.name(), config.stock_symbol());

    let mut dashboard = Dashboard::new(config, predictor, Local::now().date_naive());
    if let Some(start) = args.start {
        dashboard.apply(ControlChange::BacktestStart(start));
    }
    if let Some(end) = args.end {
        dashboard.apply(ControlChange::BacktestEnd(end));
    }
    dashboard.apply(ControlChange::RunBacktest(args.backtest));
    dashboard.apply(ControlChange::PredictNext(!args.no_predict));
    Ok(dashboard)
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> io::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let mode = args.mode();
    init_logging(mode)?;

    let built = build_dashboard(&args);
    if let Err(msg) = &built {
        error!("{}", msg);
    }

    match mode {
        Mode::Report => {
            let mut dashboard = built.map_err(io::Error::other)?;
            report::run(&mut dashboard).await;
            Ok(())
        }
        Mode::Gui => {
            let options = eframe::NativeOptions::default();
            info!("Launching GUI");
            let fatal = built.as_ref().err().cloned();
            let result = match built {
                Ok(dashboard) => eframe::run_native(
                    "FinSight",
                    options,
                    Box::new(|_cc| Ok(Box::new(gui::GuiApp::new(dashboard)))),
                ),
                Err(msg) => eframe::run_native(
                    "FinSight",
                    options,
                    Box::new(|_cc| Ok(Box::new(gui::FatalApp::new(msg)))),
                ),
            };
            result.map_err(|e| io::Error::other(e.to_string()))?;
            match fatal {
                Some(msg) => Err(io::Error::other(msg)),
                None => Ok(()),
            }
        }
        Mode::Tui => {
            let mut terminal = tui::init()?;
            let res = match built {
                Ok(dashboard) => {
                    let mut app = App::new(dashboard);
                    app.run(&mut terminal).await
                }
                Err(msg) => app::show_fatal(&mut terminal, &msg).and(Err(io::Error::other(msg))),
            };

            tui::restore()?;

            if let Err(e) = &res {
                error!("Error: {}", e);
            }
            res
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_a_single_line_fatal_message() {
        let args = Args::parse_from([
            "finsight-tui",
            "--report",
            "--config",
            "/nonexistent/finsight-config.json",
        ]);
        let msg = build_dashboard(&args).err().unwrap();
        assert!(msg.starts_with("Failed to load config: cannot read"), "{}", msg);

        // `main` prints the error with Display, which is the message itself.
        let err = io::Error::other(msg.clone());
        assert_eq!(err.to_string(), msg);
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(Args::parse_from(["finsight-tui"]).mode(), Mode::Tui);
        assert_eq!(Args::parse_from(["finsight-tui", "--gui"]).mode(), Mode::Gui);
        assert_eq!(Args::parse_from(["finsight-tui", "--gui", "--report"]).mode(), Mode::Report);
    }
}
