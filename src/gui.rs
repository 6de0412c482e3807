use chrono::{NaiveDate, TimeZone};
use eframe::egui;
use egui_plot::{Line, Plot, PlotPoints};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::app::DATE_FORMAT;
use crate::config::{DAYS_MAX, DAYS_MIN};
use crate::dashboard::{
    self, APP_SUBTITLE, APP_TITLE, BACKTEST_HEADER, BacktestGate, BacktestReport, BacktestSection,
    ControlChange, DETAILS_HEADER, DISCLAIMER, Dashboard, EMPTY_BACKTEST_WARNING,
    INVALID_RANGE_WARNING, Invalidation, METRICS_HEADER, PERFORMANCE_HEADER, PREDICTION_HEADER,
    PREDICTION_LOADING, PredictionReport, PredictionSection,
};
use crate::predictor::{ChartSpec, SeriesStyle};

// ── Palette ──────────────────────────────────────────────────────────────────

const BRAND: egui::Color32 = egui::Color32::from_rgb(99, 102, 241);
const GAIN: egui::Color32 = egui::Color32::from_rgb(16, 185, 129);
const LOSS: egui::Color32 = egui::Color32::from_rgb(244, 63, 94);
const CAUTION: egui::Color32 = egui::Color32::from_rgb(245, 158, 11);
const SERIES_ACTUAL: egui::Color32 = egui::Color32::from_rgb(56, 189, 248);

const SURFACE: egui::Color32 = egui::Color32::from_rgb(17, 19, 26);
const CARD_FILL: egui::Color32 = egui::Color32::from_rgb(26, 29, 39);
const INK: egui::Color32 = egui::Color32::from_rgb(229, 231, 235);
const MUTED: egui::Color32 = egui::Color32::from_rgb(156, 163, 175);
const OUTLINE: egui::Color32 = egui::Color32::from_rgb(55, 60, 75);

/// Dark visuals with the FinSight surfaces and accent. Installed once per window.
fn install_theme(ctx: &egui::Context) {
    ctx.set_visuals(egui::Visuals::dark());
    ctx.style_mut(|style| {
        style.visuals.panel_fill = SURFACE;
        style.visuals.window_fill = CARD_FILL;
        style.visuals.extreme_bg_color = CARD_FILL;
        style.visuals.hyperlink_color = BRAND;
        style.visuals.selection.bg_fill = BRAND.linear_multiply(0.5);
        style.visuals.widgets.active.bg_fill = BRAND;
        style.spacing.item_spacing = egui::vec2(8.0, 6.0);
    });
}

/// Section result sent back from a spawned predictor call.
enum SectionUpdate {
    Prediction { generation: u64, section: PredictionSection },
    Backtest { generation: u64, section: BacktestSection },
}

pub struct GuiApp {
    dashboard: Dashboard,
    symbol_input: String,
    days_input: i64,
    start_input: String,
    end_input: String,
    input_error: Option<String>,
    // Bumped on every rebuild; results tagged with an older value are dropped.
    prediction_generation: u64,
    backtest_generation: u64,
    prediction_task: Option<JoinHandle<()>>,
    backtest_task: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<SectionUpdate>,
    rx: mpsc::UnboundedReceiver<SectionUpdate>,
    started: bool,
}

/// Stores `next` in `slot`, aborting the task it replaces if still running.
fn replace_task(slot: &mut Option<JoinHandle<()>>, next: Option<JoinHandle<()>>, section: &str) {
    if let Some(previous) = std::mem::replace(slot, next) {
        if !previous.is_finished() {
            debug!("Aborting superseded {} task", section);
            previous.abort();
        }
    }
}

impl GuiApp {
    pub fn new(dashboard: Dashboard) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = dashboard.config();
        let controls = &dashboard.controls;
        Self {
            symbol_input: config.stock_symbol().to_string(),
            days_input: i64::from(config.days()),
            start_input: controls.backtest_start.format(DATE_FORMAT).to_string(),
            end_input: controls.backtest_end.format(DATE_FORMAT).to_string(),
            dashboard,
            input_error: None,
            prediction_generation: 0,
            backtest_generation: 0,
            prediction_task: None,
            backtest_task: None,
            tx,
            rx,
            started: false,
        }
    }

    /// Moves sections to `Loading` and spawns the predictor calls they need.
    /// Work still running for an invalidated section is aborted.
    fn rebuild(&mut self, invalidation: Invalidation, ctx: &egui::Context) {
        let pending = self.dashboard.begin(invalidation);
        let query = self.dashboard.config().query();

        if invalidation.prediction {
            self.prediction_generation += 1;
            let task = pending.prediction.then(|| {
                let generation = self.prediction_generation;
                let predictor = self.dashboard.predictor();
                let rows = self.dashboard.config().history_days_to_show();
                let (tx, ctx, query) = (self.tx.clone(), ctx.clone(), query.clone());
                tokio::spawn(async move {
                    let section = dashboard::build_prediction(predictor.as_ref(), &query, rows).await;
                    let _ = tx.send(SectionUpdate::Prediction { generation, section });
                    ctx.request_repaint();
                })
            });
            replace_task(&mut self.prediction_task, task, "prediction");
        }

        if invalidation.backtest {
            self.backtest_generation += 1;
            let task = match (pending.backtest, self.dashboard.controls.backtest_gate()) {
                (true, BacktestGate::Run { start, end }) => {
                    let generation = self.backtest_generation;
                    let predictor = self.dashboard.predictor();
                    let (tx, ctx) = (self.tx.clone(), ctx.clone());
                    Some(tokio::spawn(async move {
                        let section =
                            dashboard::build_backtest(predictor.as_ref(), &query, start, end).await;
                        let _ = tx.send(SectionUpdate::Backtest { generation, section });
                        ctx.request_repaint();
                    }))
                }
                _ => None,
            };
            replace_task(&mut self.backtest_task, task, "backtest");
        }
    }

    fn drain_updates(&mut self) {
        while let Ok(update) = self.rx.try_recv() {
            match update {
                SectionUpdate::Prediction { generation, section } => {
                    if generation == self.prediction_generation {
                        self.dashboard.prediction = section;
                    } else {
                        debug!("Dropped stale prediction result (generation {})", generation);
                    }
                }
                SectionUpdate::Backtest { generation, section } => {
                    if generation == self.backtest_generation {
                        self.dashboard.backtest = section;
                    } else {
                        debug!("Dropped stale backtest result (generation {})", generation);
                    }
                }
            }
        }
    }
}

impl eframe::App for GuiApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_updates();

        let mut invalidation = Invalidation::NONE;
        if !self.started {
            self.started = true;
            install_theme(ctx);
            invalidation = Invalidation::ALL;
        }

        // ── Controls ──
        egui::SidePanel::left("controls")
            .resizable(false)
            .exact_width(260.0)
            .show(ctx, |ui| {
                invalidation |= self.render_controls(ui);
            });

        if !invalidation.is_empty() {
            self.rebuild(invalidation, ctx);
        }

        // ── Main Content ──
        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical().show(ui, |ui| {
                ui.add_space(8.0);
                ui.label(egui::RichText::new(APP_TITLE).size(24.0).strong().color(BRAND));
                ui.label(egui::RichText::new(APP_SUBTITLE).size(13.0).color(MUTED));
                ui.add_space(12.0);

                self.render_prediction(ui);
                ui.add_space(16.0);
                self.render_backtest(ui);
            });
        });

        let loading = matches!(self.dashboard.prediction, PredictionSection::Loading)
            || matches!(self.dashboard.backtest, BacktestSection::Loading { .. });
        if loading {
            ctx.request_repaint();
        }
    }
}

impl GuiApp {
    fn render_controls(&mut self, ui: &mut egui::Ui) -> Invalidation {
        let mut invalidation = Invalidation::NONE;

        ui.add_space(8.0);
        section_header(ui, "Settings");

        ui.label(egui::RichText::new("Stock Symbol").size(11.0).color(MUTED));
        let symbol = ui.add(egui::TextEdit::singleline(&mut self.symbol_input).desired_width(220.0));
        if symbol.lost_focus() {
            invalidation |= self.dashboard.apply(ControlChange::Symbol(self.symbol_input.clone()));
            self.symbol_input = self.dashboard.config().stock_symbol().to_string();
        }

        ui.add_space(4.0);
        ui.label(egui::RichText::new("Days of History").size(11.0).color(MUTED));
        let days = ui.add(
            egui::DragValue::new(&mut self.days_input).range(i64::from(DAYS_MIN)..=i64::from(DAYS_MAX)),
        );
        // `changed` fires on every drag tick; commit once the value settles.
        let settled = days.drag_stopped() || days.lost_focus();
        if settled && self.days_input != i64::from(self.dashboard.config().days()) {
            invalidation |= self.dashboard.apply(ControlChange::Days(self.days_input));
            self.days_input = i64::from(self.dashboard.config().days());
        }

        ui.add_space(4.0);
        ui.label(egui::RichText::new("Backtest Start Date").size(11.0).color(MUTED));
        let start = ui.add(egui::TextEdit::singleline(&mut self.start_input).desired_width(220.0));
        if start.lost_focus() {
            invalidation |= self.commit_date(true);
        }

        ui.label(egui::RichText::new("Backtest End Date").size(11.0).color(MUTED));
        let end = ui.add(egui::TextEdit::singleline(&mut self.end_input).desired_width(220.0));
        if end.lost_focus() {
            invalidation |= self.commit_date(false);
        }

        ui.add_space(8.0);
        let mut predict_next = self.dashboard.controls.predict_next;
        if ui.checkbox(&mut predict_next, "Predict Next Day").changed() {
            invalidation |= self.dashboard.apply(ControlChange::PredictNext(predict_next));
        }
        let mut run_backtest = self.dashboard.controls.run_backtest;
        if ui.checkbox(&mut run_backtest, "Run Backtest").changed() {
            invalidation |= self.dashboard.apply(ControlChange::RunBacktest(run_backtest));
        }
        let mut show_raw = self.dashboard.controls.show_raw_data;
        if ui.checkbox(&mut show_raw, "Show Raw Data").changed() {
            invalidation |= self.dashboard.apply(ControlChange::ShowRawData(show_raw));
        }

        ui.add_space(8.0);
        let rerun = ui.add_sized(
            [220.0, 30.0],
            egui::Button::new(egui::RichText::new("Rerun").strong().color(egui::Color32::WHITE))
                .fill(BRAND)
                .rounding(egui::Rounding::same(6.0)),
        );
        if rerun.clicked() {
            invalidation |= Invalidation::ALL;
        }

        if let Some(err) = &self.input_error {
            ui.add_space(6.0);
            ui.label(egui::RichText::new(err).color(LOSS).size(11.0));
        }

        ui.add_space(12.0);
        ui.add(egui::Separator::default().spacing(4.0));
        for (i, line) in DISCLAIMER.iter().enumerate() {
            let text = egui::RichText::new(*line).size(11.0);
            ui.label(if i == 0 { text.strong().color(CAUTION) } else { text.color(MUTED) });
        }

        invalidation
    }

    fn commit_date(&mut self, is_start: bool) -> Invalidation {
        let input = if is_start { &self.start_input } else { &self.end_input };
        match NaiveDate::parse_from_str(input.trim(), DATE_FORMAT) {
            Ok(date) => {
                self.input_error = None;
                let change = if is_start {
                    ControlChange::BacktestStart(date)
                } else {
                    ControlChange::BacktestEnd(date)
                };
                self.dashboard.apply(change)
            }
            Err(_) => {
                self.input_error = Some(format!("Dates use YYYY-MM-DD, got {:?}", input.trim()));
                Invalidation::NONE
            }
        }
    }

    fn render_prediction(&self, ui: &mut egui::Ui) {
        match &self.dashboard.prediction {
            PredictionSection::Disabled => {}
            PredictionSection::Loading => {
                section_header(ui, PREDICTION_HEADER);
                ui.horizontal(|ui| {
                    ui.spinner();
                    ui.label(egui::RichText::new(PREDICTION_LOADING).color(MUTED));
                });
            }
            PredictionSection::Failed(msg) => {
                section_header(ui, PREDICTION_HEADER);
                message_box(ui, msg, LOSS);
            }
            PredictionSection::Ready(report) => {
                section_header(ui, PREDICTION_HEADER);
                self.render_prediction_report(ui, report);
            }
        }
    }

    fn render_prediction_report(&self, ui: &mut egui::Ui, report: &PredictionReport) {
        ui.horizontal_top(|ui| {
            ui.vertical(|ui| {
                metric_tile(ui, &report.card.label, &report.card.value, GAIN);
                ui.add_space(8.0);
                card_frame().show(ui, |ui| {
                    ui.label(
                        egui::RichText::new(format!(
                            "Last {} Days",
                            self.dashboard.config().history_days_to_show()
                        ))
                        .size(12.0)
                        .strong()
                        .color(INK),
                    );
                    egui::Grid::new("history_table").striped(true).show(ui, |ui| {
                        ui.label(egui::RichText::new("Date").strong());
                        ui.label(egui::RichText::new("Close").strong());
                        ui.end_row();
                        for row in &report.history_rows {
                            ui.label(row.date.as_str());
                            ui.label(row.close.as_str());
                            ui.end_row();
                        }
                    });
                });
            });
            ui.vertical(|ui| {
                chart_plot(ui, "history_chart", &report.chart);
            });
        });
    }

    fn render_backtest(&self, ui: &mut egui::Ui) {
        match &self.dashboard.backtest {
            BacktestSection::Disabled => {}
            BacktestSection::InvalidRange => {
                section_header(ui, BACKTEST_HEADER);
                message_box(ui, INVALID_RANGE_WARNING, CAUTION);
            }
            BacktestSection::Loading { start, end } => {
                section_header(ui, BACKTEST_HEADER);
                ui.horizontal(|ui| {
                    ui.spinner();
                    ui.label(
                        egui::RichText::new(BacktestSection::loading_message(*start, *end))
                            .color(MUTED),
                    );
                });
            }
            BacktestSection::Empty => {
                section_header(ui, BACKTEST_HEADER);
                message_box(ui, EMPTY_BACKTEST_WARNING, CAUTION);
            }
            BacktestSection::Failed(msg) => {
                section_header(ui, BACKTEST_HEADER);
                message_box(ui, msg, LOSS);
            }
            BacktestSection::Ready(report) => {
                section_header(ui, BACKTEST_HEADER);
                render_backtest_report(ui, report);
            }
        }
    }
}

fn render_backtest_report(ui: &mut egui::Ui, report: &BacktestReport) {
    ui.label(egui::RichText::new(METRICS_HEADER).size(12.0).strong().color(INK));
    ui.horizontal(|ui| {
        for card in &report.cards {
            let response = metric_tile(ui, &card.label, &card.value, CAUTION);
            if let Some(help) = &card.help {
                response.on_hover_text(help.as_str());
            }
        }
    });

    ui.add_space(8.0);
    ui.label(egui::RichText::new(PERFORMANCE_HEADER).size(12.0).strong().color(INK));
    chart_plot(ui, "backtest_chart", &report.chart);

    ui.add_space(8.0);
    egui::CollapsingHeader::new(DETAILS_HEADER)
        .default_open(false)
        .show(ui, |ui| {
            egui::Grid::new("backtest_details").striped(true).show(ui, |ui| {
                for title in ["Date", "Actual", "Predicted", "Error", "Error %"] {
                    ui.label(egui::RichText::new(title).strong());
                }
                ui.end_row();
                for row in &report.rows {
                    let color = if row.error.starts_with('-') { LOSS } else { GAIN };
                    ui.label(row.date.as_str());
                    ui.label(row.actual.as_str());
                    ui.label(row.predicted.as_str());
                    ui.label(egui::RichText::new(&row.error).color(color));
                    ui.label(row.pct_error.as_str());
                    ui.end_row();
                }
            });
        });
}

fn chart_plot(ui: &mut egui::Ui, id: &str, spec: &ChartSpec) {
    card_frame().show(ui, |ui| {
        ui.label(egui::RichText::new(&spec.title).size(12.0).strong().color(INK));
        if spec.is_empty() {
            ui.label(egui::RichText::new("No data to plot").color(MUTED));
            return;
        }
        Plot::new(id)
            .legend(egui_plot::Legend::default().position(egui_plot::Corner::LeftTop))
            .x_axis_label(spec.x_label.clone())
            .y_axis_label(spec.y_label.clone())
            .x_axis_formatter(|x, _range| {
                chrono::Utc
                    .timestamp_opt(x.value as i64, 0)
                    .map(|dt| dt.format("%b %d").to_string())
                    .single()
                    .unwrap_or_default()
            })
            .label_formatter(|name, value| {
                let date = chrono::Utc
                    .timestamp_opt(value.x as i64, 0)
                    .map(|dt| dt.format("%Y-%m-%d").to_string())
                    .single()
                    .unwrap_or_default();
                format!("{}\nDate: {}\nPrice: ${:.2}", name, date, value.y)
            })
            .height(260.0)
            .allow_drag(true)
            .allow_zoom(true)
            .show(ui, |plot_ui| {
                for series in &spec.series {
                    let points: PlotPoints = series.points.iter().map(|&(x, y)| [x, y]).collect();
                    let color = match series.style {
                        SeriesStyle::Primary => SERIES_ACTUAL,
                        SeriesStyle::Secondary => CAUTION,
                    };
                    plot_ui.line(Line::new(points).name(&series.name).color(color).width(1.8));
                }
            });
    });
}

/// Shown instead of the dashboard when config loading or predictor setup fails.
pub struct FatalApp {
    message: String,
    themed: bool,
}

impl FatalApp {
    pub fn new(message: String) -> Self {
        Self {
            message,
            themed: false,
        }
    }
}

impl eframe::App for FatalApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if !self.themed {
            self.themed = true;
            install_theme(ctx);
        }
        egui::CentralPanel::default().show(ctx, |ui| {
            let available = ui.available_size();
            ui.vertical_centered(|ui| {
                ui.add_space(available.y * 0.3);
                ui.label(egui::RichText::new("FinSight").size(24.0).strong().color(BRAND));
                ui.add_space(12.0);
                message_box(ui, &self.message, LOSS);
                ui.add_space(12.0);
                if ui.button("Close").clicked() {
                    ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                }
            });
        });
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────────────────────────────────────

fn card_frame() -> egui::Frame {
    egui::Frame::group(&egui::Style::default())
        .fill(CARD_FILL)
        .stroke(egui::Stroke::new(1.0, OUTLINE))
        .inner_margin(egui::Margin::symmetric(14.0, 10.0))
}

fn section_header(ui: &mut egui::Ui, text: &str) {
    ui.heading(egui::RichText::new(text).color(INK));
    ui.add(egui::Separator::default().spacing(6.0));
}

fn message_box(ui: &mut egui::Ui, text: &str, color: egui::Color32) {
    egui::Frame::none()
        .fill(color.linear_multiply(0.12))
        .rounding(egui::Rounding::same(6.0))
        .inner_margin(egui::Margin::same(8.0))
        .show(ui, |ui| {
            ui.label(egui::RichText::new(text).color(color).size(12.0));
        });
}

/// Label over a large value, outlined in `accent`.
fn metric_tile(ui: &mut egui::Ui, label: &str, value: &str, accent: egui::Color32) -> egui::Response {
    card_frame()
        .stroke(egui::Stroke::new(1.0, accent.linear_multiply(0.6)))
        .show(ui, |ui| {
            ui.set_min_width(110.0);
            ui.label(egui::RichText::new(label).small().color(MUTED));
            ui.label(egui::RichText::new(value).size(22.0).strong().color(accent));
        })
        .response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_helpers::{StubPredictor, history_ending_at, records_from};
    use std::sync::Arc;
    use std::time::Duration;

    fn gui_with(stub: Arc<StubPredictor>) -> GuiApp {
        let today = NaiveDate::from_ymd_opt(2024, 6, 14).unwrap();
        let mut dashboard = Dashboard::new(Config::new("AAPL", 30, 10), stub, today);
        dashboard.apply(ControlChange::BacktestStart(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()));
        dashboard.apply(ControlChange::RunBacktest(true));
        GuiApp::new(dashboard)
    }

    fn stub() -> Arc<StubPredictor> {
        Arc::new(StubPredictor {
            prediction: Ok(150.25),
            history: Ok(history_ending_at(10, 149.80)),
            backtest: Ok(records_from(&[100.0, 101.0], &[99.0, 101.0])),
            ..Default::default()
        })
    }

    fn drain_count(app: &mut GuiApp) -> usize {
        let mut count = 0;
        while app.rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    #[tokio::test]
    async fn test_rebuild_aborts_superseded_tasks() {
        let stub = stub();
        let mut app = gui_with(stub.clone());
        let ctx = egui::Context::default();

        // Three back-to-back rebuilds, as a burst of control edits would produce.
        for _ in 0..3 {
            app.rebuild(Invalidation::ALL, &ctx);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stub.predict_calls(), 1);
        assert_eq!(stub.backtest_calls(), 1);
        assert_eq!(drain_count(&mut app), 2);
    }

    #[tokio::test]
    async fn test_disabling_a_section_cancels_its_task() {
        let stub = stub();
        let mut app = gui_with(stub.clone());
        let ctx = egui::Context::default();

        app.rebuild(Invalidation::ALL, &ctx);
        let inv = app.dashboard.apply(ControlChange::RunBacktest(false));
        app.rebuild(inv, &ctx);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stub.backtest_calls(), 0);
        assert!(app.backtest_task.is_none());
        app.drain_updates();
        assert!(matches!(app.dashboard.backtest, BacktestSection::Disabled));
        assert!(matches!(app.dashboard.prediction, PredictionSection::Ready(_)));
    }

    #[tokio::test]
    async fn test_results_land_in_their_sections() {
        let mut app = gui_with(stub());
        let ctx = egui::Context::default();

        app.rebuild(Invalidation::ALL, &ctx);
        assert!(matches!(app.dashboard.prediction, PredictionSection::Loading));
        tokio::time::sleep(Duration::from_millis(50)).await;
        app.drain_updates();

        let PredictionSection::Ready(report) = &app.dashboard.prediction else {
            panic!("prediction not ready: {:?}", app.dashboard.prediction);
        };
        assert_eq!(report.card.value, "$150.25");
        assert!(matches!(app.dashboard.backtest, BacktestSection::Ready(_)));
    }
}
