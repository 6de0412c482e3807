use chrono::{Duration, NaiveDate};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::io;
use tracing::debug;

use crate::dashboard::{ControlChange, Dashboard, Invalidation};

/// Focusable rows of the control panel, top to bottom.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Symbol,
    Days,
    BacktestStart,
    BacktestEnd,
    PredictNext,
    RunBacktest,
    ShowRawData,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Symbol,
        Field::Days,
        Field::BacktestStart,
        Field::BacktestEnd,
        Field::PredictNext,
        Field::RunBacktest,
        Field::ShowRawData,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Field::Symbol => "Stock Symbol",
            Field::Days => "Days of History",
            Field::BacktestStart => "Backtest Start Date",
            Field::BacktestEnd => "Backtest End Date",
            Field::PredictNext => "Predict Next Day",
            Field::RunBacktest => "Run Backtest",
            Field::ShowRawData => "Show Raw Data",
        }
    }

    pub fn is_toggle(&self) -> bool {
        matches!(self, Field::PredictNext | Field::RunBacktest | Field::ShowRawData)
    }

    fn position(&self) -> usize {
        Self::ALL.iter().position(|f| f == self).unwrap_or(0)
    }

    fn next(&self) -> Field {
        Self::ALL[(self.position() + 1) % Self::ALL.len()]
    }

    fn prev(&self) -> Field {
        Self::ALL[(self.position() + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

pub const DATE_FORMAT: &str = "%Y-%m-%d";
const SCROLL_STEP: u16 = 5;

pub struct App {
    pub dashboard: Dashboard,
    pub focus: Field,
    /// Text being typed into the focused field; `None` when not editing.
    pub editing: Option<String>,
    pub input_error: Option<String>,
    pub details_scroll: u16,
    pub should_quit: bool,
}

impl App {
    pub fn new(dashboard: Dashboard) -> Self {
        Self {
            dashboard,
            focus: Field::Symbol,
            editing: None,
            input_error: None,
            details_scroll: 0,
            should_quit: false,
        }
    }

    /// Display value of a control, ignoring any in-progress edit.
    pub fn field_value(&self, field: Field) -> String {
        let config = self.dashboard.config();
        let controls = &self.dashboard.controls;
        let check = |on: bool| (if on { "[x]" } else { "[ ]" }).to_string();
        match field {
            Field::Symbol => config.stock_symbol().to_string(),
            Field::Days => config.days().to_string(),
            Field::BacktestStart => controls.backtest_start.format(DATE_FORMAT).to_string(),
            Field::BacktestEnd => controls.backtest_end.format(DATE_FORMAT).to_string(),
            Field::PredictNext => check(controls.predict_next),
            Field::RunBacktest => check(controls.run_backtest),
            Field::ShowRawData => check(controls.show_raw_data),
        }
    }

    pub async fn run(&mut self, terminal: &mut crate::tui::Tui) -> io::Result<()> {
        self.refresh(terminal, Invalidation::ALL).await?;

        while !self.should_quit {
            terminal.draw(|f| crate::ui::render(f, self))?;

            if event::poll(std::time::Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        let invalidation = self.handle_key(key);
                        if !invalidation.is_empty() {
                            self.refresh(terminal, invalidation).await?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // Draws the loading state first, then awaits the predictor in place.
    async fn refresh(
        &mut self,
        terminal: &mut crate::tui::Tui,
        invalidation: Invalidation,
    ) -> io::Result<()> {
        let pending = self.dashboard.begin(invalidation);
        terminal.draw(|f| crate::ui::render(f, self))?;
        self.dashboard.run(pending).await;
        if invalidation.backtest {
            self.details_scroll = 0;
        }
        Ok(())
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Invalidation {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return Invalidation::NONE;
        }

        if self.editing.is_some() {
            return self.handle_edit_key(key);
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Tab | KeyCode::Down => self.focus = self.focus.next(),
            KeyCode::BackTab | KeyCode::Up => self.focus = self.focus.prev(),
            KeyCode::Enter | KeyCode::Char(' ') if self.focus.is_toggle() => return self.toggle_focused(),
            KeyCode::Enter => {
                self.input_error = None;
                self.editing = Some(self.field_value(self.focus));
            }
            KeyCode::Left => return self.step_focused(-1),
            KeyCode::Right => return self.step_focused(1),
            KeyCode::F(5) | KeyCode::Char('r') => return Invalidation::ALL,
            KeyCode::F(2) | KeyCode::Char('d') => self.dashboard.toggle_details(),
            KeyCode::PageDown => self.details_scroll = self.details_scroll.saturating_add(SCROLL_STEP),
            KeyCode::PageUp => self.details_scroll = self.details_scroll.saturating_sub(SCROLL_STEP),
            KeyCode::Home => self.details_scroll = 0,
            _ => {}
        }
        Invalidation::NONE
    }

    fn handle_edit_key(&mut self, key: KeyEvent) -> Invalidation {
        let Some(buffer) = self.editing.as_mut() else {
            return Invalidation::NONE;
        };

        match key.code {
            KeyCode::Char(c) => buffer.push(c),
            KeyCode::Backspace => {
                buffer.pop();
            }
            KeyCode::Esc => self.editing = None,
            KeyCode::Enter => {
                let text = self.editing.take().unwrap_or_default();
                return self.commit(&text);
            }
            _ => {}
        }
        Invalidation::NONE
    }

    fn commit(&mut self, text: &str) -> Invalidation {
        let change = match self.focus {
            Field::Symbol => Ok(ControlChange::Symbol(text.to_string())),
            Field::Days => text
                .trim()
                .parse::<i64>()
                .map(ControlChange::Days)
                .map_err(|_| format!("Days of History must be a whole number, got {:?}", text.trim())),
            Field::BacktestStart => parse_date(text).map(ControlChange::BacktestStart),
            Field::BacktestEnd => parse_date(text).map(ControlChange::BacktestEnd),
            _ => return Invalidation::NONE,
        };

        match change {
            Ok(change) => {
                self.input_error = None;
                self.dashboard.apply(change)
            }
            Err(msg) => {
                debug!("Rejected input for {}: {}", self.focus.label(), msg);
                self.input_error = Some(msg);
                Invalidation::NONE
            }
        }
    }

    fn toggle_focused(&mut self) -> Invalidation {
        let c = &self.dashboard.controls;
        let change = match self.focus {
            Field::PredictNext => ControlChange::PredictNext(!c.predict_next),
            Field::RunBacktest => ControlChange::RunBacktest(!c.run_backtest),
            Field::ShowRawData => ControlChange::ShowRawData(!c.show_raw_data),
            _ => return Invalidation::NONE,
        };
        self.dashboard.apply(change)
    }

    fn step_focused(&mut self, delta: i64) -> Invalidation {
        let c = &self.dashboard.controls;
        let change = match self.focus {
            Field::Days => ControlChange::Days(i64::from(self.dashboard.config().days()) + delta),
            Field::BacktestStart => ControlChange::BacktestStart(c.backtest_start + Duration::days(delta)),
            Field::BacktestEnd => ControlChange::BacktestEnd(c.backtest_end + Duration::days(delta)),
            _ => return Invalidation::NONE,
        };
        self.dashboard.apply(change)
    }
}

fn parse_date(text: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
        .map_err(|_| format!("Dates use YYYY-MM-DD, got {:?}", text.trim()))
}

/// Full-screen fatal error; returns once any key is pressed.
pub fn show_fatal(terminal: &mut crate::tui::Tui, message: &str) -> io::Result<()> {
    loop {
        terminal.draw(|f| crate::ui::render_fatal(f, message))?;
        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_helpers::StubPredictor;
    use std::sync::Arc;

    fn app() -> App {
        let today = NaiveDate::from_ymd_opt(2024, 6, 14).unwrap();
        let dashboard = Dashboard::new(
            Config::new("AAPL", 30, 10),
            Arc::new(StubPredictor::default()),
            today,
        );
        App::new(dashboard)
    }

    fn press(app: &mut App, code: KeyCode) -> Invalidation {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            press(app, KeyCode::Char(c));
        }
    }

    fn replace_and_commit(app: &mut App, text: &str) -> Invalidation {
        press(app, KeyCode::Enter);
        let len = app.editing.as_ref().map(|s| s.len()).unwrap_or(0);
        for _ in 0..len {
            press(app, KeyCode::Backspace);
        }
        type_text(app, text);
        press(app, KeyCode::Enter)
    }

    #[test]
    fn test_focus_cycles_through_controls() {
        let mut app = app();
        assert_eq!(app.focus, Field::Symbol);
        press(&mut app, KeyCode::BackTab);
        assert_eq!(app.focus, Field::ShowRawData);
        press(&mut app, KeyCode::Tab);
        press(&mut app, KeyCode::Down);
        assert_eq!(app.focus, Field::Days);
    }

    #[test]
    fn test_symbol_edit_commits_on_enter() {
        let mut app = app();
        let inv = replace_and_commit(&mut app, "msft");
        assert_eq!(inv, Invalidation::ALL);
        assert_eq!(app.dashboard.config().stock_symbol(), "MSFT");
        assert!(app.editing.is_none());
    }

    #[test]
    fn test_typing_q_while_editing_does_not_quit() {
        let mut app = app();
        press(&mut app, KeyCode::Enter);
        type_text(&mut app, "q");
        assert!(!app.should_quit);
        assert_eq!(app.editing.as_deref(), Some("AAPLq"));
        press(&mut app, KeyCode::Esc);
        assert!(app.editing.is_none());
        assert_eq!(app.dashboard.config().stock_symbol(), "AAPL");
    }

    #[test]
    fn test_days_edit_is_clamped() {
        let mut app = app();
        app.focus = Field::Days;
        assert_eq!(replace_and_commit(&mut app, "1000"), Invalidation::ALL);
        assert_eq!(app.dashboard.config().days(), 365);
        press(&mut app, KeyCode::Right);
        assert_eq!(app.dashboard.config().days(), 365);
        press(&mut app, KeyCode::Left);
        assert_eq!(app.dashboard.config().days(), 364);
    }

    #[test]
    fn test_bad_input_sets_error_without_invalidating() {
        let mut app = app();
        app.focus = Field::Days;
        assert_eq!(replace_and_commit(&mut app, "abc"), Invalidation::NONE);
        assert!(app.input_error.as_deref().unwrap().contains("whole number"));

        app.focus = Field::BacktestEnd;
        assert_eq!(replace_and_commit(&mut app, "06/14/2024"), Invalidation::NONE);
        assert!(app.input_error.as_deref().unwrap().contains("YYYY-MM-DD"));
    }

    #[test]
    fn test_date_edit_and_step() {
        let mut app = app();
        app.focus = Field::BacktestStart;
        assert_eq!(replace_and_commit(&mut app, "2024-06-01"), Invalidation::BACKTEST);
        assert_eq!(
            app.dashboard.controls.backtest_start,
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
        );
        press(&mut app, KeyCode::Right);
        assert_eq!(
            app.dashboard.controls.backtest_start,
            NaiveDate::from_ymd_opt(2024, 6, 2).unwrap()
        );
    }

    #[test]
    fn test_space_toggles_checkboxes() {
        let mut app = app();
        app.focus = Field::RunBacktest;
        assert_eq!(press(&mut app, KeyCode::Char(' ')), Invalidation::BACKTEST);
        assert!(app.dashboard.controls.run_backtest);

        app.focus = Field::PredictNext;
        assert_eq!(press(&mut app, KeyCode::Enter), Invalidation::PREDICTION);
        assert!(!app.dashboard.controls.predict_next);

        app.focus = Field::ShowRawData;
        assert_eq!(press(&mut app, KeyCode::Char(' ')), Invalidation::NONE);
        assert!(app.dashboard.controls.show_raw_data);
    }

    #[test]
    fn test_global_keys() {
        let mut app = app();
        assert_eq!(press(&mut app, KeyCode::F(5)), Invalidation::ALL);

        assert!(!app.dashboard.details_expanded);
        press(&mut app, KeyCode::F(2));
        assert!(app.dashboard.details_expanded);

        press(&mut app, KeyCode::PageDown);
        press(&mut app, KeyCode::PageDown);
        assert_eq!(app.details_scroll, 10);
        press(&mut app, KeyCode::PageUp);
        assert_eq!(app.details_scroll, 5);

        app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(app.should_quit);
    }
}
