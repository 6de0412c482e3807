use chrono::DateTime;
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Cell, Chart, Dataset, GraphType, Paragraph, Row, Table, Wrap},
};

use crate::app::{App, Field};
use crate::dashboard::{
    APP_SUBTITLE, APP_TITLE, BACKTEST_HEADER, BacktestReport, BacktestSection, DETAILS_HEADER,
    DISCLAIMER, EMPTY_BACKTEST_WARNING, INVALID_RANGE_WARNING, METRICS_HEADER, MetricCard,
    PREDICTION_HEADER, PREDICTION_LOADING, PredictionReport, PredictionSection,
};
use crate::predictor::{ChartSpec, SeriesStyle};

const SIDEBAR_WIDTH: u16 = 36;
const STATUS_HEIGHT: u16 = 4;

pub fn render(f: &mut Frame, app: &App) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(f.area());

    render_header(f, app, layout[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(SIDEBAR_WIDTH), Constraint::Min(0)])
        .split(layout[1]);

    render_sidebar(f, app, body[0]);
    render_main(f, app, body[1]);
    render_footer(f, app, layout[2]);
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let predictor = app.dashboard.predictor();
    let spans = vec![
        Span::styled(" FinSight ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw(" | "),
        Span::styled(
            app.dashboard.config().stock_symbol().to_string(),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::styled(
            format!("{} days", app.dashboard.config().days()),
            Style::default().fg(Color::Gray),
        ),
        Span::raw(" | "),
        Span::styled(format!("Predictor: {}", predictor.name()), Style::default().fg(Color::Yellow)),
    ];

    let header = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(header, area);
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let hint = if app.editing.is_some() {
        "Enter: apply | Esc: cancel | Backspace: delete"
    } else {
        "Tab/Up/Down: move | Enter: edit/toggle | Left/Right: adjust | F5: rerun | F2: details | PgUp/PgDn: scroll | q: quit"
    };

    let footer = Paragraph::new(Line::from(vec![
        Span::styled(" Controls: ", Style::default().fg(Color::Gray)),
        Span::styled(hint, Style::default().fg(Color::White)),
    ]))
    .block(Block::default().borders(Borders::ALL));

    f.render_widget(footer, area);
}

fn render_sidebar(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(DISCLAIMER.len() as u16 + 2)])
        .split(area);

    let mut lines = Vec::new();
    for field in Field::ALL {
        let focused = app.focus == field;
        let marker = if focused { "> " } else { "  " };
        let label_style = if focused {
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Gray)
        };

        if field.is_toggle() {
            lines.push(Line::from(vec![
                Span::styled(marker, label_style),
                Span::styled(
                    format!("{} {}", app.field_value(field), field.label()),
                    label_style,
                ),
            ]));
            continue;
        }

        lines.push(Line::from(Span::styled(format!("{}{}", marker, field.label()), label_style)));
        let value = match (&app.editing, focused) {
            (Some(buffer), true) => Span::styled(
                format!("    {}_", buffer),
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            ),
            _ => Span::styled(format!("    {}", app.field_value(field)), Style::default().fg(Color::White)),
        };
        lines.push(Line::from(value));
        if field == Field::Days {
            lines.push(Line::from(Span::styled(
                "    range 5-365",
                Style::default().fg(Color::DarkGray),
            )));
        }
    }

    if let Some(err) = &app.input_error {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(err.as_str(), Style::default().fg(Color::Red))));
    }

    let controls = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(" Settings "));
    f.render_widget(controls, chunks[0]);

    let note: Vec<Line> = DISCLAIMER
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let style = if i == 0 {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Gray)
            };
            Line::from(Span::styled(*text, style))
        })
        .collect();
    f.render_widget(
        Paragraph::new(note).block(Block::default().borders(Borders::ALL)),
        chunks[1],
    );
}

fn render_main(f: &mut Frame, app: &App, area: Rect) {
    let prediction_ready = matches!(app.dashboard.prediction, PredictionSection::Ready(_));
    let backtest_ready = matches!(app.dashboard.backtest, BacktestSection::Ready(_));
    let (prediction_height, backtest_height) = match (prediction_ready, backtest_ready) {
        (true, true) => (Constraint::Percentage(45), Constraint::Min(0)),
        (true, false) => (Constraint::Min(0), Constraint::Length(STATUS_HEIGHT)),
        (false, _) => (Constraint::Length(STATUS_HEIGHT), Constraint::Min(0)),
    };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), prediction_height, backtest_height])
        .split(area);

    let title = Paragraph::new(vec![
        Line::from(Span::styled(
            APP_TITLE,
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(APP_SUBTITLE, Style::default().fg(Color::Gray))),
    ])
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::ALL));
    f.render_widget(title, chunks[0]);

    match &app.dashboard.prediction {
        PredictionSection::Disabled => render_status(
            f,
            chunks[1],
            PREDICTION_HEADER,
            "Prediction is off. Toggle 'Predict Next Day' to enable it.",
            Color::DarkGray,
        ),
        PredictionSection::Loading => {
            render_status(f, chunks[1], PREDICTION_HEADER, PREDICTION_LOADING, Color::Cyan)
        }
        PredictionSection::Failed(msg) => render_status(f, chunks[1], PREDICTION_HEADER, msg, Color::Red),
        PredictionSection::Ready(report) => render_prediction(f, report, app, chunks[1]),
    }

    match &app.dashboard.backtest {
        BacktestSection::Disabled => render_status(
            f,
            chunks[2],
            BACKTEST_HEADER,
            "Backtest is off. Toggle 'Run Backtest' to evaluate past predictions.",
            Color::DarkGray,
        ),
        BacktestSection::InvalidRange => {
            render_status(f, chunks[2], BACKTEST_HEADER, INVALID_RANGE_WARNING, Color::Yellow)
        }
        BacktestSection::Loading { start, end } => render_status(
            f,
            chunks[2],
            BACKTEST_HEADER,
            &BacktestSection::loading_message(*start, *end),
            Color::Cyan,
        ),
        BacktestSection::Empty => {
            render_status(f, chunks[2], BACKTEST_HEADER, EMPTY_BACKTEST_WARNING, Color::Yellow)
        }
        BacktestSection::Failed(msg) => render_status(f, chunks[2], BACKTEST_HEADER, msg, Color::Red),
        BacktestSection::Ready(report) => render_backtest(f, report, app, chunks[2]),
    }
}

fn render_status(f: &mut Frame, area: Rect, header: &str, msg: &str, color: Color) {
    let status = Paragraph::new(Span::styled(msg, Style::default().fg(color)))
        .wrap(Wrap { trim: true })
        .block(section_block(header));
    f.render_widget(status, area);
}

fn section_block(header: &str) -> Block<'_> {
    Block::default().borders(Borders::ALL).title(Span::styled(
        format!(" {} ", header),
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    ))
}

fn render_prediction(f: &mut Frame, report: &PredictionReport, app: &App, area: Rect) {
    let block = section_block(PREDICTION_HEADER);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(28), Constraint::Min(0)])
        .split(inner);

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(columns[0]);

    render_card(f, left[0], &report.card, Color::Green);

    let rows = report.history_rows.iter().map(|r| {
        Row::new(vec![Cell::from(r.date.as_str()), Cell::from(r.close.as_str())])
    });
    let table = Table::new(rows, [Constraint::Length(12), Constraint::Length(10)])
        .header(
            Row::new(vec!["Date", "Close"])
                .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        )
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" Last {} Days ", app.dashboard.config().history_days_to_show())),
        );
    f.render_widget(table, left[1]);

    render_chart(f, columns[1], &report.chart);
}

fn render_backtest(f: &mut Frame, report: &BacktestReport, app: &App, area: Rect) {
    let block = section_block(BACKTEST_HEADER);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(3),
            Constraint::Min(0),
        ])
        .split(inner);

    f.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled(METRICS_HEADER, Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
            Span::styled(
                format!("  {} to {}", report.start, report.end),
                Style::default().fg(Color::Gray),
            ),
        ])),
        chunks[0],
    );

    let card_areas = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 4); 4])
        .split(chunks[1]);
    for (card, card_area) in report.cards.iter().zip(card_areas.iter()) {
        render_card(f, *card_area, card, Color::Yellow);
    }

    let expanded = app.dashboard.details_expanded;
    let lower = Layout::default()
        .direction(Direction::Vertical)
        .constraints(if expanded {
            [Constraint::Percentage(50), Constraint::Min(0)]
        } else {
            [Constraint::Min(0), Constraint::Length(1)]
        })
        .split(chunks[2]);

    render_chart(f, lower[0], &report.chart);

    if !expanded {
        f.render_widget(
            Paragraph::new(Span::styled(
                format!("▶ {} (F2 to expand)", DETAILS_HEADER),
                Style::default().fg(Color::Gray),
            )),
            lower[1],
        );
        return;
    }

    let skip = (app.details_scroll as usize).min(report.rows.len().saturating_sub(1));
    let rows = report.rows.iter().skip(skip).map(|r| {
        let error_color = if r.error.starts_with('-') { Color::Red } else { Color::Green };
        Row::new(vec![
            Cell::from(r.date.as_str()),
            Cell::from(r.actual.as_str()),
            Cell::from(r.predicted.as_str()),
            Cell::from(Span::styled(r.error.as_str(), Style::default().fg(error_color))),
            Cell::from(r.pct_error.as_str()),
        ])
    });
    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(9),
            Constraint::Length(9),
        ],
    )
    .header(
        Row::new(vec!["Date", "Actual", "Predicted", "Error", "Error %"])
            .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
    )
    .block(Block::default().borders(Borders::ALL).title(format!(
        " ▼ {} ({} rows, F2 to collapse) ",
        DETAILS_HEADER,
        report.rows.len()
    )));
    f.render_widget(table, lower[1]);
}

fn render_card(f: &mut Frame, area: Rect, card: &MetricCard, color: Color) {
    let value = Paragraph::new(Span::styled(
        card.value.as_str(),
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    ))
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::ALL).title(format!(" {} ", card.label)));
    f.render_widget(value, area);
}

fn series_color(style: SeriesStyle) -> Color {
    match style {
        SeriesStyle::Primary => Color::Cyan,
        SeriesStyle::Secondary => Color::Yellow,
    }
}

fn axis_date(ts: f64) -> String {
    DateTime::from_timestamp(ts as i64, 0)
        .map(|d| d.format("%b %d").to_string())
        .unwrap_or_default()
}

fn render_chart(f: &mut Frame, area: Rect, spec: &ChartSpec) {
    let block = Block::default().borders(Borders::ALL).title(Span::styled(
        format!(" {} ", spec.title),
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    ));

    let (Some((x_min, x_max)), Some((y_min, y_max))) = (spec.x_bounds(), spec.y_bounds()) else {
        f.render_widget(
            Paragraph::new(Span::styled("No data to plot", Style::default().fg(Color::DarkGray))).block(block),
            area,
        );
        return;
    };

    let x_max = if x_max > x_min { x_max } else { x_min + 1.0 };
    let pad = ((y_max - y_min) * 0.05).max(0.5);
    let (y_lo, y_hi) = (y_min - pad, y_max + pad);

    let datasets: Vec<Dataset> = spec
        .series
        .iter()
        .map(|s| {
            Dataset::default()
                .name(s.name.clone())
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(series_color(s.style)))
                .data(&s.points)
        })
        .collect();

    let chart = Chart::new(datasets)
        .block(block)
        .x_axis(
            Axis::default()
                .title(spec.x_label.clone())
                .style(Style::default().fg(Color::Gray))
                .bounds([x_min, x_max])
                .labels(vec![
                    Span::styled(axis_date(x_min), Style::default().fg(Color::Gray)),
                    Span::styled(axis_date(x_max), Style::default().fg(Color::Gray)),
                ]),
        )
        .y_axis(
            Axis::default()
                .title(spec.y_label.clone())
                .style(Style::default().fg(Color::Gray))
                .bounds([y_lo, y_hi])
                .labels(vec![
                    Span::styled(format!("{:.1}", y_min), Style::default().fg(Color::Gray)),
                    Span::styled(format!("{:.1}", y_max), Style::default().fg(Color::Gray)),
                ]),
        );

    f.render_widget(chart, area);
}

pub fn render_fatal(f: &mut Frame, message: &str) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(35),
            Constraint::Length(6),
            Constraint::Min(0),
        ])
        .split(f.area());

    let text = Paragraph::new(vec![
        Line::from(Span::styled(message, Style::default().fg(Color::Red).add_modifier(Modifier::BOLD))),
        Line::from(""),
        Line::from(Span::styled("Press any key to exit", Style::default().fg(Color::Gray))),
    ])
    .alignment(Alignment::Center)
    .wrap(Wrap { trim: true })
    .block(Block::default().borders(Borders::ALL).title(" FinSight "));

    f.render_widget(text, layout[1]);
}
