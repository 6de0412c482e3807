//! Gemini-backed predictor.
//!
//! Daily candles come from Yahoo Finance (see [`crate::data`]); each prediction
//! sends the recent closes to the Gemini `generateContent` endpoint and reads
//! the last number of the reply as the next close.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{CALENDAR_PADDING_DAYS, Config};
use crate::data::{self, Candle, StockData};
use crate::predictor::{BacktestRecord, Predictor, Query};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiPredictor {
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
    client: Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GeminiPredictor {
    /// Fails when `GEMINI_API_KEY` is missing.
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(anyhow::anyhow!(
                "GEMINI_API_KEY is not set (export it or add it to .env)"
            ))?;
        Self::with_endpoint(config, api_key, GEMINI_BASE_URL)
    }

    fn with_endpoint(config: &Config, api_key: String, base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("cannot build HTTP client")?;

        info!(
            "Gemini predictor ready: model={}, temperature={}",
            config.model(),
            config.temperature()
        );

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model().to_string(),
            temperature: config.temperature(),
            client,
        })
    }

    /// Daily candles covering `[first_day - padding, last_day]`.
    async fn fetch_span(
        &self,
        query: &Query,
        first_day: DateTime<Utc>,
        last_day: DateTime<Utc>,
    ) -> Result<StockData> {
        let padding = i64::from(query.days) * 2 + CALENDAR_PADDING_DAYS;
        let from = (first_day - Duration::days(padding)).date_naive();
        data::fetch_window(&query.symbol, from, last_day.date_naive()).await
    }

    async fn ask_next_close(&self, symbol: &str, context: &[Candle]) -> Result<f64> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: build_prompt(symbol, context),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: 32,
            },
        };

        // The key travels in a header so it never shows up in error URLs.
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("Gemini request failed")?
            .error_for_status()
            .context("Gemini returned an error status")?
            .json::<GenerateResponse>()
            .await
            .context("cannot decode Gemini response")?;

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .ok_or(anyhow::anyhow!("Gemini returned no candidates"))?;

        debug!("Gemini reply for {}: {:?}", symbol, text);
        parse_price(&text)
    }
}

#[async_trait]
impl Predictor for GeminiPredictor {
    fn name(&self) -> &str {
        "Gemini"
    }

    async fn predict_next_day(&self, query: &Query, verbose: bool) -> Result<f64> {
        let history = self.historical_data(query, Utc::now()).await?;
        if history.len() < 2 {
            return Err(anyhow::anyhow!(
                "not enough history for {} ({} candles)",
                query.symbol,
                history.len()
            ));
        }

        let prediction = self.ask_next_close(&query.symbol, &history).await?;
        if verbose {
            info!(
                "{}: last close {:.2}, predicted next close {:.2}",
                query.symbol,
                history.last().map(|c| c.close).unwrap_or_default(),
                prediction
            );
        }
        Ok(prediction)
    }

    async fn historical_data(&self, query: &Query, as_of: DateTime<Utc>) -> Result<Vec<Candle>> {
        let data = self.fetch_span(query, as_of, as_of).await?;
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
        let data = self.fetch_span(query, start, end).await?;
        let symbol = query.symbol.as_str();
        let records = replay_days(
            symbol,
            &data.history,
            (start.date_naive(), end.date_naive()),
            query.days as usize,
            verbose,
            |context| async move { self.ask_next_close(symbol, &context).await },
        )
        .await;
        Ok(records)
    }
}

/// Walks `history` in date order and asks for a prediction of every candle
/// dated inside `window` (inclusive), using at most `lookback` earlier candles
/// as context. Days with fewer than two prior candles, or whose prediction
/// fails, are logged and skipped.
async fn replay_days<F, Fut>(
    symbol: &str,
    history: &[Candle],
    window: (NaiveDate, NaiveDate),
    lookback: usize,
    verbose: bool,
    mut ask: F,
) -> Vec<BacktestRecord>
where
    F: FnMut(Vec<Candle>) -> Fut,
    Fut: Future<Output = Result<f64>>,
{
    let (first, last) = window;
    let mut records = Vec::new();
    for (i, candle) in history.iter().enumerate() {
        let day = candle.date.date_naive();
        if day < first || day > last {
            continue;
        }

        let context = &history[i.saturating_sub(lookback)..i];
        if context.len() < 2 {
            warn!("Skipping {}: only {} prior candles", day, context.len());
            continue;
        }

        match ask(context.to_vec()).await {
            Ok(predicted) => {
                let record = BacktestRecord::new(candle.date, candle.close, predicted);
                if verbose {
                    info!(
                        "{} {}: actual={:.2} predicted={:.2} error={:.2} ({:.2}%)",
                        symbol, day, record.actual, record.predicted, record.error, record.pct_error
                    );
                } else {
                    debug!("{} {}: predicted={:.2}", symbol, day, record.predicted);
                }
                records.push(record);
            }
            Err(e) => warn!("Prediction for {} {} failed: {:#}", symbol, day, e),
        }
    }
    records
}

fn build_prompt(symbol: &str, context: &[Candle]) -> String {
    let mut prompt = format!(
        "You are a financial forecasting assistant. Below are the most recent {} daily candles for {} \
         (date, open, high, low, close, volume).\n",
        context.len(),
        symbol
    );
    for c in context {
        prompt.push_str(&format!(
            "{}, {:.2}, {:.2}, {:.2}, {:.2}, {:.0}\n",
            c.date.format("%Y-%m-%d"),
            c.open,
            c.high,
            c.low,
            c.close,
            c.volume
        ));
    }
    prompt.push_str(
        "Predict the closing price for the next trading day. \
         Respond with only the number, no currency symbol and no explanation.",
    );
    prompt
}

/// Last decimal number in `text`; `$` and thousands separators are ignored.
///
/// Models that ignore the "number only" instruction tend to restate the date
/// or the symbol before the answer, so the final number wins.
pub fn parse_price(text: &str) -> Result<f64> {
    let cleaned: String = text.chars().filter(|c| *c != ',' && *c != '$').collect();

    let mut current = String::new();
    let mut found: Vec<String> = Vec::new();
    for ch in cleaned.chars().chain(std::iter::once(' ')) {
        let starts_negative = ch == '-' && current.is_empty();
        if ch.is_ascii_digit() || (ch == '.' && !current.contains('.')) || starts_negative {
            current.push(ch);
        } else if !current.is_empty() {
            found.push(std::mem::take(&mut current));
        }
    }

    found
        .iter()
        .filter_map(|token| token.trim_end_matches('.').parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .last()
        .ok_or(anyhow::anyhow!("no price in model reply: {:?}", text.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{day, history_ending_at};
    use std::cell::RefCell;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn last_close(context: &[Candle]) -> f64 {
        context.last().map(|c| c.close).unwrap_or_default()
    }

    #[test]
    fn test_parse_price_plain_number() {
        assert_eq!(parse_price("187.42").unwrap(), 187.42);
        assert_eq!(parse_price("  187.42\n").unwrap(), 187.42);
    }

    #[test]
    fn test_parse_price_with_decoration() {
        assert_eq!(parse_price("$1,234.50").unwrap(), 1234.5);
        assert_eq!(parse_price("Predicted close: 151.3.").unwrap(), 151.3);
    }

    #[test]
    fn test_parse_price_takes_the_final_number() {
        assert_eq!(parse_price("On 2024-06-17 the close will be 190.5").unwrap(), 190.5);
        assert_eq!(parse_price("AAPL next close: $212.04").unwrap(), 212.04);
    }

    #[test]
    fn test_parse_price_rejects_text_without_number() {
        assert!(parse_price("I cannot predict prices.").is_err());
        assert!(parse_price("- . -").is_err());
    }

    #[test]
    fn test_prompt_lists_every_candle() {
        let history = history_ending_at(5, 149.80);
        let prompt = build_prompt("AAPL", &history);
        assert!(prompt.contains("AAPL"));
        assert_eq!(prompt.lines().filter(|l| l.starts_with("20")).count(), 5);
        assert!(prompt.contains("149.80"));
    }

    #[test]
    fn test_new_requires_api_key() {
        // SAFETY: no other test in this crate reads GEMINI_API_KEY.
        unsafe { std::env::remove_var("GEMINI_API_KEY") };
        let config = Config::new("AAPL", 30, 10);
        let err = GeminiPredictor::new(&config).err().unwrap();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[tokio::test]
    async fn test_api_key_is_not_leaked_by_request_errors() {
        let config = Config::new("AAPL", 30, 10);
        // Nothing listens on the discard port, so the request fails to connect.
        let predictor =
            GeminiPredictor::with_endpoint(&config, "SECRET-KEY-123".to_string(), "http://127.0.0.1:9/")
                .unwrap();
        let err = predictor
            .ask_next_close("AAPL", &history_ending_at(5, 150.0))
            .await
            .unwrap_err();

        let shown = format!("Prediction failed: {:#}", err);
        assert!(shown.contains("Gemini request failed"), "{}", shown);
        assert!(!shown.contains("SECRET-KEY-123"), "{}", shown);
        assert!(!format!("{:?}", err).contains("SECRET-KEY-123"));
    }

    #[tokio::test]
    async fn test_replay_keeps_days_inside_window_with_enough_context() {
        // 2024-03-01 .. 2024-03-14, ten weekdays, closes 105.5 .. 110.0
        let history = history_ending_at(10, 110.0);
        let contexts = RefCell::new(Vec::new());

        let records = replay_days(
            "AAPL",
            &history,
            (date(2024, 3, 1), date(2024, 3, 7)),
            3,
            false,
            |context| {
                contexts.borrow_mut().push(context.len());
                async move { Ok(last_close(&context)) }
            },
        )
        .await;

        // 03-01 and 03-04 lack two prior candles; 03-08 onwards is outside the window.
        let dates: Vec<_> = records.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day(2024, 3, 5), day(2024, 3, 6), day(2024, 3, 7)]);
        assert_eq!(*contexts.borrow(), vec![2, 3, 3]);
        assert!(records.iter().all(|r| (r.error - 0.5).abs() < 1e-9));
    }

    #[tokio::test]
    async fn test_replay_window_is_inclusive_at_both_ends() {
        let history = history_ending_at(10, 110.0);
        let records = replay_days(
            "AAPL",
            &history,
            (date(2024, 3, 12), date(2024, 3, 13)),
            30,
            true,
            |context| async move { Ok(last_close(&context)) },
        )
        .await;
        let dates: Vec<_> = records.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day(2024, 3, 12), day(2024, 3, 13)]);
    }

    #[tokio::test]
    async fn test_replay_skips_days_whose_prediction_fails() {
        let history = history_ending_at(10, 110.0);
        let mut calls = 0;
        let records = replay_days(
            "AAPL",
            &history,
            (date(2024, 3, 1), date(2024, 3, 14)),
            5,
            false,
            |context| {
                calls += 1;
                let fail = calls == 2;
                async move {
                    if fail {
                        Err(anyhow::anyhow!("rate limited"))
                    } else {
                        Ok(last_close(&context))
                    }
                }
            },
        )
        .await;

        assert_eq!(calls, 8);
        assert_eq!(records.len(), 7);
        assert!(!records.iter().any(|r| r.date == day(2024, 3, 6)));
    }

    #[tokio::test]
    async fn test_replay_with_every_call_failing_is_empty() {
        let history = history_ending_at(10, 110.0);
        let records = replay_days(
            "AAPL",
            &history,
            (date(2024, 3, 1), date(2024, 3, 14)),
            5,
            false,
            |_context| async { Err::<f64, _>(anyhow::anyhow!("quota exceeded")) },
        )
        .await;
        assert!(records.is_empty());
    }
}
