//! AI narrative summaries over the loaded client data.
//!
//! The request carries a small sample plus shape information, never the
//! full dataset. Responses must be strict JSON in the [`AiSummary`] shape.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::ClientRecord;
use crate::normalize::parse_date;

pub const SAMPLE_ROWS: usize = 10;
const DATA_HASH_LEN: usize = 32;

const SYSTEM_PROMPT: &str = "You are a business analyst for a chain of fitness studios. \
Study the client retention data you are given and answer with a single JSON object with \
the fields summary (string), keyInsights (string array), trends (string array), \
recommendations (string array) and dataQuality (object with score 0-100 and issues string array). \
Do not add any other text.";

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("missing api key: set OPENAI_API_KEY to enable AI summaries")]
    MissingApiKey,
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("model returned no content")]
    EmptyResponse,
    #[error("malformed summary: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Span of parseable first-visit dates, if there are any.
    pub fn of(records: &[ClientRecord]) -> Option<Self> {
        let mut dates = records
            .iter()
            .filter_map(|record| record.first_visit_date.as_deref().and_then(parse_date));
        let first = dates.next()?;
        let (start, end) = dates.fold((first, first), |(start, end), date| {
            (start.min(date), end.max(date))
        });
        Some(Self { start, end })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRequest {
    pub context: String,
    pub location_id: String,
    pub sample: Vec<ClientRecord>,
    pub total_rows: usize,
    pub columns: Vec<String>,
    pub filters: BTreeMap<String, String>,
    pub date_range: Option<DateRange>,
}

impl SummaryRequest {
    pub fn from_records(
        context: &str,
        location_id: &str,
        records: &[ClientRecord],
        filters: BTreeMap<String, String>,
        date_range: Option<DateRange>,
    ) -> Self {
        Self {
            context: context.to_string(),
            location_id: location_id.to_string(),
            sample: records.iter().take(SAMPLE_ROWS).cloned().collect(),
            total_rows: records.len(),
            columns: ClientRecord::COLUMNS.iter().map(|c| c.to_string()).collect(),
            filters,
            date_range: date_range.or_else(|| DateRange::of(records)),
        }
    }

    /// Cache key for stored summaries. Not a cryptographic hash: a collision
    /// only means a stale summary is served.
    pub fn data_hash(&self) -> String {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Fingerprint<'a> {
            total_rows: usize,
            columns_analyzed: &'a [String],
            filters: &'a BTreeMap<String, String>,
            date_range: &'a Option<DateRange>,
        }

        let fingerprint = Fingerprint {
            total_rows: self.total_rows,
            columns_analyzed: &self.columns,
            filters: &self.filters,
            date_range: &self.date_range,
        };
        let bytes = serde_json::to_vec(&fingerprint).unwrap_or_default();
        let mut encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        encoded.truncate(DATA_HASH_LEN);
        encoded
    }

    pub fn prompt(&self) -> Result<String, SummaryError> {
        let payload =
            serde_json::to_string_pretty(self).map_err(|e| SummaryError::Malformed(e.to_string()))?;
        Ok(format!(
            "Summarise the {} data for location {}.\n\n{}",
            self.context, self.location_id, payload
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQuality {
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiSummary {
    pub summary: String,
    #[serde(default)]
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub trends: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub data_quality: DataQuality,
}

/// Parse the model's reply, tolerating a surrounding markdown code fence.
pub fn parse_summary(content: &str) -> Result<AiSummary, SummaryError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    if body.is_empty() {
        return Err(SummaryError::EmptyResponse);
    }
    serde_json::from_str(body).map_err(|e| SummaryError::Malformed(e.to_string()))
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client.
#[derive(Debug, Clone)]
pub struct SummaryClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl SummaryClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(api_key: Option<String>, base_url: &str, model: &str) -> Result<Self, SummaryError> {
        let api_key = api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or(SummaryError::MissingApiKey)?;
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("studio-retention-analytics/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SummaryError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub async fn generate(&self, request: &SummaryRequest) -> Result<AiSummary, SummaryError> {
        let prompt = request.prompt()?;
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
            temperature: 0.3,
        };

        debug!(
            model = %self.model,
            rows = request.total_rows,
            "requesting AI summary for {}",
            request.context
        );

        let res = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => {
                let response = res
                    .json::<ChatResponse>()
                    .await
                    .map_err(|e| SummaryError::Malformed(e.to_string()))?;
                let content = response
                    .choices
                    .into_iter()
                    .find_map(|choice| choice.message.content)
                    .ok_or(SummaryError::EmptyResponse)?;
                parse_summary(&content)
            }
            StatusCode::UNAUTHORIZED => Err(SummaryError::InvalidApiKey),
            StatusCode::TOO_MANY_REQUESTS => Err(SummaryError::RateLimited),
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(SummaryError::Http { status, body })
            }
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> SummaryError {
    if e.is_timeout() {
        SummaryError::Timeout
    } else {
        SummaryError::Transport(e.to_string())
    }
}
