//! MLIT real-estate transaction API transport.
//!
//! One blocking GET per call against the XIT001 endpoint, with a fixed
//! per-request timeout. Response bodies look like:
//!
//! ```text
//! {"status": "OK", "data": [{"MunicipalityCode": "13101", "Municipality": "Chiyoda Ward",
//!   "TradePrice": "120000000", "PricePerUnit": "1500000", ...}, ...]}
//! ```
//!
//! Numeric fields arrive as strings (sometimes empty); they are parsed
//! leniently and become NaN when unusable.

use super::provider::{FetchError, Fetched, Transport};
use crate::config::FetchConfig;
use crate::domain::{RawRecord, RequestKey};
use serde::Deserialize;
use serde_json::Value;

/// Header carrying the subscription key.
pub const API_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Upstream status value meaning "data follows".
const STATUS_OK: &str = "OK";

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TransactionRow {
    #[serde(rename = "MunicipalityCode")]
    municipality_code: Value,
    #[serde(rename = "Municipality", default)]
    municipality: Option<String>,
    #[serde(rename = "TradePrice", default)]
    trade_price: Option<Value>,
    #[serde(rename = "PricePerUnit", default)]
    price_per_unit: Option<Value>,
}

/// HTTP transport for the MLIT API.
pub struct MlitTransport {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

impl MlitTransport {
    pub fn new(config: &FetchConfig, api_key: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: api_key.into(),
        })
    }
}

impl Transport for MlitTransport {
    fn name(&self) -> &str {
        "mlit_xit001"
    }

    fn execute(&self, key: &RequestKey) -> Result<Fetched, FetchError> {
        let year = key.year.to_string();
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("year", year.as_str()),
                ("area", key.region.as_str()),
                ("priceClassification", key.classification.as_str()),
            ])
            .header(API_KEY_HEADER, self.api_key.as_str())
            .send()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        classify_status(resp.status().as_u16(), retry_after)?;

        let payload = resp
            .text()
            .map_err(|e| FetchError::Transport(format!("reading body for {key}: {e}")))?;
        let records = parse_payload(&payload, key.year)?;
        Ok(Fetched { payload, records })
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
///
/// 2xx passes; 429 and 5xx are retryable; any other status is a fatal client
/// error.
pub fn classify_status(status: u16, retry_after_secs: Option<u64>) -> Result<(), FetchError> {
    match status {
        200..=299 => Ok(()),
        429 | 500..=599 => Err(FetchError::RateLimitOrServer {
            status,
            retry_after_secs,
        }),
        _ => Err(FetchError::Client { status }),
    }
}

/// Parse a response body into records for `year`.
///
/// A body whose `status` is anything other than `"OK"` yields zero records.
/// A body that is not the documented shape is a `MalformedResponse`.
pub fn parse_payload(payload: &str, year: i32) -> Result<Vec<RawRecord>, FetchError> {
    let envelope: Envelope = serde_json::from_str(payload)
        .map_err(|e| FetchError::MalformedResponse(format!("envelope: {e}")))?;

    if envelope.status != STATUS_OK {
        return Ok(Vec::new());
    }

    let rows: Vec<TransactionRow> = match envelope.data {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(data) => serde_json::from_value(data)
            .map_err(|e| FetchError::MalformedResponse(format!("data rows: {e}")))?,
    };

    rows.into_iter()
        .enumerate()
        .map(|(i, row)| {
            let region_code = code_string(&row.municipality_code).ok_or_else(|| {
                FetchError::MalformedResponse(format!("row {i}: MunicipalityCode is not a code"))
            })?;
            Ok(RawRecord {
                region_code,
                region_name: row.municipality.unwrap_or_default(),
                price: lenient_number(row.trade_price.as_ref()),
                unit_price: lenient_number(row.price_per_unit.as_ref()),
                year,
            })
        })
        .collect()
}

fn code_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numbers may be JSON numbers or strings like `"25,000,000"`; anything else is NaN.
fn lenient_number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => {
            let cleaned: String = s.chars().filter(|c| *c != ',').collect();
            cleaned.trim().parse::<f64>().unwrap_or(f64::NAN)
        }
        _ => f64::NAN,
    }
}
