//! Share tokens: a whole record snapshot packed into one URL query parameter.
//!
//! Tokens are URL-safe base64 without padding over the UTF-8 JSON of a versioned
//! envelope. Decoding tries a fixed list of strategies in order because intermediate
//! layers re-encode URLs in different ways.

use std::borrow::Cow;

use base64::alphabet;
use base64::engine::general_purpose::{
    GeneralPurpose, GeneralPurposeConfig, STANDARD, URL_SAFE_NO_PAD,
};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::domain::SaleRecord;

pub const SHARE_TOKEN_VERSION: u8 = 1;

/// Query parameter carrying the token on a record URL.
pub const SHARE_TOKEN_PARAM: &str = "token";

const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Serialize)]
struct ShareEnvelopeRef<'a> {
    v: u8,
    record: &'a SaleRecord,
}

#[derive(Deserialize)]
struct ShareEnvelope {
    v: u8,
    record: SaleRecord,
}

/// One way of turning received text back into a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// Token as handed over by the transport: base64 bytes read as UTF-8.
    AsReceived,
    /// One more percent-decoding pass first, for URLs encoded twice along the way.
    PercentDecoded,
    /// Plain base64 text with each byte taken as one character.
    RawBase64Text,
}

impl DecodeStrategy {
    pub const ORDERED: [Self; 3] = [Self::AsReceived, Self::PercentDecoded, Self::RawBase64Text];

    pub const fn label(self) -> &'static str {
        match self {
            DecodeStrategy::AsReceived => "as_received",
            DecodeStrategy::PercentDecoded => "percent_decoded",
            DecodeStrategy::RawBase64Text => "raw_base64_text",
        }
    }

    pub fn attempt(self, token: &str) -> Result<SaleRecord, String> {
        match self {
            DecodeStrategy::AsReceived => decode_utf8_payload(token),
            DecodeStrategy::PercentDecoded => {
                let decoded = percent_decode_str(token)
                    .decode_utf8()
                    .map_err(|err| format!("percent decoding produced invalid UTF-8: {err}"))?;
                decode_utf8_payload(&decoded)
            }
            DecodeStrategy::RawBase64Text => {
                let bytes = LENIENT_STANDARD
                    .decode(token.trim())
                    .map_err(|err| format!("not base64: {err}"))?;
                let text: String = bytes.iter().map(|byte| char::from(*byte)).collect();
                parse_envelope(&text)
            }
        }
    }
}

/// Map the URL-safe alphabet back to the standard one and restore padding.
fn normalize_base64(token: &str) -> Result<String, String> {
    let mut normalized: String = token
        .trim()
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            ' ' => '+',
            other => other,
        })
        .collect();

    match normalized.len() % 4 {
        0 => {}
        1 => return Err("token length is not valid base64".to_string()),
        remainder => normalized.push_str(&"=".repeat(4 - remainder)),
    }
    Ok(normalized)
}

fn decode_utf8_payload(token: &str) -> Result<SaleRecord, String> {
    let normalized = normalize_base64(token)?;
    let bytes = STANDARD
        .decode(normalized.as_bytes())
        .map_err(|err| format!("not base64: {err}"))?;
    let text = String::from_utf8(bytes).map_err(|err| format!("payload is not UTF-8: {err}"))?;
    parse_envelope(&text)
}

fn parse_envelope(text: &str) -> Result<SaleRecord, String> {
    let envelope: ShareEnvelope =
        serde_json::from_str(text).map_err(|err| format!("payload is not a record: {err}"))?;
    if envelope.v != SHARE_TOKEN_VERSION {
        return Err(format!("unsupported share token version {}", envelope.v));
    }
    Ok(envelope.record)
}

#[derive(Debug, thiserror::Error)]
pub enum ShareTokenError {
    #[error("record could not be serialized for sharing: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("share token could not be decoded ({})", .attempts.join("; "))]
    DecodeFailure { attempts: Vec<String> },
}

/// Encodes records into share tokens and back.
#[derive(Debug, Clone)]
pub struct ShareTokenCodec {
    strategies: Vec<DecodeStrategy>,
}

impl Default for ShareTokenCodec {
    fn default() -> Self {
        Self {
            strategies: DecodeStrategy::ORDERED.to_vec(),
        }
    }
}

impl ShareTokenCodec {
    pub fn with_strategies(strategies: Vec<DecodeStrategy>) -> Self {
        Self { strategies }
    }

    pub fn strategies(&self) -> &[DecodeStrategy] {
        &self.strategies
    }

    pub fn encode(&self, record: &SaleRecord) -> Result<String, ShareTokenError> {
        let envelope = ShareEnvelopeRef {
            v: SHARE_TOKEN_VERSION,
            record,
        };
        let bytes = serde_json::to_vec(&envelope)?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn decode(&self, token: &str) -> Result<SaleRecord, ShareTokenError> {
        self.decode_with_strategy(token).map(|(record, _)| record)
    }

    /// Decode and report which strategy succeeded. A failure never carries a partial
    /// record.
    pub fn decode_with_strategy(
        &self,
        token: &str,
    ) -> Result<(SaleRecord, DecodeStrategy), ShareTokenError> {
        let mut attempts = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            match strategy.attempt(token) {
                Ok(record) => {
                    debug!(strategy = strategy.label(), "share token decoded");
                    return Ok((record, *strategy));
                }
                Err(reason) => {
                    debug!(strategy = strategy.label(), %reason, "share token strategy failed");
                    attempts.push(format!("{}: {reason}", strategy.label()));
                }
            }
        }
        warn!(attempts = attempts.len(), "share token rejected by every strategy");
        Err(ShareTokenError::DecodeFailure { attempts })
    }
}

/// Query parameters of a record URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ShareLinkParams {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub link: bool,
    #[serde(default)]
    pub token: Option<String>,
}

impl ShareLinkParams {
    /// Hand out the prefill token once; later calls for the same navigation get `None`.
    pub fn take_token(&mut self) -> Option<String> {
        self.token.take().filter(|token| !token.trim().is_empty())
    }

    /// Build the query string for a record URL.
    pub fn to_query(&self) -> String {
        let mut parts: Vec<Cow<'_, str>> = Vec::new();
        if let Some(id) = &self.id {
            parts.push(Cow::Owned(format!(
                "id={}",
                percent_encoding::utf8_percent_encode(id, percent_encoding::NON_ALPHANUMERIC)
            )));
        }
        if self.link {
            parts.push(Cow::Borrowed("link=true"));
        }
        if let Some(token) = &self.token {
            parts.push(Cow::Owned(format!("{SHARE_TOKEN_PARAM}={token}")));
        }
        parts.join("&")
    }
}
