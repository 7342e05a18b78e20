//! Key normalization into the provider's canonical identifier format
//!
//! Exchange-suffixed identifiers look like `CODE.EXCHANGE` (`600000.SH`).
//! Input is case-insensitive and accepted in three shapes:
//! `600000`, `600000.sh` and `sh600000`.

use serde::{Deserialize, Serialize};

use super::TaskError;

/// How a template expects its key to be formatted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyFormat {
    /// `CODE.EXCHANGE`, exchange inferred for bare six-digit codes
    #[default]
    ExchangeSuffixed,
    /// Trimmed and upper-cased, otherwise untouched
    Raw,
}

const EXCHANGES: [&str; 3] = ["SH", "SZ", "BJ"];

/// Normalize a key according to `format`.
///
/// # Examples
///
/// ```
/// use bulk_fetcher::task::{normalize_key, KeyFormat};
///
/// assert_eq!(normalize_key("600000", KeyFormat::ExchangeSuffixed).unwrap(), "600000.SH");
/// assert_eq!(normalize_key("sz000001", KeyFormat::ExchangeSuffixed).unwrap(), "000001.SZ");
/// assert_eq!(normalize_key(" hsi ", KeyFormat::Raw).unwrap(), "HSI");
/// ```
pub fn normalize_key(raw: &str, format: KeyFormat) -> Result<String, TaskError> {
    let key = raw.trim().to_uppercase();
    if key.is_empty() {
        return Err(TaskError::InvalidKey("key cannot be empty".to_string()));
    }

    match format {
        KeyFormat::Raw => Ok(key),
        KeyFormat::ExchangeSuffixed => normalize_suffixed(&key),
    }
}

fn normalize_suffixed(key: &str) -> Result<String, TaskError> {
    if let Some((code, exchange)) = key.split_once('.') {
        validate_code(code, key)?;
        if !EXCHANGES.contains(&exchange) {
            return Err(TaskError::InvalidKey(format!(
                "unknown exchange suffix '{exchange}' in key '{key}'"
            )));
        }
        return Ok(format!("{code}.{exchange}"));
    }

    if let Some(exchange) = EXCHANGES.iter().find(|ex| key.starts_with(*ex)) {
        let code = &key[exchange.len()..];
        validate_code(code, key)?;
        return Ok(format!("{code}.{exchange}"));
    }

    validate_code(key, key)?;
    let exchange = infer_exchange(key)
        .ok_or_else(|| TaskError::InvalidKey(format!("cannot infer exchange for key '{key}'")))?;
    Ok(format!("{key}.{exchange}"))
}

fn validate_code(code: &str, key: &str) -> Result<(), TaskError> {
    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(TaskError::InvalidKey(format!(
            "expected a six-digit code in key '{key}'"
        )));
    }
    Ok(())
}

fn infer_exchange(code: &str) -> Option<&'static str> {
    match code.as_bytes().first()? {
        b'6' | b'9' => Some("SH"),
        b'0' | b'2' | b'3' => Some("SZ"),
        b'4' | b'8' => Some("BJ"),
        _ => None,
    }
}
