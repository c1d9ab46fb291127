//! Record normalizer: one raw newline-delimited fill -> one canonical
//! [`Fill`]. Failures stay per-record; a bad line never aborts its block.

use core_types::raw::RawFill;
use core_types::types::{Fill, Side, EXCHANGE};
use log::debug;
use thiserror::Error;

/// A single source record that cannot be mapped onto the canonical schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed record: {reason}")]
pub struct MalformedRecord {
    pub reason: String,
}

impl MalformedRecord {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Everything recovered from one decompressed block payload.
#[derive(Debug, Default)]
pub struct BlockRecords {
    pub fills: Vec<Fill>,
    /// Count of records dropped as malformed.
    pub skipped: u64,
    /// First few failure reasons, for the run log.
    pub sample_errors: Vec<String>,
}

const SAMPLE_ERROR_CAP: usize = 3;

/// Parse and normalize one JSON line.
pub fn normalize_line(line: &str) -> Result<Fill, MalformedRecord> {
    let raw: RawFill = serde_json::from_str(line)
        .map_err(|err| MalformedRecord::new(format!("invalid json: {err}")))?;
    normalize(raw)
}

/// Map a raw fill onto the canonical schema. Required fields are `user`,
/// `coin`, `px`, `sz`, `side`, and `time`; anything else defaults.
pub fn normalize(raw: RawFill) -> Result<Fill, MalformedRecord> {
    let wallet_address = required_str(raw.user, "user")?;
    let asset = required_str(raw.coin, "coin")?;
    let price = amount_field(raw.px, "px")?;
    let quantity = amount_field(raw.sz, "sz")?;
    let side = match raw.side.as_deref() {
        Some("B") => Side::Buy,
        Some("A") => Side::Sell,
        // A recognizable-but-unexpected code is still a malformed record;
        // defaulting it would silently misattribute direction.
        Some(other) => {
            return Err(MalformedRecord::new(format!("unexpected side {other:?}")))
        }
        None => return Err(MalformedRecord::new("missing side")),
    };
    let timestamp_ms = match raw.time {
        Some(ms) if ms >= 0 => ms,
        Some(ms) => return Err(MalformedRecord::new(format!("invalid time {ms}"))),
        None => return Err(MalformedRecord::new("missing time")),
    };
    let fee = match raw.fee {
        Some(value) => signed_amount(&value, "fee")?,
        None => 0.0,
    };
    let twap_id = raw.oid.map(|oid| oid.to_string()).unwrap_or_default();

    Ok(Fill {
        wallet_address,
        timestamp_ms,
        asset,
        quantity,
        price,
        side,
        fee,
        twap_id,
        exchange: EXCHANGE.to_string(),
        tid: raw.tid,
    })
}

/// Normalize a whole decompressed payload, counting malformed records
/// instead of propagating them.
pub fn normalize_block(payload: &[u8]) -> BlockRecords {
    let text = String::from_utf8_lossy(payload);
    let mut out = BlockRecords::default();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match normalize_line(line) {
            Ok(fill) => out.fills.push(fill),
            Err(err) => {
                out.skipped += 1;
                if out.sample_errors.len() < SAMPLE_ERROR_CAP {
                    out.sample_errors.push(err.reason.clone());
                }
                debug!("skipping record: {}", err.reason);
            }
        }
    }
    out
}

fn required_str(value: Option<String>, name: &str) -> Result<String, MalformedRecord> {
    match value {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(MalformedRecord::new(format!("missing {name}"))),
    }
}

fn amount_field(value: Option<String>, name: &str) -> Result<f64, MalformedRecord> {
    let raw = value.ok_or_else(|| MalformedRecord::new(format!("missing {name}")))?;
    let parsed = signed_amount(&raw, name)?;
    if parsed < 0.0 {
        return Err(MalformedRecord::new(format!("negative {name}: {raw}")));
    }
    Ok(parsed)
}

fn signed_amount(raw: &str, name: &str) -> Result<f64, MalformedRecord> {
    let parsed: f64 = raw
        .trim()
        .parse()
        .map_err(|_| MalformedRecord::new(format!("invalid {name}: {raw:?}")))?;
    if !parsed.is_finite() {
        return Err(MalformedRecord::new(format!("invalid {name}: {raw:?}")));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const FULL_LINE: &str = r#"{"user":"0xA","coin":"BTC","px":"45000.0","sz":"1.5","side":"B","time":1704110400000,"oid":12345,"fee":"10.0"}"#;

    #[test]
    fn maps_source_fields_onto_canonical_schema() {
        let fill = normalize_line(FULL_LINE).unwrap();
        assert_eq!(fill.wallet_address, "0xA");
        assert_eq!(fill.asset, "BTC");
        assert_eq!(fill.price, 45000.0);
        assert_eq!(fill.quantity, 1.5);
        assert_eq!(fill.side, Side::Buy);
        assert_eq!(fill.fee, 10.0);
        assert_eq!(fill.twap_id, "12345");
        assert_eq!(fill.exchange, "hyperliquid");
        assert_eq!(
            fill.timestamp().unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn ask_side_maps_to_sell() {
        let line = FULL_LINE.replace("\"side\":\"B\"", "\"side\":\"A\"");
        assert_eq!(normalize_line(&line).unwrap().side, Side::Sell);
    }

    #[test]
    fn unexpected_side_is_rejected_not_defaulted() {
        let line = FULL_LINE.replace("\"side\":\"B\"", "\"side\":\"X\"");
        let err = normalize_line(&line).unwrap_err();
        assert!(err.reason.contains("unexpected side"));
    }

    #[test]
    fn missing_price_is_malformed() {
        let line = FULL_LINE.replace("\"px\":\"45000.0\",", "");
        let err = normalize_line(&line).unwrap_err();
        assert!(err.reason.contains("missing px"));
    }

    #[test]
    fn negative_quantity_is_malformed() {
        let line = FULL_LINE.replace("\"sz\":\"1.5\"", "\"sz\":\"-1.5\"");
        let err = normalize_line(&line).unwrap_err();
        assert!(err.reason.contains("negative sz"));
    }

    #[test]
    fn fee_defaults_to_zero_when_absent() {
        let line = FULL_LINE.replace(",\"fee\":\"10.0\"", "");
        assert_eq!(normalize_line(&line).unwrap().fee, 0.0);
    }

    #[test]
    fn missing_order_id_yields_empty_twap_id() {
        let line = FULL_LINE.replace("\"oid\":12345,", "");
        assert_eq!(normalize_line(&line).unwrap().twap_id, "");
    }

    #[test]
    fn trade_id_passes_through() {
        let line = FULL_LINE.replace(r#""fee":"10.0""#, r#""fee":"10.0","tid":67890"#);
        assert_eq!(normalize_line(&line).unwrap().tid, Some(67890));
    }

    #[test]
    fn one_bad_line_does_not_abort_the_block() {
        let good = FULL_LINE;
        let bad = FULL_LINE.replace("\"px\":\"45000.0\",", "");
        let payload = format!("{good}\n{bad}\n\n{good}\n");
        let block = normalize_block(payload.as_bytes());
        assert_eq!(block.fills.len(), 2);
        assert_eq!(block.skipped, 1);
        assert_eq!(block.sample_errors.len(), 1);
        assert!(block.sample_errors[0].contains("missing px"));
    }

    #[test]
    fn garbage_payload_counts_every_line_as_skipped() {
        let block = normalize_block(b"not json\nalso not json");
        assert!(block.fills.is_empty());
        assert_eq!(block.skipped, 2);
    }
}
