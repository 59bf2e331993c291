//! Checkpoint codecs and timestamp formatting.
//!
//! All persisted timestamps are UTC ISO-8601 with millisecond precision so
//! checkpoints stay portable and readable. State blobs are JSON values; the
//! checkpoint store treats them as opaque.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Error from encoding or decoding a checkpoint blob.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode: {0}")]
    Encode(String),
    #[error("decode: {0}")]
    Decode(String),
}

/// Formats a timestamp as UTC ISO-8601 with millisecond precision (`2025-03-01T12:30:45.123Z`).
pub fn iso_millis(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current wall clock in the persisted format.
pub fn now_iso() -> String {
    iso_millis(Utc::now())
}

/// Encodes a state value into the opaque blob form the checkpoint store accepts.
pub fn encode_state<S: Serialize>(state: &S) -> Result<serde_json::Value, CodecError> {
    serde_json::to_value(state).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decodes a blob previously produced by [`encode_state`].
pub fn decode_state<S: DeserializeOwned>(blob: &serde_json::Value) -> Result<S, CodecError> {
    serde_json::from_value(blob.clone()).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Serde adapter serializing `DateTime<Utc>` in the millisecond ISO form.
pub mod iso8601_millis {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&iso_millis(*at))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(de)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `Option<DateTime<Utc>>` in the same format.
pub mod iso8601_millis_opt {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &Option<DateTime<Utc>>, ser: S) -> Result<S::Ok, S::Error> {
        match at {
            Some(at) => ser.serialize_some(&iso_millis(*at)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let s: Option<String> = Option::deserialize(de)?;
        match s {
            Some(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// **Scenario**: iso_millis renders exactly three fractional digits and a Z suffix.
    #[test]
    fn iso_millis_format() {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::milliseconds(678);
        assert_eq!(iso_millis(at), "2025-01-02T03:04:05.678Z");
    }

    /// **Scenario**: A struct with an iso8601_millis field round-trips losslessly at ms precision.
    #[test]
    fn datetime_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Stamped {
            #[serde(with = "iso8601_millis")]
            at: DateTime<Utc>,
        }
        let at = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap()
            + chrono::Duration::milliseconds(1);
        let blob = encode_state(&Stamped { at }).unwrap();
        assert_eq!(blob["at"], "2024-12-31T23:59:59.001Z");
        let back: Stamped = decode_state(&blob).unwrap();
        assert_eq!(back.at, at);
    }

    /// **Scenario**: decode_state surfaces a Decode error for a shape mismatch.
    #[test]
    fn decode_error_on_mismatch() {
        let blob = serde_json::json!({"not": "a number"});
        let out: Result<u32, _> = decode_state(&blob);
        assert!(matches!(out, Err(CodecError::Decode(_))));
    }
}
