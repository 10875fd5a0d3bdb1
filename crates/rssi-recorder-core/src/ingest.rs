//! Telemetry decoding and sample extraction.
//!
//! Gateways publish one JSON object per message:
//!
//! ```json
//! { "gateway": { "id": "aa:bb:cc:dd:ee:ff" },
//!   "detections": [ { "id": "tag-01", "rssi": -61 } ] }
//! ```
//!
//! Decoding is best-effort. A payload that does not have this shape yields
//! `None`, and a detection without a finite numeric `rssi` is skipped. The
//! transport is noisy, so none of this is reported as an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{CollectionContext, normalize_source_id};

/// One signal-strength reading attributed to a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Normalized (trimmed, upper-case) source identifier.
    pub source_id: String,
    /// Signal strength in dBm.
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

/// A decoded message before any context filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub source_id: String,
    pub detections: Vec<Detection>,
}

/// A single usable detection entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub id: Option<String>,
    pub rssi: f64,
}

#[derive(Deserialize)]
struct RawMessage {
    gateway: RawGateway,
    detections: Vec<Value>,
}

#[derive(Deserialize)]
struct RawGateway {
    #[serde(alias = "mac")]
    id: String,
}

#[derive(Deserialize)]
struct RawDetection {
    #[serde(default, alias = "mac")]
    id: Option<String>,
    #[serde(default)]
    rssi: Option<Value>,
}

/// Decode a raw payload. Returns `None` for anything that is not a gateway
/// message with a detection list.
pub fn decode_message(payload: &[u8]) -> Option<DecodedMessage> {
    let raw: RawMessage = serde_json::from_slice(payload).ok()?;
    let source_id = normalize_source_id(&raw.gateway.id)?;

    let detections = raw
        .detections
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<RawDetection>(entry).ok())
        .filter_map(|d| {
            let rssi = d.rssi.as_ref().and_then(Value::as_f64)?;
            rssi.is_finite().then(|| Detection {
                id: d.id.and_then(|id| normalize_source_id(&id)),
                rssi,
            })
        })
        .collect();

    Some(DecodedMessage {
        source_id,
        detections,
    })
}

/// Samples pulled out of one message for the active context.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub source_id: String,
    pub samples: Vec<Sample>,
}

/// Turn a decoded message into samples for `context`.
///
/// Returns `None` when the message's source is filtered out by a point
/// context. `tag_filter`, when set, keeps only detections whose own id
/// matches it (case-insensitive). An accepted message with no usable
/// detections still yields an `Extraction` so survey windows can record the
/// source as observed.
pub fn extract(
    message: &DecodedMessage,
    context: &CollectionContext,
    tag_filter: Option<&str>,
    observed_at: DateTime<Utc>,
) -> Option<Extraction> {
    if !context.accepts_source(&message.source_id) {
        return None;
    }

    let tag = tag_filter.and_then(normalize_source_id);
    let samples = message
        .detections
        .iter()
        .filter(|d| match &tag {
            Some(tag) => d.id.as_deref() == Some(tag.as_str()),
            None => true,
        })
        .map(|d| Sample {
            source_id: message.source_id.clone(),
            value: d.rssi,
            observed_at,
        })
        .collect();

    Some(Extraction {
        source_id: message.source_id.clone(),
        samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(source: &str) -> CollectionContext {
        CollectionContext::point(source, "1", None).unwrap()
    }

    fn survey() -> CollectionContext {
        CollectionContext::survey("p", "0", "0", None).unwrap()
    }

    // -----------------------------------------------------------------------
    // Decoding
    // -----------------------------------------------------------------------

    #[test]
    fn decodes_well_formed_message() {
        let msg = decode_message(
            br#"{"gateway":{"id":"aa:bb"},"detections":[{"id":"t1","rssi":-60},{"id":"t2","rssi":-70.5}]}"#,
        )
        .unwrap();
        assert_eq!(msg.source_id, "AA:BB");
        assert_eq!(msg.detections.len(), 2);
        assert_eq!(msg.detections[0].id.as_deref(), Some("T1"));
        assert_eq!(msg.detections[1].rssi, -70.5);
    }

    #[test]
    fn accepts_mac_aliases() {
        let msg =
            decode_message(br#"{"gateway":{"mac":"gw1"},"detections":[{"mac":"x","rssi":-1}]}"#)
                .unwrap();
        assert_eq!(msg.source_id, "GW1");
        assert_eq!(msg.detections[0].id.as_deref(), Some("X"));
    }

    #[test]
    fn malformed_payloads_decode_to_none() {
        assert!(decode_message(b"").is_none());
        assert!(decode_message(b"not json").is_none());
        assert!(decode_message(br#"{"detections":[]}"#).is_none());
        assert!(decode_message(br#"{"gateway":{},"detections":[]}"#).is_none());
        assert!(decode_message(br#"{"gateway":{"id":"  "},"detections":[]}"#).is_none());
        assert!(decode_message(br#"{"gateway":{"id":"a"},"detections":{}}"#).is_none());
        assert!(decode_message(br#"[1,2,3]"#).is_none());
    }

    #[test]
    fn skips_non_numeric_strengths() {
        let msg = decode_message(
            br#"{"gateway":{"id":"a"},"detections":[
                {"id":"t","rssi":"-60"},
                {"id":"t","rssi":null},
                {"id":"t"},
                42,
                {"id":"t","rssi":-61}
            ]}"#,
        )
        .unwrap();
        assert_eq!(msg.detections.len(), 1);
        assert_eq!(msg.detections[0].rssi, -61.0);
    }

    // -----------------------------------------------------------------------
    // Extraction
    // -----------------------------------------------------------------------

    fn extract_payload(
        payload: &[u8],
        context: &CollectionContext,
        tag: Option<&str>,
    ) -> Option<Extraction> {
        let message = decode_message(payload).unwrap();
        extract(&message, context, tag, Utc::now())
    }

    #[test]
    fn point_filter_is_case_insensitive() {
        let payload = br#"{"gateway":{"id":"aa:bb:cc:dd:ee:ff"},"detections":[{"rssi":-60}]}"#;
        let ok = extract_payload(payload, &point("AA:BB:CC:DD:EE:FF"), None).unwrap();
        assert_eq!(ok.samples.len(), 1);
        assert_eq!(ok.samples[0].source_id, "AA:BB:CC:DD:EE:FF");

        assert!(extract_payload(payload, &point("11:22"), None).is_none());
    }

    #[test]
    fn survey_keeps_sources_without_samples() {
        let payload = br#"{"gateway":{"id":"x9"},"detections":[{"rssi":"bad"}]}"#;
        let ext = extract_payload(payload, &survey(), None).unwrap();
        assert_eq!(ext.source_id, "X9");
        assert!(ext.samples.is_empty());
    }

    #[test]
    fn tag_filter_limits_detections() {
        let payload = br#"{"gateway":{"id":"g"},"detections":[
            {"id":"beacon-1","rssi":-50},
            {"id":"beacon-2","rssi":-80},
            {"rssi":-90}
        ]}"#;
        let ext = extract_payload(payload, &survey(), Some("Beacon-1")).unwrap();
        assert_eq!(ext.samples.len(), 1);
        assert_eq!(ext.samples[0].value, -50.0);
    }

    #[test]
    fn sample_timestamp_serializes_as_rfc3339() {
        use chrono::TimeZone;
        let sample = Sample {
            source_id: "G".to_string(),
            value: -61.0,
            observed_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        };
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["observed_at"], "2026-03-01T12:00:00Z");
    }
}
