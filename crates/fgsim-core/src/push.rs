use crate::{LogRecord, TaskStatus};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

/// Every `(type, subtype)` pair the push channel carries.
pub const KNOWN_ROUTES: &[(&str, &str)] = &[("console", "log"), ("console", "status")];

/// Push envelope: `{type, subtype, ...payload}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMsg {
    Console(ConsoleMsg),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ConsoleMsg {
    Log(LogRecord),
    Status { status: TaskStatus },
}

impl PushMsg {
    pub fn log(record: LogRecord) -> Self {
        PushMsg::Console(ConsoleMsg::Log(record))
    }

    pub fn status(status: TaskStatus) -> Self {
        PushMsg::Console(ConsoleMsg::Status { status })
    }

    pub fn route(&self) -> (&'static str, &'static str) {
        match self {
            PushMsg::Console(ConsoleMsg::Log(_)) => ("console", "log"),
            PushMsg::Console(ConsoleMsg::Status { .. }) => ("console", "status"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RouteHeader {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subtype: Option<String>,
}

impl RouteHeader {
    fn is_known(&self) -> bool {
        let subtype = self.subtype.as_deref().unwrap_or_default();
        KNOWN_ROUTES
            .iter()
            .any(|(kind, sub)| *kind == self.kind && *sub == subtype)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("no handler for route ({kind}, {subtype})")]
    UnknownRoute { kind: String, subtype: String },
}

pub fn encode_frame<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<String, FrameError> {
    let encoded =
        serde_json::to_string(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_frame<T: DeserializeOwned>(
    bytes: &[u8],
    max_frame_bytes: usize,
) -> Result<T, FrameError> {
    let raw = trim_frame(bytes);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_slice(raw).map_err(|err| FrameError::Decode(err.to_string()))
}

/// Decodes one push frame, reporting envelopes with an unrecognised
/// `(type, subtype)` as [`FrameError::UnknownRoute`] rather than a decode failure.
pub fn decode_push(bytes: &[u8], max_frame_bytes: usize) -> Result<PushMsg, FrameError> {
    match decode_frame::<PushMsg>(bytes, max_frame_bytes) {
        Ok(msg) => Ok(msg),
        Err(FrameError::Decode(reason)) => {
            match serde_json::from_slice::<RouteHeader>(trim_frame(bytes)) {
                Ok(header) if !header.is_known() => Err(FrameError::UnknownRoute {
                    kind: header.kind,
                    subtype: header.subtype.unwrap_or_default(),
                }),
                _ => Err(FrameError::Decode(reason)),
            }
        }
        Err(other) => Err(other),
    }
}

fn trim_frame(bytes: &[u8]) -> &[u8] {
    let mut raw = bytes;
    if raw.ends_with(b"\n") {
        raw = &raw[..raw.len() - 1];
    }
    if raw.ends_with(b"\r") {
        raw = &raw[..raw.len() - 1];
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogLevel;

    fn record() -> LogRecord {
        LogRecord {
            level: LogLevel::Info,
            timestamp: "2017-01-02 10:00:00".to_string(),
            logger_name: "fg21sim.foregrounds".to_string(),
            message: "simulating free-free at 100 MHz".to_string(),
        }
    }

    #[test]
    fn envelope_flattens_type_subtype_and_payload() {
        let frame = encode_frame(&PushMsg::log(record()), DEFAULT_MAX_FRAME_BYTES).expect("encode");
        let value: serde_json::Value = serde_json::from_str(&frame).expect("json");
        assert_eq!(value["type"], "console");
        assert_eq!(value["subtype"], "log");
        assert_eq!(value["levelname"], "INFO");
        assert_eq!(value["message"], "simulating free-free at 100 MHz");

        let frame = encode_frame(
            &PushMsg::status(TaskStatus::RUNNING),
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("encode status");
        let value: serde_json::Value = serde_json::from_str(&frame).expect("json");
        assert_eq!(value["subtype"], "status");
        assert_eq!(value["status"]["running"], true);
        assert_eq!(value["status"]["finished"], false);
    }

    #[test]
    fn decode_push_reads_browser_shaped_frames() {
        let msg = decode_push(
            br#"{"type":"console","subtype":"status","status":{"running":false,"finished":true}}"#,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("decode status");
        assert_eq!(msg, PushMsg::status(TaskStatus::FINISHED));
        assert_eq!(msg.route(), ("console", "status"));

        let msg = decode_push(
            br#"{"type":"console","subtype":"log","levelname":"error","asctime":"t","name":"n","message":"boom"}"#,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("decode log");
        match msg {
            PushMsg::Console(ConsoleMsg::Log(record)) => {
                assert_eq!(record.level, LogLevel::Error);
                assert_eq!(record.message, "boom");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_route_is_reported_separately_from_malformed_json() {
        let err = decode_push(
            br#"{"type":"results","subtype":"progress","value":3}"#,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect_err("unknown route");
        assert_eq!(
            err,
            FrameError::UnknownRoute {
                kind: "results".to_string(),
                subtype: "progress".to_string(),
            }
        );

        let err = decode_push(
            br#"{"type":"console","subtype":"status","status":"yes"}"#,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect_err("bad payload");
        assert!(matches!(err, FrameError::Decode(_)));

        let err = decode_push(b"{not json", DEFAULT_MAX_FRAME_BYTES).expect_err("garbage");
        assert!(matches!(err, FrameError::Decode(_)));
    }

    #[test]
    fn oversized_frames_are_rejected_both_ways() {
        let mut big = record();
        big.message = "x".repeat(256);
        let result = encode_frame(&PushMsg::log(big), 64);
        assert!(matches!(result, Err(FrameError::OversizedFrame { .. })));

        let raw = format!("{{\"blob\":\"{}\"}}\n", "x".repeat(2_000));
        let result = decode_push(raw.as_bytes(), 1_024);
        assert!(matches!(result, Err(FrameError::OversizedFrame { .. })));
    }
}
