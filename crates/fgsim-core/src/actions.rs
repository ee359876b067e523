//! Request/response bodies for the console and products endpoints.

use crate::manifest::{FrequencyId, Product, ProductManifest};
use crate::TaskStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const CONSOLE_ENDPOINT: &str = "/api/console";
pub const PRODUCTS_ENDPOINT: &str = "/api/products";
pub const PUSH_ENDPOINT: &str = "/ws";
pub const DOWNLOAD_PREFIX: &str = "/products/download/";

/// The `{code, reason}` pair every failed call carries back to the operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{reason} ({code})")]
pub struct ActionError {
    pub code: u16,
    pub reason: String,
}

impl ActionError {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// The request never produced an HTTP response.
    pub fn network(reason: impl Into<String>) -> Self {
        Self::new(0, reason)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ConsoleRequest {
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kwargs: Option<Value>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProductsRequest {
    Load {
        manifestfile: String,
    },
    Save {
        outfile: String,
        #[serde(default)]
        clobber: bool,
    },
    Reset,
    Convert {
        #[serde(rename = "compID")]
        comp_id: String,
        #[serde(rename = "freqID")]
        freq_id: FrequencyId,
    },
}

/// Query string of `GET /api/products`. No `action` means "fetch the manifest".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductsQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(default, rename = "compID", skip_serializing_if = "Option::is_none")]
    pub comp_id: Option<String>,
    #[serde(default, rename = "freqID", skip_serializing_if = "Option::is_none")]
    pub freq_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer: Option<String>,
}

impl ProductsQuery {
    pub fn fetch() -> Self {
        Self::default()
    }

    pub fn which(cmd: &str) -> Self {
        Self {
            action: Some("which".to_string()),
            cmd: Some(cmd.to_string()),
            ..Self::default()
        }
    }

    pub fn open(comp_id: &str, freq_id: FrequencyId, viewer: &str) -> Self {
        Self {
            action: Some("open".to_string()),
            comp_id: Some(comp_id.to_string()),
            freq_id: Some(freq_id.to_string()),
            viewer: Some(viewer.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReply {
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartReply {
    pub task: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AckReply {
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ManifestReply {
    #[serde(default)]
    pub manifest: ProductManifest,
    #[serde(default)]
    pub localhost: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConvertReply {
    pub data: Product,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WhichReply {
    pub cmd: String,
    pub path: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenReply {
    pub pid: u32,
}

/// Retrieval URL for an artifact: fixed prefix plus its server-relative path.
pub fn download_url(base_url: &str, artifact_path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = artifact_path.trim_start_matches('/');
    format!("{base}{DOWNLOAD_PREFIX}{path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_bodies_are_action_tagged() {
        let body = serde_json::to_value(ProductsRequest::Convert {
            comp_id: "galactic/freefree".to_string(),
            freq_id: 3,
        })
        .expect("serialize");
        assert_eq!(
            body,
            serde_json::json!({"action": "convert", "compID": "galactic/freefree", "freqID": 3})
        );

        let body = serde_json::to_value(ConsoleRequest::Start {
            task: None,
            kwargs: None,
        })
        .expect("serialize");
        assert_eq!(body, serde_json::json!({"action": "start"}));

        let parsed: ProductsRequest =
            serde_json::from_str(r#"{"action":"save","outfile":"/tmp/m.json"}"#).expect("parse");
        assert_eq!(
            parsed,
            ProductsRequest::Save {
                outfile: "/tmp/m.json".to_string(),
                clobber: false,
            }
        );
    }

    #[test]
    fn manifest_reply_tolerates_empty_manifest() {
        let reply: ManifestReply =
            serde_json::from_str(r#"{"manifest":{},"localhost":true}"#).expect("parse");
        assert!(reply.manifest.is_empty());
        assert!(reply.localhost);
    }

    #[test]
    fn download_url_joins_prefix_and_relative_path() {
        assert_eq!(
            download_url("http://127.0.0.1:21021/", "/freefree/ff_100.fits"),
            "http://127.0.0.1:21021/products/download/freefree/ff_100.fits"
        );
        assert_eq!(
            download_url("", "ff.fits"),
            "/products/download/ff.fits"
        );
    }
}
