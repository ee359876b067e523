//! Imperative calls on the request/response channel and the completions they report back.

use crate::transport::ActionClient;
use fgsim_core::actions::{
    AckReply, ConsoleRequest, ConvertReply, ManifestReply, OpenReply, ProductsQuery,
    ProductsRequest, StartReply, StatusReply, WhichReply, CONSOLE_ENDPOINT, PRODUCTS_ENDPOINT,
};
use fgsim_core::{ActionError, FrequencyId, Product, TaskStatus};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Start {
        task: Option<String>,
        kwargs: Option<Value>,
    },
    PullStatus,
    LoadManifest {
        path: String,
    },
    FetchManifest,
    SaveManifest {
        path: String,
        clobber: bool,
    },
    ResetManifest,
    Convert {
        comp_id: String,
        freq_id: FrequencyId,
    },
    Which {
        cmd: String,
    },
    Open {
        comp_id: String,
        freq_id: FrequencyId,
        viewer: String,
    },
    Download {
        url: String,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Start { .. } => "start",
            Action::PullStatus => "status",
            Action::LoadManifest { .. } => "load",
            Action::FetchManifest => "fetch",
            Action::SaveManifest { .. } => "save",
            Action::ResetManifest => "reset",
            Action::Convert { .. } => "convert",
            Action::Which { .. } => "which",
            Action::Open { .. } => "open",
            Action::Download { .. } => "download",
        }
    }
}

/// Completion of one [`Action`], carrying enough context to apply it without lookups.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Started(Result<StartReply, ActionError>),
    Status(Result<TaskStatus, ActionError>),
    Loaded {
        path: String,
        result: Result<AckReply, ActionError>,
    },
    Fetched(Result<ManifestReply, ActionError>),
    Saved {
        path: String,
        result: Result<AckReply, ActionError>,
    },
    Reset(Result<AckReply, ActionError>),
    Converted {
        comp_id: String,
        freq_id: FrequencyId,
        result: Result<Product, ActionError>,
    },
    Checked {
        cmd: String,
        result: Result<WhichReply, ActionError>,
    },
    Opened {
        comp_id: String,
        freq_id: FrequencyId,
        result: Result<OpenReply, ActionError>,
    },
    Downloaded {
        url: String,
        result: Result<(), ActionError>,
    },
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, ActionError> {
    serde_json::from_value(value)
        .map_err(|err| ActionError::network(format!("unexpected reply: {err}")))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, ActionError> {
    serde_json::to_value(value).map_err(|err| ActionError::network(err.to_string()))
}

/// Flattens a products query into `key=value` pairs, skipping unset fields.
pub fn query_pairs(query: &ProductsQuery) -> Vec<(String, String)> {
    let Ok(Value::Object(map)) = serde_json::to_value(query) else {
        return Vec::new();
    };
    map.into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(text) => Some((key, text)),
            Value::Null => None,
            other => Some((key, other.to_string())),
        })
        .collect()
}

async fn post<C: ActionClient, B: serde::Serialize, R: serde::de::DeserializeOwned>(
    client: &C,
    path: &str,
    body: &B,
) -> Result<R, ActionError> {
    let reply = client.post_json(path, encode(body)?).await?;
    decode(reply)
}

async fn get<C: ActionClient, R: serde::de::DeserializeOwned>(
    client: &C,
    path: &str,
    query: &ProductsQuery,
) -> Result<R, ActionError> {
    let reply = client.get_json(path, &query_pairs(query)).await?;
    decode(reply)
}

pub async fn perform<C: ActionClient>(client: &C, action: Action) -> ActionOutcome {
    debug!(event = "action_start", action = action.name());
    match action {
        Action::Start { task, kwargs } => ActionOutcome::Started(
            post(client, CONSOLE_ENDPOINT, &ConsoleRequest::Start { task, kwargs }).await,
        ),
        Action::PullStatus => {
            let result = client
                .get_json(CONSOLE_ENDPOINT, &[])
                .await
                .and_then(decode::<StatusReply>)
                .map(|reply| reply.status);
            ActionOutcome::Status(result)
        }
        Action::LoadManifest { path } => {
            let body = ProductsRequest::Load {
                manifestfile: path.clone(),
            };
            let result = post(client, PRODUCTS_ENDPOINT, &body).await;
            ActionOutcome::Loaded { path, result }
        }
        Action::FetchManifest => {
            ActionOutcome::Fetched(get(client, PRODUCTS_ENDPOINT, &ProductsQuery::fetch()).await)
        }
        Action::SaveManifest { path, clobber } => {
            let body = ProductsRequest::Save {
                outfile: path.clone(),
                clobber,
            };
            let result = post(client, PRODUCTS_ENDPOINT, &body).await;
            ActionOutcome::Saved { path, result }
        }
        Action::ResetManifest => {
            ActionOutcome::Reset(post(client, PRODUCTS_ENDPOINT, &ProductsRequest::Reset).await)
        }
        Action::Convert { comp_id, freq_id } => {
            let body = ProductsRequest::Convert {
                comp_id: comp_id.clone(),
                freq_id,
            };
            let result = post::<_, _, ConvertReply>(client, PRODUCTS_ENDPOINT, &body)
                .await
                .map(|reply| reply.data);
            ActionOutcome::Converted {
                comp_id,
                freq_id,
                result,
            }
        }
        Action::Which { cmd } => {
            let result = get(client, PRODUCTS_ENDPOINT, &ProductsQuery::which(&cmd)).await;
            ActionOutcome::Checked { cmd, result }
        }
        Action::Open {
            comp_id,
            freq_id,
            viewer,
        } => {
            let query = ProductsQuery::open(&comp_id, freq_id, &viewer);
            let result = get(client, PRODUCTS_ENDPOINT, &query).await;
            ActionOutcome::Opened {
                comp_id,
                freq_id,
                result,
            }
        }
        Action::Download { url } => {
            let result = client.open_url(&url).await;
            ActionOutcome::Downloaded { url, result }
        }
    }
}

/// Runs `action` in the background; the outcome is reported on `tx`.
pub fn spawn_action<C: ActionClient>(
    client: Arc<C>,
    action: Action,
    tx: mpsc::UnboundedSender<ActionOutcome>,
) {
    tokio::spawn(async move {
        let outcome = perform(client.as_ref(), action).await;
        let _ = tx.send(outcome);
    });
}
