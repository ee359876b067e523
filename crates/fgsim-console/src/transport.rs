use fgsim_core::actions::{CONSOLE_ENDPOINT, PRODUCTS_ENDPOINT};
use fgsim_core::ActionError;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Deadlines for request/response calls. A start call has none: the hub answers it
/// only when the whole job has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    pub connect: Duration,
    pub call: Duration,
    pub convert: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            call: Duration::from_secs(30),
            convert: Duration::from_secs(600),
        }
    }
}

impl CallTimeouts {
    pub fn for_post(&self, path: &str, body: &Value) -> Option<Duration> {
        match (path, body["action"].as_str()) {
            (CONSOLE_ENDPOINT, Some("start")) => None,
            (PRODUCTS_ENDPOINT, Some("convert")) => Some(self.convert),
            _ => Some(self.call),
        }
    }
}

/// Request/response side of the protocol. Every failure comes back as `{code, reason}`.
pub trait ActionClient: Send + Sync + 'static {
    fn get_json(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> impl Future<Output = Result<Value, ActionError>> + Send;

    fn post_json(
        &self,
        path: &str,
        body: Value,
    ) -> impl Future<Output = Result<Value, ActionError>> + Send;

    /// Hands a URL to the operator's viewing context (browser, file handler).
    fn open_url(&self, url: &str) -> impl Future<Output = Result<(), ActionError>> + Send;

    fn base_url(&self) -> &str;
}

pub struct HttpActionClient {
    base: Url,
    base_text: String,
    http: reqwest::Client,
    timeouts: CallTimeouts,
}

impl HttpActionClient {
    pub fn new(base: &str) -> Result<Self, ActionError> {
        Self::with_timeouts(base, CallTimeouts::default())
    }

    pub fn with_timeouts(base: &str, timeouts: CallTimeouts) -> Result<Self, ActionError> {
        let base = Url::parse(base)
            .map_err(|err| ActionError::network(format!("invalid hub url '{base}': {err}")))?;
        let http = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(|err| ActionError::network(err.to_string()))?;
        Ok(Self {
            base_text: base.as_str().trim_end_matches('/').to_string(),
            base,
            http,
            timeouts,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ActionError> {
        self.base
            .join(path)
            .map_err(|err| ActionError::network(format!("invalid endpoint '{path}': {err}")))
    }
}

impl ActionClient for HttpActionClient {
    async fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<Value, ActionError> {
        let url = self.endpoint(path)?;
        debug!(event = "action_get", url = %url, params = query.len());
        let response = self
            .http
            .get(url)
            .query(query)
            .timeout(self.timeouts.call)
            .send()
            .await
            .map_err(|err| ActionError::network(err.to_string()))?;
        decode_response(response).await
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value, ActionError> {
        let url = self.endpoint(path)?;
        let timeout = self.timeouts.for_post(path, &body);
        debug!(event = "action_post", url = %url, timeout_s = timeout.map(|t| t.as_secs()));
        let mut request = self.http.post(url).json(&body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|err| ActionError::network(err.to_string()))?;
        decode_response(response).await
    }

    async fn open_url(&self, url: &str) -> Result<(), ActionError> {
        let opener = if cfg!(target_os = "macos") {
            "open"
        } else {
            "xdg-open"
        };
        let status = tokio::process::Command::new(opener)
            .arg(url)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .map_err(|err| ActionError::network(format!("cannot run {opener}: {err}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(ActionError::network(format!("{opener} exited with {status}")))
        }
    }

    fn base_url(&self) -> &str {
        &self.base_text
    }
}

async fn decode_response(response: reqwest::Response) -> Result<Value, ActionError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|err| ActionError::network(err.to_string()))?;
    if status.is_success() {
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_str(&text)
            .map_err(|err| ActionError::network(format!("invalid response body: {err}")));
    }
    Err(error_from_body(status.as_u16(), &text))
}

/// Recovers the server's `{code, reason}`; falls back to the raw body.
pub fn error_from_body(status: u16, body: &str) -> ActionError {
    if let Ok(err) = serde_json::from_str::<ActionError>(body) {
        return err;
    }
    warn!(event = "action_error_unstructured", status = status);
    let reason = body.trim();
    if reason.is_empty() {
        ActionError::new(status, format!("request failed with status {status}"))
    } else {
        ActionError::new(status, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn structured_errors_keep_code_and_reason() {
        let err = error_from_body(409, r#"{"code":409,"reason":"file already exists: /tmp/m.json"}"#);
        assert_eq!(err, ActionError::new(409, "file already exists: /tmp/m.json"));
    }

    #[test]
    fn unstructured_errors_use_status_and_body() {
        assert_eq!(
            error_from_body(502, "Bad Gateway"),
            ActionError::new(502, "Bad Gateway")
        );
        assert_eq!(error_from_body(500, "").code, 500);
    }

    #[test]
    fn client_rejects_malformed_base_url() {
        let err = HttpActionClient::new("not a url").err().expect("invalid");
        assert_eq!(err.code, 0);
        let client = HttpActionClient::new("http://127.0.0.1:21021/").expect("client");
        assert_eq!(client.base_url(), "http://127.0.0.1:21021");
    }

    #[test]
    fn only_start_runs_without_a_deadline() {
        let timeouts = CallTimeouts::default();
        assert_eq!(
            timeouts.for_post(CONSOLE_ENDPOINT, &json!({"action": "start", "task": "simulate"})),
            None
        );
        assert_eq!(
            timeouts.for_post(PRODUCTS_ENDPOINT, &json!({"action": "convert"})),
            Some(timeouts.convert)
        );
        for action in ["load", "save", "reset"] {
            assert_eq!(
                timeouts.for_post(PRODUCTS_ENDPOINT, &json!({ "action": action })),
                Some(timeouts.call)
            );
        }
    }

    /// The hub holds a start call open for the whole job; hours are normal.
    #[tokio::test(start_paused = true)]
    async fn long_running_start_is_not_cut_off() {
        const JOB: Duration = Duration::from_secs(2 * 60 * 60);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = vec![0u8; 8192];
            let _ = socket.read(&mut request).await;
            tokio::time::sleep(JOB).await;
            let body = r#"{"task":"simulate","elapsed_ms":7200000}"#;
            let reply = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(reply.as_bytes()).await;
        });

        let client = HttpActionClient::with_timeouts(
            &format!("http://{addr}"),
            CallTimeouts {
                connect: JOB * 4,
                ..CallTimeouts::default()
            },
        )
        .expect("client");
        let started = tokio::time::Instant::now();
        let reply = client
            .post_json(CONSOLE_ENDPOINT, json!({"action": "start"}))
            .await
            .expect("start completes with the job");
        assert!(started.elapsed() >= JOB);
        assert_eq!(reply["task"], "simulate");
    }
}
