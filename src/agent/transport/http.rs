use log::{debug, info};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;

use crate::agent::config::AgentConfig;
use crate::agent::error::{DeckError, Result};
use crate::agent::message::{
    AgentInfo, BlueprintRequest, BlueprintResponse, ChatRequest, ConfigPatch,
    ConfigReloadResponse, IntentRequest, LaunchRequest, LaunchResponse, ToolSuggestion,
    WireMessage,
};

/// 會話權杖標頭。
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";
/// 架構師 API 金鑰標頭。
pub const API_KEY_HEADER: &str = "x-api-key";

/// AgentDeck 後端 REST API 的客戶端。
///
/// 只負責組裝請求與解讀狀態碼，不保存任何會話狀態；呼叫端自行從
/// `SessionStore` 取出權杖後傳入。
#[derive(Debug, Clone)]
pub struct DeckClient {
    client: Client,
    base_url: String,
}

impl DeckClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 代理日誌 WebSocket 的位址，由 HTTP 位址把 `http` 前綴換成 `ws` 得到。
    pub fn logs_url(&self, agent_id: &str) -> String {
        let ws_base = match self.base_url.strip_prefix("http") {
            Some(rest) => format!("ws{rest}"),
            None => self.base_url.clone(),
        };
        format!("{ws_base}/ws/agents/{agent_id}/logs")
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentInfo>> {
        let response = self.request(Method::GET, "/api/agents").send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeckError::Status {
                status: status.as_u16(),
                detail: format!("Failed to load agents ({})", status.as_u16()),
            });
        }
        Ok(response.json().await?)
    }

    /// 啟動一個新代理。`config.id` 有值時會一併以 `config_id` 送出。
    pub async fn launch(
        &self,
        config: &AgentConfig,
        mcp_env: Option<&Value>,
    ) -> Result<LaunchResponse> {
        let payload = LaunchRequest {
            config,
            config_id: config.id.as_deref().filter(|id| !id.is_empty()),
            mcp_env,
        };
        let response = self
            .request(Method::POST, "/api/agents/launch")
            .json(&payload)
            .send()
            .await?;
        let response = ensure_success(response, |status| format!("Failed to launch agent ({status})")).await?;
        let created: LaunchResponse = response.json().await?;
        info!("Launched agent {}", created.agent_id);
        Ok(created)
    }

    pub async fn start_agent(&self, agent_id: &str, session_token: &str) -> Result<()> {
        self.lifecycle(Method::POST, &format!("/api/agents/{agent_id}/start"), session_token, "Failed to start agent")
            .await
    }

    pub async fn stop_agent(&self, agent_id: &str, session_token: &str) -> Result<()> {
        self.lifecycle(Method::POST, &format!("/api/agents/{agent_id}/stop"), session_token, "Failed to stop agent")
            .await
    }

    pub async fn delete_agent(&self, agent_id: &str, session_token: &str) -> Result<()> {
        self.lifecycle(Method::DELETE, &format!("/api/agents/{agent_id}"), session_token, "Failed to delete agent")
            .await
    }

    /// 熱重載代理設定；成功時後端會輪換會話並回傳新的 ID 與權杖。
    pub async fn patch_config(
        &self,
        agent_id: &str,
        session_token: Option<&str>,
        config: &AgentConfig,
    ) -> Result<ConfigReloadResponse> {
        let response = self
            .request(Method::PATCH, &format!("/api/agents/{agent_id}/config"))
            .headers(optional_header(SESSION_TOKEN_HEADER, session_token)?)
            .json(&ConfigPatch { config })
            .send()
            .await?;
        let response = ensure_success(response, |status| format!("Failed to apply config ({status})")).await?;
        let reloaded: ConfigReloadResponse = response.json().await?;
        debug!("Config applied to {}, session rotated to {}", agent_id, reloaded.session_id);
        Ok(reloaded)
    }

    /// 由自然語言描述產生設定藍圖。`400` 代表後端缺少 API 金鑰。
    pub async fn preview_blueprint(&self, prompt: &str, api_key: Option<&str>) -> Result<AgentConfig> {
        let response = self
            .request(Method::POST, "/api/blueprints/preview")
            .headers(optional_header(API_KEY_HEADER, api_key)?)
            .json(&BlueprintRequest { prompt })
            .send()
            .await?;
        if response.status() == StatusCode::BAD_REQUEST {
            return Err(DeckError::ApiKeyRequired);
        }
        let response = ensure_success(response, |_| "Blueprint generation failed".to_string()).await?;
        let blueprint: BlueprintResponse = response.json().await?;
        Ok(blueprint.config)
    }

    /// 請後端分析最近一輪對話，建議可加入的工具。
    pub async fn suggest_tools(
        &self,
        user_text: &str,
        assistant_text: &str,
        api_key: Option<&str>,
    ) -> Result<ToolSuggestion> {
        let response = self
            .request(Method::POST, "/api/agents/intent")
            .headers(optional_header(API_KEY_HEADER, api_key)?)
            .json(&IntentRequest {
                user_text,
                assistant_text,
            })
            .send()
            .await?;
        if response.status() == StatusCode::BAD_REQUEST {
            return Err(DeckError::ApiKeyRequired);
        }
        let response = ensure_success(response, |status| format!("Tool suggestion failed ({status})")).await?;
        Ok(response.json().await?)
    }

    /// 開啟一輪對話，回傳尚未讀取的串流回應。
    pub async fn open_chat(
        &self,
        session_id: &str,
        session_token: Option<&str>,
        messages: &[WireMessage],
    ) -> Result<Response> {
        let response = self
            .request(Method::POST, "/api/agents/chat")
            .headers(optional_header(SESSION_TOKEN_HEADER, session_token)?)
            .json(&ChatRequest {
                session_id,
                messages,
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() || status == StatusCode::NO_CONTENT {
            let detail = response.text().await.unwrap_or_default();
            return Err(DeckError::Chat(if detail.trim().is_empty() {
                format!("Failed to query agent ({})", status.as_u16())
            } else {
                detail
            }));
        }
        Ok(response)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
    }

    async fn lifecycle(
        &self,
        method: Method,
        path: &str,
        session_token: &str,
        failure: &str,
    ) -> Result<()> {
        let response = self
            .request(method, path)
            .headers(optional_header(SESSION_TOKEN_HEADER, Some(session_token))?)
            .send()
            .await?;
        ensure_success(response, |status| format!("{failure} ({status})")).await?;
        Ok(())
    }
}

/// 非 2xx 時讀出回應內文作為錯誤訊息，內文空白則改用 `fallback` 產生的訊息。
async fn ensure_success(response: Response, fallback: impl FnOnce(u16) -> String) -> Result<Response> {
    let status = response.status().as_u16();
    if response.status().is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DeckError::status(status, body, || fallback(status)))
}

/// 只有在值非空時才加入標頭。
fn optional_header(name: &'static str, value: Option<&str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(value) = value.filter(|value| !value.is_empty()) {
        let value = HeaderValue::from_str(value)
            .map_err(|_| DeckError::Config(format!("{name} contains invalid characters")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[test]
    fn logs_url_switches_scheme() {
        assert_eq!(
            DeckClient::new("http://localhost:8000/").logs_url("a1"),
            "ws://localhost:8000/ws/agents/a1/logs"
        );
        assert_eq!(
            DeckClient::new("https://deck.example").logs_url("a1"),
            "wss://deck.example/ws/agents/a1/logs"
        );
    }

    #[tokio::test]
    async fn list_agents_reports_status_without_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/agents")
            .with_status(503)
            .with_body("down")
            .create_async()
            .await;
        let err = DeckClient::new(server.url()).list_agents().await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to load agents (503)");
    }

    #[tokio::test]
    async fn launch_sends_config_id_and_mcp_env() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/agents/launch")
            .match_body(Matcher::PartialJson(json!({
                "config_id": "researcher",
                "mcp_env": { "TOKEN": "x" }
            })))
            .with_status(200)
            .with_body(r#"{"agent_id":"a1","session_id":"s1","session_token":"t1"}"#)
            .create_async()
            .await;
        let config = AgentConfig {
            id: Some("researcher".into()),
            ..AgentConfig::default()
        };
        let created = DeckClient::new(server.url())
            .launch(&config, Some(&json!({ "TOKEN": "x" })))
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(created.agent_id, "a1");
        assert_eq!(created.session_token, "t1");
    }

    #[tokio::test]
    async fn lifecycle_calls_carry_session_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/agents/a1/stop")
            .match_header("x-session-token", "tok")
            .with_status(200)
            .create_async()
            .await;
        DeckClient::new(server.url()).stop_agent("a1", "tok").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn lifecycle_failure_prefers_body_then_fallback() {
        let mut server = Server::new_async().await;
        let _start = server
            .mock("POST", "/api/agents/a1/start")
            .with_status(409)
            .with_body("already running")
            .create_async()
            .await;
        let _delete = server
            .mock("DELETE", "/api/agents/a1")
            .with_status(500)
            .create_async()
            .await;
        let client = DeckClient::new(server.url());
        assert_eq!(
            client.start_agent("a1", "t").await.unwrap_err().to_string(),
            "already running"
        );
        assert_eq!(
            client.delete_agent("a1", "t").await.unwrap_err().to_string(),
            "Failed to delete agent (500)"
        );
    }

    #[tokio::test]
    async fn blueprint_400_means_api_key_required() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/blueprints/preview")
            .match_header("x-api-key", "sk-test")
            .with_status(400)
            .create_async()
            .await;
        let err = DeckClient::new(server.url())
            .preview_blueprint("make me a researcher", Some("sk-test"))
            .await
            .unwrap_err();
        mock.assert_async().await;
        assert!(matches!(err, DeckError::ApiKeyRequired));
    }

    #[tokio::test]
    async fn blueprint_failure_without_body_uses_generic_message() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/blueprints/preview")
            .with_status(500)
            .create_async()
            .await;
        let err = DeckClient::new(server.url())
            .preview_blueprint("x", None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Blueprint generation failed");
    }

    #[tokio::test]
    async fn chat_failure_uses_body_or_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/agents/chat")
            .with_status(401)
            .create_async()
            .await;
        let err = DeckClient::new(server.url())
            .open_chat("s1", Some("t1"), &[WireMessage::user("hi")])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to query agent (401)");
    }

    #[tokio::test]
    async fn blank_token_is_not_sent() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PATCH", "/api/agents/a1/config")
            .match_header("x-session-token", Matcher::Missing)
            .with_status(200)
            .with_body(r#"{"session_id":"s2","session_token":"t2"}"#)
            .create_async()
            .await;
        let reloaded = DeckClient::new(server.url())
            .patch_config("a1", Some(""), &AgentConfig::default())
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(reloaded.session_id, "s2");
    }
}
