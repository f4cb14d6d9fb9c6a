//! 可替換的 HTTP 傳輸層。
//!
//! 協議引擎只透過 [`Transport`] 發送請求，預設實作為阻塞式的
//! [`ReqwestTransport`]；單元測試中則以 `MockTransport` 預先排入回應並記錄請求。

use std::{fmt, time::Duration};

use reqwest::blocking::Client;
use thiserror::Error;

/// 傳輸層錯誤，在協議層會被歸類為 `AcmeError::Network`。
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Connection failed: {0}")]
    Connection(String),
}

/// 請求方法，ACME 只需要這三種。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
}

/// 傳給 [`Transport`] 的請求。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            content_type: None,
            body: Vec::new(),
        }
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self {
            method: Method::Head,
            ..Self::get(url)
        }
    }

    pub fn post(url: impl Into<String>, content_type: &str, body: Vec<u8>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            content_type: Some(content_type.to_string()),
            body,
        }
    }
}

/// 傳輸層回應，標頭名稱一律以小寫保存。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// 新增一個標頭，名稱不區分大小寫。
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// 以 JSON 本體建立回應並設定 `Content-Type`。
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        let content_type = if (200..300).contains(&status) {
            "application/json"
        } else {
            "application/problem+json"
        };
        Self::new(status)
            .with_header("Content-Type", content_type)
            .with_body(body.to_string())
    }

    /// 取得第一個符合名稱的標頭值。
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }

    pub fn replay_nonce(&self) -> Option<&str> {
        self.header("replay-nonce")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// 定義發送 HTTP 請求的行為。
pub trait Transport: Send + Sync + fmt::Debug {
    /// 發送請求並返回完整回應；只有傳輸失敗才返回錯誤，非 2xx 狀態仍為 `Ok`。
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// 基於 `reqwest::blocking::Client` 的傳輸實作。
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// 以指定 User-Agent 與逾時時間建立傳輸層。
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Head => self.client.head(&request.url),
            Method::Post => self.client.post(&request.url).body(request.body),
        };
        if let Some(content_type) = &request.content_type {
            builder = builder.header("Content-Type", content_type.as_str());
        }

        let response = builder.send()?;
        let mut result = HttpResponse::new(response.status().as_u16());
        for (name, value) in response.headers() {
            // 非 ASCII 的標頭值對協議無意義，直接略過
            if let Ok(value) = value.to_str() {
                result = result.with_header(name.as_str(), value);
            }
        }
        Ok(result.with_body(response.bytes()?.to_vec()))
    }
}

#[cfg(test)]
pub(crate) use mock::MockTransport;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = HttpResponse::new(201)
            .with_header("Replay-Nonce", "abc")
            .with_header("Location", "https://ca/acct/1");

        assert_eq!(response.replay_nonce(), Some("abc"));
        assert_eq!(response.header("LOCATION"), Some("https://ca/acct/1"));
        assert!(response.is_success());
    }

    #[test]
    fn test_json_response_content_type() {
        let ok = HttpResponse::json(200, &serde_json::json!({}));
        let err = HttpResponse::json(400, &serde_json::json!({}));

        assert_eq!(ok.content_type(), Some("application/json"));
        assert_eq!(err.content_type(), Some("application/problem+json"));
        assert!(!err.is_success());
    }

    #[test]
    fn test_mock_replays_in_order_and_records() {
        let mock = MockTransport::new();
        mock.push(HttpResponse::new(200)).push_failure("connection reset");

        assert_eq!(mock.execute(HttpRequest::head("https://ca/nonce")).unwrap().status, 200);
        assert!(matches!(
            mock.execute(HttpRequest::get("https://ca/dir")),
            Err(TransportError::Connection(_))
        ));
        let err = mock.execute(HttpRequest::get("https://ca/dir")).unwrap_err();
        assert!(err.to_string().contains("no scripted response left"));

        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.requests()[0].method, Method::Head);
    }
}
