//! dns-01 預先驗證使用的 TXT 記錄查詢。

use std::{fmt, sync::Arc};

use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

use crate::transport::{HttpRequest, Transport, TransportError};

/// DNS 資源記錄類型中 TXT 的代碼。
const TXT_RECORD_TYPE: u16 = 16;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Invalid resolver URL: {0}")]
    InvalidUrl(String),
    #[error("Resolver returned HTTP {0}")]
    HttpStatus(u16),
    #[error("Malformed resolver response: {0}")]
    Malformed(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, DnsError>;

/// 查詢網域名稱的 TXT 記錄。
pub trait TxtResolver: Send + Sync + fmt::Debug {
    /// 返回名稱下所有 TXT 記錄的原始字串，名稱不存在時返回空清單。
    fn lookup_txt(&self, name: &str) -> Result<Vec<String>>;
}

/// JSON 格式的 DNS-over-HTTPS 解析器（Google `resolve` API 格式）。
#[derive(Debug, Clone)]
pub struct DohResolver {
    transport: Arc<dyn Transport>,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    data: String,
}

impl DohResolver {
    pub fn new(transport: Arc<dyn Transport>, endpoint: &str) -> Self {
        Self {
            transport,
            endpoint: endpoint.to_string(),
        }
    }

    fn query_url(&self, name: &str) -> Result<String> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| DnsError::InvalidUrl(format!("{}: {}", self.endpoint, e)))?;
        url.query_pairs_mut()
            .append_pair("name", name)
            .append_pair("type", "TXT");
        Ok(url.to_string())
    }
}

impl TxtResolver for DohResolver {
    fn lookup_txt(&self, name: &str) -> Result<Vec<String>> {
        let url = self.query_url(name)?;
        tracing::debug!(name, url = %url, "querying TXT records");

        let response = self.transport.execute(HttpRequest::get(url))?;
        if !response.is_success() {
            return Err(DnsError::HttpStatus(response.status));
        }

        let parsed: DohResponse = serde_json::from_slice(&response.body)?;
        Ok(parsed
            .answer
            .into_iter()
            .filter(|answer| answer.record_type == TXT_RECORD_TYPE)
            .map(|answer| answer.data)
            .collect())
    }
}
