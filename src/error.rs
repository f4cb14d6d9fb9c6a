//! 協議引擎共用的錯誤類型與 ACME problem document 模型。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    base64::DecodeError, csr::CsrError, key_pair::KeyError, storage::StorageError,
    transport::TransportError,
};

/// 所有 problem type URN 的共同前綴。
pub const ERROR_URN_PREFIX: &str = "urn:ietf:params:acme:error:";

/// 伺服器以 `application/problem+json` 回傳的結構化錯誤。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    /// 識別錯誤條件的 URI，例如 `urn:ietf:params:acme:error:badNonce`。
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub detail: Option<String>,
    /// HTTP 狀態碼，部分伺服器會省略。
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subproblems: Vec<Problem>,
}

/// 常見 problem type 的分類，未知類型保留為 [`ProblemKind::Other`]。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProblemKind {
    AccountDoesNotExist,
    BadCsr,
    BadNonce,
    BadSignatureAlgorithm,
    Connection,
    Dns,
    ExternalAccountRequired,
    Malformed,
    OrderNotReady,
    RateLimited,
    RejectedIdentifier,
    ServerInternal,
    Unauthorized,
    UserActionRequired,
    Other(String),
}

impl Problem {
    /// 依據 `type` 欄位將問題分類。
    pub fn kind(&self) -> ProblemKind {
        let Some(name) = self.type_.strip_prefix(ERROR_URN_PREFIX) else {
            return ProblemKind::Other(self.type_.clone());
        };

        match name {
            "accountDoesNotExist" => ProblemKind::AccountDoesNotExist,
            "badCSR" => ProblemKind::BadCsr,
            "badNonce" => ProblemKind::BadNonce,
            "badSignatureAlgorithm" => ProblemKind::BadSignatureAlgorithm,
            "connection" => ProblemKind::Connection,
            "dns" => ProblemKind::Dns,
            "externalAccountRequired" => ProblemKind::ExternalAccountRequired,
            "malformed" => ProblemKind::Malformed,
            "orderNotReady" => ProblemKind::OrderNotReady,
            "rateLimited" => ProblemKind::RateLimited,
            "rejectedIdentifier" => ProblemKind::RejectedIdentifier,
            "serverInternal" => ProblemKind::ServerInternal,
            "unauthorized" => ProblemKind::Unauthorized,
            "userActionRequired" => ProblemKind::UserActionRequired,
            other => ProblemKind::Other(other.to_string()),
        }
    }

    /// 是否為唯一允許自動重試的 badNonce 錯誤。
    pub fn is_bad_nonce(&self) -> bool {
        self.kind() == ProblemKind::BadNonce
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        if let Some(status) = self.status {
            write!(f, " (HTTP {})", status)?;
        }
        Ok(())
    }
}

/// 協議引擎的錯誤分類。
///
/// - `Network`：傳輸層失敗，除 badNonce 重試外不會自動重試。
/// - `Protocol`：回應不符合預期的資源格式。
/// - `Server`：伺服器回傳的 problem document。
/// - `State`：資源狀態不允許此操作，未發出任何網路請求。
/// - `Signing`：未綁定金鑰、未綁定帳戶位置或金鑰類型不支援。
#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("Network error: {0}")]
    Network(#[from] TransportError),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Server error: {0}")]
    Server(Problem),
    #[error("State error: {0}")]
    State(String),
    #[error("Signing error: {0}")]
    Signing(#[from] KeyError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl AcmeError {
    /// 取得伺服器錯誤的 problem document，其他類型返回 `None`。
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            Self::Server(problem) => Some(problem),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for AcmeError {
    fn from(e: serde_json::Error) -> Self {
        AcmeError::Protocol(format!("JSON error: {}", e))
    }
}

impl From<DecodeError> for AcmeError {
    fn from(e: DecodeError) -> Self {
        AcmeError::Protocol(format!("base64url error: {}", e))
    }
}

impl From<CsrError> for AcmeError {
    fn from(e: CsrError) -> Self {
        match e {
            CsrError::OpenSSL(e) => AcmeError::Signing(KeyError::OpenSSL(e)),
            other => AcmeError::Protocol(format!("cannot build CSR: {}", other)),
        }
    }
}

/// 結果類型，失敗時返回 [`AcmeError`]。
pub type Result<T> = std::result::Result<T, AcmeError>;
