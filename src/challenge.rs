use std::fmt;

use chrono::{DateTime, Utc};
use openssl::sha::sha256;
use serde::{Deserialize, Serialize};

use crate::{
    authorization::Authorization,
    base64,
    error::{Problem, Result},
    key_pair::{KeyError, KeyPair},
    payload::{ChallengeResponsePayload, Identifier, PayloadT},
    session::{self, Session},
    transport::HttpRequest,
};

/// http-01 驗證檔案所在的路徑前綴。
pub const HTTP_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";
/// dns-01 TXT 記錄名稱的前綴。
pub const DNS_CHALLENGE_PREFIX: &str = "_acme-challenge";

/// 挑戰類型，未知的類型保留原始字串。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChallengeType {
    Http01,
    Dns01,
    TlsAlpn01,
    Other(String),
}

impl ChallengeType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for ChallengeType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "http-01" => Self::Http01,
            "dns-01" => Self::Dns01,
            "tls-alpn-01" => Self::TlsAlpn01,
            _ => Self::Other(s),
        }
    }
}

impl From<ChallengeType> for String {
    fn from(t: ChallengeType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 挑戰狀態，由伺服器推進。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl ChallengeStatus {
    /// 不會再變化的狀態。
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

/// 伺服器回傳的挑戰快照。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub type_: ChallengeType,
    pub url: String,
    pub status: ChallengeStatus,
    /// 挑戰 token，用於產生 key authorization
    #[serde(default)]
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
}

/// 回應挑戰需要佈署的內容。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeArtifact {
    /// 以純文字放在 `http://<domain><path>` 的檔案
    HttpFile { path: String, content: String },
    /// 名稱為 `name` 的 TXT 記錄
    DnsTxt { name: String, value: String },
}

impl fmt::Display for ChallengeArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HttpFile { path, content } => write!(f, "HTTP {} => {}", path, content),
            Self::DnsTxt { name, value } => write!(f, "TXT {} => {}", name, value),
        }
    }
}

/// `token.thumbprint` 形式的 key authorization。
pub fn key_authorization(token: &str, thumbprint: &str) -> String {
    format!("{}.{}", token, thumbprint)
}

/// dns-01 的 TXT 記錄值：key authorization 的 SHA-256 以 base64url 編碼。
pub fn dns_txt_value(key_authorization: &str) -> String {
    base64::encode(sha256(key_authorization.as_bytes()))
}

/// dns-01 的記錄名稱，萬用字元網域會先去除 `*.`。
pub fn dns_record_name(domain: &str) -> String {
    let domain = domain.strip_prefix("*.").unwrap_or(domain);
    format!("{}.{}", DNS_CHALLENGE_PREFIX, domain)
}

impl Challenge {
    /// 以帳戶金鑰計算 key authorization，每次呼叫都重新計算 thumbprint。
    pub fn key_authorization(&self, key: &KeyPair) -> std::result::Result<String, KeyError> {
        Ok(key_authorization(&self.token, &key.thumbprint()?))
    }

    /// 依挑戰類型產生需要佈署的內容；tls-alpn-01 與未知類型返回 `None`。
    pub fn artifact(
        &self,
        identifier: &Identifier,
        key: &KeyPair,
    ) -> std::result::Result<Option<ChallengeArtifact>, KeyError> {
        let artifact = match self.type_ {
            ChallengeType::Http01 => Some(ChallengeArtifact::HttpFile {
                path: format!("{}{}", HTTP_CHALLENGE_PREFIX, self.token),
                content: self.key_authorization(key)?,
            }),
            ChallengeType::Dns01 => Some(ChallengeArtifact::DnsTxt {
                name: dns_record_name(&identifier.value),
                value: dns_txt_value(&self.key_authorization(key)?),
            }),
            ChallengeType::TlsAlpn01 | ChallengeType::Other(_) => None,
        };
        Ok(artifact)
    }
}

impl Session {
    /// 取得挑戰的目前狀態。
    pub fn get_challenge(&self, url: &str) -> Result<Challenge> {
        let response = self.post_as_get(url)?;
        Ok(session::decode::<Challenge>(&response)?.value)
    }

    /// 在通知伺服器之前，自行確認挑戰內容已可被外部看到。
    ///
    /// - http-01：GET `http://<domain>/.well-known/acme-challenge/<token>`，
    ///   去除前後空白後與 key authorization 比對
    /// - dns-01：查詢 TXT 記錄，接受原值或以雙引號包住的值
    ///
    /// 任何失敗（未綁定金鑰、連線失敗、內容不符）都返回 `false`。
    pub fn prevalidate(&self, authz: &Authorization, challenge: &Challenge) -> bool {
        let Some(key) = self.key() else {
            tracing::warn!("prevalidation skipped: no account key bound");
            return false;
        };
        let artifact = match challenge.artifact(&authz.identifier, key) {
            Ok(Some(artifact)) => artifact,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(error = %e, "prevalidation failed to compute key authorization");
                return false;
            }
        };

        match artifact {
            ChallengeArtifact::HttpFile { path, content } => {
                let url = format!("http://{}{}", authz.identifier.domain(), path);
                match self.transport().execute(HttpRequest::get(url.as_str())) {
                    Ok(response) if response.is_success() => response.text().trim() == content,
                    Ok(response) => {
                        tracing::warn!(url = %url, status = response.status, "http-01 prevalidation failed");
                        false
                    }
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "http-01 prevalidation failed");
                        false
                    }
                }
            }
            ChallengeArtifact::DnsTxt { name, value } => {
                match self.resolver().lookup_txt(&name) {
                    Ok(records) => {
                        let quoted = format!("\"{}\"", value);
                        records.iter().any(|r| *r == value || *r == quoted)
                    }
                    Err(e) => {
                        tracing::warn!(name = %name, error = %e, "dns-01 prevalidation failed");
                        false
                    }
                }
            }
        }
    }

    /// 通知伺服器挑戰已就緒，返回伺服器回應的挑戰狀態，不會等待驗證結果。
    ///
    /// # 錯誤
    ///
    /// 未綁定帳戶時返回 `AcmeError::Signing`；伺服器拒絕時返回 `AcmeError::Server`。
    pub fn complete_challenge(&self, challenge: &Challenge) -> Result<Challenge> {
        let signer = self.bound_signer()?;
        let key = self.key().ok_or(KeyError::NoKey)?;
        let payload = ChallengeResponsePayload {
            type_: challenge.type_.to_string(),
            key_authorization: challenge.key_authorization(key)?,
        };

        tracing::info!(url = %challenge.url, challenge = %challenge.type_, "responding to challenge");
        let response = self.signed_request(&challenge.url, &payload.to_bytes()?, signer)?;
        Ok(session::decode::<Challenge>(&response)?.value)
    }
}
