use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AcmeError, Result},
    transport::{HttpRequest, HttpResponse, Transport},
};

/// ACME 伺服器公告的端點與能力。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    /// 取得新 nonce 的端點；缺少時改以重新取得目錄的回應取得 nonce。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_nonce: Option<String>,
    /// 新帳號註冊與帳號查詢的端點。
    pub new_account: String,
    /// 建立訂單的端點。
    pub new_order: String,
    /// 預先授權端點，多數 CA 不提供，僅保留解析結果。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_authz: Option<String>,
    /// 撤銷憑證的端點。
    pub revoke_cert: String,
    /// 帳戶金鑰輪替的端點。
    pub key_change: String,
    #[serde(default)]
    pub meta: DirectoryMeta,
}

/// 目錄中的 `meta` 物件。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caa_identities: Vec<String>,
    #[serde(default)]
    pub external_account_required: bool,
}

impl Directory {
    /// 以 GET 取得並解析目錄。
    ///
    /// 除了解析後的目錄外也返回原始回應，讓呼叫端能夠擷取其中的
    /// `Replay-Nonce`。
    ///
    /// # 錯誤
    ///
    /// 傳輸失敗返回 `AcmeError::Network`；狀態碼非 2xx 或本體無法解析為目錄時
    /// 返回 `AcmeError::Protocol`。
    pub fn fetch(transport: &dyn Transport, url: &str) -> Result<(Self, HttpResponse)> {
        tracing::debug!(url, "fetching directory");
        let response = transport.execute(HttpRequest::get(url))?;
        if !response.is_success() {
            return Err(AcmeError::Protocol(format!(
                "directory request to {} returned HTTP {}",
                url, response.status
            )));
        }

        let directory = Self::parse(&response.body)?;
        Ok((directory, response))
    }

    /// 從 JSON 位元組解析目錄。
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| AcmeError::Protocol(format!("malformed directory: {}", e)))
    }

    /// 將所有端點改寫到新的 origin，保留原本的路徑與查詢字串。
    ///
    /// 用於經由反向代理或測試伺服器存取 CA 的情境。
    pub fn rebase(&self, base: &str) -> Result<Self> {
        let base = Url::parse(base)
            .map_err(|e| AcmeError::Protocol(format!("invalid base URL {}: {}", base, e)))?;
        let rewrite = |endpoint: &str| -> Result<String> {
            let original = Url::parse(endpoint).map_err(|e| {
                AcmeError::Protocol(format!("invalid endpoint {}: {}", endpoint, e))
            })?;
            let mut rebased = base.clone();
            rebased.set_path(original.path());
            rebased.set_query(original.query());
            Ok(rebased.to_string())
        };

        Ok(Self {
            new_nonce: self.new_nonce.as_deref().map(rewrite).transpose()?,
            new_account: rewrite(&self.new_account)?,
            new_order: rewrite(&self.new_order)?,
            new_authz: self.new_authz.as_deref().map(rewrite).transpose()?,
            revoke_cert: rewrite(&self.revoke_cert)?,
            key_change: rewrite(&self.key_change)?,
            meta: self.meta.clone(),
        })
    }

    pub fn terms_of_service(&self) -> Option<&str> {
        self.meta.terms_of_service.as_deref()
    }

    pub fn external_account_required(&self) -> bool {
        self.meta.external_account_required
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::transport::MockTransport;

    pub(crate) fn letsencrypt_like() -> serde_json::Value {
        json!({
            "keyChange": "https://ca.example/acme/key-change",
            "meta": {
                "caaIdentities": ["ca.example"],
                "termsOfService": "https://ca.example/tos.pdf",
                "website": "https://ca.example"
            },
            "newAccount": "https://ca.example/acme/new-acct",
            "newNonce": "https://ca.example/acme/new-nonce",
            "newOrder": "https://ca.example/acme/new-order",
            "renewalInfo": "https://ca.example/acme/renewal-info",
            "revokeCert": "https://ca.example/acme/revoke-cert",
            "x8e3Wz9nHxM": "https://community.example/t/adding-random-entries-to-the-directory/33417"
        })
    }

    #[test]
    fn test_fetch_parses_directory() {
        let mock = MockTransport::new();
        mock.push(HttpResponse::json(200, &letsencrypt_like()).with_header("Replay-Nonce", "n0"));

        let (dir, response) = Directory::fetch(&mock, "https://ca.example/directory").unwrap();
        assert_eq!(dir.new_account, "https://ca.example/acme/new-acct");
        assert_eq!(dir.terms_of_service(), Some("https://ca.example/tos.pdf"));
        assert!(!dir.external_account_required());
        assert!(dir.new_authz.is_none());
        assert_eq!(response.replay_nonce(), Some("n0"));
    }

    #[test]
    fn test_malformed_directory_is_protocol_error() {
        let mock = MockTransport::new();
        mock.push(HttpResponse::json(200, &json!({"newNonce": "https://ca/nonce"})));

        let err = Directory::fetch(&mock, "https://ca/directory").unwrap_err();
        assert!(matches!(err, AcmeError::Protocol(_)));
    }

    #[test]
    fn test_new_nonce_is_optional() {
        let mut body = letsencrypt_like();
        body.as_object_mut().unwrap().remove("newNonce");

        let dir = Directory::parse(body.to_string().as_bytes()).unwrap();
        assert!(dir.new_nonce.is_none());
        assert!(dir.rebase("http://127.0.0.1:14000").unwrap().new_nonce.is_none());
    }

    #[test]
    fn test_transport_failure_is_network_error() {
        let mock = MockTransport::new();
        mock.push_failure("dns failure");

        let err = Directory::fetch(&mock, "https://ca/directory").unwrap_err();
        assert!(matches!(err, AcmeError::Network(_)));
    }

    #[test]
    fn test_rebase_keeps_paths() {
        let dir = Directory::parse(letsencrypt_like().to_string().as_bytes()).unwrap();
        let rebased = dir.rebase("http://127.0.0.1:14000").unwrap();

        assert_eq!(
            rebased.new_nonce.as_deref(),
            Some("http://127.0.0.1:14000/acme/new-nonce")
        );
        assert_eq!(rebased.key_change, "http://127.0.0.1:14000/acme/key-change");
        assert_eq!(rebased.meta, dir.meta);
    }
}
