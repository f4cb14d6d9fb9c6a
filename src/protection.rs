use serde::{Deserialize, Serialize};

use crate::{
    base64,
    jwk::Jwk,
    key_pair::{KeyError, KeyPair},
};

/// protected header 用來識別簽名金鑰的方式。
///
/// - `Jwk`：尚無帳戶位置時直接附上公開金鑰（new account、帳戶查詢、撤銷）。
/// - `Kid`：帳戶位置已知後的所有請求。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyBinding {
    Jwk(Jwk),
    Kid(String),
}

/// JWS protected header，序列化後欄位順序固定為 `nonce`、`url`、`alg`，
/// 其後為 `jwk` 或 `kid` 其中之一。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedHeader {
    /// 用於防止重放攻擊的一次性隨機數
    pub nonce: String,
    /// 請求目標 URL，必須與實際送出的 URL 相同
    pub url: String,
    /// 簽章演算法
    pub alg: String,
    #[serde(flatten)]
    pub binding: KeyBinding,
}

impl ProtectedHeader {
    /// 建立 by-key 形式的 header，附上金鑰的公開 JWK。
    pub fn by_key(
        nonce: impl Into<String>,
        url: impl Into<String>,
        key: &KeyPair,
    ) -> Result<Self, KeyError> {
        Ok(Self {
            nonce: nonce.into(),
            url: url.into(),
            alg: key.signature_algorithm().to_string(),
            binding: KeyBinding::Jwk(key.public_jwk()?),
        })
    }

    /// 建立 by-kid 形式的 header，`kid` 為伺服器指派的帳戶 URL。
    pub fn by_kid(
        nonce: impl Into<String>,
        url: impl Into<String>,
        key: &KeyPair,
        kid: impl Into<String>,
    ) -> Self {
        Self {
            nonce: nonce.into(),
            url: url.into(),
            alg: key.signature_algorithm().to_string(),
            binding: KeyBinding::Kid(kid.into()),
        }
    }

    /// 序列化為精簡 JSON 後以 base64url 編碼，即 JWS 的 `protected` 欄位。
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(base64::encode(serde_json::to_vec(self)?))
    }
}

impl std::fmt::Display for ProtectedHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        serde_json::to_string(self)
            .map_err(|_| std::fmt::Error)
            .and_then(|s| write!(f, "{}", s))
    }
}
