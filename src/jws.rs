//! 此模組負責組裝 ACME 請求使用的 flattened JSON JWS。
//!
//! 簽名流程：`protected = b64u(header)`，`payload = b64u(bytes)`，
//! 對 `protected + "." + payload` 以帳戶金鑰簽名後輸出
//! `{"protected", "payload", "signature"}` 三個欄位。

use serde::{Deserialize, Serialize};

use crate::{
    base64,
    error::{AcmeError, Result},
    key_pair::KeyPair,
    protection::ProtectedHeader,
};

/// ACME 請求本體使用的 media type。
pub const JOSE_CONTENT_TYPE: &str = "application/jose+json";

/// flattened JSON 序列化的 JWS 物件，三個欄位皆為 base64url 字串。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jws {
    pub protected: String,
    /// POST-as-GET 請求時為空字串
    pub payload: String,
    pub signature: String,
}

impl Jws {
    /// 以指定 header 與金鑰對 payload 位元組簽名。
    ///
    /// `payload` 為空切片時產生 POST-as-GET 請求。
    ///
    /// # 錯誤
    ///
    /// header 無法序列化時返回 `AcmeError::Protocol`，簽名失敗時返回
    /// `AcmeError::Signing`。
    pub fn sign(header: &ProtectedHeader, payload: &[u8], key: &KeyPair) -> Result<Self> {
        let protected = header.encode()?;
        let payload = base64::encode(payload);
        let signing_input = format!("{}.{}", protected, payload);
        let signature = base64::encode(key.sign(signing_input.as_bytes())?);

        Ok(Jws {
            protected,
            payload,
            signature,
        })
    }

    /// 解碼 protected header，主要用於測試與除錯紀錄。
    pub fn header(&self) -> Result<ProtectedHeader> {
        let bytes = base64::decode(&self.protected)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// 解碼 payload 原始位元組。
    pub fn payload_bytes(&self) -> Result<Vec<u8>> {
        base64::decode(&self.payload).map_err(AcmeError::from)
    }

    /// 序列化為請求本體。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
