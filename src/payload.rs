use serde::{Deserialize, Serialize};

use crate::{
    base64,
    error::{AcmeError, Result},
};

/// 定義所有簽名請求載荷必須實作的功能。
///
/// 載荷在簽名前先經過 [`validate`](Self::validate)，通過後才序列化為
/// JWS 的 payload 位元組。
pub trait PayloadT: Serialize {
    /// 驗證載荷資料是否符合協議要求。
    ///
    /// # 錯誤
    ///
    /// 驗證失敗時返回 `AcmeError::Protocol`，此時不會發出任何請求。
    fn validate(&self) -> Result<()>;

    /// 驗證後序列化為精簡 JSON 位元組。
    fn to_bytes(&self) -> Result<Vec<u8>> {
        self.validate()?;
        Ok(serde_json::to_vec(self)?)
    }
}

fn invalid(message: &str) -> AcmeError {
    AcmeError::Protocol(format!("invalid payload: {}", message))
}

/// 將聯絡方式正規化，未帶 scheme 的電子郵件補上 `mailto:`。
fn normalize_contact(contact: &str) -> String {
    if contact.contains(':') {
        contact.to_string()
    } else {
        format!("mailto:{}", contact)
    }
}

/// 建立新帳號的載荷。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccountPayload {
    pub contact: Vec<String>,
    pub terms_of_service_agreed: bool,
}

impl NewAccountPayload {
    /// 建立已同意服務條款的新帳號載荷。
    ///
    /// # 參數
    ///
    /// - `contacts`: 聯絡方式，未帶 scheme 的值視為電子郵件並補上 `mailto:`
    pub fn new<S: AsRef<str>>(contacts: &[S]) -> Self {
        NewAccountPayload {
            contact: contacts
                .iter()
                .map(|c| normalize_contact(c.as_ref()))
                .collect(),
            terms_of_service_agreed: true,
        }
    }
}

impl PayloadT for NewAccountPayload {
    fn validate(&self) -> Result<()> {
        if !self.terms_of_service_agreed {
            return Err(invalid("terms of service must be agreed"));
        }
        if self.contact.iter().any(|c| c.ends_with(':')) {
            return Err(invalid("contact value cannot be empty"));
        }
        Ok(())
    }
}

/// 以金鑰查詢既有帳號位置，不會建立新帳號。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLookupPayload {
    pub only_return_existing: bool,
}

impl Default for AccountLookupPayload {
    fn default() -> Self {
        Self {
            only_return_existing: true,
        }
    }
}

impl PayloadT for AccountLookupPayload {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// 對既有帳號表示同意服務條款。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementPayload {
    pub terms_of_service_agreed: bool,
}

impl Default for AgreementPayload {
    fn default() -> Self {
        Self {
            terms_of_service_agreed: true,
        }
    }
}

impl PayloadT for AgreementPayload {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// 更新帳號聯絡方式。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAccountPayload {
    pub contact: Vec<String>,
}

impl UpdateAccountPayload {
    pub fn new<S: AsRef<str>>(contacts: &[S]) -> Self {
        Self {
            contact: contacts
                .iter()
                .map(|c| normalize_contact(c.as_ref()))
                .collect(),
        }
    }
}

impl PayloadT for UpdateAccountPayload {
    fn validate(&self) -> Result<()> {
        if self.contact.iter().any(|c| c.ends_with(':')) {
            return Err(invalid("contact value cannot be empty"));
        }
        Ok(())
    }
}

/// 停用帳號或授權，兩者共用 `{"status":"deactivated"}`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivatePayload {
    pub status: String,
}

impl Default for DeactivatePayload {
    fn default() -> Self {
        Self {
            status: "deactivated".to_string(),
        }
    }
}

impl PayloadT for DeactivatePayload {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// 訂單涵蓋的識別項，目前 CA 普遍只支援 `dns` 類型。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

impl Identifier {
    /// 建立 `dns` 類型的識別項。
    pub fn dns(value: impl Into<String>) -> Self {
        Self {
            type_: "dns".to_string(),
            value: value.into(),
        }
    }

    /// 是否為萬用字元網域，例如 `*.example.com`。
    pub fn is_wildcard(&self) -> bool {
        self.value.starts_with("*.")
    }

    /// 去除萬用字元前綴後的網域名稱。
    pub fn domain(&self) -> &str {
        self.value.strip_prefix("*.").unwrap_or(&self.value)
    }
}

/// 建立新訂單的載荷。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderPayload {
    pub identifiers: Vec<Identifier>,
}

impl NewOrderPayload {
    pub fn new(identifiers: Vec<Identifier>) -> Self {
        Self { identifiers }
    }

    /// 為每個網域建立一個 `dns` 識別項。
    pub fn for_domains<S: AsRef<str>>(domains: &[S]) -> Self {
        Self::new(domains.iter().map(|d| Identifier::dns(d.as_ref())).collect())
    }
}

impl PayloadT for NewOrderPayload {
    /// - 至少一個識別項
    /// - 類型與值都不得為空
    fn validate(&self) -> Result<()> {
        if self.identifiers.is_empty() {
            return Err(invalid("at least one identifier is required"));
        }
        for identifier in &self.identifiers {
            if identifier.type_.is_empty() {
                return Err(invalid("identifier type cannot be empty"));
            }
            if identifier.value.is_empty() {
                return Err(invalid("identifier value cannot be empty"));
            }
        }
        Ok(())
    }
}

/// 通知伺服器挑戰已就緒的載荷。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponsePayload {
    #[serde(rename = "type")]
    pub type_: String,
    pub key_authorization: String,
}

impl PayloadT for ChallengeResponsePayload {
    fn validate(&self) -> Result<()> {
        if self.key_authorization.is_empty() {
            return Err(invalid("key authorization cannot be empty"));
        }
        Ok(())
    }
}

/// 提交 CSR 完成訂單的載荷。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeOrderPayload {
    /// DER 編碼 CSR 的 base64url 字串
    pub csr: String,
}

impl FinalizeOrderPayload {
    pub fn from_der(csr_der: &[u8]) -> Self {
        Self {
            csr: base64::encode(csr_der),
        }
    }
}

impl PayloadT for FinalizeOrderPayload {
    fn validate(&self) -> Result<()> {
        if self.csr.is_empty() {
            return Err(invalid("CSR cannot be empty"));
        }
        Ok(())
    }
}

/// 撤銷憑證的載荷，`reason` 為 RFC 5280 的 CRLReason 代碼。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokePayload {
    pub certificate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<u8>,
}

impl RevokePayload {
    pub fn from_der(certificate_der: &[u8], reason: Option<u8>) -> Self {
        Self {
            certificate: base64::encode(certificate_der),
            reason,
        }
    }
}

impl PayloadT for RevokePayload {
    fn validate(&self) -> Result<()> {
        if self.certificate.is_empty() {
            return Err(invalid("certificate cannot be empty"));
        }
        // 7 在 RFC 5280 中未使用
        if matches!(self.reason, Some(r) if r == 7 || r > 10) {
            return Err(invalid("unknown revocation reason"));
        }
        Ok(())
    }
}
