use chrono::{DateTime, TimeDelta, Utc};
use openssl::{asn1::Asn1Time, x509::X509};
use thiserror::Error;

/// 伺服器簽發憑證鏈的 media type。
pub const PEM_CHAIN_CONTENT_TYPE: &str = "application/pem-certificate-chain";

/// 解析下載的憑證鏈時可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    Parse(#[from] openssl::error::ErrorStack),
    #[error("Certificate chain is not PEM text")]
    NotPem,
    #[error("Certificate chain is empty")]
    Empty,
    #[error("Invalid expiration timestamp")]
    InvalidTimestamp,
}

type Result<T> = std::result::Result<T, CertificateError>;

/// 下載的憑證鏈原始內容。
///
/// 引擎不驗證憑證鏈，只保存伺服器回傳的位元組與 `Content-Type`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain {
    bytes: Vec<u8>,
    content_type: Option<String>,
}

impl CertificateChain {
    pub fn new(bytes: Vec<u8>, content_type: Option<String>) -> Self {
        Self {
            bytes,
            content_type,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// 以 PEM 文字檢視內容，非 UTF-8 或不含 PEM 區塊時返回 `None`。
    pub fn as_pem(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes)
            .ok()
            .filter(|text| text.contains("-----BEGIN CERTIFICATE-----"))
    }

    /// 解析鏈中所有憑證，第一張為終端憑證。
    pub fn certificates(&self) -> Result<Vec<X509>> {
        let pem = self.as_pem().ok_or(CertificateError::NotPem)?;
        let certs = X509::stack_from_pem(pem.as_bytes())?;
        if certs.is_empty() {
            return Err(CertificateError::Empty);
        }
        Ok(certs)
    }

    /// 終端憑證的到期時間。
    pub fn not_after(&self) -> Result<DateTime<Utc>> {
        let certs = self.certificates()?;
        let leaf = certs.first().ok_or(CertificateError::Empty)?;

        let epoch = Asn1Time::from_unix(0)?;
        let diff = epoch.diff(leaf.not_after())?;
        let seconds = diff.days as i64 * 86400 + diff.secs as i64;
        DateTime::from_timestamp(seconds, 0).ok_or(CertificateError::InvalidTimestamp)
    }

    /// 剩餘有效期低於 `threshold_days` 天時返回 `true`，已過期也返回 `true`。
    pub fn should_renew(&self, threshold_days: u32) -> Result<bool> {
        let remaining = self.not_after()? - Utc::now();
        Ok(remaining <= TimeDelta::days(threshold_days as i64))
    }
}
