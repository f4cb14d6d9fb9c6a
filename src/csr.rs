use openssl::{
    hash::MessageDigest,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req},
};
use thiserror::Error;

use crate::{key_pair::KeyPair, order::Order, payload::Identifier};

/// 建立 CSR 時可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] openssl::error::ErrorStack),
    #[error("No SAN entries")]
    NoSanEntries,
    #[error("Unsupported identifier type: {0}")]
    UnsupportedIdentifier(String),
}

type Result<T> = std::result::Result<T, CsrError>;

/// 產生 finalize 所需的 DER 編碼 CSR。
///
/// 第一個名稱同時作為 subject 的 CN，所有名稱都放入 SAN 擴充。
///
/// ```ignore
/// let der = Csr::new()
///     .add_dns("example.com")
///     .add_dns("www.example.com")
///     .build_der(&certificate_key)?;
/// ```
#[derive(Debug, Default, Clone)]
pub struct Csr {
    dns_names: Vec<String>,
}

impl Csr {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以訂單上的識別項建立，只接受 `dns` 類型。
    pub fn for_order(order: &Order) -> Result<Self> {
        Self::from_identifiers(&order.identifiers)
    }

    pub fn from_identifiers(identifiers: &[Identifier]) -> Result<Self> {
        identifiers.iter().try_fold(Self::new(), |csr, identifier| {
            if identifier.type_ != "dns" {
                return Err(CsrError::UnsupportedIdentifier(identifier.type_.clone()));
            }
            Ok(csr.add_dns(&identifier.value))
        })
    }

    pub fn add_dns(mut self, name: &str) -> Self {
        self.dns_names.push(name.to_string());
        self
    }

    /// 以憑證金鑰簽名並輸出 DER。
    ///
    /// 憑證金鑰應與帳戶金鑰不同。
    ///
    /// # 錯誤
    ///
    /// 未加入任何名稱時返回 `CsrError::NoSanEntries`。
    pub fn build_der(&self, key: &KeyPair) -> Result<Vec<u8>> {
        let first = self.dns_names.first().ok_or(CsrError::NoSanEntries)?;
        let mut builder = X509Req::builder()?;

        let mut subject = X509NameBuilder::new()?;
        subject.append_entry_by_text("CN", first)?;
        builder.set_subject_name(&subject.build())?;

        let mut san = SubjectAlternativeName::new();
        for name in &self.dns_names {
            san.dns(name);
        }
        let extension = san.build(&builder.x509v3_context(None))?;
        let mut extensions = Stack::new()?;
        extensions.push(extension)?;
        builder.add_extensions(&extensions)?;

        builder.set_pubkey(key.private_key())?;
        builder.sign(key.private_key(), MessageDigest::sha256())?;
        Ok(builder.build().to_der()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_pair::KeyAlgorithm;

    #[test]
    fn test_build_der_contains_names() {
        let key = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
        let der = Csr::new()
            .add_dns("example.com")
            .add_dns("*.example.com")
            .build_der(&key)
            .unwrap();

        let req = X509Req::from_der(&der).unwrap();
        assert!(req.verify(key.private_key()).unwrap());
        let text = String::from_utf8(req.to_text().unwrap()).unwrap();
        assert!(text.contains("DNS:example.com"));
        assert!(text.contains("DNS:*.example.com"));
    }

    #[test]
    fn test_requires_names() {
        let key = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
        assert!(matches!(Csr::new().build_der(&key), Err(CsrError::NoSanEntries)));
    }

    #[test]
    fn test_rejects_non_dns_identifiers() {
        let identifiers = vec![
            Identifier::dns("example.com"),
            Identifier {
                type_: "ip".to_string(),
                value: "192.0.2.1".to_string(),
            },
        ];
        assert!(matches!(
            Csr::from_identifiers(&identifiers),
            Err(CsrError::UnsupportedIdentifier(_))
        ));
    }
}
