use std::{fmt, str::FromStr};

use openssl::{
    bn::{BigNum, BigNumContext},
    ec::{EcGroup, EcKey},
    ecdsa::EcdsaSig,
    error::ErrorStack,
    hash::MessageDigest,
    nid::Nid,
    pkey::{Id, PKey, Private},
    rsa::Rsa,
    sign::Signer,
};
use thiserror::Error;

use crate::{base64, jwk::Jwk};

/// 金鑰相關操作的錯誤列舉，同時涵蓋簽名時缺少綁定資訊的情況。
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("Unsupported elliptic curve")]
    UnsupportedCurve,
    #[error("No account key bound to the session")]
    NoKey,
    #[error("No account location (kid) bound to the session")]
    NoKid,
}

/// 本模組使用的結果類型，當中錯誤皆為 `KeyError`。
type Result<T> = std::result::Result<T, KeyError>;

/// 產生新金鑰時可選擇的演算法。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa2048,
    Rsa4096,
    EcP256,
    EcP384,
}

impl FromStr for KeyAlgorithm {
    type Err = KeyError;

    /// 解析演算法名稱（不區分大小寫），`RSA` 預設為 2048 位元，`EC` 預設為 P-256。
    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "RSA" | "RSA2048" | "RS256" => Ok(Self::Rsa2048),
            "RSA4096" => Ok(Self::Rsa4096),
            "EC" | "ECDSA" | "ES256" | "P-256" | "P256" => Ok(Self::EcP256),
            "ES384" | "P-384" | "P384" => Ok(Self::EcP384),
            _ => Err(KeyError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// 支援的橢圓曲線，決定 JWK `crv`、座標長度與簽名演算法。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    P256,
    P384,
}

impl Curve {
    fn from_nid(nid: Nid) -> Result<Self> {
        match nid {
            Nid::X9_62_PRIME256V1 => Ok(Self::P256),
            Nid::SECP384R1 => Ok(Self::P384),
            _ => Err(KeyError::UnsupportedCurve),
        }
    }

    fn nid(self) -> Nid {
        match self {
            Self::P256 => Nid::X9_62_PRIME256V1,
            Self::P384 => Nid::SECP384R1,
        }
    }

    /// JWK 中使用的曲線名稱。
    pub fn jwk_name(self) -> &'static str {
        match self {
            Self::P256 => "P-256",
            Self::P384 => "P-384",
        }
    }

    /// 座標與簽名中 `r`、`s` 的固定位元組長度。
    fn coordinate_size(self) -> usize {
        match self {
            Self::P256 => 32,
            Self::P384 => 48,
        }
    }

    fn digest(self) -> MessageDigest {
        match self {
            Self::P256 => MessageDigest::sha256(),
            Self::P384 => MessageDigest::sha384(),
        }
    }
}

/// 帳戶金鑰，為 RSA 與 ECC 兩種變體組成的封閉集合。
///
/// 提供 JWS 簽名、公開 JWK 匯出與金鑰產生等能力。
pub enum KeyPair {
    Rsa(PKey<Private>),
    Ec { key: PKey<Private>, curve: Curve },
}

impl KeyPair {
    /// 根據指定演算法產生新的私鑰。
    pub fn generate(alg: KeyAlgorithm) -> Result<Self> {
        match alg {
            KeyAlgorithm::Rsa2048 => Ok(Self::Rsa(PKey::from_rsa(Rsa::generate(2048)?)?)),
            KeyAlgorithm::Rsa4096 => Ok(Self::Rsa(PKey::from_rsa(Rsa::generate(4096)?)?)),
            KeyAlgorithm::EcP256 => Self::generate_ec(Curve::P256),
            KeyAlgorithm::EcP384 => Self::generate_ec(Curve::P384),
        }
    }

    fn generate_ec(curve: Curve) -> Result<Self> {
        let group = EcGroup::from_curve_name(curve.nid())?;
        let key = PKey::from_ec_key(EcKey::generate(&group)?)?;
        Ok(Self::Ec { key, curve })
    }

    /// 從 PEM 格式的私鑰建立金鑰，演算法與曲線由金鑰本身判定。
    ///
    /// # 錯誤
    ///
    /// PEM 無法解析時返回 `KeyError::OpenSSL`；非 RSA / P-256 / P-384 金鑰返回
    /// `KeyError::UnsupportedAlgorithm` 或 `KeyError::UnsupportedCurve`。
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let key = PKey::private_key_from_pem(pem)?;
        match key.id() {
            Id::RSA => Ok(Self::Rsa(key)),
            Id::EC => {
                let nid = key
                    .ec_key()?
                    .group()
                    .curve_name()
                    .ok_or(KeyError::UnsupportedCurve)?;
                let curve = Curve::from_nid(nid)?;
                Ok(Self::Ec { key, curve })
            }
            other => Err(KeyError::UnsupportedAlgorithm(format!("{:?}", other))),
        }
    }

    /// 以 PKCS#8 PEM 格式匯出私鑰，供儲存與恢復工作階段使用。
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.private_key().private_key_to_pem_pkcs8()?)
    }

    /// 底層 OpenSSL 私鑰，供 CSR 等外部協作者使用。
    pub fn private_key(&self) -> &PKey<Private> {
        match self {
            Self::Rsa(key) => key,
            Self::Ec { key, .. } => key,
        }
    }

    /// JWS protected header 中的 `alg` 值。
    pub fn signature_algorithm(&self) -> &'static str {
        match self {
            Self::Rsa(_) => "RS256",
            Self::Ec {
                curve: Curve::P256, ..
            } => "ES256",
            Self::Ec {
                curve: Curve::P384, ..
            } => "ES384",
        }
    }

    /// 匯出公開 JWK，僅包含 RFC 7638 要求的成員。
    pub fn public_jwk(&self) -> Result<Jwk> {
        match self {
            Self::Rsa(key) => {
                let rsa = key.rsa()?;
                Ok(Jwk::Rsa {
                    n: base64::encode(rsa.n().to_vec()),
                    e: base64::encode(rsa.e().to_vec()),
                })
            }
            Self::Ec { key, curve } => {
                let ec = key.ec_key()?;
                let mut ctx = BigNumContext::new()?;
                let mut x = BigNum::new()?;
                let mut y = BigNum::new()?;
                ec.public_key()
                    .affine_coordinates(ec.group(), &mut x, &mut y, &mut ctx)?;

                let size = curve.coordinate_size() as i32;
                Ok(Jwk::Ec {
                    crv: curve.jwk_name().to_string(),
                    x: base64::encode(x.to_vec_padded(size)?),
                    y: base64::encode(y.to_vec_padded(size)?),
                })
            }
        }
    }

    /// 公開 JWK 的 thumbprint。
    pub fn thumbprint(&self) -> Result<String> {
        Ok(self.public_jwk()?.thumbprint())
    }

    /// 以金鑰原生演算法對資料簽名。
    ///
    /// RSA 使用 PKCS#1 v1.5 + SHA-256；ECDSA 的 DER 簽名會轉為 JWS 要求的
    /// 固定長度 `r || s` 格式。
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Rsa(key) => {
                let mut signer = Signer::new(MessageDigest::sha256(), key)?;
                signer.update(data)?;
                Ok(signer.sign_to_vec()?)
            }
            Self::Ec { key, curve } => {
                let mut signer = Signer::new(curve.digest(), key)?;
                signer.update(data)?;
                let der = signer.sign_to_vec()?;

                let sig = EcdsaSig::from_der(&der)?;
                let size = curve.coordinate_size() as i32;
                let mut raw = sig.r().to_vec_padded(size)?;
                raw.extend(sig.s().to_vec_padded(size)?);
                Ok(raw)
            }
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 不輸出私鑰內容
        f.debug_struct("KeyPair")
            .field("alg", &self.signature_algorithm())
            .finish_non_exhaustive()
    }
}
