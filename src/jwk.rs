use openssl::sha::sha256;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::base64;

/// 公開 JSON Web Key，依 `kty` 區分 RSA 與 EC 兩種格式。
///
/// 只保留 thumbprint 計算所需的成員，序列化結果可直接放入 by-key
/// protected header 的 `jwk` 欄位。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    /// RSA 公鑰，`n` 為模數、`e` 為公開指數。
    #[serde(rename = "RSA")]
    Rsa { n: String, e: String },
    /// 橢圓曲線公鑰，`crv` 為曲線名稱，`x`、`y` 為固定長度座標。
    #[serde(rename = "EC")]
    Ec { crv: String, x: String, y: String },
}

impl Jwk {
    /// `kty` 欄位的值。
    pub fn key_type(&self) -> &'static str {
        match self {
            Jwk::Rsa { .. } => "RSA",
            Jwk::Ec { .. } => "EC",
        }
    }

    /// 產生 RFC 7638 規定的 thumbprint 輸入。
    ///
    /// 僅包含必要成員，鍵名按字典序排列且不含任何空白，任何偏差都會
    /// 讓由此衍生的 key authorization 全部失效。
    pub fn thumbprint_input(&self) -> String {
        let mut map = Map::new();
        match self {
            Jwk::Rsa { n, e } => {
                map.insert("e".to_string(), Value::String(e.clone()));
                map.insert("kty".to_string(), Value::String("RSA".to_string()));
                map.insert("n".to_string(), Value::String(n.clone()));
            }
            Jwk::Ec { crv, x, y } => {
                map.insert("crv".to_string(), Value::String(crv.clone()));
                map.insert("kty".to_string(), Value::String("EC".to_string()));
                map.insert("x".to_string(), Value::String(x.clone()));
                map.insert("y".to_string(), Value::String(y.clone()));
            }
        }

        Value::Object(map).to_string()
    }

    /// 計算 thumbprint：對 canonical JSON 取 SHA-256，再以 base64url 編碼。
    pub fn thumbprint(&self) -> String {
        base64::encode(sha256(self.thumbprint_input().as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7638 §3.1 的範例金鑰
    const RFC7638_N: &str = "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw";

    fn rfc7638_key() -> Jwk {
        Jwk::Rsa {
            n: RFC7638_N.to_string(),
            e: "AQAB".to_string(),
        }
    }

    #[test]
    fn test_rsa_thumbprint_matches_rfc7638() {
        assert_eq!(
            rfc7638_key().thumbprint(),
            "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs"
        );
    }

    #[test]
    fn test_rsa_thumbprint_input_order() {
        let input = rfc7638_key().thumbprint_input();
        assert!(input.starts_with("{\"e\":\"AQAB\",\"kty\":\"RSA\",\"n\":\"0vx7"));
        assert!(!input.contains(' '));
    }

    #[test]
    fn test_ec_thumbprint_input() {
        let jwk = Jwk::Ec {
            crv: "P-256".to_string(),
            x: "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU".to_string(),
            y: "x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0".to_string(),
        };
        assert_eq!(
            jwk.thumbprint_input(),
            "{\"crv\":\"P-256\",\"kty\":\"EC\",\"x\":\"f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU\",\"y\":\"x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0\"}"
        );
        assert_eq!(jwk.thumbprint(), jwk.thumbprint());
    }

    #[test]
    fn test_header_serialization_carries_kty() {
        let json = serde_json::to_value(rfc7638_key()).unwrap();
        assert_eq!(json["kty"], "RSA");
        assert_eq!(json["e"], "AQAB");

        let parsed: Jwk = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.key_type(), "RSA");
    }
}
