//! 訂單的建立、查詢、完成與憑證下載。
//!
//! 引擎不會輪詢：每個操作只送出一次請求並返回伺服器當下的快照，
//! 何時重新查詢由呼叫端決定。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    authorization::Authorization,
    certificate::CertificateChain,
    error::{AcmeError, Problem, Result},
    payload::{FinalizeOrderPayload, Identifier, NewOrderPayload, PayloadT, RevokePayload},
    session::{self, Session},
    storage::OrderSnapshot,
};

/// 訂單狀態。
///
/// 正常推進為 `pending → ready → processing → valid`，任何狀態都可能變為 `invalid`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

/// 伺服器回傳的訂單物件，訂單 URL 另外由 `Location` 標頭或查詢的 URL 提供。
#[derive(Debug, Deserialize)]
struct OrderResource {
    status: OrderStatus,
    #[serde(default)]
    expires: Option<DateTime<Utc>>,
    identifiers: Vec<Identifier>,
    #[serde(default)]
    authorizations: Vec<String>,
    finalize: String,
    #[serde(default)]
    certificate: Option<String>,
    #[serde(default)]
    error: Option<Problem>,
}

/// 已知位置的訂單快照。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    /// 訂單 URL
    pub location: String,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    pub identifiers: Vec<Identifier>,
    /// 每個識別項一個授權 URL
    pub authorizations: Vec<String>,
    pub finalize: String,
    /// 訂單 `valid` 後才會出現
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
}

impl Order {
    fn from_resource(location: String, resource: OrderResource) -> Self {
        Self {
            location,
            status: resource.status,
            expires: resource.expires,
            identifiers: resource.identifiers,
            authorizations: resource.authorizations,
            finalize: resource.finalize,
            certificate: resource.certificate,
            error: resource.error,
        }
    }

    /// 保存恢復訂單所需的資訊。
    pub fn snapshot(&self) -> OrderSnapshot {
        OrderSnapshot {
            location: self.location.clone(),
            identifiers: self.identifiers.clone(),
        }
    }
}

impl Session {
    /// 建立涵蓋 `identifiers` 的新訂單。
    ///
    /// # 錯誤
    ///
    /// 伺服器可能重用已生效的授權，此時新訂單直接以 `ready` 返回；
    /// 狀態一律照伺服器回報保留。
    ///
    /// # 錯誤
    ///
    /// - 識別項為空時返回 `AcmeError::Protocol`，不會發出請求
    /// - 回應缺少 `Location` 時返回 `AcmeError::Protocol`
    pub fn new_order(&self, identifiers: Vec<Identifier>) -> Result<Order> {
        let payload = NewOrderPayload::new(identifiers).to_bytes()?;
        let url = self.directory().new_order.clone();

        let response = self.post_by_kid(&url, &payload)?;
        let (resource, location) =
            session::decode::<OrderResource>(&response)?.require_location()?;
        let order = Order::from_resource(location, resource);

        if order.status != OrderStatus::Pending {
            tracing::warn!(order = %order.location, status = ?order.status, "new order is not pending");
        }

        tracing::info!(order = %order.location, identifiers = order.identifiers.len(), "order created");
        Ok(order)
    }

    /// 以 POST-as-GET 取得訂單目前狀態。
    pub fn get_order(&self, location: &str) -> Result<Order> {
        let response = self.post_as_get(location)?;
        let resource = session::decode::<OrderResource>(&response)?.value;
        Ok(Order::from_resource(location.to_string(), resource))
    }

    /// 從快照恢復訂單。
    pub fn resume_order(&self, snapshot: &OrderSnapshot) -> Result<Order> {
        self.get_order(&snapshot.location)
    }

    /// 依序取得訂單的所有授權。
    pub fn authorizations(&self, order: &Order) -> Result<Vec<Authorization>> {
        order
            .authorizations
            .iter()
            .map(|url| self.get_authorization(url))
            .collect()
    }

    /// 提交 DER 編碼的 CSR 完成訂單。
    ///
    /// # 錯誤
    ///
    /// 訂單狀態不是 `ready` 時返回 `AcmeError::State`，不會發出任何請求。
    pub fn finalize_order(&self, order: &Order, csr_der: &[u8]) -> Result<Order> {
        if order.status != OrderStatus::Ready {
            return Err(AcmeError::State(format!(
                "order {} is {:?}, finalize requires ready",
                order.location, order.status
            )));
        }

        let payload = FinalizeOrderPayload::from_der(csr_der).to_bytes()?;
        tracing::info!(order = %order.location, "finalizing order");

        let response = self.post_by_kid(&order.finalize, &payload)?;
        let (resource, location) =
            session::decode::<OrderResource>(&response)?.location_or(&order.location);
        Ok(Order::from_resource(location, resource))
    }

    /// 下載已簽發的憑證鏈。
    ///
    /// # 錯誤
    ///
    /// 訂單不是 `valid` 或沒有憑證 URL 時返回 `AcmeError::State`，不會發出任何請求。
    pub fn download_certificate(&self, order: &Order) -> Result<CertificateChain> {
        let url = match (&order.status, &order.certificate) {
            (OrderStatus::Valid, Some(url)) => url,
            (OrderStatus::Valid, None) => {
                return Err(AcmeError::State(format!(
                    "order {} has no certificate URL",
                    order.location
                )))
            }
            (status, _) => {
                return Err(AcmeError::State(format!(
                    "order {} is {:?}, download requires valid",
                    order.location, status
                )))
            }
        };

        let response = self.post_as_get(url)?;
        tracing::info!(order = %order.location, bytes = response.body.len(), "certificate downloaded");
        Ok(CertificateChain::new(
            response.body.clone(),
            response.content_type().map(str::to_string),
        ))
    }

    /// 以帳戶金鑰撤銷 DER 編碼的憑證。
    pub fn revoke_certificate(&self, certificate_der: &[u8], reason: Option<u8>) -> Result<()> {
        let payload = RevokePayload::from_der(certificate_der, reason).to_bytes()?;
        let url = self.directory().revoke_cert.clone();

        self.post_by_kid(&url, &payload)?;
        tracing::info!(reason = ?reason, "certificate revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};

    use super::*;
    use crate::{
        base64,
        certificate::PEM_CHAIN_CONTENT_TYPE,
        key_pair::KeyError,
        session::testing::*,
        transport::{HttpResponse, MockTransport},
    };

    const ORDER_URL: &str = "https://ca.test/order/7";

    fn order_json(status: &str) -> Value {
        let mut order = json!({
            "status": status,
            "expires": "2026-01-08T00:00:00Z",
            "identifiers": [{"type": "dns", "value": "example.com"}],
            "authorizations": ["https://ca.test/authz/1"],
            "finalize": "https://ca.test/order/7/finalize"
        });
        if status == "valid" {
            order["certificate"] = json!("https://ca.test/cert/7");
        }
        order
    }

    fn order(status: &str) -> Order {
        let resource = serde_json::from_value(order_json(status)).unwrap();
        Order::from_resource(ORDER_URL.to_string(), resource)
    }

    #[test]
    fn test_new_order_is_pending_with_location() {
        let mock = Arc::new(MockTransport::new());
        let session = bound_session(&mock);
        mock.push(ok(201, order_json("pending"), "n1").with_header("Location", ORDER_URL));

        let order = session
            .new_order(vec![Identifier::dns("example.com")])
            .unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.location, ORDER_URL);

        let requests = mock.requests();
        assert_eq!(requests[0].url, "https://ca.test/order");
        let (header, payload) = decode_request(&requests[0].body);
        assert_eq!(header["kid"], ACCOUNT_URL);
        assert_eq!(
            payload.unwrap(),
            json!({"identifiers": [{"type": "dns", "value": "example.com"}]})
        );
    }

    #[test]
    fn test_new_order_keeps_ready_status() {
        let mock = Arc::new(MockTransport::new());
        let session = bound_session(&mock);
        mock.push(ok(201, order_json("ready"), "n1").with_header("Location", ORDER_URL));

        let order = session
            .new_order(vec![Identifier::dns("example.com")])
            .unwrap();
        assert_eq!(order.status, OrderStatus::Ready);
        assert_eq!(order.location, ORDER_URL);
        assert_eq!(mock.call_count(), 1);

        // 重用授權的訂單可以直接完成
        mock.push(ok(200, order_json("processing"), "n2"));
        let updated = session.finalize_order(&order, b"csr").unwrap();
        assert_eq!(updated.status, OrderStatus::Processing);
    }

    #[test]
    fn test_new_order_requires_location() {
        let mock = Arc::new(MockTransport::new());
        let session = bound_session(&mock);
        mock.push(ok(201, order_json("pending"), "n1"));

        let err = session.new_order(vec![Identifier::dns("example.com")]).unwrap_err();
        assert!(matches!(err, AcmeError::Protocol(_)));
    }

    #[test]
    fn test_new_order_without_identifiers_makes_no_call() {
        let mock = Arc::new(MockTransport::new());
        let session = bound_session(&mock);

        assert!(session.new_order(Vec::new()).is_err());
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn test_new_order_needs_account() {
        let mock = Arc::new(MockTransport::new());
        let session = session(&mock);

        let err = session.new_order(vec![Identifier::dns("example.com")]).unwrap_err();
        assert!(matches!(err, AcmeError::Signing(KeyError::NoKey)));
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn test_get_order_and_authorizations() {
        let mock = Arc::new(MockTransport::new());
        let session = bound_session(&mock);
        mock.push(ok(200, order_json("pending"), "n1"));
        mock.push(ok(
            200,
            json!({
                "identifier": {"type": "dns", "value": "example.com"},
                "status": "valid",
                "challenges": []
            }),
            "n2",
        ));

        let order = session.get_order(ORDER_URL).unwrap();
        assert_eq!(order.location, ORDER_URL);

        let authzs = session.authorizations(&order).unwrap();
        assert_eq!(authzs.len(), 1);
        assert!(authzs[0].is_valid());
        assert_eq!(authzs[0].location, "https://ca.test/authz/1");
        assert_eq!(mock.call_count(), 2);
    }

    #[test]
    fn test_finalize_requires_ready() {
        let mock = Arc::new(MockTransport::new());
        let session = bound_session(&mock);

        for status in ["pending", "processing", "valid", "invalid"] {
            let err = session.finalize_order(&order(status), b"csr").unwrap_err();
            assert!(matches!(err, AcmeError::State(_)), "{}", status);
        }
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn test_finalize_posts_csr() {
        let mock = Arc::new(MockTransport::new());
        let session = bound_session(&mock);
        mock.push(ok(200, order_json("processing"), "n1"));

        let updated = session.finalize_order(&order("ready"), &[0xFB, 0xEF]).unwrap();
        assert_eq!(updated.status, OrderStatus::Processing);
        assert_eq!(updated.location, ORDER_URL);

        let requests = mock.requests();
        assert_eq!(requests[0].url, "https://ca.test/order/7/finalize");
        let (_, payload) = decode_request(&requests[0].body);
        assert_eq!(payload.unwrap(), json!({"csr": "--8"}));
    }

    #[test]
    fn test_finalize_bad_nonce_retried_once() {
        let mock = Arc::new(MockTransport::new());
        let session = bound_session(&mock);
        mock.push(problem(400, "badNonce", "n1"));
        mock.push(ok(200, order_json("processing"), "n2"));

        let updated = session.finalize_order(&order("ready"), b"csr").unwrap();
        assert_eq!(updated.status, OrderStatus::Processing);
        assert_eq!(mock.call_count(), 2);
        assert_eq!(session.current_nonce().as_deref(), Some("n2"));
    }

    #[test]
    fn test_download_certificate() {
        let mock = Arc::new(MockTransport::new());
        let session = bound_session(&mock);
        let pem = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";
        mock.push(
            HttpResponse::new(200)
                .with_header("Content-Type", PEM_CHAIN_CONTENT_TYPE)
                .with_header("Replay-Nonce", "n1")
                .with_body(pem),
        );

        let chain = session.download_certificate(&order("valid")).unwrap();
        assert_eq!(chain.as_pem(), Some(pem));
        assert_eq!(chain.content_type(), Some(PEM_CHAIN_CONTENT_TYPE));
        assert_eq!(mock.requests()[0].url, "https://ca.test/cert/7");
    }

    #[test]
    fn test_download_preconditions() {
        let mock = Arc::new(MockTransport::new());
        let session = bound_session(&mock);

        let mut valid_without_url = order("valid");
        valid_without_url.certificate = None;
        assert!(matches!(
            session.download_certificate(&valid_without_url),
            Err(AcmeError::State(_))
        ));
        assert!(matches!(
            session.download_certificate(&order("processing")),
            Err(AcmeError::State(_))
        ));
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn test_invalid_order_keeps_error() {
        let mut body = order_json("invalid");
        body["error"] = json!({
            "type": "urn:ietf:params:acme:error:unauthorized",
            "detail": "authorization failed"
        });
        let resource = serde_json::from_value(body).unwrap();
        let order = Order::from_resource(ORDER_URL.to_string(), resource);
        assert!(order.status.is_terminal());
        assert!(order.error.is_some());
    }

    #[test]
    fn test_order_serializes_with_location() {
        let value = serde_json::to_value(order("ready")).unwrap();
        assert_eq!(value["location"], ORDER_URL);
        assert_eq!(value["status"], "ready");
        assert!(value.get("certificate").is_none());
    }

    #[test]
    fn test_revoke_certificate() {
        let mock = Arc::new(MockTransport::new());
        let session = bound_session(&mock);
        mock.push(HttpResponse::new(200).with_header("Replay-Nonce", "n1"));

        session.revoke_certificate(&[1, 2, 3], Some(4)).unwrap();

        let requests = mock.requests();
        assert_eq!(requests[0].url, "https://ca.test/revoke");
        let (_, payload) = decode_request(&requests[0].body);
        assert_eq!(
            payload.unwrap(),
            json!({"certificate": base64::encode([1u8, 2, 3]), "reason": 4})
        );
    }

    #[test]
    fn test_resume_order_from_snapshot() {
        let mock = Arc::new(MockTransport::new());
        let session = bound_session(&mock);
        mock.push(ok(200, order_json("ready"), "n1"));

        let snapshot = order("pending").snapshot();
        let resumed = session.resume_order(&snapshot).unwrap();
        assert_eq!(resumed.status, OrderStatus::Ready);
        assert_eq!(resumed.location, ORDER_URL);
    }
}
