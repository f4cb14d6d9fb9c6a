//! 協議會話：目錄、nonce 槽位、帳戶金鑰與 kid 綁定，以及所有簽名請求共用的管線。
//!
//! 每個簽名請求都在持有 nonce 鎖的情況下完成「取出 nonce、簽名、送出、
//! 擷取新 nonce」，因此同一個會話上的簽名請求是序列化的。伺服器回報
//! `badNonce` 時以新 nonce 重送一次，其餘錯誤直接返回呼叫端。

use std::{
    env,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::de::DeserializeOwned;

use crate::{
    directory::Directory,
    dns::{DohResolver, TxtResolver},
    error::{AcmeError, Problem, Result},
    jws::{Jws, JOSE_CONTENT_TYPE},
    key_pair::{KeyAlgorithm, KeyError, KeyPair},
    nonce::NonceSlot,
    protection::ProtectedHeader,
    transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport},
};

/// Let's Encrypt 正式環境的目錄。
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt 測試環境的目錄。
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
/// 覆寫目錄 URL 的環境變數。
pub const DIRECTORY_URL_ENV: &str = "ACME_DIRECTORY_URL";

const DEFAULT_KEY_ALG: KeyAlgorithm = KeyAlgorithm::EcP256;
const DEFAULT_USER_AGENT: &str = concat!("acme-engine/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_DOH_URL: &str = "https://dns.google/resolve";

/// 解碼後的資源與其位置。
///
/// 位置來自 `Location` 標頭，與資源本體分開傳遞，由呼叫端決定如何合併。
#[derive(Debug, Clone, PartialEq)]
pub struct Located<T> {
    pub value: T,
    pub location: Option<String>,
}

impl<T> Located<T> {
    /// 取得值與位置，缺少 `Location` 標頭時返回 `AcmeError::Protocol`。
    pub fn require_location(self) -> Result<(T, String)> {
        match self.location {
            Some(location) => Ok((self.value, location)),
            None => Err(AcmeError::Protocol(
                "response is missing the Location header".to_string(),
            )),
        }
    }

    /// 取得值與位置，缺少標頭時使用已知的位置。
    pub fn location_or(self, known: &str) -> (T, String) {
        let location = self.location.unwrap_or_else(|| known.to_string());
        (self.value, location)
    }
}

/// 簽名時識別金鑰的方式。
#[derive(Debug, Clone, Copy)]
pub(crate) enum Signer<'a> {
    /// 附上公開 JWK，用於帳戶尚無位置時。
    Key(&'a KeyPair),
    Kid { key: &'a KeyPair, kid: &'a str },
}

/// 會話設定，建立後不可變。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub directory_url: String,
    /// 註冊時未提供金鑰則以此演算法產生
    pub key_algorithm: KeyAlgorithm,
    pub user_agent: String,
    pub timeout: Duration,
    /// dns-01 預先驗證使用的 DNS-over-HTTPS 端點
    pub doh_url: String,
}

/// 一個 ACME 伺服器上的協議會話。
///
/// 改變金鑰或帳戶綁定的操作（註冊、解析帳戶）需要 `&mut self`，
/// 其餘操作只需共享參考，可跨執行緒使用。
#[derive(Debug)]
pub struct Session {
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn TxtResolver>,
    directory: Directory,
    nonce: Mutex<NonceSlot>,
    config: SessionConfig,
    key: Option<Arc<KeyPair>>,
    kid: Option<String>,
}

impl Session {
    /// 以預設設定建立建構器。
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// 目前綁定的帳戶金鑰。
    pub fn key(&self) -> Option<&Arc<KeyPair>> {
        self.key.as_ref()
    }

    /// 目前綁定的帳戶位置（kid）。
    pub fn account_location(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// 槽位中的 nonce，不會將其取出。
    pub fn current_nonce(&self) -> Option<String> {
        self.lock_nonce().peek().map(str::to_string)
    }

    /// 確保槽位中有可用的 nonce。
    ///
    /// 槽位為空時向 `newNonce` 發出 HEAD 請求；目錄沒有 `newNonce` 或回應
    /// 未帶 nonce 時改為重新取得目錄。
    pub fn ensure_nonce(&self) -> Result<()> {
        let mut slot = self.lock_nonce();
        self.refill_nonce(&mut slot)
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn resolver(&self) -> &dyn TxtResolver {
        self.resolver.as_ref()
    }

    pub(crate) fn bind(&mut self, key: Arc<KeyPair>, location: String) {
        tracing::info!(account = %location, "account bound to session");
        self.key = Some(key);
        self.kid = Some(location);
    }

    fn lock_nonce(&self) -> MutexGuard<'_, NonceSlot> {
        self.nonce.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refill_nonce(&self, slot: &mut NonceSlot) -> Result<()> {
        if !slot.is_empty() {
            return Ok(());
        }

        if let Some(new_nonce) = self.directory.new_nonce.as_deref() {
            tracing::debug!(url = %new_nonce, "requesting fresh nonce");
            let response = self.transport.execute(HttpRequest::head(new_nonce))?;
            if slot.observe(&response) {
                return Ok(());
            }
        }

        // 沒有可用的 newNonce 時退回重新取得目錄
        tracing::debug!(url = %self.config.directory_url, "no nonce from newNonce, refetching directory");
        let response = self
            .transport
            .execute(HttpRequest::get(self.config.directory_url.as_str()))?;
        if slot.observe(&response) {
            Ok(())
        } else {
            Err(AcmeError::Protocol(
                "server did not provide a Replay-Nonce".to_string(),
            ))
        }
    }

    /// 已綁定的金鑰與 kid。
    pub(crate) fn bound_signer(&self) -> Result<Signer<'_>> {
        let key = self.key.as_deref().ok_or(KeyError::NoKey)?;
        let kid = self.kid.as_deref().ok_or(KeyError::NoKid)?;
        Ok(Signer::Kid { key, kid })
    }

    /// 送出簽名的 POST 請求。
    ///
    /// 非 2xx 回應會解析為 problem document 並返回 `AcmeError::Server`；
    /// `badNonce` 只重試一次。
    pub(crate) fn signed_request(
        &self,
        url: &str,
        payload: &[u8],
        signer: Signer<'_>,
    ) -> Result<HttpResponse> {
        let mut slot = self.lock_nonce();
        let mut retried = false;

        loop {
            self.refill_nonce(&mut slot)?;
            let nonce = slot.take().ok_or_else(|| {
                AcmeError::Protocol("nonce slot empty after refill".to_string())
            })?;

            let (key, header) = match signer {
                Signer::Key(key) => (key, ProtectedHeader::by_key(nonce, url, key)?),
                Signer::Kid { key, kid } => (key, ProtectedHeader::by_kid(nonce, url, key, kid)),
            };
            let body = Jws::sign(&header, payload, key)?.to_json()?;

            tracing::debug!(url, post_as_get = payload.is_empty(), "sending signed request");
            let response = self.transport.execute(HttpRequest::post(
                url,
                JOSE_CONTENT_TYPE,
                body.into_bytes(),
            ))?;
            slot.observe(&response);

            if response.is_success() {
                return Ok(response);
            }

            let problem = problem_from(&response);
            if problem.is_bad_nonce() && !retried {
                tracing::warn!(url, "server rejected nonce, retrying once");
                retried = true;
                continue;
            }

            tracing::debug!(url, status = response.status, problem = %problem, "request failed");
            return Err(AcmeError::Server(problem));
        }
    }

    /// 以已綁定的帳戶簽名送出。
    pub(crate) fn post_by_kid(&self, url: &str, payload: &[u8]) -> Result<HttpResponse> {
        let signer = self.bound_signer()?;
        self.signed_request(url, payload, signer)
    }

    /// POST-as-GET：以空 payload 取得資源。
    pub(crate) fn post_as_get(&self, url: &str) -> Result<HttpResponse> {
        self.post_by_kid(url, b"")
    }
}

/// 將回應本體解碼為資源，位置另外從 `Location` 標頭取出。
pub(crate) fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<Located<T>> {
    let value = serde_json::from_slice(&response.body).map_err(|e| {
        AcmeError::Protocol(format!("unexpected response body: {}", e))
    })?;
    Ok(Located {
        value,
        location: response.location().map(str::to_string),
    })
}

/// 解析錯誤回應；本體不是 problem document 時以狀態碼與原始文字補上。
fn problem_from(response: &HttpResponse) -> Problem {
    match serde_json::from_slice::<Problem>(&response.body) {
        Ok(mut problem) if !problem.type_.is_empty() => {
            problem.status.get_or_insert(response.status);
            problem
        }
        _ => {
            let text = response.text();
            Problem {
                type_: "about:blank".to_string(),
                detail: (!text.trim().is_empty()).then(|| text.trim().to_string()),
                status: Some(response.status),
                subproblems: Vec::new(),
            }
        }
    }
}

/// [`Session`] 的建構器。
#[derive(Debug)]
pub struct SessionBuilder {
    config: SessionConfig,
    base_url: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    resolver: Option<Arc<dyn TxtResolver>>,
    key: Option<KeyPair>,
    account_location: Option<String>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig {
                directory_url: LETS_ENCRYPT_PRODUCTION.to_string(),
                key_algorithm: DEFAULT_KEY_ALG,
                user_agent: DEFAULT_USER_AGENT.to_string(),
                timeout: DEFAULT_TIMEOUT,
                doh_url: DEFAULT_DOH_URL.to_string(),
            },
            base_url: None,
            transport: None,
            resolver: None,
            key: None,
            account_location: None,
        }
    }

    /// 以 `ACME_DIRECTORY_URL` 環境變數覆寫目錄 URL，未設定時使用正式環境。
    pub fn from_env() -> Self {
        match env::var(DIRECTORY_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::new().directory_url(url.trim()),
            _ => Self::new(),
        }
    }

    pub fn directory_url(mut self, url: &str) -> Self {
        self.config.directory_url = url.to_string();
        self
    }

    /// 使用 Let's Encrypt 測試環境。
    pub fn staging(self) -> Self {
        self.directory_url(LETS_ENCRYPT_STAGING)
    }

    /// 取得目錄後將所有端點改寫到此 origin。
    pub fn rebase(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.to_string());
        self
    }

    pub fn key_algorithm(mut self, alg: KeyAlgorithm) -> Self {
        self.config.key_algorithm = alg;
        self
    }

    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.config.user_agent = user_agent.to_string();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn doh_url(mut self, url: &str) -> Self {
        self.config.doh_url = url.to_string();
        self
    }

    /// 使用自訂的傳輸層，設定後 `user_agent` 與 `timeout` 不再生效。
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn txt_resolver(mut self, resolver: Arc<dyn TxtResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// 預先綁定帳戶金鑰。
    pub fn key(mut self, key: KeyPair) -> Self {
        self.key = Some(key);
        self
    }

    /// 預先綁定已知的帳戶位置，必須同時提供金鑰。
    pub fn account_location(mut self, location: &str) -> Self {
        self.account_location = Some(location.to_string());
        self
    }

    /// 取得目錄並建立會話。
    ///
    /// # 錯誤
    ///
    /// - 目錄無法取得或解析時返回 `AcmeError::Network` / `AcmeError::Protocol`
    /// - 提供帳戶位置卻未提供金鑰時返回 `AcmeError::State`
    pub fn build(self) -> Result<Session> {
        if self.account_location.is_some() && self.key.is_none() {
            return Err(AcmeError::State(
                "an account location needs the account key".to_string(),
            ));
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(
                &self.config.user_agent,
                self.config.timeout,
            )?),
        };
        let resolver: Arc<dyn TxtResolver> = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(DohResolver::new(transport.clone(), &self.config.doh_url)),
        };

        let (mut directory, response) =
            Directory::fetch(transport.as_ref(), &self.config.directory_url)?;
        if let Some(base) = &self.base_url {
            directory = directory.rebase(base)?;
        }
        let mut slot = NonceSlot::new();
        slot.observe(&response);

        tracing::info!(directory = %self.config.directory_url, "session established");
        Ok(Session {
            transport,
            resolver,
            directory,
            nonce: Mutex::new(slot),
            config: self.config,
            key: self.key.map(Arc::new),
            kid: self.account_location,
        })
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{testing::*, *};
    use crate::{error::ProblemKind, transport::{Method, MockTransport}};

    #[test]
    fn test_build_captures_directory_nonce() {
        let mock = Arc::new(MockTransport::new());
        let session = session(&mock);

        assert_eq!(session.current_nonce().as_deref(), Some("n0"));
        assert_eq!(session.directory().new_account, "https://ca.test/acct");
        assert!(session.key().is_none());
        assert_eq!(session.config().key_algorithm, KeyAlgorithm::EcP256);
    }

    #[test]
    fn test_location_without_key_is_rejected() {
        let mock = Arc::new(MockTransport::new());
        let err = SessionBuilder::new()
            .transport(mock.clone())
            .account_location(ACCOUNT_URL)
            .build()
            .unwrap_err();

        assert!(matches!(err, AcmeError::State(_)));
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn test_rebase_on_build() {
        let mock = Arc::new(MockTransport::new());
        let session = session_with(
            &mock,
            directory_json(),
            SessionBuilder::new().rebase("http://127.0.0.1:14000"),
        );
        assert_eq!(session.directory().new_order, "http://127.0.0.1:14000/order");
    }

    #[test]
    fn test_signed_request_uses_latest_nonce() {
        let mock = Arc::new(MockTransport::new());
        let session = bound_session(&mock);

        mock.push(ok(200, json!({}), "n1"));
        mock.push(ok(200, json!({}), "n2"));
        session.post_as_get("https://ca.test/authz/1").unwrap();
        session.post_as_get("https://ca.test/authz/2").unwrap();

        let requests = mock.requests();
        let (first, payload) = decode_request(&requests[0].body);
        let (second, _) = decode_request(&requests[1].body);
        assert_eq!(first["nonce"], "n0");
        assert_eq!(first["kid"], ACCOUNT_URL);
        assert_eq!(first["url"], "https://ca.test/authz/1");
        assert!(payload.is_none());
        assert_eq!(second["nonce"], "n1");
        assert_eq!(requests[0].content_type.as_deref(), Some(JOSE_CONTENT_TYPE));
        assert_eq!(session.current_nonce().as_deref(), Some("n2"));
    }

    #[test]
    fn test_error_response_still_updates_nonce() {
        let mock = Arc::new(MockTransport::new());
        let session = bound_session(&mock);

        mock.push(problem(403, "unauthorized", "n9"));
        let err = session.post_as_get("https://ca.test/order/1").unwrap_err();

        assert_eq!(err.problem().unwrap().kind(), ProblemKind::Unauthorized);
        assert_eq!(session.current_nonce().as_deref(), Some("n9"));
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn test_bad_nonce_retried_once() {
        let mock = Arc::new(MockTransport::new());
        let session = bound_session(&mock);

        mock.push(problem(400, "badNonce", "n1"));
        mock.push(ok(200, json!({}), "n2"));
        session.post_as_get("https://ca.test/order/1").unwrap();

        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(decode_request(&requests[1].body).0["nonce"], "n1");
    }

    #[test]
    fn test_second_bad_nonce_is_returned() {
        let mock = Arc::new(MockTransport::new());
        let session = bound_session(&mock);

        mock.push(problem(400, "badNonce", "n1"));
        mock.push(problem(400, "badNonce", "n2"));
        let err = session.post_as_get("https://ca.test/order/1").unwrap_err();

        assert!(err.problem().unwrap().is_bad_nonce());
        assert_eq!(mock.call_count(), 2);
    }

    #[test]
    fn test_empty_slot_fetches_nonce_with_head() {
        let mock = Arc::new(MockTransport::new());
        let session = bound_session(&mock);

        mock.push(HttpResponse::json(
            400,
            &json!({"type": "urn:ietf:params:acme:error:badNonce"}),
        ));
        mock.push(HttpResponse::new(200).with_header("Replay-Nonce", "fresh"));
        mock.push(ok(200, json!({}), "n3"));
        session.post_as_get("https://ca.test/order/1").unwrap();

        let requests = mock.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].method, Method::Head);
        assert_eq!(requests[1].url, "https://ca.test/nonce");
        assert_eq!(decode_request(&requests[2].body).0["nonce"], "fresh");
    }

    #[test]
    fn test_nonce_falls_back_to_directory() {
        let mock = Arc::new(MockTransport::new());
        let session = bound_session(&mock);
        session.lock_nonce().take();

        mock.push(HttpResponse::new(200));
        mock.push(ok(200, directory_json(), "from-dir"));
        session.ensure_nonce().unwrap();

        assert_eq!(mock.requests()[1].url, DIRECTORY_URL);
        assert_eq!(session.current_nonce().as_deref(), Some("from-dir"));
    }

    #[test]
    fn test_directory_without_new_nonce_refetches_directory() {
        let mock = Arc::new(MockTransport::new());
        let mut directory = directory_json();
        directory.as_object_mut().unwrap().remove("newNonce");
        let builder = SessionBuilder::new()
            .key(KeyPair::generate(KeyAlgorithm::EcP256).unwrap())
            .account_location(ACCOUNT_URL);
        let session = session_with(&mock, directory, builder);

        mock.push(HttpResponse::json(200, &json!({})));
        mock.push(ok(200, directory_json(), "from-dir"));
        mock.push(ok(200, json!({}), "n2"));
        session.post_as_get("https://ca.test/authz/1").unwrap();
        session.post_as_get("https://ca.test/authz/2").unwrap();

        let requests = mock.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.method != Method::Head));
        assert_eq!(requests[1].method, Method::Get);
        assert_eq!(requests[1].url, DIRECTORY_URL);
        assert_eq!(decode_request(&requests[2].body).0["nonce"], "from-dir");
    }

    #[test]
    fn test_concurrent_signed_requests_chain_nonces() {
        const THREADS: usize = 8;
        let mock = Arc::new(MockTransport::new());
        let session = Arc::new(bound_session(&mock));
        for i in 1..=THREADS {
            mock.push(ok(200, json!({}), &format!("n{}", i)));
        }

        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let session = Arc::clone(&session);
                std::thread::spawn(move || {
                    session
                        .post_as_get(&format!("https://ca.test/authz/{}", i))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // 第 i 個請求必須使用第 i-1 個回應帶回的 nonce
        let nonces: Vec<String> = mock
            .requests()
            .iter()
            .map(|r| decode_request(&r.body).0["nonce"].as_str().unwrap().to_string())
            .collect();
        let expected: Vec<String> = (0..THREADS).map(|i| format!("n{}", i)).collect();
        assert_eq!(nonces, expected);
        assert_eq!(session.current_nonce(), Some(format!("n{}", THREADS)));
    }

    #[test]
    fn test_missing_key_is_signing_error() {
        let mock = Arc::new(MockTransport::new());
        let session = session(&mock);

        let err = session.post_as_get("https://ca.test/order/1").unwrap_err();
        assert!(matches!(err, AcmeError::Signing(KeyError::NoKey)));
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn test_non_problem_error_body() {
        let mock = Arc::new(MockTransport::new());
        let session = bound_session(&mock);

        mock.push(HttpResponse::new(502).with_body("Bad Gateway"));
        let err = session.post_as_get("https://ca.test/order/1").unwrap_err();

        let problem = err.problem().unwrap();
        assert_eq!(problem.type_, "about:blank");
        assert_eq!(problem.status, Some(502));
        assert_eq!(problem.detail.as_deref(), Some("Bad Gateway"));
    }

    #[test]
    fn test_located_requires_location() {
        let response = HttpResponse::json(201, &json!({"status": "valid"}));
        let located: Located<serde_json::Value> = decode(&response).unwrap();
        assert!(matches!(located.clone().require_location(), Err(AcmeError::Protocol(_))));
        assert_eq!(located.location_or("https://ca.test/x").1, "https://ca.test/x");
    }

    #[test]
    fn test_session_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Session>();
    }
}
