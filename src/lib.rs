//! # ACME Protocol Engine
//!
//! 本庫實作以目錄驅動、JWS 簽名的憑證簽發協議（ACME，RFC 8555）的用戶端引擎：
//!
//! - **session**: 目錄、單一槽位的 nonce、帳戶金鑰與 kid 綁定，以及所有簽名請求共用的管線
//! - **account**: 帳戶註冊、查詢、同意條款、更新與停用
//! - **order**: 訂單建立、查詢、以 CSR 完成訂單、下載與撤銷憑證
//! - **challenge**: http-01 / dns-01 內容計算、預先驗證與通知伺服器
//!
//! 引擎不會等待或輪詢，每個操作只回傳伺服器當下的快照。HTTP 實作透過
//! [`Transport`] 抽象，預設使用阻塞式 reqwest。
//!
//! ## 示例
//!
//! ```no_run
//! use acme_engine::{
//!     challenge::ChallengeType, csr::Csr, key_pair::{KeyAlgorithm, KeyPair},
//!     payload::Identifier, Session,
//! };
//!
//! fn main() -> Result<(), acme_engine::AcmeError> {
//!     // 1. 連線到測試環境並註冊帳戶
//!     let mut session = Session::builder().staging().build()?;
//!     session.register(&["admin@example.com"], None)?;
//!
//!     // 2. 建立訂單並處理 http-01 挑戰
//!     let order = session.new_order(vec![Identifier::dns("example.com")])?;
//!     for authz in session.authorizations(&order)? {
//!         if let Some(challenge) = authz.challenge(&ChallengeType::Http01) {
//!             // 佈署 challenge.artifact(...) 的內容後
//!             if session.prevalidate(&authz, challenge) {
//!                 session.complete_challenge(challenge)?;
//!             }
//!         }
//!     }
//!
//!     // 3. 訂單 ready 後提交 CSR，valid 後下載憑證
//!     let order = session.get_order(&order.location)?;
//!     let cert_key = KeyPair::generate(KeyAlgorithm::EcP256)?;
//!     let order = session.finalize_order(&order, &Csr::for_order(&order)?.build_der(&cert_key)?)?;
//!     let order = session.get_order(&order.location)?;
//!     let chain = session.download_certificate(&order)?;
//!     println!("{}", chain.as_pem().unwrap_or_default());
//!
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod authorization;
pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod csr;
pub mod directory;
pub mod dns;
pub mod error;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod order;
pub mod payload;
pub mod protection;
pub mod session;
pub mod storage;
pub mod transport;

pub use error::{AcmeError, Problem, ProblemKind, Result};
pub use session::{Located, Session, SessionBuilder};
pub use transport::{HttpRequest, HttpResponse, Transport};
