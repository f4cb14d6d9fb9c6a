//! 帳戶的註冊、查詢與管理。
//!
//! 帳戶位置（kid）只在註冊或查詢時由伺服器的 `Location` 標頭設定一次，
//! 之後所有請求都以它簽名。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    error::{AcmeError, Result},
    key_pair::{KeyError, KeyPair},
    payload::{
        AccountLookupPayload, AgreementPayload, DeactivatePayload, NewAccountPayload, PayloadT,
        UpdateAccountPayload,
    },
    session::{self, Session, Signer},
    storage::AccountSnapshot,
};

/// 帳戶狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Valid,
    Deactivated,
    Revoked,
}

/// 伺服器回傳的帳戶物件。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResource {
    status: AccountStatus,
    #[serde(default)]
    contact: Vec<String>,
    #[serde(default)]
    terms_of_service_agreed: Option<bool>,
    #[serde(default)]
    orders: Option<String>,
}

/// 已綁定金鑰與位置的帳戶快照。
#[derive(Debug, Clone)]
pub struct Account {
    key: Arc<KeyPair>,
    /// 帳戶 URL，即簽名時的 kid
    pub location: String,
    pub status: AccountStatus,
    pub contacts: Vec<String>,
    pub terms_of_service_agreed: bool,
    /// 帳戶訂單清單的 URL
    pub orders: Option<String>,
}

impl Account {
    fn from_resource(key: Arc<KeyPair>, location: String, resource: AccountResource) -> Self {
        Self {
            key,
            location,
            status: resource.status,
            contacts: resource.contact,
            terms_of_service_agreed: resource.terms_of_service_agreed.unwrap_or(false),
            orders: resource.orders,
        }
    }

    pub fn key(&self) -> &Arc<KeyPair> {
        &self.key
    }

    /// 產生可保存的快照。
    ///
    /// # 錯誤
    ///
    /// 私鑰無法匯出為 PEM 時返回 `KeyError`。
    pub fn snapshot(&self, directory_url: &str) -> std::result::Result<AccountSnapshot, KeyError> {
        let pem = self.key.to_pem()?;
        Ok(AccountSnapshot {
            directory_url: directory_url.to_string(),
            location: self.location.clone(),
            key_pem: String::from_utf8_lossy(&pem).into_owned(),
            contacts: self.contacts.clone(),
        })
    }
}

impl Session {
    /// 註冊新帳戶並綁定到會話。
    ///
    /// 未提供金鑰時以設定的演算法產生新金鑰。
    ///
    /// # 參數
    ///
    /// - `contacts`: 聯絡方式，未帶 scheme 的值視為電子郵件
    /// - `key`: 帳戶金鑰
    ///
    /// # 錯誤
    ///
    /// - 目錄要求外部帳戶綁定時返回 `AcmeError::State`，不會發出請求
    /// - 回應缺少 `Location` 時返回 `AcmeError::Protocol`
    pub fn register<S: AsRef<str>>(
        &mut self,
        contacts: &[S],
        key: Option<KeyPair>,
    ) -> Result<Account> {
        if self.directory().external_account_required() {
            return Err(AcmeError::State(
                "server requires external account binding".to_string(),
            ));
        }

        let payload = NewAccountPayload::new(contacts).to_bytes()?;
        let key = match key {
            Some(key) => key,
            None => KeyPair::generate(self.config().key_algorithm)?,
        };
        let key = Arc::new(key);
        let url = self.directory().new_account.clone();

        let response = self.signed_request(&url, &payload, Signer::Key(key.as_ref()))?;
        let (resource, location) =
            session::decode::<AccountResource>(&response)?.require_location()?;

        tracing::info!(account = %location, status = response.status, "account registered");
        self.bind(key.clone(), location.clone());
        Ok(Account::from_resource(key, location, resource))
    }

    /// 以既有金鑰找回帳戶並綁定到會話。
    ///
    /// 已知帳戶位置時直接綁定，不發出請求，此時帳戶的聯絡方式等欄位為空，
    /// 需要時再以 [`get_account`](Self::get_account) 取得。
    pub fn resolve(&mut self, key: KeyPair, known_location: Option<&str>) -> Result<Account> {
        let key = Arc::new(key);

        if let Some(location) = known_location {
            self.bind(key.clone(), location.to_string());
            return Ok(Account {
                key,
                location: location.to_string(),
                status: AccountStatus::Valid,
                contacts: Vec::new(),
                terms_of_service_agreed: false,
                orders: None,
            });
        }

        let payload = AccountLookupPayload::default().to_bytes()?;
        let url = self.directory().new_account.clone();
        let response = self.signed_request(&url, &payload, Signer::Key(key.as_ref()))?;
        let (resource, location) =
            session::decode::<AccountResource>(&response)?.require_location()?;

        self.bind(key.clone(), location.clone());
        Ok(Account::from_resource(key, location, resource))
    }

    /// 從快照恢復帳戶，不發出請求。
    pub fn resume_account(&mut self, snapshot: &AccountSnapshot) -> Result<Account> {
        let mut account = self.resolve(snapshot.key()?, Some(&snapshot.location))?;
        account.contacts = snapshot.contacts.clone();
        Ok(account)
    }

    /// 同意服務條款，未指定條款 URL 時使用目錄公告的條款。
    pub fn accept_agreement(&self, agreement: Option<&str>) -> Result<Account> {
        let agreement = agreement.or_else(|| self.directory().terms_of_service());
        tracing::info!(agreement = agreement.unwrap_or("<none>"), "accepting terms of service");

        self.update_account(&AgreementPayload::default().to_bytes()?)
    }

    /// 以 POST-as-GET 取得帳戶目前狀態。
    pub fn get_account(&self) -> Result<Account> {
        self.update_account(b"")
    }

    /// 取代帳戶的聯絡方式。
    pub fn update_contacts<S: AsRef<str>>(&self, contacts: &[S]) -> Result<Account> {
        self.update_account(&UpdateAccountPayload::new(contacts).to_bytes()?)
    }

    /// 停用帳戶，之後伺服器將拒絕此帳戶的所有請求。
    pub fn deactivate_account(&self) -> Result<Account> {
        let account = self.update_account(&DeactivatePayload::default().to_bytes()?)?;
        tracing::info!(account = %account.location, "account deactivated");
        Ok(account)
    }

    /// 對帳戶 URL 送出以 kid 簽名的請求。
    fn update_account(&self, payload: &[u8]) -> Result<Account> {
        let key = self.key().cloned().ok_or(KeyError::NoKey)?;
        let location = self
            .account_location()
            .ok_or(KeyError::NoKid)?
            .to_string();

        let response = self.post_by_kid(&location, payload)?;
        let resource = session::decode::<AccountResource>(&response)?.value;
        Ok(Account::from_resource(key, location, resource))
    }
}
