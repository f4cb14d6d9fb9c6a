use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    challenge::{Challenge, ChallengeType},
    error::Result,
    payload::{DeactivatePayload, Identifier, PayloadT},
    session::{self, Session},
};

/// 授權狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

/// 伺服器回傳的授權物件，本體中沒有授權 URL。
#[derive(Debug, Deserialize)]
struct AuthorizationResource {
    identifier: Identifier,
    status: AuthorizationStatus,
    #[serde(default)]
    expires: Option<DateTime<Utc>>,
    #[serde(default)]
    wildcard: bool,
    #[serde(default)]
    challenges: Vec<Challenge>,
}

/// 單一識別項的授權快照。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Authorization {
    /// 授權 URL
    pub location: String,
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    /// 伺服器對萬用字元訂單回傳的授權中，`identifier` 不含 `*.` 前綴
    pub wildcard: bool,
    pub challenges: Vec<Challenge>,
}

impl Authorization {
    fn from_resource(location: String, resource: AuthorizationResource) -> Self {
        Self {
            location,
            identifier: resource.identifier,
            status: resource.status,
            expires: resource.expires,
            wildcard: resource.wildcard,
            challenges: resource.challenges,
        }
    }

    /// 指定類型的第一個挑戰。
    pub fn challenge(&self, type_: &ChallengeType) -> Option<&Challenge> {
        self.challenges.iter().find(|c| c.type_ == *type_)
    }

    pub fn is_valid(&self) -> bool {
        self.status == AuthorizationStatus::Valid
    }
}

impl Session {
    /// 以 POST-as-GET 取得授權。
    pub fn get_authorization(&self, url: &str) -> Result<Authorization> {
        let response = self.post_as_get(url)?;
        let resource = session::decode::<AuthorizationResource>(&response)?.value;
        Ok(Authorization::from_resource(url.to_string(), resource))
    }

    /// 停用尚未使用的授權。
    pub fn deactivate_authorization(&self, url: &str) -> Result<Authorization> {
        let payload = DeactivatePayload::default().to_bytes()?;
        tracing::info!(url, "deactivating authorization");

        let response = self.post_by_kid(url, &payload)?;
        let resource = session::decode::<AuthorizationResource>(&response)?.value;
        Ok(Authorization::from_resource(url.to_string(), resource))
    }
}
