use crate::transport::HttpResponse;

/// 回應中攜帶新 nonce 的標頭名稱。
pub const REPLAY_NONCE_HEADER: &str = "Replay-Nonce";

/// 單一槽位的 anti-replay nonce。
///
/// 槽位內最多只有一個值：簽名前以 [`take`](Self::take) 取出（取出後槽位為空，
/// 同一個值不可能被使用兩次），收到任何回應後以 [`observe`](Self::observe)
/// 覆寫為伺服器最新公告的值。
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NonceSlot {
    current: Option<String>,
}

impl NonceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 槽位是否已有可用的 nonce。
    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    /// 目前快取的 nonce。
    pub fn peek(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// 取出目前的 nonce 交給簽名者，槽位隨即清空。
    pub fn take(&mut self) -> Option<String> {
        self.current.take()
    }

    /// 以回應的 `Replay-Nonce` 標頭覆寫槽位。
    ///
    /// 不論回應成功或失敗都必須呼叫；回應未攜帶標頭時保持原狀並返回 `false`。
    pub fn observe(&mut self, response: &HttpResponse) -> bool {
        match response.replay_nonce() {
            Some(value) if !value.is_empty() => {
                self.current = Some(value.to_string());
                true
            }
            _ => false,
        }
    }
}
