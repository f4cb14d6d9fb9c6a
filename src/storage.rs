//! 會話恢復所需的持久化。
//!
//! 只保存重新建立會話所需的最少資訊：帳戶位置與私鑰，以及進行中訂單的位置。
//! 資源本身的狀態一律以 POST-as-GET 向伺服器重新取得。

use std::{
    collections::HashMap,
    fmt, fs, io,
    path::{Component, Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    key_pair::{KeyError, KeyPair},
    payload::Identifier,
};

/// 儲存操作可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Key is invalid: {0}")]
    InvalidKey(String),
    #[error("Key not found: {0}")]
    NotFound(String),
    #[error("Snapshot is corrupted: {0}")]
    Corrupted(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// 以字串 key 存取位元組內容的儲存後端。
pub trait Storage: Send + Sync + fmt::Debug {
    fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// 寫入內容，已存在時覆蓋。
    fn write(&self, key: &str, value: &[u8]) -> Result<()>;

    /// 刪除內容，key 不存在時返回 `NotFound`。
    fn remove(&self, key: &str) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool>;
}

/// 將 key 正規化為相對路徑，拒絕空字串、控制字元以及跳出根目錄的路徑。
fn normalize_key(key: &str) -> Result<PathBuf> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("Empty key".to_string()));
    }
    if key.contains(['\0', '\n', '\r']) {
        return Err(StorageError::InvalidKey(format!(
            "Invalid characters in key: {:?}",
            key
        )));
    }

    let mut path = PathBuf::new();
    for component in Path::new(key).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return Err(StorageError::InvalidKey(key.to_string())),
        }
    }
    if path.as_os_str().is_empty() {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(path)
}

/// 以目錄下的一般檔案保存內容。
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// 開啟（必要時建立）根目錄。
    ///
    /// # 錯誤
    ///
    /// 根目錄無法建立時返回 `StorageError::Io`。
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(normalize_key(key)?))
    }
}

impl Storage for FileStorage {
    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
            _ => StorageError::Io(e),
        })
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // 先寫暫存檔再改名，避免中途失敗留下半份快照
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        fs::remove_file(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
            _ => StorageError::Io(e),
        })
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key)?.is_file())
    }
}

/// 記憶體內的儲存後端，供測試與短期會話使用。
#[derive(Debug, Default, Clone)]
pub struct MemStorage {
    entries: Arc<RwLock<HashMap<PathBuf, Vec<u8>>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemStorage {
    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = normalize_key(key)?;
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = normalize_key(key)?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path, value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = normalize_key(key)?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&path)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let path = normalize_key(key)?;
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&path))
    }
}

/// 恢復帳戶所需的資訊。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub directory_url: String,
    /// 帳戶 URL，即簽名時使用的 kid
    pub location: String,
    /// PKCS#8 PEM 格式的帳戶私鑰
    pub key_pem: String,
    #[serde(default)]
    pub contacts: Vec<String>,
}

impl AccountSnapshot {
    /// 還原帳戶私鑰。
    pub fn key(&self) -> std::result::Result<KeyPair, KeyError> {
        KeyPair::from_pem(self.key_pem.as_bytes())
    }
}

/// 恢復進行中訂單所需的資訊。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSnapshot {
    pub location: String,
    pub identifiers: Vec<Identifier>,
}

/// 在 [`Storage`] 上以固定的 key 佈局保存快照。
///
/// - `<namespace>/account.json`
/// - `<namespace>/orders/<name>.json`
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    storage: Arc<dyn Storage>,
    namespace: String,
}

impl SnapshotStore {
    pub fn new(storage: Arc<dyn Storage>, namespace: impl Into<String>) -> Self {
        Self {
            storage,
            namespace: namespace.into(),
        }
    }

    fn account_key(&self) -> String {
        format!("{}/account.json", self.namespace)
    }

    fn order_key(&self, name: &str) -> String {
        format!("{}/orders/{}.json", self.namespace, name)
    }

    pub fn save_account(&self, snapshot: &AccountSnapshot) -> Result<()> {
        self.storage
            .write(&self.account_key(), &serde_json::to_vec_pretty(snapshot)?)
    }

    /// 讀取帳戶快照，尚未保存時返回 `None`。
    pub fn load_account(&self) -> Result<Option<AccountSnapshot>> {
        self.load(&self.account_key())
    }

    pub fn save_order(&self, name: &str, snapshot: &OrderSnapshot) -> Result<()> {
        self.storage
            .write(&self.order_key(name), &serde_json::to_vec_pretty(snapshot)?)
    }

    pub fn load_order(&self, name: &str) -> Result<Option<OrderSnapshot>> {
        self.load(&self.order_key(name))
    }

    /// 刪除訂單快照，不存在時視為成功。
    pub fn remove_order(&self, name: &str) -> Result<()> {
        match self.storage.remove(&self.order_key(name)) {
            Err(StorageError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    fn load<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<Option<T>> {
        match self.storage.read(key) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
