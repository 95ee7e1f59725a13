//! Config - カタログの設定
//!
//! 重複登録の扱い（上書き / 拒否）を選択します。

use serde::{Deserialize, Serialize};

/// 同じキーへの 2 回目の登録をどう扱うか
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// 後勝ち（前のエントリを置き換えて warn ログを出す）
    #[default]
    Overwrite,
    /// `CommandError::Duplicate` を返し、カタログは変更しない
    Reject,
}

/// CatalogConfig は Manager が作るカタログ共通の設定
///
/// # 使用例
/// ```ignore
/// let config = CatalogConfig::from_json(br#"{ "duplicates": "reject" }"#)?;
/// let manager = Manager::with_config(&config);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub duplicates: DuplicatePolicy,
}

impl CatalogConfig {
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn with_duplicates(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }
}
