//! MappingCatalog - 外部名 ↔ request 型の双方向マッピング
//!
//! カタログは「名前の部分集合」と「型の部分集合」の間の全単射を保ちます。
//! 上書き時は古い逆方向エントリも取り除きます。

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::command::{CommandReq, TypeKey};
use crate::config::DuplicatePolicy;
use crate::error::{CommandError, Result};

#[derive(Default)]
struct Mappings {
    by_name: HashMap<String, TypeKey>,
    by_type: HashMap<TypeKey, String>,
}

/// MappingCatalog は request 名と request 型の対応を管理
///
/// # 使用例
/// ```ignore
/// let catalog = MappingCatalog::new();
/// catalog.insert_for::<AddCommandReq>("add")?;
///
/// let req_type = catalog.by_name("add")?;
/// assert_eq!(catalog.by_type(req_type)?, "add");
/// ```
#[derive(Default)]
pub struct MappingCatalog {
    policy: DuplicatePolicy,
    inner: RwLock<Mappings>,
}

impl MappingCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            inner: RwLock::default(),
        }
    }

    /// 名前と型の対応を両方向に登録
    ///
    /// 名前が別の型に付いていた場合は、付け替えで外れた型を返します。
    pub fn insert(&self, name: &str, req_type: TypeKey) -> Result<Option<TypeKey>> {
        let mut inner = self.inner.write();

        let old_type = inner.by_name.get(name).copied();
        let old_name = inner.by_type.get(&req_type).cloned();
        if old_type == Some(req_type) {
            return Ok(None);
        }

        if old_type.is_some() || old_name.is_some() {
            if self.policy == DuplicatePolicy::Reject {
                let key = match old_type {
                    Some(_) => name.to_string(),
                    None => req_type.to_string(),
                };
                return Err(CommandError::Duplicate {
                    catalog: "mapping",
                    key,
                });
            }
            warn!(
                command = name,
                %req_type,
                replaced_type = ?old_type,
                replaced_name = ?old_name,
                "overwriting command mapping"
            );
        }

        if let Some(old_type) = old_type {
            inner.by_type.remove(&old_type);
        }
        if let Some(old_name) = old_name {
            inner.by_name.remove(&old_name);
        }
        inner.by_name.insert(name.to_string(), req_type);
        inner.by_type.insert(req_type, name.to_string());
        debug!(command = name, %req_type, "mapping inserted");
        Ok(old_type)
    }

    pub fn insert_for<Req: CommandReq>(&self, name: &str) -> Result<Option<TypeKey>> {
        self.insert(name, TypeKey::of::<Req>())
    }

    pub fn by_name(&self, name: &str) -> Result<TypeKey> {
        self.inner
            .read()
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| CommandError::MappingMissingForName(name.to_string()))
    }

    pub fn by_type(&self, req_type: TypeKey) -> Result<String> {
        self.inner
            .read()
            .by_type
            .get(&req_type)
            .cloned()
            .ok_or(CommandError::MappingMissingForType(req_type))
    }

    /// 登録済みの (name, type) を名前順で返す
    pub fn entries(&self) -> Vec<(String, TypeKey)> {
        let mut entries: Vec<(String, TypeKey)> = self
            .inner
            .read()
            .by_name
            .iter()
            .map(|(name, key)| (name.clone(), *key))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_name.is_empty()
    }
}
