//! Command model - request / result の型と型消去された値
//!
//! # 二層構造
//! - **表層（Typed）**: `CommandReq` / `CommandRes` trait - 型安全
//! - **内部（Dyn）**: `DynReq` / `DynRes` - type erasure, カタログ内で使用
//!
//! 実行時の型識別子には `TypeKey`（`TypeId` + 型名）を使います。

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;

/// CommandRes はコマンドの結果型
///
/// `Serialize` はトランスポート層が結果を bytes に戻すため、
/// `Clone` は解決済みの Future が全ての待機者に同じ値を返すために必要です。
pub trait CommandRes: Serialize + Clone + Send + Sync + 'static {}

impl<T> CommandRes for T where T: Serialize + Clone + Send + Sync + 'static {}

/// CommandReq はコマンドの要求型
///
/// 関連型 `Res` により、要求型と結果型の対応がコンパイル時に 1:1 で決まります。
///
/// # 使用例
/// ```ignore
/// #[derive(Default, Deserialize)]
/// struct AddCommandReq { arg_x: i64, arg_y: i64 }
///
/// #[derive(Clone, Serialize)]
/// struct AddCommandRes { result: i64 }
///
/// impl CommandReq for AddCommandReq {
///     type Res = AddCommandRes;
/// }
/// ```
pub trait CommandReq: Send + 'static {
    type Res: CommandRes;
}

/// 実行時の型識別子
///
/// 等価性とハッシュは `TypeId` のみで決まり、型名は診断用です。
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// 型消去された request
///
/// 生成時に具体型の `TypeKey` を記録します。
pub struct DynReq {
    key: TypeKey,
    value: Box<dyn Any + Send>,
}

impl DynReq {
    pub fn new<T: Send + 'static>(value: T) -> Self {
        Self {
            key: TypeKey::of::<T>(),
            value: Box::new(value),
        }
    }

    pub fn type_key(&self) -> TypeKey {
        self.key
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.value.is::<T>()
    }

    /// 具体型に戻す。型が違えば DynReq をそのまま返す
    pub fn downcast<T: 'static>(self) -> Result<T, Self> {
        let key = self.key;
        match self.value.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(value) => Err(Self { key, value }),
        }
    }
}

impl fmt::Debug for DynReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynReq").field("type", &self.key).finish()
    }
}

trait ErasedRes: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn to_json(&self) -> serde_json::Result<serde_json::Value>;
}

impl<T: CommandRes> ErasedRes for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// 型消去された result
///
/// 内部は Arc なので clone は安価です。
#[derive(Clone)]
pub struct DynRes {
    key: TypeKey,
    value: Arc<dyn ErasedRes>,
}

impl DynRes {
    pub fn new<T: CommandRes>(value: T) -> Self {
        Self {
            key: TypeKey::of::<T>(),
            value: Arc::new(value),
        }
    }

    pub fn type_key(&self) -> TypeKey {
        self.key
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.as_any().downcast_ref::<T>()
    }

    /// 具体型の値を取り出す（clone）。型が違えば DynRes をそのまま返す
    pub fn downcast<T: CommandRes>(self) -> Result<T, Self> {
        if let Some(value) = self.downcast_ref::<T>() {
            return Ok(value.clone());
        }
        Err(self)
    }

    /// トランスポート向けに JSON へ変換
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        self.value.to_json()
    }
}

impl fmt::Debug for DynRes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynRes").field("type", &self.key).finish()
    }
}
