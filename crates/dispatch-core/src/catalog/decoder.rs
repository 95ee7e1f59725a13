//! DecoderCatalog - request 型 → bytes デコーダ
//!
//! # デコードフロー
//! 1. type key から Decoder を引く（なければ `DecoderMissing`）
//! 2. Decoder を実行（エラーなら `DecoderFailure` でラップ）
//! 3. 結果の型が type key と一致するか確認（不一致も `DecoderFailure`）

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::command::{CommandReq, DynReq, TypeKey};
use crate::config::DuplicatePolicy;
use crate::error::{BoxError, CommandError, Result};

type DecodeFn = dyn Fn(&[u8]) -> std::result::Result<DynReq, BoxError> + Send + Sync;

/// Decoder は bytes を型消去された request に変換する関数
#[derive(Clone)]
pub struct Decoder {
    decode: Arc<DecodeFn>,
}

impl Decoder {
    pub fn new<F>(decode: F) -> Self
    where
        F: Fn(&[u8]) -> std::result::Result<DynReq, BoxError> + Send + Sync + 'static,
    {
        Self {
            decode: Arc::new(decode),
        }
    }

    /// 具体型を返すクロージャから Decoder を作る
    pub fn typed<Req, F, E>(decode: F) -> Self
    where
        Req: CommandReq,
        F: Fn(&[u8]) -> std::result::Result<Req, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::new(move |bytes| decode(bytes).map(DynReq::new).map_err(Into::into))
    }

    /// デフォルトの JSON デコーダ
    ///
    /// 空（または空白のみ）の payload はエラーにせず `Req::default()` を返します。
    /// 欠けたフィールドをゼロ値で埋めるには、request 型に `#[serde(default)]` を付けてください。
    ///
    /// ```ignore
    /// #[derive(Default, Deserialize)]
    /// #[serde(rename_all = "camelCase", default)]
    /// struct AddCommandReq { arg_x: i64, arg_y: i64 }
    /// ```
    pub fn json<Req>() -> Self
    where
        Req: CommandReq + DeserializeOwned + Default,
    {
        Self::typed::<Req, _, serde_json::Error>(|bytes| {
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(Req::default());
            }
            serde_json::from_slice::<Req>(bytes)
        })
    }

    pub fn decode(&self, bytes: &[u8]) -> std::result::Result<DynReq, BoxError> {
        (self.decode)(bytes)
    }
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Decoder(..)")
    }
}

/// DecoderCatalog は request 型ごとの Decoder を管理
#[derive(Default)]
pub struct DecoderCatalog {
    policy: DuplicatePolicy,
    decoders: RwLock<HashMap<TypeKey, Decoder>>,
}

impl DecoderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            decoders: RwLock::default(),
        }
    }

    pub fn insert(&self, req_type: TypeKey, decoder: Decoder) -> Result<()> {
        let mut decoders = self.decoders.write();
        if decoders.contains_key(&req_type) {
            if self.policy == DuplicatePolicy::Reject {
                return Err(CommandError::Duplicate {
                    catalog: "decoder",
                    key: req_type.to_string(),
                });
            }
            warn!(%req_type, "overwriting decoder");
        }
        decoders.insert(req_type, decoder);
        debug!(%req_type, "decoder inserted");
        Ok(())
    }

    pub fn insert_for<Req: CommandReq>(&self, decoder: Decoder) -> Result<()> {
        self.insert(TypeKey::of::<Req>(), decoder)
    }

    /// 登録を取り除く。取り除いたら true
    pub fn remove(&self, req_type: TypeKey) -> bool {
        let removed = self.decoders.write().remove(&req_type).is_some();
        if removed {
            debug!(%req_type, "decoder removed");
        }
        removed
    }

    pub fn decode(&self, req_type: TypeKey, bytes: &[u8]) -> Result<DynReq> {
        // デコード中はロックを保持しない
        let decoder = self
            .decoders
            .read()
            .get(&req_type)
            .cloned()
            .ok_or(CommandError::DecoderMissing(req_type))?;

        let req = decoder
            .decode(bytes)
            .map_err(|source| CommandError::DecoderFailure {
                req_type,
                reason: source.to_string(),
                source: Some(Arc::from(source)),
            })?;

        if req.type_key() != req_type {
            return Err(CommandError::decoder_failure(
                req_type,
                format!("decoder produced {}", req.type_key()),
            ));
        }
        Ok(req)
    }

    pub fn contains(&self, req_type: TypeKey) -> bool {
        self.decoders.read().contains_key(&req_type)
    }

    pub fn len(&self) -> usize {
        self.decoders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rstest::rstest;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    struct AddReq {
        arg_x: i64,
        arg_y: i64,
    }

    impl CommandReq for AddReq {
        type Res = i64;
    }

    fn catalog() -> DecoderCatalog {
        let catalog = DecoderCatalog::new();
        catalog.insert_for::<AddReq>(Decoder::json::<AddReq>()).unwrap();
        catalog
    }

    #[rstest]
    #[case(br#"{"argX":3,"argY":4}"#.as_slice(), AddReq { arg_x: 3, arg_y: 4 })]
    #[case(br#"{"argX":3}"#.as_slice(), AddReq { arg_x: 3, arg_y: 0 })]
    #[case(b"".as_slice(), AddReq::default())]
    #[case(b"  \n".as_slice(), AddReq::default())]
    fn test_decode_json(#[case] bytes: &[u8], #[case] expected: AddReq) {
        let req = catalog().decode(TypeKey::of::<AddReq>(), bytes).unwrap();
        assert_eq!(req.downcast::<AddReq>().unwrap(), expected);
    }

    #[test]
    fn test_decode_missing() {
        let err = DecoderCatalog::new()
            .decode(TypeKey::of::<AddReq>(), b"{}")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecoderMissing);
    }

    #[test]
    fn test_decode_failure_wraps_parse_error() {
        let err = catalog()
            .decode(TypeKey::of::<AddReq>(), br#"{"argX":"three"}"#)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecoderFailure);

        let cause = err.cause().unwrap();
        assert!(cause.downcast_ref::<serde_json::Error>().is_some());
    }

    #[test]
    fn test_decoder_producing_wrong_type() {
        let catalog = DecoderCatalog::new();
        catalog
            .insert_for::<AddReq>(Decoder::new(|_| Ok(DynReq::new(42_u8))))
            .unwrap();

        let err = catalog.decode(TypeKey::of::<AddReq>(), b"{}").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecoderFailure);
        assert!(err.to_string().contains("u8"));
    }

    #[test]
    fn test_remove() {
        let catalog = catalog();
        assert!(catalog.remove(TypeKey::of::<AddReq>()));
        assert!(!catalog.remove(TypeKey::of::<AddReq>()));
        assert!(!catalog.contains(TypeKey::of::<AddReq>()));

        let err = catalog.decode(TypeKey::of::<AddReq>(), b"{}").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecoderMissing);
    }

    #[test]
    fn test_duplicate_decoders() {
        let catalog = catalog();
        catalog
            .insert_for::<AddReq>(Decoder::typed::<AddReq, _, BoxError>(|_| {
                Ok(AddReq { arg_x: 1, arg_y: 1 })
            }))
            .unwrap();
        let req = catalog.decode(TypeKey::of::<AddReq>(), b"ignored").unwrap();
        assert_eq!(req.downcast::<AddReq>().unwrap(), AddReq { arg_x: 1, arg_y: 1 });

        let strict = DecoderCatalog::with_policy(DuplicatePolicy::Reject);
        strict.insert_for::<AddReq>(Decoder::json::<AddReq>()).unwrap();
        let err = strict
            .insert_for::<AddReq>(Decoder::json::<AddReq>())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Duplicate);
        assert_eq!(strict.len(), 1);
    }
}
