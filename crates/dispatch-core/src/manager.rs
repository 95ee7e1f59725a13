//! Manager - 名前 → 型 → request → result のパイプライン
//!
//! # パイプライン（`handle_raw`）
//! 1. MappingCatalog で名前から request 型を引く
//! 2. DecoderCatalog で bytes を request に変換
//! 3. HandlerCatalog で Handler を実行
//!
//! 各段階のエラーは `CommandError::Stage` で包まれ、どこで失敗したかが分かります。

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{Instrument, debug, debug_span};

use crate::catalog::{Decoder, DecoderCatalog, Handler, HandlerCatalog, MappingCatalog};
use crate::command::{CommandReq, DynReq, DynRes, TypeKey};
use crate::config::CatalogConfig;
use crate::context::Context;
use crate::envelope::Envelope;
use crate::error::{CommandError, Result, Stage};
use crate::futures::{self, Future};

/// 登録済みコマンド 1 件分の情報（スキーマ生成用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub req_type: TypeKey,
    pub res_type: TypeKey,
}

/// Manager は 3 つのカタログを束ねる
///
/// カタログは Arc で共有されるので、Manager の clone は安価です。
/// テストごとに別の Manager を作れば互いに干渉しません。
///
/// # 使用例
/// ```ignore
/// let manager = Manager::default();
/// manager.insert_json::<AddCommandReq, _, _>("add", || AddHandler)?;
///
/// let res = manager
///     .handle_raw(&Context::background(), "add", br#"{"argX":3,"argY":4}"#)
///     .await?;
/// assert_eq!(res.to_json()?, json!({ "result": 7 }));
/// ```
#[derive(Clone, Default)]
pub struct Manager {
    mappings: Arc<MappingCatalog>,
    decoders: Arc<DecoderCatalog>,
    handlers: Arc<HandlerCatalog>,
}

impl Manager {
    pub fn new(
        mappings: Arc<MappingCatalog>,
        decoders: Arc<DecoderCatalog>,
        handlers: Arc<HandlerCatalog>,
    ) -> Self {
        Self {
            mappings,
            decoders,
            handlers,
        }
    }

    /// 設定に従った空のカタログで Manager を作る
    pub fn with_config(config: &CatalogConfig) -> Self {
        Self::new(
            Arc::new(MappingCatalog::with_policy(config.duplicates)),
            Arc::new(DecoderCatalog::with_policy(config.duplicates)),
            Arc::new(HandlerCatalog::with_policy(config.duplicates)),
        )
    }

    pub fn mappings(&self) -> &Arc<MappingCatalog> {
        &self.mappings
    }

    pub fn decoders(&self) -> &Arc<DecoderCatalog> {
        &self.decoders
    }

    pub fn handlers(&self) -> &Arc<HandlerCatalog> {
        &self.handlers
    }

    /// 1 つの request 型を 3 つのカタログにまとめて登録
    ///
    /// 名前を別の型へ付け替えた場合、外れた型の Decoder と Handler も取り除きます。
    /// 途中で失敗しても、それまでの登録は巻き戻しません。
    pub fn insert<Req, H, F>(&self, name: &str, decoder: Decoder, factory: F) -> Result<()>
    where
        Req: CommandReq,
        H: Handler<Req>,
        F: Fn() -> H + Send + Sync + 'static,
    {
        if let Some(displaced) = self.mappings.insert_for::<Req>(name)? {
            // 名前を失った型は routes() で解決できなくなる
            self.decoders.remove(displaced);
            self.handlers.remove(displaced);
        }
        self.decoders.insert_for::<Req>(decoder)?;
        self.handlers.insert_handler::<Req, H, F>(factory)
    }

    /// デフォルトの JSON デコーダで登録
    pub fn insert_json<Req, H, F>(&self, name: &str, factory: F) -> Result<()>
    where
        Req: CommandReq + DeserializeOwned + Default,
        H: Handler<Req>,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.insert::<Req, H, F>(name, Decoder::json::<Req>(), factory)
    }

    /// 名前と bytes から request を組み立てて処理する（トランスポート層の入口）
    pub async fn handle_raw(&self, ctx: &Context, name: &str, payload: &[u8]) -> Result<DynRes> {
        let span = debug_span!("handle_raw", command = name, ctx = %ctx.id());
        async {
            let req_type = self
                .mappings
                .by_name(name)
                .map_err(|err| failed(err, Stage::Mapping))?;
            let req = self
                .decoders
                .decode(req_type, payload)
                .map_err(|err| failed(err, Stage::Decoding))?;
            self.handlers
                .handle_dyn(ctx, req)
                .await
                .map_err(|err| failed(err, Stage::Handling))
        }
        .instrument(span)
        .await
    }

    /// Envelope 形式の bytes を処理する
    pub async fn handle_envelope(&self, ctx: &Context, bytes: &[u8]) -> Result<DynRes> {
        let envelope = Envelope::from_json(bytes).map_err(|err| failed(err, Stage::Resolving))?;
        self.handle_raw(ctx, &envelope.name, &envelope.payload()).await
    }

    /// 型付きの request を直接処理する（名前解決とデコードを省略）
    pub async fn handle_req<Req: CommandReq>(&self, ctx: &Context, req: Req) -> Result<Req::Res> {
        let span = debug_span!("handle_req", req_type = %TypeKey::of::<Req>(), ctx = %ctx.id());
        self.handlers
            .handle(ctx, req)
            .instrument(span)
            .await
            .map_err(|err| failed(err, Stage::Handling))
    }

    /// 型消去された request を直接処理する
    pub async fn handle_dyn(&self, ctx: &Context, req: DynReq) -> Result<DynRes> {
        let span = debug_span!("handle_dyn", req_type = %req.type_key(), ctx = %ctx.id());
        self.handlers
            .handle_dyn(ctx, req)
            .instrument(span)
            .await
            .map_err(|err| failed(err, Stage::Handling))
    }

    /// `handle_raw` を Future として実行
    pub fn future_raw(
        &self,
        ctx: Context,
        name: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Future<Result<DynRes>> {
        let manager = self.clone();
        let name = name.into();
        let payload = payload.into();
        futures::start(ctx, move |ctx| async move {
            manager.handle_raw(&ctx, &name, &payload).await
        })
    }

    /// `handle_req` を Future として実行
    pub fn future_req<Req: CommandReq>(&self, ctx: Context, req: Req) -> Future<Result<Req::Res>> {
        let manager = self.clone();
        futures::start(ctx, move |ctx| async move { manager.handle_req(&ctx, req).await })
    }

    /// 登録済みコマンドの一覧（名前順）
    ///
    /// 名前のない Handler があれば `MappingMissing` で失敗します。
    pub fn routes(&self) -> Result<Vec<Route>> {
        let mut routes = self
            .handlers
            .type_map()
            .into_iter()
            .map(|(req_type, res_type)| {
                Ok(Route {
                    name: self.mappings.by_type(req_type)?,
                    req_type,
                    res_type,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        routes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(routes)
    }
}

fn failed(err: CommandError, stage: Stage) -> CommandError {
    debug!(%stage, error = %err, "dispatch failed");
    err.at(stage)
}
