//! HandlerCatalog - request 型 → HandlerAdapter
//!
//! # 学習ポイント
//! - ジェネリック trait (`Handler<Req>`)
//! - Object-safe trait (`HandlerAdapter`)
//! - Type erasure パターン (`DefaultHandlerAdapter<Req, H>` → `dyn HandlerAdapter`)
//! - 遅延生成 + double-checked locking（Handler は初回呼び出し時に 1 度だけ作る）

use std::collections::HashMap;
use std::fmt;
use std::future::Future as StdFuture;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::command::{CommandReq, DynReq, DynRes, TypeKey};
use crate::config::DuplicatePolicy;
use crate::context::Context;
use crate::error::{BoxError, CommandError, Result};
use crate::futures::{self, Future};

/// Handler は request を処理して result を返す
///
/// # 使用例
/// ```ignore
/// struct AddHandler;
///
/// #[async_trait]
/// impl Handler<AddCommandReq> for AddHandler {
///     async fn handle(&self, _ctx: &Context, req: AddCommandReq) -> Result<AddCommandRes, BoxError> {
///         Ok(AddCommandRes { result: req.arg_x + req.arg_y })
///     }
/// }
/// ```
///
/// # ジェネリクスによる型安全性
/// - `Handler<AddCommandReq>` は `AddCommandReq` しか受け取れない
/// - 戻り値の型は `AddCommandReq::Res` に固定される
///
/// # エラー
/// 返したエラーは `CommandError::Handler` に包まれて呼び出し側へ届きます。
/// 元のエラー型は `CommandError::cause()` から downcast で取り出せます。
///
/// ```ignore
/// let err = manager.handle_req(&ctx, req).await.unwrap_err();
/// assert_eq!(err.kind(), ErrorKind::Handler);
/// let overflow = err.cause().and_then(|e| e.downcast_ref::<OverflowError>());
/// ```
#[async_trait]
pub trait Handler<Req: CommandReq>: Send + Sync + 'static {
    async fn handle(&self, ctx: &Context, req: Req) -> std::result::Result<Req::Res, BoxError>;
}

/// async クロージャを Handler として使うためのラッパー
pub struct FnHandler<Req, F> {
    f: F,
    _marker: PhantomData<fn(Req)>,
}

/// `Fn(Context, Req) -> impl Future` から Handler を作る
pub fn handler_fn<Req, F, Fut>(f: F) -> FnHandler<Req, F>
where
    Req: CommandReq,
    F: Fn(Context, Req) -> Fut + Send + Sync + 'static,
    Fut: StdFuture<Output = std::result::Result<Req::Res, BoxError>> + Send + 'static,
{
    FnHandler {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<Req, F, Fut> Handler<Req> for FnHandler<Req, F>
where
    Req: CommandReq,
    F: Fn(Context, Req) -> Fut + Send + Sync + 'static,
    Fut: StdFuture<Output = std::result::Result<Req::Res, BoxError>> + Send + 'static,
{
    async fn handle(&self, ctx: &Context, req: Req) -> std::result::Result<Req::Res, BoxError> {
        (self.f)(ctx.clone(), req).await
    }
}

/// HandlerAdapter は Handler の object-safe な抽象化
///
/// `DefaultHandlerAdapter<Req, H>` を `Arc<dyn HandlerAdapter>` に変換することで、
/// 異なる request 型の Handler を 1 つの HashMap に格納できます。
#[async_trait]
pub trait HandlerAdapter: Send + Sync {
    fn req_type(&self) -> TypeKey;
    fn res_type(&self) -> TypeKey;
    async fn handle_dyn(&self, ctx: &Context, req: DynReq) -> Result<DynRes>;
}

type HandlerFactory<H> = dyn Fn() -> H + Send + Sync;

/// factory から Handler を遅延生成する標準の adapter
pub struct DefaultHandlerAdapter<Req, H> {
    factory: Box<HandlerFactory<H>>,
    handler: RwLock<Option<Arc<H>>>,
    _marker: PhantomData<fn(Req)>,
}

impl<Req, H> DefaultHandlerAdapter<Req, H>
where
    Req: CommandReq,
    H: Handler<Req>,
{
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> H + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            handler: RwLock::new(None),
            _marker: PhantomData,
        }
    }

    pub fn is_constructed(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Handler インスタンスを返す（未生成なら 1 度だけ生成）
    fn instance(&self) -> Arc<H> {
        if let Some(handler) = self.handler.read().as_ref() {
            return Arc::clone(handler);
        }

        let mut slot = self.handler.write();
        // 書き込みロック取得までに他の呼び出しが生成済みかもしれない
        if let Some(handler) = slot.as_ref() {
            return Arc::clone(handler);
        }
        let handler = Arc::new((self.factory)());
        debug!(req_type = %TypeKey::of::<Req>(), "handler constructed");
        *slot = Some(Arc::clone(&handler));
        handler
    }
}

impl<Req, H> fmt::Debug for DefaultHandlerAdapter<Req, H>
where
    Req: CommandReq,
    H: Handler<Req>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultHandlerAdapter")
            .field("req_type", &TypeKey::of::<Req>())
            .field("res_type", &TypeKey::of::<Req::Res>())
            .field("constructed", &self.is_constructed())
            .finish()
    }
}

#[async_trait]
impl<Req, H> HandlerAdapter for DefaultHandlerAdapter<Req, H>
where
    Req: CommandReq,
    H: Handler<Req>,
{
    fn req_type(&self) -> TypeKey {
        TypeKey::of::<Req>()
    }

    fn res_type(&self) -> TypeKey {
        TypeKey::of::<Req::Res>()
    }

    async fn handle_dyn(&self, ctx: &Context, req: DynReq) -> Result<DynRes> {
        let actual = req.type_key();
        let req = req
            .downcast::<Req>()
            .map_err(|_| CommandError::InvalidReqType {
                expected: self.req_type(),
                actual,
            })?;

        let handler = self.instance();
        let res = handler
            .handle(ctx, req)
            .await
            .map_err(|source| CommandError::Handler {
                req_type: self.req_type(),
                source: Arc::from(source),
            })?;
        Ok(DynRes::new(res))
    }
}

/// HandlerCatalog は request 型ごとの HandlerAdapter を管理
///
/// # 内部実装
/// - `insert_handler::<Req, H, _>(factory)` で登録
/// - 内部的に DefaultHandlerAdapter でラップして `dyn HandlerAdapter` に変換
/// - `RwLock<HashMap<TypeKey, Arc<dyn HandlerAdapter>>>` で管理
/// - ロックは lookup の間だけ保持し、handler 実行（await）を跨がない
#[derive(Default)]
pub struct HandlerCatalog {
    policy: DuplicatePolicy,
    adapters: RwLock<HashMap<TypeKey, Arc<dyn HandlerAdapter>>>,
}

impl HandlerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            adapters: RwLock::default(),
        }
    }

    /// adapter を登録（同じ request 型の既存 adapter は policy に従う）
    pub fn insert(&self, adapter: Arc<dyn HandlerAdapter>) -> Result<()> {
        let req_type = adapter.req_type();
        let mut adapters = self.adapters.write();
        if adapters.contains_key(&req_type) {
            if self.policy == DuplicatePolicy::Reject {
                return Err(CommandError::Duplicate {
                    catalog: "handler",
                    key: req_type.to_string(),
                });
            }
            warn!(%req_type, "overwriting handler");
        }
        adapters.insert(req_type, adapter);
        debug!(%req_type, "handler inserted");
        Ok(())
    }

    pub fn insert_handler<Req, H, F>(&self, factory: F) -> Result<()>
    where
        Req: CommandReq,
        H: Handler<Req>,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.insert(Arc::new(DefaultHandlerAdapter::<Req, H>::new(factory)))
    }

    /// 登録を取り除く。取り除いたら true
    ///
    /// 実行中の呼び出しは手元の adapter を使い切ります。
    pub fn remove(&self, req_type: TypeKey) -> bool {
        let removed = self.adapters.write().remove(&req_type).is_some();
        if removed {
            debug!(%req_type, "handler removed");
        }
        removed
    }

    fn adapter(&self, req_type: TypeKey) -> Result<Arc<dyn HandlerAdapter>> {
        self.adapters
            .read()
            .get(&req_type)
            .cloned()
            .ok_or(CommandError::HandlerMissing(req_type))
    }

    /// 型消去された request を処理
    pub async fn handle_dyn(&self, ctx: &Context, req: DynReq) -> Result<DynRes> {
        let adapter = self.adapter(req.type_key())?;
        adapter.handle_dyn(ctx, req).await
    }

    /// 型付きの request を処理し、result を具体型で返す
    pub async fn handle<Req: CommandReq>(&self, ctx: &Context, req: Req) -> Result<Req::Res> {
        let res = self.handle_dyn(ctx, DynReq::new(req)).await?;
        downcast_res::<Req>(res)
    }

    /// `handle_dyn` を Future として実行
    pub fn future_dyn(self: &Arc<Self>, ctx: Context, req: DynReq) -> Future<Result<DynRes>> {
        let catalog = Arc::clone(self);
        futures::start(ctx, move |ctx| async move { catalog.handle_dyn(&ctx, req).await })
    }

    /// `handle` を Future として実行
    pub fn future<Req: CommandReq>(
        self: &Arc<Self>,
        ctx: Context,
        req: Req,
    ) -> Future<Result<Req::Res>> {
        let catalog = Arc::clone(self);
        futures::start(ctx, move |ctx| async move { catalog.handle(&ctx, req).await })
    }

    /// request 型 → result 型の対応表（スキーマ生成用）
    pub fn type_map(&self) -> HashMap<TypeKey, TypeKey> {
        self.adapters
            .read()
            .iter()
            .map(|(req_type, adapter)| (*req_type, adapter.res_type()))
            .collect()
    }

    pub fn contains(&self, req_type: TypeKey) -> bool {
        self.adapters.read().contains_key(&req_type)
    }

    pub fn len(&self) -> usize {
        self.adapters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.read().is_empty()
    }
}

pub(crate) fn downcast_res<Req: CommandReq>(res: DynRes) -> Result<Req::Res> {
    let actual = res.type_key();
    res.downcast::<Req::Res>()
        .map_err(|_| CommandError::InvalidResType {
            expected: TypeKey::of::<Req::Res>(),
            actual,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde::Serialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct SumRes {
        result: i64,
    }

    struct AddReq {
        x: i64,
        y: i64,
    }

    impl CommandReq for AddReq {
        type Res = SumRes;
    }

    struct SubReq {
        x: i64,
        y: i64,
    }

    impl CommandReq for SubReq {
        type Res = SumRes;
    }

    struct AddHandler;

    #[async_trait]
    impl Handler<AddReq> for AddHandler {
        async fn handle(
            &self,
            _ctx: &Context,
            req: AddReq,
        ) -> std::result::Result<SumRes, BoxError> {
            Ok(SumRes {
                result: req.x + req.y,
            })
        }
    }

    struct SubHandler;

    #[async_trait]
    impl Handler<SubReq> for SubHandler {
        async fn handle(
            &self,
            _ctx: &Context,
            req: SubReq,
        ) -> std::result::Result<SumRes, BoxError> {
            Ok(SumRes {
                result: req.x - req.y,
            })
        }
    }

    /// 結果型を偽る adapter（InvalidResType の検証用）
    struct LyingAdapter;

    #[async_trait]
    impl HandlerAdapter for LyingAdapter {
        fn req_type(&self) -> TypeKey {
            TypeKey::of::<AddReq>()
        }

        fn res_type(&self) -> TypeKey {
            TypeKey::of::<SumRes>()
        }

        async fn handle_dyn(&self, _ctx: &Context, _req: DynReq) -> Result<DynRes> {
            Ok(DynRes::new("not a SumRes".to_string()))
        }
    }

    #[tokio::test]
    async fn test_handle_typed() {
        let catalog = HandlerCatalog::new();
        catalog.insert_handler::<AddReq, _, _>(|| AddHandler).unwrap();

        let res = catalog
            .handle(&Context::background(), AddReq { x: 3, y: 4 })
            .await
            .unwrap();
        assert_eq!(res, SumRes { result: 7 });
    }

    #[tokio::test]
    async fn test_handle_missing() {
        let catalog = HandlerCatalog::new();
        let err = catalog
            .handle(&Context::background(), AddReq { x: 3, y: 4 })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandlerMissing);
        assert!(err.to_string().contains("AddReq"));
    }

    #[tokio::test]
    async fn test_adapter_rejects_wrong_request_type() {
        let adapter = DefaultHandlerAdapter::<AddReq, _>::new(|| AddHandler);
        let err = adapter
            .handle_dyn(&Context::background(), DynReq::new(SubReq { x: 1, y: 1 }))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::InvalidReqType { expected, actual }
                if expected == TypeKey::of::<AddReq>() && actual == TypeKey::of::<SubReq>()
        ));
        // 型が合わない呼び出しでは handler を生成しない
        assert!(!adapter.is_constructed());
    }

    #[tokio::test]
    async fn test_typed_handle_rejects_wrong_result_type() {
        let catalog = HandlerCatalog::new();
        catalog.insert(Arc::new(LyingAdapter)).unwrap();

        let err = catalog
            .handle(&Context::background(), AddReq { x: 1, y: 1 })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidResType);
    }

    #[tokio::test]
    async fn test_handler_error_is_propagated() {
        let catalog = HandlerCatalog::new();
        catalog
            .insert_handler::<AddReq, _, _>(|| {
                handler_fn(|_ctx, _req: AddReq| async { Err::<SumRes, BoxError>("overflow".into()) })
            })
            .unwrap();

        let err = catalog
            .handle(&Context::background(), AddReq { x: 1, y: 1 })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Handler);
        assert_eq!(err.cause().map(|e| e.to_string()), Some("overflow".to_string()));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("{x} + {y} overflows")]
    struct Overflow {
        x: i64,
        y: i64,
    }

    #[tokio::test]
    async fn test_handler_error_downcasts_through_cause() {
        let catalog = HandlerCatalog::new();
        catalog
            .insert_handler::<AddReq, _, _>(|| {
                handler_fn(|_ctx, req: AddReq| async move {
                    Err::<SumRes, BoxError>(Box::new(Overflow { x: req.x, y: req.y }))
                })
            })
            .unwrap();

        let err = catalog
            .handle(&Context::background(), AddReq { x: i64::MAX, y: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Handler { req_type, .. } if req_type == TypeKey::of::<AddReq>()));
        let overflow = err.cause().and_then(|e| e.downcast_ref::<Overflow>()).unwrap();
        assert_eq!((overflow.x, overflow.y), (i64::MAX, 1));
    }

    #[tokio::test]
    async fn test_remove() {
        let catalog = HandlerCatalog::new();
        catalog.insert_handler::<AddReq, _, _>(|| AddHandler).unwrap();

        assert!(catalog.remove(TypeKey::of::<AddReq>()));
        assert!(!catalog.remove(TypeKey::of::<AddReq>()));
        assert!(catalog.is_empty());

        let err = catalog
            .handle(&Context::background(), AddReq { x: 1, y: 1 })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandlerMissing);
    }

    #[tokio::test]
    async fn test_handler_is_built_lazily_and_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let catalog = Arc::new(HandlerCatalog::new());
        catalog
            .insert_handler::<AddReq, _, _>({
                let built = Arc::clone(&built);
                move || {
                    built.fetch_add(1, Ordering::SeqCst);
                    AddHandler
                }
            })
            .unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 0);

        let pending: Vec<_> = (0..16)
            .map(|i| catalog.future(Context::background(), AddReq { x: i, y: 1 }))
            .collect();
        let results = futures::wait_all(pending).wait().await;

        assert_eq!(built.load(Ordering::SeqCst), 1);
        for (i, res) in results.into_iter().enumerate() {
            assert_eq!(res.unwrap().result, i as i64 + 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration() {
        let catalog = Arc::new(HandlerCatalog::new());

        let add = {
            let catalog = Arc::clone(&catalog);
            tokio::task::spawn_blocking(move || catalog.insert_handler::<AddReq, _, _>(|| AddHandler))
        };
        let sub = {
            let catalog = Arc::clone(&catalog);
            tokio::task::spawn_blocking(move || catalog.insert_handler::<SubReq, _, _>(|| SubHandler))
        };
        add.await.unwrap().unwrap();
        sub.await.unwrap().unwrap();

        assert_eq!(catalog.len(), 2);
        let ctx = Context::background();
        assert_eq!(catalog.handle(&ctx, AddReq { x: 5, y: 2 }).await.unwrap().result, 7);
        assert_eq!(catalog.handle(&ctx, SubReq { x: 5, y: 2 }).await.unwrap().result, 3);
    }

    #[tokio::test]
    async fn test_future_dyn() {
        let catalog = Arc::new(HandlerCatalog::new());
        catalog.insert_handler::<SubReq, _, _>(|| SubHandler).unwrap();

        let future = catalog.future_dyn(Context::background(), DynReq::new(SubReq { x: 9, y: 4 }));
        let res = future.wait().await.unwrap();
        assert_eq!(res.downcast_ref::<SumRes>(), Some(&SumRes { result: 5 }));

        let missing = catalog.future_dyn(Context::background(), DynReq::new(AddReq { x: 1, y: 1 }));
        assert_eq!(missing.wait().await.unwrap_err().kind(), ErrorKind::HandlerMissing);
    }

    #[tokio::test]
    async fn test_handler_sees_cancellation() {
        let catalog = HandlerCatalog::new();
        catalog
            .insert_handler::<AddReq, _, _>(|| {
                handler_fn(|ctx: Context, req: AddReq| async move {
                    tokio::select! {
                        _ = ctx.cancelled() => Err::<SumRes, BoxError>("cancelled".into()),
                        _ = tokio::time::sleep(Duration::from_secs(60)) => Ok(SumRes { result: req.x }),
                    }
                })
            })
            .unwrap();

        let (ctx, cancel) = Context::with_cancel();
        cancel.cancel();
        let err = catalog.handle(&ctx, AddReq { x: 1, y: 0 }).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Handler);
    }

    #[test]
    fn test_type_map_and_duplicates() {
        let catalog = HandlerCatalog::new();
        catalog.insert_handler::<AddReq, _, _>(|| AddHandler).unwrap();
        catalog.insert_handler::<SubReq, _, _>(|| SubHandler).unwrap();
        // 後勝ち
        catalog.insert_handler::<AddReq, _, _>(|| AddHandler).unwrap();

        let type_map = catalog.type_map();
        assert_eq!(type_map.len(), 2);
        assert_eq!(type_map[&TypeKey::of::<AddReq>()], TypeKey::of::<SumRes>());
        assert_eq!(type_map[&TypeKey::of::<SubReq>()], TypeKey::of::<SumRes>());

        let strict = HandlerCatalog::with_policy(DuplicatePolicy::Reject);
        strict.insert_handler::<AddReq, _, _>(|| AddHandler).unwrap();
        let err = strict.insert_handler::<AddReq, _, _>(|| AddHandler).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Duplicate);
    }
}
