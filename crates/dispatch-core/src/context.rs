//! Context - Handler と `futures::start` に渡す実行コンテキスト
//!
//! キャンセルは協調的で、フレームワーク側では確認しません。
//! 途中で止めたい Handler は `is_cancelled()` / `cancelled()` を自分で見ます。

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use ulid::Ulid;

/// Context は 1 回の呼び出しに付随する実行コンテキスト
///
/// - `id`: tracing の相関 ID（clone 間で共有）
/// - cancel シグナル: `CancelHandle::cancel()` で一度だけ立つ
#[derive(Clone)]
pub struct Context {
    id: Ulid,
    cancel: watch::Receiver<bool>,
}

/// Context を cancel するためのハンドル
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Context {
    /// 決して cancel されない Context
    pub fn background() -> Self {
        // sender を即 drop する。値は false のまま固定される
        let (_tx, rx) = watch::channel(false);
        Self {
            id: Ulid::new(),
            cancel: rx,
        }
    }

    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            id: Ulid::new(),
            cancel: rx,
        };
        (ctx, CancelHandle { tx: Arc::new(tx) })
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// cancel されるまで待つ。cancel され得ない Context では永遠に pending
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        // receiver が全て drop 済みでも値は更新しておく
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}
