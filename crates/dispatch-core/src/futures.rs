//! Futures - 並行実行される計算へのハンドルと合成関数
//!
//! # 状態遷移
//! `pending → resolved`（終端）。一度 resolve した値は変わらず、再実行もしません。
//!
//! # 仕組み
//! - 計算は `tokio::spawn`（`start_blocking` は blocking pool）で即座に開始
//! - 結果は `watch::channel(None)` に 1 度だけ `Some(r)` として書き込まれる
//! - `wait()` は watch の Receiver を clone して待つので、何度呼んでも同じ値
//!
//! Future 自身は Context の cancel を見ません。止めたい計算は渡された
//! Context を自分で監視します。

use std::collections::HashMap;
use std::fmt;
use std::future::Future as StdFuture;
use std::hash::Hash;

use tokio::sync::{mpsc, watch};

use crate::context::Context;

/// Future は並行に走っている計算のハンドル
///
/// # 使用例
/// ```ignore
/// let f1 = futures::start(ctx.clone(), |_| async { slow_add(1, 2).await });
/// let f2 = futures::start(ctx.clone(), |_| async { slow_add(3, 4).await });
///
/// // 所要時間は合計ではなく最も遅いものに律速される
/// let results = futures::wait_all([f1, f2]).wait().await;
/// ```
pub struct Future<R> {
    rx: watch::Receiver<Option<R>>,
}

impl<R> Clone for Future<R> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<R> Future<R>
where
    R: Clone + Send + Sync + 'static,
{
    /// 計算の完了を待って結果を返す
    ///
    /// # Panics
    /// 計算が panic して resolve できなくなった場合
    pub async fn wait(&self) -> R {
        let mut rx = self.rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(slot) => match &*slot {
                Some(value) => value.clone(),
                None => unresolvable(),
            },
            Err(_) => unresolvable(),
        }
    }

    /// 待たずに結果を覗く（未完了なら None）
    pub fn try_get(&self) -> Option<R> {
        self.rx.borrow().clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

impl<R> fmt::Debug for Future<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("resolved", &self.rx.borrow().is_some())
            .finish()
    }
}

// 送信側が値を書かずに drop された = 計算が panic した
fn unresolvable() -> ! {
    panic!("future computation panicked before it resolved")
}

/// 計算を新しい tokio task で即座に開始する
pub fn start<R, F, Fut>(ctx: Context, f: F) -> Future<R>
where
    R: Clone + Send + Sync + 'static,
    F: FnOnce(Context) -> Fut + Send + 'static,
    Fut: StdFuture<Output = R> + Send + 'static,
{
    let (tx, rx) = watch::channel(None);
    tokio::spawn(async move {
        let value = f(ctx).await;
        // 待機者がいなくても値は保持される
        tx.send_replace(Some(value));
    });
    Future { rx }
}

/// ブロッキングな計算を tokio の blocking pool で開始する
pub fn start_blocking<R, F>(ctx: Context, f: F) -> Future<R>
where
    R: Clone + Send + Sync + 'static,
    F: FnOnce(Context) -> R + Send + 'static,
{
    let (tx, rx) = watch::channel(None);
    tokio::task::spawn_blocking(move || {
        tx.send_replace(Some(f(ctx)));
    });
    Future { rx }
}

/// 既知の値を返す Future（これも別 task で resolve する）
pub fn value<R>(v: R) -> Future<R>
where
    R: Clone + Send + Sync + 'static,
{
    start(Context::background(), move |_| async move { v })
}

/// 全ての Future を入力順に待ち、結果を同じ順序で返す
///
/// 各入力は作成時点で既に走っているので、所要時間は最も遅い入力で決まります。
pub fn wait_all<R, I>(futures: I) -> Future<Vec<R>>
where
    R: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = Future<R>>,
{
    let futures: Vec<Future<R>> = futures.into_iter().collect();
    start(Context::background(), move |_| async move {
        let mut results = Vec::with_capacity(futures.len());
        for future in &futures {
            results.push(future.wait().await);
        }
        results
    })
}

/// キー付きの `wait_all`
pub fn wait_all_map<K, R>(futures: HashMap<K, Future<R>>) -> Future<HashMap<K, R>>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    start(Context::background(), move |_| async move {
        let mut results = HashMap::with_capacity(futures.len());
        for (key, future) in futures {
            let value = future.wait().await;
            results.insert(key, value);
        }
        results
    })
}

/// 最初に完了した Future の結果を返す
///
/// 入力ごとに観測 task を立て、容量 = 入力数の channel に結果を送らせて
/// 最初に届いた値を採用します。負けた計算は止めずに最後まで走らせ、結果は捨てます。
/// 入力が空なら `R::default()` に resolve します。
pub fn race_all<R, I>(futures: I) -> Future<R>
where
    R: Clone + Default + Send + Sync + 'static,
    I: IntoIterator<Item = Future<R>>,
{
    let futures: Vec<Future<R>> = futures.into_iter().collect();
    if futures.is_empty() {
        return value(R::default());
    }

    let (tx, mut rx) = mpsc::channel(futures.len());
    for future in futures {
        let tx = tx.clone();
        tokio::spawn(async move {
            let value = future.wait().await;
            // 勝者が決まった後は receiver が drop されている
            let _ = tx.send(value).await;
        });
    }
    drop(tx);

    start(Context::background(), move |_| async move {
        match rx.recv().await {
            Some(value) => value,
            None => unresolvable(),
        }
    })
}
