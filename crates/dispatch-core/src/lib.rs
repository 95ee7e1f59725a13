//! dispatch-core
//!
//! 型安全なインプロセス・コマンドディスパッチ。
//! 型付きの request を 1 つの Handler に振り分け、型付きの result を返します。
//!
//! # モジュール構成
//! - **command**: `CommandReq` / `CommandRes`、`TypeKey`、型消去された `DynReq` / `DynRes`
//! - **catalog**: Mapping / Decoder / Handler の各カタログと HandlerAdapter
//! - **manager**: 3 カタログを束ねたパイプライン（`handle_raw` など）
//! - **futures**: 並行実行のハンドル `Future` と `wait_all` / `race_all`
//! - **envelope**: `{"type": ..., "reqData": ...}` 形式のリクエスト封筒
//! - **context**: 実行コンテキスト（相関 ID と協調的 cancel）
//! - **config**: 重複登録ポリシー
//! - **error**: `CommandError` と `ErrorKind`

pub mod catalog;
pub mod command;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod futures;
pub mod manager;

pub use catalog::{
    Decoder, DecoderCatalog, DefaultHandlerAdapter, Handler, HandlerAdapter, HandlerCatalog,
    MappingCatalog, handler_fn,
};
pub use command::{CommandReq, CommandRes, DynReq, DynRes, TypeKey};
pub use config::{CatalogConfig, DuplicatePolicy};
pub use context::{CancelHandle, Context};
pub use envelope::Envelope;
pub use error::{BoxError, CommandError, ErrorKind, Result, Stage};
pub use futures::Future;
pub use manager::{Manager, Route};
