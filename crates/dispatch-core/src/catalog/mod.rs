//! Catalogs - 登録面
//!
//! - `MappingCatalog`: 外部名 ↔ request 型
//! - `DecoderCatalog`: request 型 → bytes デコーダ
//! - `HandlerCatalog`: request 型 → HandlerAdapter
//!
//! 各カタログは自分専用の RwLock を 1 つだけ持ち、カタログ間でロックを共有しません。

pub mod decoder;
pub mod handler;
pub mod mapping;

pub use decoder::{Decoder, DecoderCatalog};
pub use handler::{
    DefaultHandlerAdapter, FnHandler, Handler, HandlerAdapter, HandlerCatalog, handler_fn,
};
pub use mapping::MappingCatalog;
