//! Errors - ディスパッチ各段階のエラー型と分類
//!
//! 全ての失敗は `CommandError` として呼び出し元に返されます。
//! 未登録の名前や壊れた payload でプロセスが panic することはありません。
//!
//! # 分類
//! - `ErrorKind` はトランスポート層がステータスコードへ変換するための粗い分類
//! - `Stage` は Manager のパイプラインのどの段階で失敗したかを表す

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::command::TypeKey;

/// Handler や Decoder が返す任意のエラー
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// `CommandError` に保持される共有エラー（Clone 可能にするため Arc）
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias using CommandError.
pub type Result<T, E = CommandError> = std::result::Result<T, E>;

/// ErrorKind は CommandError の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MappingMissing,
    DecoderMissing,
    DecoderFailure,
    HandlerMissing,
    InvalidReqType,
    InvalidResType,
    Duplicate,
    Handler,
    InvalidEnvelope,
}

/// Manager のパイプライン段階
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// envelope → name + bytes
    Resolving,
    /// name → type key
    Mapping,
    /// bytes → request
    Decoding,
    /// request → result
    Handling,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Resolving => f.write_str("error resolving request envelope"),
            Stage::Mapping => f.write_str("error mapping request type by name"),
            Stage::Decoding => f.write_str("error decoding request"),
            Stage::Handling => f.write_str("error handling request"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum CommandError {
    #[error("mapping missing for req name: {0}")]
    MappingMissingForName(String),

    #[error("mapping missing for req type: {0}")]
    MappingMissingForType(TypeKey),

    #[error("decoder missing for req type: {0}")]
    DecoderMissing(TypeKey),

    #[error("decoder failure for req type {req_type}: {reason}")]
    DecoderFailure {
        req_type: TypeKey,
        reason: String,
        #[source]
        source: Option<SharedError>,
    },

    #[error("handler missing for req type: {0}")]
    HandlerMissing(TypeKey),

    #[error("req type {actual} does not match {expected}")]
    InvalidReqType { expected: TypeKey, actual: TypeKey },

    #[error("res type {actual} was unexpected for {expected}")]
    InvalidResType { expected: TypeKey, actual: TypeKey },

    #[error("{catalog} catalog already has an entry for {key}")]
    Duplicate { catalog: &'static str, key: String },

    #[error("handler for req type {req_type} failed: {source}")]
    Handler {
        req_type: TypeKey,
        #[source]
        source: SharedError,
    },

    #[error("invalid request envelope: {reason}")]
    InvalidEnvelope {
        reason: String,
        #[source]
        source: SharedError,
    },

    #[error("{stage}: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<CommandError>,
    },
}

impl CommandError {
    /// エラーに段階情報を付与する
    pub fn at(self, stage: Stage) -> Self {
        CommandError::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// `Stage` の包装を剥がした根本のエラーの分類
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::MappingMissingForName(_) | CommandError::MappingMissingForType(_) => {
                ErrorKind::MappingMissing
            }
            CommandError::DecoderMissing(_) => ErrorKind::DecoderMissing,
            CommandError::DecoderFailure { .. } => ErrorKind::DecoderFailure,
            CommandError::HandlerMissing(_) => ErrorKind::HandlerMissing,
            CommandError::InvalidReqType { .. } => ErrorKind::InvalidReqType,
            CommandError::InvalidResType { .. } => ErrorKind::InvalidResType,
            CommandError::Duplicate { .. } => ErrorKind::Duplicate,
            CommandError::Handler { .. } => ErrorKind::Handler,
            CommandError::InvalidEnvelope { .. } => ErrorKind::InvalidEnvelope,
            CommandError::Stage { source, .. } => source.kind(),
        }
    }

    /// 失敗した段階（Manager 経由でない場合は None）
    pub fn stage(&self) -> Option<Stage> {
        match self {
            CommandError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Handler / Decoder が返した元のエラー（downcast 用）
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            CommandError::DecoderFailure {
                source: Some(source),
                ..
            } => Some(source.as_ref()),
            CommandError::Handler { source, .. } | CommandError::InvalidEnvelope { source, .. } => {
                Some(source.as_ref())
            }
            CommandError::Stage { source, .. } => source.cause(),
            _ => None,
        }
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind() == kind
    }

    pub(crate) fn decoder_failure(req_type: TypeKey, reason: impl Into<String>) -> Self {
        CommandError::DecoderFailure {
            req_type,
            reason: reason.into(),
            source: None,
        }
    }
}
