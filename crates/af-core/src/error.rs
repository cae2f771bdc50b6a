use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum CoreReason {
    #[error("rule execution error")]
    RuleExec,
    #[error("unit start error")]
    UnitStart,
    #[error("unit cast error")]
    UnitCast,
    #[error("node unreachable")]
    NodeUnreachable,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for CoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::RuleExec => 1001,
            Self::UnitStart => 1002,
            Self::UnitCast => 1003,
            Self::NodeUnreachable => 1004,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type CoreError = StructError<CoreReason>;
pub type CoreResult<T> = Result<T, CoreError>;
