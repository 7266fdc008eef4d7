//! Error types for RPC transport and the worker agent.

use thiserror::Error;

pub type RpcResult<T> = Result<T, RpcError>;

/// Failure of one RPC call. All variants are transient from the caller's
/// point of view.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("connect to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },

    #[error("request to {addr} timed out")]
    Timeout { addr: String },

    #[error("{addr} answered {status}: {body}")]
    Status {
        addr: String,
        status: u16,
        body: String,
    },

    #[error("malformed message: {0}")]
    Codec(String),
}

impl RpcError {
    /// HTTP status of a non-2xx answer.
    pub fn status(&self) -> Option<u16> {
        match self {
            RpcError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("registration rejected by coordinator")]
    Rejected,

    #[error("registration gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
}
