//! Error types for engine client operations

use thiserror::Error;

/// Errors that can occur while constructing or using an engine client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid engine address {addr:?}: {reason}")]
    InvalidAddr { addr: String, reason: String },

    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("gRPC status error: {0}")]
    Status(#[from] tonic::Status),
}
