use thiserror::Error;

use crate::bridge::BridgeError;
use crate::model::ModelError;
use crate::tools::ToolError;

/// Any failure surfaced by the runtime.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, Error>;
