use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("internal: {0}.")]
    Internal(#[from] InternalError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    User(#[from] UserError),
}

#[derive(Error, Debug)]
pub enum InternalError {
    #[error("missing artifact {name} at {path}")]
    MissingArtifact { name: &'static str, path: String },
    #[error("corrupt artifact {name} at {path}: {reason}")]
    CorruptArtifact { name: &'static str, path: String, reason: String },
    #[error("transient i/o failure while {action}: {source}")]
    TransientIo { action: &'static str, source: io::Error },
    #[error("panic occurred while reducing shard {shard_id}")]
    PanicInReduce { shard_id: u32 },
    #[error("invalid merge while processing {process}")]
    MergeInvariantViolated { process: &'static str },
    #[error(transparent)]
    RayonThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Error, Debug)]
pub enum UserError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("entry exceeds the maximum encodable size ({limit} bytes): {what}")]
    OversizedEntry { what: &'static str, limit: usize },
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },
    #[error("relation `{0}` is not registered")]
    UnknownRelation(String),
    #[error("corpus path `{0}` does not exist")]
    MissingCorpusPath(String),
    #[error("client gone: the downstream reader closed the connection")]
    ClientGone,
}

impl Error {
    /// Coarse class used by the CLI's process exit code and by diagnostics counters.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            Error::Internal(_) => "internal",
            Error::Io(_) => "io",
            Error::User(_) => "user",
        }
    }
}
