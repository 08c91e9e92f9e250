use std::path::PathBuf;

/// All errors produced by gitkv.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot acquire working copy of '{location}': {reason}")]
    Acquisition { location: String, reason: String },

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("I/O operation on closed file: {0}")]
    UseAfterClose(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("conflict on key(s): {}", .0.join(", "))]
    Conflict(Vec<String>),

    #[error(
        "push to branch '{}' failed after {} attempt(s); local commit kept in {}: {}",
        .branch, .attempts, .workdir.display(), .cause
    )]
    Push {
        branch: String,
        attempts: u8,
        workdir: PathBuf,
        #[source]
        cause: Box<Error>,
    },

    #[error(
        "branch '{}' has an unpushed commit kept in {}; finalize() it before staging more",
        .branch, .workdir.display()
    )]
    Unpushed { branch: String, workdir: PathBuf },

    #[error("push rejected by remote: {0}")]
    PushRejected(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid ref name: {0}")]
    InvalidRefName(String),

    #[error("invalid mode: {0:?}")]
    InvalidMode(String),

    #[error("repository handle already released")]
    Released,

    #[error("git error: {0}")]
    Git(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The transactional stage a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Acquisition,
    Reconciliation,
    Push,
}

// ---------------------------------------------------------------------------
// Convenience constructors
// ---------------------------------------------------------------------------

impl Error {
    pub fn acquisition(location: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Acquisition {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound(key.into())
    }

    pub fn use_after_close(key: impl Into<String>) -> Self {
        Self::UseAfterClose(key.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    pub fn push(
        branch: impl Into<String>,
        attempts: u8,
        workdir: impl Into<PathBuf>,
        cause: Error,
    ) -> Self {
        Self::Push {
            branch: branch.into(),
            attempts,
            workdir: workdir.into(),
            cause: Box::new(cause),
        }
    }

    pub fn unpushed(branch: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self::Unpushed {
            branch: branch.into(),
            workdir: workdir.into(),
        }
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    pub fn invalid_ref_name(name: impl Into<String>) -> Self {
        Self::InvalidRefName(name.into())
    }

    pub fn invalid_mode(mode: impl Into<String>) -> Self {
        Self::InvalidMode(mode.into())
    }

    pub fn git(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Git(Box::new(err))
    }

    pub fn git_msg(msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        Self::Git(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io(std::io::Error::new(
            err.kind(),
            format!("{}: {}", path.into().display(), err),
        ))
    }

    /// Which stage of a transaction failed, for errors that belong to one.
    ///
    /// A push failure whose cause is a conflict is reported as
    /// [`Stage::Reconciliation`].
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Acquisition { .. } => Some(Stage::Acquisition),
            Self::Conflict(_) => Some(Stage::Reconciliation),
            Self::Push { cause, .. } => match cause.as_ref() {
                Self::Conflict(_) => Some(Stage::Reconciliation),
                _ => Some(Stage::Push),
            },
            Self::PushRejected(_) => Some(Stage::Push),
            _ => None,
        }
    }

    /// Keys that could not be reconciled, if this error stems from a conflict.
    pub fn conflicting_keys(&self) -> &[String] {
        match self {
            Self::Conflict(keys) => keys.as_slice(),
            Self::Push { cause, .. } => cause.conflicting_keys(),
            _ => &[],
        }
    }
}

/// Wrap an error in an `io::Error` so it can cross `std::io` trait boundaries.
pub(crate) fn into_io(err: Error) -> std::io::Error {
    match err {
        Error::Io(e) => e,
        other => std::io::Error::new(std::io::ErrorKind::Other, other),
    }
}
