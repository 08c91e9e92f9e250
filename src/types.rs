use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Branch used when none is configured.
pub const DEFAULT_BRANCH: &str = "master";

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// How a [`KeyValueFile`](crate::KeyValueFile) is opened.
///
/// Parses from the familiar `open()` mode strings (`"r"`, `"w+"`, `"ab"`, ...);
/// the `b` flag is accepted and ignored since content is always bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    /// `r`: read existing content.
    #[default]
    Read,
    /// `r+`: read existing content and overwrite it in place.
    ReadWrite,
    /// `w`: start empty and write.
    Write,
    /// `w+`: start empty, write and read back.
    WriteRead,
    /// `a`: start from existing content (if any), writes go to the end.
    Append,
    /// `a+`: like `Append`, and reads are allowed.
    AppendRead,
}

impl Mode {
    pub fn can_read(self) -> bool {
        matches!(
            self,
            Self::Read | Self::ReadWrite | Self::WriteRead | Self::AppendRead
        )
    }

    pub fn can_write(self) -> bool {
        !matches!(self, Self::Read)
    }

    /// Opening fails with `KeyNotFound` when the key is absent.
    pub fn requires_existing(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// Existing content is loaded into the buffer on open.
    pub fn loads_existing(self) -> bool {
        matches!(
            self,
            Self::Read | Self::ReadWrite | Self::Append | Self::AppendRead
        )
    }

    /// Every write lands at the end of the buffer.
    pub fn appends(self) -> bool {
        matches!(self, Self::Append | Self::AppendRead)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "r",
            Self::ReadWrite => "r+",
            Self::Write => "w",
            Self::WriteRead => "w+",
            Self::Append => "a",
            Self::AppendRead => "a+",
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut base = None;
        let mut plus = false;
        let mut binary = false;
        for ch in s.chars() {
            match ch {
                'r' | 'w' | 'a' if base.is_none() => base = Some(ch),
                '+' if !plus => plus = true,
                'b' if !binary => binary = true,
                _ => return Err(Error::invalid_mode(s)),
            }
        }
        match (base, plus) {
            (Some('r'), false) => Ok(Self::Read),
            (Some('r'), true) => Ok(Self::ReadWrite),
            (Some('w'), false) => Ok(Self::Write),
            (Some('w'), true) => Ok(Self::WriteRead),
            (Some('a'), false) => Ok(Self::Append),
            (Some('a'), true) => Ok(Self::AppendRead),
            _ => Err(Error::invalid_mode(s)),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// Author/committer identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Default for Signature {
    fn default() -> Self {
        Self {
            name: "gitkv".into(),
            email: "gitkv@localhost".into(),
        }
    }
}

impl Signature {
    pub(crate) fn to_git(&self) -> Result<git2::Signature<'static>> {
        git2::Signature::now(&self.name, &self.email).map_err(Error::git)
    }
}

// ---------------------------------------------------------------------------
// RepoOptions
// ---------------------------------------------------------------------------

/// Options for acquiring a [`Repository`](crate::Repository).
#[derive(Debug, Clone, Default)]
pub struct RepoOptions {
    /// Branch to read from and push to (default: `master`).
    pub branch: Option<String>,
    /// Where to put the working copy of a cloned remote. When unset, an
    /// ephemeral directory is used and removed on release.
    pub workdir: Option<PathBuf>,
    /// Create what is missing: a local repository at a path that does not
    /// exist yet, or the branch when the remote does not have it.
    pub create: bool,
    /// Author name for commits.
    pub author: Option<String>,
    /// Author email for commits.
    pub email: Option<String>,
    /// Commit message; defaults to one naming the changed keys.
    pub message: Option<String>,
}

impl RepoOptions {
    /// Options from `GITKV_BRANCH`, `GITKV_WORKDIR`, `GITKV_AUTHOR_NAME` and
    /// `GITKV_AUTHOR_EMAIL`. Unset or blank variables are ignored.
    pub fn from_env() -> Self {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            branch: var("GITKV_BRANCH"),
            workdir: var("GITKV_WORKDIR").map(PathBuf::from),
            author: var("GITKV_AUTHOR_NAME"),
            email: var("GITKV_AUTHOR_EMAIL"),
            ..Default::default()
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// The configured branch, or [`DEFAULT_BRANCH`].
    pub fn branch_name(&self) -> &str {
        self.branch.as_deref().unwrap_or(DEFAULT_BRANCH)
    }

    /// Resolve the commit identity: explicit options first, then the
    /// repository's git config, then [`Signature::default`].
    pub(crate) fn signature(&self, config: Option<&git2::Config>) -> Signature {
        let fallback = Signature::default();
        let from_config = |key: &str| config.and_then(|c| c.get_string(key).ok());
        Signature {
            name: self
                .author
                .clone()
                .or_else(|| from_config("user.name"))
                .unwrap_or(fallback.name),
            email: self
                .email
                .clone()
                .or_else(|| from_config("user.email"))
                .unwrap_or(fallback.email),
        }
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Filters for [`Repository::history`](crate::Repository::history).
#[derive(Debug, Clone, Default)]
pub struct HistoryOptions {
    /// Maximum number of versions to return.
    pub limit: Option<usize>,
    /// Only commits at or after this time (seconds since epoch).
    pub since: Option<u64>,
    /// Only commits at or before this time (seconds since epoch).
    pub until: Option<u64>,
    /// Only commits whose message mentions the key.
    pub message_contains_key: bool,
}

/// One historical value of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVersion {
    pub commit_hash: String,
    pub blob_hash: String,
    pub message: String,
    pub time: u64,
    pub data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// TransactionReport
// ---------------------------------------------------------------------------

/// Outcome of a successful transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReport {
    /// The commit that now holds the staged keys, or `None` when the staged
    /// content matched what was already there.
    pub commit_hash: Option<String>,
    /// Keys included in the commit.
    pub keys: Vec<String>,
    /// Push attempts made (0 for local-only repositories, at most 2).
    pub attempts: u8,
    /// Whether the commit was rebased onto a newer remote tip.
    pub reconciled: bool,
    /// Whether the commit reached a remote.
    pub pushed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_python_strings() {
        assert_eq!("r".parse::<Mode>().unwrap(), Mode::Read);
        assert_eq!("rb".parse::<Mode>().unwrap(), Mode::Read);
        assert_eq!("r+".parse::<Mode>().unwrap(), Mode::ReadWrite);
        assert_eq!("rb+".parse::<Mode>().unwrap(), Mode::ReadWrite);
        assert_eq!("r+b".parse::<Mode>().unwrap(), Mode::ReadWrite);
        assert_eq!("w".parse::<Mode>().unwrap(), Mode::Write);
        assert_eq!("wb".parse::<Mode>().unwrap(), Mode::Write);
        assert_eq!("w+".parse::<Mode>().unwrap(), Mode::WriteRead);
        assert_eq!("ab".parse::<Mode>().unwrap(), Mode::Append);
        assert_eq!("a+".parse::<Mode>().unwrap(), Mode::AppendRead);
    }

    #[test]
    fn mode_rejects_malformed() {
        for bad in ["", "b", "+", "x", "rw", "r++", "rbb", "ra"] {
            assert!(
                matches!(bad.parse::<Mode>(), Err(Error::InvalidMode(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn mode_capabilities() {
        assert!(Mode::Read.can_read() && !Mode::Read.can_write());
        assert!(!Mode::Write.can_read() && Mode::Write.can_write());
        assert!(Mode::ReadWrite.requires_existing());
        assert!(!Mode::Append.requires_existing());
        assert!(Mode::Append.loads_existing());
        assert!(!Mode::WriteRead.loads_existing());
        assert!(Mode::AppendRead.appends() && Mode::AppendRead.can_read());
    }

    #[test]
    fn mode_display_round_trips() {
        for mode in [
            Mode::Read,
            Mode::ReadWrite,
            Mode::Write,
            Mode::WriteRead,
            Mode::Append,
            Mode::AppendRead,
        ] {
            assert_eq!(mode.to_string().parse::<Mode>().unwrap(), mode);
        }
    }

    #[test]
    fn options_default_branch() {
        let opts = RepoOptions::default();
        assert_eq!(opts.branch_name(), DEFAULT_BRANCH);
        assert_eq!(opts.with_branch("main").branch_name(), "main");
    }

    #[test]
    fn signature_prefers_explicit_options() {
        let opts = RepoOptions {
            author: Some("Ada".into()),
            ..Default::default()
        };
        let sig = opts.signature(None);
        assert_eq!(sig.name, "Ada");
        assert_eq!(sig.email, "gitkv@localhost");
    }
}
