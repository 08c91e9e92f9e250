//! Buffered, file-like access to one key.
//!
//! A [`KeyValueFile`] holds the key's content in memory. Reads, writes and
//! seeks only touch that buffer; [`close()`](KeyValueFile::close) stages the
//! buffer on the owning [`Repository`] if it was written to. A file dropped
//! without `close()` stages nothing.
//!
//! It implements [`std::io::Read`], [`std::io::Write`] and [`std::io::Seek`].

use std::io::{self, SeekFrom};

use crate::error::{into_io, Error, Result};
use crate::paths::normalize_key;
use crate::repo::Repository;
use crate::types::Mode;

/// In-memory view of one key, borrowed from a [`Repository`].
///
/// # Example
///
/// ```rust,no_run
/// use std::io::Write;
/// use gitkv::{Mode, RepoOptions, Repository};
///
/// let mut repo = Repository::acquire("/srv/git/data.git", RepoOptions::default())?;
/// let mut f = repo.open("log.txt", Mode::Append)?;
/// writeln!(f, "one more line")?;
/// f.close()?;
/// repo.release()?;
/// # Ok::<(), gitkv::Error>(())
/// ```
pub struct KeyValueFile<'a> {
    repo: &'a mut Repository,
    key: String,
    mode: Mode,
    buf: Vec<u8>,
    pos: usize,
    dirty: bool,
    closed: bool,
    message: Option<String>,
}

impl<'a> KeyValueFile<'a> {
    pub(crate) fn open(repo: &'a mut Repository, key: &str, mode: Mode) -> Result<Self> {
        if mode.can_write() {
            repo.ensure_writable()?;
        } else {
            repo.ensure_open()?;
        }
        let key = normalize_key(key)?;

        let buf = if mode.loads_existing() {
            // Writes staged earlier on this handle win over the working copy.
            let existing = match repo.staged(&key)? {
                Some(staged) => staged,
                None => match repo.read(&key) {
                    Ok(data) => Some(data),
                    Err(Error::KeyNotFound(_)) => None,
                    Err(e) => return Err(e),
                },
            };
            match existing {
                Some(data) => data,
                None if mode.requires_existing() => return Err(Error::key_not_found(key)),
                None => Vec::new(),
            }
        } else {
            Vec::new()
        };

        let pos = if mode.appends() { buf.len() } else { 0 };
        log::debug!("opened {} ({}, {} bytes)", key, mode, buf.len());
        Ok(Self {
            repo,
            key,
            mode,
            buf,
            pos,
            dirty: false,
            closed: false,
            message: None,
        })
    }

    fn require_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::use_after_close(self.key.as_str()))
        } else {
            Ok(())
        }
    }

    fn require_readable(&self) -> Result<()> {
        self.require_open()?;
        if !self.mode.can_read() {
            return Err(Error::permission(format!(
                "{} is open in mode '{}', not for reading",
                self.key, self.mode
            )));
        }
        Ok(())
    }

    fn require_writable(&self) -> Result<()> {
        self.require_open()?;
        if !self.mode.can_write() {
            return Err(Error::permission(format!(
                "{} is open in mode '{}', not for writing",
                self.key, self.mode
            )));
        }
        Ok(())
    }

    /// The (normalized) key this file is bound to.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Whether the buffer has been written to.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The whole buffer, regardless of the cursor.
    pub fn contents(&self) -> Result<&[u8]> {
        self.require_readable()?;
        Ok(&self.buf)
    }

    /// Read from the cursor to the end of the buffer.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        self.require_readable()?;
        let start = self.pos.min(self.buf.len());
        self.pos = self.buf.len();
        Ok(self.buf[start..].to_vec())
    }

    /// Write `data` at the cursor (or at the end, in append modes).
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.require_writable()?;
        if self.mode.appends() {
            self.pos = self.buf.len();
        }
        let end = self.pos + data.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        self.dirty = true;
        Ok(())
    }

    /// Message for the commit that will carry this file's change.
    pub fn set_commit_message(&mut self, message: impl Into<String>) -> Result<()> {
        self.require_open()?;
        self.message = Some(message.into());
        Ok(())
    }

    /// Stage the buffer on the repository if it was written to.
    ///
    /// After closing, every operation (including another `close`) fails
    /// with [`Error::UseAfterClose`].
    pub fn close(&mut self) -> Result<()> {
        self.require_open()?;
        if self.dirty {
            let data = std::mem::take(&mut self.buf);
            self.repo.stage(&self.key, data)?;
            if let Some(message) = self.message.take() {
                self.repo.set_message(message);
            }
        }
        self.closed = true;
        self.dirty = false;
        Ok(())
    }
}

impl io::Read for KeyValueFile<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.require_readable().map_err(into_io)?;
        let start = self.pos.min(self.buf.len());
        let n = out.len().min(self.buf.len() - start);
        out[..n].copy_from_slice(&self.buf[start..start + n]);
        self.pos = start + n;
        Ok(n)
    }
}

impl io::Write for KeyValueFile<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.write_bytes(data).map_err(into_io)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.require_open().map_err(into_io)
    }
}

impl io::Seek for KeyValueFile<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.require_open().map_err(into_io)?;
        let invalid = |msg: String| io::Error::new(io::ErrorKind::InvalidInput, msg);
        let (base, offset) = match pos {
            SeekFrom::Start(n) => {
                let n = i64::try_from(n)
                    .map_err(|_| invalid(format!("seek offset {} is too large", n)))?;
                (0i64, n)
            }
            SeekFrom::End(n) => (self.buf.len() as i64, n),
            SeekFrom::Current(n) => (self.pos as i64, n),
        };
        let target = base
            .checked_add(offset)
            .ok_or_else(|| invalid(format!("seek position {} + {} overflows", base, offset)))?;
        if target < 0 {
            return Err(invalid(format!("seek to a negative position ({})", target)));
        }
        self.pos = target as usize;
        Ok(self.pos as u64)
    }
}

impl Drop for KeyValueFile<'_> {
    fn drop(&mut self) {
        if !self.closed && self.dirty {
            log::warn!("{} dropped without close(); discarding unstaged changes", self.key);
        }
    }
}

impl std::fmt::Debug for KeyValueFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueFile")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("len", &self.buf.len())
            .field("pos", &self.pos)
            .field("dirty", &self.dirty)
            .field("closed", &self.closed)
            .finish()
    }
}
