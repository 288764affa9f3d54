//! The virtual file system boundary.
//!
//! The session loop consumes exactly this surface; backends may sit on the
//! local disk, a remote store, memory, or nothing at all ([`EmptyFs`]).
//! Paths are UTF-8 strings rooted at `/`; what they resolve to is the
//! backend's business.
//!
//! All fallible operations return [`std::io::Result`] so backends surface
//! OS errors directly; the session loop maps them onto SFTP status codes.

use crate::sftp::attr::{Attr, NamedAttr};
use async_trait::async_trait;
use std::io;

/// File open flags (SSH_FXF_*), OR-combined.
#[derive(Debug, Clone, Copy)]
pub struct FileOpenFlags(pub u32);

impl FileOpenFlags {
    /// SSH_FXF_READ - Open for reading
    pub const READ: u32 = 0x00000001;
    /// SSH_FXF_WRITE - Open for writing
    pub const WRITE: u32 = 0x00000002;
    /// SSH_FXF_APPEND - Force writes to append
    pub const APPEND: u32 = 0x00000004;
    /// SSH_FXF_CREAT - Create if doesn't exist
    pub const CREAT: u32 = 0x00000008;
    /// SSH_FXF_TRUNC - Truncate to 0 length
    pub const TRUNC: u32 = 0x00000010;
    /// SSH_FXF_EXCL - Fail if file exists
    pub const EXCL: u32 = 0x00000020;
}

/// `create_link` flag selecting a symbolic link instead of a hard link.
pub const LINK_SYMBOLIC: u32 = 0x00000001;

/// What kind of system backs the VFS, for long-name rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysType {
    /// Host without uid/gid semantics; owner and group render as `-`.
    Windows,
    /// Unix host; owners resolve through the user database.
    Unix,
    /// The VFS proxies another SFTP server; owners render numerically.
    RemoteSftp,
}

impl SysType {
    /// The kind matching the build platform.
    pub fn host() -> Self {
        if cfg!(windows) {
            SysType::Windows
        } else {
            SysType::Unix
        }
    }
}

/// An open file.
///
/// Reads and writes are positional with POSIX `pread`/`pwrite` semantics:
/// short reads are allowed, and a read of zero bytes into a non-empty
/// buffer means end-of-file.
#[async_trait]
pub trait File: Send {
    /// Releases the file.
    async fn close(&mut self) -> io::Result<()>;

    /// Reads up to `buf.len()` bytes at `offset`.
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Writes `buf` at `offset`.
    async fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize>;

    /// Stats the open file.
    async fn fstat(&mut self) -> io::Result<Attr>;

    /// Applies the flagged fields of `attr` to the open file.
    async fn fset_stat(&mut self, attr: &Attr) -> io::Result<()>;
}

/// An open directory.
#[async_trait]
pub trait Dir: Send {
    /// Releases the directory.
    async fn close(&mut self) -> io::Result<()>;

    /// Returns up to `max` entries.
    ///
    /// An empty batch is permitted; exhaustion is signalled with an
    /// [`io::ErrorKind::UnexpectedEof`] error, on the first call for
    /// backends that buffer everything up front.
    async fn readdir(&mut self, max: usize) -> io::Result<Vec<NamedAttr>>;
}

/// A virtual file system.
#[async_trait]
pub trait Vfs: Send + Sync {
    /// Opens a file. When `FileOpenFlags::CREAT` is set the creation mode
    /// comes from `attr.mode`, defaulting to 0o644.
    async fn open_file(&self, name: &str, flags: u32, attr: &Attr) -> io::Result<Box<dyn File>>;

    /// Opens a directory for enumeration.
    async fn open_dir(&self, name: &str) -> io::Result<Box<dyn Dir>>;

    /// Removes a file.
    async fn remove(&self, name: &str) -> io::Result<()>;

    /// Renames `old` to `new`.
    async fn rename(&self, old: &str, new: &str, flags: u32) -> io::Result<()>;

    /// Creates a directory; permission bits come from `attr.mode`.
    async fn mkdir(&self, name: &str, attr: &Attr) -> io::Result<()>;

    /// Removes a directory.
    async fn rmdir(&self, name: &str) -> io::Result<()>;

    /// Stats a path. `lstat` does not follow symlinks.
    async fn stat(&self, name: &str, lstat: bool) -> io::Result<Attr>;

    /// Applies the flagged fields of `attr` to a path.
    async fn set_stat(&self, name: &str, attr: &Attr) -> io::Result<()>;

    /// Reads the target of a symbolic link.
    async fn read_link(&self, name: &str) -> io::Result<String>;

    /// Creates a link at `name` pointing to `target`; symbolic when
    /// [`LINK_SYMBOLIC`] is set in `flags`, hard otherwise.
    async fn create_link(&self, name: &str, target: &str, flags: u32) -> io::Result<()>;

    /// Canonicalizes a path lexically. Never fails; empty and `"."` map to
    /// `"/"`.
    fn real_path(&self, name: &str) -> String {
        clean_path(name)
    }

    /// The system kind backing this VFS, for long-name rendering.
    fn sys_type(&self) -> SysType {
        SysType::host()
    }
}

/// Lexical path cleanup: collapses duplicate separators and `.`/`..`
/// segments without touching the backing store. Empty and `"."` map to
/// `"/"`.
pub fn clean_path(path: &str) -> String {
    if path.is_empty() || path == "." {
        return "/".to_string();
    }
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|c| *c != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            comp => parts.push(comp),
        }
    }
    let joined = parts.join("/");
    if rooted {
        format!("/{}", joined)
    } else if joined.is_empty() {
        "/".to_string()
    } else {
        joined
    }
}

fn denied() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "empty filesystem")
}

/// A VFS that fails every call.
///
/// Useful as a placeholder backend and for driving the session loop in
/// robustness tests. `real_path` still performs lexical cleanup.
pub struct EmptyFs;

#[async_trait]
impl Vfs for EmptyFs {
    async fn open_file(&self, _: &str, _: u32, _: &Attr) -> io::Result<Box<dyn File>> {
        Err(denied())
    }

    async fn open_dir(&self, _: &str) -> io::Result<Box<dyn Dir>> {
        Err(denied())
    }

    async fn remove(&self, _: &str) -> io::Result<()> {
        Err(denied())
    }

    async fn rename(&self, _: &str, _: &str, _: u32) -> io::Result<()> {
        Err(denied())
    }

    async fn mkdir(&self, _: &str, _: &Attr) -> io::Result<()> {
        Err(denied())
    }

    async fn rmdir(&self, _: &str) -> io::Result<()> {
        Err(denied())
    }

    async fn stat(&self, _: &str, _: bool) -> io::Result<Attr> {
        Err(denied())
    }

    async fn set_stat(&self, _: &str, _: &Attr) -> io::Result<()> {
        Err(denied())
    }

    async fn read_link(&self, _: &str) -> io::Result<String> {
        Err(denied())
    }

    async fn create_link(&self, _: &str, _: &str, _: u32) -> io::Result<()> {
        Err(denied())
    }
}
