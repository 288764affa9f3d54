//! Local-filesystem VFS backend.
//!
//! Serves a directory tree rooted at a configured path. Client paths are
//! jailed to the root by lexical mangling; `..` anywhere in a path is
//! rejected outright.
//!
//! This backend is a working sample, not a hardened production jail:
//! symlinks inside the root can still point outside it.

use crate::sftp::attr::{Attr, AttrFlags, FileMode, NamedAttr};
use crate::sftp::vfs::{clean_path, Dir, File, FileOpenFlags, Vfs, LINK_SYMBOLIC};
use async_trait::async_trait;
use std::fs;
use std::io;
use std::os::unix::fs::{DirBuilderExt, FileExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::PathBuf;

/// A VFS serving a local directory tree.
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    /// Creates a backend rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn mangle(&self, path: &str) -> io::Result<PathBuf> {
        if path.contains("..") {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid path"));
        }
        Ok(self.root.join(path.trim_start_matches('/')))
    }
}

/// Converts file system metadata into an SFTP attribute record.
pub fn attr_from_metadata(meta: &fs::Metadata) -> Attr {
    Attr {
        flags: AttrFlags::SIZE | AttrFlags::UIDGID | AttrFlags::PERMISSIONS | AttrFlags::ACMODTIME,
        size: meta.len(),
        uid: meta.uid(),
        gid: meta.gid(),
        mode: FileMode::from_sftp(meta.mode()),
        atime: meta.atime().clamp(0, i64::from(u32::MAX)) as u32,
        mtime: meta.mtime().clamp(0, i64::from(u32::MAX)) as u32,
        extended: Vec::new(),
    }
}

/// An open local file.
pub struct LocalFile {
    file: fs::File,
}

#[async_trait]
impl File for LocalFile {
    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.file.read_at(buf, offset)
    }

    async fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        self.file.write_at(buf, offset)
    }

    async fn fstat(&mut self) -> io::Result<Attr> {
        Ok(attr_from_metadata(&self.file.metadata()?))
    }

    async fn fset_stat(&mut self, attr: &Attr) -> io::Result<()> {
        if attr.flags & AttrFlags::PERMISSIONS != 0 {
            self.file
                .set_permissions(fs::Permissions::from_mode(attr.mode.to_sftp() & 0o7777))?;
        }
        if attr.flags & AttrFlags::UIDGID != 0 {
            std::os::unix::fs::fchown(&self.file, Some(attr.uid), Some(attr.gid))?;
        }
        Ok(())
    }
}

/// An open local directory.
pub struct LocalDir {
    entries: fs::ReadDir,
}

#[async_trait]
impl Dir for LocalDir {
    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn readdir(&mut self, max: usize) -> io::Result<Vec<NamedAttr>> {
        let mut batch = Vec::new();
        for entry in self.entries.by_ref().take(max) {
            let entry = entry?;
            // Entry metadata does not follow symlinks, like lstat.
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            batch.push(NamedAttr {
                name: entry.file_name().to_string_lossy().into_owned(),
                attr: attr_from_metadata(&meta),
            });
        }
        if batch.is_empty() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(batch)
    }
}

#[async_trait]
impl Vfs for LocalFs {
    async fn open_file(&self, name: &str, flags: u32, attr: &Attr) -> io::Result<Box<dyn File>> {
        let path = self.mangle(name)?;
        let mut opts = fs::OpenOptions::new();
        opts.read(flags & FileOpenFlags::READ != 0);
        opts.write(flags & FileOpenFlags::WRITE != 0);
        opts.append(flags & FileOpenFlags::APPEND != 0);
        opts.truncate(flags & FileOpenFlags::TRUNC != 0);
        if flags & FileOpenFlags::CREAT != 0 {
            opts.create(true);
            let mode = if attr.flags & AttrFlags::PERMISSIONS != 0 {
                attr.mode.to_sftp() & 0o7777
            } else {
                FileMode::DEFAULT_FILE
            };
            opts.mode(mode);
        }
        if flags & FileOpenFlags::EXCL != 0 {
            opts.create_new(true);
        }
        let file = opts.open(path)?;
        Ok(Box::new(LocalFile { file }))
    }

    async fn open_dir(&self, name: &str) -> io::Result<Box<dyn Dir>> {
        let path = self.mangle(name)?;
        let entries = fs::read_dir(path)?;
        Ok(Box::new(LocalDir { entries }))
    }

    async fn remove(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.mangle(name)?)
    }

    async fn rename(&self, old: &str, new: &str, _flags: u32) -> io::Result<()> {
        fs::rename(self.mangle(old)?, self.mangle(new)?)
    }

    async fn mkdir(&self, name: &str, attr: &Attr) -> io::Result<()> {
        let mode = if attr.flags & AttrFlags::PERMISSIONS != 0 {
            attr.mode.to_sftp() & 0o7777
        } else {
            FileMode::DEFAULT_DIR
        };
        fs::DirBuilder::new().mode(mode).create(self.mangle(name)?)
    }

    async fn rmdir(&self, name: &str) -> io::Result<()> {
        fs::remove_dir_all(self.mangle(name)?)
    }

    async fn stat(&self, name: &str, lstat: bool) -> io::Result<Attr> {
        let path = self.mangle(name)?;
        let meta = if lstat {
            fs::symlink_metadata(path)?
        } else {
            fs::metadata(path)?
        };
        Ok(attr_from_metadata(&meta))
    }

    async fn set_stat(&self, name: &str, attr: &Attr) -> io::Result<()> {
        let path = self.mangle(name)?;
        if attr.flags & AttrFlags::PERMISSIONS != 0 {
            fs::set_permissions(&path, fs::Permissions::from_mode(attr.mode.to_sftp() & 0o7777))?;
        }
        if attr.flags & AttrFlags::UIDGID != 0 {
            std::os::unix::fs::chown(&path, Some(attr.uid), Some(attr.gid))?;
        }
        // Times are deliberately left untouched.
        Ok(())
    }

    async fn read_link(&self, name: &str) -> io::Result<String> {
        let target = fs::read_link(self.mangle(name)?)?;
        Ok(target.to_string_lossy().into_owned())
    }

    async fn create_link(&self, name: &str, target: &str, flags: u32) -> io::Result<()> {
        let link = self.mangle(name)?;
        let target = self.mangle(target)?;
        if flags & LINK_SYMBOLIC != 0 {
            std::os::unix::fs::symlink(target, link)
        } else {
            fs::hard_link(target, link)
        }
    }

    fn real_path(&self, name: &str) -> String {
        clean_path(name)
    }
}
