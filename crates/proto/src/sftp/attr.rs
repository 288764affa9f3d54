//! SFTP file attributes and mode mapping.
//!
//! The ATTR record carries a flag bitset followed by the fields the flags
//! announce, in a fixed order. Decoding reads a field only when its flag is
//! set and encoding emits fields under the same gating, so a parsed record
//! re-encodes to the identical bytes.
//!
//! Permissions travel as POSIX `st_mode` bits; [`FileMode`] is the generic
//! in-memory form and [`FileMode::to_sftp`]/[`FileMode::from_sftp`] are
//! mutual inverses over the representable set.

use crate::sftp::wire::{PacketBuilder, Parser};
use skiff_platform::{SkiffError, SkiffResult};

/// File attribute flags (SSH_FILEXFER_ATTR_*).
#[derive(Debug, Clone, Copy)]
pub struct AttrFlags(pub u32);

impl AttrFlags {
    /// SSH_FILEXFER_ATTR_SIZE
    pub const SIZE: u32 = 0x00000001;
    /// SSH_FILEXFER_ATTR_UIDGID
    pub const UIDGID: u32 = 0x00000002;
    /// SSH_FILEXFER_ATTR_PERMISSIONS
    pub const PERMISSIONS: u32 = 0x00000004;
    /// SSH_FILEXFER_ATTR_ACMODTIME
    pub const ACMODTIME: u32 = 0x00000008;
    /// SSH_FILEXFER_ATTR_EXTENDED
    pub const EXTENDED: u32 = 0x80000000;
}

/// Upper bound on extended attribute pairs in one ATTR record.
pub const MAX_EXTENDED: u32 = 0xFF;

// POSIX mode bits as they appear on the SFTP wire. These values are fixed
// by the protocol, independent of the host platform.
/// File type bit mask.
pub const S_IFMT: u32 = 0o170000;
/// Socket.
pub const S_IFSOCK: u32 = 0o140000;
/// Symbolic link.
pub const S_IFLNK: u32 = 0o120000;
/// Regular file.
pub const S_IFREG: u32 = 0o100000;
/// Block device.
pub const S_IFBLK: u32 = 0o060000;
/// Directory.
pub const S_IFDIR: u32 = 0o040000;
/// Character device.
pub const S_IFCHR: u32 = 0o020000;
/// FIFO.
pub const S_IFIFO: u32 = 0o010000;
/// Set-user-ID.
pub const S_ISUID: u32 = 0o004000;
/// Set-group-ID.
pub const S_ISGID: u32 = 0o002000;
/// Sticky bit.
pub const S_ISVTX: u32 = 0o001000;

/// File type class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileKind {
    /// Regular file
    #[default]
    Regular,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Character device
    CharDevice,
    /// Block device
    BlockDevice,
    /// Socket
    Socket,
    /// FIFO / named pipe
    Fifo,
}

/// Generic file mode: type class, permission bits, and the three special
/// bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileMode {
    /// File type class
    pub kind: FileKind,
    /// Permission bits (0o777)
    pub perm: u32,
    /// Set-user-ID bit
    pub setuid: bool,
    /// Set-group-ID bit
    pub setgid: bool,
    /// Sticky bit
    pub sticky: bool,
}

impl FileMode {
    /// Default file permissions (0644 = rw-r--r--)
    pub const DEFAULT_FILE: u32 = 0o644;
    /// Default directory permissions (0755 = rwxr-xr-x)
    pub const DEFAULT_DIR: u32 = 0o755;

    /// Creates a mode with the given type and permission bits.
    pub fn new(kind: FileKind, perm: u32) -> Self {
        Self {
            kind,
            perm: perm & 0o777,
            ..Self::default()
        }
    }

    /// Encodes this mode as SFTP/POSIX `st_mode` bits.
    pub fn to_sftp(self) -> u32 {
        let mut bits = match self.kind {
            FileKind::Regular => S_IFREG,
            FileKind::Directory => S_IFDIR,
            FileKind::Symlink => S_IFLNK,
            FileKind::CharDevice => S_IFCHR,
            FileKind::BlockDevice => S_IFBLK,
            FileKind::Socket => S_IFSOCK,
            FileKind::Fifo => S_IFIFO,
        };
        if self.setuid {
            bits |= S_ISUID;
        }
        if self.setgid {
            bits |= S_ISGID;
        }
        if self.sticky {
            bits |= S_ISVTX;
        }
        bits | (self.perm & 0o777)
    }

    /// Decodes SFTP/POSIX `st_mode` bits.
    ///
    /// An unrecognized type field decodes as a regular file, matching how
    /// clients treat modes without type bits.
    pub fn from_sftp(mode: u32) -> Self {
        let kind = match mode & S_IFMT {
            S_IFDIR => FileKind::Directory,
            S_IFLNK => FileKind::Symlink,
            S_IFCHR => FileKind::CharDevice,
            S_IFBLK => FileKind::BlockDevice,
            S_IFSOCK => FileKind::Socket,
            S_IFIFO => FileKind::Fifo,
            _ => FileKind::Regular,
        };
        Self {
            kind,
            perm: mode & 0o777,
            setuid: mode & S_ISUID != 0,
            setgid: mode & S_ISGID != 0,
            sticky: mode & S_ISVTX != 0,
        }
    }

    /// Renders the 10-character `ls -l` mode string, e.g. `-rwxr-xr-t`.
    pub fn render(&self) -> String {
        let type_char = match self.kind {
            FileKind::Directory => 'd',
            FileKind::Symlink => 'l',
            FileKind::BlockDevice => 'b',
            FileKind::CharDevice => 'c',
            FileKind::Socket => 's',
            FileKind::Fifo => 'p',
            FileKind::Regular => '-',
        };

        let mut out = String::with_capacity(10);
        out.push(type_char);

        let rwx = |out: &mut String, shift: u32, special: bool, set_char: char, unset_char: char| {
            out.push(if self.perm & (0o4 << shift) != 0 { 'r' } else { '-' });
            out.push(if self.perm & (0o2 << shift) != 0 { 'w' } else { '-' });
            let exec = self.perm & (0o1 << shift) != 0;
            out.push(match (exec, special) {
                (true, true) => set_char,
                (false, true) => unset_char,
                (true, false) => 'x',
                (false, false) => '-',
            });
        };

        rwx(&mut out, 6, self.setuid, 's', 'S');
        rwx(&mut out, 3, self.setgid, 's', 'S');
        rwx(&mut out, 0, self.sticky, 't', 'T');
        out
    }
}

/// File attributes as carried by ATTR records.
///
/// `flags` governs which fields are meaningful; the others keep their
/// default values and never touch the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attr {
    /// Attribute flag bitset (SSH_FILEXFER_ATTR_*)
    pub flags: u32,
    /// File size in bytes
    pub size: u64,
    /// User ID
    pub uid: u32,
    /// Group ID
    pub gid: u32,
    /// File mode
    pub mode: FileMode,
    /// Access time (Unix seconds)
    pub atime: u32,
    /// Modification time (Unix seconds)
    pub mtime: u32,
    /// Extended (key, value) pairs
    pub extended: Vec<(String, String)>,
}

impl Attr {
    /// Parses an ATTR record from the request payload.
    ///
    /// Fails when a flagged field is missing or the extended pair count
    /// exceeds [`MAX_EXTENDED`].
    pub fn parse(p: &mut Parser<'_>) -> SkiffResult<Self> {
        let mut attr = Attr {
            flags: p.read_u32()?,
            ..Attr::default()
        };
        if attr.flags & AttrFlags::SIZE != 0 {
            attr.size = p.read_u64()?;
        }
        if attr.flags & AttrFlags::UIDGID != 0 {
            attr.uid = p.read_u32()?;
            attr.gid = p.read_u32()?;
        }
        if attr.flags & AttrFlags::PERMISSIONS != 0 {
            attr.mode = FileMode::from_sftp(p.read_u32()?);
        }
        if attr.flags & AttrFlags::ACMODTIME != 0 {
            attr.atime = p.read_u32()?;
            attr.mtime = p.read_u32()?;
        }
        if attr.flags & AttrFlags::EXTENDED != 0 {
            let count = p.read_u32()?;
            if count > MAX_EXTENDED {
                return Err(SkiffError::Protocol(format!(
                    "too many extended attributes: {}",
                    count
                )));
            }
            attr.extended.reserve(count as usize);
            for _ in 0..count {
                let key = p.read_string()?;
                let value = p.read_string()?;
                attr.extended.push((key, value));
            }
        }
        Ok(attr)
    }

    /// Encodes this record onto a response packet: flags first, then the
    /// flagged fields in wire order.
    pub fn encode(&self, b: &mut PacketBuilder) {
        b.put_u32(self.flags);
        if self.flags & AttrFlags::SIZE != 0 {
            b.put_u64(self.size);
        }
        if self.flags & AttrFlags::UIDGID != 0 {
            b.put_u32(self.uid);
            b.put_u32(self.gid);
        }
        if self.flags & AttrFlags::PERMISSIONS != 0 {
            b.put_u32(self.mode.to_sftp());
        }
        if self.flags & AttrFlags::ACMODTIME != 0 {
            b.put_u32(self.atime);
            b.put_u32(self.mtime);
        }
        if self.flags & AttrFlags::EXTENDED != 0 {
            b.put_u32(self.extended.len() as u32);
            for (key, value) in &self.extended {
                b.put_str(key);
                b.put_str(value);
            }
        }
    }
}

/// A directory entry: attributes plus the entry name.
#[derive(Debug, Clone, Default)]
pub struct NamedAttr {
    /// Entry name, without any leading path
    pub name: String,
    /// Entry attributes
    pub attr: Attr,
}
