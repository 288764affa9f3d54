//! SFTP (SSH File Transfer Protocol) server implementation.
//!
//! This module implements the server side of SFTP v3, the most widely
//! supported version.
//!
//! # Architecture
//!
//! SFTP runs as an SSH subsystem over an SSH channel. The SSH transport is
//! out of scope here: the caller hands [`serve_channel`] an
//! already-established duplex byte stream plus a [`Vfs`] backend, and the
//! session loop speaks SFTP on it until the channel closes.
//!
//! 1. **Wire codec** ([`message`], [`wire`]) - Packet framing and typed field parsing
//! 2. **Attribute model** ([`attr`]) - Flag-gated file metadata on and off the wire
//! 3. **Handle table** ([`handle`]) - Opaque handle strings for open files and directories
//! 4. **VFS boundary** ([`vfs`]) - The abstract storage contract
//! 5. **Session loop** ([`server`]) - Per-channel request dispatcher
//!
//! # Protocol Flow
//!
//! ```text
//! Client                          Server
//!   |                               |
//!   |-- SSH_FXP_INIT -------------->|
//!   |<- SSH_FXP_VERSION ------------|
//!   |                               |
//!   |-- SSH_FXP_OPEN -------------->|
//!   |<- SSH_FXP_HANDLE -------------|
//!   |                               |
//!   |-- SSH_FXP_READ -------------->|
//!   |<- SSH_FXP_DATA ---------------|
//!   |                               |
//!   |-- SSH_FXP_CLOSE ------------->|
//!   |<- SSH_FXP_STATUS -------------|
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use skiff_proto::sftp::{serve_channel, LocalFs};
//!
//! # async fn example(channel: tokio::net::TcpStream) -> skiff_platform::SkiffResult<()> {
//! let vfs = LocalFs::new("/srv/files");
//! serve_channel(channel, &vfs).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - [SFTP Draft v3](https://datatracker.ietf.org/doc/html/draft-ietf-secsh-filexfer-02) - Most common version
//! - [SFTP Draft v6](https://datatracker.ietf.org/doc/html/draft-ietf-secsh-filexfer-13) - Latest draft

pub mod attr;
pub mod handle;
#[cfg(unix)]
pub mod localfs;
pub mod longname;
pub mod message;
pub mod recode;
pub mod server;
pub mod vfs;
pub mod wire;

pub use attr::{Attr, AttrFlags, FileKind, FileMode, NamedAttr};
pub use handle::HandleTable;
#[cfg(unix)]
pub use localfs::LocalFs;
pub use message::{MessageType, StatusCode, SFTP_VERSION};
pub use server::{is_sftp_subsystem, serve_channel};
pub use vfs::{Dir, EmptyFs, File, FileOpenFlags, SysType, Vfs};
