//! The per-channel SFTP session loop.
//!
//! [`serve_channel`] drives one subsystem channel: it reads packets until
//! the channel closes or a fatal error occurs, parses each as a typed
//! request, dispatches it to the VFS and/or the handle table, and writes a
//! typed response. Requests are served strictly sequentially, so pipelined
//! clients observe FIFO completion.
//!
//! Error policy:
//!
//! - Parse failures reply `SSH_FX_BAD_MESSAGE` and terminate the session.
//! - VFS failures map to `SSH_FX_FAILURE`, or `SSH_FX_NO_SUCH_FILE` for
//!   opens and unknown handles.
//! - Channel write failures are fatal.
//!
//! All handles opened during the session are closed when it ends, however
//! it ends.

use crate::sftp::attr::{Attr, NamedAttr};
use crate::sftp::handle::HandleTable;
use crate::sftp::longname;
use crate::sftp::message::{
    read_packet_header, MessageType, StatusCode, INIT_REPLY, SFTP_SUBSYSTEM,
};
use crate::sftp::recode;
use crate::sftp::vfs::{SysType, Vfs};
use crate::sftp::wire::{PacketBuilder, Parser};
use skiff_platform::{SkiffError, SkiffResult};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

/// Maximum concurrently open file handles per session.
pub const MAX_FILES: usize = 256;

/// SSH_FXP_READ lengths are clamped to this many bytes.
pub const MAX_READ_LEN: u32 = 64 * 1024;

/// Largest request payload the session will buffer. Larger frames
/// terminate the session.
pub const MAX_PACKET_LEN: usize = 64 * 1024;

/// Directory entries requested per SSH_FXP_READDIR.
pub const READDIR_BATCH: usize = 1024;

/// Checks whether an SSH channel request selects the sftp subsystem.
///
/// # Arguments
///
/// * `req_type` - The SSH request type string
/// * `payload` - The raw request payload
pub fn is_sftp_subsystem(req_type: &str, payload: &[u8]) -> bool {
    req_type == "subsystem" && payload == SFTP_SUBSYSTEM
}

/// Serves one SFTP session over an established subsystem channel.
///
/// Runs until the channel reaches end-of-file (clean return) or a fatal
/// protocol or I/O error occurs. Every handle the session opened is closed
/// before this returns.
///
/// # Arguments
///
/// * `channel` - The duplex byte stream of the subsystem channel
/// * `vfs` - The storage backend serving this session
pub async fn serve_channel<C>(channel: C, vfs: &dyn Vfs) -> SkiffResult<()>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, writer) = tokio::io::split(channel);
    let mut reader = BufReader::with_capacity(MAX_PACKET_LEN, reader);
    let mut session = Session {
        writer,
        vfs,
        handles: HandleTable::new(),
        sys: vfs.sys_type(),
    };
    let result = session.run(&mut reader).await;
    session.handles.close_all().await;
    result
}

struct Session<'a, W> {
    writer: W,
    vfs: &'a dyn Vfs,
    handles: HandleTable,
    sys: SysType,
}

impl<W: AsyncWrite + Unpin> Session<'_, W> {
    async fn run<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> SkiffResult<()> {
        let mut payload = Vec::new();
        let mut id: u32 = 0;
        loop {
            let (length, op) = match read_packet_header(reader).await? {
                Some(header) => header,
                // Channel end-of-file on a packet boundary.
                None => return Ok(()),
            };
            // The header length counts the op byte.
            let length = (length as usize).saturating_sub(1);
            debug!(op, length, "received sftp request");

            if length < 2 {
                debug!("sftp packet too short");
                let _ = self.write_status(id, StatusCode::BadMessage).await;
                return Err(SkiffError::Protocol("sftp packet too short".to_string()));
            }
            if length > MAX_PACKET_LEN {
                return Err(SkiffError::Protocol(format!(
                    "sftp packet of {} bytes exceeds the session buffer",
                    length
                )));
            }

            payload.resize(length, 0);
            reader
                .read_exact(&mut payload)
                .await
                .map_err(SkiffError::Io)?;
            let mut p = Parser::new(&payload);

            let op = match MessageType::from_u8(op) {
                Some(MessageType::Init) => {
                    self.send_raw(&INIT_REPLY).await?;
                    continue;
                }
                Some(op) => op,
                None => {
                    let _ = self.write_status(id, StatusCode::BadMessage).await;
                    return Err(SkiffError::Protocol(format!("unknown sftp op {}", op)));
                }
            };

            // Every request other than INIT begins with the request id.
            id = match p.read_u32() {
                Ok(v) => v,
                Err(e) => {
                    let _ = self.write_status(id, StatusCode::BadMessage).await;
                    return Err(e);
                }
            };

            if let Err(e) = self.dispatch(op, &mut p, id).await {
                // A protocol error at this point is a malformed request;
                // anything else is a dead channel.
                if matches!(e, SkiffError::Protocol(_)) {
                    let _ = self.write_status(id, StatusCode::BadMessage).await;
                }
                return Err(e);
            }
        }
    }

    async fn dispatch(&mut self, op: MessageType, p: &mut Parser<'_>, id: u32) -> SkiffResult<()> {
        match op {
            MessageType::Open => {
                let path = p.read_bytes()?;
                let flags = p.read_u32()?;
                let attr = Attr::parse(p)?;
                if self.handles.n_files() >= MAX_FILES {
                    debug!("file handle cap reached");
                    return self.write_status(id, StatusCode::PermissionDenied).await;
                }
                let path = recode::incoming(path);
                match self.vfs.open_file(&path, flags, &attr).await {
                    Ok(file) => {
                        let handle = self.handles.new_file(file);
                        self.write_handle(id, &handle).await
                    }
                    Err(e) => {
                        debug!(%path, error = %e, "open failed");
                        self.write_status(id, StatusCode::NoSuchFile).await
                    }
                }
            }
            MessageType::Close => {
                let handle = p.read_string()?;
                self.handles.close_handle(&handle).await;
                self.write_status(id, StatusCode::Ok).await
            }
            MessageType::Read => {
                let handle = p.read_string()?;
                let offset = p.read_u64()?;
                let length = p.read_u32()?.min(MAX_READ_LEN);
                let Some(file) = self.handles.file(&handle) else {
                    return self.write_status(id, StatusCode::NoSuchFile).await;
                };
                let mut buf = vec![0u8; length as usize];
                match file.read_at(&mut buf, offset).await {
                    Ok(n) if n > 0 => self.write_data(id, &buf[..n]).await,
                    Ok(_) => self.write_status(id, StatusCode::Eof).await,
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        self.write_status(id, StatusCode::Eof).await
                    }
                    Err(e) => {
                        debug!(error = %e, "read failed");
                        self.write_status(id, StatusCode::Failure).await
                    }
                }
            }
            MessageType::Write => {
                let handle = p.read_string()?;
                let offset = p.read_u64()?;
                let length = p.read_u32()? as usize;
                let data = p.read_raw(length)?;
                let Some(file) = self.handles.file(&handle) else {
                    return self.write_status(id, StatusCode::NoSuchFile).await;
                };
                match file.write_at(data, offset).await {
                    Ok(_) => self.write_status(id, StatusCode::Ok).await,
                    Err(e) => {
                        debug!(error = %e, "write failed");
                        self.write_status(id, StatusCode::Failure).await
                    }
                }
            }
            MessageType::LStat | MessageType::Stat => {
                let path = recode::incoming(p.read_bytes()?);
                match self.vfs.stat(&path, op == MessageType::LStat).await {
                    Ok(attr) => self.write_attr(id, &attr).await,
                    Err(e) => {
                        debug!(%path, error = %e, "stat failed");
                        self.write_status(id, StatusCode::Failure).await
                    }
                }
            }
            MessageType::FStat => {
                let handle = p.read_string()?;
                let Some(file) = self.handles.file(&handle) else {
                    return self.write_status(id, StatusCode::NoSuchFile).await;
                };
                match file.fstat().await {
                    Ok(attr) => self.write_attr(id, &attr).await,
                    Err(_) => self.write_status(id, StatusCode::Failure).await,
                }
            }
            MessageType::SetStat => {
                let path = recode::incoming(p.read_bytes()?);
                let attr = Attr::parse(p)?;
                match self.vfs.set_stat(&path, &attr).await {
                    Ok(()) => self.write_status(id, StatusCode::Ok).await,
                    Err(_) => self.write_status(id, StatusCode::Failure).await,
                }
            }
            MessageType::FSetStat => {
                let handle = p.read_string()?;
                let attr = Attr::parse(p)?;
                let Some(file) = self.handles.file(&handle) else {
                    return self.write_status(id, StatusCode::NoSuchFile).await;
                };
                match file.fset_stat(&attr).await {
                    Ok(()) => self.write_status(id, StatusCode::Ok).await,
                    Err(_) => self.write_status(id, StatusCode::Failure).await,
                }
            }
            MessageType::OpenDir => {
                let path = recode::incoming(p.read_bytes()?);
                match self.vfs.open_dir(&path).await {
                    Ok(dir) => {
                        let handle = self.handles.new_dir(dir);
                        self.write_handle(id, &handle).await
                    }
                    Err(e) => {
                        debug!(%path, error = %e, "opendir failed");
                        self.write_status(id, StatusCode::NoSuchFile).await
                    }
                }
            }
            MessageType::ReadDir => {
                let handle = p.read_string()?;
                let Some(dir) = self.handles.dir(&handle) else {
                    return self.write_status(id, StatusCode::NoSuchFile).await;
                };
                match dir.readdir(READDIR_BATCH).await {
                    Ok(entries) => self.write_name(id, &entries).await,
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        self.write_status(id, StatusCode::Eof).await?;
                        self.handles.close_handle(&handle).await;
                        Ok(())
                    }
                    Err(e) => {
                        debug!(error = %e, "readdir failed");
                        self.write_status(id, StatusCode::Failure).await
                    }
                }
            }
            MessageType::Remove => {
                let path = recode::incoming(p.read_bytes()?);
                match self.vfs.remove(&path).await {
                    Ok(()) => self.write_status(id, StatusCode::Ok).await,
                    Err(_) => self.write_status(id, StatusCode::Failure).await,
                }
            }
            MessageType::MkDir => {
                let path = recode::incoming(p.read_bytes()?);
                let attr = Attr::parse(p)?;
                match self.vfs.mkdir(&path, &attr).await {
                    Ok(()) => self.write_status(id, StatusCode::Ok).await,
                    Err(_) => self.write_status(id, StatusCode::Failure).await,
                }
            }
            MessageType::RmDir => {
                let path = recode::incoming(p.read_bytes()?);
                match self.vfs.rmdir(&path).await {
                    Ok(()) => self.write_status(id, StatusCode::Ok).await,
                    Err(_) => self.write_status(id, StatusCode::Failure).await,
                }
            }
            MessageType::RealPath => {
                let path = recode::incoming(p.read_bytes()?);
                let resolved = self.vfs.real_path(&path);
                self.write_name_only(id, &recode::outgoing(&resolved)).await
            }
            MessageType::Rename => {
                let old = recode::incoming(p.read_bytes()?);
                let new = recode::incoming(p.read_bytes()?);
                // Plain v3 RENAME carries no flags; posix-rename variants do.
                let flags = p.read_u32().unwrap_or(0);
                match self.vfs.rename(&old, &new, flags).await {
                    Ok(()) => self.write_status(id, StatusCode::Ok).await,
                    Err(_) => self.write_status(id, StatusCode::Failure).await,
                }
            }
            MessageType::ReadLink => {
                let path = recode::incoming(p.read_bytes()?);
                match self.vfs.read_link(&path).await {
                    Ok(target) => self.write_name_only(id, &recode::outgoing(&target)).await,
                    Err(_) => self.write_status(id, StatusCode::Failure).await,
                }
            }
            MessageType::Symlink => self.write_status(id, StatusCode::OpUnsupported).await,
            MessageType::Extended => {
                // Lenient by design: the fields a client actually sends here
                // vary, and a missing one only means the request is not ours.
                let ext_name = p.read_bytes().unwrap_or_default().to_vec();
                if ext_name == b"vendor-id" {
                    let vendor = p.read_string().unwrap_or_default();
                    let product = p.read_string().unwrap_or_default();
                    let version = p.read_string().unwrap_or_default();
                    let build = p.read_u64().unwrap_or(0);
                    debug!(%vendor, %product, %version, build, "client vendor-id");
                    self.write_status(id, StatusCode::Ok).await
                } else {
                    debug!(
                        extension = %String::from_utf8_lossy(&ext_name),
                        "unsupported extended request"
                    );
                    self.write_status(id, StatusCode::OpUnsupported).await
                }
            }
            MessageType::Version
            | MessageType::Init
            | MessageType::Status
            | MessageType::Handle
            | MessageType::Data
            | MessageType::Name
            | MessageType::Attrs
            | MessageType::ExtendedReply => {
                // Response types are never valid as requests.
                Err(SkiffError::Protocol(format!(
                    "unexpected sftp message {:?}",
                    op
                )))
            }
        }
    }

    async fn send(&mut self, b: PacketBuilder) -> SkiffResult<()> {
        self.send_raw(&b.finish()).await
    }

    async fn send_raw(&mut self, bytes: &[u8]) -> SkiffResult<()> {
        self.writer.write_all(bytes).await.map_err(SkiffError::Io)
    }

    async fn write_status(&mut self, id: u32, code: StatusCode) -> SkiffResult<()> {
        debug!(id, code = code as u32, "sending sftp status");
        let mut b = PacketBuilder::new(MessageType::Status);
        b.put_u32(id);
        b.put_u32(code as u32);
        b.put_u32(0); // error message
        b.put_u32(0); // language tag
        self.send(b).await
    }

    async fn write_handle(&mut self, id: u32, handle: &str) -> SkiffResult<()> {
        let mut b = PacketBuilder::new(MessageType::Handle);
        b.put_u32(id);
        b.put_str(handle);
        self.send(b).await
    }

    async fn write_data(&mut self, id: u32, data: &[u8]) -> SkiffResult<()> {
        let mut b = PacketBuilder::new(MessageType::Data);
        b.put_u32(id);
        b.put_bytes(data);
        self.send(b).await
    }

    async fn write_attr(&mut self, id: u32, attr: &Attr) -> SkiffResult<()> {
        let mut b = PacketBuilder::new(MessageType::Attrs);
        b.put_u32(id);
        attr.encode(&mut b);
        self.send(b).await
    }

    /// NAME response with a single entry whose filename and longname are
    /// both `path`, as REALPATH and READLINK replies want.
    async fn write_name_only(&mut self, id: u32, path: &[u8]) -> SkiffResult<()> {
        let mut b = PacketBuilder::new(MessageType::Name);
        b.put_u32(id);
        b.put_u32(1);
        b.put_bytes(path);
        b.put_bytes(path);
        b.put_u32(0); // attr flags
        self.send(b).await
    }

    async fn write_name(&mut self, id: u32, entries: &[NamedAttr]) -> SkiffResult<()> {
        let mut b = PacketBuilder::new(MessageType::Name);
        b.put_u32(id);
        b.put_u32(entries.len() as u32);
        for entry in entries {
            b.put_bytes(&recode::outgoing(&entry.name));
            b.put_str(&longname::format(entry, self.sys).await);
            entry.attr.encode(&mut b);
        }
        self.send(b).await
    }
}
