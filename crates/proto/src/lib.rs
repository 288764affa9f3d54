//! Protocol implementations for the Skiff file-transfer ecosystem.
//!
//! This crate provides the server side of the SSH File Transfer Protocol:
//!
//! - **SFTP** (SSH File Transfer Protocol, version 3) - server core driving
//!   one subsystem channel against a pluggable virtual file system
//!
//! # Features
//!
//! - `sftp` (default) - SFTP version 3 server support
//!
//! # Example
//!
//! ```rust,no_run
//! use skiff_proto::sftp::{serve_channel, EmptyFs};
//!
//! # async fn example(channel: tokio::io::DuplexStream) -> skiff_platform::SkiffResult<()> {
//! // `channel` is an already-established SSH subsystem channel.
//! serve_channel(channel, &EmptyFs).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - [SFTP Draft v3](https://datatracker.ietf.org/doc/html/draft-ietf-secsh-filexfer-02) - The implemented protocol revision

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(feature = "sftp")]
pub mod sftp;
