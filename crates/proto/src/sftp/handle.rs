//! The per-session handle table.
//!
//! Handles are opaque printable strings the server issues to the client:
//! a sentinel character (`f` for files, `d` for directories) followed by a
//! monotonically increasing hex counter. The sentinel routes close and
//! lookup without a second map consult. Handles are only valid within the
//! session that issued them.

use crate::sftp::vfs::{Dir, File};
use std::collections::HashMap;

/// Registry of open files and directories for one session.
///
/// Every handle in either map owns exactly one open resource, closed
/// before removal. [`close_all`](HandleTable::close_all) runs at session
/// teardown.
#[derive(Default)]
pub struct HandleTable {
    files: HashMap<String, Box<dyn File>>,
    dirs: HashMap<String, Box<dyn Dir>>,
    counter: u64,
}

impl HandleTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an open file and returns its handle.
    pub fn new_file(&mut self, file: Box<dyn File>) -> String {
        self.counter += 1;
        let handle = format!("f{:x}", self.counter);
        self.files.insert(handle.clone(), file);
        handle
    }

    /// Registers an open directory and returns its handle.
    pub fn new_dir(&mut self, dir: Box<dyn Dir>) -> String {
        self.counter += 1;
        let handle = format!("d{:x}", self.counter);
        self.dirs.insert(handle.clone(), dir);
        handle
    }

    /// Looks up an open file.
    pub fn file(&mut self, handle: &str) -> Option<&mut Box<dyn File>> {
        self.files.get_mut(handle)
    }

    /// Looks up an open directory.
    pub fn dir(&mut self, handle: &str) -> Option<&mut Box<dyn Dir>> {
        self.dirs.get_mut(handle)
    }

    /// Closes and removes one handle. Unknown handles are a silent no-op.
    pub async fn close_handle(&mut self, handle: &str) {
        match handle.as_bytes().first() {
            Some(b'f') => {
                if let Some(mut file) = self.files.remove(handle) {
                    let _ = file.close().await;
                }
            }
            Some(b'd') => {
                if let Some(mut dir) = self.dirs.remove(handle) {
                    let _ = dir.close().await;
                }
            }
            _ => {}
        }
    }

    /// Closes every open file and directory and resets the counter.
    pub async fn close_all(&mut self) {
        for (_, mut file) in self.files.drain() {
            let _ = file.close().await;
        }
        for (_, mut dir) in self.dirs.drain() {
            let _ = dir.close().await;
        }
        self.counter = 0;
    }

    /// Number of open files.
    pub fn n_files(&self) -> usize {
        self.files.len()
    }

    /// Number of open directories.
    pub fn n_dirs(&self) -> usize {
        self.dirs.len()
    }
}
