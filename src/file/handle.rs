//! Read handles on log files.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

use super::FaultInjector;

/// One open, read-only log file.
///
/// Reads are positional; the seek and read happen under one lock so
/// concurrent readers sharing a handle do not interleave.
#[derive(Debug)]
pub struct FileHandle {
    file_number: u32,
    path: PathBuf,
    file: Mutex<File>,
    /// Header was written by an older log version
    old_header_version: bool,
    faults: Arc<dyn FaultInjector>,
}

impl FileHandle {
    pub(crate) fn new(
        file_number: u32,
        path: PathBuf,
        file: File,
        old_header_version: bool,
        faults: Arc<dyn FaultInjector>,
    ) -> Self {
        Self {
            file_number,
            path,
            file: Mutex::new(file),
            old_header_version,
            faults,
        }
    }

    pub fn file_number(&self) -> u32 {
        self.file_number
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_old_header_version(&self) -> bool {
        self.old_header_version
    }

    /// Current length of the file on disk.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read into `buf` starting at `offset`, stopping early only at end of file.
    ///
    /// Returns the number of bytes read.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.faults
            .before_read(self.file_number, offset, buf.len())?;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}
