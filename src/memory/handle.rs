use crate::memory::error::Error;
use nix::unistd::Pid;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(super) enum Access {
    Read,
    ReadWrite,
}

/// Open `/proc/<pid>/mem` file of a target process.
///
/// Handle lives only for a single memory operation and closed when dropped,
/// so every exit path (including early error returns) releases it.
pub(super) struct ProcessHandle {
    pid: Pid,
    access: Access,
    file: File,
}

impl ProcessHandle {
    pub(super) fn open(pid: Pid, access: Access) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(access == Access::ReadWrite)
            .open(format!("/proc/{pid}/mem"))
            .map_err(|source| Error::Open { pid, source })?;
        log::trace!(target: "memory", "acquire {access:?} handle for process {pid}");

        Ok(Self { pid, access, file })
    }

    /// Read exactly `len` bytes starting at `address`.
    pub(super) fn read_exact_at(&self, address: usize, len: usize) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; len];
        let mut read = 0;
        while read < len {
            let n = self
                .file
                .read_at(&mut buf[read..], (address + read) as u64)
                .map_err(|source| Error::Read { address, source })?;
            if n == 0 {
                return Err(Error::ShortRead {
                    address,
                    read,
                    expected: len,
                });
            }
            read += n;
        }

        Ok(buf)
    }

    pub(super) fn write_all_at(&self, address: usize, bytes: &[u8]) -> Result<(), Error> {
        debug_assert!(self.access == Access::ReadWrite);

        let mut written = 0;
        while written < bytes.len() {
            let n = self
                .file
                .write_at(&bytes[written..], (address + written) as u64)
                .map_err(|source| Error::Write { address, source })?;
            if n == 0 {
                return Err(Error::ShortWrite {
                    address,
                    written,
                    expected: bytes.len(),
                });
            }
            written += n;
        }

        Ok(())
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        log::trace!(target: "memory", "release {:?} handle for process {}", self.access, self.pid);
    }
}
