use crate::memory::{Protection, WriteDiagnostics};
use nix::unistd::Pid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- local validation errors -----------------------------------
    #[error("invalid process id {0}")]
    InvalidProcessId(i32),
    #[error("invalid target address (null)")]
    NullAddress,
    #[error("invalid access length (zero bytes)")]
    EmptyAccess,

    // --------------------------------- procfs errors ---------------------------------------------
    #[error("open memory of process {pid}: {source}")]
    Open {
        pid: Pid,
        #[source]
        source: std::io::Error,
    },
    #[error("read memory maps of process {pid}: {source}")]
    Maps {
        pid: Pid,
        #[source]
        source: std::io::Error,
    },

    // --------------------------------- remote memory errors --------------------------------------
    #[error("address {0:#X} is not mapped")]
    Unmapped(usize),
    #[error("range {address:#X}+{len} spans more than one memory region")]
    RegionBoundary { address: usize, len: usize },
    #[error("region at {address:#X} is not writable ({protection})")]
    NotWritable {
        address: usize,
        protection: Protection,
    },
    #[error("read at {address:#X}: {source}")]
    Read {
        address: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("short read at {address:#X}: {read} of {expected} bytes")]
    ShortRead {
        address: usize,
        read: usize,
        expected: usize,
    },
    #[error("write at {address:#X}: {source}")]
    Write {
        address: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("short write at {address:#X}: {written} of {expected} bytes")]
    ShortWrite {
        address: usize,
        written: usize,
        expected: usize,
    },
    #[error("protection restore failed at {address:#X}: expected {expected}, found {found}")]
    ProtectionRestore {
        address: usize,
        expected: Protection,
        found: Protection,
    },
    #[error("protection check after write at {address:#X}: {source}")]
    RestoreCheck {
        address: usize,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Return true if error was produced before any system call was attempted.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Error::InvalidProcessId(_) | Error::NullAddress | Error::EmptyAccess
        )
    }

    /// Return true if error was produced before any byte could reach the target.
    ///
    /// Write failures and protection restore failures may leave the target
    /// partially or fully modified.
    pub fn target_untouched(&self) -> bool {
        self.is_local()
            || matches!(
                self,
                Error::Open { .. }
                    | Error::Maps { .. }
                    | Error::Unmapped(_)
                    | Error::RegionBoundary { .. }
                    | Error::NotWritable { .. }
                    | Error::Read { .. }
                    | Error::ShortRead { .. }
            )
    }
}

/// Failed write together with everything observed before the failure.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct WriteError {
    pub diagnostics: WriteDiagnostics,
    #[source]
    pub error: Error,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("empty address")]
    Empty,
    #[error("invalid hexadecimal address `{0}`")]
    InvalidHex(String),
}
