//! Cross-process memory primitive.
//!
//! Target memory is accessed through `/proc/<pid>/mem`. Data writes honor the
//! page protection of the target mapping. Patch writes go through the procfs
//! file, which overrides page protection for the duration of a single write
//! only; afterwards the mapping flags are re-read and compared with the flags
//! observed before the write, so the original protection is confirmed on every
//! path.

pub mod error;
mod handle;
mod region;

pub use error::{AddressError, Error, WriteError};

use handle::{Access, ProcessHandle};
use nix::unistd::Pid;
use std::fmt::{Display, Formatter};
use strum_macros::{Display as StrumDisplay, IntoStaticStr};

/// Page protection flags of a memory region.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Protection {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

impl Display for Protection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let flag = |set: bool, c: char| if set { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(self.read, 'r'),
            flag(self.write, 'w'),
            flag(self.exec, 'x')
        )
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, StrumDisplay, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum WriteMode {
    /// Plain write, target region must be writable.
    Data,
    /// Protection-overriding write with protection restore check.
    Patch,
}

/// Evidence collected during a single write.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct WriteDiagnostics {
    pub mode: WriteMode,
    pub old_protect: Option<Protection>,
    pub len: usize,
    /// `None` for data writes (nothing to restore).
    pub restore_protect_ok: Option<bool>,
}

impl WriteDiagnostics {
    pub fn new(mode: WriteMode, len: usize) -> Self {
        Self {
            mode,
            old_protect: None,
            len,
            restore_protect_ok: match mode {
                WriteMode::Data => None,
                WriteMode::Patch => Some(false),
            },
        }
    }

    /// Diagnostics as key-value pairs in the wire naming.
    pub fn entries(&self) -> [(&'static str, String); 4] {
        [
            ("writeMode", self.mode.to_string()),
            (
                "oldProtect",
                self.old_protect
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "n/a".to_string()),
            ),
            ("len", self.len.to_string()),
            (
                "restoreProtectOk",
                self.restore_protect_ok
                    .map(|ok| ok.to_string())
                    .unwrap_or_else(|| "n/a".to_string()),
            ),
        ]
    }
}

/// Memory of external processes.
pub trait ProcessMemory: Send + Sync {
    /// Read exactly `len` bytes at `address`.
    fn read(&self, pid: Pid, address: usize, len: usize) -> Result<Vec<u8>, Error>;

    /// Write `bytes` at `address` using the given write mode.
    fn write(
        &self,
        pid: Pid,
        address: usize,
        bytes: &[u8],
        mode: WriteMode,
    ) -> Result<WriteDiagnostics, WriteError>;
}

/// Check arguments of a memory operation before any system call.
pub fn validate_target(pid: Pid, address: usize, len: usize) -> Result<(), Error> {
    if pid.as_raw() <= 0 {
        return Err(Error::InvalidProcessId(pid.as_raw()));
    }
    if address == 0 {
        return Err(Error::NullAddress);
    }
    if len == 0 {
        return Err(Error::EmptyAccess);
    }
    Ok(())
}

/// Parse hexadecimal address with an optional `0x`/`0X` prefix.
pub fn parse_address(text: &str) -> Result<usize, AddressError> {
    if text.is_empty() {
        return Err(AddressError::Empty);
    }

    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    // from_str_radix accepts a leading sign, an address never has one
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AddressError::InvalidHex(text.to_string()));
    }

    usize::from_str_radix(digits, 16).map_err(|_| AddressError::InvalidHex(text.to_string()))
}

/// [`ProcessMemory`] implementation on top of procfs.
#[derive(Default, Clone, Copy, Debug)]
pub struct ProcMemory;

impl ProcMemory {
    fn write_data(
        &self,
        pid: Pid,
        address: usize,
        bytes: &[u8],
        diagnostics: &mut WriteDiagnostics,
    ) -> Result<(), Error> {
        let handle = ProcessHandle::open(pid, Access::ReadWrite)?;
        let protection = region::protection_at(pid, address, bytes.len())?;
        diagnostics.old_protect = Some(protection);
        if !protection.write {
            return Err(Error::NotWritable {
                address,
                protection,
            });
        }
        handle.write_all_at(address, bytes)
    }

    fn write_patch(
        &self,
        pid: Pid,
        address: usize,
        bytes: &[u8],
        diagnostics: &mut WriteDiagnostics,
    ) -> Result<(), Error> {
        let handle = ProcessHandle::open(pid, Access::ReadWrite)?;
        let original = region::protection_at(pid, address, bytes.len())?;
        diagnostics.old_protect = Some(original);

        let written = handle.write_all_at(address, bytes);

        // restore check runs whether or not the write went through
        let restored = match region::protection_at(pid, address, bytes.len()) {
            Ok(found) if found == original => Ok(()),
            Ok(found) => Err(Error::ProtectionRestore {
                address,
                expected: original,
                found,
            }),
            Err(err) => Err(Error::RestoreCheck {
                address,
                source: Box::new(err),
            }),
        };
        diagnostics.restore_protect_ok = Some(restored.is_ok());
        drop(handle);

        written?;
        restored
    }
}

impl ProcessMemory for ProcMemory {
    fn read(&self, pid: Pid, address: usize, len: usize) -> Result<Vec<u8>, Error> {
        validate_target(pid, address, len)?;
        let handle = ProcessHandle::open(pid, Access::Read)?;
        handle.read_exact_at(address, len)
    }

    fn write(
        &self,
        pid: Pid,
        address: usize,
        bytes: &[u8],
        mode: WriteMode,
    ) -> Result<WriteDiagnostics, WriteError> {
        let mut diagnostics = WriteDiagnostics::new(mode, bytes.len());
        let result = validate_target(pid, address, bytes.len()).and_then(|_| match mode {
            WriteMode::Data => self.write_data(pid, address, bytes, &mut diagnostics),
            WriteMode::Patch => self.write_patch(pid, address, bytes, &mut diagnostics),
        });

        match result {
            Ok(()) => {
                log::debug!(target: "memory", "{mode} write of {} bytes at {address:#X} (process {pid})", bytes.len());
                Ok(diagnostics)
            }
            Err(error) => Err(WriteError { diagnostics, error }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_address() {
        struct TestCase {
            input: &'static str,
            expected: Result<usize, AddressError>,
        }

        let cases = [
            TestCase {
                input: "0x1A",
                expected: Ok(26),
            },
            TestCase {
                input: "1A",
                expected: Ok(26),
            },
            TestCase {
                input: "0X7ffe0010",
                expected: Ok(0x7ffe0010),
            },
            TestCase {
                input: "0x1G",
                expected: Err(AddressError::InvalidHex("0x1G".to_string())),
            },
            TestCase {
                input: "",
                expected: Err(AddressError::Empty),
            },
            TestCase {
                input: "0x",
                expected: Err(AddressError::InvalidHex("0x".to_string())),
            },
            TestCase {
                input: "+1A",
                expected: Err(AddressError::InvalidHex("+1A".to_string())),
            },
            TestCase {
                input: " 1A",
                expected: Err(AddressError::InvalidHex(" 1A".to_string())),
            },
        ];

        for tc in cases {
            assert_eq!(parse_address(tc.input), tc.expected, "input: {:?}", tc.input);
        }
    }

    #[test]
    fn test_validation_precedes_system_calls() {
        let memory = ProcMemory;

        let err = memory.read(Pid::from_raw(0), 0x1000, 4).unwrap_err();
        assert!(matches!(err, Error::InvalidProcessId(0)));
        assert!(err.is_local());

        let err = memory.read(Pid::from_raw(1), 0, 4).unwrap_err();
        assert!(matches!(err, Error::NullAddress));

        let err = memory
            .write(Pid::from_raw(-5), 0x1000, &[1], WriteMode::Patch)
            .unwrap_err();
        assert!(matches!(err.error, Error::InvalidProcessId(-5)));
        assert_eq!(err.diagnostics.old_protect, None);
        assert_eq!(err.diagnostics.restore_protect_ok, Some(false));
    }

    #[test]
    fn test_write_diagnostics_entries() {
        let mut diagnostics = WriteDiagnostics::new(WriteMode::Patch, 4);
        diagnostics.old_protect = Some(Protection {
            read: true,
            write: false,
            exec: true,
        });
        diagnostics.restore_protect_ok = Some(true);

        assert_eq!(
            diagnostics.entries(),
            [
                ("writeMode", "patch".to_string()),
                ("oldProtect", "r-x".to_string()),
                ("len", "4".to_string()),
                ("restoreProtectOk", "true".to_string()),
            ]
        );

        let diagnostics = WriteDiagnostics::new(WriteMode::Data, 1);
        assert_eq!(diagnostics.entries()[1].1, "n/a");
        assert_eq!(diagnostics.entries()[3].1, "n/a");
    }

    #[test]
    fn test_target_untouched() {
        let protection = Protection {
            read: true,
            write: false,
            exec: false,
        };
        let io_err = || std::io::Error::from(std::io::ErrorKind::PermissionDenied);

        struct TestCase {
            error: Error,
            untouched: bool,
        }
        let cases = [
            TestCase {
                error: Error::NullAddress,
                untouched: true,
            },
            TestCase {
                error: Error::Maps {
                    pid: Pid::from_raw(1),
                    source: io_err(),
                },
                untouched: true,
            },
            TestCase {
                error: Error::NotWritable {
                    address: 0x1000,
                    protection,
                },
                untouched: true,
            },
            TestCase {
                error: Error::Write {
                    address: 0x1000,
                    source: io_err(),
                },
                untouched: false,
            },
            TestCase {
                error: Error::ShortWrite {
                    address: 0x1000,
                    written: 1,
                    expected: 4,
                },
                untouched: false,
            },
            TestCase {
                error: Error::ProtectionRestore {
                    address: 0x1000,
                    expected: protection,
                    found: Protection {
                        write: true,
                        ..protection
                    },
                },
                untouched: false,
            },
            TestCase {
                error: Error::RestoreCheck {
                    address: 0x1000,
                    source: Box::new(Error::Unmapped(0x1000)),
                },
                untouched: false,
            },
        ];

        for tc in cases {
            assert_eq!(tc.error.target_untouched(), tc.untouched, "{}", tc.error);
        }
    }
}
