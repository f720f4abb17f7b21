#![allow(dead_code)]

use extender_bridge::memory::{
    self, Error, ProcessMemory, Protection, WriteDiagnostics, WriteError, WriteMode,
};
use nix::unistd::Pid;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};

/// Recorded write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRecord {
    pub pid: Pid,
    pub address: usize,
    pub bytes: Vec<u8>,
    pub mode: WriteMode,
}

/// One-shot failure of the next write at an address.
#[derive(Clone, Copy, Debug)]
enum WriteFault {
    /// Range rejected before anything is written.
    Region,
    /// Only the first byte lands, then the OS reports an error.
    Partial,
    /// All bytes land, page protection is found changed afterwards.
    ProtectionRestore,
}

#[derive(Default)]
struct State {
    bytes: HashMap<usize, u8>,
    unreadable: HashSet<usize>,
    read_only: HashSet<usize>,
    faults: HashMap<usize, WriteFault>,
    writes: Vec<WriteRecord>,
}

/// In-memory target process: byte map keyed by address.
#[derive(Default, Clone)]
pub struct FakeMemory {
    state: Arc<Mutex<State>>,
}

impl FakeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> Arc<dyn ProcessMemory> {
        Arc::new(self.clone())
    }

    pub fn poke(&self, address: usize, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        for (i, b) in bytes.iter().enumerate() {
            state.bytes.insert(address + i, *b);
        }
    }

    pub fn peek(&self, address: usize, len: usize) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        (address..address + len)
            .map(|a| state.bytes.get(&a).copied().unwrap_or(0))
            .collect()
    }

    /// Make reads and writes at `address` fail.
    pub fn make_unreadable(&self, address: usize) {
        self.state.lock().unwrap().unreadable.insert(address);
    }

    /// Make data writes at `address` fail, patch writes still succeed.
    pub fn make_read_only(&self, address: usize) {
        self.state.lock().unwrap().read_only.insert(address);
    }

    /// Reject the next write at `address` before any byte is written.
    pub fn make_region_fail(&self, address: usize) {
        self.inject(address, WriteFault::Region);
    }

    /// Let the next write at `address` land only its first byte, then fail.
    pub fn make_write_fail(&self, address: usize) {
        self.inject(address, WriteFault::Partial);
    }

    /// Let the next patch write at `address` land, then report changed protection.
    pub fn make_restore_fail(&self, address: usize) {
        self.inject(address, WriteFault::ProtectionRestore);
    }

    fn inject(&self, address: usize, fault: WriteFault) {
        self.state.lock().unwrap().faults.insert(address, fault);
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().unwrap().writes.clone()
    }
}

impl ProcessMemory for FakeMemory {
    fn read(&self, pid: Pid, address: usize, len: usize) -> Result<Vec<u8>, Error> {
        memory::validate_target(pid, address, len)?;
        if self.state.lock().unwrap().unreadable.contains(&address) {
            return Err(Error::Unmapped(address));
        }
        Ok(self.peek(address, len))
    }

    fn write(
        &self,
        pid: Pid,
        address: usize,
        bytes: &[u8],
        mode: WriteMode,
    ) -> Result<WriteDiagnostics, WriteError> {
        let mut diagnostics = WriteDiagnostics::new(mode, bytes.len());
        if let Err(error) = memory::validate_target(pid, address, bytes.len()) {
            return Err(WriteError { diagnostics, error });
        }

        let mut state = self.state.lock().unwrap();
        if state.unreadable.contains(&address) {
            return Err(WriteError {
                diagnostics,
                error: Error::Unmapped(address),
            });
        }

        let protection = Protection {
            read: true,
            write: !state.read_only.contains(&address),
            exec: false,
        };
        diagnostics.old_protect = Some(protection);
        if mode == WriteMode::Data && !protection.write {
            return Err(WriteError {
                diagnostics,
                error: Error::NotWritable {
                    address,
                    protection,
                },
            });
        }
        if mode == WriteMode::Patch {
            diagnostics.restore_protect_ok = Some(true);
        }

        let fault = state.faults.remove(&address);
        let landed = match fault {
            Some(WriteFault::Region) => {
                return Err(WriteError {
                    diagnostics,
                    error: Error::RegionBoundary {
                        address,
                        len: bytes.len(),
                    },
                });
            }
            Some(WriteFault::Partial) => &bytes[..1],
            _ => bytes,
        };
        for (i, b) in landed.iter().enumerate() {
            state.bytes.insert(address + i, *b);
        }
        match fault {
            Some(WriteFault::Partial) => {
                return Err(WriteError {
                    diagnostics,
                    error: Error::Write {
                        address,
                        source: io::Error::from(io::ErrorKind::PermissionDenied),
                    },
                });
            }
            Some(WriteFault::ProtectionRestore) => {
                diagnostics.restore_protect_ok = Some(false);
                return Err(WriteError {
                    diagnostics,
                    error: Error::ProtectionRestore {
                        address,
                        expected: protection,
                        found: Protection {
                            exec: true,
                            ..protection
                        },
                    },
                });
            }
            _ => {}
        }

        state.writes.push(WriteRecord {
            pid,
            address,
            bytes: bytes.to_vec(),
            mode,
        });
        Ok(diagnostics)
    }
}
