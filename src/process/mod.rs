//! Cross-process memory access for a live target process.
//!
//! [`maps`] enumerates the target's mapped regions from `/proc/<pid>/maps`,
//! [`patch`] uses those regions plus positional reads/writes to rewrite a
//! fixed byte pattern in place.

pub mod maps;
pub mod patch;

use bitflags::bitflags;

use crate::errors::MemoryError;

bitflags! {
    /// Permission column of a maps entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u8 {
        const READ    = 0b00001;
        const WRITE   = 0b00010;
        const EXECUTE = 0b00100;
        const SHARED  = 0b01000;
        const PRIVATE = 0b10000;
    }
}

/// One mapped region as reported by the kernel at scan time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: u64,
    pub end: u64,
    pub permissions: Permissions,
    pub offset: u64,
    pub device: String,
    pub inode: u64,
    pub path: Option<String>,
}

impl MemoryRegion {
    /// Only regions that are both readable and writable are patch candidates.
    pub fn is_patchable(&self) -> bool {
        self.permissions
            .contains(Permissions::READ | Permissions::WRITE)
    }
}

/// Positional access to another process's address space.
///
/// Both calls return the number of bytes actually transferred; callers
/// decide whether a short transfer is an error.
pub trait RemoteMemory {
    fn regions(&self) -> Result<Vec<MemoryRegion>, MemoryError>;
    fn read_at(&self, buf: &mut [u8], addr: u64) -> Result<usize, MemoryError>;
    fn write_at(&self, buf: &[u8], addr: u64) -> Result<usize, MemoryError>;
}

/// A live process addressed by pid, accessed with
/// `process_vm_readv`/`process_vm_writev`.
#[derive(Debug, Clone, Copy)]
pub struct Process {
    pid: i32,
}

impl Process {
    pub fn new(pid: i32) -> Self {
        Self { pid }
    }
}

impl RemoteMemory for Process {
    fn regions(&self) -> Result<Vec<MemoryRegion>, MemoryError> {
        maps::scan(self.pid)
    }

    fn read_at(&self, buf: &mut [u8], addr: u64) -> Result<usize, MemoryError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let local_iov = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        };
        let remote_iov = libc::iovec {
            iov_base: addr as *mut libc::c_void,
            iov_len: buf.len(),
        };
        // SAFETY: the local iovec covers exactly `buf`, which we borrow mutably
        // for the duration of the call. The remote side is validated by the kernel.
        let n = unsafe { libc::process_vm_readv(self.pid, &local_iov, 1, &remote_iov, 1, 0) };
        if n < 0 {
            return Err(MemoryError::Read {
                addr,
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(n as usize)
    }

    fn write_at(&self, buf: &[u8], addr: u64) -> Result<usize, MemoryError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let local_iov = libc::iovec {
            iov_base: buf.as_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        };
        let remote_iov = libc::iovec {
            iov_base: addr as *mut libc::c_void,
            iov_len: buf.len(),
        };
        // SAFETY: the kernel only reads from the local iovec, which covers `buf`.
        let n = unsafe { libc::process_vm_writev(self.pid, &local_iov, 1, &remote_iov, 1, 0) };
        if n < 0 {
            return Err(MemoryError::Write {
                addr,
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(n as usize)
    }
}
