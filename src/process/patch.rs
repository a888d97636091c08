//! Find-and-replace over a live process's writable memory.
//!
//! Each readable+writable region is read in fixed-size windows starting at
//! the region's start. Windows are matched independently, so an occurrence
//! that straddles a window boundary is not found.

use super::{MemoryRegion, RemoteMemory};
use crate::errors::{ConfigError, MemoryError, SidecarError};

/// 1 MiB
pub const DEFAULT_WINDOW: usize = 1 << 20;

pub struct Patcher<'a, M: RemoteMemory> {
    memory: &'a M,
    window: usize,
}

impl<'a, M: RemoteMemory> Patcher<'a, M> {
    pub fn new(memory: &'a M) -> Self {
        Self::with_window(memory, DEFAULT_WINDOW)
    }

    pub fn with_window(memory: &'a M, window: usize) -> Self {
        Self {
            memory,
            window: window.max(1),
        }
    }

    /// Overwrite every discoverable occurrence of `search` with `replace`.
    /// Returns how many occurrences were rewritten.
    pub fn patch(&self, search: &[u8], replace: &[u8]) -> Result<usize, SidecarError> {
        validate(search, replace)?;

        let mut patched = 0;
        for region in self.memory.regions()? {
            if !region.is_patchable() {
                continue;
            }
            patched += self.patch_region(&region, search, replace)?;
        }
        Ok(patched)
    }

    fn patch_region(
        &self,
        region: &MemoryRegion,
        search: &[u8],
        replace: &[u8],
    ) -> Result<usize, MemoryError> {
        let mut buf = vec![0u8; self.window];
        let mut patched = 0;
        let mut offset = region.start;

        while offset < region.end {
            let len = (region.end - offset).min(self.window as u64) as usize;
            let window = &mut buf[..len];

            let n = self.memory.read_at(window, offset)?;
            if n != len {
                return Err(MemoryError::TransferMismatch {
                    addr: offset,
                    expected: len,
                    actual: n,
                });
            }

            let Some(index) = find(window, search) else {
                offset += len as u64;
                continue;
            };

            let found = offset + index as u64;
            let n = self.memory.write_at(replace, found)?;
            if n != replace.len() {
                return Err(MemoryError::TransferMismatch {
                    addr: found,
                    expected: replace.len(),
                    actual: n,
                });
            }
            tracing::debug!("patched occurrence at {:#x}", found);
            patched += 1;
            // Same window again: there may be another occurrence after this one.
        }

        Ok(patched)
    }
}

/// Redirect `search` to `replace` inside the process `pid`.
pub fn patch_process(pid: i32, search: &[u8], replace: &[u8]) -> Result<usize, SidecarError> {
    let process = super::Process::new(pid);
    Patcher::new(&process).patch(search, replace)
}

fn validate(search: &[u8], replace: &[u8]) -> Result<(), ConfigError> {
    if search.len() != replace.len() {
        return Err(ConfigError::LengthMismatch {
            search: String::from_utf8_lossy(search).into_owned(),
            replace: String::from_utf8_lossy(replace).into_owned(),
        });
    }
    // An identical replacement would be found again in the same window forever.
    if search.is_empty() || search == replace {
        return Err(ConfigError::InvalidPattern);
    }
    Ok(())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|candidate| candidate == needle)
}
