//! Parser for `/proc/<pid>/maps`.
//!
//! Nothing here is cached: mappings change while a process runs, so every
//! call reflects what the kernel reports right now.

use super::{MemoryRegion, Permissions};
use crate::errors::MemoryError;

/// Read and parse the current memory map of `pid`.
pub fn scan(pid: i32) -> Result<Vec<MemoryRegion>, MemoryError> {
    let content = std::fs::read_to_string(format!("/proc/{}/maps", pid))
        .map_err(|source| MemoryError::MapsUnreadable { pid, source })?;
    parse_maps(&content)
}

/// Parse maps content, in kernel order. Any malformed line fails the whole scan.
pub fn parse_maps(content: &str) -> Result<Vec<MemoryRegion>, MemoryError> {
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Result<MemoryRegion, MemoryError> {
    let fail = |reason: String| MemoryError::MapsParse {
        line: line.to_string(),
        reason,
    };

    let mut rest = line;
    let mut field = |name: &str| {
        let current: &str = rest;
        let trimmed = current.trim_start();
        let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        let (value, remainder) = trimmed.split_at(end);
        rest = remainder;
        if value.is_empty() {
            Err(format!("missing {} field", name))
        } else {
            Ok(value)
        }
    };

    let range = field("address").map_err(&fail)?;
    let perms = field("permissions").map_err(&fail)?;
    let offset = field("offset").map_err(&fail)?;
    let device = field("device").map_err(&fail)?;
    let inode = field("inode").map_err(&fail)?;

    let (start, end) = range
        .split_once('-')
        .ok_or_else(|| fail(format!("address range '{}' has no '-'", range)))?;
    let start = parse_hex(start, "start").map_err(&fail)?;
    let end = parse_hex(end, "end").map_err(&fail)?;
    let offset = parse_hex(offset, "offset").map_err(&fail)?;
    let permissions = parse_permissions(perms).map_err(&fail)?;
    let inode = inode
        .parse::<u64>()
        .map_err(|e| fail(format!("inode '{}': {}", inode, e)))?;

    let path = Some(rest.trim())
        .filter(|p| !p.is_empty())
        .map(String::from);

    Ok(MemoryRegion {
        start,
        end,
        permissions,
        offset,
        device: device.to_string(),
        inode,
        path,
    })
}

fn parse_hex(value: &str, what: &str) -> Result<u64, String> {
    u64::from_str_radix(value, 16).map_err(|e| format!("{} '{}': {}", what, value, e))
}

/// Permissions are exactly four columns: `[r-][w-][x-][sp]`.
fn parse_permissions(value: &str) -> Result<Permissions, String> {
    let &[r, w, x, share] = value.as_bytes() else {
        return Err(format!("permissions '{}' must be 4 characters", value));
    };

    let mut perms = Permissions::empty();
    for (got, want, flag) in [
        (r, b'r', Permissions::READ),
        (w, b'w', Permissions::WRITE),
        (x, b'x', Permissions::EXECUTE),
    ] {
        match got {
            b'-' => {}
            c if c == want => perms |= flag,
            c => return Err(format!("permissions '{}': unexpected '{}'", value, c as char)),
        }
    }
    match share {
        b's' => perms |= Permissions::SHARED,
        b'p' => perms |= Permissions::PRIVATE,
        c => return Err(format!("permissions '{}': unexpected '{}'", value, c as char)),
    }
    Ok(perms)
}
