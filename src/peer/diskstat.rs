//! Disk usage of the peer's filesystem root, reported to the server on
//! `ask_disk_state`.

use crate::error::{MeshError, MeshResult};

/// `(total, free)` bytes of the filesystem root.
#[cfg(unix)]
pub fn disk_state() -> MeshResult<(u64, u64)> {
    use std::ffi::CString;
    use std::mem;

    let root = CString::new("/").map_err(|_| MeshError::Io("invalid root path".to_string()))?;
    let mut stats: libc::statvfs = unsafe { mem::zeroed() };
    let result = unsafe { libc::statvfs(root.as_ptr(), &mut stats) };
    if result != 0 {
        return Err(MeshError::Io(
            "failed to read filesystem statistics".to_string(),
        ));
    }

    let total = stats.f_blocks as u64 * stats.f_frsize as u64;
    let free = stats.f_bavail as u64 * stats.f_frsize as u64;
    Ok((total, free))
}

#[cfg(not(unix))]
pub fn disk_state() -> MeshResult<(u64, u64)> {
    // only unix targets are supported for real numbers
    Ok((0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn test_disk_state_is_sane() {
        let (total, free) = disk_state().unwrap();
        assert!(total > 0);
        assert!(free <= total);
    }
}
