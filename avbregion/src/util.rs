/*
 * SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    ffi::OsStr,
    fs,
    io::{self, Write},
    path::Path,
};

use tempfile::NamedTempFile;
use tracing::warn;

pub const ZEROS: [u8; 16384] = [0u8; 16384];

/// Check if a byte slice is all zeros.
pub fn is_zero(mut buf: &[u8]) -> bool {
    while !buf.is_empty() {
        let n = buf.len().min(ZEROS.len());
        if buf[..n] != ZEROS[..n] {
            return false;
        }

        buf = &buf[n..];
    }

    true
}

/// Get the non-empty parent of a path. If the path has no parent in the string,
/// then `.` is returned. This does not perform any filesystem operations.
pub fn parent_path(path: &Path) -> &Path {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            return parent;
        }
    }

    Path::new(".")
}

/// Create a temporary file next to `path` for writing its replacement. The
/// file can be moved into place with [`NamedTempFile::persist`] and is deleted
/// if it is dropped instead.
pub fn create_temp_file(path: &Path) -> io::Result<NamedTempFile> {
    let temp_file = NamedTempFile::with_prefix_in(
        path.file_name()
            .unwrap_or_else(|| OsStr::new("avbregion.tmp")),
        parent_path(path),
    )?;

    // NamedTempFile forces 600 permissions on temp files because it's the safe
    // option for a shared /tmp. Since we're writing to the output file's
    // directory, just mimic umask.
    #[cfg(unix)]
    {
        use std::{fs::Permissions, os::unix::prelude::PermissionsExt};

        use rustix::{fs::Mode, process::umask};

        let mask = umask(Mode::empty());
        umask(mask);

        // Mac uses a 16-bit value.
        #[allow(clippy::useless_conversion)]
        let mode = u32::from(0o666 & !mask.bits());

        temp_file
            .as_file()
            .set_permissions(Permissions::from_mode(mode))?;
    }

    Ok(temp_file)
}

/// Write `data` to `path` atomically. If any step fails, the destination is
/// left untouched.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    write_atomic_all(&[(path, data)])
}

/// Write a set of files that only make sense together. Every file is fully
/// written to a temp file before the first one is moved into place. If moving
/// one of them fails, the ones that were already moved are removed again.
pub fn write_atomic_all(files: &[(&Path, &[u8])]) -> io::Result<()> {
    let mut staged = Vec::with_capacity(files.len());

    for (path, data) in files {
        let mut temp_file = create_temp_file(path)?;
        temp_file.write_all(data)?;
        temp_file.flush()?;

        staged.push((*path, temp_file));
    }

    let mut persisted = vec![];

    for (path, temp_file) in staged {
        if let Err(e) = temp_file.persist(path) {
            for p in persisted {
                if let Err(re) = fs::remove_file(p) {
                    warn!("Failed to remove partially written output: {p:?}: {re}");
                }
            }

            return Err(e.error);
        }

        persisted.push(path);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_check() {
        assert!(is_zero(&[]));
        assert!(is_zero(&[0u8; 20000]));

        let mut buf = vec![0u8; 20000];
        buf[19999] = 1;
        assert!(!is_zero(&buf));
    }

    #[test]
    fn parent_of_bare_name() {
        assert_eq!(parent_path(Path::new("vbmeta.img")), Path::new("."));
        assert_eq!(parent_path(Path::new("out/vbmeta.img")), Path::new("out"));
    }

    #[test]
    fn atomic_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devinfo.img");

        fs::write(&path, b"old contents").unwrap();
        write_atomic(&path, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn atomic_group_write_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("vendor_boot.img");
        let second = dir.path().join("vbmeta.img");

        let files = [
            (first.as_path(), b"a".as_slice()),
            (second.as_path(), b"b".as_slice()),
        ];

        write_atomic_all(&files).unwrap();
        assert_eq!(fs::read(&first).unwrap(), b"a");
        assert_eq!(fs::read(&second).unwrap(), b"b");

        // A non-empty directory can't be replaced by a file.
        fs::remove_file(&first).unwrap();
        fs::remove_file(&second).unwrap();
        fs::create_dir(&second).unwrap();
        fs::write(second.join("keep"), b"").unwrap();

        assert!(write_atomic_all(&files).is_err());
        assert!(!first.exists());
        assert!(second.is_dir());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
