use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

pub fn ensure_dir(p: &Path) -> Result<()> {
    fs::create_dir_all(p)
        .map_err(|e| Error::io(format!("failed to create dir {}: {e}", p.display())))
}

/// Writes through a temp file in the target directory, then renames it into
/// place. A failed write never leaves a truncated output behind.
pub fn write_atomic(p: &Path, data: &[u8]) -> Result<()> {
    let parent = match p.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    ensure_dir(&parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent)
        .map_err(|e| Error::io(format!("failed to create temp file in {}: {e}", parent.display())))?;
    tmp.write_all(data)
        .map_err(|e| Error::io(format!("failed to write {}: {e}", p.display())))?;
    set_output_mode(tmp.as_file(), p)?;
    tmp.persist(p)
        .map_err(|e| Error::io(format!("failed to write {}: {}", p.display(), e.error)))?;
    Ok(())
}

/// Gives the temp file (created 0600) the mode the output should end up with:
/// the replaced file's mode, or 0666 minus the umask for a new file.
#[cfg(unix)]
fn set_output_mode(file: &fs::File, p: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = match fs::metadata(p) {
        Ok(meta) if meta.is_file() => meta.permissions().mode() & 0o7777,
        _ => 0o666 & !current_umask(),
    };
    file.set_permissions(fs::Permissions::from_mode(mode))
        .map_err(|e| Error::io(format!("failed to set mode on {}: {e}", p.display())))
}

#[cfg(not(unix))]
fn set_output_mode(_file: &fs::File, _p: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn current_umask() -> u32 {
    // umask(2) can only be read by setting it; the old value goes straight back.
    let old = unsafe { libc::umask(0) };
    unsafe { libc::umask(old) };
    old as u32
}

/// Lexical normalization: drops `.` and resolves `..` against earlier parts.
pub fn normalize_rel(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn path_to_rel_string(p: &Path) -> String {
    p.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
