//! Archive extraction for server and shell packages.
//!
//! All extractors strip exactly one leading path component, create
//! directories and regular files with the archive's recorded mode, ignore
//! symlinks and device nodes, and reject entries that would escape the
//! extraction root. Blocking by design; callers hop through
//! `tokio::task::spawn_blocking`.
//!
//! Three formats are supported: gzip + tar (the common case), zip (darwin
//! shell packages), and `ar` containing `data.tar.{gz,xz}` (distro packages
//! for older percona releases). For `.xz` the work is delegated to an
//! external `xz` process.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use flate2::read::GzDecoder;
use tracing::debug;

use crate::errors::ArchiveError;

/// The executable basenames kept when unpacking distro packages.
const PACKAGE_EXECUTABLES: &[&str] = &["mongod", "mongos", "mongosh", "mongo"];

/// Dispatch on the archive filename.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if name.ends_with(".tgz") || name.ends_with(".tar.gz") {
        extract_tar_gz(archive, dest)
    } else if name.ends_with(".zip") {
        extract_zip(archive, dest)
    } else if name.ends_with(".deb") {
        extract_deb(archive, dest)
    } else {
        Err(ArchiveError::UnsupportedFormat(name.to_string()))
    }
}

/// Extract a gzip-compressed tarball into `dest`, stripping the leading
/// path component.
pub fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let file = File::open(archive)?;
    let mut tarball = tar::Archive::new(GzDecoder::new(file));
    extract_tar_entries(&mut tarball, dest, None)
}

/// Extract a zip archive into `dest`, stripping the leading path component.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
    fs::create_dir_all(dest)?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let enclosed = entry
            .enclosed_name()
            .ok_or_else(|| ArchiveError::PathTraversal(entry.name().to_string()))?;
        let Some(stripped) = strip_first_component(&enclosed) else {
            continue;
        };
        let target = dest.join(&stripped);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            io::copy(&mut entry, &mut out)?;
            if let Some(mode) = entry.unix_mode() {
                set_mode(&target, mode)?;
            }
        }
    }
    Ok(())
}

/// Unpack a distro package (`ar` with `debian-binary`, `control.tar.*`,
/// `data.tar.{gz,xz}`). Only `data.tar.*` is read, and only the known
/// executables are kept; they land flattened under `dest/bin/`.
pub fn extract_deb(archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let bytes = fs::read(archive)?;
    let (name, data) = find_data_member(&bytes)?;
    debug!(member = %name, "unpacking package data member");

    if name.ends_with(".gz") {
        let mut tarball = tar::Archive::new(GzDecoder::new(data));
        extract_tar_entries(&mut tarball, dest, Some(PACKAGE_EXECUTABLES))
    } else if name.ends_with(".xz") {
        let plain = xz_decompress(data)?;
        let mut tarball = tar::Archive::new(plain.as_slice());
        extract_tar_entries(&mut tarball, dest, Some(PACKAGE_EXECUTABLES))
    } else {
        Err(ArchiveError::UnsupportedFormat(name))
    }
}

/// Walk tar entries applying the shared contract. With `keep_basenames`
/// set, only matching regular files are extracted and they are flattened
/// into `dest/bin/`.
fn extract_tar_entries<R: Read>(
    tarball: &mut tar::Archive<R>,
    dest: &Path,
    keep_basenames: Option<&[&str]>,
) -> Result<(), ArchiveError> {
    fs::create_dir_all(dest)?;

    for entry in tarball.entries()? {
        let mut entry = entry?;
        let raw_path = entry.path()?.into_owned();
        let kind = entry.header().entry_type();
        let mode = entry.header().mode().unwrap_or(0o644);

        if let Some(keep) = keep_basenames {
            if !kind.is_file() {
                continue;
            }
            let basename = raw_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            if !keep.contains(&basename.as_str()) {
                continue;
            }
            let target = dest.join("bin").join(&basename);
            fs::create_dir_all(dest.join("bin"))?;
            let mut out = File::create(&target)?;
            io::copy(&mut entry, &mut out)?;
            set_mode(&target, mode)?;
            continue;
        }

        let Some(stripped) = checked_strip(&raw_path)? else {
            continue;
        };
        let target = dest.join(&stripped);

        if kind.is_dir() {
            fs::create_dir_all(&target)?;
            set_mode(&target, mode)?;
        } else if kind.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            io::copy(&mut entry, &mut out)?;
            set_mode(&target, mode)?;
        }
        // Symlinks, hard links, and device nodes are ignored.
    }
    Ok(())
}

/// Strip the first path component after rejecting traversal attempts.
fn checked_strip(path: &Path) -> Result<Option<PathBuf>, ArchiveError> {
    if path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(ArchiveError::PathTraversal(path.display().to_string()));
    }
    Ok(strip_first_component(path))
}

/// Remove the leading normal component; entries that *are* the leading
/// component yield `None`. `./` prefixes do not count as a component.
fn strip_first_component(path: &Path) -> Option<PathBuf> {
    let mut components = path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)));
    components.next()?;
    let rest: PathBuf = components.collect();
    if rest.as_os_str().is_empty() {
        None
    } else {
        Some(rest)
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Locate the `data.tar.*` member inside an `ar` archive and return its
/// name and bytes.
fn find_data_member(bytes: &[u8]) -> Result<(String, &[u8]), ArchiveError> {
    const MAGIC: &[u8] = b"!<arch>\n";
    if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
        return Err(ArchiveError::MalformedAr("missing !<arch> magic".into()));
    }

    let mut offset = MAGIC.len();
    while offset + 60 <= bytes.len() {
        let header = &bytes[offset..offset + 60];
        if &header[58..60] != b"`\n" {
            return Err(ArchiveError::MalformedAr(format!(
                "bad member terminator at offset {offset}"
            )));
        }
        let name = String::from_utf8_lossy(&header[..16])
            .trim_end()
            .trim_end_matches('/')
            .to_string();
        let size: usize = String::from_utf8_lossy(&header[48..58])
            .trim()
            .parse()
            .map_err(|_| ArchiveError::MalformedAr(format!("bad size for member {name}")))?;

        let start = offset + 60;
        let end = start + size;
        if end > bytes.len() {
            return Err(ArchiveError::MalformedAr(format!(
                "member {name} extends past the archive"
            )));
        }

        if name.starts_with("data.tar") {
            return Ok((name, &bytes[start..end]));
        }

        // Member data is padded to an even boundary.
        offset = end + (size % 2);
    }

    Err(ArchiveError::MalformedAr("no data.tar member".into()))
}

/// Decompress xz bytes by delegating to the external `xz` binary.
fn xz_decompress(data: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    use std::io::Write;
    use std::process::Stdio;

    let mut child = Command::new("xz")
        .args(["--decompress", "--stdout"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ArchiveError::Decompressor(format!("failed to spawn xz: {e}")))?;

    // Feed stdin from a separate thread so a full stdout pipe cannot
    // deadlock the exchange.
    let mut stdin = child.stdin.take().expect("stdin was piped");
    let payload = data.to_vec();
    let writer = std::thread::spawn(move || stdin.write_all(&payload));

    let output = child
        .wait_with_output()
        .map_err(|e| ArchiveError::Decompressor(format!("xz did not exit cleanly: {e}")))?;
    let written = writer.join();
    if !output.status.success() {
        return Err(ArchiveError::Decompressor(format!(
            "xz exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    // A broken pipe only matters when xz itself reported success.
    written
        .map_err(|_| ArchiveError::Decompressor("stdin writer panicked".into()))??;
    Ok(output.stdout)
}
