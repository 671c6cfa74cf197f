//! On-disk blob layout under the data root.
//!
//! A committed key is a read-only blob file plus a sidecar holding its
//! hex digest. A sidecar with no blob is a prepared slot. Everything
//! here is synchronous; callers offload through a pool.

use std::collections::BTreeSet;
use std::fs::Metadata;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use s4_protocol::{keys, ListEntry, Result, S4Error, SIDECAR_EXT};
use tracing::warn;
use uuid::Uuid;
use walkdir::WalkDir;

/// Receive files for in-flight puts.
pub const TEMPFILES_DIR: &str = "_tempfiles";

/// Scratch directories for map commands.
pub const TEMPDIRS_DIR: &str = "_tempdirs";

/// A key is present when both the blob and a non-empty sidecar exist.
pub fn exists(blob: &Path) -> bool {
    if !blob.is_file() {
        return false;
    }
    match std::fs::metadata(keys::sidecar_path(blob)) {
        Ok(md) => md.is_file() && md.len() > 0,
        Err(_) => false,
    }
}

/// Read the sidecar digest of a blob.
pub fn checksum_read(blob: &Path) -> io::Result<String> {
    let text = std::fs::read_to_string(keys::sidecar_path(blob))?;
    Ok(text.trim_end().to_string())
}

/// Reserve a put slot: parent directories plus an empty sidecar, which
/// acts as the lock against concurrent puts of the same key. Conflict
/// when either the blob or its sidecar already exists.
pub fn reserve_slot(blob: &Path) -> Result<()> {
    let sidecar = keys::sidecar_path(blob);
    if blob.exists() || sidecar.exists() {
        return Err(S4Error::conflict(format!(
            "key already exists: {}",
            blob.display()
        )));
    }
    if let Some(parent) = blob.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&sidecar, b"")?;
    Ok(())
}

/// Release a reserved slot: drop the sidecar and any receive file.
pub fn release_slot(blob: &Path, temp: Option<&Path>) {
    remove_file_quiet(&keys::sidecar_path(blob));
    if let Some(temp) = temp {
        remove_file_quiet(temp);
    }
}

/// Commit a received blob: digest into the sidecar first, then the
/// rename, then read-only bits, so readers see both files or neither.
pub fn commit_blob(temp: &Path, blob: &Path, digest: &str) -> io::Result<()> {
    std::fs::write(keys::sidecar_path(blob), digest)?;
    std::fs::rename(temp, blob)?;
    std::fs::set_permissions(blob, std::fs::Permissions::from_mode(0o444))?;
    Ok(())
}

/// Remove a blob and its sidecar, `rm -f` style.
pub fn delete_blob(blob: &Path) {
    remove_file_quiet(blob);
    remove_file_quiet(&keys::sidecar_path(blob));
}

/// `rm -f`: absence is fine, anything else is logged.
pub fn remove_file_quiet(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Fresh receive path under `_tempfiles/`.
pub fn new_temp_file_path(root: &Path) -> PathBuf {
    root.join(TEMPFILES_DIR).join(Uuid::new_v4().to_string())
}

/// Fresh scratch directory under `_tempdirs/`.
pub fn create_temp_dir(root: &Path) -> io::Result<PathBuf> {
    let dir = root.join(TEMPDIRS_DIR).join(Uuid::new_v4().to_string());
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// List one-level buckets: directories under the data root whose name
/// does not start with `_`.
pub fn list_buckets(root: &Path) -> Result<Vec<ListEntry>> {
    let mut entries = Vec::new();
    let read = match std::fs::read_dir(root) {
        Ok(read) => read,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(entries),
        Err(e) => return Err(e.into()),
    };
    for entry in read.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('_') {
            continue;
        }
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let (date, time) = mtime_parts(entry.metadata().ok().as_ref());
        entries.push(ListEntry(date, time, s4_protocol::wire::PRE.to_string(), name));
    }
    entries.sort_by(|a, b| a.3.cmp(&b.3));
    Ok(entries)
}

/// List keys under a prefix.
///
/// A prefix not ending in `/` filters depth-1 names by that final
/// fragment, glob style. Recursive listing emits files only, with the
/// bucket stripped from each path; non-recursive emits depth-1 files
/// and synthesizes `PRE` rows for depth-1 directories, relative to the
/// prefix directory. Sidecars never appear. A missing directory is an
/// empty result, not an error.
pub fn list(root: &Path, prefix: &str, recursive: bool) -> Result<Vec<ListEntry>> {
    keys::validate_key(prefix)?;
    let rest = keys::strip_scheme(prefix);
    let (dir_rel, filter) = split_prefix(rest);
    let dir_abs = if dir_rel.is_empty() {
        root.to_path_buf()
    } else {
        root.join(&dir_rel)
    };

    let mut entries = Vec::new();
    if recursive {
        for entry in WalkDir::new(&dir_abs).min_depth(1).into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.ends_with(SIDECAR_EXT) {
                continue;
            }
            let rel_to_dir = match entry.path().strip_prefix(&dir_abs) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            if !first_component_matches(rel_to_dir, filter.as_deref()) {
                continue;
            }
            if dir_rel.is_empty() && first_component_reserved(rel_to_dir) {
                continue;
            }
            let rel_to_root = match entry.path().strip_prefix(root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            // The bucket is implied by the query; strip it.
            let sans_bucket: PathBuf = rel_to_root.components().skip(1).collect();
            let md = match entry.metadata() {
                Ok(md) => md,
                Err(_) => continue,
            };
            let (date, time) = mtime_parts(Some(&md));
            entries.push(ListEntry::file(
                date,
                time,
                md.len(),
                sans_bucket.display().to_string(),
            ));
        }
    } else {
        let read = match std::fs::read_dir(&dir_abs) {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };
        for entry in read.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(filter) = filter.as_deref() {
                if !name.starts_with(filter) {
                    continue;
                }
            }
            if dir_rel.is_empty() && name.starts_with('_') {
                continue;
            }
            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(_) => continue,
            };
            if file_type.is_dir() {
                entries.push(ListEntry::prefix(format!("{}/", name)));
            } else if file_type.is_file() && !name.ends_with(SIDECAR_EXT) {
                let md = match entry.metadata() {
                    Ok(md) => md,
                    Err(_) => continue,
                };
                let (date, time) = mtime_parts(Some(&md));
                entries.push(ListEntry::file(date, time, md.len(), name));
            }
        }
    }
    entries.sort_by(|a, b| a.3.cmp(&b.3));
    Ok(entries)
}

/// Delete a key, or everything matching the prefix glob when recursive.
/// The prefix has already been validated against escaping the data root.
pub fn delete_prefix(root: &Path, prefix: &str, recursive: bool) -> Result<()> {
    keys::validate_key(prefix)?;
    let rest = keys::strip_scheme(prefix);
    if recursive {
        if let Some(dir) = rest.strip_suffix('/') {
            remove_tree_quiet(&root.join(dir))?;
        } else {
            let (dir_rel, filter) = split_prefix(rest);
            let dir_abs = if dir_rel.is_empty() {
                root.to_path_buf()
            } else {
                root.join(&dir_rel)
            };
            let read = match std::fs::read_dir(&dir_abs) {
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            for entry in read.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                let matches = match filter.as_deref() {
                    Some(filter) => name.starts_with(filter),
                    None => true,
                };
                if !matches || (dir_rel.is_empty() && name.starts_with('_')) {
                    continue;
                }
                if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    remove_tree_quiet(&entry.path())?;
                } else {
                    std::fs::remove_file(entry.path())?;
                }
            }
        }
    } else {
        if rest.ends_with('/') {
            return Err(S4Error::InvalidKey(format!(
                "non-recursive delete of a prefix: {}",
                prefix
            )));
        }
        delete_blob(&root.join(rest));
    }
    Ok(())
}

fn remove_tree_quiet(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Split a post-scheme prefix into its directory part and the depth-1
/// name fragment, if any.
fn split_prefix(rest: &str) -> (String, Option<String>) {
    if let Some(dir) = rest.strip_suffix('/') {
        (dir.to_string(), None)
    } else {
        match rest.rfind('/') {
            Some(i) => (rest[..i].to_string(), Some(rest[i + 1..].to_string())),
            None => (String::new(), Some(rest.to_string())),
        }
    }
}

fn first_component_matches(rel: &Path, filter: Option<&str>) -> bool {
    let Some(filter) = filter else { return true };
    rel.components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().starts_with(filter))
        .unwrap_or(false)
}

fn first_component_reserved(rel: &Path) -> bool {
    rel.components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().starts_with('_'))
        .unwrap_or(false)
}

fn mtime_parts(md: Option<&Metadata>) -> (String, String) {
    let mtime = md
        .and_then(|md| md.modified().ok())
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let dt: chrono::DateTime<chrono::Local> = mtime.into();
    (
        dt.format("%Y-%m-%d").to_string(),
        dt.format("%H:%M:%S").to_string(),
    )
}

/// Distinct top-level names under a directory, for tests and tooling.
pub fn top_level_names(dir: &Path) -> BTreeSet<String> {
    std::fs::read_dir(dir)
        .map(|read| {
            read.flatten()
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default()
}
