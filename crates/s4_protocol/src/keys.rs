//! Key parsing, on-disk layout, and the shard map.
//!
//! Keys look like `s4://bucket/path`. On its owner a key resolves to a
//! regular file at `<data_root>/bucket/path` plus a sidecar
//! `<data_root>/bucket/path.xxh3` holding the blob's hex digest.
//!
//! Sharding: when the last path segment is all digits, only that segment
//! is hashed. Partition files named `0000`, `0001`, ... under different
//! parents then colocate on the same owner, which is what makes the
//! map_to_n / map_from_n shuffle topology work. Any other key hashes the
//! whole post-scheme string. A mixed suffix like `0000a` is not all
//! digits and therefore hashes the whole string.

use std::path::{Path, PathBuf};

use xxhash_rust::xxh3::xxh3_64;

use crate::config::ServerAddr;
use crate::error::{Result, S4Error};

/// Key scheme prefix.
pub const SCHEME: &str = "s4://";

/// Sidecar suffix holding the blob's hex digest.
pub const SIDECAR_EXT: &str = ".xxh3";

/// Strip the `s4://` scheme if present.
pub fn strip_scheme(key: &str) -> &str {
    key.strip_prefix(SCHEME).unwrap_or(key)
}

/// Last path segment of a key; drives colocation for shuffles.
pub fn partition_id(key: &str) -> &str {
    let rest = strip_scheme(key).trim_end_matches('/');
    rest.rsplit('/').next().unwrap_or(rest)
}

/// The string that gets hashed for ownership.
pub fn shard_token(key: &str) -> &str {
    let rest = strip_scheme(key);
    let last = rest.rsplit('/').next().unwrap_or(rest);
    if !last.is_empty() && last.bytes().all(|b| b.is_ascii_digit()) {
        last
    } else {
        rest
    }
}

/// Owning server for a key: stable hash modulo the sorted server list.
pub fn pick_server<'a>(servers: &'a [ServerAddr], key: &str) -> Result<&'a ServerAddr> {
    if servers.is_empty() {
        return Err(S4Error::Config("server list is empty".to_string()));
    }
    let idx = (xxh3_64(shard_token(key).as_bytes()) % servers.len() as u64) as usize;
    Ok(&servers[idx])
}

/// Validate a key or key prefix: scheme, no whitespace, bucket not
/// reserved, no traversal.
pub fn validate_key(key: &str) -> Result<()> {
    let rest = key
        .strip_prefix(SCHEME)
        .ok_or_else(|| S4Error::InvalidKey(format!("missing {} scheme: {}", SCHEME, key)))?;
    if key.chars().any(char::is_whitespace) {
        return Err(S4Error::InvalidKey(format!("key contains whitespace: {}", key)));
    }
    let bucket = rest.split('/').next().unwrap_or("");
    if bucket.is_empty() {
        return Err(S4Error::InvalidKey(format!("key has no bucket: {}", key)));
    }
    if bucket.starts_with('_') {
        return Err(S4Error::InvalidKey(format!(
            "buckets may not start with underscore: {}",
            key
        )));
    }
    if rest.split('/').any(|seg| seg == "..") {
        return Err(S4Error::InvalidKey(format!("key contains '..': {}", key)));
    }
    Ok(())
}

/// Validate a key that must name a single blob, not a prefix.
pub fn validate_blob_key(key: &str) -> Result<()> {
    validate_key(key)?;
    let rest = strip_scheme(key);
    if rest.ends_with('/') {
        return Err(S4Error::InvalidKey(format!("blob key ends with '/': {}", key)));
    }
    if !rest.contains('/') {
        return Err(S4Error::InvalidKey(format!("blob key is a bare bucket: {}", key)));
    }
    Ok(())
}

/// Data-root-relative path of a blob key.
pub fn blob_rel_path(key: &str) -> Result<PathBuf> {
    validate_blob_key(key)?;
    Ok(PathBuf::from(strip_scheme(key)))
}

/// Sidecar path for a blob path.
pub fn sidecar_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}{}", path.display(), SIDECAR_EXT))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servers(n: u16) -> Vec<ServerAddr> {
        (0..n)
            .map(|i| ServerAddr {
                host: format!("10.0.0.{}", i + 1),
                port: 8080,
            })
            .collect()
    }

    #[test]
    fn test_shard_token_numeric_suffix() {
        assert_eq!(shard_token("s4://bucket/job/worker/001"), "001");
        assert_eq!(shard_token("s4://bucket/job/worker/name"), "bucket/job/worker/name");
    }

    #[test]
    fn test_shard_token_mixed_suffix_hashes_whole_string() {
        // `0000a` is not all digits, so it does not colocate with `0000`.
        assert_eq!(shard_token("s4://bucket/0000a"), "bucket/0000a");
    }

    #[test]
    fn test_partitions_colocate_across_parents() {
        let servers = servers(3);
        for part in ["000", "001", "0042"] {
            let a = pick_server(&servers, &format!("s4://b/job/{}", part)).unwrap();
            let b = pick_server(&servers, &format!("s4://other/deeper/x/{}", part)).unwrap();
            assert_eq!(a, b, "partition {} split across owners", part);
        }
    }

    #[test]
    fn test_pick_server_is_deterministic() {
        let servers = servers(5);
        let a = pick_server(&servers, "s4://b/a/name").unwrap().clone();
        let b = pick_server(&servers, "s4://b/a/name").unwrap().clone();
        assert_eq!(a, b);
    }

    #[test]
    fn test_pick_server_empty_list() {
        assert!(matches!(
            pick_server(&[], "s4://b/k"),
            Err(S4Error::Config(_))
        ));
    }

    #[test]
    fn test_validate_key_rejects_whitespace() {
        assert!(validate_key("s4://bucket/a b").is_err());
        assert!(validate_key("s4://bucket/a\tb").is_err());
    }

    #[test]
    fn test_validate_key_rejects_reserved_bucket() {
        assert!(validate_key("s4://_tempfiles/x").is_err());
        assert!(validate_key("s4://bucket/_ok").is_ok());
    }

    #[test]
    fn test_validate_key_rejects_traversal() {
        assert!(validate_key("s4://bucket/../etc/passwd").is_err());
    }

    #[test]
    fn test_validate_blob_key() {
        assert!(validate_blob_key("s4://bucket/key").is_ok());
        assert!(validate_blob_key("s4://bucket/dir/").is_err());
        assert!(validate_blob_key("s4://bucket").is_err());
    }

    #[test]
    fn test_blob_and_sidecar_paths() {
        let rel = blob_rel_path("s4://bucket/x/y").unwrap();
        assert_eq!(rel, PathBuf::from("bucket/x/y"));
        assert_eq!(sidecar_path(&rel), PathBuf::from("bucket/x/y.xxh3"));
    }

    #[test]
    fn test_partition_id() {
        assert_eq!(partition_id("s4://b/job/0001"), "0001");
        assert_eq!(partition_id("s4://b/job/"), "job");
    }
}
