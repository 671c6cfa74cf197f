//! Shared core for the s4 cluster: keys, shard map, config, wire types.
//!
//! Everything here is pure and shared between the server node and the
//! in-process client. The cluster has no metadata service; the only
//! cluster-wide state is the server list in `~/.s4.conf`, which every
//! node and client reads identically. A key is owned by exactly one
//! server, determined by [`keys::pick_server`].

pub mod config;
pub mod error;
pub mod keys;
pub mod wire;

pub use config::{ClusterConfig, ServerAddr, Settings};
pub use error::{Result, S4Error};
pub use keys::{
    blob_rel_path, partition_id, pick_server, shard_token, sidecar_path, strip_scheme,
    validate_blob_key, validate_key, SCHEME, SIDECAR_EXT,
};
pub use wire::{CmdOutput, ListEntry};
