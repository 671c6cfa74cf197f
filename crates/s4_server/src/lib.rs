//! The s4 server node.
//!
//! Coordinates out-of-band TCP transfers with a two-phase
//! prepare/confirm handshake, enforces immutability and checksum
//! integrity on disk, schedules user shell jobs across bounded pools,
//! garbage-collects abandoned transfer state, and dispatches the three
//! map operators. All shared state lives in [`node::Node`], built once
//! at startup and handed to every handler.

pub mod client;
pub mod gc;
pub mod http;
pub mod node;
pub mod ops;
pub mod pools;
pub mod ports;
pub mod shell;
pub mod storage;
pub mod transfer;

pub use node::{IoJob, JobKind, Node};
pub use pools::{Pool, Pools, StartedGate};
