//! Ephemeral port allocator for side-channel transfers.

use std::collections::HashSet;

use rand::Rng;
use s4_protocol::{Result, S4Error};

const PORT_MIN: u16 = 20_000;
const PORT_MAX: u16 = 60_000; // exclusive

/// Pick a port not currently bound by an in-flight transfer and mark it
/// in use. Ten collisions in a row means the node is effectively out of
/// ports, which is shed like any other saturation.
pub fn allocate(in_use: &mut HashSet<u16>) -> Result<u16> {
    let mut rng = rand::thread_rng();
    for _ in 0..10 {
        let port = rng.gen_range(PORT_MIN..PORT_MAX);
        if in_use.insert(port) {
            return Ok(port);
        }
    }
    Err(S4Error::Overloaded(
        "no free transfer port after 10 tries".to_string(),
    ))
}

/// Return a port to the pool.
pub fn release(in_use: &mut HashSet<u16>, port: u16) {
    in_use.remove(&port);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_in_range_and_marks_used() {
        let mut in_use = HashSet::new();
        let port = allocate(&mut in_use).unwrap();
        assert!((PORT_MIN..PORT_MAX).contains(&port));
        assert!(in_use.contains(&port));
    }

    #[test]
    fn test_release_frees() {
        let mut in_use = HashSet::new();
        let port = allocate(&mut in_use).unwrap();
        release(&mut in_use, port);
        assert!(in_use.is_empty());
    }

    #[test]
    fn test_exhaustion_errors() {
        let mut in_use: HashSet<u16> = (PORT_MIN..PORT_MAX).collect();
        assert!(matches!(
            allocate(&mut in_use),
            Err(S4Error::Overloaded(_))
        ));
    }
}
