//! Frame partitioning for followers
//!
//! Leaders and followers must agree on which partition owns a frame, so the
//! hash is part of the wire contract: CRC32 over the dims subset projected
//! by the table's partition keys (all dims when no keys are configured),
//! taken modulo the cluster's partition count.
//!
//! The hasher is created once per insert worker and reset per frame.

use crc32fast::Hasher;
use pulsedb_core::ByteMap;

/// Fresh hasher for a worker's lifetime.
pub fn partition_hash() -> Hasher {
    Hasher::new()
}

/// Does `partition` own the frame with these dims?
pub fn in_partition(
    h: &mut Hasher,
    dims: &ByteMap,
    partition_by: &[String],
    partition: u32,
    num_partitions: u32,
) -> bool {
    if num_partitions <= 1 {
        return true;
    }
    partition_for(h, dims, partition_by, num_partitions) == partition
}

/// The partition index owning these dims.
pub fn partition_for(
    h: &mut Hasher,
    dims: &ByteMap,
    partition_by: &[String],
    num_partitions: u32,
) -> u32 {
    h.reset();
    if partition_by.is_empty() {
        h.update(dims.as_bytes());
    } else {
        for key in partition_by {
            h.update(key.as_bytes());
            if let Some(value) = dims.get(key) {
                h.update(&value.canonical_bytes());
            }
        }
    }
    let hash = h.clone().finalize();
    hash % num_partitions.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsedb_core::Value;

    fn dims(host: &str, region: &str) -> ByteMap {
        ByteMap::new(vec![
            ("host".to_string(), Value::Str(host.to_string())),
            ("region".to_string(), Value::Str(region.to_string())),
        ])
    }

    #[test]
    fn test_single_partition_owns_everything() {
        let mut h = partition_hash();
        assert!(in_partition(&mut h, &dims("a", "eu"), &[], 0, 1));
        assert!(in_partition(&mut h, &dims("b", "us"), &[], 0, 0));
    }

    #[test]
    fn test_deterministic_across_hashers() {
        let d = dims("web-1", "eu");
        let keys = vec!["host".to_string()];
        let mut h1 = partition_hash();
        let mut h2 = partition_hash();
        assert_eq!(
            partition_for(&mut h1, &d, &keys, 4),
            partition_for(&mut h2, &d, &keys, 4)
        );
    }

    #[test]
    fn test_reset_between_frames() {
        // Hashing A then B must equal hashing B alone; the reset per call
        // keeps the hasher stateless across frames.
        let keys: Vec<String> = vec![];
        let mut reused = partition_hash();
        partition_for(&mut reused, &dims("a", "eu"), &keys, 16);
        let second = partition_for(&mut reused, &dims("b", "us"), &keys, 16);
        let mut fresh = partition_hash();
        assert_eq!(second, partition_for(&mut fresh, &dims("b", "us"), &keys, 16));
    }

    #[test]
    fn test_projection_ignores_other_dims() {
        let keys = vec!["host".to_string()];
        let mut h = partition_hash();
        let p1 = partition_for(&mut h, &dims("web-1", "eu"), &keys, 8);
        let p2 = partition_for(&mut h, &dims("web-1", "us"), &keys, 8);
        assert_eq!(p1, p2);
    }

    #[test]
    fn test_exactly_one_partition_owns_a_frame() {
        let d = dims("web-1", "eu");
        let keys: Vec<String> = vec![];
        let mut h = partition_hash();
        let owners = (0..4)
            .filter(|&p| in_partition(&mut h, &d, &keys, p, 4))
            .count();
        assert_eq!(owners, 1);
    }
}
