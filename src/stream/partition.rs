use std::collections::BTreeSet;

use super::Partition;

/// Maps a stock symbol onto a topic partition
pub trait PartitionStrategy: Send + Sync {
    fn partition_for(&self, symbol: &str, total_partitions: i32) -> Partition;

    fn name(&self) -> &str;

    /// Deduplicated, ascending partitions covering all `symbols`
    fn partitions_for(&self, symbols: &[String], total_partitions: i32) -> Vec<Partition> {
        symbols
            .iter()
            .map(|symbol| self.partition_for(symbol, total_partitions))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Puts every symbol on partition 0
#[derive(Debug, Clone, Copy, Default)]
pub struct SinglePartition;

impl PartitionStrategy for SinglePartition {
    fn partition_for(&self, _symbol: &str, _total_partitions: i32) -> Partition {
        0
    }

    fn name(&self) -> &str {
        "single"
    }
}

/// Same placement as a Kafka producer keyed by the symbol
/// (murmur2, sign bit masked, modulo partition count)
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyHashPartitioner;

impl PartitionStrategy for KeyHashPartitioner {
    fn partition_for(&self, symbol: &str, total_partitions: i32) -> Partition {
        let total = total_partitions.max(1);
        let hash = murmur2(symbol.as_bytes()) & 0x7fff_ffff;
        (hash % total as u32) as Partition
    }

    fn name(&self) -> &str {
        "key_hash"
    }
}

/// Kafka's murmur2 variant (seed 0x9747b28c)
pub fn murmur2(data: &[u8]) -> u32 {
    const SEED: u32 = 0x9747_b28c;
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let length = data.len();
    let mut h: u32 = SEED ^ (length as u32);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        h ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_partition_collapses() {
        let partitions = SinglePartition.partitions_for(&symbols(&["AAPL", "MSFT", "TSLA"]), 8);
        assert_eq!(partitions, vec![0]);
    }

    #[test]
    fn test_key_hash_is_deterministic_and_in_range() {
        let strategy = KeyHashPartitioner;
        for symbol in ["AAPL", "MSFT", "TSLA", "FAKEPACA", "X"] {
            let first = strategy.partition_for(symbol, 12);
            let second = strategy.partition_for(symbol, 12);
            assert_eq!(first, second);
            assert!((0..12).contains(&first));
        }
    }

    #[test]
    fn test_key_hash_single_partition_topic() {
        assert_eq!(KeyHashPartitioner.partition_for("AAPL", 1), 0);
        // non-positive counts are treated as a single partition
        assert_eq!(KeyHashPartitioner.partition_for("AAPL", 0), 0);
    }

    #[test]
    fn test_partitions_sorted_and_unique() {
        let partitions =
            KeyHashPartitioner.partitions_for(&symbols(&["AAPL", "AAPL", "MSFT", "TSLA"]), 4);
        let mut sorted = partitions.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(partitions, sorted);
    }

    #[test]
    fn test_murmur2_known_values() {
        // reference values from Kafka's Utils.murmur2
        assert_eq!(murmur2(b"21") as i32, -973932308);
        assert_eq!(murmur2(b"foobar") as i32, -790332482);
        assert_eq!(murmur2(b"a-little-bit-long-string") as i32, -985981536);
        assert_eq!(murmur2(b"a-little-bit-longer-string") as i32, -1486304829);
        assert_eq!(murmur2(b"lkjh234lh9fiuh90y23oiuhsafujhadof229phr9h19h89h8") as i32, -58897971);
        assert_eq!(murmur2(b"abc") as i32, 479470107);
    }
}
