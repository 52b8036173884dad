//! Bloom filter used as a negative-lookup shortcut in front of the index.
//!
//! `probe` returning false means the key was never added; true means it may
//! have been. Deletes never clear bits: the index remains the final truth,
//! so a stale positive only costs one extra index lookup.

use parking_lot::RwLock;

/// Concurrency wrapper: many probes, serialized adds.
pub struct KeyFilter {
    inner: RwLock<BloomBits>,
}

impl KeyFilter {
    /// Size the filter for `expected_keys` at the target false-positive
    /// rate `fp` (in the open interval (0, 1)).
    pub fn new(expected_keys: usize, fp: f64) -> Self {
        Self {
            inner: RwLock::new(BloomBits::new(expected_keys, fp)),
        }
    }

    pub fn add(&self, key: &[u8]) {
        self.inner.write().insert(key);
    }

    /// False: definitely absent. True: possibly present.
    pub fn probe(&self, key: &[u8]) -> bool {
        self.inner.read().may_contain(key)
    }

    pub fn bit_count(&self) -> u64 {
        self.inner.read().num_bits
    }

    pub fn hash_count(&self) -> u32 {
        self.inner.read().num_hashes
    }
}

impl std::fmt::Debug for KeyFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("KeyFilter")
            .field("num_bits", &inner.num_bits)
            .field("num_hashes", &inner.num_hashes)
            .finish()
    }
}

/// The bit array itself, with double hashing `h(i) = h1 + i * h2` derived
/// from two FNV-1a seeds.
struct BloomBits {
    bits: Vec<u8>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomBits {
    fn new(expected_keys: usize, fp: f64) -> Self {
        assert!(expected_keys > 0, "expected_keys must be > 0");
        assert!(fp > 0.0 && fp < 1.0, "fp must be in (0, 1)");

        // m = ceil(-n * ln(fp) / ln(2)^2), k = ceil((m / n) * ln(2))
        let n = expected_keys as f64;
        let m = (-n * fp.ln() / std::f64::consts::LN_2.powi(2)).ceil() as u64;
        let m = m.max(8);
        let k = ((m as f64 / n) * std::f64::consts::LN_2).ceil() as u32;
        let k = k.max(1);

        Self {
            bits: vec![0u8; m.div_ceil(8) as usize],
            num_bits: m,
            num_hashes: k,
        }
    }

    fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let idx = bit_index(h1, h2, i, self.num_bits);
            self.bits[(idx / 8) as usize] |= 1 << (idx % 8);
        }
    }

    fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = hash_pair(key);
        (0..self.num_hashes).all(|i| {
            let idx = bit_index(h1, h2, i, self.num_bits);
            (self.bits[(idx / 8) as usize] >> (idx % 8)) & 1 == 1
        })
    }
}

fn hash_pair(key: &[u8]) -> (u64, u64) {
    (
        fnv1a_64(key, 0xcbf29ce484222325),
        fnv1a_64(key, 0x517cc1b727220a95),
    )
}

fn bit_index(h1: u64, h2: u64, i: u32, num_bits: u64) -> u64 {
    h1.wrapping_add((i as u64).wrapping_mul(h2)) % num_bits
}

/// FNV-1a with a configurable basis, so two seeds give two independent hashes.
fn fnv1a_64(data: &[u8], basis: u64) -> u64 {
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = basis;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let filter = KeyFilter::new(1_000, 0.01);
        for i in 0..1_000u32 {
            filter.add(format!("key-{}", i).as_bytes());
        }
        for i in 0..1_000u32 {
            assert!(
                filter.probe(format!("key-{}", i).as_bytes()),
                "added key {} must probe positive",
                i
            );
        }
    }

    #[test]
    fn test_absent_keys_mostly_rejected() {
        let filter = KeyFilter::new(1_000, 0.01);
        for i in 0..1_000u32 {
            filter.add(format!("key-{}", i).as_bytes());
        }

        let false_positives = (0..10_000u32)
            .filter(|i| filter.probe(format!("other-{}", i).as_bytes()))
            .count();
        // Target rate is 1%; allow generous slack for hash variance.
        assert!(
            false_positives < 500,
            "false positive rate too high: {}/10000",
            false_positives
        );
    }

    #[test]
    fn test_empty_filter_rejects_everything() {
        let filter = KeyFilter::new(100, 0.01);
        assert!(!filter.probe(b"anything"));
        assert!(!filter.probe(b""));
    }

    #[test]
    fn test_parameter_derivation() {
        // n=1000, fp=0.01 gives m = ceil(9585.06) = 9586 bits and k = 7.
        let filter = KeyFilter::new(1_000, 0.01);
        assert_eq!(filter.bit_count(), 9_586);
        assert_eq!(filter.hash_count(), 7);
    }
}
