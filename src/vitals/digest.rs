//! T-digest codec and the lifetime metric-history digests.
//!
//! Digests are stored in the snapshot store using varint encoding:
//! [centroid_count: varint] then [mean_bits: varint, weight_bits: varint]
//! per centroid, each f64 carried as its bit representation.

use tdigests::{Centroid, TDigest};
use unsigned_varint::{decode as varint_decode, encode as varint_encode};

use std::collections::BTreeMap;

/// Centroid budget applied when a digest grows past this many centroids.
const COMPRESS_AT: usize = 512;
const COMPRESS_TO: usize = 100;

/// Serialize a digest to bytes.
pub fn encode_digest(td: &TDigest) -> Vec<u8> {
    let centroids = td.centroids();
    let mut data = Vec::with_capacity(centroids.len() * 16 + 4);

    let mut buf = varint_encode::u64_buffer();
    data.extend_from_slice(varint_encode::u64(centroids.len() as u64, &mut buf));

    for c in centroids {
        data.extend_from_slice(varint_encode::u64(c.mean.to_bits(), &mut buf));
        data.extend_from_slice(varint_encode::u64(c.weight.to_bits(), &mut buf));
    }

    data
}

/// Deserialize a digest. Returns None for empty or malformed input.
pub fn decode_digest(data: &[u8]) -> Option<TDigest> {
    if data.is_empty() {
        return None;
    }

    let (count, mut remaining) = varint_decode::u64(data).ok()?;
    if count == 0 {
        return None;
    }

    let mut centroids = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (mean_bits, rest) = varint_decode::u64(remaining).ok()?;
        let (weight_bits, rest) = varint_decode::u64(rest).ok()?;
        remaining = rest;
        centroids.push(Centroid::new(
            f64::from_bits(mean_bits),
            f64::from_bits(weight_bits),
        ));
    }

    Some(TDigest::from_centroids(centroids))
}

/// Total sample weight held by a digest.
pub fn digest_count(td: &TDigest) -> f64 {
    td.centroids().iter().map(|c| c.weight).sum()
}

/// Long-horizon per-metric digests, surviving restarts through the
/// snapshot store.
#[derive(Default)]
pub struct DigestSet {
    digests: BTreeMap<String, TDigest>,
}

/// Quantile summary extracted from one lifetime digest.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct LifetimeStats {
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub samples: u64,
}

impl DigestSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observation into the named metric's digest.
    pub fn record(&mut self, metric: &str, value: f64) {
        let next = match self.digests.remove(metric) {
            None => TDigest::from_values(vec![value]),
            Some(existing) => {
                let mut centroids: Vec<Centroid> = existing
                    .centroids()
                    .iter()
                    .map(|c| Centroid::new(c.mean, c.weight))
                    .collect();
                centroids.push(Centroid::new(value, 1.0));
                let mut merged = TDigest::from_centroids(centroids);
                if merged.centroids().len() > COMPRESS_AT {
                    merged.compress(COMPRESS_TO);
                }
                merged
            }
        };
        self.digests.insert(metric.to_string(), next);
    }

    /// Quantile stats for one metric, if it has any samples.
    pub fn stats(&self, metric: &str) -> Option<LifetimeStats> {
        let td = self.digests.get(metric)?;
        let samples = digest_count(td).round() as u64;
        if samples == 0 {
            return None;
        }
        Some(LifetimeStats {
            p50: td.estimate_quantile(0.5),
            p75: td.estimate_quantile(0.75),
            p95: td.estimate_quantile(0.95),
            samples,
        })
    }

    /// Stats for every metric with samples.
    pub fn all_stats(&self) -> BTreeMap<String, LifetimeStats> {
        self.digests
            .keys()
            .filter_map(|name| self.stats(name).map(|s| (name.clone(), s)))
            .collect()
    }

    /// Encode the whole set for checkpointing:
    /// [entry_count] then per entry [name_len, name, blob_len, blob].
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::new();
        let mut buf = varint_encode::u64_buffer();
        data.extend_from_slice(varint_encode::u64(self.digests.len() as u64, &mut buf));

        for (name, td) in &self.digests {
            let blob = encode_digest(td);
            data.extend_from_slice(varint_encode::u64(name.len() as u64, &mut buf));
            data.extend_from_slice(name.as_bytes());
            data.extend_from_slice(varint_encode::u64(blob.len() as u64, &mut buf));
            data.extend_from_slice(&blob);
        }

        data
    }

    /// Decode a checkpointed set. Malformed input decodes as empty; a
    /// corrupt checkpoint must never be fatal.
    pub fn decode(data: &[u8]) -> Self {
        fn parse(data: &[u8]) -> Option<BTreeMap<String, TDigest>> {
            let (count, mut remaining) = varint_decode::u64(data).ok()?;
            let mut digests = BTreeMap::new();
            for _ in 0..count {
                let (name_len, rest) = varint_decode::u64(remaining).ok()?;
                let name_len = name_len as usize;
                if rest.len() < name_len {
                    return None;
                }
                let name = std::str::from_utf8(&rest[..name_len]).ok()?.to_string();
                let (blob_len, rest) = varint_decode::u64(&rest[name_len..]).ok()?;
                let blob_len = blob_len as usize;
                if rest.len() < blob_len {
                    return None;
                }
                if let Some(td) = decode_digest(&rest[..blob_len]) {
                    digests.insert(name, td);
                }
                remaining = &rest[blob_len..];
            }
            Some(digests)
        }

        match parse(data) {
            Some(digests) => Self { digests },
            None => {
                tracing::warn!("DigestSet: discarding corrupt checkpoint ({} bytes)", data.len());
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_roundtrip() {
        let td = TDigest::from_values(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let data = encode_digest(&td);
        let back = decode_digest(&data).unwrap();
        assert!((td.estimate_quantile(0.5) - back.estimate_quantile(0.5)).abs() < 0.01);
        assert!((digest_count(&back) - 5.0).abs() < 0.01);
    }

    #[test]
    fn test_decode_empty_and_garbage() {
        assert!(decode_digest(&[]).is_none());
        assert!(decode_digest(&[0x01]).is_none());
    }

    #[test]
    fn test_set_records_and_summarizes() {
        let mut set = DigestSet::new();
        for v in [100.0, 200.0, 300.0, 400.0] {
            set.record("lcp", v);
        }
        let stats = set.stats("lcp").unwrap();
        assert_eq!(stats.samples, 4);
        assert!(stats.p50 >= 100.0 && stats.p50 <= 400.0);
        assert!(stats.p95 >= stats.p50);
        assert!(set.stats("fid").is_none());
    }

    #[test]
    fn test_set_roundtrip() {
        let mut set = DigestSet::new();
        set.record("lcp", 2000.0);
        set.record("lcp", 3000.0);
        set.record("cls", 0.07);

        let back = DigestSet::decode(&set.encode());
        assert_eq!(back.stats("lcp").unwrap().samples, 2);
        assert_eq!(back.stats("cls").unwrap().samples, 1);
    }

    #[test]
    fn test_set_decode_corrupt_is_empty() {
        let back = DigestSet::decode(&[0xFF, 0x03, 0x99]);
        assert!(back.all_stats().is_empty());
    }

    #[test]
    fn test_compression_keeps_quantiles_sane() {
        let mut set = DigestSet::new();
        for i in 0..2_000 {
            set.record("ttfb", i as f64);
        }
        let stats = set.stats("ttfb").unwrap();
        assert_eq!(stats.samples, 2_000);
        assert!((stats.p50 - 1_000.0).abs() < 100.0, "p50 = {}", stats.p50);
    }
}
