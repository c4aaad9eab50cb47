//! Similarity hasher: PDQ-256 perceptual hashing and the Hamming-distance
//! clique-grouping math used by Compute-Similarity and Find-Duplicates.
//!
//! The PDQ-256 algorithm's internals are out of scope here — it is used as
//! an opaque function with a typed contract via the `pdqhash` crate.

use anyhow::Context;
use std::path::Path;

/// Computes the 256-bit perceptual hash of an image, serialized as 64 lower-
/// case hex characters.
pub fn compute_pdq_hash(path: &Path) -> anyhow::Result<String> {
    let image = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
    let rgb = image.to_rgb8();
    let (hash, _quality) = pdqhash::generate_pdq_full_size(&rgb);
    Ok(hash.to_string())
}

/// Parses a 64-hex-character PDQ-256 string into four 64-bit words.
pub fn parse_pdq_hash(hex_str: &str) -> Option<[u64; 4]> {
    if hex_str.len() != 64 {
        return None;
    }
    let mut words = [0u64; 4];
    for (i, word) in words.iter_mut().enumerate() {
        let chunk = hex_str.get(i * 16..(i + 1) * 16)?;
        *word = u64::from_str_radix(chunk, 16).ok()?;
    }
    Some(words)
}

/// Hamming distance between two 256-bit hashes, each as four 64-bit words.
pub fn hamming_distance(a: &[u64; 4], b: &[u64; 4]) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Similarity fraction in `[0.0, 1.0]` derived from a 256-bit Hamming distance.
pub fn similarity_from_distance(distance: u32) -> f64 {
    1.0 - (distance as f64 / 256.0)
}

/// Threshold applied to a candidate pair: the configured base, raised to at
/// least the cross-type threshold when either member is a non-image post.
pub fn effective_threshold(base: f64, cross_type: f64, either_non_image: bool) -> f64 {
    if either_non_image {
        base.max(cross_type)
    } else {
        base
    }
}

/// Median of a set of integer similarity percentages (0-100); used for a
/// perceptual group's stored `similarityPercent`.
pub fn median_percent(mut percentages: Vec<i64>) -> Option<i64> {
    if percentages.is_empty() {
        return None;
    }
    percentages.sort_unstable();
    let mid = percentages.len() / 2;
    if percentages.len() % 2 == 0 {
        Some((percentages[mid - 1] + percentages[mid]) / 2)
    } else {
        Some(percentages[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_hashes_have_zero_distance() {
        let hash = [1u64, 2, 3, 4];
        assert_eq!(hamming_distance(&hash, &hash), 0);
        assert_eq!(similarity_from_distance(0), 1.0);
    }

    #[test]
    fn fully_inverted_hashes_have_max_distance() {
        let a = [0u64, 0, 0, 0];
        let b = [u64::MAX, u64::MAX, u64::MAX, u64::MAX];
        assert_eq!(hamming_distance(&a, &b), 256);
        assert_eq!(similarity_from_distance(256), 0.0);
    }

    #[test]
    fn roundtrips_through_hex() {
        let hex_str = "a".repeat(64);
        let words = parse_pdq_hash(&hex_str).unwrap();
        assert_eq!(words[0], u64::from_str_radix("aaaaaaaaaaaaaaaa", 16).unwrap());
    }

    #[test]
    fn rejects_malformed_hash_length() {
        assert!(parse_pdq_hash("abc").is_none());
    }

    #[test]
    fn cross_type_raises_threshold() {
        assert_eq!(effective_threshold(0.68, 0.90, false), 0.68);
        assert_eq!(effective_threshold(0.68, 0.90, true), 0.90);
    }

    #[test]
    fn median_of_odd_and_even_sets() {
        assert_eq!(median_percent(vec![70, 80, 90]), Some(80));
        assert_eq!(median_percent(vec![70, 90]), Some(80));
        assert_eq!(median_percent(vec![]), None);
    }
}
