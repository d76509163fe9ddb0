//! Canonical bipartitions ("splits") and their occurrence histogram.
//!
//! A split is stored as a bit-set over the canonical node order. The bit
//! of node 0 is always clear, so the stored side is the one that does not
//! contain the first node and logically identical bipartitions compare
//! and hash identically regardless of tree orientation.
//!
//! The text form is a `0`/`1` string of length `num_nodes`; the ordering
//! of [`Split`] agrees with the ordering of that string.

use crate::error::{HrgError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

const WORD: usize = 64;

/// Canonical bipartition of `0..num_nodes`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Split {
    num_nodes: usize,
    words: Box<[u64]>,
}

#[inline]
pub(crate) fn num_words(num_nodes: usize) -> usize {
    num_nodes.div_ceil(WORD)
}

impl Split {
    /// Build a split from the members of one side.
    ///
    /// Fails if either side would be empty or a member is out of range.
    pub fn from_members<I>(num_nodes: usize, members: I) -> Result<Self>
    where
        I: IntoIterator<Item = usize>,
    {
        let mut words = vec![0u64; num_words(num_nodes)];
        for i in members {
            if i >= num_nodes {
                return Err(HrgError::Validation(format!(
                    "split member {} out of range for {} nodes",
                    i, num_nodes
                )));
            }
            words[i / WORD] |= 1 << (i % WORD);
        }
        Self::from_words(num_nodes, words).ok_or_else(|| {
            HrgError::Validation("a split needs two non-empty sides".to_string())
        })
    }

    /// Canonicalize a raw bit-set. Returns `None` for a trivial split
    /// (one side empty).
    pub(crate) fn from_words(num_nodes: usize, mut words: Vec<u64>) -> Option<Self> {
        debug_assert_eq!(words.len(), num_words(num_nodes));
        if num_nodes == 0 {
            return None;
        }
        if words[0] & 1 == 1 {
            for w in words.iter_mut() {
                *w = !*w;
            }
            let tail = num_nodes % WORD;
            if tail > 0 {
                if let Some(last) = words.last_mut() {
                    *last &= (1u64 << tail) - 1;
                }
            }
        }
        let side = words.iter().map(|w| w.count_ones() as usize).sum::<usize>();
        if side == 0 || side == num_nodes {
            return None;
        }
        Some(Split {
            num_nodes,
            words: words.into_boxed_slice(),
        })
    }

    /// Size of the node universe
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Whether node `i` is on the stored side (the side without node 0)
    #[inline]
    pub fn contains(&self, i: usize) -> bool {
        (self.words[i / WORD] >> (i % WORD)) & 1 == 1
    }

    /// Number of nodes on the stored side
    pub fn side_size(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Members of the stored side, ascending
    pub fn members(&self) -> Vec<usize> {
        (0..self.num_nodes).filter(|&i| self.contains(i)).collect()
    }

    /// Two splits are compatible if some side of one is nested in, or
    /// disjoint from, some side of the other.
    pub fn is_compatible(&self, other: &Split) -> bool {
        debug_assert_eq!(self.num_nodes, other.num_nodes);
        // Both stored sides exclude node 0, so the sides overlap on the
        // complement side always; compatibility reduces to nesting or
        // disjointness of the stored sides.
        let mut a_in_b = true;
        let mut b_in_a = true;
        let mut disjoint = true;
        for (a, b) in self.words.iter().zip(other.words.iter()) {
            if a & !b != 0 {
                a_in_b = false;
            }
            if b & !a != 0 {
                b_in_a = false;
            }
            if a & b != 0 {
                disjoint = false;
            }
        }
        a_in_b || b_in_a || disjoint
    }
}

impl Ord for Split {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversing the bits of each word puts node 0 in the most
        // significant position, which matches the text order
        self.num_nodes.cmp(&other.num_nodes).then_with(|| {
            self.words
                .iter()
                .map(|w| w.reverse_bits())
                .cmp(other.words.iter().map(|w| w.reverse_bits()))
        })
    }
}

impl PartialOrd for Split {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: String = (0..self.num_nodes)
            .map(|i| if self.contains(i) { '1' } else { '0' })
            .collect();
        f.write_str(&s)
    }
}

impl FromStr for Split {
    type Err = HrgError;

    fn from_str(s: &str) -> Result<Self> {
        let num_nodes = s.chars().count();
        let mut words = vec![0u64; num_words(num_nodes)];
        for (i, c) in s.chars().enumerate() {
            match c {
                '1' => words[i / WORD] |= 1 << (i % WORD),
                '0' => {}
                _ => {
                    return Err(HrgError::Format(format!(
                        "invalid character {:?} in split key",
                        c
                    )))
                }
            }
        }
        Split::from_words(num_nodes, words)
            .ok_or_else(|| HrgError::Format(format!("trivial split key {:?}", s)))
    }
}

impl Serialize for Split {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Split {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Occurrence counts of canonical splits over repeated samples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitHistogram {
    nodes: Vec<String>,
    num_samples: u64,
    counts: BTreeMap<Split, u64>,
}

impl SplitHistogram {
    /// Empty histogram over the given canonical node list.
    pub fn new(nodes: Vec<String>) -> Self {
        SplitHistogram {
            nodes,
            num_samples: 0,
            counts: BTreeMap::new(),
        }
    }

    /// Node labels the split keys refer to
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Number of completed sampling calls
    pub fn num_samples(&self) -> u64 {
        self.num_samples
    }

    /// Split counts in canonical key order
    pub fn counts(&self) -> &BTreeMap<Split, u64> {
        &self.counts
    }

    /// Number of distinct splits observed
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// No split observed yet
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Count of one split (0 if never observed)
    pub fn count(&self, split: &Split) -> u64 {
        self.counts.get(split).copied().unwrap_or(0)
    }

    /// Fraction of samples in which `split` was observed
    pub fn frequency(&self, split: &Split) -> f64 {
        if self.num_samples == 0 {
            return 0.0;
        }
        self.count(split) as f64 / self.num_samples as f64
    }

    /// Record one sample: every distinct split in `splits` gets `+1`,
    /// `num_samples` gets `+1`.
    pub fn record<I>(&mut self, splits: I) -> Result<()>
    where
        I: IntoIterator<Item = Split>,
    {
        let n = self.nodes.len();
        let distinct: BTreeSet<Split> = splits.into_iter().collect();
        if let Some(bad) = distinct.iter().find(|s| s.num_nodes() != n) {
            return Err(HrgError::Consistency(format!(
                "split over {} nodes recorded into a histogram over {} nodes",
                bad.num_nodes(),
                n
            )));
        }
        for split in distinct {
            *self.counts.entry(split).or_insert(0) += 1;
        }
        self.num_samples += 1;
        Ok(())
    }

    /// Check that every key matches the node universe and no count
    /// exceeds the number of samples.
    pub fn validate(&self) -> Result<()> {
        let n = self.nodes.len();
        for (split, &count) in &self.counts {
            if split.num_nodes() != n {
                return Err(HrgError::Consistency(format!(
                    "split key {} has length {}, expected {}",
                    split,
                    split.num_nodes(),
                    n
                )));
            }
            if count > self.num_samples {
                return Err(HrgError::Consistency(format!(
                    "split {} counted {} times in {} samples",
                    split, count, self.num_samples
                )));
            }
        }
        Ok(())
    }

    /// Sum several histograms produced under the same number of samples.
    ///
    /// The merged histogram has `num_samples = k * num_samples`, so
    /// frequencies are normalized by the total number of samples.
    pub fn merge(histograms: &[SplitHistogram]) -> Result<SplitHistogram> {
        let first = histograms
            .first()
            .ok_or_else(|| HrgError::Consistency("no histograms to merge".to_string()))?;

        let mut merged = SplitHistogram::new(first.nodes.clone());

        for (k, hist) in histograms.iter().enumerate() {
            hist.validate()?;
            if hist.num_samples != first.num_samples {
                return Err(HrgError::Consistency(format!(
                    "inconsistent number of samples: histogram {} has {}, expected {}",
                    k, hist.num_samples, first.num_samples
                )));
            }
            if hist.nodes != first.nodes {
                return Err(HrgError::Consistency(format!(
                    "histogram {} was sampled over a different node set",
                    k
                )));
            }
            for (split, &count) in &hist.counts {
                *merged.counts.entry(split.clone()).or_insert(0) += count;
            }
            merged.num_samples += hist.num_samples;
        }

        Ok(merged)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON and validate
    pub fn from_json(blob: &str) -> Result<Self> {
        let hist: SplitHistogram = serde_json::from_str(blob)?;
        hist.validate()?;
        Ok(hist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(n: usize) -> Vec<String> {
        (0..n).map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_canonical_side_excludes_first_node() {
        let a = Split::from_members(4, [0, 1]).unwrap();
        let b = Split::from_members(4, [2, 3]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "0011");
        assert_eq!(a.members(), vec![2, 3]);
        assert!(!a.contains(0) && !a.contains(1));
    }

    #[test]
    fn test_trivial_split_rejected() {
        assert!(Split::from_members(3, [0, 1, 2]).is_err());
        assert!(Split::from_members(3, []).is_err());
        assert!(Split::from_members(3, [5]).is_err());
        assert!("000".parse::<Split>().is_err());
        assert!("111".parse::<Split>().is_err());
        assert!("01x".parse::<Split>().is_err());
    }

    #[test]
    fn test_text_form_canonicalizes() {
        let s: Split = "1100".parse().unwrap();
        assert_eq!(s.to_string(), "0011");
    }

    #[test]
    fn test_wide_split_masks_tail() {
        let n = 70;
        let s = Split::from_members(n, 0..35).unwrap();
        assert_eq!(s.side_size(), 35);
        assert_eq!(s.members(), (35..70).collect::<Vec<_>>());
        let back: Split = s.to_string().parse().unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn test_order_matches_text_order() {
        let mut splits: Vec<Split> = ["0011", "0101", "0110", "0001", "0111"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        splits.sort();
        let text: Vec<String> = splits.iter().map(|s| s.to_string()).collect();
        let mut expected = text.clone();
        expected.sort();
        assert_eq!(text, expected);
    }

    #[test]
    fn test_compatibility() {
        let ab: Split = "0011".parse().unwrap();
        let ac: Split = "0101".parse().unwrap();
        let d: Split = "0001".parse().unwrap();
        assert!(!ab.is_compatible(&ac));
        assert!(ab.is_compatible(&d));
        assert!(ac.is_compatible(&d));
    }

    #[test]
    fn test_record_counts_distinct_splits_once() {
        let mut hist = SplitHistogram::new(labels(4));
        let s = Split::from_members(4, [2, 3]).unwrap();
        let t = Split::from_members(4, [0, 1]).unwrap();
        hist.record([s.clone(), t]).unwrap();
        hist.record([s.clone()]).unwrap();
        assert_eq!(hist.num_samples(), 2);
        assert_eq!(hist.count(&s), 2);
        assert_eq!(hist.frequency(&s), 1.0);
    }

    #[test]
    fn test_record_rejects_wrong_universe() {
        let mut hist = SplitHistogram::new(labels(4));
        let s = Split::from_members(5, [1]).unwrap();
        assert!(matches!(hist.record([s]), Err(HrgError::Consistency(_))));
        assert_eq!(hist.num_samples(), 0);
    }

    #[test]
    fn test_merge_requires_equal_sample_counts() {
        let s = Split::from_members(4, [2, 3]).unwrap();
        let mut a = SplitHistogram::new(labels(4));
        let mut b = SplitHistogram::new(labels(4));
        a.record([s.clone()]).unwrap();
        b.record([s.clone()]).unwrap();
        b.record([]).unwrap();
        assert!(matches!(
            SplitHistogram::merge(&[a.clone(), b]),
            Err(HrgError::Consistency(_))
        ));

        let merged = SplitHistogram::merge(&[a.clone(), a]).unwrap();
        assert_eq!(merged.num_samples(), 2);
        assert_eq!(merged.count(&s), 2);
    }

    #[test]
    fn test_json_round_trip() {
        let mut hist = SplitHistogram::new(labels(5));
        hist.record([Split::from_members(5, [3, 4]).unwrap()])
            .unwrap();
        let blob = hist.to_json().unwrap();
        assert!(blob.contains("\"00011\""));
        let back = SplitHistogram::from_json(&blob).unwrap();
        assert_eq!(back, hist);
    }

    #[test]
    fn test_from_json_rejects_inconsistent_keys() {
        let blob = r#"{"nodes":["0","1","2"],"num_samples":1,"counts":{"0011":1}}"#;
        assert!(matches!(
            SplitHistogram::from_json(blob),
            Err(HrgError::Consistency(_))
        ));
        let blob = r#"{"nodes":["0","1","2"],"num_samples":1,"counts":{"011":2}}"#;
        assert!(SplitHistogram::from_json(blob).is_err());
    }
}
