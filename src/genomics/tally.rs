//! Per-read survival filters and allele-length buckets.

use super::realign::{Cell, RealignedRead};
use super::{AlignedRead, ReferenceWindow};
use crate::GenotyperConfig;

/// Consecutive flank bases matching the reference, counted outward from the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlankRuns {
    /// Matching run on the left, counted leftward from the core boundary.
    pub left: usize,
    /// Matching run on the right, counted rightward from the core boundary.
    pub right: usize,
}

impl FlankRuns {
    /// Measure a read's flank agreement with the reference window.
    ///
    /// Only aligned bases can match; gaps, soft clips and out-of-bounds
    /// cells end the run, as does running off a truncated reference flank.
    pub fn measure(read: &RealignedRead, window: &ReferenceWindow) -> Self {
        let matches = |cell: &Cell, reference: Option<&u8>| match (cell, reference) {
            (Cell::Base(base), Some(expected)) => base == expected,
            _ => false,
        };
        let left = read
            .pre
            .iter()
            .rev()
            .enumerate()
            .take_while(|(offset, cell)| {
                let reference = window
                    .left_flank
                    .len()
                    .checked_sub(offset + 1)
                    .and_then(|idx| window.left_flank.get(idx));
                matches(cell, reference)
            })
            .count();
        let right = read
            .post
            .iter()
            .enumerate()
            .take_while(|(offset, cell)| matches(cell, window.right_flank.get(*offset)))
            .count();
        Self { left, right }
    }

    /// The weaker of the two flanks.
    pub fn min(&self) -> usize {
        self.left.min(self.right)
    }
}

/// Why a realigned read was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    /// First or last core cell is out of bounds or soft-clipped.
    CoreNotSpanned,
    /// Read size outside the configured bounds.
    ReadLength(u32),
    /// Left flank run below the minimum.
    LeftFlank(usize),
    /// Right flank run below the minimum.
    RightFlank(usize),
    /// Mapping quality below the floor.
    MapQuality(u8),
    /// `XT` tag marks the read as a repeat (multi-mapped) hit.
    MultiMapped,
    /// Read is not flagged as part of a proper pair.
    NotProperPair,
}

/// Survival checks applied to each realigned read, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFilter {
    min_read_length: Option<u32>,
    max_read_length: Option<u32>,
    min_left_flank: usize,
    min_right_flank: usize,
    min_map_quality: u8,
    exclude_multi_mapped: bool,
    properly_paired_only: bool,
}

impl ReadFilter {
    /// Filter thresholds taken from the run configuration.
    pub fn from_config(config: &GenotyperConfig) -> Self {
        Self {
            min_read_length: config.min_read_length,
            max_read_length: config.max_read_length,
            min_left_flank: config.min_left_flank,
            min_right_flank: config.min_right_flank,
            min_map_quality: config.min_map_quality,
            exclude_multi_mapped: config.exclude_multi_mapped,
            properly_paired_only: config.properly_paired_only,
        }
    }

    /// Apply every check; on success return the measured flank runs.
    pub fn screen(
        &self,
        read: &AlignedRead,
        realigned: &RealignedRead,
        window: &ReferenceWindow,
    ) -> Result<FlankRuns, FilterReason> {
        let spans = |cell: Option<&Cell>| {
            !matches!(cell, None | Some(Cell::OutOfBounds) | Some(Cell::SoftClipped))
        };
        if !spans(realigned.core.first()) || !spans(realigned.core.last()) {
            return Err(FilterReason::CoreNotSpanned);
        }

        let size = read.query_length();
        if self.min_read_length.is_some_and(|min| size < min)
            || self.max_read_length.is_some_and(|max| size > max)
        {
            return Err(FilterReason::ReadLength(size));
        }

        let runs = FlankRuns::measure(realigned, window);
        if runs.left < self.min_left_flank {
            return Err(FilterReason::LeftFlank(runs.left));
        }
        if runs.right < self.min_right_flank {
            return Err(FilterReason::RightFlank(runs.right));
        }

        if read.mapq < self.min_map_quality {
            return Err(FilterReason::MapQuality(read.mapq));
        }
        if self.exclude_multi_mapped && read.tag(b"XT").is_some_and(|tag| tag.contains('R')) {
            return Err(FilterReason::MultiMapped);
        }
        if self.properly_paired_only && !read.flags.is_proper_pair() {
            return Err(FilterReason::NotProperPair);
        }
        Ok(runs)
    }
}

/// A surviving read reduced to what the tally needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRead {
    /// Gap-free core length after column synchronisation.
    pub allele_length: usize,
    /// Mapping quality.
    pub map_quality: u8,
    /// Weaker of the two flank runs.
    pub min_flank: usize,
    /// Read maps to the reverse strand.
    pub is_reverse: bool,
    /// Read is flagged proper-pair.
    pub is_proper_pair: bool,
    /// Mean probability-correct of the read's bases.
    pub avg_quality: f64,
}

/// Reads sharing one allele length.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AlleleBucket {
    /// Allele length.
    pub allele_length: usize,
    /// Supporting reads.
    pub occurrences: u32,
    /// Supporting reads on the reverse strand.
    pub reverse: u32,
    /// Mean minimum flank run.
    pub avg_min_flank: f64,
    /// Mean read quality.
    pub avg_quality: f64,
}

impl AlleleBucket {
    fn seed(read: &ScoredRead) -> Self {
        Self {
            allele_length: read.allele_length,
            occurrences: 0,
            reverse: 0,
            avg_min_flank: 0.0,
            avg_quality: 0.0,
        }
    }

    fn observe(&mut self, read: &ScoredRead) {
        self.occurrences += 1;
        self.reverse += u32::from(read.is_reverse);
        self.avg_min_flank += read.min_flank as f64;
        self.avg_quality += read.avg_quality;
    }

    fn finish(&mut self) {
        let n = f64::from(self.occurrences);
        self.avg_min_flank /= n;
        self.avg_quality /= n;
    }
}

/// Allele buckets of one region, most supported first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlleleTally {
    buckets: Vec<AlleleBucket>,
}

impl AlleleTally {
    /// Group reads by allele length.
    ///
    /// Buckets are created in discovery order, then stably sorted by
    /// descending occurrence.
    pub fn from_reads(reads: &[ScoredRead]) -> Self {
        let mut buckets: Vec<AlleleBucket> = Vec::new();
        for read in reads {
            let idx = match buckets
                .iter()
                .position(|bucket| bucket.allele_length == read.allele_length)
            {
                Some(idx) => idx,
                None => {
                    buckets.push(AlleleBucket::seed(read));
                    buckets.len() - 1
                }
            };
            buckets[idx].observe(read);
        }
        buckets.iter_mut().for_each(AlleleBucket::finish);
        buckets.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
        Self { buckets }
    }

    /// Buckets, most supported first.
    pub fn buckets(&self) -> &[AlleleBucket] {
        &self.buckets
    }

    /// Whether no read survived.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Reads across all buckets.
    pub fn total_reads(&self) -> u32 {
        self.buckets.iter().map(|bucket| bucket.occurrences).sum()
    }

    /// `(top - 1) / (total - 1)`; undefined with no reads or a single read.
    pub fn concordance(&self) -> Option<f64> {
        let top = self.buckets.first()?.occurrences;
        let total = self.total_reads();
        if total <= 1 {
            return None;
        }
        Some((f64::from(top) - 1.0) / (f64::from(total) - 1.0))
    }

    /// Longest allele among the most supported buckets.
    pub fn majority_length(&self) -> Option<usize> {
        let top = self.buckets.first()?.occurrences;
        self.buckets
            .iter()
            .take_while(|bucket| bucket.occurrences == top)
            .map(|bucket| bucket.allele_length)
            .max()
    }

    /// Histogram text for the call line: `NA`, `L`, or `L[n] L[n] ...`.
    pub fn histogram(&self) -> String {
        match self.buckets.as_slice() {
            [] => "NA".to_string(),
            [only] if only.occurrences <= 1 => "NA".to_string(),
            [only] => only.allele_length.to_string(),
            many => many
                .iter()
                .map(|bucket| format!("{}[{}]", bucket.allele_length, bucket.occurrences))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::{realign_read, CigarOp, CigarOpKind};

    const REFERENCE: &[u8] = b"TTTTGGGGCCACACACACACGGCCTTTTAACCGGTTAACC";

    fn window() -> ReferenceWindow {
        ReferenceWindow {
            left_flank: REFERENCE[5..10].to_vec(),
            core: REFERENCE[10..20].to_vec(),
            right_flank: REFERENCE[20..25].to_vec(),
        }
    }

    fn aligned(sequence: Vec<u8>) -> AlignedRead {
        let len = sequence.len() as u32;
        AlignedRead::new(
            "chr1",
            0,
            40,
            vec![CigarOp::new(CigarOpKind::Match, len)],
            sequence,
            vec![30; len as usize],
            false,
        )
    }

    fn scored(allele_length: usize, min_flank: usize, avg_quality: f64, is_reverse: bool) -> ScoredRead {
        ScoredRead {
            allele_length,
            map_quality: 60,
            min_flank,
            is_reverse,
            is_proper_pair: true,
            avg_quality,
        }
    }

    #[test]
    fn flank_runs_stop_at_first_mismatch() {
        let mut seq = REFERENCE[0..25].to_vec();
        seq[7] = b'T'; // third base left of the core
        seq[21] = b'A'; // second base right of the core
        let read = aligned(seq);
        let realigned = realign_read(&read, 11, 5, 10).unwrap();
        let runs = FlankRuns::measure(&realigned, &window());
        assert_eq!(runs, FlankRuns { left: 2, right: 1 });
        assert_eq!(runs.min(), 1);
    }

    #[test]
    fn truncated_reference_flank_limits_run() {
        let read = aligned(REFERENCE[0..25].to_vec());
        let realigned = realign_read(&read, 11, 5, 10).unwrap();
        let short = ReferenceWindow {
            left_flank: REFERENCE[8..10].to_vec(),
            ..window()
        };
        assert_eq!(FlankRuns::measure(&realigned, &short).left, 2);
    }

    #[test]
    fn filter_checks_apply_in_order() {
        let config = GenotyperConfig::default()
            .with_min_map_quality(50)
            .with_read_length_bounds(Some(20), None);
        let filter = ReadFilter::from_config(&config);
        let read = aligned(REFERENCE[0..25].to_vec());
        let realigned = realign_read(&read, 11, 5, 10).unwrap();
        assert_eq!(
            filter.screen(&read, &realigned, &window()),
            Err(FilterReason::MapQuality(40))
        );

        let short = aligned(REFERENCE[2..20].to_vec());
        let short = AlignedRead { pos: 2, ..short };
        let realigned = realign_read(&short, 11, 5, 10).unwrap();
        assert_eq!(
            filter.screen(&short, &realigned, &window()),
            Err(FilterReason::ReadLength(18))
        );
    }

    #[test]
    fn multi_mapped_and_unpaired_reads_are_dropped_on_request() {
        let config = GenotyperConfig::default()
            .with_exclude_multi_mapped(true)
            .with_properly_paired_only(true);
        let filter = ReadFilter::from_config(&config);
        let read = aligned(REFERENCE[0..25].to_vec()).with_tag(*b"XT", "R");
        let realigned = realign_read(&read, 11, 5, 10).unwrap();
        assert_eq!(
            filter.screen(&read, &realigned, &window()),
            Err(FilterReason::MultiMapped)
        );

        let read = aligned(REFERENCE[0..25].to_vec()).with_tag(*b"XT", "U");
        assert_eq!(
            filter.screen(&read, &realigned, &window()),
            Err(FilterReason::NotProperPair)
        );
        let read = read.with_flags(0x1 | 0x2);
        assert_eq!(
            filter.screen(&read, &realigned, &window()),
            Ok(FlankRuns { left: 5, right: 5 })
        );
    }

    #[test]
    fn core_must_be_spanned() {
        let filter = ReadFilter::from_config(&GenotyperConfig::default());
        let read = aligned(REFERENCE[12..32].to_vec());
        let read = AlignedRead { pos: 12, ..read };
        let realigned = realign_read(&read, 11, 5, 10).unwrap();
        assert_eq!(
            filter.screen(&read, &realigned, &window()),
            Err(FilterReason::CoreNotSpanned)
        );
    }

    #[test]
    fn buckets_aggregate_and_sort_by_support() {
        let reads = vec![
            scored(13, 4, 0.9, false),
            scored(10, 5, 0.99, true),
            scored(10, 3, 0.97, false),
            scored(13, 6, 0.95, true),
            scored(10, 4, 0.98, false),
            scored(7, 5, 0.9, false),
        ];
        let tally = AlleleTally::from_reads(&reads);
        let lengths: Vec<usize> = tally.buckets().iter().map(|b| b.allele_length).collect();
        assert_eq!(lengths, vec![10, 13, 7]);
        assert_eq!(tally.total_reads(), 6);

        let ten = &tally.buckets()[0];
        assert_eq!((ten.occurrences, ten.reverse), (3, 1));
        assert!((ten.avg_min_flank - 4.0).abs() < 1e-12);
        assert!((ten.avg_quality - 0.98).abs() < 1e-12);

        assert!((tally.concordance().unwrap() - 0.4).abs() < 1e-12);
        assert_eq!(tally.majority_length(), Some(10));
        assert_eq!(tally.histogram(), "10[3] 13[2] 7[1]");
    }

    #[test]
    fn majority_prefers_longest_of_tied_buckets() {
        let reads = vec![scored(10, 5, 0.99, false), scored(13, 5, 0.99, false)];
        let tally = AlleleTally::from_reads(&reads);
        assert_eq!(tally.majority_length(), Some(13));
        assert_eq!(tally.concordance(), Some(0.0));
    }

    #[test]
    fn degenerate_tallies() {
        let empty = AlleleTally::from_reads(&[]);
        assert_eq!(empty.concordance(), None);
        assert_eq!(empty.majority_length(), None);
        assert_eq!(empty.histogram(), "NA");

        let single = AlleleTally::from_reads(&[scored(10, 5, 0.99, false)]);
        assert_eq!(single.concordance(), None);
        assert_eq!(single.histogram(), "NA");

        let agreed = AlleleTally::from_reads(&[scored(10, 5, 0.99, false), scored(10, 5, 0.99, false)]);
        assert_eq!(agreed.concordance(), Some(1.0));
        assert_eq!(agreed.histogram(), "10");
    }
}
