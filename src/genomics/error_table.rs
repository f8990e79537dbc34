//! Sequencing-error pseudo-counts for repeat tracts.
//!
//! The table is indexed by repeat unit length (1..=5), reference tract
//! length bucket (`min(len, 70) / 15`) and read quality bucket. Each cell is
//! a pair of pseudo-counts: reads reporting the true tract length versus
//! reads reporting some other length.
//!
//! A measured table can be loaded from a text file with one cell per line:
//!
//! ```text
//! # unit  length_bucket  quality_bucket  correct  error
//! 1       0              0               920      80
//! ```
//!
//! Units run from 1 to 5 and both buckets from 0 to 4. Every cell must be
//! present exactly once; blank lines and `#` comments are ignored.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

/// Longest reference tract distinguished by the table.
pub const MAX_REFERENCE_LENGTH: usize = 70;
/// Longest repeat unit distinguished by the table.
pub const MAX_UNIT_LENGTH: u32 = 5;

const LENGTH_BUCKET_WIDTH: usize = 15;
const BUCKETS: usize = 5;

/// Pseudo-counts of correct and erroneous length observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorCounts {
    /// Observations matching the true length.
    pub correct: u32,
    /// Observations of any other length.
    pub error: u32,
}

const fn c(correct: u32, error: u32) -> ErrorCounts {
    ErrorCounts { correct, error }
}

type Table = [[[ErrorCounts; BUCKETS]; BUCKETS]; BUCKETS];

/// Built-in pseudo-counts. These are hand-set placeholders, not measured from
/// sequencing data: the error share falls with unit length and grows with
/// tract length and quality bucket. Supply a measured table with
/// [`ErrorTable::from_path`] for production calls.
#[rustfmt::skip]
static PLACEHOLDER: Table = [
    // unit length 1
    [
        [c(920, 80), c(900, 100), c(872, 128), c(832, 168), c(776, 224)],
        [c(880, 120), c(850, 150), c(808, 192), c(748, 252), c(664, 336)],
        [c(824, 176), c(780, 220), c(718, 282), c(630, 370), c(550, 450)],
        [c(760, 240), c(700, 300), c(616, 384), c(550, 450), c(550, 450)],
        [c(696, 304), c(620, 380), c(550, 450), c(550, 450), c(550, 450)],
    ],
    // unit length 2
    [
        [c(960, 40), c(950, 50), c(936, 64), c(916, 84), c(888, 112)],
        [c(940, 60), c(925, 75), c(904, 96), c(874, 126), c(832, 168)],
        [c(912, 88), c(890, 110), c(859, 141), c(815, 185), c(754, 246)],
        [c(880, 120), c(850, 150), c(808, 192), c(748, 252), c(664, 336)],
        [c(848, 152), c(810, 190), c(757, 243), c(681, 319), c(574, 426)],
    ],
    // unit length 3
    [
        [c(975, 25), c(969, 31), c(960, 40), c(947, 53), c(930, 70)],
        [c(962, 38), c(953, 47), c(940, 60), c(921, 79), c(895, 105)],
        [c(945, 55), c(931, 69), c(912, 88), c(884, 116), c(846, 154)],
        [c(925, 75), c(906, 94), c(880, 120), c(842, 158), c(790, 210)],
        [c(905, 95), c(881, 119), c(848, 152), c(800, 200), c(734, 266)],
    ],
    // unit length 4
    [
        [c(982, 18), c(978, 22), c(971, 29), c(962, 38), c(950, 50)],
        [c(973, 27), c(966, 34), c(957, 43), c(943, 57), c(924, 76)],
        [c(960, 40), c(950, 50), c(937, 63), c(917, 83), c(889, 111)],
        [c(946, 54), c(933, 67), c(914, 86), c(887, 113), c(849, 151)],
        [c(932, 68), c(915, 85), c(891, 109), c(856, 144), c(808, 192)],
    ],
    // unit length 5
    [
        [c(988, 12), c(985, 15), c(981, 19), c(975, 25), c(966, 34)],
        [c(982, 18), c(977, 23), c(971, 29), c(962, 38), c(950, 50)],
        [c(974, 26), c(967, 33), c(958, 42), c(945, 55), c(926, 74)],
        [c(964, 36), c(955, 45), c(942, 58), c(924, 76), c(899, 101)],
        [c(954, 46), c(943, 57), c(927, 73), c(904, 96), c(872, 128)],
    ],
];

/// Quality bucket for a mean probability-correct:
/// `trunc(clamp(-30 * log10(q), 0, 4))`. Undefined qualities fall in the
/// worst bucket.
pub(crate) fn quality_bucket(avg_quality: f64) -> usize {
    let scaled = -30.0 * avg_quality.log10();
    if scaled.is_nan() {
        return BUCKETS - 1;
    }
    scaled.clamp(0.0, (BUCKETS - 1) as f64) as usize
}

/// Table indices for a tract: unit clamped to `1..=5`, reference length
/// clamped to 70 and bucketed by 15, then the quality bucket.
fn cell_index(unit_length: u32, reference_length: usize, avg_quality: f64) -> (usize, usize, usize) {
    let unit = unit_length.clamp(1, MAX_UNIT_LENGTH) as usize - 1;
    let length = reference_length.min(MAX_REFERENCE_LENGTH) / LENGTH_BUCKET_WIDTH;
    (unit, length, quality_bucket(avg_quality))
}

/// Failure to load an error table.
#[derive(Debug, Error)]
pub enum ErrorTableError {
    /// The file could not be read.
    #[error("failed to read error table {path}: {source}")]
    Read {
        /// Table path.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// A line does not hold five unsigned integers.
    #[error("line {line}: expected `unit length_bucket quality_bucket correct error`, found '{content}'")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// Offending text.
        content: String,
    },
    /// A unit or bucket index lies outside the table.
    #[error("line {line}: cell ({unit}, {length}, {quality}) outside the table")]
    OutOfRange {
        /// 1-based line number.
        line: usize,
        /// Unit length as written.
        unit: usize,
        /// Length bucket as written.
        length: usize,
        /// Quality bucket as written.
        quality: usize,
    },
    /// A cell appears twice.
    #[error("line {line}: duplicate cell ({unit}, {length}, {quality})")]
    Duplicate {
        /// 1-based line number.
        line: usize,
        /// Unit length.
        unit: usize,
        /// Length bucket.
        length: usize,
        /// Quality bucket.
        quality: usize,
    },
    /// A cell never appears.
    #[error("missing cell ({unit}, {length}, {quality})")]
    Missing {
        /// Unit length.
        unit: usize,
        /// Length bucket.
        length: usize,
        /// Quality bucket.
        quality: usize,
    },
}

/// A complete (unit × length × quality) pseudo-count table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorTable {
    cells: Table,
}

impl ErrorTable {
    /// Table whose cell for unit length `unit` (1..=5), length bucket and
    /// quality bucket (both 0..=4) is `cell(unit, length, quality)`.
    pub fn from_fn(mut cell: impl FnMut(u32, usize, usize) -> ErrorCounts) -> Self {
        let mut cells = [[[c(0, 0); BUCKETS]; BUCKETS]; BUCKETS];
        for (unit, lengths) in cells.iter_mut().enumerate() {
            for (length, qualities) in lengths.iter_mut().enumerate() {
                for (quality, slot) in qualities.iter_mut().enumerate() {
                    *slot = cell(unit as u32 + 1, length, quality);
                }
            }
        }
        Self { cells }
    }

    /// Parse the line format described in the module docs.
    pub fn parse(text: &str) -> Result<Self, ErrorTableError> {
        let mut cells: [[[Option<ErrorCounts>; BUCKETS]; BUCKETS]; BUCKETS] = Default::default();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let content = raw.split('#').next().unwrap_or_default().trim();
            if content.is_empty() {
                continue;
            }
            let malformed = || ErrorTableError::Malformed {
                line,
                content: content.to_string(),
            };
            let fields = content
                .split_whitespace()
                .map(str::parse::<u64>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| malformed())?;
            let [unit, length, quality, correct, error] = fields[..] else {
                return Err(malformed());
            };
            let (correct, error) = match (u32::try_from(correct), u32::try_from(error)) {
                (Ok(correct), Ok(error)) => (correct, error),
                _ => return Err(malformed()),
            };
            let (unit, length, quality) = (unit as usize, length as usize, quality as usize);
            if !(1..=BUCKETS).contains(&unit) || length >= BUCKETS || quality >= BUCKETS {
                return Err(ErrorTableError::OutOfRange {
                    line,
                    unit,
                    length,
                    quality,
                });
            }
            let slot = &mut cells[unit - 1][length][quality];
            if slot.is_some() {
                return Err(ErrorTableError::Duplicate {
                    line,
                    unit,
                    length,
                    quality,
                });
            }
            *slot = Some(c(correct, error));
        }

        let mut missing = None;
        let table = Self::from_fn(|unit, length, quality| {
            let cell = cells[unit as usize - 1][length][quality];
            if cell.is_none() && missing.is_none() {
                missing = Some((unit as usize, length, quality));
            }
            cell.unwrap_or(c(0, 0))
        });
        match missing {
            Some((unit, length, quality)) => Err(ErrorTableError::Missing {
                unit,
                length,
                quality,
            }),
            None => Ok(table),
        }
    }

    /// Read and parse a table file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ErrorTableError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ErrorTableError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    fn lookup(&self, unit_length: u32, reference_length: usize, avg_quality: f64) -> ErrorCounts {
        let (unit, length, quality) = cell_index(unit_length, reference_length, avg_quality);
        self.cells[unit][length][quality]
    }
}

/// Source of error pseudo-counts for the likelihood engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ErrorModel {
    /// Built-in placeholder table.
    #[default]
    Builtin,
    /// Table loaded or constructed by the caller.
    Table(Arc<ErrorTable>),
    /// One pair of pseudo-counts everywhere, derived from a manual error rate.
    Uniform(ErrorCounts),
}

impl ErrorModel {
    /// Built-in table, or a uniform model when a manual rate is given.
    pub fn from_rate(rate: Option<f64>) -> Self {
        match rate {
            Some(rate) => ErrorModel::Uniform(c(
                ((1.0 - rate) * 1000.0).round() as u32,
                (rate * 1000.0).round() as u32,
            )),
            None => ErrorModel::Builtin,
        }
    }

    /// Pseudo-counts for an allele observed in a tract of `reference_length`
    /// bases with unit length `unit_length` and mean read quality `avg_quality`.
    ///
    /// Reference length is clamped to 70 and unit length to `1..=5`.
    pub fn lookup(&self, unit_length: u32, reference_length: usize, avg_quality: f64) -> ErrorCounts {
        match self {
            ErrorModel::Uniform(counts) => *counts,
            ErrorModel::Table(table) => table.lookup(unit_length, reference_length, avg_quality),
            ErrorModel::Builtin => {
                let (unit, length, quality) = cell_index(unit_length, reference_length, avg_quality);
                PLACEHOLDER[unit][length][quality]
            }
        }
    }
}
