//! Target region parsing and reference window resolution.

use std::fmt;

use thiserror::Error;

use super::ReferenceProvider;
use crate::GenotypingError;

/// Recoverable problems with a single region line. The region is skipped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegionSpecError {
    /// The line has no tab separating coordinates from metadata.
    #[error("no tab between coordinates and metadata")]
    MissingTab,
    /// The metadata column is empty or has no `_` separators.
    #[error("malformed metadata column `{0}`")]
    MalformedMetadata(String),
    /// The repeat unit length (first metadata field) is not an integer.
    #[error("invalid repeat unit length `{0}`")]
    InvalidUnitLength(String),
    /// Coordinates are not of the form `<chrom>:<start>-<stop>` with start >= 1.
    #[error("invalid coordinates `{0}`")]
    InvalidCoordinates(String),
}

/// One target repeat parsed from a region line.
///
/// Lines look like `chr1:1000-1019\t2_10_20_95.5_AC`: the metadata column is
/// `_`-separated with the unit length first, purity fourth and the unit
/// sequence last.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RegionSpec {
    /// Coordinate text as it appeared before the tab.
    pub region: String,
    /// Metadata column as it appeared after the tab.
    pub metadata: String,
    /// Chromosome name.
    pub chrom: String,
    /// 1-based inclusive start.
    pub start: u64,
    /// 1-based inclusive stop.
    pub stop: u64,
    /// Repeat unit length.
    pub unit_length: u32,
    /// Reference purity (percent match), 0 when absent.
    pub purity: f64,
    /// Repeat unit sequence.
    pub unit: String,
}

impl RegionSpec {
    /// Parse a tab-separated region line.
    pub fn parse(line: &str) -> Result<Self, RegionSpecError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (region, metadata) = line.split_once('\t').ok_or(RegionSpecError::MissingTab)?;
        if !metadata.contains('_') {
            return Err(RegionSpecError::MalformedMetadata(metadata.to_string()));
        }

        let fields: Vec<&str> = metadata.split('_').collect();
        let unit_length = fields[0]
            .trim()
            .parse::<u32>()
            .map_err(|_| RegionSpecError::InvalidUnitLength(fields[0].to_string()))?;
        let purity = fields
            .get(3)
            .and_then(|field| field.trim().parse::<f64>().ok())
            .unwrap_or(0.0);
        let unit = fields.last().copied().unwrap_or_default().to_string();

        let invalid = || RegionSpecError::InvalidCoordinates(region.to_string());
        let (chrom, coords) = region.rsplit_once(':').ok_or_else(invalid)?;
        let (start, stop) = coords.split_once('-').ok_or_else(invalid)?;
        let start = start.trim().parse::<u64>().map_err(|_| invalid())?;
        let stop = stop.trim().parse::<u64>().map_err(|_| invalid())?;
        if chrom.is_empty() || start == 0 {
            return Err(invalid());
        }

        Ok(Self {
            region: region.to_string(),
            metadata: metadata.to_string(),
            chrom: chrom.to_string(),
            start,
            stop,
            unit_length,
            purity,
            unit,
        })
    }

    /// Number of reference bases in the repeat core (`stop - start + 1`).
    pub fn length(&self) -> u64 {
        (self.stop + 1).saturating_sub(self.start)
    }

    /// 0-based half-open window used to query overlapping reads.
    pub fn query_interval(&self) -> (u64, u64) {
        (self.start - 1, self.stop)
    }
}

impl fmt::Display for RegionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.region, self.metadata)
    }
}

/// Reference bases around one target: left flank, repeat core and right
/// flank, all uppercase. Flanks are shorter than the margin near
/// chromosome ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceWindow {
    /// Bases preceding the core.
    pub left_flank: Vec<u8>,
    /// Repeat core; its length equals the target length.
    pub core: Vec<u8>,
    /// Bases following the core.
    pub right_flank: Vec<u8>,
}

impl ReferenceWindow {
    /// Fetch the window for `spec` with `flank` bases on each side.
    ///
    /// An inverted range or a target running past the chromosome end is fatal.
    pub fn resolve<R: ReferenceProvider + ?Sized>(
        spec: &RegionSpec,
        reference: &R,
        flank: usize,
    ) -> Result<Self, GenotypingError> {
        if spec.start > spec.stop {
            return Err(GenotypingError::InvertedRange {
                region: spec.region.clone(),
            });
        }
        let chrom_len = reference.sequence_length(&spec.chrom)?;
        if spec.stop > chrom_len {
            return Err(GenotypingError::OutsideChromosome {
                region: spec.region.clone(),
                chrom_len,
            });
        }

        let flank = flank as u64;
        let core_offset = spec.start - 1;
        let left_offset = core_offset.saturating_sub(flank);
        let right_len = flank.min(chrom_len - spec.stop);

        let fetch = |offset: u64, len: u64| -> Result<Vec<u8>, GenotypingError> {
            let mut bases = reference
                .subsequence(&spec.chrom, offset, len)?
                .into_bytes();
            bases.make_ascii_uppercase();
            Ok(bases)
        };

        Ok(Self {
            left_flank: fetch(left_offset, core_offset - left_offset)?,
            core: fetch(core_offset, spec.length())?,
            right_flank: fetch(spec.stop, right_len)?,
        })
    }

    /// Length of the repeat core.
    pub fn core_len(&self) -> usize {
        self.core.len()
    }

    /// Reference base preceding the core, `N` at the chromosome start.
    pub fn anchor_base(&self) -> u8 {
        self.left_flank.last().copied().unwrap_or(b'N')
    }
}
