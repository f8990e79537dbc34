//! Reference and alignment collaborators.
//!
//! The genotyper only needs two capabilities from the outside world: random
//! access into the reference genome and a region-scoped stream of aligned
//! reads. Both are traits so the per-region pipeline can run over indexed
//! FASTA/BAM files through `rust-htslib` or over in-memory fixtures.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rust_htslib::bam::{self, record::Aux, Read};
use rust_htslib::faidx;
use thiserror::Error;

use super::{AlignedRead, CigarOp, CigarOpKind};

/// Failures raised by reference or alignment collaborators.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Error reported by htslib while opening or reading a file.
    #[error("htslib error: {0}")]
    Htslib(#[from] rust_htslib::errors::Error),
    /// Requested chromosome is not present in the reference or BAM header.
    #[error("unknown chromosome `{0}`")]
    UnknownChromosome(String),
    /// Alignment record could not be converted.
    #[error("malformed alignment record `{name}`: {reason}")]
    MalformedRecord {
        /// Read name of the offending record.
        name: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Random access to reference sequence.
pub trait ReferenceProvider {
    /// Total length of a chromosome.
    fn sequence_length(&self, chrom: &str) -> Result<u64, SourceError>;

    /// Subsequence starting at a 0-based offset. The result may be shorter
    /// than `len` when the request runs past the chromosome end.
    fn subsequence(&self, chrom: &str, offset: u64, len: u64) -> Result<String, SourceError>;
}

/// Region-scoped stream of aligned reads.
pub trait AlignmentSource {
    /// Restrict the stream to reads overlapping `[start, end)` (0-based).
    fn set_region(&mut self, chrom: &str, start: u64, end: u64) -> Result<(), SourceError>;

    /// Next read overlapping the active region, in coordinate order.
    fn next_alignment(&mut self) -> Option<Result<AlignedRead, SourceError>>;
}

/// Indexed FASTA reference backed by htslib's `faidx`.
///
/// The `.fai` index is created next to the FASTA file when it is missing.
pub struct FastaReference {
    reader: faidx::Reader,
}

impl std::fmt::Debug for FastaReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastaReference").finish_non_exhaustive()
    }
}

impl FastaReference {
    /// Open a FASTA file, building its index if needed.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let reader = faidx::Reader::from_path(path)?;
        Ok(Self { reader })
    }
}

impl ReferenceProvider for FastaReference {
    fn sequence_length(&self, chrom: &str) -> Result<u64, SourceError> {
        // faidx reports unknown names as -1 cast to an unsigned length.
        let len = self.reader.fetch_seq_len(chrom);
        if len as i64 <= 0 {
            return Err(SourceError::UnknownChromosome(chrom.to_string()));
        }
        Ok(len)
    }

    fn subsequence(&self, chrom: &str, offset: u64, len: u64) -> Result<String, SourceError> {
        if len == 0 {
            return Ok(String::new());
        }
        let begin = offset as usize;
        let end = (offset + len - 1) as usize;
        Ok(self.reader.fetch_seq_string(chrom, begin, end)?)
    }
}

/// Reference held in memory, keyed by chromosome name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReference {
    sequences: HashMap<String, String>,
}

impl InMemoryReference {
    /// Create an empty reference.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a chromosome.
    pub fn with_sequence(mut self, chrom: impl Into<String>, sequence: impl Into<String>) -> Self {
        self.sequences.insert(chrom.into(), sequence.into());
        self
    }
}

impl ReferenceProvider for InMemoryReference {
    fn sequence_length(&self, chrom: &str) -> Result<u64, SourceError> {
        self.sequences
            .get(chrom)
            .map(|seq| seq.len() as u64)
            .ok_or_else(|| SourceError::UnknownChromosome(chrom.to_string()))
    }

    fn subsequence(&self, chrom: &str, offset: u64, len: u64) -> Result<String, SourceError> {
        let seq = self
            .sequences
            .get(chrom)
            .ok_or_else(|| SourceError::UnknownChromosome(chrom.to_string()))?;
        let start = (offset as usize).min(seq.len());
        let end = (offset.saturating_add(len) as usize).min(seq.len());
        Ok(seq[start..end].to_string())
    }
}

/// Indexed BAM file read through htslib.
pub struct BamAlignmentSource {
    reader: bam::IndexedReader,
    record: bam::Record,
    chrom: Arc<str>,
    active: bool,
}

impl std::fmt::Debug for BamAlignmentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BamAlignmentSource")
            .field("chrom", &self.chrom)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl BamAlignmentSource {
    /// Open a coordinate-sorted BAM file with an accompanying `.bai` index.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let reader = bam::IndexedReader::from_path(path)?;
        Ok(Self {
            reader,
            record: bam::Record::new(),
            chrom: Arc::from(""),
            active: false,
        })
    }

    fn convert(&self) -> Result<AlignedRead, SourceError> {
        let record = &self.record;
        let name = String::from_utf8_lossy(record.qname()).into_owned();
        let pos = u32::try_from(record.pos()).map_err(|_| SourceError::MalformedRecord {
            name: name.clone(),
            reason: format!("position {} out of range", record.pos()),
        })?;

        let cigar = record
            .cigar()
            .iter()
            .map(|op| {
                use rust_htslib::bam::record::Cigar;
                match *op {
                    Cigar::Match(len) => CigarOp::new(CigarOpKind::Match, len),
                    Cigar::Ins(len) => CigarOp::new(CigarOpKind::Insertion, len),
                    Cigar::Del(len) => CigarOp::new(CigarOpKind::Deletion, len),
                    Cigar::RefSkip(len) => CigarOp::new(CigarOpKind::Skip, len),
                    Cigar::SoftClip(len) => CigarOp::new(CigarOpKind::SoftClip, len),
                    Cigar::HardClip(len) => CigarOp::new(CigarOpKind::HardClip, len),
                    Cigar::Pad(len) => CigarOp::new(CigarOpKind::Padding, len),
                    Cigar::Equal(len) => CigarOp::new(CigarOpKind::Equal, len),
                    Cigar::Diff(len) => CigarOp::new(CigarOpKind::Diff, len),
                }
            })
            .collect();

        let mut sequence = record.seq().as_bytes();
        sequence.make_ascii_uppercase();

        let mut read = AlignedRead::new(
            Arc::clone(&self.chrom),
            pos,
            record.mapq(),
            cigar,
            sequence,
            record.qual().to_vec(),
            false,
        )
        .with_name(name)
        .with_flags(record.flags());

        match record.aux(b"XT") {
            Ok(Aux::Char(value)) => read = read.with_tag(*b"XT", char::from(value).to_string()),
            Ok(Aux::String(value)) => read = read.with_tag(*b"XT", value),
            _ => {}
        }
        Ok(read)
    }
}

impl AlignmentSource for BamAlignmentSource {
    fn set_region(&mut self, chrom: &str, start: u64, end: u64) -> Result<(), SourceError> {
        if self.reader.header().tid(chrom.as_bytes()).is_none() {
            return Err(SourceError::UnknownChromosome(chrom.to_string()));
        }
        self.reader.fetch((chrom, start as i64, end as i64))?;
        self.chrom = Arc::from(chrom);
        self.active = true;
        Ok(())
    }

    fn next_alignment(&mut self) -> Option<Result<AlignedRead, SourceError>> {
        if !self.active {
            return None;
        }
        match self.reader.read(&mut self.record) {
            None => {
                self.active = false;
                None
            }
            Some(Err(err)) => Some(Err(err.into())),
            Some(Ok(())) => Some(self.convert()),
        }
    }
}

/// Reads held in memory; `set_region` selects those overlapping the window.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAlignments {
    reads: Vec<AlignedRead>,
    selected: Vec<usize>,
    cursor: usize,
}

impl InMemoryAlignments {
    /// Wrap a set of reads. Order is preserved when streaming.
    pub fn new(reads: Vec<AlignedRead>) -> Self {
        Self {
            reads,
            selected: Vec::new(),
            cursor: 0,
        }
    }
}

impl AlignmentSource for InMemoryAlignments {
    fn set_region(&mut self, chrom: &str, start: u64, end: u64) -> Result<(), SourceError> {
        self.selected = self
            .reads
            .iter()
            .enumerate()
            .filter(|(_, read)| {
                let read_start = u64::from(read.pos);
                let read_end = u64::from(read.end()).max(read_start + 1);
                &*read.chrom == chrom && read_start < end && read_end > start
            })
            .map(|(idx, _)| idx)
            .collect();
        self.cursor = 0;
        Ok(())
    }

    fn next_alignment(&mut self) -> Option<Result<AlignedRead, SourceError>> {
        let idx = *self.selected.get(self.cursor)?;
        self.cursor += 1;
        Some(Ok(self.reads[idx].clone()))
    }
}
