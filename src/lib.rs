//! # strcall
//!
//! Short tandem repeat (microsatellite) genotyping from aligned sequencing
//! reads.
//!
//! For every target repeat listed in a region file the genotyper fetches the
//! reference window around the repeat, projects each overlapping read onto
//! it, synchronises insertion columns across reads, filters reads on flank
//! agreement and mapping properties, and scores homozygous and heterozygous
//! allele-length hypotheses with a beta-multinomial error model.
//!
//! ## Outputs
//!
//! 1. **VCF**: one record per variant repeat, with allele-length offsets and
//!    a full genotype-likelihood vector.
//! 2. **Report**: per-region call line followed by the synchronised read matrix.
//! 3. **Calls**: one tab-separated genotype line per region.
//!
//! ## Usage Example
//!
//! ```ignore
//! use strcall::{Genotyper, GenotyperConfig};
//! use strcall::genomics::{BamAlignmentSource, FastaReference};
//!
//! let genotyper = Genotyper::new(GenotyperConfig::default().with_min_map_quality(20))?;
//! let output = genotyper.run(
//!     &lines,
//!     || FastaReference::from_path("ref.fa"),
//!     || BamAlignmentSource::from_path("sample.bam"),
//! )?;
//! print!("{}", output.vcf());
//! ```

#![warn(missing_docs, missing_debug_implementations)]

pub mod genomics; // Repeat genotyping pipeline
pub mod util; // Numeric helpers

use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tracing::{debug, info};

use genomics::{
    render_vcf, AlignmentSource, ErrorModel, ErrorTable, ReferenceProvider, RegionCaller, RegionOutput, SourceError,
    VariantRecord,
};

/// Number of chromosome copies assumed when scoring genotypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Ploidy {
    /// One allele per sample; heterozygous hypotheses are skipped.
    Haploid,
    /// Two alleles per sample.
    #[default]
    Diploid,
}

/// Run-wide genotyping parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GenotyperConfig {
    /// Reference bases examined on each side of the repeat core.
    pub flank_margin: usize,
    /// Smallest accepted read size.
    pub min_read_length: Option<u32>,
    /// Largest accepted read size.
    pub max_read_length: Option<u32>,
    /// Consecutive matching bases required left of the core.
    pub min_left_flank: usize,
    /// Consecutive matching bases required right of the core.
    pub min_right_flank: usize,
    /// Mapping-quality floor.
    pub min_map_quality: u8,
    /// Drop reads whose `XT` tag marks a repeat hit.
    pub exclude_multi_mapped: bool,
    /// Drop reads not flagged proper-pair.
    pub properly_paired_only: bool,
    /// Emit VCF records for invariant sites.
    pub emit_all: bool,
    /// Ploidy mode.
    pub ploidy: Ploidy,
    /// Uniform error rate replacing the built-in table.
    pub error_rate: Option<f64>,
    /// Measured error table replacing the built-in one.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub error_table: Option<Arc<ErrorTable>>,
    /// Worker threads; `None` uses every available processor.
    pub threads: Option<usize>,
    /// Produce the report output.
    pub write_report: bool,
    /// Produce the calls output.
    pub write_calls: bool,
}

impl Default for GenotyperConfig {
    fn default() -> Self {
        Self {
            flank_margin: 20,
            min_read_length: None,
            max_read_length: None,
            min_left_flank: 3,
            min_right_flank: 3,
            min_map_quality: 0,
            exclude_multi_mapped: false,
            properly_paired_only: false,
            emit_all: false,
            ploidy: Ploidy::Diploid,
            error_rate: None,
            error_table: None,
            threads: None,
            write_report: true,
            write_calls: true,
        }
    }
}

impl GenotyperConfig {
    /// Set the flank margin.
    pub fn with_flank_margin(mut self, flank_margin: usize) -> Self {
        self.flank_margin = flank_margin;
        self
    }

    /// Set read-size bounds.
    pub fn with_read_length_bounds(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.min_read_length = min;
        self.max_read_length = max;
        self
    }

    /// Set required consecutive flank matches on each side.
    pub fn with_flank_matches(mut self, left: usize, right: usize) -> Self {
        self.min_left_flank = left;
        self.min_right_flank = right;
        self
    }

    /// Set the mapping-quality floor.
    pub fn with_min_map_quality(mut self, min_map_quality: u8) -> Self {
        self.min_map_quality = min_map_quality;
        self
    }

    /// Drop multi-mapped reads.
    pub fn with_exclude_multi_mapped(mut self, enabled: bool) -> Self {
        self.exclude_multi_mapped = enabled;
        self
    }

    /// Keep only proper pairs.
    pub fn with_properly_paired_only(mut self, enabled: bool) -> Self {
        self.properly_paired_only = enabled;
        self
    }

    /// Emit invariant sites.
    pub fn with_emit_all(mut self, enabled: bool) -> Self {
        self.emit_all = enabled;
        self
    }

    /// Set the ploidy mode.
    pub fn with_ploidy(mut self, ploidy: Ploidy) -> Self {
        self.ploidy = ploidy;
        self
    }

    /// Replace the built-in error table with a uniform rate.
    pub fn with_error_rate(mut self, rate: Option<f64>) -> Self {
        self.error_rate = rate;
        self
    }

    /// Replace the built-in error table with a loaded one.
    pub fn with_error_table(mut self, table: Option<ErrorTable>) -> Self {
        self.error_table = table.map(Arc::new);
        self
    }

    /// Pseudo-count source selected by these settings.
    pub fn error_model(&self) -> ErrorModel {
        match &self.error_table {
            Some(table) => ErrorModel::Table(Arc::clone(table)),
            None => ErrorModel::from_rate(self.error_rate),
        }
    }

    /// Fix the worker count.
    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }

    /// Choose which auxiliary outputs to produce.
    pub fn with_outputs(mut self, report: bool, calls: bool) -> Self {
        self.write_report = report;
        self.write_calls = calls;
        self
    }

    /// Reject settings that cannot produce calls.
    pub fn validate(&self) -> Result<(), GenotypingError> {
        let invalid = |msg: String| Err(GenotypingError::InvalidConfiguration(msg));
        if self.flank_margin == 0 {
            return invalid("flank margin must be > 0".to_string());
        }
        if self.min_left_flank > self.flank_margin || self.min_right_flank > self.flank_margin {
            return invalid(format!(
                "required flank matches ({}, {}) exceed the flank margin {}",
                self.min_left_flank, self.min_right_flank, self.flank_margin
            ));
        }
        if let (Some(min), Some(max)) = (self.min_read_length, self.max_read_length) {
            if min > max {
                return invalid(format!("minimum read length {min} exceeds maximum {max}"));
            }
        }
        if let Some(rate) = self.error_rate {
            if !(0.0..1.0).contains(&rate) {
                return invalid(format!("error rate {rate} outside [0, 1)"));
            }
            if self.error_table.is_some() {
                return invalid("an error rate and an error table are mutually exclusive".to_string());
            }
        }
        if self.threads == Some(0) {
            return invalid("thread count must be > 0".to_string());
        }
        Ok(())
    }

    /// Worker count for this run.
    pub fn worker_count(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Non-default result-affecting settings, e.g. `.L5.M20`. Empty for the
    /// defaults.
    pub fn parameter_suffix(&self) -> String {
        let defaults = Self::default();
        let mut suffix = String::new();
        if self.flank_margin != defaults.flank_margin {
            suffix.push_str(&format!(".F{}", self.flank_margin));
        }
        if self.min_left_flank != defaults.min_left_flank {
            suffix.push_str(&format!(".L{}", self.min_left_flank));
        }
        if self.min_right_flank != defaults.min_right_flank {
            suffix.push_str(&format!(".R{}", self.min_right_flank));
        }
        if let Some(min) = self.min_read_length {
            suffix.push_str(&format!(".min{min}"));
        }
        if let Some(max) = self.max_read_length {
            suffix.push_str(&format!(".max{max}"));
        }
        if self.min_map_quality != defaults.min_map_quality {
            suffix.push_str(&format!(".M{}", self.min_map_quality));
        }
        if self.exclude_multi_mapped {
            suffix.push_str(".multi");
        }
        if self.properly_paired_only {
            suffix.push_str(".PP");
        }
        if self.ploidy == Ploidy::Haploid {
            suffix.push_str(".haploid");
        }
        if let Some(rate) = self.error_rate {
            suffix.push_str(&format!(".E{rate}"));
        }
        if self.error_table.is_some() {
            suffix.push_str(".table");
        }
        suffix
    }
}

/// Fatal genotyping errors. Recoverable per-region problems are logged instead.
#[derive(Error, Debug)]
pub enum GenotypingError {
    /// Target start lies after its stop.
    #[error("inverted target range {region}")]
    InvertedRange {
        /// Region text.
        region: String,
    },

    /// Target runs past the end of its chromosome.
    #[error("target {region} runs past the chromosome end ({chrom_len} bases)")]
    OutsideChromosome {
        /// Region text.
        region: String,
        /// Chromosome length.
        chrom_len: u64,
    },

    /// Reference or alignment collaborator failed.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// A worker thread panicked.
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),

    /// Settings rejected by [`GenotyperConfig::validate`].
    #[error("invalid genotyper configuration: {0}")]
    InvalidConfiguration(String),
}

/// Totals over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RunStats {
    /// Regions genotyped.
    pub regions: usize,
    /// Region lines skipped as malformed.
    pub skipped: usize,
    /// VCF records emitted.
    pub records: usize,
    /// Reads returned by the alignment source.
    pub reads_seen: u64,
    /// Reads passing every filter.
    pub reads_surviving: u64,
}

impl RunStats {
    fn merge(&mut self, other: &RunStats) {
        self.regions += other.regions;
        self.skipped += other.skipped;
        self.records += other.records;
        self.reads_seen += other.reads_seen;
        self.reads_surviving += other.reads_surviving;
    }
}

/// Concatenated outputs of a run, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenotypingOutput {
    /// VCF records.
    pub records: Vec<VariantRecord>,
    /// Report blocks; empty when disabled.
    pub report: String,
    /// Calls lines; empty when disabled.
    pub calls: String,
    /// Totals.
    pub stats: RunStats,
}

impl GenotypingOutput {
    /// VCF text including the header.
    pub fn vcf(&self) -> String {
        render_vcf(&self.records)
    }

    fn absorb(&mut self, region: RegionOutput, config: &GenotyperConfig) {
        self.stats.regions += 1;
        self.stats.reads_seen += u64::from(region.summary.reads_seen);
        self.stats.reads_surviving += u64::from(region.summary.surviving);
        if config.write_report {
            self.report.push_str(&region.report);
        }
        if config.write_calls {
            self.calls.push_str(&region.calls);
        }
        if let Some(record) = region.record {
            self.stats.records += 1;
            self.records.push(record);
        }
    }

    fn append(&mut self, other: GenotypingOutput) {
        self.records.extend(other.records);
        self.report.push_str(&other.report);
        self.calls.push_str(&other.calls);
        self.stats.merge(&other.stats);
    }
}

/// Multi-worker genotyping orchestrator.
///
/// Region lines are split into contiguous slices, one per worker; the last
/// worker also takes the remainder. Each worker opens its own reference and
/// alignment handles and buffers its outputs privately. Buffers are joined in
/// worker order once every worker has finished.
#[derive(Debug, Clone)]
pub struct Genotyper {
    config: GenotyperConfig,
}

impl Genotyper {
    /// Create a genotyper after validating `config`.
    pub fn new(config: GenotyperConfig) -> Result<Self, GenotypingError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Active configuration.
    pub fn config(&self) -> &GenotyperConfig {
        &self.config
    }

    /// Genotype every region line.
    ///
    /// `open_reference` and `open_alignments` are called once per worker.
    /// Blank lines are ignored; the first fatal error of any worker aborts
    /// the run.
    pub fn run<L, R, A, FR, FA>(
        &self,
        lines: &[L],
        open_reference: FR,
        open_alignments: FA,
    ) -> Result<GenotypingOutput, GenotypingError>
    where
        L: AsRef<str> + Sync,
        R: ReferenceProvider,
        A: AlignmentSource,
        FR: Fn() -> Result<R, SourceError> + Sync,
        FA: Fn() -> Result<A, SourceError> + Sync,
    {
        let workers = self.config.worker_count().min(lines.len()).max(1);
        info!(
            regions = lines.len(),
            workers,
            flank = self.config.flank_margin,
            "genotyping started"
        );

        let slices = partition(lines, workers);
        let results: Vec<Result<GenotypingOutput, GenotypingError>> = thread::scope(|scope| {
            let handles: Vec<_> = slices
                .into_iter()
                .map(|slice| {
                    let config = &self.config;
                    let open_reference = &open_reference;
                    let open_alignments = &open_alignments;
                    scope.spawn(move || run_worker(config, slice, open_reference, open_alignments))
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(index, handle)| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(GenotypingError::WorkerPanicked(index)))
                })
                .collect()
        });

        let mut output = GenotypingOutput::default();
        for result in results {
            output.append(result?);
        }
        info!(
            regions = output.stats.regions,
            skipped = output.stats.skipped,
            records = output.stats.records,
            reads = output.stats.reads_seen,
            surviving = output.stats.reads_surviving,
            "genotyping finished"
        );
        Ok(output)
    }
}

/// Contiguous slices by even division; the last slice takes the remainder.
fn partition<L>(lines: &[L], workers: usize) -> Vec<&[L]> {
    let per_worker = lines.len() / workers;
    (0..workers)
        .map(|index| {
            let start = index * per_worker;
            let end = if index + 1 == workers {
                lines.len()
            } else {
                start + per_worker
            };
            &lines[start..end]
        })
        .collect()
}

fn run_worker<L, R, A, FR, FA>(
    config: &GenotyperConfig,
    lines: &[L],
    open_reference: &FR,
    open_alignments: &FA,
) -> Result<GenotypingOutput, GenotypingError>
where
    L: AsRef<str>,
    R: ReferenceProvider,
    A: AlignmentSource,
    FR: Fn() -> Result<R, SourceError>,
    FA: Fn() -> Result<A, SourceError>,
{
    let mut output = GenotypingOutput::default();
    if lines.is_empty() {
        return Ok(output);
    }
    let reference = open_reference()?;
    let mut alignments = open_alignments()?;
    let mut caller = RegionCaller::new(config);

    for line in lines {
        let line = line.as_ref();
        if line.trim().is_empty() {
            continue;
        }
        match caller.process_line(line, &reference, &mut alignments)? {
            Some(region) => output.absorb(region, config),
            None => output.stats.skipped += 1,
        }
    }
    debug!(regions = output.stats.regions, "worker finished");
    Ok(output)
}
