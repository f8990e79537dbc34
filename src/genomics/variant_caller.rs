//! Per-region genotyping: window, realignment, matrix, tally, call and outputs.

use tracing::{debug, trace, warn};

use super::likelihood::{GenotypeOutcome, LikelihoodEngine};
use super::report::{calls_line, CallLine, CallSummary, ReadAnnotation, ReportBlock};
use super::tally::{AlleleTally, FlankRuns, ReadFilter, ScoredRead};
use super::vcf::{build_record, SiteInfo, VariantRecord};
use super::{
    realign_read, render_allele, AlignedRead, AlignmentMatrix, AlignmentSource, Cell,
    RealignedRead, ReferenceProvider, ReferenceWindow, RegionSpec, Rejection,
};
use crate::{GenotyperConfig, GenotypingError};

/// Read counts gathered while processing one region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionSummary {
    /// Reads returned by the alignment source.
    pub reads_seen: u32,
    /// Reads without alignment operations.
    pub stars: u32,
    /// Reads that could not be projected onto the window.
    pub unrealigned: u32,
    /// Reads covering the middle of the repeat.
    pub depth: u32,
    /// Reads passing every filter.
    pub surviving: u32,
}

/// Everything produced for one region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionOutput {
    /// Parsed region.
    pub spec: RegionSpec,
    /// Report block: call line plus matrix rows.
    pub report: String,
    /// Calls-file line.
    pub calls: String,
    /// VCF record, when one is emitted.
    pub record: Option<VariantRecord>,
    /// Genotype summary.
    pub call: CallSummary,
    /// Read counts.
    pub summary: RegionSummary,
}

struct Survivor {
    read: AlignedRead,
    realigned: RealignedRead,
    flanks: FlankRuns,
}

/// Genotypes regions one at a time with a fixed configuration.
///
/// Each worker owns its caller; the likelihood engine's factorial table is
/// reused across regions.
#[derive(Debug, Clone)]
pub struct RegionCaller {
    flank: usize,
    emit_all: bool,
    filter: ReadFilter,
    engine: LikelihoodEngine,
}

impl RegionCaller {
    /// Caller for `config`.
    pub fn new(config: &GenotyperConfig) -> Self {
        Self {
            flank: config.flank_margin,
            emit_all: config.emit_all,
            filter: ReadFilter::from_config(config),
            engine: LikelihoodEngine::new(config.error_model(), config.ploidy),
        }
    }

    /// Parse and genotype one region line.
    ///
    /// Malformed lines are logged and yield `Ok(None)`; unusable coordinates
    /// and collaborator failures are fatal.
    pub fn process_line<R, A>(
        &mut self,
        line: &str,
        reference: &R,
        alignments: &mut A,
    ) -> Result<Option<RegionOutput>, GenotypingError>
    where
        R: ReferenceProvider + ?Sized,
        A: AlignmentSource + ?Sized,
    {
        match RegionSpec::parse(line) {
            Ok(spec) => self.process(spec, reference, alignments).map(Some),
            Err(err) => {
                warn!(region = %line.trim_end(), error = %err, "skipping malformed region line");
                Ok(None)
            }
        }
    }

    /// Genotype a parsed region.
    pub fn process<R, A>(
        &mut self,
        spec: RegionSpec,
        reference: &R,
        alignments: &mut A,
    ) -> Result<RegionOutput, GenotypingError>
    where
        R: ReferenceProvider + ?Sized,
        A: AlignmentSource + ?Sized,
    {
        let window = ReferenceWindow::resolve(&spec, reference, self.flank)?;
        let (start, end) = spec.query_interval();
        alignments.set_region(&spec.chrom, start, end)?;

        let mut summary = RegionSummary::default();
        let mut survivors: Vec<Survivor> = Vec::new();
        while let Some(read) = alignments.next_alignment() {
            let read = read?;
            summary.reads_seen += 1;
            if read.cigar.is_empty() {
                summary.stars += 1;
                continue;
            }

            let realigned = match realign_read(&read, spec.start, self.flank, window.core_len()) {
                Ok(realigned) => realigned,
                Err(Rejection::SkippedRegion) => {
                    summary.unrealigned += 1;
                    debug!(region = %spec.region, read = %read.name, "dropping read with reference skip");
                    continue;
                }
                Err(reason) => {
                    summary.unrealigned += 1;
                    trace!(region = %spec.region, read = %read.name, ?reason, "read not realigned");
                    continue;
                }
            };

            if !matches!(
                realigned.core.get(window.core_len() / 2),
                None | Some(Cell::OutOfBounds)
            ) {
                summary.depth += 1;
            }

            match self.filter.screen(&read, &realigned, &window) {
                Ok(flanks) => survivors.push(Survivor {
                    read,
                    realigned,
                    flanks,
                }),
                Err(reason) => {
                    trace!(region = %spec.region, read = %read.name, ?reason, "read filtered");
                }
            }
        }
        summary.surviving = survivors.len() as u32;

        let realigned: Vec<RealignedRead> =
            survivors.iter().map(|s| s.realigned.clone()).collect();
        let matrix = AlignmentMatrix::build(&window, self.flank, &realigned);

        let scored: Vec<ScoredRead> = matrix
            .reads()
            .iter()
            .zip(&survivors)
            .map(|(row, survivor)| ScoredRead {
                allele_length: row.allele_length(),
                map_quality: survivor.read.mapq,
                min_flank: survivor.flanks.min(),
                is_reverse: survivor.read.flags.is_reverse(),
                is_proper_pair: survivor.read.flags.is_proper_pair(),
                avg_quality: survivor.realigned.avg_quality,
            })
            .collect();
        let tally = AlleleTally::from_reads(&scored);
        let outcome = self.engine.call(&tally, window.core_len(), spec.unit_length);
        let reads = tally.total_reads();
        let call = CallSummary::from_outcome(&outcome, reads);

        let mean_map_quality = (!scored.is_empty()).then(|| {
            scored.iter().map(|s| f64::from(s.map_quality)).sum::<f64>() / scored.len() as f64
        });
        let call_line = CallLine {
            region: spec.region.clone(),
            metadata: spec.metadata.clone(),
            reference_length: spec.length(),
            histogram: tally.histogram(),
            concordance: tally.concordance(),
            depth: summary.depth,
            reads,
            stars: summary.stars,
            mean_map_quality,
            call: call.clone(),
        };
        let annotations: Vec<ReadAnnotation> = survivors
            .iter()
            .map(|s| ReadAnnotation::new(&s.read, s.flanks, s.realigned.avg_quality))
            .collect();

        let report = ReportBlock::new(&call_line, &matrix, &annotations).to_string();
        let calls = calls_line(&spec.region, &spec.metadata, &call);
        let record = self.variant_record(&spec, &window, &matrix, &outcome, &call, reads);

        debug!(
            region = %spec.region,
            reads_seen = summary.reads_seen,
            surviving = summary.surviving,
            depth = summary.depth,
            call = %call,
            emitted = record.is_some(),
            "region genotyped"
        );

        Ok(RegionOutput {
            spec,
            report,
            calls,
            record,
            call,
            summary,
        })
    }

    fn variant_record(
        &self,
        spec: &RegionSpec,
        window: &ReferenceWindow,
        matrix: &AlignmentMatrix,
        outcome: &GenotypeOutcome,
        call: &CallSummary,
        reads: u32,
    ) -> Option<VariantRecord> {
        let reference_length = window.core_len();
        let emit = match (outcome, call) {
            (GenotypeOutcome::Concordant { length, .. }, _) => {
                self.emit_all || *length != reference_length
            }
            (GenotypeOutcome::Scored(scored), CallSummary::Called { .. }) => {
                self.emit_all || !scored.genotype.is_homozygous_at(reference_length)
            }
            _ => false,
        };
        if !emit {
            return None;
        }

        let reference_core = render_allele(&matrix.reference().core);
        let read_cores: Vec<String> = matrix
            .reads()
            .iter()
            .map(|row| render_allele(&row.core))
            .collect();
        let site = SiteInfo {
            chrom: spec.chrom.clone(),
            start: spec.start,
            unit: spec.unit.clone(),
            depth: reads,
            reference_length: spec.length(),
        };
        build_record(
            &reference_core,
            &read_cores,
            window.anchor_base(),
            &site,
            outcome.likelihoods()?,
            self.emit_all,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::{CigarOp, CigarOpKind, InMemoryAlignments, InMemoryReference};

    const REFERENCE: &str = "TTTTGGGGCCACACACACACGGCCTTTTAACCGGTTAACC";
    const LINE: &str = "chr1:11-20\t2_5_10_100_AC";

    fn reference() -> InMemoryReference {
        InMemoryReference::new().with_sequence("chr1", REFERENCE)
    }

    fn config() -> GenotyperConfig {
        GenotyperConfig::default().with_flank_margin(5)
    }

    fn perfect(name: &str) -> AlignedRead {
        AlignedRead::new(
            "chr1",
            0,
            60,
            vec![CigarOp::new(CigarOpKind::Match, 30)],
            REFERENCE.as_bytes()[..30].to_vec(),
            vec![40; 30],
            false,
        )
        .with_name(name)
    }

    fn with_insertion(name: &str) -> AlignedRead {
        let mut sequence = REFERENCE.as_bytes()[..20].to_vec();
        sequence.extend_from_slice(b"ACA");
        sequence.extend_from_slice(&REFERENCE.as_bytes()[20..30]);
        AlignedRead::new(
            "chr1",
            0,
            60,
            vec![
                CigarOp::new(CigarOpKind::Match, 20),
                CigarOp::new(CigarOpKind::Insertion, 3),
                CigarOp::new(CigarOpKind::Match, 10),
            ],
            sequence,
            vec![40; 33],
            true,
        )
        .with_name(name)
    }

    #[test]
    fn concordant_reference_region_emits_no_record() {
        let reads = (0..10).map(|i| perfect(&format!("r{i}"))).collect();
        let mut alignments = InMemoryAlignments::new(reads);
        let mut caller = RegionCaller::new(&config());
        let output = caller
            .process_line(LINE, &reference(), &mut alignments)
            .unwrap()
            .expect("region parsed");

        assert_eq!(output.call, CallSummary::Concordant(10));
        assert!(output.record.is_none());
        assert_eq!(output.calls, "chr1:11-20\t2_5_10_100_AC\t10\t50\n");
        let header = output.report.lines().next().unwrap();
        assert_eq!(
            header,
            "~chr1:11-20 2_5_10_100_AC REF:10 A:10 C:1 D:10 R:10 S:0 M:60 GT:10 L:50"
        );
        assert_eq!(output.report.lines().count(), 12);
        assert_eq!(output.report.lines().nth(1).unwrap(), "GGGCC ACACACACAC GGCCT");
        assert_eq!(
            output.report.lines().nth(2).unwrap(),
            "GGGCC ACACACACAC GGCCT 1 30 5 5 B:0.9999 M:60 F: C:30M ID:r0"
        );
    }

    #[test]
    fn emit_all_writes_invariant_site() {
        let reads = (0..10).map(|i| perfect(&format!("r{i}"))).collect();
        let mut alignments = InMemoryAlignments::new(reads);
        let mut caller = RegionCaller::new(&config().with_emit_all(true));
        let output = caller
            .process_line(LINE, &reference(), &mut alignments)
            .unwrap()
            .unwrap();
        let record = output.record.expect("record");
        assert_eq!(record.position, 10);
        assert_eq!(record.reference, "CACACACACAC");
        assert_eq!(record.genotype, "0/0");
    }

    #[test]
    fn split_reads_produce_heterozygous_record() {
        let mut reads: Vec<AlignedRead> = (0..6).map(|i| perfect(&format!("ref{i}"))).collect();
        reads.extend((0..4).map(|i| with_insertion(&format!("ins{i}"))));
        let mut alignments = InMemoryAlignments::new(reads);
        let mut caller = RegionCaller::new(&config());
        let output = caller
            .process_line("chr1:11-20\t3_5_10_100_ACA", &reference(), &mut alignments)
            .unwrap()
            .unwrap();

        let CallSummary::Called { genotype, .. } = output.call else {
            panic!("expected a call, got {:?}", output.call);
        };
        assert_eq!(genotype.to_string(), "10h13");
        let record = output.record.expect("record");
        assert_eq!(record.allele_offsets, (0, 3));
        assert_eq!(record.alternates, vec!["CACACACACACACA".to_string()]);
        assert_eq!(record.genotype, "0/1");
        assert_eq!(record.depth, 10);
    }

    #[test]
    fn star_reads_and_skips_are_counted() {
        let star = AlignedRead::new("chr1", 12, 0, Vec::new(), b"ACGT".to_vec(), vec![30; 4], false);
        let spliced = AlignedRead::new(
            "chr1",
            0,
            60,
            vec![
                CigarOp::new(CigarOpKind::Match, 12),
                CigarOp::new(CigarOpKind::Skip, 5),
                CigarOp::new(CigarOpKind::Match, 10),
            ],
            vec![b'A'; 22],
            vec![30; 22],
            false,
        );
        let mut alignments = InMemoryAlignments::new(vec![star, spliced, perfect("ok")]);
        let mut caller = RegionCaller::new(&config());
        let output = caller
            .process_line(LINE, &reference(), &mut alignments)
            .unwrap()
            .unwrap();
        assert_eq!(output.summary.stars, 1);
        assert_eq!(output.summary.unrealigned, 1);
        assert_eq!(output.summary.surviving, 1);
        assert_eq!(output.call, CallSummary::LowConfidence(0.0));
        assert!(output.report.starts_with("~chr1:11-20 2_5_10_100_AC REF:10 A:NA C:NA D:1 R:1 S:1"));
        assert_eq!(output.calls, "chr1:11-20\t2_5_10_100_AC\tNA\tNA\n");
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let mut alignments = InMemoryAlignments::new(Vec::new());
        let mut caller = RegionCaller::new(&config());
        assert!(caller
            .process_line("chr1:11-20 no tab", &reference(), &mut alignments)
            .unwrap()
            .is_none());
    }

    #[test]
    fn out_of_range_regions_are_fatal() {
        let mut alignments = InMemoryAlignments::new(Vec::new());
        let mut caller = RegionCaller::new(&config());
        let err = caller
            .process_line("chr1:30-45\t2_5_10_100_AC", &reference(), &mut alignments)
            .unwrap_err();
        assert!(matches!(err, GenotypingError::OutsideChromosome { chrom_len: 40, .. }));
        let err = caller
            .process_line("chr1:20-11\t2_5_10_100_AC", &reference(), &mut alignments)
            .unwrap_err();
        assert!(matches!(err, GenotypingError::InvertedRange { .. }));
    }

    #[test]
    fn empty_region_reports_unresolved() {
        let mut alignments = InMemoryAlignments::new(Vec::new());
        let mut caller = RegionCaller::new(&config());
        let output = caller
            .process_line(LINE, &reference(), &mut alignments)
            .unwrap()
            .unwrap();
        assert_eq!(
            output.report,
            "~chr1:11-20 2_5_10_100_AC REF:10 A:NA C:NA D:0 R:0 S:0 M:NA GT:NA L:NA\n"
        );
        assert!(output.record.is_none());
    }
}
