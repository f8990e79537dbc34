//! Human-readable report blocks and the tab-separated calls file.

use std::fmt;

use super::likelihood::{Genotype, GenotypeOutcome, CONFIDENCE_CAP, REPORTABLE_CONFIDENCE};
use super::matrix::{AlignmentMatrix, MatrixRow};
use super::realign::render_cells;
use super::tally::FlankRuns;
use super::AlignedRead;
use crate::util::{format_decimal, truncate_decimals};

/// Genotype and confidence as printed for one region.
#[derive(Debug, Clone, PartialEq)]
pub enum CallSummary {
    /// No call attempted.
    Unresolved,
    /// Every surviving read agrees on one length.
    Concordant(usize),
    /// Scored call above the reporting threshold.
    Called {
        /// Winning genotype.
        genotype: Genotype,
        /// Phred-scaled confidence.
        confidence: f64,
    },
    /// Scored call at or below the reporting threshold.
    LowConfidence(f64),
}

impl CallSummary {
    /// Summarise an outcome; scored regions with at most one read get
    /// confidence 0.
    pub fn from_outcome(outcome: &GenotypeOutcome, reads: u32) -> Self {
        match outcome {
            GenotypeOutcome::Unresolved => CallSummary::Unresolved,
            GenotypeOutcome::Concordant { length, .. } => CallSummary::Concordant(*length),
            GenotypeOutcome::Scored(scored) => {
                let confidence = if reads <= 1 { 0.0 } else { scored.confidence };
                if confidence > REPORTABLE_CONFIDENCE {
                    CallSummary::Called {
                        genotype: scored.genotype,
                        confidence,
                    }
                } else {
                    CallSummary::LowConfidence(confidence)
                }
            }
        }
    }

    /// `<genotype>\t<confidence>` or `NA\tNA`.
    pub fn calls_fields(&self) -> String {
        match self {
            CallSummary::Concordant(length) => format!("{length}\t{}", format_decimal(CONFIDENCE_CAP)),
            CallSummary::Called {
                genotype,
                confidence,
            } => format!("{genotype}\t{}", format_decimal(*confidence)),
            CallSummary::Unresolved | CallSummary::LowConfidence(_) => "NA\tNA".to_string(),
        }
    }
}

impl fmt::Display for CallSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallSummary::Unresolved => write!(f, "GT:NA L:NA"),
            CallSummary::Concordant(length) => {
                write!(f, "GT:{length} L:{}", format_decimal(CONFIDENCE_CAP))
            }
            CallSummary::Called {
                genotype,
                confidence,
            } => write!(f, "GT:{genotype} L:{}", format_decimal(*confidence)),
            CallSummary::LowConfidence(confidence) => {
                write!(f, "GT:NA L:{}", format_decimal(*confidence))
            }
        }
    }
}

/// Header line of a report block.
#[derive(Debug, Clone, PartialEq)]
pub struct CallLine {
    /// Region column of the input line.
    pub region: String,
    /// Metadata column of the input line.
    pub metadata: String,
    /// Reference repeat length.
    pub reference_length: u64,
    /// Allele histogram text.
    pub histogram: String,
    /// Majority agreement, undefined for fewer than two reads.
    pub concordance: Option<f64>,
    /// Reads covering the middle of the repeat.
    pub depth: u32,
    /// Surviving reads.
    pub reads: u32,
    /// Reads without alignment operations.
    pub stars: u32,
    /// Mean mapping quality of surviving reads.
    pub mean_map_quality: Option<f64>,
    /// Genotype and confidence.
    pub call: CallSummary,
}

impl fmt::Display for CallLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let na = |value: Option<String>| value.unwrap_or_else(|| "NA".to_string());
        write!(
            f,
            "~{} {} REF:{} A:{} C:{} D:{} R:{} S:{} M:{} {}",
            self.region,
            self.metadata,
            self.reference_length,
            self.histogram,
            na(self.concordance.map(format_decimal)),
            self.depth,
            self.reads,
            self.stars,
            na(self
                .mean_map_quality
                .map(|mapq| format_decimal(truncate_decimals(mapq, 2)))),
            self.call,
        )
    }
}

/// Per-read annotations printed after the read's matrix row.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadAnnotation {
    /// 1-based alignment start.
    pub start: i64,
    /// Read size from the alignment operations.
    pub size: u32,
    /// Consecutive flank matches.
    pub flanks: FlankRuns,
    /// Mean probability-correct of the bases.
    pub avg_quality: f64,
    /// Mapping quality.
    pub map_quality: u8,
    /// Flag letters.
    pub flags: String,
    /// Alignment operations.
    pub cigar: String,
    /// Read name.
    pub name: String,
}

impl ReadAnnotation {
    /// Annotate a surviving read.
    pub fn new(read: &AlignedRead, flanks: FlankRuns, avg_quality: f64) -> Self {
        Self {
            start: read.one_based_start(),
            size: read.query_length(),
            flanks,
            avg_quality,
            map_quality: read.mapq,
            flags: read.flags.letters(),
            cigar: read.cigar_string(),
            name: read.name.to_string(),
        }
    }
}

impl fmt::Display for ReadAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} B:{} M:{} F:{} C:{} ID:{}",
            self.start,
            self.size,
            self.flanks.left,
            self.flanks.right,
            format_decimal(truncate_decimals(self.avg_quality, 4)),
            self.map_quality,
            self.flags,
            self.cigar,
            self.name,
        )
    }
}

struct Row<'a>(&'a MatrixRow);

impl fmt::Display for Row<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            render_cells(&self.0.pre),
            render_cells(&self.0.core),
            render_cells(&self.0.post)
        )
    }
}

/// One region of the report: the call line, then the reference row and one
/// row per read when any read survived.
#[derive(Debug, Clone, Copy)]
pub struct ReportBlock<'a> {
    call_line: &'a CallLine,
    matrix: &'a AlignmentMatrix,
    annotations: &'a [ReadAnnotation],
}

impl<'a> ReportBlock<'a> {
    /// Block for one region. `annotations` pairs with `matrix.reads()`.
    pub fn new(call_line: &'a CallLine, matrix: &'a AlignmentMatrix, annotations: &'a [ReadAnnotation]) -> Self {
        Self {
            call_line,
            matrix,
            annotations,
        }
    }
}

impl fmt::Display for ReportBlock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.call_line)?;
        if self.annotations.is_empty() {
            return Ok(());
        }
        writeln!(f, "{}", Row(self.matrix.reference()))?;
        for (row, annotation) in self.matrix.reads().iter().zip(self.annotations) {
            writeln!(f, "{} {annotation}", Row(row))?;
        }
        Ok(())
    }
}

/// One line of the calls file.
pub fn calls_line(region: &str, metadata: &str, call: &CallSummary) -> String {
    format!("{region}\t{metadata}\t{}\n", call.calls_fields())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::{LikelihoodTable, ScoredGenotype};

    fn scored(confidence: f64) -> GenotypeOutcome {
        GenotypeOutcome::Scored(ScoredGenotype {
            genotype: Genotype::Heterozygous(10, 13),
            confidence,
            hypotheses: Vec::new(),
            likelihoods: LikelihoodTable::new(),
        })
    }

    fn call_line(call: CallSummary) -> CallLine {
        CallLine {
            region: "chr1:11-20".into(),
            metadata: "2_5_10_100_AC".into(),
            reference_length: 10,
            histogram: "10[6] 13[4]".into(),
            concordance: Some(5.0 / 9.0),
            depth: 11,
            reads: 10,
            stars: 1,
            mean_map_quality: Some(59.456),
            call,
        }
    }

    #[test]
    fn summaries_follow_confidence_threshold() {
        assert_eq!(
            CallSummary::from_outcome(&scored(12.5), 10),
            CallSummary::Called {
                genotype: Genotype::Heterozygous(10, 13),
                confidence: 12.5
            }
        );
        assert_eq!(CallSummary::from_outcome(&scored(3.0), 10), CallSummary::LowConfidence(3.0));
        assert_eq!(CallSummary::from_outcome(&scored(40.0), 1), CallSummary::LowConfidence(0.0));
        assert_eq!(
            CallSummary::from_outcome(&GenotypeOutcome::Unresolved, 0),
            CallSummary::Unresolved
        );
    }

    #[test]
    fn call_line_layout() {
        let line = call_line(CallSummary::Called {
            genotype: Genotype::Heterozygous(10, 13),
            confidence: 23.0103,
        });
        assert_eq!(
            line.to_string(),
            "~chr1:11-20 2_5_10_100_AC REF:10 A:10[6] 13[4] C:0.555556 D:11 R:10 S:1 M:59.45 GT:10h13 L:23.0103"
        );
    }

    #[test]
    fn undefined_values_print_na() {
        let mut line = call_line(CallSummary::Unresolved);
        line.histogram = "NA".into();
        line.concordance = None;
        line.mean_map_quality = None;
        line.reads = 0;
        assert!(line.to_string().ends_with("A:NA C:NA D:11 R:0 S:1 M:NA GT:NA L:NA"));
        assert_eq!(
            CallSummary::LowConfidence(1.5).to_string(),
            "GT:NA L:1.5"
        );
        assert_eq!(CallSummary::Concordant(10).to_string(), "GT:10 L:50");
    }

    #[test]
    fn calls_lines() {
        assert_eq!(
            calls_line("chr1:11-20", "meta", &CallSummary::Concordant(10)),
            "chr1:11-20\tmeta\t10\t50\n"
        );
        assert_eq!(
            calls_line("chr1:11-20", "meta", &CallSummary::LowConfidence(2.0)),
            "chr1:11-20\tmeta\tNA\tNA\n"
        );
    }

    #[test]
    fn report_block_lists_reference_then_reads() {
        use crate::genomics::{realign_read, CigarOp, CigarOpKind, ReferenceWindow};
        const REFERENCE: &[u8] = b"TTTTGGGGCCACACACACACGGCCTTTTAACCGGTTAACC";

        let window = ReferenceWindow {
            left_flank: REFERENCE[5..10].to_vec(),
            core: REFERENCE[10..20].to_vec(),
            right_flank: REFERENCE[20..25].to_vec(),
        };
        let read = AlignedRead::new(
            "chr1",
            0,
            60,
            vec![CigarOp::new(CigarOpKind::Match, 25)],
            REFERENCE[..25].to_vec(),
            vec![30; 25],
            false,
        );
        let matrix = AlignmentMatrix::build(&window, 5, &[realign_read(&read, 11, 5, 10).unwrap()]);
        let annotation = ReadAnnotation {
            start: 1,
            size: 25,
            flanks: FlankRuns { left: 5, right: 5 },
            avg_quality: 0.5,
            map_quality: 60,
            flags: "u".into(),
            cigar: "25M".into(),
            name: "r1".into(),
        };
        let line = call_line(CallSummary::Concordant(10));

        let block = ReportBlock::new(&line, &matrix, std::slice::from_ref(&annotation)).to_string();
        let rows: Vec<&str> = block.lines().collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], line.to_string());
        assert_eq!(rows[1], "GGGCC ACACACACAC GGCCT");
        assert_eq!(rows[2], "GGGCC ACACACACAC GGCCT 1 25 5 5 B:0.5 M:60 F:u C:25M ID:r1");

        let bare = ReportBlock::new(&line, &matrix, &[]).to_string();
        assert_eq!(bare, format!("{line}\n"));
    }

    #[test]
    fn read_annotation_layout() {
        use crate::genomics::{CigarOp, CigarOpKind};
        let read = AlignedRead::new(
            "chr1",
            4,
            37,
            vec![CigarOp::new(CigarOpKind::SoftClip, 2), CigarOp::new(CigarOpKind::Match, 8)],
            b"ACGTACGTAC".to_vec(),
            vec![30; 10],
            true,
        )
        .with_name("read7")
        .with_flags(0x1 | 0x2 | 0x10 | 0x40);
        let annotation = ReadAnnotation::new(&read, FlankRuns { left: 4, right: 2 }, 0.99876);
        assert_eq!(
            annotation.to_string(),
            "5 10 4 2 B:0.9987 M:37 F:pPr1 C:2S8M ID:read7"
        );
    }
}
