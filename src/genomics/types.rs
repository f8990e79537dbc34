use std::fmt;
use std::sync::Arc;

/// CIGAR operation kinds describing how a read aligns to the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarOpKind {
    /// Consuming match/mismatch (`M`).
    Match,
    /// Insertion relative to the reference (`I`).
    Insertion,
    /// Deletion relative to the reference (`D`).
    Deletion,
    /// Skipped reference region, e.g. a splice junction (`N`).
    Skip,
    /// Soft clipping (sequence present in read only).
    SoftClip,
    /// Hard clipping (trimmed sequence not present in read).
    HardClip,
    /// Silent deletion from the padded reference (`P`).
    Padding,
    /// Sequence match (`=`).
    Equal,
    /// Sequence mismatch (`X`).
    Diff,
}

impl CigarOpKind {
    /// SAM character for this operation.
    pub fn symbol(self) -> char {
        match self {
            CigarOpKind::Match => 'M',
            CigarOpKind::Insertion => 'I',
            CigarOpKind::Deletion => 'D',
            CigarOpKind::Skip => 'N',
            CigarOpKind::SoftClip => 'S',
            CigarOpKind::HardClip => 'H',
            CigarOpKind::Padding => 'P',
            CigarOpKind::Equal => '=',
            CigarOpKind::Diff => 'X',
        }
    }

    /// Whether the operation consumes bases of the read sequence.
    pub fn consumes_query(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match
                | CigarOpKind::Insertion
                | CigarOpKind::SoftClip
                | CigarOpKind::Equal
                | CigarOpKind::Diff
        )
    }
}

/// CIGAR operation with length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarOp {
    /// Operation kind.
    pub kind: CigarOpKind,
    /// Number of bases affected by the operation.
    pub len: u32,
}

impl CigarOp {
    /// Construct a new CIGAR operation.
    pub fn new(kind: CigarOpKind, len: u32) -> Self {
        Self { kind, len }
    }
}

impl fmt::Display for CigarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.len, self.kind.symbol())
    }
}

/// SAM flag word with named accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadFlags(pub u16);

impl ReadFlags {
    const PAIRED: u16 = 0x1;
    const PROPER_PAIR: u16 = 0x2;
    const UNMAPPED: u16 = 0x4;
    const MATE_UNMAPPED: u16 = 0x8;
    const REVERSE: u16 = 0x10;
    const MATE_REVERSE: u16 = 0x20;
    const FIRST_IN_PAIR: u16 = 0x40;
    const SECOND_IN_PAIR: u16 = 0x80;
    const SECONDARY: u16 = 0x100;
    const QC_FAIL: u16 = 0x200;
    const DUPLICATE: u16 = 0x400;

    fn has(self, bit: u16) -> bool {
        self.0 & bit != 0
    }

    /// Template has multiple segments.
    pub fn is_paired(self) -> bool {
        self.has(Self::PAIRED)
    }

    /// Each segment properly aligned according to the aligner.
    pub fn is_proper_pair(self) -> bool {
        self.has(Self::PROPER_PAIR)
    }

    /// Read is mapped.
    pub fn is_mapped(self) -> bool {
        !self.has(Self::UNMAPPED)
    }

    /// Mate is mapped.
    pub fn is_mate_mapped(self) -> bool {
        !self.has(Self::MATE_UNMAPPED)
    }

    /// Read maps to the reverse strand.
    pub fn is_reverse(self) -> bool {
        self.has(Self::REVERSE)
    }

    /// Mate maps to the reverse strand.
    pub fn is_mate_reverse(self) -> bool {
        self.has(Self::MATE_REVERSE)
    }

    /// First segment of the template.
    pub fn is_first_in_pair(self) -> bool {
        self.has(Self::FIRST_IN_PAIR)
    }

    /// Last segment of the template.
    pub fn is_second_in_pair(self) -> bool {
        self.has(Self::SECOND_IN_PAIR)
    }

    /// Primary alignment (not flagged secondary).
    pub fn is_primary(self) -> bool {
        !self.has(Self::SECONDARY)
    }

    /// Read failed platform/vendor quality checks.
    pub fn is_qc_fail(self) -> bool {
        self.has(Self::QC_FAIL)
    }

    /// PCR or optical duplicate.
    pub fn is_duplicate(self) -> bool {
        self.has(Self::DUPLICATE)
    }

    /// Compact letter code used in the per-read report (`pPuUrR12sfd`).
    pub fn letters(self) -> String {
        let checks = [
            (self.is_paired(), 'p'),
            (self.is_proper_pair(), 'P'),
            (!self.is_mapped(), 'u'),
            (!self.is_mate_mapped(), 'U'),
            (self.is_reverse(), 'r'),
            (self.is_mate_reverse(), 'R'),
            (self.is_first_in_pair(), '1'),
            (self.is_second_in_pair(), '2'),
            (!self.is_primary(), 's'),
            (self.is_qc_fail(), 'f'),
            (self.is_duplicate(), 'd'),
        ];
        checks
            .iter()
            .filter(|(set, _)| *set)
            .map(|(_, letter)| *letter)
            .collect()
    }
}

/// Aligned read with sequence and quality information.
#[derive(Debug, Clone)]
pub struct AlignedRead {
    /// Read (query template) name.
    pub name: Arc<str>,
    /// Reference contig/chromosome name.
    pub chrom: Arc<str>,
    /// 0-based leftmost reference coordinate of the first aligned base.
    pub pos: u32,
    /// Mapping quality (Phred-scaled).
    pub mapq: u8,
    /// CIGAR describing the alignment.
    pub cigar: Vec<CigarOp>,
    /// Read sequence stored as uppercase ASCII.
    pub sequence: Arc<[u8]>,
    /// Per-base quality scores in raw Phred space (no ASCII offset).
    pub qualities: Arc<[u8]>,
    /// SAM flags.
    pub flags: ReadFlags,
    /// Optional string-valued tags (two-letter key, rendered value).
    pub tags: Vec<([u8; 2], String)>,
}

impl AlignedRead {
    /// Construct a new aligned read wrapper with default flags and no tags.
    pub fn new(
        chrom: impl Into<Arc<str>>,
        pos: u32,
        mapq: u8,
        cigar: Vec<CigarOp>,
        sequence: impl Into<Arc<[u8]>>,
        qualities: impl Into<Arc<[u8]>>,
        is_reverse: bool,
    ) -> Self {
        let flags = if is_reverse {
            ReadFlags(ReadFlags::REVERSE)
        } else {
            ReadFlags::default()
        };
        Self {
            name: Arc::from("*"),
            chrom: chrom.into(),
            pos,
            mapq,
            cigar,
            sequence: sequence.into(),
            qualities: qualities.into(),
            flags,
            tags: Vec::new(),
        }
    }

    /// Replace the read name.
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the SAM flag word.
    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = ReadFlags(flags);
        self
    }

    /// Attach a string-valued tag.
    pub fn with_tag(mut self, key: [u8; 2], value: impl Into<String>) -> Self {
        self.tags.push((key, value.into()));
        self
    }

    /// Read length inferred from the sequence.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Whether the read carries no bases.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// 1-based position of the first aligned base.
    pub fn one_based_start(&self) -> i64 {
        i64::from(self.pos) + 1
    }

    /// Number of reference bases spanned by the alignment.
    pub fn reference_span(&self) -> u32 {
        self.cigar
            .iter()
            .filter(|op| {
                matches!(
                    op.kind,
                    CigarOpKind::Match
                        | CigarOpKind::Deletion
                        | CigarOpKind::Skip
                        | CigarOpKind::Equal
                        | CigarOpKind::Diff
                )
            })
            .map(|op| op.len)
            .sum()
    }

    /// End position (half-open) on the reference.
    pub fn end(&self) -> u32 {
        self.pos + self.reference_span()
    }

    /// Read size as reported per read: bases consumed by M/I/S/=/X.
    pub fn query_length(&self) -> u32 {
        self.cigar
            .iter()
            .filter(|op| op.kind.consumes_query())
            .map(|op| op.len)
            .sum()
    }

    /// CIGAR rendered in SAM text form.
    pub fn cigar_string(&self) -> String {
        self.cigar.iter().map(ToString::to_string).collect()
    }

    /// Look up a string-valued tag.
    pub fn tag(&self, key: &[u8; 2]) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value.as_str())
    }

    /// Mapping quality associated with the alignment.
    pub fn mapq(&self) -> u8 {
        self.mapq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_length_counts_read_consuming_ops() {
        let read = AlignedRead::new(
            "chr1",
            10,
            60,
            vec![
                CigarOp::new(CigarOpKind::SoftClip, 2),
                CigarOp::new(CigarOpKind::Match, 5),
                CigarOp::new(CigarOpKind::Insertion, 1),
                CigarOp::new(CigarOpKind::Deletion, 3),
                CigarOp::new(CigarOpKind::Match, 4),
                CigarOp::new(CigarOpKind::HardClip, 7),
            ],
            b"AACCCCCGTTTT".to_vec(),
            vec![30; 12],
            false,
        );
        assert_eq!(read.query_length(), 12);
        assert_eq!(read.reference_span(), 12);
        assert_eq!(read.end(), 22);
        assert_eq!(read.cigar_string(), "2S5M1I3D4M7H");
    }

    #[test]
    fn flag_letters_follow_report_order() {
        let flags = ReadFlags(0x1 | 0x2 | 0x10 | 0x40 | 0x400);
        assert_eq!(flags.letters(), "pPr1d");
        assert_eq!(ReadFlags(0x4 | 0x8 | 0x100).letters(), "uUs");
    }

    #[test]
    fn tags_are_looked_up_by_key() {
        let read = AlignedRead::new("chr1", 0, 0, vec![], Vec::new(), Vec::new(), false)
            .with_tag(*b"XT", "R");
        assert_eq!(read.tag(b"XT"), Some("R"));
        assert_eq!(read.tag(b"NM"), None);
    }
}
