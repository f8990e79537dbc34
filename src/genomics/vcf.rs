//! Variant records and the VCF writer.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::iter;

use super::likelihood::{LikelihoodTable, CONFIDENCE_CAP};
use crate::util::format_decimal;

/// Header block written before the first record.
pub const VCF_HEADER: &str = "##fileformat=VCFv4.1\n\
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n\
##FORMAT=<ID=GL,Number=G,Type=Float,Description=\"Genotype likelihood\">\n\
##INFO=<ID=AL,Number=A,Type=Integer,Description=\"Allele Length Offset(s)\">\n\
##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Total Depth\">\n\
##INFO=<ID=RU,Number=1,Type=String,Description=\"Repeat Unit\">\n\
##INFO=<ID=RL,Number=1,Type=Integer,Description=\"Reference Length of Repeat\">\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tSAMPLE\n";

/// Quality above which a record passes the filter column.
pub const PASS_THRESHOLD: f64 = 0.8;

// Shared prefix/suffix trimming is computed but not applied to emitted
// records.
const CLIP_SHARED_BASES: bool = false;

/// Region-level values copied into a record.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteInfo {
    /// Chromosome name.
    pub chrom: String,
    /// 1-based first base of the repeat.
    pub start: u64,
    /// Repeat unit sequence.
    pub unit: String,
    /// Surviving reads.
    pub depth: u32,
    /// Reference repeat length.
    pub reference_length: u64,
}

/// One VCF data line.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VariantRecord {
    /// Chromosome name.
    pub chrom: String,
    /// 1-based position of the anchor base.
    pub position: u64,
    /// Anchored reference allele.
    pub reference: String,
    /// Anchored alternate alleles, shortest first.
    pub alternates: Vec<String>,
    /// Clamped top likelihood.
    pub quality: f64,
    /// Whether `quality` clears [`PASS_THRESHOLD`].
    pub passed: bool,
    /// Called allele lengths relative to the reference.
    pub allele_offsets: (i64, i64),
    /// Repeat unit sequence.
    pub unit: String,
    /// Surviving reads.
    pub depth: u32,
    /// Reference repeat length.
    pub reference_length: u64,
    /// `i/j` allele indices, or `./.`.
    pub genotype: String,
    /// Lower-triangle genotype likelihoods; empty when there are no alternates.
    pub likelihoods: Vec<f64>,
}

impl fmt::Display for VariantRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let alternates = if self.alternates.is_empty() {
            ".".to_string()
        } else {
            self.alternates.join(",")
        };
        let likelihoods = if self.likelihoods.is_empty() {
            format_decimal(CONFIDENCE_CAP)
        } else {
            self.likelihoods
                .iter()
                .map(|&value| format_decimal(value))
                .collect::<Vec<_>>()
                .join(",")
        };
        write!(
            f,
            "{chrom}\t{pos}\t.\t{reference}\t{alternates}\t{qual}\t{filter}\t\
             AL={al1},{al2};RU={unit};DP={depth};RL={rl}\tGT:GL\t{gt}:{likelihoods}",
            chrom = self.chrom,
            pos = self.position,
            reference = self.reference,
            qual = format_decimal(self.quality),
            filter = if self.passed { "PASS" } else { "." },
            al1 = self.allele_offsets.0,
            al2 = self.allele_offsets.1,
            unit = self.unit,
            depth = self.depth,
            rl = self.reference_length,
            gt = self.genotype,
        )
    }
}

/// Build the record for one region.
///
/// `reference_core` and `read_cores` are matrix core rows rendered with gap
/// characters; `anchor` is the reference base preceding the repeat. Returns
/// `None` when no read differs from the reference (unless `emit_all`) or the
/// likelihood table is empty.
pub fn build_record(
    reference_core: &str,
    read_cores: &[String],
    anchor: u8,
    site: &SiteInfo,
    likelihoods: &LikelihoodTable,
    emit_all: bool,
) -> Option<VariantRecord> {
    if !emit_all && read_cores.iter().all(|core| core == reference_core) {
        return None;
    }
    let ((mut first, mut second), top) = likelihoods.best()?;

    let reference = strip_gaps(reference_core);
    let alternates = collapse_alleles(read_cores.iter().map(|core| strip_gaps(core)));

    if first == 0 {
        first = reference.len();
    }
    if second == 0 {
        second = reference.len();
    }
    if let Some(only) = alternates.first() {
        if likelihoods.len() == 1 && likelihoods.get(only.len(), only.len()).is_some() {
            if first == 1 {
                first = only.len();
            }
            if second == 1 {
                second = only.len();
            }
        }
    }

    let anchor = char::from(anchor);
    let mut reference = format!("{anchor}{reference}");
    let mut alleles: Vec<String> = alternates.iter().map(|a| format!("{anchor}{a}")).collect();

    let (clip_begin, clip_end) = if CLIP_SHARED_BASES {
        let mut all = alleles.clone();
        all.push(reference.clone());
        clip_common(&all)
    } else {
        (0, 0)
    };
    if clip_begin + clip_end > 0 {
        let trim = |allele: &str| allele[clip_begin..allele.len() - clip_end].to_string();
        reference = trim(reference.as_str());
        alleles = alleles.iter().map(|a| trim(a.as_str())).collect();
    }
    let total_clip = clip_begin + clip_end;

    // An allele as long as the reference is the reference call itself.
    alleles.retain(|allele| allele.len() != reference.len());

    let offset = |length: usize| length as i64 - total_clip as i64 - reference.len() as i64 + 1;
    let allele_offsets = (offset(first), offset(second));
    let lengths: Vec<usize> = iter::once(&reference)
        .chain(alleles.iter())
        .map(|allele| allele.len() - 1 + total_clip)
        .collect();

    let index_of = |length: usize| lengths.iter().position(|&l| l == length);
    let genotype = match (index_of(first), index_of(second)) {
        (Some(i), Some(j)) => format!("{i}/{j}"),
        _ => "./.".to_string(),
    };

    let genotype_likelihoods = if alleles.is_empty() {
        Vec::new()
    } else {
        let mut values = Vec::with_capacity(lengths.len() * (lengths.len() + 1) / 2);
        for (i, &l1) in lengths.iter().enumerate() {
            for &l2 in &lengths[..=i] {
                let value = likelihoods.get(l1, l2).unwrap_or(0.0);
                values.push(value.clamp(0.0, CONFIDENCE_CAP));
            }
        }
        values
    };

    Some(VariantRecord {
        chrom: site.chrom.clone(),
        position: site.start - 1 + clip_begin as u64,
        reference,
        alternates: alleles,
        quality: top.clamp(0.0, CONFIDENCE_CAP),
        passed: top > PASS_THRESHOLD,
        allele_offsets,
        unit: site.unit.clone(),
        depth: site.depth,
        reference_length: site.reference_length,
        genotype,
        likelihoods: genotype_likelihoods,
    })
}

/// Remove gap characters.
pub fn strip_gaps(allele: &str) -> String {
    allele.chars().filter(|&c| c != '-').collect()
}

/// Deduplicate alleles, keeping the most frequent sequence of each length
/// (lexicographically first on ties), ordered by length.
pub fn collapse_alleles<I>(alleles: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for allele in alleles {
        *counts.entry(allele).or_insert(0) += 1;
    }
    let mut by_length: BTreeMap<usize, (String, usize)> = BTreeMap::new();
    for (allele, count) in counts {
        match by_length.get(&allele.len()) {
            Some(&(_, top)) if top >= count => {}
            _ => {
                by_length.insert(allele.len(), (allele, count));
            }
        }
    }
    by_length.into_values().map(|(allele, _)| allele).collect()
}

/// Number of leading and trailing characters shared by every allele, always
/// leaving at least one character of the shortest.
pub fn clip_common(alleles: &[String]) -> (usize, usize) {
    let Some(first) = alleles.first().map(String::as_bytes) else {
        return (0, 0);
    };
    let shortest = alleles.iter().map(String::len).min().unwrap_or(0);

    let mut end = 0;
    while end + 1 < shortest
        && alleles.iter().all(|allele| {
            let bytes = allele.as_bytes();
            bytes[bytes.len() - 1 - end] == first[first.len() - 1 - end]
        })
    {
        end += 1;
    }

    let mut begin = 0;
    while begin + end + 1 < shortest
        && alleles.iter().all(|allele| allele.as_bytes()[begin] == first[begin])
    {
        begin += 1;
    }
    (begin, end)
}

/// Write the header followed by one line per record.
pub fn write_vcf<W: Write>(writer: &mut W, records: &[VariantRecord]) -> io::Result<()> {
    writer.write_all(VCF_HEADER.as_bytes())?;
    for record in records {
        writeln!(writer, "{record}")?;
    }
    writer.flush()
}

/// Render the header and records into a string.
pub fn render_vcf(records: &[VariantRecord]) -> String {
    let mut rendered = String::from(VCF_HEADER);
    for record in records {
        rendered.push_str(&record.to_string());
        rendered.push('\n');
    }
    rendered
}
