#[path = "common/mod.rs"]
mod common;

use std::fs;
use std::path::{Path, PathBuf};

use common::{INVARIANT_LINE, REFERENCE};
use rust_htslib::bam::{
    self,
    header::{Header, HeaderRecord},
    record::{Aux, Cigar, CigarString},
};
use strcall::genomics::{AlignmentSource, BamAlignmentSource, FastaReference, ReferenceProvider};
use strcall::{Genotyper, GenotyperConfig};
use tempfile::TempDir;

/// Coordinate-sorted BAM writer declaring `contigs`.
fn create_bam_writer(path: &Path, contigs: &[(&str, u64)]) -> bam::Writer {
    let mut header = Header::new();
    let mut hd = HeaderRecord::new(b"HD");
    hd.push_tag(b"VN", &"1.6");
    hd.push_tag(b"SO", &"coordinate");
    header.push_record(&hd);
    for (name, length) in contigs {
        let mut sq = HeaderRecord::new(b"SQ");
        sq.push_tag(b"SN", name);
        sq.push_tag(b"LN", &(*length as i64));
        header.push_record(&sq);
    }
    bam::Writer::from_path(path, &header, bam::Format::Bam).expect("create bam writer")
}

/// Ten reads covering the first 30 bases; the last carries a repeat-hit `XT` tag.
fn write_fixture(dir: &Path) -> (PathBuf, PathBuf) {
    let fasta = dir.join("ref.fa");
    fs::write(&fasta, format!(">chr1\n{REFERENCE}\n")).expect("write fasta");

    let bam_path = dir.join("sample.bam");
    {
        let mut writer = create_bam_writer(&bam_path, &[("chr1", REFERENCE.len() as u64)]);
        let cigar = CigarString(vec![Cigar::Match(30)]);
        for i in 0..10 {
            let mut record = bam::Record::new();
            let name = format!("read{i}");
            record.set(
                name.as_bytes(),
                Some(&cigar),
                &REFERENCE.as_bytes()[..30],
                &[40; 30],
            );
            record.set_tid(0);
            record.set_pos(0);
            record.set_mapq(60);
            record.set_flags(0x1 | 0x2 | 0x40);
            record.set_mtid(-1);
            record.set_mpos(-1);
            if i == 9 {
                record.push_aux(b"XT", Aux::Char(b'R')).expect("push XT tag");
            }
            writer.write(&record).expect("write record");
        }
    }
    bam::index::build(&bam_path, None, bam::index::Type::Bai, 1).expect("index bam");
    (fasta, bam_path)
}

#[test]
fn fasta_reference_reads_sequence() {
    let dir = TempDir::new().unwrap();
    let (fasta, _) = write_fixture(dir.path());
    let reference = FastaReference::from_path(&fasta).unwrap();
    assert_eq!(reference.sequence_length("chr1").unwrap(), 40);
    assert_eq!(reference.subsequence("chr1", 10, 10).unwrap(), "ACACACACAC");
    assert!(reference.sequence_length("chrZ").is_err());
}

#[test]
fn bam_source_converts_records() {
    let dir = TempDir::new().unwrap();
    let (_, bam_path) = write_fixture(dir.path());
    let mut source = BamAlignmentSource::from_path(&bam_path).unwrap();
    source.set_region("chr1", 10, 20).unwrap();

    let reads: Vec<_> = std::iter::from_fn(|| source.next_alignment())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(reads.len(), 10);
    assert_eq!(&*reads[0].name, "read0");
    assert_eq!(reads[0].cigar_string(), "30M");
    assert_eq!(reads[0].mapq, 60);
    assert!(reads[0].flags.is_proper_pair());
    assert_eq!(reads[9].tag(b"XT"), Some("R"));
    assert!(source.set_region("chrZ", 0, 10).is_err());
}

#[test]
fn genotyper_runs_over_indexed_files() {
    let dir = TempDir::new().unwrap();
    let (fasta, bam_path) = write_fixture(dir.path());
    let lines = [INVARIANT_LINE];

    let run = |config: GenotyperConfig| {
        Genotyper::new(config).unwrap().run(
            &lines,
            || FastaReference::from_path(&fasta),
            || BamAlignmentSource::from_path(&bam_path),
        )
    };

    let output = run(GenotyperConfig::default().with_flank_margin(5)).unwrap();
    assert_eq!(output.calls, "chr1:11-20\t2_5_10_100_AC\t10\t50\n");
    assert_eq!(output.stats.reads_surviving, 10);

    let output = run(
        GenotyperConfig::default()
            .with_flank_margin(5)
            .with_exclude_multi_mapped(true)
            .with_properly_paired_only(true),
    )
    .unwrap();
    assert_eq!(output.stats.reads_seen, 10);
    assert_eq!(output.stats.reads_surviving, 9);
}
