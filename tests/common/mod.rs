#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use strcall::genomics::{AlignedRead, CigarOp, CigarOpKind, InMemoryAlignments, InMemoryReference};

/// Forty bases with an `(AC)5` repeat at 1-based 11-20.
pub const REFERENCE: &str = "TTTTGGGGCCACACACACACGGCCTTTTAACCGGTTAACC";

fn snapshot_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("snapshots")
}

pub fn assert_snapshot(name: &str, actual: &str) {
    let path = snapshot_root().join(name);
    if std::env::var("STRCALL_UPDATE_SNAPSHOTS").is_ok() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create snapshot directory");
        }
        fs::write(&path, actual).expect("write snapshot");
        return;
    }

    let expected =
        fs::read_to_string(&path).unwrap_or_else(|_| panic!("snapshot {:?} not found", path));
    if normalize(&expected) != normalize(actual) {
        panic!(
            "Snapshot mismatch for {:?}. Set STRCALL_UPDATE_SNAPSHOTS=1 to regenerate.\nExpected:\n{}\nActual:\n{}",
            path,
            expected,
            actual
        );
    }
}

fn normalize(input: &str) -> String {
    input.replace("\r\n", "\n")
}

/// Two chromosomes carrying the same repeat.
pub fn reference() -> InMemoryReference {
    InMemoryReference::new()
        .with_sequence("chr1", REFERENCE)
        .with_sequence("chr2", REFERENCE)
}

/// Read matching the first 30 reference bases.
pub fn perfect_read(chrom: &str, name: &str) -> AlignedRead {
    AlignedRead::new(
        chrom,
        0,
        60,
        vec![CigarOp::new(CigarOpKind::Match, 30)],
        REFERENCE.as_bytes()[..30].to_vec(),
        vec![40; 30],
        false,
    )
    .with_name(name)
}

/// Read carrying `ACA` inserted after the last repeat base.
pub fn expanded_read(chrom: &str, name: &str) -> AlignedRead {
    let mut sequence = REFERENCE.as_bytes()[..20].to_vec();
    sequence.extend_from_slice(b"ACA");
    sequence.extend_from_slice(&REFERENCE.as_bytes()[20..30]);
    AlignedRead::new(
        chrom,
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

/// chr1 holds ten reference reads; chr2 holds six reference and four expanded reads.
pub fn alignments() -> InMemoryAlignments {
    let mut reads: Vec<AlignedRead> = (0..10)
        .map(|i| perfect_read("chr1", &format!("a{i}")))
        .collect();
    reads.extend((0..6).map(|i| perfect_read("chr2", &format!("b{i}"))));
    reads.extend((0..4).map(|i| expanded_read("chr2", &format!("c{i}"))));
    InMemoryAlignments::new(reads)
}

pub const INVARIANT_LINE: &str = "chr1:11-20\t2_5_10_100_AC";
pub const VARIANT_LINE: &str = "chr2:11-20\t3_5_10_100_ACA";
