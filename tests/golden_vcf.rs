#[path = "common/mod.rs"]
mod common;
use common::assert_snapshot;
use strcall::genomics::{render_vcf, VariantRecord};

#[test]
fn render_vcf_matches_golden() {
    let records = vec![
        VariantRecord {
            chrom: "chr1".into(),
            position: 10,
            reference: "CACACACACAC".into(),
            alternates: vec!["CACACACACACACA".into()],
            quality: 27.5,
            passed: true,
            allele_offsets: (0, 3),
            unit: "AC".into(),
            depth: 10,
            reference_length: 10,
            genotype: "0/1".into(),
            likelihoods: vec![1.2, 27.5, 0.0],
        },
        VariantRecord {
            chrom: "chr2".into(),
            position: 40,
            reference: "TAAAA".into(),
            alternates: Vec::new(),
            quality: 50.0,
            passed: true,
            allele_offsets: (0, 0),
            unit: "A".into(),
            depth: 7,
            reference_length: 4,
            genotype: "0/0".into(),
            likelihoods: Vec::new(),
        },
        VariantRecord {
            chrom: "chr3".into(),
            position: 99,
            reference: "GTTT".into(),
            alternates: vec!["GTT".into(), "GTTTTT".into()],
            quality: 0.5,
            passed: false,
            allele_offsets: (-1, 2),
            unit: "T".into(),
            depth: 2,
            reference_length: 3,
            genotype: "./.".into(),
            likelihoods: vec![0.0, 0.25, 0.0, 0.0, 0.5, 0.0],
        },
    ];

    assert_snapshot("vcf/records.vcf", &render_vcf(&records));
}
