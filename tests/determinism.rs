#[path = "common/mod.rs"]
mod common;

use std::collections::HashSet;

use blake3::hash;
use common::{alignments, reference, INVARIANT_LINE, VARIANT_LINE};
use strcall::genomics::SourceError;
use strcall::{Genotyper, GenotyperConfig};

fn region_lines() -> Vec<String> {
    let mut lines = Vec::new();
    for round in 0..5 {
        lines.push(INVARIANT_LINE.to_string());
        lines.push(VARIANT_LINE.to_string());
        if round == 2 {
            lines.push("chr1:11-20".to_string());
        }
    }
    lines
}

#[test]
fn outputs_do_not_depend_on_worker_count() {
    let lines = region_lines();
    let mut fingerprints = HashSet::new();

    for threads in 1..=4 {
        let config = GenotyperConfig::default()
            .with_flank_margin(5)
            .with_emit_all(true)
            .with_threads(Some(threads));
        let output = Genotyper::new(config)
            .expect("valid configuration")
            .run(
                &lines,
                || Ok::<_, SourceError>(reference()),
                || Ok::<_, SourceError>(alignments()),
            )
            .expect("genotyping succeeds");

        assert_eq!(output.stats.regions, 10);
        assert_eq!(output.stats.skipped, 1);

        let mut combined = output.vcf();
        combined.push_str(&output.report);
        combined.push_str(&output.calls);
        fingerprints.insert(hash(combined.as_bytes()));
    }

    assert_eq!(fingerprints.len(), 1, "outputs diverged across worker counts");
}

#[test]
fn calls_keep_input_order_across_workers() {
    let lines = region_lines();
    let config = GenotyperConfig::default()
        .with_flank_margin(5)
        .with_threads(Some(3));
    let output = Genotyper::new(config)
        .unwrap()
        .run(
            &lines,
            || Ok::<_, SourceError>(reference()),
            || Ok::<_, SourceError>(alignments()),
        )
        .unwrap();

    let regions: Vec<&str> = output
        .calls
        .lines()
        .map(|line| line.split('\t').next().unwrap_or_default())
        .collect();
    let expected: Vec<&str> = lines
        .iter()
        .filter(|line| line.contains('\t'))
        .map(|line| line.split('\t').next().unwrap_or_default())
        .collect();
    assert_eq!(regions, expected);
}
