use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use strcall::genomics::{
    render_vcf, write_vcf, BamAlignmentSource, ErrorTable, FastaReference, RegionCaller,
};
use strcall::{Genotyper, GenotyperConfig, Ploidy};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "strcall", about = "Short tandem repeat genotyping from aligned reads")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Genotype every region of a region file.
    ///
    /// Writes `<prefix>.vcf`, `<prefix>.report` (per-region header line plus
    /// the realigned reads) and `<prefix>.calls` (one genotype line per region).
    Genotype {
        /// Indexed BAM file.
        bam: PathBuf,
        /// Reference FASTA (indexed on first use if no `.fai` exists).
        fasta: PathBuf,
        /// Region file: `<chrom>:<start>-<stop>\t<unit length>_..._<unit>` per line.
        regions: PathBuf,
        /// Output path prefix (default: BAM file name plus non-default settings).
        #[arg(long)]
        output_prefix: Option<PathBuf>,
        #[command(flatten)]
        settings: SettingsArgs,
    },
    /// Genotype a single region line and print every output to stdout.
    Inspect {
        /// Indexed BAM file.
        bam: PathBuf,
        /// Reference FASTA.
        fasta: PathBuf,
        /// Region line (coordinates and metadata separated by a tab).
        #[arg(long)]
        region: String,
        #[command(flatten)]
        settings: SettingsArgs,
    },
}

#[derive(Args, Debug)]
struct SettingsArgs {
    /// Reference bases examined on each side of the repeat.
    #[arg(long, default_value_t = 20)]
    flank: usize,
    /// Minimum read size.
    #[arg(long)]
    min_read_length: Option<u32>,
    /// Maximum read size.
    #[arg(long)]
    max_read_length: Option<u32>,
    /// Consecutive matching bases required left of the repeat.
    #[arg(long, default_value_t = 3)]
    left_flank: usize,
    /// Consecutive matching bases required right of the repeat.
    #[arg(long, default_value_t = 3)]
    right_flank: usize,
    /// Minimum mapping quality.
    #[arg(long, default_value_t = 0)]
    min_mapq: u8,
    /// Drop reads whose XT tag marks a repeat (multi-mapped) hit.
    #[arg(long)]
    exclude_multi: bool,
    /// Keep only reads flagged as proper pairs.
    #[arg(long)]
    proper_pairs: bool,
    /// Emit VCF records for invariant sites.
    #[arg(long)]
    emit_all: bool,
    /// Score homozygous genotypes only.
    #[arg(long)]
    haploid: bool,
    /// Uniform sequencing error rate replacing the built-in table.
    #[arg(long, conflicts_with = "error_table")]
    error_rate: Option<f64>,
    /// Measured error table (`unit length_bucket quality_bucket correct error`
    /// per line) replacing the built-in placeholder values.
    #[arg(long)]
    error_table: Option<PathBuf>,
    /// Worker threads (default: all processors).
    #[arg(long)]
    threads: Option<usize>,
    /// Skip the `.report` output.
    #[arg(long)]
    no_report: bool,
    /// Skip the `.calls` output.
    #[arg(long)]
    no_calls: bool,
}

impl SettingsArgs {
    fn to_config(&self) -> Result<GenotyperConfig> {
        let error_table = self
            .error_table
            .as_deref()
            .map(|path| {
                ErrorTable::from_path(path)
                    .with_context(|| format!("failed to load error table {}", path.display()))
            })
            .transpose()?;
        Ok(GenotyperConfig::default()
            .with_flank_margin(self.flank)
            .with_read_length_bounds(self.min_read_length, self.max_read_length)
            .with_flank_matches(self.left_flank, self.right_flank)
            .with_min_map_quality(self.min_mapq)
            .with_exclude_multi_mapped(self.exclude_multi)
            .with_properly_paired_only(self.proper_pairs)
            .with_emit_all(self.emit_all)
            .with_ploidy(if self.haploid { Ploidy::Haploid } else { Ploidy::Diploid })
            .with_error_rate(self.error_rate)
            .with_error_table(error_table)
            .with_threads(self.threads)
            .with_outputs(!self.no_report, !self.no_calls))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Genotype {
            bam,
            fasta,
            regions,
            output_prefix,
            settings,
        } => run_genotype(bam, fasta, regions, output_prefix, settings.to_config()?)?,
        Commands::Inspect {
            bam,
            fasta,
            region,
            settings,
        } => run_inspect(bam, fasta, &region, settings.to_config()?)?,
    }

    Ok(())
}

fn run_genotype(
    bam_path: PathBuf,
    fasta_path: PathBuf,
    regions_path: PathBuf,
    output_prefix: Option<PathBuf>,
    config: GenotyperConfig,
) -> Result<()> {
    info!(
        bam = %bam_path.display(),
        fasta = %fasta_path.display(),
        regions = %regions_path.display(),
        "reading inputs"
    );
    let lines = read_region_lines(&regions_path)?;
    let prefix = output_prefix.unwrap_or_else(|| default_prefix(&bam_path, &config));
    let genotyper = Genotyper::new(config).context("invalid settings")?;

    let output = genotyper
        .run(
            &lines,
            || FastaReference::from_path(&fasta_path),
            || BamAlignmentSource::from_path(&bam_path),
        )
        .with_context(|| format!("genotyping {} failed", bam_path.display()))?;

    let vcf_path = with_extension(&prefix, "vcf");
    let mut writer = BufWriter::new(
        File::create(&vcf_path)
            .with_context(|| format!("failed to create {}", vcf_path.display()))?,
    );
    write_vcf(&mut writer, &output.records)
        .with_context(|| format!("failed to write {}", vcf_path.display()))?;
    info!(path = %vcf_path.display(), records = output.records.len(), "wrote VCF");

    if genotyper.config().write_report {
        let report_path = with_extension(&prefix, "report");
        write_text(&report_path, &output.report)?;
        info!(path = %report_path.display(), "wrote report");
    }
    if genotyper.config().write_calls {
        let calls_path = with_extension(&prefix, "calls");
        write_text(&calls_path, &output.calls)?;
        info!(path = %calls_path.display(), "wrote calls");
    }

    Ok(())
}

fn run_inspect(bam_path: PathBuf, fasta_path: PathBuf, line: &str, config: GenotyperConfig) -> Result<()> {
    config.validate().context("invalid settings")?;
    let reference = FastaReference::from_path(&fasta_path)
        .with_context(|| format!("failed to open reference {}", fasta_path.display()))?;
    let mut alignments = BamAlignmentSource::from_path(&bam_path)
        .with_context(|| format!("failed to open alignments {}", bam_path.display()))?;

    let mut caller = RegionCaller::new(&config);
    let Some(output) = caller
        .process_line(line, &reference, &mut alignments)
        .with_context(|| format!("failed to genotype region '{line}'"))?
    else {
        bail!("malformed region line '{line}'");
    };

    print!("{}", output.report);
    print!("{}", output.calls);
    let records: Vec<_> = output.record.into_iter().collect();
    print!("{}", render_vcf(&records));
    Ok(())
}

fn read_region_lines(path: &Path) -> Result<Vec<String>> {
    let reader = BufReader::new(
        File::open(path).with_context(|| format!("failed to open region file {}", path.display()))?,
    );
    reader
        .lines()
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("failed to read region file {}", path.display()))
}

/// `<bam file name><settings suffix>` in the current directory.
fn default_prefix(bam_path: &Path, config: &GenotyperConfig) -> PathBuf {
    let name = bam_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "strcall".to_string());
    PathBuf::from(format!("{name}{}", config.parameter_suffix()))
}

fn with_extension(prefix: &Path, extension: &str) -> PathBuf {
    let mut path = prefix.as_os_str().to_owned();
    path.push(".");
    path.push(extension);
    PathBuf::from(path)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))
}
