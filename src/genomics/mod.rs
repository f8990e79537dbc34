//! Short tandem repeat genotyping from aligned reads.
//!
//! The per-region pipeline runs region parsing and reference window
//! resolution, then read realignment onto the window, column
//! synchronisation of all reads, filtering and allele tallying, genotype
//! likelihoods, and finally report and VCF rendering.

mod error_table;
mod io;
mod likelihood;
mod matrix;
mod realign;
mod region;
mod report;
mod tally;
mod types;
mod variant_caller;
mod vcf;

pub use error_table::{ErrorCounts, ErrorModel, ErrorTable, ErrorTableError};
pub use io::{
    AlignmentSource, BamAlignmentSource, FastaReference, InMemoryAlignments, InMemoryReference,
    ReferenceProvider, SourceError,
};
pub use likelihood::{
    Genotype, GenotypeOutcome, Hypothesis, LikelihoodEngine, LikelihoodTable, ScoredGenotype,
    CONFIDENCE_CAP,
};
pub use matrix::{AlignmentMatrix, MatrixRow};
pub use realign::{realign_read, render_allele, Cell, Insertion, RealignedRead, Rejection};
pub use region::{ReferenceWindow, RegionSpec, RegionSpecError};
pub use report::CallSummary;
pub use tally::{AlleleBucket, AlleleTally, ScoredRead};
pub use types::{AlignedRead, CigarOp, CigarOpKind, ReadFlags};
pub use variant_caller::{RegionCaller, RegionOutput, RegionSummary};
pub use vcf::{render_vcf, strip_gaps, write_vcf, VariantRecord};
