//! Genotype likelihoods over allele-length buckets.
//!
//! Every unordered pair of observed allele lengths is a heterozygous
//! hypothesis and every single length a homozygous one. Each hypothesis is
//! scored with a beta-multinomial model whose pseudo-counts come from the
//! error table: reads supporting a candidate length are "correct"
//! observations, all other reads are errors. Raw scores are normalised and
//! reported Phred-scaled.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use super::error_table::{ErrorCounts, ErrorModel, MAX_REFERENCE_LENGTH};
use super::tally::{AlleleBucket, AlleleTally};
use crate::util::phred_scale;
use crate::Ploidy;

/// Upper bound of every Phred-scaled value.
pub const CONFIDENCE_CAP: f64 = 50.0;
/// Calls at or below this confidence are reported as unresolved.
pub const REPORTABLE_CONFIDENCE: f64 = 3.02;
/// More buckets than this leaves the region unresolved.
pub const MAX_BUCKETS: usize = 9;
/// A top bucket this deep is treated as an artifact.
pub const COVERAGE_CEILING: u32 = 10_000;
/// Concordance at which the likelihood model is skipped.
pub const CONCORDANCE_SHORTCUT: f64 = 0.99;

/// A homozygous or heterozygous allele-length hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Genotype {
    /// Both alleles share one length.
    Homozygous(usize),
    /// Two distinct lengths, shorter first.
    Heterozygous(usize, usize),
}

impl Genotype {
    /// Normalised `(shorter, longer)` key.
    pub fn key(&self) -> (usize, usize) {
        match *self {
            Genotype::Homozygous(len) => (len, len),
            Genotype::Heterozygous(a, b) => (a.min(b), a.max(b)),
        }
    }

    /// Whether this is a homozygous call at `length`.
    pub fn is_homozygous_at(&self, length: usize) -> bool {
        *self == Genotype::Homozygous(length)
    }
}

impl fmt::Display for Genotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Genotype::Homozygous(len) => write!(f, "{len}"),
            Genotype::Heterozygous(a, b) => write!(f, "{a}h{b}"),
        }
    }
}

/// Phred-scaled likelihood per normalised genotype key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LikelihoodTable {
    entries: BTreeMap<(usize, usize), f64>,
}

impl LikelihoodTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding one homozygous entry.
    pub fn homozygous(length: usize, value: f64) -> Self {
        let mut table = Self::new();
        table.insert(length, length, value);
        table
    }

    /// Store a value under the normalised key of `(a, b)`.
    pub fn insert(&mut self, a: usize, b: usize, value: f64) {
        self.entries.insert((a.min(b), a.max(b)), value);
    }

    /// Value stored for `(a, b)` in either order.
    pub fn get(&self, a: usize, b: usize) -> Option<f64> {
        self.entries.get(&(a.min(b), a.max(b))).copied()
    }

    /// Highest entry; the smallest key wins ties.
    pub fn best(&self) -> Option<((usize, usize), f64)> {
        self.entries
            .iter()
            .fold(None, |best: Option<((usize, usize), f64)>, (&key, &value)| match best {
                Some((_, top)) if value <= top => best,
                _ => Some((key, value)),
            })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), f64)> + '_ {
        self.entries.iter().map(|(&key, &value)| (key, value))
    }
}

/// One scored hypothesis.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    /// Hypothesised genotype.
    pub genotype: Genotype,
    /// Normalised posterior probability.
    pub probability: f64,
}

/// Result of running the likelihood model.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredGenotype {
    /// Most probable genotype.
    pub genotype: Genotype,
    /// Phred-scaled confidence of `genotype`, in `[0, 50]`.
    pub confidence: f64,
    /// All hypotheses, most probable first.
    pub hypotheses: Vec<Hypothesis>,
    /// Phred-scaled value of every hypothesis.
    pub likelihoods: LikelihoodTable,
}

/// Genotype decision for one region.
#[derive(Debug, Clone, PartialEq)]
pub enum GenotypeOutcome {
    /// No reads, too many alleles, or implausible coverage.
    Unresolved,
    /// Surviving reads agree; the model was not consulted.
    Concordant {
        /// Majority allele length.
        length: usize,
        /// Single maximal homozygous entry.
        likelihoods: LikelihoodTable,
    },
    /// Call produced by the likelihood model.
    Scored(ScoredGenotype),
}

impl GenotypeOutcome {
    /// Likelihood table backing the call, if any.
    pub fn likelihoods(&self) -> Option<&LikelihoodTable> {
        match self {
            GenotypeOutcome::Unresolved => None,
            GenotypeOutcome::Concordant { likelihoods, .. } => Some(likelihoods),
            GenotypeOutcome::Scored(scored) => Some(&scored.likelihoods),
        }
    }
}

/// `ln(n!)`, memoised in a table that grows on demand.
#[derive(Debug, Clone)]
pub(crate) struct LogFactorial {
    table: Vec<f64>,
}

impl Default for LogFactorial {
    fn default() -> Self {
        Self { table: vec![0.0] }
    }
}

impl LogFactorial {
    /// Table holding only `ln(0!)`.
    pub fn new() -> Self {
        Self::default()
    }

    /// `ln(n!)`.
    pub fn ln(&mut self, n: u64) -> f64 {
        let n = n as usize;
        while self.table.len() <= n {
            let k = self.table.len();
            let previous = self.table[k - 1];
            self.table.push(previous + (k as f64).ln());
        }
        self.table[n]
    }

    /// `ln` of the multivariate beta function of integer arguments:
    /// `sum(ln((v_i - 1)!)) - ln((sum(v) - 1)!)`. Arguments must be positive.
    fn ln_beta(&mut self, values: &[u64]) -> f64 {
        let total: u64 = values.iter().sum();
        let parts: f64 = values.iter().map(|&v| self.ln(v - 1)).sum();
        parts - self.ln(total - 1)
    }

    /// `ln((a + b + c)! / (a! b! c!))`.
    fn ln_multinomial(&mut self, a: u64, b: u64, c: u64) -> f64 {
        self.ln(a + b + c) - self.ln(a) - self.ln(b) - self.ln(c)
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    length: usize,
    occurrences: u64,
    counts: ErrorCounts,
}

/// Scores genotype hypotheses for one region at a time.
#[derive(Debug, Clone)]
pub struct LikelihoodEngine {
    model: ErrorModel,
    ploidy: Ploidy,
    log_factorial: LogFactorial,
}

impl LikelihoodEngine {
    /// Engine using `model` for pseudo-counts.
    pub fn new(model: ErrorModel, ploidy: Ploidy) -> Self {
        Self {
            model,
            ploidy,
            log_factorial: LogFactorial::new(),
        }
    }

    /// Decide the genotype of a region from its allele tally.
    ///
    /// `reference_length` is the core length of the reference window and
    /// `unit_length` the repeat unit length; both are clamped for table lookup.
    pub fn call(
        &mut self,
        tally: &AlleleTally,
        reference_length: usize,
        unit_length: u32,
    ) -> GenotypeOutcome {
        let buckets = tally.buckets();
        let Some(top) = buckets.first() else {
            return GenotypeOutcome::Unresolved;
        };
        if top.occurrences >= COVERAGE_CEILING || buckets.len() > MAX_BUCKETS {
            return GenotypeOutcome::Unresolved;
        }
        if tally.concordance().is_some_and(|c| c >= CONCORDANCE_SHORTCUT) {
            if let Some(length) = tally.majority_length() {
                return GenotypeOutcome::Concordant {
                    length,
                    likelihoods: LikelihoodTable::homozygous(length, CONFIDENCE_CAP),
                };
            }
        }
        match self.score(buckets, reference_length, unit_length) {
            Some(scored) => GenotypeOutcome::Scored(scored),
            None => GenotypeOutcome::Unresolved,
        }
    }

    fn score(
        &mut self,
        buckets: &[AlleleBucket],
        reference_length: usize,
        unit_length: u32,
    ) -> Option<ScoredGenotype> {
        let reference_length = reference_length.min(MAX_REFERENCE_LENGTH);
        let mut candidates: Vec<Candidate> = buckets
            .iter()
            .map(|bucket| Candidate {
                length: bucket.allele_length,
                occurrences: u64::from(bucket.occurrences),
                counts: self
                    .model
                    .lookup(unit_length, reference_length, bucket.avg_quality),
            })
            .collect();
        candidates.sort_by_key(|candidate| candidate.length);
        let total: u64 = candidates.iter().map(|c| c.occurrences).sum();

        // The empty partner turns a pairing into a homozygous hypothesis.
        let empty = Candidate {
            length: 0,
            occurrences: 0,
            counts: ErrorCounts { correct: 0, error: 0 },
        };

        let mut raw: Vec<(Genotype, f64)> = Vec::new();
        for (i, first) in candidates.iter().enumerate() {
            let partners = candidates[i + 1..].iter().map(Some).chain(std::iter::once(None));
            for second in partners {
                if second.is_some() && self.ploidy == Ploidy::Haploid {
                    continue;
                }
                let partner = second.unwrap_or(&empty);
                let others = total - first.occurrences - partner.occurrences;
                let (c1, e1) = (u64::from(first.counts.correct), u64::from(first.counts.error));
                let (c2, e2) = (u64::from(partner.counts.correct), u64::from(partner.counts.error));

                let (genotype, numerator, denominator) = match second {
                    Some(partner) => (
                        Genotype::Heterozygous(first.length, partner.length),
                        vec![
                            1 + c1 + first.occurrences,
                            1 + c2 + partner.occurrences,
                            1 + e1 + e2 + others,
                        ],
                        vec![1 + c1, 1 + c2, 1 + e1 + e2],
                    ),
                    None => (
                        Genotype::Homozygous(first.length),
                        vec![1 + c1 + first.occurrences, 1 + e1 + e2 + others],
                        vec![1 + c1, 1 + e1 + e2],
                    ),
                };

                let lf = &mut self.log_factorial;
                let ln_score = lf.ln_multinomial(first.occurrences, partner.occurrences, others)
                    + lf.ln_beta(&numerator)
                    - lf.ln_beta(&denominator);
                raw.push((genotype, ln_score));
            }
        }

        let max = raw
            .iter()
            .map(|&(_, score)| score)
            .fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return None;
        }
        let weights: Vec<f64> = raw.iter().map(|&(_, score)| (score - max).exp()).collect();
        let sum: f64 = weights.iter().sum();

        let mut likelihoods = LikelihoodTable::new();
        let mut hypotheses: Vec<(Hypothesis, f64)> = Vec::with_capacity(raw.len());
        for (k, &(genotype, _)) in raw.iter().enumerate() {
            let probability = weights[k] / sum;
            let rest: f64 = weights
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != k)
                .map(|(_, w)| w / sum)
                .sum();
            let phred = phred_confidence(rest);
            let (a, b) = genotype.key();
            likelihoods.insert(a, b, phred);
            hypotheses.push((Hypothesis { genotype, probability }, phred));
        }

        hypotheses.sort_by(|a, b| {
            b.0.probability
                .partial_cmp(&a.0.probability)
                .unwrap_or(Ordering::Equal)
        });
        let (winner, confidence) = hypotheses.first().map(|(h, phred)| (h.genotype, *phred))?;

        Some(ScoredGenotype {
            genotype: winner,
            confidence,
            hypotheses: hypotheses.into_iter().map(|(h, _)| h).collect(),
            likelihoods,
        })
    }
}

/// `-10 * log10(error)` clamped to `[0, 50]`; not-a-number maps to 0.
fn phred_confidence(error: f64) -> f64 {
    let phred = phred_scale(error);
    if phred.is_nan() {
        0.0
    } else {
        phred.clamp(0.0, CONFIDENCE_CAP)
    }
}
