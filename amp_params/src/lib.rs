// Warning groups (as of rust 1.55)
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2021_compatibility,
    rust_2018_idioms,
    unused
)]
// Other warnings (as of rust 1.55)
#![deny(
    bindings_with_variant_name,
    confusable_idents,
    const_item_mutation,
    deprecated,
    elided_lifetimes_in_paths,
    irrefutable_let_patterns,
    non_shorthand_field_patterns,
    overlapping_range_endpoints,
    renamed_and_removed_lints,
    unconditional_recursion,
    unused_comparisons,
    while_true
)]
//! Tunable parameters of the amplicon pipeline.
//!
//! Every value has a compiled-in default. A TOML file may override any subset
//! of them; each overridden value is reported with a warning so that a run's
//! log records exactly how it deviated from the defaults.

use anyhow::{ensure, Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Index of the forward read in per-direction parameter pairs.
pub const FORWARD: usize = 0;
/// Index of the reverse read in per-direction parameter pairs.
pub const REVERSE: usize = 1;

/// How chimeras are called across samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChimeraMethod {
    /// Call per sample, then remove a sequence flagged in enough samples.
    Consensus,
    /// Call and remove independently within each sample.
    PerSample,
    /// Call once on abundances summed over all samples.
    Pooled,
}

impl std::str::FromStr for ChimeraMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "consensus" => ChimeraMethod::Consensus,
            "per_sample" | "per-sample" => ChimeraMethod::PerSample,
            "pooled" => ChimeraMethod::Pooled,
            _ => anyhow::bail!("unknown chimera method '{s}'"),
        })
    }
}

/// Column order of the sequence table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnOrder {
    /// Order in which sequences were first seen, sample by sample.
    FirstSeen,
    /// Descending total abundance, ties by first-seen order.
    Abundance,
    /// Lexicographic by sequence.
    Sequence,
}

/// Read filtering and truncation, applied per direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterParams {
    /// Truncate reads to this length; shorter reads are discarded. 0 disables.
    pub trunc_len: [usize; 2],
    /// Bases removed from the 5' end before anything else.
    pub trim_left: [usize; 2],
    /// Maximum expected errors after truncation.
    pub max_ee: [f64; 2],
    /// Truncate at the first base with a quality at or below this value.
    pub trunc_q: u8,
    /// Maximum number of ambiguous bases.
    pub max_n: usize,
    /// Minimum read length after trimming.
    pub min_len: usize,
}

impl Default for FilterParams {
    fn default() -> Self {
        FilterParams {
            trunc_len: [0, 0],
            trim_left: [0, 0],
            max_ee: [f64::INFINITY, f64::INFINITY],
            trunc_q: 2,
            max_n: 0,
            min_len: 20,
        }
    }
}

/// Error model learning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LearnParams {
    /// Minimum number of bases drawn from the samples to learn from.
    pub nbases: u64,
    /// Maximum rounds of denoise / re-estimate.
    pub max_consist: usize,
    /// Largest absolute change of any transition probability that counts as converged.
    pub convergence: f64,
    /// Shuffle the sample order before drawing bases.
    pub randomize: bool,
    /// Seed used when `randomize` is set.
    pub seed: u64,
    /// Highest Phred score with its own column in the error model.
    pub max_quality: u8,
}

impl Default for LearnParams {
    fn default() -> Self {
        LearnParams {
            nbases: 100_000_000,
            max_consist: 10,
            convergence: 1e-6,
            randomize: false,
            seed: 0,
            max_quality: 41,
        }
    }
}

/// Sequence-variant inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DenoiseParams {
    /// Abundance p-value below which a sequence founds a new cluster.
    pub omega_a: f64,
    /// Skip alignment for pairs whose 5-mer distance exceeds `kdist_cutoff`.
    pub use_kmers: bool,
    /// 5-mer distance above which two sequences are never compared.
    pub kdist_cutoff: f64,
    /// Band radius of the gapped alignment.
    pub band_size: usize,
    /// Allow sequences seen once to found new clusters.
    pub detect_singletons: bool,
    /// Stop after this many clusters. 0 means unlimited.
    pub max_clusters: usize,
    /// A new center must be at least this many times more abundant than expected.
    pub min_fold: f64,
    /// A new center must differ from its old center at this many positions.
    pub min_hamming: usize,
}

impl Default for DenoiseParams {
    fn default() -> Self {
        DenoiseParams {
            omega_a: 1e-40,
            use_kmers: true,
            kdist_cutoff: 0.42,
            band_size: 16,
            detect_singletons: false,
            max_clusters: 0,
            min_fold: 1.0,
            min_hamming: 1,
        }
    }
}

/// Paired-end merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MergeParams {
    /// Minimum overlap between forward and reverse-complemented reverse.
    pub min_overlap: usize,
    /// Mismatches tolerated in the overlap when `lenient` is set.
    pub max_mismatch: usize,
    /// Resolve up to `max_mismatch` overlap mismatches by quality instead of
    /// requiring an identical overlap.
    pub lenient: bool,
    /// Join forward and reverse with a spacer of Ns instead of overlapping.
    pub just_concatenate: bool,
}

impl Default for MergeParams {
    fn default() -> Self {
        MergeParams {
            min_overlap: 12,
            max_mismatch: 0,
            lenient: false,
            just_concatenate: false,
        }
    }
}

/// Sequence table construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TableParams {
    /// Inclusive range of accepted amplicon lengths.
    pub length_band: Option<[usize; 2]>,
    /// Column order of the table.
    pub order: ColumnOrder,
}

impl Default for TableParams {
    fn default() -> Self {
        TableParams {
            length_band: None,
            order: ColumnOrder::FirstSeen,
        }
    }
}

/// Chimera removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChimeraParams {
    /// How calls are combined across samples.
    pub method: ChimeraMethod,
    /// Parents must be this many times more abundant than the candidate.
    pub min_fold_parent_over_abundance: f64,
    /// Parents must have at least this abundance.
    pub min_parent_abundance: u64,
    /// Consensus: fraction of samples that must flag the candidate.
    pub min_sample_fraction: f64,
    /// Consensus: number of non-flagging samples that is always tolerated.
    pub ignore_n_negatives: usize,
    /// Also flag candidates one mismatch away from a bimera.
    pub allow_one_off: bool,
    /// One-off bimeras need parents at least this far from the candidate.
    pub min_one_off_parent_distance: usize,
}

impl Default for ChimeraParams {
    fn default() -> Self {
        ChimeraParams {
            method: ChimeraMethod::Consensus,
            min_fold_parent_over_abundance: 1.5,
            min_parent_abundance: 2,
            min_sample_fraction: 0.9,
            ignore_n_negatives: 1,
            allow_one_off: false,
            min_one_off_parent_distance: 4,
        }
    }
}

/// Threading and time limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeParams {
    /// Worker threads. 0 uses one per core.
    pub threads: usize,
    /// Cancel long-running steps after this many seconds.
    pub timeout_secs: Option<u64>,
}

/// All pipeline parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Parameters {
    /// Read filtering.
    pub filter: FilterParams,
    /// Error model learning.
    pub learn: LearnParams,
    /// Variant inference.
    pub denoise: DenoiseParams,
    /// Pair merging.
    pub merge: MergeParams,
    /// Sequence table.
    pub table: TableParams,
    /// Chimera removal.
    pub chimera: ChimeraParams,
    /// Threads and timeouts.
    pub runtime: RuntimeParams,
}

macro_rules! warn_non_default {
    ($params:expr, $defaults:expr, $section:ident, [$($field:ident),+ $(,)?]) => {
        $(
            if $params.$section.$field != $defaults.$section.$field {
                warn!(
                    "using non-default {}.{} = {:?}",
                    stringify!($section),
                    stringify!($field),
                    $params.$section.$field
                );
            }
        )+
    };
}

impl Parameters {
    /// Load parameters from a TOML file, or return the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Parameters> {
        let Some(path) = path else {
            info!("no parameters file given, using defaults");
            return Ok(Parameters::default());
        };
        let s = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
        let params = Parameters::from_toml_str(&s).with_context(|| path.display().to_string())?;
        params.warn_non_defaults();
        Ok(params)
    }

    /// Parse and validate parameters from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Parameters> {
        let params: Parameters = toml::from_str(s)?;
        params.validate()?;
        Ok(params)
    }

    /// Check that values are within their meaningful ranges.
    pub fn validate(&self) -> Result<()> {
        let d = &self.denoise;
        ensure!(
            d.omega_a > 0.0 && d.omega_a < 1.0,
            "denoise.omega_a must be in (0, 1), got {}",
            d.omega_a
        );
        ensure!(
            (0.0..=1.0).contains(&d.kdist_cutoff),
            "denoise.kdist_cutoff must be in [0, 1], got {}",
            d.kdist_cutoff
        );
        ensure!(d.min_fold >= 1.0, "denoise.min_fold must be at least 1");
        ensure!(
            self.learn.convergence > 0.0,
            "learn.convergence must be positive"
        );
        ensure!(self.learn.max_consist > 0, "learn.max_consist must be positive");
        ensure!(self.merge.min_overlap > 0, "merge.min_overlap must be positive");
        ensure!(
            self.filter.max_ee.iter().all(|&e| e >= 0.0),
            "filter.max_ee must not be negative"
        );
        if let Some([lo, hi]) = self.table.length_band {
            ensure!(lo <= hi, "table.length_band is empty: [{lo}, {hi}]");
        }
        let c = &self.chimera;
        ensure!(
            c.min_fold_parent_over_abundance >= 1.0,
            "chimera.min_fold_parent_over_abundance must be at least 1"
        );
        ensure!(
            (0.0..=1.0).contains(&c.min_sample_fraction),
            "chimera.min_sample_fraction must be in [0, 1]"
        );
        Ok(())
    }

    /// Log a warning for every value that differs from its default.
    pub fn warn_non_defaults(&self) {
        let defaults = Parameters::default();
        warn_non_default!(self, defaults, filter, [trunc_len, trim_left, max_ee, trunc_q, max_n, min_len]);
        warn_non_default!(
            self,
            defaults,
            learn,
            [nbases, max_consist, convergence, randomize, seed, max_quality]
        );
        warn_non_default!(
            self,
            defaults,
            denoise,
            [
                omega_a,
                use_kmers,
                kdist_cutoff,
                band_size,
                detect_singletons,
                max_clusters,
                min_fold,
                min_hamming
            ]
        );
        warn_non_default!(self, defaults, merge, [min_overlap, max_mismatch, lenient, just_concatenate]);
        warn_non_default!(self, defaults, table, [length_band, order]);
        warn_non_default!(
            self,
            defaults,
            chimera,
            [
                method,
                min_fold_parent_over_abundance,
                min_parent_abundance,
                min_sample_fraction,
                ignore_n_negatives,
                allow_one_off,
                min_one_off_parent_distance
            ]
        );
        warn_non_default!(self, defaults, runtime, [threads, timeout_secs]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(Parameters::from_toml_str("").unwrap(), Parameters::default());
    }

    #[test]
    fn test_partial_override() {
        let params = Parameters::from_toml_str(
            r#"
            [filter]
            trunc_len = [240, 160]
            max_ee = [2.0, 2.0]

            [merge]
            min_overlap = 20

            [chimera]
            method = "per_sample"
            "#,
        )
        .unwrap();
        assert_eq!(params.filter.trunc_len, [240, 160]);
        assert_eq!(params.filter.max_ee, [2.0, 2.0]);
        assert_eq!(params.filter.trunc_q, 2);
        assert_eq!(params.merge.min_overlap, 20);
        assert_eq!(params.chimera.method, ChimeraMethod::PerSample);
        assert_eq!(params.denoise, DenoiseParams::default());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(Parameters::from_toml_str("[merge]\nmin_overlp = 3\n").is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Parameters::from_toml_str("[denoise]\nomega_a = 2.0\n").is_err());
        assert!(Parameters::from_toml_str("[table]\nlength_band = [300, 200]\n").is_err());
        assert!(Parameters::from_toml_str("[merge]\nmin_overlap = 0\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[table]\nlength_band = [250, 256]\norder = \"abundance\"").unwrap();
        let params = Parameters::load(Some(file.path())).unwrap();
        assert_eq!(params.table.length_band, Some([250, 256]));
        assert_eq!(params.table.order, ColumnOrder::Abundance);
        assert!(Parameters::load(Some(Path::new("/nonexistent/params.toml"))).is_err());
        assert_eq!(Parameters::load(None).unwrap(), Parameters::default());
    }

    #[test]
    fn test_chimera_method_from_str() {
        assert_eq!("per-sample".parse::<ChimeraMethod>().unwrap(), ChimeraMethod::PerSample);
        assert!("bogus".parse::<ChimeraMethod>().is_err());
    }
}
