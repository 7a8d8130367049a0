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
//! Amplicon sequence variant inference.
//!
//! Paired reads of each sample are dereplicated, an error model is learned
//! jointly over all samples, and each sample is denoised into exact sequence
//! variants. Forward and reverse variants are merged, collected into one
//! sample-by-sequence table, and bimeras are removed.

pub mod cancel;
pub mod chimera;
pub mod compare;
pub mod denoise;
pub mod derep;
pub mod error;
pub mod error_model;
pub mod learner;
pub mod merge;
pub mod output;
pub mod partition;
pub mod pipeline;
pub mod sample_sheet;
pub mod seqtab;
pub mod sequence;
pub mod track;

pub use cancel::CancelToken;
pub use chimera::{remove_bimeras, ChimeraStats};
pub use denoise::{denoise, DenoiseResult, DenoisedCluster};
pub use derep::{dereplicate, Dereplicated, UniqueSequence};
pub use error::{AmpError, Diagnostic};
pub use error_model::{ErrorModel, TransitionCounts};
pub use learner::{learn_errors, LearnedErrors};
pub use merge::{merge_pairs, DenoisedReads, MergeStats, MergedVariant};
pub use pipeline::{run, RunOutcome};
pub use sample_sheet::{read_sample_sheet, Sample};
pub use seqtab::SequenceTable;
pub use track::TrackRow;
