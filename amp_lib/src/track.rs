//! Read counts of each sample through the pipeline stages.

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRow {
    pub sample: String,
    /// Read pairs read from the input files.
    pub input: u64,
    /// Read pairs passing filter and trim.
    pub filtered: u64,
    pub denoised_forward: u64,
    pub denoised_reverse: u64,
    /// Read pairs merged into a full amplicon.
    pub merged: u64,
    /// Reads left after length and chimera filtering.
    pub nonchim: u64,
}

impl TrackRow {
    pub fn new(sample: &str) -> TrackRow {
        TrackRow {
            sample: sample.to_string(),
            ..TrackRow::default()
        }
    }

    /// Counts must never grow from one stage to the next.
    pub fn is_monotone(&self) -> bool {
        self.filtered <= self.input
            && self.denoised_forward <= self.filtered
            && self.denoised_reverse <= self.filtered
            && self.merged <= self.denoised_forward.min(self.denoised_reverse)
            && self.nonchim <= self.merged
    }
}
