/// Knobs for profiling a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileOptions {
    /// Number of leading rows the statistics are computed over.
    pub sample_size: usize,
    /// Findings below this confidence are discarded.
    pub min_pii_confidence: f64,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            sample_size: 1000,
            min_pii_confidence: 0.5,
        }
    }
}
