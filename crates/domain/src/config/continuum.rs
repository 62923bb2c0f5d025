use serde::{Deserialize, Serialize};

/// Continuum cache and segment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuumConfig {
    /// Collapsed segment summaries injected on cold start.
    #[serde(default = "d_summary_count")]
    pub session_summary_count: usize,
    /// Active-segment message count that triggers a boundary sentinel.
    #[serde(default = "d_segment_threshold")]
    pub segment_size_threshold: usize,
}

impl Default for ContinuumConfig {
    fn default() -> Self {
        Self {
            session_summary_count: d_summary_count(),
            segment_size_threshold: d_segment_threshold(),
        }
    }
}

fn d_summary_count() -> usize {
    5
}
fn d_segment_threshold() -> usize {
    60
}
