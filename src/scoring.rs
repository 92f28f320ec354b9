use serde::Serialize;

use crate::error::AnnotateError;
use crate::store::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreResult {
    pub scored: usize,
    pub skipped: usize,
}

/// Median of the raw byte values of a quality string.
///
/// Even-length strings average the two middle values. `None` when empty.
pub fn median_quality(quality: &str) -> Option<f64> {
    let mut values = quality.bytes().collect::<Vec<_>>();
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    let median = if values.len() % 2 == 0 {
        (f64::from(values[mid - 1]) + f64::from(values[mid])) / 2.0
    } else {
        f64::from(values[mid])
    };
    Some(median)
}

/// Writes the median quality of every stored fragment to `quality_fragment`.
pub fn score_fragments(store: &mut SqliteStore) -> Result<ScoreResult, AnnotateError> {
    let fragments = store.fragment_qualities()?;
    let total = fragments.len();
    let scores = fragments
        .into_iter()
        .filter_map(|(fragment_id, quality)| {
            median_quality(&quality).map(|score| (fragment_id, score))
        })
        .collect::<Vec<_>>();
    let scored = store.set_fragment_scores(&scores)?;
    tracing::info!(scored, total, "scored fragments");
    Ok(ScoreResult {
        scored,
        skipped: total - scores.len(),
    })
}
