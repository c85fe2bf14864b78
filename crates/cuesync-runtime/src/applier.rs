//! The renderer seam

use cuesync_core::CueId;
use cuesync_wire::PatternConfig;

/// Applies a cue's pattern to the physical output.
///
/// Called synchronously from the due-fire scan; implementations must not
/// block for long.
pub trait CueApplier: Send {
    fn apply(&mut self, cue_id: CueId, pattern: &PatternConfig);
}

impl<F> CueApplier for F
where
    F: FnMut(CueId, &PatternConfig) + Send,
{
    fn apply(&mut self, cue_id: CueId, pattern: &PatternConfig) {
        self(cue_id, pattern)
    }
}

/// Applier with no output, it only logs
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingApplier;

impl CueApplier for LoggingApplier {
    fn apply(&mut self, cue_id: CueId, pattern: &PatternConfig) {
        tracing::info!(
            cue_id = cue_id.0,
            pattern = ?pattern.kind(),
            brightness = pattern.brightness_pct,
            seed = pattern.seed,
            "apply cue"
        );
    }
}
