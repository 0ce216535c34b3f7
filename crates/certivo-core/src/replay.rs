//! Replay detection over session statistics.
//!
//! A replayed photograph or a frozen video frame produces no blinks and
//! near-identical nose positions across frames. A live subject blinks at
//! least once over a short capture and shows measurable head drift between
//! frames, even while trying to hold still.
//!
//! The check is a coarse heuristic with no extra inference: it reads the
//! statistics the aggregator already built.
//!
//! # Threat Coverage
//!
//! - **Blocks:** Printed photographs, still images on a screen, frozen frames.
//! - **Does not block:** Video replays of a blinking, moving subject, or
//!   synthetic media that reproduces both.

use serde::{Deserialize, Serialize};

use crate::signals::SessionStatistics;

/// Default mean head displacement (normalized units) below which the session
/// is considered static. Sensor noise on a still image stays well under this;
/// a handheld capture of a live face exceeds it.
pub const DEFAULT_MIN_HEAD_MOVEMENT: f64 = 0.001;

/// Outcome of the replay check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayAssessment {
    /// True when the session looks static or replayed.
    pub replay_flag: bool,
    pub no_blinks: bool,
    pub static_head: bool,
    /// Mean nose displacement across consecutive face frames (0 if fewer than two).
    pub mean_head_movement: f64,
}

/// Flag sessions with zero blinks or with mean head movement below `min_head_movement`.
///
/// An empty displacement series (fewer than two face frames) counts as zero
/// movement, so it always flags. So does a non-finite mean.
pub fn detect_replay(stats: &SessionStatistics, min_head_movement: f64) -> ReplayAssessment {
    let mean_head_movement = stats.mean_head_movement();
    let no_blinks = stats.blink_count == 0;
    let static_head = mean_head_movement.is_nan() || mean_head_movement < min_head_movement;

    ReplayAssessment {
        replay_flag: no_blinks || static_head,
        no_blinks,
        static_head,
        mean_head_movement,
    }
}
