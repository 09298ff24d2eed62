use shakmaty::Color;
use tracing::trace;

use crate::engine_types::SearchLimits;

/// Time control hooks driven around confirmed moves and mode changes.
///
/// The controller never does clock arithmetic itself; it only tells the
/// clock whose time is running and asks it for search limits.
pub trait Clock: Send + 'static {
    fn start(&mut self, side: Color);
    fn stop(&mut self);
    fn add_increment(&mut self, side: Color);
    fn is_running(&self) -> bool;
    /// Limits for a search by `side`.
    fn limits(&self, side: Color) -> SearchLimits;
}

/// Fixed thinking time per move, no game clock.
#[derive(Debug, Clone)]
pub struct FixedMoveTime {
    move_time_ms: u64,
    running: Option<Color>,
}

impl FixedMoveTime {
    pub fn new(move_time_ms: u64) -> Self {
        Self {
            move_time_ms,
            running: None,
        }
    }

    pub fn running_for(&self) -> Option<Color> {
        self.running
    }
}

impl Clock for FixedMoveTime {
    fn start(&mut self, side: Color) {
        trace!(?side, "clock started");
        self.running = Some(side);
    }

    fn stop(&mut self) {
        self.running = None;
    }

    fn add_increment(&mut self, _side: Color) {}

    fn is_running(&self) -> bool {
        self.running.is_some()
    }

    fn limits(&self, _side: Color) -> SearchLimits {
        SearchLimits::move_time(self.move_time_ms)
    }
}
