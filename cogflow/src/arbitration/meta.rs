//! Oscillation detection over chosen decision labels.

use std::collections::VecDeque;

/// Smallest history that can hold an A,B,A,B pattern.
pub const MIN_OSCILLATION_WINDOW: usize = 4;

/// Watches the stream of chosen outcomes for back-and-forth flipping.
///
/// Keeps the last `window` labels and reports oscillation whenever the four
/// most recent labels alternate between two distinct values.
#[derive(Debug, Clone)]
pub struct MetaController {
    window: usize,
    history: VecDeque<String>,
}

impl Default for MetaController {
    fn default() -> Self {
        Self::new(MIN_OSCILLATION_WINDOW)
    }
}

impl MetaController {
    /// Creates a controller; windows below four are raised to four.
    #[must_use]
    pub fn new(window: usize) -> Self {
        let window = window.max(MIN_OSCILLATION_WINDOW);
        Self {
            window,
            history: VecDeque::with_capacity(window),
        }
    }

    /// Returns the history size.
    #[must_use]
    pub fn window(&self) -> usize {
        self.window
    }

    /// Records a label and returns true if the history now oscillates.
    pub fn observe(&mut self, label: impl Into<String>) -> bool {
        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back(label.into());
        self.is_oscillating()
    }

    /// Returns true if the four most recent labels are A,B,A,B with A != B.
    #[must_use]
    pub fn is_oscillating(&self) -> bool {
        let len = self.history.len();
        if len < MIN_OSCILLATION_WINDOW {
            return false;
        }
        let tail: Vec<&String> = self.history.iter().skip(len - MIN_OSCILLATION_WINDOW).collect();
        tail[0] != tail[1] && tail[0] == tail[2] && tail[1] == tail[3]
    }

    /// Returns the recorded labels, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.history.iter().cloned().collect()
    }

    /// Forgets all recorded labels.
    pub fn reset(&mut self) {
        self.history.clear();
    }
}
