//! Run stages and the tracker that enforces their order.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Stage of one training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Stage {
    #[default]
    Idle,
    DataLoaded,
    FeaturesEngineered,
    Split,
    Scaled,
    BaselineFit,
    Tuned,
    Evaluated,
    Registered,
    Persisted,
    Done,
    Failed,
}

impl Stage {
    /// Stages of a successful run, in order.
    pub const fn sequence(persist_before_register: bool) -> [Self; 11] {
        let (first, second) = if persist_before_register {
            (Self::Persisted, Self::Registered)
        } else {
            (Self::Registered, Self::Persisted)
        };
        [
            Self::Idle,
            Self::DataLoaded,
            Self::FeaturesEngineered,
            Self::Split,
            Self::Scaled,
            Self::BaselineFit,
            Self::Tuned,
            Self::Evaluated,
            first,
            second,
            Self::Done,
        ]
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid stage transition {from} -> {to}")]
pub struct TransitionError {
    pub from: Stage,
    pub to: Stage,
}

/// Time spent reaching a stage from the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub elapsed_ms: u64,
}

/// Walks a run through its stage sequence.
#[derive(Debug, Clone)]
pub struct StageTracker {
    order: [Stage; 11],
    position: usize,
    failed: bool,
    mark: Instant,
    timings: Vec<StageTiming>,
}

impl StageTracker {
    pub fn new(persist_before_register: bool) -> Self {
        Self {
            order: Stage::sequence(persist_before_register),
            position: 0,
            failed: false,
            mark: Instant::now(),
            timings: Vec::with_capacity(11),
        }
    }

    pub fn current(&self) -> Stage {
        if self.failed {
            Stage::Failed
        } else {
            self.order[self.position]
        }
    }

    /// The stage a successful step would reach next.
    pub fn next(&self) -> Option<Stage> {
        if self.failed {
            return None;
        }
        self.order.get(self.position + 1).copied()
    }

    /// Move to `to`, which must be the next stage in the sequence.
    pub fn advance(&mut self, to: Stage) -> Result<(), TransitionError> {
        if self.next() != Some(to) {
            return Err(TransitionError {
                from: self.current(),
                to,
            });
        }
        let elapsed = self.mark.elapsed();
        self.mark = Instant::now();
        self.position += 1;
        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = elapsed.as_millis() as u64;
        self.timings.push(StageTiming {
            stage: to,
            elapsed_ms,
        });
        info!(stage = %to, elapsed_ms, "Stage complete");
        Ok(())
    }

    /// Abort the run. Terminal stages are left alone.
    pub fn fail(&mut self, attempted: Stage) {
        if self.current().is_terminal() {
            return;
        }
        warn!(from = %self.current(), attempted = %attempted, "Run failed");
        self.failed = true;
    }

    pub fn timings(&self) -> &[StageTiming] {
        &self.timings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_variant_name() {
        assert_eq!(Stage::FeaturesEngineered.to_string(), "FeaturesEngineered");
        assert_eq!(Stage::Tuned.to_string(), "Tuned");
    }

    #[test]
    fn default_order_registers_before_persisting() {
        let seq = Stage::sequence(false);
        assert_eq!(seq[8], Stage::Registered);
        assert_eq!(seq[9], Stage::Persisted);
        let swapped = Stage::sequence(true);
        assert_eq!(swapped[8], Stage::Persisted);
        assert_eq!(swapped[9], Stage::Registered);
    }

    #[test]
    fn full_run_reaches_done() {
        let mut tracker = StageTracker::new(false);
        for stage in &Stage::sequence(false)[1..] {
            tracker.advance(*stage).unwrap();
        }
        assert_eq!(tracker.current(), Stage::Done);
        assert_eq!(tracker.timings().len(), 10);
        assert_eq!(tracker.next(), None);
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        let mut tracker = StageTracker::new(false);
        tracker.advance(Stage::DataLoaded).unwrap();
        let err = tracker.advance(Stage::Split).unwrap_err();
        assert_eq!(
            err,
            TransitionError {
                from: Stage::DataLoaded,
                to: Stage::Split
            }
        );
    }

    #[test]
    fn failure_is_terminal() {
        let mut tracker = StageTracker::new(true);
        tracker.advance(Stage::DataLoaded).unwrap();
        tracker.fail(Stage::FeaturesEngineered);
        assert_eq!(tracker.current(), Stage::Failed);
        assert!(tracker.advance(Stage::FeaturesEngineered).is_err());
    }
}
