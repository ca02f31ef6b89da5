//! Per-output lifecycle.
//!
//! An output moves through [`OutputPhase::Discovered`] →
//! [`OutputPhase::Configured`] → [`OutputPhase::Active`] →
//! [`OutputPhase::Destroyed`]. Only active outputs have an [`OutputEntity`]
//! in the registry, and an entity owns the listeners that feed it frame and
//! destroy events: dropping the entity is what stops those events.

use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use serde::Deserialize;
use tracing::debug;

use crate::backend::{DestroyEvent, FrameEvent, Mode, NewOutput, Output, OutputId};
use crate::error::FrameError;
use crate::pipeline::FrameReport;
use crate::signal::Listener;
use crate::state::CompositorState;

/// How a mode is chosen from the list an output advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModePolicy {
    /// The last mode in backend order.
    #[default]
    Last,
    /// Highest pixel count, then highest refresh rate. Ties go to the later
    /// entry.
    Best,
}

impl ModePolicy {
    /// Picks a mode from `modes`, or `None` if the list is empty.
    pub fn select(self, modes: &[Mode]) -> Option<Mode> {
        match self {
            ModePolicy::Last => modes.last().copied(),
            ModePolicy::Best => modes
                .iter()
                .copied()
                .max_by_key(|mode| (mode.pixel_count(), mode.refresh_mhz)),
        }
    }
}

impl fmt::Display for ModePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModePolicy::Last => f.write_str("last"),
            ModePolicy::Best => f.write_str("best"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPhase {
    /// Announced by the backend, no mode applied yet.
    Discovered,
    /// Mode applied (or none advertised), not yet receiving frames.
    Configured,
    /// Registered and subscribed to frame and destroy events.
    Active,
    /// Torn down. Terminal.
    Destroyed,
}

impl OutputPhase {
    pub fn can_advance_to(self, next: OutputPhase) -> bool {
        use OutputPhase::*;
        matches!(
            (self, next),
            (Discovered, Configured) | (Configured, Active) | (Active, Destroyed)
        )
    }
}

impl fmt::Display for OutputPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputPhase::Discovered => "discovered",
            OutputPhase::Configured => "configured",
            OutputPhase::Active => "active",
            OutputPhase::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Frame counters for one output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub presented: u64,
    pub dropped: u64,
}

/// The frame and destroy subscriptions of one output.
#[derive(Debug)]
pub struct OutputListeners {
    pub frame: Listener<FrameEvent, CompositorState>,
    pub destroy: Listener<DestroyEvent, CompositorState>,
}

/// Compositor-side state for one active output.
///
/// The backend owns the output itself; the entity only shares its handle.
pub struct OutputEntity {
    output: Rc<dyn Output>,
    phase: OutputPhase,
    last_frame: Instant,
    listeners: Option<OutputListeners>,
    stats: FrameStats,
}

impl OutputEntity {
    /// Creates an entity for a configured output, taking ownership of its
    /// subscriptions.
    pub fn new(output: Rc<dyn Output>, listeners: OutputListeners) -> Self {
        Self {
            output,
            phase: OutputPhase::Configured,
            last_frame: Instant::now(),
            listeners: Some(listeners),
            stats: FrameStats::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn detached(output: Rc<dyn Output>) -> Self {
        Self {
            output,
            phase: OutputPhase::Configured,
            last_frame: Instant::now(),
            listeners: None,
            stats: FrameStats::default(),
        }
    }

    pub fn id(&self) -> OutputId {
        self.output.id()
    }

    pub fn name(&self) -> &str {
        self.output.name()
    }

    pub fn output(&self) -> &Rc<dyn Output> {
        &self.output
    }

    pub fn phase(&self) -> OutputPhase {
        self.phase
    }

    pub fn last_frame(&self) -> Instant {
        self.last_frame
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Whether both frame and destroy listeners are still registered.
    pub fn is_subscribed(&self) -> bool {
        self.listeners
            .as_ref()
            .is_some_and(|l| l.frame.is_subscribed() && l.destroy.is_subscribed())
    }

    /// Moves to `next` if the transition is legal. Returns whether it was.
    pub fn advance(&mut self, next: OutputPhase) -> bool {
        if !self.phase.can_advance_to(next) {
            return false;
        }
        debug!(output = %self.name(), from = %self.phase, to = %next, "Output phase change");
        self.phase = next;
        true
    }

    /// Records the outcome of one pipeline pass and stamps the frame time.
    ///
    /// The timestamp never moves backwards.
    pub fn record_frame(&mut self, outcome: &Result<FrameReport, FrameError>, now: Instant) {
        match outcome {
            Ok(_) => self.stats.presented += 1,
            Err(_) => self.stats.dropped += 1,
        }
        self.last_frame = self.last_frame.max(now);
    }

    /// Drops both subscriptions. No further events reach this entity.
    pub fn unsubscribe(&mut self) {
        self.listeners = None;
    }
}

impl fmt::Debug for OutputEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputEntity")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("phase", &self.phase)
            .field("stats", &self.stats)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

/// Reacts to output lifecycle events coming from a backend.
pub trait OutputHandler: Sized {
    /// A backend announced a new output.
    fn new_output(&mut self, new: &NewOutput<Self>);

    /// An active output is ready for a new frame.
    fn output_frame(&mut self, event: &FrameEvent);

    /// An output has gone away.
    fn output_destroyed(&mut self, event: &DestroyEvent);
}
