//! Viewport fetch coordination.
//!
//! Serializes rapid interactive requests: every user change bumps a version,
//! at most one fetch runs at a time, and completions that are behind the
//! latest user intent are discarded rather than displayed. The state machine
//! here is pure; the engine crate drives it from its worker thread and owns
//! all timing (throttle and debounce).

use crate::payload::DiscardReason;
use crate::viewport::{AxisSpan, Viewport};

/// Fetch phase for one engine handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    /// Nothing in flight.
    Idle,
    /// One fetch in flight matching the latest user intent.
    Fetching,
    /// One fetch in flight, already superseded by newer user intent.
    Stale,
}

/// What the driver must do after feeding an event into the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorAction {
    /// Start a fetch for this viewport.
    Spawn(Viewport),
    /// Deliver the completed fetch for this viewport.
    Deliver(Viewport),
    /// Signal that a version was dropped without delivery.
    Discard {
        version: u64,
        epoch: u64,
        reason: DiscardReason,
    },
}

/// Tracks the three viewport variables: latest user intent, the in-flight
/// request, and what is currently displayed.
#[derive(Debug)]
pub struct Coordinator {
    phase: FetchPhase,
    user: Option<Viewport>,
    requested: Option<Viewport>,
    displayed: Option<Viewport>,
    version: u64,
    epoch: u64,
    /// Highest version already delivered or discarded. Every version up to
    /// here has resolved exactly once.
    resolved: u64,
}

impl Coordinator {
    pub fn new() -> Self {
        Self {
            phase: FetchPhase::Idle,
            user: None,
            requested: None,
            displayed: None,
            version: 0,
            epoch: 0,
            resolved: 0,
        }
    }

    pub fn phase(&self) -> FetchPhase {
        self.phase
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn displayed(&self) -> Option<&Viewport> {
        self.displayed.as_ref()
    }

    /// The span of the most recent user intent, if any.
    pub fn user_span(&self) -> Option<AxisSpan> {
        self.user.as_ref().map(|v| v.span.clone())
    }

    /// Record a user viewport change.
    ///
    /// Consecutive identical bounds deduplicate to the same version unless
    /// `force` is set (tail extension and post-rebuild refreshes must refetch
    /// even when the bounds did not move).
    pub fn user_change(&mut self, span: AxisSpan, force: bool) -> (Viewport, Vec<CoordinatorAction>) {
        if !force {
            if let Some(user) = &self.user {
                if user.span == span && user.epoch == self.epoch {
                    return (user.clone(), Vec::new());
                }
            }
        }

        self.version += 1;
        let viewport = Viewport {
            span,
            version: self.version,
            epoch: self.epoch,
        };
        self.user = Some(viewport.clone());

        let actions = match self.phase {
            FetchPhase::Idle => {
                self.phase = FetchPhase::Fetching;
                self.requested = Some(viewport.clone());
                vec![CoordinatorAction::Spawn(viewport.clone())]
            }
            FetchPhase::Fetching => {
                // The in-flight fetch is now stale; it resolves at completion.
                self.phase = FetchPhase::Stale;
                Vec::new()
            }
            FetchPhase::Stale => Vec::new(),
        };

        (viewport, actions)
    }

    /// Record completion of the in-flight fetch. `failure` carries the
    /// discard reason when the fetch did not produce a usable result.
    pub fn fetch_done(
        &mut self,
        done: &Viewport,
        failure: Option<DiscardReason>,
    ) -> Vec<CoordinatorAction> {
        // Results never cross an epoch boundary.
        if done.epoch != self.epoch {
            return vec![CoordinatorAction::Discard {
                version: done.version,
                epoch: done.epoch,
                reason: DiscardReason::EpochChanged,
            }];
        }

        let mut actions = Vec::new();

        // Versions that were requested but never fetched are coalesced with
        // this completion.
        for skipped in (self.resolved + 1)..done.version {
            actions.push(CoordinatorAction::Discard {
                version: skipped,
                epoch: self.epoch,
                reason: DiscardReason::Superseded,
            });
        }
        self.resolved = self.resolved.max(done.version);

        let Some(user) = self.user.clone() else {
            self.phase = FetchPhase::Idle;
            self.requested = None;
            actions.push(CoordinatorAction::Discard {
                version: done.version,
                epoch: done.epoch,
                reason: failure.unwrap_or(DiscardReason::Superseded),
            });
            return actions;
        };

        if let Some(reason) = failure {
            actions.push(CoordinatorAction::Discard {
                version: done.version,
                epoch: done.epoch,
                reason,
            });
        } else if done.version == user.version {
            self.displayed = Some(done.clone());
            self.phase = FetchPhase::Idle;
            self.requested = None;
            actions.push(CoordinatorAction::Deliver(done.clone()));
            return actions;
        } else {
            actions.push(CoordinatorAction::Discard {
                version: done.version,
                epoch: done.epoch,
                reason: DiscardReason::Superseded,
            });
        }

        if user.version > done.version {
            self.phase = FetchPhase::Fetching;
            self.requested = Some(user.clone());
            actions.push(CoordinatorAction::Spawn(user));
        } else {
            self.phase = FetchPhase::Idle;
            self.requested = None;
        }

        actions
    }

    /// Invalidate everything: reopen, truncation, or schema change.
    /// In-flight results from prior epochs are discarded at completion.
    pub fn epoch_change(&mut self) -> u64 {
        self.epoch += 1;
        self.phase = FetchPhase::Idle;
        self.requested = None;
        self.displayed = None;
        self.user = None;
        // Outstanding versions die with the epoch.
        self.resolved = self.version;
        self.epoch
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}
