//! Gesture physics: turning swipe velocity into navigation commands.
//!
//! # Design
//!
//! - [`GestureConfig`] holds the tuning knobs (friction, threshold, momentum).
//! - [`GestureEngine`] is a three-state machine driven by the host UI:
//!   `start_gesture` on touch-down, `end_gesture` with the release velocity,
//!   then `update_physics` once per frame while momentum decays.
//! - The engine never calls the navigation controller itself. The host reads
//!   [`GestureEngine::navigation_command`] and hands it to
//!   `NavigationController::apply_command`.
//!
//! Velocity sign convention: positive is a forward swipe (redo), negative a
//! backward swipe (undo).

use crate::events::StateStream;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::watch;

pub const DEFAULT_FRICTION: f64 = 0.85;
pub const DEFAULT_THRESHOLD: f64 = 10.0;
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct GestureConfig {
    /// Fraction of velocity lost per second of momentum, in [0, 1]. Must be
    /// above 0 while momentum is enabled, or a release would never settle.
    pub friction: f64,
    /// Speed that separates a navigation swipe from a twitch. Must be > 0.
    pub threshold: f64,
    /// Keep moving after release when the swipe was fast enough.
    pub momentum_enabled: bool,
    /// Maximum retained navigation history entries.
    pub history_limit: usize,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            friction: DEFAULT_FRICTION,
            threshold: DEFAULT_THRESHOLD,
            momentum_enabled: true,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl GestureConfig {
    pub fn validate(&self) -> Result<()> {
        GesturePhysics::new(self.friction, self.threshold)?;
        if self.momentum_enabled && self.friction == 0.0 {
            return Err(Error::Validation(
                "friction must be above 0 when momentum is enabled".to_string(),
            ));
        }
        if self.history_limit == 0 {
            return Err(Error::Validation(
                "gesture history limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// State types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GesturePhysics {
    pub velocity: f64,
    pub acceleration: f64,
    pub friction: f64,
    pub threshold: f64,
}

impl GesturePhysics {
    pub fn new(friction: f64, threshold: f64) -> Result<Self> {
        let physics = Self {
            velocity: 0.0,
            acceleration: 0.0,
            friction,
            threshold,
        };
        physics.validate()?;
        Ok(physics)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.friction.is_finite() || !(0.0..=1.0).contains(&self.friction) {
            return Err(Error::Validation(format!(
                "friction must be within [0, 1], got {}",
                self.friction
            )));
        }
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(Error::Validation(format!(
                "threshold must be positive, got {}",
                self.threshold
            )));
        }
        if !self.velocity.is_finite() || !self.acceleration.is_finite() {
            return Err(Error::Validation("velocity must be finite".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GestureState {
    #[default]
    Idle,
    Active,
    Momentum,
}

impl GestureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Momentum => "momentum",
        }
    }
}

impl fmt::Display for GestureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationSource {
    Gesture,
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationDirection {
    Forward,
    Backward,
    None,
}

/// What the navigation controller should do in response to a gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationCommand {
    Undo,
    Redo,
    None,
}

impl From<NavigationDirection> for NavigationCommand {
    fn from(direction: NavigationDirection) -> Self {
        match direction {
            NavigationDirection::Forward => Self::Redo,
            NavigationDirection::Backward => Self::Undo,
            NavigationDirection::None => Self::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationEntry {
    pub variation_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: NavigationSource,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GestureMetrics {
    pub total_gestures: u64,
    pub completed_gestures: u64,
    pub total_navigations: u64,
    /// Running mean of |release velocity| over completed gestures
    pub average_velocity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_gesture_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureNavigationState {
    pub current_state: GestureState,
    pub physics: GesturePhysics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_variation_id: Option<String>,
    pub navigation_history: VecDeque<NavigationEntry>,
    pub metrics: GestureMetrics,
}

impl GestureNavigationState {
    fn new(physics: GesturePhysics) -> Self {
        Self {
            current_state: GestureState::Idle,
            physics,
            current_variation_id: None,
            navigation_history: VecDeque::new(),
            metrics: GestureMetrics::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Gesture state machine for one canvas view.
#[derive(Debug)]
pub struct GestureEngine {
    state: GestureNavigationState,
    config: GestureConfig,
    stream: StateStream<GestureNavigationState>,
}

impl GestureEngine {
    pub fn new(config: GestureConfig) -> Result<Self> {
        config.validate()?;
        let state = GestureNavigationState::new(GesturePhysics::new(
            config.friction,
            config.threshold,
        )?);
        Ok(Self {
            stream: StateStream::new(state.clone()),
            state,
            config,
        })
    }

    pub fn with_defaults() -> Self {
        let config = GestureConfig::default();
        let state = GestureNavigationState::new(GesturePhysics {
            velocity: 0.0,
            acceleration: 0.0,
            friction: config.friction,
            threshold: config.threshold,
        });
        Self {
            stream: StateStream::new(state.clone()),
            state,
            config,
        }
    }

    pub fn state(&self) -> &GestureNavigationState {
        &self.state
    }

    pub fn config(&self) -> &GestureConfig {
        &self.config
    }

    pub fn current_state(&self) -> GestureState {
        self.state.current_state
    }

    pub fn velocity(&self) -> f64 {
        self.state.physics.velocity
    }

    pub fn metrics(&self) -> &GestureMetrics {
        &self.state.metrics
    }

    pub fn subscribe(&self) -> watch::Receiver<GestureNavigationState> {
        self.stream.subscribe()
    }

    /// Touch-down. Legal only from Idle.
    pub fn start_gesture(&mut self) -> Result<()> {
        self.expect_state(GestureState::Idle, "start a gesture")?;

        self.state.metrics.total_gestures += 1;
        self.state.metrics.last_gesture_time = Some(Utc::now());
        self.state.physics.velocity = 0.0;
        self.state.physics.acceleration = 0.0;
        self.transition(GestureState::Active);
        self.publish();
        Ok(())
    }

    /// Release with `final_velocity`. Legal only from Active.
    ///
    /// Returns the state entered: Momentum when momentum is enabled and the
    /// release was faster than the threshold, Idle otherwise.
    pub fn end_gesture(&mut self, final_velocity: f64) -> Result<GestureState> {
        self.expect_state(GestureState::Active, "end a gesture")?;
        if !final_velocity.is_finite() {
            return Err(Error::Validation(format!(
                "release velocity must be finite, got {}",
                final_velocity
            )));
        }

        let metrics = &mut self.state.metrics;
        metrics.completed_gestures += 1;
        metrics.average_velocity +=
            (final_velocity.abs() - metrics.average_velocity) / metrics.completed_gestures as f64;

        let physics = &mut self.state.physics;
        physics.velocity = final_velocity;
        physics.acceleration = 0.0;

        let next = if self.config.momentum_enabled && final_velocity.abs() > physics.threshold {
            GestureState::Momentum
        } else {
            physics.velocity = 0.0;
            GestureState::Idle
        };
        self.transition(next);
        self.publish();
        Ok(next)
    }

    /// Advance momentum by `delta_time` seconds.
    ///
    /// Outside Momentum this does nothing. Returns whether momentum is still
    /// running, so the host knows to schedule another frame.
    pub fn update_physics(&mut self, delta_time: f64) -> Result<bool> {
        if !delta_time.is_finite() || delta_time < 0.0 {
            return Err(Error::Validation(format!(
                "delta time must be a non-negative number of seconds, got {}",
                delta_time
            )));
        }
        if self.state.current_state != GestureState::Momentum {
            return Ok(false);
        }

        let physics = &mut self.state.physics;
        let previous = physics.velocity;
        let decay = (physics.friction * delta_time).min(1.0);
        physics.velocity -= physics.velocity * decay;
        physics.acceleration = if delta_time > 0.0 {
            (physics.velocity - previous) / delta_time
        } else {
            0.0
        };
        tracing::trace!(velocity = physics.velocity, delta_time, "Momentum step");

        let settled = physics.velocity.abs() < physics.threshold;
        if settled {
            physics.velocity = 0.0;
            self.transition(GestureState::Idle);
        }
        self.publish();
        Ok(!settled)
    }

    /// Cut momentum short. A no-op when already Idle.
    pub fn stop_momentum(&mut self) -> Result<()> {
        match self.state.current_state {
            GestureState::Idle => Ok(()),
            GestureState::Active => Err(Error::transition(
                GestureState::Active,
                "stop momentum",
            )),
            GestureState::Momentum => {
                self.state.physics.velocity = 0.0;
                self.state.physics.acceleration = 0.0;
                self.transition(GestureState::Idle);
                self.publish();
                Ok(())
            }
        }
    }

    pub fn calculate_navigation_direction(&self) -> NavigationDirection {
        let physics = &self.state.physics;
        if physics.velocity > physics.threshold {
            NavigationDirection::Forward
        } else if physics.velocity < -physics.threshold {
            NavigationDirection::Backward
        } else {
            NavigationDirection::None
        }
    }

    pub fn should_trigger_navigation(&self) -> bool {
        self.state.physics.velocity.abs() > self.state.physics.threshold
    }

    pub fn navigation_command(&self) -> NavigationCommand {
        self.calculate_navigation_direction().into()
    }

    /// Record that the view now shows `variation_id`.
    ///
    /// Every call is appended to the history; only a change of variation
    /// counts as a navigation.
    pub fn navigate_to_variation(&mut self, variation_id: &str, source: NavigationSource) -> Result<()> {
        if variation_id.trim().is_empty() {
            return Err(Error::Validation("variation id must not be empty".to_string()));
        }

        self.state.navigation_history.push_back(NavigationEntry {
            variation_id: variation_id.to_string(),
            timestamp: Utc::now(),
            source,
        });
        while self.state.navigation_history.len() > self.config.history_limit {
            self.state.navigation_history.pop_front();
        }

        if self.state.current_variation_id.as_deref() != Some(variation_id) {
            self.state.metrics.total_navigations += 1;
            self.state.current_variation_id = Some(variation_id.to_string());
        }
        self.publish();
        Ok(())
    }

    /// Back to a fresh Idle state with empty history and metrics.
    pub fn reset(&mut self) {
        self.state = GestureNavigationState::new(GesturePhysics {
            velocity: 0.0,
            acceleration: 0.0,
            friction: self.config.friction,
            threshold: self.config.threshold,
        });
        self.publish();
    }

    fn expect_state(&self, expected: GestureState, action: &'static str) -> Result<()> {
        if self.state.current_state != expected {
            return Err(Error::transition(self.state.current_state, action));
        }
        Ok(())
    }

    fn transition(&mut self, next: GestureState) {
        tracing::debug!(
            from = %self.state.current_state,
            to = %next,
            velocity = self.state.physics.velocity,
            "Gesture transition"
        );
        self.state.current_state = next;
    }

    fn publish(&self) {
        self.stream.publish(self.state.clone());
    }
}
