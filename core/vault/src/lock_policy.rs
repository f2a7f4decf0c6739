//! Auto-lock and panic lock.

use std::time::{Duration, Instant};
use tracing::warn;

use crate::session::VaultSession;

/// Outcome of returning to the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDecision {
    RemainUnlocked,
    ForceLock,
}

/// Auto-lock rule.
pub struct LockPolicy;

impl LockPolicy {
    /// Decide whether a vault coming back to the foreground must lock.
    ///
    /// A fresh launch never forces a lock here since the session already
    /// starts Locked. Otherwise the vault locks once the time spent in the
    /// background reaches `timeout_ms`; a timeout of 0 locks on any
    /// backgrounding.
    pub fn evaluate(
        time_since_backgrounded: Duration,
        timeout_ms: u64,
        is_fresh_launch: bool,
    ) -> LockDecision {
        if is_fresh_launch {
            return LockDecision::RemainUnlocked;
        }

        if time_since_backgrounded >= Duration::from_millis(timeout_ms) {
            LockDecision::ForceLock
        } else {
            LockDecision::RemainUnlocked
        }
    }
}

/// Tracks whether any surface of the application is visible.
///
/// A surface restarted for a configuration change (rotation and the like)
/// stops and starts again immediately; that does not count as leaving the
/// foreground.
#[derive(Debug, Default)]
pub struct ForegroundTracker {
    visible: u32,
    changing_configuration: bool,
    backgrounded_at: Option<Instant>,
}

impl ForegroundTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A surface became visible.
    ///
    /// Returns a decision when this start brings the application back to
    /// the foreground, `None` otherwise.
    pub fn surface_started(&mut self, now: Instant, timeout_ms: u64) -> Option<LockDecision> {
        self.visible += 1;
        if self.visible != 1 || self.changing_configuration {
            return None;
        }

        let decision = match self.backgrounded_at {
            Some(at) => {
                LockPolicy::evaluate(now.saturating_duration_since(at), timeout_ms, false)
            }
            None => LockPolicy::evaluate(Duration::ZERO, timeout_ms, true),
        };
        Some(decision)
    }

    /// A surface stopped being visible.
    pub fn surface_stopped(&mut self, now: Instant, changing_configuration: bool) {
        self.changing_configuration = changing_configuration;
        self.visible = self.visible.saturating_sub(1);

        if self.visible == 0 && !changing_configuration {
            self.backgrounded_at = Some(now);
        }
    }

    pub fn is_foreground(&self) -> bool {
        self.visible > 0
    }
}

/// Accelerometer z reading below which the device counts as face down (m/s²).
pub const FACE_DOWN_THRESHOLD: f32 = -9.0;

/// Wipes the session when the device is turned face down.
///
/// Trips once per face-down event; the switch re-arms when the device is
/// face up again (z > 0).
#[derive(Debug)]
pub struct PanicSwitch {
    armed: bool,
}

impl PanicSwitch {
    pub fn new() -> Self {
        Self { armed: true }
    }

    /// Feed one accelerometer reading. Returns true if the session was wiped.
    pub fn on_reading(&mut self, z: f32, session: &VaultSession) -> bool {
        if z < FACE_DOWN_THRESHOLD && self.armed {
            self.armed = false;
            warn!("Panic switch tripped");
            session.wipe();
            true
        } else {
            if z > 0.0 {
                self.armed = true;
            }
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

impl Default for PanicSwitch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox_crypto::MasterKey;

    #[test]
    fn test_evaluate() {
        let secs = Duration::from_secs;

        assert_eq!(
            LockPolicy::evaluate(secs(100), 5_000, true),
            LockDecision::RemainUnlocked
        );
        assert_eq!(
            LockPolicy::evaluate(secs(1), 5_000, false),
            LockDecision::RemainUnlocked
        );
        assert_eq!(
            LockPolicy::evaluate(secs(5), 5_000, false),
            LockDecision::ForceLock
        );
        assert_eq!(
            LockPolicy::evaluate(Duration::ZERO, 0, false),
            LockDecision::ForceLock
        );
    }

    #[test]
    fn test_tracker_fresh_launch() {
        let mut tracker = ForegroundTracker::new();
        let now = Instant::now();

        assert_eq!(
            tracker.surface_started(now, 0),
            Some(LockDecision::RemainUnlocked)
        );
        assert!(tracker.is_foreground());
        assert_eq!(tracker.surface_started(now, 0), None);
    }

    #[test]
    fn test_tracker_background_then_return() {
        let mut tracker = ForegroundTracker::new();
        let t0 = Instant::now();

        tracker.surface_started(t0, 30_000);
        tracker.surface_stopped(t0, false);
        assert!(!tracker.is_foreground());

        let soon = t0 + Duration::from_secs(10);
        assert_eq!(
            tracker.surface_started(soon, 30_000),
            Some(LockDecision::RemainUnlocked)
        );

        tracker.surface_stopped(soon, false);
        let later = soon + Duration::from_secs(31);
        assert_eq!(
            tracker.surface_started(later, 30_000),
            Some(LockDecision::ForceLock)
        );
    }

    #[test]
    fn test_tracker_ignores_configuration_change() {
        let mut tracker = ForegroundTracker::new();
        let t0 = Instant::now();

        tracker.surface_started(t0, 0);
        tracker.surface_stopped(t0, true);
        assert_eq!(tracker.surface_started(t0 + Duration::from_secs(60), 0), None);
    }

    #[test]
    fn test_panic_switch() {
        let session = VaultSession::new();
        session.install(MasterKey::generate());
        let mut switch = PanicSwitch::new();

        assert!(!switch.on_reading(9.8, &session));
        assert!(session.is_unlocked());

        assert!(switch.on_reading(-9.6, &session));
        assert!(!session.is_unlocked());
        assert!(!switch.is_armed());

        session.install(MasterKey::generate());
        assert!(!switch.on_reading(-9.7, &session));
        assert!(session.is_unlocked());

        assert!(!switch.on_reading(-3.0, &session));
        assert!(!switch.is_armed());
        assert!(!switch.on_reading(0.5, &session));
        assert!(switch.is_armed());
        assert!(switch.on_reading(-9.9, &session));
        assert!(!session.is_unlocked());
    }
}
