//! Underrun monitoring
//!
//! Pure-logic state machine fed with the count of decoded samples handed to
//! the audio output. Detects streams that never start producing audio and
//! streams whose audio stops for too long. No I/O or audio hardware
//! dependency.

use std::time::{Duration, Instant};

use crate::config::timeouts::{NO_AUDIO_TIMEOUT_SECS, UNDERRUN_TIMEOUT_SECS};

/// Reason for monitor failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Playback started but no samples were ever produced
    NoAudioOutput,
    /// Samples stopped flowing for longer than the underrun timeout
    SustainedUnderrun,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::NoAudioOutput => write!(f, "no audio received from the stream"),
            FailureReason::SustainedUnderrun => write!(f, "audio stopped arriving from the stream"),
        }
    }
}

/// Monitor states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Waiting for the first decoded samples
    WaitingForAudio,
    /// Samples arriving
    Healthy,
    /// No new samples since the last update; may recover
    Starved,
    /// Terminal
    Failed(FailureReason),
}

/// Tracks the delivered-sample counter over time
pub struct UnderrunMonitor {
    state: HealthState,
    last_sample_count: u64,
    state_entered: Instant,
    no_audio_timeout: Duration,
    underrun_timeout: Duration,
}

impl Default for UnderrunMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl UnderrunMonitor {
    /// Create a monitor using the default timeouts
    pub fn new() -> Self {
        Self::with_timeouts(
            Duration::from_secs(NO_AUDIO_TIMEOUT_SECS),
            Duration::from_secs(UNDERRUN_TIMEOUT_SECS),
        )
    }

    pub fn with_timeouts(no_audio: Duration, underrun: Duration) -> Self {
        Self {
            state: HealthState::WaitingForAudio,
            last_sample_count: 0,
            state_entered: Instant::now(),
            no_audio_timeout: no_audio,
            underrun_timeout: underrun,
        }
    }

    /// Update with the current sample count. Returns Some(reason) on failure.
    pub fn update(&mut self, sample_count: u64) -> Option<FailureReason> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.state_entered);
        let samples_changed = sample_count > self.last_sample_count;
        if samples_changed {
            self.last_sample_count = sample_count;
        }

        match self.state {
            HealthState::WaitingForAudio => {
                if samples_changed {
                    self.transition(HealthState::Healthy, now);
                    None
                } else if elapsed >= self.no_audio_timeout {
                    self.fail(FailureReason::NoAudioOutput, now)
                } else {
                    None
                }
            }
            HealthState::Healthy => {
                if !samples_changed {
                    self.transition(HealthState::Starved, now);
                }
                None
            }
            HealthState::Starved => {
                if samples_changed {
                    self.transition(HealthState::Healthy, now);
                    None
                } else if elapsed >= self.underrun_timeout {
                    self.fail(FailureReason::SustainedUnderrun, now)
                } else {
                    None
                }
            }
            HealthState::Failed(_) => None,
        }
    }

    pub fn state(&self) -> &HealthState {
        &self.state
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, HealthState::Failed(_))
    }

    /// True while samples are not flowing
    pub fn is_starved(&self) -> bool {
        matches!(self.state, HealthState::Starved | HealthState::WaitingForAudio)
    }

    /// How long the current starvation has lasted
    pub fn starved_for(&self) -> Option<Duration> {
        match self.state {
            HealthState::Starved => Some(self.state_entered.elapsed()),
            _ => None,
        }
    }

    fn fail(&mut self, reason: FailureReason, now: Instant) -> Option<FailureReason> {
        self.transition(HealthState::Failed(reason), now);
        Some(reason)
    }

    fn transition(&mut self, new_state: HealthState, now: Instant) {
        self.state = new_state;
        self.state_entered = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn short_monitor() -> UnderrunMonitor {
        UnderrunMonitor::with_timeouts(Duration::from_millis(100), Duration::from_millis(100))
    }

    #[test]
    fn initial_state_is_waiting() {
        let monitor = UnderrunMonitor::new();
        assert_eq!(*monitor.state(), HealthState::WaitingForAudio);
        assert!(!monitor.is_failed());
        assert!(monitor.is_starved());
    }

    #[test]
    fn waiting_to_healthy_on_samples() {
        let mut monitor = short_monitor();
        assert!(monitor.update(100).is_none());
        assert_eq!(*monitor.state(), HealthState::Healthy);
        assert!(!monitor.is_starved());
    }

    #[test]
    fn waiting_stays_if_no_samples_and_no_timeout() {
        let mut monitor = short_monitor();
        assert!(monitor.update(0).is_none());
        assert_eq!(*monitor.state(), HealthState::WaitingForAudio);
    }

    #[test]
    fn waiting_to_failed_no_audio_on_timeout() {
        let mut monitor = short_monitor();
        thread::sleep(Duration::from_millis(150));
        assert_eq!(monitor.update(0), Some(FailureReason::NoAudioOutput));
        assert_eq!(
            *monitor.state(),
            HealthState::Failed(FailureReason::NoAudioOutput)
        );
        assert!(monitor.is_failed());
    }

    #[test]
    fn healthy_to_starved_when_samples_stop() {
        let mut monitor = short_monitor();
        monitor.update(100);
        assert!(monitor.update(100).is_none());
        assert_eq!(*monitor.state(), HealthState::Starved);
        assert!(monitor.starved_for().is_some());
    }

    #[test]
    fn starved_recovers_on_new_samples() {
        let mut monitor = short_monitor();
        monitor.update(100);
        monitor.update(100);
        assert!(monitor.update(200).is_none());
        assert_eq!(*monitor.state(), HealthState::Healthy);
        assert!(monitor.starved_for().is_none());
    }

    #[test]
    fn brief_starvation_is_tolerated() {
        let mut monitor = short_monitor();
        monitor.update(100);
        monitor.update(100);
        thread::sleep(Duration::from_millis(50));
        assert!(monitor.update(100).is_none());
        assert_eq!(*monitor.state(), HealthState::Starved);
    }

    #[test]
    fn sustained_underrun_fails() {
        let mut monitor = short_monitor();
        monitor.update(100);
        monitor.update(100);
        thread::sleep(Duration::from_millis(150));
        assert_eq!(monitor.update(100), Some(FailureReason::SustainedUnderrun));
        assert!(monitor.is_failed());
    }

    #[test]
    fn failed_is_terminal() {
        let mut monitor = short_monitor();
        thread::sleep(Duration::from_millis(150));
        monitor.update(0);
        assert!(monitor.update(1000).is_none());
        assert!(monitor.update(2000).is_none());
        assert_eq!(
            *monitor.state(),
            HealthState::Failed(FailureReason::NoAudioOutput)
        );
    }

    #[test]
    fn recovery_restarts_underrun_timer() {
        let mut monitor = short_monitor();
        monitor.update(100);
        monitor.update(100);
        thread::sleep(Duration::from_millis(80));
        monitor.update(200);
        monitor.update(200);
        thread::sleep(Duration::from_millis(50));
        // 130ms since the first starvation, only 50ms since the second
        assert!(monitor.update(200).is_none());
        assert!(!monitor.is_failed());
    }

    #[test]
    fn steady_flow_stays_healthy() {
        let mut monitor = short_monitor();
        for i in 1..=100u64 {
            assert!(monitor.update(i * 10).is_none());
            assert_eq!(*monitor.state(), HealthState::Healthy);
        }
    }

    #[test]
    fn zero_no_audio_timeout_fails_immediately() {
        let mut monitor = UnderrunMonitor::with_timeouts(Duration::ZERO, Duration::from_secs(5));
        assert_eq!(monitor.update(0), Some(FailureReason::NoAudioOutput));
    }

    #[test]
    fn failure_reason_display() {
        assert!(FailureReason::NoAudioOutput.to_string().contains("no audio"));
        assert!(FailureReason::SustainedUnderrun
            .to_string()
            .contains("stopped"));
    }
}
