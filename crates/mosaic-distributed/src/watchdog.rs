//! Liveness supervision.
//!
//! The watchdog detects a hung process (stalled communication, crashed
//! peer) and terminates it. It runs on one long-lived background task for
//! the process's entire lifetime, independent of the tick loop. If no
//! `reset()` arrives within the armed timeout, the expiry is fatal — a
//! liveness failure, not a recoverable error.

use crate::types::LivenessTimeout;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error};

/// Timeouts for the two phases of a run: a short one while setup and the
/// first ticks establish latency, a longer one for steady state.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub startup_timeout: Duration,
    pub steady_timeout: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(30),
            steady_timeout: Duration::from_secs(120),
        }
    }
}

enum Command {
    Start(Duration),
    Reset,
    Stop,
}

/// Handle to the background liveness timer.
///
/// `start(timeout)` arms the countdown, `reset()` restarts it without
/// disarming, `stop()` disarms. Re-arming with a new timeout mid-run is
/// supported: call `start` again. On expiry the watchdog logs a
/// [`LivenessTimeout`] and runs its termination hook — by default
/// `std::process::exit(1)`.
#[derive(Clone)]
pub struct Watchdog {
    cmd: UnboundedSender<Command>,
}

impl Watchdog {
    /// Spawn the watchdog task with the default process-exit hook.
    pub fn spawn() -> Self {
        Self::with_hook(Box::new(|| std::process::exit(1)))
    }

    /// Spawn with a custom termination hook. Tests inject a channel-writing
    /// hook here so expiry is observable without killing the harness.
    pub fn with_hook(hook: Box<dyn FnOnce() + Send>) -> Self {
        let (cmd, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, hook));
        Self { cmd }
    }

    /// Arm the timer; expiry after `timeout` unless reset or stopped.
    pub fn start(&self, timeout: Duration) {
        let _ = self.cmd.send(Command::Start(timeout));
    }

    /// Restart the countdown with the currently armed timeout.
    pub fn reset(&self) {
        let _ = self.cmd.send(Command::Reset);
    }

    /// Disarm without tearing the task down; `start` re-arms.
    pub fn stop(&self) {
        let _ = self.cmd.send(Command::Stop);
    }
}

async fn run(mut rx: UnboundedReceiver<Command>, hook: Box<dyn FnOnce() + Send>) {
    // (deadline, armed timeout); None while disarmed.
    let mut armed: Option<(Instant, Duration)> = None;
    loop {
        match armed {
            None => match rx.recv().await {
                Some(Command::Start(timeout)) => {
                    debug!(timeout_ms = timeout.as_millis() as u64, "watchdog armed");
                    armed = Some((Instant::now() + timeout, timeout));
                }
                Some(Command::Reset) | Some(Command::Stop) => {}
                None => return,
            },
            Some((deadline, timeout)) => {
                tokio::select! {
                    cmd = rx.recv() => match cmd {
                        Some(Command::Start(new_timeout)) => {
                            debug!(timeout_ms = new_timeout.as_millis() as u64, "watchdog re-armed");
                            armed = Some((Instant::now() + new_timeout, new_timeout));
                        }
                        Some(Command::Reset) => {
                            armed = Some((Instant::now() + timeout, timeout));
                        }
                        Some(Command::Stop) => {
                            debug!("watchdog disarmed");
                            armed = None;
                        }
                        None => return,
                    },
                    _ = sleep_until(deadline) => {
                        if Instant::now() < deadline {
                            // Spurious wake: keep waiting on the same deadline.
                            continue;
                        }
                        let failure = LivenessTimeout {
                            timeout_ms: timeout.as_millis() as u64,
                        };
                        error!("{}", failure);
                        hook();
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::oneshot;
    use tokio::time::{sleep, timeout};

    fn observed_watchdog() -> (Watchdog, oneshot::Receiver<Instant>) {
        let (tx, rx) = oneshot::channel();
        let watchdog = Watchdog::with_hook(Box::new(move || {
            let _ = tx.send(Instant::now());
        }));
        (watchdog, rx)
    }

    #[tokio::test]
    async fn test_expires_without_reset() {
        let (watchdog, fired) = observed_watchdog();
        let armed_at = Instant::now();
        watchdog.start(Duration::from_millis(100));

        let fired_at = timeout(Duration::from_millis(500), fired)
            .await
            .expect("watchdog should have fired")
            .unwrap();
        let elapsed = fired_at - armed_at;
        assert!(elapsed >= Duration::from_millis(100), "fired early: {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(300), "fired late: {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_reset_defers_expiry() {
        let (watchdog, mut fired) = observed_watchdog();
        watchdog.start(Duration::from_millis(100));

        // Reset every 50ms for ~1s, then stop; it must never fire.
        for _ in 0..20 {
            sleep(Duration::from_millis(50)).await;
            watchdog.reset();
            assert!(fired.try_recv().is_err(), "watchdog fired despite resets");
        }
        watchdog.stop();
        sleep(Duration::from_millis(250)).await;
        assert!(fired.try_recv().is_err(), "watchdog fired after stop");
    }

    #[tokio::test]
    async fn test_stop_disarms() {
        let (watchdog, mut fired) = observed_watchdog();
        watchdog.start(Duration::from_millis(50));
        watchdog.stop();
        sleep(Duration::from_millis(200)).await;
        assert!(fired.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rearm_with_new_timeout() {
        let (watchdog, fired) = observed_watchdog();
        // Short startup timeout followed by a longer steady-state one.
        watchdog.start(Duration::from_millis(50));
        sleep(Duration::from_millis(20)).await;
        let rearmed_at = Instant::now();
        watchdog.start(Duration::from_millis(200));

        let fired_at = timeout(Duration::from_millis(800), fired)
            .await
            .expect("watchdog should fire on the new timeout")
            .unwrap();
        let elapsed = fired_at - rearmed_at;
        assert!(elapsed >= Duration::from_millis(200), "old timeout used: {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_reset_while_disarmed_is_noop() {
        let flag = Arc::new(AtomicBool::new(false));
        let flag2 = flag.clone();
        let watchdog = Watchdog::with_hook(Box::new(move || {
            flag2.store(true, Ordering::SeqCst);
        }));
        watchdog.reset();
        watchdog.stop();
        sleep(Duration::from_millis(100)).await;
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_config_default() {
        let config = WatchdogConfig::default();
        assert_eq!(config.startup_timeout, Duration::from_secs(30));
        assert_eq!(config.steady_timeout, Duration::from_secs(120));
    }
}
