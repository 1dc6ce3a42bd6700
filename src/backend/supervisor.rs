//! Bounded restarts for a dying backend, with a silent fallback.

use super::{AudioBackend, NullBackend};
use crate::{Result, SoundDriver};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessitura_core::FailureCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Running,
    /// Dead; another restart attempt is due after the cooldown.
    Restarting,
    /// Restarts were exhausted; the silent backend is running instead.
    Fallback,
}

/// Owns the active backend and keeps it alive.
///
/// Call [`check`](Self::check) periodically from the control thread. When
/// the backend dies it reports [`FailureCode::BackendDied`], retries up to
/// `backend_restart_attempts` times spaced by `backend_restart_cooldown`,
/// reporting [`FailureCode::ClockRestarted`] on success, and finally
/// [`FailureCode::ClockRestartFailed`] before switching to [`NullBackend`].
pub struct BackendSupervisor {
    driver: Arc<SoundDriver>,
    backend: Box<dyn AudioBackend>,
    attempts: u32,
    cooldown: Duration,
    failed: u32,
    dead: bool,
    next_attempt: Instant,
    fallen_back: bool,
}

impl BackendSupervisor {
    /// Start `backend`. If it will not start at all, the silent backend
    /// takes over straight away.
    pub fn start(driver: Arc<SoundDriver>, mut backend: Box<dyn AudioBackend>) -> Result<Self> {
        let mut fallen_back = false;
        if let Err(e) = backend.start(Arc::clone(&driver)) {
            tracing::warn!(
                "{} backend failed to start ({}), running silently",
                backend.name(),
                e
            );
            backend = Box::new(NullBackend::new());
            backend.start(Arc::clone(&driver))?;
            fallen_back = true;
        }

        let config = driver.config();
        Ok(Self {
            attempts: config.backend_restart_attempts,
            cooldown: config.backend_restart_cooldown,
            driver,
            backend,
            failed: 0,
            dead: false,
            next_attempt: Instant::now(),
            fallen_back,
        })
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn is_fallback(&self) -> bool {
        self.fallen_back
    }

    /// Look at the backend and act on its death.
    pub fn check(&mut self) -> BackendStatus {
        if self.backend.is_alive() {
            return self.live_status();
        }

        let now = Instant::now();
        if !self.dead {
            self.dead = true;
            self.failed = 0;
            self.next_attempt = now + self.cooldown;
            self.backend.stop();
            tracing::warn!("{} audio backend died", self.backend.name());
            self.driver.report_failure(FailureCode::BackendDied);
            if self.attempts == 0 {
                self.fall_back();
                return self.live_status();
            }
            return BackendStatus::Restarting;
        }
        if now < self.next_attempt {
            return BackendStatus::Restarting;
        }

        match self.backend.start(Arc::clone(&self.driver)) {
            Ok(()) => {
                tracing::info!("{} audio backend restarted", self.backend.name());
                self.driver.report_failure(FailureCode::ClockRestarted);
                self.dead = false;
                self.live_status()
            }
            Err(e) => {
                self.failed += 1;
                tracing::warn!(
                    "Restarting {} audio backend failed ({}/{}): {}",
                    self.backend.name(),
                    self.failed,
                    self.attempts,
                    e
                );
                if self.failed >= self.attempts {
                    self.fall_back();
                    return self.live_status();
                }
                self.next_attempt = now + self.cooldown;
                BackendStatus::Restarting
            }
        }
    }

    fn live_status(&self) -> BackendStatus {
        if self.fallen_back {
            BackendStatus::Fallback
        } else {
            BackendStatus::Running
        }
    }

    fn fall_back(&mut self) {
        self.driver.report_failure(FailureCode::ClockRestartFailed);
        self.backend.stop();
        let mut null = NullBackend::new();
        if let Err(e) = null.start(Arc::clone(&self.driver)) {
            tracing::warn!("Silent backend failed to start: {}", e);
        }
        tracing::warn!(
            "Giving up on the {} audio backend, running silently",
            self.backend.name()
        );
        self.backend = Box::new(null);
        self.fallen_back = true;
        self.dead = false;
    }

    /// Stop the backend for good.
    pub fn stop(&mut self) {
        self.backend.stop();
    }
}

impl Drop for BackendSupervisor {
    fn drop(&mut self) {
        self.backend.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tessitura_core::EngineConfig;

    /// Fails to start `failures` times, then starts; dies on demand.
    struct FlakyBackend {
        failures: Arc<AtomicU32>,
        alive: Arc<AtomicBool>,
    }

    impl AudioBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }

        fn start(&mut self, _driver: Arc<SoundDriver>) -> Result<()> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Backend("device gone".into()));
            }
            self.alive.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) {
            self.alive.store(false, Ordering::SeqCst);
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    fn driver(attempts: u32) -> Arc<SoundDriver> {
        SoundDriver::builder()
            .config(
                EngineConfig::default()
                    .instruments(1, 0)
                    .busses(0)
                    .backend_restarts(attempts, Duration::ZERO),
            )
            .manual()
            .build()
            .unwrap()
    }

    fn flaky(failures: u32) -> (Box<FlakyBackend>, Arc<AtomicU32>, Arc<AtomicBool>) {
        let failures = Arc::new(AtomicU32::new(failures));
        let alive = Arc::new(AtomicBool::new(false));
        let backend = Box::new(FlakyBackend {
            failures: Arc::clone(&failures),
            alive: Arc::clone(&alive),
        });
        (backend, failures, alive)
    }

    #[test]
    fn test_restart_after_death() {
        let driver = driver(3);
        let (backend, failures, alive) = flaky(0);
        let mut supervisor = BackendSupervisor::start(Arc::clone(&driver), backend).unwrap();
        assert_eq!(supervisor.check(), BackendStatus::Running);

        failures.store(1, Ordering::SeqCst);
        alive.store(false, Ordering::SeqCst);
        assert_eq!(supervisor.check(), BackendStatus::Restarting);
        assert_eq!(supervisor.check(), BackendStatus::Restarting);
        assert_eq!(supervisor.check(), BackendStatus::Running);
        assert_eq!(supervisor.backend_name(), "flaky");

        assert_eq!(
            driver.take_failures(),
            vec![FailureCode::BackendDied, FailureCode::ClockRestarted]
        );
    }

    #[test]
    fn test_falls_back_after_exhausting_attempts() {
        let driver = driver(2);
        let (backend, failures, alive) = flaky(0);
        let mut supervisor = BackendSupervisor::start(Arc::clone(&driver), backend).unwrap();

        failures.store(10, Ordering::SeqCst);
        alive.store(false, Ordering::SeqCst);
        assert_eq!(supervisor.check(), BackendStatus::Restarting);
        assert_eq!(supervisor.check(), BackendStatus::Restarting);
        assert_eq!(supervisor.check(), BackendStatus::Fallback);
        assert!(supervisor.is_fallback());
        assert_eq!(supervisor.backend_name(), "null");
        assert_eq!(supervisor.check(), BackendStatus::Fallback);

        supervisor.stop();
        let failures = driver.take_failures();
        assert_eq!(
            &failures[..2],
            &[FailureCode::BackendDied, FailureCode::ClockRestartFailed]
        );
    }

    #[test]
    fn test_unstartable_backend_runs_silently() {
        let driver = driver(2);
        let (backend, _, _) = flaky(1);
        let supervisor = BackendSupervisor::start(driver, backend).unwrap();
        assert!(supervisor.is_fallback());
        assert_eq!(supervisor.backend_name(), "null");
    }
}
