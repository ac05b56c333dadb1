//! InjectionQueue: a strictly FIFO, single-consumer bridge between fast
//! network receipt and slow, fallible local text injection.
//!
//! Network threads call [`InjectionQueue::submit`], which never blocks. One
//! consumer thread pops jobs in submission order and, for each job, makes up
//! to `max_retries` attempts to activate the target and type the payload,
//! sleeping `retry_delay` between failed attempts. Every job ends with exactly
//! one [`NodeEvent::InjectionOutcome`].
//!
//! A slow job holds up every job behind it. The target is the single shared
//! UI focus, and two concurrent injections would interleave keystrokes.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::events::{emit, EventSender, InjectionOutcome, NodeEvent};

/// Error type for input injection operations.
#[derive(Debug, Error)]
pub enum InjectionError {
    #[error("target could not be activated: {0}")]
    Activation(String),
    #[error("typing failed: {0}")]
    Typing(String),
    #[error("platform error: {0}")]
    Platform(String),
    #[error("failed to spawn injection thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Opaque handle to a top-level window, as produced by a window enumerator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowHandle {
    pub id: u64,
    pub title: String,
}

impl WindowHandle {
    pub fn new(id: u64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
        }
    }
}

/// Opaque handle to a control inside a window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ControlHandle {
    pub id: u64,
    pub label: String,
}

/// Where injected text goes: a window, optionally narrowed to one control.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetHandle {
    pub window: WindowHandle,
    pub control: Option<ControlHandle>,
}

impl TargetHandle {
    /// Targets the window's own focus.
    pub fn window(window: WindowHandle) -> Self {
        Self {
            window,
            control: None,
        }
    }
}

/// Platform seam for activating a target and emitting keystrokes.
///
/// Implementations may fail transiently (the window is not focusable yet);
/// the queue retries.
pub trait InputInjector: Send + Sync {
    /// Brings the target to the foreground and gives it keyboard focus.
    fn activate(&self, target: &TargetHandle) -> Result<(), InjectionError>;

    /// Types `text` into the focused target.
    fn type_text(&self, target: &TargetHandle, text: &str) -> Result<(), InjectionError>;

    /// One injection attempt: activate, let the focus settle, type.
    fn activate_and_type(
        &self,
        target: &TargetHandle,
        text: &str,
        settle: Duration,
    ) -> Result<(), InjectionError> {
        self.activate(target)?;
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }
        self.type_text(target, text)
    }
}

/// Retry and pacing parameters for the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// How long the consumer waits for a job before re-checking shutdown.
    pub idle_poll: Duration,
    /// Pause between activation and typing within one attempt.
    pub activation_settle: Duration,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            idle_poll: Duration::from_millis(100),
            activation_settle: Duration::from_millis(100),
        }
    }
}

/// One queued piece of text bound for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionJob {
    pub id: Uuid,
    pub target: TargetHandle,
    pub payload: String,
    pub attempts_made: u32,
}

/// Producer handle to the injection consumer. Cheap to clone.
#[derive(Debug, Clone)]
pub struct InjectionQueue {
    tx: mpsc::Sender<InjectionJob>,
}

impl InjectionQueue {
    /// Spawns the consumer thread and returns the producer handle.
    ///
    /// The consumer exits once `running` is cleared (after finishing the job
    /// in hand) or once every producer handle has been dropped.
    ///
    /// # Errors
    ///
    /// Returns [`InjectionError::Spawn`] if the thread cannot be created.
    pub fn start(
        injector: Arc<dyn InputInjector>,
        config: InjectionConfig,
        events: EventSender,
        running: Arc<AtomicBool>,
    ) -> Result<(Self, JoinHandle<()>), InjectionError> {
        let (tx, rx) = mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("lanrelay-inject".to_string())
            .spawn(move || consumer_loop(rx, injector.as_ref(), &config, &events, &running))
            .map_err(InjectionError::Spawn)?;

        Ok((Self { tx }, handle))
    }

    /// Enqueues `payload` for `target` and returns the job id.
    ///
    /// Never blocks. If the consumer has already stopped the job is dropped
    /// with a warning; this only happens during shutdown.
    pub fn submit(&self, target: TargetHandle, payload: impl Into<String>) -> Uuid {
        let job = InjectionJob {
            id: Uuid::new_v4(),
            target,
            payload: payload.into(),
            attempts_made: 0,
        };
        let id = job.id;
        if self.tx.send(job).is_err() {
            warn!("injection consumer stopped; job {id} dropped");
        }
        id
    }
}

fn consumer_loop(
    rx: mpsc::Receiver<InjectionJob>,
    injector: &dyn InputInjector,
    config: &InjectionConfig,
    events: &EventSender,
    running: &AtomicBool,
) {
    info!("injection consumer started");

    while running.load(Ordering::Relaxed) {
        let job = match rx.recv_timeout(config.idle_poll) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let outcome = run_job(injector, job, config, running);
        if outcome.success {
            debug!("job {} injected after {} attempt(s)", outcome.job_id, outcome.attempts);
        } else {
            warn!(
                "job {} failed after {} attempt(s): {}",
                outcome.job_id,
                outcome.attempts,
                outcome.last_error.as_deref().unwrap_or("unknown error")
            );
        }
        emit(events, NodeEvent::InjectionOutcome(outcome));
    }

    info!("injection consumer stopped");
}

/// Runs every attempt for one job and returns its terminal outcome.
fn run_job(
    injector: &dyn InputInjector,
    mut job: InjectionJob,
    config: &InjectionConfig,
    running: &AtomicBool,
) -> InjectionOutcome {
    let max_attempts = config.max_retries.max(1);
    let mut last_error = None;

    while job.attempts_made < max_attempts {
        job.attempts_made += 1;

        let attempt = catch_unwind(AssertUnwindSafe(|| {
            injector.activate_and_type(&job.target, &job.payload, config.activation_settle)
        }));

        match attempt {
            Ok(Ok(())) => {
                return InjectionOutcome {
                    job_id: job.id,
                    success: true,
                    attempts: job.attempts_made,
                    last_error: None,
                };
            }
            Ok(Err(e)) => {
                debug!("job {} attempt {} failed: {e}", job.id, job.attempts_made);
                last_error = Some(e.to_string());
            }
            Err(_) => {
                error!("injector panicked on job {} attempt {}", job.id, job.attempts_made);
                last_error = Some("injector panicked".to_string());
            }
        }

        if job.attempts_made < max_attempts {
            if !running.load(Ordering::Relaxed) {
                last_error = Some("shutdown before retry".to_string());
                break;
            }
            std::thread::sleep(config.retry_delay);
        }
    }

    InjectionOutcome {
        job_id: job.id,
        success: false,
        attempts: job.attempts_made,
        last_error,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::{event_channel, EventReceiver};
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use std::time::Instant;

    // ── Scripted injector ─────────────────────────────────────────────────────

    /// Fails the first `fail_times` attempts, then succeeds. Records attempts.
    #[derive(Default)]
    struct ScriptedInjector {
        fail_times: u32,
        attempts: AtomicU32,
        typed: Mutex<Vec<String>>,
    }

    impl InputInjector for ScriptedInjector {
        fn activate(&self, _: &TargetHandle) -> Result<(), InjectionError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_times {
                return Err(InjectionError::Activation(format!("not focusable ({n})")));
            }
            Ok(())
        }

        fn type_text(&self, _: &TargetHandle, text: &str) -> Result<(), InjectionError> {
            self.typed.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    /// Records (payload, start, end) and sleeps for payloads starting with "slow".
    #[derive(Default)]
    struct TimingInjector {
        spans: Mutex<Vec<(String, Instant, Instant)>>,
    }

    impl InputInjector for TimingInjector {
        fn activate(&self, _: &TargetHandle) -> Result<(), InjectionError> {
            Ok(())
        }

        fn type_text(&self, _: &TargetHandle, text: &str) -> Result<(), InjectionError> {
            let start = Instant::now();
            if text.starts_with("slow") {
                std::thread::sleep(Duration::from_millis(300));
            }
            self.spans
                .lock()
                .unwrap()
                .push((text.to_string(), start, Instant::now()));
            Ok(())
        }
    }

    struct PanickingInjector;

    impl InputInjector for PanickingInjector {
        fn activate(&self, _: &TargetHandle) -> Result<(), InjectionError> {
            panic!("platform call exploded");
        }

        fn type_text(&self, _: &TargetHandle, _: &str) -> Result<(), InjectionError> {
            Ok(())
        }
    }

    fn fast_config() -> InjectionConfig {
        InjectionConfig {
            max_retries: 3,
            retry_delay: Duration::from_millis(10),
            idle_poll: Duration::from_millis(10),
            activation_settle: Duration::ZERO,
        }
    }

    fn target() -> TargetHandle {
        TargetHandle::window(WindowHandle::new(1, "Editor"))
    }

    fn next_outcome(rx: &mut EventReceiver) -> InjectionOutcome {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Ok(NodeEvent::InjectionOutcome(o)) = rx.try_recv() {
                return o;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("no injection outcome within 5s");
    }

    fn start(
        injector: Arc<dyn InputInjector>,
    ) -> (InjectionQueue, EventReceiver, Arc<AtomicBool>, JoinHandle<()>) {
        let (tx, rx) = event_channel();
        let running = Arc::new(AtomicBool::new(true));
        let (queue, handle) =
            InjectionQueue::start(injector, fast_config(), tx, Arc::clone(&running)).unwrap();
        (queue, rx, running, handle)
    }

    // ── Retry bound ───────────────────────────────────────────────────────────

    #[test]
    fn test_always_failing_injector_gets_exactly_max_retries_attempts() {
        // Arrange
        let injector = Arc::new(ScriptedInjector {
            fail_times: u32::MAX,
            ..Default::default()
        });
        let (queue, mut rx, running, handle) = start(injector.clone());

        // Act
        let id = queue.submit(target(), "hello");
        let outcome = next_outcome(&mut rx);

        // Assert
        assert_eq!(outcome.job_id, id);
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(injector.attempts.load(Ordering::SeqCst), 3);
        assert!(outcome.last_error.unwrap().contains("not focusable"));
        assert!(rx.try_recv().is_err(), "exactly one outcome per job");

        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();
    }

    #[test]
    fn test_injector_succeeding_on_second_attempt_reports_two_attempts() {
        // Arrange
        let injector = Arc::new(ScriptedInjector {
            fail_times: 1,
            ..Default::default()
        });
        let (queue, mut rx, running, handle) = start(injector.clone());

        // Act
        queue.submit(target(), "hello");
        let outcome = next_outcome(&mut rx);

        // Assert
        assert!(outcome.success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.last_error, None);
        assert_eq!(*injector.typed.lock().unwrap(), vec!["hello".to_string()]);

        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();
    }

    #[test]
    fn test_zero_max_retries_still_makes_one_attempt() {
        let injector = ScriptedInjector::default();
        let running = AtomicBool::new(true);
        let job = InjectionJob {
            id: Uuid::new_v4(),
            target: target(),
            payload: "x".to_string(),
            attempts_made: 0,
        };
        let config = InjectionConfig {
            max_retries: 0,
            ..fast_config()
        };

        let outcome = run_job(&injector, job, &config, &running);

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 1);
    }

    // ── Ordering ──────────────────────────────────────────────────────────────

    #[test]
    fn test_jobs_run_strictly_in_submission_order_behind_a_slow_job() {
        // Arrange
        let injector = Arc::new(TimingInjector::default());
        let (queue, mut rx, running, handle) = start(injector.clone());

        // Act
        queue.submit(target(), "slow-1");
        queue.submit(target(), "j2");
        queue.submit(target(), "j3");
        for _ in 0..3 {
            assert!(next_outcome(&mut rx).success);
        }

        // Assert
        let spans = injector.spans.lock().unwrap();
        let order: Vec<&str> = spans.iter().map(|(p, _, _)| p.as_str()).collect();
        assert_eq!(order, vec!["slow-1", "j2", "j3"]);
        let slow_end = spans[0].2;
        assert!(spans[1].1 >= slow_end, "j2 must not start before j1 finishes");
        assert!(spans[2].1 >= spans[1].2, "j3 must not start before j2 finishes");

        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();
    }

    // ── Robustness ────────────────────────────────────────────────────────────

    #[test]
    fn test_panicking_injector_is_reported_and_consumer_survives() {
        // Arrange
        let (queue, mut rx, running, handle) = start(Arc::new(PanickingInjector));

        // Act
        queue.submit(target(), "a");
        queue.submit(target(), "b");
        let first = next_outcome(&mut rx);
        let second = next_outcome(&mut rx);

        // Assert
        assert!(!first.success);
        assert_eq!(first.last_error.as_deref(), Some("injector panicked"));
        assert_eq!(second.attempts, 3, "consumer keeps processing after a panic");

        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();
    }

    #[test]
    fn test_consumer_exits_when_running_flag_cleared() {
        let (_queue, _rx, running, handle) = start(Arc::new(ScriptedInjector::default()));
        running.store(false, Ordering::Relaxed);
        handle.join().expect("consumer must exit cleanly");
    }

    #[test]
    fn test_consumer_exits_when_all_producers_dropped() {
        let (queue, _rx, _running, handle) = start(Arc::new(ScriptedInjector::default()));
        drop(queue);
        handle.join().expect("consumer must exit cleanly");
    }

    #[test]
    fn test_activate_and_type_stops_after_failed_activation() {
        let injector = ScriptedInjector {
            fail_times: 1,
            ..Default::default()
        };
        let result = injector.activate_and_type(&target(), "x", Duration::ZERO);
        assert!(matches!(result, Err(InjectionError::Activation(_))));
        assert!(injector.typed.lock().unwrap().is_empty());
    }
}
