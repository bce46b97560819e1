//! Fixed-interval job scheduler with overlap prevention.
//!
//! The timer thread fires once at start and then every `interval`. Each fire
//! runs the job on a worker thread unless a previous run is still in flight,
//! in which case the fire is dropped. A fire that wakes up later than its
//! slot by no more than `misfire_grace` still runs; later than that it is
//! skipped. Missed slots are never replayed.

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::error::BrokerError;

pub trait Job: Send + Sync {
    fn name(&self) -> &str;
    fn execute(&self) -> Result<(), BrokerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Started,
    /// A run was already in flight.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    Fire,
    Misfire,
}

/// Whether a slot scheduled for `scheduled` should still run at `now`.
pub fn decide(scheduled: Instant, now: Instant, grace: Duration) -> TriggerDecision {
    if now.saturating_duration_since(scheduled) <= grace {
        TriggerDecision::Fire
    } else {
        TriggerDecision::Misfire
    }
}

/// The first slot on the `scheduled + k * interval` grid strictly after `now`.
pub fn next_after(scheduled: Instant, interval: Duration, now: Instant) -> Instant {
    let mut next = scheduled + interval;
    if next > now {
        return next;
    }
    let behind = now.duration_since(next);
    let skipped = behind.as_nanos() / interval.as_nanos().max(1) + 1;
    let skipped = u32::try_from(skipped).unwrap_or(u32::MAX);
    next += interval.saturating_mul(skipped);
    next
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Shared {
    job: Arc<dyn Job>,
    in_flight: AtomicBool,
    completed: AtomicUsize,
    stopped: Mutex<bool>,
    wake: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
}

fn recover<'a, T>(result: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>) -> MutexGuard<'a, T> {
    result.unwrap_or_else(|poisoned| {
        warn!("Scheduler mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

impl Shared {
    fn fire(self: &Arc<Self>) -> FireOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(
                "Job '{}' is still running; skipping this trigger",
                self.job.name()
            );
            return FireOutcome::Skipped;
        }

        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("job-{}", self.job.name()))
            .spawn(move || {
                let _in_flight = InFlight(&shared.in_flight);
                let started = Instant::now();
                match shared.job.execute() {
                    Ok(()) => info!(
                        "Job '{}' finished in {:.1?}",
                        shared.job.name(),
                        started.elapsed()
                    ),
                    Err(e) => error!("Job '{}' failed: {}", shared.job.name(), e),
                }
                shared.completed.fetch_add(1, Ordering::AcqRel);
            });

        match spawned {
            Ok(handle) => {
                let previous = recover(self.worker.lock()).replace(handle);
                if let Some(previous) = previous {
                    let _ = previous.join();
                }
                FireOutcome::Started
            }
            Err(e) => {
                self.in_flight.store(false, Ordering::Release);
                error!("Could not spawn worker for job '{}': {}", self.job.name(), e);
                FireOutcome::Skipped
            }
        }
    }

    /// Sleep until `deadline`. Returns false if stopped meanwhile.
    fn sleep_until(&self, deadline: Instant) -> bool {
        let mut stopped = recover(self.stopped.lock());
        loop {
            if *stopped {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let (guard, _) = self
                .wake
                .wait_timeout(stopped, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            stopped = guard;
        }
    }
}

pub struct Scheduler {
    shared: Arc<Shared>,
    interval: Duration,
    misfire_grace: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(job: Arc<dyn Job>, interval: Duration, misfire_grace: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                job,
                in_flight: AtomicBool::new(false),
                completed: AtomicUsize::new(0),
                stopped: Mutex::new(false),
                wake: Condvar::new(),
                worker: Mutex::new(None),
            }),
            interval: interval.max(Duration::from_millis(1)),
            misfire_grace,
            timer: Mutex::new(None),
        }
    }

    /// Start the timer, firing immediately. Returns `Ok(false)` if the
    /// scheduler was already running.
    pub fn start(&self) -> Result<bool, BrokerError> {
        let mut timer = recover(self.timer.lock());
        if timer.is_some() {
            debug!("Scheduler already running");
            return Ok(false);
        }

        *recover(self.shared.stopped.lock()) = false;

        let shared = Arc::clone(&self.shared);
        let interval = self.interval;
        let grace = self.misfire_grace;
        let handle = thread::Builder::new()
            .name("scheduler".into())
            .spawn(move || run_timer(shared, interval, grace))?;
        *timer = Some(handle);

        info!(
            "Scheduler started: job '{}' every {:?}",
            self.shared.job.name(),
            self.interval
        );
        Ok(true)
    }

    pub fn is_running(&self) -> bool {
        recover(self.timer.lock()).is_some()
    }

    /// Fire the job now, outside the timer, subject to the same overlap rule.
    pub fn trigger_now(&self) -> FireOutcome {
        self.shared.fire()
    }

    pub fn is_job_running(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    pub fn completed_runs(&self) -> usize {
        self.shared.completed.load(Ordering::Acquire)
    }

    /// Block the caller for as long as the timer runs.
    pub fn join(&self) {
        let handle = recover(self.timer.lock()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Stop the timer and wait for any in-flight run. Safe to call twice.
    pub fn stop(&self) {
        *recover(self.shared.stopped.lock()) = true;
        self.shared.wake.notify_all();

        let timer = recover(self.timer.lock()).take();
        let was_running = timer.is_some();
        if let Some(handle) = timer {
            let _ = handle.join();
        }

        let worker = recover(self.shared.worker.lock()).take();
        if let Some(handle) = worker {
            let _ = handle.join();
        }

        if was_running {
            info!("Scheduler stopped");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_timer(shared: Arc<Shared>, interval: Duration, grace: Duration) {
    let mut next = Instant::now();
    while shared.sleep_until(next) {
        let now = Instant::now();
        match decide(next, now, grace) {
            TriggerDecision::Fire => {
                debug!("Firing job '{}'", shared.job.name());
                shared.fire();
            }
            TriggerDecision::Misfire => warn!(
                "Job '{}' missed its slot by {:?}; skipping",
                shared.job.name(),
                now.duration_since(next)
            ),
        }
        next = next_after(next, interval, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[derive(Default)]
    struct CountingJob {
        runs: AtomicUsize,
    }

    impl Job for CountingJob {
        fn name(&self) -> &str {
            "counting"
        }

        fn execute(&self) -> Result<(), BrokerError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Blocks until released.
    #[derive(Default)]
    struct GatedJob {
        started: AtomicUsize,
        released: Mutex<bool>,
        gate: Condvar,
    }

    impl GatedJob {
        fn release(&self) {
            *self.released.lock().unwrap() = true;
            self.gate.notify_all();
        }
    }

    impl Job for GatedJob {
        fn name(&self) -> &str {
            "gated"
        }

        fn execute(&self) -> Result<(), BrokerError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let mut released = self.released.lock().unwrap();
            while !*released {
                released = self.gate.wait(released).unwrap();
            }
            Ok(())
        }
    }

    /// Sleeps and records the peak number of concurrent executions.
    #[derive(Default)]
    struct SlowJob {
        current: AtomicUsize,
        peak: AtomicUsize,
        runs: AtomicUsize,
    }

    impl Job for SlowJob {
        fn name(&self) -> &str {
            "slow"
        }

        fn execute(&self) -> Result<(), BrokerError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(80));
            self.current.fetch_sub(1, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingJob;

    impl Job for FailingJob {
        fn name(&self) -> &str {
            "failing"
        }

        fn execute(&self) -> Result<(), BrokerError> {
            Err(BrokerError::Database {
                reason: "disk full".into(),
            })
        }
    }

    #[test]
    fn decide_within_grace_fires() {
        let t = Instant::now();
        let grace = Duration::from_secs(60);
        assert_eq!(decide(t, t, grace), TriggerDecision::Fire);
        assert_eq!(decide(t, t + grace, grace), TriggerDecision::Fire);
        assert_eq!(
            decide(t, t + grace + Duration::from_millis(1), grace),
            TriggerDecision::Misfire
        );
    }

    #[test]
    fn next_after_on_time() {
        let t = Instant::now();
        let i = Duration::from_secs(10);
        assert_eq!(next_after(t, i, t), t + i);
        assert_eq!(next_after(t, i, t + Duration::from_secs(3)), t + i);
    }

    #[test]
    fn next_after_drops_backlog() {
        let t = Instant::now();
        let i = Duration::from_secs(10);
        assert_eq!(next_after(t, i, t + Duration::from_secs(35)), t + i * 4);
        assert_eq!(next_after(t, i, t + i), t + i * 2);
    }

    #[test]
    fn second_trigger_while_in_flight_is_skipped() {
        let job = Arc::new(GatedJob::default());
        let scheduler = Scheduler::new(job.clone(), Duration::from_secs(3600), Duration::ZERO);

        assert_eq!(scheduler.trigger_now(), FireOutcome::Started);
        assert!(wait_until(Duration::from_secs(2), || {
            job.started.load(Ordering::SeqCst) == 1
        }));
        assert_eq!(scheduler.trigger_now(), FireOutcome::Skipped);
        assert!(scheduler.is_job_running());

        job.release();
        assert!(wait_until(Duration::from_secs(2), || !scheduler.is_job_running()));
        assert_eq!(job.started.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.completed_runs(), 1);
    }

    #[test]
    fn start_fires_immediately_and_is_idempotent() {
        let job = Arc::new(CountingJob::default());
        let scheduler = Scheduler::new(job.clone(), Duration::from_secs(3600), Duration::from_secs(60));

        assert!(scheduler.start().unwrap());
        assert!(!scheduler.start().unwrap());
        assert!(scheduler.is_running());
        assert!(wait_until(Duration::from_secs(2), || {
            job.runs.load(Ordering::SeqCst) == 1
        }));

        scheduler.stop();
        assert!(!scheduler.is_running());
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fires_on_interval() {
        let job = Arc::new(CountingJob::default());
        let scheduler = Scheduler::new(
            job.clone(),
            Duration::from_millis(30),
            Duration::from_secs(1),
        );
        scheduler.start().unwrap();
        assert!(wait_until(Duration::from_secs(3), || {
            job.runs.load(Ordering::SeqCst) >= 3
        }));
        scheduler.stop();
    }

    #[test]
    fn long_runs_never_overlap() {
        let job = Arc::new(SlowJob::default());
        let scheduler = Scheduler::new(
            job.clone(),
            Duration::from_millis(10),
            Duration::from_secs(1),
        );
        scheduler.start().unwrap();
        assert!(wait_until(Duration::from_secs(3), || {
            job.runs.load(Ordering::SeqCst) >= 3
        }));
        scheduler.stop();
        assert_eq!(job.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_job_keeps_scheduler_alive() {
        let scheduler = Scheduler::new(
            Arc::new(FailingJob),
            Duration::from_millis(20),
            Duration::from_secs(1),
        );
        scheduler.start().unwrap();
        assert!(wait_until(Duration::from_secs(3), || {
            scheduler.completed_runs() >= 2
        }));
        assert!(scheduler.is_running());
        scheduler.stop();
    }

    #[test]
    fn stop_is_idempotent_and_restartable() {
        let job = Arc::new(CountingJob::default());
        let scheduler = Scheduler::new(job.clone(), Duration::from_secs(3600), Duration::from_secs(60));
        scheduler.stop();
        scheduler.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            job.runs.load(Ordering::SeqCst) == 1
        }));
        scheduler.stop();
        scheduler.stop();
        assert!(scheduler.start().unwrap());
        assert!(wait_until(Duration::from_secs(2), || {
            job.runs.load(Ordering::SeqCst) == 2
        }));
        scheduler.stop();
    }
}
