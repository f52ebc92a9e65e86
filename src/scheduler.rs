use std::path::PathBuf;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, NaiveTime};
use clokwerk::{Job, TimeUnits};
use log::{error, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{MinerError, Result};
use crate::models::{seconds_between, MiningReport, ReportStatus, SchedulerStatus};
use crate::pipeline::{panic_message, Miner};

/// What the scheduler drives. [`Miner`] is the production implementation.
pub trait MiningService: Send + Sync + 'static {
    fn execute_automatic_mining(&self) -> Vec<MiningReport>;
    fn cleanup_old_files(&self, days: u64) -> usize;
    fn write_statistics(&self) -> Result<PathBuf>;
}

impl MiningService for Miner {
    fn execute_automatic_mining(&self) -> Vec<MiningReport> {
        Miner::execute_automatic_mining(self)
    }

    fn cleanup_old_files(&self, days: u64) -> usize {
        Miner::cleanup_old_files(self, days)
    }

    fn write_statistics(&self) -> Result<PathBuf> {
        Miner::write_statistics(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Mining,
    Cleanup,
    Statistics,
}

/// When a job fires. Interval jobs have whole-second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Every(Duration),
    DailyAt(NaiveTime),
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub mining_interval: Duration,
    pub cleanup: Schedule,
    pub statistics: Schedule,
    pub cleanup_retention_days: u64,
    pub poll_interval: Duration,
    pub failure_backoff: Duration,
    pub loop_join_timeout: Duration,
    pub mining_join_timeout: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        SchedulerSettings {
            mining_interval: config.interval,
            cleanup: Schedule::DailyAt(config.cleanup_at),
            statistics: Schedule::DailyAt(config.statistics_at),
            cleanup_retention_days: config.cleanup_retention_days,
            poll_interval: Duration::from_secs(1),
            failure_backoff: Duration::from_secs(5),
            loop_join_timeout: Duration::from_secs(5),
            mining_join_timeout: Duration::from_secs(10),
        }
    }
}

/// A background thread with liveness checks and a bounded join.
pub struct WorkerHandle {
    name: String,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn spawn<F>(name: &str, f: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new().name(name.to_string()).spawn(f)?;
        Ok(WorkerHandle {
            name: name.to_string(),
            handle,
        })
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Wait up to `timeout`. Returns false, and detaches the thread, if it is
    /// still running afterwards.
    pub fn join_timeout(self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if self.is_running() {
            warn!("Worker '{}' still running after {:?}; abandoning it", self.name, timeout);
            return false;
        }
        if self.handle.join().is_err() {
            error!("Worker '{}' panicked", self.name);
        }
        true
    }
}

#[derive(Debug, Serialize)]
struct ExecutionLogEntry {
    kind: &'static str,
    run_id: Uuid,
    status: ReportStatus,
    started_at: DateTime<Local>,
    finished_at: DateTime<Local>,
    duration_seconds: f64,
    results: Option<usize>,
    successful: Option<usize>,
    error: Option<String>,
}

impl ExecutionLogEntry {
    fn log(&self) {
        let line = serde_json::to_string(self).unwrap_or_else(|e| format!("<unserializable entry: {}>", e));
        match self.status {
            ReportStatus::Success => info!("Scheduled execution recorded: {}", line),
            ReportStatus::Error => error!("Scheduled execution failed: {}", line),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn whole_seconds(period: Duration) -> Result<u32> {
    u32::try_from(period.as_secs())
        .ok()
        .filter(|secs| *secs > 0)
        .ok_or_else(|| MinerError::Scheduler(format!("unsupported job interval {:?}", period)))
}

struct Shared {
    service: Arc<dyn MiningService>,
    settings: SchedulerSettings,
    running: AtomicBool,
    job_failed: AtomicBool,
    job_count: AtomicUsize,
    next_run_at: Mutex<Option<DateTime<Local>>>,
    current_mining: Mutex<Option<WorkerHandle>>,
}

impl Shared {
    fn trigger_scheduled_mining(&self) -> bool {
        info!("Running scheduled mining...");
        let mut slot = lock(&self.current_mining);

        if slot.as_ref().is_some_and(WorkerHandle::is_running) {
            warn!("Previous mining still in progress; skipping this trigger");
            return false;
        }
        if let Some(finished) = slot.take() {
            finished.join_timeout(Duration::ZERO);
        }

        let service = Arc::clone(&self.service);
        match WorkerHandle::spawn("mining-worker", move || run_mining_execution(service.as_ref())) {
            Ok(handle) => {
                *slot = Some(handle);
                info!("Scheduled mining started in a separate worker");
                true
            }
            Err(e) => {
                error!("Failed to start mining worker: {}", e);
                false
            }
        }
    }

    // Entry point for every timetable job; a failure only flags the loop to back off.
    fn run_scheduled_job(&self, kind: JobKind) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.run_job(kind) {
            error!("Scheduled job {:?} failed: {}", kind, e);
            self.job_failed.store(true, Ordering::SeqCst);
        }
    }

    fn run_job(&self, kind: JobKind) -> std::result::Result<(), String> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<()> {
            match kind {
                JobKind::Mining => {
                    self.trigger_scheduled_mining();
                    Ok(())
                }
                JobKind::Cleanup => {
                    info!("Starting cleanup of old files...");
                    let removed = self.service.cleanup_old_files(self.settings.cleanup_retention_days);
                    info!("Cleanup job finished: {} files removed", removed);
                    Ok(())
                }
                JobKind::Statistics => {
                    info!("Generating daily statistics...");
                    let path = self.service.write_statistics()?;
                    info!("Daily statistics saved: {:?}", path);
                    Ok(())
                }
            }
        }));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(panic_message(payload)),
        }
    }

    fn publish_next_run(&self, timetable: &clokwerk::Scheduler) {
        let next = timetable
            .time_until_next_job()
            .and_then(|wait| chrono::Duration::from_std(wait).ok())
            .map(|wait| Local::now() + wait);
        *lock(&self.next_run_at) = next;
    }

    // Sleep in short slices so stop() is observed promptly.
    fn sleep_while_running(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while self.running.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(100)));
        }
    }
}

/// Register the mining, cleanup and statistics jobs on a fresh timetable.
fn build_timetable(shared: &Arc<Shared>) -> Result<clokwerk::Scheduler> {
    let settings = &shared.settings;
    let jobs = [
        (JobKind::Mining, Schedule::Every(settings.mining_interval)),
        (JobKind::Cleanup, settings.cleanup),
        (JobKind::Statistics, settings.statistics),
    ];

    let mut timetable = clokwerk::Scheduler::new();
    for (kind, schedule) in jobs {
        let job_shared = Arc::clone(shared);
        let job = move || job_shared.run_scheduled_job(kind);
        match schedule {
            Schedule::Every(period) => {
                timetable.every(whole_seconds(period)?.seconds()).run(job);
            }
            Schedule::DailyAt(at) => {
                timetable.every(1.day()).at(&at.format("%H:%M:%S").to_string()).run(job);
            }
        }
        info!("Job {:?} registered: {:?}", kind, schedule);
    }
    shared.job_count.store(jobs.len(), Ordering::SeqCst);
    Ok(timetable)
}

fn timer_loop(shared: Arc<Shared>, mut timetable: clokwerk::Scheduler) {
    info!("Scheduler loop started");
    while shared.running.load(Ordering::SeqCst) {
        timetable.run_pending();
        shared.publish_next_run(&timetable);

        let pause = if shared.job_failed.swap(false, Ordering::SeqCst) {
            shared.settings.failure_backoff
        } else {
            shared.settings.poll_interval
        };
        shared.sleep_while_running(pause);
    }
    info!("Scheduler loop finished");
}

fn run_mining_execution(service: &dyn MiningService) {
    let run_id = Uuid::new_v4();
    let started_at = Local::now();
    info!("Starting scheduled mining {} at {}", run_id, started_at);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| service.execute_automatic_mining()));
    let finished_at = Local::now();
    let duration_seconds = seconds_between(started_at, finished_at);

    let entry = match outcome {
        Ok(reports) => {
            info!(
                "Scheduled mining finished in {:.1} seconds: {} executions",
                duration_seconds,
                reports.len()
            );
            ExecutionLogEntry {
                kind: "scheduled_execution",
                run_id,
                status: ReportStatus::Success,
                started_at,
                finished_at,
                duration_seconds,
                results: Some(reports.len()),
                successful: Some(reports.iter().filter(|r| r.is_success()).count()),
                error: None,
            }
        }
        Err(payload) => ExecutionLogEntry {
            kind: "scheduled_execution",
            run_id,
            status: ReportStatus::Error,
            started_at,
            finished_at,
            duration_seconds,
            results: None,
            successful: None,
            error: Some(panic_message(payload)),
        },
    };
    entry.log();
}

/// Runs mining on an interval plus the daily cleanup and statistics jobs.
///
/// At most one mining worker is alive at a time: a trigger that finds the
/// previous worker still running is dropped, not queued.
pub struct Scheduler {
    shared: Arc<Shared>,
    timer: Mutex<Option<WorkerHandle>>,
    // Held for the whole of stop(), joins included.
    stopping: Mutex<()>,
}

impl Scheduler {
    pub fn new(service: Arc<dyn MiningService>, settings: SchedulerSettings) -> Self {
        Scheduler {
            shared: Arc::new(Shared {
                service,
                settings,
                running: AtomicBool::new(false),
                job_failed: AtomicBool::new(false),
                job_count: AtomicUsize::new(0),
                next_run_at: Mutex::new(None),
                current_mining: Mutex::new(None),
            }),
            timer: Mutex::new(None),
            stopping: Mutex::new(()),
        }
    }

    pub fn start(&self) -> Result<()> {
        info!("Starting scheduler...");
        if self.is_running() {
            warn!("Scheduler already running");
            return Ok(());
        }

        let timetable = build_timetable(&self.shared)?;
        self.shared.publish_next_run(&timetable);
        info!("Jobs configured");

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let timer = WorkerHandle::spawn("scheduler-loop", move || timer_loop(shared, timetable)).map_err(|e| {
            self.shared.running.store(false, Ordering::SeqCst);
            MinerError::Scheduler(format!("failed to start scheduler loop: {}", e))
        })?;
        *lock(&self.timer) = Some(timer);

        info!("Scheduler started");
        if let Some(next) = self.status().next_run_at {
            info!("Next scheduled run: {}", next);
        }

        self.trigger_scheduled_mining();
        Ok(())
    }

    /// Start a mining worker unless one is still alive. Returns whether a
    /// new worker was spawned.
    pub fn trigger_scheduled_mining(&self) -> bool {
        self.shared.trigger_scheduled_mining()
    }

    /// Best-effort shutdown: joins are bounded and a late worker is abandoned.
    /// Concurrent callers are serialized, so a second call returns only after
    /// the first has finished its joins.
    pub fn stop(&self) {
        let _stopping = lock(&self.stopping);
        info!("Stopping scheduler...");
        self.shared.running.store(false, Ordering::SeqCst);

        let timer = lock(&self.timer).take();
        if let Some(timer) = timer {
            timer.join_timeout(self.shared.settings.loop_join_timeout);
        }

        let mining = lock(&self.shared.current_mining).take();
        if let Some(mining) = mining {
            if mining.is_running() {
                info!("Waiting for in-flight mining to finish...");
            }
            mining.join_timeout(self.shared.settings.mining_join_timeout);
        }

        *lock(&self.shared.next_run_at) = None;
        self.shared.job_count.store(0, Ordering::SeqCst);
        info!("Scheduler stopped");
    }

    pub fn restart(&self) -> Result<()> {
        info!("Restarting scheduler...");
        self.stop();
        thread::sleep(Duration::from_secs(2));
        self.start()
    }

    /// Block the caller until the scheduler is stopped, including any
    /// shutdown still joining its workers on another thread.
    pub fn wait(&self) {
        while self.is_running() {
            thread::sleep(self.shared.settings.poll_interval);
        }
        drop(lock(&self.stopping));
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.is_running(),
            next_run_at: *lock(&self.shared.next_run_at),
            scheduled_job_count: self.shared.job_count.load(Ordering::SeqCst),
            worker_alive: lock(&self.timer).as_ref().is_some_and(WorkerHandle::is_running),
            mining_in_progress: lock(&self.shared.current_mining)
                .as_ref()
                .is_some_and(WorkerHandle::is_running),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{self, Receiver, Sender};

    #[derive(Default)]
    struct FakeService {
        mining_calls: AtomicUsize,
        mining_finished: AtomicUsize,
        statistics_calls: AtomicUsize,
        fail_statistics: bool,
        gate: Option<Mutex<Receiver<()>>>,
    }

    impl FakeService {
        fn gated() -> (Arc<Self>, Sender<()>) {
            let (tx, rx) = mpsc::channel();
            let service = FakeService {
                gate: Some(Mutex::new(rx)),
                ..FakeService::default()
            };
            (Arc::new(service), tx)
        }
    }

    impl MiningService for FakeService {
        fn execute_automatic_mining(&self) -> Vec<MiningReport> {
            self.mining_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _ = gate.lock().unwrap().recv_timeout(Duration::from_secs(5));
            }
            self.mining_finished.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        }

        fn cleanup_old_files(&self, _days: u64) -> usize {
            0
        }

        fn write_statistics(&self) -> Result<PathBuf> {
            self.statistics_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_statistics {
                return Err(MinerError::Scheduler("disk full".to_string()));
            }
            Ok(PathBuf::from("stats.json"))
        }
    }

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            mining_interval: Duration::from_secs(3600),
            cleanup: Schedule::DailyAt(NaiveTime::from_hms_opt(2, 0, 0).unwrap()),
            statistics: Schedule::DailyAt(NaiveTime::from_hms_opt(6, 0, 0).unwrap()),
            cleanup_retention_days: 30,
            poll_interval: Duration::from_millis(5),
            failure_backoff: Duration::from_millis(20),
            loop_join_timeout: Duration::from_secs(1),
            mining_join_timeout: Duration::from_secs(1),
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn second_trigger_is_a_no_op_while_mining_runs() {
        let (service, release) = FakeService::gated();
        let scheduler = Scheduler::new(service.clone(), settings());

        assert!(scheduler.trigger_scheduled_mining());
        assert!(!scheduler.trigger_scheduled_mining());
        assert!(scheduler.status().mining_in_progress);

        release.send(()).unwrap();
        assert!(wait_until(|| !scheduler.status().mining_in_progress));
        assert_eq!(service.mining_calls.load(Ordering::SeqCst), 1);

        assert!(scheduler.trigger_scheduled_mining());
        release.send(()).unwrap();
        scheduler.stop();
        assert_eq!(service.mining_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn start_registers_jobs_and_mines_immediately() {
        let service = Arc::new(FakeService::default());
        let scheduler = Scheduler::new(service.clone(), settings());

        scheduler.start().unwrap();
        let status = scheduler.status();
        assert!(status.running);
        assert!(status.worker_alive);
        assert_eq!(status.scheduled_job_count, 3);
        let next = status.next_run_at.unwrap();
        assert!(next > Local::now());
        assert!(next <= Local::now() + chrono::Duration::hours(1));
        assert!(wait_until(|| service.mining_calls.load(Ordering::SeqCst) == 1));

        scheduler.stop();
        let status = scheduler.status();
        assert!(!status.running);
        assert!(!status.worker_alive);
        assert_eq!(status.scheduled_job_count, 0);
        assert!(status.next_run_at.is_none());
    }

    #[test]
    fn sub_second_interval_fails_registration() {
        for interval in [Duration::ZERO, Duration::from_millis(500)] {
            let mut settings = settings();
            settings.mining_interval = interval;
            let scheduler = Scheduler::new(Arc::new(FakeService::default()), settings);
            assert!(matches!(scheduler.start(), Err(MinerError::Scheduler(_))));
            assert!(!scheduler.is_running());
        }
    }

    #[test]
    fn loop_survives_failing_jobs() {
        let service = Arc::new(FakeService {
            fail_statistics: true,
            ..FakeService::default()
        });
        let mut settings = settings();
        settings.mining_interval = Duration::from_secs(1);
        settings.statistics = Schedule::Every(Duration::from_secs(1));
        let scheduler = Scheduler::new(service.clone(), settings);

        scheduler.start().unwrap();

        assert!(wait_until(|| service.statistics_calls.load(Ordering::SeqCst) >= 2));
        assert!(wait_until(|| service.mining_calls.load(Ordering::SeqCst) >= 2));
        assert!(scheduler.status().worker_alive);
        scheduler.stop();
    }

    #[test]
    fn stop_does_not_wait_past_the_bound() {
        let (service, release) = FakeService::gated();
        let mut settings = settings();
        settings.mining_join_timeout = Duration::from_millis(50);
        let scheduler = Scheduler::new(service, settings);

        scheduler.start().unwrap();
        assert!(wait_until(|| scheduler.status().mining_in_progress));

        let begun = Instant::now();
        scheduler.stop();
        assert!(begun.elapsed() < Duration::from_secs(2));
        assert!(!scheduler.is_running());
        drop(release);
    }

    #[test]
    fn wait_covers_a_stop_running_on_another_thread() {
        let (service, release) = FakeService::gated();
        let mut settings = settings();
        settings.mining_join_timeout = Duration::from_secs(3);
        let scheduler = Arc::new(Scheduler::new(service.clone(), settings));

        scheduler.start().unwrap();
        assert!(wait_until(|| scheduler.status().mining_in_progress));

        let stopper = Arc::clone(&scheduler);
        let signal = thread::spawn(move || stopper.stop());
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            let _ = release.send(());
        });

        scheduler.wait();
        scheduler.stop();
        assert_eq!(service.mining_finished.load(Ordering::SeqCst), 1);
        signal.join().unwrap();
    }

    #[test]
    fn restart_schedules_again_and_mines() {
        let service = Arc::new(FakeService::default());
        let scheduler = Scheduler::new(service.clone(), settings());

        scheduler.start().unwrap();
        assert!(wait_until(|| service.mining_calls.load(Ordering::SeqCst) == 1));

        scheduler.restart().unwrap();
        let status = scheduler.status();
        assert!(status.running);
        assert_eq!(status.scheduled_job_count, 3);
        assert!(wait_until(|| service.mining_calls.load(Ordering::SeqCst) == 2));
        scheduler.stop();
    }
}
