use std::thread;
use std::time::Duration;

use log::info;

/// Blocking pauses between outbound requests. All sleeps are local to the
/// calling thread.
#[derive(Debug, Clone, Copy)]
pub struct DelayManager {
    request_delay: Duration,
}

impl DelayManager {
    pub fn new(request_delay: Duration) -> Self {
        DelayManager { request_delay }
    }

    /// No pauses at all; used by tests and smoke runs.
    pub fn none() -> Self {
        DelayManager::new(Duration::ZERO)
    }

    pub fn query_delay(&self) {
        pause("Query Delay", self.request_delay);
    }

    pub fn result_delay(&self) {
        pause("Result Delay", self.request_delay);
    }

    pub fn download_delay(&self) {
        pause("Download Delay", self.request_delay);
    }

    /// Longer pause between automatic mining runs.
    pub fn run_delay(&self) {
        pause("Run Delay", self.request_delay * 2);
    }
}

fn pause(label: &str, delay: Duration) {
    if delay.is_zero() {
        return;
    }
    info!("Waiting for {:.1} seconds ({})...", delay.as_secs_f64(), label);
    thread::sleep(delay);
}
