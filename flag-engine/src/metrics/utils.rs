use std::time::Instant;

pub fn inc(name: &'static str, labels: &[(String, String)], value: u64) {
    metrics::counter!(name, labels).increment(value);
}

pub fn histogram(name: &'static str, labels: &[(String, String)], value: f64) {
    metrics::histogram!(name, labels).record(value);
}

/// Records the milliseconds between creation and drop into a histogram.
pub struct TimingGuard {
    name: &'static str,
    start: Instant,
}

impl TimingGuard {
    pub fn new(name: &'static str) -> Self {
        TimingGuard {
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        histogram(self.name, &[], self.start.elapsed().as_secs_f64() * 1000.0);
    }
}
