use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Clone)]
pub struct Progress {
    enabled: bool,
    interval: Duration,
    pub files_done: Arc<AtomicUsize>,
    pub files_total: Arc<AtomicUsize>,
    pub bytes_fetched: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            interval: Duration::from_secs(5),
            files_done: Arc::new(AtomicUsize::new(0)),
            files_total: Arc::new(AtomicUsize::new(0)),
            bytes_fetched: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn set_files_total(&self, n: usize) {
        self.files_total.store(n, Ordering::Relaxed);
    }
    pub fn inc_file(&self) {
        self.files_done.fetch_add(1, Ordering::Relaxed);
    }
    pub fn add_bytes(&self, n: u64) {
        self.bytes_fetched.fetch_add(n, Ordering::Relaxed);
    }

    pub fn start(&self) {
        if !self.enabled {
            return;
        }
        self.running.store(true, Ordering::Relaxed);
        let files_done = self.files_done.clone();
        let files_total = self.files_total.clone();
        let bytes = self.bytes_fetched.clone();
        let running = self.running.clone();
        let interval = self.interval;
        thread::spawn(move || {
            let t0 = Instant::now();
            while running.load(Ordering::Relaxed) {
                thread::sleep(interval);
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                let fd = files_done.load(Ordering::Relaxed);
                let ft = files_total.load(Ordering::Relaxed);
                let pct = if ft > 0 { (fd as f64 / ft as f64) * 100.0 } else { 0.0 };
                info!(
                    "[{:>4}s] files {}/{} ({}%) | fetched {} KiB",
                    t0.elapsed().as_secs(),
                    fd,
                    ft,
                    pct as i32,
                    bytes.load(Ordering::Relaxed) / 1024
                );
            }
        });
    }
    pub fn stop(&self) {
        if self.enabled {
            self.running.store(false, Ordering::Relaxed);
        }
    }
}
