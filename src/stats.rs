use std::sync::atomic::{ AtomicU64, Ordering };
use std::sync::Arc;
use std::time::{ Duration, Instant };
use tracing::info;

/// Lock-free counters for the classification service.
#[derive(Debug, Default)]
pub struct Stats {
    pub requests: AtomicU64,
    pub bad_requests: AtomicU64,
    pub failures: AtomicU64,
    pub inference_micros: AtomicU64,
}

impl Stats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[inline(always)]
    pub fn record_classified(&self, took: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.inference_micros.fetch_add(took.as_micros() as u64, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_bad_request(&self) {
        self.bad_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot and reset counters, return rates
    pub fn snapshot_and_reset(&self, elapsed: Duration) -> StatsSnapshot {
        let secs = elapsed.as_secs_f64().max(0.001);

        let requests = self.requests.swap(0, Ordering::Relaxed);
        let bad = self.bad_requests.swap(0, Ordering::Relaxed);
        let failures = self.failures.swap(0, Ordering::Relaxed);
        let micros = self.inference_micros.swap(0, Ordering::Relaxed);

        StatsSnapshot {
            requests,
            per_minute: ((requests as f64) * 60.0) / secs,
            avg_inference_ms: if requests == 0 {
                0.0
            } else {
                (micros as f64) / (requests as f64) / 1000.0
            },
            bad_requests: bad,
            failures,
        }
    }
}

#[derive(Debug)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub per_minute: f64,
    pub avg_inference_ms: f64,
    pub bad_requests: u64,
    pub failures: u64,
}

/// Background stats reporter task
pub async fn stats_reporter(stats: Arc<Stats>, interval_secs: u64) {
    if interval_secs == 0 {
        // Stats disabled, park forever
        std::future::pending::<()>().await;
        return;
    }

    let interval = Duration::from_secs(interval_secs);
    let mut last = Instant::now();

    loop {
        tokio::time::sleep(interval).await;
        let now = Instant::now();
        let elapsed = now - last;
        last = now;

        let snap = stats.snapshot_and_reset(elapsed);
        if snap.requests + snap.bad_requests + snap.failures == 0 {
            continue;
        }
        info!(
            requests = snap.requests,
            per_minute = format!("{:.1}", snap.per_minute),
            avg_ms = format!("{:.1}", snap.avg_inference_ms),
            bad_requests = snap.bad_requests,
            failures = snap.failures,
            "📊 classifier stats"
        );
    }
}

// ─────────────────────────────────────────────────────────────────────
//  Per-session turn counters
// ─────────────────────────────────────────────────────────────────────

/// Counters for one show / chat session, summarised at shutdown.
#[derive(Debug, Default, Clone)]
pub struct TurnStats {
    pub turns: u64,
    pub skipped_inputs: u64,
    pub llm_failures: u64,
    pub classifier_failures: u64,
    pub llm_secs: f64,
    pub classifier_secs: f64,
}

impl TurnStats {
    pub fn record_turn(&mut self, llm_secs: f64, classifier_secs: Option<f64>) {
        self.turns += 1;
        self.llm_secs += llm_secs;
        if let Some(c) = classifier_secs {
            self.classifier_secs += c;
        }
    }

    pub fn avg_llm_secs(&self) -> f64 {
        if self.turns == 0 { 0.0 } else { self.llm_secs / (self.turns as f64) }
    }

    pub fn log_summary(&self) {
        info!(
            turns = self.turns,
            skipped_inputs = self.skipped_inputs,
            llm_failures = self.llm_failures,
            classifier_failures = self.classifier_failures,
            avg_llm_s = format!("{:.2}", self.avg_llm_secs()),
            classifier_total_s = format!("{:.2}", self.classifier_secs),
            "📊 session summary"
        );
    }
}
