use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    FramesRead,
    QrDecoded,
    ApiSent,
    FramesStreamed,
    Errors,
    NoCode,
}

/// Counters shared by every worker. Workers only ever add; the supervisor
/// reads snapshots.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_read: AtomicU64,
    qr_decoded: AtomicU64,
    api_sent: AtomicU64,
    frames_streamed: AtomicU64,
    errors: AtomicU64,
    no_code: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::FramesRead => &self.frames_read,
            Counter::QrDecoded => &self.qr_decoded,
            Counter::ApiSent => &self.api_sent,
            Counter::FramesStreamed => &self.frames_streamed,
            Counter::Errors => &self.errors,
            Counter::NoCode => &self.no_code,
        }
    }

    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, n: u64) {
        self.counter(counter).fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counter(counter).load(Ordering::Relaxed)
    }

    /// Counter values only; queue depths and client count are filled in by
    /// whoever owns those.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_read: self.get(Counter::FramesRead),
            qr_decoded: self.get(Counter::QrDecoded),
            api_sent: self.get(Counter::ApiSent),
            frames_streamed: self.get(Counter::FramesStreamed),
            errors: self.get(Counter::Errors),
            no_code: self.get(Counter::NoCode),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_read: u64,
    pub qr_decoded: u64,
    pub api_sent: u64,
    pub frames_streamed: u64,
    pub errors: u64,
    pub no_code: u64,
    pub code_queue: usize,
    pub frame_queue: usize,
    pub clients: usize,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "read={} decoded={} no_code={} api_sent={} streamed={} errors={} queues(code={}, frame={}) clients={}",
            self.frames_read,
            self.qr_decoded,
            self.no_code,
            self.api_sent,
            self.frames_streamed,
            self.errors,
            self.code_queue,
            self.frame_queue,
            self.clients
        )
    }
}

/// Counts events and yields the achieved rate every `every` events.
pub struct RateMeter {
    every: u64,
    count: u64,
    started: Instant,
}

impl RateMeter {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            count: 0,
            started: Instant::now(),
        }
    }

    pub fn tick(&mut self) -> Option<f64> {
        self.count += 1;
        if self.count < self.every {
            return None;
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            self.count as f64 / elapsed
        } else {
            0.0
        };
        self.count = 0;
        self.started = Instant::now();
        Some(rate)
    }
}
