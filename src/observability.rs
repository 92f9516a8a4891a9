//! Process-wide counters exposed on the control API

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    workers_dispatched: AtomicU64,
    workers_failed: AtomicU64,
    workers_cancelled: AtomicU64,
    chapters_downloaded: AtomicU64,
    chapters_failed: AtomicU64,
    notifications_sent: AtomicU64,
    library_refreshes: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn worker_dispatched(&self) {
        self.workers_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_failed(&self) {
        self.workers_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_cancelled(&self) {
        self.workers_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chapter_downloaded(&self) {
        self.chapters_downloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chapter_failed(&self) {
        self.chapters_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn library_refreshed(&self) {
        self.library_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            workers_dispatched: self.workers_dispatched.load(Ordering::Relaxed),
            workers_failed: self.workers_failed.load(Ordering::Relaxed),
            workers_cancelled: self.workers_cancelled.load(Ordering::Relaxed),
            chapters_downloaded: self.chapters_downloaded.load(Ordering::Relaxed),
            chapters_failed: self.chapters_failed.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            library_refreshes: self.library_refreshes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub workers_dispatched: u64,
    pub workers_failed: u64,
    pub workers_cancelled: u64,
    pub chapters_downloaded: u64,
    pub chapters_failed: u64,
    pub notifications_sent: u64,
    pub library_refreshes: u64,
}
