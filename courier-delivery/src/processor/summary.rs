use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Running totals of delivery results, shared by every worker.
#[derive(Debug, Default)]
pub struct TransmitterSummary {
    mail_transactions: AtomicU64,
    successful: AtomicU64,
    failures: AtomicU64,
    permanent_failures: AtomicU64,
    transient_failures: AtomicU64,
    partial_failures: AtomicU64,
    errors: AtomicU64,
    last_failure: Mutex<Option<String>>,
    last_error: Mutex<Option<String>>,
}

impl TransmitterSummary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_transaction(&self) {
        self.mail_transactions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.successful.fetch_add(1, Ordering::Relaxed);
    }

    /// A failure affecting the unit as a whole
    pub(crate) fn record_failure(&self, permanent: bool, description: String) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.record_kind(permanent);
        *self.last_failure.lock() = Some(description);
    }

    /// Some recipients were accepted while others were refused
    pub(crate) fn record_partial_failure(&self, permanent: bool, description: String) {
        self.partial_failures.fetch_add(1, Ordering::Relaxed);
        self.record_kind(permanent);
        *self.last_failure.lock() = Some(description);
    }

    pub(crate) fn record_error(&self, description: String) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(description);
    }

    fn record_kind(&self, permanent: bool) {
        if permanent {
            self.permanent_failures.fetch_add(1, Ordering::Relaxed);
        } else {
            self.transient_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn mail_transactions(&self) -> u64 {
        self.mail_transactions.load(Ordering::Relaxed)
    }

    pub fn successful(&self) -> u64 {
        self.successful.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn permanent_failures(&self) -> u64 {
        self.permanent_failures.load(Ordering::Relaxed)
    }

    pub fn transient_failures(&self) -> u64 {
        self.transient_failures.load(Ordering::Relaxed)
    }

    pub fn partial_failures(&self) -> u64 {
        self.partial_failures.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn last_failure(&self) -> Option<String> {
        self.last_failure.lock().clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_failures_are_classified() {
        let summary = TransmitterSummary::new();

        summary.record_transaction();
        summary.record_failure(true, "550 5.1.2 Bad destination".to_string());
        summary.record_transaction();
        summary.record_partial_failure(false, "450 4.2.1 Mailbox busy".to_string());

        assert_eq!(summary.mail_transactions(), 2);
        assert_eq!(summary.failures(), 1);
        assert_eq!(summary.partial_failures(), 1);
        assert_eq!(summary.permanent_failures(), 1);
        assert_eq!(summary.transient_failures(), 1);
        assert_eq!(summary.last_failure().as_deref(), Some("450 4.2.1 Mailbox busy"));
        assert_eq!(summary.last_error(), None);
    }

    #[test]
    fn test_errors_are_kept_apart() {
        let summary = TransmitterSummary::new();
        summary.record_error("Queue storage failure: disk full".to_string());

        assert_eq!(summary.errors(), 1);
        assert_eq!(summary.failures(), 0);
        assert_eq!(
            summary.last_error().as_deref(),
            Some("Queue storage failure: disk full")
        );
    }
}
