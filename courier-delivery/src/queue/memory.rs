use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_common::{Mail, MailId};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{MailQueue, ScheduledQueue};
use crate::QueueError;

/// A non-durable queue handing out units in schedule order.
///
/// Suitable for tests and for deployments that accept losing queued mail on
/// restart.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    entries: Mutex<BTreeMap<(DateTime<Utc>, MailId), Mail>>,
    notify: Notify,
    capacity: Option<usize>,
}

impl MemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue refusing more than `capacity` units at a time
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Takes out the earliest unit scheduled no later than `now`.
    pub fn next_due(&self, now: DateTime<Utc>) -> Option<Mail> {
        let mut entries = self.entries.lock();
        let entry = entries.first_entry()?;

        if entry.key().0 <= now {
            Some(entry.remove())
        } else {
            None
        }
    }

    /// Schedule of the earliest unit, due or not
    pub fn next_schedule(&self) -> Option<DateTime<Utc>> {
        self.entries.lock().keys().next().map(|(schedule, _)| *schedule)
    }
}

#[async_trait]
impl MailQueue for MemoryQueue {
    async fn add(&self, mail: Mail) -> Result<(), QueueError> {
        {
            let mut entries = self.entries.lock();

            if let Some(capacity) = self.capacity.filter(|capacity| entries.len() >= *capacity) {
                return Err(QueueError::Storage(format!(
                    "Queue is full ({capacity} units)"
                )));
            }

            entries.insert((mail.schedule, mail.id), mail);
        }

        self.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl ScheduledQueue for MemoryQueue {
    async fn wait_for_work(&self) -> Mail {
        loop {
            // Registered before looking, so an add in between is not missed.
            let notified = self.notify.notified();

            let now = Utc::now();
            if let Some(mail) = self.next_due(now) {
                return mail;
            }

            match self.next_schedule() {
                Some(schedule) => {
                    let wait = (schedule - now).to_std().unwrap_or(Duration::ZERO);
                    tokio::select! {
                        () = notified => {}
                        () = tokio::time::sleep(wait) => {}
                    }
                }
                None => notified.await,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeDelta;
    use courier_common::Recipient;
    use pretty_assertions::assert_eq;

    use super::*;

    fn mail(schedule: DateTime<Utc>) -> Mail {
        let mut mail = Mail::new(
            "john@example.com".parse().unwrap(),
            ["jane@example.com".parse::<Recipient>().unwrap()],
            "data",
        )
        .unwrap();
        mail.schedule = schedule;
        mail
    }

    #[tokio::test]
    async fn test_units_come_out_in_schedule_order() {
        let queue = MemoryQueue::new();
        let now = Utc::now();

        let later = mail(now - TimeDelta::seconds(10));
        let earlier = mail(now - TimeDelta::seconds(20));
        let future = mail(now + TimeDelta::hours(1));

        queue.add(later.clone()).await.unwrap();
        queue.add(future).await.unwrap();
        queue.add(earlier.clone()).await.unwrap();
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.next_due(now).unwrap().id, earlier.id);
        assert_eq!(queue.next_due(now).unwrap().id, later.id);
        assert!(queue.next_due(now).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let queue = MemoryQueue::with_capacity(1);

        queue.add(mail(Utc::now())).await.unwrap();
        let error = queue.add(mail(Utc::now())).await.unwrap_err();

        assert!(matches!(error, QueueError::Storage(_)));
        assert!(error.status().should_retry());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_work_wakes_on_add() {
        let queue = Arc::new(MemoryQueue::new());
        let unit = mail(Utc::now());

        let waiter = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.wait_for_work().await }
        });

        tokio::task::yield_now().await;
        queue.add(unit.clone()).await.unwrap();

        let taken = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(taken.id, unit.id);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_work_waits_for_schedule() {
        let queue = MemoryQueue::new();
        let unit = mail(Utc::now() + TimeDelta::milliseconds(50));
        queue.add(unit.clone()).await.unwrap();

        assert!(queue.next_due(Utc::now()).is_none());

        let taken = tokio::time::timeout(Duration::from_secs(5), queue.wait_for_work())
            .await
            .unwrap();
        assert_eq!(taken.id, unit.id);
    }
}
