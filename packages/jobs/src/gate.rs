//! Orders a job's outcome after its `JobAdded` event.
//!
//! A broker may deliver a job before `push` has returned its id. Each push
//! takes a ticket for its pipeline and releases it once `JobAdded` (or
//! `PushError`) was emitted. A delivered job waits only for the tickets
//! that were already open when it arrived, and stops waiting as soon as
//! its own id is announced. Pushes never wait on anything.

use std::collections::{BTreeSet, HashMap};
use std::pin::pin;
use std::sync::{Mutex, MutexGuard, PoisonError};

use jobs_core::JobId;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct GateState {
    next: u64,
    /// Tickets of pushes still in flight.
    pushing: BTreeSet<u64>,
    /// Delivered jobs waiting for their announcement; `true` once announced.
    waiting: HashMap<JobId, bool>,
}

#[derive(Debug, Default)]
pub(crate) struct AddedGate {
    state: Mutex<GateState>,
    notify: Notify,
}

/// An open push. Dropping it without [`PushTicket::announce`] releases it
/// too, so a cancelled push never blocks deliveries.
pub(crate) struct PushTicket<'a> {
    gate: &'a AddedGate,
    ticket: u64,
}

impl AddedGate {
    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a ticket before handing a job to the broker.
    pub(crate) fn begin(&self) -> PushTicket<'_> {
        let mut state = self.state();
        let ticket = state.next;
        state.next += 1;
        state.pushing.insert(ticket);
        PushTicket { gate: self, ticket }
    }

    /// Wait until `id` was announced, or every push that was open on
    /// arrival has finished.
    pub(crate) async fn wait_added(&self, id: &JobId) {
        let bound = {
            let mut state = self.state();
            if state.pushing.is_empty() {
                return;
            }
            state.waiting.insert(id.clone(), false);
            state.next
        };

        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            {
                let mut state = self.state();
                let announced = state.waiting.get(id).copied().unwrap_or(true);
                if announced || state.pushing.range(..bound).next().is_none() {
                    state.waiting.remove(id);
                    return;
                }
            }

            notified.await;
        }
    }

    fn release(&self, ticket: u64, id: Option<&JobId>) {
        {
            let mut state = self.state();
            state.pushing.remove(&ticket);
            if let Some(id) = id
                && let Some(announced) = state.waiting.get_mut(id)
            {
                *announced = true;
            }
        }
        self.notify.notify_waiters();
    }
}

impl PushTicket<'_> {
    /// `JobAdded` for `id` has been emitted.
    pub(crate) fn announce(self, id: &JobId) {
        self.gate.release(self.ticket, Some(id));
        std::mem::forget(self);
    }
}

impl Drop for PushTicket<'_> {
    fn drop(&mut self) {
        self.gate.release(self.ticket, None);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn no_open_pushes_means_no_wait() {
        let gate = AddedGate::default();
        tokio::time::timeout(Duration::from_millis(100), gate.wait_added(&JobId::from("a")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delivery_waits_for_its_announcement() {
        let gate = Arc::new(AddedGate::default());
        let id = JobId::from("a");
        let ticket = gate.begin();

        let waiter = {
            let gate = gate.clone();
            let id = id.clone();
            tokio::spawn(async move { gate.wait_added(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        ticket.announce(&id);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(gate.state().waiting.is_empty());
    }

    #[tokio::test]
    async fn announcement_releases_before_unrelated_pushes_finish() {
        let gate = Arc::new(AddedGate::default());
        let id = JobId::from("a");
        let slow = gate.begin();
        let own = gate.begin();

        let waiter = {
            let gate = gate.clone();
            let id = id.clone();
            tokio::spawn(async move { gate.wait_added(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        own.announce(&id);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        drop(slow);
    }

    #[tokio::test]
    async fn later_pushes_do_not_hold_back_a_delivery() {
        let gate = Arc::new(AddedGate::default());
        let earlier = gate.begin();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_added(&JobId::from("foreign")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _later = gate.begin();

        // a cancelled push releases its ticket
        drop(earlier);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
