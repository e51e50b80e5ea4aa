//! In-memory relay pool with fault injection.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use marmot_client::{Publisher, TransportError};
use marmot_proto::{Event, kind, tag};

/// How the relay misbehaves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Fault {
    /// Accept everything
    #[default]
    None,
    /// Every publish fails as unreachable
    Down,
    /// Events of this kind are rejected
    RejectKind(u16),
}

/// An accepted event and the relays it was sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// The event as published
    pub event: Event,
    /// Relay URLs named by the publisher
    pub relays: Vec<String>,
}

#[derive(Debug, Default)]
struct RelayState {
    accepted: Vec<Published>,
    fault: Fault,
    fail_next: usize,
    attempts: usize,
}

/// Relay pool shared by every client in a scenario.
///
/// Clones share state. Accepted events are kept in publication order and can
/// be queried by group or recipient.
///
/// Uses `lock().expect()`, which panics if the mutex is poisoned. Acceptable
/// for test and simulation code.
#[derive(Debug, Clone, Default)]
pub struct SimRelay {
    inner: Arc<Mutex<RelayState>>,
}

impl SimRelay {
    /// Relay that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch the standing fault.
    #[allow(clippy::expect_used)]
    pub fn set_fault(&self, fault: Fault) {
        self.inner.lock().expect("Mutex poisoned").fault = fault;
    }

    /// Fail the next `count` publishes as timeouts, then recover.
    #[allow(clippy::expect_used)]
    pub fn fail_next(&self, count: usize) {
        self.inner.lock().expect("Mutex poisoned").fail_next = count;
    }

    /// Publish calls seen, failed ones included.
    #[allow(clippy::expect_used)]
    pub fn attempts(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").attempts
    }

    /// Every accepted event, oldest first.
    #[allow(clippy::expect_used)]
    pub fn published(&self) -> Vec<Published> {
        self.inner.lock().expect("Mutex poisoned").accepted.clone()
    }

    /// Accepted events of `kind`.
    pub fn events_of_kind(&self, kind: u16) -> Vec<Event> {
        self.filter(|event| event.kind == kind)
    }

    /// Accepted group events addressed to `transport_group_id`.
    pub fn group_events(&self, transport_group_id: &[u8; 32]) -> Vec<Event> {
        self.filter(|event| {
            event.kind == kind::GROUP_EVENT
                && event.transport_group_id().is_ok_and(|id| id == *transport_group_id)
        })
    }

    /// Accepted gift wraps addressed to `identity`.
    pub fn gift_wraps_for(&self, identity: &[u8; 32]) -> Vec<Event> {
        let recipient = hex::encode(identity);
        self.filter(|event| {
            event.kind == kind::GIFT_WRAP
                && event.required_tag(tag::RECIPIENT).is_ok_and(|p| p == recipient)
        })
    }

    #[allow(clippy::expect_used)]
    fn filter(&self, keep: impl Fn(&Event) -> bool) -> Vec<Event> {
        let state = self.inner.lock().expect("Mutex poisoned");
        state.accepted.iter().map(|p| &p.event).filter(|e| keep(e)).cloned().collect()
    }
}

#[async_trait]
impl Publisher for SimRelay {
    #[allow(clippy::expect_used)]
    async fn publish(&self, event: &Event, relays: &[String]) -> Result<(), TransportError> {
        let mut state = self.inner.lock().expect("Mutex poisoned");
        state.attempts += 1;

        if state.fail_next > 0 {
            state.fail_next -= 1;
            tracing::debug!(kind = event.kind, "relay timing out");
            return Err(TransportError::Timeout);
        }

        match state.fault {
            Fault::None => {},
            Fault::Down => {
                return Err(TransportError::Unreachable(relays.join(",")));
            },
            Fault::RejectKind(rejected) if rejected == event.kind => {
                return Err(TransportError::Rejected {
                    relay: relays.first().cloned().unwrap_or_default(),
                    reason: format!("kind {rejected} not accepted"),
                });
            },
            Fault::RejectKind(_) => {},
        }

        state.accepted.push(Published { event: event.clone(), relays: relays.to_vec() });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relays() -> Vec<String> {
        vec!["wss://relay.example".to_string()]
    }

    #[tokio::test]
    async fn accepted_events_are_queryable_by_group() {
        let relay = SimRelay::new();
        let event = Event::group_event(&[4; 32], 1, b"commit");
        let other = Event::group_event(&[5; 32], 1, b"commit");

        relay.publish(&event, &relays()).await.expect("publish");
        relay.publish(&other, &relays()).await.expect("publish");

        assert_eq!(relay.group_events(&[4; 32]), vec![event]);
        assert_eq!(relay.published().len(), 2);
    }

    #[tokio::test]
    async fn fail_next_recovers() {
        let relay = SimRelay::new();
        relay.fail_next(1);
        let event = Event::with_payload(kind::KEY_PACKAGE, 1, b"kp");

        assert_eq!(relay.publish(&event, &relays()).await, Err(TransportError::Timeout));
        assert_eq!(relay.publish(&event, &relays()).await, Ok(()));
        assert_eq!(relay.attempts(), 2);
        assert_eq!(relay.events_of_kind(kind::KEY_PACKAGE).len(), 1);
    }

    #[tokio::test]
    async fn rejects_only_the_named_kind() {
        let relay = SimRelay::new();
        relay.set_fault(Fault::RejectKind(kind::GIFT_WRAP));

        let wrap = Event::with_payload(kind::GIFT_WRAP, 1, b"w");
        let group = Event::group_event(&[1; 32], 1, b"m");

        assert!(matches!(
            relay.publish(&wrap, &relays()).await,
            Err(TransportError::Rejected { .. })
        ));
        assert_eq!(relay.publish(&group, &relays()).await, Ok(()));
    }
}
