//! Streaming client slots
//!
//! Bounded admission per resolution class. Check-and-increment happens
//! under one lock so two near-simultaneous acquires cannot both pass the
//! cap. Slots release on drop; no queueing, no fairness guarantee.

use crate::arbiter::state::ResolutionClass;
use crate::error::{ArbiterError, ArbiterResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug)]
struct SlotsInner {
    max_clients: usize,
    counts: Mutex<HashMap<ResolutionClass, usize>>,
}

/// Shared slot accounting. Clone-cheap.
#[derive(Debug, Clone)]
pub struct ClientSlots {
    inner: Arc<SlotsInner>,
}

impl ClientSlots {
    pub fn new(max_clients: usize) -> Self {
        Self {
            inner: Arc::new(SlotsInner {
                max_clients,
                counts: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Claim a slot for one connected client.
    pub fn acquire(&self, class: ResolutionClass) -> ArbiterResult<ClientSlot> {
        let mut counts = self.inner.counts.lock();
        let count = counts.entry(class).or_insert(0);
        if *count >= self.inner.max_clients {
            return Err(ArbiterError::TooManyClients {
                class,
                max: self.inner.max_clients,
            });
        }
        *count += 1;
        let slot = ClientSlot {
            id: Uuid::new_v4(),
            class,
            slots: Arc::clone(&self.inner),
        };
        tracing::debug!("client {} connected ({}, {}/{})", slot.id, class, count, self.inner.max_clients);
        Ok(slot)
    }

    /// Currently held slots for a class.
    pub fn active(&self, class: ResolutionClass) -> usize {
        self.inner.counts.lock().get(&class).copied().unwrap_or(0)
    }
}

/// One connected streaming client. Dropping it frees the slot.
#[derive(Debug)]
pub struct ClientSlot {
    id: Uuid,
    class: ResolutionClass,
    slots: Arc<SlotsInner>,
}

impl ClientSlot {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn class(&self) -> ResolutionClass {
        self.class
    }
}

impl Drop for ClientSlot {
    fn drop(&mut self) {
        let mut counts = self.slots.counts.lock();
        if let Some(count) = counts.get_mut(&self.class) {
            *count = count.saturating_sub(1);
        }
        tracing::debug!("client {} disconnected ({})", self.id, self.class);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_is_enforced_per_class() {
        let slots = ClientSlots::new(2);
        let _a = slots.acquire(ResolutionClass::Sd480).unwrap();
        let _b = slots.acquire(ResolutionClass::Sd480).unwrap();
        assert!(matches!(
            slots.acquire(ResolutionClass::Sd480),
            Err(ArbiterError::TooManyClients { max: 2, .. })
        ));
        // A different class has its own budget.
        let _c = slots.acquire(ResolutionClass::Hd720).unwrap();
    }

    #[test]
    fn dropping_a_slot_frees_capacity() {
        let slots = ClientSlots::new(1);
        let slot = slots.acquire(ResolutionClass::Sd480).unwrap();
        assert!(slots.acquire(ResolutionClass::Sd480).is_err());
        drop(slot);
        assert_eq!(slots.active(ResolutionClass::Sd480), 0);
        let _again = slots.acquire(ResolutionClass::Sd480).unwrap();
    }

    #[test]
    fn concurrent_acquires_never_exceed_cap() {
        let slots = ClientSlots::new(2);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let slots = slots.clone();
            handles.push(std::thread::spawn(move || {
                slots.acquire(ResolutionClass::Sd480).map(|slot| {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    drop(slot);
                })
            }));
        }
        for handle in handles {
            let _ = handle.join().unwrap();
        }
        assert_eq!(slots.active(ResolutionClass::Sd480), 0);
    }
}
