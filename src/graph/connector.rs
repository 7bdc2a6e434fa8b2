//! Connector primitives: direct per-cycle slots and queued taps.
//!
//! A **direct** slot holds the value an output connector published during
//! the current cycle. Reads are fresh-only: a value published in cycle `n`
//! is invisible in cycle `n + 1`. Direct slots are valid only inside the
//! scheduling context that evaluates the graph.
//!
//! A **queued** connector carries one pending value across a context
//! boundary (typically from the acquisition thread to an observer). It
//! never grows: publishing into a full slot drops the oldest unread value
//! and counts the overflow, so a slow consumer can only ever lose data,
//! never stall the producer.

use crate::data::{Payload, PayloadKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Direction of a connector, as seen from its owning plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Declared name and payload kind of one plugin port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub name: String,
    pub kind: PayloadKind,
}

impl PortSpec {
    pub fn u32(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PayloadKind::U32,
        }
    }

    pub fn f64(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PayloadKind::F64,
        }
    }
}

/// Value slot behind an output connector. Fresh-only reads.
#[derive(Debug, Default)]
pub(crate) struct OutputSlot {
    value: Option<Payload>,
    cycle: u64,
}

impl OutputSlot {
    /// Store `value` as the output of cycle `cycle`, discarding the
    /// previous value.
    pub(crate) fn publish(&mut self, cycle: u64, value: Payload) {
        self.value = Some(value);
        self.cycle = cycle;
    }

    /// The value published during `cycle`, if any.
    pub(crate) fn read(&self, cycle: u64) -> Option<&Payload> {
        if self.cycle == cycle {
            self.value.as_ref()
        } else {
            None
        }
    }
}

struct QueueInner<T> {
    slot: Mutex<Option<T>>,
    overflows: AtomicU64,
    label: String,
}

/// Producer half of a queued connector.
pub struct QueuedSender<T> {
    inner: Arc<QueueInner<T>>,
}

/// Consumer half of a queued connector.
pub struct QueuedReceiver<T> {
    inner: Arc<QueueInner<T>>,
}

/// Create a queued connector pair with a diagnostic label.
pub fn queued<T>(label: impl Into<String>) -> (QueuedSender<T>, QueuedReceiver<T>) {
    let inner = Arc::new(QueueInner {
        slot: Mutex::new(None),
        overflows: AtomicU64::new(0),
        label: label.into(),
    });
    (
        QueuedSender {
            inner: Arc::clone(&inner),
        },
        QueuedReceiver { inner },
    )
}

impl<T> QueuedSender<T> {
    /// Buffer `value` for the consumer. If an unread value is pending it
    /// is dropped and the overflow is logged.
    pub fn send(&self, value: T) {
        let dropped = match self.inner.slot.lock() {
            Ok(mut slot) => slot.replace(value).is_some(),
            Err(poisoned) => poisoned.into_inner().replace(value).is_some(),
        };
        if dropped {
            let total = self.inner.overflows.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                connector = %self.inner.label,
                overflows = total,
                "queued connector overflow, dropped oldest value"
            );
        }
    }

    /// Total number of values dropped on overflow.
    pub fn overflows(&self) -> u64 {
        self.inner.overflows.load(Ordering::Relaxed)
    }
}

impl<T> QueuedReceiver<T> {
    /// Take the pending value, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        match self.inner.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Total number of values dropped on overflow.
    pub fn overflows(&self) -> u64 {
        self.inner.overflows.load(Ordering::Relaxed)
    }
}

impl<T> std::fmt::Debug for QueuedSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedSender")
            .field("label", &self.inner.label)
            .finish()
    }
}

impl<T> std::fmt::Debug for QueuedReceiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedReceiver")
            .field("label", &self.inner.label)
            .finish()
    }
}

/// Queued connector carrying graph payloads to another context.
pub type PayloadTap = QueuedReceiver<Payload>;
pub(crate) type PayloadTapSender = QueuedSender<Payload>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_slot_reads_are_fresh_only() {
        let mut slot = OutputSlot::default();
        slot.publish(1, Payload::from_u32(vec![7]));
        assert!(slot.read(1).is_some());
        assert!(slot.read(2).is_none());
    }

    #[test]
    fn publish_replaces_prior_value() {
        let mut slot = OutputSlot::default();
        slot.publish(1, Payload::from_u32(vec![1]));
        slot.publish(1, Payload::from_u32(vec![2]));
        assert_eq!(slot.read(1).and_then(Payload::as_u32), Some(&[2u32][..]));
    }

    #[test]
    fn queued_delivers_in_order_without_overflow() {
        let (tx, rx) = queued::<u32>("test");
        tx.send(1);
        assert_eq!(rx.take(), Some(1));
        tx.send(2);
        assert_eq!(rx.take(), Some(2));
        assert_eq!(rx.take(), None);
        assert_eq!(tx.overflows(), 0);
    }

    #[test]
    fn queued_overflow_drops_oldest() {
        let (tx, rx) = queued::<u32>("test");
        tx.send(1);
        tx.send(2);
        tx.send(3);
        // Only the newest value survives.
        assert_eq!(rx.take(), Some(3));
        assert_eq!(rx.take(), None);
        assert_eq!(tx.overflows(), 2);
    }

    #[test]
    fn queued_crosses_threads() {
        let (tx, rx) = queued::<u64>("cross-thread");
        let handle = std::thread::spawn(move || {
            for i in 0..100u64 {
                tx.send(i);
            }
        });
        handle.join().unwrap();
        // Whatever survived must be the newest value.
        assert_eq!(rx.take(), Some(99));
    }
}
