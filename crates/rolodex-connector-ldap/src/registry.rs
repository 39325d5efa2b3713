//! Operation registry
//!
//! In-flight operations live in an arena of generation-checked slots and are
//! indexed by the message id their next completion will carry. A key handed
//! out for one operation never resolves to a later occupant of the same slot.

use std::collections::HashMap;
use tokio::sync::oneshot;

use rolodex_connector::error::{ConnectorError, ConnectorResult};
use rolodex_connector::traits::{ViewEvent, ViewSender};

use crate::client::MsgId;

/// Handle to one registered operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpKey {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Tracked<T> {
    msgid: MsgId,
    value: T,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    entry: Option<Tracked<T>>,
}

/// Arena of in-flight operations keyed by message id.
#[derive(Debug)]
pub struct Registry<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    by_msgid: HashMap<MsgId, OpKey>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_msgid: HashMap::new(),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_msgid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_msgid.is_empty()
    }

    /// Track `value` under `msgid`. Message ids must be unique among live
    /// operations.
    pub fn register(&mut self, msgid: MsgId, value: T) -> ConnectorResult<OpKey> {
        if self.by_msgid.contains_key(&msgid) {
            return Err(ConnectorError::internal(format!(
                "message id {msgid} is already in use"
            )));
        }

        let entry = Some(Tracked { msgid, value });
        let key = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = entry;
                OpKey {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = u32::try_from(self.slots.len())
                    .map_err(|_| ConnectorError::internal("operation registry is full"))?;
                self.slots.push(Slot {
                    generation: 0,
                    entry,
                });
                OpKey {
                    index,
                    generation: 0,
                }
            }
        };

        self.by_msgid.insert(msgid, key);
        Ok(key)
    }

    fn slot(&self, key: OpKey) -> Option<&Tracked<T>> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn slot_mut(&mut self, key: OpKey) -> Option<&mut Tracked<T>> {
        self.slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    /// Key of the operation waiting on `msgid`.
    pub fn key_of(&self, msgid: MsgId) -> Option<OpKey> {
        self.by_msgid.get(&msgid).copied()
    }

    pub fn msgid(&self, key: OpKey) -> Option<MsgId> {
        self.slot(key).map(|t| t.msgid)
    }

    pub fn get(&self, key: OpKey) -> Option<&T> {
        self.slot(key).map(|t| &t.value)
    }

    pub fn get_mut(&mut self, key: OpKey) -> Option<&mut T> {
        self.slot_mut(key).map(|t| &mut t.value)
    }

    /// Move an operation to the id of its follow-up request.
    pub fn retrack(&mut self, key: OpKey, msgid: MsgId) -> ConnectorResult<()> {
        if self.by_msgid.get(&msgid).is_some_and(|k| *k != key) {
            return Err(ConnectorError::internal(format!(
                "message id {msgid} is already in use"
            )));
        }
        let tracked = self
            .slot_mut(key)
            .ok_or_else(|| ConnectorError::internal("operation is no longer registered"))?;
        let old = std::mem::replace(&mut tracked.msgid, msgid);
        self.by_msgid.remove(&old);
        self.by_msgid.insert(msgid, key);
        Ok(())
    }

    /// Remove an operation, invalidating its key.
    pub fn finish(&mut self, key: OpKey) -> Option<T> {
        let slot = self
            .slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)?;
        let tracked = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.by_msgid.remove(&tracked.msgid);
        Some(tracked.value)
    }

    /// Remove every operation.
    pub fn drain(&mut self) -> Vec<(MsgId, T)> {
        let keys: Vec<OpKey> = self.by_msgid.values().copied().collect();
        keys.into_iter()
            .filter_map(|key| {
                let msgid = self.msgid(key)?;
                self.finish(key).map(|value| (msgid, value))
            })
            .collect()
    }

    /// Live operations in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (OpKey, &T)> + '_ {
        self.by_msgid
            .values()
            .filter_map(|key| self.get(*key).map(|value| (*key, value)))
    }
}

/// One-shot reply channel that answers `Cancelled` if dropped unanswered.
#[derive(Debug)]
pub struct Responder<T> {
    tx: Option<oneshot::Sender<ConnectorResult<T>>>,
}

impl<T> Responder<T> {
    pub fn new(tx: oneshot::Sender<ConnectorResult<T>>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Responder plus the receiver its reply arrives on.
    pub fn channel() -> (Self, oneshot::Receiver<ConnectorResult<T>>) {
        let (tx, rx) = oneshot::channel();
        (Self::new(tx), rx)
    }

    pub fn send(mut self, result: ConnectorResult<T>) {
        if let Some(tx) = self.tx.take() {
            // The caller may have stopped waiting.
            let _ = tx.send(result);
        }
    }
}

impl<T> Drop for Responder<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(ConnectorError::Cancelled));
        }
    }
}

/// Event stream of a live search; completes with `Cancelled` if dropped.
#[derive(Debug)]
pub struct ViewSink {
    tx: Option<ViewSender>,
}

impl ViewSink {
    pub fn new(tx: ViewSender) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn send(&self, event: ViewEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn complete(mut self, result: ConnectorResult<()>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(ViewEvent::Complete(result));
        }
    }
}

impl Drop for ViewSink {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(ViewEvent::Complete(Err(ConnectorError::Cancelled)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_register_and_finish() {
        let mut registry = Registry::new();
        let key = registry.register(7, "search").unwrap();

        assert_eq!(registry.key_of(7), Some(key));
        assert_eq!(registry.get(key), Some(&"search"));
        assert_eq!(registry.finish(key), Some("search"));
        assert!(registry.is_empty());
        assert_eq!(registry.finish(key), None);
        assert_eq!(registry.key_of(7), None);
    }

    #[test]
    fn test_duplicate_msgid_is_rejected() {
        let mut registry = Registry::new();
        registry.register(1, ()).unwrap();
        assert!(registry.register(1, ()).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stale_key_does_not_reach_new_occupant() {
        let mut registry = Registry::new();
        let old = registry.register(1, "first").unwrap();
        registry.finish(old);
        let new = registry.register(2, "second").unwrap();

        assert_ne!(old, new);
        assert_eq!(registry.get(old), None);
        assert_eq!(registry.get_mut(old), None);
        assert_eq!(registry.get(new), Some(&"second"));
    }

    #[test]
    fn test_retrack_moves_msgid() {
        let mut registry = Registry::new();
        let key = registry.register(3, "modify").unwrap();
        let other = registry.register(4, "other").unwrap();

        registry.retrack(key, 9).unwrap();
        assert_eq!(registry.key_of(3), None);
        assert_eq!(registry.key_of(9), Some(key));
        assert_eq!(registry.msgid(key), Some(9));

        assert!(registry.retrack(key, 4).is_err());
        assert_eq!(registry.key_of(4), Some(other));
    }

    #[tokio::test]
    async fn test_dropped_responder_replies_cancelled() {
        let (responder, rx) = Responder::<u32>::channel();
        drop(responder);
        assert!(matches!(rx.await, Ok(Err(ConnectorError::Cancelled))));

        let (responder, rx) = Responder::<u32>::channel();
        responder.send(Ok(5));
        assert!(matches!(rx.await, Ok(Ok(5))));
    }

    #[tokio::test]
    async fn test_dropped_view_sink_completes_cancelled() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ViewSink::new(tx);
        sink.send(ViewEvent::Status(None));
        drop(sink);

        assert!(matches!(rx.recv().await, Some(ViewEvent::Status(None))));
        assert!(matches!(
            rx.recv().await,
            Some(ViewEvent::Complete(Err(ConnectorError::Cancelled)))
        ));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_interleaved_completions_and_cancellations() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..50 {
            let mut registry = Registry::new();
            let mut receivers = Vec::new();
            let mut next_msgid: MsgId = 1;

            for round in 0..200 {
                match rng.gen_range(0..10) {
                    0..=3 => {
                        let (responder, rx) = Responder::<usize>::channel();
                        registry.register(next_msgid, responder).unwrap();
                        next_msgid += 1;
                        receivers.push(rx);
                    }
                    4..=6 if !registry.is_empty() => {
                        let msgid = rng.gen_range(1..next_msgid);
                        if let Some(key) = registry.key_of(msgid) {
                            let responder = registry.finish(key).unwrap();
                            responder.send(Ok(round));
                        }
                    }
                    7 if !registry.is_empty() => {
                        let msgid = rng.gen_range(1..next_msgid);
                        if let Some(key) = registry.key_of(msgid) {
                            registry.retrack(key, next_msgid).unwrap();
                            next_msgid += 1;
                        }
                    }
                    8 => {
                        let msgid = rng.gen_range(1..next_msgid.max(2));
                        if let Some(key) = registry.key_of(msgid) {
                            drop(registry.finish(key));
                        }
                    }
                    9 if rng.gen_bool(0.1) => {
                        drop(registry.drain());
                    }
                    _ => {}
                }
            }
            drop(registry.drain());

            for mut rx in receivers {
                let outcome = rx.try_recv().expect("every operation replies exactly once");
                assert!(matches!(outcome, Ok(_) | Err(ConnectorError::Cancelled)));
            }
        }
    }
}
