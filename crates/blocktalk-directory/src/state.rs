//! The room table one backend replica keeps, and the two-phase
//! queue/process protocol that mutates it.
//!
//! Every replica receives the same operation ids in the same two phases,
//! so tokens derived from the id agree across replicas without any
//! coordination between them.

use std::collections::{BTreeMap, HashMap, VecDeque};

use blocktalk_protocol::{Message, Uuid};

use crate::DirectoryError;
use crate::config::DEFAULT_COMPLETED_CACHE;

/// Room adverts keyed by token, plus operations waiting to be processed.
#[derive(Debug)]
pub struct DirectoryState {
    rooms: BTreeMap<String, Vec<u8>>,
    pending: HashMap<Uuid, Message>,
    completed: HashMap<Uuid, Message>,
    completed_order: VecDeque<Uuid>,
    completed_limit: usize,
}

impl Default for DirectoryState {
    fn default() -> Self {
        Self::new(DEFAULT_COMPLETED_CACHE)
    }
}

impl DirectoryState {
    /// Creates an empty table that remembers the results of the last
    /// `completed_limit` operations.
    pub fn new(completed_limit: usize) -> Self {
        Self {
            rooms: BTreeMap::new(),
            pending: HashMap::new(),
            completed: HashMap::new(),
            completed_order: VecDeque::new(),
            completed_limit: completed_limit.max(1),
        }
    }

    /// Phase one: store `message` under `id` and return the `Process`
    /// echo. Queuing the same id again is harmless.
    pub fn queue(&mut self, id: Uuid, message: Message) -> Message {
        if !self.completed.contains_key(&id) {
            self.pending.insert(id, message);
        }
        Message::Process { operation_id: id }
    }

    /// Phase two: apply the operation queued under `id` and return its
    /// result. A retried `process` replays the cached result.
    pub fn process(&mut self, id: Uuid) -> Result<Message, DirectoryError> {
        if let Some(result) = self.completed.get(&id) {
            return Ok(result.clone());
        }
        let message = self
            .pending
            .remove(&id)
            .ok_or(DirectoryError::UnknownOperation(id))?;
        let result = self.apply(id, message)?;
        self.remember(id, result.clone());
        Ok(result)
    }

    fn apply(&mut self, id: Uuid, message: Message) -> Result<Message, DirectoryError> {
        match message {
            Message::HostRoom { payload } => {
                let token = id.simple().to_string();
                self.rooms.insert(token.clone(), payload);
                tracing::debug!(%token, rooms = self.rooms.len(), "room registered");
                Ok(Message::Ack { info: token })
            }
            Message::HostUpdated { token, payload } => {
                // A replica that missed the original registration still
                // takes the new advert.
                if self.rooms.insert(token.clone(), payload).is_none() {
                    tracing::debug!(%token, "advert replaced for unknown token");
                }
                Ok(Message::Ack { info: token })
            }
            Message::RequestRoomList => Ok(Message::RoomList {
                entries: self.rooms.values().cloned().collect(),
            }),
            other => Err(DirectoryError::Unsupported(other.label())),
        }
    }

    fn remember(&mut self, id: Uuid, result: Message) {
        if self.completed_order.len() == self.completed_limit {
            if let Some(oldest) = self.completed_order.pop_front() {
                self.completed.remove(&oldest);
            }
        }
        self.completed_order.push_back(id);
        self.completed.insert(id, result);
    }

    /// Number of registered rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// The advert stored under `token`, if any.
    pub fn advert(&self, token: &str) -> Option<&[u8]> {
        self.rooms.get(token).map(Vec::as_slice)
    }

    /// Number of queued operations not yet processed.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn host(state: &mut DirectoryState, payload: &[u8]) -> String {
        let id = Uuid::new_v4();
        state.queue(
            id,
            Message::HostRoom {
                payload: payload.to_vec(),
            },
        );
        match state.process(id).unwrap() {
            Message::Ack { info } => info,
            other => panic!("expected Ack, got {other:?}"),
        }
    }

    fn list(state: &mut DirectoryState) -> Vec<Vec<u8>> {
        let id = Uuid::new_v4();
        state.queue(id, Message::RequestRoomList);
        match state.process(id).unwrap() {
            Message::RoomList { entries } => entries,
            other => panic!("expected RoomList, got {other:?}"),
        }
    }

    // =====================================================================
    // queue()
    // =====================================================================

    #[test]
    fn test_queue_returns_process_echo() {
        let mut state = DirectoryState::default();
        let id = Uuid::new_v4();
        let echo = state.queue(id, Message::RequestRoomList);
        assert_eq!(echo, Message::Process { operation_id: id });
        assert_eq!(state.pending_count(), 1);
    }

    #[test]
    fn test_queue_same_id_twice_keeps_one_entry() {
        let mut state = DirectoryState::default();
        let id = Uuid::new_v4();
        state.queue(id, Message::RequestRoomList);
        state.queue(id, Message::RequestRoomList);
        assert_eq!(state.pending_count(), 1);
    }

    #[test]
    fn test_queue_after_process_does_not_reapply() {
        let mut state = DirectoryState::default();
        let id = Uuid::new_v4();
        state.queue(
            id,
            Message::HostRoom {
                payload: b"a".to_vec(),
            },
        );
        state.process(id).unwrap();
        state.queue(
            id,
            Message::HostRoom {
                payload: b"a".to_vec(),
            },
        );
        assert_eq!(state.pending_count(), 0);
        assert_eq!(state.room_count(), 1);
    }

    // =====================================================================
    // process()
    // =====================================================================

    #[test]
    fn test_process_host_room_token_is_operation_id() {
        let mut state = DirectoryState::default();
        let id = Uuid::new_v4();
        state.queue(
            id,
            Message::HostRoom {
                payload: b"advert".to_vec(),
            },
        );
        let result = state.process(id).unwrap();
        let token = id.simple().to_string();
        assert_eq!(
            result,
            Message::Ack {
                info: token.clone()
            }
        );
        assert_eq!(state.advert(&token), Some(&b"advert"[..]));
    }

    #[test]
    fn test_process_same_id_on_two_replicas_gives_same_token() {
        let mut a = DirectoryState::default();
        let mut b = DirectoryState::default();
        let id = Uuid::new_v4();
        let msg = Message::HostRoom {
            payload: b"x".to_vec(),
        };
        a.queue(id, msg.clone());
        b.queue(id, msg);
        assert_eq!(a.process(id).unwrap(), b.process(id).unwrap());
    }

    #[test]
    fn test_process_retry_replays_result() {
        let mut state = DirectoryState::default();
        let id = Uuid::new_v4();
        state.queue(
            id,
            Message::HostRoom {
                payload: b"a".to_vec(),
            },
        );
        let first = state.process(id).unwrap();
        let second = state.process(id).unwrap();
        assert_eq!(first, second);
        assert_eq!(state.room_count(), 1);
    }

    #[test]
    fn test_process_unknown_id_errors() {
        let mut state = DirectoryState::default();
        let id = Uuid::new_v4();
        assert!(matches!(
            state.process(id),
            Err(DirectoryError::UnknownOperation(got)) if got == id
        ));
    }

    #[test]
    fn test_process_unsupported_message_errors() {
        let mut state = DirectoryState::default();
        let id = Uuid::new_v4();
        state.queue(id, Message::LeaderVote);
        assert!(matches!(
            state.process(id),
            Err(DirectoryError::Unsupported(_))
        ));
    }

    #[test]
    fn test_process_room_list_in_token_order() {
        let mut state = DirectoryState::default();
        let t1 = host(&mut state, b"one");
        let t2 = host(&mut state, b"two");
        let mut expected = vec![(t1, b"one".to_vec()), (t2, b"two".to_vec())];
        expected.sort();
        let entries: Vec<Vec<u8>> = expected.into_iter().map(|(_, p)| p).collect();
        assert_eq!(list(&mut state), entries);
    }

    #[test]
    fn test_process_room_list_empty() {
        let mut state = DirectoryState::default();
        assert!(list(&mut state).is_empty());
    }

    #[test]
    fn test_process_host_updated_replaces_advert() {
        let mut state = DirectoryState::default();
        let token = host(&mut state, b"old");
        let id = Uuid::new_v4();
        state.queue(
            id,
            Message::HostUpdated {
                token: token.clone(),
                payload: b"new".to_vec(),
            },
        );
        assert_eq!(
            state.process(id).unwrap(),
            Message::Ack {
                info: token.clone()
            }
        );
        assert_eq!(state.room_count(), 1);
        assert_eq!(state.advert(&token), Some(&b"new"[..]));
    }

    #[test]
    fn test_process_host_updated_unknown_token_inserts() {
        let mut state = DirectoryState::default();
        let id = Uuid::new_v4();
        state.queue(
            id,
            Message::HostUpdated {
                token: "abc".into(),
                payload: b"p".to_vec(),
            },
        );
        state.process(id).unwrap();
        assert_eq!(state.advert("abc"), Some(&b"p"[..]));
    }

    #[test]
    fn test_completed_cache_is_bounded() {
        let mut state = DirectoryState::new(2);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            state.queue(*id, Message::RequestRoomList);
            state.process(*id).unwrap();
        }
        // The oldest result was evicted.
        assert!(state.process(ids[0]).is_err());
        assert!(state.process(ids[2]).is_ok());
    }
}
