use super::Message;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;
use tokio::sync::mpsc::UnboundedSender;

struct Peer {
    sender: UnboundedSender<Message>,
}

#[derive(Default)]
struct Inner {
    peers: HashMap<String, Peer>,
    rooms: HashMap<String, HashSet<String>>,
    queues: HashMap<String, VecDeque<Message>>,
}

/// Registry of live connections, rooms, and the optional offline queue
///
/// Writer-rare: membership changes take the write lock, broadcasts copy a
/// point-in-time snapshot of the targeted senders under the read lock and
/// deliver outside it, so a concurrent join or leave never affects a
/// broadcast already in flight.
pub struct BroadcastRegistry {
    inner: RwLock<Inner>,
    queue_enabled: bool,
    max_queue_size: usize,
}

impl BroadcastRegistry {
    pub fn new(queue_enabled: bool, max_queue_size: usize) -> Self {
        BroadcastRegistry {
            inner: RwLock::new(Inner::default()),
            queue_enabled,
            max_queue_size,
        }
    }

    /// Add a connection. Messages queued for this id while it was absent
    /// drain into its channel before anything newly sent.
    pub(crate) fn register(&self, id: &str, sender: UnboundedSender<Message>) {
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if let Some(pending) = inner.queues.remove(id) {
            for msg in pending {
                let _ = sender.send(msg);
            }
        }
        inner.peers.insert(id.to_string(), Peer { sender });
    }

    /// Remove a closed connection and purge its room memberships
    pub(crate) fn unregister(&self, id: &str) {
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        inner.peers.remove(id);
        inner.rooms.retain(|_, members| {
            members.remove(id);
            !members.is_empty()
        });
    }

    /// Join a room, creating it lazily. Returns false for unknown ids.
    pub fn join(&self, id: &str, room: &str) -> bool {
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        if !inner.peers.contains_key(id) {
            return false;
        }
        inner
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(id.to_string());
        true
    }

    /// Leave a room; an emptied room disappears
    pub fn leave(&self, id: &str, room: &str) {
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if let Some(members) = inner.rooms.get_mut(room) {
            members.remove(id);
            if members.is_empty() {
                inner.rooms.remove(room);
            }
        }
    }

    /// Deliver to every live connection not in the exclusion set
    pub fn broadcast(&self, msg: Message, except: &[&str]) {
        let targets = {
            let inner = match self.inner.read() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            inner
                .peers
                .iter()
                .filter(|(id, _)| !except.contains(&id.as_str()))
                .map(|(_, peer)| peer.sender.clone())
                .collect::<Vec<_>>()
        };
        for sender in targets {
            let _ = sender.send(msg.clone());
        }
    }

    /// Deliver to every member of a room not in the exclusion set
    pub fn broadcast_to_room(&self, room: &str, msg: Message, except: &[&str]) {
        let targets = {
            let inner = match self.inner.read() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            let members = match inner.rooms.get(room) {
                Some(members) => members,
                None => return,
            };
            members
                .iter()
                .filter(|id| !except.contains(&id.as_str()))
                .filter_map(|id| inner.peers.get(id))
                .map(|peer| peer.sender.clone())
                .collect::<Vec<_>>()
        };
        for sender in targets {
            let _ = sender.send(msg.clone());
        }
    }

    /// Deliver to one connection. An absent id gets the message queued when
    /// queueing is enabled, dropping at the tail once the queue is full.
    /// Returns true when delivered to a live connection.
    pub fn send_to(&self, id: &str, msg: Message) -> bool {
        let delivered = {
            let inner = match self.inner.read() {
                Ok(guard) => guard,
                Err(_) => return false,
            };
            match inner.peers.get(id) {
                Some(peer) => peer.sender.send(msg.clone()).is_ok(),
                None => false,
            }
        };
        if delivered {
            return true;
        }
        if self.queue_enabled {
            if let Ok(mut inner) = self.inner.write() {
                let queue = inner.queues.entry(id.to_string()).or_default();
                if queue.len() < self.max_queue_size {
                    queue.push_back(msg);
                }
            }
        }
        false
    }

    /// Ids of every room this connection joined
    pub fn rooms_of(&self, id: &str) -> Vec<String> {
        match self.inner.read() {
            Ok(inner) => inner
                .rooms
                .iter()
                .filter(|(_, members)| members.contains(id))
                .map(|(room, _)| room.clone())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.inner.read().map(|inner| inner.peers.len()).unwrap_or(0)
    }

    pub fn room_size(&self, room: &str) -> usize {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.rooms.get(room).map(|m| m.len()))
            .unwrap_or(0)
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.inner
            .read()
            .map(|inner| inner.peers.contains_key(id))
            .unwrap_or(false)
    }

    #[cfg(test)]
    fn queued_count(&self, id: &str) -> usize {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.queues.get(id).map(|q| q.len()))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn peer() -> (
        UnboundedSender<Message>,
        mpsc::UnboundedReceiver<Message>,
    ) {
        mpsc::unbounded_channel()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn broadcast_reaches_everyone_except_excluded() {
        let registry = BroadcastRegistry::new(false, 0);
        let (tx_a, mut rx_a) = peer();
        let (tx_b, mut rx_b) = peer();
        let (tx_c, mut rx_c) = peer();
        registry.register("a", tx_a);
        registry.register("b", tx_b);
        registry.register("c", tx_c);

        registry.broadcast(Message::text("hello"), &["b"]);

        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 0);
        assert_eq!(drain(&mut rx_c).len(), 1);
    }

    #[test]
    fn room_broadcast_scopes_to_members() {
        let registry = BroadcastRegistry::new(false, 0);
        let (tx_a, mut rx_a) = peer();
        let (tx_b, mut rx_b) = peer();
        registry.register("a", tx_a);
        registry.register("b", tx_b);
        assert!(registry.join("a", "lobby"));

        registry.broadcast_to_room("lobby", Message::text("hi"), &[]);
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 0);
    }

    #[test]
    fn empty_rooms_disappear() {
        let registry = BroadcastRegistry::new(false, 0);
        let (tx, _rx) = peer();
        registry.register("a", tx);

        registry.join("a", "lobby");
        assert_eq!(registry.room_size("lobby"), 1);
        registry.leave("a", "lobby");
        assert_eq!(registry.room_size("lobby"), 0);
        assert!(registry.rooms_of("a").is_empty());
    }

    #[test]
    fn close_purges_all_memberships() {
        let registry = BroadcastRegistry::new(false, 0);
        let (tx_a, _rx_a) = peer();
        let (tx_b, mut rx_b) = peer();
        registry.register("a", tx_a);
        registry.register("b", tx_b);
        registry.join("a", "one");
        registry.join("a", "two");
        registry.join("b", "one");

        registry.unregister("a");

        assert!(!registry.is_connected("a"));
        assert!(registry.rooms_of("a").is_empty());
        // "two" had only "a" and must be gone; "one" keeps "b"
        assert_eq!(registry.room_size("two"), 0);
        assert_eq!(registry.room_size("one"), 1);

        registry.broadcast(Message::text("after"), &[]);
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[test]
    fn offline_queue_caps_and_drains_on_reconnect() {
        let registry = BroadcastRegistry::new(true, 2);

        assert!(!registry.send_to("ghost", Message::text("m1")));
        assert!(!registry.send_to("ghost", Message::text("m2")));
        // over the cap: dropped at the tail
        assert!(!registry.send_to("ghost", Message::text("m3")));
        assert_eq!(registry.queued_count("ghost"), 2);

        let (tx, mut rx) = peer();
        registry.register("ghost", tx);
        registry.send_to("ghost", Message::text("live"));

        let got = drain(&mut rx);
        assert_eq!(got.len(), 3);
        assert!(matches!(&got[0], Message::Text(t) if t == "m1"));
        assert!(matches!(&got[1], Message::Text(t) if t == "m2"));
        assert!(matches!(&got[2], Message::Text(t) if t == "live"));
    }

    #[test]
    fn queue_disabled_drops_messages_for_absent_ids() {
        let registry = BroadcastRegistry::new(false, 0);
        assert!(!registry.send_to("ghost", Message::text("lost")));
        let (tx, mut rx) = peer();
        registry.register("ghost", tx);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn join_requires_live_connection() {
        let registry = BroadcastRegistry::new(false, 0);
        assert!(!registry.join("nobody", "lobby"));
        assert_eq!(registry.room_size("lobby"), 0);
    }
}
