use chashmap::CHashMap;
use proto::{PeerId, RelayMessage, Signal};
use tokio::sync::mpsc::UnboundedSender;

use crate::names;

/// Gives up finding a free name after this many collisions.
const MAX_NAME_ATTEMPTS: usize = 16;

pub type Outbox = UnboundedSender<RelayMessage>;

/// Who is connected, and how to reach them.
///
/// The relay never looks into signals, it only attaches the sender and
/// passes them on. Each connection owns a writer task fed by its [`Outbox`],
/// so nothing here awaits while holding a map lock.
pub struct Directory {
    peers: CHashMap<PeerId, Outbox>,
    limit: usize,
}

impl Directory {
    pub fn new(limit: usize) -> Self {
        Self {
            peers: CHashMap::new(),
            limit,
        }
    }

    /// Registers a new connection. The id goes out as `Welcome` before any
    /// roster update.
    ///
    /// Returns `None` if the relay is full.
    pub fn admit(&self, outbox: Outbox) -> Option<PeerId> {
        if self.peers.len() >= self.limit {
            warn!("refusing connection, {} peers connected", self.peers.len());
            return None;
        }
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_NAME_ATTEMPTS {
            let id = names::generate(&mut rng);
            let mut taken = false;
            self.peers.alter(id.clone(), |old| {
                if old.is_some() {
                    taken = true;
                    old
                } else {
                    // welcome goes in before the sender becomes visible to broadcasts
                    let _ = outbox.send(RelayMessage::Welcome { id: id.clone() });
                    Some(outbox.clone())
                }
            });
            if !taken {
                info!("{id} joined");
                self.broadcast_roster();
                return Some(id);
            }
            debug!("name {id} is taken, trying another one");
        }
        warn!("no free name found");
        None
    }

    pub fn leave(&self, id: &PeerId) {
        if self.peers.remove(id).is_some() {
            info!("{id} left");
            self.broadcast_roster();
        }
    }

    /// Passes `signal` on to `to`, or tells `from` that it could not.
    pub fn forward(&self, from: &PeerId, to: PeerId, signal: Signal) {
        let kind = signal.kind();
        let delivered = match self.peers.get(&to) {
            Some(outbox) => outbox
                .send(RelayMessage::Signal {
                    from: from.clone(),
                    signal,
                })
                .is_ok(),
            None => false,
        };
        if delivered {
            trace!("{kind} {from} -> {to}");
        } else {
            debug!("{kind} from {from} to unknown peer {to}");
            self.send(from, RelayMessage::Undeliverable { to });
        }
    }

    pub fn send(&self, to: &PeerId, msg: RelayMessage) {
        if let Some(outbox) = self.peers.get(to) {
            let _ = outbox.send(msg);
        }
    }

    /// Currently connected peers in stable order.
    pub fn roster(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.peers.clone().into_iter().map(|(id, _)| id).collect();
        peers.sort();
        peers
    }

    fn broadcast_roster(&self) {
        let snapshot = self.peers.clone();
        let mut peers: Vec<PeerId> = vec![];
        let mut outboxes: Vec<Outbox> = vec![];
        for (id, outbox) in snapshot {
            peers.push(id);
            outboxes.push(outbox);
        }
        peers.sort();
        for outbox in outboxes {
            let _ = outbox.send(RelayMessage::Roster {
                peers: peers.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::SessionDescription;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn join(directory: &Directory) -> (PeerId, UnboundedReceiver<RelayMessage>) {
        let (tx, rx) = unbounded_channel();
        let id = directory.admit(tx).expect("admitted");
        (id, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<RelayMessage>) -> Vec<RelayMessage> {
        let mut out = vec![];
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn offer() -> Signal {
        Signal::Offer {
            sdp: SessionDescription::new("v=0"),
        }
    }

    #[tokio::test]
    async fn welcome_comes_before_roster() {
        let directory = Directory::new(8);
        let (id, mut rx) = join(&directory);
        assert_eq!(
            drain(&mut rx),
            vec![
                RelayMessage::Welcome { id: id.clone() },
                RelayMessage::Roster { peers: vec![id] },
            ]
        );
    }

    #[tokio::test]
    async fn membership_changes_reach_everyone() {
        let directory = Directory::new(8);
        let (a, mut rx_a) = join(&directory);
        drain(&mut rx_a);
        let (b, mut rx_b) = join(&directory);
        drain(&mut rx_b);

        let mut both = vec![a.clone(), b.clone()];
        both.sort();
        assert_eq!(drain(&mut rx_a), vec![RelayMessage::Roster { peers: both }]);

        directory.leave(&b);
        assert_eq!(drain(&mut rx_a), vec![RelayMessage::Roster { peers: vec![a.clone()] }]);
        assert_eq!(directory.roster(), vec![a.clone()]);

        // leaving twice is a no-op
        directory.leave(&b);
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn signals_are_forwarded_with_sender() {
        let directory = Directory::new(8);
        let (a, mut rx_a) = join(&directory);
        let (b, mut rx_b) = join(&directory);
        drain(&mut rx_a);
        drain(&mut rx_b);

        directory.forward(&a, b.clone(), offer());
        assert_eq!(
            drain(&mut rx_b),
            vec![RelayMessage::Signal {
                from: a,
                signal: offer()
            }]
        );
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn unknown_recipient_is_reported_back() {
        let directory = Directory::new(8);
        let (a, mut rx_a) = join(&directory);
        drain(&mut rx_a);

        directory.forward(&a, PeerId::from("nobody"), offer());
        assert_eq!(
            drain(&mut rx_a),
            vec![RelayMessage::Undeliverable {
                to: PeerId::from("nobody")
            }]
        );
    }

    #[tokio::test]
    async fn closed_connection_counts_as_undeliverable() {
        let directory = Directory::new(8);
        let (a, mut rx_a) = join(&directory);
        let (b, rx_b) = join(&directory);
        drop(rx_b);
        drain(&mut rx_a);

        directory.forward(&a, b.clone(), offer());
        assert_eq!(drain(&mut rx_a), vec![RelayMessage::Undeliverable { to: b }]);
    }

    #[tokio::test]
    async fn full_relay_refuses() {
        let directory = Directory::new(1);
        let _first = join(&directory);
        let (tx, mut rx) = unbounded_channel();
        assert!(directory.admit(tx).is_none());
        assert!(drain(&mut rx).is_empty());
    }
}
