//! Message channel.
//!
//! Typed request/fan-out between one authority process and N peers. The hub
//! is transport-agnostic: sends queue envelopes the net layer flushes, and
//! the net layer feeds received envelopes back in. Local deliveries (the
//! authority talking to itself, or hearing its own broadcast) never touch
//! the network.
//!
//! Best-effort semantics throughout: undecodable or unhandled messages are
//! logged and dropped, and a peer whose authority is gone simply loses its
//! sends. This layer is not a durability mechanism.

use std::collections::{HashMap, VecDeque};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::net::EntityId;

/// Discriminators below this value belong to the host transport.
pub const HOST_RESERVED_KINDS: u16 = 32;

/// Channel message discriminators, in the shared enumeration space above
/// the host-reserved base. Add new kinds here, incrementing the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
    FrameAssignment = HOST_RESERVED_KINDS + 1,
    WakeUp = HOST_RESERVED_KINDS + 2,
}

impl MessageKind {
    pub fn wire(self) -> u16 {
        self as u16
    }
}

/// A message that can travel over the channel.
pub trait ChannelMessage: Serialize + DeserializeOwned + Send + 'static {
    const KIND: MessageKind;
}

/// Frame assignment record; the same schema serves the peer→authority
/// request and the authority→all confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameAssignment {
    pub frame_id: i32,
    pub sender_id: EntityId,
}

impl ChannelMessage for FrameAssignment {
    const KIND: MessageKind = MessageKind::FrameAssignment;
}

/// Authority announces the session has started.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WakeUp {
    pub sender_id: EntityId,
}

impl ChannelMessage for WakeUp {
    const KIND: MessageKind = MessageKind::WakeUp;
}

/// Which role this process plays on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    Authority,
    Peer,
}

/// Which handler set a delivery targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Authority,
    Peer,
}

/// Network direction of an outbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    ToAuthority,
    ToAll,
}

/// A serialized channel message bound for the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: u16,
    pub delivery: Delivery,
    pub payload: Vec<u8>,
}

/// Send surface handed to handlers, split from the hub so an authority
/// handler can rebroadcast while its own dispatch is still on the stack.
pub struct Outbox {
    role: ChannelRole,
    network: VecDeque<Envelope>,
    local: VecDeque<(Side, u16, Vec<u8>)>,
}

impl Outbox {
    fn new(role: ChannelRole) -> Self {
        Self {
            role,
            network: VecDeque::new(),
            local: VecDeque::new(),
        }
    }

    /// Sends a message to the authority. On the authority itself this is a
    /// local loopback into its own handler.
    pub fn send_to_authority<M: ChannelMessage>(&mut self, msg: &M) {
        let payload = match serde_json::to_vec(msg) {
            Ok(p) => p,
            Err(e) => {
                warn!(kind = ?M::KIND, error = %e, "Dropping unserializable channel message");
                return;
            }
        };
        match self.role {
            ChannelRole::Peer => self.network.push_back(Envelope {
                kind: M::KIND.wire(),
                delivery: Delivery::ToAuthority,
                payload,
            }),
            ChannelRole::Authority => {
                self.local.push_back((Side::Authority, M::KIND.wire(), payload))
            }
        }
    }

    /// Broadcasts to every peer, the sender's own peer handler included.
    /// Only meaningful on the authority; a peer calling this is dropped.
    pub fn send_to_all<M: ChannelMessage>(&mut self, msg: &M) {
        if self.role != ChannelRole::Authority {
            warn!(kind = ?M::KIND, "Peer attempted send_to_all; dropped");
            return;
        }
        let payload = match serde_json::to_vec(msg) {
            Ok(p) => p,
            Err(e) => {
                warn!(kind = ?M::KIND, error = %e, "Dropping unserializable channel message");
                return;
            }
        };
        self.network.push_back(Envelope {
            kind: M::KIND.wire(),
            delivery: Delivery::ToAll,
            payload: payload.clone(),
        });
        self.local.push_back((Side::Peer, M::KIND.wire(), payload));
    }
}

type RawHandler = Box<dyn FnMut(&[u8], &mut Outbox) + Send + Sync>;

/// Per-process channel endpoint. At most one handler per kind per role;
/// re-registration replaces the previous handler.
pub struct ChannelHub {
    outbox: Outbox,
    authority_handlers: HashMap<u16, RawHandler>,
    peer_handlers: HashMap<u16, RawHandler>,
}

impl ChannelHub {
    pub fn new(role: ChannelRole) -> Self {
        Self {
            outbox: Outbox::new(role),
            authority_handlers: HashMap::new(),
            peer_handlers: HashMap::new(),
        }
    }

    pub fn role(&self) -> ChannelRole {
        self.outbox.role
    }

    /// Handler invoked when this process, as authority, receives a message
    /// addressed to the authority.
    pub fn on_authority_receive<M, F>(&mut self, f: F)
    where
        M: ChannelMessage,
        F: FnMut(M, &mut Outbox) + Send + Sync + 'static,
    {
        Self::register::<M, F>(&mut self.authority_handlers, f);
    }

    /// Handler invoked when this process receives an authority broadcast.
    pub fn on_peer_receive<M, F>(&mut self, f: F)
    where
        M: ChannelMessage,
        F: FnMut(M, &mut Outbox) + Send + Sync + 'static,
    {
        Self::register::<M, F>(&mut self.peer_handlers, f);
    }

    fn register<M, F>(handlers: &mut HashMap<u16, RawHandler>, mut f: F)
    where
        M: ChannelMessage,
        F: FnMut(M, &mut Outbox) + Send + Sync + 'static,
    {
        let raw: RawHandler = Box::new(move |payload, outbox| {
            match serde_json::from_slice::<M>(payload) {
                Ok(msg) => f(msg, outbox),
                Err(e) => warn!(kind = ?M::KIND, error = %e, "Undecodable channel message"),
            }
        });
        if handlers.insert(M::KIND.wire(), raw).is_some() {
            warn!(kind = ?M::KIND, "Replaced existing channel handler");
        }
    }

    /// Transport feed: a peer's message arrived at the authority.
    pub fn deliver_to_authority(&mut self, kind: u16, payload: &[u8]) {
        self.dispatch(Side::Authority, kind, payload);
        self.pump_local();
    }

    /// Transport feed: an authority broadcast arrived at this peer.
    pub fn deliver_broadcast(&mut self, kind: u16, payload: &[u8]) {
        self.dispatch(Side::Peer, kind, payload);
        self.pump_local();
    }

    fn dispatch(&mut self, side: Side, kind: u16, payload: &[u8]) {
        let handlers = match side {
            Side::Authority => &mut self.authority_handlers,
            Side::Peer => &mut self.peer_handlers,
        };
        match handlers.get_mut(&kind) {
            Some(handler) => handler(payload, &mut self.outbox),
            None => debug!(kind, ?side, "No handler for channel message; dropped"),
        }
    }

    /// Drains self-addressed deliveries, including any a handler just
    /// queued.
    fn pump_local(&mut self) {
        while let Some((side, kind, payload)) = self.outbox.local.pop_front() {
            self.dispatch(side, kind, &payload);
        }
    }

    /// Direct send access for code outside a handler.
    pub fn outbox_mut(&mut self) -> &mut Outbox {
        &mut self.outbox
    }

    /// Sends queued outside a delivery (via [`ChannelHub::outbox_mut`]) may
    /// leave local deliveries pending; the session pumps them each step.
    pub fn pump(&mut self) {
        self.pump_local();
    }

    /// Envelopes for the transport to flush.
    pub fn drain_network(&mut self) -> Vec<Envelope> {
        self.outbox.network.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<FrameAssignment>>>, impl FnMut(FrameAssignment, &mut Outbox)) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |msg, _out: &mut Outbox| sink.lock().unwrap().push(msg))
    }

    #[test]
    fn peer_send_queues_network_envelope() {
        let mut hub = ChannelHub::new(ChannelRole::Peer);
        hub.outbox_mut().send_to_authority(&FrameAssignment {
            frame_id: 2,
            sender_id: EntityId(1),
        });
        hub.pump();

        let out = hub.drain_network();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, MessageKind::FrameAssignment.wire());
        assert_eq!(out[0].delivery, Delivery::ToAuthority);
    }

    #[test]
    fn authority_send_to_authority_is_local_loopback() {
        let mut hub = ChannelHub::new(ChannelRole::Authority);
        let (seen, handler) = recorder();
        hub.on_authority_receive::<FrameAssignment, _>(handler);

        hub.outbox_mut().send_to_authority(&FrameAssignment {
            frame_id: 7,
            sender_id: EntityId(0),
        });
        hub.pump();

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(hub.drain_network().is_empty(), "loopback must not hit the wire");
    }

    #[test]
    fn authority_handler_can_rebroadcast() {
        let mut hub = ChannelHub::new(ChannelRole::Authority);
        hub.on_authority_receive::<FrameAssignment, _>(|msg, outbox| {
            outbox.send_to_all(&msg);
        });
        let (seen, handler) = recorder();
        hub.on_peer_receive::<FrameAssignment, _>(handler);

        let payload = serde_json::to_vec(&FrameAssignment {
            frame_id: 4,
            sender_id: EntityId(9),
        })
        .unwrap();
        hub.deliver_to_authority(MessageKind::FrameAssignment.wire(), &payload);

        // The broadcast reaches the wire and the authority's own peer handler.
        let out = hub.drain_network();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].delivery, Delivery::ToAll);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(seen.lock().unwrap()[0].sender_id, EntityId(9));
    }

    #[test]
    fn peer_send_to_all_is_dropped() {
        let mut hub = ChannelHub::new(ChannelRole::Peer);
        hub.outbox_mut().send_to_all(&WakeUp {
            sender_id: EntityId(1),
        });
        hub.pump();
        assert!(hub.drain_network().is_empty());
    }

    #[test]
    fn reregistration_replaces_handler() {
        let mut hub = ChannelHub::new(ChannelRole::Peer);
        let (first_seen, first) = recorder();
        let (second_seen, second) = recorder();
        hub.on_peer_receive::<FrameAssignment, _>(first);
        hub.on_peer_receive::<FrameAssignment, _>(second);

        let payload = serde_json::to_vec(&FrameAssignment {
            frame_id: 1,
            sender_id: EntityId(2),
        })
        .unwrap();
        hub.deliver_broadcast(MessageKind::FrameAssignment.wire(), &payload);

        assert!(first_seen.lock().unwrap().is_empty());
        assert_eq!(second_seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn unhandled_kind_is_dropped_quietly() {
        let mut hub = ChannelHub::new(ChannelRole::Peer);
        // No handler registered; must not panic.
        hub.deliver_broadcast(MessageKind::WakeUp.wire(), b"{\"sender_id\":0}");
    }
}
