//! Reference-frame registry.
//!
//! Maps entity id → current reference frame and keeps every process's copy
//! of that mapping converging through the channel: a local `set_frame` is
//! applied optimistically, then negotiated through the authority, which
//! rebroadcasts the confirmed assignment to everyone including the original
//! sender. Last write wins in the authority's processing order; frame
//! reassignment is driven by physical containment, so there are no
//! concurrent writers to order against.
//!
//! The registry is session-scoped and cloneable (all shared interior), so
//! channel handlers can capture their own reference to it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::channel::{ChannelHub, FrameAssignment, Outbox};
use crate::frame::FrameName;
use crate::net::EntityId;
use crate::scene::SceneHandle;
use crate::transform::TransformHandle;

type Assignments = HashMap<EntityId, TransformHandle>;
type FrameCache = Option<HashMap<FrameName, TransformHandle>>;

/// Process-wide table of frame assignments, resolvable by name.
#[derive(Clone)]
pub struct FrameRegistry {
    scene: SceneHandle,
    assignments: Arc<Mutex<Assignments>>,
    /// Lazily built name→handle map; dropped on scene load.
    cache: Arc<Mutex<FrameCache>>,
}

impl FrameRegistry {
    pub fn new(scene: SceneHandle) -> Self {
        Self {
            scene,
            assignments: Arc::new(Mutex::new(HashMap::new())),
            cache: Arc::new(Mutex::new(None)),
        }
    }

    /// Wires both channel roles. The authority handler rebroadcasts the
    /// confirmed assignment to all peers (sender included); the peer
    /// handler resolves and applies it.
    pub fn attach(&self, hub: &mut ChannelHub) {
        hub.on_authority_receive::<FrameAssignment, _>(|msg, outbox| {
            debug!(sender = %msg.sender_id, frame_id = msg.frame_id, "Confirming frame assignment");
            outbox.send_to_all(&msg);
        });

        let registry = self.clone();
        hub.on_peer_receive::<FrameAssignment, _>(move |msg, _| {
            registry.apply_confirmed(msg);
        });
    }

    /// Direct local assignment; no network effect. Used when the caller
    /// already holds the frame handle (e.g. the deferred first assignment).
    pub fn set_frame_handle(&self, id: EntityId, handle: TransformHandle) {
        self.lock_assignments().insert(id, handle);
    }

    /// Optimistic local assignment plus negotiation: resolves and stores
    /// the handle immediately, then asks the authority to record the
    /// binding globally. On a resolve miss the local mapping is left
    /// untouched, but the request is still sent; another process may be
    /// able to resolve it.
    pub fn set_frame(&self, id: EntityId, name: FrameName, outbox: &mut Outbox) {
        match self.resolve(name) {
            Some(handle) => {
                debug!(entity = %id, frame = %name, "Setting frame locally");
                self.lock_assignments().insert(id, handle);
            }
            None => warn!(entity = %id, frame = %name, "Frame not found locally"),
        }
        outbox.send_to_authority(&FrameAssignment {
            frame_id: name.id(),
            sender_id: id,
        });
    }

    /// Current frame for an entity. `None` means unassigned (or the frame
    /// died with its scene); callers resolve against the default/world
    /// frame in that case.
    pub fn get_frame(&self, id: EntityId) -> Option<TransformHandle> {
        self.lock_assignments()
            .get(&id)
            .filter(|h| h.is_alive())
            .cloned()
    }

    /// Drops the name→handle cache; called on scene load.
    pub fn invalidate_cache(&self) {
        *self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn apply_confirmed(&self, msg: FrameAssignment) {
        let Some(name) = FrameName::from_id(msg.frame_id) else {
            warn!(frame_id = msg.frame_id, "Unknown frame id in assignment");
            return;
        };
        match self.resolve(name) {
            Some(handle) => {
                debug!(entity = %msg.sender_id, frame = %name, "Applying confirmed frame");
                self.lock_assignments().insert(msg.sender_id, handle);
            }
            // Stale cache or scene not loaded yet; a later assignment will
            // land. Legitimate state, not an error.
            None => warn!(entity = %msg.sender_id, frame = %name, "Frame not found; assignment skipped"),
        }
    }

    fn resolve(&self, name: FrameName) -> Option<TransformHandle> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let map = cache.get_or_insert_with(|| self.scene.lock().frames().into_iter().collect());
        map.get(&name).filter(|h| h.is_alive()).cloned()
    }

    fn lock_assignments(&self) -> std::sync::MutexGuard<'_, Assignments> {
        self.assignments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelRole;
    use crate::scene::Scene;

    fn standard_registry() -> (FrameRegistry, SceneHandle) {
        let mut scene = Scene::new();
        scene.populate_standard();
        let scene = SceneHandle::new(scene);
        (FrameRegistry::new(scene.clone()), scene)
    }

    #[test]
    fn unassigned_entity_has_no_frame() {
        let (registry, _scene) = standard_registry();
        assert!(registry.get_frame(EntityId(42)).is_none());
    }

    #[test]
    fn set_frame_is_locally_visible_before_any_roundtrip() {
        let (registry, scene) = standard_registry();
        let mut hub = ChannelHub::new(ChannelRole::Peer);

        registry.set_frame(EntityId(1), FrameName::Comet, hub.outbox_mut());

        let assigned = registry.get_frame(EntityId(1)).unwrap();
        let comet = scene.lock().find_frame(FrameName::Comet).unwrap();
        assert!(assigned.same_as(&comet));

        // And the negotiation request went out.
        hub.pump();
        assert_eq!(hub.drain_network().len(), 1);
    }

    #[test]
    fn authority_confirms_and_applies_via_loopback() {
        let (registry, scene) = standard_registry();
        let mut hub = ChannelHub::new(ChannelRole::Authority);
        registry.attach(&mut hub);

        // An authority-local set_frame loops through its own authority
        // handler, gets rebroadcast, and lands back through the peer
        // handler.
        registry.set_frame(EntityId(3), FrameName::GiantsDeep, hub.outbox_mut());
        hub.pump();

        let assigned = registry.get_frame(EntityId(3)).unwrap();
        let frame = scene.lock().find_frame(FrameName::GiantsDeep).unwrap();
        assert!(assigned.same_as(&frame));
        // One broadcast envelope for the remote peers.
        let out = hub.drain_network();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn last_applied_assignment_wins() {
        let (registry, scene) = standard_registry();

        // Two assignments for the same entity, applied in processing order;
        // whichever applied last holds, regardless of send order.
        registry.apply_confirmed(FrameAssignment {
            frame_id: FrameName::Comet.id(),
            sender_id: EntityId(5),
        });
        registry.apply_confirmed(FrameAssignment {
            frame_id: FrameName::WhiteHole.id(),
            sender_id: EntityId(5),
        });

        let assigned = registry.get_frame(EntityId(5)).unwrap();
        let white_hole = scene.lock().find_frame(FrameName::WhiteHole).unwrap();
        assert!(assigned.same_as(&white_hole));
    }

    #[test]
    fn lookup_miss_leaves_mapping_untouched() {
        let (registry, scene) = standard_registry();
        let mut hub = ChannelHub::new(ChannelRole::Peer);

        registry.set_frame(EntityId(2), FrameName::Ship, hub.outbox_mut());
        // Scene goes away; the next assignment cannot resolve.
        scene.lock().unload();
        registry.invalidate_cache();
        registry.apply_confirmed(FrameAssignment {
            frame_id: FrameName::Comet.id(),
            sender_id: EntityId(2),
        });

        // The old handle is dead, so the entity reads as unassigned rather
        // than pointing at stale state.
        assert!(registry.get_frame(EntityId(2)).is_none());
    }

    #[test]
    fn cache_rebuilds_after_invalidation() {
        let (registry, scene) = standard_registry();
        assert!(registry.resolve(FrameName::TimberHearth).is_some());

        scene.lock().reload_standard();
        registry.invalidate_cache();

        let fresh = registry.resolve(FrameName::TimberHearth).unwrap();
        let current = scene.lock().find_frame(FrameName::TimberHearth).unwrap();
        assert!(fresh.same_as(&current));
        assert!(fresh.is_alive());
    }
}
