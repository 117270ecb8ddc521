//! Session context.
//!
//! One `SyncSession` per process per multiplayer session: it owns the scene
//! handle, the frame registry, the channel hub, the event bus, and the
//! synchronizer table, and exposes the per-tick `step`. Everything that
//! needs entity/frame lookup gets it from here; there are no process-wide
//! singletons.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::channel::{ChannelHub, ChannelRole, Envelope, WakeUp};
use crate::config::SyncConfig;
use crate::event::EventBus;
use crate::frame::FrameName;
use crate::net::{EntityId, PoseUpdate};
use crate::registry::FrameRegistry;
use crate::scene::SceneHandle;
use crate::sync::{EntityKind, SyncState, TransformSync};

/// The host finished a scene (re)load; caches and handles are stale.
pub struct SceneLoaded;

/// The host's collision glue saw an entity's volume enter a frame boundary.
/// Raw name; filtering against the whitelist happens in `step`.
pub struct SectorEntered {
    pub entity: EntityId,
    pub sector: String,
}

/// What one tick produced for the transport.
pub struct StepOutput {
    /// Frame-relative poses published by locally-authoritative entities.
    pub poses: Vec<PoseUpdate>,
    /// Channel envelopes to flush.
    pub outbound: Vec<Envelope>,
}

pub struct SyncSession {
    cfg: SyncConfig,
    scene: SceneHandle,
    registry: FrameRegistry,
    hub: ChannelHub,
    events: EventBus,
    syncs: BTreeMap<EntityId, TransformSync>,
    awake: Arc<AtomicBool>,
    tick: u64,
}

impl SyncSession {
    pub fn new(role: ChannelRole, cfg: SyncConfig) -> Self {
        let scene = SceneHandle::default();
        let registry = FrameRegistry::new(scene.clone());
        let mut hub = ChannelHub::new(role);
        registry.attach(&mut hub);

        let awake = Arc::new(AtomicBool::new(false));
        let flag = awake.clone();
        hub.on_peer_receive::<WakeUp, _>(move |msg, _| {
            info!(sender = %msg.sender_id, "Session wake-up received");
            flag.store(true, Ordering::Relaxed);
        });

        Self {
            cfg,
            scene,
            registry,
            hub,
            events: EventBus::default(),
            syncs: BTreeMap::new(),
            awake,
            tick: 0,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.cfg
    }

    pub fn scene(&self) -> &SceneHandle {
        &self.scene
    }

    pub fn registry(&self) -> &FrameRegistry {
        &self.registry
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Loads the standard scene content and raises the scene-loaded event;
    /// what the host would do on a scene transition.
    pub fn load_standard_scene(&mut self) {
        self.scene.lock().reload_standard();
        self.notify_scene_loaded();
    }

    pub fn add_entity(&mut self, id: EntityId, has_authority: bool, kind: Box<dyn EntityKind>) {
        info!(entity = %id, authority = has_authority, "Tracking entity");
        self.syncs
            .insert(id, TransformSync::new(id, has_authority, kind, &self.cfg));
    }

    pub fn remove_entity(&mut self, id: EntityId) {
        info!(entity = %id, "Dropping entity");
        self.syncs.remove(&id);
    }

    pub fn has_entity(&self, id: EntityId) -> bool {
        self.syncs.contains_key(&id)
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.syncs.keys().copied().collect()
    }

    pub fn entity_state(&self, id: EntityId) -> Option<SyncState> {
        self.syncs.get(&id).map(|s| s.state())
    }

    pub fn sync(&self, id: EntityId) -> Option<&TransformSync> {
        self.syncs.get(&id)
    }

    /// Transport feed: replicated pose for a remote entity. Own-authority
    /// and unknown ids are ignored.
    pub fn apply_remote_pose(&mut self, update: PoseUpdate) {
        match self.syncs.get_mut(&update.id) {
            Some(sync) if !sync.has_authority() => sync.apply_remote_pose(update.pose),
            Some(_) => {}
            None => debug!(entity = %update.id, "Pose for unknown entity; dropped"),
        }
    }

    /// Transport feed: channel message addressed to the authority.
    pub fn deliver_to_authority(&mut self, kind: u16, payload: &[u8]) {
        self.hub.deliver_to_authority(kind, payload);
    }

    /// Transport feed: authority broadcast.
    pub fn deliver_broadcast(&mut self, kind: u16, payload: &[u8]) {
        self.hub.deliver_broadcast(kind, payload);
    }

    pub fn notify_scene_loaded(&mut self) {
        self.events.push(SceneLoaded);
    }

    /// Collision-detector glue. Queued; whitelist and ownership filtering
    /// happen during `step`.
    pub fn report_sector_entry(&mut self, entity: EntityId, sector: &str) {
        self.events.push(SectorEntered {
            entity,
            sector: sector.to_string(),
        });
    }

    /// Authority announces the session has started.
    pub fn announce_wake_up(&mut self, sender: EntityId) {
        self.hub.outbox_mut().send_to_all(&WakeUp { sender_id: sender });
        self.hub.pump();
    }

    pub fn is_awake(&self) -> bool {
        self.awake.load(Ordering::Relaxed)
    }

    /// One cooperative tick over every synchronizer.
    pub fn step(&mut self, dt: f32) -> StepOutput {
        if !self.events.drain::<SceneLoaded>().is_empty() {
            self.registry.invalidate_cache();
            for sync in self.syncs.values_mut() {
                sync.on_scene_loaded();
            }
        }

        for entry in self.events.drain::<SectorEntered>() {
            let Some(frame) = FrameName::parse(&entry.sector) else {
                debug!(sector = %entry.sector, "Unknown sector name; ignored");
                continue;
            };
            if !frame.is_whitelisted() {
                debug!(frame = %frame, "Sector not whitelisted; ignored");
                continue;
            }
            let Some(sync) = self.syncs.get(&entry.entity) else {
                continue;
            };
            // Only the owning process reports its entity's containment.
            if !sync.has_authority() {
                continue;
            }
            self.registry
                .set_frame(entry.entity, frame, self.hub.outbox_mut());
        }
        self.hub.pump();

        let mut poses = Vec::new();
        for (id, sync) in self.syncs.iter_mut() {
            if let Some(pose) = sync.update(&self.registry, &self.scene, dt) {
                poses.push(PoseUpdate { id: *id, pose });
            }
        }

        self.tick += 1;
        StepOutput {
            poses,
            outbound: self.hub.drain_network(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Delivery, FrameAssignment, MessageKind};
    use crate::kinds::PlayerKind;

    const DT: f32 = 1.0 / 60.0;

    fn peer_session_with_entity(id: u32, authority: bool) -> SyncSession {
        let mut session = SyncSession::new(ChannelRole::Peer, SyncConfig::default());
        session.load_standard_scene();
        session.add_entity(EntityId(id), authority, Box::new(PlayerKind));
        // Two steps: acquire handle, then the deferred frame registration.
        session.step(DT);
        session.step(DT);
        assert_eq!(session.entity_state(EntityId(id)), Some(SyncState::Active));
        session
    }

    #[test]
    fn owned_whitelisted_sector_entry_is_assigned_and_negotiated() {
        let mut session = peer_session_with_entity(1, true);

        session.report_sector_entry(EntityId(1), "Comet");
        let out = session.step(DT);

        let assigned = session.registry().get_frame(EntityId(1)).unwrap();
        let comet = session.scene().lock().find_frame(FrameName::Comet).unwrap();
        assert!(assigned.same_as(&comet));

        let envelopes: Vec<_> = out
            .outbound
            .iter()
            .filter(|e| e.kind == MessageKind::FrameAssignment.wire())
            .collect();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].delivery, Delivery::ToAuthority);
    }

    #[test]
    fn non_whitelisted_or_unowned_entries_are_ignored() {
        let mut session = peer_session_with_entity(1, true);
        session.add_entity(EntityId(2), false, Box::new(PlayerKind));
        session.step(DT);
        session.step(DT);

        // Sun is the default frame, never tracked; entity 2 is not ours.
        session.report_sector_entry(EntityId(1), "Sun");
        session.report_sector_entry(EntityId(1), "SomeTriggerVolume");
        session.report_sector_entry(EntityId(2), "Comet");
        let out = session.step(DT);

        assert!(out
            .outbound
            .iter()
            .all(|e| e.kind != MessageKind::FrameAssignment.wire()));
        let hearth = session
            .scene()
            .lock()
            .find_frame(FrameName::TimberHearth)
            .unwrap();
        // Both entities still sit in the start frame.
        for id in [1, 2] {
            let frame = session.registry().get_frame(EntityId(id)).unwrap();
            assert!(frame.same_as(&hearth));
        }
    }

    #[test]
    fn broadcast_assignment_applies_to_any_entity() {
        let mut session = peer_session_with_entity(1, true);

        // Confirmation for some other peer's entity arrives.
        let payload = serde_json::to_vec(&FrameAssignment {
            frame_id: FrameName::GiantsDeep.id(),
            sender_id: EntityId(9),
        })
        .unwrap();
        session.deliver_broadcast(MessageKind::FrameAssignment.wire(), &payload);

        let frame = session.registry().get_frame(EntityId(9)).unwrap();
        let giants = session
            .scene()
            .lock()
            .find_frame(FrameName::GiantsDeep)
            .unwrap();
        assert!(frame.same_as(&giants));
    }

    #[test]
    fn authority_wake_up_reaches_itself_and_the_wire() {
        let mut session = SyncSession::new(ChannelRole::Authority, SyncConfig::default());
        assert!(!session.is_awake());

        session.announce_wake_up(EntityId(0));
        assert!(session.is_awake(), "authority hears its own broadcast");

        let out = session.step(DT);
        assert!(out
            .outbound
            .iter()
            .any(|e| e.kind == MessageKind::WakeUp.wire() && e.delivery == Delivery::ToAll));
    }

    #[test]
    fn scene_load_resets_active_synchronizers() {
        let mut session = peer_session_with_entity(1, true);

        session.scene().lock().reload_standard();
        session.notify_scene_loaded();
        session.step(DT);

        // The synchronizer re-enters its lifecycle from scratch.
        assert_eq!(
            session.entity_state(EntityId(1)),
            Some(SyncState::Initializing)
        );
        session.step(DT);
        assert_eq!(session.entity_state(EntityId(1)), Some(SyncState::Active));
    }
}
