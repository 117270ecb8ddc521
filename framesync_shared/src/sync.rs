//! Entity transform synchronizer.
//!
//! Per-entity state machine. Once active, the authority side publishes the
//! entity's pose relative to its current reference frame each tick; the
//! observer side drives a private shadow transform toward the replicated
//! frame-relative pose with critically damped smoothing.
//!
//! An all-zero replicated position is the "no data yet" sentinel: observers
//! snap to the default frame instead of smoothing in from the world origin.
//! The sentinel cannot distinguish "no data" from an entity genuinely at
//! the origin; that ambiguity is carried intentionally (changing it would
//! change observable session-start behavior).

use tracing::debug;

use crate::config::SyncConfig;
use crate::frame::FrameName;
use crate::math::{Pose, Quat, Vec3};
use crate::net::EntityId;
use crate::registry::FrameRegistry;
use crate::scene::{Scene, SceneHandle};
use crate::transform::TransformHandle;

/// What a kind of entity must supply for the synchronizer to manage it.
pub trait EntityKind: Send + Sync {
    /// Whether the underlying game object exists yet. Polled every tick.
    fn is_ready(&self, scene: &Scene) -> bool;

    /// Locates the canonical in-world transform this process owns.
    fn acquire_authority_handle(&self, scene: &mut Scene) -> Option<TransformHandle>;

    /// Instantiates a private shadow copy for rendering/interpolation.
    fn acquire_observer_handle(&self, scene: &mut Scene) -> Option<TransformHandle>;
}

/// Synchronizer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Underlying object not available (yet, or anymore).
    Uninitialized,
    /// Handle acquired; first frame assignment deferred one tick so other
    /// systems finish their own initialization.
    Initializing,
    /// Steady-state sync running.
    Active,
}

/// Per-entity transform synchronizer.
pub struct TransformSync {
    id: EntityId,
    has_authority: bool,
    kind: Box<dyn EntityKind>,

    state: SyncState,
    synced: Option<TransformHandle>,
    remote_pose: Pose,
    position_velocity: Vec3,
    rotation_velocity: [f32; 4],

    smooth_time: f32,
    default_frame: FrameName,
    start_frame: FrameName,
}

impl TransformSync {
    pub fn new(id: EntityId, has_authority: bool, kind: Box<dyn EntityKind>, cfg: &SyncConfig) -> Self {
        Self {
            id,
            has_authority,
            kind,
            state: SyncState::Uninitialized,
            synced: None,
            remote_pose: Pose::default(),
            position_velocity: Vec3::ZERO,
            rotation_velocity: [0.0; 4],
            smooth_time: cfg.smooth_time,
            default_frame: cfg.default_frame,
            start_frame: cfg.start_frame,
        }
    }

    pub fn entity_id(&self) -> EntityId {
        self.id
    }

    pub fn has_authority(&self) -> bool {
        self.has_authority
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// The managed transform: the canonical body (authority) or the shadow
    /// copy (observer).
    pub fn synced_transform(&self) -> Option<&TransformHandle> {
        self.synced.as_ref()
    }

    /// Transport feed: latest replicated frame-relative pose for this
    /// entity. Only meaningful on observers.
    pub fn apply_remote_pose(&mut self, pose: Pose) {
        self.remote_pose = pose;
    }

    /// Engine object handles are invalidated wholesale on scene
    /// transitions, so a load forces a reset even if the readiness
    /// predicate still reads true this tick.
    pub fn on_scene_loaded(&mut self) {
        if self.state != SyncState::Uninitialized {
            debug!(entity = %self.id, "Scene load; resetting synchronizer");
            self.reset();
        }
    }

    /// One tick. Returns the frame-relative pose to publish when this
    /// process is the entity's authority.
    pub fn update(
        &mut self,
        registry: &FrameRegistry,
        scene: &SceneHandle,
        dt: f32,
    ) -> Option<Pose> {
        let ready = self.kind.is_ready(&scene.lock());
        match self.state {
            SyncState::Uninitialized => {
                if ready {
                    self.init(scene);
                }
                return None;
            }
            SyncState::Initializing | SyncState::Active if !ready => {
                self.reset();
                return None;
            }
            _ => {}
        }

        if self.state == SyncState::Initializing {
            self.set_first_frame(registry, scene);
            return None;
        }

        let Some(synced) = self.synced.clone() else {
            return None;
        };
        if !synced.is_alive() {
            // Handle died without a readiness flip (mid-transition); start
            // over rather than dereference stale state.
            self.reset();
            return None;
        }

        let frame = registry.get_frame(self.id);
        if self.has_authority {
            let world = synced.world_pose();
            let pose = match &frame {
                Some(frame) => frame.inverse_transform_pose(world),
                None => world,
            };
            Some(pose)
        } else {
            self.smooth_toward_remote(&synced, frame, scene, dt);
            None
        }
    }

    fn init(&mut self, scene: &SceneHandle) {
        let handle = {
            let mut scene = scene.lock();
            if self.has_authority {
                self.kind.acquire_authority_handle(&mut scene)
            } else {
                self.kind.acquire_observer_handle(&mut scene)
            }
        };
        let Some(handle) = handle else {
            return;
        };

        if !self.has_authority {
            // Park the shadow at the default frame until data arrives.
            if let Some(position) = self.default_frame_position(scene) {
                handle.set_position(position);
            }
        }

        debug!(entity = %self.id, authority = self.has_authority, "Synchronizer initialized");
        self.synced = Some(handle);
        self.state = SyncState::Initializing;
    }

    fn set_first_frame(&mut self, registry: &FrameRegistry, scene: &SceneHandle) {
        let start = scene.lock().find_frame(self.start_frame);
        if let Some(handle) = start {
            registry.set_frame_handle(self.id, handle);
        }
        self.state = SyncState::Active;
    }

    fn smooth_toward_remote(
        &mut self,
        synced: &TransformHandle,
        frame: Option<TransformHandle>,
        scene: &SceneHandle,
        dt: f32,
    ) {
        let target = self.remote_pose;

        if target.position == Vec3::ZERO {
            // Sentinel: no pose received yet. Snap, with no smoothing and
            // no velocity state consulted.
            if let Some(position) = self.default_frame_position(scene) {
                synced.set_position(position);
            }
            return;
        }

        // Reparent under the current frame (world-preserving) so the
        // replicated frame-local coordinates mean what the authority meant.
        match &frame {
            Some(frame) => {
                let already = synced.parent().map_or(false, |p| p.same_as(frame));
                if !already {
                    synced.set_parent(Some(frame.clone()));
                }
            }
            None => {
                if synced.parent().is_some() {
                    synced.set_parent(None);
                }
            }
        }

        let local_position = synced.local_position();
        synced.set_local_position(Vec3::smooth_damp(
            local_position,
            target.position,
            &mut self.position_velocity,
            self.smooth_time,
            dt,
        ));

        let local_rotation = synced.local_rotation();
        synced.set_local_rotation(Quat::smooth_damp(
            local_rotation,
            target.rotation,
            &mut self.rotation_velocity,
            dt,
        ));
    }

    fn default_frame_position(&self, scene: &SceneHandle) -> Option<Vec3> {
        let frame = scene.lock().find_frame(self.default_frame)?;
        Some(frame.position())
    }

    fn reset(&mut self) {
        self.state = SyncState::Uninitialized;
        self.synced = None;
        self.remote_pose = Pose::default();
        self.position_velocity = Vec3::ZERO;
        self.rotation_velocity = [0.0; 4];
    }
}
