//! Transform handles.
//!
//! The host engine owns transforms; the sync layer only holds handles to
//! them. A handle is shared, mutable state behind a mutex (message handlers
//! and the tick loop may live on different tasks), with a liveness flag the
//! scene flips when it unloads: a dead handle reads as "no frame resolved"
//! instead of dereferencing stale engine state.
//!
//! Parents form a chain (frames are roots in practice, but nothing relies on
//! that). Reparenting preserves the world pose, so hanging a shadow under a
//! new frame never teleports it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::math::{Pose, Quat, Vec3};

#[derive(Debug)]
struct TransformData {
    local_position: Vec3,
    local_rotation: Quat,
    parent: Option<TransformHandle>,
    alive: bool,
}

/// Shared handle to an engine-owned transform.
#[derive(Debug, Clone)]
pub struct TransformHandle(Arc<Mutex<TransformData>>);

impl TransformHandle {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self(Arc::new(Mutex::new(TransformData {
            local_position: position,
            local_rotation: rotation,
            parent: None,
            alive: true,
        })))
    }

    fn lock(&self) -> MutexGuard<'_, TransformData> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Two handles referring to the same engine transform.
    pub fn same_as(&self, other: &TransformHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_alive(&self) -> bool {
        self.lock().alive
    }

    /// Marks the underlying engine object destroyed (scene unload).
    pub(crate) fn invalidate(&self) {
        self.lock().alive = false;
    }

    pub fn local_position(&self) -> Vec3 {
        self.lock().local_position
    }

    pub fn set_local_position(&self, p: Vec3) {
        self.lock().local_position = p;
    }

    pub fn local_rotation(&self) -> Quat {
        self.lock().local_rotation
    }

    pub fn set_local_rotation(&self, r: Quat) {
        self.lock().local_rotation = r;
    }

    pub fn parent(&self) -> Option<TransformHandle> {
        self.lock().parent.clone()
    }

    /// World pose through the parent chain.
    pub fn world_pose(&self) -> Pose {
        let (local_position, local_rotation, parent) = {
            let data = self.lock();
            (data.local_position, data.local_rotation, data.parent.clone())
        };
        match parent {
            None => Pose::new(local_position, local_rotation),
            Some(parent) => {
                let pw = parent.world_pose();
                Pose::new(
                    pw.position + pw.rotation.rotate(local_position),
                    pw.rotation.mul(local_rotation),
                )
            }
        }
    }

    pub fn position(&self) -> Vec3 {
        self.world_pose().position
    }

    pub fn rotation(&self) -> Quat {
        self.world_pose().rotation
    }

    /// Sets the world-space position, converting into parent space if needed.
    pub fn set_position(&self, world: Vec3) {
        let parent = self.lock().parent.clone();
        let local = match parent {
            None => world,
            Some(parent) => {
                let pw = parent.world_pose();
                pw.rotation.inverse().rotate(world - pw.position)
            }
        };
        self.lock().local_position = local;
    }

    /// Reparents while preserving the current world pose.
    pub fn set_parent(&self, parent: Option<TransformHandle>) {
        let world = self.world_pose();
        let (local_position, local_rotation) = match &parent {
            None => (world.position, world.rotation),
            Some(p) => {
                let pw = p.world_pose();
                let inv = pw.rotation.inverse();
                (
                    inv.rotate(world.position - pw.position),
                    inv.mul(world.rotation),
                )
            }
        };
        let mut data = self.lock();
        data.parent = parent;
        data.local_position = local_position;
        data.local_rotation = local_rotation;
    }

    /// Converts a world-space point into this transform's local space.
    pub fn inverse_transform_point(&self, world: Vec3) -> Vec3 {
        let pose = self.world_pose();
        pose.rotation.inverse().rotate(world - pose.position)
    }

    /// Converts a world-space rotation into this transform's local space.
    pub fn inverse_transform_rotation(&self, world: Quat) -> Quat {
        self.world_pose().rotation.inverse().mul(world)
    }

    /// Both of the above in one call; the frame-relative pose the authority
    /// publishes.
    pub fn inverse_transform_pose(&self, world: Pose) -> Pose {
        Pose::new(
            self.inverse_transform_point(world.position),
            self.inverse_transform_rotation(world.rotation),
        )
    }
}
