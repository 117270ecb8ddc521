//! Scene stand-in.
//!
//! Models the slice of the host engine the sync layer consumes: named
//! frames, named objects (player/ship bodies), template instantiation for
//! observer-side shadows, and wholesale handle invalidation on scene
//! transitions. In an embedding, this surface is backed by the real engine;
//! here it is also what the tests and demo binaries run against.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::frame::FrameName;
use crate::math::{Quat, Vec3};
use crate::transform::TransformHandle;

/// Engine object name of the local player's body transform.
pub const PLAYER_BODY: &str = "player_body";
/// Engine object name of the ship's body transform.
pub const SHIP_BODY: &str = "ship_body";

#[derive(Default)]
pub struct Scene {
    generation: u64,
    frames: BTreeMap<FrameName, TransformHandle>,
    objects: BTreeMap<String, TransformHandle>,
    /// Everything handed out since the last load, shadows included; killed
    /// wholesale on unload.
    spawned: Vec<TransformHandle>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumped on every (re)load; lets caches detect staleness.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn add_frame(&mut self, name: FrameName, position: Vec3) -> TransformHandle {
        let handle = TransformHandle::new(position, Quat::IDENTITY);
        self.frames.insert(name, handle.clone());
        self.spawned.push(handle.clone());
        handle
    }

    pub fn add_object(&mut self, name: &str, position: Vec3, rotation: Quat) -> TransformHandle {
        let handle = TransformHandle::new(position, rotation);
        self.objects.insert(name.to_string(), handle.clone());
        self.spawned.push(handle.clone());
        handle
    }

    pub fn find_frame(&self, name: FrameName) -> Option<TransformHandle> {
        self.frames.get(&name).cloned()
    }

    /// Snapshot of the current frame set, for building name→handle caches.
    pub fn frames(&self) -> Vec<(FrameName, TransformHandle)> {
        self.frames.iter().map(|(n, h)| (*n, h.clone())).collect()
    }

    pub fn object(&self, name: &str) -> Option<TransformHandle> {
        self.objects.get(name).cloned()
    }

    pub fn contains_object(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    /// Instantiates a private copy of a named object at its current world
    /// pose. The copy is scene-owned like everything else and dies with the
    /// scene.
    pub fn instantiate(&mut self, template: &str) -> Option<TransformHandle> {
        let source = self.objects.get(template)?;
        let pose = source.world_pose();
        let handle = TransformHandle::new(pose.position, pose.rotation);
        self.spawned.push(handle.clone());
        Some(handle)
    }

    /// Unloads the scene: every handle handed out so far goes dead and the
    /// lookup tables empty. A subsequent load starts from scratch.
    pub fn unload(&mut self) {
        for handle in self.spawned.drain(..) {
            handle.invalidate();
        }
        self.frames.clear();
        self.objects.clear();
        self.generation += 1;
        debug!(generation = self.generation, "Scene unloaded");
    }

    /// Loads the standard set of frames and bodies. Frame positions are
    /// deterministic so client and server scenes agree.
    pub fn populate_standard(&mut self) {
        for &frame in FrameName::ALL {
            self.add_frame(frame, standard_frame_position(frame));
        }
        let hearth = standard_frame_position(FrameName::TimberHearth);
        self.add_object(
            PLAYER_BODY,
            hearth + Vec3::new(0.0, 20.0, 0.0),
            Quat::IDENTITY,
        );
        self.add_object(SHIP_BODY, hearth + Vec3::new(30.0, 20.0, 0.0), Quat::IDENTITY);
        debug!(generation = self.generation, "Scene populated");
    }

    /// Unload followed by a standard load; what a scene transition looks
    /// like to the sync layer.
    pub fn reload_standard(&mut self) {
        self.unload();
        self.populate_standard();
    }
}

/// Fixed world position for a frame, spread out along one axis.
pub fn standard_frame_position(frame: FrameName) -> Vec3 {
    Vec3::new(400.0 * frame.id() as f32, 0.0, 0.0)
}

/// Shared scene reference; registry, synchronizers and session all hold one.
#[derive(Clone, Default)]
pub struct SceneHandle(Arc<Mutex<Scene>>);

impl SceneHandle {
    pub fn new(scene: Scene) -> Self {
        Self(Arc::new(Mutex::new(scene)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Scene> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unload_kills_handles_and_clears_lookup() {
        let mut scene = Scene::new();
        scene.populate_standard();
        let hearth = scene.find_frame(FrameName::TimberHearth).unwrap();
        let gen = scene.generation();

        scene.unload();

        assert!(!hearth.is_alive());
        assert!(scene.find_frame(FrameName::TimberHearth).is_none());
        assert!(!scene.contains_object(PLAYER_BODY));
        assert_eq!(scene.generation(), gen + 1);
    }

    #[test]
    fn instantiate_copies_pose_but_not_identity() {
        let mut scene = Scene::new();
        scene.populate_standard();
        let body = scene.object(PLAYER_BODY).unwrap();
        let shadow = scene.instantiate(PLAYER_BODY).unwrap();

        assert!(!shadow.same_as(&body));
        assert!(shadow.position().distance(body.position()) < 1e-5);

        // Shadows die with the scene too.
        scene.unload();
        assert!(!shadow.is_alive());
    }

    #[test]
    fn instantiate_unknown_template_is_none() {
        let mut scene = Scene::new();
        assert!(scene.instantiate("missing_body").is_none());
    }
}
