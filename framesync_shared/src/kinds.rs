//! Entity kind capabilities.
//!
//! Each synchronized entity kind supplies a readiness predicate and the two
//! transform acquisition paths (authority-owned canonical transform vs.
//! observer-side shadow copy). The synchronizer composes one of these; kinds
//! do not subclass it.

use serde::{Deserialize, Serialize};

use crate::scene::{Scene, PLAYER_BODY, SHIP_BODY};
use crate::sync::EntityKind;
use crate::transform::TransformHandle;

/// Wire tag for an entity's kind, so joining peers know which capabilities
/// to instantiate for a remote entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KindTag {
    Player,
    Ship,
}

impl KindTag {
    pub fn instantiate(self) -> Box<dyn EntityKind> {
        match self {
            KindTag::Player => Box::new(PlayerKind),
            KindTag::Ship => Box::new(ShipKind),
        }
    }
}

/// A player avatar.
pub struct PlayerKind;

impl EntityKind for PlayerKind {
    fn is_ready(&self, scene: &Scene) -> bool {
        scene.contains_object(PLAYER_BODY)
    }

    fn acquire_authority_handle(&self, scene: &mut Scene) -> Option<TransformHandle> {
        scene.object(PLAYER_BODY)
    }

    fn acquire_observer_handle(&self, scene: &mut Scene) -> Option<TransformHandle> {
        scene.instantiate(PLAYER_BODY)
    }
}

/// The ship world object.
pub struct ShipKind;

impl EntityKind for ShipKind {
    fn is_ready(&self, scene: &Scene) -> bool {
        scene.contains_object(SHIP_BODY)
    }

    fn acquire_authority_handle(&self, scene: &mut Scene) -> Option<TransformHandle> {
        scene.object(SHIP_BODY)
    }

    fn acquire_observer_handle(&self, scene: &mut Scene) -> Option<TransformHandle> {
        scene.instantiate(SHIP_BODY)
    }
}
