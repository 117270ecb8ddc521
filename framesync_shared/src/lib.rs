//! `framesync_shared`
//!
//! Shared libraries used by both the authority (server) and peer (client)
//! processes of the transform/sector sync layer.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (math, transforms, channel, registry,
//!   synchronizer, net).
//! - Traits for abstraction and dependency injection; no globals, session
//!   state lives in an explicit context object.
//! - No `unsafe`.

pub mod channel;
pub mod config;
pub mod event;
pub mod frame;
pub mod kinds;
pub mod math;
pub mod net;
pub mod registry;
pub mod scene;
pub mod session;
pub mod sync;
pub mod transform;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::channel::*;
    pub use crate::config::*;
    pub use crate::frame::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::registry::*;
    pub use crate::scene::*;
    pub use crate::session::*;
    pub use crate::sync::*;
    pub use crate::transform::*;
}
