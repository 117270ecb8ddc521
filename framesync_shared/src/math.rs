//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! It avoids SIMD/unsafe and focuses on stable semantics; the smoothing
//! functions carry explicit velocity state so callers own continuity
//! across ticks.

use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn len(self) -> f32 {
        self.len_sq().sqrt()
    }

    pub fn distance(self, rhs: Self) -> f32 {
        (self - rhs).len()
    }

    pub fn scale(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    pub fn lerp(self, to: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(
            self.x + (to.x - self.x) * t,
            self.y + (to.y - self.y) * t,
            self.z + (to.z - self.z) * t,
        )
    }

    /// Critically damped approach toward `target`.
    ///
    /// `velocity` persists across calls; feeding the same target each tick
    /// converges monotonically without overshoot. `smooth_time` is roughly
    /// the time to cover most of the remaining distance.
    pub fn smooth_damp(
        current: Self,
        target: Self,
        velocity: &mut Self,
        smooth_time: f32,
        dt: f32,
    ) -> Self {
        Self::new(
            smooth_damp_f32(current.x, target.x, &mut velocity.x, smooth_time, dt),
            smooth_damp_f32(current.y, target.y, &mut velocity.y, smooth_time, dt),
            smooth_damp_f32(current.z, target.z, &mut velocity.z, smooth_time, dt),
        )
    }
}

impl std::ops::Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// Scalar critically damped spring step.
///
/// Pade approximation of the exponential decay; clamped so the output never
/// crosses the target within a step.
pub fn smooth_damp_f32(
    current: f32,
    target: f32,
    velocity: &mut f32,
    smooth_time: f32,
    dt: f32,
) -> f32 {
    let smooth_time = smooth_time.max(1e-4);
    let dt = dt.max(1e-6);
    let omega = 2.0 / smooth_time;
    let x = omega * dt;
    let exp = 1.0 / (1.0 + x + 0.48 * x * x + 0.235 * x * x * x);

    let change = current - target;
    let temp = (*velocity + omega * change) * dt;
    *velocity = (*velocity - omega * temp) * exp;
    let mut output = target + (change + temp) * exp;

    // Clamp overshoot.
    if (target - current > 0.0) == (output > target) {
        output = target;
        *velocity = (output - target) / dt;
    }
    output
}

/// Unit quaternion (conceptually); stored unnormalized only transiently
/// inside the smoothing step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Rotation of `angle` radians about the Y axis. Enough for the tests
    /// and demo scenes; general axis-angle is not needed here.
    pub fn from_rotation_y(angle: f32) -> Self {
        let half = angle * 0.5;
        Self::new(0.0, half.sin(), 0.0, half.cos())
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z + self.w * rhs.w
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn normalize(self) -> Self {
        let len = self.len_sq().sqrt();
        if len <= f32::EPSILON {
            return Self::IDENTITY;
        }
        Self::new(self.x / len, self.y / len, self.z / len, self.w / len)
    }

    /// Conjugate; equals the inverse for unit quaternions.
    pub fn inverse(self) -> Self {
        Self::new(-self.x, -self.y, -self.z, self.w)
    }

    /// Hamilton product: applying `self` after `rhs`.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
        )
    }

    /// Rotates a vector by this quaternion.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let q = Quat::new(v.x, v.y, v.z, 0.0);
        let r = self.mul(q).mul(self.inverse());
        Vec3::new(r.x, r.y, r.z)
    }

    /// Angular distance to another rotation, in radians.
    pub fn angle_to(self, rhs: Self) -> f32 {
        let d = self.dot(rhs).abs().clamp(0.0, 1.0);
        2.0 * d.acos()
    }

    /// Critically damped approach toward `target` rotation.
    ///
    /// Component-wise damp over the shortest arc, renormalized afterward.
    /// `velocity` is raw 4-component state, zero at rest; the time constant
    /// is one render tick (`dt`), matching the position damp loosely enough
    /// to look coherent.
    pub fn smooth_damp(current: Self, target: Self, velocity: &mut [f32; 4], dt: f32) -> Self {
        // Shortest path: q and -q are the same rotation.
        let target = if current.dot(target) < 0.0 {
            Quat::new(-target.x, -target.y, -target.z, -target.w)
        } else {
            target
        };

        let smoothed = Quat::new(
            smooth_damp_f32(current.x, target.x, &mut velocity[0], dt, dt),
            smooth_damp_f32(current.y, target.y, &mut velocity[1], dt, dt),
            smooth_damp_f32(current.z, target.z, &mut velocity[2], dt, dt),
            smooth_damp_f32(current.w, target.w, &mut velocity[3], dt, dt),
        );
        smoothed.normalize()
    }
}

/// Position and rotation pair; the unit of replication.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub const fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }
}
