//! Deterministic fixed-point math.
//!
//! Scalars are integers with an implicit scale factor of 1000, so `1.5` is
//! stored as `1500`. Every operation stays in the integer domain; canonical
//! snapshots therefore never contain floats and hash identically across
//! architectures.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Scale factor: thousandths.
pub const SCALE: i64 = 1000;

/// Fixed-point scalar, thousandths of a unit.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Fx(i64);

impl Fx {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(SCALE);

    /// Construct directly from raw thousandths.
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Construct from a whole number of units.
    pub const fn from_int(n: i64) -> Self {
        Self(n * SCALE)
    }

    /// Construct from whole units plus thousandths.
    pub const fn from_parts(units: i64, thousandths: i64) -> Self {
        Self(units * SCALE + thousandths)
    }

    /// Raw thousandths.
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Whole units, truncated toward zero.
    pub const fn trunc(self) -> i64 {
        self.0 / SCALE
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    /// Fixed-point multiply. The intermediate product is widened to i128 so
    /// the only overflow possible is in the final narrowing.
    pub fn checked_mul(self, rhs: Self) -> Option<Self> {
        let wide = i128::from(self.0) * i128::from(rhs.0) / i128::from(SCALE);
        i64::try_from(wide).ok().map(Self)
    }

    pub fn checked_div(self, rhs: Self) -> Option<Self> {
        if rhs.0 == 0 {
            return None;
        }
        let wide = i128::from(self.0) * i128::from(SCALE) / i128::from(rhs.0);
        i64::try_from(wide).ok().map(Self)
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }

    /// Lossy float view, for display and rendering only.
    pub fn to_f32(self) -> f32 {
        self.0 as f32 / SCALE as f32
    }
}

impl Add for Fx {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Fx {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Fx {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Fx {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for Fx {
    type Output = Self;
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Display for Fx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units = self.0 / SCALE;
        let frac = (self.0 % SCALE).abs();
        write!(f, "{units}.{frac:03}")
    }
}

/// 2D fixed-point vector.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Vec2Fx {
    pub x: Fx,
    pub y: Fx,
}

impl Vec2Fx {
    pub const ZERO: Self = Self {
        x: Fx::ZERO,
        y: Fx::ZERO,
    };

    pub const fn new(x: Fx, y: Fx) -> Self {
        Self { x, y }
    }

    pub const fn from_raw(x: i64, y: i64) -> Self {
        Self {
            x: Fx::from_raw(x),
            y: Fx::from_raw(y),
        }
    }

    pub fn dot(self, rhs: Self) -> Option<Fx> {
        let xx = self.x.checked_mul(rhs.x)?;
        let yy = self.y.checked_mul(rhs.y)?;
        xx.checked_add(yy)
    }

    pub fn scale(self, factor: Fx) -> Option<Self> {
        Some(Self {
            x: self.x.checked_mul(factor)?,
            y: self.y.checked_mul(factor)?,
        })
    }

    pub fn length_sq(self) -> Option<Fx> {
        self.dot(self)
    }
}

impl Add for Vec2Fx {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl Sub for Vec2Fx {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

/// 3D fixed-point vector.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Vec3Fx {
    pub x: Fx,
    pub y: Fx,
    pub z: Fx,
}

impl Vec3Fx {
    pub const ZERO: Self = Self {
        x: Fx::ZERO,
        y: Fx::ZERO,
        z: Fx::ZERO,
    };

    pub const fn new(x: Fx, y: Fx, z: Fx) -> Self {
        Self { x, y, z }
    }

    pub const fn from_raw(x: i64, y: i64, z: i64) -> Self {
        Self {
            x: Fx::from_raw(x),
            y: Fx::from_raw(y),
            z: Fx::from_raw(z),
        }
    }

    pub fn dot(self, rhs: Self) -> Option<Fx> {
        let xx = self.x.checked_mul(rhs.x)?;
        let yy = self.y.checked_mul(rhs.y)?;
        let zz = self.z.checked_mul(rhs.z)?;
        xx.checked_add(yy)?.checked_add(zz)
    }

    pub fn scale(self, factor: Fx) -> Option<Self> {
        Some(Self {
            x: self.x.checked_mul(factor)?,
            y: self.y.checked_mul(factor)?,
            z: self.z.checked_mul(factor)?,
        })
    }

    pub fn length_sq(self) -> Option<Fx> {
        self.dot(self)
    }
}

impl Add for Vec3Fx {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            z: self.z + rhs.z,
        }
    }
}

impl Sub for Vec3Fx {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}

/// Angle in millidegrees, normalized to `[0, 360_000)`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AngleFx(i64);

const FULL_TURN: i64 = 360 * SCALE;

impl AngleFx {
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Construct from millidegrees, wrapping into range.
    pub fn from_millideg(raw: i64) -> Self {
        Self(raw.rem_euclid(FULL_TURN))
    }

    pub fn from_degrees(deg: i64) -> Self {
        Self::from_millideg(deg * SCALE)
    }

    pub const fn millideg(self) -> i64 {
        self.0
    }

    pub fn rotate(self, delta: AngleFx) -> Self {
        Self::from_millideg(self.0 + delta.0)
    }

    /// Smallest signed difference `other - self`, in `(-180_000, 180_000]`.
    pub fn diff(self, other: Self) -> i64 {
        let mut d = (other.0 - self.0).rem_euclid(FULL_TURN);
        if d > FULL_TURN / 2 {
            d -= FULL_TURN;
        }
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_arithmetic_stays_scaled() {
        let a = Fx::from_parts(1, 500);
        let b = Fx::from_int(2);
        assert_eq!((a + b).raw(), 3500);
        assert_eq!(a.checked_mul(b).unwrap().raw(), 3000);
        assert_eq!(b.checked_div(a).unwrap().raw(), 1333);
    }

    #[test]
    fn division_by_zero_is_none() {
        assert!(Fx::ONE.checked_div(Fx::ZERO).is_none());
    }

    #[test]
    fn serializes_as_raw_integer() {
        let v = serde_json::to_value(Fx::from_parts(2, 250)).unwrap();
        assert_eq!(v, serde_json::json!(2250));
    }

    #[test]
    fn vec_dot_product() {
        let a = Vec2Fx::from_raw(2000, 3000);
        let b = Vec2Fx::from_raw(4000, 1000);
        assert_eq!(a.dot(b).unwrap().raw(), 11_000);
    }

    #[test]
    fn angle_wraps_both_directions() {
        assert_eq!(AngleFx::from_degrees(370).millideg(), 10_000);
        assert_eq!(AngleFx::from_degrees(-10).millideg(), 350_000);
    }

    #[test]
    fn angle_diff_takes_short_way() {
        let a = AngleFx::from_degrees(350);
        let b = AngleFx::from_degrees(10);
        assert_eq!(a.diff(b), 20_000);
        assert_eq!(b.diff(a), -20_000);
    }
}
