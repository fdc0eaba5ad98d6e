//! Axis-aligned bounding box with double precision.
//!
//! Input clouds arrive in projected or geocentric coordinates where f32 is
//! not enough; every box computation stays in f64 and only point positions
//! in the scaled local frame are stored as f32.

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Double-precision axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DAabb3 {
	/// Minimum corner (inclusive).
	pub min: DVec3,
	/// Maximum corner (inclusive).
	pub max: DVec3,
}

impl DAabb3 {
	/// Create a new AABB from min and max corners.
	///
	/// # Panics
	/// Debug-asserts that min <= max on all axes.
	pub fn new(min: DVec3, max: DVec3) -> Self {
		debug_assert!(
			min.x <= max.x && min.y <= max.y && min.z <= max.z,
			"AABB min must be <= max on all axes"
		);
		Self { min, max }
	}

	/// Tight box around a set of points, None when the set is empty.
	pub fn from_points<I>(points: I) -> Option<Self>
	where
		I: IntoIterator<Item = DVec3>,
	{
		let mut iter = points.into_iter();
		let first = iter.next()?;
		let mut aabb = Self::new(first, first);
		for p in iter {
			aabb.include(p);
		}
		Some(aabb)
	}

	/// Grow the box to contain `point`.
	#[inline]
	pub fn include(&mut self, point: DVec3) {
		self.min = self.min.min(point);
		self.max = self.max.max(point);
	}

	/// Smallest box containing both.
	pub fn union(&self, other: &DAabb3) -> DAabb3 {
		DAabb3 {
			min: self.min.min(other.min),
			max: self.max.max(other.max),
		}
	}

	/// Check if this AABB contains a point.
	#[inline]
	pub fn contains_point(&self, point: DVec3) -> bool {
		point.x >= self.min.x
			&& point.x <= self.max.x
			&& point.y >= self.min.y
			&& point.y <= self.max.y
			&& point.z >= self.min.z
			&& point.z <= self.max.z
	}

	/// Get the size of the AABB (max - min).
	#[inline]
	pub fn size(&self) -> DVec3 {
		self.max - self.min
	}

	/// Get the center of the AABB.
	#[inline]
	pub fn center(&self) -> DVec3 {
		(self.min + self.max) * 0.5
	}

	/// Octant index (0-7) of the half-space containing `point`.
	///
	/// Bit 0 = +X, bit 1 = +Y, bit 2 = +Z. Points on the splitting plane
	/// belong to the upper half.
	#[inline]
	pub fn octant_of(&self, point: DVec3) -> u8 {
		let c = self.center();
		(point.x >= c.x) as u8 | ((point.y >= c.y) as u8) << 1 | ((point.z >= c.z) as u8) << 2
	}

	/// Box of the child octant.
	pub fn child(&self, octant: u8) -> DAabb3 {
		let c = self.center();
		let pick = |bit: u8, lo: f64, mid: f64, hi: f64| {
			if octant & bit != 0 {
				(mid, hi)
			} else {
				(lo, mid)
			}
		};
		let (x0, x1) = pick(1, self.min.x, c.x, self.max.x);
		let (y0, y1) = pick(2, self.min.y, c.y, self.max.y);
		let (z0, z1) = pick(4, self.min.z, c.z, self.max.z);
		DAabb3 {
			min: DVec3::new(x0, y0, z0),
			max: DVec3::new(x1, y1, z1),
		}
	}

	/// Multiply both corners by a uniform factor.
	pub fn scaled(&self, factor: f64) -> DAabb3 {
		DAabb3 {
			min: self.min * factor,
			max: self.max * factor,
		}
	}

	/// Shift both corners by `-offset`.
	pub fn offset_by(&self, offset: DVec3) -> DAabb3 {
		DAabb3 {
			min: self.min - offset,
			max: self.max - offset,
		}
	}

	/// 3D Tiles `boundingVolume.box`: center followed by three half-axes.
	pub fn to_box_volume(&self) -> [f64; 12] {
		let c = self.center();
		let h = self.size() * 0.5;
		[c.x, c.y, c.z, h.x, 0.0, 0.0, 0.0, h.y, 0.0, 0.0, 0.0, h.z]
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_new() {
		let aabb = DAabb3::new(DVec3::new(-1.0, -2.0, -3.0), DVec3::new(1.0, 2.0, 3.0));
		assert_eq!(aabb.min, DVec3::new(-1.0, -2.0, -3.0));
		assert_eq!(aabb.max, DVec3::new(1.0, 2.0, 3.0));
	}

	#[test]
	fn test_from_points() {
		let aabb = DAabb3::from_points([
			DVec3::new(1.0, 5.0, -2.0),
			DVec3::new(-1.0, 2.0, 3.0),
			DVec3::new(0.0, 0.0, 0.0),
		])
		.unwrap();
		assert_eq!(aabb.min, DVec3::new(-1.0, 0.0, -2.0));
		assert_eq!(aabb.max, DVec3::new(1.0, 5.0, 3.0));
		assert!(DAabb3::from_points(std::iter::empty()).is_none());
	}

	#[test]
	fn test_contains_point() {
		let aabb = DAabb3::new(DVec3::ZERO, DVec3::splat(10.0));

		// Inside
		assert!(aabb.contains_point(DVec3::splat(5.0)));

		// On boundary
		assert!(aabb.contains_point(DVec3::ZERO));
		assert!(aabb.contains_point(DVec3::splat(10.0)));

		// Outside
		assert!(!aabb.contains_point(DVec3::splat(-1.0)));
		assert!(!aabb.contains_point(DVec3::splat(11.0)));
	}

	#[test]
	fn test_size_and_center() {
		let aabb = DAabb3::new(DVec3::new(-1.0, -2.0, -3.0), DVec3::new(1.0, 2.0, 3.0));
		assert_eq!(aabb.size(), DVec3::new(2.0, 4.0, 6.0));
		assert_eq!(aabb.center(), DVec3::ZERO);
	}

	#[test]
	fn test_octant_bits() {
		let aabb = DAabb3::new(DVec3::ZERO, DVec3::splat(2.0));
		assert_eq!(aabb.octant_of(DVec3::splat(0.5)), 0);
		assert_eq!(aabb.octant_of(DVec3::new(1.5, 0.5, 0.5)), 1);
		assert_eq!(aabb.octant_of(DVec3::new(0.5, 1.5, 0.5)), 2);
		assert_eq!(aabb.octant_of(DVec3::new(0.5, 0.5, 1.5)), 4);
		assert_eq!(aabb.octant_of(DVec3::splat(2.0)), 7);
		// Splitting plane goes to the upper half
		assert_eq!(aabb.octant_of(DVec3::new(1.0, 0.0, 0.0)), 1);
	}

	/// A point always lies inside the child box its octant designates.
	#[test]
	fn test_child_contains_routed_point() {
		let aabb = DAabb3::new(DVec3::new(-3.0, 0.0, 10.0), DVec3::new(5.0, 2.0, 14.0));
		let samples = [
			DVec3::new(-2.0, 0.1, 11.0),
			DVec3::new(4.9, 1.9, 13.9),
			DVec3::new(1.0, 1.0, 12.0),
			DVec3::new(0.0, 1.5, 10.5),
		];
		for p in samples {
			let child = aabb.child(aabb.octant_of(p));
			assert!(child.contains_point(p), "{p:?} not in {child:?}");
			assert_eq!(child.size(), aabb.size() * 0.5);
		}
	}

	#[test]
	fn test_box_volume() {
		let aabb = DAabb3::new(DVec3::ZERO, DVec3::new(2.0, 4.0, 6.0));
		assert_eq!(
			aabb.to_box_volume(),
			[1.0, 2.0, 3.0, 1.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 3.0]
		);
	}
}
