//! Hand landmark sets.

use std::{fmt, ops::Index};

pub use nalgebra::Point3;

/// Number of landmarks of a hand.
pub const NUM_LANDMARKS: usize = 21;

/// The 21 keypoints of a hand, in normalized image coordinates.
///
/// Index 0 is the wrist, followed by 5 finger chains of 4 points each (thumb, index, middle, ring,
/// pinky), ordered from the palm outwards. See [`crate::hand::landmark::LandmarkIdx`].
///
/// A landmark set always contains exactly [`NUM_LANDMARKS`] points. Partial sets can't be
/// constructed.
#[derive(Clone, PartialEq)]
pub struct HandLandmarks {
    points: [Point3<f32>; NUM_LANDMARKS],
}

impl HandLandmarks {
    /// Creates a landmark set from a sequence of points.
    ///
    /// Returns an error if `points` does not yield exactly 21 points.
    pub fn from_points<I: IntoIterator<Item = Point3<f32>>>(points: I) -> anyhow::Result<Self> {
        let points = points.into_iter().collect::<Vec<_>>();
        let count = points.len();
        match <[Point3<f32>; NUM_LANDMARKS]>::try_from(points) {
            Ok(points) => Ok(Self { points }),
            Err(_) => anyhow::bail!("expected {NUM_LANDMARKS} hand landmarks, got {count}"),
        }
    }

    /// Creates a landmark set from a flat `[x0, y0, z0, x1, ...]` coordinate list.
    pub fn from_coords(coords: &[f32]) -> anyhow::Result<Self> {
        if coords.len() != NUM_LANDMARKS * 3 {
            anyhow::bail!(
                "expected {} landmark coordinates, got {}",
                NUM_LANDMARKS * 3,
                coords.len()
            );
        }
        Self::from_points(coords.chunks_exact(3).map(|c| Point3::new(c[0], c[1], c[2])))
    }

    #[inline]
    pub fn points(&self) -> &[Point3<f32>; NUM_LANDMARKS] {
        &self.points
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point3<f32>> {
        self.points.iter()
    }

    /// Returns the points as `[x, y, z]` arrays.
    pub fn to_arrays(&self) -> Vec<[f32; 3]> {
        self.points.iter().map(|p| [p.x, p.y, p.z]).collect()
    }
}

impl Index<usize> for HandLandmarks {
    type Output = Point3<f32>;

    fn index(&self, index: usize) -> &Point3<f32> {
        &self.points[index]
    }
}

impl<'a> IntoIterator for &'a HandLandmarks {
    type Item = &'a Point3<f32>;
    type IntoIter = std::slice::Iter<'a, Point3<f32>>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

impl fmt::Debug for HandLandmarks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.points.iter().map(|p| (p.x, p.y, p.z)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_21_points() {
        let pts = |n| (0..n).map(|i| Point3::new(i as f32, 0.0, 0.0));
        assert!(HandLandmarks::from_points(pts(20)).is_err());
        assert!(HandLandmarks::from_points(pts(22)).is_err());
        assert!(HandLandmarks::from_points(pts(0)).is_err());

        let lms = HandLandmarks::from_points(pts(21)).unwrap();
        assert_eq!(lms[20].x, 20.0);
        assert_eq!(lms.iter().count(), 21);
    }

    #[test]
    fn flat_coordinates() {
        let coords = (0..63).map(|i| i as f32).collect::<Vec<_>>();
        let lms = HandLandmarks::from_coords(&coords).unwrap();
        assert_eq!(lms[1], Point3::new(3.0, 4.0, 5.0));
        assert_eq!(lms.to_arrays()[20], [60.0, 61.0, 62.0]);

        assert!(HandLandmarks::from_coords(&coords[..60]).is_err());
    }
}
