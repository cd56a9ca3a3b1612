//! Geographic bounding boxes.

use serde::{Deserialize, Serialize};

/// A geographic bounding box in degrees.
///
/// For regular grids the bounds are the inclusive first and last grid
/// points, not cell edges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Create a new bounding box.
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Get the width in degrees.
    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    /// Get the height in degrees.
    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Check if a point is contained within this bounding box.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    /// Whether the box is well formed and within geographic limits.
    pub fn is_valid(&self) -> bool {
        self.min_lon <= self.max_lon
            && self.min_lat <= self.max_lat
            && self.min_lat >= -90.0
            && self.max_lat <= 90.0
            && self.width() <= 360.0
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        // 0..360 longitude convention used by the archive
        Self::new(0.0, -90.0, 360.0, 90.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_dimensions() {
        let bbox = BoundingBox::new(0.0, -90.0, 359.75, 90.0);
        assert!((bbox.width() - 359.75).abs() < f64::EPSILON);
        assert!((bbox.height() - 180.0).abs() < f64::EPSILON);
        assert!(bbox.is_valid());
    }

    #[test]
    fn test_bbox_contains() {
        let bbox = BoundingBox::new(-100.0, 30.0, -90.0, 40.0);
        assert!(bbox.contains(-95.0, 35.0));
        assert!(!bbox.contains(-105.0, 35.0));
        assert!(!bbox.contains(-95.0, 45.0));
    }

    #[test]
    fn test_bbox_invalid() {
        assert!(!BoundingBox::new(10.0, 0.0, 0.0, 10.0).is_valid());
        assert!(!BoundingBox::new(0.0, -91.0, 10.0, 10.0).is_valid());
    }
}
