use glam::Vec3;

/// Describes a bounding box and a min max property in 3d space
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    min: Vec3,
    max: Vec3,
}

impl BoundingBox {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        let mut bounds = Self { min, max };
        bounds.correct();
        bounds
    }

    /// Box of extent `size` centered on `center`
    pub fn from_center_size(center: Vec3, size: Vec3) -> Self {
        let half = size.abs() * 0.5;
        Self {
            min: center - half,
            max: center + half,
        }
    }

    /// Correct the existing bounding box ensuring minimum bounds are minimum and maximum bounds
    /// are maximum extents
    pub fn correct(&mut self) {
        let min = self.min;
        let max = self.max;
        self.min = min.min(max);
        self.max = max.max(min);
    }

    pub fn min(&self) -> Vec3 {
        self.min
    }

    pub fn max(&self) -> Vec3 {
        self.max
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Overlap test, touching faces count as intersecting
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_swaps_inverted_extents() {
        let bounds = BoundingBox::new(Vec3::ONE, Vec3::ZERO);
        assert_eq!(bounds.min(), Vec3::ZERO);
        assert_eq!(bounds.max(), Vec3::ONE);
    }

    #[test]
    fn intersection() {
        let a = BoundingBox::from_center_size(Vec3::ZERO, Vec3::splat(2.0));
        let b = BoundingBox::from_center_size(Vec3::new(1.5, 0.0, 0.0), Vec3::ONE);
        let c = BoundingBox::from_center_size(Vec3::new(0.0, 5.0, 0.0), Vec3::ONE);
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
        assert!(a.contains_point(Vec3::new(1.0, -1.0, 0.5)));
        assert!(!a.contains_point(Vec3::new(1.1, 0.0, 0.0)));
        assert_eq!(b.center(), Vec3::new(1.5, 0.0, 0.0));
        assert_eq!(b.size(), Vec3::ONE);
    }
}
