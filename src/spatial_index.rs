// ===========================================================================
// R-tree wrappers for terminal and envelope lookups
// ===========================================================================
use geo_types::{Coord, Rect};
use rstar::{AABB, PointDistance, RTree, RTreeObject};

/// A keyed point, e.g. a node or joint position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointEntry<K> {
    pub key: K,
    pub pos: [f64; 2],
}

impl<K> RTreeObject for PointEntry<K> {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.pos)
    }
}

impl<K> PointDistance for PointEntry<K> {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.pos[0] - point[0];
        let dy = self.pos[1] - point[1];
        dx * dx + dy * dy
    }
}

/// A keyed bounding box, e.g. a line or station extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeEntry<K> {
    pub key: K,
    pub bbox: AABB<[f64; 2]>,
}

impl<K> RTreeObject for EnvelopeEntry<K> {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.bbox
    }
}

pub fn to_aabb(rect: Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

/// Square envelope of half-width `radius` around a point.
pub fn around(pos: Coord<f64>, radius: f64) -> AABB<[f64; 2]> {
    AABB::from_corners(
        [pos.x - radius, pos.y - radius],
        [pos.x + radius, pos.y + radius],
    )
}

pub fn grow(bbox: AABB<[f64; 2]>, by: f64) -> AABB<[f64; 2]> {
    let lower = bbox.lower();
    let upper = bbox.upper();
    AABB::from_corners([lower[0] - by, lower[1] - by], [upper[0] + by, upper[1] + by])
}

pub struct PointIndex<K> {
    tree: RTree<PointEntry<K>>,
}

impl<K: Copy + Ord + PartialEq> PointIndex<K> {
    pub fn new(points: impl IntoIterator<Item = (K, Coord<f64>)>) -> Self {
        let entries: Vec<PointEntry<K>> = points
            .into_iter()
            .map(|(key, c)| PointEntry {
                key,
                pos: [c.x, c.y],
            })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Keys within `radius` of `pos`, ascending.
    pub fn within(&self, pos: Coord<f64>, radius: f64) -> Vec<K> {
        let mut keys: Vec<K> = self
            .tree
            .locate_within_distance([pos.x, pos.y], radius * radius)
            .map(|entry| entry.key)
            .collect();
        keys.sort();
        keys
    }
}

pub struct EnvelopeIndex<K> {
    tree: RTree<EnvelopeEntry<K>>,
}

impl<K: Copy + Ord + PartialEq> EnvelopeIndex<K> {
    pub fn new(boxes: impl IntoIterator<Item = (K, AABB<[f64; 2]>)>) -> Self {
        let entries: Vec<EnvelopeEntry<K>> = boxes
            .into_iter()
            .map(|(key, bbox)| EnvelopeEntry { key, bbox })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Keys whose envelope intersects `envelope`, ascending and deduplicated.
    pub fn intersecting(&self, envelope: &AABB<[f64; 2]>) -> Vec<K> {
        let mut keys: Vec<K> = self
            .tree
            .locate_in_envelope_intersecting(envelope)
            .map(|entry| entry.key)
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn insert(&mut self, key: K, bbox: AABB<[f64; 2]>) {
        self.tree.insert(EnvelopeEntry { key, bbox });
    }

    pub fn remove(&mut self, key: K, bbox: AABB<[f64; 2]>) -> bool {
        self.tree.remove(&EnvelopeEntry { key, bbox }).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_returns_sorted_keys_inside_radius() {
        let index = PointIndex::new(vec![
            (3u64, Coord { x: 0.0, y: 0.05 }),
            (1u64, Coord { x: 0.0, y: 0.0 }),
            (2u64, Coord { x: 5.0, y: 0.0 }),
        ]);
        assert_eq!(index.within(Coord { x: 0.0, y: 0.0 }, 0.1), vec![1, 3]);
    }

    #[test]
    fn envelope_index_tracks_inserts_and_removals() {
        let bbox = AABB::from_corners([0.0, 0.0], [1.0, 1.0]);
        let mut index = EnvelopeIndex::new(vec![(7u64, bbox)]);
        index.insert(8, AABB::from_corners([5.0, 5.0], [6.0, 6.0]));
        assert!(index.remove(7, bbox));
        assert_eq!(index.intersecting(&AABB::from_corners([0.0, 0.0], [10.0, 10.0])), vec![8]);
    }
}
