// ===========================================================================
// Transitive clustering of keyed items: nodes, terminals, stations, vertices
// ===========================================================================
use std::collections::BTreeMap;

/// Items joined transitively by [`Clusters::link`].
/// Keys are held sorted, so every cluster comes out ascending and clusters
/// come out ordered by their lowest key.
pub struct Clusters<K> {
    keys: Vec<K>,
    slot: BTreeMap<K, usize>,
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl<K: Copy + Ord> Clusters<K> {
    pub fn new(keys: impl IntoIterator<Item = K>) -> Self {
        let mut keys: Vec<K> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();
        let slot = keys.iter().enumerate().map(|(i, k)| (*k, i)).collect();
        let count = keys.len();
        Self {
            keys,
            slot,
            parent: (0..count).collect(),
            size: vec![1; count],
        }
    }

    fn root(&mut self, mut at: usize) -> usize {
        while self.parent[at] != at {
            // path halving
            self.parent[at] = self.parent[self.parent[at]];
            at = self.parent[at];
        }
        at
    }

    /// Put `a` and `b` in the same cluster. Keys not given to `new` are ignored.
    pub fn link(&mut self, a: K, b: K) {
        let (Some(&a), Some(&b)) = (self.slot.get(&a), self.slot.get(&b)) else {
            return;
        };
        let (a, b) = (self.root(a), self.root(b));
        if a == b {
            return;
        }
        let (large, small) = if self.size[a] >= self.size[b] { (a, b) } else { (b, a) };
        self.parent[small] = large;
        self.size[large] += self.size[small];
    }

    /// Every cluster, singletons included.
    pub fn into_clusters(mut self) -> Vec<Vec<K>> {
        let mut bucket_of: Vec<Option<usize>> = vec![None; self.keys.len()];
        let mut clusters: Vec<Vec<K>> = Vec::new();
        for at in 0..self.keys.len() {
            let root = self.root(at);
            let key = self.keys[at];
            match bucket_of[root] {
                Some(bucket) => clusters[bucket].push(key),
                None => {
                    bucket_of[root] = Some(clusters.len());
                    clusters.push(vec![key]);
                }
            }
        }
        clusters
    }

    /// Clusters of two or more keys, i.e. the merges to perform.
    pub fn into_merges(self) -> Vec<Vec<K>> {
        self.into_clusters()
            .into_iter()
            .filter(|cluster| cluster.len() > 1)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NodeId;

    #[test]
    fn links_chain_transitively_in_key_order() {
        let mut clusters = Clusters::new([NodeId(9), NodeId(4), NodeId(2), NodeId(7), NodeId(5)]);
        clusters.link(NodeId(9), NodeId(4));
        clusters.link(NodeId(4), NodeId(2));
        clusters.link(NodeId(7), NodeId(5));
        clusters.link(NodeId(7), NodeId(42));
        assert_eq!(
            clusters.into_merges(),
            vec![vec![NodeId(2), NodeId(4), NodeId(9)], vec![NodeId(5), NodeId(7)]]
        );
    }

    #[test]
    fn singletons_are_kept_as_clusters() {
        let mut clusters = Clusters::new(['c', 'a', 'b', 'a']);
        clusters.link('c', 'a');
        assert_eq!(clusters.into_clusters(), vec![vec!['a', 'c'], vec!['b']]);
    }
}
