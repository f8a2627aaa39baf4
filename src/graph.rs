//! Generic undirected multigraph with connected-components queries, shared
//! by axes analysis (over `(value, dim)` nodes) and layout inference (over
//! tile-typed value nodes).

use std::hash::Hash;

use fxhash::FxHashMap;

/// A disjoint-set forest over an arbitrary hashable node type. Union-find
/// with path compression and union by rank.
pub struct UnionFind<T: Eq + Hash + Clone> {
    parent: FxHashMap<T, T>,
    rank: FxHashMap<T, u32>,
}

impl<T: Eq + Hash + Clone> Default for UnionFind<T> {
    fn default() -> Self {
        UnionFind { parent: FxHashMap::default(), rank: FxHashMap::default() }
    }
}

impl<T: Eq + Hash + Clone> UnionFind<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure(&mut self, node: &T) {
        if !self.parent.contains_key(node) {
            self.parent.insert(node.clone(), node.clone());
            self.rank.insert(node.clone(), 0);
        }
    }

    pub fn find(&mut self, node: &T) -> T {
        self.ensure(node);
        let parent = self.parent.get(node).unwrap().clone();
        if &parent == node {
            return parent;
        }
        let root = self.find(&parent);
        self.parent.insert(node.clone(), root.clone());
        root
    }

    pub fn union(&mut self, a: &T, b: &T) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let rank_a = *self.rank.get(&ra).unwrap();
        let rank_b = *self.rank.get(&rb).unwrap();
        if rank_a < rank_b {
            self.parent.insert(ra, rb);
        } else if rank_a > rank_b {
            self.parent.insert(rb, ra);
        } else {
            self.parent.insert(rb.clone(), ra.clone());
            self.rank.insert(ra, rank_a + 1);
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.parent.keys()
    }
}

/// An undirected multigraph used to build axes/layout equivalence classes.
/// Edges are accumulated and consumed only via `connected_components`.
pub struct UndirectedGraph<T: Eq + Hash + Clone> {
    uf: UnionFind<T>,
}

impl<T: Eq + Hash + Clone> Default for UndirectedGraph<T> {
    fn default() -> Self {
        UndirectedGraph { uf: UnionFind::default() }
    }
}

impl<T: Eq + Hash + Clone> UndirectedGraph<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: T) {
        self.uf.ensure(&node);
    }

    pub fn add_edge(&mut self, a: T, b: T) {
        self.uf.union(&a, &b);
    }

    /// Assigns a dense `usize` component id to every node that was ever
    /// added (as a node or as an edge endpoint). Stable only within one call.
    pub fn connected_components(&mut self) -> FxHashMap<T, usize> {
        let nodes: Vec<T> = self.uf.nodes().cloned().collect();
        let mut roots: FxHashMap<T, usize> = FxHashMap::default();
        let mut result = FxHashMap::default();
        for node in nodes {
            let root = self.uf.find(&node);
            let next_id = roots.len();
            let id = *roots.entry(root).or_insert(next_id);
            result.insert(node, id);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_find_groups_transitively() {
        let mut g: UndirectedGraph<u32> = UndirectedGraph::new();
        g.add_edge(1, 2);
        g.add_edge(2, 3);
        g.add_node(4);
        let comps = g.connected_components();
        assert_eq!(comps[&1], comps[&2]);
        assert_eq!(comps[&2], comps[&3]);
        assert_ne!(comps[&1], comps[&4]);
    }

    #[test]
    fn isolated_nodes_get_distinct_components() {
        let mut g: UndirectedGraph<&str> = UndirectedGraph::new();
        g.add_node("a");
        g.add_node("b");
        let comps = g.connected_components();
        assert_ne!(comps["a"], comps["b"]);
    }
}
