//! Per-country R-tree, built by Sort-Tile-Recursive bulk-load.
//!
//! Written as plain structs plus free functions, in the teacher's
//! `merkle.rs` style (`build_proof`/`merkle_root` are free functions over
//! a `Vec`, not a trait-heavy design) rather than pulling in a third-party
//! R-tree crate — the STR bulk-loader is this crate's core algorithm, not
//! something to delegate.

use crate::geometry::Bbox;

/// Default fan-out (`nodeCapacity` K in spec.md §6's configuration table).
pub const DEFAULT_NODE_CAPACITY: usize = 16;

/// A leaf entry: a district id and its bbox.
#[derive(Debug, Clone)]
pub struct LeafEntry {
    /// District id.
    pub id: String,
    /// District bbox.
    pub bbox: Bbox,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Leaf(LeafEntry),
    Internal(Vec<RNode>),
}

/// One node of the R-tree: a bbox plus either a leaf payload or children.
#[derive(Debug, Clone)]
pub struct RNode {
    bbox: Bbox,
    kind: NodeKind,
}

impl RNode {
    /// This node's bounding box (union of children bboxes for internal nodes).
    pub fn bbox(&self) -> &Bbox {
        &self.bbox
    }
}

/// An immutable per-country R-tree, built once by STR bulk-load and never
/// mutated for the life of the shard.
#[derive(Debug, Clone)]
pub struct RTree {
    root: Option<RNode>,
    node_capacity: usize,
}

impl RTree {
    /// Builds an R-tree over `entries` using Sort-Tile-Recursive bulk-load
    /// with fan-out `node_capacity`.
    ///
    /// Algorithm (spec.md §4.B Stage 3): sort leaves by x, split into
    /// `ceil(sqrt(n/K))` vertical slices of `ceil(n/slices)` each; within
    /// each slice sort by y and pack consecutive groups of K into
    /// leaf-parent nodes; each parent's bbox is the union of its
    /// children; recurse on the parent layer until one root remains.
    pub fn build_str(mut entries: Vec<LeafEntry>, node_capacity: usize) -> RTree {
        if entries.is_empty() {
            return RTree { root: None, node_capacity };
        }
        let k = node_capacity.max(1);
        let n = entries.len();
        let slices = ((n as f64 / k as f64).sqrt().ceil() as usize).max(1);
        let per_slice = n.div_ceil(slices);

        entries.sort_by(|a, b| {
            a.bbox
                .min_lon
                .partial_cmp(&b.bbox.min_lon)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut leaf_nodes: Vec<RNode> = Vec::with_capacity(n.div_ceil(k));
        for slice in entries.chunks(per_slice) {
            let mut slice = slice.to_vec();
            slice.sort_by(|a, b| {
                a.bbox
                    .min_lat
                    .partial_cmp(&b.bbox.min_lat)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            for group in slice.chunks(k) {
                let bbox = group
                    .iter()
                    .map(|e| e.bbox)
                    .reduce(|a, b| a.union(&b))
                    .expect("non-empty group");
                if group.len() == 1 {
                    leaf_nodes.push(RNode { bbox, kind: NodeKind::Leaf(group[0].clone()) });
                } else {
                    let children = group
                        .iter()
                        .map(|e| RNode { bbox: e.bbox, kind: NodeKind::Leaf(e.clone()) })
                        .collect();
                    leaf_nodes.push(RNode { bbox, kind: NodeKind::Internal(children) });
                }
            }
        }

        let root = pack_layer(leaf_nodes, k);
        RTree { root: Some(root), node_capacity: k }
    }

    /// Node fan-out this tree was built with.
    pub fn node_capacity(&self) -> usize {
        self.node_capacity
    }

    /// BFS from the root, pruning by point-in-bbox, emitting candidate ids
    /// whose leaf bbox contains the point. Order is not guaranteed.
    pub fn query_point(&self, lon: f64, lat: f64) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            let mut queue = vec![root];
            while let Some(node) = queue.pop() {
                if !node.bbox.contains_point(lon, lat) {
                    continue;
                }
                match &node.kind {
                    NodeKind::Leaf(entry) => out.push(entry.id.clone()),
                    NodeKind::Internal(children) => queue.extend(children.iter()),
                }
            }
        }
        out
    }

    /// Returns every district id within this shard (used by the boundary
    /// store's range query fallback and testing).
    pub fn all_ids(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            let mut stack = vec![root];
            while let Some(node) = stack.pop() {
                match &node.kind {
                    NodeKind::Leaf(entry) => out.push(entry.id.clone()),
                    NodeKind::Internal(children) => stack.extend(children.iter()),
                }
            }
        }
        out
    }
}

/// Recursively packs a layer of nodes into parents of fan-out `k` until a
/// single root remains.
fn pack_layer(mut layer: Vec<RNode>, k: usize) -> RNode {
    while layer.len() > 1 {
        let mut next = Vec::with_capacity(layer.len().div_ceil(k));
        for group in layer.chunks(k) {
            let bbox = group
                .iter()
                .map(|n| n.bbox)
                .reduce(|a, b| a.union(&b))
                .expect("non-empty group");
            next.push(RNode { bbox, kind: NodeKind::Internal(group.to_vec()) });
        }
        layer = next;
    }
    layer.into_iter().next().expect("layer started non-empty")
}

/// Asserts the child-bbox-containment invariant holds for every internal
/// node in the tree (spec.md §8 invariant 2).
pub fn check_bbox_union_invariant(node: &RNode) -> bool {
    match &node.kind {
        NodeKind::Leaf(_) => true,
        NodeKind::Internal(children) => {
            let union = children
                .iter()
                .map(|c| c.bbox)
                .reduce(|a, b| a.union(&b));
            match union {
                Some(u) => u == node.bbox && children.iter().all(check_bbox_union_invariant),
                None => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Bbox {
        Bbox { min_lon, min_lat, max_lon, max_lat }
    }

    fn grid_entries(n_per_side: i32) -> Vec<LeafEntry> {
        let mut out = Vec::new();
        for x in 0..n_per_side {
            for y in 0..n_per_side {
                let id = format!("cell-{x}-{y}");
                out.push(LeafEntry {
                    id,
                    bbox: bbox(x as f64, y as f64, x as f64 + 1.0, y as f64 + 1.0),
                });
            }
        }
        out
    }

    #[test]
    fn query_point_finds_containing_cell() {
        let tree = RTree::build_str(grid_entries(10), 4);
        let hits = tree.query_point(3.5, 7.5);
        assert!(hits.contains(&"cell-3-7".to_string()));
    }

    #[test]
    fn query_point_outside_all_cells_is_empty() {
        let tree = RTree::build_str(grid_entries(10), 4);
        assert!(tree.query_point(100.0, 100.0).is_empty());
    }

    #[test]
    fn bbox_union_invariant_holds_after_build() {
        let tree = RTree::build_str(grid_entries(12), 16);
        if let Some(root) = &tree.root {
            assert!(check_bbox_union_invariant(root));
        }
    }

    #[test]
    fn all_ids_recovers_every_entry() {
        let entries = grid_entries(5);
        let expected: std::collections::HashSet<_> = entries.iter().map(|e| e.id.clone()).collect();
        let tree = RTree::build_str(entries, 16);
        let got: std::collections::HashSet<_> = tree.all_ids().into_iter().collect();
        assert_eq!(expected, got);
    }

    #[test]
    fn empty_tree_queries_return_empty() {
        let tree = RTree::build_str(Vec::new(), DEFAULT_NODE_CAPACITY);
        assert!(tree.query_point(0.0, 0.0).is_empty());
    }
}
