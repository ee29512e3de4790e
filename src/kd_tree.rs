//! ## Incremental Self-Balancing 3D k-d Tree
//!
//! This module is a from-scratch Rust port of the `ikd-Tree` data structure
//! (Cai et al.) used in LiDAR-inertial mapping pipelines: a k-d tree over 3D
//! point clouds that supports bulk construction, k-nearest-neighbor search,
//! point insertion, point deletion and axis-aligned box deletion, while
//! staying approximately balanced under arbitrary update sequences via
//! partial subtree rebuilds.
//!
//! Unlike a textbook k-d tree, deletion is lazy: a deleted point's node
//! stays in place (marked `point_deleted`) until a rebuild reclaims it.
//! Each node tracks enough aggregate state — valid-point count, deleted
//! count, and a bounding box enclosing every point (valid or not) in its
//! subtree — that a cheap local criterion can decide, on every mutation,
//! whether the shallowest unbalanced or over-deleted subtree should be
//! flattened and rebuilt.
//!
//! ### Example
//!
//! ```
//! use ikd_tree::geometry::Point3D;
//! use ikd_tree::kd_tree::KdTree;
//!
//! let mut tree: KdTree<Point3D> = KdTree::new(0.5, 0.7).unwrap();
//! tree.build(vec![
//!     Point3D::new(0.0, 0.0, 0.0),
//!     Point3D::new(1.0, 0.0, 0.0),
//!     Point3D::new(0.0, 1.0, 0.0),
//! ]);
//! let nearest = tree.nearest_search(&Point3D::new(0.1, 0.1, 0.1), 1).unwrap();
//! assert_eq!(nearest, vec![Point3D::new(0.0, 0.0, 0.0)]);
//! ```

use crate::errors::IkdError;
use crate::geometry::{BoundingBox, Point3};
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::{debug, info};

/// Internal structure used to store candidates in the k-nearest-neighbor heap.
#[derive(Debug)]
struct HeapItem<P> {
    dist: OrderedFloat<f64>,
    point: P,
}

impl<P> PartialEq for HeapItem<P> {
    fn eq(&self, other: &Self) -> bool {
        self.dist.eq(&other.dist)
    }
}

impl<P> Eq for HeapItem<P> {}

impl<P> PartialOrd for HeapItem<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P> Ord for HeapItem<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist.cmp(&other.dist)
    }
}

/// A node in the k-d tree: a pivot point plus the aggregate statistics of
/// its subtree (tree size, invalid count, deleted flags, bounding box).
#[derive(Debug)]
struct KdNode<P> {
    pivot: P,
    axis: usize,
    left: Option<Box<KdNode<P>>>,
    right: Option<Box<KdNode<P>>>,
    point_deleted: bool,
    tree_deleted: bool,
    tree_size: usize,
    invalid_num: usize,
    bbox: BoundingBox,
}

impl<P: Point3> KdNode<P> {
    fn new_leaf(pivot: P) -> Self {
        let bbox = BoundingBox::from_point(&pivot);
        KdNode {
            pivot,
            axis: 0,
            left: None,
            right: None,
            point_deleted: false,
            tree_deleted: false,
            tree_size: 1,
            invalid_num: 0,
            bbox,
        }
    }

    /// Total physical node count of this subtree (valid + lazily deleted).
    fn total(&self) -> usize {
        self.tree_size + self.invalid_num
    }
}

/// Tuning parameters controlling how aggressively rebuilds fire under
/// deletion pressure (`alpha_delete`) and imbalance (`alpha_balance`).
#[derive(Debug, Clone, Copy)]
struct Tuning {
    alpha_delete: f64,
    alpha_balance: f64,
}

fn validate_alpha_delete(v: f64) -> Result<(), IkdError> {
    if v > 0.0 && v <= 1.0 {
        Ok(())
    } else {
        Err(IkdError::InvalidParameter {
            name: "alpha_delete",
            value: v,
            expected: "a value in (0, 1]",
        })
    }
}

fn validate_alpha_balance(v: f64) -> Result<(), IkdError> {
    if v > 0.5 && v < 1.0 {
        Ok(())
    } else {
        Err(IkdError::InvalidParameter {
            name: "alpha_balance",
            value: v,
            expected: "a value in (0.5, 1)",
        })
    }
}

/// Recomputes `tree_size`, `invalid_num`, `tree_deleted` and `bbox` for `node`
/// from its children's current aggregates and its own `point_deleted` flag.
/// This is the sole place invariants I1-I4 are (re-)established; every
/// mutator calls it on the way back up from a structural change.
fn update<P: Point3>(node: &mut KdNode<P>) {
    let mut tree_size = usize::from(!node.point_deleted);
    let mut invalid_num = usize::from(node.point_deleted);
    let mut tree_deleted = node.point_deleted;
    let mut bbox = BoundingBox::from_point(&node.pivot);

    if let Some(left) = &node.left {
        tree_size += left.tree_size;
        invalid_num += left.invalid_num;
        tree_deleted &= left.tree_deleted;
        bbox = bbox.merge(&left.bbox);
    }
    if let Some(right) = &node.right {
        tree_size += right.tree_size;
        invalid_num += right.invalid_num;
        tree_deleted &= right.tree_deleted;
        bbox = bbox.merge(&right.bbox);
    }

    node.tree_size = tree_size;
    node.invalid_num = invalid_num;
    node.tree_deleted = tree_deleted;
    node.bbox = bbox;
}

/// Decides whether `node`'s subtree is too polluted by lazily-deleted
/// points or too unbalanced, and should be rebuilt.
fn need_rebuild<P: Point3>(node: &KdNode<P>, tuning: &Tuning) -> bool {
    if node.tree_size < 2 {
        return false;
    }
    let total = node.total() as f64;
    let d = node.invalid_num as f64 / total;
    if d > tuning.alpha_delete {
        return true;
    }
    let left_total = node.left.as_ref().map_or(0, |n| n.total());
    let right_total = node.right.as_ref().map_or(0, |n| n.total());
    let s = left_total.max(right_total) as f64;
    let b = s / total;
    b > tuning.alpha_balance || b < 1.0 - tuning.alpha_balance
}

/// Same-point test under the tree's epsilon: coordinate-wise equality within
/// an absolute tolerance.
fn same_point<P: Point3>(a: &P, b: &P, epsilon: f64) -> bool {
    (a.x() - b.x()).abs() < epsilon
        && (a.y() - b.y()).abs() < epsilon
        && (a.z() - b.z()).abs() < epsilon
}

/// Picks the axis of maximum variance over `points`, true summed variance
/// (not the source's overwrite bug), lowest-index axis wins ties.
fn choose_axis<P: Point3>(points: &[P]) -> usize {
    let n = points.len() as f64;
    let mut mean = [0.0; 3];
    for p in points {
        mean[0] += p.x();
        mean[1] += p.y();
        mean[2] += p.z();
    }
    for m in &mut mean {
        *m /= n;
    }
    let mut variance = [0.0; 3];
    for p in points {
        for (axis, m) in mean.iter().enumerate() {
            let d = p.coord(axis) - m;
            variance[axis] += d * d;
        }
    }
    let mut best = 0;
    for axis in 1..3 {
        if variance[axis] > variance[best] {
            best = axis;
        }
    }
    best
}

/// Partitions `points` in place so that every element with `coord(axis) <
/// pivot_value` comes before every element with `coord(axis) >= pivot_value`.
/// Returns the index of the first element of the `>=` group.
fn partition_lt<P: Point3>(points: &mut [P], axis: usize, pivot_value: f64) -> usize {
    let mut i = 0;
    for j in 0..points.len() {
        if points[j].coord(axis) < pivot_value {
            points.swap(i, j);
            i += 1;
        }
    }
    i
}

/// Builds a balanced subtree from `points`, recursively partitioning around
/// the median of the highest-variance axis. `points` is scratch storage and
/// may end up reordered; its final element order is not meaningful.
///
/// The partition enforces `coord(axis) < pivot` strictly to the left and
/// `coord(axis) >= pivot` to the right, so that ties on the split axis
/// always land to the right of their pivot — matching the descent rule used
/// by insertion and point deletion. A naive median-of-`nth_element` split
/// (as in the original source this was ported from) only guarantees the two
/// halves compare correctly against the pivot value, not which side ties
/// land on, and the single-path descent below relies on that direction.
fn build_tree<P: Point3>(points: &mut [P]) -> Option<Box<KdNode<P>>> {
    if points.is_empty() {
        return None;
    }
    let axis = choose_axis(points);
    let median = points.len() / 2;
    points.select_nth_unstable_by(median, |a, b| {
        a.coord(axis).partial_cmp(&b.coord(axis)).unwrap_or(Ordering::Equal)
    });
    let pivot_value = points[median].coord(axis);

    let split = partition_lt(points, axis, pivot_value);
    let eq_idx = (split..points.len())
        .find(|&k| points[k].coord(axis) == pivot_value)
        .expect("pivot value must occur at least once in its own partition");
    points.swap(split, eq_idx);

    let mut node = KdNode::new_leaf(points[split].clone());
    node.axis = axis;
    let (left_slice, right_slice) = points.split_at_mut(split);
    let right_slice = &mut right_slice[1..];
    node.left = build_tree(left_slice);
    node.right = build_tree(right_slice);
    update(&mut node);
    Some(Box::new(node))
}

/// Flattens the valid points of `node`'s subtree into `out`, in-order,
/// skipping `tree_deleted` subtrees and `point_deleted` pivots.
fn flatten<P: Point3>(node: &KdNode<P>, out: &mut Vec<P>) {
    if node.tree_deleted {
        return;
    }
    if let Some(left) = &node.left {
        flatten(left, out);
    }
    if !node.point_deleted {
        out.push(node.pivot.clone());
    }
    if let Some(right) = &node.right {
        flatten(right, out);
    }
}

/// Rebuilds `node`'s subtree from its currently-valid points, replacing it
/// in place. Returns `None` if the subtree held no valid points.
fn rebuild<P: Point3>(node: Box<KdNode<P>>, scratch: &mut Vec<P>) -> Option<Box<KdNode<P>>> {
    scratch.clear();
    flatten(&node, scratch);
    build_tree(scratch)
}

/// After re-aggregating `node` and checking its own criterion, rebuilds
/// whichever child was marked by the recursive call below it (but only if
/// `node` itself isn't also marked — a marked ancestor's rebuild subsumes
/// all marked descendants in one pass). Returns the settled node and
/// whether `node` itself is now marked for rebuild by its caller.
fn settle<P: Point3>(
    mut node: Box<KdNode<P>>,
    left_marked: bool,
    right_marked: bool,
    tuning: &Tuning,
    scratch: &mut Vec<P>,
) -> (Box<KdNode<P>>, bool) {
    update(&mut node);
    let marked = need_rebuild(&node, tuning);
    if !marked {
        if left_marked {
            if let Some(left) = node.left.take() {
                node.left = rebuild(left, scratch);
            }
        }
        if right_marked {
            if let Some(right) = node.right.take() {
                node.right = rebuild(right, scratch);
            }
        }
        if left_marked || right_marked {
            update(&mut node);
        }
    }
    (node, marked)
}

fn add_rec<P: Point3>(
    node: Option<Box<KdNode<P>>>,
    point: P,
    tuning: &Tuning,
    scratch: &mut Vec<P>,
) -> (Box<KdNode<P>>, bool) {
    match node {
        None => {
            let mut leaf = KdNode::new_leaf(point);
            update(&mut leaf);
            (Box::new(leaf), false)
        }
        Some(mut node) => {
            let axis = node.axis;
            if point.coord(axis) < node.pivot.coord(axis) {
                let (new_left, marked) = add_rec(node.left.take(), point, tuning, scratch);
                node.left = Some(new_left);
                settle(node, marked, false, tuning, scratch)
            } else {
                let (new_right, marked) = add_rec(node.right.take(), point, tuning, scratch);
                node.right = Some(new_right);
                settle(node, false, marked, tuning, scratch)
            }
        }
    }
}

fn delete_by_point_rec<P: Point3>(
    node: Option<Box<KdNode<P>>>,
    target: &P,
    epsilon: f64,
    tuning: &Tuning,
    scratch: &mut Vec<P>,
) -> (Option<Box<KdNode<P>>>, bool, bool) {
    match node {
        None => (None, false, false),
        Some(mut node) => {
            if !node.point_deleted && same_point(&node.pivot, target, epsilon) {
                node.point_deleted = true;
                update(&mut node);
                let marked = need_rebuild(&node, tuning);
                (Some(node), true, marked)
            } else {
                let axis = node.axis;
                let goes_left = target.coord(axis) < node.pivot.coord(axis) - epsilon;
                if goes_left {
                    let (new_left, found, child_marked) =
                        delete_by_point_rec(node.left.take(), target, epsilon, tuning, scratch);
                    node.left = new_left;
                    let (node, marked) = settle(node, child_marked, false, tuning, scratch);
                    (Some(node), found, marked)
                } else {
                    let (new_right, found, child_marked) =
                        delete_by_point_rec(node.right.take(), target, epsilon, tuning, scratch);
                    node.right = new_right;
                    let (node, marked) = settle(node, false, child_marked, tuning, scratch);
                    (Some(node), found, marked)
                }
            }
        }
    }
}

fn delete_by_range_rec<P: Point3>(
    node: Option<Box<KdNode<P>>>,
    query: &BoundingBox,
    tuning: &Tuning,
    scratch: &mut Vec<P>,
) -> (Option<Box<KdNode<P>>>, bool) {
    match node {
        None => (None, false),
        Some(mut node) => {
            if node.bbox.strictly_inside(query) {
                node.invalid_num += node.tree_size;
                node.tree_size = 0;
                node.point_deleted = true;
                node.tree_deleted = true;
                return (Some(node), false);
            }
            let (new_left, left_marked) =
                delete_by_range_rec(node.left.take(), query, tuning, scratch);
            node.left = new_left;
            let (new_right, right_marked) =
                delete_by_range_rec(node.right.take(), query, tuning, scratch);
            node.right = new_right;
            let (node, marked) = settle(node, left_marked, right_marked, tuning, scratch);
            (Some(node), marked)
        }
    }
}

fn search_rec<P: Point3>(
    node: &Option<Box<KdNode<P>>>,
    query: &P,
    k: usize,
    heap: &mut BinaryHeap<HeapItem<P>>,
) {
    let Some(node) = node else { return };
    if node.tree_deleted {
        return;
    }
    if !node.point_deleted {
        let dist = OrderedFloat(query.distance_sq(&node.pivot));
        if heap.len() < k {
            heap.push(HeapItem {
                dist,
                point: node.pivot.clone(),
            });
        } else if heap.peek().is_some_and(|top| dist < top.dist) {
            heap.pop();
            heap.push(HeapItem {
                dist,
                point: node.pivot.clone(),
            });
        }
    }

    let left_dist = node.left.as_ref().map_or(f64::INFINITY, |n| n.bbox.dist_sq(query));
    let right_dist = node.right.as_ref().map_or(f64::INFINITY, |n| n.bbox.dist_sq(query));
    let worth_visiting = |d: f64, heap: &BinaryHeap<HeapItem<P>>| {
        heap.len() < k || heap.peek().is_some_and(|top| d < top.dist.into_inner())
    };

    let (near, near_dist, far, far_dist) = if left_dist <= right_dist {
        (&node.left, left_dist, &node.right, right_dist)
    } else {
        (&node.right, right_dist, &node.left, left_dist)
    };
    if worth_visiting(near_dist, heap) {
        search_rec(near, query, k, heap);
    }
    if worth_visiting(far_dist, heap) {
        search_rec(far, query, k, heap);
    }
}

/// An incremental, self-balancing k-d tree over 3D points.
///
/// See the module documentation for the balancing scheme. `P` is the
/// point value type consumed by the tree; it is the caller's
/// responsibility to implement [`Point3`] for it.
#[derive(Debug)]
pub struct KdTree<P> {
    root: Option<Box<KdNode<P>>>,
    tuning: Tuning,
    epsilon: f64,
    scratch: Vec<P>,
    rebuild_counter: u64,
    search_counter: u64,
}

impl<P: Point3> KdTree<P> {
    /// Creates a new, empty tree with the given tuning parameters and the
    /// default point-equality epsilon (`1e-8`).
    ///
    /// # Errors
    ///
    /// Returns [`IkdError::InvalidParameter`] if `alpha_delete` is not in
    /// `(0, 1]` or `alpha_balance` is not in `(0.5, 1)`.
    pub fn new(alpha_delete: f64, alpha_balance: f64) -> Result<Self, IkdError> {
        Self::with_epsilon(alpha_delete, alpha_balance, 1e-8)
    }

    /// Like [`KdTree::new`], with an explicit point-equality epsilon, fixed
    /// for the tree's lifetime.
    pub fn with_epsilon(
        alpha_delete: f64,
        alpha_balance: f64,
        epsilon: f64,
    ) -> Result<Self, IkdError> {
        validate_alpha_delete(alpha_delete)?;
        validate_alpha_balance(alpha_balance)?;
        Ok(KdTree {
            root: None,
            tuning: Tuning {
                alpha_delete,
                alpha_balance,
            },
            epsilon,
            scratch: Vec::new(),
            rebuild_counter: 0,
            search_counter: 0,
        })
    }

    /// Updates the delete-ratio rebuild threshold.
    ///
    /// # Errors
    ///
    /// Returns [`IkdError::InvalidParameter`] if `v` is not in `(0, 1]`.
    pub fn set_alpha_delete(&mut self, v: f64) -> Result<(), IkdError> {
        validate_alpha_delete(v)?;
        self.tuning.alpha_delete = v;
        Ok(())
    }

    /// Updates the balance-ratio rebuild threshold.
    ///
    /// # Errors
    ///
    /// Returns [`IkdError::InvalidParameter`] if `v` is not in `(0.5, 1)`.
    pub fn set_alpha_balance(&mut self, v: f64) -> Result<(), IkdError> {
        validate_alpha_balance(v)?;
        self.tuning.alpha_balance = v;
        Ok(())
    }

    /// Number of valid (non-deleted) points currently in the tree.
    pub fn len(&self) -> usize {
        self.root.as_ref().map_or(0, |n| n.tree_size)
    }

    /// True iff the tree holds no valid points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of internal rebuilds performed so far. Diagnostic only, not
    /// part of the semantic contract.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_counter
    }

    /// Number of `nearest_search` calls performed so far. Diagnostic only.
    pub fn search_count(&self) -> u64 {
        self.search_counter
    }

    /// Discards any existing tree and builds a fresh, balanced one from `points`.
    pub fn build(&mut self, points: Vec<P>) {
        info!("building tree from {} points", points.len());
        self.scratch = points;
        self.root = build_tree(&mut self.scratch);
        self.scratch.clear();
        self.rebuild_counter = 0;
    }

    /// Inserts each point of `points` in order, rebuilding the shallowest
    /// unbalanced or over-deleted subtree along the way whenever needed.
    pub fn add_points(&mut self, points: Vec<P>) {
        for point in points {
            debug!("adding point: {point:?}");
            let root = self.root.take();
            let (mut new_root, marked) = add_rec(root, point, &self.tuning, &mut self.scratch);
            if marked {
                if let Some(rebuilt) = rebuild(new_root, &mut self.scratch) {
                    new_root = rebuilt;
                    self.rebuild_counter += 1;
                } else {
                    unreachable!("a node marked for rebuild always holds at least one valid point");
                }
            }
            self.root = Some(new_root);
        }
    }

    /// Marks each point of `points` deleted if an exact (within epsilon)
    /// match is found, descending from the root for each one independently.
    /// Returns, in input order, whether each point was found and marked.
    pub fn delete_points(&mut self, points: &[P]) -> Vec<bool> {
        let mut results = Vec::with_capacity(points.len());
        for point in points {
            debug!("deleting point: {point:?}");
            let root = self.root.take();
            let (mut new_root, found, marked) =
                delete_by_point_rec(root, point, self.epsilon, &self.tuning, &mut self.scratch);
            if marked {
                if let Some(node) = new_root.take() {
                    new_root = rebuild(node, &mut self.scratch);
                    self.rebuild_counter += 1;
                }
            }
            self.root = new_root;
            results.push(found);
        }
        results
    }

    /// Marks every point strictly inside any of `boxes` deleted. A point
    /// exactly on a box's face is not considered enclosed.
    pub fn delete_point_boxes(&mut self, boxes: &[BoundingBox]) {
        for query in boxes {
            debug!("deleting points inside box: {query:?}");
            let root = self.root.take();
            let (mut new_root, marked) =
                delete_by_range_rec(root, query, &self.tuning, &mut self.scratch);
            if marked {
                if let Some(node) = new_root.take() {
                    new_root = rebuild(node, &mut self.scratch);
                    self.rebuild_counter += 1;
                }
            }
            self.root = new_root;
        }
    }

    /// Finds up to `k` valid points minimizing squared Euclidean distance to `query`,
    /// in ascending distance order.
    ///
    /// # Errors
    ///
    /// Returns [`IkdError::InvalidParameter`] if `k == 0`.
    pub fn nearest_search(&mut self, query: &P, k: usize) -> Result<Vec<P>, IkdError> {
        if k == 0 {
            return Err(IkdError::InvalidParameter {
                name: "k",
                value: 0.0,
                expected: "a positive integer",
            });
        }
        self.search_counter += 1;
        let mut heap: BinaryHeap<HeapItem<P>> = BinaryHeap::new();
        search_rec(&self.root, query, k, &mut heap);
        let mut results: Vec<(f64, P)> = heap
            .into_iter()
            .map(|item| (item.dist.into_inner(), item.point))
            .collect();
        results.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        Ok(results.into_iter().map(|(_, p)| p).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point3D;
    use proptest::prelude::*;

    fn pt(x: f64, y: f64, z: f64) -> Point3D {
        Point3D::new(x, y, z)
    }

    #[test]
    fn test_new_rejects_bad_tuning() {
        assert!(matches!(
            KdTree::<Point3D>::new(0.0, 0.7),
            Err(IkdError::InvalidParameter { name: "alpha_delete", .. })
        ));
        assert!(matches!(
            KdTree::<Point3D>::new(1.1, 0.7),
            Err(IkdError::InvalidParameter { name: "alpha_delete", .. })
        ));
        assert!(matches!(
            KdTree::<Point3D>::new(0.5, 0.5),
            Err(IkdError::InvalidParameter { name: "alpha_balance", .. })
        ));
        assert!(matches!(
            KdTree::<Point3D>::new(0.5, 1.0),
            Err(IkdError::InvalidParameter { name: "alpha_balance", .. })
        ));
        assert!(KdTree::<Point3D>::new(0.5, 0.7).is_ok());
    }

    #[test]
    fn test_build_and_1nn() {
        let mut tree: KdTree<Point3D> = KdTree::new(0.5, 0.7).unwrap();
        tree.build(vec![
            pt(0.0, 0.0, 0.0),
            pt(1.0, 0.0, 0.0),
            pt(0.0, 1.0, 0.0),
            pt(0.0, 0.0, 1.0),
            pt(2.0, 2.0, 2.0),
        ]);
        let result = tree.nearest_search(&pt(0.1, 0.1, 0.1), 1).unwrap();
        assert_eq!(result, vec![pt(0.0, 0.0, 0.0)]);
    }

    #[test]
    fn test_build_and_3nn() {
        let mut tree: KdTree<Point3D> = KdTree::new(0.5, 0.7).unwrap();
        tree.build(vec![
            pt(0.0, 0.0, 0.0),
            pt(1.0, 0.0, 0.0),
            pt(0.0, 1.0, 0.0),
            pt(0.0, 0.0, 1.0),
            pt(2.0, 2.0, 2.0),
        ]);
        let result = tree.nearest_search(&pt(0.9, 0.0, 0.0), 3).unwrap();
        assert_eq!(&result[0..2], &[pt(1.0, 0.0, 0.0), pt(0.0, 0.0, 0.0)]);
        assert!(result[2] == pt(0.0, 1.0, 0.0) || result[2] == pt(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_delete_then_search() {
        let mut tree: KdTree<Point3D> = KdTree::new(0.5, 0.7).unwrap();
        tree.build(vec![
            pt(0.0, 0.0, 0.0),
            pt(1.0, 0.0, 0.0),
            pt(0.0, 1.0, 0.0),
            pt(0.0, 0.0, 1.0),
            pt(2.0, 2.0, 2.0),
        ]);
        let results = tree.delete_points(&[pt(1.0, 0.0, 0.0)]);
        assert_eq!(results, vec![true]);
        let result = tree.nearest_search(&pt(0.9, 0.0, 0.0), 1).unwrap();
        assert_eq!(result, vec![pt(0.0, 0.0, 0.0)]);
    }

    #[test]
    fn test_box_delete() {
        let mut tree: KdTree<Point3D> = KdTree::new(0.5, 0.7).unwrap();
        tree.build(vec![
            pt(-1.0, 0.0, 0.0),
            pt(1.0, 0.0, 0.0),
            pt(0.0, -1.0, 0.0),
            pt(0.0, 1.0, 0.0),
            pt(0.0, 0.0, 0.0),
        ]);
        tree.delete_point_boxes(&[BoundingBox::from_ranges(
            [-0.5, 0.5],
            [-0.5, 0.5],
            [-0.5, 0.5],
        )]);
        assert_eq!(tree.len(), 4);
        let result = tree.nearest_search(&pt(0.0, 0.0, 0.01), 1).unwrap();
        assert_eq!(result.len(), 1);
        assert_ne!(result[0], pt(0.0, 0.0, 0.0));
    }

    #[test]
    fn test_duplicate_coordinates() {
        let mut tree: KdTree<Point3D> = KdTree::new(0.5, 0.7).unwrap();
        let mut points = vec![pt(0.0, 0.0, 0.0); 10];
        points.push(pt(5.0, 5.0, 5.0));
        tree.build(points);

        let result = tree.nearest_search(&pt(0.0, 0.0, 0.0), 5).unwrap();
        assert_eq!(result.len(), 5);
        assert!(result.iter().all(|p| *p == pt(0.0, 0.0, 0.0)));

        let deleted = tree.delete_points(&[pt(0.0, 0.0, 0.0)]);
        assert_eq!(deleted, vec![true]);
        assert_eq!(tree.len(), 10);

        let result = tree.nearest_search(&pt(0.0, 0.0, 0.0), 10).unwrap();
        assert_eq!(result.len(), 10);
        assert_eq!(result.iter().filter(|p| **p == pt(0.0, 0.0, 0.0)).count(), 9);
        assert!(result.iter().any(|p| *p == pt(5.0, 5.0, 5.0)));
    }

    #[test]
    fn test_delete_miss_is_idempotent() {
        let mut tree: KdTree<Point3D> = KdTree::new(0.5, 0.7).unwrap();
        tree.build(vec![pt(0.0, 0.0, 0.0)]);
        assert_eq!(tree.delete_points(&[pt(1.0, 1.0, 1.0)]), vec![false]);
        assert_eq!(tree.delete_points(&[pt(0.0, 0.0, 0.0)]), vec![true]);
        assert_eq!(tree.delete_points(&[pt(0.0, 0.0, 0.0)]), vec![false]);
    }

    #[test]
    fn test_nearest_search_rejects_zero_k() {
        let mut tree: KdTree<Point3D> = KdTree::new(0.5, 0.7).unwrap();
        tree.build(vec![pt(0.0, 0.0, 0.0)]);
        assert!(matches!(
            tree.nearest_search(&pt(0.0, 0.0, 0.0), 0),
            Err(IkdError::InvalidParameter { name: "k", .. })
        ));
    }

    #[test]
    fn test_empty_tree_search_returns_empty() {
        let mut tree: KdTree<Point3D> = KdTree::new(0.5, 0.7).unwrap();
        let result = tree.nearest_search(&pt(0.0, 0.0, 0.0), 5).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_insertion_triggers_rebuild_and_stays_balanced() {
        let mut tree: KdTree<Point3D> = KdTree::new(0.5, 0.7).unwrap();
        let points: Vec<Point3D> = (0..100).map(|i| pt(i as f64, 0.0, 0.0)).collect();
        tree.add_points(points);
        assert_eq!(tree.len(), 100);

        let to_delete: Vec<Point3D> = (0..50).map(|i| pt(i as f64, 0.0, 0.0)).collect();
        tree.delete_points(&to_delete);
        assert_eq!(tree.len(), 50);
        assert!(tree.rebuild_count() > 0);

        let nearest = tree.nearest_search(&pt(60.0, 0.0, 0.0), 1).unwrap();
        assert_eq!(nearest, vec![pt(60.0, 0.0, 0.0)]);
    }

    /// Recomputes `tree_size`/`invalid_num`/`tree_deleted`/`bbox` bottom-up
    /// and asserts every node's stored aggregate matches, i.e. I1-I4 hold
    /// everywhere in the subtree rooted at `node`, not just at the root.
    fn verify_invariants<P: Point3>(node: &KdNode<P>) -> (usize, usize, bool, BoundingBox) {
        let mut tree_size = usize::from(!node.point_deleted);
        let mut invalid_num = usize::from(node.point_deleted);
        let mut tree_deleted = node.point_deleted;
        let mut bbox = BoundingBox::from_point(&node.pivot);

        if let Some(left) = &node.left {
            let (ts, inv, td, bb) = verify_invariants(left);
            tree_size += ts;
            invalid_num += inv;
            tree_deleted &= td;
            bbox = bbox.merge(&bb);
        }
        if let Some(right) = &node.right {
            let (ts, inv, td, bb) = verify_invariants(right);
            tree_size += ts;
            invalid_num += inv;
            tree_deleted &= td;
            bbox = bbox.merge(&bb);
        }

        assert_eq!(tree_size, node.tree_size, "tree_size mismatch");
        assert_eq!(invalid_num, node.invalid_num, "invalid_num mismatch");
        assert_eq!(tree_deleted, node.tree_deleted, "tree_deleted mismatch");
        assert_eq!(bbox, node.bbox, "bbox mismatch");
        (tree_size, invalid_num, tree_deleted, bbox)
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(Point3D),
        DeleteExisting(usize),
    }

    prop_compose! {
        fn arb_point()(x in -50.0..50.0, y in -50.0..50.0, z in -50.0..50.0) -> Point3D {
            Point3D::new(x, y, z)
        }
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            arb_point().prop_map(Op::Add),
            (0usize..500).prop_map(Op::DeleteExisting),
        ]
    }

    proptest! {
        /// P1: after an arbitrary sequence of insertions and deletions, every
        /// node's stored aggregate state agrees with a bottom-up
        /// recomputation from the recursive structure — a structural bug in
        /// `choose_axis`/`partition_lt`/`update` that silently corrupts
        /// `tree_size`, `invalid_num`, `tree_deleted` or `bbox` anywhere in
        /// the tree, not only at the root, would fail this.
        #[test]
        fn test_p1_invariants_hold_after_random_ops(ops in prop::collection::vec(arb_op(), 0..200)) {
            let mut tree: KdTree<Point3D> = KdTree::new(0.5, 0.7).unwrap();
            let mut live: Vec<Point3D> = Vec::new();
            for op in ops {
                match op {
                    Op::Add(p) => {
                        tree.add_points(vec![p]);
                        live.push(p);
                    }
                    Op::DeleteExisting(idx) => {
                        if !live.is_empty() {
                            let p = live.remove(idx % live.len());
                            tree.delete_points(&[p]);
                        }
                    }
                }
            }
            if let Some(root) = &tree.root {
                verify_invariants(root);
            }
        }

        /// P5: immediately after any mutation that triggers an internal
        /// rebuild, the tree's full valid-point multiset equals the
        /// ground-truth set tracked alongside it — a rebuild that drops or
        /// duplicates a point during flatten-and-rebuild would fail this.
        #[test]
        fn test_p5_rebuild_preserves_points(ops in prop::collection::vec(arb_op(), 1..150)) {
            let mut tree: KdTree<Point3D> = KdTree::new(0.2, 0.6).unwrap();
            let mut ground_truth: Vec<Point3D> = Vec::new();

            for op in ops {
                let before = tree.rebuild_count();
                match op {
                    Op::Add(p) => {
                        tree.add_points(vec![p]);
                        ground_truth.push(p);
                    }
                    Op::DeleteExisting(idx) => {
                        if !ground_truth.is_empty() {
                            let p = ground_truth.remove(idx % ground_truth.len());
                            let found = tree.delete_points(&[p]);
                            prop_assert_eq!(found, vec![true]);
                        }
                    }
                }

                if tree.rebuild_count() > before {
                    let mut actual: Vec<Point3D> = Vec::new();
                    if let Some(root) = &tree.root {
                        flatten(root, &mut actual);
                    }
                    let key = |p: &Point3D| (OrderedFloat(p.x), OrderedFloat(p.y), OrderedFloat(p.z));
                    actual.sort_by_key(key);
                    let mut expected = ground_truth.clone();
                    expected.sort_by_key(key);
                    prop_assert_eq!(actual, expected);
                }
            }
        }
    }
}
