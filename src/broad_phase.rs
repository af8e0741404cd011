//! Broad Phase
//!
//! A self-balancing dynamic AABB tree with fat leaves, plus the move buffer
//! that drives incremental pair finding. During parallel phases the tree is
//! read-only: workers sweep disjoint slices of the move buffer and defer all
//! mutations; the tree itself is only modified on the user thread between
//! phases and inside the serial TOI loop.

use glam::Vec2;

use crate::math::Aabb;
use crate::settings::{AABB_EXTENSION, AABB_MULTIPLIER, NULL_INDEX};
use crate::shape::RayCastInput;

/// Typed user data carried by every tree leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProxyData {
    /// Owning fixture index.
    pub fixture: u32,
    /// Child index within the fixture's shape.
    pub child_index: u32,
}

#[derive(Clone, Debug)]
struct TreeNode {
    aabb: Aabb,
    data: ProxyData,
    parent: u32,
    left: u32,
    right: u32,
    // Leaves have height 0; free nodes -1.
    height: i32,
}

impl TreeNode {
    #[inline]
    fn is_leaf(&self) -> bool {
        self.left == NULL_INDEX
    }
}

/// The broad-phase: dynamic tree plus move buffer.
pub struct BroadPhase {
    nodes: Vec<TreeNode>,
    free_list: u32,
    root: u32,
    proxy_count: u32,
    /// Proxy ids whose fat AABBs moved since the last pair sweep. Entries
    /// are set to `NULL_INDEX` when their proxy is destroyed.
    move_buffer: Vec<u32>,
}

impl Default for BroadPhase {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadPhase {
    /// Create an empty broad-phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free_list: NULL_INDEX,
            root: NULL_INDEX,
            proxy_count: 0,
            move_buffer: Vec::new(),
        }
    }

    /// Number of live proxies.
    #[inline]
    #[must_use]
    pub fn proxy_count(&self) -> u32 {
        self.proxy_count
    }

    /// Number of buffered proxy moves awaiting a pair sweep.
    #[inline]
    #[must_use]
    pub fn move_count(&self) -> u32 {
        self.move_buffer.len() as u32
    }

    /// Clear the move buffer. Called after the deferred creates produced by
    /// a pair sweep have been merged.
    pub fn reset_buffers(&mut self) {
        self.move_buffer.clear();
    }

    /// Create a proxy with a fattened AABB and buffer it for pair finding.
    pub fn create_proxy(&mut self, aabb: Aabb, data: ProxyData) -> u32 {
        let proxy_id = self.alloc_node();
        let r = Vec2::splat(AABB_EXTENSION);
        self.nodes[proxy_id as usize].aabb = Aabb::new(aabb.lower - r, aabb.upper + r);
        self.nodes[proxy_id as usize].data = data;
        self.nodes[proxy_id as usize].height = 0;
        self.insert_leaf(proxy_id);
        self.proxy_count += 1;
        self.buffer_move(proxy_id);
        proxy_id
    }

    /// Destroy a proxy and drop any buffered move it had pending.
    pub fn destroy_proxy(&mut self, proxy_id: u32) {
        debug_assert!(self.nodes[proxy_id as usize].is_leaf());
        self.unbuffer_move(proxy_id);
        self.remove_leaf(proxy_id);
        self.free_node(proxy_id);
        self.proxy_count -= 1;
    }

    /// Move a proxy to a new tight AABB with a displacement hint. Returns
    /// `true` if the proxy actually moved in the tree (and was buffered).
    pub fn move_proxy(&mut self, proxy_id: u32, aabb: Aabb, displacement: Vec2) -> bool {
        debug_assert!(self.nodes[proxy_id as usize].is_leaf());

        if self.nodes[proxy_id as usize].aabb.contains(&aabb) {
            return false;
        }

        self.remove_leaf(proxy_id);

        // Fatten and predictively extend along the displacement.
        let r = Vec2::splat(AABB_EXTENSION);
        let mut fat = Aabb::new(aabb.lower - r, aabb.upper + r);
        let d = AABB_MULTIPLIER * displacement;
        if d.x < 0.0 {
            fat.lower.x += d.x;
        } else {
            fat.upper.x += d.x;
        }
        if d.y < 0.0 {
            fat.lower.y += d.y;
        } else {
            fat.upper.y += d.y;
        }
        self.nodes[proxy_id as usize].aabb = fat;

        self.insert_leaf(proxy_id);
        self.buffer_move(proxy_id);
        true
    }

    /// Mark a proxy moved so the next pair sweep revisits it.
    pub fn touch_proxy(&mut self, proxy_id: u32) {
        self.buffer_move(proxy_id);
    }

    /// The proxy's fat AABB.
    #[inline]
    #[must_use]
    pub fn fat_aabb(&self, proxy_id: u32) -> &Aabb {
        &self.nodes[proxy_id as usize].aabb
    }

    /// The proxy's user data.
    #[inline]
    #[must_use]
    pub fn proxy_data(&self, proxy_id: u32) -> ProxyData {
        self.nodes[proxy_id as usize].data
    }

    /// Do two proxies' fat AABBs overlap?
    #[inline]
    #[must_use]
    pub fn test_overlap(&self, proxy_a: u32, proxy_b: u32) -> bool {
        self.nodes[proxy_a as usize]
            .aabb
            .overlaps(&self.nodes[proxy_b as usize].aabb)
    }

    /// Sweep a slice of the move buffer, invoking `add_pair` for every
    /// overlapping (moved, other) proxy pair found. Read-only on the tree;
    /// safe to call concurrently over disjoint slices.
    pub fn update_pairs<F: FnMut(u32, u32)>(
        &self,
        move_begin: u32,
        move_end: u32,
        mut add_pair: F,
    ) {
        for i in move_begin..move_end {
            let query_id = self.move_buffer[i as usize];
            if query_id == NULL_INDEX {
                continue;
            }

            let fat = self.nodes[query_id as usize].aabb;
            self.query(&fat, |other_id| {
                if other_id != query_id {
                    add_pair(query_id, other_id);
                }
                true
            });
        }
    }

    /// Stack-based AABB query. The callback returns `false` to terminate.
    pub fn query<F: FnMut(u32) -> bool>(&self, aabb: &Aabb, mut callback: F) {
        let mut stack: Vec<u32> = Vec::with_capacity(64);
        if self.root != NULL_INDEX {
            stack.push(self.root);
        }

        while let Some(node_id) = stack.pop() {
            let node = &self.nodes[node_id as usize];
            if !node.aabb.overlaps(aabb) {
                continue;
            }

            if node.is_leaf() {
                if !callback(node_id) {
                    return;
                }
            } else {
                stack.push(node.left);
                stack.push(node.right);
            }
        }
    }

    /// Ray cast against the tree. The callback receives the clipped input
    /// and a proxy id and returns the new maximum fraction: 0 terminates the
    /// cast, the unchanged fraction continues without clipping.
    pub fn ray_cast<F: FnMut(&RayCastInput, u32) -> f32>(
        &self,
        input: &RayCastInput,
        mut callback: F,
    ) {
        let p1 = input.p1;
        let p2 = input.p2;
        let r = (p2 - p1).normalize_or_zero();
        if r == Vec2::ZERO {
            return;
        }

        // Perpendicular to the ray, for the segment/AABB separation test.
        let v = Vec2::new(-r.y, r.x);
        let abs_v = v.abs();

        let mut max_fraction = input.max_fraction;
        let mut segment_aabb = segment_bounds(p1, p2, max_fraction);

        let mut stack: Vec<u32> = Vec::with_capacity(64);
        if self.root != NULL_INDEX {
            stack.push(self.root);
        }

        while let Some(node_id) = stack.pop() {
            let node = &self.nodes[node_id as usize];
            if !node.aabb.overlaps(&segment_aabb) {
                continue;
            }

            // Separating-axis test: |dot(v, p1 - center)| > dot(|v|, extents)
            let c = node.aabb.center();
            let h = node.aabb.extents();
            let separation = (v.dot(p1 - c)).abs() - abs_v.dot(h);
            if separation > 0.0 {
                continue;
            }

            if node.is_leaf() {
                let sub_input = RayCastInput {
                    p1,
                    p2,
                    max_fraction,
                };
                let value = callback(&sub_input, node_id);
                if value == 0.0 {
                    return;
                }
                if value > 0.0 {
                    max_fraction = value;
                    segment_aabb = segment_bounds(p1, p2, max_fraction);
                }
            } else {
                stack.push(node.left);
                stack.push(node.right);
            }
        }
    }

    /// Height of the tree, for diagnostics.
    #[must_use]
    pub fn height(&self) -> i32 {
        if self.root == NULL_INDEX {
            0
        } else {
            self.nodes[self.root as usize].height
        }
    }

    // ------------------------------------------------------------------
    // Node pool
    // ------------------------------------------------------------------

    fn alloc_node(&mut self) -> u32 {
        if self.free_list == NULL_INDEX {
            let id = self.nodes.len() as u32;
            self.nodes.push(TreeNode {
                aabb: Aabb::default(),
                data: ProxyData {
                    fixture: NULL_INDEX,
                    child_index: 0,
                },
                parent: NULL_INDEX,
                left: NULL_INDEX,
                right: NULL_INDEX,
                height: -1,
            });
            id
        } else {
            let id = self.free_list;
            let node = &mut self.nodes[id as usize];
            self.free_list = node.parent;
            node.parent = NULL_INDEX;
            node.left = NULL_INDEX;
            node.right = NULL_INDEX;
            node.height = 0;
            id
        }
    }

    fn free_node(&mut self, node_id: u32) {
        let node = &mut self.nodes[node_id as usize];
        node.parent = self.free_list;
        node.height = -1;
        self.free_list = node_id;
    }

    fn buffer_move(&mut self, proxy_id: u32) {
        self.move_buffer.push(proxy_id);
    }

    fn unbuffer_move(&mut self, proxy_id: u32) {
        for entry in &mut self.move_buffer {
            if *entry == proxy_id {
                *entry = NULL_INDEX;
            }
        }
    }

    // ------------------------------------------------------------------
    // Tree maintenance
    // ------------------------------------------------------------------

    fn insert_leaf(&mut self, leaf: u32) {
        if self.root == NULL_INDEX {
            self.root = leaf;
            self.nodes[leaf as usize].parent = NULL_INDEX;
            return;
        }

        // Descend to the best sibling by the surface-area heuristic.
        let leaf_aabb = self.nodes[leaf as usize].aabb;
        let mut index = self.root;
        while !self.nodes[index as usize].is_leaf() {
            let left = self.nodes[index as usize].left;
            let right = self.nodes[index as usize].right;

            let area = self.nodes[index as usize].aabb.perimeter();
            let combined = Aabb::combine(&self.nodes[index as usize].aabb, &leaf_aabb);
            let combined_area = combined.perimeter();

            // Cost of making a new parent for this node and the leaf.
            let cost = 2.0 * combined_area;
            let inheritance_cost = 2.0 * (combined_area - area);

            let child_cost = |nodes: &Vec<TreeNode>, child: u32| -> f32 {
                let child_aabb = &nodes[child as usize].aabb;
                let combined = Aabb::combine(child_aabb, &leaf_aabb);
                if nodes[child as usize].is_leaf() {
                    combined.perimeter() + inheritance_cost
                } else {
                    combined.perimeter() - child_aabb.perimeter() + inheritance_cost
                }
            };

            let cost_left = child_cost(&self.nodes, left);
            let cost_right = child_cost(&self.nodes, right);

            if cost < cost_left && cost < cost_right {
                break;
            }

            index = if cost_left < cost_right { left } else { right };
        }

        let sibling = index;

        // Create a new parent.
        let old_parent = self.nodes[sibling as usize].parent;
        let new_parent = self.alloc_node();
        self.nodes[new_parent as usize].parent = old_parent;
        self.nodes[new_parent as usize].aabb =
            Aabb::combine(&leaf_aabb, &self.nodes[sibling as usize].aabb);
        self.nodes[new_parent as usize].height = self.nodes[sibling as usize].height + 1;

        if old_parent != NULL_INDEX {
            if self.nodes[old_parent as usize].left == sibling {
                self.nodes[old_parent as usize].left = new_parent;
            } else {
                self.nodes[old_parent as usize].right = new_parent;
            }
        } else {
            self.root = new_parent;
        }

        self.nodes[new_parent as usize].left = sibling;
        self.nodes[new_parent as usize].right = leaf;
        self.nodes[sibling as usize].parent = new_parent;
        self.nodes[leaf as usize].parent = new_parent;

        // Walk up refitting and balancing.
        self.refit_from(self.nodes[leaf as usize].parent);
    }

    fn remove_leaf(&mut self, leaf: u32) {
        if leaf == self.root {
            self.root = NULL_INDEX;
            return;
        }

        let parent = self.nodes[leaf as usize].parent;
        let grand_parent = self.nodes[parent as usize].parent;
        let sibling = if self.nodes[parent as usize].left == leaf {
            self.nodes[parent as usize].right
        } else {
            self.nodes[parent as usize].left
        };

        if grand_parent != NULL_INDEX {
            if self.nodes[grand_parent as usize].left == parent {
                self.nodes[grand_parent as usize].left = sibling;
            } else {
                self.nodes[grand_parent as usize].right = sibling;
            }
            self.nodes[sibling as usize].parent = grand_parent;
            self.free_node(parent);
            self.refit_from(grand_parent);
        } else {
            self.root = sibling;
            self.nodes[sibling as usize].parent = NULL_INDEX;
            self.free_node(parent);
        }
    }

    fn refit_from(&mut self, mut index: u32) {
        while index != NULL_INDEX {
            index = self.balance(index);

            let left = self.nodes[index as usize].left;
            let right = self.nodes[index as usize].right;
            self.nodes[index as usize].height = 1 + self.nodes[left as usize]
                .height
                .max(self.nodes[right as usize].height);
            self.nodes[index as usize].aabb = Aabb::combine(
                &self.nodes[left as usize].aabb,
                &self.nodes[right as usize].aabb,
            );

            index = self.nodes[index as usize].parent;
        }
    }

    /// AVL rotation at node `a`. Returns the new subtree root.
    fn balance(&mut self, a: u32) -> u32 {
        if self.nodes[a as usize].is_leaf() || self.nodes[a as usize].height < 2 {
            return a;
        }

        let b = self.nodes[a as usize].left;
        let c = self.nodes[a as usize].right;
        let balance = self.nodes[c as usize].height - self.nodes[b as usize].height;

        if balance > 1 {
            self.rotate_up(a, c)
        } else if balance < -1 {
            self.rotate_up(a, b)
        } else {
            a
        }
    }

    /// Promote the deeper child `promoted` above `a`.
    fn rotate_up(&mut self, a: u32, promoted: u32) -> u32 {
        let f = self.nodes[promoted as usize].left;
        let g = self.nodes[promoted as usize].right;

        // Swap a and promoted.
        self.nodes[promoted as usize].left = a;
        self.nodes[promoted as usize].parent = self.nodes[a as usize].parent;
        self.nodes[a as usize].parent = promoted;

        let old_parent = self.nodes[promoted as usize].parent;
        if old_parent != NULL_INDEX {
            if self.nodes[old_parent as usize].left == a {
                self.nodes[old_parent as usize].left = promoted;
            } else {
                self.nodes[old_parent as usize].right = promoted;
            }
        } else {
            self.root = promoted;
        }

        // Move the shallower grandchild under a.
        let (kept, moved) = if self.nodes[f as usize].height > self.nodes[g as usize].height {
            (f, g)
        } else {
            (g, f)
        };
        self.nodes[promoted as usize].right = kept;
        if self.nodes[a as usize].left == promoted {
            self.nodes[a as usize].left = moved;
        } else {
            self.nodes[a as usize].right = moved;
        }
        self.nodes[moved as usize].parent = a;

        // Refit.
        let left = self.nodes[a as usize].left;
        let right = self.nodes[a as usize].right;
        self.nodes[a as usize].aabb = Aabb::combine(
            &self.nodes[left as usize].aabb,
            &self.nodes[right as usize].aabb,
        );
        self.nodes[a as usize].height =
            1 + self.nodes[left as usize].height.max(self.nodes[right as usize].height);

        let pl = self.nodes[promoted as usize].left;
        let pr = self.nodes[promoted as usize].right;
        self.nodes[promoted as usize].aabb = Aabb::combine(
            &self.nodes[pl as usize].aabb,
            &self.nodes[pr as usize].aabb,
        );
        self.nodes[promoted as usize].height = 1
            + self.nodes[pl as usize]
                .height
                .max(self.nodes[pr as usize].height);

        promoted
    }
}

fn segment_bounds(p1: Vec2, p2: Vec2, max_fraction: f32) -> Aabb {
    let t = p1 + max_fraction * (p2 - p1);
    Aabb::new(p1.min(t), p1.max(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(i: u32) -> ProxyData {
        ProxyData {
            fixture: i,
            child_index: 0,
        }
    }

    fn unit_aabb_at(x: f32, y: f32) -> Aabb {
        Aabb::new(Vec2::new(x - 0.5, y - 0.5), Vec2::new(x + 0.5, y + 0.5))
    }

    #[test]
    fn test_create_query_destroy() {
        let mut bp = BroadPhase::new();
        let a = bp.create_proxy(unit_aabb_at(0.0, 0.0), data(1));
        let b = bp.create_proxy(unit_aabb_at(10.0, 0.0), data(2));
        assert_eq!(bp.proxy_count(), 2);

        let mut hits = Vec::new();
        bp.query(&unit_aabb_at(0.0, 0.0), |id| {
            hits.push(bp.proxy_data(id).fixture);
            true
        });
        assert_eq!(hits, vec![1]);

        bp.destroy_proxy(a);
        bp.destroy_proxy(b);
        assert_eq!(bp.proxy_count(), 0);
    }

    #[test]
    fn test_fat_aabb_contains_tight() {
        let mut bp = BroadPhase::new();
        let tight = unit_aabb_at(0.0, 0.0);
        let id = bp.create_proxy(tight, data(0));
        assert!(bp.fat_aabb(id).contains(&tight));
    }

    #[test]
    fn test_small_move_does_not_rebuffer() {
        let mut bp = BroadPhase::new();
        let id = bp.create_proxy(unit_aabb_at(0.0, 0.0), data(0));
        bp.reset_buffers();
        // Still inside the fat margin.
        let moved = bp.move_proxy(id, unit_aabb_at(0.01, 0.0), Vec2::new(0.01, 0.0));
        assert!(!moved);
        assert_eq!(bp.move_count(), 0);

        let moved = bp.move_proxy(id, unit_aabb_at(5.0, 0.0), Vec2::new(5.0, 0.0));
        assert!(moved);
        assert_eq!(bp.move_count(), 1);
    }

    #[test]
    fn test_update_pairs_finds_overlap() {
        let mut bp = BroadPhase::new();
        let a = bp.create_proxy(unit_aabb_at(0.0, 0.0), data(1));
        let b = bp.create_proxy(unit_aabb_at(0.4, 0.0), data(2));

        let mut pairs = Vec::new();
        bp.update_pairs(0, bp.move_count(), |x, y| pairs.push((x, y)));
        // Both proxies are in the move buffer, so the pair appears twice in
        // opposite orders; uniqueness is enforced downstream.
        assert!(pairs.contains(&(a, b)) || pairs.contains(&(b, a)));
    }

    #[test]
    fn test_destroyed_proxy_leaves_hole_in_move_buffer() {
        let mut bp = BroadPhase::new();
        let a = bp.create_proxy(unit_aabb_at(0.0, 0.0), data(1));
        let _b = bp.create_proxy(unit_aabb_at(3.0, 0.0), data(2));
        bp.destroy_proxy(a);

        let mut pairs = Vec::new();
        bp.update_pairs(0, bp.move_count(), |x, y| pairs.push((x, y)));
        assert!(pairs.is_empty());
    }

    #[test]
    fn test_ray_cast_hits_near_leaf_first_capable() {
        let mut bp = BroadPhase::new();
        let _ = bp.create_proxy(unit_aabb_at(2.0, 0.0), data(1));
        let _ = bp.create_proxy(unit_aabb_at(6.0, 0.0), data(2));

        let mut visited = Vec::new();
        bp.ray_cast(
            &RayCastInput {
                p1: Vec2::new(-5.0, 0.0),
                p2: Vec2::new(10.0, 0.0),
                max_fraction: 1.0,
            },
            |input, id| {
                visited.push(bp.proxy_data(id).fixture);
                input.max_fraction
            },
        );
        assert_eq!(visited.len(), 2);
    }

    #[test]
    fn test_tree_stays_balanced() {
        let mut bp = BroadPhase::new();
        for i in 0..256 {
            bp.create_proxy(unit_aabb_at(i as f32 * 1.5, 0.0), data(i));
        }
        // A degenerate list would have height 255.
        assert!(bp.height() < 32, "height = {}", bp.height());
    }
}
