//! Order-statistic tree over `(attribute, label)` keys. This is the source
//! of truth for which internal ids lie in a given attribute window: it
//! answers k-th predecessor/successor queries around a pivot key, filters
//! candidate lists against a window, and computes range cardinalities with
//! boundary entry points.
//!
//! The tree is weight-balanced and insert-only. Nodes live in a slab and
//! reference each other by index, so the parent/child structure carries no
//! ownership. The caller (the index) serialises all access behind a single
//! mutex; tree work is O(log N) per operation and graph work dominates.

use crate::attribute::AttKey;
use crate::attribute::Attribute;
use crate::attribute::KeyRange;
use crate::error::Error;
use crate::error::Result;
use crate::InternalId;

const NIL: u32 = u32::MAX;

// Weight-balance parameters <delta=3, gamma=2>: delta bounds the sibling
// weight ratio, gamma decides between single and double rotation.
const DELTA: u64 = 3;
const GAMMA: u64 = 2;

#[derive(Clone, Copy, Debug)]
struct TreeNode<A: Attribute> {
  key: AttKey<A>,
  id: InternalId,
  parent: u32,
  left: u32,
  right: u32,
  /// Subtree node count, including this node.
  size: u32,
}

pub struct OrderTable<A: Attribute> {
  nodes: Vec<TreeNode<A>>,
  root: u32,
}

impl<A: Attribute> OrderTable<A> {
  pub fn with_capacity(max_n: usize) -> Self {
    Self {
      nodes: Vec::with_capacity(max_n),
      root: NIL,
    }
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  #[inline]
  fn node(&self, i: u32) -> &TreeNode<A> {
    &self.nodes[i as usize]
  }

  #[inline]
  fn size(&self, i: u32) -> u32 {
    if i == NIL {
      0
    } else {
      self.nodes[i as usize].size
    }
  }

  #[inline]
  fn weight(&self, i: u32) -> u64 {
    self.size(i) as u64 + 1
  }

  pub fn insert(&mut self, key: AttKey<A>, id: InternalId) {
    let idx = self.nodes.len() as u32;
    self.nodes.push(TreeNode {
      key,
      id,
      parent: NIL,
      left: NIL,
      right: NIL,
      size: 1,
    });
    if self.root == NIL {
      self.root = idx;
      return;
    }
    let mut cur = self.root;
    loop {
      self.nodes[cur as usize].size += 1;
      let go_left = key < self.nodes[cur as usize].key;
      let child = if go_left {
        self.nodes[cur as usize].left
      } else {
        self.nodes[cur as usize].right
      };
      if child == NIL {
        if go_left {
          self.nodes[cur as usize].left = idx;
        } else {
          self.nodes[cur as usize].right = idx;
        }
        self.nodes[idx as usize].parent = cur;
        break;
      }
      cur = child;
    }
    self.rebalance_from(cur);
  }

  fn rebalance_from(&mut self, mut x: u32) {
    while x != NIL {
      let top = self.balance(x);
      x = self.nodes[top as usize].parent;
    }
  }

  /// Restores the weight invariant at `x`; returns the node now occupying
  /// `x`'s position.
  fn balance(&mut self, x: u32) -> u32 {
    let l = self.nodes[x as usize].left;
    let r = self.nodes[x as usize].right;
    let wl = self.weight(l);
    let wr = self.weight(r);
    if wr > DELTA * wl {
      let rl = self.nodes[r as usize].left;
      let rr = self.nodes[r as usize].right;
      if self.weight(rl) < GAMMA * self.weight(rr) {
        self.rotate_left(x)
      } else {
        self.rotate_right(r);
        self.rotate_left(x)
      }
    } else if wl > DELTA * wr {
      let ll = self.nodes[l as usize].left;
      let lr = self.nodes[l as usize].right;
      if self.weight(lr) < GAMMA * self.weight(ll) {
        self.rotate_right(x)
      } else {
        self.rotate_left(l);
        self.rotate_right(x)
      }
    } else {
      x
    }
  }

  fn replace_child(&mut self, parent: u32, old: u32, new: u32) {
    if parent == NIL {
      self.root = new;
    } else if self.nodes[parent as usize].left == old {
      self.nodes[parent as usize].left = new;
    } else {
      self.nodes[parent as usize].right = new;
    }
  }

  fn fix_size(&mut self, x: u32) {
    let l = self.nodes[x as usize].left;
    let r = self.nodes[x as usize].right;
    self.nodes[x as usize].size = self.size(l) + self.size(r) + 1;
  }

  fn rotate_left(&mut self, x: u32) -> u32 {
    let y = self.nodes[x as usize].right;
    debug_assert_ne!(y, NIL);
    let yl = self.nodes[y as usize].left;
    let p = self.nodes[x as usize].parent;

    self.nodes[x as usize].right = yl;
    if yl != NIL {
      self.nodes[yl as usize].parent = x;
    }
    self.nodes[y as usize].left = x;
    self.nodes[x as usize].parent = y;
    self.nodes[y as usize].parent = p;
    self.replace_child(p, x, y);

    self.fix_size(x);
    self.fix_size(y);
    y
  }

  fn rotate_right(&mut self, x: u32) -> u32 {
    let y = self.nodes[x as usize].left;
    debug_assert_ne!(y, NIL);
    let yr = self.nodes[y as usize].right;
    let p = self.nodes[x as usize].parent;

    self.nodes[x as usize].left = yr;
    if yr != NIL {
      self.nodes[yr as usize].parent = x;
    }
    self.nodes[y as usize].right = x;
    self.nodes[x as usize].parent = y;
    self.nodes[y as usize].parent = p;
    self.replace_child(p, x, y);

    self.fix_size(x);
    self.fix_size(y);
    y
  }

  fn min_node(&self) -> u32 {
    let mut cur = self.root;
    if cur == NIL {
      return NIL;
    }
    while self.nodes[cur as usize].left != NIL {
      cur = self.nodes[cur as usize].left;
    }
    cur
  }

  fn max_node(&self) -> u32 {
    let mut cur = self.root;
    if cur == NIL {
      return NIL;
    }
    while self.nodes[cur as usize].right != NIL {
      cur = self.nodes[cur as usize].right;
    }
    cur
  }

  fn find(&self, key: &AttKey<A>) -> u32 {
    let mut cur = self.root;
    while cur != NIL {
      let node = self.node(cur);
      match key.cmp(&node.key) {
        std::cmp::Ordering::Less => cur = node.left,
        std::cmp::Ordering::Equal => return cur,
        std::cmp::Ordering::Greater => cur = node.right,
      }
    }
    NIL
  }

  /// First node with key >= `key`, NIL if every key is smaller.
  fn lower_bound(&self, key: &AttKey<A>) -> u32 {
    let mut candidate = NIL;
    let mut cur = self.root;
    while cur != NIL {
      if self.node(cur).key >= *key {
        candidate = cur;
        cur = self.node(cur).left;
      } else {
        cur = self.node(cur).right;
      }
    }
    candidate
  }

  /// Last node with key <= `key`, NIL if every key is larger.
  fn floor(&self, key: &AttKey<A>) -> u32 {
    let mut candidate = NIL;
    let mut cur = self.root;
    while cur != NIL {
      if self.node(cur).key <= *key {
        candidate = cur;
        cur = self.node(cur).right;
      } else {
        cur = self.node(cur).left;
      }
    }
    candidate
  }

  /// 0-based in-order position of an existing key.
  fn rank(&self, key: &AttKey<A>) -> Option<usize> {
    let mut cur = self.root;
    let mut index = 0usize;
    while cur != NIL {
      let node = self.node(cur);
      match key.cmp(&node.key) {
        std::cmp::Ordering::Less => cur = node.left,
        std::cmp::Ordering::Equal => return Some(index + self.size(node.left) as usize),
        std::cmp::Ordering::Greater => {
          index += self.size(node.left) as usize + 1;
          cur = node.right;
        }
      }
    }
    None
  }

  /// k-th smallest node of the subtree rooted at `root`, 1-based.
  fn kth_smallest_in(&self, root: u32, mut k: u32) -> u32 {
    if root == NIL || k == 0 || k > self.size(root) {
      return NIL;
    }
    let mut cur = root;
    loop {
      let ls = self.size(self.nodes[cur as usize].left);
      if k == ls + 1 {
        return cur;
      }
      if k <= ls {
        cur = self.nodes[cur as usize].left;
      } else {
        k -= ls + 1;
        cur = self.nodes[cur as usize].right;
      }
    }
  }

  /// k-th largest node of the subtree rooted at `root`, 1-based.
  fn kth_largest_in(&self, root: u32, mut k: u32) -> u32 {
    if root == NIL || k == 0 || k > self.size(root) {
      return NIL;
    }
    let mut cur = root;
    loop {
      let rs = self.size(self.nodes[cur as usize].right);
      if k == rs + 1 {
        return cur;
      }
      if k <= rs {
        cur = self.nodes[cur as usize].right;
      } else {
        k -= rs + 1;
        cur = self.nodes[cur as usize].left;
      }
    }
  }

  /// k-th predecessor of `start` in key order, clamped to the tree minimum.
  /// Descends into the left subtree when the answer is below `start`,
  /// otherwise ascends carrying the rank distance covered so far.
  fn kth_before(&self, start: u32, k: usize) -> u32 {
    if k == 0 {
      return start;
    }
    let mut k = k as u32;
    let left = self.nodes[start as usize].left;
    let ls = self.size(left);
    if k <= ls {
      return self.kth_largest_in(left, k);
    }
    k -= ls;
    let mut current = start;
    loop {
      let parent = self.nodes[current as usize].parent;
      if parent == NIL {
        return self.min_node();
      }
      if current == self.nodes[parent as usize].right {
        let pls = self.size(self.nodes[parent as usize].left);
        if pls + 1 >= k {
          if k == 1 {
            return parent;
          }
          return self.kth_largest_in(self.nodes[parent as usize].left, k - 1);
        }
        k -= pls + 1;
      }
      current = parent;
    }
  }

  /// k-th successor of `start` in key order, clamped to the tree maximum.
  fn kth_after(&self, start: u32, k: usize) -> u32 {
    if k == 0 {
      return start;
    }
    let mut k = k as u32;
    let right = self.nodes[start as usize].right;
    let rs = self.size(right);
    if k <= rs {
      return self.kth_smallest_in(right, k);
    }
    k -= rs;
    let mut current = start;
    loop {
      let parent = self.nodes[current as usize].parent;
      if parent == NIL {
        return self.max_node();
      }
      if current == self.nodes[parent as usize].left {
        let prs = self.size(self.nodes[parent as usize].right);
        if prs + 1 >= k {
          if k == 1 {
            return parent;
          }
          return self.kth_smallest_in(self.nodes[parent as usize].right, k - 1);
        }
        k -= prs + 1;
      }
      current = parent;
    }
  }

  /// Pivot node for window queries around a key that may be absent: the
  /// first node at or above the key, clamped to the maximum.
  fn pivot_for(&self, key: &AttKey<A>) -> u32 {
    let lb = self.lower_bound(key);
    if lb == NIL {
      self.max_node()
    } else {
      lb
    }
  }

  /// The window of half-width `half` around `key`: pushes the boundary
  /// nodes' ids (deduplicated) into `entries` and returns the boundary
  /// keys. `None` on an empty tree.
  ///
  /// When the window covers the whole tree the range clamps to the extreme
  /// keys and a single entry (the minimum) is produced.
  pub fn window(
    &self,
    key: &AttKey<A>,
    half: usize,
    entries: &mut Vec<InternalId>,
  ) -> Option<KeyRange<A>> {
    if self.is_empty() {
      return None;
    }
    if 2 * half >= self.len() {
      let lo = self.min_node();
      let hi = self.max_node();
      entries.push(self.node(lo).id);
      return Some(KeyRange {
        lo: self.node(lo).key,
        hi: self.node(hi).key,
      });
    }
    let pivot = self.pivot_for(key);
    let lo = self.kth_before(pivot, half);
    let hi = self.kth_after(pivot, half);
    entries.push(self.node(lo).id);
    if self.node(hi).id != self.node(lo).id {
      entries.push(self.node(hi).id);
    }
    Some(KeyRange {
      lo: self.node(lo).key,
      hi: self.node(hi).key,
    })
  }

  /// Filters `(dist, id)` candidates to those whose key (supplied in
  /// parallel through `keys`) lies in the window of half-width `half`
  /// around `center`.
  pub fn in_window(
    &self,
    center: &AttKey<A>,
    half: usize,
    candidates: Vec<(f32, InternalId)>,
    keys: &[AttKey<A>],
  ) -> Vec<(f32, InternalId)> {
    debug_assert_eq!(candidates.len(), keys.len());
    if 2 * half >= self.len() {
      return candidates;
    }
    let pivot = match self.find(center) {
      NIL => self.pivot_for(center),
      found => found,
    };
    let lo = self.node(self.kth_before(pivot, half)).key;
    let hi = self.node(self.kth_after(pivot, half)).key;
    candidates
      .into_iter()
      .zip(keys.iter())
      .filter(|(_, key)| **key >= lo && **key <= hi)
      .map(|(cand, _)| cand)
      .collect()
  }

  /// Number of keys in the closed range `[l, u]`, pushing the boundary
  /// nodes' ids (deduplicated) into `entries`.
  pub fn range_cardinality(
    &self,
    l: &AttKey<A>,
    u: &AttKey<A>,
    entries: &mut Vec<InternalId>,
  ) -> Result<usize> {
    let node_l = self.lower_bound(l);
    let node_u = self.floor(u);
    if node_l == NIL || node_u == NIL {
      return Err(Error::RangeEmpty);
    }
    let key_l = self.node(node_l).key;
    let key_u = self.node(node_u).key;
    if key_l > key_u {
      // the filter range falls strictly between two adjacent keys
      return Err(Error::RangeEmpty);
    }
    let i = self
      .rank(&key_l)
      .ok_or_else(|| Error::InternalInvariant("rank of resident key failed".to_string()))?;
    let j = self
      .rank(&key_u)
      .ok_or_else(|| Error::InternalInvariant("rank of resident key failed".to_string()))?;
    entries.push(self.node(node_l).id);
    if node_l != node_u {
      entries.push(self.node(node_u).id);
    }
    Ok(j - i + 1)
  }

  /// Keys and ids in key order.
  pub fn inorder(&self) -> Vec<(AttKey<A>, InternalId)> {
    let mut out = Vec::with_capacity(self.len());
    let mut stack = Vec::new();
    let mut cur = self.root;
    while cur != NIL || !stack.is_empty() {
      while cur != NIL {
        stack.push(cur);
        cur = self.nodes[cur as usize].left;
      }
      let top = stack.pop().expect("loop guard ensures non-empty");
      out.push((self.node(top).key, self.node(top).id));
      cur = self.nodes[top as usize].right;
    }
    out
  }

  #[cfg(test)]
  fn validate(&self) {
    fn walk<A: Attribute>(t: &OrderTable<A>, x: u32, parent: u32) -> u32 {
      if x == NIL {
        return 0;
      }
      let node = t.node(x);
      assert_eq!(node.parent, parent, "parent link mismatch");
      if node.left != NIL {
        assert!(t.node(node.left).key < node.key, "left child out of order");
      }
      if node.right != NIL {
        assert!(t.node(node.right).key >= node.key, "right child out of order");
      }
      let ls = walk(t, node.left, x);
      let rs = walk(t, node.right, x);
      assert_eq!(node.size, ls + rs + 1, "size mismatch");
      let wl = ls as u64 + 1;
      let wr = rs as u64 + 1;
      assert!(
        wl <= DELTA * wr && wr <= DELTA * wl,
        "weight balance violated: {wl} vs {wr}"
      );
      node.size
    }
    if self.root != NIL {
      assert_eq!(walk(self, self.root, NIL) as usize, self.len());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::Label;
  use proptest::prelude::*;

  fn build(keys: &[u32]) -> (OrderTable<u32>, Vec<(AttKey<u32>, InternalId)>) {
    let mut table = OrderTable::with_capacity(keys.len());
    let mut reference = Vec::with_capacity(keys.len());
    for (i, &att) in keys.iter().enumerate() {
      let key = AttKey::new(att, i as Label);
      table.insert(key, i as InternalId);
      reference.push((key, i as InternalId));
    }
    reference.sort_by(|a, b| a.0.cmp(&b.0));
    (table, reference)
  }

  #[test]
  fn window_of_single_node_is_that_node() {
    let (table, _) = build(&[5]);
    let mut entries = Vec::new();
    let range = table.window(&AttKey::new(5, 0), 1, &mut entries).unwrap();
    assert_eq!(entries, vec![0]);
    assert_eq!(range.lo, AttKey::new(5, 0));
    assert_eq!(range.hi, AttKey::new(5, 0));
  }

  #[test]
  fn window_clamps_at_endpoints() {
    // keys 0..10, pivot at 1, half-window 3: clamps left at the minimum
    let keys: Vec<u32> = (0..10).collect();
    let (table, reference) = build(&keys);
    let mut entries = Vec::new();
    let range = table
      .window(&AttKey::new(1, 1), 3, &mut entries)
      .unwrap();
    assert_eq!(range.lo, reference[0].0);
    assert_eq!(range.hi, reference[4].0);
    assert_eq!(entries, vec![reference[0].1, reference[4].1]);
  }

  #[test]
  fn range_cardinality_counts_inclusive_bounds() {
    let keys: Vec<u32> = (0..100).collect();
    let (table, _) = build(&keys);
    let mut entries = Vec::new();
    let count = table
      .range_cardinality(
        &AttKey::new(10, 0),
        &AttKey::new(19, Label::MAX),
        &mut entries,
      )
      .unwrap();
    assert_eq!(count, 10);
    assert_eq!(entries.len(), 2);
  }

  #[test]
  fn range_cardinality_rejects_empty_ranges() {
    let (table, _) = build(&[10, 20, 30]);
    let mut entries = Vec::new();
    // below all keys
    assert!(matches!(
      table.range_cardinality(&AttKey::new(0, 0), &AttKey::new(5, Label::MAX), &mut entries),
      Err(Error::RangeEmpty)
    ));
    // above all keys
    assert!(matches!(
      table.range_cardinality(&AttKey::new(40, 0), &AttKey::new(50, Label::MAX), &mut entries),
      Err(Error::RangeEmpty)
    ));
    // strictly between two adjacent keys
    assert!(matches!(
      table.range_cardinality(&AttKey::new(11, 0), &AttKey::new(19, Label::MAX), &mut entries),
      Err(Error::RangeEmpty)
    ));
  }

  #[test]
  fn in_window_filters_by_center_window() {
    let keys: Vec<u32> = (0..20).collect();
    let (table, _) = build(&keys);
    // ids match atts here; center at 10, half 2 keeps keys 8..=12
    let candidates: Vec<(f32, InternalId)> = vec![(0.1, 5), (0.2, 9), (0.3, 12), (0.4, 19)];
    let cand_keys: Vec<AttKey<u32>> = candidates
      .iter()
      .map(|&(_, id)| AttKey::new(id, id as Label))
      .collect();
    let kept = table.in_window(&AttKey::new(10, 10), 2, candidates, &cand_keys);
    assert_eq!(kept, vec![(0.2, 9), (0.3, 12)]);
  }

  proptest! {
    #[test]
    fn inorder_matches_sorted_reference(keys in prop::collection::vec(0u32..500, 1..250)) {
      let (table, reference) = build(&keys);
      table.validate();
      prop_assert_eq!(table.inorder(), reference);
    }

    #[test]
    fn window_matches_sorted_slice(
      keys in prop::collection::vec(0u32..200, 1..120),
      probe in 0u32..220,
      half in 1usize..40,
    ) {
      let (table, reference) = build(&keys);
      let probe_key = AttKey::new(probe, 0);
      let mut entries = Vec::new();
      let range = table.window(&probe_key, half, &mut entries).unwrap();

      if 2 * half >= reference.len() {
        prop_assert_eq!(range.lo, reference[0].0);
        prop_assert_eq!(range.hi, reference[reference.len() - 1].0);
        prop_assert_eq!(entries, vec![reference[0].1]);
      } else {
        let pivot = reference
          .iter()
          .position(|(k, _)| *k >= probe_key)
          .unwrap_or(reference.len() - 1);
        let lo = pivot.saturating_sub(half);
        let hi = (pivot + half).min(reference.len() - 1);
        prop_assert_eq!(range.lo, reference[lo].0);
        prop_assert_eq!(range.hi, reference[hi].0);
        let mut expect = vec![reference[lo].1];
        if reference[hi].1 != reference[lo].1 {
          expect.push(reference[hi].1);
        }
        prop_assert_eq!(entries, expect);
      }
    }

    #[test]
    fn range_cardinality_matches_filter_count(
      keys in prop::collection::vec(0u32..200, 1..120),
      bounds in (0u32..200, 0u32..200),
    ) {
      let (l, u) = (bounds.0.min(bounds.1), bounds.0.max(bounds.1));
      let (table, reference) = build(&keys);
      let kl = AttKey::new(l, 0);
      let ku = AttKey::new(u, Label::MAX);
      let expected = reference.iter().filter(|(k, _)| *k >= kl && *k <= ku).count();
      let mut entries = Vec::new();
      match table.range_cardinality(&kl, &ku, &mut entries) {
        Ok(count) => {
          prop_assert_eq!(count, expected);
          prop_assert!(!entries.is_empty() && entries.len() <= 2);
        }
        Err(Error::RangeEmpty) => prop_assert_eq!(expected, 0),
        Err(e) => prop_assert!(false, "unexpected error: {}", e),
      }
    }
  }
}
