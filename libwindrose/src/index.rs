//! The windowed proximity-graph index.
//!
//! Every item lives at a dense internal id in a flat arena record. Layer
//! `l` of the graph connects an item to neighbors drawn from the window of
//! `window_size[l] / 2` items on each side of it in attribute order, with
//! `window_size[l] = 2 * o^l` truncated at `wp`. A range filter is answered
//! by picking the layer whose window brackets the filter's cardinality and
//! beam-searching the layers below it, seeded at the range's boundary items.

use crate::arena::NodeArena;
use crate::arena::RecordLayout;
use crate::attribute::AttKey;
use crate::attribute::Attribute;
use crate::attribute::KeyRange;
use crate::error::Error;
use crate::error::Result;
use crate::filter::AttSet;
use crate::filter::Filter;
use crate::filter::LabelBitset;
use crate::order_table::OrderTable;
use crate::space::Space;
use crate::space::SpaceKind;
use crate::visited::VisitedPool;
use crate::InternalId;
use crate::Label;
use ordered_float::OrderedFloat;
use parking_lot::Mutex;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Read;
use std::io::Write;
use std::mem::size_of;
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use tracing::debug;
use tracing::info;

/// Per-neighbor expansion filter, dispatched once per search.
enum SearchFilter<'a, A: Attribute> {
  Keys(KeyRange<A>),
  Atts(&'a AttSet<A>),
  Labels(&'a LabelBitset),
  All,
}

impl<A: Attribute> SearchFilter<'_, A> {
  #[inline]
  fn test(&self, arena: &NodeArena, id: InternalId) -> bool {
    match self {
      SearchFilter::Keys(range) => range.contains(&arena.key::<A>(id)),
      SearchFilter::Atts(set) => set.contains(&arena.att::<A>(id)),
      SearchFilter::Labels(bits) => bits.test(arena.label(id)),
      SearchFilter::All => true,
    }
  }
}

type DistHeap = BinaryHeap<(OrderedFloat<f32>, InternalId)>;

pub struct Windrose<A: Attribute> {
  space: Space,
  max_elements: usize,
  m: usize,
  efc: usize,
  o: usize,
  wp: usize,
  /// `window_size[l] = 2 * o^l`, exactly `wp + 1` entries.
  window_size: Vec<usize>,

  arena: NodeArena,
  order_table: Mutex<OrderTable<A>>,
  visited_pool: VisitedPool,

  /// Serialises `save` against in-flight inserts.
  mutation_lock: RwLock<()>,
  /// Guards internal-id allocation and layer promotion.
  max_layer_lock: Mutex<()>,
  /// Guards record publication and link-list updates, one per internal id.
  node_locks: Vec<Mutex<()>>,

  cur_count: AtomicUsize,
  cur_max_layer: AtomicUsize,

  // Profiling counters; exact in single-threaded runs.
  metric_dist_comps: AtomicU64,
  metric_hops: AtomicU64,
}

/// Header fields, in file order.
const HEADER_FIELDS: usize = 14;

impl<A: Attribute> Windrose<A> {
  #[allow(clippy::too_many_arguments)]
  pub fn open_fresh(
    max_elements: usize,
    dim: usize,
    m: usize,
    ef_construction: usize,
    space: SpaceKind,
    o: usize,
    wp: usize,
    auto_raise_wp: bool,
  ) -> Result<Self> {
    assert!(dim > 0, "dim must be > 0");
    assert!(m >= 2, "M must be >= 2");
    assert!(o >= 2, "window growth factor must be >= 2");
    assert!(
      max_elements >= 1 && max_elements <= InternalId::MAX as usize,
      "max_elements out of range"
    );

    let mut wp = wp;
    let window_size = Self::window_schedule(max_elements, o, &mut wp, auto_raise_wp);
    let layout = RecordLayout::new(A::SIZE, dim, m, wp);
    let arena = NodeArena::new(max_elements, layout)?;

    Ok(Self::assemble(
      Space::new(space, dim),
      max_elements,
      m,
      ef_construction.max(m),
      o,
      wp,
      window_size,
      arena,
      OrderTable::with_capacity(max_elements),
      0,
      0,
    ))
  }

  #[allow(clippy::too_many_arguments)]
  fn assemble(
    space: Space,
    max_elements: usize,
    m: usize,
    efc: usize,
    o: usize,
    wp: usize,
    window_size: Vec<usize>,
    arena: NodeArena,
    order_table: OrderTable<A>,
    cur_count: usize,
    cur_max_layer: usize,
  ) -> Self {
    let mut node_locks = Vec::with_capacity(max_elements);
    node_locks.resize_with(max_elements, || Mutex::new(()));
    Self {
      space,
      max_elements,
      m,
      efc,
      o,
      wp,
      window_size,
      arena,
      order_table: Mutex::new(order_table),
      visited_pool: VisitedPool::new(1, max_elements),
      mutation_lock: RwLock::new(()),
      max_layer_lock: Mutex::new(()),
      node_locks,
      cur_count: AtomicUsize::new(cur_count),
      cur_max_layer: AtomicUsize::new(cur_max_layer),
      metric_dist_comps: AtomicU64::new(0),
      metric_hops: AtomicU64::new(0),
    }
  }

  fn window_schedule(
    max_elements: usize,
    o: usize,
    wp: &mut usize,
    auto_raise_wp: bool,
  ) -> Vec<usize> {
    let mut ws = vec![2usize];
    let mut top = 2usize;
    while top < max_elements {
      top = top.saturating_mul(o);
      ws.push(top);
    }
    if *wp + 1 < ws.len() {
      if auto_raise_wp {
        info!(
          old_wp = *wp,
          new_wp = ws.len() - 1,
          "raised wp so the top window covers all items"
        );
        *wp = ws.len() - 1;
      } else {
        ws.truncate(*wp + 1);
      }
    } else {
      while ws.len() < *wp + 1 {
        top = top.saturating_mul(o);
        ws.push(top);
      }
    }
    debug_assert_eq!(ws.len(), *wp + 1);
    ws
  }

  pub fn dimension(&self) -> usize {
    self.space.dim()
  }

  pub fn size(&self) -> usize {
    self.cur_count.load(Ordering::Acquire)
  }

  pub fn max_layer(&self) -> usize {
    self.cur_max_layer.load(Ordering::Acquire)
  }

  pub fn max_elements(&self) -> usize {
    self.max_elements
  }

  pub fn m(&self) -> usize {
    self.m
  }

  pub fn ef_construction(&self) -> usize {
    self.efc
  }

  pub fn space_kind(&self) -> SpaceKind {
    self.space.kind()
  }

  /// Total distance computations since open. Exact only when a single
  /// thread is driving the index.
  pub fn metric_dist_comps(&self) -> u64 {
    self.metric_dist_comps.load(Ordering::Relaxed)
  }

  /// Total beam-search expansions since open. Exact only when a single
  /// thread is driving the index.
  pub fn metric_hops(&self) -> u64 {
    self.metric_hops.load(Ordering::Relaxed)
  }

  /// The neighbor ids of a committed node at a layer.
  pub fn neighbors(&self, id: InternalId, layer: usize) -> Option<Vec<InternalId>> {
    if id as usize >= self.size() || layer > self.wp {
      return None;
    }
    let ll = self.arena.link_list(id, layer);
    let count = (ll[self.m].load(Ordering::Acquire) as usize).min(self.m);
    Some((0..count).map(|i| ll[i].load(Ordering::Relaxed)).collect())
  }

  /// The stored attribute of a committed node.
  pub fn attribute(&self, id: InternalId) -> Option<A> {
    if id as usize >= self.size() {
      return None;
    }
    Some(self.arena.att::<A>(id))
  }

  /// The stored label of a committed node.
  pub fn label(&self, id: InternalId) -> Option<Label> {
    if id as usize >= self.size() {
      return None;
    }
    Some(self.arena.label(id))
  }

  #[inline]
  fn dist_to_node(&self, q: &[f32], id: InternalId) -> f32 {
    self.metric_dist_comps.fetch_add(1, Ordering::Relaxed);
    self.space.distance(q, self.arena.vector(id))
  }

  #[inline]
  fn dist_between(&self, a: InternalId, b: InternalId) -> f32 {
    self.metric_dist_comps.fetch_add(1, Ordering::Relaxed);
    self.space.distance(self.arena.vector(a), self.arena.vector(b))
  }

  /// Inserts one item. Concurrent inserts of distinct items are safe; the
  /// item becomes visible to searches only once this returns.
  ///
  /// `replace_deleted` is reserved for a future deletion feature and must
  /// be `false`.
  pub fn insert(&self, label: Label, vector: &[f32], attribute: A, replace_deleted: bool) -> Result<()> {
    if replace_deleted {
      return Err(Error::ReplaceDeletedUnsupported);
    }
    if vector.len() != self.space.dim() {
      return Err(Error::DimensionMismatch {
        expected: self.space.dim(),
        actual: vector.len(),
      });
    }

    let _mutation_guard = self.mutation_lock.read();
    let new_key = AttKey::new(attribute, label);

    // Claim an id; promote the top layer first when this item fills the
    // current top window.
    let (cur_num, max_layer_copy) = {
      let _global = self.max_layer_lock.lock();
      let n = self.cur_count.load(Ordering::Acquire);
      if n >= self.max_elements {
        return Err(Error::OutOfCapacity {
          max_elements: self.max_elements,
        });
      }
      let top = self.cur_max_layer.load(Ordering::Acquire);
      let needs_promotion = n > 0 && n + 1 > self.window_size[top];
      if needs_promotion && top == self.wp {
        return Err(Error::OutOfCapacity {
          max_elements: self.max_elements,
        });
      }

      let cur_num = n as InternalId;
      self.cur_count.store(n + 1, Ordering::Release);

      if n == 0 {
        self.publish_record(cur_num, label, vector, &attribute);
        {
          let _node = self.node_locks[cur_num as usize].lock();
          for layer in 0..=self.wp {
            self.arena.link_list(cur_num, layer)[self.m].store(0, Ordering::Release);
          }
        }
        self.order_table.lock().insert(new_key, cur_num);
        return Ok(());
      }

      if needs_promotion {
        self.promote_top_layer(top, n);
      }
      (cur_num, self.cur_max_layer.load(Ordering::Acquire))
    };

    // Select neighbors per layer, widest window first, carrying surviving
    // candidates down.
    let mut per_layer: Vec<Vec<(f32, InternalId)>> = vec![Vec::new(); max_layer_copy + 1];
    let mut running: Vec<(f32, InternalId)> = Vec::new();
    {
      let mut record = self.visited_pool.get();
      for layer in (0..=max_layer_copy).rev() {
        let half = self.window_size[layer] / 2;
        let mut entry_points = Vec::new();
        let window = self
          .order_table
          .lock()
          .window(&new_key, half, &mut entry_points);
        let Some(window) = window else {
          continue;
        };

        for ep in entry_points {
          if !record.test(ep) {
            let d = self.dist_to_node(vector, ep);
            running.push((d, ep));
          }
        }

        // Drop carried candidates that fall outside this layer's window.
        running.retain(|&(_, id)| window.contains(&self.arena.key::<A>(id)));
        for &(_, id) in &running {
          record.set(id);
        }

        if running.len() < self.m {
          let found = self.search_candidates::<true>(
            &running,
            vector,
            &SearchFilter::Keys(window),
            (layer, max_layer_copy),
            self.efc,
            Some(cur_num),
          );
          for (d, id) in found {
            if id == cur_num {
              return Err(Error::InternalInvariant(
                "beam search returned the id being inserted".to_string(),
              ));
            }
            if !record.test(id) {
              running.push((d.0, id));
            }
          }
        }

        per_layer[layer] = self.prune_by_heuristic(&mut running, self.m / 2);
      }
    }

    // Publish the record and its link lists, then stitch back-edges.
    self.publish_record(cur_num, label, vector, &attribute);
    {
      let _node = self.node_locks[cur_num as usize].lock();
      for layer in (0..=max_layer_copy).rev() {
        let ll = self.arena.link_list(cur_num, layer);
        if ll[self.m].load(Ordering::Acquire) != 0 {
          return Err(Error::InternalInvariant(
            "freshly claimed node has a non-empty link list".to_string(),
          ));
        }
        let selected = &per_layer[layer];
        for (slot, &(_, neighbor)) in selected.iter().enumerate() {
          if neighbor == cur_num {
            return Err(Error::InternalInvariant(
              "self edge in pruned neighbor list".to_string(),
            ));
          }
          ll[slot].store(neighbor, Ordering::Relaxed);
        }
        ll[self.m].store(selected.len() as u32, Ordering::Release);
      }
    }

    for layer in (0..=max_layer_copy).rev() {
      for &(dist, neighbor) in &per_layer[layer] {
        self.add_back_edge(cur_num, neighbor, dist, layer);
      }
    }

    // Registration is deliberately last: until the key is in the order
    // table no other insert can pick this node as an entry point.
    self.order_table.lock().insert(new_key, cur_num);
    Ok(())
  }

  fn publish_record(&self, id: InternalId, label: Label, vector: &[f32], attribute: &A) {
    self.arena.write_label(id, label);
    self.arena.write_att(id, attribute);
    self.arena.write_vector(id, vector);
  }

  /// Copies every non-empty link list from the old top layer into the new
  /// one; a larger window subsumes the smaller, so the lists stay valid.
  /// Runs under the max-layer lock.
  fn promote_top_layer(&self, old_top: usize, committed: usize) {
    let new_top = old_top + 1;
    info!(from = old_top, to = new_top, "raising top layer");
    for id in 0..committed as InternalId {
      let lower = self.arena.link_list(id, old_top);
      let count = lower[self.m].load(Ordering::Acquire);
      if count == 0 {
        continue;
      }
      let upper = self.arena.link_list(id, new_top);
      for slot in 0..self.m {
        upper[slot].store(lower[slot].load(Ordering::Relaxed), Ordering::Relaxed);
      }
      upper[self.m].store(count, Ordering::Release);
    }
    self.cur_max_layer.store(new_top, Ordering::Release);
  }

  fn add_back_edge(&self, new_id: InternalId, neighbor: InternalId, dist: f32, layer: usize) {
    let _lock = self.node_locks[neighbor as usize].lock();
    let ll = self.arena.link_list(neighbor, layer);
    let count = (ll[self.m].load(Ordering::Acquire) as usize).min(self.m);
    if count < self.m {
      ll[count].store(new_id, Ordering::Relaxed);
      ll[self.m].store(count as u32 + 1, Ordering::Release);
      return;
    }

    // Full list: re-prune among window-resident neighbors plus the new id.
    let mut candidates: Vec<(f32, InternalId)> = Vec::with_capacity(count + 1);
    for slot in 0..count {
      let other = ll[slot].load(Ordering::Relaxed);
      candidates.push((self.dist_between(neighbor, other), other));
    }
    let keys: Vec<AttKey<A>> = candidates
      .iter()
      .map(|&(_, id)| self.arena.key::<A>(id))
      .collect();
    let half = self.window_size[layer] / 2;
    let center = self.arena.key::<A>(neighbor);
    let mut candidates = self
      .order_table
      .lock()
      .in_window(&center, half, candidates, &keys);
    candidates.push((dist, new_id));

    let pruned = self.prune_by_heuristic(&mut candidates, self.m);
    for (slot, &(_, id)) in pruned.iter().enumerate() {
      ll[slot].store(id, Ordering::Relaxed);
    }
    ll[self.m].store(pruned.len() as u32, Ordering::Release);
  }

  /// Keeps at most `m` candidates, nearest first, dropping any candidate
  /// that sits farther from the pivot than from an already-kept neighbor.
  fn prune_by_heuristic(
    &self,
    candidates: &mut Vec<(f32, InternalId)>,
    m: usize,
  ) -> Vec<(f32, InternalId)> {
    if m == 0 {
      return Vec::new();
    }
    if candidates.len() <= m {
      return candidates.clone();
    }
    candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut pruned: Vec<(f32, InternalId)> = Vec::with_capacity(m);
    for &(dist, id) in candidates.iter() {
      if pruned.len() >= m {
        break;
      }
      let mut keep = true;
      for &(_, kept) in &pruned {
        if self.dist_between(id, kept) < dist {
          keep = false;
          break;
        }
      }
      if keep {
        pruned.push((dist, id));
      }
    }
    pruned
  }

  /// Beam search across layers `layer_range.0 ..= layer_range.1`.
  ///
  /// Each expansion walks a node's layer lists from the top of the range
  /// downwards until `m` new filter-passing neighbors have been taken; a
  /// neighbor that fails the filter does not consume budget but forces the
  /// next lower layer (its narrower neighborhood) to be consulted. Query
  /// expansions whose top layer produced no filter failures skip the lower
  /// layers outright.
  ///
  /// In build mode the expanded node's lock is held, entry points are
  /// admitted up to `ef`, and `ignore` is pre-marked visited.
  fn search_candidates<const IS_BUILD: bool>(
    &self,
    entry_points: &[(f32, InternalId)],
    query: &[f32],
    filter: &SearchFilter<'_, A>,
    layer_range: (usize, usize),
    ef: usize,
    ignore: Option<InternalId>,
  ) -> DistHeap {
    let mut result: DistHeap = BinaryHeap::new();
    if entry_points.is_empty() {
      return result;
    }

    let mut visited = self.visited_pool.get();
    if IS_BUILD {
      if let Some(skip) = ignore {
        visited.set(skip);
      }
    }

    // min-heap by negated distance
    let mut candidates: DistHeap = BinaryHeap::new();
    for &(d, id) in entry_points {
      candidates.push((OrderedFloat(-d), id));
      result.push((OrderedFloat(d), id));
      visited.set(id);
    }
    let mut res_max = match result.peek() {
      Some(&(d, _)) => d.0,
      None => f32::INFINITY,
    };

    while let Some(&(neg_dist, id)) = candidates.peek() {
      let dist = -neg_dist.0;
      if IS_BUILD {
        if dist > res_max && result.len() == ef {
          break;
        }
      } else if dist > res_max {
        break;
      }
      candidates.pop();
      self.metric_hops.fetch_add(1, Ordering::Relaxed);

      let _node_guard = IS_BUILD.then(|| self.node_locks[id as usize].lock());
      let mut taken = 0usize;
      'layers: for layer in (layer_range.0..=layer_range.1).rev() {
        if taken >= self.m {
          break;
        }
        let ll = self.arena.link_list(id, layer);
        let count = (ll[self.m].load(Ordering::Acquire) as usize).min(self.m);
        let mut saw_filtered = false;
        for slot in 0..count {
          if taken >= self.m {
            break 'layers;
          }
          let neighbor = ll[slot].load(Ordering::Relaxed);
          if !filter.test(&self.arena, neighbor) {
            saw_filtered = true;
            continue;
          }
          if visited.test(neighbor) {
            continue;
          }
          visited.set(neighbor);
          let d = self.dist_to_node(query, neighbor);
          taken += 1;
          if result.len() < ef || d < res_max {
            candidates.push((OrderedFloat(-d), neighbor));
            result.push((OrderedFloat(d), neighbor));
            if result.len() > ef {
              result.pop();
            }
            if let Some(&(worst, _)) = result.peek() {
              res_max = worst.0;
            }
          }
        }
        if !IS_BUILD && !saw_filtered {
          break;
        }
      }
    }

    result
  }

  /// Picks the top search layer whose window best brackets a range
  /// filter's cardinality, preferring the tighter side of the bracket.
  fn decide_top_layer(&self, cardinality: usize) -> usize {
    let ws = &self.window_size;
    let mut idx = ws.partition_point(|&w| w < cardinality);
    if idx == ws.len() || ws[idx] > cardinality {
      idx = idx.saturating_sub(1);
    }
    let top = if idx == 0 {
      1
    } else if idx == self.wp {
      idx
    } else {
      let frac_lower = ws[idx - 1] as f32 / cardinality as f32;
      let frac_upper = cardinality as f32 / ws[idx + 1].min(self.max_elements) as f32;
      if frac_lower > frac_upper {
        idx
      } else {
        idx + 1
      }
    };
    top.min(self.max_layer())
  }

  /// k nearest neighbors of `query` among items passing `filter`, returned
  /// as `(distance, label)` pairs in ascending distance order.
  pub fn search(
    &self,
    query: &[f32],
    ef_search: usize,
    k: usize,
    filter: &Filter<A>,
  ) -> Result<Vec<(f32, Label)>> {
    if query.len() != self.space.dim() {
      return Err(Error::DimensionMismatch {
        expected: self.space.dim(),
        actual: query.len(),
      });
    }
    let n = self.size();
    if n == 0 {
      return Ok(Vec::new());
    }
    let ef = ef_search.max(k);

    let mut heap = match filter {
      Filter::Range { l, u } => {
        let lo = AttKey::new(*l, 0);
        let hi = AttKey::new(*u, Label::MAX);
        let mut entry_ids = Vec::new();
        let cardinality =
          match self
            .order_table
            .lock()
            .range_cardinality(&lo, &hi, &mut entry_ids)
          {
            Ok(c) => c,
            Err(Error::RangeEmpty) => return Ok(Vec::new()),
            Err(e) => return Err(e),
          };
        let top = self.decide_top_layer(cardinality);
        let entry_points: Vec<(f32, InternalId)> = entry_ids
          .into_iter()
          .map(|id| (self.dist_to_node(query, id), id))
          .collect();
        self.search_candidates::<false>(
          &entry_points,
          query,
          &SearchFilter::Keys(KeyRange { lo, hi }),
          (0, top),
          ef,
          None,
        )
      }
      Filter::Set(set) => {
        let entry_points = self.scan_entry_points(query, ef, |id| {
          set.contains(&self.arena.att::<A>(id))
        });
        self.search_candidates::<false>(
          &entry_points,
          query,
          &SearchFilter::Atts(set),
          (0, self.max_layer()),
          ef,
          None,
        )
      }
      Filter::Bitset(bits) => {
        let entry_points =
          self.scan_entry_points(query, ef, |id| bits.test(self.arena.label(id)));
        self.search_candidates::<false>(
          &entry_points,
          query,
          &SearchFilter::Labels(bits),
          (0, self.max_layer()),
          ef,
          None,
        )
      }
      Filter::None => {
        let ep = rand::thread_rng().gen_range(0..n) as InternalId;
        let entry_points = vec![(self.dist_to_node(query, ep), ep)];
        let top = self.max_layer();
        self.search_candidates::<false>(
          &entry_points,
          query,
          &SearchFilter::All,
          (top, top),
          ef,
          None,
        )
      }
    };

    while heap.len() > k {
      heap.pop();
    }
    let mut out: Vec<(f32, Label)> = Vec::with_capacity(heap.len());
    while let Some((d, id)) = heap.pop() {
      out.push((d.0, self.arena.label(id)));
    }
    out.reverse();
    Ok(out)
  }

  /// Entry points for set/bitset filters: the first `ef` committed ids
  /// that pass the predicate, scanning from id 0.
  fn scan_entry_points(
    &self,
    query: &[f32],
    ef: usize,
    pass: impl Fn(InternalId) -> bool,
  ) -> Vec<(f32, InternalId)> {
    let n = self.size();
    let mut eps = Vec::new();
    for id in 0..n as InternalId {
      if eps.len() >= ef {
        break;
      }
      if pass(id) {
        eps.push((self.dist_to_node(query, id), id));
      }
    }
    eps
  }

  pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
    let _mutation_guard = self.mutation_lock.write();
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    let layout = self.arena.layout();
    let fields: [usize; HEADER_FIELDS] = [
      self.max_elements,
      self.space.dim(),
      self.wp,
      self.o,
      self.m,
      self.efc,
      self.size(),
      self.max_layer(),
      layout.record_size,
      self.arena.len_bytes(),
      layout.offset_label,
      layout.offset_att,
      layout.offset_vec,
      layout.offset_linklists,
    ];
    for field in fields {
      w.write_all(&field.to_ne_bytes())?;
    }
    w.write_all(self.arena.as_bytes())?;
    w.flush()?;
    Ok(())
  }

  /// Opens a saved index. The arena is read back verbatim; the order table
  /// is rebuilt by scanning the committed records.
  pub fn open_from_path(path: impl AsRef<Path>, space: SpaceKind) -> Result<Self> {
    let file = File::open(path)?;
    let mut r = BufReader::new(file);

    let mut fields = [0usize; HEADER_FIELDS];
    let mut buf = [0u8; size_of::<usize>()];
    for field in fields.iter_mut() {
      r.read_exact(&mut buf).map_err(short_file)?;
      *field = usize::from_ne_bytes(buf);
    }
    let [max_elements, dim, wp, o, m, efc, cur_count, cur_max_layer, record_size, arena_bytes, offset_label, offset_att, offset_vec, offset_linklists] =
      fields;

    if dim == 0 || m == 0 || o < 2 {
      return Err(Error::CorruptFile("implausible parameters".to_string()));
    }
    let layout = RecordLayout::new(A::SIZE, dim, m, wp);
    if layout.record_size != record_size
      || layout.offset_label != offset_label
      || layout.offset_att != offset_att
      || layout.offset_vec != offset_vec
      || layout.offset_linklists != offset_linklists
    {
      return Err(Error::CorruptFile(
        "stored record layout disagrees with recomputed layout".to_string(),
      ));
    }
    if arena_bytes != max_elements * record_size {
      return Err(Error::CorruptFile(
        "arena size disagrees with element count".to_string(),
      ));
    }
    if cur_count > max_elements || cur_max_layer > wp {
      return Err(Error::CorruptFile(
        "element count or layer out of range".to_string(),
      ));
    }

    let mut arena = NodeArena::new(max_elements, layout)?;
    r.read_exact(arena.as_bytes_mut()).map_err(short_file)?;

    let mut wp_out = wp;
    let window_size = Self::window_schedule(max_elements, o, &mut wp_out, false);

    let mut order_table = OrderTable::with_capacity(max_elements);
    for id in 0..cur_count as InternalId {
      order_table.insert(arena.key::<A>(id), id);
    }

    let index = Self::assemble(
      Space::new(space, dim),
      max_elements,
      m,
      efc,
      o,
      wp,
      window_size,
      arena,
      order_table,
      cur_count,
      cur_max_layer,
    );

    info!(
      max_elements,
      dim,
      wp,
      o,
      m,
      efc,
      cur_count,
      cur_max_layer,
      "opened index"
    );
    if cur_count > 0 {
      for layer in 0..=cur_max_layer {
        let degree_sum: usize = (0..cur_count as InternalId)
          .map(|id| {
            index.arena.link_list(id, layer)[m].load(Ordering::Relaxed) as usize
          })
          .sum();
        debug!(layer, avg_degree = degree_sum / cur_count, "layer degree");
      }
    }
    Ok(index)
  }

  /// Verifies the structural invariants of the graph and the order table.
  /// Intended for tests and post-build validation, not hot paths.
  pub fn check_integrity(&self) -> Result<()> {
    let n = self.size();
    let top = self.max_layer();

    if n > 0 {
      let expected = self
        .window_size
        .iter()
        .position(|&w| n <= w)
        .unwrap_or(self.wp);
      if top != expected {
        return Err(Error::InternalInvariant(format!(
          "top layer is {top}, expected {expected} for {n} items"
        )));
      }
    }

    for id in 0..n as InternalId {
      for layer in 0..=top {
        let ll = self.arena.link_list(id, layer);
        let count = ll[self.m].load(Ordering::Acquire) as usize;
        if count > self.m {
          return Err(Error::InternalInvariant(format!(
            "node {id} layer {layer} has {count} neighbors"
          )));
        }
        let mut seen = ahash::HashSet::default();
        for slot in 0..count {
          let neighbor = ll[slot].load(Ordering::Relaxed);
          if neighbor == id {
            return Err(Error::InternalInvariant(format!(
              "node {id} layer {layer} has a self edge"
            )));
          }
          if neighbor as usize >= n {
            return Err(Error::InternalInvariant(format!(
              "node {id} layer {layer} points at uncommitted id {neighbor}"
            )));
          }
          if !seen.insert(neighbor) {
            return Err(Error::InternalInvariant(format!(
              "node {id} layer {layer} repeats neighbor {neighbor}"
            )));
          }
        }
      }
    }

    let entries = self.order_table.lock().inorder();
    if entries.len() != n {
      return Err(Error::InternalInvariant(format!(
        "order table holds {} keys for {n} items",
        entries.len()
      )));
    }
    let mut id_seen = vec![false; n];
    for pair in entries.windows(2) {
      if pair[0].0 >= pair[1].0 {
        return Err(Error::InternalInvariant(
          "order table keys out of order".to_string(),
        ));
      }
    }
    for &(key, id) in &entries {
      if id as usize >= n || id_seen[id as usize] {
        return Err(Error::InternalInvariant(
          "order table ids are not a permutation".to_string(),
        ));
      }
      id_seen[id as usize] = true;
      if self.arena.key::<A>(id) != key {
        return Err(Error::InternalInvariant(format!(
          "order table key disagrees with record {id}"
        )));
      }
    }
    Ok(())
  }
}

fn short_file(e: std::io::Error) -> Error {
  if e.kind() == std::io::ErrorKind::UnexpectedEof {
    Error::CorruptFile("file shorter than header declares".to_string())
  } else {
    Error::Io(e)
  }
}
