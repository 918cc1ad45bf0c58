use crate::InternalId;
use parking_lot::Mutex;

pub type VisitTag = u16;

/// A reusable "visited" set. Clearing bumps the generation tag; the backing
/// array is only zeroed when the tag wraps, so a clear is O(1) amortised.
#[derive(Debug)]
pub struct VisitedList {
  cur: VisitTag,
  mass: Vec<VisitTag>,
}

impl VisitedList {
  fn new(num_elements: usize) -> Self {
    Self {
      cur: VisitTag::MAX,
      mass: vec![0; num_elements],
    }
  }

  fn advance(&mut self) {
    self.cur = self.cur.wrapping_add(1);
    if self.cur == 0 {
      self.mass.fill(0);
      self.cur = 1;
    }
  }
}

/// Free list of visited sets shared by concurrent searches. `get` hands out
/// a cleared set, lazily allocating when the pool is empty; the guard pushes
/// it back on drop.
#[derive(Debug)]
pub struct VisitedPool {
  pool: Mutex<Vec<VisitedList>>,
  num_elements: usize,
}

impl VisitedPool {
  pub fn new(initial_pool_size: usize, num_elements: usize) -> Self {
    let mut pool = Vec::with_capacity(initial_pool_size);
    for _ in 0..initial_pool_size {
      pool.push(VisitedList::new(num_elements));
    }
    Self {
      pool: Mutex::new(pool),
      num_elements,
    }
  }

  pub fn get(&self) -> VisitedGuard<'_> {
    let mut list = {
      let mut pool = self.pool.lock();
      pool
        .pop()
        .unwrap_or_else(|| VisitedList::new(self.num_elements))
    };
    list.advance();
    VisitedGuard {
      pool: &self.pool,
      list: Some(list),
    }
  }
}

pub struct VisitedGuard<'a> {
  pool: &'a Mutex<Vec<VisitedList>>,
  list: Option<VisitedList>,
}

impl VisitedGuard<'_> {
  #[inline]
  fn list(&self) -> &VisitedList {
    self.list.as_ref().expect("taken only in drop")
  }

  #[inline]
  pub fn set(&mut self, id: InternalId) {
    let tag = self.list().cur;
    self.list.as_mut().expect("taken only in drop").mass[id as usize] = tag;
  }

  #[inline]
  pub fn test(&self, id: InternalId) -> bool {
    let l = self.list();
    l.mass[id as usize] == l.cur
  }
}

impl Drop for VisitedGuard<'_> {
  fn drop(&mut self) {
    if let Some(list) = self.list.take() {
      self.pool.lock().push(list);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn guard_starts_cleared_and_tracks_visits() {
    let pool = VisitedPool::new(1, 8);
    let mut v = pool.get();
    assert!(!v.test(3));
    v.set(3);
    assert!(v.test(3));
    assert!(!v.test(4));
  }

  #[test]
  fn recycled_list_is_clear_without_rezeroing() {
    let pool = VisitedPool::new(1, 4);
    {
      let mut v = pool.get();
      v.set(0);
      v.set(1);
    }
    let v = pool.get();
    for id in 0..4 {
      assert!(!v.test(id));
    }
  }

  #[test]
  fn pool_grows_when_contended() {
    let pool = VisitedPool::new(1, 4);
    let a = pool.get();
    let mut b = pool.get();
    b.set(2);
    assert!(!a.test(2));
    assert!(b.test(2));
  }

  #[test]
  fn tag_wraparound_rezeroes_backing_array() {
    let pool = VisitedPool::new(1, 2);
    for _ in 0..(u16::MAX as usize + 2) {
      let mut v = pool.get();
      v.set(0);
    }
    let v = pool.get();
    assert!(!v.test(0));
  }
}
