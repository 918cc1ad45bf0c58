//! Flat node storage. One fixed-size record per internal id:
//!
//! `label (8B) | attribute | vector (4*dim B) | (wp+1) link lists`
//!
//! where each link list is `m` neighbor ids followed by one count word, all
//! u32. Link lists are stored in reverse layer order so the topmost layer
//! sits next to the vector and a prefetch of it pulls lower layers in.
//!
//! Access contract: a record's label, attribute and vector are written once,
//! under the owning insert's per-node lock, before the record becomes
//! reachable through the order table; readers never observe them mid-write.
//! Link-list words are shared between concurrent readers and back-edge
//! writers, so they are accessed through `AtomicU32` views.

use crate::attribute::AttKey;
use crate::attribute::Attribute;
use crate::error::Error;
use crate::error::Result;
use crate::InternalId;
use crate::Label;
use std::alloc;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;

const HUGE_PAGE: usize = 1 << 21;
const CACHE_LINE: usize = 64;

/// Field offsets within a record, fixed at index creation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecordLayout {
  pub att_size: usize,
  pub dim: usize,
  pub m: usize,
  pub wp: usize,
  pub record_size: usize,
  pub offset_label: usize,
  pub offset_att: usize,
  pub offset_vec: usize,
  pub offset_linklists: usize,
}

impl RecordLayout {
  pub fn new(att_size: usize, dim: usize, m: usize, wp: usize) -> Self {
    // Attribute widths are multiples of 4, which keeps the vector field
    // 4-byte aligned inside a 64-byte aligned arena.
    debug_assert_eq!(att_size % 4, 0);
    let offset_label = 0;
    let offset_att = offset_label + size_of::<Label>();
    let offset_vec = offset_att + att_size;
    let offset_linklists = offset_vec + dim * size_of::<f32>();
    let record_size = offset_linklists + (wp + 1) * (m + 1) * size_of::<InternalId>();
    Self {
      att_size,
      dim,
      m,
      wp,
      record_size,
      offset_label,
      offset_att,
      offset_vec,
      offset_linklists,
    }
  }

  #[inline]
  fn linklist_offset(&self, layer: usize) -> usize {
    debug_assert!(layer <= self.wp);
    self.offset_linklists + (self.wp - layer) * (self.m + 1) * size_of::<InternalId>()
  }
}

/// Contiguous zero-initialised buffer of `max_n` records, preferring
/// huge-page alignment and falling back to cache-line alignment.
pub struct NodeArena {
  ptr: NonNull<u8>,
  bytes: usize,
  align: usize,
  max_n: usize,
  layout: RecordLayout,
}

unsafe impl Send for NodeArena {}
unsafe impl Sync for NodeArena {}

impl NodeArena {
  pub fn new(max_n: usize, layout: RecordLayout) -> Result<Self> {
    let bytes = max_n
      .checked_mul(layout.record_size)
      .ok_or(Error::AllocFailed(usize::MAX))?;
    if bytes == 0 {
      return Ok(Self {
        ptr: NonNull::dangling(),
        bytes: 0,
        align: CACHE_LINE,
        max_n,
        layout,
      });
    }
    let (ptr, align) = Self::alloc_zeroed(bytes)?;
    Ok(Self {
      ptr,
      bytes,
      align,
      max_n,
      layout,
    })
  }

  fn alloc_zeroed(bytes: usize) -> Result<(NonNull<u8>, usize)> {
    if bytes >= HUGE_PAGE {
      if let Ok(l) = alloc::Layout::from_size_align(bytes, HUGE_PAGE) {
        let p = unsafe { alloc::alloc_zeroed(l) };
        if let Some(nn) = NonNull::new(p) {
          return Ok((nn, HUGE_PAGE));
        }
      }
    }
    let l = alloc::Layout::from_size_align(bytes, CACHE_LINE)
      .map_err(|_| Error::AllocFailed(bytes))?;
    let p = unsafe { alloc::alloc_zeroed(l) };
    NonNull::new(p)
      .map(|nn| (nn, CACHE_LINE))
      .ok_or(Error::AllocFailed(bytes))
  }

  pub fn layout(&self) -> &RecordLayout {
    &self.layout
  }

  pub fn len_bytes(&self) -> usize {
    self.bytes
  }

  #[inline]
  fn record(&self, id: InternalId) -> *mut u8 {
    debug_assert!((id as usize) < self.max_n);
    unsafe { self.ptr.as_ptr().add(id as usize * self.layout.record_size) }
  }

  #[inline]
  pub fn label(&self, id: InternalId) -> Label {
    unsafe {
      (self.record(id).add(self.layout.offset_label) as *const Label).read_unaligned()
    }
  }

  #[inline]
  pub fn write_label(&self, id: InternalId, label: Label) {
    unsafe {
      (self.record(id).add(self.layout.offset_label) as *mut Label).write_unaligned(label);
    }
  }

  #[inline]
  pub fn att<A: Attribute>(&self, id: InternalId) -> A {
    debug_assert_eq!(A::SIZE, self.layout.att_size);
    unsafe {
      A::read_bytes(std::slice::from_raw_parts(
        self.record(id).add(self.layout.offset_att),
        A::SIZE,
      ))
    }
  }

  #[inline]
  pub fn write_att<A: Attribute>(&self, id: InternalId, att: &A) {
    debug_assert_eq!(A::SIZE, self.layout.att_size);
    unsafe {
      att.write_bytes(std::slice::from_raw_parts_mut(
        self.record(id).add(self.layout.offset_att),
        A::SIZE,
      ));
    }
  }

  #[inline]
  pub fn key<A: Attribute>(&self, id: InternalId) -> AttKey<A> {
    AttKey::new(self.att(id), self.label(id))
  }

  #[inline]
  pub fn vector(&self, id: InternalId) -> &[f32] {
    unsafe {
      std::slice::from_raw_parts(
        self.record(id).add(self.layout.offset_vec) as *const f32,
        self.layout.dim,
      )
    }
  }

  #[inline]
  pub fn write_vector(&self, id: InternalId, v: &[f32]) {
    debug_assert_eq!(v.len(), self.layout.dim);
    unsafe {
      std::ptr::copy_nonoverlapping(
        v.as_ptr(),
        self.record(id).add(self.layout.offset_vec) as *mut f32,
        self.layout.dim,
      );
    }
  }

  /// The `m + 1` words of a node's link list at `layer`; the final word is
  /// the neighbor count.
  #[inline]
  pub fn link_list(&self, id: InternalId, layer: usize) -> &[AtomicU32] {
    unsafe {
      std::slice::from_raw_parts(
        self.record(id).add(self.layout.linklist_offset(layer)) as *const AtomicU32,
        self.layout.m + 1,
      )
    }
  }

  pub fn as_bytes(&self) -> &[u8] {
    unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.bytes) }
  }

  pub fn as_bytes_mut(&mut self) -> &mut [u8] {
    unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.bytes) }
  }
}

impl Drop for NodeArena {
  fn drop(&mut self) {
    if self.bytes > 0 {
      unsafe {
        let l = alloc::Layout::from_size_align_unchecked(self.bytes, self.align);
        alloc::dealloc(self.ptr.as_ptr(), l);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::Ordering;

  #[test]
  fn layout_matches_field_widths() {
    let rl = RecordLayout::new(4, 3, 8, 2);
    assert_eq!(rl.offset_label, 0);
    assert_eq!(rl.offset_att, 8);
    assert_eq!(rl.offset_vec, 12);
    assert_eq!(rl.offset_linklists, 12 + 12);
    assert_eq!(rl.record_size, 24 + 3 * 9 * 4);
    // topmost layer sits first
    assert_eq!(rl.linklist_offset(2), rl.offset_linklists);
    assert_eq!(rl.linklist_offset(0), rl.offset_linklists + 2 * 9 * 4);
  }

  #[test]
  fn record_fields_round_trip() {
    let rl = RecordLayout::new(4, 2, 4, 1);
    let arena = NodeArena::new(3, rl).unwrap();

    arena.write_label(1, 77);
    arena.write_att(1, &-5i32);
    arena.write_vector(1, &[1.5, -2.5]);

    assert_eq!(arena.label(1), 77);
    assert_eq!(arena.att::<i32>(1), -5);
    assert_eq!(arena.vector(1), &[1.5, -2.5]);

    // untouched records read as zeroed
    assert_eq!(arena.label(0), 0);
    assert_eq!(arena.link_list(0, 0)[4].load(Ordering::Relaxed), 0);
    assert_eq!(arena.link_list(2, 1)[4].load(Ordering::Relaxed), 0);
  }

  #[test]
  fn link_lists_of_adjacent_layers_do_not_overlap() {
    let rl = RecordLayout::new(4, 2, 2, 1);
    let arena = NodeArena::new(1, rl).unwrap();

    let top = arena.link_list(0, 1);
    let bottom = arena.link_list(0, 0);
    top[0].store(10, Ordering::Relaxed);
    top[2].store(1, Ordering::Relaxed);
    bottom[0].store(20, Ordering::Relaxed);
    bottom[2].store(1, Ordering::Relaxed);

    assert_eq!(arena.link_list(0, 1)[0].load(Ordering::Relaxed), 10);
    assert_eq!(arena.link_list(0, 0)[0].load(Ordering::Relaxed), 20);
  }
}
