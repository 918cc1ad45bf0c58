use crate::error::Error;
use crate::error::Result;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SpaceKind {
  L2,
  Ip,
}

impl SpaceKind {
  pub fn parse(name: &str) -> Result<Self> {
    match name {
      "l2" => Ok(SpaceKind::L2),
      "ip" => Ok(SpaceKind::Ip),
      other => Err(Error::UnsupportedSpace(other.to_string())),
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      SpaceKind::L2 => "l2",
      SpaceKind::Ip => "ip",
    }
  }
}

impl FromStr for SpaceKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Self::parse(s)
  }
}

/// Raw pairwise reduction over two equal-length float buffers: squared
/// euclidean distance for `L2`, dot product for `Ip`. Turning the reduction
/// into a distance (`1 - dot` for inner product) happens in
/// [`Space::distance`], so every kernel below is metric-agnostic about it.
type ReduceFn = unsafe fn(*const f32, *const f32, usize) -> f32;

unsafe fn l2_sq_fallback(a: *const f32, b: *const f32, n: usize) -> f32 {
  let mut acc = 0.0_f32;
  for i in 0..n {
    let d = *a.add(i) - *b.add(i);
    acc += d * d;
  }
  acc
}

unsafe fn dot_fallback(a: *const f32, b: *const f32, n: usize) -> f32 {
  let mut acc = 0.0_f32;
  for i in 0..n {
    acc += *a.add(i) * *b.add(i);
  }
  acc
}

#[cfg(target_arch = "x86_64")]
mod x86 {
  use super::ReduceFn;
  use super::SpaceKind;
  use std::arch::x86_64::*;

  #[inline]
  unsafe fn hsum128(v: __m128) -> f32 {
    let high = _mm_movehl_ps(v, v);
    let pair = _mm_add_ps(v, high);
    let odd = _mm_shuffle_ps(pair, pair, 0x55);
    _mm_cvtss_f32(_mm_add_ss(pair, odd))
  }

  #[inline]
  #[target_feature(enable = "avx")]
  unsafe fn hsum256(v: __m256) -> f32 {
    hsum128(_mm_add_ps(
      _mm256_castps256_ps128(v),
      _mm256_extractf128_ps(v, 1),
    ))
  }

  #[target_feature(enable = "avx")]
  unsafe fn l2_sq_avx(a: *const f32, b: *const f32, n: usize) -> f32 {
    let mut acc0 = _mm256_setzero_ps();
    let mut acc1 = _mm256_setzero_ps();
    let mut i = 0usize;
    while i + 16 <= n {
      let d0 = _mm256_sub_ps(_mm256_loadu_ps(a.add(i)), _mm256_loadu_ps(b.add(i)));
      let d1 = _mm256_sub_ps(_mm256_loadu_ps(a.add(i + 8)), _mm256_loadu_ps(b.add(i + 8)));
      acc0 = _mm256_add_ps(acc0, _mm256_mul_ps(d0, d0));
      acc1 = _mm256_add_ps(acc1, _mm256_mul_ps(d1, d1));
      i += 16;
    }
    if i + 8 <= n {
      let d = _mm256_sub_ps(_mm256_loadu_ps(a.add(i)), _mm256_loadu_ps(b.add(i)));
      acc0 = _mm256_add_ps(acc0, _mm256_mul_ps(d, d));
      i += 8;
    }
    let mut total = hsum256(_mm256_add_ps(acc0, acc1));
    if i < n {
      total += super::l2_sq_fallback(a.add(i), b.add(i), n - i);
    }
    total
  }

  #[target_feature(enable = "avx")]
  unsafe fn dot_avx(a: *const f32, b: *const f32, n: usize) -> f32 {
    let mut acc0 = _mm256_setzero_ps();
    let mut acc1 = _mm256_setzero_ps();
    let mut i = 0usize;
    while i + 16 <= n {
      let p0 = _mm256_mul_ps(_mm256_loadu_ps(a.add(i)), _mm256_loadu_ps(b.add(i)));
      let p1 = _mm256_mul_ps(_mm256_loadu_ps(a.add(i + 8)), _mm256_loadu_ps(b.add(i + 8)));
      acc0 = _mm256_add_ps(acc0, p0);
      acc1 = _mm256_add_ps(acc1, p1);
      i += 16;
    }
    if i + 8 <= n {
      let p = _mm256_mul_ps(_mm256_loadu_ps(a.add(i)), _mm256_loadu_ps(b.add(i)));
      acc0 = _mm256_add_ps(acc0, p);
      i += 8;
    }
    let mut total = hsum256(_mm256_add_ps(acc0, acc1));
    if i < n {
      total += super::dot_fallback(a.add(i), b.add(i), n - i);
    }
    total
  }

  // SSE is part of the x86_64 baseline, so these need no runtime check.
  unsafe fn l2_sq_sse(a: *const f32, b: *const f32, n: usize) -> f32 {
    let mut acc = _mm_setzero_ps();
    let mut i = 0usize;
    while i + 4 <= n {
      let d = _mm_sub_ps(_mm_loadu_ps(a.add(i)), _mm_loadu_ps(b.add(i)));
      acc = _mm_add_ps(acc, _mm_mul_ps(d, d));
      i += 4;
    }
    let mut total = hsum128(acc);
    if i < n {
      total += super::l2_sq_fallback(a.add(i), b.add(i), n - i);
    }
    total
  }

  unsafe fn dot_sse(a: *const f32, b: *const f32, n: usize) -> f32 {
    let mut acc = _mm_setzero_ps();
    let mut i = 0usize;
    while i + 4 <= n {
      acc = _mm_add_ps(acc, _mm_mul_ps(_mm_loadu_ps(a.add(i)), _mm_loadu_ps(b.add(i))));
      i += 4;
    }
    let mut total = hsum128(acc);
    if i < n {
      total += super::dot_fallback(a.add(i), b.add(i), n - i);
    }
    total
  }

  pub fn select(kind: SpaceKind) -> ReduceFn {
    if std::is_x86_feature_detected!("avx") {
      match kind {
        SpaceKind::L2 => l2_sq_avx,
        SpaceKind::Ip => dot_avx,
      }
    } else {
      match kind {
        SpaceKind::L2 => l2_sq_sse,
        SpaceKind::Ip => dot_sse,
      }
    }
  }
}

/// A distance kernel bound to a fixed dimension. The reduction routine is
/// selected once from the CPU's feature set when the space is created.
#[derive(Clone, Copy, Debug)]
pub struct Space {
  kind: SpaceKind,
  dim: usize,
  reduce: ReduceFn,
}

impl Space {
  pub fn new(kind: SpaceKind, dim: usize) -> Self {
    #[cfg(target_arch = "x86_64")]
    let reduce = x86::select(kind);
    #[cfg(not(target_arch = "x86_64"))]
    let reduce: ReduceFn = match kind {
      SpaceKind::L2 => l2_sq_fallback,
      SpaceKind::Ip => dot_fallback,
    };
    Self { kind, dim, reduce }
  }

  pub fn kind(&self) -> SpaceKind {
    self.kind
  }

  pub fn dim(&self) -> usize {
    self.dim
  }

  #[inline]
  pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), self.dim);
    debug_assert_eq!(b.len(), self.dim);
    let raw = unsafe { (self.reduce)(a.as_ptr(), b.as_ptr(), self.dim) };
    match self.kind {
      SpaceKind::L2 => raw,
      SpaceKind::Ip => 1.0 - raw,
    }
  }
}
