//! Reusable scratch buffers for the matcher and search engine.
//!
//! Pools are thread-local free lists: acquisition hands out a cleared
//! buffer with whatever capacity a previous query grew it to, release
//! returns it. Buffers that ballooned past [`MAX_POOLED_CAPACITY`] are
//! dropped instead of retained, so one pathological query cannot pin
//! memory for the rest of the session. These pools are independent of the
//! long-lived index storage.

use std::cell::RefCell;

use crate::boundary::BoundaryCache;

/// Largest per-buffer capacity (in elements) kept alive in a pool.
pub const MAX_POOLED_CAPACITY: usize = 1 << 18;

// ---------------------------------------------------------------------------
// Vec-backed pools
// ---------------------------------------------------------------------------

macro_rules! vec_pool {
    ($pool:ident, $guard:ident, $acquire:ident, $elem:ty) => {
        thread_local! {
            static $pool: RefCell<Vec<Vec<$elem>>> = const { RefCell::new(Vec::new()) };
        }

        /// Pooled buffer; returns to the thread-local free list on drop.
        pub struct $guard {
            buf: Vec<$elem>,
        }

        impl std::ops::Deref for $guard {
            type Target = Vec<$elem>;
            fn deref(&self) -> &Vec<$elem> {
                &self.buf
            }
        }

        impl std::ops::DerefMut for $guard {
            fn deref_mut(&mut self) -> &mut Vec<$elem> {
                &mut self.buf
            }
        }

        impl Drop for $guard {
            fn drop(&mut self) {
                let mut buf = std::mem::take(&mut self.buf);
                if buf.capacity() == 0 || buf.capacity() > MAX_POOLED_CAPACITY {
                    return;
                }
                buf.clear();
                let _ = $pool.try_with(|pool| pool.borrow_mut().push(buf));
            }
        }

        /// Acquire a zero-length buffer with at least `capacity` elements
        /// reserved.
        pub fn $acquire(capacity: usize) -> $guard {
            let mut buf = $pool
                .try_with(|pool| pool.borrow_mut().pop())
                .ok()
                .flatten()
                .unwrap_or_default();
            if buf.capacity() < capacity {
                buf.reserve(capacity - buf.capacity());
            }
            $guard { buf }
        }
    };
}

vec_pool!(RUNE_POOL, RuneBuf, acquire_runes, char);
vec_pool!(BYTE_POOL, ByteBuf, acquire_bytes, u8);
vec_pool!(INDEX_POOL, IndexBuf, acquire_indices, u32);

// ---------------------------------------------------------------------------
// Boundary cache pool
// ---------------------------------------------------------------------------

thread_local! {
    static BOUNDARY_POOL: RefCell<Vec<BoundaryCache>> = const { RefCell::new(Vec::new()) };
}

/// Pooled [`BoundaryCache`], already reset for a target of `len` runes.
pub struct BoundaryGuard {
    cache: Option<BoundaryCache>,
}

impl std::ops::Deref for BoundaryGuard {
    type Target = BoundaryCache;
    fn deref(&self) -> &BoundaryCache {
        self.cache.as_ref().unwrap()
    }
}

impl std::ops::DerefMut for BoundaryGuard {
    fn deref_mut(&mut self) -> &mut BoundaryCache {
        self.cache.as_mut().unwrap()
    }
}

impl Drop for BoundaryGuard {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.take() {
            let _ = BOUNDARY_POOL.try_with(|pool| pool.borrow_mut().push(cache));
        }
    }
}

pub fn acquire_boundary(len: usize) -> BoundaryGuard {
    let mut cache = BOUNDARY_POOL
        .try_with(|pool| pool.borrow_mut().pop())
        .ok()
        .flatten()
        .unwrap_or_default();
    cache.reset(len);
    BoundaryGuard { cache: Some(cache) }
}

// ---------------------------------------------------------------------------
// DP scratch
// ---------------------------------------------------------------------------

/// Scratch state for one beamed DP alignment: two f64 rows, the f32 rows
/// used by the ASCII variant, and a flat back-pointer grid. The grid keeps
/// a per-cell generation so a fresh alignment never reads a stale pointer
/// without the cost of clearing `m * n` cells.
pub struct DpScratch {
    pub prev: Vec<f64>,
    pub cur: Vec<f64>,
    pub prev32: Vec<f32>,
    pub cur32: Vec<f32>,
    back: Vec<u32>,
    back_gen: Vec<u32>,
    generation: u32,
    cols: usize,
}

/// Back-pointer sentinel: the cell is a row-0 start, nothing precedes it.
pub const DP_START: u32 = u32::MAX;

impl Default for DpScratch {
    fn default() -> Self {
        DpScratch {
            prev: Vec::new(),
            cur: Vec::new(),
            prev32: Vec::new(),
            cur32: Vec::new(),
            back: Vec::new(),
            back_gen: Vec::new(),
            generation: 0,
            cols: 0,
        }
    }
}

impl DpScratch {
    /// Size the scratch for an `m x n` alignment and invalidate previous
    /// contents. `ascii32` additionally sizes the f32 rows.
    pub fn begin(&mut self, m: usize, n: usize, ascii32: bool) {
        let cells = m * n;
        if self.prev.len() < n {
            self.prev.resize(n, 0.0);
            self.cur.resize(n, 0.0);
        }
        if ascii32 && self.prev32.len() < n {
            self.prev32.resize(n, 0.0);
            self.cur32.resize(n, 0.0);
        }
        if self.back.len() < cells {
            self.back.resize(cells, 0);
            self.back_gen.resize(cells, 0);
        }
        self.cols = n;
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            self.back_gen.fill(0);
            self.generation = 1;
        }
    }

    #[inline]
    pub fn set_back(&mut self, row: usize, col: usize, prev_col: u32) {
        let idx = row * self.cols + col;
        self.back[idx] = prev_col;
        self.back_gen[idx] = self.generation;
    }

    /// The predecessor column recorded for `(row, col)`, or `None` when the
    /// cell was never written this generation.
    #[inline]
    pub fn back_at(&self, row: usize, col: usize) -> Option<u32> {
        let idx = row * self.cols + col;
        if self.back_gen[idx] == self.generation {
            Some(self.back[idx])
        } else {
            None
        }
    }
}

thread_local! {
    static DP_POOL: RefCell<Vec<DpScratch>> = const { RefCell::new(Vec::new()) };
}

pub struct DpGuard {
    scratch: Option<DpScratch>,
}

impl std::ops::Deref for DpGuard {
    type Target = DpScratch;
    fn deref(&self) -> &DpScratch {
        self.scratch.as_ref().unwrap()
    }
}

impl std::ops::DerefMut for DpGuard {
    fn deref_mut(&mut self) -> &mut DpScratch {
        self.scratch.as_mut().unwrap()
    }
}

impl Drop for DpGuard {
    fn drop(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            if scratch.back.capacity() > MAX_POOLED_CAPACITY {
                return;
            }
            let _ = DP_POOL.try_with(|pool| pool.borrow_mut().push(scratch));
        }
    }
}

/// Acquire DP scratch sized for an `m x n` alignment.
pub fn acquire_dp(m: usize, n: usize, ascii32: bool) -> DpGuard {
    let mut scratch = DP_POOL
        .try_with(|pool| pool.borrow_mut().pop())
        .ok()
        .flatten()
        .unwrap_or_default();
    scratch.begin(m, n, ascii32);
    DpGuard {
        scratch: Some(scratch),
    }
}
