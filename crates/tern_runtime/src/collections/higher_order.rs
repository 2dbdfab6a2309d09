//! Higher-order vector operations, written once over [`VectorBackend`].
//!
//! Callbacks are compiled functions called with an opaque environment
//! pointer and a context cell. They borrow the elements they are given and
//! return an owned result; `reduce` hands the accumulator over on each call.

use super::{ElemInfo, VectorBackend};
use crate::errors::{RtResult, RuntimeError};
use smallvec::SmallVec;
use std::ffi::c_void;
use std::sync::Arc;
use tern_core::{AllocHandle, Heap, RawCell};

/// `(env, value, context) -> value`
pub type MapFn = unsafe extern "C-unwind" fn(*mut c_void, RawCell, RawCell) -> RawCell;

/// `(env, value, value, context) -> value`
pub type FoldFn = unsafe extern "C-unwind" fn(*mut c_void, RawCell, RawCell, RawCell) -> RawCell;

/// A compiled function bound to its environment and context value.
#[derive(Clone, Copy)]
pub struct Callback<F> {
    pub func: F,
    pub env: *mut c_void,
    pub ctx: RawCell,
}

impl<F> Callback<F> {
    pub fn new(func: F, env: *mut c_void, ctx: RawCell) -> Self {
        Self { func, env, ctx }
    }
}

impl Callback<MapFn> {
    #[inline]
    fn call(&self, value: RawCell) -> RawCell {
        unsafe { (self.func)(self.env, value, self.ctx) }
    }
}

impl Callback<FoldFn> {
    #[inline]
    fn call(&self, a: RawCell, b: RawCell) -> RawCell {
        unsafe { (self.func)(self.env, a, b, self.ctx) }
    }
}

pub fn map<B: VectorBackend>(
    heap: &Arc<Heap>,
    out_elem: ElemInfo,
    v: AllocHandle,
    f: Callback<MapFn>,
) -> AllocHandle {
    let out: Vec<RawCell> = B::cells(v).into_iter().map(|c| f.call(c)).collect();
    B::from_cells(heap, out_elem, out)
}

pub fn filter<B: VectorBackend>(
    heap: &Arc<Heap>,
    elem: ElemInfo,
    v: AllocHandle,
    keep: Callback<MapFn>,
) -> AllocHandle {
    let kept: Vec<RawCell> = B::cells(v)
        .into_iter()
        .filter(|&c| keep.call(c).as_bool())
        .collect();
    for &c in &kept {
        elem.retain(c);
    }
    B::from_cells(heap, elem, kept)
}

pub fn reduce<B: VectorBackend>(
    acc_elem: ElemInfo,
    v: AllocHandle,
    init: RawCell,
    f: Callback<FoldFn>,
) -> RawCell {
    acc_elem.retain(init);
    B::cells(v)
        .into_iter()
        .fold(init, |acc, c| f.call(acc, c))
}

/// Map every element after the element it depends on.
///
/// `parents[i]` is the index whose result element `i` needs, or -1. Each
/// call receives a temporary vector of the solved dependency results; that
/// vector is released after the call without touching the results.
pub fn map_dag<B: VectorBackend>(
    heap: &Arc<Heap>,
    out_elem: ElemInfo,
    v: AllocHandle,
    parents: &[i64],
    f: Callback<FoldFn>,
) -> RtResult<AllocHandle> {
    let cells = B::cells(v);
    let n = cells.len();
    if parents.len() != n {
        return Err(RuntimeError::LengthMismatch {
            elements: n,
            parents: parents.len(),
        });
    }

    let mut pending = vec![0u32; n];
    let mut dependents: Vec<SmallVec<[usize; 4]>> = vec![SmallVec::new(); n];
    for (i, &p) in parents.iter().enumerate() {
        if p == -1 {
            continue;
        }
        if p < 0 || p as usize >= n {
            return Err(RuntimeError::InvalidParent {
                index: i,
                parent: p,
            });
        }
        pending[i] += 1;
        dependents[p as usize].push(i);
    }

    let mut results: Vec<Option<RawCell>> = vec![None; n];
    let mut ready: Vec<usize> = (0..n).filter(|&i| pending[i] == 0).collect();
    let mut solved = 0usize;
    while !ready.is_empty() {
        let mut next = Vec::new();
        for &i in &ready {
            let deps: SmallVec<[RawCell; 1]> = match parents[i] {
                -1 => SmallVec::new(),
                p => results[p as usize].into_iter().collect(),
            };
            let deps_vec = B::alias(heap, out_elem, &deps);
            let r = f.call(cells[i], RawCell::from_handle(deps_vec));
            B::release_alias(deps_vec);
            results[i] = Some(r);
            solved += 1;
            for &d in &dependents[i] {
                pending[d] -= 1;
                if pending[d] == 0 {
                    next.push(d);
                }
            }
        }
        ready = next;
    }

    if solved != n {
        let types = heap.types();
        for r in results.into_iter().flatten() {
            out_elem.release(types, r);
        }
        panic!("map_dag: dependency cycle leaves {} of {n} elements blocked", n - solved);
    }
    Ok(B::from_cells(heap, out_elem, results.into_iter().flatten().collect()))
}

/// Stable sort with a compiled `less(a, b)` predicate.
///
/// `less` should be a strict weak order. Any other predicate still yields a
/// permutation of the input, in an unspecified order.
pub fn stable_sort<B: VectorBackend>(
    heap: &Arc<Heap>,
    elem: ElemInfo,
    v: AllocHandle,
    less: Callback<FoldFn>,
) -> AllocHandle {
    let mut cells = B::cells(v);
    merge_sort(&mut cells, |a, b| less.call(a, b).as_bool());
    for &c in &cells {
        elem.retain(c);
    }
    B::from_cells(heap, elem, cells)
}

/// Bottom-up merge sort. The right run wins only when strictly less, so
/// equal elements keep their input order.
fn merge_sort(cells: &mut Vec<RawCell>, mut less: impl FnMut(RawCell, RawCell) -> bool) {
    let n = cells.len();
    let mut scratch = Vec::with_capacity(n);
    let mut width = 1;
    while width < n {
        scratch.clear();
        for start in (0..n).step_by(2 * width) {
            let mid = (start + width).min(n);
            let end = (start + 2 * width).min(n);
            let (mut i, mut j) = (start, mid);
            while i < mid && j < end {
                if less(cells[j], cells[i]) {
                    scratch.push(cells[j]);
                    j += 1;
                } else {
                    scratch.push(cells[i]);
                    i += 1;
                }
            }
            scratch.extend_from_slice(&cells[i..mid]);
            scratch.extend_from_slice(&cells[j..end]);
        }
        std::mem::swap(cells, &mut scratch);
        width *= 2;
    }
}
