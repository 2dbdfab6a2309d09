//! Reference-counted heap.
//!
//! Every object is a fixed [`AllocHeader`] followed by `words` trailing
//! 8-byte words. The layout is shared with generated code, so the header
//! is `#[repr(C)]` and its offsets are asserted below.
//!
//! There is no collector. An allocation starts with RC=1; the holder that
//! drives RC to zero runs the type-specific disposer and then calls
//! [`Heap::free`]. Reaching zero is terminal: a later `retain` panics.
//!
//! The registry of live allocations exists only for leak diagnostics and is
//! compiled out without the `leak-registry` feature.

use crate::types::TypeSystem;
use std::alloc::{self, Layout};
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{self, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

#[cfg(feature = "leak-registry")]
use hashbrown::HashSet;
#[cfg(feature = "leak-registry")]
use parking_lot::Mutex;

pub const MAGIC_VECTOR: u32 = 0x7465_0001;
pub const MAGIC_PVECTOR: u32 = 0x7465_0002;
pub const MAGIC_STRING: u32 = 0x7465_0003;
pub const MAGIC_TABLE: u32 = 0x7465_0004;
pub const MAGIC_TRIE: u32 = 0x7465_0005;
pub const MAGIC_JSON: u32 = 0x7465_0006;
pub const MAGIC_STRUCT: u32 = 0x7465_0007;

pub const PAYLOAD_SLOTS: usize = 5;
pub const HEADER_SIZE: usize = 72;
const TAG_LEN: usize = 8;

#[repr(C)]
pub struct AllocHeader {
    rc: AtomicI64,
    magic: u32,
    words: u32,
    slots: [u64; PAYLOAD_SLOTS],
    heap: *const Heap,
    tag: [u8; TAG_LEN],
}

const _: () = assert!(std::mem::size_of::<AllocHeader>() == HEADER_SIZE);
const _: () = assert!(std::mem::align_of::<AllocHeader>() == 8);
const _: () = assert!(std::mem::offset_of!(AllocHeader, rc) == 0);
const _: () = assert!(std::mem::offset_of!(AllocHeader, magic) == 8);
const _: () = assert!(std::mem::offset_of!(AllocHeader, words) == 12);
const _: () = assert!(std::mem::offset_of!(AllocHeader, slots) == 16);
const _: () = assert!(std::mem::offset_of!(AllocHeader, heap) == 56);
const _: () = assert!(std::mem::offset_of!(AllocHeader, tag) == 64);

fn encode_tag(tag: &str) -> [u8; TAG_LEN] {
    let mut out = [0u8; TAG_LEN];
    let n = tag.len().min(TAG_LEN);
    out[..n].copy_from_slice(&tag.as_bytes()[..n]);
    out
}

/// Handle to a live allocation.
///
/// A handle is a plain pointer; holding one does not keep the allocation
/// alive. Liveness is governed by the reference count alone.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocHandle(NonNull<AllocHeader>);

// RC updates are atomic and payloads are immutable once published.
unsafe impl Send for AllocHandle {}
unsafe impl Sync for AllocHandle {}

impl AllocHandle {
    /// # Safety
    /// `ptr` must be null or point at a header produced by [`Heap::allocate`]
    /// that has not been freed.
    #[inline]
    pub unsafe fn from_raw(ptr: *mut AllocHeader) -> Option<Self> {
        NonNull::new(ptr).map(AllocHandle)
    }

    #[inline]
    pub fn as_ptr(self) -> *mut AllocHeader {
        self.0.as_ptr()
    }

    #[inline]
    fn header(&self) -> &AllocHeader {
        unsafe { self.0.as_ref() }
    }

    #[inline]
    pub fn rc(self) -> i64 {
        self.header().rc.load(Ordering::Acquire)
    }

    #[inline]
    pub fn magic(self) -> u32 {
        self.header().magic
    }

    /// Number of trailing words.
    #[inline]
    pub fn words(self) -> usize {
        self.header().words as usize
    }

    pub fn tag(self) -> String {
        let tag = &self.header().tag;
        let end = tag.iter().position(|&b| b == 0).unwrap_or(TAG_LEN);
        String::from_utf8_lossy(&tag[..end]).into_owned()
    }

    #[inline]
    pub fn heap(&self) -> &Heap {
        unsafe { &*self.header().heap }
    }

    /// A new strong reference to the owning heap.
    pub fn heap_arc(self) -> Arc<Heap> {
        let p = self.header().heap;
        unsafe {
            Arc::increment_strong_count(p);
            Arc::from_raw(p)
        }
    }

    #[inline]
    pub fn slot(self, i: usize) -> u64 {
        self.header().slots[i]
    }

    /// Payload slots are written only while the allocation is still private
    /// to its creator.
    #[inline]
    pub fn set_slot(self, i: usize, value: u64) {
        assert!(i < PAYLOAD_SLOTS);
        unsafe {
            let slots = ptr::addr_of_mut!((*self.as_ptr()).slots) as *mut u64;
            slots.add(i).write(value);
        }
    }

    /// Pointer to the first trailing word.
    #[inline]
    pub fn data(self) -> *mut u64 {
        unsafe { (self.as_ptr() as *mut u8).add(HEADER_SIZE) as *mut u64 }
    }

    #[inline]
    pub fn word(self, i: usize) -> u64 {
        assert!(i < self.words(), "word {i} out of {} words", self.words());
        unsafe { self.data().add(i).read() }
    }

    #[inline]
    pub fn set_word(self, i: usize, value: u64) {
        assert!(i < self.words(), "word {i} out of {} words", self.words());
        unsafe { self.data().add(i).write(value) }
    }

    /// View of the trailing words.
    ///
    /// # Safety
    /// The caller must not hold the slice past the allocation's release.
    #[inline]
    pub unsafe fn words_slice<'a>(self) -> &'a [u64] {
        unsafe { std::slice::from_raw_parts(self.data(), self.words()) }
    }

    /// Mutable view of the trailing words.
    ///
    /// # Safety
    /// Only valid while the allocation is private to the caller.
    #[inline]
    pub unsafe fn words_slice_mut<'a>(self) -> &'a mut [u64] {
        unsafe { std::slice::from_raw_parts_mut(self.data(), self.words()) }
    }

    /// Increment the reference count, returning the new count.
    #[inline]
    pub fn retain(self) -> i64 {
        let old = self.header().rc.fetch_add(1, Ordering::Relaxed);
        if old <= 0 {
            panic!("retain of disposed allocation {:?}", self);
        }
        old + 1
    }

    /// Decrement the reference count, returning the new count.
    ///
    /// A return of 0 obliges the caller to dispose the allocation exactly
    /// once.
    #[inline]
    pub fn release(self) -> i64 {
        let old = self.header().rc.fetch_sub(1, Ordering::Release);
        if old <= 0 {
            panic!("reference count underflow on {:?}", self);
        }
        if old == 1 {
            atomic::fence(Ordering::Acquire);
        }
        old - 1
    }
}

impl fmt::Debug for AllocHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AllocHandle({:p}", self.0.as_ptr())?;
        let tag = self.tag();
        if !tag.is_empty() {
            write!(f, ", {tag}")?;
        }
        write!(f, ")")
    }
}

/// An allocation still referenced when the leak scan ran.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeakRecord {
    pub address: usize,
    pub rc: i64,
    pub magic: u32,
    pub tag: String,
}

impl fmt::Display for LeakRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "leak {:#x} rc={} magic={:#010x} tag={}",
            self.address, self.rc, self.magic, self.tag
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub live: usize,
    pub allocated: usize,
    pub freed: usize,
}

pub struct Heap {
    types: Arc<dyn TypeSystem>,
    live: AtomicUsize,
    allocated: AtomicUsize,
    freed: AtomicUsize,
    #[cfg(feature = "leak-registry")]
    registry: Mutex<HashSet<usize, ahash::RandomState>>,
}

thread_local! {
    static CURRENT: RefCell<Vec<Arc<Heap>>> = const { RefCell::new(Vec::new()) };
}

static GLOBAL: OnceLock<Arc<Heap>> = OnceLock::new();

impl Heap {
    pub fn new(types: Arc<dyn TypeSystem>) -> Arc<Heap> {
        Arc::new(Heap {
            types,
            live: AtomicUsize::new(0),
            allocated: AtomicUsize::new(0),
            freed: AtomicUsize::new(0),
            #[cfg(feature = "leak-registry")]
            registry: Mutex::new(HashSet::with_hasher(crate::types::fast_hasher())),
        })
    }

    #[inline]
    pub fn types(&self) -> &dyn TypeSystem {
        &*self.types
    }

    pub fn types_arc(&self) -> Arc<dyn TypeSystem> {
        Arc::clone(&self.types)
    }

    fn layout(words: usize) -> Layout {
        words
            .checked_mul(8)
            .and_then(|n| n.checked_add(HEADER_SIZE))
            .and_then(|size| Layout::from_size_align(size, 8).ok())
            .unwrap_or_else(|| panic!("allocation of {words} words overflows"))
    }

    /// Reserve a header plus `words` zeroed trailing words with RC=1.
    pub fn allocate(self: &Arc<Self>, words: usize, magic: u32, tag: &str) -> AllocHandle {
        let word_count = u32::try_from(words)
            .unwrap_or_else(|_| panic!("allocation of {words} words exceeds header limit"));
        let layout = Self::layout(words);
        let raw = unsafe { alloc::alloc_zeroed(layout) } as *mut AllocHeader;
        if raw.is_null() {
            alloc::handle_alloc_error(layout);
        }
        unsafe {
            raw.write(AllocHeader {
                rc: AtomicI64::new(1),
                magic,
                words: word_count,
                slots: [0; PAYLOAD_SLOTS],
                heap: Arc::into_raw(Arc::clone(self)),
                tag: encode_tag(tag),
            });
        }
        self.live.fetch_add(1, Ordering::Relaxed);
        self.allocated.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "leak-registry")]
        self.lock_registry().insert(raw as usize);
        AllocHandle(unsafe { NonNull::new_unchecked(raw) })
    }

    /// Return an allocation's memory once its count has reached zero.
    ///
    /// # Safety
    /// `handle` must not be used afterwards and its children must already
    /// have been released.
    pub unsafe fn free(handle: AllocHandle) {
        let rc = handle.rc();
        if rc != 0 {
            panic!("free of {:?} with rc={rc}", handle);
        }
        let raw = handle.as_ptr();
        let (heap_ptr, words) = unsafe { ((*raw).heap, (*raw).words as usize) };
        let heap = unsafe { Arc::from_raw(heap_ptr) };
        #[cfg(feature = "leak-registry")]
        heap.lock_registry().remove(&(raw as usize));
        heap.live.fetch_sub(1, Ordering::Relaxed);
        heap.freed.fetch_add(1, Ordering::Relaxed);
        unsafe { alloc::dealloc(raw as *mut u8, Self::layout(words)) };
        drop(heap);
    }

    #[cfg(feature = "leak-registry")]
    fn lock_registry(&self) -> parking_lot::MutexGuard<'_, HashSet<usize, ahash::RandomState>> {
        self.registry.lock()
    }

    /// Every registered allocation with RC>0. Diagnostics only.
    #[cfg(feature = "leak-registry")]
    pub fn leak_check(&self) -> Vec<LeakRecord> {
        let registry = self.lock_registry();
        let mut out: Vec<LeakRecord> = registry
            .iter()
            .filter_map(|&addr| {
                let handle = unsafe { AllocHandle::from_raw(addr as *mut AllocHeader) }?;
                let rc = handle.rc();
                (rc > 0).then(|| LeakRecord {
                    address: addr,
                    rc,
                    magic: handle.magic(),
                    tag: handle.tag(),
                })
            })
            .collect();
        out.sort_by_key(|r| r.address);
        out
    }

    #[cfg(not(feature = "leak-registry"))]
    pub fn leak_check(&self) -> Vec<LeakRecord> {
        Vec::new()
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            live: self.live.load(Ordering::Relaxed),
            allocated: self.allocated.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
        }
    }

    /// Bind `heap` as the current heap of this thread until the guard drops.
    pub fn enter(heap: &Arc<Heap>) -> HeapGuard {
        CURRENT.with(|c| c.borrow_mut().push(Arc::clone(heap)));
        HeapGuard {
            _not_send: PhantomData,
        }
    }

    /// Install the process-wide fallback heap. Returns false if one exists.
    pub fn install_global(heap: Arc<Heap>) -> bool {
        GLOBAL.set(heap).is_ok()
    }

    /// The heap bound to this thread, else the global heap.
    pub fn current() -> Option<Arc<Heap>> {
        CURRENT
            .with(|c| c.borrow().last().cloned())
            .or_else(|| GLOBAL.get().cloned())
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap").field("stats", &self.stats()).finish()
    }
}

pub struct HeapGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for HeapGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| {
            c.borrow_mut().pop();
        });
    }
}
