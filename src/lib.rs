//! # treealloc — a tree-backed general-purpose allocator
//!
//! Four layers, each in its own module:
//!
//! ```text
//!   treealloc
//!   ├── rbtree   - intrusive augmented red-black tree (ordered index)
//!   ├── block    - FreeBlockManager: dual-indexed free-block manager
//!   ├── wrapper  - byte-granular header wrapper over the block manager
//!   └── (here)   - TreeHeap: mmap/munmap façade, GlobalAlloc, C ABI
//! ```
//!
//! Memory comes from the OS via `mmap` in `MIN_BLOCK_ALLOC`-sized
//! chunks and is carved up by the free-block manager; large requests
//! that wouldn't fit comfortably in a fresh chunk get their own
//! dedicated mapping instead. A single [`std::sync::Mutex`] serializes
//! every operation — see `TreeHeap` below.
//!
//! ```rust,ignore
//! use std::alloc::Layout;
//! use treealloc::TreeHeap;
//!
//! #[global_allocator]
//! static ALLOC: TreeHeap = TreeHeap::new();
//!
//! fn main() {
//!     let layout = Layout::new::<u64>();
//!     let p = unsafe { std::alloc::alloc(layout) as *mut u64 };
//!     unsafe {
//!         *p = 42;
//!         std::alloc::dealloc(p as *mut u8, layout);
//!     }
//! }
//! ```

pub mod align;
mod block;
mod rbtree;
mod wrapper;

use block::FreeBlockManager;
use libc::{c_int, c_void};
use std::alloc::{GlobalAlloc, Layout};
use std::ptr;
use std::sync::Mutex;

/// Bytes requested from the OS per refill, matching the original's
/// `MIN_BLOCK_ALLOC` tunable.
const MIN_BLOCK_ALLOC: usize = 2 * 1024 * 1024;
const PAGE_SIZE: usize = 4096;

/// Block granularity: 64-byte blocks on a 64-bit machine, the same
/// `ARCH_BLOCK_BITS` the original derives from pointer width.
const DEFAULT_BLOCK_BITS: u32 = if cfg!(target_pointer_width = "64") { 6 } else { 5 };

/// Failure modes of the safe, typed allocation API. The C ABI and
/// `GlobalAlloc` surfaces never see this — they collapse every failure
/// to a null pointer, per convention.
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),
    #[error("requested size must be nonzero")]
    ZeroSize,
}

fn align_up(value: usize, multiple: usize) -> usize {
    let mask = multiple - 1;
    (value + mask) & !mask
}

fn map_pages(size: usize) -> Option<usize> {
    let mem = unsafe {
        libc::mmap(ptr::null_mut(), size, libc::PROT_READ | libc::PROT_WRITE, libc::MAP_PRIVATE | libc::MAP_ANONYMOUS, -1, 0)
    };
    if mem == libc::MAP_FAILED {
        log::error!("treealloc: mmap failed for {size} bytes");
        return None;
    }
    Some(mem as usize)
}

fn unmap_pages(start: usize, size: usize) {
    let rc = unsafe { libc::munmap(start as *mut c_void, size) };
    if rc != 0 {
        log::error!("treealloc: munmap failed for {size} bytes at {start:#x}");
    }
}

struct HeapState<const BLOCK_BITS: u32> {
    mgr: FreeBlockManager<BLOCK_BITS>,
}

impl<const BLOCK_BITS: u32> HeapState<BLOCK_BITS> {
    const fn new() -> Self {
        Self { mgr: FreeBlockManager::new() }
    }

    fn malloc(&mut self, size: usize) -> *mut u8 {
        if size == 0 {
            return ptr::null_mut();
        }
        if let Some(p) = wrapper::alloc(&mut self.mgr, size) {
            return p;
        }

        let align_size = align_up(size + wrapper::overhead(), PAGE_SIZE);
        if align_size < MIN_BLOCK_ALLOC {
            if let Some(pages) = map_pages(MIN_BLOCK_ALLOC) {
                log::trace!("treealloc: refilled {MIN_BLOCK_ALLOC} bytes from the OS");
                self.mgr.free(pages, MIN_BLOCK_ALLOC >> BLOCK_BITS);
            }
            wrapper::alloc(&mut self.mgr, size).unwrap_or(ptr::null_mut())
        } else {
            match map_pages(align_size) {
                Some(pages) => wrapper::write_aligned_header::<BLOCK_BITS>(pages, align_size, 1),
                None => ptr::null_mut(),
            }
        }
    }

    fn memalign(&mut self, alignment: usize, size: usize) -> *mut u8 {
        if size == 0 || alignment == 0 || (alignment & (alignment - 1)) != 0 {
            return ptr::null_mut();
        }
        if let Some(p) = wrapper::alloc_aligned(&mut self.mgr, alignment, size) {
            return p;
        }

        let align_size = align_up(size + wrapper::overhead() + (alignment - 1), PAGE_SIZE);
        if align_size < MIN_BLOCK_ALLOC {
            if let Some(pages) = map_pages(MIN_BLOCK_ALLOC) {
                self.mgr.free(pages, MIN_BLOCK_ALLOC >> BLOCK_BITS);
            }
            wrapper::alloc_aligned(&mut self.mgr, alignment, size).unwrap_or(ptr::null_mut())
        } else {
            match map_pages(align_size) {
                Some(pages) => wrapper::write_aligned_header::<BLOCK_BITS>(pages, align_size, alignment),
                None => ptr::null_mut(),
            }
        }
    }

    fn free(&mut self, mem: *mut u8) {
        if mem.is_null() {
            return;
        }
        wrapper::free(&mut self.mgr, mem);

        loop {
            let mut blocks = MIN_BLOCK_ALLOC >> BLOCK_BITS;
            match self.mgr.alloc_largest(PAGE_SIZE, &mut blocks) {
                Some(reclaim) => unmap_pages(reclaim, blocks << BLOCK_BITS),
                None => break,
            }
        }
    }

    fn realloc(&mut self, mem: *mut u8, size: usize) -> *mut u8 {
        if mem.is_null() {
            return self.malloc(size);
        }
        if size == 0 {
            self.free(mem);
            return ptr::null_mut();
        }

        if let Some(p) = wrapper::realloc(&mut self.mgr, mem, size) {
            return p;
        }

        let mut align_size = align_up(size + wrapper::overhead(), PAGE_SIZE);
        if align_size < MIN_BLOCK_ALLOC {
            align_size = MIN_BLOCK_ALLOC;
        }
        if let Some(pages) = map_pages(align_size) {
            self.mgr.free(pages, align_size >> BLOCK_BITS);
        }
        wrapper::realloc(&mut self.mgr, mem, size).unwrap_or(ptr::null_mut())
    }
}

/// A general-purpose heap backed by a [`FreeBlockManager`], gluing it
/// to the OS via `mmap`/`munmap` behind a single process-wide mutex.
///
/// `BLOCK_BITS` is the block granularity tunable — defaults to the
/// pointer-width-derived value the original used (64-byte blocks on a
/// 64-bit host).
pub struct TreeHeap<const BLOCK_BITS: u32 = DEFAULT_BLOCK_BITS> {
    state: Mutex<HeapState<BLOCK_BITS>>,
}

impl<const BLOCK_BITS: u32> TreeHeap<BLOCK_BITS> {
    pub const fn new() -> Self {
        Self { state: Mutex::new(HeapState::new()) }
    }

    /// Safe, typed allocation entry point.
    pub fn try_alloc(&self, size: usize) -> Result<*mut u8, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let p = state.malloc(size);
        if p.is_null() { Err(AllocError::OutOfMemory) } else { Ok(p) }
    }

    /// Safe, typed aligned allocation entry point.
    pub fn try_alloc_aligned(&self, alignment: usize, size: usize) -> Result<*mut u8, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        if alignment == 0 || (alignment & (alignment - 1)) != 0 {
            return Err(AllocError::InvalidAlignment(alignment));
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let p = state.memalign(alignment, size);
        if p.is_null() { Err(AllocError::OutOfMemory) } else { Ok(p) }
    }

    /// # Safety
    /// `ptr` must be null or a live, unfreed allocation from this heap.
    pub unsafe fn free(&self, ptr: *mut u8) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.free(ptr);
    }

    /// # Safety
    /// `ptr` must be null or a live, unfreed allocation from this heap.
    pub unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.realloc(ptr, size)
    }
}

impl<const BLOCK_BITS: u32> Default for TreeHeap<BLOCK_BITS> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<const BLOCK_BITS: u32> GlobalAlloc for TreeHeap<BLOCK_BITS> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size().max(1);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if layout.align() <= wrapper::overhead() {
            state.malloc(size)
        } else {
            state.memalign(layout.align(), size)
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.free(ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, _layout: Layout, new_size: usize) -> *mut u8 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.realloc(ptr, new_size)
    }
}

static GLOBAL_HEAP: TreeHeap = TreeHeap::new();

/// POSIX `malloc`.
///
/// # Safety
/// Standard libc contract: the returned pointer must be released with
/// [`free`] (or [`realloc`]) exactly once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    if size == 0 {
        return ptr::null_mut();
    }
    match GLOBAL_HEAP.try_alloc(size) {
        Ok(p) => p as *mut c_void,
        Err(_) => ptr::null_mut(),
    }
}

/// glibc-style `memalign`.
///
/// # Safety
/// Same contract as [`malloc`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memalign(alignment: usize, size: usize) -> *mut c_void {
    if size == 0 || alignment == 0 || (alignment & (alignment - 1)) != 0 {
        return ptr::null_mut();
    }
    match GLOBAL_HEAP.try_alloc_aligned(alignment, size) {
        Ok(p) => p as *mut c_void,
        Err(_) => ptr::null_mut(),
    }
}

/// POSIX `free`.
///
/// # Safety
/// `ptr` must be null or a pointer previously returned by [`malloc`],
/// [`memalign`], [`realloc`], or one of the shims below, not already
/// freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    unsafe { GLOBAL_HEAP.free(ptr as *mut u8) };
}

/// POSIX `realloc`.
///
/// # Safety
/// `ptr` must be null or a live allocation from this heap.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    unsafe { GLOBAL_HEAP.realloc(ptr as *mut u8, size) as *mut c_void }
}

/// `posix_memalign(3)`.
///
/// # Safety
/// `memptr` must point to a valid, writable `*mut c_void`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posix_memalign(memptr: *mut *mut c_void, alignment: usize, size: usize) -> c_int {
    if alignment % std::mem::size_of::<*mut c_void>() != 0 || alignment == 0 || (alignment & (alignment - 1)) != 0 {
        return libc::EINVAL;
    }
    if size == 0 {
        unsafe { *memptr = ptr::null_mut() };
        return 0;
    }
    match GLOBAL_HEAP.try_alloc_aligned(alignment, size) {
        Ok(p) => {
            unsafe { *memptr = p as *mut c_void };
            0
        }
        Err(_) => libc::ENOMEM,
    }
}

/// `calloc(3)`, zero-initializing the returned region. Overflow in
/// `nmemb * size` yields a null pointer rather than wrapping.
///
/// # Safety
/// Standard libc contract, same as [`malloc`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    let total = match nmemb.checked_mul(size) {
        Some(t) => t,
        None => return ptr::null_mut(),
    };
    if total == 0 {
        return ptr::null_mut();
    }
    match GLOBAL_HEAP.try_alloc(total) {
        Ok(p) => {
            unsafe { ptr::write_bytes(p, 0, total) };
            p as *mut c_void
        }
        Err(_) => ptr::null_mut(),
    }
}

/// `valloc(3)`: page-aligned allocation of `size` bytes.
///
/// # Safety
/// Standard libc contract, same as [`malloc`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn valloc(size: usize) -> *mut c_void {
    match GLOBAL_HEAP.try_alloc_aligned(PAGE_SIZE, size.max(1)) {
        Ok(p) => p as *mut c_void,
        Err(_) => ptr::null_mut(),
    }
}

/// `pvalloc(3)`: page-aligned allocation, size rounded up to a whole
/// number of pages.
///
/// # Safety
/// Standard libc contract, same as [`malloc`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pvalloc(size: usize) -> *mut c_void {
    let rounded = align_up(size.max(1), PAGE_SIZE);
    match GLOBAL_HEAP.try_alloc_aligned(PAGE_SIZE, rounded) {
        Ok(p) => p as *mut c_void,
        Err(_) => ptr::null_mut(),
    }
}

/// `aligned_alloc(3)`: `size` must be a multiple of `alignment`.
///
/// # Safety
/// Standard libc contract, same as [`malloc`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
    if alignment == 0 || (alignment & (alignment - 1)) != 0 || size % alignment != 0 {
        return ptr::null_mut();
    }
    match GLOBAL_HEAP.try_alloc_aligned(alignment, size) {
        Ok(p) => p as *mut c_void,
        Err(_) => ptr::null_mut(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_free_pair_reclaims_to_a_single_chunk() {
        let heap: TreeHeap = TreeHeap::new();
        let a = heap.try_alloc(128).unwrap();
        let b = heap.try_alloc(256).unwrap();
        assert_ne!(a, b);
        unsafe {
            heap.free(a);
            heap.free(b);
        }
    }

    #[test]
    fn realloc_grows_and_copies_when_necessary() {
        let heap: TreeHeap = TreeHeap::new();
        let p = heap.try_alloc(32).unwrap();
        unsafe {
            ptr::write_bytes(p, 7, 32);
            let grown = heap.realloc(p, 4096);
            assert!(!grown.is_null());
            let bytes = std::slice::from_raw_parts(grown, 32);
            assert!(bytes.iter().all(|&b| b == 7));
            heap.free(grown);
        }
    }

    #[test]
    fn posix_memalign_round_trips() {
        unsafe {
            let mut out: *mut c_void = ptr::null_mut();
            let rc = posix_memalign(&mut out, 64, 100);
            assert_eq!(rc, 0);
            assert!(!out.is_null());
            assert_eq!((out as usize) % 64, 0);
            free(out);
        }
    }

    #[test]
    fn calloc_overflow_returns_null() {
        unsafe {
            let p = calloc(usize::MAX, 2);
            assert!(p.is_null());
        }
    }

    #[test]
    fn calloc_zeroes_memory() {
        unsafe {
            let p = calloc(16, 8) as *mut u8;
            assert!(!p.is_null());
            let bytes = std::slice::from_raw_parts(p, 128);
            assert!(bytes.iter().all(|&b| b == 0));
            free(p as *mut c_void);
        }
    }

    #[test]
    fn concurrent_malloc_free_loop_stays_consistent() {
        use std::sync::Arc;
        use std::thread;

        let heap = Arc::new(TreeHeap::<6>::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let heap = Arc::clone(&heap);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let p = heap.try_alloc(64).unwrap();
                    unsafe {
                        heap.free(p);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
