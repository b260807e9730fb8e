use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};

static ALLOCATED: AtomicU64 = AtomicU64::new(0);
static FREED: AtomicU64 = AtomicU64::new(0);

/// A global allocator forwarding to [System] while counting the bytes it hands out
/// and takes back.
///
/// Memory columns of a profile are only meaningful when the binary installs it:
///
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: cinder_profiler::TrackingAllocator = cinder_profiler::TrackingAllocator::new();
/// ```
#[derive(Debug, Default)]
pub struct TrackingAllocator;

impl TrackingAllocator {
    pub const fn new() -> Self {
        Self
    }
}

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            ALLOCATED.fetch_add(layout.size() as u64, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            ALLOCATED.fetch_add(layout.size() as u64, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        FREED.fetch_add(layout.size() as u64, Ordering::Relaxed);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            FREED.fetch_add(layout.size() as u64, Ordering::Relaxed);
            ALLOCATED.fetch_add(new_size as u64, Ordering::Relaxed);
        }
        new_ptr
    }
}

/// Process-wide allocation counters at one point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocSnapshot {
    pub allocated: u64,
    pub freed: u64,
}

impl AllocSnapshot {
    /// Bytes allocated minus bytes freed between `earlier` and this snapshot.
    pub fn net_since(&self, earlier: &AllocSnapshot) -> i64 {
        let allocated = self.allocated.wrapping_sub(earlier.allocated) as i64;
        let freed = self.freed.wrapping_sub(earlier.freed) as i64;
        allocated - freed
    }
}

pub fn snapshot() -> AllocSnapshot {
    AllocSnapshot {
        allocated: ALLOCATED.load(Ordering::Relaxed),
        freed: FREED.load(Ordering::Relaxed),
    }
}

/// Whether any allocation went through a [TrackingAllocator] in this process.
pub fn is_tracking() -> bool {
    ALLOCATED.load(Ordering::Relaxed) > 0
}
