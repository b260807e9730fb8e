//! A scoped profiler for CPU time and memory.
//!
//! Code opens named scopes with [record_function] while a [ProfilerSession] is active
//! on the same thread. Each closed scope becomes a [ProfileEvent] carrying its total
//! and self time, and the bytes it allocated when the binary installs the
//! [TrackingAllocator]. A finished session aggregates its events by name in
//! [KeyAverages], printed as a table sorted by any [SortKey].

mod alloc;
mod error;
mod report;
mod session;

pub use alloc::{is_tracking, snapshot, AllocSnapshot, TrackingAllocator};
pub use error::ProfilerError;
pub use report::*;
pub use session::{
    record_function, record_function_with_shapes, Profiler, ProfilerConfig, ProfilerSession,
    RecordFunction,
};

#[cfg(test)]
#[global_allocator]
static GLOBAL: TrackingAllocator = TrackingAllocator::new();
