//! Low-overhead scoped timing with live call-tree aggregation.
//!
//! # Recording
//!
//! Any thread can record nested scopes:
//!
//! ```
//! fn update() {
//!     let _scope = framescope::scope!("update");
//!     // ...
//! }
//! ```
//!
//! Each thread records into its own [`LocalRecorder`], without taking any
//! lock. Closed scopes are periodically flushed into the thread's
//! [`Recorder`], which keeps the last [`Config::retention`] seconds of
//! events in a [`TimelineBuffer`].
//!
//! Recorders are discovered through a [`Registry`]; [`Registry::global()`]
//! is the one used by [`scope!`], [`begin_scope`] and [`end_scope`].
//!
//! # Viewing
//!
//! A [`View`] attaches to one recorder and receives every flushed batch as it
//! happens. It aggregates the batches into a call tree of [`Node`]s, and once
//! per accounting window merges that tree into the tree it displays, so
//! that viewer state such as expanded or selected nodes survives while the
//! numbers refresh.
//!
//! # Exporting
//!
//! [`export`] writes the retained events of all recorders in the Chrome
//! trace format, and reads such files back for offline [`analysis`].

#[macro_use]
extern crate log;

/// `warn!` that fires at most once per second for each call site.
macro_rules! warn_rate_limited {
    ($($arg:tt)*) => {{
        static LAST_WARNING: ::std::sync::atomic::AtomicU64 =
            ::std::sync::atomic::AtomicU64::new(0);
        if $crate::should_warn(&LAST_WARNING) {
            warn!($($arg)*);
        }
    }};
}

mod aggregate;
mod config;
mod event;
mod node;
mod recorder;
mod registry;
mod stringtable;
mod timeline;
mod view;

pub mod analysis;
pub mod clock;
pub mod export;
pub mod testing_common;

pub use crate::aggregate::{aggregate_events, TreeBuilder};
pub use crate::config::Config;
pub use crate::event::Event;
pub use crate::node::{Node, NodeStats, Tree};
pub use crate::recorder::{LocalRecorder, Recorder, ScopeGuard, StaticScope};
pub use crate::registry::{
    begin_scope, end_frame, end_scope, flush, local_recorder, with_local_recorder, Registry,
};
pub use crate::stringtable::{Name, NameTable};
pub use crate::timeline::TimelineBuffer;
pub use crate::view::{ConnectionState, NodeSnapshot, View};

/// Opens a scope named by a string literal on the current thread and returns
/// the guard that closes it.
///
/// Every expansion site owns a counter per thread, so repeated executions of
/// the same scope on one thread get the sub-ids 0, 1, 2, ...
#[macro_export]
macro_rules! scope {
    ($name:literal) => {{
        static SCOPE: $crate::StaticScope = $crate::StaticScope::new($name);
        ::std::thread_local! {
            static NEXT_SUB_ID: ::std::cell::Cell<u32> = const { ::std::cell::Cell::new(0) };
        }
        SCOPE.enter(&NEXT_SUB_ID)
    }};
}

pub(crate) fn should_warn(last_warning_ms: &std::sync::atomic::AtomicU64) -> bool {
    use std::sync::atomic::Ordering;

    // Offset by one so that a warning at time zero still counts as "sent".
    let now_ms = (clock::now() * 1000.0) as u64 + 1;
    let last = last_warning_ms.load(Ordering::Relaxed);

    if last != 0 && now_ms.saturating_sub(last) < 1000 {
        return false;
    }

    last_warning_ms
        .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
}

// Make sure that the shared halves can be used from any thread.
fn _assert_bounds() {
    fn assert_bounds_inner<S: Send + Sync + 'static>() {}
    assert_bounds_inner::<Recorder>();
    assert_bounds_inner::<Registry>();
    assert_bounds_inner::<View>();
}
