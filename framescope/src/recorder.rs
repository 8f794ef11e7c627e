//! Recording nested scopes.
//!
//! A recorder is split into two halves:
//!
//!   * [`LocalRecorder`] is owned by exactly one producer (usually a thread,
//!     through the thread-local slot managed by the [`Registry`]). It holds
//!     the open-scope stack and a log of events that have not been flushed
//!     yet. Beginning and ending scopes only ever touches this half, so it
//!     needs no synchronization.
//!   * [`Recorder`] is shared through an `Arc`. It owns the
//!     [`TimelineBuffer`] and the (weak) link to an attached [`View`], both
//!     behind one mutex. Flushing, capturing and attaching views go through
//!     this half.
//!
//! While a view is attached, every flushed batch is handed to it while the
//! recorder's lock is held. The view takes its own lock inside that call, so
//! the lock order is always "recorder, then view"; views never call back into
//! a recorder while holding their own lock.
//!
//! [`Registry`]: crate::Registry

use crate::clock;
use crate::config::Config;
use crate::event::Event;
use crate::stringtable::{Name, NameTable};
use crate::timeline::TimelineBuffer;
use crate::view::View;
use parking_lot::Mutex;
use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::thread::{LocalKey, ThreadId};

/// The shared half of a recorder.
pub struct Recorder {
    name: String,
    thread_id: Option<ThreadId>,
    is_auto_frame_incrementing: bool,
    is_externally_timed: bool,
    config: Config,
    shared: Mutex<Shared>,
}

struct Shared {
    timeline: TimelineBuffer,
    attached_view: Weak<View>,
}

impl Recorder {
    pub(crate) fn new(
        name: String,
        thread_id: Option<ThreadId>,
        is_auto_frame_incrementing: bool,
        is_externally_timed: bool,
        config: Config,
    ) -> Recorder {
        Recorder {
            name,
            thread_id,
            is_auto_frame_incrementing,
            is_externally_timed,
            config,
            shared: Mutex::new(Shared {
                timeline: TimelineBuffer::new(),
                attached_view: Weak::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The thread this recorder belongs to, `None` for virtual recorders.
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread_id
    }

    pub fn is_virtual(&self) -> bool {
        self.thread_id.is_none()
    }

    /// Whether attached views count a frame on every [`View::tick_frame`].
    /// Recorders that are not auto-incrementing count a frame per
    /// [`Recorder::batch_add`] instead.
    pub fn is_auto_frame_incrementing(&self) -> bool {
        self.is_auto_frame_incrementing
    }

    /// Whether the events of this recorder were timed by something other
    /// than the CPU clock, e.g. GPU timestamp queries.
    pub fn is_externally_timed(&self) -> bool {
        self.is_externally_timed
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Appends a batch of already-closed events and counts it as one
    /// completed accounting frame for an attached view.
    ///
    /// This is how externally produced timings (GPU queries, replayed traces)
    /// enter the system. Events must be in begin order with parents before
    /// their children.
    pub fn batch_add(&self, events: &[Event]) {
        debug_assert!(
            events.iter().all(|e| e.end >= e.begin),
            "batch_add: events must be closed"
        );

        self.submit(events, true);
    }

    /// Common path for thread flushes and external batches.
    pub(crate) fn submit(&self, events: &[Event], completes_frame: bool) {
        let mut shared = self.shared.lock();

        if let Some(view) = shared.attached_view.upgrade() {
            view.on_batch(events, completes_frame);
        }

        shared.timeline.append(events);
        shared
            .timeline
            .defragment(clock::now() - self.config.retention);

        let dropped = shared
            .timeline
            .enforce_capacity(self.config.max_buffered_events);

        if dropped > 0 {
            warn_rate_limited!(
                "recorder `{}` exceeded {} buffered events, dropped the {} oldest",
                self.name,
                self.config.max_buffered_events,
                dropped
            );
        }
    }

    /// Copies every retained event into `out`, oldest first.
    pub fn capture_into(&self, out: &mut Vec<Event>) {
        self.shared.lock().timeline.capture(out);
    }

    pub fn capture(&self) -> Vec<Event> {
        let mut events = Vec::new();
        self.capture_into(&mut events);
        events
    }

    /// Copies the retained events that began at or after `since`.
    pub fn capture_since(&self, since: f64) -> Vec<Event> {
        let mut events = self.capture();
        events.retain(|e| e.begin >= since);
        events
    }

    /// Number of retained events.
    pub fn buffered_events(&self) -> usize {
        self.shared.lock().timeline.len()
    }

    pub fn clear(&self) {
        self.shared.lock().timeline.clear();
    }

    pub fn has_attached_view(&self) -> bool {
        self.shared.lock().attached_view.strong_count() > 0
    }

    pub(crate) fn is_attached_to(&self, view: &View) -> bool {
        std::ptr::eq(self.shared.lock().attached_view.as_ptr(), view)
    }

    /// Attaches `view`, replacing any view that was attached before.
    pub(crate) fn attach_view(&self, view: Weak<View>) {
        let mut shared = self.shared.lock();

        if shared.attached_view.strong_count() > 0 && !shared.attached_view.ptr_eq(&view) {
            debug!("recorder `{}`: replacing attached view", self.name);
        }

        shared.attached_view = view;
    }

    /// Detaches `view` if it is the one currently attached.
    pub(crate) fn detach_view(&self, view: &View) {
        let mut shared = self.shared.lock();

        if std::ptr::eq(shared.attached_view.as_ptr(), view) {
            shared.attached_view = Weak::new();
        }
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("name", &self.name)
            .field("thread_id", &self.thread_id)
            .field("is_auto_frame_incrementing", &self.is_auto_frame_incrementing)
            .field("is_externally_timed", &self.is_externally_timed)
            .finish()
    }
}

/// The producer-owned half of a recorder.
pub struct LocalRecorder {
    recorder: Arc<Recorder>,
    names: NameTable,
    log: Vec<Event>,
    // Indices into `log` of the scopes that are still open, innermost last.
    open_scopes: Vec<usize>,
}

impl LocalRecorder {
    pub fn new(recorder: Arc<Recorder>) -> LocalRecorder {
        LocalRecorder {
            recorder,
            names: NameTable::new(),
            log: Vec::new(),
            open_scopes: Vec::new(),
        }
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    /// Interns `name` in this recorder's table.
    #[inline]
    pub fn map_name(&mut self, name: &str) -> Name {
        self.names.map(name)
    }

    #[inline]
    pub fn begin_scope(&mut self, name: Name, sub_id: u32) {
        let depth = self.open_scopes.len() as u32;
        self.open_scopes.push(self.log.len());
        self.log.push(Event::open(name, depth, sub_id, clock::now()));
    }

    /// Closes the innermost open scope.
    ///
    /// If `expected` is given it must name that scope; debug builds assert
    /// on a mismatch. Ending a scope when none is open is a protocol
    /// violation: debug builds panic, release builds ignore the call.
    pub fn end_scope(&mut self, expected: Option<Name>) {
        let index = match self.open_scopes.pop() {
            Some(index) => index,
            None => {
                debug_assert!(false, "end_scope called without an open scope");
                return;
            }
        };

        let event = &mut self.log[index];

        debug_assert!(
            expected.map_or(true, |name| name == event.name),
            "end_scope: expected `{}`, innermost open scope is `{}`",
            expected.map_or("", Name::as_str),
            event.name
        );

        event.end = clock::now();

        if self.open_scopes.is_empty() && self.log.len() >= self.recorder.config.flush_threshold {
            self.flush();
        }
    }

    /// Hands every closed event to the shared half.
    ///
    /// Only valid while no scope is open.
    pub fn flush(&mut self) {
        debug_assert!(
            self.open_scopes.is_empty(),
            "flush called with {} open scope(s)",
            self.open_scopes.len()
        );

        if !self.open_scopes.is_empty() || self.log.is_empty() {
            return;
        }

        self.recorder.submit(&self.log, false);
        self.log.clear();
    }

    /// Hands the events logged before the outermost open scope to the
    /// shared half. Unlike [`LocalRecorder::flush`] this may be called with
    /// scopes open, e.g. at a frame boundary inside a long-running scope.
    pub fn flush_completed(&mut self) {
        let complete = self.open_scopes.first().copied().unwrap_or(self.log.len());

        if complete == 0 {
            return;
        }

        self.recorder.submit(&self.log[..complete], false);
        self.log.drain(..complete);

        for index in &mut self.open_scopes {
            *index -= complete;
        }
    }

    /// Forwards externally timed events, see [`Recorder::batch_add`].
    /// Only valid while no scope is open.
    pub fn batch_add(&mut self, events: &[Event]) {
        debug_assert!(
            self.open_scopes.is_empty(),
            "batch_add called with {} open scope(s)",
            self.open_scopes.len()
        );

        if !self.open_scopes.is_empty() {
            return;
        }

        self.recorder.batch_add(events);
    }

    pub fn open_depth(&self) -> usize {
        self.open_scopes.len()
    }

    /// Number of events recorded locally and not flushed yet.
    pub fn pending_events(&self) -> usize {
        self.log.len()
    }
}

impl Drop for LocalRecorder {
    fn drop(&mut self) {
        self.flush_completed();
    }
}

/// Closes a scope on the current thread when dropped.
///
/// The guard must be dropped on the thread that created it, so it is
/// neither `Send` nor `Sync`.
#[must_use = "the scope is closed as soon as the guard is dropped"]
pub struct ScopeGuard {
    name: Name,
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    /// Opens `name` on the current thread's recorder in the global registry.
    #[inline]
    pub fn new(name: Name, sub_id: u32) -> ScopeGuard {
        crate::registry::begin_scope(name, sub_id);
        ScopeGuard {
            name,
            _not_send: PhantomData,
        }
    }

    /// Like [`ScopeGuard::new`], for names only known at runtime.
    pub fn named(name: &str, sub_id: u32) -> ScopeGuard {
        let name = crate::registry::with_local_recorder(|local| {
            let name = local.map_name(name);
            local.begin_scope(name, sub_id);
            name
        });

        ScopeGuard {
            name,
            _not_send: PhantomData,
        }
    }

    pub fn name(&self) -> Name {
        self.name
    }
}

impl Drop for ScopeGuard {
    #[inline]
    fn drop(&mut self) {
        crate::registry::end_scope(Some(self.name));
    }
}

/// Backing storage of a [`scope!`](crate::scope!) expansion site.
pub struct StaticScope {
    name: Name,
}

impl StaticScope {
    pub const fn new(name: &'static str) -> StaticScope {
        StaticScope {
            name: Name::from_static(name),
        }
    }

    /// Opens the scope with the next sub-id from `next_sub_id`, the
    /// site's per-thread counter.
    #[inline]
    pub fn enter(&'static self, next_sub_id: &'static LocalKey<Cell<u32>>) -> ScopeGuard {
        let sub_id = next_sub_id
            .try_with(|next| {
                let sub_id = next.get();
                next.set(sub_id.wrapping_add(1));
                sub_id
            })
            .unwrap_or(0);

        ScopeGuard::new(self.name, sub_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn virtual_recorder(config: Config) -> Arc<Recorder> {
        Arc::new(Recorder::new("test".into(), None, false, false, config))
    }

    #[test]
    fn nested_scopes_get_depths() {
        let recorder = virtual_recorder(Config::default());
        let mut local = LocalRecorder::new(recorder.clone());

        let a = local.map_name("a");
        let b = local.map_name("b");

        local.begin_scope(a, 0);
        local.begin_scope(b, 0);
        local.end_scope(Some(b));
        local.begin_scope(b, 1);
        local.end_scope(Some(b));
        local.end_scope(Some(a));
        local.flush();

        let events = recorder.capture();
        let summary: Vec<_> = events
            .iter()
            .map(|e| (e.name.as_str(), e.depth, e.sub_id))
            .collect();

        assert_eq!(summary, vec![("a", 0, 0), ("b", 1, 0), ("b", 1, 1)]);
        assert!(events[0].contains(&events[1]));
        assert!(events[0].contains(&events[2]));
        assert_eq!(local.pending_events(), 0);
    }

    #[test]
    fn flushes_once_threshold_is_reached() {
        let config = Config {
            flush_threshold: 3,
            ..Config::default()
        };
        let recorder = virtual_recorder(config);
        let mut local = LocalRecorder::new(recorder.clone());
        let name = Name::from_static("tick");

        for i in 0..2 {
            local.begin_scope(name, i);
            local.end_scope(None);
        }
        assert_eq!(recorder.buffered_events(), 0);

        local.begin_scope(name, 2);
        local.end_scope(None);
        assert_eq!(recorder.buffered_events(), 3);
        assert_eq!(local.pending_events(), 0);
    }

    #[test]
    fn nothing_is_flushed_while_a_scope_is_open() {
        let config = Config {
            flush_threshold: 1,
            ..Config::default()
        };
        let recorder = virtual_recorder(config);
        let mut local = LocalRecorder::new(recorder.clone());
        let outer = Name::from_static("outer");
        let inner = Name::from_static("inner");

        local.begin_scope(outer, 0);
        local.begin_scope(inner, 0);
        local.end_scope(Some(inner));
        assert_eq!(recorder.buffered_events(), 0);

        local.end_scope(Some(outer));
        assert_eq!(recorder.buffered_events(), 2);
    }

    #[test]
    fn dropping_flushes_completed_events() {
        let recorder = virtual_recorder(Config::default());
        let mut local = LocalRecorder::new(recorder.clone());

        local.begin_scope(Name::from_static("done"), 0);
        local.end_scope(None);
        local.begin_scope(Name::from_static("still open"), 0);
        drop(local);

        let events = recorder.capture();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "done");
    }

    #[test]
    fn flush_completed_keeps_open_scopes() {
        let recorder = virtual_recorder(Config::default());
        let mut local = LocalRecorder::new(recorder.clone());
        let done = Name::from_static("done");
        let open = Name::from_static("open");
        let inner = Name::from_static("inner");

        local.begin_scope(done, 0);
        local.end_scope(Some(done));
        local.begin_scope(open, 0);
        local.begin_scope(inner, 0);
        local.end_scope(Some(inner));

        local.flush_completed();
        assert_eq!(recorder.buffered_events(), 1);
        assert_eq!(local.pending_events(), 2);
        assert_eq!(local.open_depth(), 1);

        // Nothing more is complete yet.
        local.flush_completed();
        assert_eq!(recorder.buffered_events(), 1);

        local.end_scope(Some(open));
        local.flush_completed();

        let events = recorder.capture();
        let names: Vec<_> = events.iter().map(|e| (e.name.as_str(), e.depth)).collect();
        assert_eq!(names, vec![("done", 0), ("open", 0), ("inner", 1)]);
        assert!(events[1].contains(&events[2]));
        assert_eq!(local.pending_events(), 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "without an open scope")]
    fn unbalanced_end_panics_in_debug() {
        let mut local = LocalRecorder::new(virtual_recorder(Config::default()));
        local.end_scope(None);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "expected `b`")]
    fn mismatched_end_panics_in_debug() {
        let mut local = LocalRecorder::new(virtual_recorder(Config::default()));
        local.begin_scope(Name::from_static("a"), 0);
        local.end_scope(Some(Name::from_static("b")));
    }

    #[test]
    fn capacity_is_enforced_on_submit() {
        let config = Config {
            max_buffered_events: 4,
            retention: 1e9,
            ..Config::default()
        };
        let recorder = virtual_recorder(config);
        let now = clock::now();
        let batch: Vec<Event> = (0..10)
            .map(|i| Event::closed(Name::from_static("e"), 0, i, now, now))
            .collect();

        recorder.batch_add(&batch);
        assert!(recorder.buffered_events() <= 4);

        let kept: Vec<u32> = recorder.capture().iter().map(|e| e.sub_id).collect();
        assert_eq!(kept, vec![6, 7, 8, 9]);
    }

    #[test]
    fn capture_since_filters_by_begin() {
        let recorder = virtual_recorder(Config {
            retention: 1e9,
            ..Config::default()
        });
        let now = clock::now();
        let name = Name::from_static("e");

        recorder.batch_add(&[
            Event::closed(name, 0, 0, now, now + 0.1),
            Event::closed(name, 0, 1, now + 1.0, now + 1.1),
        ]);

        let recent = recorder.capture_since(now + 0.5);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].sub_id, 1);
        assert_eq!(recorder.buffered_events(), 2);
    }
}
