//! Live aggregation of one recorder's events.
//!
//! A view moves through three states:
//!
//! ```ignore
//!   Disconnected --connect--> Connecting --recorder found--> Connected
//!        ^                        |                              |
//!        +------ deadline --------+--- deadline / disconnect ----+
//! ```
//!
//! While connected, the recorder pushes every batch into the view (see
//! [`Recorder`]'s module docs for the lock order). Batches are aggregated
//! into a fresh tree; when a window of `Config::frames_per_window` frames
//! (and at least `Config::window_duration` seconds) is complete the fresh tree
//! is merged into the displayed one.

use crate::aggregate::{merge, TreeBuilder};
use crate::clock;
use crate::config::Config;
use crate::event::Event;
use crate::node::{NodeStats, Tree};
use crate::recorder::{LocalRecorder, Recorder};
use crate::registry::Registry;
use crate::stringtable::Name;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A copy of one displayed node, detached from the view's lock.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeSnapshot {
    pub name: Name,
    pub recursion_depth: u32,
    pub stats: NodeStats,
    pub expanded: bool,
    pub selected: bool,
    pub frames_since_seen: u32,
}

pub struct View {
    registry: Registry,
    config: Config,
    this: Weak<View>,
    state: Mutex<ViewState>,
}

struct ViewState {
    connection: ConnectionState,
    pattern: String,
    connection_name: String,
    is_externally_timed: bool,
    recorder: Weak<Recorder>,
    deadline: f64,
    frames_observed: u32,
    window_start: f64,
    builder: TreeBuilder,
    displayed: Tree,
    select_requests: Vec<String>,
}

impl View {
    /// Creates a disconnected view that resolves recorders in `registry`.
    pub fn new(registry: &Registry) -> Arc<View> {
        let config = registry.config().clone();

        Arc::new_cyclic(|this| View {
            registry: registry.clone(),
            this: this.clone(),
            state: Mutex::new(ViewState {
                connection: ConnectionState::Disconnected,
                pattern: String::new(),
                connection_name: String::new(),
                is_externally_timed: false,
                recorder: Weak::new(),
                deadline: 0.0,
                frames_observed: 0,
                window_start: 0.0,
                builder: TreeBuilder::new(config.max_tree_depth, config.node_pool_capacity),
                displayed: Tree::default(),
                select_requests: Vec::new(),
            }),
            config,
        })
    }

    /// Starts following the first recorder matching `pattern` (see
    /// [`Registry::find_recorder`]) for `timeout`.
    ///
    /// If no recorder matches yet, the view keeps retrying on every
    /// [`View::tick_frame`] until the timeout expires. Connecting to a
    /// different recorder than last time clears the displayed tree.
    pub fn connect(&self, pattern: &str, timeout: Duration) {
        debug_assert!(!pattern.is_empty(), "View::connect: empty pattern");
        if pattern.is_empty() {
            return;
        }

        self.detach();

        {
            let mut state = self.state.lock();
            state.pattern = pattern.to_owned();
            state.deadline = clock::now() + timeout.as_secs_f64();
            state.connection = ConnectionState::Connecting;
        }

        self.try_attach();
    }

    /// Stops following the recorder and forgets everything displayed.
    pub fn disconnect(&self) {
        self.detach();

        let mut state = self.state.lock();
        let state = &mut *state;

        state.builder.reset();
        state
            .builder
            .pool_mut()
            .release_all(&mut state.displayed.roots);
        state.pattern.clear();
        state.connection_name.clear();
        state.is_externally_timed = false;
        state.frames_observed = 0;
        state.select_requests.clear();
    }

    /// The once-per-frame signal.
    ///
    /// When the followed recorder belongs to the calling thread, the events
    /// it closed during the frame are flushed first, so every window holds
    /// exactly its frames. Other threads end their frames with
    /// [`Registry::end_frame`]. Must not be called from within
    /// [`Registry::try_with_local`].
    pub fn tick_frame(&self) {
        let (connection, expired, recorder) = {
            let state = self.state.lock();
            (
                state.connection,
                clock::now() > state.deadline,
                state.recorder.upgrade(),
            )
        };

        match connection {
            ConnectionState::Disconnected => {}
            ConnectionState::Connecting if expired => {
                debug!("view: no recorder matched before the deadline");
                self.state.lock().connection = ConnectionState::Disconnected;
            }
            ConnectionState::Connecting => {
                self.try_attach();
            }
            ConnectionState::Connected => {
                let recorder = match recorder {
                    Some(recorder) if !expired => recorder,
                    _ => {
                        self.expire();
                        return;
                    }
                };

                if !recorder.is_attached_to(self) {
                    self.evicted(&recorder);
                    return;
                }

                if recorder.is_auto_frame_incrementing() {
                    if recorder.thread_id() == Some(std::thread::current().id()) {
                        self.registry.try_with_local(LocalRecorder::flush_completed);
                    }

                    let mut state = self.state.lock();
                    if state.connection == ConnectionState::Connected {
                        state.frame_boundary(&self.config);
                    }
                }
            }
        }
    }

    /// Ends the current window right away, regardless of how many frames it
    /// has seen.
    pub fn publish(&self) {
        self.state.lock().publish(&self.config);
    }

    /// Called by the attached recorder, under its lock, for every batch.
    pub(crate) fn on_batch(&self, events: &[Event], completes_frame: bool) {
        let mut state = self.state.lock();

        if state.connection != ConnectionState::Connected || clock::now() > state.deadline {
            return;
        }

        state.builder.ingest(events);

        if completes_frame {
            state.frame_boundary(&self.config);
        }
    }

    /// Runs `f` on the displayed tree while holding the view's lock.
    ///
    /// `f` must not record on the thread of the recorder this view follows:
    /// a flush from inside `f` waits for the lock `f` is holding. Use
    /// [`View::snapshot`] to look at the tree while recording.
    pub fn read<R>(&self, f: impl FnOnce(&Tree) -> R) -> R {
        f(&self.state.lock().displayed)
    }

    /// A copy of the displayed tree.
    pub fn snapshot(&self) -> Tree {
        self.state.lock().displayed.clone()
    }

    /// Finds the first displayed node named `name`, depth first.
    pub fn find_node(&self, name: &str) -> Option<NodeSnapshot> {
        let state = self.state.lock();
        let node = state.displayed.find(name)?;

        Some(NodeSnapshot {
            name: node.name,
            recursion_depth: node.recursion_depth,
            stats: node.stats.clone(),
            expanded: node.expanded,
            selected: node.selected,
            frames_since_seen: node.frames_since_seen,
        })
    }

    /// Returns `false` if `path` does not name a displayed node.
    pub fn set_expanded(&self, path: &[&str], expanded: bool) -> bool {
        match self.state.lock().displayed.get_mut(path) {
            Some(node) => {
                node.expanded = expanded;
                true
            }
            None => false,
        }
    }

    /// Returns `false` if `path` does not name a displayed node.
    pub fn set_selected(&self, path: &[&str], selected: bool) -> bool {
        match self.state.lock().displayed.get_mut(path) {
            Some(node) => {
                node.selected = selected;
                true
            }
            None => false,
        }
    }

    /// Selects the first node named `name`, now if it is displayed or else
    /// as soon as a published window contains it.
    pub fn request_select(&self, name: &str) {
        let mut state = self.state.lock();

        match state.displayed.find_mut(name) {
            Some(node) => node.selected = true,
            None => state.select_requests.push(name.to_owned()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        let (connection, recorder) = {
            let state = self.state.lock();
            (state.connection, state.recorder.upgrade())
        };

        if connection != ConnectionState::Connected {
            return connection;
        }

        // Another view may have taken over the recorder.
        match recorder {
            Some(recorder) if recorder.is_attached_to(self) => ConnectionState::Connected,
            Some(recorder) => {
                self.evicted(&recorder);
                ConnectionState::Disconnected
            }
            None => ConnectionState::Disconnected,
        }
    }

    /// Name of the recorder this view follows (or followed last).
    pub fn connection_name(&self) -> String {
        self.state.lock().connection_name.clone()
    }

    pub fn is_externally_timed(&self) -> bool {
        self.state.lock().is_externally_timed
    }

    /// Frames counted in the current window.
    pub fn frames_observed(&self) -> u32 {
        self.state.lock().frames_observed
    }

    /// Released nodes available for reuse.
    pub fn pooled_nodes(&self) -> usize {
        self.state.lock().builder.pooled_nodes()
    }

    fn try_attach(&self) -> bool {
        let pattern = self.state.lock().pattern.clone();

        let recorder = match self.registry.find_recorder(&pattern) {
            Some(recorder) => recorder,
            None => return false,
        };

        // Attach before becoming connected, so that `state` never sees a
        // connected view that its recorder does not know yet.
        recorder.attach_view(self.this.clone());

        let connected = {
            let mut state = self.state.lock();

            // Raced with a disconnect or another connect.
            if state.connection != ConnectionState::Connecting || state.pattern != pattern {
                false
            } else {
                state.connect_to(&recorder);
                true
            }
        };

        if !connected {
            recorder.detach_view(self);
            return false;
        }

        debug!("view connected to `{}`", recorder.name());
        true
    }

    /// Another view took over `recorder`. Keeps the displayed tree.
    fn evicted(&self, recorder: &Arc<Recorder>) {
        let mut state = self.state.lock();

        if state.connection == ConnectionState::Connected
            && std::ptr::eq(state.recorder.as_ptr(), Arc::as_ptr(recorder))
        {
            debug!("view: another view took over `{}`", recorder.name());
            state.connection = ConnectionState::Disconnected;
            state.recorder = Weak::new();
            state.builder.reset();
            state.frames_observed = 0;
        }
    }

    /// Publishes what the current window has seen so far and detaches,
    /// keeping the displayed tree.
    fn expire(&self) {
        {
            let mut state = self.state.lock();
            if state.frames_observed > 0 || !state.builder.is_empty() {
                state.publish(&self.config);
            }
        }

        debug!("view: connection to `{}` expired", self.connection_name());
        self.detach();
    }

    fn detach(&self) {
        let recorder = {
            let mut state = self.state.lock();
            state.connection = ConnectionState::Disconnected;
            std::mem::take(&mut state.recorder).upgrade()
        };

        if let Some(recorder) = recorder {
            recorder.detach_view(self);
        }
    }
}

impl ViewState {
    fn connect_to(&mut self, recorder: &Arc<Recorder>) {
        if self.connection_name != recorder.name() {
            self.builder
                .pool_mut()
                .release_all(&mut self.displayed.roots);
            self.select_requests.clear();
            self.connection_name = recorder.name().to_owned();
        }

        self.builder.reset();
        self.is_externally_timed = recorder.is_externally_timed();
        self.recorder = Arc::downgrade(recorder);
        self.frames_observed = 0;
        self.window_start = clock::now();
        self.connection = ConnectionState::Connected;
    }

    fn frame_boundary(&mut self, config: &Config) {
        self.frames_observed += 1;

        if self.frames_observed >= config.frames_per_window
            && clock::now() - self.window_start >= config.window_duration
        {
            self.publish(config);
        }
    }

    fn publish(&mut self, config: &Config) {
        let fresh = self.builder.finish(self.frames_observed);

        merge(
            &mut self.displayed.roots,
            fresh.roots,
            self.builder.pool_mut(),
            config.keep_alive_frames,
        );

        let displayed = &mut self.displayed;
        self.select_requests
            .retain(|name| match displayed.find_mut(name) {
                Some(node) => {
                    node.selected = true;
                    false
                }
                None => true,
            });

        self.frames_observed = 0;
        self.window_start = clock::now();
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("View")
            .field("connection", &state.connection)
            .field("connection_name", &state.connection_name)
            .field("frames_observed", &state.frames_observed)
            .finish()
    }
}
