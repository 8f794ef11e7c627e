//! Discovery of recorders.
//!
//! A [`Registry`] hands out one recorder per thread (created lazily on the
//! thread's first scope) plus any number of virtual recorders, and lets
//! views and exporters enumerate them. It only holds weak references: a
//! recorder lives as long as its owning thread, or as long as the caller of
//! [`Registry::create_virtual_recorder`] keeps it.

use crate::config::Config;
use crate::recorder::{LocalRecorder, Recorder};
use crate::stringtable::Name;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::ThreadId;

/// A cheaply cloneable handle to a set of recorders.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    id: u64,
    config: Config,
    state: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    recorders: Vec<Weak<Recorder>>,
    main_recorder: Weak<Recorder>,
    main_thread: Option<ThreadId>,
}

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(0);
static GLOBAL: OnceLock<Registry> = OnceLock::new();

thread_local! {
    // Almost every thread only ever records into the global registry.
    static LOCAL_RECORDERS: RefCell<SmallVec<[(Weak<RegistryInner>, LocalRecorder); 1]>> =
        RefCell::new(SmallVec::new());
}

impl Registry {
    pub fn new(config: Config) -> Registry {
        Registry {
            inner: Arc::new(RegistryInner {
                id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
                config,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    /// The process-wide registry used by [`scope!`](crate::scope!) and the
    /// free functions of this crate. Created with the default configuration
    /// on first use unless [`Registry::init_global`] ran before.
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(|| Registry::new(Config::default()))
    }

    /// Sets the configuration of the global registry.
    ///
    /// Must run before anything records into the global registry; returns
    /// `false` (and changes nothing) if the global registry already exists.
    pub fn init_global(config: Config) -> bool {
        let mut initialized = false;

        GLOBAL.get_or_init(|| {
            initialized = true;
            Registry::new(config)
        });

        if !initialized {
            warn!("Registry::init_global: the global registry was already initialized");
        }

        initialized
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Runs `f` with the current thread's local recorder for this registry,
    /// creating and registering it on first use.
    ///
    /// Re-entrant calls (from within `f`) and calls during thread teardown
    /// are protocol violations: debug builds panic, release builds skip `f`
    /// and return `None`.
    pub fn try_with_local<R>(&self, f: impl FnOnce(&mut LocalRecorder) -> R) -> Option<R> {
        let result = LOCAL_RECORDERS.try_with(|cell| {
            let mut locals = match cell.try_borrow_mut() {
                Ok(locals) => locals,
                Err(_) => {
                    debug_assert!(false, "re-entrant use of the thread's local recorder");
                    return None;
                }
            };

            // Recorders of dropped registries flush and go away with their
            // entry.
            if locals.len() > 1 {
                locals.retain(|(registry, _)| registry.strong_count() > 0);
            }

            let this = Arc::as_ptr(&self.inner);
            let index = match locals.iter().position(|(registry, _)| registry.as_ptr() == this) {
                Some(index) => index,
                None => {
                    locals.retain(|(registry, _)| registry.strong_count() > 0);

                    let local = LocalRecorder::new(self.register_current_thread());
                    locals.push((Arc::downgrade(&self.inner), local));
                    locals.len() - 1
                }
            };

            Some(f(&mut locals[index].1))
        });

        result.ok().flatten()
    }

    /// The current thread's recorder for this registry.
    pub fn local_recorder(&self) -> Option<Arc<Recorder>> {
        self.try_with_local(|local| local.recorder().clone())
    }

    fn register_current_thread(&self) -> Arc<Recorder> {
        let thread = std::thread::current();
        let name = match thread.name() {
            Some(name) => name.to_owned(),
            None => format!("{:?}", thread.id()),
        };

        let recorder = Arc::new(Recorder::new(
            name,
            Some(thread.id()),
            true,
            false,
            self.inner.config.clone(),
        ));

        let mut state = self.inner.state.lock();
        state.recorders.retain(|r| r.strong_count() > 0);
        state.recorders.push(Arc::downgrade(&recorder));

        let is_main = match state.main_thread {
            Some(id) => id == thread.id(),
            None => thread.name() == Some("main"),
        };
        if is_main {
            state.main_recorder = Arc::downgrade(&recorder);
        }

        debug!("registered recorder `{}`", recorder.name());
        recorder
    }

    /// Creates a recorder that is not bound to any thread.
    ///
    /// Virtual recorders are fed through [`Recorder::batch_add`] (or a
    /// [`LocalRecorder`] owned by the caller), and every batch counts as one
    /// accounting frame. The registry only holds a weak reference, so the
    /// recorder disappears once the returned `Arc` and all its clones are
    /// dropped.
    pub fn create_virtual_recorder(&self, name: &str, is_externally_timed: bool) -> Arc<Recorder> {
        let recorder = Arc::new(Recorder::new(
            name.to_owned(),
            None,
            false,
            is_externally_timed,
            self.inner.config.clone(),
        ));

        let mut state = self.inner.state.lock();
        state.recorders.retain(|r| r.strong_count() > 0);
        state.recorders.push(Arc::downgrade(&recorder));

        debug!("registered virtual recorder `{}`", name);
        recorder
    }

    /// All live recorders, in registration order.
    pub fn live_recorders(&self) -> Vec<Arc<Recorder>> {
        let mut state = self.inner.state.lock();
        state.recorders.retain(|r| r.strong_count() > 0);
        state.recorders.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn list_recorder_names(&self) -> Vec<String> {
        self.live_recorders()
            .iter()
            .map(|r| r.name().to_owned())
            .collect()
    }

    /// Finds the first live recorder whose name matches `pattern`.
    ///
    /// A pattern ending in `*` matches every name starting with the rest of
    /// the pattern; any other pattern must match the name exactly.
    pub fn find_recorder(&self, pattern: &str) -> Option<Arc<Recorder>> {
        self.live_recorders()
            .into_iter()
            .find(|r| name_matches(pattern, r.name()))
    }

    /// The recorder of the main thread, once that thread has recorded.
    pub fn main_recorder(&self) -> Option<Arc<Recorder>> {
        self.inner.state.lock().main_recorder.upgrade()
    }

    /// Declares the calling thread to be the main thread and registers its
    /// recorder right away.
    ///
    /// Without this call the thread named `main` is assumed to be the main
    /// thread.
    pub fn mark_main_thread(&self) {
        let id = std::thread::current().id();
        self.inner.state.lock().main_thread = Some(id);

        if let Some(recorder) = self.local_recorder() {
            self.inner.state.lock().main_recorder = Arc::downgrade(&recorder);
        }
    }

    /// Ends a frame on the calling thread: every event closed so far is
    /// handed to the thread's recorder, so a view following it from another
    /// thread sees the whole frame. Scopes that are still open stay local.
    pub fn end_frame(&self) {
        self.try_with_local(LocalRecorder::flush_completed);
    }

    /// Forgets every registered recorder and the main-thread designation.
    ///
    /// Recorders themselves stay alive as long as they are referenced, and
    /// threads keep using the recorder they already have.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.recorders.clear();
        state.main_recorder = Weak::new();
        state.main_thread = None;
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("id", &self.inner.id)
            .field("recorders", &self.list_recorder_names())
            .finish()
    }
}

pub(crate) fn name_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    }
}

/// Runs `f` with the current thread's local recorder of the global registry.
///
/// # Panics
///
/// Panics if called from within `f` itself or while the thread is being
/// torn down.
pub fn with_local_recorder<R>(f: impl FnOnce(&mut LocalRecorder) -> R) -> R {
    match Registry::global().try_with_local(f) {
        Some(result) => result,
        None => panic!("the thread's local recorder is unavailable"),
    }
}

/// The current thread's recorder in the global registry.
pub fn local_recorder() -> Arc<Recorder> {
    with_local_recorder(|local| local.recorder().clone())
}

/// Opens a scope on the current thread's recorder in the global registry.
#[inline]
pub fn begin_scope(name: Name, sub_id: u32) {
    Registry::global().try_with_local(|local| local.begin_scope(name, sub_id));
}

/// Closes the innermost scope opened by [`begin_scope`] on this thread.
#[inline]
pub fn end_scope(expected: Option<Name>) {
    Registry::global().try_with_local(|local| local.end_scope(expected));
}

/// Flushes the current thread's closed events in the global registry.
pub fn flush() {
    Registry::global().try_with_local(LocalRecorder::flush);
}

/// [`Registry::end_frame`] on the global registry.
pub fn end_frame() {
    Registry::global().end_frame();
}
