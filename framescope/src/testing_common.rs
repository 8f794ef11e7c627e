//! Helpers for tests and benchmarks.

use crate::event::Event;
use crate::recorder::LocalRecorder;
use crate::stringtable::Name;

/// A `TimelineBuilder` allows for programmatically building event sequences
/// with predictable timestamps, in the order a recorder would produce them:
/// every parent before its children.
///
/// Times are in seconds, relative to the origin given to
/// [`TimelineBuilder::starting_at`] (zero by default).
#[derive(Debug, Default)]
pub struct TimelineBuilder {
    events: Vec<Event>,
    depth: u32,
    origin: f64,
}

impl TimelineBuilder {
    pub fn new() -> TimelineBuilder {
        TimelineBuilder::default()
    }

    pub fn starting_at(origin: f64) -> TimelineBuilder {
        TimelineBuilder {
            origin,
            ..TimelineBuilder::default()
        }
    }

    /// Record a closed scope. Provide an `inner` function for recording
    /// nested scopes.
    pub fn scope<F>(&mut self, name: &str, sub_id: u32, begin: f64, end: f64, inner: F) -> &mut Self
    where
        F: FnOnce(&mut Self),
    {
        assert!(begin <= end, "`{}` ends before it begins", name);

        self.events.push(Event::closed(
            Name::intern(name),
            self.depth,
            sub_id,
            self.origin + begin,
            self.origin + end,
        ));

        self.depth += 1;
        inner(self);
        self.depth -= 1;

        self
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

/// Asserts that `events` (one recorder's events, in begin order) form a
/// properly nested forest: every event at depth `d > 0` lies within the
/// closest preceding event at depth `d - 1`.
pub fn assert_well_nested(events: &[Event]) {
    let mut stack: Vec<&Event> = Vec::new();

    for event in events {
        let depth = event.depth as usize;
        assert!(
            depth <= stack.len(),
            "`{}` at depth {} without a parent",
            event.name,
            depth
        );
        stack.truncate(depth);

        if let Some(parent) = stack.last() {
            assert!(
                parent.contains(event),
                "`{}` [{}, {}] is not within its parent `{}` [{}, {}]",
                event.name,
                event.begin,
                event.end,
                parent.name,
                parent.begin,
                parent.end
            );
        }

        stack.push(event);
    }
}

/// Records one deterministic "frame" of nested scopes into `local`,
/// `fan_out` children wide and `depth` levels deep. Returns the number of
/// scopes recorded.
pub fn pseudo_frame(local: &mut LocalRecorder, names: &[Name], fan_out: u32, depth: u32) -> usize {
    fn recurse(local: &mut LocalRecorder, names: &[Name], fan_out: u32, depth: u32, level: u32) -> usize {
        if level == depth {
            return 0;
        }

        let mut count = 0;
        for i in 0..fan_out {
            let name = names[((level * fan_out + i) as usize) % names.len()];
            local.begin_scope(name, i);
            count += 1 + recurse(local, names, fan_out, depth, level + 1);
            local.end_scope(Some(name));
        }
        count
    }

    recurse(local, names, fan_out, depth, 0)
}
