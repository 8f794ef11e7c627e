//! Offline analysis of exported traces.

use crate::export::TraceRecord;
use crate::stringtable::Name;
use crate::Event;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ScopeData {
    pub label: String,
    pub time: Duration,
    pub self_time: Duration,
    pub invocation_count: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AnalysisResults {
    /// Sorted by self time, largest first.
    pub scope_data: Vec<ScopeData>,
    /// Time covered by the top-level scopes of all recorders.
    pub total_time: Duration,
}

#[derive(Default)]
struct Accumulator {
    time_us: f64,
    self_time_us: f64,
    invocation_count: usize,
}

// Tracks the open ancestors of the current record, per recorder.
#[derive(Default)]
struct PerThreadState {
    // Depth and record index of each ancestor, with the length of `stack_id`
    // before it was pushed.
    stack: Vec<(u32, usize, usize)>,
    stack_id: String,
}

impl PerThreadState {
    /// Pops every entry that cannot be an ancestor of a record at `depth`.
    /// Returns the index of the record's direct parent, if it is on top
    /// afterwards.
    fn enter(&mut self, depth: u32) -> Option<usize> {
        while let Some(&(top_depth, top_index, len)) = self.stack.last() {
            if top_depth < depth {
                return if top_depth + 1 == depth {
                    Some(top_index)
                } else {
                    None
                };
            }

            self.stack.pop();
            self.stack_id.truncate(len);
        }

        None
    }

    fn push(&mut self, depth: u32, index: usize, label: &str) {
        self.stack.push((depth, index, self.stack_id.len()));
        if !self.stack_id.is_empty() {
            self.stack_id.push(';');
        }
        self.stack_id.push_str(label);
    }
}

fn duration_from_micros(us: f64) -> Duration {
    Duration::from_secs_f64(us.max(0.0) / 1e6)
}

/// Collects per-label totals over `records`, which must be sorted by begin
/// time with parents before their children (as written by the exporter).
///
/// The self time of a scope is its duration minus the durations of its
/// direct children. The parent of a record at depth `d` is the closest
/// preceding record of the same recorder at depth `d - 1`; records whose
/// parent was cut off by the export window count as top level.
pub fn summarize(records: &[TraceRecord]) -> AnalysisResults {
    let mut data = FxHashMap::<&str, Accumulator>::default();
    let mut threads = FxHashMap::<u64, PerThreadState>::default();
    let mut total_us = 0.0;

    for (index, record) in records.iter().enumerate() {
        let depth = record.depth();
        let thread = threads.entry(record.thread_id).or_default();

        match thread.enter(depth) {
            Some(parent) => {
                let parent = records[parent].name.as_str();
                data.entry(parent).or_default().self_time_us -= record.duration;
            }
            None => total_us += record.duration,
        }

        let entry = data.entry(record.name.as_str()).or_default();
        entry.time_us += record.duration;
        entry.self_time_us += record.duration;
        entry.invocation_count += 1;

        // Only the stack shape is needed here, not the folded string.
        thread.stack.push((depth, index, 0));
    }

    let mut scope_data: Vec<ScopeData> = data
        .into_iter()
        .map(|(label, acc)| ScopeData {
            label: label.to_owned(),
            time: duration_from_micros(acc.time_us),
            self_time: duration_from_micros(acc.self_time_us),
            invocation_count: acc.invocation_count,
        })
        .collect();

    scope_data.sort_by(|a, b| b.self_time.cmp(&a.self_time).then(a.label.cmp(&b.label)));

    AnalysisResults {
        scope_data,
        total_time: duration_from_micros(total_us),
    }
}

/// Collect a map of all stacks and how many microseconds of self time are
/// spent in each. Stacks are rooted at the recorder name, e.g.
/// `main;frame;update`, which is the folded format flamegraph tools read.
pub fn collapse_stacks(records: &[TraceRecord]) -> FxHashMap<String, u64> {
    let mut counters = FxHashMap::<String, f64>::default();
    let mut threads = FxHashMap::<u64, PerThreadState>::default();

    for (index, record) in records.iter().enumerate() {
        let depth = record.depth();
        let thread = threads.entry(record.thread_id).or_insert_with(|| {
            let mut state = PerThreadState::default();
            state.stack_id.push_str(&record.category);
            state
        });

        if thread.enter(depth).is_some() {
            if let Some(parent_time) = counters.get_mut(&thread.stack_id) {
                *parent_time -= record.duration;
            }
        }

        thread.push(depth, index, &record.name);
        *counters.entry(thread.stack_id.clone()).or_default() += record.duration;
    }

    counters
        .into_iter()
        .map(|(stack, us)| (stack, us.max(0.0).round() as u64))
        .collect()
}

/// Splits `records` into one event list per recorder, in order of the
/// recorders' first appearance.
pub fn events_by_recorder(records: &[TraceRecord]) -> Vec<(String, Vec<Event>)> {
    let mut index = FxHashMap::<u64, usize>::default();
    let mut recorders: Vec<(String, Vec<Event>)> = Vec::new();
    let mut names = FxHashMap::<&str, Name>::default();

    for record in records {
        let slot = *index.entry(record.thread_id).or_insert_with(|| {
            recorders.push((record.category.clone(), Vec::new()));
            recorders.len() - 1
        });

        let name = *names
            .entry(record.name.as_str())
            .or_insert_with(|| Name::intern(&record.name));

        let begin = record.timestamp / 1e6;
        recorders[slot].1.push(Event::closed(
            name,
            record.depth(),
            record.args.sub_id,
            begin,
            begin + record.duration / 1e6,
        ));
    }

    recorders
}
