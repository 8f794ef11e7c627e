//! Chrome trace export.
//!
//! The retained events of every live recorder are written as "complete"
//! (`"ph": "X"`) events, one JSON array per report. Each recorder becomes one
//! track: its name is the event category and its registration ordinal the
//! thread id. The files load directly in `chrome://tracing` and Perfetto.

use crate::clock;
use crate::event::Event;
use crate::recorder::Recorder;
use crate::registry::Registry;
use crate::stringtable::Name;
use serde::{Deserialize, Serialize, Serializer};
use std::error::Error;
use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "X")]
    Complete,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceArgs {
    pub depth: u32,
    pub sub_id: u32,
}

/// One event as it appears in a Chrome trace file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub name: String,
    /// Name of the recorder.
    #[serde(rename = "cat")]
    pub category: String,
    #[serde(rename = "ph")]
    pub event_type: EventType,
    /// Begin time in microseconds since the process epoch.
    #[serde(rename = "ts")]
    pub timestamp: f64,
    /// In microseconds.
    #[serde(rename = "dur")]
    pub duration: f64,
    #[serde(rename = "pid")]
    pub process_id: u32,
    /// Registration ordinal of the recorder.
    #[serde(rename = "tid")]
    pub thread_id: u64,
    #[serde(default)]
    pub args: TraceArgs,
}

impl TraceRecord {
    pub fn from_event(recorder: &str, ordinal: u64, event: &Event) -> TraceRecord {
        TraceRecord {
            name: event.name.as_str().to_owned(),
            category: recorder.to_owned(),
            event_type: EventType::Complete,
            timestamp: event.begin * 1e6,
            duration: event.duration() * 1e6,
            process_id: 1,
            thread_id: ordinal,
            args: TraceArgs {
                depth: event.depth,
                sub_id: event.sub_id,
            },
        }
    }

    /// Converts back to an event, interning the name.
    pub fn to_event(&self) -> Event {
        let begin = self.timestamp / 1e6;
        Event::closed(
            Name::intern(&self.name),
            self.args.depth,
            self.args.sub_id,
            begin,
            begin + self.duration / 1e6,
        )
    }

    pub fn depth(&self) -> u32 {
        self.args.depth
    }
}

/// Traces written by other tools may wrap the events in an object.
#[derive(Deserialize)]
#[serde(untagged)]
enum TraceFile {
    Array(Vec<TraceRecord>),
    Object {
        #[serde(rename = "traceEvents")]
        trace_events: Vec<TraceRecord>,
    },
}

/// Snapshots `recorders` and returns every event that began at or after
/// `oldest`, sorted by begin time (parents before children on ties).
/// Recorders are numbered by their position in `recorders`.
pub fn collect_from(recorders: &[Arc<Recorder>], oldest: f64) -> Vec<TraceRecord> {
    let mut records = Vec::new();
    let mut events = Vec::new();

    for (ordinal, recorder) in recorders.iter().enumerate() {
        events.clear();
        recorder.capture_into(&mut events);

        records.extend(
            events
                .iter()
                .filter(|event| event.begin >= oldest)
                .map(|event| TraceRecord::from_event(recorder.name(), ordinal as u64, event)),
        );
    }

    records.sort_by(|a, b| {
        a.timestamp
            .total_cmp(&b.timestamp)
            .then(a.args.depth.cmp(&b.args.depth))
    });

    records
}

/// Collects the events of the last `duration` seconds (the registry's
/// retention if `None`) from every live recorder of `registry`.
pub fn collect(registry: &Registry, duration: Option<f64>) -> Vec<TraceRecord> {
    let duration = duration.unwrap_or(registry.config().retention);
    collect_from(&registry.live_recorders(), clock::now() - duration)
}

pub fn write_chrome_trace<W: Write>(
    writer: W,
    records: &[TraceRecord],
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut writer = BufWriter::new(writer);
    let mut serializer = serde_json::Serializer::new(&mut writer);
    serializer.collect_seq(records)?;
    writer.flush()?;
    Ok(())
}

pub fn chrome_trace_string(
    registry: &Registry,
    duration: Option<f64>,
) -> Result<String, Box<dyn Error + Send + Sync>> {
    let mut out = Vec::new();
    write_chrome_trace(&mut out, &collect(registry, duration))?;
    Ok(String::from_utf8(out)?)
}

static NEXT_TRACE_INDEX: AtomicU32 = AtomicU32::new(0);

/// Writes a report to `dir/chrome_tracing_NNN.json`, where `NNN` increases
/// with every report of this process, and returns its path.
pub fn dump_chrome_trace(
    registry: &Registry,
    dir: &Path,
    duration: Option<f64>,
) -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
    let index = NEXT_TRACE_INDEX.fetch_add(1, Ordering::Relaxed);
    let path = dir.join(format!("chrome_tracing_{:03}.json", index));

    let records = collect(registry, duration);

    fs::create_dir_all(dir)?;
    write_chrome_trace(fs::File::create(&path)?, &records)?;

    info!("wrote {} events to `{}`", records.len(), path.display());
    Ok(path)
}

pub fn read_chrome_trace<R: Read>(reader: R) -> Result<Vec<TraceRecord>, Box<dyn Error + Send + Sync>> {
    let records = match serde_json::from_reader(BufReader::new(reader))? {
        TraceFile::Array(records) => records,
        TraceFile::Object { trace_events } => trace_events,
    };
    Ok(records)
}

pub fn read_chrome_trace_file(path: &Path) -> Result<Vec<TraceRecord>, Box<dyn Error + Send + Sync>> {
    read_chrome_trace(fs::File::open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testing_common::TimelineBuilder;

    #[test]
    fn record_json_layout() {
        let event = Event::closed(Name::from_static("update"), 1, 3, 2.5, 2.75);
        let record = TraceRecord::from_event("main", 0, &event);

        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "update",
                "cat": "main",
                "ph": "X",
                "ts": 2500000.0,
                "dur": 250000.0,
                "pid": 1,
                "tid": 0,
                "args": { "depth": 1, "sub_id": 3 }
            })
        );
    }

    #[test]
    fn collect_sorts_and_filters() {
        let registry = Registry::new(Config::default());
        let now = clock::now();

        let a = registry.create_virtual_recorder("a", false);
        let b = registry.create_virtual_recorder("b", false);

        let mut events = TimelineBuilder::starting_at(now);
        events.scope("outer", 0, 0.5, 1.0, |b| {
            b.scope("inner", 0, 0.5, 0.75, |_| {});
        });
        a.batch_add(&events.into_events());

        let mut events = TimelineBuilder::starting_at(now);
        events
            .scope("old", 0, -100.0, -99.0, |_| {})
            .scope("first", 0, 0.25, 0.5, |_| {});
        b.batch_add(&events.into_events());

        let records = collect_from(&[a, b], now);
        let names: Vec<_> = records.iter().map(|r| (r.name.as_str(), r.thread_id)).collect();

        assert_eq!(names, vec![("first", 1), ("outer", 0), ("inner", 0)]);
    }

    #[test]
    fn accepts_wrapped_traces() {
        let json = r#"{ "traceEvents": [
            { "name": "a", "cat": "t", "ph": "X", "ts": 1.0, "dur": 2.0, "pid": 1, "tid": 7 }
        ] }"#;

        let records = read_chrome_trace(json.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].thread_id, 7);
        assert_eq!(records[0].args, TraceArgs::default());
    }

    #[test]
    fn rejects_garbage() {
        assert!(read_chrome_trace("not json".as_bytes()).is_err());
    }
}
