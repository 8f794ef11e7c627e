use framescope::export::{self, TraceRecord};
use framescope::testing_common::{assert_well_nested, pseudo_frame, TimelineBuilder};
use framescope::{clock, Config, ConnectionState, Event, Name, Registry, View};
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::time::Duration;

const LONG: Duration = Duration::from_secs(3600);

fn assert_approx(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        actual
    );
}

// A containing B(100ms) and B(50ms).
fn frame_batch() -> Vec<Event> {
    let mut b = TimelineBuilder::starting_at(clock::now());
    b.scope("A", 0, 0.0, 0.2, |b| {
        b.scope("B", 0, 0.0, 0.1, |_| {});
        b.scope("B", 1, 0.1, 0.15, |_| {});
    });
    b.into_events()
}

#[test]
fn two_frames_accumulate_into_one_window() {
    let registry = Registry::new(Config {
        frames_per_window: 2,
        ..Config::default()
    });
    let recorder = registry.create_virtual_recorder("R", false);
    let view = View::new(&registry);
    view.connect("R", LONG);

    recorder.batch_add(&frame_batch());
    assert_eq!(view.frames_observed(), 1);
    assert!(view.find_node("A").is_none());

    recorder.batch_add(&frame_batch());
    assert_eq!(view.frames_observed(), 0);

    let (a_count, a_total, a_self, b_count, b_total, b_avg, b_nodes) = view.read(|tree| {
        let a = tree.get(&["A"]).unwrap();
        let b = a.child("B").unwrap();
        (
            a.stats().instance_count,
            a.stats().total_time,
            a.stats().self_time,
            b.stats().instance_count,
            b.stats().total_time,
            b.stats().avg_per_accounting_frame,
            a.children().len(),
        )
    });

    assert_eq!(a_count, 2);
    assert_eq!(b_nodes, 1);
    assert_eq!(b_count, 4);
    assert_approx(b_total, 0.3);
    assert_approx(b_avg, 0.15);
    assert_approx(a_self, a_total - b_total);
}

#[test]
fn same_batch_every_window_is_stable() {
    let registry = Registry::new(Config::default());
    let recorder = registry.create_virtual_recorder("R", false);
    let view = View::new(&registry);
    view.connect("R", LONG);

    recorder.batch_add(&frame_batch());
    let first = view.find_node("B").unwrap();
    assert!(view.set_expanded(&["A"], false));
    assert!(view.set_selected(&["A", "B"], true));

    for _ in 0..10 {
        recorder.batch_add(&frame_batch());
    }

    let a = view.find_node("A").unwrap();
    let b = view.find_node("B").unwrap();
    assert_eq!(b.stats.instance_count, first.stats.instance_count);
    assert_approx(b.stats.total_time, first.stats.total_time);
    assert_eq!(a.stats.instance_count, 1);
    assert!(!a.expanded);
    assert!(b.selected);
    assert_eq!(view.read(|tree| tree.len()), 2);
}

#[test]
fn missing_nodes_survive_the_grace_period() {
    let registry = Registry::new(Config {
        keep_alive_frames: 2,
        ..Config::default()
    });
    let recorder = registry.create_virtual_recorder("R", false);
    let view = View::new(&registry);
    view.connect("R", LONG);

    recorder.batch_add(&frame_batch());

    let mut only_a = TimelineBuilder::starting_at(clock::now());
    only_a.scope("A", 0, 0.0, 0.2, |_| {});
    let only_a = only_a.into_events();

    for missing in 1..=2 {
        recorder.batch_add(&only_a);
        let b = view.find_node("B").unwrap();
        assert_eq!(b.frames_since_seen, missing);
        assert_eq!(b.stats.instance_count, 0);
    }

    recorder.batch_add(&only_a);
    assert!(view.find_node("B").is_none());
    assert!(view.pooled_nodes() > 0);

    // Coming back after eviction starts from scratch.
    recorder.batch_add(&frame_batch());
    let b = view.find_node("B").unwrap();
    assert_eq!(b.frames_since_seen, 0);
    assert!(!b.selected);
}

#[test]
fn live_thread_recording() {
    let registry = Registry::new(Config::default());
    let view = View::new(&registry);
    view.connect("live-worker", LONG);
    assert_eq!(view.state(), ConnectionState::Connecting);

    let registered = Arc::new(Barrier::new(2));
    let attached = Arc::new(Barrier::new(2));

    let worker = std::thread::Builder::new()
        .name("live-worker".into())
        .spawn({
            let registry = registry.clone();
            let registered = registered.clone();
            let attached = attached.clone();
            move || {
                registry.local_recorder().unwrap();
                registered.wait();
                attached.wait();

                let outer = Name::from_static("outer");
                let inner = Name::from_static("inner");
                for frame in 0..5 {
                    registry.try_with_local(|local| {
                        local.begin_scope(outer, frame);
                        for i in 0..2 {
                            local.begin_scope(inner, i);
                            local.end_scope(Some(inner));
                        }
                        local.end_scope(Some(outer));
                    });
                }
                // Exiting the thread flushes whatever is left.
            }
        })
        .unwrap();

    registered.wait();
    view.tick_frame();
    assert_eq!(view.state(), ConnectionState::Connected);
    attached.wait();

    worker.join().unwrap();
    view.publish();

    let outer = view.find_node("outer").unwrap();
    let inner = view.find_node("inner").unwrap();
    assert_eq!(outer.stats.instance_count, 5);
    assert_eq!(inner.stats.instance_count, 10);
    assert_eq!(inner.recursion_depth, 1);
    assert!(outer.stats.total_time >= inner.stats.total_time);

    // The thread is gone, so the next tick notices.
    view.tick_frame();
    assert_eq!(view.state(), ConnectionState::Disconnected);
    assert!(view.find_node("outer").is_some());
}

#[test]
fn producer_thread_ends_its_frames() {
    let registry = Registry::new(Config::default());
    let view = View::new(&registry);
    view.connect("frame-producer", LONG);

    let registered = Arc::new(Barrier::new(2));
    let recorded = Arc::new(Barrier::new(2));
    let ticked = Arc::new(Barrier::new(2));

    let worker = std::thread::Builder::new()
        .name("frame-producer".into())
        .spawn({
            let registry = registry.clone();
            let registered = registered.clone();
            let recorded = recorded.clone();
            let ticked = ticked.clone();
            move || {
                registry.local_recorder().unwrap();
                registered.wait();
                ticked.wait();

                let step = Name::from_static("step");
                for frame in 0..10 {
                    registry.try_with_local(|local| {
                        local.begin_scope(step, frame);
                        local.end_scope(Some(step));
                    });
                    registry.end_frame();
                    recorded.wait();
                    ticked.wait();
                }
            }
        })
        .unwrap();

    registered.wait();
    view.tick_frame();
    assert_eq!(view.state(), ConnectionState::Connected);
    ticked.wait();

    for _ in 0..10 {
        recorded.wait();
        view.tick_frame();

        let step = view.find_node("step").unwrap();
        assert_eq!(step.stats.instance_count, 1);
        assert_eq!(step.frames_since_seen, 0);
        ticked.wait();
    }

    worker.join().unwrap();
}

#[test]
fn threads_record_independently_and_nest_correctly() {
    let registry = Registry::new(Config {
        flush_threshold: 7,
        ..Config::default()
    });
    let names: Vec<Name> = ["a", "b", "c", "d"].iter().map(|&s| Name::from_static(s)).collect();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let registry = registry.clone();
            let names = names.clone();
            std::thread::Builder::new()
                .name(format!("nesting-{}", i))
                .spawn(move || {
                    let mut recorded = 0;
                    for _ in 0..20 {
                        recorded += registry
                            .try_with_local(|local| pseudo_frame(local, &names, 3, 3))
                            .unwrap();
                    }
                    registry.try_with_local(|local| local.flush());
                    (registry.local_recorder().unwrap(), recorded)
                })
                .unwrap()
        })
        .collect();

    for handle in handles {
        let (recorder, recorded) = handle.join().unwrap();
        let events = recorder.capture();

        assert!(recorder.name().starts_with("nesting-"));
        assert_eq!(events.len(), recorded);
        assert!(events.iter().all(|e| e.begin <= e.end));
        assert_well_nested(&events);
    }
}

#[test]
fn scope_macro_records_on_the_global_registry() {
    std::thread::Builder::new()
        .name("scope-macro-test".into())
        .spawn(|| {
            for _ in 0..3 {
                let _frame = framescope::scope!("macro frame");
                let _inner = framescope::ScopeGuard::named("macro inner", 0);
            }
            framescope::flush();

            let events = framescope::local_recorder().capture();
            let frames: Vec<u32> = events
                .iter()
                .filter(|e| e.name == "macro frame")
                .map(|e| e.sub_id)
                .collect();

            assert_eq!(frames, vec![0, 1, 2]);
            assert!(events
                .iter()
                .filter(|e| e.name == "macro inner")
                .all(|e| e.depth == 1));
            assert_well_nested(&events);
        })
        .unwrap()
        .join()
        .unwrap();

    assert!(Registry::global().find_recorder("scope-macro-test").is_none());
}

fn shared_loop_body() {
    let _scope = framescope::scope!("shared loop");
}

#[test]
fn scope_macro_counts_sub_ids_per_thread() {
    let start = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|i| {
            let start = start.clone();
            std::thread::Builder::new()
                .name(format!("sub-id-{}", i))
                .spawn(move || {
                    start.wait();
                    for _ in 0..3 {
                        shared_loop_body();
                    }
                    framescope::flush();

                    framescope::local_recorder()
                        .capture()
                        .iter()
                        .filter(|e| e.name == "shared loop")
                        .map(|e| e.sub_id)
                        .collect::<Vec<u32>>()
                })
                .unwrap()
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), vec![0, 1, 2]);
    }
}

fn test_dir(name: &str) -> PathBuf {
    let mut path = PathBuf::new();
    path.push("test-tmp");
    path.push("end_to_end");
    path.push(name);
    path
}

#[test]
fn export_round_trip() {
    let registry = Registry::new(Config::default());
    let main = registry.create_virtual_recorder("main", false);
    let gpu = registry.create_virtual_recorder("gpu", true);

    let mut b = TimelineBuilder::starting_at(clock::now());
    b.scope("frame", 0, 0.0, 0.016, |b| {
        b.scope("update", 0, 0.001, 0.004, |_| {});
        b.scope("render", 0, 0.004, 0.015, |b| {
            b.scope("draw", 3, 0.005, 0.010, |_| {});
        });
    });
    let main_events = b.into_events();
    main.batch_add(&main_events);

    let mut b = TimelineBuilder::starting_at(clock::now());
    b.scope("shadow pass", 0, 0.0, 0.002, |_| {});
    let gpu_events = b.into_events();
    gpu.batch_add(&gpu_events);

    let path = export::dump_chrome_trace(&registry, &test_dir("export_round_trip"), None).unwrap();
    assert!(path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("chrome_tracing_"));

    let records = export::read_chrome_trace_file(&path).unwrap();
    assert_eq!(records.len(), main_events.len() + gpu_events.len());

    let restored = |recorder: &str| -> Vec<Event> {
        records
            .iter()
            .filter(|r| r.category == recorder)
            .map(TraceRecord::to_event)
            .collect()
    };

    for (original, restored) in [(main_events, restored("main")), (gpu_events, restored("gpu"))] {
        assert_eq!(original.len(), restored.len());
        for (o, r) in original.iter().zip(&restored) {
            assert_eq!(o.name, r.name);
            assert_eq!(o.depth, r.depth);
            assert_eq!(o.sub_id, r.sub_id);
            assert!((o.begin - r.begin).abs() < 1e-9);
            assert!((o.end - r.end).abs() < 1e-9);
        }
    }

    // Recorders keep their registration order as track ids.
    assert!(records.iter().filter(|r| r.category == "gpu").all(|r| r.thread_id == 1));
}

#[test]
fn chrome_trace_string_is_a_json_array() {
    let registry = Registry::new(Config::default());
    let recorder = registry.create_virtual_recorder("solo", false);

    let mut b = TimelineBuilder::starting_at(clock::now());
    b.scope("only", 0, 0.0, 0.001, |_| {});
    recorder.batch_add(&b.into_events());

    let json = export::chrome_trace_string(&registry, Some(60.0)).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value.as_array().unwrap().len(), 1);
    assert_eq!(value[0]["ph"], "X");
    assert_eq!(value[0]["cat"], "solo");
}
