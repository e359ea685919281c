//! Integration test: build models from recorded profiles in both wire
//! formats and replay them.

use std::collections::HashMap;

use stackreplay_core::{BuildOptions, FrameEvent, ProfileModel};
use stackreplay_protocol::ProfileFormat;

const CURRENT: &[u8] = include_bytes!("fixtures/node-current.cpuprofile");
const LEGACY: &[u8] = include_bytes!("fixtures/legacy-head.cpuprofile");

fn self_time_by_node(events: &[FrameEvent]) -> HashMap<u64, f64> {
    let mut totals = HashMap::new();
    for event in events {
        if let FrameEvent::Close {
            node_id, self_time, ..
        } = event
        {
            *totals.entry(*node_id).or_insert(0.0) += self_time;
        }
    }
    totals
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn current_format_drops_natives_and_replays() {
    let mut model =
        ProfileModel::from_json(CURRENT, BuildOptions::default()).expect("failed to build model");

    assert_eq!(model.format(), ProfileFormat::Current);
    assert_eq!(model.nodes().len(), 7);
    assert_eq!(model.total_hit_count(), 8);
    assert_close(model.start_time(), 1000.0);
    assert_close(model.end_time(), 1008.0);
    assert_eq!(model.timestamps().len(), model.samples().len() + 1);

    // The native `map` frame collapses into `main`, the lone (program)
    // sample between two `main` stacks is repaired.
    assert_eq!(model.samples(), &[7, 5, 7, 7, 8, 4, 8, 3]);
    let main = model.node_by_id(5).expect("main");
    assert_close(main.self_time, 1.0);
    assert_eq!(model.node_by_id(6).map(|n| n.id), Some(5));

    let callback = model.node_by_id(7).expect("callback");
    assert_eq!(callback.depth, 2);
    assert_eq!(callback.deopt_reason, None);
    assert_eq!(callback.position_ticks.len(), 1);
    assert_eq!(callback.call_uid(), "callback@42:3:18");
    let render = model.node_by_id(8).expect("render");
    assert_eq!(
        render.deopt_reason.as_deref(),
        Some("Insufficient type feedback")
    );

    let total_self: f64 = model.nodes().iter().map(|n| n.self_time).sum();
    assert_close(total_self, 8.0);

    let events = model.frame_events(f64::NEG_INFINITY, f64::INFINITY);
    let opens = events
        .iter()
        .filter(|e| matches!(e, FrameEvent::Open { .. }))
        .count();
    assert_eq!(opens, 6);
    assert_eq!(events.len(), 12);

    let self_times = self_time_by_node(&events);
    assert_close(self_times[&5], 1.0);
    assert_close(self_times[&7], 3.0);
    assert_close(self_times[&8], 2.0);
    assert_close(self_times[&4], 1.0);
    assert_close(self_times[&3], 1.0);
    assert_close(self_times.values().sum(), model.duration());

    // GC lands on top of `render`.
    assert!(events.contains(&FrameEvent::Open {
        depth: 3,
        node_id: 4,
        timestamp: 1005.0,
    }));
    assert_eq!(
        events.last(),
        Some(&FrameEvent::Close {
            depth: 1,
            node_id: 3,
            start: 1007.0,
            total: 1.0,
            self_time: 1.0,
        })
    );
}

#[test]
fn current_format_keeps_natives_when_enabled() {
    let options = BuildOptions {
        keep_native_frames: true,
    };
    let mut model = ProfileModel::from_json(CURRENT, options).expect("failed to build model");

    assert_eq!(model.nodes().len(), 8);
    assert_eq!(model.samples(), &[7, 6, 7, 7, 8, 4, 8, 3]);
    assert_eq!(model.node_by_id(7).map(|n| n.depth), Some(3));
    assert_eq!(model.max_depth(), 3);

    let events = model.frame_events(f64::NEG_INFINITY, f64::INFINITY);
    let self_times = self_time_by_node(&events);
    assert_close(self_times[&6], 1.0);
    assert_close(self_times.values().sum(), model.duration());
}

#[test]
fn legacy_head_profile_is_sorted_and_replayed() {
    let mut model =
        ProfileModel::from_json(LEGACY, BuildOptions::default()).expect("failed to build model");

    assert_eq!(model.format(), ProfileFormat::Legacy);
    assert_eq!(model.total_hit_count(), 4);
    assert_eq!(model.samples(), &[3, 4, 4, 2]);
    assert_close(model.start_time(), 10_000.0);
    assert_close(model.end_time(), 10_004.0);

    let work = model.node_by_id(4).expect("work");
    assert_eq!(work.call_frame.line_number, 9);
    assert_eq!(work.call_frame.column_number, 2);
    assert_eq!(work.call_uid(), "work@5:9:2");
    assert_close(work.self_time, 2.0);
    assert_eq!(model.parent(work).map(|n| n.function_name()), Some("main"));

    let events = model.frame_events(f64::NEG_INFINITY, f64::INFINITY);
    let summary: Vec<(u64, bool)> = events
        .iter()
        .map(|e| (e.node_id(), matches!(e, FrameEvent::Open { .. })))
        .collect();
    assert_eq!(
        summary,
        vec![
            (3, true),
            (4, true),
            (4, false),
            (3, false),
            (2, true),
            (2, false),
        ]
    );
    let self_times = self_time_by_node(&events);
    assert_close(self_times[&3], 1.0);
    assert_close(self_times[&4], 2.0);
    assert_close(self_times[&2], 1.0);
}

#[test]
fn replaying_twice_is_identical() {
    let mut model =
        ProfileModel::from_json(CURRENT, BuildOptions::default()).expect("failed to build model");
    let first = model.frame_events(1002.5, 1006.5);
    let second = model.frame_events(1002.5, 1006.5);
    assert!(!first.is_empty());
    assert_eq!(first, second);
}
