/*!
 * Worker Group Integration Tests
 * Control protocol round trips between the host and message-driven workers
 */

use coord_kernel::{Barrier, ControlMessage, SharedRegion, WorkerGroup};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

#[test]
fn test_every_task_yields_one_terminal_report() {
    let region = SharedRegion::new(1).unwrap();
    let group = WorkerGroup::spawn(4, &region, |_, task_id, payload| {
        if task_id % 5 == 0 {
            return Err(format!("task {} rejected", task_id));
        }
        Ok(json!({ "echo": payload }))
    })
    .unwrap();
    group.start().unwrap();

    for task_id in 0..40u64 {
        group.dispatch(task_id, json!(task_id)).unwrap();
    }
    let reports = group.join().unwrap();

    let mut outcomes = BTreeMap::new();
    for report in reports {
        match report {
            ControlMessage::Result {
                task_id, payload, ..
            } => {
                assert_eq!(payload, json!({ "echo": task_id }));
                assert!(outcomes.insert(task_id, true).is_none());
            }
            ControlMessage::Error {
                task_id: Some(task_id),
                ..
            } => {
                assert!(outcomes.insert(task_id, false).is_none());
            }
            other => panic!("unexpected report {:?}", other),
        }
    }
    assert_eq!(outcomes.len(), 40);
    assert_eq!(outcomes.values().filter(|ok| !**ok).count(), 8);
}

#[test]
fn test_reports_survive_a_json_hop() {
    let region = SharedRegion::new(1).unwrap();
    let group = WorkerGroup::spawn(1, &region, |ctx, _, _| {
        ctx.progress(2.0, "done already");
        Ok(Value::Bool(true))
    })
    .unwrap();
    group.start().unwrap();
    group.submit(0, 9, Value::Null).unwrap();

    let timeout = Duration::from_secs(5);
    let progress = group.reports().recv_timeout(timeout).unwrap();
    let result = group.reports().recv_timeout(timeout).unwrap();
    group.join().unwrap();

    let progress = ControlMessage::from_json(&progress.to_json().unwrap()).unwrap();
    assert_eq!(progress, ControlMessage::progress(0, 1.0, "done already"));
    match ControlMessage::from_json(&result.to_json().unwrap()).unwrap() {
        ControlMessage::Result {
            worker,
            task_id,
            payload,
            ..
        } => assert_eq!((worker, task_id, payload), (0, 9, Value::Bool(true))),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_workers_coordinate_through_shared_region() {
    let region = SharedRegion::new(8).unwrap();
    let barrier = Barrier::new(&region, 3).unwrap();
    let counter = region.reserve(1).unwrap();

    let group = WorkerGroup::spawn(3, &region, move |ctx, _, _| {
        let region = ctx.region();
        region.add(counter, 1).map_err(|e| e.to_string())?;
        // Every worker sees the full count once all three arrived
        barrier.arrive().map_err(|e| e.to_string())?;
        let seen = region.load(counter).map_err(|e| e.to_string())?;
        Ok(json!(seen))
    })
    .unwrap();

    group.start().unwrap();
    for worker in 0..3 {
        group.submit(worker, u64::from(worker), Value::Null).unwrap();
    }
    let reports = group.join().unwrap();

    let seen: Vec<Value> = reports
        .into_iter()
        .map(|report| match report {
            ControlMessage::Result { payload, .. } => payload,
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(seen, vec![json!(3); 3]);
}

#[test]
fn test_stop_before_start_exits_cleanly() {
    let region = SharedRegion::new(1).unwrap();
    let group = WorkerGroup::spawn(2, &region, |_, _, v| Ok(v)).unwrap();
    group.submit(1, 1, Value::Null).unwrap();
    let reports = group.join().unwrap();
    assert!(reports.is_empty());
}
