use std::sync::Barrier;

use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::WorkerEventKind;
use crate::testing::{entry, next_event, registry};

fn ids(raw: &[u64]) -> Vec<WorkerId> {
	raw.iter().copied().map(WorkerId::new).collect()
}

#[tokio::test]
async fn create_inserts_under_requested_id() {
	let registry = registry();
	assert_eq!(registry.create(WorkerId::new(5), entry("echo")), Ok(WorkerId::new(5)));
	assert_eq!(registry.list().as_slice(), ids(&[5]).as_slice());

	let snapshot = registry.get(WorkerId::new(5)).unwrap();
	assert_eq!(snapshot.entry, entry("echo"));
	assert_ne!(snapshot.state, WorkerState::Terminated);
}

#[tokio::test]
async fn create_rejects_live_duplicate() {
	let registry = registry();
	registry.create(WorkerId::new(5), entry("echo")).unwrap();
	assert_eq!(registry.create(WorkerId::new(5), entry("other")), Err(ThreadError::DuplicateId(WorkerId::new(5))));
	assert_eq!(registry.get(WorkerId::new(5)).unwrap().entry, entry("echo"));
}

#[test]
fn concurrent_create_same_id_has_one_winner() {
	for _ in 0..20 {
		let registry = registry();
		let barrier = Arc::new(Barrier::new(2));
		let handles: Vec<_> = ["e1", "e2"]
			.into_iter()
			.map(|name| {
				let registry = registry.clone();
				let barrier = Arc::clone(&barrier);
				skein_worker::spawn_named_thread(format!("create-{name}"), move || {
					barrier.wait();
					registry.create(WorkerId::new(5), entry(name))
				})
				.unwrap()
			})
			.collect();

		let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
		let wins = results.iter().filter(|r| r.is_ok()).count();
		let dups = results.iter().filter(|r| **r == Err(ThreadError::DuplicateId(WorkerId::new(5)))).count();
		assert_eq!((wins, dups), (1, 1), "results: {results:?}");
		assert_eq!(registry.len(), 1);
	}
}

#[tokio::test]
async fn start_allocates_past_explicit_ids() {
	let registry = registry();
	registry.create(WorkerId::new(0), entry("echo")).unwrap();
	registry.create(WorkerId::new(1), entry("echo")).unwrap();
	let fresh = registry.start(entry("echo"));
	assert!(fresh >= WorkerId::new(2), "got {fresh}");
	assert_eq!(registry.list().as_slice(), ids(&[0, 1, 2]).as_slice());
}

#[tokio::test]
async fn get_and_send_unknown_id() {
	let registry = registry();
	registry.create(WorkerId::new(0), entry("echo")).unwrap();
	let before = registry.list();

	assert_eq!(registry.get(WorkerId::new(7)), Err(ThreadError::UnknownId(WorkerId::new(7))));
	assert_eq!(registry.send(WorkerId::new(7), json!("hi")), Err(ThreadError::UnknownId(WorkerId::new(7))));
	assert_eq!(registry.list(), before);
}

#[tokio::test]
async fn destroy_is_idempotent() {
	let registry = registry();
	registry.create(WorkerId::new(0), entry("echo")).unwrap();
	registry.create(WorkerId::new(1), entry("echo")).unwrap();

	assert_eq!(registry.destroy(WorkerId::new(0)), Ok(()));
	let after_first = registry.list();
	assert_eq!(registry.destroy(WorkerId::new(0)), Ok(()));
	assert_eq!(registry.list(), after_first);
	assert_eq!(after_first.as_slice(), ids(&[1]).as_slice());

	assert_eq!(registry.destroy(WorkerId::new(9)), Err(ThreadError::UnknownId(WorkerId::new(9))));
	assert_eq!(registry.get(WorkerId::new(0)), Err(ThreadError::UnknownId(WorkerId::new(0))));
}

#[tokio::test]
async fn destroyed_id_can_be_recreated_explicitly() {
	let registry = registry();
	registry.create(WorkerId::new(3), entry("echo")).unwrap();
	registry.destroy(WorkerId::new(3)).unwrap();
	assert_eq!(registry.create(WorkerId::new(3), entry("echo")), Ok(WorkerId::new(3)));
}

#[tokio::test]
async fn freed_ids_are_not_reused_until_compaction() {
	let registry = registry();
	let a = registry.start(entry("echo"));
	let b = registry.start(entry("echo"));
	registry.destroy(b).unwrap();

	let c = registry.start(entry("echo"));
	assert!(c > b, "{c} must not reuse {b} before compaction");

	registry.destroy(c).unwrap();
	assert_eq!(registry.compact_ids(), WorkerId::new(a.get() + 1));
	assert_eq!(registry.start(entry("echo")), b);
	// Compaction forgot the retired ids it made reusable.
	assert_eq!(registry.destroy(c), Err(ThreadError::UnknownId(c)));
}

#[tokio::test]
async fn worker_churn_keeps_bookkeeping_compact() {
	let registry = registry();
	let mut started = Vec::new();
	for _ in 0..64 {
		let id = registry.start(entry("echo"));
		registry.destroy(id).unwrap();
		started.push(id);
	}
	assert!(registry.is_empty());
	assert_eq!(registry.inner.table.lock().issued.runs(), 1);
	for id in started {
		assert_eq!(registry.destroy(id), Ok(()), "{id} was destroyed once already");
	}
}

#[tokio::test]
async fn explicit_id_gap_is_not_treated_as_destroyed() {
	let registry = registry();
	registry.create(WorkerId::new(0), entry("echo")).unwrap();
	registry.create(WorkerId::new(4), entry("echo")).unwrap();
	assert_eq!(registry.destroy(WorkerId::new(2)), Err(ThreadError::UnknownId(WorkerId::new(2))));
}

#[tokio::test]
async fn preload_stays_closed_after_compaction_rewinds() {
	let registry = registry();
	let id = registry.start(entry("echo"));
	registry.destroy(id).unwrap();
	assert_eq!(registry.compact_ids(), WorkerId::new(0));
	assert_eq!(registry.reserve_preload(2), Err(ThreadError::PreloadRejected));
}

#[test]
fn preload_reservation_is_one_shot() {
	let registry = registry();
	assert_eq!(registry.reserve_preload(0), Ok(Vec::new()));
	assert_eq!(registry.reserve_preload(0), Err(ThreadError::PreloadRejected));
}

#[tokio::test]
async fn list_is_a_restartable_snapshot() {
	let registry = registry();
	for n in [4, 1, 3] {
		registry.create(WorkerId::new(n), entry("echo")).unwrap();
	}
	let snapshot = registry.list();
	registry.destroy(WorkerId::new(3)).unwrap();
	registry.create(WorkerId::new(8), entry("echo")).unwrap();

	let first: Vec<_> = snapshot.iter().collect();
	let second: Vec<_> = (&snapshot).into_iter().collect();
	assert_eq!(first, ids(&[1, 3, 4]));
	assert_eq!(first, second);
	assert!(snapshot.contains(WorkerId::new(3)));
	assert_eq!(registry.list().as_slice(), ids(&[1, 4, 8]).as_slice());
}

#[tokio::test]
async fn send_routes_to_worker_in_order() {
	let registry = registry();
	let id = registry.start(entry("echo"));
	let mut events = registry.subscribe(id).unwrap();
	assert_eq!(registry.wait_settled(id).await, Ok(WorkerState::Running));

	for msg in ["m1", "m2", "m3"] {
		registry.send(id, json!(msg)).unwrap();
	}
	let mut seen = Vec::new();
	while seen.len() < 3 {
		if let WorkerEventKind::Message(msg) = next_event(&mut events, |k| matches!(k, WorkerEventKind::Message(_))).await.kind {
			seen.push(msg);
		}
	}
	assert_eq!(seen, vec![json!("m1"), json!("m2"), json!("m3")]);
}

#[tokio::test]
async fn wait_settled_reports_load_failure() {
	let registry = registry();
	let id = registry.start(entry("fail-load"));
	let err = registry.wait_settled(id).await.unwrap_err();
	assert!(matches!(&err, ThreadError::LoadFailure { id: failed, .. } if *failed == id), "{err}");
	assert_eq!(registry.state(id), Ok(WorkerState::Failed), "failed workers stay listed");
	assert!(registry.list().contains(id));
}

#[tokio::test]
async fn shutdown_terminates_everything() {
	let registry = registry();
	let first = registry.start(entry("echo"));
	let _second = registry.start(entry("fail-load"));
	let mut events = registry.subscribe(first).unwrap();

	let report = registry.shutdown(Duration::from_secs(2)).await;
	assert_eq!(
		report,
		ShutdownReport {
			terminated: 2,
			exited: 2,
			timed_out: false,
		}
	);
	assert!(registry.is_empty());
	next_event(&mut events, |k| matches!(k, WorkerEventKind::Exited)).await;
	assert_eq!(registry.destroy(first), Ok(()));
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_message() {
	let registry = registry();
	let id = registry.start(entry("slow-handle:300"));
	registry.wait_settled(id).await.unwrap();
	registry.send(id, json!("work")).unwrap();
	tokio::time::sleep(Duration::from_millis(20)).await;

	let report = registry.shutdown(Duration::from_millis(20)).await;
	assert!(report.timed_out);
	assert_eq!(report.exited, 0);
}
