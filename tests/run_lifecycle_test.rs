//! End-to-end run lifecycle against the mock instrument and real containers.

mod common;

use common::{controller, framed, ledger_row, request, InterruptingScope, RecordingArchiver, TornAppendFormat};
use scope_daq::controller::{RunState, StopReason};
use scope_daq::error::RunError;
use scope_daq::instrument::mock::{MockScope, MockScopeConfig};
use scope_daq::interrupt::Interrupt;
use scope_daq::ledger::csv::CsvLedger;
use scope_daq::ledger::memory::MemoryLedger;
use scope_daq::ledger::RunLedger;
use scope_daq::operator::ScriptedOperator;
use scope_daq::storage::framed::ContainerReader;
use std::sync::Arc;

#[tokio::test]
async fn test_run_after_ledger_41_is_run_42() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(MemoryLedger::with_rows(vec![ledger_row(41)]));
    let archiver = Arc::new(RecordingArchiver::default());
    let mut ctl = controller(dir.path(), ledger.clone(), framed(), archiver.clone());

    let ticket = ctl.number_run().await.unwrap();
    assert_eq!(ticket.run_id(), 42);
    assert_eq!(ctl.state(), RunState::Starting);

    let mut scope = MockScope::new(MockScopeConfig::instant());
    let mut operator = ScriptedOperator::new().with_remarks("quiet night");
    let summary = ctl
        .run(ticket, &request(2, 3), &mut scope, &mut operator, &Interrupt::new())
        .await
        .unwrap();

    assert_eq!(summary.stop, StopReason::Completed);
    assert_eq!(summary.run.events_captured, 3);
    assert!(summary.ledger_synced);
    assert_eq!(ctl.state(), RunState::Idle);

    let path = dir.path().join("run_00042.daq");
    assert_eq!(summary.run.path, path);
    let reader = ContainerReader::open(&path).unwrap();
    assert_eq!(reader.keys(), vec![0, 1, 2]);
    assert!(reader.entries.iter().all(|e| e.event.channel_count() == 2));
    assert_eq!(reader.info.run_id, 42);
    assert_eq!(reader.torn_bytes, 0);

    let row = ledger.row(42).unwrap();
    assert_eq!(row.events, Some(3));
    assert_eq!(row.end_desc, "quiet night");
    assert_eq!(row.beam, "BEAM ON");
    assert!(row.is_closed());
    assert_eq!(archiver.submitted.lock().as_slice(), &[path]);
}

#[tokio::test]
async fn test_capture_failure_keeps_indices_dense() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    let archiver = Arc::new(RecordingArchiver::default());
    let mut ctl = controller(dir.path(), ledger.clone(), framed(), archiver);

    // second trigger loses channel 1; it is re-triggered, not skipped
    let mut scope = MockScope::new(MockScopeConfig::instant().fail_channel_on(2, 1));
    let mut operator = ScriptedOperator::new();
    let ticket = ctl.number_run().await.unwrap();
    let summary = ctl
        .run(ticket, &request(1, 5), &mut scope, &mut operator, &Interrupt::new())
        .await
        .unwrap();

    assert_eq!(summary.stop, StopReason::Completed);
    assert_eq!(summary.capture_failures, 1);
    assert_eq!(scope.triggers(), 6);

    let reader = ContainerReader::open(&summary.run.path).unwrap();
    assert_eq!(reader.keys(), vec![0, 1, 2, 3, 4]);
    assert_eq!(ledger.row(1).unwrap().events, Some(5));
}

#[tokio::test]
async fn test_interrupt_keeps_captured_events() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(MemoryLedger::with_rows(vec![ledger_row(9)]));
    let archiver = Arc::new(RecordingArchiver::default());
    let mut ctl = controller(dir.path(), ledger.clone(), framed(), archiver.clone());

    let interrupt = Interrupt::new();
    let mut scope = InterruptingScope {
        inner: MockScope::new(MockScopeConfig::instant()),
        interrupt: interrupt.clone(),
        after: 4,
        channels: 3,
    };
    let mut operator = ScriptedOperator::new();
    let ticket = ctl.number_run().await.unwrap();
    let summary = ctl
        .run(ticket, &request(3, 100), &mut scope, &mut operator, &interrupt)
        .await
        .unwrap();

    // the event in flight when the interrupt arrived is completed
    assert_eq!(summary.stop, StopReason::Interrupted);
    assert_eq!(summary.run.events_captured, 4);
    let reader = ContainerReader::open(&summary.run.path).unwrap();
    assert_eq!(reader.keys(), vec![0, 1, 2, 3]);

    let row = ledger.row(10).unwrap();
    assert_eq!(row.events, Some(4));
    assert!(row.is_closed());
    assert_eq!(archiver.submitted.lock().len(), 1);
}

#[tokio::test]
async fn test_storage_fault_ends_run_with_readable_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    let archiver = Arc::new(RecordingArchiver::default());
    let mut ctl = controller(
        dir.path(),
        ledger.clone(),
        Arc::new(TornAppendFormat { fail_at: 4 }),
        archiver,
    );

    let mut scope = MockScope::new(MockScopeConfig::instant());
    let mut operator = ScriptedOperator::new();
    let ticket = ctl.number_run().await.unwrap();
    let summary = ctl
        .run(ticket, &request(2, 10), &mut scope, &mut operator, &Interrupt::new())
        .await
        .unwrap();

    assert_eq!(summary.stop, StopReason::StorageFault);
    assert_eq!(summary.run.events_captured, 3);

    let reader = ContainerReader::open(&summary.run.path).unwrap();
    assert_eq!(reader.keys(), vec![0, 1, 2]);
    assert!(reader.torn_bytes > 0);
    assert_eq!(ledger.row(1).unwrap().events, Some(3));
}

#[tokio::test]
async fn test_unreachable_ledger_refuses_run() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    ledger.set_available(false);
    let mut ctl = controller(
        dir.path(),
        ledger.clone(),
        framed(),
        Arc::new(RecordingArchiver::default()),
    );

    let err = ctl.number_run().await.unwrap_err();
    assert!(matches!(err, RunError::Numbering(_)));
    assert_eq!(ctl.state(), RunState::Idle);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    assert!(ledger.rows().is_empty());
}

#[tokio::test]
async fn test_run_ids_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("run_ledger.csv");
    assert!(CsvLedger::new(&ledger_path).create().unwrap());

    let data = dir.path().join("data");
    let mut issued = Vec::new();
    for _ in 0..2 {
        // a fresh controller per process lifetime, sharing the table
        let ledger = Arc::new(CsvLedger::new(&ledger_path));
        let mut ctl = controller(&data, ledger, framed(), Arc::new(RecordingArchiver::default()));
        let mut scope = MockScope::new(MockScopeConfig::instant());
        let mut operator = ScriptedOperator::new();
        let ticket = ctl.number_run().await.unwrap();
        issued.push(ticket.run_id());
        ctl.run(ticket, &request(1, 2), &mut scope, &mut operator, &Interrupt::new())
            .await
            .unwrap();
    }
    assert_eq!(issued, vec![1, 2]);

    let rows = CsvLedger::new(&ledger_path).load().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.is_closed() && r.events == Some(2)));
    assert_eq!(
        CsvLedger::new(&ledger_path).last_run_number().await.unwrap(),
        2
    );
    assert!(data.join("run_00001.daq").exists());
    assert!(data.join("run_00002.daq").exists());
}

#[tokio::test]
async fn test_unrecorded_run_is_not_overwritten_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    ledger.set_fail_writes(true);

    let mut first = controller(
        dir.path(),
        ledger.clone(),
        framed(),
        Arc::new(RecordingArchiver::default()),
    );
    let mut scope = MockScope::new(MockScopeConfig::instant());
    let ticket = first.number_run().await.unwrap();
    let lost = first
        .run(ticket, &request(1, 4), &mut scope, &mut ScriptedOperator::new(), &Interrupt::new())
        .await
        .unwrap();
    assert!(!lost.ledger_synced);
    assert!(ledger.rows().is_empty());

    // ledger healthy again, new process
    ledger.set_fail_writes(false);
    let mut second = controller(
        dir.path(),
        ledger.clone(),
        framed(),
        Arc::new(RecordingArchiver::default()),
    );
    let mut scope = MockScope::new(MockScopeConfig::instant());
    let ticket = second.number_run().await.unwrap();
    assert_eq!(ticket.run_id(), lost.run.run_id + 1);
    let next = second
        .run(ticket, &request(1, 1), &mut scope, &mut ScriptedOperator::new(), &Interrupt::new())
        .await
        .unwrap();

    assert_ne!(next.run.path, lost.run.path);
    assert_eq!(ContainerReader::open(&lost.run.path).unwrap().keys(), vec![0, 1, 2, 3]);
    assert_eq!(ledger.row(next.run.run_id).unwrap().events, Some(1));
}
