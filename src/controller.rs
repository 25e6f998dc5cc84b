//! Run lifecycle controller.
//!
//! ```text
//! Idle -> Numbering -> Starting -> Acquiring -> Finalizing -> Idle
//!            |                         |  (interrupt, fault)
//!            +-> Idle (ledger down)    +-> Finalizing
//! ```
//!
//! [`RunController::number_run`] assigns the next run id from the ledger and
//! the containers already on disk, and hands out a [`RunTicket`]; [`RunController::run`] executes the numbered run
//! against an instrument the caller owns. A run that got past `Starting` is
//! always finalized: its container keeps every event appended so far and the
//! ledger receives the end columns when it is reachable.
//!
//! Event indices are dense. A failed capture does not consume an index; the
//! next trigger is stored under the same key.

use crate::archive::Archiver;
use crate::beam::{BeamStatusLookup, UNKNOWN_BEAM_TAG};
use crate::capture::capture_event;
use crate::config::{Settings, MAX_CHANNELS};
use crate::error::RunError;
use crate::instrument::Oscilloscope;
use crate::interrupt::Interrupt;
use crate::ledger::RunLedger;
use crate::operator::{Operator, Progress};
use crate::run::Run;
use crate::storage::{last_run_on_disk, run_path, ContainerFormat, ContainerInfo, EventWriter};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

/// Lifecycle state of the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Waiting for the operator
    Idle,
    /// Reading the last run number from the ledger
    Numbering,
    /// Run numbered; container, beam tag and start row come next
    Starting,
    /// Capturing and appending events
    Acquiring,
    /// Recording end fields, archival handoff and end row
    Finalizing,
}

impl RunState {
    /// State name as used in logs and `Busy` errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "Idle",
            RunState::Numbering => "Numbering",
            RunState::Starting => "Starting",
            RunState::Acquiring => "Acquiring",
            RunState::Finalizing => "Finalizing",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why acquisition stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Target event count reached
    Completed,
    /// Operator interrupt
    Interrupted,
    /// The instrument link dropped
    InstrumentLost,
    /// An append failed
    StorageFault,
    /// Too many consecutive capture failures
    CaptureFailures,
    /// The container could not be created
    OpenFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::Completed => "completed",
            StopReason::Interrupted => "interrupted by operator",
            StopReason::InstrumentLost => "instrument lost",
            StopReason::StorageFault => "storage fault",
            StopReason::CaptureFailures => "too many capture failures",
            StopReason::OpenFailed => "container could not be created",
        };
        f.write_str(text)
    }
}

/// Parameters of one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunRequest {
    /// Free-text start description, may be empty
    pub description: String,
    /// Channels C1..=Cn read per event
    pub channels: u8,
    /// Target event count
    pub events: u64,
    /// Print a summary of every stored event
    pub display: bool,
}

impl RunRequest {
    pub fn validate(&self) -> Result<(), RunError> {
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(RunError::InvalidRequest(format!(
                "channel count must be between 1 and {MAX_CHANNELS}, got {}",
                self.channels
            )));
        }
        if self.events == 0 {
            return Err(RunError::InvalidRequest(
                "event count must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Proof that a run id was assigned. Consumed by [`RunController::run`] or
/// [`RunController::abandon`].
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct RunTicket {
    run_id: u32,
}

impl RunTicket {
    pub fn run_id(&self) -> u32 {
        self.run_id
    }
}

/// Outcome of a finalized run.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub run: Run,
    pub stop: StopReason,
    /// Events dropped because a capture failed
    pub capture_failures: u64,
    /// Both ledger writes succeeded
    pub ledger_synced: bool,
}

/// Collaborators shared by every run of a session. Built once at startup.
pub struct SessionContext {
    /// Run history table
    pub ledger: Arc<dyn RunLedger>,
    /// Beam-status tag source, queried once per run
    pub beam: Arc<dyn BeamStatusLookup>,
    /// Receives every finished container
    pub archiver: Arc<dyn Archiver>,
    /// Container format of new runs
    pub format: Arc<dyn ContainerFormat>,
    /// Directory holding the run containers
    pub data_dir: PathBuf,
    /// Consecutive capture failures that end a run
    pub max_consecutive_failures: u32,
}

impl SessionContext {
    pub fn new(
        settings: &Settings,
        ledger: Arc<dyn RunLedger>,
        beam: Arc<dyn BeamStatusLookup>,
        archiver: Arc<dyn Archiver>,
        format: Arc<dyn ContainerFormat>,
    ) -> Self {
        Self {
            ledger,
            beam,
            archiver,
            format,
            data_dir: settings.storage.path.clone(),
            max_consecutive_failures: settings.acquisition.max_consecutive_failures,
        }
    }
}

pub struct RunController {
    ctx: SessionContext,
    state: RunState,
    /// Highest run id handed out by this process
    last_issued: Option<u32>,
}

impl RunController {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx,
            state: RunState::Idle,
            last_issued: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Assign the next run id: one above the ledger's last run, any container
    /// already in the data directory and any id this process issued. Fails
    /// closed when the ledger is down.
    pub async fn number_run(&mut self) -> Result<RunTicket, RunError> {
        if self.state != RunState::Idle {
            return Err(RunError::Busy(self.state.as_str()));
        }
        self.state = RunState::Numbering;

        let last = match self.ctx.ledger.last_run_number().await {
            Ok(last) => last,
            Err(e) => {
                self.state = RunState::Idle;
                warn!(error = %e, "run numbering failed");
                return Err(RunError::Numbering(e));
            }
        };
        let on_disk = match last_run_on_disk(&self.ctx.data_dir) {
            Ok(on_disk) => on_disk,
            Err(e) => {
                self.state = RunState::Idle;
                warn!(error = %e, "run numbering failed");
                return Err(RunError::DataDir(e));
            }
        };
        let run_id = last.max(on_disk).max(self.last_issued.unwrap_or(0)) + 1;
        self.last_issued = Some(run_id);
        self.state = RunState::Starting;
        info!(run_id, ledger_last = last, on_disk, "run numbered");
        Ok(RunTicket { run_id })
    }

    /// Give up a numbered run before it starts. Its id is not reused.
    pub fn abandon(&mut self, ticket: RunTicket) {
        info!(run_id = ticket.run_id, "numbered run abandoned");
        self.state = RunState::Idle;
    }

    /// Execute a numbered run to completion, interruption or fault.
    pub async fn run(
        &mut self,
        ticket: RunTicket,
        request: &RunRequest,
        scope: &mut dyn Oscilloscope,
        operator: &mut dyn Operator,
        interrupt: &Interrupt,
    ) -> Result<RunSummary, RunError> {
        if self.state != RunState::Starting {
            return Err(RunError::Busy(self.state.as_str()));
        }
        if let Err(e) = request.validate() {
            self.state = RunState::Idle;
            return Err(e);
        }

        let span = info_span!("run", run_id = ticket.run_id);
        let summary = self
            .execute(ticket.run_id, request, scope, operator, interrupt)
            .instrument(span)
            .await;
        self.state = RunState::Idle;
        Ok(summary)
    }

    async fn execute(
        &mut self,
        run_id: u32,
        request: &RunRequest,
        scope: &mut dyn Oscilloscope,
        operator: &mut dyn Operator,
        interrupt: &Interrupt,
    ) -> RunSummary {
        let mut listener = interrupt.listener();

        // Starting
        let path = run_path(&self.ctx.data_dir, run_id, self.ctx.format.as_ref());
        let mut run = Run::new(
            run_id,
            request.description.clone(),
            request.channels,
            request.events,
            path.clone(),
        );
        let info = ContainerInfo::new(run_id, request.channels, request.events);
        let writer = match self.ctx.format.open_fresh(&path, &info).await {
            Ok(writer) => {
                operator.notice(&format!("Writing on new file: {}", path.display()));
                Some(writer)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot create run container");
                operator.notice(&format!("Cannot create {}: {e}", path.display()));
                None
            }
        };

        run.beam_tag = match self.ctx.beam.beam_tag().await {
            Ok(tag) => tag,
            Err(e) => {
                warn!(error = %e, "beam status unavailable");
                operator.notice(&format!("Beam status unavailable ({e}), recorded as {UNKNOWN_BEAM_TAG}"));
                UNKNOWN_BEAM_TAG.to_string()
            }
        };
        run.mark_started();
        let mut start_row_written = self.write_start_row(&run, operator).await;

        // Acquiring
        let (stop, capture_failures) = match writer {
            Some(mut writer) => {
                self.state = RunState::Acquiring;
                let outcome = self
                    .acquire(&mut run, request, scope, writer.as_mut(), operator, &mut listener)
                    .await;
                if let Err(e) = writer.close().await {
                    warn!(error = %e, "closing run container failed");
                    operator.notice(&format!("Closing {} failed: {e}", run.filename));
                }
                outcome
            }
            None => (StopReason::OpenFailed, 0),
        };

        // Finalizing
        self.state = RunState::Finalizing;
        operator.notice(&format!(
            "\n-------> DAQ acquisition of RUN {run_id:05} {stop} ({} events)",
            run.events_captured
        ));
        let remarks = operator.closing_remarks().await;
        run.mark_finished(remarks);

        if stop != StopReason::OpenFailed {
            operator.notice("Uploading file in background...");
            self.ctx.archiver.submit(&run.path);
        }

        if !start_row_written {
            start_row_written = self.write_start_row(&run, operator).await;
        }
        let ledger_synced = start_row_written && self.write_end_row(&run, operator).await;

        info!(
            events = run.events_captured,
            failures = capture_failures,
            %stop,
            ledger_synced,
            "run finalized"
        );
        RunSummary {
            run,
            stop,
            capture_failures,
            ledger_synced,
        }
    }

    async fn acquire(
        &self,
        run: &mut Run,
        request: &RunRequest,
        scope: &mut dyn Oscilloscope,
        writer: &mut dyn EventWriter,
        operator: &mut dyn Operator,
        listener: &mut crate::interrupt::InterruptListener,
    ) -> (StopReason, u64) {
        let started = Instant::now();
        let mut progress = Progress {
            run_id: run.run_id,
            events: 0,
            target: request.events,
            elapsed: std::time::Duration::ZERO,
            last_append: std::time::Duration::ZERO,
        };
        let mut failures = 0u64;
        let mut consecutive = 0u32;

        operator.progress(&progress);
        while run.events_captured < request.events {
            if listener.is_triggered() {
                return (StopReason::Interrupted, failures);
            }

            let index = run.events_captured;
            let event = match capture_event(scope, request.channels, listener).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    operator.notice("stopping DAQ...");
                    return (StopReason::Interrupted, failures);
                }
                Err(e) if e.is_disconnect() => {
                    error!(index, error = %e, "instrument lost");
                    operator.notice(&format!("Instrument lost: {e}"));
                    return (StopReason::InstrumentLost, failures);
                }
                Err(e) => {
                    failures += 1;
                    consecutive += 1;
                    warn!(index, consecutive, error = %e, "event dropped");
                    operator.notice(&format!("Event {index} dropped: {e}"));
                    if consecutive >= self.ctx.max_consecutive_failures {
                        operator.notice(&format!(
                            "{consecutive} consecutive capture failures, check the channel configuration"
                        ));
                        return (StopReason::CaptureFailures, failures);
                    }
                    continue;
                }
            };
            consecutive = 0;

            let append_started = Instant::now();
            if let Err(e) = writer.append(index, &event).await {
                error!(index, error = %e, "append failed");
                operator.notice(&format!("Storing event {index} failed: {e}"));
                return (StopReason::StorageFault, failures);
            }
            run.events_captured += 1;

            if request.display {
                operator.show_event(index, &event);
            }
            progress.events = run.events_captured;
            progress.elapsed = started.elapsed();
            progress.last_append = append_started.elapsed();
            operator.progress(&progress);
        }
        (StopReason::Completed, failures)
    }

    async fn write_start_row(&self, run: &Run, operator: &mut dyn Operator) -> bool {
        match self.ctx.ledger.append_start_row(&run.start_row()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "ledger start row not written");
                operator.notice(&format!("Ledger start row not written: {e}"));
                false
            }
        }
    }

    async fn write_end_row(&self, run: &Run, operator: &mut dyn Operator) -> bool {
        let Some(end) = run.end_fields() else {
            return false;
        };
        operator.notice("Updating logbook...");
        match self.ctx.ledger.update_end_row(run.run_id, &end).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "ledger end row not written");
                operator.notice(&format!("Ledger end row not written: {e}"));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beam::FixedBeamTag;
    use crate::error::{LedgerError, LookupError};
    use crate::instrument::mock::{MockScope, MockScopeConfig};
    use crate::ledger::memory::MemoryLedger;
    use crate::ledger::testing::row;
    use crate::ledger::{EndFields, LedgerRow};
    use crate::operator::ScriptedOperator;
    use crate::storage::framed::{ContainerReader, FramedFormat};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct RecordingArchiver(Mutex<Vec<PathBuf>>);

    impl Archiver for RecordingArchiver {
        fn submit(&self, path: &Path) {
            self.0.lock().push(path.to_path_buf());
        }
    }

    struct FailingLookup;

    #[async_trait]
    impl BeamStatusLookup for FailingLookup {
        async fn beam_tag(&self) -> Result<String, LookupError> {
            Err(LookupError::Missing("BTFDATA_PADME".into()))
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        ledger: Arc<MemoryLedger>,
        archiver: Arc<RecordingArchiver>,
    }

    impl Fixture {
        fn new(last_run: u32) -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                ledger: Arc::new(MemoryLedger::with_rows(vec![row(last_run)])),
                archiver: Arc::new(RecordingArchiver::default()),
            }
        }

        fn controller(&self, beam: Arc<dyn BeamStatusLookup>) -> RunController {
            RunController::new(SessionContext {
                ledger: self.ledger.clone(),
                beam,
                archiver: self.archiver.clone(),
                format: Arc::new(FramedFormat),
                data_dir: self.dir.path().to_path_buf(),
                max_consecutive_failures: 3,
            })
        }
    }

    fn request(channels: u8, events: u64) -> RunRequest {
        RunRequest {
            description: "test".into(),
            channels,
            events,
            display: false,
        }
    }

    #[tokio::test]
    async fn test_run_stores_all_events() {
        let fx = Fixture::new(41);
        let mut controller = fx.controller(Arc::new(FixedBeamTag("BEAM ON".into())));
        let mut scope = MockScope::new(MockScopeConfig::instant());
        let mut operator = ScriptedOperator::new().with_remarks("fine");
        let interrupt = Interrupt::new();

        let ticket = controller.number_run().await.unwrap();
        assert_eq!(ticket.run_id(), 42);
        assert_eq!(controller.state(), RunState::Starting);

        let summary = controller
            .run(ticket, &request(2, 3), &mut scope, &mut operator, &interrupt)
            .await
            .unwrap();
        assert_eq!(controller.state(), RunState::Idle);
        assert_eq!(summary.stop, StopReason::Completed);
        assert!(summary.ledger_synced);

        let reader = ContainerReader::open(&summary.run.path).unwrap();
        assert_eq!(reader.keys(), vec![0, 1, 2]);
        assert!(reader.entries.iter().all(|e| e.event.channel_count() == 2));

        let ledger_row = fx.ledger.row(42).unwrap();
        assert_eq!(ledger_row.events, Some(3));
        assert_eq!(ledger_row.beam, "BEAM ON");
        assert_eq!(ledger_row.end_desc, "fine");
        assert_eq!(ledger_row.filename, "run_00042.daq");
        assert_eq!(fx.archiver.0.lock().as_slice(), &[summary.run.path.clone()]);
        assert_eq!(operator.progress.last().unwrap().events, 3);
    }

    #[tokio::test]
    async fn test_numbering_fails_closed() {
        let fx = Fixture::new(10);
        fx.ledger.set_available(false);
        let mut controller = fx.controller(Arc::new(FixedBeamTag("x".into())));

        let err = controller.number_run().await.unwrap_err();
        assert!(matches!(err, RunError::Numbering(_)));
        assert_eq!(controller.state(), RunState::Idle);

        fx.ledger.set_available(true);
        assert_eq!(controller.number_run().await.unwrap().run_id(), 11);
    }

    #[tokio::test]
    async fn test_abandoned_id_is_not_reused() {
        let fx = Fixture::new(5);
        let mut controller = fx.controller(Arc::new(FixedBeamTag("x".into())));

        let ticket = controller.number_run().await.unwrap();
        assert!(matches!(
            controller.number_run().await,
            Err(RunError::Busy("Starting"))
        ));
        controller.abandon(ticket);
        assert_eq!(controller.number_run().await.unwrap().run_id(), 7);
    }

    #[tokio::test]
    async fn test_beam_lookup_failure_is_recorded_unknown() {
        let fx = Fixture::new(0);
        let mut controller = fx.controller(Arc::new(FailingLookup));
        let mut scope = MockScope::new(MockScopeConfig::instant());
        let mut operator = ScriptedOperator::new();

        let ticket = controller.number_run().await.unwrap();
        let summary = controller
            .run(ticket, &request(1, 1), &mut scope, &mut operator, &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(summary.run.beam_tag, UNKNOWN_BEAM_TAG);
        assert_eq!(summary.stop, StopReason::Completed);
        assert!(operator.notices.iter().any(|n| n.contains("Beam status unavailable")));
    }

    #[tokio::test]
    async fn test_failed_captures_keep_indices_dense() {
        let fx = Fixture::new(0);
        let mut controller = fx.controller(Arc::new(FixedBeamTag("x".into())));
        // trigger 2 is the second event attempt
        let mut scope = MockScope::new(MockScopeConfig::instant().fail_channel_on(2, 1));
        let mut operator = ScriptedOperator::new();

        let ticket = controller.number_run().await.unwrap();
        let summary = controller
            .run(ticket, &request(2, 5), &mut scope, &mut operator, &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(summary.capture_failures, 1);
        assert_eq!(summary.run.events_captured, 5);
        let reader = ContainerReader::open(&summary.run.path).unwrap();
        assert_eq!(reader.keys(), vec![0, 1, 2, 3, 4]);
        assert_eq!(scope.triggers(), 6);
    }

    #[tokio::test]
    async fn test_persistent_capture_failures_end_run() {
        let fx = Fixture::new(0);
        let mut controller = fx.controller(Arc::new(FixedBeamTag("x".into())));
        let config = (2..=10).fold(MockScopeConfig::instant(), |c, t| c.fail_channel_on(t, 2));
        let mut scope = MockScope::new(config);
        let mut operator = ScriptedOperator::new();

        let ticket = controller.number_run().await.unwrap();
        let summary = controller
            .run(ticket, &request(2, 10), &mut scope, &mut operator, &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(summary.stop, StopReason::CaptureFailures);
        assert_eq!(summary.run.events_captured, 1);
        assert_eq!(summary.capture_failures, 3);
        assert_eq!(fx.ledger.row(1).unwrap().events, Some(1));
    }

    #[tokio::test]
    async fn test_disconnect_finalizes_partial_run() {
        let fx = Fixture::new(0);
        let mut controller = fx.controller(Arc::new(FixedBeamTag("x".into())));
        let mut scope = MockScope::new(MockScopeConfig::instant().disconnect_after(4));
        let mut operator = ScriptedOperator::new();

        let ticket = controller.number_run().await.unwrap();
        let summary = controller
            .run(ticket, &request(1, 10), &mut scope, &mut operator, &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(summary.stop, StopReason::InstrumentLost);
        assert_eq!(summary.run.events_captured, 4);
        assert_eq!(ContainerReader::open(&summary.run.path).unwrap().len(), 4);
        assert_eq!(fx.ledger.row(1).unwrap().events, Some(4));
    }

    /// Rejects the first start-row write, then behaves.
    struct FlakyLedger {
        inner: MemoryLedger,
        start_failures: AtomicU32,
    }

    #[async_trait]
    impl RunLedger for FlakyLedger {
        async fn last_run_number(&self) -> Result<u32, LedgerError> {
            self.inner.last_run_number().await
        }

        async fn append_start_row(&self, row: &LedgerRow) -> Result<(), LedgerError> {
            if self.start_failures.load(Ordering::SeqCst) > 0 {
                self.start_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(LedgerError::Unavailable("timeout".into()));
            }
            self.inner.append_start_row(row).await
        }

        async fn update_end_row(&self, run: u32, end: &EndFields) -> Result<(), LedgerError> {
            self.inner.update_end_row(run, end).await
        }
    }

    #[tokio::test]
    async fn test_start_row_retried_at_finalizing() {
        let fx = Fixture::new(3);
        let ledger = Arc::new(FlakyLedger {
            inner: MemoryLedger::with_rows(vec![row(3)]),
            start_failures: AtomicU32::new(1),
        });
        let mut controller = RunController::new(SessionContext {
            ledger: ledger.clone(),
            beam: Arc::new(FixedBeamTag("x".into())),
            archiver: fx.archiver.clone(),
            format: Arc::new(FramedFormat),
            data_dir: fx.dir.path().to_path_buf(),
            max_consecutive_failures: 3,
        });
        let mut scope = MockScope::new(MockScopeConfig::instant());
        let mut operator = ScriptedOperator::new();

        let ticket = controller.number_run().await.unwrap();
        let summary = controller
            .run(ticket, &request(1, 2), &mut scope, &mut operator, &Interrupt::new())
            .await
            .unwrap();

        assert!(summary.ledger_synced);
        assert_eq!(ledger.inner.row(4).unwrap().events, Some(2));
        assert!(operator
            .notices
            .iter()
            .any(|n| n.contains("Ledger start row not written")));
    }

    #[tokio::test]
    async fn test_end_row_failure_keeps_data() {
        let fx = Fixture::new(0);
        let mut controller = fx.controller(Arc::new(FixedBeamTag("x".into())));
        let mut scope = MockScope::new(MockScopeConfig::instant());
        let mut operator = ScriptedOperator::new();

        let ticket = controller.number_run().await.unwrap();
        fx.ledger.set_fail_writes(true);
        let summary = controller
            .run(ticket, &request(1, 2), &mut scope, &mut operator, &Interrupt::new())
            .await
            .unwrap();

        assert!(!summary.ledger_synced);
        assert_eq!(summary.stop, StopReason::Completed);
        assert_eq!(ContainerReader::open(&summary.run.path).unwrap().len(), 2);
        assert!(fx.ledger.row(1).is_none());
        assert_eq!(controller.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn test_invalid_request_returns_to_idle() {
        let fx = Fixture::new(0);
        let mut controller = fx.controller(Arc::new(FixedBeamTag("x".into())));
        let mut scope = MockScope::new(MockScopeConfig::instant());
        let mut operator = ScriptedOperator::new();

        let ticket = controller.number_run().await.unwrap();
        let err = controller
            .run(ticket, &request(9, 1), &mut scope, &mut operator, &Interrupt::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::InvalidRequest(_)));
        assert_eq!(controller.state(), RunState::Idle);
    }
}
