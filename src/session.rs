//! Interactive acquisition session.
//!
//! Connects to the instrument, then loops: wait for the operator, number a
//! run, ask for its parameters, execute it. Run-level failures return to the
//! start prompt; only an operator interrupt at the start prompt or while
//! connecting ends the session. When a run ends because the instrument link
//! dropped, the session reconnects before offering the next run.

use crate::clock::Clock;
use crate::config::Settings;
use crate::controller::{RunController, RunRequest, RunSummary, StopReason};
use crate::instrument::{connect_with_retry, Connection, ScopeConnector};
use crate::interrupt::Interrupt;
use crate::operator::Operator;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What happened during a session.
#[derive(Debug, Default)]
pub struct SessionReport {
    pub runs: Vec<RunSummary>,
    pub connections: u32,
    /// Runs that could not be numbered or started
    pub refused: u32,
}

pub struct Session {
    controller: RunController,
    connector: Arc<dyn ScopeConnector>,
    clock: Arc<dyn Clock>,
    interrupt: Interrupt,
    address: String,
    retry_interval: Duration,
    default_channels: u8,
    default_events: u64,
    display: bool,
}

impl Session {
    pub fn new(
        settings: &Settings,
        controller: RunController,
        connector: Arc<dyn ScopeConnector>,
        clock: Arc<dyn Clock>,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            controller,
            connector,
            clock,
            interrupt,
            address: settings.instrument.address.clone(),
            retry_interval: settings.instrument.connect_retry(),
            default_channels: settings.acquisition.channels,
            default_events: settings.acquisition.events,
            display: settings.acquisition.display,
        }
    }

    pub fn controller(&self) -> &RunController {
        &self.controller
    }

    /// Connect, retrying until the instrument answers. `None` if the operator
    /// interrupts the wait.
    async fn connect(&self, operator: &mut dyn Operator) -> Option<Connection> {
        let mut listener = self.interrupt.listener();
        let connecting = connect_with_retry(
            self.connector.as_ref(),
            &self.address,
            self.retry_interval,
            self.clock.as_ref(),
            |attempt, waited| operator.connecting(attempt, waited),
        );
        let connection = tokio::select! {
            _ = listener.triggered() => None,
            connection = connecting => Some(connection),
        }?;
        operator.notice(&format!("Connected {}", connection.identity));
        Some(connection)
    }

    pub async fn run(&mut self, operator: &mut dyn Operator) -> SessionReport {
        let mut report = SessionReport::default();
        let Some(mut connection) = self.connect(operator).await else {
            operator.notice("\nDAQ STOP");
            return report;
        };
        report.connections += 1;

        while operator.ready_to_start().await {
            let ticket = match self.controller.number_run().await {
                Ok(ticket) => ticket,
                Err(e) => {
                    report.refused += 1;
                    operator.notice(&format!("Run not started: {e}"));
                    continue;
                }
            };

            let Some(params) = operator
                .run_parameters(ticket.run_id(), self.default_channels, self.default_events)
                .await
            else {
                self.controller.abandon(ticket);
                continue;
            };
            let request = RunRequest {
                description: params.description,
                channels: params.channels,
                events: params.events,
                display: self.display,
            };

            let summary = match self
                .controller
                .run(
                    ticket,
                    &request,
                    connection.scope.as_mut(),
                    operator,
                    &self.interrupt,
                )
                .await
            {
                Ok(summary) => summary,
                Err(e) => {
                    report.refused += 1;
                    operator.notice(&format!("Run not started: {e}"));
                    continue;
                }
            };
            operator.notice(&format!("\n-------> RUN {} ACQUIRED", summary.run.filename));
            let lost = summary.stop == StopReason::InstrumentLost;
            report.runs.push(summary);

            if lost {
                warn!("instrument lost, reconnecting");
                operator.notice("Reconnecting to the instrument...");
                match self.connect(operator).await {
                    Some(fresh) => {
                        connection = fresh;
                        report.connections += 1;
                    }
                    None => break,
                }
            }
        }

        info!(runs = report.runs.len(), "session ended");
        operator.notice("\nDAQ STOP");
        report
    }
}
