//! Operator-facing console.
//!
//! The session talks to the operator through [`Operator`]: line prompts for
//! run parameters, a live progress line while acquiring and short notices for
//! every recoverable condition. [`TerminalOperator`] implements it over any
//! line reader and writer; the binary wires it to stdin/stdout.
//!
//! Logging goes to stderr through `tracing`; this module owns stdout.

use crate::capture::Event;
use crate::config::MAX_CHANNELS;
use crate::interrupt::{Interrupt, InterruptListener};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};

/// Live acquisition counters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Progress {
    pub run_id: u32,
    pub events: u64,
    pub target: u64,
    pub elapsed: Duration,
    /// Duration of the last append to the container
    pub last_append: Duration,
}

impl Progress {
    /// Stored events per second.
    pub fn trigger_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if self.events == 0 || secs <= 0.0 {
            0.0
        } else {
            self.events as f64 / secs
        }
    }
}

/// What the operator asked for at the run prompt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunParameters {
    pub description: String,
    pub channels: u8,
    pub events: u64,
}

#[async_trait]
pub trait Operator: Send {
    /// Wait for the go-ahead. `false` means the operator wants to exit.
    async fn ready_to_start(&mut self) -> bool;

    /// Ask for run description, channel count and event count.
    /// `None` when the operator aborts the prompt.
    async fn run_parameters(
        &mut self,
        run_id: u32,
        default_channels: u8,
        default_events: u64,
    ) -> Option<RunParameters>;

    /// Optional remarks stored with the end of the run.
    async fn closing_remarks(&mut self) -> String;

    fn connecting(&mut self, attempt: u32, waited: Duration);

    fn progress(&mut self, progress: &Progress);

    fn show_event(&mut self, index: u64, event: &Event);

    fn notice(&mut self, message: &str);
}

/// Console operator over a line reader and a writer.
pub struct TerminalOperator<R, W> {
    lines: Lines<R>,
    out: W,
    interrupt: Interrupt,
    progress_shown: bool,
}

impl TerminalOperator<BufReader<Stdin>, std::io::Stdout> {
    pub fn stdio(interrupt: Interrupt) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), std::io::stdout(), interrupt)
    }
}

impl<R, W> TerminalOperator<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: Write + Send,
{
    pub fn new(input: R, out: W, interrupt: Interrupt) -> Self {
        Self {
            lines: input.lines(),
            out,
            interrupt,
            progress_shown: false,
        }
    }

    pub fn into_output(self) -> W {
        self.out
    }

    fn say(&mut self, text: &str) {
        if self.progress_shown {
            self.progress_shown = false;
            let _ = writeln!(self.out);
        }
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }

    /// Print `prompt` and read one line. `None` on interrupt or end of input.
    async fn ask(&mut self, prompt: &str) -> Option<String> {
        if self.progress_shown {
            self.progress_shown = false;
            let _ = writeln!(self.out);
        }
        let _ = write!(self.out, "{prompt}");
        let _ = self.out.flush();

        let mut listener: InterruptListener = self.interrupt.listener();
        tokio::select! {
            _ = listener.triggered() => None,
            line = self.lines.next_line() => line.ok().flatten().map(|l| l.trim().to_string()),
        }
    }

    async fn ask_number<T>(&mut self, prompt: &str, default: T, valid: impl Fn(&T) -> bool) -> Option<T>
    where
        T: std::str::FromStr + std::fmt::Display + Copy + Send,
    {
        let answer = self.ask(&format!("{prompt} [{default}] ")).await?;
        if answer.is_empty() {
            return Some(default);
        }
        match answer.parse::<T>() {
            Ok(value) if valid(&value) => Some(value),
            _ => {
                self.say(&format!("Invalid value '{answer}', using {default}"));
                Some(default)
            }
        }
    }
}

#[async_trait]
impl<R, W> Operator for TerminalOperator<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: Write + Send,
{
    async fn ready_to_start(&mut self) -> bool {
        self.ask("\nPress Enter to start/continue, Ctrl-C to exit ")
            .await
            .is_some()
    }

    async fn run_parameters(
        &mut self,
        run_id: u32,
        default_channels: u8,
        default_events: u64,
    ) -> Option<RunParameters> {
        self.say(&format!("\n-------> DAQ ready to acquire run number: {run_id:05}"));
        let description = self.ask("Enter run description? (if any) ").await?;
        let channels = self
            .ask_number("Number of channels:", default_channels, |c| {
                (1..=MAX_CHANNELS).contains(c)
            })
            .await?;
        let events = self
            .ask_number("Number of events:", default_events, |e| *e > 0)
            .await?;
        Some(RunParameters {
            description,
            channels,
            events,
        })
    }

    async fn closing_remarks(&mut self) -> String {
        self.ask("Enter closing remarks? (if any) ")
            .await
            .unwrap_or_default()
    }

    fn connecting(&mut self, attempt: u32, waited: Duration) {
        let _ = write!(
            self.out,
            "\rwaiting for connection... {}s (attempt {attempt})",
            waited.as_secs()
        );
        let _ = self.out.flush();
        self.progress_shown = true;
    }

    fn progress(&mut self, p: &Progress) {
        let _ = write!(
            self.out,
            "\rTriggers acquired: {}/{}, elapsed {:.1} s, Tr Hz: {:.1}, storing time: {:.3} s",
            p.events,
            p.target,
            p.elapsed.as_secs_f64(),
            p.trigger_rate(),
            p.last_append.as_secs_f64()
        );
        let _ = self.out.flush();
        self.progress_shown = true;
    }

    fn show_event(&mut self, index: u64, event: &Event) {
        self.say(&format!("event {index}:"));
        for capture in &event.channels {
            let (lo, hi) = capture
                .waveforms
                .iter()
                .filter_map(|w| w.amplitude_range())
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (a, b)| {
                    (lo.min(a), hi.max(b))
                });
            self.say(&format!(
                "  C{}: {} segment(s), {} samples, amplitude {:.2} .. {:.2} mV",
                capture.channel,
                capture.waveforms.len(),
                capture.sample_count(),
                lo * 1e3,
                hi * 1e3
            ));
        }
    }

    fn notice(&mut self, message: &str) {
        self.say(message);
    }
}

/// Non-interactive operator: answers from a script and records output.
///
/// Used by tests and unattended runs.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    /// Answers to successive run prompts; the session stops when exhausted
    pub runs: VecDeque<RunParameters>,
    pending: Option<RunParameters>,
    pub remarks: String,
    pub notices: Vec<String>,
    pub progress: Vec<Progress>,
    pub shown_events: Vec<u64>,
    pub connect_attempts: u32,
}

impl ScriptedOperator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run(mut self, description: &str, channels: u8, events: u64) -> Self {
        self.runs.push_back(RunParameters {
            description: description.to_string(),
            channels,
            events,
        });
        self
    }

    pub fn with_remarks(mut self, remarks: &str) -> Self {
        self.remarks = remarks.to_string();
        self
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn ready_to_start(&mut self) -> bool {
        self.pending = self.runs.pop_front();
        self.pending.is_some()
    }

    async fn run_parameters(&mut self, _run_id: u32, _channels: u8, _events: u64) -> Option<RunParameters> {
        self.pending.take()
    }

    async fn closing_remarks(&mut self) -> String {
        self.remarks.clone()
    }

    fn connecting(&mut self, attempt: u32, _waited: Duration) {
        self.connect_attempts = attempt;
    }

    fn progress(&mut self, progress: &Progress) {
        self.progress.push(*progress);
    }

    fn show_event(&mut self, index: u64, _event: &Event) {
        self.shown_events.push(index);
    }

    fn notice(&mut self, message: &str) {
        tracing::debug!(message, "operator notice");
        self.notices.push(message.to_string());
    }
}
