// Plain-text rendering of session updates: one line per timeline event,
// connection and status changes, and the aggregates once the debate ends.

use std::collections::HashSet;
use std::io::Write;

use colloquy_core::aggregate::{Aggregates, Vote, VoteBasis};
use colloquy_core::event::CanonicalEvent;
use colloquy_core::protocol::{ConnectionView, DebateStatus};
use colloquy_stream::protocol::{SessionCommand, SessionSnapshot, UiUpdate};
use tokio::sync::mpsc;
use tracing::debug;

/// Local mirror of the session state, fed by [`UiUpdate`]s.
pub struct Printer {
    vote_threshold: f64,
    snapshot: SessionSnapshot,
    printed: HashSet<String>,
    finished: bool,
}

impl Printer {
    pub fn new(vote_threshold: f64) -> Self {
        Self {
            vote_threshold,
            snapshot: SessionSnapshot::default(),
            printed: HashSet::new(),
            finished: false,
        }
    }

    /// Whether the debate reached a terminal status.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Apply one update and return the lines it produces.
    pub fn handle(&mut self, update: UiUpdate) -> Vec<String> {
        let mut lines = Vec::new();
        match update {
            UiUpdate::Snapshot(snapshot) => {
                if snapshot.debate_id.is_none() {
                    // Torn down.
                    self.snapshot = *snapshot;
                    return lines;
                }
                if snapshot.debate_id != self.snapshot.debate_id {
                    self.printed.clear();
                    self.finished = false;
                    if let Some(id) = &snapshot.debate_id {
                        lines.push(format!("== debate {id} =="));
                    }
                }
                if snapshot.prompt.is_some() && snapshot.prompt != self.snapshot.prompt {
                    lines.push(format!("prompt: {}", snapshot.prompt.as_deref().unwrap_or_default()));
                }
                for event in &snapshot.events {
                    if self.printed.insert(event.id().to_string()) {
                        lines.push(format_event(event));
                    }
                }
                let terminal = snapshot.status.is_terminal();
                self.snapshot = *snapshot;
                if terminal {
                    self.finish(&mut lines);
                }
            }
            UiUpdate::EventAppended(event) => {
                if self.printed.insert(event.id().to_string()) {
                    lines.push(format_event(&event));
                }
                self.snapshot.events.push(event);
            }
            UiUpdate::Connection(view) => {
                self.snapshot.connection = view;
                lines.push(format_connection(view));
            }
            UiUpdate::Status(status) => {
                self.snapshot.status = status;
                lines.push(format!("-- status: {}", status.label()));
                if status.is_terminal() {
                    self.finish(&mut lines);
                }
            }
            UiUpdate::Diagnostic(message) => lines.push(format!("!! {message}")),
        }
        lines
    }

    fn finish(&mut self, lines: &mut Vec<String>) {
        if self.finished {
            return;
        }
        self.finished = true;
        if self.snapshot.status == DebateStatus::Failed {
            lines.push("-- debate failed".to_string());
        }
        lines.extend(format_aggregates(&self.snapshot.aggregates(self.vote_threshold)));
    }
}

/// Print updates until the session drops its sender. Once the debate ends
/// the session is asked to quit.
pub async fn run(
    printer: &mut Printer,
    mut ui_rx: mpsc::Receiver<UiUpdate>,
    cmd_tx: mpsc::Sender<SessionCommand>,
) -> anyhow::Result<()> {
    let mut quit_sent = false;
    while let Some(update) = ui_rx.recv().await {
        let lines = printer.handle(update);
        let mut out = std::io::stdout().lock();
        for line in lines {
            writeln!(out, "{line}")?;
        }
        out.flush()?;
        drop(out);

        if printer.finished() && !quit_sent {
            debug!("debate finished, stopping session");
            quit_sent = true;
            let _ = cmd_tx.send(SessionCommand::Quit).await;
        }
    }
    Ok(())
}

pub fn format_event(event: &CanonicalEvent) -> String {
    format!("{} {}", event.at().format("%H:%M:%S"), event.summary())
}

pub fn format_connection(view: ConnectionView) -> String {
    let mut line = format!("-- connection: {}", view.status.label());
    if view.retry_count > 0 {
        line.push_str(&format!(" (retry {})", view.retry_count));
    }
    if view.polling {
        line.push_str(", polling");
    } else if view.unstable {
        line.push_str(", unstable");
    }
    line
}

pub fn format_aggregates(aggregates: &Aggregates) -> Vec<String> {
    let mut lines = Vec::new();

    if !aggregates.scores.is_empty() {
        lines.push("scores:".to_string());
        for item in &aggregates.scores {
            let mut line = format!("  {:<16} {:>6.2}  ({} judged)", item.persona, item.score, item.count);
            if let Some(rationale) = &item.rationale {
                line.push_str(&format!("  {rationale}"));
            }
            lines.push(line);
        }
    }

    if !aggregates.ranking.is_empty() {
        lines.push(format!("ranking: {}", aggregates.ranking.join(" > ")));
    }

    if !aggregates.flow.records.is_empty() {
        let basis = match aggregates.flow.basis {
            VoteBasis::Pairwise => "pairwise",
            VoteBasis::Threshold => "threshold",
        };
        lines.push(format!("votes ({basis}):"));

        // Aye/nay tally per persona, in first-seen order.
        let mut tally: Vec<(&str, usize, usize)> = Vec::new();
        for record in &aggregates.flow.records {
            let idx = match tally.iter().position(|(p, _, _)| *p == record.persona) {
                Some(idx) => idx,
                None => {
                    tally.push((record.persona.as_str(), 0, 0));
                    tally.len() - 1
                }
            };
            match record.vote {
                Vote::Aye => tally[idx].1 += 1,
                Vote::Nay => tally[idx].2 += 1,
            }
        }
        for (persona, ayes, nays) in tally {
            lines.push(format!("  {persona:<16} {ayes} aye / {nays} nay"));
        }
    }

    lines
}
