//! Progress rendering for the terminal
//!
//! Snapshots come from [`ProgressAggregator`]; this module only draws them:
//! an `indicatif` board with one bar per worker plus an overall bar, and a
//! one-shot `comfy-table` summary for `polish status`.

use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use polish_core::{FragmentId, ProgressAggregator, ProgressSnapshot, WorkerState, WorkerStatus};
use std::collections::BTreeMap;
use std::time::Duration;

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

/// Live bars for every worker plus the overall total
pub struct ProgressBoard {
    _multi: MultiProgress,
    overall: ProgressBar,
    workers: BTreeMap<FragmentId, ProgressBar>,
}

impl ProgressBoard {
    pub fn new(snapshot: &ProgressSnapshot) -> Self {
        let multi = MultiProgress::new();

        let workers = snapshot
            .workers
            .values()
            .map(|status| {
                let bar = multi.add(ProgressBar::new(status.total as u64));
                bar.set_style(bar_style(
                    "{prefix:>10} [{wide_bar:.cyan/blue}] {pos}/{len} {msg}",
                ));
                bar.set_prefix(format!("worker {}", status.fragment_id));
                (status.fragment_id, bar)
            })
            .collect();

        let overall = multi.add(ProgressBar::new(snapshot.total as u64));
        overall.set_style(bar_style(
            "{prefix:>10} [{wide_bar:.green}] {pos}/{len} ({percent}%) [{elapsed_precise}]",
        ));
        overall.set_prefix("overall");

        let board = Self {
            _multi: multi,
            overall,
            workers,
        };
        board.update(snapshot);
        board
    }

    pub fn update(&self, snapshot: &ProgressSnapshot) {
        for (id, status) in &snapshot.workers {
            if let Some(bar) = self.workers.get(id) {
                bar.set_position(status.processed as u64);
                bar.set_message(worker_message(status));
            }
        }
        self.overall.set_position(snapshot.processed as u64);
    }

    pub fn finish(&self) {
        for bar in self.workers.values() {
            bar.finish();
        }
        self.overall.finish();
    }

    pub fn abandon(&self) {
        for bar in self.workers.values() {
            bar.abandon();
        }
        self.overall.abandon();
    }
}

fn worker_message(status: &WorkerStatus) -> String {
    let state = state_label(status.state);
    if status.error_count > 0 {
        format!("{} ({} errors)", state, status.error_count)
    } else {
        state
    }
}

fn state_label(state: WorkerState) -> String {
    match state {
        WorkerState::Idle => state.as_str().dimmed().to_string(),
        WorkerState::Processing => state.as_str().cyan().to_string(),
        WorkerState::Completed => state.as_str().green().to_string(),
        WorkerState::Stalled => "STALLED".red().bold().to_string(),
    }
}

/// Poll on a fixed interval and redraw until every worker completes
pub async fn watch(aggregator: &ProgressAggregator, interval: Duration) -> ProgressSnapshot {
    let mut ticker = tokio::time::interval(interval);
    let first = aggregator.poll();
    let board = ProgressBoard::new(&first);

    loop {
        ticker.tick().await;
        let snapshot = aggregator.poll();
        board.update(&snapshot);
        if snapshot.is_complete() {
            board.finish();
            return snapshot;
        }
    }
}

/// Summary table for `polish status`
pub fn render_table(snapshot: &ProgressSnapshot) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Worker", "State", "Processed", "Progress", "Errors", "Last update"]);

    for status in snapshot.workers.values() {
        let state = match status.state {
            WorkerState::Idle => Cell::new("idle").fg(Color::DarkGrey),
            WorkerState::Processing => Cell::new("processing").fg(Color::Cyan),
            WorkerState::Completed => Cell::new("completed").fg(Color::Green),
            WorkerState::Stalled => Cell::new("STALLED").fg(Color::Red),
        };
        let last_update = status
            .last_update
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(status.fragment_id),
            state,
            Cell::new(format!("{}/{}", status.processed, status.total)),
            Cell::new(format!("{:.1}%", status.percentage())),
            Cell::new(status.error_count),
            Cell::new(last_update),
        ]);
    }

    table
}

/// One-line overall summary
pub fn overall_line(snapshot: &ProgressSnapshot) -> String {
    let stalled = snapshot.stalled().count();
    let mut line = format!(
        "Overall: {}/{} records ({:.1}%), {} errors",
        snapshot.processed,
        snapshot.total,
        snapshot.percentage(),
        snapshot.error_count()
    );
    if stalled > 0 {
        line.push_str(&format!(", {} stalled", stalled));
    }
    line
}
