/// Terminal output: a progress observer thread plus the end-of-run reports.
///
/// ```text
/// [I/O thread] --fetch_add--> Progress <--snapshot every tick-- [Dashboard]
///      |                                                            |
///      +--attach_progress (via DashboardLogger) --channel-----------+
/// ```
///
/// The dashboard never writes to transfer state; it only polls snapshots.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, select, tick, unbounded};
use indicatif::{ProgressBar, ProgressStyle};
use lanxfer_core::{
    EntryStatus, Progress, SessionState, SpeedWindow, TracingLogger, TransferError, TransferLog,
    TransferLogger, TransferReport,
};
use uuid::Uuid;

/// Polls whichever session attached last and draws it.
pub struct Dashboard {
    attach_tx: Sender<Arc<Progress>>,
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Dashboard {
    pub fn spawn(interval: Duration) -> Self {
        let (attach_tx, attach_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();
        let handle = thread::Builder::new()
            .name("lanxfer-progress".into())
            .spawn(move || observe(interval, attach_rx, stop_rx))
            .ok();
        Self {
            attach_tx,
            stop_tx,
            handle,
        }
    }

    pub fn logger(&self) -> Arc<dyn TransferLogger> {
        Arc::new(DashboardLogger {
            inner: TracingLogger,
            attach_tx: self.attach_tx.clone(),
        })
    }

    /// Draw the final state and wait for the observer to exit.
    pub fn finish(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Forwards events to `tracing` and hands new sessions to the dashboard.
struct DashboardLogger {
    inner: TracingLogger,
    attach_tx: Sender<Arc<Progress>>,
}

impl TransferLogger for DashboardLogger {
    fn log(&self, entry: TransferLog) {
        self.inner.log(entry);
    }

    fn attach_progress(&self, _transfer_id: Uuid, progress: &Arc<Progress>) {
        let _ = self.attach_tx.send(progress.clone());
    }
}

struct Watched {
    progress: Arc<Progress>,
    bar: ProgressBar,
    speed: SpeedWindow,
}

impl Watched {
    fn new(progress: Arc<Progress>) -> Self {
        let bar = ProgressBar::new(progress.snapshot().bytes_total);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {percent:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self {
            progress,
            bar,
            speed: SpeedWindow::default(),
        }
    }

    /// Redraw from a fresh snapshot. Returns true once the session is over.
    fn draw(&mut self) -> bool {
        let snapshot = self.progress.snapshot();
        self.speed.record(&snapshot);

        self.bar.set_length(snapshot.bytes_total.max(1));
        // An empty transfer has nothing to count; draw it full once it streams.
        let position = if snapshot.bytes_total == 0 {
            u64::from(snapshot.fraction() >= 1.0)
        } else {
            snapshot.bytes_done
        };
        self.bar.set_position(position);
        self.bar.set_message(format!(
            "{}/{} {}/{} | {}/s | ETA {} | {}",
            format_size(snapshot.bytes_done),
            format_size(snapshot.bytes_total),
            snapshot.entries_done,
            snapshot.entries_total,
            format_size(self.speed.speed() as u64),
            format_eta(self.speed.eta(&snapshot)),
            snapshot.current_entry.as_deref().unwrap_or(snapshot.state.label()),
        ));

        if snapshot.state.is_terminal() {
            match snapshot.state {
                SessionState::Completed => self.bar.finish(),
                _ => self.bar.abandon(),
            }
            true
        } else {
            false
        }
    }
}

fn observe(interval: Duration, attach_rx: Receiver<Arc<Progress>>, stop_rx: Receiver<()>) {
    let ticker = tick(interval);
    let mut current: Option<Watched> = None;

    loop {
        select! {
            recv(attach_rx) -> msg => match msg {
                Ok(progress) => {
                    if let Some(mut previous) = current.take() {
                        previous.draw();
                        previous.bar.abandon();
                    }
                    current = Some(Watched::new(progress));
                }
                Err(_) => break,
            },
            recv(stop_rx) -> _ => break,
            recv(ticker) -> _ => {
                if let Some(watched) = current.as_mut() {
                    if watched.draw() {
                        current = None;
                    }
                }
            }
        }
    }

    if let Some(mut watched) = current {
        if !watched.draw() {
            watched.bar.abandon();
        }
    }
}

pub fn print_report(report: &TransferReport) {
    let kind = report.kind.map(|k| k.as_str()).unwrap_or("transfer");
    let speed = if report.elapsed.as_secs_f64() > 0.0 {
        report.bytes_transferred as f64 / report.elapsed.as_secs_f64()
    } else {
        0.0
    };
    println!(
        "{} {} '{}': {} of {} in {:.1}s ({}/s), {}/{} entries verified",
        report.state.label(),
        kind,
        report.name,
        format_size(report.bytes_transferred),
        format_size(report.total_size),
        report.elapsed.as_secs_f64(),
        format_size(speed as u64),
        report.verified_count(),
        report.entries.len(),
    );

    for entry in report.mismatches() {
        match (&entry.peer_digest, &entry.digest) {
            (Some(expected), Some(actual)) => println!(
                "  checksum mismatch: {} (expected {}, got {})",
                entry.path, expected, actual
            ),
            _ => println!("  checksum mismatch: {}", entry.path),
        }
    }
    if report.state == SessionState::Cancelled {
        let pending = report
            .entries
            .iter()
            .filter(|e| e.status == EntryStatus::Pending)
            .count();
        println!("  {} entries not transferred; partial files were kept", pending);
    }
}

pub fn print_error(label: &str, err: &TransferError) {
    eprintln!("{}: {} ({})", label, err, err.kind());
}

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Human-readable byte count: `0 B`, `512 B`, `1.5 MB`.
pub fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// `42s`, `3m 05s`, `1h 02m`; `--` when unknown.
pub fn format_eta(eta: Option<Duration>) -> String {
    let Some(eta) = eta else {
        return "--".into();
    };
    let secs = eta.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536 * 1024), "1.5 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(None), "--");
        assert_eq!(format_eta(Some(Duration::from_secs(42))), "42s");
        assert_eq!(format_eta(Some(Duration::from_secs(185))), "3m 05s");
        assert_eq!(format_eta(Some(Duration::from_secs(3720))), "1h 02m");
    }

    #[test]
    fn test_dashboard_releases_finished_session() {
        let dashboard = Dashboard::spawn(Duration::from_millis(5));
        let logger = dashboard.logger();
        let progress = Arc::new(Progress::new());
        progress.begin(100, 1);
        logger.attach_progress(Uuid::nil(), &progress);
        progress.add_bytes(100);
        progress.set_state(SessionState::Completed);

        // The observer drops its handle once it has drawn the terminal state.
        let deadline = Instant::now() + Duration::from_secs(2);
        while Arc::strong_count(&progress) > 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(Arc::strong_count(&progress), 1);

        let finishing = Instant::now();
        dashboard.finish();
        assert!(finishing.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_finish_stops_observer_mid_session() {
        let dashboard = Dashboard::spawn(Duration::from_millis(5));
        let progress = Arc::new(Progress::new());
        progress.begin(100, 1);
        progress.set_state(SessionState::Streaming);
        dashboard.logger().attach_progress(Uuid::nil(), &progress);

        let finishing = Instant::now();
        dashboard.finish();
        assert!(finishing.elapsed() < Duration::from_secs(1));
        assert_eq!(Arc::strong_count(&progress), 1);
    }
}
