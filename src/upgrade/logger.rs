//! Operator-facing progress report for a bulk upgrade.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;

/// Timestamped report lines plus the running tally behind them.
///
/// Every method takes the one lock, so ticker lines never interleave
/// with per-instance lines.
pub struct UpgradeLogger {
    state: Mutex<State>,
}

struct State {
    out: Box<dyn Write + Send>,
    target: usize,
    complete: usize,
    successes: usize,
    failures: BTreeMap<String, String>,
}

impl State {
    fn line(&mut self, msg: &str) {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        // a broken report pipe must not abort the upgrade
        let _ = writeln!(self.out, "{now}: {msg}");
    }

    fn separator(&mut self) {
        self.line("---");
    }

    fn progress(&mut self) {
        let msg = format!("upgraded {} of {}", self.complete, self.target);
        self.line(&msg);
    }
}

impl UpgradeLogger {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            state: Mutex::new(State {
                out: Box::new(out),
                target: 0,
                complete: 0,
                successes: 0,
                failures: BTreeMap::new(),
            }),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn printf(&self, msg: &str) {
        self.state.lock().line(msg);
    }

    pub fn initial_totals(&self, total: usize, upgradable: usize) {
        let mut s = self.state.lock();
        s.target = upgradable;
        s.separator();
        s.line(&format!("total instances: {total}"));
        s.line(&format!("upgradable instances: {upgradable}"));
        s.separator();
    }

    pub fn starting(&self, guid: &str) {
        self.state.lock().line(&format!("starting to upgrade {guid:?}"));
    }

    pub fn succeeded(&self, guid: &str, elapsed: Duration) {
        let mut s = self.state.lock();
        s.successes += 1;
        s.complete += 1;
        s.line(&format!("finished upgrade of {guid:?} successfully after {elapsed:.2?}"));
    }

    pub fn failed(&self, guid: &str, elapsed: Duration, reason: &str) {
        let mut s = self.state.lock();
        s.failures.insert(guid.to_string(), reason.to_string());
        s.complete += 1;
        s.line(&format!("upgrade of {guid:?} failed after {elapsed:.2?}: {reason}"));
    }

    /// The ticker line: `upgraded X of Y`.
    pub fn progress(&self) {
        self.state.lock().progress();
    }

    /// Closing summary, with a `Service Instance GUID | Details` table
    /// when anything failed.
    pub fn final_totals(&self) {
        let mut s = self.state.lock();
        s.progress();
        s.separator();
        let msg = format!("successfully upgraded {} instances", s.successes);
        s.line(&msg);

        if s.failures.is_empty() {
            return;
        }

        let msg = format!("failed to upgrade {} instances", s.failures.len());
        s.line(&msg);
        s.line("");

        let header = "Service Instance GUID";
        let width = s
            .failures
            .keys()
            .map(String::len)
            .chain(std::iter::once(header.len()))
            .max()
            .unwrap_or(header.len());

        let mut rows = vec![
            format!("{header:<width$} | Details"),
            format!("{:-<width$} | -------", ""),
        ];
        rows.extend(
            s.failures
                .iter()
                .map(|(guid, reason)| format!("{guid:<width$} | {reason}")),
        );
        for row in rows {
            s.line(&row);
        }
    }

    pub fn succeeded_count(&self) -> usize {
        self.state.lock().successes
    }

    /// Failed instance GUIDs with their reasons, sorted by GUID.
    pub fn failures(&self) -> BTreeMap<String, String> {
        self.state.lock().failures.clone()
    }
}

/// Cloneable in-memory sink for capturing report output.
#[derive(Clone, Default)]
pub struct SharedBuffer(std::sync::Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
