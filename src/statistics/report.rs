//! Statistics output
//!
//! The epoch reporter writes plain text lines to a single process-wide
//! [`StatsSink`]. The sink is registered once together with the longest line
//! it accepts; longer lines are broken into continuation lines that repeat
//! the line prefix. Without a sink, statistics are still gathered but nothing
//! is written.

use crate::error::{MxUserError, Result};
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Shortest line length a sink may ask for
pub const MIN_LINE_LENGTH: usize = 64;

/// Destination of statistics lines
pub trait StatsSink: Send + Sync {
    /// Write one complete line, without a trailing newline
    fn write_line(&self, line: &str);
}

impl<F> StatsSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn write_line(&self, line: &str) {
        self(line)
    }
}

struct SinkSlot {
    sink: Arc<dyn StatsSink>,
    max_line_length: usize,
}

static SINK: OnceCell<SinkSlot> = OnceCell::new();

/// Register the statistics sink
///
/// Only the first registration takes effect; later calls return
/// [`MxUserError::AlreadyRegistered`].
pub fn register_stats_sink(sink: Arc<dyn StatsSink>, max_line_length: usize) -> Result<()> {
    if max_line_length < MIN_LINE_LENGTH {
        return Err(MxUserError::configuration(format!(
            "stats sink line length {} is below the minimum of {}",
            max_line_length, MIN_LINE_LENGTH
        )));
    }

    let mut installed = false;
    SINK.get_or_init(|| {
        installed = true;
        SinkSlot {
            sink,
            max_line_length,
        }
    });

    if installed {
        log::debug!("stats sink registered (max line length {})", max_line_length);
        Ok(())
    } else {
        log::warn!("ignoring second stats sink registration");
        Err(MxUserError::already_registered("stats sink"))
    }
}

/// Whether a statistics sink has been registered
pub fn stats_sink_registered() -> bool {
    SINK.get().is_some()
}

/// Run `f` with a line writer on the registered sink, if there is one
pub(crate) fn with_stats_line<F>(f: F)
where
    F: FnOnce(&mut StatsLine<'_>),
{
    if let Some(slot) = SINK.get() {
        let mut line = StatsLine::new(slot.sink.as_ref(), slot.max_line_length);
        f(&mut line);
    }
}

/// Token-oriented line builder with continuation splitting
pub struct StatsLine<'a> {
    sink: &'a dyn StatsSink,
    max: usize,
    prefix: String,
    line: String,
}

impl<'a> StatsLine<'a> {
    pub fn new(sink: &'a dyn StatsSink, max_line_length: usize) -> Self {
        Self {
            sink,
            max: max_line_length.max(1),
            prefix: String::new(),
            line: String::new(),
        }
    }

    /// Begin a new line; continuation lines repeat `prefix`
    pub fn start(&mut self, prefix: impl Into<String>) {
        self.finish();
        self.prefix = prefix.into();
        self.line.clear();
        self.line.push_str(&self.prefix);
    }

    /// Append a space-separated token, breaking the line if it would overflow
    pub fn push(&mut self, token: &str) {
        if self.line.len() > self.prefix.len() && self.line.len() + 1 + token.len() > self.max {
            self.flush();
            self.line.push_str(&self.prefix);
        }
        self.line.push(' ');
        self.line.push_str(token);

        while self.line.len() > self.max {
            let mut cut = self.max;
            while !self.line.is_char_boundary(cut) {
                cut -= 1;
            }
            if cut <= self.prefix.len() + 1 {
                break;
            }
            let rest = self.line.split_off(cut);
            self.flush();
            self.line.push_str(&self.prefix);
            self.line.push(' ');
            self.line.push_str(&rest);
        }
    }

    /// Emit whatever is pending
    pub fn finish(&mut self) {
        if !self.line.is_empty() {
            self.flush();
        }
    }

    fn flush(&mut self) {
        self.sink.write_line(&self.line);
        self.line.clear();
    }
}

impl Drop for StatsLine<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}
