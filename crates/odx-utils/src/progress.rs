//! Throttled progress display on stderr.

use std::io::{self, Write};
use std::time::Instant;

/// Count-based progress meter.
///
/// Renders `title:  42% (42/100)` (or `title: 42` without a total) to stderr,
/// throttled so tight loops do not dominate in terminal writes. Writers show
/// this only when their `PROGRESS` flag is set.
pub struct Progress {
    title: String,
    total: Option<u64>,
    current: u64,
    last_render: Instant,
    /// Minimum delay between display updates in milliseconds.
    delay_ms: u64,
    shown: bool,
}

impl Progress {
    pub fn new(title: &str, total: Option<u64>) -> Self {
        Self {
            title: title.to_string(),
            total,
            current: 0,
            last_render: Instant::now(),
            delay_ms: 100,
            shown: false,
        }
    }

    /// Advance the counter by `n` and maybe re-render.
    pub fn update(&mut self, n: u64) {
        self.current += n;
        if self.last_render.elapsed().as_millis() as u64 >= self.delay_ms || !self.shown {
            self.render(false);
            self.last_render = Instant::now();
            self.shown = true;
        }
    }

    /// Finish: render the final count and a newline.
    pub fn finish(mut self) {
        if let Some(total) = self.total {
            self.current = self.current.max(total);
        }
        self.render(true);
    }

    fn render(&self, done: bool) {
        let mut err = io::stderr().lock();
        let _ = match self.total {
            Some(total) if total > 0 => {
                let pct = self.current * 100 / total;
                write!(err, "\r{}: {:3}% ({}/{})", self.title, pct, self.current, total)
            }
            _ => write!(err, "\r{}: {}", self.title, self.current),
        };
        if done {
            let _ = writeln!(err, ", done.");
        }
        let _ = err.flush();
    }
}

/// Optional progress handle used by writers: `None` renders nothing.
pub fn maybe_progress(enabled: bool, title: &str, total: Option<u64>) -> Option<Progress> {
    enabled.then(|| Progress::new(title, total))
}
