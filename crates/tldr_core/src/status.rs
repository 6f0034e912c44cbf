use std::io::{self, Write};

use owo_colors::OwoColorize;

/// A one-line progress indicator on stderr, closed on every exit path.
///
/// `finish` prints `[Done]`; dropping an unfinished line prints `[Failed]` so an
/// early return or `?` never leaves the cursor mid-line.
pub struct StatusLine {
    enabled: bool,
    colored: bool,
    finished: bool,
}

impl StatusLine {
    pub fn start(label: &str, enabled: bool, colored: bool) -> Self {
        if enabled {
            let mut stderr = io::stderr().lock();
            let _ = write!(stderr, "{}... ", label.trim_end());
            let _ = stderr.flush();
        }
        Self {
            enabled,
            colored,
            finished: false,
        }
    }

    #[cfg(test)]
    fn disabled() -> Self {
        Self::start("", false, false)
    }

    pub fn finish(mut self) {
        self.close(true);
    }

    fn close(&mut self, success: bool) {
        if self.finished {
            return;
        }
        self.finished = true;
        if !self.enabled {
            return;
        }
        let mut stderr = io::stderr().lock();
        let _ = match (success, self.colored) {
            (true, true) => writeln!(stderr, "{}", "[Done]".green()),
            (true, false) => writeln!(stderr, "[Done]"),
            (false, true) => writeln!(stderr, "{}", "[Failed]".red()),
            (false, false) => writeln!(stderr, "[Failed]"),
        };
    }
}

impl Drop for StatusLine {
    fn drop(&mut self) {
        self.close(false);
    }
}
