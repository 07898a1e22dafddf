//! Per-source spinners and a log writer that keeps them pinned.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

static MULTI_PROGRESS: OnceLock<MultiProgress> = OnceLock::new();

fn multi_progress() -> &'static MultiProgress {
    MULTI_PROGRESS.get_or_init(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        mp
    })
}

/// Spinner shown while one source is being drained
pub fn add_spinner(source_tag: &str) -> ProgressBar {
    let pb = multi_progress().add(ProgressBar::new_spinner());
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {prefix:.bold} {pos} records {msg}")
    {
        pb.set_style(style);
    }
    pb.set_prefix(source_tag.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Hands out [`LogWriter`]s for the console layer
#[derive(Default, Clone)]
pub struct LogWriterFactory;

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter::default()
    }
}

/// Routes formatted log lines above the spinners
#[derive(Default)]
pub struct LogWriter {
    pending: Vec<u8>,
}

impl LogWriter {
    /// Complete lines buffered so far, without their terminators
    fn complete_lines(&mut self) -> Vec<String> {
        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(last_newline + 1);
        let done = std::mem::replace(&mut self.pending, rest);
        done[..last_newline]
            .split(|b| *b == b'\n')
            .map(|line| String::from_utf8_lossy(line).trim_end_matches('\r').to_string())
            .collect()
    }

    fn remainder(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending)
            .trim_end_matches('\r')
            .to_string();
        self.pending.clear();
        Some(line)
    }
}

fn emit_line(line: String) {
    // Console write errors are dropped
    let _ = multi_progress().println(line);
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        self.complete_lines().into_iter().for_each(emit_line);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(line) = self.remainder() {
            emit_line(line);
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_writes_join_into_lines() {
        let mut writer = LogWriter::default();
        writer.pending.extend_from_slice(b"INFO first");
        assert!(writer.complete_lines().is_empty());

        writer.pending.extend_from_slice(b" half\r\n\nWARN sec");
        assert_eq!(writer.complete_lines(), vec!["INFO first half", ""]);
        assert_eq!(writer.remainder().as_deref(), Some("WARN sec"));
        assert_eq!(writer.remainder(), None);
    }
}
