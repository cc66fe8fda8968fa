use super::Connection;
use crate::error::Error;

use tracing::debug;

/// Formats the default bandwidth report: `SKB <sid> <kb>\r\n`.
pub fn format_progress(sid: &str, kb: u64) -> Vec<u8> {
    format!("SKB {sid} {kb}\r\n").into_bytes()
}

impl Connection {
    /// Tells the far end how much has been sent on this connection.
    ///
    /// Once at least the configured increment has been written since the
    /// last report, the whole KB are rolled into [`Self::reported_kb`] and a
    /// report for session `sid` is written to `companion`. Returns whether a
    /// report was sent.
    pub fn report_progress(
        &mut self,
        sid: &str,
        companion: &mut Connection,
    ) -> Result<bool, Error> {
        self.report_progress_with(sid, companion, format_progress)
    }

    /// Like [`Self::report_progress`], with a custom message format.
    pub fn report_progress_with<F>(
        &mut self,
        sid: &str,
        companion: &mut Connection,
        format: F,
    ) -> Result<bool, Error>
    where
        F: Fn(&str, u64) -> Vec<u8>,
    {
        if self.wrote_bytes < self.config.report_increment_kb * 1024 {
            return Ok(false);
        }

        self.reported_kb += self.wrote_bytes / 1024;
        self.wrote_bytes %= 1024;
        companion.write(&format(sid, self.reported_kb))?;
        debug!(
            sockfd = self.sockfd(),
            sid,
            wrote_bytes = self.wrote_bytes,
            reported_kb = self.reported_kb,
            "Reported progress"
        );
        Ok(true)
    }
}
