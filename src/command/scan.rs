//! Cursor-based iteration results (`SCAN`, `HSCAN`, `SSCAN`, `ZSCAN`).

use super::Command;
use crate::error::{Error, Result};
use crate::resp::reader::ReplyReader;
use std::sync::Arc;

/// One batch of a cursor iteration.
///
/// The iteration is stateless on the client: resubmit `cursor` to get the
/// next batch. A cursor of 0 means the server has finished.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult<T> {
    pub cursor: u64,
    pub items: T,
}

impl<T> ScanResult<T> {
    pub fn is_finished(&self) -> bool {
        self.cursor == 0
    }
}

impl<T: 'static> Command<ScanResult<T>> {
    /// Wrap an array-typed command: the reply is `[cursor, items]`, the
    /// items element is handed to `inner`'s parser.
    pub fn scan(inner: Command<T>) -> Self {
        let items = Arc::clone(&inner.parse);
        Command {
            name: inner.name,
            args: inner.args,
            parse: Arc::new(move |r: &mut ReplyReader<'_>| {
                r.expect_count(2)?;
                let cursor = parse_cursor(&r.read_bulk_string()?)?;
                let items = items(r)?;
                Ok(ScanResult { cursor, items })
            }),
            blocking: inner.blocking,
        }
    }
}

fn parse_cursor(text: &str) -> Result<u64> {
    text.parse()
        .map_err(|_| Error::Protocol(format!("invalid scan cursor: {text:?}")))
}
