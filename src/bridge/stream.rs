//! Lazy, forward-only result streams

use super::types::{Column, Value};
use super::EngineError;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// One result row
pub type Row = Vec<Value>;

/// Widest row a RowDescription or DataRow can carry (the count is an int16)
pub const MAX_COLUMNS: usize = i16::MAX as usize;

/// Rows of one query, pulled one at a time.
///
/// The stream is not restartable: once it has been exhausted, has failed or
/// has been cancelled, [`RowStream::next_row`] keeps returning `None` and the
/// engine-side stream has been dropped.
pub struct RowStream {
    columns: Vec<Column>,
    rows: Option<BoxStream<'static, Result<Row, EngineError>>>,
    command_tag: Option<String>,
    cancel: CancellationToken,
    rows_returned: u64,
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("columns", &self.columns)
            .field("command_tag", &self.command_tag)
            .field("finished", &self.rows.is_none())
            .field("rows_returned", &self.rows_returned)
            .finish()
    }
}

impl RowStream {
    /// Wrap an engine-side stream of rows
    pub fn new<S>(columns: Vec<Column>, rows: S) -> Self
    where
        S: Stream<Item = Result<Row, EngineError>> + Send + 'static,
    {
        Self {
            columns,
            rows: Some(rows.boxed()),
            command_tag: None,
            cancel: CancellationToken::new(),
            rows_returned: 0,
        }
    }

    /// Stream over rows that are already materialised
    pub fn from_rows(columns: Vec<Column>, rows: Vec<Row>) -> Self {
        Self::new(columns, stream::iter(rows.into_iter().map(Ok)))
    }

    /// Result of a statement that returns no rows, reported with `tag`
    pub fn command(tag: impl Into<String>) -> Self {
        Self::new(Vec::new(), stream::empty()).with_command_tag(tag)
    }

    /// Override the CommandComplete tag (default `SELECT <n>`)
    pub fn with_command_tag(mut self, tag: impl Into<String>) -> Self {
        self.command_tag = Some(tag.into());
        self
    }

    /// Tie the stream to an external cancellation token
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Column descriptions
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Whether the query produces a row set (and therefore a RowDescription)
    pub fn has_row_description(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Rows handed out so far
    pub fn rows_returned(&self) -> u64 {
        self.rows_returned
    }

    /// Whether no further rows will be produced
    pub fn is_finished(&self) -> bool {
        self.rows.is_none()
    }

    /// CommandComplete tag for the rows returned so far
    pub fn command_tag(&self) -> String {
        match &self.command_tag {
            Some(tag) => tag.clone(),
            None => format!("SELECT {}", self.rows_returned),
        }
    }

    /// Pull the next row.
    ///
    /// Returns `None` when the stream is finished. A cancelled stream yields a
    /// single `57014` error, a row whose width disagrees with the column list
    /// yields a data error; both finish the stream.
    pub async fn next_row(&mut self) -> Option<Result<Row, EngineError>> {
        let rows = self.rows.as_mut()?;

        let next = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Some(Err(EngineError::query_canceled())),
            item = rows.next() => item,
        };

        match next {
            Some(Ok(row)) if row.len() != self.columns.len() => {
                self.finish();
                Some(Err(EngineError::data(format!(
                    "row has {} values but {} columns were described",
                    row.len(),
                    self.columns.len()
                ))))
            }
            Some(Ok(row)) => {
                self.rows_returned += 1;
                Some(Ok(row))
            }
            Some(Err(err)) => {
                self.finish();
                Some(Err(err))
            }
            None => {
                self.finish();
                None
            }
        }
    }

    /// Stop pulling rows and release the engine-side stream
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.finish();
    }

    fn finish(&mut self) {
        self.rows = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::DataType;
    use crate::protocol::sql_state;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn int_column() -> Vec<Column> {
        vec![Column::new("n", DataType::Int8)]
    }

    #[tokio::test]
    async fn test_rows_then_none() {
        let mut rows = RowStream::from_rows(
            int_column(),
            vec![vec![Value::Int8(1)], vec![Value::Int8(2)]],
        );
        assert_eq!(rows.next_row().await, Some(Ok(vec![Value::Int8(1)])));
        assert_eq!(rows.next_row().await, Some(Ok(vec![Value::Int8(2)])));
        assert_eq!(rows.next_row().await, None);
        assert_eq!(rows.next_row().await, None);
        assert_eq!(rows.command_tag(), "SELECT 2");
    }

    #[tokio::test]
    async fn test_pulls_lazily() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let source = stream::iter(0..1_000_000i64).map(move |i| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, EngineError>(vec![Value::Int8(i)])
        });

        let mut rows = RowStream::new(int_column(), source);
        rows.next_row().await;
        rows.next_row().await;
        assert_eq!(pulled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_error_finishes_stream() {
        let source = stream::iter(vec![
            Ok(vec![Value::Int8(1)]),
            Err(EngineError::data("division by zero")),
            Ok(vec![Value::Int8(3)]),
        ]);
        let mut rows = RowStream::new(int_column(), source);

        assert!(rows.next_row().await.unwrap().is_ok());
        let err = rows.next_row().await.unwrap().unwrap_err();
        assert_eq!(err.message(), "division by zero");
        assert_eq!(rows.next_row().await, None);
        assert_eq!(rows.rows_returned(), 1);
    }

    #[tokio::test]
    async fn test_width_mismatch_is_error() {
        let mut rows = RowStream::from_rows(
            int_column(),
            vec![vec![Value::Int8(1), Value::Int8(2)]],
        );
        let err = rows.next_row().await.unwrap().unwrap_err();
        assert_eq!(err.code(), sql_state::DATA_EXCEPTION);
        assert!(rows.is_finished());
    }

    #[tokio::test]
    async fn test_cancel_token_stops_stream() {
        let token = CancellationToken::new();
        let mut rows =
            RowStream::new(int_column(), stream::pending()).with_cancel_token(token.clone());

        token.cancel();
        let err = rows.next_row().await.unwrap().unwrap_err();
        assert_eq!(err.code(), sql_state::QUERY_CANCELED);
        assert_eq!(rows.next_row().await, None);
    }

    #[tokio::test]
    async fn test_command_tag_override() {
        let mut rows = RowStream::command("SET");
        assert!(!rows.has_row_description());
        assert_eq!(rows.next_row().await, None);
        assert_eq!(rows.command_tag(), "SET");
    }
}
