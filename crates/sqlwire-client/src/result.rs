//! Result assembly.
//!
//! A [`QueryResult`] reads the response lazily: rows are decoded one at a
//! time as the caller pulls them, and packets are read only when the token
//! buffer runs dry. It borrows the [`Client`] mutably, so no other command
//! can run until it is consumed.
//!
//! Dropping a `QueryResult` before the response is fully read leaves the
//! connection [`Busy`](crate::Error::Busy); call [`Client::drain`] to
//! recover, or use [`QueryResult::abandon`] to discard it up front.

use std::sync::Arc;

use futures_core::Stream;
use sqlwire_protocol::{ColMetaData, Token};
use sqlwire_types::{SqlValue, decode_value};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::row::{Column, Row, columns_of};
use crate::state::ProtocolState;

/// An output parameter of a stored procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputParam {
    /// Parameter name, including the `@`.
    pub name: String,
    /// Position in the parameter list.
    pub ordinal: u16,
    /// Decoded value.
    pub value: SqlValue,
}

impl OutputParam {
    fn decode(rv: sqlwire_protocol::ReturnValue) -> Result<Self> {
        if let Some(err) = rv.error {
            return Err(Error::Conversion(format!("output parameter {}: {err}", rv.name)));
        }
        let value = decode_value(&rv.type_info, rv.value.as_ref())?;
        Ok(Self {
            name: rv.name,
            ordinal: rv.ordinal,
            value,
        })
    }
}

/// Outcome of [`Client::execute`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteResult {
    rows_affected: Vec<u64>,
    return_status: Option<i32>,
    return_values: Vec<OutputParam>,
}

impl ExecuteResult {
    /// Build from a list of per-statement counts.
    #[must_use]
    pub fn from_counts(rows_affected: Vec<u64>) -> Self {
        Self {
            rows_affected,
            ..Self::default()
        }
    }

    pub(crate) async fn read<S>(client: &mut Client<S>) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut result = Self::default();
        let mut first_error = None;

        while let Some(token) = client.next_token().await? {
            match token {
                Token::Done(done) | Token::DoneInProc(done) | Token::DoneProc(done) => {
                    if let Some(rows) = done.rows() {
                        result.rows_affected.push(rows);
                    }
                }
                Token::Error(message) => {
                    first_error.get_or_insert_with(|| Error::from(message));
                }
                Token::ReturnStatus(status) => result.return_status = Some(status),
                Token::ReturnValue(rv) => match OutputParam::decode(rv) {
                    Ok(param) => result.return_values.push(param),
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                },
                _ => {}
            }
        }

        tracing::debug!(statements = result.rows_affected.len(), "statement complete");
        match first_error {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }

    /// Row counts in statement order.
    #[must_use]
    pub fn rows_affected(&self) -> &[u64] {
        &self.rows_affected
    }

    /// Sum of all row counts, saturating at `u64::MAX`.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.rows_affected
            .iter()
            .fold(0u64, |acc, &n| acc.saturating_add(n))
    }

    /// Sum of all row counts, `None` on overflow.
    #[must_use]
    pub fn checked_total(&self) -> Option<u64> {
        self.rows_affected
            .iter()
            .try_fold(0u64, |acc, &n| acc.checked_add(n))
    }

    /// Return status of a stored procedure.
    #[must_use]
    pub fn return_status(&self) -> Option<i32> {
        self.return_status
    }

    /// Output parameters of a stored procedure.
    #[must_use]
    pub fn return_values(&self) -> &[OutputParam] {
        &self.return_values
    }
}

/// Columns of a result set, announced by [`QueryItem::Metadata`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResultMetadata {
    /// Columns in declaration order.
    pub columns: Arc<[Column]>,
    /// Zero-based index of the result set within the response.
    pub result_index: usize,
}

/// Item of [`QueryResult::into_stream`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueryItem {
    /// A new result set starts.
    Metadata(ResultMetadata),
    /// A row of the current result set.
    Row(Row),
}

/// The result sets of a query.
pub struct QueryResult<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    client: &'a mut Client<S>,
    columns: Option<Arc<[Column]>>,
    meta: Option<Arc<ColMetaData>>,
    /// Metadata of the next result set, read but not yet entered.
    pending: Option<Arc<ColMetaData>>,
    finished: bool,
    result_index: usize,
    return_status: Option<i32>,
    return_values: Vec<OutputParam>,
}

impl<'a, S> QueryResult<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Read up to the first result set.
    ///
    /// A server error before any result set fails the query; the rest of
    /// the response is discarded.
    pub(crate) async fn new(client: &'a mut Client<S>) -> Result<Self> {
        client.set_state(ProtocolState::ProcessingTokens);
        let mut result = Self {
            client,
            columns: None,
            meta: None,
            pending: None,
            finished: false,
            result_index: 0,
            return_status: None,
            return_values: Vec::new(),
        };

        loop {
            let Some(token) = result.pull().await? else {
                break;
            };
            match token {
                Token::ColMetaData(meta) if !meta.columns.is_empty() => {
                    result.enter(meta);
                    break;
                }
                Token::Error(message) => {
                    result.discard().await?;
                    return Err(message.into());
                }
                other => result.observe(other)?,
            }
        }
        Ok(result)
    }

    /// Next token, marking the result finished at the end or on a fatal
    /// error or cancel.
    async fn pull(&mut self) -> Result<Option<Token>> {
        if self.finished {
            return Ok(None);
        }
        match self.client.next_token().await {
            Ok(Some(token)) => Ok(Some(token)),
            Ok(None) => {
                self.finished = true;
                Ok(None)
            }
            Err(e) => {
                self.finished = true;
                Err(e)
            }
        }
    }

    fn enter(&mut self, meta: Arc<ColMetaData>) {
        tracing::debug!(
            columns = meta.columns.len(),
            result_index = self.result_index,
            "result set started"
        );
        self.columns = Some(columns_of(&meta));
        self.meta = Some(meta);
    }

    fn observe(&mut self, token: Token) -> Result<()> {
        match token {
            Token::ReturnStatus(status) => self.return_status = Some(status),
            Token::ReturnValue(rv) => self.return_values.push(OutputParam::decode(rv)?),
            _ => {}
        }
        Ok(())
    }

    /// Columns of the current result set; `None` when the query returned
    /// no result set.
    #[must_use]
    pub fn columns(&self) -> Option<&[Column]> {
        self.columns.as_deref()
    }

    /// Zero-based index of the current result set.
    #[must_use]
    pub fn result_index(&self) -> usize {
        self.result_index
    }

    /// Whether the whole response has been read.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Next row of the current result set.
    ///
    /// `None` at the end of the set; call
    /// [`next_resultset`](Self::next_resultset) to move on. A value that
    /// cannot be decoded fails this row only.
    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        if self.pending.is_some() {
            return Ok(None);
        }
        while let Some(token) = self.pull().await? {
            match token {
                Token::Row(raw) | Token::NbcRow(raw) => {
                    let (Some(columns), Some(meta)) = (self.columns.clone(), self.meta.clone())
                    else {
                        return Err(self
                            .client
                            .poison(Error::Protocol("row outside a result set".into())));
                    };
                    return Ok(Some(Row::decode(columns, &meta, raw)?));
                }
                Token::ColMetaData(meta) if meta.columns.is_empty() => {}
                Token::ColMetaData(meta) => {
                    self.pending = Some(meta);
                    return Ok(None);
                }
                Token::Error(message) => return Err(message.into()),
                other => self.observe(other)?,
            }
        }
        Ok(None)
    }

    /// Move to the next result set.
    ///
    /// Rows left in the current set are discarded. Returns `false` when no
    /// result set follows.
    pub async fn next_resultset(&mut self) -> Result<bool> {
        while self.pending.is_none() {
            let Some(token) = self.pull().await? else {
                return Ok(false);
            };
            match token {
                Token::Row(_) | Token::NbcRow(_) => {}
                Token::ColMetaData(meta) if !meta.columns.is_empty() => {
                    self.pending = Some(meta);
                }
                Token::Error(message) => return Err(message.into()),
                other => self.observe(other)?,
            }
        }

        match self.pending.take() {
            Some(meta) => {
                self.result_index += 1;
                self.enter(meta);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Read the rest of the response, ignoring rows and server errors.
    async fn discard(&mut self) -> Result<()> {
        self.pending = None;
        loop {
            match self.pull().await {
                Ok(Some(token)) => {
                    // output parameters follow the last result set
                    if let Err(e) = self.observe(token) {
                        tracing::warn!(error = %e, "dropping undecodable output parameter");
                    }
                }
                Ok(None) | Err(Error::Canceled) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Drain after a failure so the connection stays usable, then hand the
    /// failure back.
    async fn fail(mut self, err: Error) -> Error {
        if !self.finished {
            if let Err(fatal) = self.discard().await {
                return fatal;
            }
        }
        err
    }

    /// Collect every remaining result set.
    pub async fn into_vec(mut self) -> Result<Vec<Vec<Row>>> {
        let mut sets = Vec::new();
        if self.columns.is_none() {
            self.discard().await?;
            return Ok(sets);
        }
        loop {
            let mut rows = Vec::new();
            loop {
                match self.next_row().await {
                    Ok(Some(row)) => rows.push(row),
                    Ok(None) => break,
                    Err(e) => return Err(self.fail(e).await),
                }
            }
            sets.push(rows);
            match self.next_resultset().await {
                Ok(true) => {}
                Ok(false) => return Ok(sets),
                Err(e) => return Err(self.fail(e).await),
            }
        }
    }

    /// Rows of the current result set; later sets are discarded.
    pub async fn into_first(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        loop {
            match self.next_row().await {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => break,
                Err(e) => return Err(self.fail(e).await),
            }
        }
        self.discard().await?;
        Ok(rows)
    }

    /// First row of the current result set; everything else is discarded.
    pub async fn into_row(mut self) -> Result<Option<Row>> {
        let row = match self.next_row().await {
            Ok(row) => row,
            Err(e) => return Err(self.fail(e).await),
        };
        self.discard().await?;
        Ok(row)
    }

    /// Rows of all remaining result sets, in server order.
    pub async fn into_all_rows(self) -> Result<Vec<Row>> {
        Ok(self.into_vec().await?.into_iter().flatten().collect())
    }

    /// Stream result set boundaries and rows.
    ///
    /// The current result set is announced first. The stream ends after
    /// the last row, or after an error that ends the response.
    pub fn into_stream(self) -> impl Stream<Item = Result<QueryItem>> + 'a {
        let first = self.columns.clone().map(|columns| {
            QueryItem::Metadata(ResultMetadata {
                columns,
                result_index: self.result_index,
            })
        });

        futures_util::stream::unfold(
            (self, first, false),
            |(mut result, mut announce, done)| async move {
                if done {
                    return None;
                }
                if let Some(item) = announce.take() {
                    return Some((Ok(item), (result, None, false)));
                }
                if result.columns.is_none() {
                    return match result.discard().await {
                        Ok(()) => None,
                        Err(e) => Some((Err(e), (result, None, true))),
                    };
                }

                match result.next_row().await {
                    Ok(Some(row)) => return Some((Ok(QueryItem::Row(row)), (result, None, false))),
                    Ok(None) => {}
                    Err(e) => {
                        let done = result.finished;
                        return Some((Err(e), (result, None, done)));
                    }
                }

                match result.next_resultset().await {
                    Ok(true) => {
                        let item = result.columns.clone().map(|columns| {
                            QueryItem::Metadata(ResultMetadata {
                                columns,
                                result_index: result.result_index,
                            })
                        });
                        item.map(|item| (Ok(item), (result, None, false)))
                    }
                    Ok(false) => None,
                    Err(e) => {
                        let done = result.finished;
                        Some((Err(e), (result, None, done)))
                    }
                }
            },
        )
    }

    /// Return status of a stored procedure, available once the response
    /// has been read.
    #[must_use]
    pub fn return_status(&self) -> Option<i32> {
        self.return_status
    }

    /// Output parameters, available once the response has been read.
    #[must_use]
    pub fn return_values(&self) -> &[OutputParam] {
        &self.return_values
    }

    /// Cancel the rest of the response.
    ///
    /// Sends Attention and discards everything up to the acknowledgment.
    /// If none arrives within the grace period the connection is poisoned.
    pub async fn cancel(self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.client.cancel_request().await
    }

    /// Read and discard the rest of the response.
    pub async fn abandon(mut self) -> Result<()> {
        self.discard().await
    }
}

impl<S> std::fmt::Debug for QueryResult<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("columns", &self.columns.as_ref().map(|c| c.len()))
            .field("result_index", &self.result_index)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_total_saturates() {
        let result = ExecuteResult::from_counts(vec![u64::MAX - 1, 5]);
        assert_eq!(result.total(), u64::MAX);
        assert_eq!(result.checked_total(), None);
    }

    #[test]
    fn test_total_sums_in_order() {
        let result = ExecuteResult::from_counts(vec![3, 0, 4]);
        assert_eq!(result.rows_affected(), &[3, 0, 4]);
        assert_eq!(result.total(), 7);
        assert_eq!(result.checked_total(), Some(7));
        assert_eq!(result.return_status(), None);
    }

    #[test]
    fn test_empty_result() {
        let result = ExecuteResult::default();
        assert_eq!(result.total(), 0);
        assert!(result.return_values().is_empty());
    }
}
