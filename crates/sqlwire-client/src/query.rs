//! Reusable queries with owned parameters.

use sqlwire_types::{SqlValue, ToSql};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::result::{ExecuteResult, QueryResult};

/// SQL text plus the values bound to `@P1`, `@P2`, ...
///
/// Values are converted when bound, so the query owns them and can run any
/// number of times.
///
/// ```rust,ignore
/// let query = Query::new("SELECT name FROM users WHERE id = @P1").bind(&42i32);
/// let row = query.query(&mut client).await?.into_row().await?;
/// ```
#[derive(Debug, Clone)]
pub struct Query {
    sql: String,
    params: Vec<SqlValue>,
    /// First conversion failure, reported when the query runs.
    error: Option<Error>,
}

impl Query {
    /// Create a new query from SQL text.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            error: None,
        }
    }

    /// Bind the next positional parameter.
    #[must_use]
    pub fn bind<T: ToSql + ?Sized>(mut self, value: &T) -> Self {
        match value.to_sql() {
            Ok(value) => self.params.push(value),
            Err(e) => {
                self.error.get_or_insert(e.into());
            }
        }
        self
    }

    /// Get the SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound values in order.
    #[must_use]
    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    fn param_refs(&self) -> Result<Vec<&(dyn ToSql + Sync)>> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        Ok(self
            .params
            .iter()
            .map(|p| p as &(dyn ToSql + Sync))
            .collect())
    }

    /// Run as a query.
    pub async fn query<'a, S>(&self, client: &'a mut Client<S>) -> Result<QueryResult<'a, S>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let params = self.param_refs()?;
        client.query(&self.sql, &params).await
    }

    /// Run as a statement.
    pub async fn execute<S>(&self, client: &mut Client<S>) -> Result<ExecuteResult>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let params = self.param_refs()?;
        client.execute(&self.sql, &params).await
    }
}
