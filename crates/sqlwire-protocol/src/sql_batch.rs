//! SQL batch requests and the ALL_HEADERS prefix shared with RPC.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{utf16_byte_len, write_utf16_string};

/// Length of ALL_HEADERS carrying only a transaction descriptor header.
pub const ALL_HEADERS_LEN: u32 = 22;

/// ALL_HEADERS header type for the transaction descriptor.
const HEADER_TYPE_TRANSACTION_DESCRIPTOR: u16 = 0x0002;

/// Write ALL_HEADERS with a transaction descriptor and one outstanding request.
///
/// A descriptor of 0 means autocommit.
pub fn write_all_headers(dst: &mut impl BufMut, transaction_descriptor: u64) {
    dst.put_u32_le(ALL_HEADERS_LEN);
    dst.put_u32_le(ALL_HEADERS_LEN - 4);
    dst.put_u16_le(HEADER_TYPE_TRANSACTION_DESCRIPTOR);
    dst.put_u64_le(transaction_descriptor);
    dst.put_u32_le(1);
}

/// A SQL batch: ALL_HEADERS followed by UTF-16LE text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlBatch {
    sql: String,
    transaction_descriptor: u64,
}

impl SqlBatch {
    /// A batch in autocommit mode.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            transaction_descriptor: 0,
        }
    }

    /// Run the batch inside an open transaction.
    #[must_use]
    pub fn with_transaction(mut self, descriptor: u64) -> Self {
        self.transaction_descriptor = descriptor;
        self
    }

    /// SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Encode the payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ALL_HEADERS_LEN as usize + utf16_byte_len(&self.sql));
        write_all_headers(&mut buf, self.transaction_descriptor);
        write_utf16_string(&mut buf, &self.sql);
        buf.freeze()
    }
}
