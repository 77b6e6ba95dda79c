//! RPC requests.
//!
//! Layout: ALL_HEADERS, the procedure (well-known id or name), option flags,
//! then each parameter as name, status, TYPE_INFO and framed value.
//! Parameterised queries go through `sp_executesql` as
//! `@stmt`, `@params`, `@P1` .. `@Pn`.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{write_b_varchar, write_us_varchar};
use crate::collation::Collation;
use crate::sql_batch::write_all_headers;
use crate::types::{MAX_LENGTH_PLP, TypeId, TypeInfo};

/// Well-known procedure ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ProcId {
    /// sp_cursoropen
    CursorOpen = 2,
    /// sp_executesql
    ExecuteSql = 10,
    /// sp_prepare
    Prepare = 11,
    /// sp_execute
    Execute = 12,
    /// sp_prepexec
    PrepExec = 13,
    /// sp_unprepare
    Unprepare = 15,
}

bitflags! {
    /// RPC option flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RpcOptionFlags: u16 {
        /// Recompile the plan.
        const WITH_RECOMPILE = 0x0001;
        /// Do not send metadata.
        const NO_METADATA = 0x0002;
        /// Reuse metadata from the previous call.
        const REUSE_METADATA = 0x0004;
    }
}

bitflags! {
    /// Per-parameter status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ParamStatus: u8 {
        /// Output parameter.
        const BY_REF_VALUE = 0x01;
        /// Use the declared default.
        const DEFAULT_VALUE = 0x02;
    }
}

/// One RPC parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcParam {
    /// Name including the leading `@`, or empty for positional.
    pub name: String,
    /// Status flags.
    pub status: ParamStatus,
    /// Declared type.
    pub type_info: TypeInfo,
    /// Unframed value bytes, `None` for NULL.
    pub value: Option<Bytes>,
}

impl RpcParam {
    /// A parameter with the given type and value.
    pub fn new(name: impl Into<String>, type_info: TypeInfo, value: Option<Bytes>) -> Self {
        Self {
            name: name.into(),
            status: ParamStatus::empty(),
            type_info,
            value,
        }
    }

    /// An `nvarchar` parameter, `nvarchar(max)` beyond 4000 code units.
    pub fn nvarchar(name: impl Into<String>, text: &str) -> Self {
        let mut data = BytesMut::with_capacity(text.len() * 2);
        crate::codec::write_utf16_string(&mut data, text);
        let max_length = if data.len() > 8000 {
            MAX_LENGTH_PLP
        } else {
            data.len().max(2) as u32
        };
        let type_info =
            TypeInfo::new(TypeId::NVarChar, max_length).with_collation(Collation::default());
        Self::new(name, type_info, Some(data.freeze()))
    }

    /// An `int` parameter.
    pub fn int(name: impl Into<String>, value: i32) -> Self {
        Self::new(
            name,
            TypeInfo::new(TypeId::IntN, 4),
            Some(Bytes::copy_from_slice(&value.to_le_bytes())),
        )
    }

    /// Mark as an output parameter.
    #[must_use]
    pub fn as_output(mut self) -> Self {
        self.status.insert(ParamStatus::BY_REF_VALUE);
        self
    }

    /// Encode name, status, TYPE_INFO and value.
    pub fn encode(&self, dst: &mut impl BufMut) {
        write_b_varchar(dst, &self.name);
        dst.put_u8(self.status.bits());
        self.type_info.encode(dst);
        self.type_info.write_value(dst, self.value.as_deref());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Procedure {
    Id(ProcId),
    Name(String),
}

/// An RPC request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcRequest {
    procedure: Procedure,
    options: RpcOptionFlags,
    params: Vec<RpcParam>,
}

impl RpcRequest {
    /// Call a procedure by name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            procedure: Procedure::Name(name.into()),
            options: RpcOptionFlags::empty(),
            params: Vec::new(),
        }
    }

    /// Call a well-known procedure.
    #[must_use]
    pub fn by_id(id: ProcId) -> Self {
        Self {
            procedure: Procedure::Id(id),
            options: RpcOptionFlags::empty(),
            params: Vec::new(),
        }
    }

    /// `sp_executesql` with positional parameters.
    ///
    /// Parameters are renamed `@P1` .. `@Pn` in order and declared from
    /// their TYPE_INFO.
    pub fn execute_sql(sql: &str, params: Vec<RpcParam>) -> Self {
        let mut request = Self::by_id(ProcId::ExecuteSql);
        request.params.push(RpcParam::nvarchar("@stmt", sql));

        if !params.is_empty() {
            let declarations = params
                .iter()
                .enumerate()
                .map(|(i, p)| format!("@P{} {}", i + 1, p.type_info.declaration()))
                .collect::<Vec<_>>()
                .join(",");
            request.params.push(RpcParam::nvarchar("@params", &declarations));
            request
                .params
                .extend(params.into_iter().enumerate().map(|(i, mut p)| {
                    p.name = format!("@P{}", i + 1);
                    p
                }));
        }

        request
    }

    /// Set option flags.
    #[must_use]
    pub fn with_options(mut self, options: RpcOptionFlags) -> Self {
        self.options = options;
        self
    }

    /// Append a parameter.
    #[must_use]
    pub fn param(mut self, param: RpcParam) -> Self {
        self.params.push(param);
        self
    }

    /// Parameters in wire order.
    #[must_use]
    pub fn params(&self) -> &[RpcParam] {
        &self.params
    }

    /// Encode in autocommit mode.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        self.encode_with_transaction(0)
    }

    /// Encode inside the transaction named by `descriptor`.
    #[must_use]
    pub fn encode_with_transaction(&self, descriptor: u64) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);
        write_all_headers(&mut buf, descriptor);

        match &self.procedure {
            Procedure::Id(id) => {
                buf.put_u16_le(0xFFFF);
                buf.put_u16_le(*id as u16);
            }
            Procedure::Name(name) => write_us_varchar(&mut buf, name),
        }
        buf.put_u16_le(self.options.bits());

        for param in &self.params {
            param.encode(&mut buf);
        }

        buf.freeze()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sql_batch::ALL_HEADERS_LEN;

    #[test]
    fn test_execute_sql_layout() {
        let encoded = RpcRequest::execute_sql("SELECT @P1", vec![RpcParam::int("", 7)]).encode();
        let body = &encoded[ALL_HEADERS_LEN as usize..];
        assert_eq!(&body[..4], &[0xFF, 0xFF, 10, 0]);
        assert_eq!(&body[4..6], &[0, 0]);
        // @stmt
        assert_eq!(body[6], 5);
        assert_eq!(&body[7..17], &[b'@', 0, b's', 0, b't', 0, b'm', 0, b't', 0]);
        assert_eq!(body[17], 0);
        assert_eq!(body[18], TypeId::NVarChar as u8);
    }

    #[test]
    fn test_positional_names_and_declarations() {
        let request = RpcRequest::execute_sql(
            "SELECT @P1, @P2",
            vec![RpcParam::int("", 1), RpcParam::nvarchar("x", "abc")],
        );
        let params = request.params();
        assert_eq!(params.len(), 4);
        assert_eq!(params[0].name, "@stmt");
        assert_eq!(params[1].name, "@params");
        assert_eq!(params[2].name, "@P1");
        assert_eq!(params[3].name, "@P2");

        let declared = params[1].value.as_ref().unwrap();
        let units: Vec<u16> = declared
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(String::from_utf16(&units).unwrap(), "@P1 int,@P2 nvarchar(3)");
    }

    #[test]
    fn test_no_params_omits_declarations() {
        let request = RpcRequest::execute_sql("SELECT 1", Vec::new());
        assert_eq!(request.params().len(), 1);
    }

    #[test]
    fn test_long_statement_is_plp() {
        let sql = "x".repeat(4001);
        let param = RpcParam::nvarchar("@stmt", &sql);
        assert_eq!(param.type_info.max_length, MAX_LENGTH_PLP);
        assert!(param.type_info.is_plp());
    }

    #[test]
    fn test_named_procedure_and_output() {
        let encoded = RpcRequest::named("dbo.p")
            .param(RpcParam::int("@out", 0).as_output())
            .encode_with_transaction(5);
        assert_eq!(encoded[10], 5);
        let body = &encoded[ALL_HEADERS_LEN as usize..];
        assert_eq!(&body[..2], &[5, 0]);
        // name(10) + flags(2) + param name len(1) + "@out"(8) + status
        assert_eq!(body[2 + 10 + 2 + 1 + 8], ParamStatus::BY_REF_VALUE.bits());
    }
}
