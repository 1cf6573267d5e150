use std::error::Error;

use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tokio_util::bytes;

use crate::types::SqlValue;

/// Borrowed view of statement parameters in the form tokio-postgres binds.
pub struct Params<'a> {
    references: Vec<&'a (dyn ToSql + Sync)>,
}

impl<'a> Params<'a> {
    #[must_use]
    pub fn convert(params: &'a [SqlValue]) -> Params<'a> {
        let mut references = Vec::with_capacity(params.len());
        for p in params {
            references.push(p as &(dyn ToSql + Sync));
        }
        Params { references }
    }

    #[must_use]
    pub fn as_refs(&self) -> &[&(dyn ToSql + Sync)] {
        &self.references
    }
}

impl ToSql for SqlValue {
    /// Values are narrowed to the type the server inferred for the placeholder; anything
    /// that cannot be represented is rejected before it reaches the wire.
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut bytes::BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            SqlValue::Int(i) => {
                if *ty == Type::INT2 {
                    i16::try_from(*i)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*i)?.to_sql(ty, out)
                } else {
                    i.to_sql_checked(ty, out)
                }
            }
            SqlValue::Float(f) => {
                if *ty == Type::FLOAT4 {
                    #[allow(clippy::cast_possible_truncation)]
                    let narrowed = *f as f32;
                    narrowed.to_sql(ty, out)
                } else {
                    f.to_sql_checked(ty, out)
                }
            }
            SqlValue::Text(s) => s.to_sql_checked(ty, out),
            SqlValue::Bool(b) => b.to_sql_checked(ty, out),
            SqlValue::Timestamp(dt) => {
                if *ty == Type::TIMESTAMPTZ {
                    dt.and_utc().to_sql(ty, out)
                } else if *ty == Type::DATE {
                    dt.date().to_sql(ty, out)
                } else {
                    dt.to_sql_checked(ty, out)
                }
            }
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::JSON(jsval) => jsval.to_sql_checked(ty, out),
            SqlValue::Blob(bytes) => bytes.to_sql_checked(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // Each variant checks the concrete type in `to_sql`.
        true
    }

    to_sql_checked!();
}
