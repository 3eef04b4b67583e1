//! Value conversion between remote wire cells and local values.
//!
//! The engine treats conversion as a capability: [`ValueConverter`] decodes
//! one column's bytes out of the fetched row buffer and encodes local values
//! back into it for positioned inserts/updates. [`DefaultConverter`] covers
//! the standard type repertoire; hosts with exotic type mappings substitute
//! their own implementation at the seam.
//!
//! Wire layouts handled by the default implementation:
//! - integers and floats: little-endian, fixed width
//! - `Char`: fixed width, space padded, trailing pad trimmed on decode
//! - `VarChar`: two-byte little-endian length prefix, then bytes
//! - `Date`/`DateTime`: fixed-width text rendered per the session's
//!   `gl_date`/`gl_datetime` locale formats
//! - `Byte`/`Text`: the raw field

use chrono::{NaiveDate, NaiveDateTime};

use crate::client::RemoteType;
use crate::error::{IfxError, IfxResult};
use crate::options::ConnectionParams;

/// A value in the host's type system.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalValue {
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Double(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Bytes(Vec<u8>),
}

/// Decode/encode capability for one remote column.
pub trait ValueConverter {
    /// Decode the raw field bytes of a non-null cell.
    fn decode(&self, column: &str, ty: RemoteType, bytes: &[u8]) -> IfxResult<LocalValue>;

    /// Encode a local value into the field slice reserved for the column.
    /// The slice length is the column's wire width.
    fn encode_into(
        &self,
        column: &str,
        ty: RemoteType,
        value: &LocalValue,
        out: &mut [u8],
    ) -> IfxResult<()>;
}

/// Standard converter; carries the session's date/timestamp formats.
#[derive(Debug, Clone)]
pub struct DefaultConverter {
    date_format: String,
    datetime_format: String,
}

impl DefaultConverter {
    pub fn new(date_format: impl Into<String>, datetime_format: impl Into<String>) -> Self {
        Self {
            date_format: date_format.into(),
            datetime_format: datetime_format.into(),
        }
    }

    pub fn from_params(params: &ConnectionParams) -> Self {
        Self::new(&params.gl_date, &params.gl_datetime)
    }

    fn text_field<'a>(column: &str, bytes: &'a [u8]) -> IfxResult<&'a str> {
        std::str::from_utf8(bytes)
            .map_err(|e| IfxError::conversion(column, format!("invalid UTF-8: {e}")))
            .map(|s| s.trim_end_matches([' ', '\0']))
    }

    fn fixed<const N: usize>(column: &str, bytes: &[u8]) -> IfxResult<[u8; N]> {
        bytes.get(..N).and_then(|b| b.try_into().ok()).ok_or_else(|| {
            IfxError::conversion(column, format!("field too short: {} < {N}", bytes.len()))
        })
    }

    /// Write `text` into a fixed-width field, space padded.
    fn pad_text(column: &str, text: &str, out: &mut [u8]) -> IfxResult<()> {
        if text.len() > out.len() {
            return Err(IfxError::conversion(
                column,
                format!("value of {} bytes exceeds field width {}", text.len(), out.len()),
            ));
        }
        out[..text.len()].copy_from_slice(text.as_bytes());
        out[text.len()..].fill(b' ');
        Ok(())
    }
}

impl ValueConverter for DefaultConverter {
    fn decode(&self, column: &str, ty: RemoteType, bytes: &[u8]) -> IfxResult<LocalValue> {
        match ty {
            RemoteType::SmallInt => {
                Ok(LocalValue::SmallInt(i16::from_le_bytes(Self::fixed(column, bytes)?)))
            }
            RemoteType::Integer => {
                Ok(LocalValue::Int(i32::from_le_bytes(Self::fixed(column, bytes)?)))
            }
            RemoteType::Int8 => {
                Ok(LocalValue::BigInt(i64::from_le_bytes(Self::fixed(column, bytes)?)))
            }
            RemoteType::Float => {
                Ok(LocalValue::Double(f64::from_le_bytes(Self::fixed(column, bytes)?)))
            }
            RemoteType::Char => Ok(LocalValue::Text(Self::text_field(column, bytes)?.to_string())),
            RemoteType::VarChar => {
                let len: [u8; 2] = Self::fixed(column, bytes)?;
                let len = u16::from_le_bytes(len) as usize;
                let payload = bytes.get(2..2 + len).ok_or_else(|| {
                    IfxError::conversion(column, format!("varchar length {len} overruns field"))
                })?;
                let text = std::str::from_utf8(payload)
                    .map_err(|e| IfxError::conversion(column, format!("invalid UTF-8: {e}")))?;
                Ok(LocalValue::Text(text.to_string()))
            }
            RemoteType::Date => {
                let text = Self::text_field(column, bytes)?;
                NaiveDate::parse_from_str(text, &self.date_format)
                    .map(LocalValue::Date)
                    .map_err(|e| {
                        IfxError::conversion(column, format!("cannot parse date \"{text}\": {e}"))
                    })
            }
            RemoteType::DateTime => {
                let text = Self::text_field(column, bytes)?;
                NaiveDateTime::parse_from_str(text, &self.datetime_format)
                    .map(LocalValue::Timestamp)
                    .map_err(|e| {
                        IfxError::conversion(
                            column,
                            format!("cannot parse datetime \"{text}\": {e}"),
                        )
                    })
            }
            RemoteType::Byte => Ok(LocalValue::Bytes(bytes.to_vec())),
            RemoteType::Text => Ok(LocalValue::Text(Self::text_field(column, bytes)?.to_string())),
        }
    }

    fn encode_into(
        &self,
        column: &str,
        ty: RemoteType,
        value: &LocalValue,
        out: &mut [u8],
    ) -> IfxResult<()> {
        match (ty, value) {
            (RemoteType::SmallInt, LocalValue::SmallInt(v)) => {
                out.copy_from_slice(&v.to_le_bytes());
                Ok(())
            }
            (RemoteType::Integer, LocalValue::Int(v)) => {
                out.copy_from_slice(&v.to_le_bytes());
                Ok(())
            }
            (RemoteType::Int8, LocalValue::BigInt(v)) => {
                out.copy_from_slice(&v.to_le_bytes());
                Ok(())
            }
            (RemoteType::Float, LocalValue::Double(v)) => {
                out.copy_from_slice(&v.to_le_bytes());
                Ok(())
            }
            (RemoteType::Char, LocalValue::Text(text)) => Self::pad_text(column, text, out),
            (RemoteType::VarChar, LocalValue::Text(text)) => {
                if text.len() + 2 > out.len() {
                    return Err(IfxError::conversion(
                        column,
                        format!("value of {} bytes exceeds varchar field", text.len()),
                    ));
                }
                out[..2].copy_from_slice(&(text.len() as u16).to_le_bytes());
                out[2..2 + text.len()].copy_from_slice(text.as_bytes());
                out[2 + text.len()..].fill(0);
                Ok(())
            }
            (RemoteType::Date, LocalValue::Date(date)) => {
                let text = date.format(&self.date_format).to_string();
                Self::pad_text(column, &text, out)
            }
            (RemoteType::DateTime, LocalValue::Timestamp(ts)) => {
                let text = ts.format(&self.datetime_format).to_string();
                Self::pad_text(column, &text, out)
            }
            (RemoteType::Byte, LocalValue::Bytes(data)) => {
                if data.len() > out.len() {
                    return Err(IfxError::conversion(column, "blob exceeds field width"));
                }
                out[..data.len()].copy_from_slice(data);
                out[data.len()..].fill(0);
                Ok(())
            }
            (RemoteType::Text, LocalValue::Text(text)) => Self::pad_text(column, text, out),
            (ty, value) => Err(IfxError::conversion(
                column,
                format!("cannot encode {value:?} as remote type {ty:?}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ISO_DATE_FORMAT, ISO_DATETIME_FORMAT};

    fn converter() -> DefaultConverter {
        DefaultConverter::new(ISO_DATE_FORMAT, ISO_DATETIME_FORMAT)
    }

    #[test]
    fn integer_decode() {
        let c = converter();
        let value = c.decode("id", RemoteType::Integer, &42i32.to_le_bytes()).unwrap();
        assert_eq!(value, LocalValue::Int(42));
    }

    #[test]
    fn char_trims_padding() {
        let c = converter();
        let value = c.decode("name", RemoteType::Char, b"alice     ").unwrap();
        assert_eq!(value, LocalValue::Text("alice".to_string()));
    }

    #[test]
    fn varchar_respects_length_prefix() {
        let c = converter();
        let mut field = vec![0u8; 12];
        c.encode_into(
            "name",
            RemoteType::VarChar,
            &LocalValue::Text("bob".to_string()),
            &mut field,
        )
        .unwrap();
        let value = c.decode("name", RemoteType::VarChar, &field).unwrap();
        assert_eq!(value, LocalValue::Text("bob".to_string()));
    }

    #[test]
    fn date_uses_locale_format() {
        let c = DefaultConverter::new("%d.%m.%Y", ISO_DATETIME_FORMAT);
        let date = NaiveDate::from_ymd_opt(2009, 2, 13).unwrap();
        let mut field = vec![b' '; 10];
        c.encode_into("d", RemoteType::Date, &LocalValue::Date(date), &mut field)
            .unwrap();
        assert_eq!(&field, b"13.02.2009");
        assert_eq!(
            c.decode("d", RemoteType::Date, &field).unwrap(),
            LocalValue::Date(date)
        );
    }

    #[test]
    fn bad_date_is_conversion_error() {
        let c = converter();
        let err = c.decode("d", RemoteType::Date, b"not-a-date").unwrap_err();
        assert!(matches!(err, IfxError::Conversion { .. }));
    }

    #[test]
    fn type_mismatch_on_encode() {
        let c = converter();
        let mut field = [0u8; 4];
        let err = c
            .encode_into("id", RemoteType::Integer, &LocalValue::Text("x".into()), &mut field)
            .unwrap_err();
        assert!(matches!(err, IfxError::Conversion { .. }));
    }
}
