//! Positional parameter binding.
//!
//! Queries are shipped to the cursor as literal text, so `?` placeholders are
//! replaced by SQL literals before submission.

use std::fmt::Write;

use serde::Deserialize;

use crate::error::{DriverError, DriverResult};
use crate::value::Param;

/// How embedded single quotes in text parameters are escaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteEscaping {
    /// Double every embedded quote.
    #[default]
    All,
    /// Double only the first embedded quote. Not injection-safe; kept for
    /// parity testing against legacy drivers.
    FirstOnly,
}

/// Substitute `?` placeholders in `template` with literals from `params`.
///
/// Only as many params as there are placeholders are consumed: surplus
/// placeholders stay as `?` and surplus params are ignored.
pub fn bind(template: &str, params: &[Param], escaping: QuoteEscaping) -> DriverResult<String> {
    if params.is_empty() {
        return Ok(template.to_string());
    }

    let mut out = String::with_capacity(template.len() + params.len() * 8);
    let mut pieces = template.split('?');
    // split always yields at least one piece
    out.push_str(pieces.next().unwrap_or_default());

    for (position, piece) in pieces.enumerate() {
        match params.get(position) {
            Some(param) => push_literal(&mut out, position, param, escaping)?,
            None => out.push('?'),
        }
        out.push_str(piece);
    }

    Ok(out)
}

fn push_literal(
    out: &mut String,
    position: usize,
    param: &Param,
    escaping: QuoteEscaping,
) -> DriverResult<()> {
    match param {
        Param::Text(s) => {
            out.push('\'');
            match escaping {
                QuoteEscaping::All => out.push_str(&s.replace('\'', "''")),
                QuoteEscaping::FirstOnly => out.push_str(&s.replacen('\'', "''", 1)),
            }
            out.push('\'');
        }
        Param::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Param::Float(f) if f.is_finite() => {
            let _ = write!(out, "{f}");
        }
        Param::Float(_) => {
            return Err(DriverError::InvalidParameterType {
                position,
                found: "non-finite float",
            })
        }
        Param::Binary(b) => {
            out.push_str("0x");
            for byte in b {
                let _ = write!(out, "{byte:02x}");
            }
        }
        other => {
            return Err(DriverError::InvalidParameterType {
                position,
                found: other.kind(),
            })
        }
    }
    Ok(())
}
