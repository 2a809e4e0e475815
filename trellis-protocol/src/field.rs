//! Field definitions for binary message templates.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Width, in bytes, of an integer field declared without one.
///
/// Width-less fields act as length placeholders for a later payload field; see
/// [`ProtocolTemplate::add`](crate::ProtocolTemplate::add).
pub const DEFAULT_LENGTH_WIDTH: usize = 2;

/// Name a payload field gets when declared without one.
pub const DEFAULT_PAYLOAD_NAME: &str = "payload";

/// Errors from parsing a length expression.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LengthExprParseError {
    /// The expression is empty.
    #[error("empty length expression")]
    Empty,

    /// The adjustment after the referenced field is not a valid integer.
    #[error("invalid length adjustment")]
    InvalidAdjustment(#[source] std::num::ParseIntError),
}

/// A parsed `"<reference>±<adjustment>"` length expression, e.g. `"length-2"`.
///
/// The payload length is the decoded value of the referenced field plus the adjustment. A bare
/// reference (`"length"`) carries an adjustment of zero. Negative adjustments model length
/// fields that also count bytes transmitted before the payload, such as `"length-2"` for a
/// count that includes two header bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthExpr {
    reference: String,
    adjustment: i32,
}

impl LengthExpr {
    /// The name (or numeric id) of the referenced field.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// The signed adjustment added to the referenced field's decoded value.
    pub fn adjustment(&self) -> i32 {
        self.adjustment
    }
}

impl FromStr for LengthExpr {
    type Err = LengthExprParseError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let string = string.trim();
        if string.is_empty() {
            return Err(LengthExprParseError::Empty);
        }

        // Split on the last sign followed by digits, so references may themselves contain
        // dashes ("msg-len-2" references "msg-len").
        if let Some(index) = string.rfind(['+', '-']).filter(|&index| index > 0) {
            let (reference, adjustment) = string.split_at(index);
            if adjustment.len() > 1 && adjustment[1..].chars().all(|c| c.is_ascii_digit()) {
                return Ok(Self {
                    reference: reference.trim_end().to_owned(),
                    adjustment: adjustment
                        .parse()
                        .map_err(LengthExprParseError::InvalidAdjustment)?,
                });
            }
        }

        Ok(Self {
            reference: string.to_owned(),
            adjustment: 0,
        })
    }
}

impl Display for LengthExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reference)?;
        if self.adjustment != 0 {
            write!(f, "{:+}", self.adjustment)?;
        }
        Ok(())
    }
}

/// One field in a message template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// A fixed-width unsigned integer, written big-endian.
    UInt {
        /// Numeric identity, unique within a template.
        id: u32,
        /// Name used to address the field in value maps.
        name: String,
        /// Width in bytes (1..=8). `None` declares a length placeholder that defaults to
        /// [`DEFAULT_LENGTH_WIDTH`] and must be referenced by a later payload field.
        width: Option<usize>,
    },

    /// A raw byte span whose length is derived from an earlier integer field.
    Payload {
        /// Name used to address the span in value maps.
        name: String,
        /// How to compute the span's length from an earlier field.
        length: LengthExpr,
    },
}

impl Field {
    /// A fixed-width unsigned integer field.
    pub fn uint(id: u32, name: impl Into<String>, width: impl Into<Option<usize>>) -> Self {
        Field::UInt {
            id,
            name: name.into(),
            width: width.into(),
        }
    }

    /// A payload field named [`DEFAULT_PAYLOAD_NAME`] with the given length expression.
    pub fn payload(expression: &str) -> Result<Self, LengthExprParseError> {
        Self::named_payload(DEFAULT_PAYLOAD_NAME, expression)
    }

    /// A payload field with an explicit name.
    pub fn named_payload(
        name: impl Into<String>,
        expression: &str,
    ) -> Result<Self, LengthExprParseError> {
        Ok(Field::Payload {
            name: name.into(),
            length: expression.parse()?,
        })
    }

    /// The field's name.
    pub fn name(&self) -> &str {
        match self {
            Field::UInt { name, .. } | Field::Payload { name, .. } => name,
        }
    }
}
