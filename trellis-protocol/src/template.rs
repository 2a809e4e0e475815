//! Ordered message templates: build-time validation plus the encode/decode walk.

use std::collections::BTreeMap;

use crate::cursor::{ByteReader, ByteWriter, MAX_UINT_WIDTH};
use crate::field::{DEFAULT_LENGTH_WIDTH, Field, LengthExpr};

/// Errors from building a template.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// Two fields share a numeric id.
    #[error("duplicate field id {id}")]
    DuplicateFieldId {
        /// The id used twice.
        id: u32,
    },

    /// Two fields share a name.
    #[error("duplicate field name {name:?}")]
    DuplicateFieldName {
        /// The name used twice.
        name: String,
    },

    /// A payload expression references a field that is not an earlier integer field.
    #[error("length expression references unknown earlier field {reference:?}")]
    UnknownLengthReference {
        /// The reference that did not resolve.
        reference: String,
    },

    /// An integer field was declared with a width outside 1..=8 bytes.
    #[error("unsupported width {width} for field {name:?}")]
    UnsupportedWidth {
        /// The offending field's name.
        name: String,
        /// The requested width.
        width: usize,
    },

    /// A width-less integer field is not referenced by any payload field.
    #[error("field {name:?} has no width and no payload field derives its length")]
    DanglingLengthPlaceholder {
        /// The placeholder field's name.
        name: String,
    },
}

/// Errors from encoding a message.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The template itself is malformed.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// No value was supplied for a field that needs one.
    #[error("no value supplied for field {field:?}")]
    MissingValue {
        /// The field missing a value.
        field: String,
    },

    /// A value was supplied for an unknown field, or for a derived length field.
    #[error("field {field:?} does not take a caller-supplied value")]
    UnexpectedValue {
        /// The field that was addressed.
        field: String,
    },

    /// A value has the wrong kind for its field.
    #[error("field {field:?} expects a {expected} value")]
    WrongKind {
        /// The field the value was supplied for.
        field: String,
        /// The kind the field expects.
        expected: &'static str,
    },

    /// An integer value does not fit the field's width.
    #[error("value {value} does not fit in {width} bytes for field {field:?}")]
    ValueOverflow {
        /// The field being encoded.
        field: String,
        /// The value that did not fit.
        value: u64,
        /// The field's width in bytes.
        width: usize,
    },

    /// A derived length came out negative: the payload is shorter than its adjustment implies.
    #[error("derived length for field {field:?} is negative ({length})")]
    LengthUnderflow {
        /// The payload field whose length was derived.
        field: String,
        /// The negative length value.
        length: i64,
    },
}

/// Errors from decoding a message.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The template itself is malformed.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Fewer bytes remain than the next field requires.
    #[error("message truncated at field {field:?}: needed {needed} bytes, {remaining} remain")]
    Truncated {
        /// The field being decoded when bytes ran out.
        field: String,
        /// How many bytes the field required.
        needed: usize,
        /// How many bytes were left.
        remaining: usize,
    },

    /// Bytes remain after the last field was consumed.
    #[error("{remaining} trailing bytes after the last field")]
    TrailingBytes {
        /// How many bytes were left over.
        remaining: usize,
    },

    /// A derived length came out negative.
    #[error("derived length for field {field:?} is negative ({length})")]
    NegativeLength {
        /// The payload field whose length was derived.
        field: String,
        /// The negative length value.
        length: i64,
    },
}

/// A value supplied to or produced by a template field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// An unsigned integer for a fixed-width field.
    Uint(u64),
    /// Raw bytes for a payload field.
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// The integer value, when this is one.
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            FieldValue::Uint(value) => Some(*value),
            FieldValue::Bytes(_) => None,
        }
    }

    /// The raw bytes, when this is a payload value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Uint(_) => None,
            FieldValue::Bytes(bytes) => Some(bytes),
        }
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Uint(value)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(bytes: Vec<u8>) -> Self {
        FieldValue::Bytes(bytes)
    }
}

impl From<&[u8]> for FieldValue {
    fn from(bytes: &[u8]) -> Self {
        FieldValue::Bytes(bytes.to_vec())
    }
}

/// The field values produced by decoding one message, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    values: Vec<(String, FieldValue)>,
}

impl DecodedMessage {
    /// The value decoded for the named field.
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// The integer decoded for the named field.
    pub fn uint(&self, name: &str) -> Option<u64> {
        self.value(name).and_then(FieldValue::as_uint)
    }

    /// The bytes decoded for the named payload field.
    pub fn bytes(&self, name: &str) -> Option<&[u8]> {
        self.value(name).and_then(FieldValue::as_bytes)
    }

    /// Iterates the decoded fields in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> + '_ {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// An ordered, append-only collection of named fields describing one wire message layout.
///
/// Declaration order is wire order. Templates are independent of any transport: they decode raw
/// bytes received over an endpoint and encode raw bytes to hand to a send call.
#[derive(Debug, Clone)]
pub struct ProtocolTemplate {
    name: String,
    fields: Vec<Field>,
}

impl ProtocolTemplate {
    /// Creates an empty template.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// The template's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The fields in wire order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Appends a field.
    ///
    /// Building is append-only to keep wire order deterministic. Ids and names must be unique,
    /// and a payload expression must reference an integer field added earlier, so malformed
    /// layouts fail here rather than at decode time.
    pub fn add(&mut self, field: Field) -> Result<&mut Self, TemplateError> {
        if self
            .fields
            .iter()
            .any(|existing| existing.name() == field.name())
        {
            return Err(TemplateError::DuplicateFieldName {
                name: field.name().to_owned(),
            });
        }
        match &field {
            Field::UInt { id, name, width } => {
                if let Some(width) = width
                    && !(1..=MAX_UINT_WIDTH).contains(width)
                {
                    return Err(TemplateError::UnsupportedWidth {
                        name: name.clone(),
                        width: *width,
                    });
                }
                if self.uint_ids().any(|existing| existing == *id) {
                    return Err(TemplateError::DuplicateFieldId { id: *id });
                }
            }
            Field::Payload { length, .. } => {
                if self.resolve_reference(length).is_none() {
                    return Err(TemplateError::UnknownLengthReference {
                        reference: length.reference().to_owned(),
                    });
                }
            }
        }
        self.fields.push(field);
        Ok(self)
    }

    /// Encodes a message from the given values.
    ///
    /// Fields are written in declaration order: integers as big-endian values of exactly their
    /// width, payload bytes verbatim. An integer field referenced by a payload expression is
    /// derived: its value is computed as payload length minus adjustment and must not be
    /// supplied by the caller.
    pub fn encode(&self, values: &BTreeMap<String, FieldValue>) -> Result<Vec<u8>, EncodeError> {
        self.validate()?;

        // Derived length values, keyed by the index of the integer field they fill in.
        let mut derived: BTreeMap<usize, u64> = BTreeMap::new();
        for field in &self.fields {
            let Field::Payload { name, length } = field else {
                continue;
            };
            let payload = Self::bytes_value(values, name)?;
            let Some(index) = self.resolve_reference(length) else {
                return Err(TemplateError::UnknownLengthReference {
                    reference: length.reference().to_owned(),
                }
                .into());
            };
            let value = payload.len() as i64 - i64::from(length.adjustment());
            if value < 0 {
                return Err(EncodeError::LengthUnderflow {
                    field: name.clone(),
                    length: value,
                });
            }
            derived.insert(index, value as u64);
        }

        for name in values.keys() {
            let position = self
                .fields
                .iter()
                .position(|field| field.name() == name.as_str());
            match position {
                Some(position) if !derived.contains_key(&position) => {}
                _ => {
                    return Err(EncodeError::UnexpectedValue {
                        field: name.clone(),
                    });
                }
            }
        }

        let mut writer = ByteWriter::with_capacity(self.encoded_size_hint(values));
        for (index, field) in self.fields.iter().enumerate() {
            match field {
                Field::UInt { name, width, .. } => {
                    let width = width.unwrap_or(DEFAULT_LENGTH_WIDTH);
                    let value = match derived.get(&index) {
                        Some(&value) => value,
                        None => Self::uint_value(values, name)?,
                    };
                    if !writer.write_uint(value, width) {
                        return Err(EncodeError::ValueOverflow {
                            field: name.clone(),
                            value,
                            width,
                        });
                    }
                }
                Field::Payload { name, .. } => {
                    writer.write_slice(Self::bytes_value(values, name)?);
                }
            }
        }
        Ok(writer.into_bytes())
    }

    /// Decodes a message, consuming the entire input.
    ///
    /// Bytes remaining after the last field are an error; callers that frame several messages in
    /// one buffer must split them before decoding.
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedMessage, DecodeError> {
        self.validate()?;

        let mut reader = ByteReader::new(bytes);
        let mut uint_values: Vec<Option<u64>> = vec![None; self.fields.len()];
        let mut values: Vec<(String, FieldValue)> = Vec::with_capacity(self.fields.len());

        for (index, field) in self.fields.iter().enumerate() {
            match field {
                Field::UInt { name, width, .. } => {
                    let width = width.unwrap_or(DEFAULT_LENGTH_WIDTH);
                    let Some(value) = reader.read_uint(width) else {
                        return Err(DecodeError::Truncated {
                            field: name.clone(),
                            needed: width,
                            remaining: reader.remaining(),
                        });
                    };
                    uint_values[index] = Some(value);
                    values.push((name.clone(), FieldValue::Uint(value)));
                }
                Field::Payload { name, length } => {
                    let base = self
                        .resolve_reference(length)
                        .and_then(|reference| uint_values[reference]);
                    let Some(base) = base else {
                        return Err(TemplateError::UnknownLengthReference {
                            reference: length.reference().to_owned(),
                        }
                        .into());
                    };
                    let derived = i128::from(base) + i128::from(length.adjustment());
                    if derived < 0 {
                        return Err(DecodeError::NegativeLength {
                            field: name.clone(),
                            length: derived as i64,
                        });
                    }
                    let needed = usize::try_from(derived).unwrap_or(usize::MAX);
                    let Some(slice) = reader.read_slice(needed) else {
                        return Err(DecodeError::Truncated {
                            field: name.clone(),
                            needed,
                            remaining: reader.remaining(),
                        });
                    };
                    values.push((name.clone(), FieldValue::Bytes(slice.to_vec())));
                }
            }
        }

        if !reader.is_empty() {
            return Err(DecodeError::TrailingBytes {
                remaining: reader.remaining(),
            });
        }
        Ok(DecodedMessage { values })
    }

    /// Ids of the integer fields added so far.
    fn uint_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.fields.iter().filter_map(|field| match field {
            Field::UInt { id, .. } => Some(*id),
            Field::Payload { .. } => None,
        })
    }

    /// Resolves a length reference to the index of an integer field: by name first, then by
    /// numeric id when the reference parses as one.
    fn resolve_reference(&self, expression: &LengthExpr) -> Option<usize> {
        let by_name = self.fields.iter().position(|field| {
            matches!(field, Field::UInt { .. }) && field.name() == expression.reference()
        });
        by_name.or_else(|| {
            let id: u32 = expression.reference().parse().ok()?;
            self.fields
                .iter()
                .position(|field| matches!(field, Field::UInt { id: field_id, .. } if *field_id == id))
        })
    }

    /// Whether some payload field derives its length from the integer field at `index`.
    fn is_length_source(&self, index: usize) -> bool {
        self.fields.iter().any(|field| match field {
            Field::Payload { length, .. } => self.resolve_reference(length) == Some(index),
            Field::UInt { .. } => false,
        })
    }

    /// Fails when a width-less integer field has no payload field deriving its length.
    fn validate(&self) -> Result<(), TemplateError> {
        for (index, field) in self.fields.iter().enumerate() {
            if let Field::UInt {
                name, width: None, ..
            } = field
                && !self.is_length_source(index)
            {
                return Err(TemplateError::DanglingLengthPlaceholder { name: name.clone() });
            }
        }
        Ok(())
    }

    fn uint_value(values: &BTreeMap<String, FieldValue>, name: &str) -> Result<u64, EncodeError> {
        match values.get(name) {
            Some(FieldValue::Uint(value)) => Ok(*value),
            Some(FieldValue::Bytes(_)) => Err(EncodeError::WrongKind {
                field: name.to_owned(),
                expected: "integer",
            }),
            None => Err(EncodeError::MissingValue {
                field: name.to_owned(),
            }),
        }
    }

    fn bytes_value<'v>(
        values: &'v BTreeMap<String, FieldValue>,
        name: &str,
    ) -> Result<&'v [u8], EncodeError> {
        match values.get(name) {
            Some(FieldValue::Bytes(bytes)) => Ok(bytes),
            Some(FieldValue::Uint(_)) => Err(EncodeError::WrongKind {
                field: name.to_owned(),
                expected: "byte",
            }),
            None => Err(EncodeError::MissingValue {
                field: name.to_owned(),
            }),
        }
    }

    fn encoded_size_hint(&self, values: &BTreeMap<String, FieldValue>) -> usize {
        self.fields
            .iter()
            .map(|field| match field {
                Field::UInt { width, .. } => width.unwrap_or(DEFAULT_LENGTH_WIDTH),
                Field::Payload { name, .. } => values
                    .get(name.as_str())
                    .and_then(FieldValue::as_bytes)
                    .map_or(0, <[u8]>::len),
            })
            .sum()
    }
}
