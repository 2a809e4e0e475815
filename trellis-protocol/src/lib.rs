//! Declarative binary message templates.
//!
//! A [`ProtocolTemplate`] lists named fields in wire order: fixed-width big-endian integers
//! ([`Field::uint`]) and payload spans whose length is derived from an earlier field
//! ([`Field::payload`]). A template describes a layout once, then encodes value maps into raw
//! bytes or decodes received bytes back into values. Templates carry no transport concerns; the
//! bytes they produce and consume travel over whatever endpoint the caller pairs them with.

#![forbid(unsafe_code)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod cursor;
mod field;
mod template;

pub use field::{
    DEFAULT_LENGTH_WIDTH, DEFAULT_PAYLOAD_NAME, Field, LengthExpr, LengthExprParseError,
};
pub use template::{
    DecodeError, DecodedMessage, EncodeError, FieldValue, ProtocolTemplate, TemplateError,
};
