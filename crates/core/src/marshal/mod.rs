//! Value serializers.
//!
//! [`JsonMarshaller`] is the default; [`DeflateMarshaller`] wraps any
//! marshaller with bounded compression.

mod deflate;
mod json;
mod lossless;

pub use deflate::DeflateMarshaller;
pub use json::JsonMarshaller;
