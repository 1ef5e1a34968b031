//! `SchemaRPC` Core: service definitions, glossary, request encoding, and response decoding.
//!
//! Everything in this crate is pure: no I/O, no clocks, no shared state. The
//! client crate layers configuration, signing, and transport on top.

pub mod decode;
pub mod definition;
pub mod encode;
pub mod glossary;
pub mod method;
pub mod params;
pub mod scalar;

pub use decode::{
    build_messages, DecodeError, DecodedRecord, DecodedResponse, DecodedValue, Message,
    ResponseDecoder,
};
pub use definition::{
    DefinitionError, Field, FieldKind, Operation, Representation, Representations,
    ServiceDefinition,
};
pub use encode::{build_path, build_request_body, to_query_string, EncodeError, EncodedParams};
pub use glossary::{Glossary, GlossaryError, GlossaryTerm};
pub use method::{HttpMethod, UnsupportedMethod};
pub use params::{FileUpload, Param, ParamMap};
pub use scalar::{unmarshal_scalar, CoercionError, ScalarType};
