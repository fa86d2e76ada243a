//! PackR — a compact, self-describing binary serialization format.
//!
//! A pack is a forward-only byte stream of typed, identified fields:
//! scalars, strings, binary blobs, and nested objects/arrays. Each field
//! begins with a one-byte tag that multiplexes the field type, the delta
//! from the previous field id, and (for small values) the value itself.
//! Readers skip fields they do not request and treat absent ids as nulls;
//! writers can elide default-valued fields, so schemas evolve in both
//! directions without breaking old packs.
//!
//! # Architecture
//!
//! - **`tag`** — tag byte bit layout, field types, zig-zag transforms
//! - **`frame`** — the stack of open object/array containers
//! - **`reader`** — pull-mode streaming decoder ([`PackReader`])
//! - **`writer`** — push-mode streaming encoder ([`PackWriter`])
//! - **`manifest`** — sample payload definition used by higher layers

pub mod error;
mod frame;
pub mod manifest;
pub mod reader;
mod tag;
pub mod writer;

pub use error::PackError;
pub use reader::PackReader;
pub use tag::PackType;
pub use writer::PackWriter;
