//! Streaming pack writer.

use std::io::Write;

use bytes::BytesMut;

use crate::error::PackError;
use crate::frame::{ContainerKind, FrameStack};
use crate::tag::{self, PackType, TERMINATOR, VARINT_MAX_LEN};

/// Default staging buffer capacity in bytes.
const BUFFER_SIZE: usize = 4096;

/// Writes one pack to a byte sink.
///
/// Fields are emitted with strictly increasing 1-based ids per container;
/// passing `id == 0` assigns the next id in sequence. Bytes are staged in
/// an internal buffer and spilled to the sink when the buffer fills; a
/// single write larger than the buffer bypasses staging entirely.
///
/// To build a pack in memory, use a `Vec<u8>` sink and take it back from
/// [`finish`](Self::finish).
pub struct PackWriter<W> {
    sink: W,
    buf: BytesMut,
    capacity: usize,
    stack: FrameStack,
    written: u64,
}

impl<W: Write> PackWriter<W> {
    pub fn new(sink: W) -> Self {
        Self::with_capacity(BUFFER_SIZE, sink)
    }

    /// Creates a writer with the given staging buffer capacity.
    pub fn with_capacity(capacity: usize, sink: W) -> Self {
        assert!(capacity > 0, "staging capacity must be non-zero");
        Self {
            sink,
            buf: BytesMut::with_capacity(capacity),
            capacity,
            stack: FrameStack::new(),
            written: 0,
        }
    }

    /// Defers an explicit null: the gap is folded into the next emitted
    /// field's id delta and costs zero bytes on the wire.
    pub fn write_null(&mut self) -> &mut Self {
        self.stack.top_mut().null_pending += 1;
        self
    }

    pub fn write_bool(&mut self, id: u32, value: bool) -> Result<&mut Self, PackError> {
        self.write_tag(PackType::Bool, id, u64::from(value))?;
        Ok(self)
    }

    /// Writes the field only when `value != default`; otherwise the field
    /// is elided and the reader reproduces the default.
    pub fn write_bool_opt(
        &mut self,
        id: u32,
        value: bool,
        default: bool,
    ) -> Result<&mut Self, PackError> {
        if value == default {
            return Ok(self.write_null());
        }
        self.write_bool(id, value)
    }

    pub fn write_i32(&mut self, id: u32, value: i32) -> Result<&mut Self, PackError> {
        self.write_tag(PackType::I32, id, u64::from(tag::zigzag_i32(value)))?;
        Ok(self)
    }

    pub fn write_i32_opt(
        &mut self,
        id: u32,
        value: i32,
        default: i32,
    ) -> Result<&mut Self, PackError> {
        if value == default {
            return Ok(self.write_null());
        }
        self.write_i32(id, value)
    }

    pub fn write_i64(&mut self, id: u32, value: i64) -> Result<&mut Self, PackError> {
        self.write_tag(PackType::I64, id, tag::zigzag_i64(value))?;
        Ok(self)
    }

    pub fn write_i64_opt(
        &mut self,
        id: u32,
        value: i64,
        default: i64,
    ) -> Result<&mut Self, PackError> {
        if value == default {
            return Ok(self.write_null());
        }
        self.write_i64(id, value)
    }

    pub fn write_u32(&mut self, id: u32, value: u32) -> Result<&mut Self, PackError> {
        self.write_tag(PackType::U32, id, u64::from(value))?;
        Ok(self)
    }

    pub fn write_u32_opt(
        &mut self,
        id: u32,
        value: u32,
        default: u32,
    ) -> Result<&mut Self, PackError> {
        if value == default {
            return Ok(self.write_null());
        }
        self.write_u32(id, value)
    }

    pub fn write_u64(&mut self, id: u32, value: u64) -> Result<&mut Self, PackError> {
        self.write_tag(PackType::U64, id, value)?;
        Ok(self)
    }

    pub fn write_u64_opt(
        &mut self,
        id: u32,
        value: u64,
        default: u64,
    ) -> Result<&mut Self, PackError> {
        if value == default {
            return Ok(self.write_null());
        }
        self.write_u64(id, value)
    }

    /// Writes a timestamp as zig-zag seconds since the Unix epoch.
    pub fn write_time(&mut self, id: u32, value: i64) -> Result<&mut Self, PackError> {
        self.write_tag(PackType::Time, id, tag::zigzag_i64(value))?;
        Ok(self)
    }

    pub fn write_time_opt(
        &mut self,
        id: u32,
        value: i64,
        default: i64,
    ) -> Result<&mut Self, PackError> {
        if value == default {
            return Ok(self.write_null());
        }
        self.write_time(id, value)
    }

    /// Writes raw in-process address bits. The resulting pack must not
    /// cross a process or persistence boundary.
    pub fn write_ptr(&mut self, id: u32, value: u64) -> Result<&mut Self, PackError> {
        self.write_tag(PackType::Ptr, id, value)?;
        Ok(self)
    }

    pub fn write_ptr_opt(&mut self, id: u32, value: Option<u64>) -> Result<&mut Self, PackError> {
        match value {
            None => Ok(self.write_null()),
            Some(value) => self.write_ptr(id, value),
        }
    }

    pub fn write_str(&mut self, id: u32, value: &str) -> Result<&mut Self, PackError> {
        self.write_tag(PackType::Str, id, u64::from(!value.is_empty()))?;
        if !value.is_empty() {
            self.write_varint(value.len() as u64)?;
            self.push(value.as_bytes())?;
        }
        Ok(self)
    }

    pub fn write_str_opt(&mut self, id: u32, value: Option<&str>) -> Result<&mut Self, PackError> {
        match value {
            None => Ok(self.write_null()),
            Some(value) => self.write_str(id, value),
        }
    }

    pub fn write_bin(&mut self, id: u32, value: &[u8]) -> Result<&mut Self, PackError> {
        self.write_tag(PackType::Bin, id, u64::from(!value.is_empty()))?;
        if !value.is_empty() {
            self.write_varint(value.len() as u64)?;
            self.push(value)?;
        }
        Ok(self)
    }

    pub fn write_bin_opt(&mut self, id: u32, value: Option<&[u8]>) -> Result<&mut Self, PackError> {
        match value {
            None => Ok(self.write_null()),
            Some(value) => self.write_bin(id, value),
        }
    }

    pub fn begin_array(&mut self, id: u32) -> Result<&mut Self, PackError> {
        self.write_tag(PackType::Array, id, 0)?;
        self.stack.push(ContainerKind::Array);
        Ok(self)
    }

    pub fn end_array(&mut self) -> Result<&mut Self, PackError> {
        self.end_container(ContainerKind::Array)
    }

    pub fn begin_obj(&mut self, id: u32) -> Result<&mut Self, PackError> {
        self.write_tag(PackType::Obj, id, 0)?;
        self.stack.push(ContainerKind::Object);
        Ok(self)
    }

    pub fn end_obj(&mut self) -> Result<&mut Self, PackError> {
        self.end_container(ContainerKind::Object)
    }

    /// Emits the root terminator, flushes staged bytes, and returns the
    /// sink. Every begun container must already be ended.
    pub fn finish(mut self) -> Result<W, PackError> {
        assert_eq!(self.stack.depth(), 1, "pack finished with open containers");

        self.push(&[TERMINATOR])?;
        self.flush_stage()?;
        self.sink.flush()?;
        tracing::debug!(bytes = self.written, "pack finished");

        Ok(self.sink)
    }

    fn end_container(&mut self, kind: ContainerKind) -> Result<&mut Self, PackError> {
        assert!(
            self.stack.depth() > 1 && self.stack.top().kind == kind,
            "not in {kind}"
        );

        self.push(&[TERMINATOR])?;
        self.stack.pop();
        Ok(self)
    }

    /// Emits the tag byte and any trailing id/value varints, consuming
    /// pending nulls into the id delta.
    fn write_tag(&mut self, ty: PackType, id: u32, value: u64) -> Result<(), PackError> {
        let (id, delta) = {
            let top = self.stack.top_mut();
            let id = if id == 0 {
                top.id_last + top.null_pending + 1
            } else {
                assert!(
                    id > top.id_last + top.null_pending,
                    "field id {id} out of order"
                );
                id
            };
            top.null_pending = 0;
            (id, id - top.id_last - 1)
        };

        let packed = tag::pack(ty, delta, value);
        self.push(&[packed.byte])?;
        if packed.id_rem > 0 {
            self.write_varint(packed.id_rem)?;
        }
        if packed.value_rem > 0 {
            self.write_varint(packed.value_rem)?;
        }

        self.stack.top_mut().id_last = id;
        Ok(())
    }

    fn write_varint(&mut self, mut value: u64) -> Result<(), PackError> {
        let mut tmp = [0u8; VARINT_MAX_LEN];
        let mut len = 0;

        while value >= 0x80 {
            tmp[len] = value as u8 | 0x80;
            value >>= 7;
            len += 1;
        }
        tmp[len] = value as u8;

        self.push(&tmp[..=len])
    }

    fn push(&mut self, bytes: &[u8]) -> Result<(), PackError> {
        if self.buf.len() + bytes.len() <= self.capacity {
            self.buf.extend_from_slice(bytes);
            return Ok(());
        }

        self.flush_stage()?;

        if bytes.len() <= self.capacity {
            self.buf.extend_from_slice(bytes);
        } else {
            // Oversized for the staging buffer: straight through to the sink.
            self.sink.write_all(bytes)?;
            self.written += bytes.len() as u64;
        }
        Ok(())
    }

    fn flush_stage(&mut self) -> Result<(), PackError> {
        if !self.buf.is_empty() {
            self.sink.write_all(&self.buf)?;
            self.written += self.buf.len() as u64;
            tracing::trace!(len = self.buf.len(), "flushed staging buffer");
            self.buf.clear();
        }
        Ok(())
    }
}
