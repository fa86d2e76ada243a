//! Streaming pack reader.

use std::io::{self, Read};

use bytes::{Buf, BytesMut};

use crate::error::PackError;
use crate::frame::{ContainerKind, FrameStack};
use crate::tag::{self, PackType, TERMINATOR, VARINT_MAX_LEN};

/// Default staging buffer capacity in bytes.
const BUFFER_SIZE: usize = 4096;

/// One-slot lookahead over the next undecoded tag in the current container.
#[derive(Debug, Clone, Copy)]
enum Lookahead {
    Empty,
    Field { id: u32, ty: PackType, value: u64 },
    Terminator,
}

/// Reads one pack from a byte source.
///
/// Fields are served by id; requesting an id beyond the next one on the
/// wire skips the intervening fields, and fields absent from the wire are
/// nulls. The reader pulls from the source exactly the bytes the pack
/// needs, so a pack can sit in the middle of a larger stream.
pub struct PackReader<R> {
    source: Option<R>,
    buf: BytesMut,
    capacity: usize,
    stack: FrameStack,
    next: Lookahead,
}

impl<'a> PackReader<&'a [u8]> {
    /// Reads a pack already held in memory.
    pub fn from_slice(data: &'a [u8]) -> Self {
        Self {
            source: None,
            buf: BytesMut::from(data),
            capacity: BUFFER_SIZE,
            stack: FrameStack::new(),
            next: Lookahead::Empty,
        }
    }
}

impl<R: Read> PackReader<R> {
    pub fn new(source: R) -> Self {
        Self::with_capacity(BUFFER_SIZE, source)
    }

    /// Creates a reader with the given staging buffer capacity.
    pub fn with_capacity(capacity: usize, source: R) -> Self {
        assert!(capacity > 0, "staging capacity must be non-zero");
        Self {
            source: Some(source),
            buf: BytesMut::with_capacity(capacity),
            capacity,
            stack: FrameStack::new(),
            next: Lookahead::Empty,
        }
    }

    /// Decodes the next tag into the lookahead if none is cached. Returns
    /// `false` once the current container's terminator is reached; the
    /// terminator is consumed by the matching `end` call, not here.
    pub fn next(&mut self) -> Result<bool, PackError> {
        if matches!(self.next, Lookahead::Empty) {
            self.load_next()?;
        }
        Ok(matches!(self.next, Lookahead::Field { .. }))
    }

    /// Id of the cached next field, or `None` at the container terminator.
    pub fn id(&self) -> Option<u32> {
        match self.next {
            Lookahead::Field { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Type of the cached next field, or `None` at the container terminator.
    pub fn field_type(&self) -> Option<PackType> {
        match self.next {
            Lookahead::Field { ty, .. } => Some(ty),
            _ => None,
        }
    }

    /// Peeks whether the field is absent from the wire (null). Fields with
    /// lower ids than the cached one are skipped, but the requested id is
    /// not marked read.
    pub fn null(&mut self, id: u32) -> Result<bool, PackError> {
        let id = self.resolve_id(id)?;
        self.seek(id)?;
        Ok(self.absent(id))
    }

    pub fn read_bool(&mut self, id: u32) -> Result<bool, PackError> {
        Ok(self.consume(id, PackType::Bool)? != 0)
    }

    /// Reads the field, or returns `default` when it is absent.
    pub fn read_bool_opt(&mut self, id: u32, default: bool) -> Result<bool, PackError> {
        match self.consume_opt(id, PackType::Bool)? {
            Some(value) => Ok(value != 0),
            None => Ok(default),
        }
    }

    pub fn read_i32(&mut self, id: u32) -> Result<i32, PackError> {
        let value = self.consume(id, PackType::I32)?;
        Ok(tag::unzigzag_i32(narrow_u32(value)?))
    }

    pub fn read_i32_opt(&mut self, id: u32, default: i32) -> Result<i32, PackError> {
        match self.consume_opt(id, PackType::I32)? {
            Some(value) => Ok(tag::unzigzag_i32(narrow_u32(value)?)),
            None => Ok(default),
        }
    }

    pub fn read_i64(&mut self, id: u32) -> Result<i64, PackError> {
        Ok(tag::unzigzag_i64(self.consume(id, PackType::I64)?))
    }

    pub fn read_i64_opt(&mut self, id: u32, default: i64) -> Result<i64, PackError> {
        match self.consume_opt(id, PackType::I64)? {
            Some(value) => Ok(tag::unzigzag_i64(value)),
            None => Ok(default),
        }
    }

    pub fn read_u32(&mut self, id: u32) -> Result<u32, PackError> {
        narrow_u32(self.consume(id, PackType::U32)?)
    }

    pub fn read_u32_opt(&mut self, id: u32, default: u32) -> Result<u32, PackError> {
        match self.consume_opt(id, PackType::U32)? {
            Some(value) => narrow_u32(value),
            None => Ok(default),
        }
    }

    pub fn read_u64(&mut self, id: u32) -> Result<u64, PackError> {
        self.consume(id, PackType::U64)
    }

    pub fn read_u64_opt(&mut self, id: u32, default: u64) -> Result<u64, PackError> {
        Ok(self.consume_opt(id, PackType::U64)?.unwrap_or(default))
    }

    /// Reads a timestamp as seconds since the Unix epoch.
    pub fn read_time(&mut self, id: u32) -> Result<i64, PackError> {
        Ok(tag::unzigzag_i64(self.consume(id, PackType::Time)?))
    }

    pub fn read_time_opt(&mut self, id: u32, default: i64) -> Result<i64, PackError> {
        match self.consume_opt(id, PackType::Time)? {
            Some(value) => Ok(tag::unzigzag_i64(value)),
            None => Ok(default),
        }
    }

    /// Reads raw address bits. The integer is only meaningful inside the
    /// process that wrote the pack; callers who want a pointer cast at
    /// their own risk.
    pub fn read_ptr(&mut self, id: u32) -> Result<u64, PackError> {
        self.consume(id, PackType::Ptr)
    }

    pub fn read_ptr_opt(&mut self, id: u32) -> Result<Option<u64>, PackError> {
        self.consume_opt(id, PackType::Ptr)
    }

    pub fn read_str(&mut self, id: u32) -> Result<String, PackError> {
        let present = self.consume(id, PackType::Str)? != 0;
        self.read_str_payload(present)
    }

    /// Reads the field, or returns `None` when it is absent. An empty
    /// string on the wire is `Some("")`, not `None`.
    pub fn read_str_opt(&mut self, id: u32) -> Result<Option<String>, PackError> {
        match self.consume_opt(id, PackType::Str)? {
            None => Ok(None),
            Some(value) => self.read_str_payload(value != 0).map(Some),
        }
    }

    pub fn read_bin(&mut self, id: u32) -> Result<Vec<u8>, PackError> {
        let present = self.consume(id, PackType::Bin)? != 0;
        self.read_bin_payload(present)
    }

    pub fn read_bin_opt(&mut self, id: u32) -> Result<Option<Vec<u8>>, PackError> {
        match self.consume_opt(id, PackType::Bin)? {
            None => Ok(None),
            Some(value) => self.read_bin_payload(value != 0).map(Some),
        }
    }

    pub fn begin_array(&mut self, id: u32) -> Result<(), PackError> {
        self.consume(id, PackType::Array)?;
        self.stack.push(ContainerKind::Array);
        Ok(())
    }

    pub fn end_array(&mut self) -> Result<(), PackError> {
        self.end_container(ContainerKind::Array)
    }

    pub fn begin_obj(&mut self, id: u32) -> Result<(), PackError> {
        self.consume(id, PackType::Obj)?;
        self.stack.push(ContainerKind::Object);
        Ok(())
    }

    pub fn end_obj(&mut self) -> Result<(), PackError> {
        self.end_container(ContainerKind::Object)
    }

    /// Drains every remaining open frame, including the root, leaving the
    /// source positioned exactly past the root terminator.
    pub fn finish(&mut self) -> Result<(), PackError> {
        while self.stack.depth() > 0 {
            self.drain_frame()?;
            self.stack.pop();
            self.next = Lookahead::Empty;
        }
        Ok(())
    }

    fn end_container(&mut self, kind: ContainerKind) -> Result<(), PackError> {
        if self.stack.depth() == 1 || self.stack.top().kind != kind {
            return Err(PackError::Format(format!("not in {kind}")));
        }

        self.drain_frame()?;
        self.stack.pop();
        // The parent frame resumes decoding from a fresh tag.
        self.next = Lookahead::Empty;
        Ok(())
    }

    /// Skips any unread fields up to the current container's terminator.
    fn drain_frame(&mut self) -> Result<(), PackError> {
        self.seek(u32::MAX)?;
        debug_assert!(matches!(self.next, Lookahead::Terminator));
        Ok(())
    }

    fn resolve_id(&self, id: u32) -> Result<u32, PackError> {
        let last = self.stack.top().id_last;
        if id == 0 {
            Ok(last + 1)
        } else if id <= last {
            Err(PackError::Format(format!("field {id} was already read")))
        } else {
            Ok(id)
        }
    }

    fn consume(&mut self, id: u32, expect: PackType) -> Result<u64, PackError> {
        let id = self.resolve_id(id)?;
        self.seek(id)?;
        self.take(id, expect)
    }

    fn consume_opt(&mut self, id: u32, expect: PackType) -> Result<Option<u64>, PackError> {
        let id = self.resolve_id(id)?;
        self.seek(id)?;
        if self.absent(id) {
            self.stack.top_mut().id_last = id;
            return Ok(None);
        }
        self.take(id, expect).map(Some)
    }

    /// Decodes tags until the cached one has id >= `target`, consuming
    /// skipped fields (including any length-prefixed payloads) off the wire.
    fn seek(&mut self, target: u32) -> Result<(), PackError> {
        loop {
            if matches!(self.next, Lookahead::Empty) {
                self.load_next()?;
            }
            match self.next {
                Lookahead::Terminator => return Ok(()),
                Lookahead::Field { id, ty, value } => {
                    if id >= target {
                        return Ok(());
                    }
                    if ty.has_size() && value != 0 {
                        let len = self.read_varint()?;
                        self.skip_bytes(len)?;
                    }
                    self.stack.top_mut().id_last = id;
                    self.next = Lookahead::Empty;
                }
                Lookahead::Empty => unreachable!(),
            }
        }
    }

    /// Takes the cached tag, which `seek` has positioned at or past `id`.
    fn take(&mut self, id: u32, expect: PackType) -> Result<u64, PackError> {
        match self.next {
            Lookahead::Field { id: next_id, ty, value } if next_id == id => {
                if ty != expect {
                    return Err(PackError::Format(format!(
                        "field {id} is type '{ty}' but expected '{expect}'"
                    )));
                }
                self.stack.top_mut().id_last = id;
                self.next = Lookahead::Empty;
                Ok(value)
            }
            _ => Err(PackError::Format(format!("field {id} does not exist"))),
        }
    }

    fn absent(&self, id: u32) -> bool {
        match self.next {
            Lookahead::Terminator => true,
            Lookahead::Field { id: next_id, .. } => id < next_id,
            Lookahead::Empty => unreachable!("seek always leaves a cached tag"),
        }
    }

    /// Decodes one tag (and its trailing varints) into the lookahead.
    fn load_next(&mut self) -> Result<(), PackError> {
        self.require(1)?;
        let byte = self.buf.get_u8();

        if byte == TERMINATOR {
            self.next = Lookahead::Terminator;
            return Ok(());
        }

        let raw = tag::unpack(byte)?;
        let mut delta = u64::from(raw.id_low);
        if raw.more_id {
            delta |= self.read_varint()? << raw.id_shift;
        }
        let value = if raw.more_value { self.read_varint()? } else { raw.value };

        if delta > u64::from(u32::MAX) {
            return Err(PackError::Format("field id out of range".into()));
        }
        let id = u64::from(self.stack.top().id_last) + delta + 1;
        if id >= u64::from(u32::MAX) {
            return Err(PackError::Format("field id out of range".into()));
        }

        self.next = Lookahead::Field { id: id as u32, ty: raw.ty, value };
        Ok(())
    }

    fn read_varint(&mut self) -> Result<u64, PackError> {
        let mut result = 0u64;

        for i in 0..VARINT_MAX_LEN {
            self.require(1)?;
            let byte = self.buf.get_u8();
            result |= u64::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }

        Err(PackError::Format("unterminated base-128 integer".into()))
    }

    fn read_str_payload(&mut self, present: bool) -> Result<String, PackError> {
        if !present {
            return Ok(String::new());
        }
        let len = self.read_varint()?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes)
            .map_err(|e| PackError::Format(format!("invalid UTF-8 string: {e}")))
    }

    fn read_bin_payload(&mut self, present: bool) -> Result<Vec<u8>, PackError> {
        if !present {
            return Ok(Vec::new());
        }
        let len = self.read_varint()?;
        self.read_bytes(len)
    }

    fn read_bytes(&mut self, len: u64) -> Result<Vec<u8>, PackError> {
        let len = usize::try_from(len)
            .map_err(|_| PackError::Format("size out of range".into()))?;

        let mut out = Vec::with_capacity(len.min(self.capacity));
        while out.len() < len {
            let n = self.require(len - out.len())?;
            out.extend_from_slice(&self.buf[..n]);
            self.buf.advance(n);
        }
        Ok(out)
    }

    fn skip_bytes(&mut self, len: u64) -> Result<(), PackError> {
        let mut left = len;
        while left > 0 {
            let want = usize::try_from(left).unwrap_or(usize::MAX);
            let n = self.require(want)?;
            self.buf.advance(n);
            left -= n as u64;
        }
        Ok(())
    }

    /// Ensures bytes are buffered, pulling from the source if bound, and
    /// returns how many of the requested bytes are available. The source
    /// is never asked for more than `want`, so the pack's trailing bytes
    /// stay untouched in the stream.
    fn require(&mut self, want: usize) -> Result<usize, PackError> {
        let mut remaining = self.buf.remaining();
        if remaining >= want {
            return Ok(want);
        }

        if let Some(source) = self.source.as_mut() {
            debug_assert_eq!(remaining, 0, "stream reads are consumed in full");

            let take = want.min(self.capacity);
            self.buf.resize(take, 0);
            let mut filled = 0;
            while filled < take {
                match source.read(&mut self.buf[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            self.buf.truncate(filled);
            if filled > 0 {
                tracing::trace!(len = filled, "refilled read buffer");
            }
            remaining = filled;
        }

        if remaining == 0 {
            return Err(PackError::Format("unexpected EOF".into()));
        }
        Ok(remaining.min(want))
    }
}

fn narrow_u32(value: u64) -> Result<u32, PackError> {
    u32::try_from(value).map_err(|_| PackError::Format("value out of range".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::PackWriter;
    use proptest::prelude::*;

    /// Delivers one byte per `read` call, the worst-case chunking.
    struct Trickle<'a> {
        data: &'a [u8],
        pos: usize,
    }

    impl<'a> Trickle<'a> {
        fn new(data: &'a [u8]) -> Self {
            Self { data, pos: 0 }
        }
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pos == self.data.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.data[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    fn pack(build: impl FnOnce(&mut PackWriter<Vec<u8>>) -> Result<(), PackError>) -> Vec<u8> {
        let mut writer = PackWriter::new(Vec::new());
        build(&mut writer).unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn bool_true_at_id_one() {
        let mut reader = PackReader::from_slice(&[0x38, 0x00]);
        assert!(reader.read_bool(1).unwrap());
        reader.finish().unwrap();
        assert_eq!(reader.buf.remaining(), 0);
    }

    #[test]
    fn u32_small_and_large_form() {
        let mut reader = PackReader::from_slice(&[0xA0, 0x00]);
        assert_eq!(reader.read_u32(1).unwrap(), 0);

        let mut reader = PackReader::from_slice(&[0xA8, 0x4D, 0x00]);
        assert_eq!(reader.read_u32(1).unwrap(), 77);
    }

    #[test]
    fn empty_then_nonempty_string() {
        let mut reader = PackReader::from_slice(&[0x80, 0x88, 0x02, 0x61, 0x62, 0x00]);
        assert_eq!(reader.read_str(1).unwrap(), "");
        assert_eq!(reader.read_str(2).unwrap(), "ab");
        reader.finish().unwrap();
    }

    #[test]
    fn object_with_negative_i32() {
        let mut reader = PackReader::from_slice(&[0x60, 0x44, 0x00, 0x00]);
        reader.begin_obj(1).unwrap();
        assert_eq!(reader.read_i32(1).unwrap(), -1);
        reader.end_obj().unwrap();
        reader.finish().unwrap();
        assert_eq!(reader.buf.remaining(), 0);
    }

    #[test]
    fn array_iteration_with_next() {
        let mut reader = PackReader::from_slice(&[0x10, 0x38, 0x30, 0x38, 0x00, 0x00]);
        reader.begin_array(1).unwrap();

        let mut values = Vec::new();
        while reader.next().unwrap() {
            let id = reader.id().unwrap();
            assert_eq!(reader.field_type(), Some(PackType::Bool));
            values.push(reader.read_bool(id).unwrap());
        }
        assert_eq!(values, [true, false, true]);
        assert_eq!(reader.id(), None);

        reader.end_array().unwrap();
        reader.finish().unwrap();
    }

    #[test]
    fn next_does_not_clobber_cached_field() {
        let mut reader = PackReader::from_slice(&[0x38, 0x00]);
        assert!(reader.next().unwrap());
        assert!(reader.next().unwrap());
        assert_eq!(reader.id(), Some(1));
        assert!(reader.read_bool(1).unwrap());
    }

    #[test]
    fn skip_forward_over_mixed_types() {
        let bytes = pack(|w| {
            w.write_u32(1, 7)?
                .write_str(2, "skip me")?
                .write_bin(3, &[1, 2, 3])?
                .write_bool(4, true)?;
            Ok(())
        });

        // Jumping straight to id 4 must consume the str/bin payloads.
        let mut reader = PackReader::from_slice(&bytes);
        assert!(reader.read_bool(4).unwrap());
        reader.finish().unwrap();
        assert_eq!(reader.buf.remaining(), 0);

        // And an intermediate target stops at the right field.
        let mut reader = PackReader::from_slice(&bytes);
        assert_eq!(reader.read_str(2).unwrap(), "skip me");
        assert!(reader.read_bool(4).unwrap());
        reader.finish().unwrap();
    }

    #[test]
    fn null_peeks_without_consuming() {
        let bytes = pack(|w| w.write_u32(3, 9).map(|_| ()));
        let mut reader = PackReader::from_slice(&bytes);

        assert!(reader.null(1).unwrap());
        assert!(reader.null(2).unwrap());
        assert!(!reader.null(3).unwrap());
        assert_eq!(reader.read_u32(3).unwrap(), 9);
    }

    #[test]
    fn absent_fields_yield_defaults() {
        let bytes = pack(|w| w.write_u32(5, 9).map(|_| ()));
        let mut reader = PackReader::from_slice(&bytes);

        assert!(reader.read_bool_opt(1, true).unwrap());
        assert_eq!(reader.read_i64_opt(2, -4).unwrap(), -4);
        assert_eq!(reader.read_str_opt(3).unwrap(), None);
        assert_eq!(reader.read_u32(5).unwrap(), 9);
    }

    #[test]
    fn default_elision_round_trip() {
        let bytes = pack(|w| {
            w.write_u32_opt(1, 0, 0)?
                .write_bool_opt(2, true, false)?
                .write_i32_opt(3, -5, -5)?;
            Ok(())
        });

        let mut reader = PackReader::from_slice(&bytes);
        assert_eq!(reader.read_u32_opt(1, 0).unwrap(), 0);
        assert!(reader.read_bool_opt(2, false).unwrap());
        assert_eq!(reader.read_i32_opt(3, -5).unwrap(), -5);
        reader.finish().unwrap();
    }

    #[test]
    fn empty_string_is_present_not_null() {
        let bytes = pack(|w| w.write_str(1, "").map(|_| ()));
        let mut reader = PackReader::from_slice(&bytes);
        assert!(!reader.null(1).unwrap());
        assert_eq!(reader.read_str_opt(1).unwrap(), Some(String::new()));
    }

    #[test]
    fn time_and_ptr_round_trip() {
        let bytes = pack(|w| {
            w.write_time(1, -1_234_567)?.write_ptr(2, 0xDEAD_BEEF)?;
            Ok(())
        });
        let mut reader = PackReader::from_slice(&bytes);
        assert_eq!(reader.read_time(1).unwrap(), -1_234_567);
        assert_eq!(reader.read_ptr(2).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn nested_containers() {
        let bytes = pack(|w| {
            w.begin_obj(1)?;
            w.write_str(1, "inner")?;
            w.begin_array(2)?;
            w.write_u32(0, 1)?.write_u32(0, 2)?;
            w.end_array()?;
            w.end_obj()?;
            w.write_bool(2, true)?;
            Ok(())
        });

        let mut reader = PackReader::from_slice(&bytes);
        reader.begin_obj(1).unwrap();
        assert_eq!(reader.read_str(1).unwrap(), "inner");
        reader.begin_array(2).unwrap();
        assert_eq!(reader.read_u32(0).unwrap(), 1);
        assert_eq!(reader.read_u32(0).unwrap(), 2);
        reader.end_array().unwrap();
        reader.end_obj().unwrap();
        assert!(reader.read_bool(2).unwrap());
        reader.finish().unwrap();
    }

    #[test]
    fn container_end_drains_unread_fields() {
        let bytes = pack(|w| {
            w.begin_obj(1)?;
            w.write_str(1, "unread")?.write_u64(2, 99)?;
            w.end_obj()?;
            w.write_bool(2, true)?;
            Ok(())
        });

        let mut reader = PackReader::from_slice(&bytes);
        reader.begin_obj(1).unwrap();
        reader.end_obj().unwrap();
        assert!(reader.read_bool(2).unwrap());
        reader.finish().unwrap();
    }

    #[test]
    fn streamed_one_byte_at_a_time() {
        let bytes = pack(|w| {
            w.write_u32(1, 500_000)?
                .write_str(2, "streamed payload")?
                .begin_array(3)?
                .write_bool(0, true)?
                .end_array()?;
            Ok(())
        });

        let mut reader = PackReader::new(Trickle::new(&bytes));
        assert_eq!(reader.read_u32(1).unwrap(), 500_000);
        assert_eq!(reader.read_str(2).unwrap(), "streamed payload");
        reader.begin_array(3).unwrap();
        assert!(reader.read_bool(1).unwrap());
        reader.end_array().unwrap();
        reader.finish().unwrap();
    }

    #[test]
    fn streamed_with_tiny_staging_buffer() {
        let payload = "x".repeat(100);
        let bytes = pack(|w| w.write_str(1, &payload).map(|_| ()));

        let mut reader = PackReader::with_capacity(8, Trickle::new(&bytes));
        assert_eq!(reader.read_str(1).unwrap(), payload);
        reader.finish().unwrap();
    }

    #[test]
    fn truncated_pack_is_unexpected_eof() {
        // String tag promising two payload bytes, stream ends after one.
        let mut reader = PackReader::from_slice(&[0x88, 0x02, 0x61]);
        let err = reader.read_str(1).unwrap_err();
        assert!(err.to_string().contains("unexpected EOF"), "{err}");
    }

    #[test]
    fn missing_terminator_is_unexpected_eof() {
        let mut reader = PackReader::from_slice(&[0x38]);
        assert!(reader.read_bool(1).unwrap());
        let err = reader.finish().unwrap_err();
        assert!(err.to_string().contains("unexpected EOF"), "{err}");
    }

    #[test]
    fn unterminated_varint_is_rejected() {
        let mut bytes = vec![0xA8]; // u32 large form, value varint follows
        bytes.extend_from_slice(&[0x80; 11]);
        let mut reader = PackReader::from_slice(&bytes);
        let err = reader.read_u32(1).unwrap_err();
        assert!(err.to_string().contains("unterminated"), "{err}");
    }

    #[test]
    fn type_mismatch_is_fatal() {
        let mut reader = PackReader::from_slice(&[0x38, 0x00]);
        let err = reader.read_u32(1).unwrap_err();
        assert!(
            err.to_string().contains("is type 'bool' but expected 'u32'"),
            "{err}"
        );
    }

    #[test]
    fn rereading_an_id_is_rejected() {
        let bytes = pack(|w| w.write_u32(1, 1).map(|_| ()));
        let mut reader = PackReader::from_slice(&bytes);
        reader.read_u32(1).unwrap();
        let err = reader.read_u32(1).unwrap_err();
        assert!(err.to_string().contains("was already read"), "{err}");
    }

    #[test]
    fn reading_past_a_field_is_rejected() {
        let bytes = pack(|w| w.write_u32(2, 1).map(|_| ()));
        let mut reader = PackReader::from_slice(&bytes);
        let err = reader.read_u32(1).unwrap_err();
        assert!(err.to_string().contains("field 1 does not exist"), "{err}");
    }

    #[test]
    fn end_outside_container_is_rejected() {
        let mut reader = PackReader::from_slice(&[0x00]);
        let err = reader.end_array().unwrap_err();
        assert!(err.to_string().contains("not in array"), "{err}");

        let bytes = pack(|w| {
            w.begin_array(1)?;
            w.end_array()?;
            Ok(())
        });
        let mut reader = PackReader::from_slice(&bytes);
        reader.begin_array(1).unwrap();
        let err = reader.end_obj().unwrap_err();
        assert!(err.to_string().contains("not in object"), "{err}");
    }

    #[test]
    fn unknown_type_nibble_is_rejected() {
        let mut reader = PackReader::from_slice(&[0xC4, 0x00]);
        let err = reader.read_u32(1).unwrap_err();
        assert!(err.to_string().contains("unknown field type"), "{err}");
    }

    #[test]
    fn oversize_u32_value_is_rejected() {
        let bytes = pack(|w| w.write_u64(1, u64::from(u32::MAX) + 1).map(|_| ()));
        // Rewrite the tag nibble from u64 to u32, keeping the payload.
        let mut bytes = bytes;
        bytes[0] = (bytes[0] & 0x0F) | 0xA0;
        let mut reader = PackReader::from_slice(&bytes);
        let err = reader.read_u32(1).unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
    }

    proptest! {
        #[test]
        fn round_trip_arbitrary_fields(
            a in any::<bool>(),
            b in any::<i32>(),
            c in any::<i64>(),
            d in any::<u32>(),
            e in any::<u64>(),
            s in ".{0,40}",
            bin in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let bytes = pack(|w| {
                w.write_bool(1, a)?
                    .write_i32(2, b)?
                    .write_i64(3, c)?
                    .write_u32(4, d)?
                    .write_u64(5, e)?
                    .write_str(6, &s)?
                    .write_bin(7, &bin)?;
                Ok(())
            });

            let mut reader = PackReader::from_slice(&bytes);
            prop_assert_eq!(reader.read_bool(1).unwrap(), a);
            prop_assert_eq!(reader.read_i32(2).unwrap(), b);
            prop_assert_eq!(reader.read_i64(3).unwrap(), c);
            prop_assert_eq!(reader.read_u32(4).unwrap(), d);
            prop_assert_eq!(reader.read_u64(5).unwrap(), e);
            prop_assert_eq!(reader.read_str(6).unwrap(), s);
            prop_assert_eq!(reader.read_bin(7).unwrap(), bin);
            reader.finish().unwrap();
            prop_assert_eq!(reader.buf.remaining(), 0);
        }

        #[test]
        fn skip_forward_reads_the_same_value(target in 1u32..=4) {
            let bytes = pack(|w| {
                w.write_u64(1, 11)?
                    .write_str(2, "two")?
                    .write_bin(3, &[3, 3, 3])?
                    .write_u64(4, 44)?;
                Ok(())
            });

            let mut reader = PackReader::from_slice(&bytes);
            match target {
                1 => prop_assert_eq!(reader.read_u64(1).unwrap(), 11),
                2 => prop_assert_eq!(reader.read_str(2).unwrap(), "two"),
                3 => prop_assert_eq!(reader.read_bin(3).unwrap(), vec![3, 3, 3]),
                _ => prop_assert_eq!(reader.read_u64(4).unwrap(), 44),
            }
            reader.finish().unwrap();
            prop_assert_eq!(reader.buf.remaining(), 0);
        }
    }
}
