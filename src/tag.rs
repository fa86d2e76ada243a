//! Pack tag byte layout.
//!
//! Every field begins with a one-byte tag. The high four bits hold the
//! field type ([`PackType`]); the low four bits multiplex the id delta
//! and, for value-bearing types, part of the value:
//!
//! - integer-like types, value 0 or 1 (small form): bit 3 clear, bit 2 =
//!   value bit, bit 1 = more-id flag, bit 0 = id-delta low bit
//! - integer-like types, value >= 2 (large form): bit 3 set, bit 2 =
//!   more-id flag, bits 0-1 = id-delta low bits, full value in a trailing
//!   varint
//! - string/binary/bool: bit 3 = value bit (presence / non-zero size),
//!   bit 2 = more-id flag, bits 0-1 = id-delta low bits
//! - array/object: bit 3 = more-id flag, bits 0-2 = id-delta low bits
//!
//! A set more-id flag means a trailing varint carries the id-delta bits
//! that did not fit in the tag. A tag byte of `0x00` is the container
//! terminator.

use crate::error::PackError;

/// The container terminator byte; also ends the pack at the root level.
pub(crate) const TERMINATOR: u8 = 0x00;

/// Maximum encoded length of a base-128 varint carrying a `u64`.
pub(crate) const VARINT_MAX_LEN: usize = 10;

/// Field type carried in the high nibble of a tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PackType {
    /// Reserved sentinel; never appears on the wire.
    Unknown = 0,
    Array = 1,
    Bin = 2,
    Bool = 3,
    I32 = 4,
    I64 = 5,
    Obj = 6,
    /// Raw in-process address bits. Packs containing `Ptr` fields must
    /// not cross a process or persistence boundary.
    Ptr = 7,
    Str = 8,
    /// Seconds since the Unix epoch, zig-zag encoded.
    Time = 9,
    U32 = 10,
    U64 = 11,
}

impl PackType {
    /// The tag encodes only a presence / non-zero-size bit for the value.
    pub(crate) fn value_single_bit(self) -> bool {
        matches!(self, Self::Bin | Self::Bool | Self::Str)
    }

    /// Integer-like: the tag can inline small values, larger ones spill
    /// into a trailing varint.
    pub(crate) fn value_multi_bit(self) -> bool {
        matches!(
            self,
            Self::I32 | Self::I64 | Self::Ptr | Self::Time | Self::U32 | Self::U64
        )
    }

    /// A varint length prefix and payload follow when the value bit is set.
    pub(crate) fn has_size(self) -> bool {
        matches!(self, Self::Bin | Self::Str)
    }

    pub(crate) fn from_nibble(nibble: u8) -> Result<Self, PackError> {
        match nibble {
            1 => Ok(Self::Array),
            2 => Ok(Self::Bin),
            3 => Ok(Self::Bool),
            4 => Ok(Self::I32),
            5 => Ok(Self::I64),
            6 => Ok(Self::Obj),
            7 => Ok(Self::Ptr),
            8 => Ok(Self::Str),
            9 => Ok(Self::Time),
            10 => Ok(Self::U32),
            11 => Ok(Self::U64),
            _ => Err(PackError::Format(format!("unknown field type {nibble}"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Array => "array",
            Self::Bin => "bin",
            Self::Bool => "bool",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::Obj => "obj",
            Self::Ptr => "ptr",
            Self::Str => "str",
            Self::Time => "time",
            Self::U32 => "u32",
            Self::U64 => "u64",
        }
    }
}

impl std::fmt::Display for PackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A packed tag: the tag byte plus whatever did not fit inline.
/// `id_rem` and `value_rem` are emitted as trailing varints when non-zero.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Packed {
    pub byte: u8,
    pub id_rem: u64,
    pub value_rem: u64,
}

/// Packs a tag byte for a field with the given id delta and raw value
/// (already zig-zag converted for signed types). Small form is always
/// preferred when the value fits in one bit.
pub(crate) fn pack(ty: PackType, delta: u32, value: u64) -> Packed {
    let mut byte = (ty as u8) << 4;
    let mut id_rem = u64::from(delta);
    let mut value_rem = 0;

    if ty.value_multi_bit() {
        if value < 2 {
            byte |= (value as u8) << 2;
            byte |= (id_rem as u8) & 0x1;
            id_rem >>= 1;
            if id_rem > 0 {
                byte |= 0x2;
            }
        } else {
            byte |= 0x8;
            byte |= (id_rem as u8) & 0x3;
            id_rem >>= 2;
            if id_rem > 0 {
                byte |= 0x4;
            }
            value_rem = value;
        }
    } else if ty.value_single_bit() {
        byte |= ((value as u8) & 0x1) << 3;
        byte |= (id_rem as u8) & 0x3;
        id_rem >>= 2;
        if id_rem > 0 {
            byte |= 0x4;
        }
    } else {
        debug_assert_eq!(value, 0, "container tags carry no value");
        byte |= (id_rem as u8) & 0x7;
        id_rem >>= 3;
        if id_rem > 0 {
            byte |= 0x8;
        }
    }

    Packed {
        byte,
        id_rem,
        value_rem,
    }
}

/// An unpacked tag byte. `more_id` / `more_value` flag trailing varints;
/// the varint id bits are shifted left by `id_shift` before being merged
/// with `id_low`.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Unpacked {
    pub ty: PackType,
    pub id_low: u32,
    pub id_shift: u32,
    pub more_id: bool,
    pub value: u64,
    pub more_value: bool,
}

/// Unpacks a non-terminator tag byte.
pub(crate) fn unpack(byte: u8) -> Result<Unpacked, PackError> {
    let ty = PackType::from_nibble(byte >> 4)?;

    let unpacked = if ty.value_multi_bit() {
        if byte & 0x8 != 0 {
            Unpacked {
                ty,
                id_low: u32::from(byte & 0x3),
                id_shift: 2,
                more_id: byte & 0x4 != 0,
                value: 0,
                more_value: true,
            }
        } else {
            Unpacked {
                ty,
                id_low: u32::from(byte & 0x1),
                id_shift: 1,
                more_id: byte & 0x2 != 0,
                value: u64::from((byte >> 2) & 0x1),
                more_value: false,
            }
        }
    } else if ty.value_single_bit() {
        Unpacked {
            ty,
            id_low: u32::from(byte & 0x3),
            id_shift: 2,
            more_id: byte & 0x4 != 0,
            value: u64::from((byte >> 3) & 0x1),
            more_value: false,
        }
    } else {
        Unpacked {
            ty,
            id_low: u32::from(byte & 0x7),
            id_shift: 3,
            more_id: byte & 0x8 != 0,
            value: 0,
            more_value: false,
        }
    };

    Ok(unpacked)
}

/// Order-preserving signed-to-unsigned bijection: small-magnitude values
/// map to small varints.
pub(crate) fn zigzag_i64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub(crate) fn unzigzag_i64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

pub(crate) fn zigzag_i32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

pub(crate) fn unzigzag_i32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}
