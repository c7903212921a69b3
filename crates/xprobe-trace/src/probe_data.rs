//! 128-bit payload carried by data probes.

use std::fmt;

/// Opaque 128 bits of application data attached to a sample.
///
/// Built from any of the common integer shapes; the bytes are laid out
/// little-endian so that `from_u64s(lo, hi)` and `as_u64s()` round-trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ProbeData(u128);

impl ProbeData {
    pub const fn new(value: u128) -> Self {
        Self(value)
    }

    pub const fn from_u64s(lo: u64, hi: u64) -> Self {
        Self((hi as u128) << 64 | lo as u128)
    }

    pub fn from_u32s(words: [u32; 4]) -> Self {
        let mut value = 0u128;
        for (i, word) in words.into_iter().enumerate() {
            value |= (word as u128) << (32 * i);
        }
        Self(value)
    }

    pub fn from_u16s(words: [u16; 8]) -> Self {
        let mut value = 0u128;
        for (i, word) in words.into_iter().enumerate() {
            value |= (word as u128) << (16 * i);
        }
        Self(value)
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_le_bytes(bytes))
    }

    pub const fn value(self) -> u128 {
        self.0
    }

    pub const fn as_u64s(self) -> (u64, u64) {
        (self.0 as u64, (self.0 >> 64) as u64)
    }

    pub fn as_u32s(self) -> [u32; 4] {
        std::array::from_fn(|i| (self.0 >> (32 * i)) as u32)
    }

    pub fn as_u16s(self) -> [u16; 8] {
        std::array::from_fn(|i| (self.0 >> (16 * i)) as u16)
    }

    pub const fn to_bytes(self) -> [u8; 16] {
        self.0.to_le_bytes()
    }
}

macro_rules! impl_from_unsigned {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ProbeData {
                fn from(value: $ty) -> Self {
                    Self(value as u128)
                }
            }
        )*
    };
}

impl_from_unsigned!(u8, u16, u32, u64, u128, usize);

impl From<(u64, u64)> for ProbeData {
    fn from((lo, hi): (u64, u64)) -> Self {
        Self::from_u64s(lo, hi)
    }
}

impl From<[u32; 4]> for ProbeData {
    fn from(words: [u32; 4]) -> Self {
        Self::from_u32s(words)
    }
}

impl From<[u16; 8]> for ProbeData {
    fn from(words: [u16; 8]) -> Self {
        Self::from_u16s(words)
    }
}

impl From<[u8; 16]> for ProbeData {
    fn from(bytes: [u8; 16]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<ProbeData> for u128 {
    fn from(data: ProbeData) -> Self {
        data.0
    }
}

impl fmt::Display for ProbeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (lo, hi) = self.as_u64s();
        write!(f, "{hi:016x}{lo:016x}")
    }
}
