use std::fmt;

/// Divides `n` by `d`, rounding up. Returns `n` unchanged when `d` is zero.
#[inline]
pub const fn div_round_up(n: u32, d: u32) -> u32 {
    if d == 0 {
        return n;
    }
    (n + d - 1) / d
}

/// Rounds `n` to the nearest multiple of `m` (ties round up).
#[inline]
pub const fn round_to_num(n: u32, m: u32) -> u32 {
    if m == 0 {
        return n;
    }
    ((n + m / 2) / m) * m
}

/// A bitmap of traffic classes. Bit `n` set means TC `n` is enabled.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TcBitmap(u8);

impl TcBitmap {
    /// An empty bitmap.
    pub const EMPTY: Self = Self(0);
    /// Only TC 0 enabled.
    pub const TC0: Self = Self(1);

    pub const fn new(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Returns `true` if the given TC is enabled.
    #[inline]
    pub const fn is_set(&self, tc: u8) -> bool {
        tc < constants::MAX_TRAFFIC_CLASS && self.0 & (1 << tc) != 0
    }

    #[inline]
    pub fn set(&mut self, tc: u8) {
        if tc < constants::MAX_TRAFFIC_CLASS {
            self.0 |= 1 << tc;
        }
    }

    #[inline]
    pub fn clear(&mut self, tc: u8) {
        if tc < constants::MAX_TRAFFIC_CLASS {
            self.0 &= !(1 << tc);
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterates over the enabled traffic classes in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..constants::MAX_TRAFFIC_CLASS).filter(move |tc| self.is_set(*tc))
    }
}

impl fmt::Debug for TcBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TcBitmap({:#010b})", self.0)
    }
}

impl From<u8> for TcBitmap {
    fn from(bits: u8) -> Self {
        Self(bits)
    }
}

/// Iterates over every traffic class index.
pub fn traffic_classes() -> impl Iterator<Item = u8> {
    0..constants::MAX_TRAFFIC_CLASS
}

#[allow(non_upper_case_globals)]
pub mod constants {
    pub const KiB: u32 = 1024;
    pub const MiB: u32 = 1024 * KiB;

    /// Maximum number of traffic classes per port.
    pub const MAX_TRAFFIC_CLASS: u8 = 8;
    /// Maximum number of layers in the Tx scheduler topology.
    pub const MAX_TOPO_LAYERS: u8 = 9;
    /// Maximum number of branches in the default topology.
    pub const MAX_BRANCHES: u8 = 8;
    /// Largest indirect buffer accepted by the admin queue.
    pub const AQ_MAX_BUF_LEN: usize = 4096;
    /// Buffers larger than this need the large-buffer descriptor flag.
    pub const AQ_LARGE_BUF: usize = 512;
}
