use std::fmt;

/// A firmware return code, taken from the low byte of a descriptor's `retval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnCode {
    Ok,
    /// Operation not permitted.
    Perm,
    NoEntry,
    NoSuchElement,
    Interrupted,
    Io,
    NoDevice,
    TooBig,
    Again,
    NoMemory,
    Access,
    Fault,
    /// Device or resource busy.
    Busy,
    Exists,
    Invalid,
    NotTty,
    NoSpace,
    NotImplemented,
    Range,
    /// Command flushed because of a queue shutdown.
    Flushed,
    BadAddr,
    Mode,
    FileTooBig,
    Unknown(u8),
}

impl ReturnCode {
    /// Converts a raw `retval`, ignoring the firmware-internal high byte.
    pub const fn from_raw(retval: u16) -> Self {
        match (retval & 0xff) as u8 {
            0 => Self::Ok,
            1 => Self::Perm,
            2 => Self::NoEntry,
            3 => Self::NoSuchElement,
            4 => Self::Interrupted,
            5 => Self::Io,
            6 => Self::NoDevice,
            7 => Self::TooBig,
            8 => Self::Again,
            9 => Self::NoMemory,
            10 => Self::Access,
            11 => Self::Fault,
            12 => Self::Busy,
            13 => Self::Exists,
            14 => Self::Invalid,
            15 => Self::NotTty,
            16 => Self::NoSpace,
            17 => Self::NotImplemented,
            18 => Self::Range,
            19 => Self::Flushed,
            20 => Self::BadAddr,
            21 => Self::Mode,
            22 => Self::FileTooBig,
            other => Self::Unknown(other),
        }
    }

    pub const fn as_raw(&self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Perm => 1,
            Self::NoEntry => 2,
            Self::NoSuchElement => 3,
            Self::Interrupted => 4,
            Self::Io => 5,
            Self::NoDevice => 6,
            Self::TooBig => 7,
            Self::Again => 8,
            Self::NoMemory => 9,
            Self::Access => 10,
            Self::Fault => 11,
            Self::Busy => 12,
            Self::Exists => 13,
            Self::Invalid => 14,
            Self::NotTty => 15,
            Self::NoSpace => 16,
            Self::NotImplemented => 17,
            Self::Range => 18,
            Self::Flushed => 19,
            Self::BadAddr => 20,
            Self::Mode => 21,
            Self::FileTooBig => 22,
            Self::Unknown(raw) => *raw,
        }
    }

    #[inline]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    #[inline]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(raw) => write!(f, "unknown ({raw})"),
            other => write!(f, "{other:?} ({})", other.as_raw()),
        }
    }
}
