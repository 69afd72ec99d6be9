/// A logical control queue channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Admin queue, used for firmware commands.
    Admin,
    /// PF/VF mailbox.
    Mailbox,
    Sideband,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Admin => write!(f, "admin"),
            Self::Mailbox => write!(f, "mailbox"),
            Self::Sideband => write!(f, "sideband"),
        }
    }
}

/// The registers that control one ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueRegisters {
    pub head: u32,
    pub tail: u32,
    pub len: u32,
    /// Base address, low 32 bits.
    pub bal: u32,
    /// Base address, high 32 bits.
    pub bah: u32,
}

/// Register layout of a channel: the send and receive ring registers and the bit masks
/// of the length and head registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRegisters {
    pub sq: QueueRegisters,
    pub rq: QueueRegisters,
    pub len_mask: u32,
    pub len_enable: u32,
    /// Set by firmware when it hit a critical error.
    pub len_crit: u32,
    pub head_mask: u32,
}

impl ChannelRegisters {
    pub const LEN_MASK: u32 = 0x3FF;
    pub const LEN_ENABLE: u32 = 1 << 31;
    pub const LEN_CRIT: u32 = 1 << 30;
    pub const HEAD_MASK: u32 = 0x3FF;

    /// The admin queue layout.
    pub const fn admin() -> Self {
        Self::with_base(0x0008_0000)
    }

    /// A layout with the admin register stride starting at `base`. Mailbox and sideband
    /// channels use the same stride at a device-specific base.
    pub const fn with_base(base: u32) -> Self {
        Self {
            sq: QueueRegisters {
                bal: base,
                bah: base + 0x100,
                len: base + 0x200,
                head: base + 0x300,
                tail: base + 0x400,
            },
            rq: QueueRegisters {
                bal: base + 0x80,
                bah: base + 0x180,
                len: base + 0x280,
                head: base + 0x380,
                tail: base + 0x480,
            },
            len_mask: Self::LEN_MASK,
            len_enable: Self::LEN_ENABLE,
            len_crit: Self::LEN_CRIT,
            head_mask: Self::HEAD_MASK,
        }
    }

    /// Returns `true` if the critical bit is set in the given length register value.
    #[inline]
    pub const fn is_critical(&self, len: u32) -> bool {
        len & self.len_crit != 0
    }
}

impl Default for ChannelRegisters {
    fn default() -> Self {
        Self::admin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_layout() {
        let regs = ChannelRegisters::admin();
        assert_eq!(regs.sq.bal, 0x0008_0000);
        assert_eq!(regs.sq.tail, 0x0008_0400);
        assert_eq!(regs.rq.bah, 0x0008_0180);
        assert_eq!(regs.rq.head, 0x0008_0380);
        assert!(regs.is_critical(ChannelRegisters::LEN_CRIT | 64));
        assert!(!regs.is_critical(ChannelRegisters::LEN_ENABLE | 64));
    }
}
