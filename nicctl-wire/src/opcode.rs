/// Admin queue command opcodes used by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    GetVersion = 0x0001,
    /// Get the default scheduler topology.
    GetDfltTopo = 0x0400,
    AddSchedElems = 0x0401,
    CfgSchedElems = 0x0403,
    GetSchedElems = 0x0404,
    MoveSchedElems = 0x0408,
    SuspendSchedElems = 0x0409,
    ResumeSchedElems = 0x040A,
    DeleteSchedElems = 0x040F,
    AddRlProfiles = 0x0410,
    QueryRlProfiles = 0x0411,
    QuerySchedRes = 0x0412,
    QueryNodeToRoot = 0x0413,
    RemoveRlProfiles = 0x0415,
    CfgNodeAttr = 0x0419,
    AddTxqs = 0x0C30,
    DisTxqs = 0x0C31,
}

impl Opcode {
    /// Returns `true` for commands that carry an indirect buffer.
    pub const fn is_indirect(&self) -> bool {
        !matches!(self, Opcode::GetVersion)
    }
}

impl TryFrom<u16> for Opcode {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Opcode::GetVersion),
            0x0400 => Ok(Opcode::GetDfltTopo),
            0x0401 => Ok(Opcode::AddSchedElems),
            0x0403 => Ok(Opcode::CfgSchedElems),
            0x0404 => Ok(Opcode::GetSchedElems),
            0x0408 => Ok(Opcode::MoveSchedElems),
            0x0409 => Ok(Opcode::SuspendSchedElems),
            0x040A => Ok(Opcode::ResumeSchedElems),
            0x040F => Ok(Opcode::DeleteSchedElems),
            0x0410 => Ok(Opcode::AddRlProfiles),
            0x0411 => Ok(Opcode::QueryRlProfiles),
            0x0412 => Ok(Opcode::QuerySchedRes),
            0x0413 => Ok(Opcode::QueryNodeToRoot),
            0x0415 => Ok(Opcode::RemoveRlProfiles),
            0x0419 => Ok(Opcode::CfgNodeAttr),
            0x0C30 => Ok(Opcode::AddTxqs),
            0x0C31 => Ok(Opcode::DisTxqs),
            _ => Err(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_values() {
        for op in [Opcode::AddSchedElems, Opcode::RemoveRlProfiles, Opcode::DisTxqs] {
            assert_eq!(Opcode::try_from(op as u16), Ok(op));
        }
        assert_eq!(Opcode::try_from(0x0402), Err(0x0402));
    }
}
