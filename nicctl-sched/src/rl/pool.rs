use tracing::{debug, warn};

use nicctl_transport::CtlqError;
use nicctl_wire::rl::{RlProfileElem, RlType};

use super::{RlEncoding, DFLT_RL_PROF_ID, INVAL_PROF_ID, NO_SHARED_RL_PROF_ID};
use crate::{aq::Firmware, CommandTransport, SchedError};

/// A rate limiter profile known to firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RlProfile {
    pub layer: u8,
    pub rl_type: RlType,
    /// Bandwidth in kbps.
    pub bw: u32,
    /// Nodes currently configured with this profile.
    pub refs: u32,
    /// The profile as sent to firmware, with the assigned id.
    pub elem: RlProfileElem,
}

impl RlProfile {
    #[inline]
    pub fn id(&self) -> u16 {
        self.elem.profile_id
    }
}

/// Reference counted profiles, one list per layer.
#[derive(Debug)]
pub(crate) struct ProfilePool {
    layers: Vec<Vec<RlProfile>>,
    psm_hz: u64,
    /// Encoded burst size for new profiles.
    burst: u16,
}

impl ProfilePool {
    pub(crate) fn new(num_layers: u8, psm_hz: u64, burst: u16) -> Self {
        Self { layers: vec![Vec::new(); num_layers as usize], psm_hz, burst }
    }

    /// The id that means "no profile" for `rl_type`.
    pub(crate) const fn default_id(rl_type: RlType) -> u16 {
        match rl_type {
            RlType::Cir | RlType::Eir => DFLT_RL_PROF_ID,
            RlType::Srl => NO_SHARED_RL_PROF_ID,
        }
    }

    pub(crate) fn set_burst(&mut self, burst: u16) {
        self.burst = burst;
    }

    pub(crate) fn get(&self, layer: u8, rl_type: RlType, id: u16) -> Option<&RlProfile> {
        self.layers.get(layer as usize)?.iter().find(|p| p.rl_type == rl_type && p.id() == id)
    }

    pub(crate) fn find(&self, layer: u8, rl_type: RlType, bw: u32) -> Option<&RlProfile> {
        self.layers.get(layer as usize)?.iter().find(|p| p.rl_type == rl_type && p.bw == bw)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &RlProfile> {
        self.layers.iter().flatten()
    }

    pub(crate) fn len(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    /// Takes a reference on the profile for (`layer`, `rl_type`, `bw`), creating it in
    /// firmware when no node on the layer uses it yet.
    pub(crate) fn acquire<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        layer: u8,
        rl_type: RlType,
        bw: u32,
    ) -> Result<u16, SchedError> {
        let psm_hz = self.psm_hz;
        let burst = self.burst;
        let list = self.layers.get_mut(layer as usize).ok_or(SchedError::Param("profile layer"))?;

        if let Some(profile) = list.iter_mut().find(|p| p.rl_type == rl_type && p.bw == bw) {
            profile.refs += 1;
            return Ok(profile.id());
        }

        let enc = RlEncoding::new(bw, psm_hz).ok_or(SchedError::DoesNotExist)?;
        let req = RlProfileElem {
            level: layer + 1,
            flags: rl_type as u8,
            profile_id: 0,
            max_burst_size: burst,
            rl_multiply: enc.rl_multiply,
            wake_up_calc: enc.wake_up_calc,
            rl_encode: enc.rl_encode,
        };
        let elem = fw.add_rl_profile(&req)?;
        debug!(layer, ?rl_type, bw, id = elem.profile_id, "added rate limiter profile");

        list.push(RlProfile { layer, rl_type, bw, refs: 1, elem });
        Ok(elem.profile_id)
    }

    /// Drops a reference. The profile is removed from firmware when the last one goes.
    ///
    /// Default and unknown ids are ignored, as is a profile that has no references left.
    /// Firmware reporting the profile busy is not an error, the entry stays at zero
    /// references and is swept by [`ProfilePool::rm_unused`].
    pub(crate) fn release<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        layer: u8,
        rl_type: RlType,
        id: u16,
    ) -> Result<(), SchedError> {
        if id == Self::default_id(rl_type) || id == INVAL_PROF_ID {
            return Ok(());
        }
        let Some(list) = self.layers.get_mut(layer as usize) else {
            return Err(SchedError::Param("profile layer"));
        };
        let Some(pos) = list.iter().position(|p| p.rl_type == rl_type && p.id() == id) else {
            debug!(layer, ?rl_type, id, "releasing unknown profile");
            return Ok(());
        };

        let profile = &mut list[pos];
        if profile.refs == 0 {
            return Ok(());
        }
        profile.refs -= 1;
        if profile.refs > 0 {
            return Ok(());
        }

        match fw.remove_rl_profile(&profile.elem) {
            Ok(()) => {
                debug!(layer, ?rl_type, id, "removed rate limiter profile");
                list.remove(pos);
                Ok(())
            }
            Err(SchedError::Transport(CtlqError::Command(rc))) if rc.is_busy() => {
                debug!(layer, ?rl_type, id, "profile still in use by firmware");
                Ok(())
            }
            Err(e) => {
                warn!(layer, ?rl_type, id, err = %e, "failed to remove rate limiter profile");
                Err(e)
            }
        }
    }

    /// Removes every profile without references from firmware.
    pub(crate) fn rm_unused<T: CommandTransport>(&mut self, fw: &Firmware<T>) {
        for list in &mut self.layers {
            list.retain(|p| {
                if p.refs > 0 {
                    return true;
                }
                match fw.remove_rl_profile(&p.elem) {
                    Ok(()) => false,
                    Err(e) => {
                        debug!(layer = p.layer, id = p.id(), err = %e, "unused profile not removed");
                        true
                    }
                }
            });
        }
    }

    /// Removes every profile, referenced or not. Firmware failures are logged and the
    /// entries dropped regardless.
    pub(crate) fn clear<T: CommandTransport>(&mut self, fw: &Firmware<T>) {
        for list in &mut self.layers {
            for p in list.drain(..) {
                if let Err(e) = fw.remove_rl_profile(&p.elem) {
                    warn!(layer = p.layer, id = p.id(), err = %e, "failed to remove profile on clear");
                }
            }
        }
    }
}
