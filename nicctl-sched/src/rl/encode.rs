use super::{MAX_BW, MIN_BW};

const RL_PROF_MULTIPLIER: u64 = 10_000;
const TS_MULTIPLIER: u64 = 32;
const RL_PROF_FRACTION: u64 = 512;
/// The multiplier must exceed this for the encoding to be accurate enough.
const ACCURACY_BYTES: u64 = 128;
const MAX_EXPONENT: u32 = 64;

/// The clock-relative fields of a rate limiter profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RlEncoding {
    pub rl_multiply: u16,
    pub wake_up_calc: u16,
    /// Timeslot exponent.
    pub rl_encode: u16,
}

impl RlEncoding {
    /// Encodes `bw` (kbps) against a PSM clock of `psm_hz`.
    ///
    /// Picks the smallest timeslot exponent whose multiplier is above the accuracy
    /// threshold. Returns `None` when `bw` is outside [`MIN_BW`] ..= [`MAX_BW`] or no
    /// exponent qualifies.
    pub fn new(bw: u32, psm_hz: u64) -> Option<Self> {
        if !(MIN_BW..=MAX_BW).contains(&bw) {
            return None;
        }

        let bytes_per_sec = u64::from(bw) * 1000 / 8;
        for i in 0..MAX_EXPONENT {
            let Some(div) = 1u64.checked_shl(i).and_then(|p| p.checked_mul(TS_MULTIPLIER)) else {
                break;
            };
            let ts_rate = psm_hz / div;
            if ts_rate == 0 {
                continue;
            }

            let mv = round_div(bytes_per_sec * RL_PROF_MULTIPLIER / ts_rate, RL_PROF_MULTIPLIER);
            if mv > ACCURACY_BYTES {
                return Some(Self {
                    rl_multiply: mv as u16,
                    wake_up_calc: calc_wakeup(bw, psm_hz),
                    rl_encode: i as u16,
                });
            }
        }

        None
    }
}

/// Computes the wake-up field for `bw` (kbps).
///
/// Clock cycles per byte above 63 are stored as an integer with bit 15 set, smaller
/// values as a 6.9 fixed point number.
pub(crate) fn calc_wakeup(bw: u32, psm_hz: u64) -> u16 {
    let bytes_per_sec = (u64::from(bw) * 1000 / 8).max(1);
    let wakeup_int = psm_hz / bytes_per_sec;
    if wakeup_int > 63 {
        return (1 << 15) | wakeup_int as u16;
    }

    let wakeup_a = RL_PROF_MULTIPLIER * psm_hz / bytes_per_sec;
    let wakeup_b = RL_PROF_MULTIPLIER * wakeup_int;
    let mut wakeup_f = wakeup_a - wakeup_b;
    if wakeup_f > RL_PROF_MULTIPLIER / 2 {
        wakeup_f += 1;
    }
    let wakeup_f_int = wakeup_f * RL_PROF_FRACTION / RL_PROF_MULTIPLIER;

    ((wakeup_int as u16) << 9) | (wakeup_f_int as u16 & 0x1ff)
}

#[inline]
fn round_div(n: u64, d: u64) -> u64 {
    (n + d / 2) / d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PsmClock;

    const PSM: u64 = PsmClock::Mhz367.hz();

    #[test]
    fn encodes_one_megabit() {
        let enc = RlEncoding::new(1000, PSM).unwrap();
        assert_eq!(enc.rl_encode, 14);
        assert_eq!(enc.rl_multiply, 178);
        // 2941 cycles per byte
        assert_eq!(enc.wake_up_calc, 0x8000 | 2941);
    }

    #[test]
    fn wakeup_fixed_point() {
        assert_eq!(calc_wakeup(2_000_000, PSM), (1 << 9) | 240);
        assert_eq!(calc_wakeup(40_000_000, PSM), 37);
        assert_eq!(calc_wakeup(MAX_BW, PSM), 15);
    }

    #[test]
    fn out_of_range() {
        assert_eq!(RlEncoding::new(MIN_BW - 1, PSM), None);
        assert_eq!(RlEncoding::new(MAX_BW + 1, PSM), None);
        assert!(RlEncoding::new(MIN_BW, PSM).is_some());
        assert!(RlEncoding::new(MAX_BW, PSM).is_some());
    }

    #[test]
    fn multiplier_above_threshold_everywhere() {
        for clock in [PsmClock::Mhz367, PsmClock::Mhz416, PsmClock::Mhz446, PsmClock::Mhz390] {
            for bw in [MIN_BW, 1000, 10_000, 123_456, 1_000_000, 25_000_000, MAX_BW] {
                let enc = RlEncoding::new(bw, clock.hz()).unwrap();
                assert!(u64::from(enc.rl_multiply) > ACCURACY_BYTES, "{bw} kbps at {clock:?}");
                // One exponent less must not have been accurate enough
                if enc.rl_encode > 0 {
                    let ts_rate = clock.hz() / ((1u64 << (enc.rl_encode - 1)) * TS_MULTIPLIER);
                    let bps = u64::from(bw) * 1000 / 8;
                    assert!(round_div(bps * RL_PROF_MULTIPLIER / ts_rate, RL_PROF_MULTIPLIER) <= ACCURACY_BYTES);
                }
            }
        }
    }
}
