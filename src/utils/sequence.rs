/// Default number of retraces a completion may lag behind its submission before
/// it is considered a counter wrap-around instead of a bogus report.
pub const WRAP_THRESHOLD: u32 = 10;

/// A retrace sequence number, whose comparison takes into account the wrapping-around
/// behavior of the hardware counter.
///
/// The hardware counter is 32 bits wide, any wider value handed to the scheduler is
/// truncated to match it.
#[derive(Debug, Copy, Clone, Default, Hash)]
pub struct Sequence(pub(crate) u32);

impl PartialEq for Sequence {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Sequence {}

impl PartialOrd for Sequence {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        let distance = if self.0 > other.0 {
            self.0 - other.0
        } else {
            other.0 - self.0
        };
        if distance < u32::MAX / 2 {
            self.0.partial_cmp(&other.0)
        } else {
            // wrap-around occurred, invert comparison
            other.0.partial_cmp(&self.0)
        }
    }
}

impl From<u32> for Sequence {
    fn from(n: u32) -> Self {
        Sequence(n)
    }
}

impl From<Sequence> for u32 {
    fn from(sequence: Sequence) -> u32 {
        sequence.0
    }
}

impl Sequence {
    /// The zero sequence, reported whenever no valid timing is available
    pub const ZERO: Sequence = Sequence(0);

    /// Truncate a client supplied value to the width of the hardware counter
    #[inline]
    pub fn truncate(value: u64) -> Sequence {
        Sequence((value & 0xffff_ffff) as u32)
    }

    /// Raw value of the counter
    #[inline]
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Checks if a sequence was reached after or is equal to another given sequence
    pub fn is_no_older_than(&self, other: &Sequence) -> bool {
        other <= self
    }

    /// Adds `n` retraces, wrapping around like the hardware counter
    #[inline]
    pub fn wrapping_add(self, n: u32) -> Sequence {
        Sequence(self.0.wrapping_add(n))
    }

    /// Subtracts `n` retraces, wrapping around like the hardware counter
    #[inline]
    pub fn wrapping_sub(self, n: u32) -> Sequence {
        Sequence(self.0.wrapping_sub(n))
    }

    /// Checks whether a completion reported at `self` for a request submitted at `submitted`
    /// went backwards by less than `threshold` retraces.
    ///
    /// A completion lagging further behind is accepted as a counter wrap-around.
    #[inline]
    pub fn regressed_from(&self, submitted: &Sequence, threshold: u32) -> bool {
        self.0 < submitted.0 && submitted.0 - self.0 < threshold
    }

    /// Computes the absolute sequence a retrace wait has to target, given the current sequence
    /// of the output.
    ///
    /// `target`, `divisor` and `remainder` follow the usual swap-interval semantics: without a
    /// divisor, or while `target` lies in the future, the wait targets `target` (clamped to the
    /// current sequence). Otherwise the wait targets the next sequence after the current one for
    /// which `sequence % divisor == remainder`.
    ///
    /// A flip only becomes visible on the retrace after it was queued, so `flip` waits
    /// one retrace earlier.
    pub fn retrace_target(self, target: Sequence, divisor: u32, remainder: u32, flip: bool) -> Sequence {
        let current = self.0;
        let mut target = target.0;
        if flip && target > 0 {
            target -= 1;
        }

        if divisor == 0 || current < target {
            return Sequence(target.max(current));
        }

        let mut next = current.wrapping_sub(current % divisor).wrapping_add(remainder);
        if next <= current {
            next = next.wrapping_add(divisor);
        }
        Sequence(next.wrapping_sub(flip as u32))
    }
}
