//! Vote and acknowledgement counting for the coordinator

use twopc_core::CohortCount;

/// Counter of positive replies in the current phase.
///
/// Reset on every phase that aggregates replies. The protocol has no
/// sender identity on the wire, so the tally counts messages, not voters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Tally {
    count: usize,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one reply and return the new total
    pub fn record(&mut self) -> usize {
        self.count += 1;
        self.count
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Every cohort has replied
    pub fn is_complete(&self, required: CohortCount) -> bool {
        self.count == required.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_completes_at_exactly_n() {
        for n in 1..=6 {
            let required = CohortCount::new(n).unwrap();
            let mut tally = Tally::new();

            for i in 1..n {
                assert_eq!(tally.record(), i);
                assert!(!tally.is_complete(required));
            }

            tally.record();
            assert!(tally.is_complete(required));
        }
    }

    #[test]
    fn test_tally_reset() {
        let mut tally = Tally::new();
        tally.record();
        tally.record();
        tally.reset();

        assert_eq!(tally.count(), 0);
        assert!(!tally.is_complete(CohortCount::new(1).unwrap()));
    }
}
