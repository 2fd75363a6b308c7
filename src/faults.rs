//! Storage failure injection.
//!
//! The in-process stores never fail on their own. A [`FaultPlan`] is shared
//! by the stores and consulted before every storage step, so tests and
//! simulations can make a step fail either a fixed number of times or until
//! healed. A tripped step has no effect on the data.

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// A storage step that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// Point reads and leaderboard listings.
    Read,
    /// The global increment.
    Increment,
    /// The (user, button) click record write.
    UserRecord,
    /// The profile aggregate write.
    Profile,
}

impl FaultPoint {
    const ALL: [FaultPoint; 4] = [
        FaultPoint::Read,
        FaultPoint::Increment,
        FaultPoint::UserRecord,
        FaultPoint::Profile,
    ];

    const fn index(self) -> usize {
        match self {
            FaultPoint::Read => 0,
            FaultPoint::Increment => 1,
            FaultPoint::UserRecord => 2,
            FaultPoint::Profile => 3,
        }
    }
}

/// Thread-safe failure switchboard.
///
/// # Examples
///
/// ```rust
/// use interruttore::faults::{FaultPlan, FaultPoint};
///
/// let plan = FaultPlan::new();
/// plan.fail_next(FaultPoint::Increment, 1);
///
/// assert!(plan.trip(FaultPoint::Increment));
/// assert!(!plan.trip(FaultPoint::Increment));
/// ```
#[derive(Default)]
pub struct FaultPlan {
    armed: [AtomicU32; 4],
    always: [AtomicBool; 4],
}

impl FaultPlan {
    /// A plan with no failures armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` attempts at `point` fail.
    pub fn fail_next(&self, point: FaultPoint, n: u32) {
        self.armed[point.index()].fetch_add(n, Ordering::AcqRel);
    }

    /// Makes every attempt at `point` fail until [`heal`](Self::heal).
    pub fn fail_always(&self, point: FaultPoint) {
        self.always[point.index()].store(true, Ordering::Release);
    }

    /// Clears persistent and armed failures at `point`.
    pub fn heal(&self, point: FaultPoint) {
        self.always[point.index()].store(false, Ordering::Release);
        self.armed[point.index()].store(0, Ordering::Release);
    }

    /// Returns `true` if this attempt at `point` must fail, consuming one
    /// armed failure if any.
    pub fn trip(&self, point: FaultPoint) -> bool {
        if self.always[point.index()].load(Ordering::Acquire) {
            return true;
        }
        self.armed[point.index()]
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Debug for FaultPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_map();
        for point in FaultPoint::ALL {
            let always = self.always[point.index()].load(Ordering::Relaxed);
            let armed = self.armed[point.index()].load(Ordering::Relaxed);
            if always {
                list.entry(&point, &"always");
            } else if armed > 0 {
                list.entry(&point, &armed);
            }
        }
        list.finish()
    }
}
