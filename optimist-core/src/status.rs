//! Status flags of a mutation record.
//!
//! Three independent groups share one integer:
//!
//! - lifecycle: [`Status::PENDING`], [`Status::OPTIMISTIC`], [`Status::FAILED`]
//! - operation: [`Status::ADDING`], [`Status::UPDATING`], [`Status::REMOVING`], [`Status::MOVING`]
//! - target: [`Status::DIRECT`], [`Status::INDIRECT`]
//!
//! Flags are combined with `|` and tested with `&` (or [`Status::contains`]).

use serde::{Deserialize, Serialize};
use std::{
    fmt::Display,
    ops::{BitAnd, BitOr, BitOrAssign},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(pub u16);

impl Status {
    pub const NONE: Status = Status(0);

    pub const PENDING: Status = Status(0b0000_0000_0001);
    pub const OPTIMISTIC: Status = Status(0b0000_0000_0010);
    pub const FAILED: Status = Status(0b0000_0000_0100);

    pub const ADDING: Status = Status(0b0000_0000_1000);
    pub const UPDATING: Status = Status(0b0000_0001_0000);
    pub const REMOVING: Status = Status(0b0000_0010_0000);
    pub const MOVING: Status = Status(0b0000_0100_0000);

    pub const DIRECT: Status = Status(0b0000_1000_0000);
    pub const INDIRECT: Status = Status(0b0001_0000_0000);

    pub const LIFECYCLE: Status = Status(0b0000_0000_0111);
    pub const OPERATION: Status = Status(0b0000_0111_1000);
    pub const TARGET: Status = Status(0b0001_1000_0000);

    const NAMES: [(Status, &'static str); 9] = [
        (Status::PENDING, "pending"),
        (Status::OPTIMISTIC, "optimistic"),
        (Status::FAILED, "failed"),
        (Status::ADDING, "adding"),
        (Status::UPDATING, "updating"),
        (Status::REMOVING, "removing"),
        (Status::MOVING, "moving"),
        (Status::DIRECT, "direct"),
        (Status::INDIRECT, "indirect"),
    ];

    #[inline]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// All bits of `other` are set in `self`.
    #[inline]
    pub const fn contains(self, other: Status) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersects(self, other: Status) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn without(self, other: Status) -> Status {
        Status(self.0 & !other.0)
    }

    #[inline]
    pub const fn lifecycle(self) -> Status {
        Status(self.0 & Self::LIFECYCLE.0)
    }

    #[inline]
    pub const fn operation(self) -> Status {
        Status(self.0 & Self::OPERATION.0)
    }

    #[inline]
    pub const fn target(self) -> Status {
        Status(self.0 & Self::TARGET.0)
    }

    /// Replace the target group, keeping lifecycle and operation bits.
    #[inline]
    pub const fn retarget(self, target: Status) -> Status {
        Status((self.0 & !Self::TARGET.0) | (target.0 & Self::TARGET.0))
    }
}

impl BitOr for Status {
    type Output = Status;

    fn bitor(self, rhs: Status) -> Status {
        Status(self.0 | rhs.0)
    }
}

impl BitOrAssign for Status {
    fn bitor_assign(&mut self, rhs: Status) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Status {
    type Output = Status;

    fn bitand(self, rhs: Status) -> Status {
        Status(self.0 & rhs.0)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", names.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_do_not_overlap() {
        assert_eq!(Status::LIFECYCLE & Status::OPERATION, Status::NONE);
        assert_eq!(Status::OPERATION & Status::TARGET, Status::NONE);
        assert_eq!(Status::LIFECYCLE & Status::TARGET, Status::NONE);
    }

    #[test]
    fn test_contains() {
        let s = Status::PENDING | Status::ADDING | Status::DIRECT;
        assert!(s.contains(Status::PENDING));
        assert!(s.contains(Status::PENDING | Status::ADDING));
        assert!(!s.contains(Status::PENDING | Status::REMOVING));
        assert!(s.contains(Status::NONE));
        assert!(s.intersects(Status::ADDING | Status::REMOVING));
    }

    #[test]
    fn test_retarget() {
        let s = Status::PENDING | Status::UPDATING | Status::DIRECT;
        let r = s.retarget(Status::INDIRECT);
        assert_eq!(r, Status::PENDING | Status::UPDATING | Status::INDIRECT);
        assert_eq!(r.operation(), Status::UPDATING);
        assert_eq!(r.lifecycle(), Status::PENDING);
    }

    #[test]
    fn test_display() {
        assert_eq!(Status::NONE.to_string(), "none");
        assert_eq!(
            (Status::PENDING | Status::REMOVING | Status::INDIRECT).to_string(),
            "pending|removing|indirect"
        );
    }
}
