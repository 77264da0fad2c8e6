//! Capacity model: the resource vector every workload is priced in.

use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

/// Amount of bytes.
pub type Unit = u64;

pub const KILOBYTE: Unit = 1024;
pub const MEGABYTE: Unit = 1024 * KILOBYTE;
pub const GIGABYTE: Unit = 1024 * MEGABYTE;
pub const TERABYTE: Unit = 1024 * GIGABYTE;

/// Resource cost (or budget) of a workload or a node.
///
/// All fields are unsigned, so a capacity can never go negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capacity {
    /// Number of virtual CPUs.
    #[serde(default)]
    pub cru: u64,
    /// SSD storage in bytes.
    #[serde(default)]
    pub sru: Unit,
    /// HDD storage in bytes.
    #[serde(default)]
    pub hru: Unit,
    /// Memory in bytes.
    #[serde(default)]
    pub mru: Unit,
    /// Number of public IPv4 addresses.
    #[serde(default)]
    pub ipv4u: u64,
}

impl Capacity {
    pub const fn zero() -> Self {
        Self {
            cru: 0,
            sru: 0,
            hru: 0,
            mru: 0,
            ipv4u: 0,
        }
    }

    /// True iff every dimension is zero.
    pub fn is_zero(&self) -> bool {
        self.cru == 0 && self.sru == 0 && self.hru == 0 && self.mru == 0 && self.ipv4u == 0
    }

    /// Increment this capacity in place by `other`.
    pub fn add(&mut self, other: &Capacity) {
        self.cru += other.cru;
        self.sru += other.sru;
        self.hru += other.hru;
        self.mru += other.mru;
        self.ipv4u += other.ipv4u;
    }
}

impl AddAssign for Capacity {
    fn add_assign(&mut self, rhs: Capacity) {
        self.add(&rhs);
    }
}

impl std::iter::Sum for Capacity {
    fn sum<I: Iterator<Item = Capacity>>(iter: I) -> Self {
        iter.fold(Capacity::zero(), |mut acc, c| {
            acc += c;
            acc
        })
    }
}

impl std::fmt::Display for Capacity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cru({}) mru({}) sru({}) hru({}) ipv4u({})",
            self.cru, self.mru, self.sru, self.hru, self.ipv4u
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_zero() {
        assert!(Capacity::zero().is_zero());
        assert!(Capacity::default().is_zero());
    }

    #[test]
    fn any_dimension_makes_it_non_zero() {
        let cap = Capacity {
            ipv4u: 1,
            ..Capacity::default()
        };
        assert!(!cap.is_zero());
    }

    #[test]
    fn add_in_place_sums_every_field() {
        let mut a = Capacity {
            cru: 1,
            sru: 2,
            hru: 3,
            mru: 4,
            ipv4u: 5,
        };
        a.add(&Capacity {
            cru: 10,
            sru: 20,
            hru: 30,
            mru: 40,
            ipv4u: 50,
        });
        assert_eq!(
            a,
            Capacity {
                cru: 11,
                sru: 22,
                hru: 33,
                mru: 44,
                ipv4u: 55,
            }
        );
    }

    #[test]
    fn sum_over_iterator() {
        let total: Capacity = (0..3)
            .map(|_| Capacity {
                mru: GIGABYTE,
                ..Capacity::default()
            })
            .sum();
        assert_eq!(total.mru, 3 * GIGABYTE);
    }

    #[test]
    fn deserializes_with_missing_fields() {
        let cap: Capacity = serde_json::from_str(r#"{"mru": 1024}"#).unwrap();
        assert_eq!(cap.mru, 1024);
        assert_eq!(cap.cru, 0);
    }
}
