use std::cmp::Ordering;
use std::fmt::Debug;
use std::ops::BitXor;

use itertools::izip;
use sha2::{Digest, Sha256};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::consts::ID_LEN;

/// A fixed-width identifier in the `ID_LEN * 8`-bit id space.
///
/// Supports the XOR metric (`a ^ b`), common-prefix length
/// (`leading_zeros`), and a total order by raw byte value (used to break
/// ties when two ids are equidistant from a target).
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Id(pub [u8; ID_LEN]);

impl Id {
    pub const ZERO: Id = Id([0u8; ID_LEN]);

    /// Derives an id from an arbitrary byte key.
    ///
    /// Uses SHA-256, truncated or zero-extended to `ID_LEN`. The same
    /// function must be used by every node on a given network.
    pub fn hash(key: &[u8]) -> Id {
        let digest = Sha256::digest(key);
        let mut out = [0u8; ID_LEN];
        let n = out.len().min(digest.len());
        out[..n].copy_from_slice(&digest[..n]);
        Id(out)
    }

    pub fn xor(&self, rhs: &Id) -> Id {
        let mut res = Id([0u8; ID_LEN]);
        for (a, b, r) in izip!(&self.0, &rhs.0, &mut res.0) {
            *r = a ^ b;
        }
        res
    }

    /// Number of leading zero bits of `self`, i.e. the common-prefix
    /// length with the zero id. Used as `index(a, b) = (a ^ b).leading_zeros()`.
    pub fn leading_zeros(&self) -> u32 {
        let mut res = 0u32;
        for x in self.0 {
            if x == 0 {
                res += 8;
            } else {
                res += x.leading_zeros();
                break;
            }
        }
        res
    }

    /// `index(self, other)`: the bucket this id would occupy in a
    /// routing table centered on `other`.
    ///
    /// Undefined (the caller must not query) when `self == other`.
    pub fn index(&self, other: &Id) -> usize {
        self.xor(other).leading_zeros() as usize
    }

    /// Three-way comparison of `distance(target, a)` and `distance(target, b)`,
    /// ties (which the XOR metric makes unreachable for `a != b`, but the
    /// ordering is total by construction) broken by ascending id.
    pub fn closer(target: &Id, a: &Id, b: &Id) -> Ordering {
        let da = target.xor(a);
        let db = target.xor(b);
        // Distances are compared as unsigned big-endian integers: raw byte
        // order comparison is exactly that.
        da.0.cmp(&db.0).then_with(|| a.0.cmp(&b.0))
    }

    pub fn as_short_hex(&self) -> String {
        let hex_id = hex::encode(self.0);
        let trimmed = hex_id.trim_start_matches('0');
        if trimmed.is_empty() {
            "0".to_owned()
        } else {
            trimmed.to_owned()
        }
    }

    #[cfg(test)]
    pub fn from_hex(s: &str) -> Id {
        let mut bytes = hex::decode(s).expect("invalid test hex");
        bytes.resize(ID_LEN, 0);
        let mut out = [0u8; ID_LEN];
        out.copy_from_slice(&bytes);
        Id(out)
    }
}

impl BitXor for Id {
    type Output = Id;
    fn bitxor(self, rhs: Id) -> Id {
        self.xor(&rhs)
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Id").field(&self.as_short_hex()).finish()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_short_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor() {
        let a = Id([1; ID_LEN]);
        let b = Id([0; ID_LEN]);
        assert_eq!(a.xor(&a), b);
        assert_eq!(a.xor(&b), a);
        assert_eq!(b.xor(&a), a);
        assert_eq!(a ^ b, a);
    }

    #[test]
    fn leading_zeros() {
        let mut a = Id([0; ID_LEN]);
        a.0[9] = 2;
        assert_eq!(a.leading_zeros(), 9 * 8 + 6);
        a.0[0] = 1;
        assert_eq!(a.leading_zeros(), 7);
    }

    #[test]
    fn index_undefined_case_is_max() {
        let a = Id::from_hex("a0");
        assert_eq!(a.index(&a), crate::consts::ID_LEN_BITS);
    }

    #[test]
    fn closer_orders_by_distance() {
        let target = Id::from_hex("00");
        let a = Id::from_hex("01");
        let b = Id::from_hex("02");
        assert_eq!(Id::closer(&target, &a, &b), Ordering::Less);
        assert_eq!(Id::closer(&target, &b, &a), Ordering::Greater);
        assert_eq!(Id::closer(&target, &a, &a), Ordering::Equal);
    }

    #[test]
    fn hash_is_deterministic_and_network_wide() {
        assert_eq!(Id::hash(b"hello"), Id::hash(b"hello"));
        assert_ne!(Id::hash(b"hello"), Id::hash(b"world"));
    }
}
