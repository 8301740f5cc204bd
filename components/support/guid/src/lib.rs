/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

#![allow(unknown_lints)]
#![warn(rust_2018_idioms)]

#[cfg(feature = "rusqlite_support")]
mod rusqlite_support;

use std::{fmt, ops};

/// The identifier attached to every synced record: the canonical 36-character
/// hyphenated textual form of a version-4 UUID. Using a dedicated type rather
/// than a `String` keeps identifiers from being confused with other text
/// columns, and guarantees immutability once minted.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Guid(String);

/// Length of the canonical hyphenated form.
pub const GUID_LEN: usize = 36;

// Positions of the hyphens in the canonical form.
const HYPHENS: [usize; 4] = [8, 13, 18, 23];

impl Guid {
    /// Mint a fresh random (version 4) identifier.
    #[cfg(feature = "random")]
    pub fn random() -> Self {
        use rand::Rng;
        use std::fmt::Write;
        let mut bytes: [u8; 16] = rand::thread_rng().gen();
        // Stamp the version and variant bits so the textual form is a
        // well-formed v4 UUID.
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        let mut s = String::with_capacity(GUID_LEN);
        for (i, b) in bytes.iter().enumerate() {
            if i == 4 || i == 6 || i == 8 || i == 10 {
                s.push('-');
            }
            // Writing to a String can't fail.
            let _ = write!(s, "{:02x}", b);
        }
        Guid(s)
    }

    #[inline]
    pub fn from_string(s: String) -> Self {
        Guid(s)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn into_string(self) -> String {
        self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if this is the canonical 36-character hyphenated hex form.
    /// Identifiers supplied by embedders are not required to pass this, but
    /// everything we mint does.
    pub fn is_valid(&self) -> bool {
        if self.0.len() != GUID_LEN {
            return false;
        }
        self.0.bytes().enumerate().all(|(i, b)| {
            if HYPHENS.contains(&i) {
                b == b'-'
            } else {
                b.is_ascii_hexdigit()
            }
        })
    }
}

impl From<&str> for Guid {
    #[inline]
    fn from(s: &str) -> Self {
        Guid(s.into())
    }
}

impl From<String> for Guid {
    #[inline]
    fn from(s: String) -> Self {
        Guid(s)
    }
}

impl From<Guid> for String {
    #[inline]
    fn from(guid: Guid) -> Self {
        guid.0
    }
}

impl AsRef<str> for Guid {
    #[inline]
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl ops::Deref for Guid {
    type Target = str;
    #[inline]
    fn deref(&self) -> &str {
        self.as_str()
    }
}

// Allow direct comparison with strings, which keeps call sites and tests
// pleasant to read.
impl PartialEq<str> for Guid {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Guid {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl PartialEq<Guid> for str {
    #[inline]
    fn eq(&self, other: &Guid) -> bool {
        self == other.as_str()
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({:?})", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality() {
        let g = Guid::from("80ff0830-9160-467c-897b-722f03e802bd");
        assert_eq!(g, "80ff0830-9160-467c-897b-722f03e802bd");
        assert_eq!(g.as_str(), "80ff0830-9160-467c-897b-722f03e802bd");
    }

    #[test]
    fn test_validity() {
        assert!(Guid::from("80ff0830-9160-467c-897b-722f03e802bd").is_valid());
        // wrong length
        assert!(!Guid::from("80ff0830").is_valid());
        // hyphen in the wrong spot
        assert!(!Guid::from("80ff08309-160-467c-897b-722f03e802bd").is_valid());
        // non-hex characters
        assert!(!Guid::from("80ff0830-9160-467c-897b-722f03e802zz").is_valid());
        assert!(!Guid::from("").is_valid());
    }

    #[cfg(feature = "random")]
    #[test]
    fn test_random() {
        let a = Guid::random();
        let b = Guid::random();
        assert_eq!(a.len(), GUID_LEN);
        assert!(a.is_valid(), "not canonical: {}", a);
        assert!(b.is_valid(), "not canonical: {}", b);
        assert_ne!(a, b);
        // version and variant nibbles
        assert_eq!(&a.as_str()[14..15], "4");
        assert!(matches!(&a.as_str()[19..20], "8" | "9" | "a" | "b"));
    }
}
