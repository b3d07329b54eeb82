//! Opaque content-hash identifier of a rendered image.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

/// 32 lowercase hex characters identifying one rendered image.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest(SmolStr);

impl Digest {
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(Error::invalid(format!("not a 32-char lowercase-hex digest: {s}")));
        }
        Ok(Digest(SmolStr::new(s)))
    }

    /// Builds a Digest without validating shape. Used for trusted internal
    /// construction (e.g. the missing-digest sentinel) and tests.
    pub fn new_unchecked(s: impl Into<SmolStr>) -> Self {
        Digest(s.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Filename used for diff images between two digests.
    pub fn diff_filename(left: &Digest, right: &Digest) -> String {
        format!("{}-{}.png", left.as_str(), right.as_str())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_digest() {
        let d = Digest::parse("0123456789abcdef0123456789abcdef").unwrap();
        assert_eq!(d.as_str(), "0123456789abcdef0123456789abcdef");
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(Digest::parse("abc").is_err());
    }

    #[test]
    fn rejects_uppercase() {
        assert!(Digest::parse("0123456789ABCDEF0123456789abcdef").is_err());
    }

    #[test]
    fn diff_filename_concatenates_left_right() {
        let l = Digest::new_unchecked("11111111111111111111111111111111".to_string());
        let r = Digest::new_unchecked("22222222222222222222222222222222".to_string());
        assert_eq!(
            Digest::diff_filename(&l, &r),
            "11111111111111111111111111111111-22222222222222222222222222222222.png"
        );
    }
}
