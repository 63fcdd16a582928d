use std::fmt;

use serde_derive::Deserialize;
use serde_derive::Serialize;

/// Content-address of an image or layer; the canonical key entities are
/// stored and referred to by.
///
/// Referring entities (pods, layers) hold only the `Digest`, never a borrow
/// or a copy of the full record; the `Model` is the sole owner of the
/// canonical record for each digest. This removes the cyclic
/// layer-to-image / pod-to-image back-references the original model had.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct Digest(String);

impl Digest {
    pub fn new<S: Into<String>>(sha: S) -> Digest {
        Digest(sha.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<String> for Digest {
    fn from(sha: String) -> Digest {
        Digest::new(sha)
    }
}

impl From<&str> for Digest {
    fn from(sha: &str) -> Digest {
        Digest::new(sha)
    }
}
