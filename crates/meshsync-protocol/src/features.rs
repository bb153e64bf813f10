//! Protocol features advertised by a peer.

use std::collections::BTreeSet;

/// Peer understands hash-suffixed resource names.
pub const HASH_SUFFIX: &str = "hash-suffix";

/// Features this build supports.
pub fn supported() -> Vec<String> {
    vec![HASH_SUFFIX.to_string()]
}

/// Set of features advertised by the peer of a connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Features(BTreeSet<String>);

impl Features {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, feature: &str) -> bool {
        self.0.contains(feature)
    }

    pub fn insert(&mut self, feature: impl Into<String>) {
        self.0.insert(feature.into());
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for Features {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
