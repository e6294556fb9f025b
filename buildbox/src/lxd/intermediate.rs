//! Cache key for bootstrapped base images.

use std::fmt;

use crate::images::Image;

/// Alias under which a bootstrapped base image is published.
///
/// `{image_remote}-{image name with '.' replaced by '-'}-r{revision}`. Two
/// setups producing the same key are assumed to yield the same baseline, so
/// the revision must be bumped whenever the bootstrap changes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IntermediateImageKey(String);

impl IntermediateImageKey {
    pub fn new(image_remote: &str, image_name: &str, revision: &str) -> Self {
        Self(format!(
            "{}-{}-r{}",
            image_remote,
            image_name.replace('.', "-"),
            revision
        ))
    }

    pub fn for_image(image_remote: &str, image: &dyn Image) -> Self {
        Self::new(image_remote, image.name(), image.revision())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IntermediateImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
