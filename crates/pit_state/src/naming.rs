//! Content-addressed naming of state images and containers.
//!
//! A state is identified by its provider and fixture name. The fixture lives
//! in `<base>/<provider>/'<fixture>'` and the image built from it is named
//! after an MD5 digest of that path, so the same checkout always produces the
//! same name. Moving the fixture tree changes every name.

use std::path::{Path, PathBuf};

use md5::{Digest, Md5};

/// Prefix shared by every image and container this crate creates.
pub const NAME_PREFIX: &str = "pitstate_";

/// Image (and container) name for a provider and a resolved context path.
pub fn image_name(provider: &str, context_path: &Path) -> String {
    let digest = Md5::digest(context_path.to_string_lossy().as_bytes());
    format!("{}{}_{}", NAME_PREFIX, provider, hex::encode(digest))
}

/// Build context directory of a fixture.
///
/// The fixture segment is wrapped in single quotes to match existing
/// fixture trees, e.g. `states/mongo/'several users'`.
pub fn context_path(base_dir: &Path, provider: &str, fixture: &str) -> PathBuf {
    base_dir.join(provider).join(format!("'{}'", fixture))
}

/// Whether a daemon-reported name belongs to a state container.
pub fn is_state_name(name: &str) -> bool {
    name.trim_start_matches('/').starts_with(NAME_PREFIX)
}

/// Resolves fixture locations and names relative to a states directory.
#[derive(Debug, Clone)]
pub struct Naming {
    base_dir: PathBuf,
}

impl Naming {
    /// A relative `base_dir` is resolved against the working directory, so
    /// a fixture gets the same name however its directory was spelled.
    /// Symlinks are not resolved.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            base_dir: std::path::absolute(&base_dir).unwrap_or(base_dir),
        }
    }

    /// Directory holding the provider folders.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn context_path(&self, provider: &str, fixture: &str) -> PathBuf {
        context_path(&self.base_dir, provider, fixture)
    }

    /// Name of the image and container for a fixture.
    pub fn image_name_for(&self, provider: &str, fixture: &str) -> String {
        image_name(provider, &self.context_path(provider, fixture))
    }
}
