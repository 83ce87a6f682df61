//! Image builds from fixture directories.

use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::archive::tar_directory;
use crate::error::{StateError, StateResult};
use crate::naming::{image_name, Naming};
use crate::runtime::RuntimeClient;

/// Builds state images, one per fixture.
#[derive(Clone)]
pub struct ImageBuilder {
    runtime: Arc<dyn RuntimeClient>,
    naming: Naming,
}

impl ImageBuilder {
    pub fn new(runtime: Arc<dyn RuntimeClient>, naming: Naming) -> Self {
        Self { runtime, naming }
    }

    /// Archive the fixture directory and build it into an image.
    ///
    /// The daemon's build log is forwarded to `output` while the build runs;
    /// whatever was written stays there if the build fails. Building the same
    /// fixture again replaces the image.
    pub async fn build(
        &self,
        provider: &str,
        fixture: &str,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        cancel: &CancellationToken,
    ) -> StateResult<String> {
        let root = self.naming.context_path(provider, fixture);

        let context = {
            let root = root.clone();
            tokio::task::spawn_blocking(move || tar_directory(&root))
                .await
                .map_err(|e| StateError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??
        };

        let name = image_name(provider, &root);
        info!(
            "Building state {}/{} from {} as {}",
            provider,
            fixture,
            root.display(),
            name
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StateError::Cancelled),
            result = self.runtime.build_image(&name, context, output) => result,
        };

        if let Err(e) = result {
            return Err(StateError::BuildError {
                image: name,
                message: e.message,
            });
        }

        info!("Built image {}", name);
        Ok(name)
    }
}
