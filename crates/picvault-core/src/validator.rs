use std::collections::HashSet;

use async_trait::async_trait;

/// Decides whether a URL points at a loadable image.
#[async_trait]
pub trait ImageValidator: Send + Sync {
    /// Resolve to `true` only when the resource loads and decodes as an image.
    /// Failures of any kind resolve to `false`.
    async fn is_valid_image_url(&self, url: &str) -> bool;
}

/// Validator with a fixed answer set, for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct StaticImageValidator {
    accepted: HashSet<String>,
    accept_all: bool,
}

impl StaticImageValidator {
    pub fn accepting<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accepted: urls.into_iter().map(Into::into).collect(),
            accept_all: false,
        }
    }

    pub fn accept_all() -> Self {
        Self {
            accepted: HashSet::new(),
            accept_all: true,
        }
    }
}

#[async_trait]
impl ImageValidator for StaticImageValidator {
    async fn is_valid_image_url(&self, url: &str) -> bool {
        self.accept_all || self.accepted.contains(url)
    }
}
