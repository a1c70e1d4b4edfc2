pub mod fc2;
pub mod plugin;

use tracing::{debug, info};

use crate::{
    common::errors::{Fc2Error, Result},
    configs::Config,
};

use self::{
    fc2::Fc2Source,
    plugin::{BoxedPlugin, LivePlugin, ResolvedStream},
};

/// Source Manager
pub struct SourceManager {
    pub sources: Vec<BoxedPlugin>,
}

impl SourceManager {
    pub fn new(config: &Config) -> Result<Self> {
        let mut sources: Vec<BoxedPlugin> = Vec::new();

        let fc2 = Fc2Source::new(&config.fc2)?;
        info!("Loaded source: {}", fc2.name());
        sources.push(Box::new(fc2));

        Ok(Self { sources })
    }

    pub fn find(&self, url: &str) -> Option<&dyn LivePlugin> {
        self.sources
            .iter()
            .find(|s| s.can_handle(url))
            .map(|s| s.as_ref())
    }

    pub async fn resolve(&self, url: &str) -> Result<ResolvedStream> {
        let source = self
            .find(url)
            .ok_or_else(|| Fc2Error::InvalidUrl(url.to_string()))?;
        debug!("Resolving {} with {}", url, source.name());
        source.resolve(url).await
    }
}
