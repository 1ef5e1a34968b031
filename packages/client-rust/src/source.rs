//! Reading service descriptions into [`ServiceDefinition`]s.

use std::path::Path;

use anyhow::Context;
use schemarpc_core::ServiceDefinition;

/// Scheme prefix marking a documentation URL that points at a local file.
pub const FILE_SCHEME: &str = "file://";

/// Turns a published service description into a definition.
pub trait DefinitionReader: Send + Sync {
    /// Builds a definition from description text.
    fn build(&self, description: &str) -> anyhow::Result<ServiceDefinition>;

    /// Reads and builds a definition stored in a local file.
    fn read_file(&self, path: &Path) -> anyhow::Result<ServiceDefinition> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        self.build(&text)
    }
}

/// Reads JSON service descriptions.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDefinitionReader;

impl DefinitionReader for JsonDefinitionReader {
    fn build(&self, description: &str) -> anyhow::Result<ServiceDefinition> {
        Ok(ServiceDefinition::from_json_str(description)?)
    }
}

/// Where a documentation URL points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionLocation<'a> {
    File(&'a Path),
    Remote(&'a str),
}

impl<'a> DefinitionLocation<'a> {
    /// Classifies a documentation URL by scheme.
    #[must_use]
    pub fn parse(doc_url: &'a str) -> Self {
        match doc_url.strip_prefix(FILE_SCHEME) {
            Some(path) => Self::File(Path::new(path)),
            None => Self::Remote(doc_url),
        }
    }
}
