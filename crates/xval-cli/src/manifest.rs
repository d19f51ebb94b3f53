//! Image manifest: which clients and validators exist and where their
//! images come from.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use xval_engine::StaticCatalog;

/// Contents of `xval.toml`.
///
/// ```toml
/// [clients]
/// go-ethereum = "xval/clients/go-ethereum:latest"
///
/// [validators]
/// "devp2p/discv4" = "xval/validators/devp2p:latest"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub clients: BTreeMap<String, String>,

    #[serde(default)]
    pub validators: BTreeMap<String, String>,
}

impl Manifest {
    pub fn parse(raw: &str) -> Result<Self> {
        let manifest: Manifest = toml::from_str(raw).context("Failed to parse manifest")?;
        for (id, image) in manifest.clients.iter().chain(&manifest.validators) {
            if image.trim().is_empty() {
                anyhow::bail!("Image reference for '{}' is empty", id);
            }
        }
        Ok(manifest)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("Invalid manifest: {:?}", path))
    }

    pub fn client_catalog(&self) -> StaticCatalog {
        StaticCatalog::new(self.clients.clone())
    }

    pub fn validator_catalog(&self) -> StaticCatalog {
        StaticCatalog::new(self.validators.clone())
    }
}
