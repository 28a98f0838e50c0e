use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::models::{DefinitionError, TimezoneRegistry};

/// Definitions compiled into the binary so a session works offline.
const EMBEDDED_DEFINITIONS: &str = include_str!("../../assets/timezones.json");

/// Where to look for definitions beyond the embedded document. Later sources
/// replace earlier ones.
#[derive(Debug, Clone, Default)]
pub struct DefinitionSources {
    pub path: Option<PathBuf>,
    pub url: Option<String>,
}

pub fn embedded_registry() -> TimezoneRegistry {
    TimezoneRegistry::from_json(EMBEDDED_DEFINITIONS).unwrap_or_else(|e| {
        error!("Embedded definitions are broken: {}", e);
        TimezoneRegistry::default()
    })
}

pub async fn load_from_file(path: &Path) -> Result<TimezoneRegistry, DefinitionError> {
    let text = tokio::fs::read_to_string(path).await?;
    TimezoneRegistry::from_json(&text)
}

pub async fn load_from_url(url: &str) -> Result<TimezoneRegistry, DefinitionError> {
    let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
    let text = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    TimezoneRegistry::from_json(&text)
}

/// Publish the embedded registry, then each configured source that loads.
/// Failures keep whatever was published before.
pub async fn load_definitions(
    sources: DefinitionSources,
    tx: watch::Sender<Arc<TimezoneRegistry>>,
) {
    let embedded = embedded_registry();
    info!("Loaded {} embedded timezone definitions", embedded.len());
    tx.send_replace(Arc::new(embedded));

    if let Some(path) = &sources.path {
        match load_from_file(path).await {
            Ok(registry) => {
                info!("Loaded {} timezone definitions from {}", registry.len(), path.display());
                tx.send_replace(Arc::new(registry));
            }
            Err(e) => warn!("Keeping previous definitions, {}: {}", path.display(), e),
        }
    }

    if let Some(url) = &sources.url {
        match load_from_url(url).await {
            Ok(registry) => {
                info!("Loaded {} timezone definitions from {}", registry.len(), url);
                tx.send_replace(Arc::new(registry));
            }
            Err(e) => warn!("Keeping previous definitions, {}: {}", url, e),
        }
    }
}
