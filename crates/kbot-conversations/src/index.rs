//! JSON-backed side indexes. Both are small enough to load and rewrite
//! whole on every mutation, mirroring `UpdateCheckState::load`/`save`'s
//! single-writer idiom — the surrounding `.lock` file is what actually
//! keeps concurrent writers from racing.

use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;

pub async fn load_map(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = tokio::fs::read_to_string(path).await?;
    if raw.trim().is_empty() {
        return Ok(HashMap::new());
    }
    Ok(serde_json::from_str(&raw).map_err(kbot_core::CoreError::from)?)
}

pub async fn save_map(path: &Path, map: &HashMap<String, String>) -> Result<()> {
    let raw = serde_json::to_string_pretty(map).map_err(kbot_core::CoreError::from)?;
    tokio::fs::write(path, raw).await?;
    Ok(())
}

pub async fn load_seq_map(path: &Path) -> Result<HashMap<String, u64>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = tokio::fs::read_to_string(path).await?;
    if raw.trim().is_empty() {
        return Ok(HashMap::new());
    }
    Ok(serde_json::from_str(&raw).map_err(kbot_core::CoreError::from)?)
}

pub async fn save_seq_map(path: &Path, map: &HashMap<String, u64>) -> Result<()> {
    let raw = serde_json::to_string_pretty(map).map_err(kbot_core::CoreError::from)?;
    tokio::fs::write(path, raw).await?;
    Ok(())
}

impl From<std::io::Error> for crate::error::ConversationStoreError {
    fn from(e: std::io::Error) -> Self {
        crate::error::ConversationStoreError::Core(kbot_core::CoreError::from(e))
    }
}
