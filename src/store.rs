/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: store.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-03 15:08:11
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-06 16:44:30
 */

use crate::models::{Account, AccountId, FetcherField, FetcherId, FetcherRecord};
use crate::traits::{AccountDirectory, FetcherStore};
use anyhow::Context;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// On-disk layout of the record store.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub fetchers: Vec<FetcherRecord>,
    #[serde(default)]
    pub accounts: Vec<Account>,
}

/// Fetcher and account records kept in a single JSON document.
///
/// Every update re-reads the file, applies only the changed fields and
/// writes it back through a temporary file and a rename, so edits made by
/// other processes to fields the caller did not touch survive.
pub struct JsonFileStore {
    path: Option<PathBuf>,
    data: Mutex<StoreData>,
}

impl JsonFileStore {
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = read_data(&path).await?;
        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
        })
    }

    /// A store that never touches the filesystem.
    #[allow(dead_code)]
    pub fn in_memory(data: StoreData) -> Self {
        Self {
            path: None,
            data: Mutex::new(data),
        }
    }

    pub async fn snapshot(&self) -> anyhow::Result<StoreData> {
        let mut data = self.data.lock().await;
        self.refresh(&mut data).await?;
        Ok(data.clone())
    }

    async fn refresh(&self, data: &mut StoreData) -> anyhow::Result<()> {
        if let Some(path) = &self.path {
            *data = read_data(path).await?;
        }
        Ok(())
    }
}

async fn read_data(path: &Path) -> anyhow::Result<StoreData> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse record store {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Record store {} does not exist yet", path.display());
            Ok(StoreData::default())
        }
        Err(e) => {
            Err(e).with_context(|| format!("Failed to read record store {}", path.display()))
        }
    }
}

async fn write_data(path: &Path, data: &StoreData) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(data)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace record store {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl FetcherStore for JsonFileStore {
    async fn list_enabled_fetchers(&self) -> anyhow::Result<Vec<FetcherRecord>> {
        let mut data = self.data.lock().await;
        self.refresh(&mut data).await?;
        Ok(data.fetchers.iter().filter(|f| f.enabled).cloned().collect())
    }

    async fn get_fetcher(&self, id: FetcherId) -> anyhow::Result<Option<FetcherRecord>> {
        let mut data = self.data.lock().await;
        self.refresh(&mut data).await?;
        Ok(data.fetchers.iter().find(|f| f.id == id).cloned())
    }

    async fn update_fetcher(
        &self,
        record: &FetcherRecord,
        fields: &[FetcherField],
    ) -> anyhow::Result<()> {
        let mut data = self.data.lock().await;
        self.refresh(&mut data).await?;

        let stored = data
            .fetchers
            .iter_mut()
            .find(|f| f.id == record.id)
            .ok_or_else(|| anyhow::anyhow!("Fetcher {} no longer exists", record.id))?;
        stored.apply_fields(record, fields);

        if let Some(path) = &self.path {
            write_data(path, &data).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AccountDirectory for JsonFileStore {
    async fn get_account_by_id(&self, id: AccountId) -> anyhow::Result<Option<Account>> {
        let mut data = self.data.lock().await;
        self.refresh(&mut data).await?;
        Ok(data.accounts.iter().find(|a| a.id == id).cloned())
    }
}
