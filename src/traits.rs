use crate::models::{Account, AccountId, FetcherField, FetcherId, FetcherRecord};
use async_trait::async_trait;

/// Durable storage of fetcher definitions. The runner only ever reads and
/// writes whole records through this interface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FetcherStore: Send + Sync {
    /// All fetchers with `enabled` set
    async fn list_enabled_fetchers(&self) -> anyhow::Result<Vec<FetcherRecord>>;

    /// `Ok(None)` when the fetcher no longer exists
    async fn get_fetcher(&self, id: FetcherId) -> anyhow::Result<Option<FetcherRecord>>;

    /// Persists the listed fields of `record` in a single update
    async fn update_fetcher(
        &self,
        record: &FetcherRecord,
        fields: &[FetcherField],
    ) -> anyhow::Result<()>;
}

/// Lookup of the mail accounts fetchers deliver into.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn get_account_by_id(&self, id: AccountId) -> anyhow::Result<Option<Account>>;
}
