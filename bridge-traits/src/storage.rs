//! Key-Value Settings Storage
//!
//! Small host-provided store used to hand state across window contexts
//! (browser `localStorage`, a desktop preferences file, an in-memory map in
//! tests).

use async_trait::async_trait;

use crate::error::Result;

/// Settings store trait
///
/// Values written by one window context must be readable by another window
/// of the same application origin.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn remember(store: &dyn SettingsStore, project_id: &str) -> Result<()> {
///     store.set_string("last_opened_project", project_id).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Store a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Delete a setting. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}
