use std::sync::Arc;

use crate::db::models::{
    Category, CategoryCount, ExportSnapshot, Intention, IntentionSource, StoredIntention,
};
use crate::error::AppError;
use crate::repository::{IndexReport, IntentionRepository, ReadOutcome};

/// Cloneable async front for [`IntentionRepository`].
///
/// Each call runs on tokio's blocking pool, so cipher work and SQLite I/O never
/// stall the async executor. A caller that drops the future does not cancel the
/// write underneath it.
#[derive(Clone)]
pub struct AsyncIntentionRepository {
    inner: Arc<IntentionRepository>,
}

impl AsyncIntentionRepository {
    pub fn new(repo: IntentionRepository) -> Self {
        Self {
            inner: Arc::new(repo),
        }
    }

    async fn run<T, F>(&self, op: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&IntentionRepository) -> Result<T, AppError> + Send + 'static,
    {
        let repo = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(repo.as_ref()))
            .await
            .map_err(|e| AppError::Internal(format!("Storage task failed: {e}")))?
    }

    pub async fn initialize(&self) -> Result<(), AppError> {
        self.run(|repo| repo.initialize()).await
    }

    pub async fn save(&self, intention: Intention) -> Result<i64, AppError> {
        self.run(move |repo| repo.save(&intention)).await
    }

    pub async fn update(
        &self,
        storage_id: i64,
        intention: Intention,
    ) -> Result<StoredIntention, AppError> {
        self.run(move |repo| repo.update(storage_id, &intention)).await
    }

    pub async fn delete(&self, storage_id: i64) -> Result<bool, AppError> {
        self.run(move |repo| repo.delete(storage_id)).await
    }

    pub async fn clear_all(&self) -> Result<usize, AppError> {
        self.run(|repo| repo.clear_all()).await
    }

    pub async fn load_all(&self) -> Result<ReadOutcome, AppError> {
        self.run(|repo| repo.load_all()).await
    }

    pub async fn get_all(&self) -> Result<Vec<StoredIntention>, AppError> {
        self.run(|repo| repo.get_all()).await
    }

    pub async fn get_by_id(&self, storage_id: i64) -> Result<StoredIntention, AppError> {
        self.run(move |repo| repo.get_by_id(storage_id)).await
    }

    pub async fn get_by_date_range(
        &self,
        start: i64,
        end: i64,
    ) -> Result<Vec<StoredIntention>, AppError> {
        self.run(move |repo| repo.get_by_date_range(start, end)).await
    }

    pub async fn get_by_source(
        &self,
        source: IntentionSource,
    ) -> Result<Vec<StoredIntention>, AppError> {
        self.run(move |repo| repo.get_by_source(source)).await
    }

    pub async fn get_by_category(
        &self,
        category: Category,
    ) -> Result<Vec<StoredIntention>, AppError> {
        self.run(move |repo| repo.get_by_category(category)).await
    }

    pub async fn count(&self) -> Result<i64, AppError> {
        self.run(|repo| repo.count()).await
    }

    pub async fn category_counts(&self) -> Result<Vec<CategoryCount>, AppError> {
        self.run(|repo| repo.category_counts()).await
    }

    pub async fn verify_index_consistency(&self) -> Result<IndexReport, AppError> {
        self.run(|repo| repo.verify_index_consistency()).await
    }

    pub async fn export_all(&self) -> Result<ExportSnapshot, AppError> {
        self.run(|repo| repo.export_all()).await
    }
}
