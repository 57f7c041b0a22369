use crate::error::{AppError, Result};
use crate::models::{Consumer, ConsumerStatus};
use crate::repositories::ConsumerRepository;
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

/// Validated input for registering a consumer.
#[derive(Debug, Clone)]
pub struct CreateConsumer {
    pub fullname: String,
    pub username: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub birth_date: NaiveDate,
}

/// Offset pagination, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl Page {
    pub const DEFAULT_LIMIT: i64 = 10;
    pub const MAX_LIMIT: i64 = 100;

    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

/// Service for consumer management.
pub struct ConsumerService {
    consumer_repo: ConsumerRepository,
}

impl ConsumerService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            consumer_repo: ConsumerRepository::new(pool),
        }
    }

    pub async fn create_consumer(&self, request: CreateConsumer) -> Result<Consumer> {
        let consumer = Consumer::new(
            request.fullname.trim().to_string(),
            request.username.trim().to_string(),
            request.email.trim().to_lowercase(),
            request.phone.trim().to_string(),
            request.address.trim().to_string(),
            request.birth_date,
        );

        let created = self.consumer_repo.create(&consumer).await?;
        tracing::info!(consumer_id = %created.id, "Consumer created");
        Ok(created)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Consumer> {
        self.consumer_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Consumer with id '{}' not found", id)))
    }

    /// Lists consumers, optionally by status. An empty page is reported as not found.
    pub async fn list_consumers(&self, status: Option<ConsumerStatus>, page: Page) -> Result<Vec<Consumer>> {
        let consumers = self
            .consumer_repo
            .list(status, page.limit, page.offset())
            .await?;

        if consumers.is_empty() {
            let scope = status.map(|s| format!("{} ", s)).unwrap_or_default();
            return Err(AppError::NotFound(format!("No {}consumers found", scope)));
        }
        Ok(consumers)
    }

    pub async fn update_status(&self, id: Uuid, status: ConsumerStatus) -> Result<Consumer> {
        let updated = self
            .consumer_repo
            .update_status(id, status)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Consumer with id '{}' not found", id)))?;

        tracing::info!(consumer_id = %id, status = %status, "Consumer status updated");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_defaults_and_bounds() {
        let page = Page::new(None, None);
        assert_eq!(page, Page { page: 1, limit: Page::DEFAULT_LIMIT });
        assert_eq!(page.offset(), 0);

        let page = Page::new(Some(0), Some(1000));
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, Page::MAX_LIMIT);

        assert_eq!(Page::new(Some(3), Some(20)).offset(), 40);
    }
}
