use abi::{Entity, SearchCriteria};
use async_trait::async_trait;
use axum::http::StatusCode;

/// Batch-first storage seam for one entity kind.
///
/// `get_by_ids` is the canonical read primitive; single-id reads go through
/// [`get_by_id`] so both paths share the same lookup. `save_or_update` is an
/// upsert: records without an id receive one, records with an id replace the
/// stored copy. `remove_by_ids` ignores ids it does not know.
#[async_trait]
pub trait EntityService<T>: Send + Sync
where
    T: Send + 'static,
{
    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<T>, ServiceError>;
    async fn save_or_update(&self, entities: Vec<T>) -> Result<Vec<T>, ServiceError>;
    async fn remove_by_ids(&self, ids: &[String]) -> Result<(), ServiceError>;
    /// Applies `patch` to the stored record in one step. Returns `Ok(None)` and
    /// stores nothing when `id` is unknown.
    async fn update_existing(
        &self,
        id: &str,
        patch: EntityPatch<T>,
    ) -> Result<Option<T>, ServiceError>;
}

pub type EntityPatch<T> = Box<dyn FnOnce(&mut T) + Send>;

#[async_trait]
pub trait EntitySearchService<T>: Send + Sync
where
    T: Send + 'static,
{
    async fn search(&self, criteria: &SearchCriteria) -> Result<SearchPage<T>, ServiceError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchPage<T> {
    pub results: Vec<T>,
    pub total_count: usize,
}

impl<T> Default for SearchPage<T> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            total_count: 0,
        }
    }
}

#[derive(Debug)]
pub enum ServiceError {
    Invalid(String),
    Storage(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Invalid(_) => StatusCode::BAD_REQUEST,
            ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Invalid(message) => write!(f, "invalid request: {message}"),
            ServiceError::Storage(message) => write!(f, "storage failure: {message}"),
        }
    }
}

impl std::error::Error for ServiceError {}

pub async fn get_by_id<T>(
    service: &(dyn EntityService<T> + '_),
    id: &str,
) -> Result<Option<T>, ServiceError>
where
    T: Entity + Send + 'static,
{
    let found = service.get_by_ids(&[id.to_string()]).await?;
    Ok(found.into_iter().next())
}
