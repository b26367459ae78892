use std::{
    cmp::Ordering,
    collections::HashMap,
    path::PathBuf,
    sync::Arc,
};

use abi::{Entity, SearchCriteria, ThumbnailOption, ThumbnailTask};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    logging::Category,
    persistence::{
        PERSISTENCE_SCHEMA_VERSION, StoreSnapshot, load_snapshot_from_disk, write_snapshot_to_disk,
    },
    services::{EntityPatch, EntitySearchService, EntityService, SearchPage, ServiceError},
};

/// Process-local option and task tables with an optional JSON snapshot.
///
/// One store backs all four service seams, so a task run sees options saved a
/// moment earlier through the option endpoint. Mutations become visible only
/// after the snapshot holding them is on disk.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<RwLock<StoreTables>>,
    state_path: Option<PathBuf>,
}

#[derive(Clone, Default)]
pub(crate) struct StoreTables {
    options: HashMap<String, ThumbnailOption>,
    tasks: HashMap<String, ThumbnailTask>,
}

impl StoreTables {
    fn snapshot(&self) -> StoreSnapshot {
        let mut options = self.options.values().cloned().collect::<Vec<_>>();
        let mut tasks = self.tasks.values().cloned().collect::<Vec<_>>();
        options.sort_by(|lhs, rhs| lhs.id.cmp(&rhs.id));
        tasks.sort_by(|lhs, rhs| lhs.id.cmp(&rhs.id));
        StoreSnapshot {
            schema_version: PERSISTENCE_SCHEMA_VERSION,
            options,
            tasks,
        }
    }
}

/// Records the store knows how to index, filter and order.
pub(crate) trait Stored: Entity + Clone + Send + Sync + 'static {
    fn table(tables: &StoreTables) -> &HashMap<String, Self>;
    fn table_mut(tables: &mut StoreTables) -> &mut HashMap<String, Self>;
    /// `keyword` is already lowercased.
    fn matches_keyword(&self, keyword: &str) -> bool;
    fn compare_by(&self, other: &Self, field: &str) -> Ordering;
    /// Copies fields only the server writes from the stored record into an
    /// incoming replacement.
    fn keep_server_fields(&mut self, _stored: &Self) {}
}

impl Stored for ThumbnailOption {
    fn table(tables: &StoreTables) -> &HashMap<String, Self> {
        &tables.options
    }

    fn table_mut(tables: &mut StoreTables) -> &mut HashMap<String, Self> {
        &mut tables.options
    }

    fn matches_keyword(&self, keyword: &str) -> bool {
        self.name.to_lowercase().contains(keyword)
            || self.file_suffix.to_lowercase().contains(keyword)
    }

    fn compare_by(&self, other: &Self, field: &str) -> Ordering {
        match field {
            "filesuffix" => self.file_suffix.cmp(&other.file_suffix),
            "width" => self.width.cmp(&other.width),
            "height" => self.height.cmp(&other.height),
            _ => compare_names(&self.name, &other.name),
        }
    }
}

impl Stored for ThumbnailTask {
    fn table(tables: &StoreTables) -> &HashMap<String, Self> {
        &tables.tasks
    }

    fn table_mut(tables: &mut StoreTables) -> &mut HashMap<String, Self> {
        &mut tables.tasks
    }

    fn matches_keyword(&self, keyword: &str) -> bool {
        self.name.to_lowercase().contains(keyword)
            || self.work_path.to_lowercase().contains(keyword)
    }

    fn compare_by(&self, other: &Self, field: &str) -> Ordering {
        match field {
            "workpath" => self.work_path.cmp(&other.work_path),
            "lastrun" => self.last_run_unix_ms.cmp(&other.last_run_unix_ms),
            _ => compare_names(&self.name, &other.name),
        }
    }

    /// Run stamps come from task runs, never from the editor.
    fn keep_server_fields(&mut self, stored: &Self) {
        self.last_run_unix_ms = stored.last_run_unix_ms;
    }
}

impl InMemoryStore {
    pub fn new(state_path: Option<PathBuf>) -> Self {
        let snapshot = load_snapshot_from_disk(state_path.as_deref());
        let mut tables = StoreTables::default();
        for option in snapshot.options {
            insert_loaded(&mut tables.options, option);
        }
        for task in snapshot.tasks {
            insert_loaded(&mut tables.tasks, task);
        }
        if let Some(path) = state_path.as_deref() {
            info!(
                "{} loaded snapshot path={} options={} tasks={}",
                Category::Store,
                path.display(),
                tables.options.len(),
                tables.tasks.len()
            );
        }
        Self {
            inner: Arc::new(RwLock::new(tables)),
            state_path,
        }
    }

    pub fn ephemeral() -> Self {
        Self::new(None)
    }

    /// Runs `apply` against a staged copy of `T`'s table and swaps it in once
    /// the snapshot is written. `apply` returns its result and whether it
    /// changed anything; unchanged tables skip the write.
    async fn commit<T, R, F>(&self, apply: F) -> Result<R, ServiceError>
    where
        T: Stored,
        F: FnOnce(&mut HashMap<String, T>) -> (R, bool),
    {
        let mut guard = self.inner.write().await;
        let Some(path) = self.state_path.as_deref() else {
            let (outcome, _) = apply(T::table_mut(&mut guard));
            return Ok(outcome);
        };

        let mut staged = guard.clone();
        let (outcome, changed) = apply(T::table_mut(&mut staged));
        if !changed {
            return Ok(outcome);
        }
        if let Err(err) = write_snapshot_to_disk(path, &staged.snapshot()) {
            warn!("{} snapshot write failed, change discarded: {err}", Category::Store);
            return Err(ServiceError::Storage(err));
        }
        *guard = staged;
        Ok(outcome)
    }
}

fn insert_loaded<T: Entity>(table: &mut HashMap<String, T>, entity: T) {
    if entity.is_new() {
        return;
    }
    let id = entity.id().unwrap_or_default().to_string();
    table.insert(id, entity);
}

fn compare_names(lhs: &str, rhs: &str) -> Ordering {
    lhs.to_lowercase()
        .cmp(&rhs.to_lowercase())
        .then_with(|| lhs.cmp(rhs))
}

/// Splits `field[:desc]`; only the first `;`-separated clause is honoured.
fn parse_sort(sort: Option<&str>) -> (String, bool) {
    let clause = sort
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .unwrap_or("");
    let (field, direction) = clause.split_once(':').unwrap_or((clause, "asc"));
    let descending = direction.trim().eq_ignore_ascii_case("desc");
    (field.trim().to_lowercase(), descending)
}

pub(crate) fn search_table<T: Stored>(
    table: &HashMap<String, T>,
    criteria: &SearchCriteria,
) -> SearchPage<T> {
    let keyword = criteria
        .keyword
        .as_deref()
        .map(str::trim)
        .filter(|keyword| !keyword.is_empty())
        .map(str::to_lowercase);
    let mut matches = table
        .values()
        .filter(|entity| {
            keyword
                .as_deref()
                .is_none_or(|keyword| entity.matches_keyword(keyword))
        })
        .collect::<Vec<_>>();

    let (field, descending) = parse_sort(criteria.sort.as_deref());
    matches.sort_by(|lhs, rhs| {
        let ordering = lhs
            .compare_by(rhs, &field)
            .then_with(|| lhs.id().cmp(&rhs.id()));
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    });

    let total_count = matches.len();
    let results = matches
        .into_iter()
        .skip(criteria.skip)
        .take(criteria.take)
        .cloned()
        .collect();
    SearchPage {
        results,
        total_count,
    }
}

#[async_trait]
impl<T: Stored> EntityService<T> for InMemoryStore {
    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<T>, ServiceError> {
        let guard = self.inner.read().await;
        let table = T::table(&guard);
        Ok(ids
            .iter()
            .filter_map(|id| table.get(id.as_str()).cloned())
            .collect())
    }

    async fn save_or_update(&self, entities: Vec<T>) -> Result<Vec<T>, ServiceError> {
        self.commit(|table: &mut HashMap<String, T>| {
            let saved = entities
                .into_iter()
                .map(|mut entity| {
                    if entity.is_new() {
                        entity.set_id(Uuid::new_v4().to_string());
                    }
                    let id = entity.id().unwrap_or_default().to_string();
                    if let Some(stored) = table.get(&id) {
                        entity.keep_server_fields(stored);
                    }
                    table.insert(id, entity.clone());
                    entity
                })
                .collect::<Vec<_>>();
            let changed = !saved.is_empty();
            (saved, changed)
        })
        .await
    }

    async fn remove_by_ids(&self, ids: &[String]) -> Result<(), ServiceError> {
        self.commit(|table: &mut HashMap<String, T>| {
            let removed = ids
                .iter()
                .filter(|id| table.remove(id.as_str()).is_some())
                .count();
            ((), removed > 0)
        })
        .await
    }

    async fn update_existing(
        &self,
        id: &str,
        patch: EntityPatch<T>,
    ) -> Result<Option<T>, ServiceError> {
        self.commit(|table: &mut HashMap<String, T>| match table.get_mut(id) {
            Some(entity) => {
                patch(entity);
                (Some(entity.clone()), true)
            }
            None => (None, false),
        })
        .await
    }
}

#[async_trait]
impl<T: Stored> EntitySearchService<T> for InMemoryStore {
    async fn search(&self, criteria: &SearchCriteria) -> Result<SearchPage<T>, ServiceError> {
        let guard = self.inner.read().await;
        Ok(search_table(T::table(&guard), criteria))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, name: &str, work_path: &str) -> ThumbnailTask {
        ThumbnailTask {
            id: Some(id.to_string()),
            name: name.to_string(),
            work_path: work_path.to_string(),
            ..ThumbnailTask::default()
        }
    }

    #[test]
    fn parse_sort_reads_direction_and_first_clause() {
        assert_eq!(parse_sort(None), (String::new(), false));
        assert_eq!(parse_sort(Some("name:desc")), ("name".to_string(), true));
        assert_eq!(
            parse_sort(Some("WorkPath:ASC;name:desc")),
            ("workpath".to_string(), false)
        );
    }

    #[test]
    fn search_counts_every_match_before_paging() {
        let mut table = HashMap::new();
        for (id, name) in [("a", "Banner"), ("b", "avatar"), ("c", "Catalog"), ("d", "Zoom")] {
            table.insert(id.to_string(), task(id, name, "catalog/img"));
        }
        let page = search_table(
            &table,
            &SearchCriteria {
                skip: 1,
                take: 2,
                ..SearchCriteria::default()
            },
        );
        assert_eq!(page.total_count, 4);
        let names = page
            .results
            .iter()
            .map(|task| task.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, ["Banner", "Catalog"]);
    }

    #[test]
    fn search_filters_by_keyword_case_insensitively() {
        let mut table = HashMap::new();
        table.insert("a".to_string(), task("a", "Products", "catalog/products"));
        table.insert("b".to_string(), task("b", "Blog", "content/blog"));
        table.insert("c".to_string(), task("c", "Banners", "CATALOG/banners"));
        let page = search_table(
            &table,
            &SearchCriteria {
                keyword: Some(" Catalog ".to_string()),
                sort: Some("name:desc".to_string()),
                ..SearchCriteria::default()
            },
        );
        assert_eq!(page.total_count, 2);
        assert_eq!(page.results[0].name, "Products");
        assert_eq!(page.results[1].name, "Banners");
    }

    #[tokio::test]
    async fn upsert_assigns_ids_only_to_new_records() {
        let store = InMemoryStore::ephemeral();
        let saved = EntityService::<ThumbnailTask>::save_or_update(
            &store,
            vec![ThumbnailTask::default(), task("keep", "Kept", "a")],
        )
        .await
        .expect("save should succeed");
        assert!(!saved[0].is_new());
        assert_eq!(saved[1].id.as_deref(), Some("keep"));

        let ids = saved
            .iter()
            .filter_map(|task| task.id.clone())
            .collect::<Vec<_>>();
        let loaded = EntityService::<ThumbnailTask>::get_by_ids(&store, &ids)
            .await
            .expect("get should succeed");
        assert_eq!(loaded, saved);
    }

    #[tokio::test]
    async fn remove_ignores_unknown_ids() {
        let store = InMemoryStore::ephemeral();
        EntityService::<ThumbnailOption>::save_or_update(
            &store,
            vec![ThumbnailOption {
                id: Some("opt-1".to_string()),
                ..ThumbnailOption::default()
            }],
        )
        .await
        .expect("save should succeed");
        EntityService::<ThumbnailOption>::remove_by_ids(
            &store,
            &["opt-1".to_string(), "missing".to_string()],
        )
        .await
        .expect("remove should succeed");
        let loaded = EntityService::<ThumbnailOption>::get_by_ids(&store, &["opt-1".to_string()])
            .await
            .expect("get should succeed");
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn update_existing_skips_unknown_ids() {
        let store = InMemoryStore::ephemeral();
        let stamped = EntityService::<ThumbnailTask>::update_existing(
            &store,
            "gone",
            Box::new(|task: &mut ThumbnailTask| task.last_run_unix_ms = Some(1)),
        )
        .await
        .expect("update should succeed");
        assert_eq!(stamped, None);
        let loaded = EntityService::<ThumbnailTask>::get_by_ids(&store, &["gone".to_string()])
            .await
            .expect("get should succeed");
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn upsert_keeps_the_stored_run_stamp() {
        let store = InMemoryStore::ephemeral();
        EntityService::<ThumbnailTask>::save_or_update(&store, vec![task("t1", "Old", "a")])
            .await
            .expect("save should succeed");
        EntityService::<ThumbnailTask>::update_existing(
            &store,
            "t1",
            Box::new(|task: &mut ThumbnailTask| task.last_run_unix_ms = Some(42)),
        )
        .await
        .expect("update should succeed");

        let saved =
            EntityService::<ThumbnailTask>::save_or_update(&store, vec![task("t1", "New", "a")])
                .await
                .expect("save should succeed");
        assert_eq!(saved[0].name, "New");
        assert_eq!(saved[0].last_run_unix_ms, Some(42));
    }

    #[tokio::test]
    async fn failed_snapshot_write_leaves_tables_untouched() {
        let blocker = std::env::temp_dir().join(format!("imgtools-store-{}", Uuid::new_v4()));
        std::fs::write(&blocker, b"not a directory").expect("blocker file should be written");
        let store = InMemoryStore::new(Some(blocker.join("state.json")));

        let saved =
            EntityService::<ThumbnailTask>::save_or_update(&store, vec![task("t1", "Kept", "a")])
                .await;
        assert!(matches!(saved, Err(ServiceError::Storage(_))));
        let loaded = EntityService::<ThumbnailTask>::get_by_ids(&store, &["t1".to_string()])
            .await
            .expect("get should succeed");
        assert!(loaded.is_empty());

        let _ = std::fs::remove_file(&blocker);
    }
}
