use std::sync::Arc;

use async_trait::async_trait;
use interfaces::PublicationState;
use sqlx::sqlite::{Sqlite, SqlitePool, SqliteRow};
use sqlx::{QueryBuilder, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::database::Database;
use crate::types::{NewPublication, PipelineError, Publication, Result};
use crate::utils::{decode_id, decode_time, encode_time};

/// Field changes for one publication. `expected_state` adds a predicate: the
/// update only applies while the row is still in that state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublicationUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    /// `Some(None)` clears the image.
    pub image: Option<Option<Vec<u8>>>,
    pub state: Option<PublicationState>,
    pub expected_state: Option<PublicationState>,
}

impl PublicationUpdate {
    pub fn title(title: impl Into<String>) -> Self {
        Self { title: Some(title.into()), ..Default::default() }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), ..Default::default() }
    }

    pub fn image(image: Option<Vec<u8>>) -> Self {
        Self { image: Some(image), ..Default::default() }
    }

    pub fn state(state: PublicationState) -> Self {
        Self { state: Some(state), ..Default::default() }
    }

    pub fn expecting(mut self, state: PublicationState) -> Self {
        self.expected_state = Some(state);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.image.is_none() && self.state.is_none()
    }
}

#[async_trait]
pub trait PublicationStore: Send + Sync {
    /// Persist a new publication as DRAFT and return its fresh id.
    async fn insert(&self, publication: NewPublication) -> Result<Uuid>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Publication>>;

    /// Publications in `state`, oldest first.
    async fn find_by_state(&self, state: PublicationState) -> Result<Vec<Publication>>;

    /// Ids in the same order as `find_by_state`.
    async fn ids_by_state(&self, state: PublicationState) -> Result<Vec<Uuid>>;

    /// Apply `update` and bump `last_updated` atomically. `Ok(false)` when no
    /// row matched, either because the id is gone or a predicate failed.
    async fn update_fields(&self, id: Uuid, update: PublicationUpdate) -> Result<bool>;

    async fn delete(&self, id: Uuid) -> Result<bool>;

    async fn count(&self, state: PublicationState) -> Result<usize>;
}

const SELECT_COLUMNS: &str = "SELECT publication_id, title, content, image, state, information_source, \
     link, summary, material, creation_date, last_updated FROM publications";

pub struct SqlitePublicationStore {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqlitePublicationStore {
    pub fn new(database: &Database) -> Self {
        Self {
            db: database.pool().clone(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn row_to_publication(row: &SqliteRow) -> Result<Publication> {
        let raw_state: String = row.try_get("state")?;
        let state = raw_state
            .parse::<PublicationState>()
            .map_err(|e| PipelineError::CorruptRecord(e.to_string()))?;
        let raw_id: String = row.try_get("publication_id")?;
        let creation_date: String = row.try_get("creation_date")?;
        let last_updated: String = row.try_get("last_updated")?;

        Ok(Publication {
            id: decode_id(&raw_id)?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            image: row.try_get("image")?,
            state,
            information_source: row.try_get("information_source")?,
            link: row.try_get("link")?,
            summary: row.try_get("summary")?,
            material: row.try_get("material")?,
            creation_date: decode_time("creation_date", &creation_date)?,
            last_updated: decode_time("last_updated", &last_updated)?,
        })
    }
}

#[async_trait]
impl PublicationStore for SqlitePublicationStore {
    async fn insert(&self, publication: NewPublication) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = encode_time(self.clock.now());

        sqlx::query(
            r#"
            INSERT INTO publications (publication_id, title, content, image, state, information_source,
                                      link, summary, material, creation_date, last_updated)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&publication.title)
        .bind(&publication.content)
        .bind(&publication.image)
        .bind(PublicationState::Draft.as_str())
        .bind(&publication.information_source)
        .bind(&publication.link)
        .bind(&publication.summary)
        .bind(&publication.material)
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await?;

        info!("Inserted draft publication: {} with ID: {}", publication.title, id);
        Ok(id)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Publication>> {
        let row = sqlx::query(&format!("{} WHERE publication_id = ?", SELECT_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(Self::row_to_publication).transpose()
    }

    async fn find_by_state(&self, state: PublicationState) -> Result<Vec<Publication>> {
        let rows = sqlx::query(&format!("{} WHERE state = ? ORDER BY creation_date ASC, seq ASC", SELECT_COLUMNS))
            .bind(state.as_str())
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(Self::row_to_publication).collect()
    }

    async fn ids_by_state(&self, state: PublicationState) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT publication_id FROM publications WHERE state = ? ORDER BY creation_date ASC, seq ASC",
        )
        .bind(state.as_str())
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| -> Result<Uuid> {
                let raw: String = row.try_get("publication_id")?;
                decode_id(&raw)
            })
            .collect()
    }

    async fn update_fields(&self, id: Uuid, update: PublicationUpdate) -> Result<bool> {
        if update.is_empty() {
            return Err(PipelineError::EmptyUpdate { id });
        }
        if update.state == Some(PublicationState::Draft) {
            return Err(PipelineError::BackwardTransition { to: PublicationState::Draft });
        }

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE publications SET last_updated = ");
        query.push_bind(encode_time(self.clock.now()));
        if let Some(title) = update.title {
            query.push(", title = ").push_bind(title);
        }
        if let Some(content) = update.content {
            query.push(", content = ").push_bind(content);
        }
        if let Some(image) = update.image {
            query.push(", image = ").push_bind(image);
        }
        if let Some(state) = update.state {
            query.push(", state = ").push_bind(state.as_str());
        }

        query.push(" WHERE publication_id = ").push_bind(id.to_string());
        if let Some(expected) = update.expected_state {
            query.push(" AND state = ").push_bind(expected.as_str());
        }
        if let Some(state) = update.state {
            // Only rows in an earlier lifecycle state may move into `state`.
            query.push(" AND state IN (");
            let mut allowed = query.separated(", ");
            for predecessor in state.predecessors() {
                allowed.push_bind(predecessor.as_str());
            }
            allowed.push_unseparated(")");
        }

        let result = query.build().execute(&self.db).await?;
        let updated = result.rows_affected() > 0;
        if !updated {
            debug!("Update for publication {} matched no rows", id);
        }
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM publications WHERE publication_id = ?")
            .bind(id.to_string())
            .execute(&self.db)
            .await?;

        if result.rows_affected() > 0 {
            info!("Removed publication: {}", id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn count(&self, state: PublicationState) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM publications WHERE state = ?")
            .bind(state.as_str())
            .fetch_one(&self.db)
            .await?;

        let total: i64 = row.try_get("total")?;
        Ok(total as usize)
    }
}
