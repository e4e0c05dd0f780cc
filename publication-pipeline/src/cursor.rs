use std::sync::Arc;

use interfaces::{BlobStore, PublicationState};
use tracing::debug;
use uuid::Uuid;

use crate::store::{PublicationStore, PublicationUpdate};
use crate::types::{NewPublication, PipelineError, Publication};

#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("No publications in state {state}")]
    Empty { state: PublicationState },

    #[error("No further publications to show")]
    Exhausted,

    #[error("Offset {index} is out of bounds for {len} publications")]
    OutOfBounds { index: usize, len: usize },

    #[error("Publication {id} is no longer available")]
    Stale { id: Uuid },

    #[error("No publication selected")]
    NothingSelected,

    #[error(transparent)]
    Store(#[from] PipelineError),
}

impl CursorError {
    /// True for outcomes a UI shows as "nothing here" rather than a failure.
    pub fn is_empty(&self) -> bool {
        matches!(self, CursorError::Empty { .. } | CursorError::Exhausted)
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, CursorError::Stale { .. })
    }
}

pub type CursorResult<T> = std::result::Result<T, CursorError>;

/// Navigable, wrap-around view over the publications in one state.
///
/// The cursor remembers the id it last returned, not just an offset. Each
/// navigation re-reads the live id list and moves `position` to wherever that
/// id now sits. If it has left the set, `position` is left addressing its
/// successor and the next `next()` returns that successor.
pub struct PublicationCursor {
    store: Arc<dyn PublicationStore>,
    state_filter: PublicationState,
    ids: Vec<Uuid>,
    position: usize,
    visited: bool,
    current: Option<Uuid>,
}

impl PublicationCursor {
    pub fn new(store: Arc<dyn PublicationStore>, state_filter: PublicationState) -> Self {
        Self {
            store,
            state_filter,
            ids: Vec::new(),
            position: 0,
            visited: false,
            current: None,
        }
    }

    pub fn state_filter(&self) -> PublicationState {
        self.state_filter
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn current_id(&self) -> Option<Uuid> {
        self.current
    }

    /// Re-read the result set and start over from the first publication.
    pub async fn refresh(&mut self) -> CursorResult<usize> {
        self.ids = self.store.ids_by_state(self.state_filter).await?;
        self.position = 0;
        self.visited = false;
        self.current = None;
        debug!("Cursor over {} refreshed with {} publications", self.state_filter, self.ids.len());
        Ok(self.ids.len())
    }

    /// Live count of publications in the filtered state. The id snapshot is
    /// only re-read when it is empty.
    pub async fn len(&mut self) -> CursorResult<usize> {
        let count = self.store.count(self.state_filter).await?;
        if self.ids.is_empty() && count > 0 {
            self.sync().await?;
        }
        Ok(count)
    }

    pub async fn is_empty(&mut self) -> CursorResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Move forward one publication, wrapping past the end. The first call
    /// after a refresh returns the first publication. With a single
    /// publication, asking again after seeing it reports `Exhausted`.
    pub async fn next(&mut self) -> CursorResult<Publication> {
        self.step(|position, len| (position + 1) % len).await
    }

    /// Mirror of `next()`.
    pub async fn previous(&mut self) -> CursorResult<Publication> {
        self.step(|position, len| (position + len - 1) % len).await
    }

    async fn step(&mut self, advance: impl Fn(usize, usize) -> usize) -> CursorResult<Publication> {
        self.sync().await?;
        let len = self.ids.len();
        if len == 0 {
            return Err(CursorError::Empty { state: self.state_filter });
        }
        if self.visited {
            if len == 1 {
                return Err(CursorError::Exhausted);
            }
            self.position = advance(self.position, len);
        }
        self.visited = true;
        self.load().await
    }

    /// Jump to offset `index`. Out-of-range offsets leave the cursor where it was.
    pub async fn select(&mut self, index: usize) -> CursorResult<Publication> {
        self.sync().await?;
        let len = self.ids.len();
        if index >= len {
            return Err(CursorError::OutOfBounds { index, len });
        }
        self.position = index;
        self.visited = true;
        self.load().await
    }

    /// Point the cursor at `id` so follow-up `next()`/`previous()` calls
    /// continue from there. Returns the offset of `id`.
    pub async fn center_on(&mut self, id: Uuid) -> CursorResult<usize> {
        self.ids = self.store.ids_by_state(self.state_filter).await?;
        match self.ids.iter().position(|candidate| *candidate == id) {
            Some(index) => {
                self.position = index;
                self.visited = true;
                self.current = Some(id);
                Ok(index)
            }
            None => {
                self.position = 0;
                self.visited = false;
                self.current = None;
                Err(CursorError::Stale { id })
            }
        }
    }

    /// The publication last returned, re-read from the store.
    pub async fn current(&mut self) -> CursorResult<Publication> {
        self.sync().await?;
        if self.visited && self.current.is_some() {
            return self.load().await;
        }
        if self.ids.is_empty() {
            Err(CursorError::Empty { state: self.state_filter })
        } else {
            Err(CursorError::NothingSelected)
        }
    }

    /// Numbered listing of the filtered set. Does not move the cursor.
    pub async fn list(&mut self) -> CursorResult<Vec<(usize, Publication)>> {
        let publications = self.store.find_by_state(self.state_filter).await?;
        self.adopt(publications.iter().map(|publication| publication.id).collect());
        Ok(publications.into_iter().enumerate().collect())
    }

    async fn sync(&mut self) -> CursorResult<()> {
        let ids = self.store.ids_by_state(self.state_filter).await?;
        self.adopt(ids);
        Ok(())
    }

    fn adopt(&mut self, ids: Vec<Uuid>) {
        match self.current {
            Some(current) => match ids.iter().position(|id| *id == current) {
                Some(index) => self.position = index,
                None => {
                    debug!("Publication {} left {}; cursor moves to its successor", current, self.state_filter);
                    self.current = None;
                    self.visited = false;
                    if self.position >= ids.len() {
                        self.position = 0;
                    }
                }
            },
            None if self.position >= ids.len() => self.position = 0,
            None => {}
        }
        self.ids = ids;
    }

    async fn load(&mut self) -> CursorResult<Publication> {
        let id = self.ids[self.position];
        match self.store.find_by_id(id).await? {
            Some(publication) if publication.state == self.state_filter => {
                self.current = Some(id);
                Ok(publication)
            }
            _ => {
                self.current = None;
                self.visited = false;
                Err(CursorError::Stale { id })
            }
        }
    }

    fn selected(&self) -> CursorResult<Uuid> {
        self.current.ok_or(CursorError::NothingSelected)
    }

    /// Writes go to the remembered id and only while it is still in the
    /// cursor's state, so an edit can never land on a neighbour.
    async fn apply(&self, update: PublicationUpdate) -> CursorResult<()> {
        let id = self.selected()?;
        if self.store.update_fields(id, update.expecting(self.state_filter)).await? {
            Ok(())
        } else {
            Err(CursorError::Stale { id })
        }
    }

    pub async fn insert(&self, publication: NewPublication) -> CursorResult<Uuid> {
        Ok(self.store.insert(publication).await?)
    }

    pub async fn update_title(&self, title: impl Into<String>) -> CursorResult<()> {
        self.apply(PublicationUpdate::title(title)).await
    }

    pub async fn update_content(&self, content: impl Into<String>) -> CursorResult<()> {
        self.apply(PublicationUpdate::content(content)).await
    }

    pub async fn update_image(&self, image: Option<Vec<u8>>) -> CursorResult<()> {
        self.apply(PublicationUpdate::image(image)).await
    }

    pub async fn update_state(&self, state: PublicationState) -> CursorResult<()> {
        self.apply(PublicationUpdate::state(state)).await
    }

    /// Load image bytes from the blob capability onto the selected publication.
    pub async fn attach_image(&self, blobs: &dyn BlobStore, key: &str) -> CursorResult<()> {
        let image = blobs.get(key).await.map_err(PipelineError::from)?;
        self.update_image(Some(image)).await
    }

    pub async fn remove(&self) -> CursorResult<()> {
        let id = self.selected()?;
        if self.store.delete(id).await? {
            Ok(())
        } else {
            Err(CursorError::Stale { id })
        }
    }

    pub async fn get(&self, id: Uuid) -> CursorResult<Publication> {
        self.store.find_by_id(id).await?.ok_or(CursorError::Stale { id })
    }

    pub async fn get_content(&self, id: Uuid) -> CursorResult<Option<String>> {
        Ok(self.get(id).await?.content)
    }

    pub async fn get_image(&self, id: Uuid) -> CursorResult<Option<Vec<u8>>> {
        Ok(self.get(id).await?.image)
    }
}
