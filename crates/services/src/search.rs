//! Paged search over posts and members.
//!
//! The listing and the count for one request are read in the same
//! transaction with the same filter value.

use std::sync::Arc;

use domains::{
    BoardStore, DomainResult, EntityKind, MemberFilter, MemberId, MemberSearchOption, MemberSummary,
    PageRequest, Paged, PostFilter, PostSearchOption, PostSummary,
};
use serde::Serialize;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchResults {
    Posts(Paged<PostSummary>),
    Members(Paged<MemberSummary>),
}

#[derive(Clone)]
pub struct SearchService {
    store: Arc<dyn BoardStore>,
}

impl SearchService {
    pub fn new(store: Arc<dyn BoardStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(option = ?filter.option, owner = ?filter.owner))]
    pub async fn search_posts(&self, filter: &PostFilter, page: &PageRequest) -> DomainResult<Paged<PostSummary>> {
        let mut tx = self.store.begin().await?;
        let total = tx.count_posts(filter).await?;
        let rows = tx.search_posts(filter, page.offset(), page.limit()).await?;
        tx.commit().await?;

        debug!(total, returned = rows.len(), "post search");
        Ok(Paged::new(rows, total, page))
    }

    #[instrument(skip(self), fields(option = ?filter.option))]
    pub async fn search_members(&self, filter: &MemberFilter, page: &PageRequest) -> DomainResult<Paged<MemberSummary>> {
        let mut tx = self.store.begin().await?;
        let total = tx.count_members(filter).await?;
        let rows = tx.search_members(filter, page.offset(), page.limit()).await?;
        tx.commit().await?;

        debug!(total, returned = rows.len(), "member search");
        Ok(Paged::new(rows, total, page))
    }

    /// Entry point for raw form values. Unknown option codes search `All`.
    /// The owner scope only applies to post listings.
    pub async fn dispatch(
        &self,
        kind: EntityKind,
        option_code: &str,
        keyword: &str,
        page: &PageRequest,
        owner: Option<MemberId>,
    ) -> DomainResult<SearchResults> {
        match kind {
            EntityKind::Posts => {
                let mut filter = PostFilter::new(PostSearchOption::from(option_code), keyword);
                filter.owner = owner;
                self.search_posts(&filter, page).await.map(SearchResults::Posts)
            }
            EntityKind::Members => {
                let filter = MemberFilter::new(MemberSearchOption::from(option_code), keyword);
                self.search_members(&filter, page).await.map(SearchResults::Members)
            }
        }
    }
}
