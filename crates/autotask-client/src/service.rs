//! Typed operations on a single Autotask collection.
use std::marker::PhantomData;

use reqwest::Method;
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use url::form_urlencoded;

use crate::{
    client::{Client, NO_BODY},
    entity::{CountResponse, Entity, ItemResponse, ListResponse, PageDetails, Webhook},
    error::{Error, Result},
    query::{EntityQueryParams, Filter},
};

/// The largest page Autotask will return.
pub const MAX_PAGE_SIZE: u32 = 500;

/// CRUD, query and pagination operations on the collection holding `T`.
///
/// Obtained from [`Client::entities`] or one of the per-collection shortcuts
/// such as [`Client::tickets`].
#[derive(Debug)]
pub struct EntityService<'c, T> {
    client: &'c Client,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for EntityService<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for EntityService<'_, T> {}

impl<'c, T: Entity> EntityService<'c, T> {
    pub(crate) fn new(client: &'c Client) -> Self {
        Self {
            client,
            _entity: PhantomData,
        }
    }

    /// Fetch a single record by id.
    pub async fn get(&self, id: i64) -> Result<T> {
        let url = format!("{}/{id}", T::COLLECTION);
        let response: ItemResponse<T> = self
            .client
            .send_json(Method::GET, &url, NO_BODY)
            .await
            .map_err(|e| e.context(T::COLLECTION, "get"))?;
        response.item.ok_or(Error::NotFound {
            entity: T::COLLECTION,
            id,
        })
    }

    /// Query with a filter expression (see [`Filter::parse`]).
    ///
    /// A blank expression applies the collection's default filter. At most one
    /// page of [`MAX_PAGE_SIZE`] records is returned.
    pub async fn query(&self, filter: &str) -> Result<ListResponse<T>> {
        let params = self.params(filter)?.with_max_records(MAX_PAGE_SIZE);
        self.query_with(&params).await
    }

    /// Query with explicit search parameters.
    #[tracing::instrument(skip(self), fields(entity = T::COLLECTION), level = "debug")]
    pub async fn query_with(&self, params: &EntityQueryParams) -> Result<ListResponse<T>> {
        let url = format!("{}/query?search={}", T::COLLECTION, search(params)?);
        let list: ListResponse<T> = self
            .client
            .send_json(Method::GET, &url, NO_BODY)
            .await
            .map_err(|e| e.context(T::COLLECTION, "query"))?;
        debug!(count = list.items.len(), "Queried Autotask entities");
        Ok(list)
    }

    /// Query and follow `nextPageUrl` links until `limit` records are collected
    /// or there are no more pages.
    pub async fn query_all(&self, params: EntityQueryParams, limit: usize) -> Result<Vec<T>> {
        let page_size = u32::try_from(limit).unwrap_or(u32::MAX).clamp(1, MAX_PAGE_SIZE);
        let params = EntityQueryParams {
            max_records: page_size,
            ..params
        };
        let mut page = self.query_with(&params).await?;
        let mut items = std::mem::take(&mut page.items);
        while items.len() < limit {
            let Some(next) = page.page_details.next_page_url.as_deref() else {
                break;
            };
            page = self.page(next, "next_page").await?;
            if page.items.is_empty() {
                break;
            }
            items.append(&mut page.items);
        }
        items.truncate(limit);
        Ok(items)
    }

    /// The search parameters a filter expression translates to.
    ///
    /// A blank expression yields the collection's default filter, if it has one.
    pub fn params(&self, filter: &str) -> Result<EntityQueryParams> {
        let filter = Filter::parse(filter)?.or_else(T::default_filter);
        Ok(EntityQueryParams::new(filter))
    }

    /// Count the records matching a filter expression.
    pub async fn count(&self, filter: &str) -> Result<i64> {
        let params = self.params(filter)?;
        let url = format!("{}/query/count?search={}", T::COLLECTION, search(&params)?);
        let response: CountResponse = self
            .client
            .send_json(Method::GET, &url, NO_BODY)
            .await
            .map_err(|e| e.context(T::COLLECTION, "count"))?;
        Ok(response.count)
    }

    /// Create a record, returning it as stored.
    pub async fn create(&self, entity: &T) -> Result<T> {
        let response: ItemResponse<T> = self
            .client
            .send_json(Method::POST, T::COLLECTION, Some(entity))
            .await
            .map_err(|e| e.context(T::COLLECTION, "create"))?;
        Self::unwrap_item(response, entity.id(), "create")
    }

    /// Update the record with the given id.
    pub async fn update(&self, id: i64, entity: &T) -> Result<T> {
        let url = format!("{}/{id}", T::COLLECTION);
        let response: ItemResponse<T> = self
            .client
            .send_json(Method::PATCH, &url, Some(entity))
            .await
            .map_err(|e| e.context(T::COLLECTION, "update"))?;
        Self::unwrap_item(response, Some(id), "update")
    }

    /// Delete the record with the given id.
    pub async fn delete(&self, id: i64) -> Result<()> {
        let url = format!("{}/{id}", T::COLLECTION);
        self.client
            .send(Method::DELETE, &url, NO_BODY)
            .await
            .map_err(|e| e.context(T::COLLECTION, "delete"))?;
        Ok(())
    }

    /// Create several records in one request.
    pub async fn batch_create(&self, entities: &[T]) -> Result<()> {
        self.batch(Method::POST, entities, "batch_create").await
    }

    /// Update several records in one request.
    pub async fn batch_update(&self, entities: &[T]) -> Result<()> {
        self.batch(Method::PATCH, entities, "batch_update").await
    }

    /// Delete several records in one request.
    pub async fn batch_delete(&self, ids: &[i64]) -> Result<()> {
        self.batch(Method::DELETE, ids, "batch_delete").await
    }

    /// Fetch the page after the one described by `details`.
    ///
    /// Returns an empty page if there is no next page.
    pub async fn next_page(&self, details: &PageDetails) -> Result<ListResponse<T>> {
        match details.next_page_url.as_deref() {
            Some(url) => self.page(url, "next_page").await,
            None => Ok(empty_page()),
        }
    }

    /// Fetch the page before the one described by `details`.
    ///
    /// Returns an empty page if there is no previous page.
    pub async fn previous_page(&self, details: &PageDetails) -> Result<ListResponse<T>> {
        match details.prev_page_url.as_deref() {
            Some(url) => self.page(url, "previous_page").await,
            None => Ok(empty_page()),
        }
    }

    async fn page(&self, url: &str, operation: &'static str) -> Result<ListResponse<T>> {
        self.client
            .send_json(Method::GET, url, NO_BODY)
            .await
            .map_err(|e| e.context(T::COLLECTION, operation))
    }

    async fn batch<B: Serialize + ?Sized>(
        &self,
        method: Method,
        body: &B,
        operation: &'static str,
    ) -> Result<()> {
        let url = format!("{}/batch", T::COLLECTION);
        self.client
            .send(method, &url, Some(body))
            .await
            .map_err(|e| e.context(T::COLLECTION, operation))?;
        Ok(())
    }

    fn unwrap_item(
        response: ItemResponse<T>,
        id: Option<i64>,
        operation: &'static str,
    ) -> Result<T> {
        response.item.ok_or_else(|| {
            Error::NotFound {
                entity: T::COLLECTION,
                id: id.unwrap_or_default(),
            }
            .context(T::COLLECTION, operation)
        })
    }
}

impl EntityService<'_, Webhook> {
    /// Register a webhook delivering the given events to `url`.
    pub async fn create_webhook(&self, url: &str, events: &[&str]) -> Result<Webhook> {
        let body = json!({
            "webhookURL": url,
            "events": events,
            "isActive": true,
        });
        let response: ItemResponse<Webhook> = self
            .client
            .send_json(Method::POST, Webhook::COLLECTION, Some(&body))
            .await
            .map_err(|e| e.context(Webhook::COLLECTION, "create"))?;
        Self::unwrap_item(response, None, "create")
    }

    /// Remove a webhook registration.
    pub async fn delete_webhook(&self, id: i64) -> Result<()> {
        self.delete(id).await
    }

    /// List every webhook registration.
    pub async fn list_webhooks(&self) -> Result<Vec<Webhook>> {
        let params = EntityQueryParams::default().with_max_records(MAX_PAGE_SIZE);
        Ok(self.query_with(&params).await?.items)
    }
}

fn search(params: &EntityQueryParams) -> Result<String> {
    let json = params.to_search()?;
    Ok(form_urlencoded::byte_serialize(json.as_bytes()).collect())
}

fn empty_page<T>() -> ListResponse<T> {
    ListResponse {
        items: Vec::new(),
        page_details: PageDetails::default(),
    }
}
