//! Autotask entity records and the response envelopes wrapping them.
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};

use crate::query::{Filter, QueryFilter, QueryOperator};

/// The ticket status Autotask uses for completed tickets.
pub const TICKET_STATUS_COMPLETE: i64 = 5;

/// A record stored in an Autotask REST collection.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The collection path segment, e.g. `Tickets`.
    const COLLECTION: &'static str;

    /// The record's id, if it has been assigned one.
    fn id(&self) -> Option<i64>;

    /// The filter applied when a query is made without one.
    fn default_filter() -> Option<Filter> {
        None
    }
}

/// An Autotask service ticket.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(missing_docs)]
pub struct Ticket {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_date: Option<String>,
    #[serde(rename = "companyID", skip_serializing_if = "Option::is_none")]
    pub company_id: Option<i64>,
    #[serde(rename = "contactID", skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<i64>,
    #[serde(rename = "queueID", skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<i64>,
    #[serde(rename = "assignedResourceID", skip_serializing_if = "Option::is_none")]
    pub assigned_resource_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_type: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_issue_type: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<i64>,
}

impl Entity for Ticket {
    const COLLECTION: &'static str = "Tickets";

    fn id(&self) -> Option<i64> {
        self.id
    }

    /// Open tickets only.
    fn default_filter() -> Option<Filter> {
        Some(QueryFilter::new("Status", QueryOperator::NotEquals, TICKET_STATUS_COMPLETE).into())
    }
}

/// An Autotask company (account).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(missing_docs)]
pub struct Company {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_type: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_address: Option<String>,
    #[serde(alias = "active", deserialize_with = "flag", skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(rename = "ownerResourceID", skip_serializing_if = "Option::is_none")]
    pub owner_resource_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_date: Option<String>,
}

impl Entity for Company {
    const COLLECTION: &'static str = "Companies";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn default_filter() -> Option<Filter> {
        Some(QueryFilter::new("IsActive", QueryOperator::Equals, true).into())
    }
}

/// A contact at an Autotask company.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(missing_docs)]
pub struct Contact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile_phone: Option<String>,
    #[serde(rename = "companyID", skip_serializing_if = "Option::is_none")]
    pub company_id: Option<i64>,
    #[serde(alias = "active", deserialize_with = "flag", skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_date: Option<String>,
}

impl Entity for Contact {
    const COLLECTION: &'static str = "Contacts";

    fn id(&self) -> Option<i64> {
        self.id
    }
}

/// An Autotask resource, i.e. a staff member.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(missing_docs)]
pub struct Resource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(alias = "active", deserialize_with = "flag", skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl Entity for Resource {
    const COLLECTION: &'static str = "Resources";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn default_filter() -> Option<Filter> {
        Some(QueryFilter::new("IsActive", QueryOperator::Equals, true).into())
    }
}

/// An outbound webhook registration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(missing_docs)]
pub struct Webhook {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "webhookURL", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
    #[serde(alias = "active", deserialize_with = "flag", skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl Entity for Webhook {
    const COLLECTION: &'static str = "Webhooks";

    fn id(&self) -> Option<i64> {
        self.id
    }
}

/// Autotask reports some flags as booleans and others as `0`/`1`.
fn flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(Option::<Flag>::deserialize(deserializer)?.map(|f| match f {
        Flag::Bool(b) => b,
        Flag::Int(n) => n != 0,
    }))
}

/// The `{"item": ..}` envelope returned for single records.
#[derive(Clone, Debug, Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
pub struct ItemResponse<T> {
    /// The record, absent if it doesn't exist.
    #[serde(default = "Option::default")]
    pub item: Option<T>,
}

/// The `{"items": [..], "pageDetails": ..}` envelope returned by queries.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", bound = "T: DeserializeOwned")]
pub struct ListResponse<T> {
    /// The records on this page.
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    /// Pagination links for neighbouring pages.
    #[serde(default)]
    pub page_details: PageDetails,
}

/// The `{"count": n}` envelope returned by count queries.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct CountResponse {
    /// The number of matching records.
    pub count: i64,
}

/// Pagination information attached to query results.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageDetails {
    /// The 1-based page number.
    pub page_number: i64,
    /// The number of records per page.
    pub page_size: i64,
    /// The number of records on this page.
    pub count: i64,
    /// The absolute URL of the next page, if any.
    pub next_page_url: Option<String>,
    /// The absolute URL of the previous page, if any.
    pub prev_page_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn ticket_wire_names() {
        let ticket: Ticket = serde_json::from_value(json!({
            "id": 12,
            "ticketNumber": "T20230115.0001",
            "title": "Printer down",
            "status": 1,
            "priority": 2,
            "createDate": "2023-01-15T10:00:00Z",
            "dueDateTime": null,
            "companyID": 7,
            "queueID": 29682833,
            "userDefinedFields": []
        }))
        .unwrap();
        assert_eq!(ticket.id(), Some(12));
        assert_eq!(ticket.company_id, Some(7));
        assert_eq!(ticket.queue_id, Some(29682833));
        assert_eq!(ticket.due_date_time, None);

        let out = serde_json::to_value(Ticket {
            title: Some("New".to_string()),
            company_id: Some(7),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(out, json!({"title": "New", "companyID": 7}));
    }

    #[test]
    fn active_flags_accept_bools_and_ints() {
        let contact: Contact = serde_json::from_value(json!({
            "id": 1,
            "isActive": 1,
            "emailAddress": "a@b.c"
        }))
        .unwrap();
        assert_eq!(contact.is_active, Some(true));
        assert_eq!(contact.email_address.as_deref(), Some("a@b.c"));

        let resource: Resource = serde_json::from_value(json!({"id": 2, "active": false})).unwrap();
        assert_eq!(resource.is_active, Some(false));

        let company: Company = serde_json::from_value(json!({"id": 3})).unwrap();
        assert_eq!(company.is_active, None);
    }

    #[test]
    fn default_filters() {
        assert_eq!(
            serde_json::to_value(Ticket::default_filter()).unwrap(),
            json!({"field": "Status", "op": "noteq", "value": 5})
        );
        assert_eq!(
            serde_json::to_value(Company::default_filter()).unwrap(),
            json!({"field": "IsActive", "op": "eq", "value": true})
        );
        assert_eq!(Resource::default_filter(), Company::default_filter());
        assert_eq!(Contact::default_filter(), None);
    }

    #[test]
    fn list_envelope() {
        let list: ListResponse<Company> = serde_json::from_value(json!({
            "items": [{"id": 1, "companyName": "Acme"}],
            "pageDetails": {
                "count": 1,
                "requestCount": 500,
                "prevPageUrl": null,
                "nextPageUrl": "https://example.com/next"
            }
        }))
        .unwrap();
        assert_eq!(list.items[0].company_name.as_deref(), Some("Acme"));
        assert_eq!(list.page_details.next_page_url.as_deref(), Some("https://example.com/next"));
        assert_eq!(list.page_details.prev_page_url, None);

        let empty: ListResponse<Company> = serde_json::from_value(json!({})).unwrap();
        assert!(empty.items.is_empty());
    }
}
