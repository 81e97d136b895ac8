//! Conversion of Autotask records into data frames.
use autotask_client::{Company, Contact, Resource, Ticket};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use grafana_plugin_sdk::{data, prelude::*};
use tracing::warn;

/// Parse an Autotask timestamp.
///
/// Accepts RFC 3339 and the zone-less forms Autotask uses
/// (`2023-01-15T10:00:00`, optionally with fractional seconds or a trailing
/// `Z`, and bare dates), all interpreted as UTC. Anything else yields `None`
/// and a warning.
pub fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = value.strip_suffix('Z').unwrap_or(value);
    if let Ok(dt) = NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc());
    }
    if let Some(dt) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Some(dt.and_utc());
    }
    warn!(value, "Could not parse Autotask timestamp");
    None
}

fn parse_opt_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    value.and_then(parse_time)
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

/// Build the `tickets` frame.
pub fn tickets(tickets: &[Ticket]) -> data::Frame {
    [
        tickets.iter().map(|t| t.id.unwrap_or_default()).into_field("id"),
        tickets.iter().map(|t| text(&t.ticket_number)).into_field("ticketNumber"),
        tickets.iter().map(|t| text(&t.title)).into_field("title"),
        tickets.iter().map(|t| t.status.unwrap_or_default()).into_field("status"),
        tickets.iter().map(|t| t.priority.unwrap_or_default()).into_field("priority"),
        tickets
            .iter()
            .map(|t| parse_opt_time(t.create_date.as_deref()))
            .into_opt_field("createDate"),
        tickets
            .iter()
            .map(|t| parse_opt_time(t.due_date_time.as_deref()))
            .into_opt_field("dueDateTime"),
        tickets.iter().map(|t| t.company_id.unwrap_or_default()).into_field("companyID"),
        tickets.iter().map(|t| t.queue_id.unwrap_or_default()).into_field("queueID"),
    ]
    .into_frame("tickets")
}

/// Build the `resources` frame.
pub fn resources(resources: &[Resource]) -> data::Frame {
    [
        resources.iter().map(|r| r.id.unwrap_or_default()).into_field("id"),
        resources.iter().map(|r| text(&r.first_name)).into_field("firstName"),
        resources.iter().map(|r| text(&r.last_name)).into_field("lastName"),
        resources.iter().map(|r| text(&r.email)).into_field("email"),
        resources.iter().map(|r| r.is_active.unwrap_or_default()).into_field("active"),
    ]
    .into_frame("resources")
}

/// Build the `companies` frame.
pub fn companies(companies: &[Company]) -> data::Frame {
    [
        companies.iter().map(|c| c.id.unwrap_or_default()).into_field("id"),
        companies.iter().map(|c| text(&c.company_name)).into_field("companyName"),
        companies.iter().map(|c| text(&c.phone)).into_field("phone"),
        companies.iter().map(|c| c.is_active.unwrap_or_default()).into_field("active"),
        companies.iter().map(|c| text(&c.city)).into_field("city"),
        companies.iter().map(|c| text(&c.state)).into_field("state"),
    ]
    .into_frame("companies")
}

/// Build the `contacts` frame.
pub fn contacts(contacts: &[Contact]) -> data::Frame {
    [
        contacts.iter().map(|c| c.id.unwrap_or_default()).into_field("id"),
        contacts.iter().map(|c| text(&c.first_name)).into_field("firstName"),
        contacts.iter().map(|c| text(&c.last_name)).into_field("lastName"),
        contacts.iter().map(|c| text(&c.email_address)).into_field("email"),
        contacts.iter().map(|c| text(&c.phone)).into_field("phone"),
        contacts.iter().map(|c| c.company_id.unwrap_or_default()).into_field("companyID"),
        contacts.iter().map(|c| c.is_active.unwrap_or_default()).into_field("active"),
    ]
    .into_frame("contacts")
}
