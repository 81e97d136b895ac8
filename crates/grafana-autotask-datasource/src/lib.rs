/*! A Grafana backend datasource for the Autotask PSA REST API.

Panel queries name an entity kind (`tickets`, `resources`, `companies` or
`contacts`), an optional filter and an optional time field. Each query is
translated into an Autotask search, and the matching records are returned as a
single data frame per query.

The plugin also serves a handful of resource endpoints used by the
configuration and query editors:

- `POST /zoneinfo` returns the zone serving the configured API user
- `POST /query` runs a query outside a panel and returns its frames as JSON
- `/test` checks that Autotask is reachable with the configured credentials
*/
pub mod config;
pub mod frames;
pub mod instance;
pub mod plugin;
pub mod query;

pub use plugin::AutotaskPlugin;
