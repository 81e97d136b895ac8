//! Per-datasource instances and the registry caching them.
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use autotask_client::{Client, ZoneInfo};
use chrono::{DateTime, Utc};
use grafana_plugin_sdk::data;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    config::DatasourceSettings,
    query::{self, QueryModel, TimeWindow},
};

/// Errors creating a datasource instance.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InstanceError {
    /// Grafana didn't send instance settings with the request.
    #[error("missing datasource instance settings")]
    MissingSettings,
    /// The datasource settings are incomplete.
    #[error("invalid datasource settings: {0}")]
    Config(#[from] autotask_client::ConfigError),
    /// The Autotask client could not be constructed.
    #[error("could not create Autotask client: {0}")]
    Client(#[from] autotask_client::Error),
}

/// A configured Autotask datasource.
#[derive(Debug)]
pub struct Datasource {
    client: Client,
}

impl Datasource {
    /// Create a datasource from validated settings.
    pub fn new(settings: &DatasourceSettings) -> Result<Self, InstanceError> {
        Ok(Self {
            client: Client::new(settings.client_config())?,
        })
    }

    /// The Autotask client used by this datasource.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The zone serving the configured account.
    pub async fn zone_info(&self) -> autotask_client::Result<ZoneInfo> {
        self.client.zone_info().await
    }

    /// Run a panel query, returning a single frame.
    pub async fn query(
        &self,
        model: &QueryModel,
        window: Option<&TimeWindow>,
    ) -> Result<data::Frame, query::Error> {
        query::run(&self.client, model, window).await
    }

    /// Abort in-flight requests.
    pub fn dispose(&self) {
        self.client.shutdown();
    }
}

struct Entry<T> {
    updated: DateTime<Utc>,
    instance: Arc<T>,
}

type Construct<S, T, E> = Box<dyn Fn(&S) -> Result<T, E> + Send + Sync>;
type Dispose<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Instances keyed by datasource UID.
///
/// An instance is constructed the first time its UID is seen and rebuilt when
/// Grafana reports a different `updated` timestamp for it; the replaced
/// instance is disposed.
pub struct InstanceRegistry<S, T, E> {
    instances: RwLock<HashMap<String, Entry<T>>>,
    construct: Construct<S, T, E>,
    dispose: Dispose<T>,
}

impl<S, T, E> InstanceRegistry<S, T, E> {
    /// Create an empty registry with the given construction and disposal callbacks.
    pub fn new(
        construct: impl Fn(&S) -> Result<T, E> + Send + Sync + 'static,
        dispose: impl Fn(&T) + Send + Sync + 'static,
    ) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            construct: Box::new(construct),
            dispose: Box::new(dispose),
        }
    }

    /// Return the instance for `uid`, constructing it from `settings` if it is
    /// missing or stale.
    pub fn get(&self, uid: &str, updated: DateTime<Utc>, settings: &S) -> Result<Arc<T>, E> {
        {
            let instances = self.instances.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = instances.get(uid).filter(|e| e.updated == updated) {
                return Ok(Arc::clone(&entry.instance));
            }
        }
        let mut instances = self.instances.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = instances.get(uid).filter(|e| e.updated == updated) {
            return Ok(Arc::clone(&entry.instance));
        }
        let instance = Arc::new((self.construct)(settings)?);
        info!(uid, %updated, "Created datasource instance");
        let stale = instances.insert(
            uid.to_string(),
            Entry {
                updated,
                instance: Arc::clone(&instance),
            },
        );
        if let Some(stale) = stale {
            debug!(uid, "Disposing outdated datasource instance");
            (self.dispose)(&stale.instance);
        }
        Ok(instance)
    }

    /// Remove and dispose the instance for `uid`.
    pub fn remove(&self, uid: &str) -> bool {
        let removed = self
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uid);
        match removed {
            Some(entry) => {
                (self.dispose)(&entry.instance);
                true
            }
            None => false,
        }
    }

    /// The number of cached instances.
    pub fn len(&self) -> usize {
        self.instances.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no instances are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S, T, E> Drop for InstanceRegistry<S, T, E> {
    fn drop(&mut self) {
        let instances = self.instances.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, entry) in instances.drain() {
            (self.dispose)(&entry.instance);
        }
    }
}

impl<S, T, E> fmt::Debug for InstanceRegistry<S, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("instances", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use chrono::TimeZone;

    use super::*;

    struct Recorder {
        constructed: AtomicUsize,
        disposed: Mutex<Vec<String>>,
    }

    fn registry(recorder: Arc<Recorder>) -> InstanceRegistry<String, String, String> {
        let constructed = Arc::clone(&recorder);
        InstanceRegistry::new(
            move |settings: &String| {
                constructed.constructed.fetch_add(1, Ordering::SeqCst);
                if settings.is_empty() {
                    Err("empty settings".to_string())
                } else {
                    Ok(settings.clone())
                }
            },
            move |instance: &String| recorder.disposed.lock().unwrap().push(instance.clone()),
        )
    }

    fn recorder() -> Arc<Recorder> {
        Arc::new(Recorder {
            constructed: AtomicUsize::new(0),
            disposed: Mutex::new(Vec::new()),
        })
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn reuses_instances_until_settings_change() {
        let recorder = recorder();
        let registry = registry(Arc::clone(&recorder));

        let first = registry.get("ds1", at(1), &"v1".to_string()).unwrap();
        let again = registry.get("ds1", at(1), &"ignored".to_string()).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(recorder.constructed.load(Ordering::SeqCst), 1);

        let refreshed = registry.get("ds1", at(2), &"v2".to_string()).unwrap();
        assert_eq!(*refreshed, "v2");
        assert_eq!(*recorder.disposed.lock().unwrap(), vec!["v1".to_string()]);

        registry.get("ds2", at(1), &"other".to_string()).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn failed_construction_is_not_cached() {
        let recorder = recorder();
        let registry = registry(Arc::clone(&recorder));
        assert_eq!(registry.get("ds", at(1), &String::new()).unwrap_err(), "empty settings");
        assert!(registry.is_empty());
        registry.get("ds", at(1), &"ok".to_string()).unwrap();
        assert_eq!(recorder.constructed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn remove_and_drop_dispose() {
        let recorder = recorder();
        let registry = registry(Arc::clone(&recorder));
        registry.get("a", at(1), &"a".to_string()).unwrap();
        registry.get("b", at(1), &"b".to_string()).unwrap();
        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        drop(registry);
        let mut disposed = recorder.disposed.lock().unwrap().clone();
        disposed.sort();
        assert_eq!(disposed, vec!["a".to_string(), "b".to_string()]);
    }
}
