use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use reqwest::{
    blocking::Client,
    header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tierstore_core::StoreValue;
use tracing::instrument;

use crate::CloudChange;

/// Remote key-value namespace a [`crate::CloudStorage`] mirrors.
pub trait CloudRemote: Send + Sync {
    /// Human-readable provider name (e.g., "http", "memory").
    fn name(&self) -> &'static str;

    /// Fetch every live entry of the namespace.
    fn pull(&self) -> Result<BTreeMap<String, StoreValue>>;

    /// Apply local changes upstream.
    fn push(&self, changes: &[CloudChange]) -> Result<()>;
}

/// Remote that stores nothing. Used when no cloud endpoint is configured.
pub struct NoopRemote;

impl CloudRemote for NoopRemote {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn pull(&self) -> Result<BTreeMap<String, StoreValue>> {
        Ok(BTreeMap::new())
    }

    fn push(&self, _changes: &[CloudChange]) -> Result<()> {
        Ok(())
    }
}

/// Shared in-process namespace. Clones talk to the same data, which lets tests
/// simulate several devices. Conflicting changes resolve last-writer-wins on
/// `updated_at`; deletions are kept as tombstones.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRemote {
    inner: Arc<Mutex<RemoteState>>,
}

#[derive(Debug, Default)]
struct RemoteState {
    entries: BTreeMap<String, RemoteEntry>,
    offline: bool,
}

#[derive(Debug)]
struct RemoteEntry {
    value: Option<StoreValue>,
    updated_at: DateTime<Utc>,
}

impl InMemoryRemote {
    /// Live entries as the remote currently sees them.
    pub fn snapshot(&self) -> BTreeMap<String, StoreValue> {
        self.inner
            .lock()
            .map(|state| live_entries(&*state))
            .unwrap_or_default()
    }

    /// While offline every call fails.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut state) = self.inner.lock() {
            state.offline = offline;
        }
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, RemoteState>> {
        let state = self
            .inner
            .lock()
            .map_err(|err| anyhow!("lock poisoned: {err}"))?;
        if state.offline {
            return Err(anyhow!("remote unreachable"));
        }
        Ok(state)
    }
}

fn live_entries(state: &RemoteState) -> BTreeMap<String, StoreValue> {
    state
        .entries
        .iter()
        .filter_map(|(key, entry)| Some((key.clone(), entry.value.clone()?)))
        .collect()
}

impl CloudRemote for InMemoryRemote {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn pull(&self) -> Result<BTreeMap<String, StoreValue>> {
        Ok(live_entries(&*self.state()?))
    }

    fn push(&self, changes: &[CloudChange]) -> Result<()> {
        let mut state = self.state()?;
        for change in changes {
            let newer = state
                .entries
                .get(&change.key)
                .is_none_or(|existing| change.updated_at >= existing.updated_at);
            if newer {
                state.entries.insert(
                    change.key.clone(),
                    RemoteEntry {
                        value: change.value.clone(),
                        updated_at: change.updated_at,
                    },
                );
            }
        }
        Ok(())
    }
}

/// Settings for an HTTP key-value service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HttpRemoteConfig {
    pub endpoint: String,
    pub token: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

/// JSON-over-HTTP remote:
/// `GET {endpoint}/namespaces/{ns}/entries` returns `{ "entries": { key: value } }`,
/// `POST {endpoint}/namespaces/{ns}/changes` accepts `{ "changes": [...] }`.
pub struct HttpRemote {
    cfg: HttpRemoteConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct EntriesResponse {
    #[serde(default)]
    entries: BTreeMap<String, StoreValue>,
}

impl HttpRemote {
    pub fn new(cfg: HttpRemoteConfig) -> Self {
        Self {
            cfg,
            client: Client::new(),
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("tierstore"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.cfg.token))?,
        );
        Ok(headers)
    }

    fn url(&self, resource: &str) -> String {
        format!(
            "{}/namespaces/{}/{resource}",
            self.cfg.endpoint.trim_end_matches('/'),
            self.cfg.namespace
        )
    }
}

impl CloudRemote for HttpRemote {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(skip_all, fields(endpoint = %self.cfg.endpoint, namespace = %self.cfg.namespace))]
    fn pull(&self) -> Result<BTreeMap<String, StoreValue>> {
        let resp: EntriesResponse = self
            .client
            .get(self.url("entries"))
            .headers(self.headers()?)
            .send()?
            .error_for_status()?
            .json()?;
        Ok(resp.entries)
    }

    #[instrument(skip_all, fields(endpoint = %self.cfg.endpoint, namespace = %self.cfg.namespace))]
    fn push(&self, changes: &[CloudChange]) -> Result<()> {
        self.client
            .post(self.url("changes"))
            .headers(self.headers()?)
            .json(&json!({ "changes": changes }))
            .send()?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn change(key: &str, value: Option<StoreValue>, updated_at: DateTime<Utc>) -> CloudChange {
        CloudChange {
            key: key.into(),
            value,
            updated_at,
            origin: Uuid::new_v4(),
        }
    }

    #[test]
    fn noop_round_trips() {
        let remote = NoopRemote;
        assert_eq!(remote.name(), "noop");
        remote.push(&[]).expect("push");
        assert!(remote.pull().expect("pull").is_empty());
    }

    #[test]
    fn older_changes_lose_to_newer_ones() {
        let remote = InMemoryRemote::default();
        let now = Utc::now();
        let earlier = now - chrono::Duration::seconds(5);

        remote
            .push(&[change("k", Some(json!("new")), now)])
            .expect("push");
        remote
            .push(&[change("k", Some(json!("stale")), earlier)])
            .expect("push");
        assert_eq!(remote.snapshot().get("k"), Some(&json!("new")));

        remote.push(&[change("k", None, now)]).expect("delete");
        remote
            .push(&[change("k", Some(json!("stale")), earlier)])
            .expect("push");
        assert!(remote.pull().expect("pull").is_empty());
    }

    #[test]
    fn http_urls_and_name() {
        let remote = HttpRemote::new(HttpRemoteConfig {
            endpoint: "https://kv.example.com/v1/".into(),
            token: "t".into(),
            namespace: "wallet".into(),
        });
        assert_eq!(remote.name(), "http");
        assert_eq!(
            remote.url("entries"),
            "https://kv.example.com/v1/namespaces/wallet/entries"
        );
        let headers = remote.headers().expect("headers");
        assert_eq!(headers[AUTHORIZATION], "Bearer t");
    }

    #[test]
    fn namespace_defaults_when_missing() {
        let cfg: HttpRemoteConfig =
            serde_json::from_value(json!({ "endpoint": "https://kv", "token": "t" }))
                .expect("parse");
        assert_eq!(cfg.namespace, "default");
    }
}
