//! Operator-level Datadog credentials.
//!
//! The operator resolves an API key and an application key from its own
//! environment. DatadogAgents that do not carry credentials fall back to
//! them, and the metadata forwarder authenticates with them. Consumers that
//! keep derived state register a callback and are told when the keys
//! rotate.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const API_KEY_ENV: &str = "DD_API_KEY";
pub const APP_KEY_ENV: &str = "DD_APP_KEY";

/// A resolved pair of keys. The application key may be empty.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Credentials {
    pub api_key: String,
    pub app_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("app_key", &"<redacted>")
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("DD_API_KEY is not set")]
    MissingApiKey,

    #[error("credential callbacks failed: {}", .0.join("; "))]
    Callbacks(Vec<String>),
}

pub type Result<T> = std::result::Result<T, CredentialError>;

/// Where credentials come from.
pub trait CredentialSource: Send + Sync {
    fn resolve(&self) -> Result<Credentials>;
}

/// Reads `DD_API_KEY` and `DD_APP_KEY` from the process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvCredentialSource;

impl CredentialSource for EnvCredentialSource {
    fn resolve(&self) -> Result<Credentials> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or(CredentialError::MissingApiKey)?;
        Ok(Credentials {
            api_key,
            app_key: std::env::var(APP_KEY_ENV).unwrap_or_default(),
        })
    }
}

/// Fixed credentials, for tests and for keys given on the command line.
#[derive(Clone, Debug, Default)]
pub struct StaticCredentialSource(pub Credentials);

impl CredentialSource for StaticCredentialSource {
    fn resolve(&self) -> Result<Credentials> {
        if self.0.api_key.is_empty() {
            return Err(CredentialError::MissingApiKey);
        }
        Ok(self.0.clone())
    }
}

/// Called with the new credentials after a rotation.
pub type CredentialCallback =
    Box<dyn Fn(&Credentials) -> std::result::Result<(), String> + Send + Sync>;

/// Cache of the operator credentials.
pub struct CredentialManager {
    source: Box<dyn CredentialSource>,
    cached: RwLock<Option<Credentials>>,
    callbacks: RwLock<Vec<CredentialCallback>>,
}

impl CredentialManager {
    pub fn new(source: impl CredentialSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            cached: RwLock::new(None),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Cached credentials, resolved on first use.
    pub async fn get(&self) -> Result<Credentials> {
        if let Some(creds) = self.cached.read().await.as_ref() {
            return Ok(creds.clone());
        }
        let mut cached = self.cached.write().await;
        // another caller may have resolved while we waited for the lock
        if let Some(creds) = cached.as_ref() {
            return Ok(creds.clone());
        }
        let creds = self.source.resolve()?;
        *cached = Some(creds.clone());
        Ok(creds)
    }

    /// Cached credentials without resolving.
    pub async fn cached(&self) -> Option<Credentials> {
        self.cached.read().await.clone()
    }

    pub async fn register_callback(&self, callback: CredentialCallback) {
        self.callbacks.write().await.push(callback);
    }

    /// Resolve again and notify callbacks when the keys changed.
    ///
    /// Returns whether the credentials changed. Every callback runs even
    /// when an earlier one fails; failures are reported together.
    pub async fn refresh(&self) -> Result<bool> {
        let fresh = self.source.resolve()?;
        {
            let mut cached = self.cached.write().await;
            if cached.as_ref() == Some(&fresh) {
                return Ok(false);
            }
            *cached = Some(fresh.clone());
        }
        info!("Operator credentials changed");

        let errors: Vec<String> = self
            .callbacks
            .read()
            .await
            .iter()
            .filter_map(|callback| callback(&fresh).err())
            .collect();
        if errors.is_empty() {
            Ok(true)
        } else {
            Err(CredentialError::Callbacks(errors))
        }
    }

    /// Refresh on a fixed interval until the task is aborted.
    pub fn spawn_refresh(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.refresh().await {
                    Ok(changed) => debug!(changed, "Refreshed operator credentials"),
                    Err(e) => warn!(error = %e, "Failed to refresh operator credentials"),
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A source whose keys can be swapped between calls.
    struct Rotating(Arc<Mutex<Credentials>>);

    impl CredentialSource for Rotating {
        fn resolve(&self) -> Result<Credentials> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    fn creds(api: &str) -> Credentials {
        Credentials {
            api_key: api.to_string(),
            app_key: String::new(),
        }
    }

    #[tokio::test]
    async fn test_get_caches_first_resolution() {
        let keys = Arc::new(Mutex::new(creds("a")));
        let manager = CredentialManager::new(Rotating(keys.clone()));
        assert_eq!(manager.get().await.unwrap().api_key, "a");

        *keys.lock().unwrap() = creds("b");
        assert_eq!(manager.get().await.unwrap().api_key, "a");
    }

    #[tokio::test]
    async fn test_refresh_runs_callbacks_on_change() {
        let keys = Arc::new(Mutex::new(creds("a")));
        let manager = CredentialManager::new(Rotating(keys.clone()));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        manager
            .register_callback(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .await;

        manager.get().await.unwrap();
        assert!(!manager.refresh().await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        *keys.lock().unwrap() = creds("b");
        assert!(manager.refresh().await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.cached().await.unwrap().api_key, "b");
    }

    #[tokio::test]
    async fn test_refresh_joins_callback_errors() {
        let keys = Arc::new(Mutex::new(creds("a")));
        let manager = CredentialManager::new(Rotating(keys.clone()));
        let ran = Arc::new(AtomicUsize::new(0));
        for name in ["first", "second"] {
            let ran = ran.clone();
            manager
                .register_callback(Box::new(move |_| {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Err(format!("{name} failed"))
                }))
                .await;
        }

        let err = manager.refresh().await.unwrap_err();
        assert_eq!(ran.load(Ordering::SeqCst), 2);
        match err {
            CredentialError::Callbacks(errors) => {
                assert_eq!(errors, vec!["first failed", "second failed"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_static_source_requires_api_key() {
        let manager = CredentialManager::new(StaticCredentialSource::default());
        assert!(matches!(
            manager.get().await,
            Err(CredentialError::MissingApiKey)
        ));
    }

    #[test]
    fn test_debug_redacts_keys() {
        let printed = format!("{:?}", creds("secret-key"));
        assert!(!printed.contains("secret-key"));
    }
}
