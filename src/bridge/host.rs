//! Host side of the bridge
//!
//! [`RuliaHost`] owns the state shared by all invocations (HTTP client,
//! storage, cookies, user config). Every invocation gets its own
//! [`PluginBridge`]: the capability handle a plugin uses instead of a
//! global object. Clones of one handle share one execution context.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error};

use super::context::{ExecutionContext, InvocationOutcome, PendingOutcome};
use super::cookies::{CookieJar, CookieRecord, CookieSource};
use super::http::{HttpBridge, HttpRequest};
use super::logger::{PluginLogger, TracingPluginLogger};
use super::models::{EntryPoint, PluginPayload};
use super::notify::{AppNotifier, Toast, TracingNotifier};
use super::storage::{KeyValueStore, StorageManager};
use crate::core::config::Config;
use crate::core::error::{BridgeError, Result};

struct HostShared {
    app_version: String,
    http: HttpBridge,
    storage: StorageManager,
    cookies: Arc<dyn CookieSource>,
    notifier: Arc<dyn AppNotifier>,
    user_config: HashMap<String, HashMap<String, String>>,
    max_execution_time: Option<Duration>,
}

/// Builder for [`RuliaHost`]
pub struct RuliaHostBuilder {
    app_version: String,
    http: HttpBridge,
    storage_dir: PathBuf,
    cookies: Arc<dyn CookieSource>,
    notifier: Arc<dyn AppNotifier>,
    user_config: HashMap<String, HashMap<String, String>>,
    max_execution_time: Option<Duration>,
}

impl RuliaHostBuilder {
    pub fn app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    pub fn cookies(mut self, cookies: Arc<dyn CookieSource>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn AppNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn user_config(mut self, plugin: impl Into<String>, config: HashMap<String, String>) -> Self {
        self.user_config.insert(plugin.into(), config);
        self
    }

    pub fn max_execution_time(mut self, limit: Option<Duration>) -> Self {
        self.max_execution_time = limit;
        self
    }

    pub fn build(self) -> RuliaHost {
        RuliaHost {
            shared: Arc::new(HostShared {
                app_version: self.app_version,
                http: self.http,
                storage: StorageManager::new(self.storage_dir),
                cookies: self.cookies,
                notifier: self.notifier,
                user_config: self.user_config,
                max_execution_time: self.max_execution_time,
            }),
        }
    }
}

#[derive(Clone)]
pub struct RuliaHost {
    shared: Arc<HostShared>,
}

impl RuliaHost {
    pub fn builder(http: HttpBridge, storage_dir: impl Into<PathBuf>) -> RuliaHostBuilder {
        RuliaHostBuilder {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            http,
            storage_dir: storage_dir.into(),
            cookies: Arc::new(CookieJar::new()),
            notifier: Arc::new(TracingNotifier),
            user_config: HashMap::new(),
            max_execution_time: None,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let http = HttpBridge::from_config(&config.http)?;
        let limit = match config.plugins.max_execution_time_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        let mut builder = Self::builder(http, config.storage.local_storage_dir.clone())
            .app_version(config.app.version.clone())
            .max_execution_time(limit);
        for (plugin, values) in &config.plugins.user_config {
            builder = builder.user_config(plugin.clone(), values.clone());
        }
        if let Some(cookie_file) = &config.storage.cookie_file {
            builder = builder.cookies(Arc::new(CookieJar::from_file(cookie_file)?));
        }
        Ok(builder.build())
    }

    pub fn app_version(&self) -> &str {
        &self.shared.app_version
    }

    pub fn storage(&self) -> &StorageManager {
        &self.shared.storage
    }

    /// Start an invocation by hand
    ///
    /// The plugin side gets the bridge handle, the host keeps the pending
    /// outcome.
    pub fn begin_invocation(
        &self,
        plugin: impl Into<String>,
        entry_point: EntryPoint,
    ) -> (PluginBridge, PendingOutcome) {
        let (context, pending) = ExecutionContext::start(plugin, entry_point);
        let logger = Arc::new(TracingPluginLogger::new(
            context.plugin(),
            context.invocation_id(),
        ));
        let bridge = PluginBridge {
            context,
            shared: self.shared.clone(),
            logger,
        };
        (bridge, pending)
    }

    /// Run `run` as one invocation and wait for its terminal signal
    ///
    /// The plugin future runs on its own tokio task. Returning without a
    /// terminal call is a protocol violation; a panic becomes a plugin
    /// exception.
    pub async fn invoke<F, Fut>(
        &self,
        plugin: impl Into<String>,
        entry_point: EntryPoint,
        run: F,
    ) -> Result<InvocationOutcome>
    where
        F: FnOnce(PluginBridge) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (bridge, pending) = self.begin_invocation(plugin, entry_point);
        let invocation_id = pending.invocation_id().to_string();
        let task = tokio::spawn(run(bridge));

        match pending.wait_timeout(self.shared.max_execution_time).await {
            Ok(outcome) => Ok(outcome),
            Err(BridgeError::ProtocolViolation(message)) => match task.await {
                Err(join_error) if join_error.is_panic() => {
                    error!(invocation_id = %invocation_id, "Plugin task panicked");
                    Err(BridgeError::PluginException(format!(
                        "plugin panicked during invocation {}",
                        invocation_id
                    )))
                }
                _ => Err(BridgeError::ProtocolViolation(message)),
            },
            Err(e) => Err(e),
        }
    }

    /// End the host session, dropping all session storage
    pub fn end_session(&self) {
        self.shared.storage.end_session();
    }
}

/// Capability handle given to one plugin invocation
#[derive(Clone)]
pub struct PluginBridge {
    context: Arc<ExecutionContext>,
    shared: Arc<HostShared>,
    logger: Arc<TracingPluginLogger>,
}

impl PluginBridge {
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn invocation_id(&self) -> &str {
        self.context.invocation_id()
    }

    pub fn log(&self, level: &str, message: &str) -> Result<()> {
        self.context.ensure_running("log")?;
        self.logger.log(level, message);
        Ok(())
    }

    pub fn end(&self) -> Result<()> {
        self.context.end()
    }

    pub fn end_with_result(&self, payload: PluginPayload) -> Result<()> {
        self.context.end_with_result(payload)
    }

    /// `endWithResult` for untyped JSON, classified by entry point
    pub fn end_with_json(&self, value: Value) -> Result<()> {
        let payload = PluginPayload::from_json(self.context.entry_point(), value);
        debug!(
            invocation_id = %self.context.invocation_id(),
            kind = payload.kind(),
            "Classified plugin result"
        );
        self.context.end_with_result(payload)
    }

    pub fn end_with_exception(&self, message: impl Into<String>) -> Result<()> {
        self.context.end_with_exception(message)
    }

    pub fn app_toast(&self, message: impl Into<String>) -> Result<()> {
        self.context.ensure_running("appToast")?;
        self.shared.notifier.toast(Toast {
            plugin: self.context.plugin().to_string(),
            invocation_id: self.context.invocation_id().to_string(),
            message: message.into(),
        });
        Ok(())
    }

    /// A transport failure is returned to the caller; the context keeps
    /// running
    pub async fn http_request(&self, envelope: HttpRequest) -> Result<String> {
        self.context.ensure_running("httpRequest")?;
        self.shared.http.request(envelope).await
    }

    pub fn get_app_version(&self) -> Result<String> {
        self.context.ensure_running("getAppVersion")?;
        Ok(self.shared.app_version.clone())
    }

    pub fn get_user_config(&self) -> Result<HashMap<String, String>> {
        self.context.ensure_running("getUserConfig")?;
        Ok(self
            .shared
            .user_config
            .get(self.context.plugin())
            .cloned()
            .unwrap_or_default())
    }

    pub fn local_storage(&self) -> StorageAccessor {
        StorageAccessor {
            context: self.context.clone(),
            store: self.shared.storage.local_for(self.context.plugin()),
            name: "localStorage",
        }
    }

    pub fn session_storage(&self) -> StorageAccessor {
        StorageAccessor {
            context: self.context.clone(),
            store: self.shared.storage.session_for(self.context.plugin()),
            name: "sessionStorage",
        }
    }

    pub async fn get_cookies(&self) -> Result<Vec<CookieRecord>> {
        self.context.ensure_running("getCookies")?;
        self.shared.cookies.cookies().await
    }
}

/// `localStorage` / `sessionStorage` as seen by one invocation
pub struct StorageAccessor {
    context: Arc<ExecutionContext>,
    store: Arc<dyn KeyValueStore>,
    name: &'static str,
}

impl StorageAccessor {
    pub fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.context
            .ensure_running(&format!("{}.getItem", self.name))?;
        self.store.get_item(key)
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.context
            .ensure_running(&format!("{}.setItem", self.name))?;
        self.store.set_item(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::context::{ContextState, Outcome};
    use crate::bridge::http::tests::MockTransport;
    use crate::bridge::http::{HttpTransport, PreparedRequest, TransportResponse};
    use crate::bridge::notify::ChannelNotifier;
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingTransport;

    #[async_trait]
    impl HttpTransport for FailingTransport {
        async fn send(&self, request: PreparedRequest) -> Result<TransportResponse> {
            Err(BridgeError::NetworkError(format!("could not resolve {}", request.url)))
        }
    }

    fn host_with(transport: Arc<dyn HttpTransport>, dir: &std::path::Path) -> RuliaHost {
        RuliaHost::builder(HttpBridge::new(transport), dir)
            .app_version("0.22.0")
            .build()
    }

    #[tokio::test]
    async fn test_invoke_manga_list() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"items":[{"name":"Yotsuba","id":"1"}]}"#;
        let transport = Arc::new(MockTransport::new(200, &[("content-type", "application/json")], body));
        let host = host_with(transport.clone(), dir.path());

        let finished = host
            .invoke("demo", EntryPoint::GetMangaList, |rulia| async move {
                let raw = rulia
                    .http_request(HttpRequest::get("https://x.test/list").with_payload("page=1"))
                    .await
                    .unwrap();
                let response: Value = serde_json::from_str(&raw).unwrap();
                let list: Vec<Value> = response["items"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|item| {
                        json!({
                            "title": item["name"],
                            "url": format!("/manga/{}", item["id"].as_str().unwrap()),
                            "coverUrl": ""
                        })
                    })
                    .collect();
                rulia.end_with_json(json!({ "list": list })).unwrap();
            })
            .await
            .unwrap();

        assert_eq!(finished.plugin, "demo");
        match finished.outcome {
            Outcome::Result(PluginPayload::MangaList(result)) => {
                assert_eq!(result.list.len(), 1);
                assert_eq!(result.list[0].title, "Yotsuba");
                assert_eq!(result.list[0].url, "/manga/1");
            }
            other => panic!("expected manga list, got {:?}", other),
        }
        assert_eq!(transport.last_request().url.as_str(), "https://x.test/list?page=1");
    }

    #[tokio::test]
    async fn test_calls_after_termination_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new(200, &[], "ok"));
        let host = host_with(transport.clone(), dir.path());

        let (rulia, pending) = host.begin_invocation("demo", EntryPoint::GetMangaData);
        rulia.end().unwrap();

        assert!(rulia.log("info", "too late").unwrap_err().is_protocol_violation());
        assert!(rulia.app_toast("too late").unwrap_err().is_protocol_violation());
        assert!(rulia.get_app_version().is_err());
        assert!(rulia.local_storage().set_item("k", "v").is_err());
        assert!(rulia.get_cookies().await.is_err());
        let err = rulia
            .http_request(HttpRequest::get("https://x.test/a"))
            .await
            .unwrap_err();
        assert!(err.is_protocol_violation());
        assert!(transport.requests.lock().unwrap().is_empty());

        assert!(rulia.end_with_exception("again").is_err());
        assert_eq!(rulia.context().state(), ContextState::Ended);
        assert_eq!(rulia.context().diagnostics().len(), 7);
        assert_eq!(pending.wait().await.unwrap().outcome, Outcome::Empty);
    }

    #[tokio::test]
    async fn test_transport_failure_does_not_terminate_context() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_with(Arc::new(FailingTransport), dir.path());

        let finished = host
            .invoke("demo", EntryPoint::GetChapterImageList, |rulia| async move {
                let err = rulia
                    .http_request(HttpRequest::get("https://unresolvable.test/"))
                    .await
                    .unwrap_err();
                assert_eq!(rulia.context().state(), ContextState::Running);
                rulia.end_with_exception(format!("fetch failed: {}", err)).unwrap();
            })
            .await
            .unwrap();

        let err = finished.outcome.into_result().unwrap_err();
        assert!(matches!(err, BridgeError::PluginException(_)));
        assert!(err.to_string().contains("could not resolve"));
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_context() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new(200, &[], "page").with_delay(Duration::from_millis(10)));
        let host = host_with(transport.clone(), dir.path());

        let finished = host
            .invoke("demo", EntryPoint::GetMangaData, |rulia| async move {
                let first = rulia.clone();
                let (a, b) = futures::join!(
                    first.http_request(HttpRequest::get("https://x.test/chapters?page=1")),
                    rulia.http_request(HttpRequest::get("https://x.test/chapters?page=2")),
                );
                assert_eq!(a.unwrap(), "page");
                assert_eq!(b.unwrap(), "page");
                rulia.end().unwrap();
            })
            .await
            .unwrap();

        assert_eq!(finished.outcome, Outcome::Empty);
        assert_eq!(transport.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_returning_without_terminal_signal() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_with(Arc::new(MockTransport::new(200, &[], "")), dir.path());

        let err = host
            .invoke("demo", EntryPoint::GetMangaList, |rulia| async move {
                rulia.log("info", "forgot to end").unwrap();
            })
            .await
            .unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_panicking_plugin_becomes_exception() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_with(Arc::new(MockTransport::new(200, &[], "")), dir.path());

        let err = host
            .invoke("demo", EntryPoint::GetMangaList, |_rulia| async move {
                panic!("selector not found");
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::PluginException(_)));
    }

    #[tokio::test]
    async fn test_execution_time_limit() {
        let dir = tempfile::tempdir().unwrap();
        let host = RuliaHost::builder(
            HttpBridge::new(Arc::new(MockTransport::new(200, &[], ""))),
            dir.path(),
        )
        .max_execution_time(Some(Duration::from_millis(30)))
        .build();

        let err = host
            .invoke("demo", EntryPoint::GetMangaList, |rulia| async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                let _ = rulia.end();
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_auxiliary_accessors() {
        let dir = tempfile::tempdir().unwrap();
        let jar = Arc::new(CookieJar::new());
        jar.insert(CookieRecord::new("sid", "abc", "x.test"));
        let (notifier, mut toasts) = ChannelNotifier::new();

        let host = RuliaHost::builder(
            HttpBridge::new(Arc::new(MockTransport::new(200, &[], ""))),
            dir.path(),
        )
        .app_version("0.18.0")
        .cookies(jar)
        .notifier(Arc::new(notifier))
        .user_config("demo", HashMap::from([("region".to_string(), "japan".to_string())]))
        .build();

        let (rulia, pending) = host.begin_invocation("demo", EntryPoint::Other("login".into()));
        assert_eq!(rulia.get_app_version().unwrap(), "0.18.0");
        assert_eq!(rulia.get_user_config().unwrap()["region"], "japan");
        assert_eq!(rulia.get_cookies().await.unwrap()[0].value, "abc");
        rulia.app_toast("Logged in").unwrap();
        rulia.end().unwrap();

        let toast = toasts.recv().await.unwrap();
        assert_eq!(toast.message, "Logged in");
        assert_eq!(toast.invocation_id, pending.invocation_id());

        let (other, _pending) = host.begin_invocation("other", EntryPoint::GetMangaList);
        assert!(other.get_user_config().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_from_config_wires_cookie_file_and_user_config() {
        let dir = tempfile::tempdir().unwrap();
        let cookie_file = dir.path().join("cookies.json");
        std::fs::write(
            &cookie_file,
            r#"[{"Name":"sid","Path":"/","Domain":"x.test","Value":"abc","Expires":"","HttpOnly":false,"Secure":false}]"#,
        )
        .unwrap();

        let mut config = Config::defaults().unwrap();
        config.storage.local_storage_dir = dir.path().join("storage");
        config.storage.cookie_file = Some(cookie_file);
        config.plugins.user_config.insert(
            "copyManga".to_string(),
            HashMap::from([("userToken".to_string(), "t0k".to_string())]),
        );

        let host = RuliaHost::from_config(&config).unwrap();
        let (rulia, _pending) = host.begin_invocation("copyManga", EntryPoint::GetMangaList);
        assert_eq!(rulia.get_cookies().await.unwrap()[0].name, "sid");
        assert_eq!(rulia.get_user_config().unwrap()["userToken"], "t0k");
    }

    #[test]
    fn test_from_config_reports_missing_cookie_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::defaults().unwrap();
        config.storage.local_storage_dir = dir.path().to_path_buf();
        config.storage.cookie_file = Some(dir.path().join("absent.json"));

        assert!(RuliaHost::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_local_storage_survives_restart_session_does_not() {
        let dir = tempfile::tempdir().unwrap();
        let transport: Arc<dyn HttpTransport> = Arc::new(MockTransport::new(200, &[], ""));

        let host = host_with(transport.clone(), dir.path());
        let (rulia, _pending) = host.begin_invocation("demo", EntryPoint::GetMangaList);
        rulia.local_storage().set_item("k", "v").unwrap();
        rulia.session_storage().set_item("k", "v").unwrap();
        rulia.end().unwrap();

        // Same session, later invocation
        let (later, _pending) = host.begin_invocation("demo", EntryPoint::GetMangaData);
        assert_eq!(later.local_storage().get_item("k").unwrap().as_deref(), Some("v"));
        assert_eq!(later.session_storage().get_item("k").unwrap().as_deref(), Some("v"));

        host.end_session();
        assert_eq!(later.session_storage().get_item("k").unwrap(), None);

        // Simulated host restart on the same storage directory
        let restarted = host_with(transport, dir.path());
        let (fresh, _pending) = restarted.begin_invocation("demo", EntryPoint::GetMangaList);
        assert_eq!(fresh.local_storage().get_item("k").unwrap().as_deref(), Some("v"));
        assert_eq!(fresh.session_storage().get_item("k").unwrap(), None);
    }

    #[tokio::test]
    async fn test_invocations_do_not_share_state() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_with(Arc::new(MockTransport::new(200, &[], "")), dir.path());

        let (first, first_pending) = host.begin_invocation("demo", EntryPoint::GetMangaList);
        let (second, second_pending) = host.begin_invocation("demo", EntryPoint::GetMangaList);

        first.end_with_exception("first failed").unwrap();
        assert_eq!(second.context().state(), ContextState::Running);
        second.end_with_result(PluginPayload::Opaque(json!([]))).unwrap();

        assert!(first_pending.wait().await.unwrap().outcome.exception().is_some());
        assert!(second_pending.wait().await.unwrap().outcome.payload().is_some());
    }
}
