//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 起動時検証（Fail-fast）
//! - `expect_roles()` で動かす役割を宣言する
//! - `build()` で、役割に必要な adapter が全部そろっているかをチェック
//! - そろっていれば cache と queue に ping し、届かなければ起動しない

use std::sync::Arc;

use tracing::info;

use super::bridge::DispatchBridge;
use super::cache_writer::CacheWriter;
use super::committer::ResponseCommitter;
use super::consumer::{ConsumerOptions, consume_loop};
use super::worker_group::WorkerGroup;
use super::worker_pool::{ForecastWorker, commit_channel};
use crate::config::{Config, ConfigError};
use crate::domain::{CacheKeys, ErrorKind};
use crate::ports::{CacheError, CorrelationCache, DeliveryQueue, ForecastProvider, QueueError};

/// What a process runs.
///
/// - `Frontend`: dispatch bridge + cache writer (consumes the response queue)
/// - `Backend`: worker pool + committer (consumes the request queue)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Frontend,
    Backend,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Frontend, Role::Backend];

    fn required_components(self) -> &'static [&'static str] {
        match self {
            Role::Frontend => &["cache", "request_queue", "response_queue"],
            Role::Backend => &["request_queue", "response_queue", "provider"],
        }
    }
}

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(config)
///     .cache(cache)
///     .request_queue(requests)
///     .response_queue(responses)
///     .expect_roles(&[Role::Frontend])
///     .build()
///     .await?;
/// let workers = app.start();
/// ```
pub struct AppBuilder {
    config: Config,
    cache: Option<Arc<dyn CorrelationCache>>,
    requests: Option<Arc<dyn DeliveryQueue>>,
    responses: Option<Arc<dyn DeliveryQueue>>,
    provider: Option<Arc<dyn ForecastProvider>>,
    expected_roles: Option<Vec<Role>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing components: {0:?}. These are required by the expected roles but were not provided.")]
    MissingComponents(Vec<&'static str>),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cache is unreachable: {0}")]
    CacheUnreachable(#[from] CacheError),

    #[error("{queue} is unreachable: {source}")]
    QueueUnreachable {
        queue: &'static str,
        #[source]
        source: QueueError,
    },
}

impl BuildError {
    /// Startup failures are never retried.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Fatal
    }
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cache: None,
            requests: None,
            responses: None,
            provider: None,
            expected_roles: None,
        }
    }

    pub fn cache(mut self, cache: Arc<dyn CorrelationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn request_queue(mut self, queue: Arc<dyn DeliveryQueue>) -> Self {
        self.requests = Some(queue);
        self
    }

    pub fn response_queue(mut self, queue: Arc<dyn DeliveryQueue>) -> Self {
        self.responses = Some(queue);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn ForecastProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// 期待される役割を設定。未設定なら、adapter がそろっている役割だけを有効にする
    pub fn expect_roles(mut self, roles: &[Role]) -> Self {
        let mut expected = Vec::new();
        for &role in roles {
            if !expected.contains(&role) {
                expected.push(role);
            }
        }
        self.expected_roles = Some(expected);
        self
    }

    fn provided(&self) -> Vec<&'static str> {
        let mut provided = Vec::new();
        if self.cache.is_some() {
            provided.push("cache");
        }
        if self.requests.is_some() {
            provided.push("request_queue");
        }
        if self.responses.is_some() {
            provided.push("response_queue");
        }
        if self.provider.is_some() {
            provided.push("provider");
        }
        provided
    }

    /// AppBuilder を検証して App を生成
    ///
    /// # 検証
    /// - 設定値（`Config::validate`）
    /// - expect_roles() の役割に必要な adapter が全部そろっているか
    /// - cache と queue に届くか（ping）
    pub async fn build(self) -> Result<App, BuildError> {
        self.config.validate()?;

        let provided = self.provided();
        let roles = match &self.expected_roles {
            Some(expected) => {
                let mut missing: Vec<&'static str> = Vec::new();
                for role in expected {
                    for component in role.required_components() {
                        if !provided.contains(component) && !missing.contains(component) {
                            missing.push(*component);
                        }
                    }
                }
                if !missing.is_empty() {
                    return Err(BuildError::MissingComponents(missing));
                }
                expected.clone()
            }
            None => Role::ALL
                .into_iter()
                .filter(|role| {
                    role.required_components()
                        .iter()
                        .all(|component| provided.contains(component))
                })
                .collect(),
        };

        if let Some(cache) = &self.cache {
            cache.ping().await?;
        }
        if let Some(queue) = &self.requests {
            queue.ping().await.map_err(|source| BuildError::QueueUnreachable {
                queue: "request queue",
                source,
            })?;
        }
        if let Some(queue) = &self.responses {
            queue.ping().await.map_err(|source| BuildError::QueueUnreachable {
                queue: "response queue",
                source,
            })?;
        }

        let frontend = match (&self.cache, &self.requests, &self.responses) {
            (Some(cache), Some(requests), Some(responses)) if roles.contains(&Role::Frontend) => {
                Some(Frontend {
                    bridge: Arc::new(
                        DispatchBridge::new(
                            &self.config.bridge,
                            CacheKeys::new(self.config.cache.scope.clone()),
                            cache.clone(),
                            requests.clone(),
                        )
                        .with_server_name(self.config.server_name.clone()),
                    ),
                    writer: Arc::new(CacheWriter::new(
                        &self.config.cache,
                        cache.clone(),
                        responses.clone(),
                    )),
                    responses: responses.clone(),
                })
            }
            _ => None,
        };

        let backend = match (&self.requests, &self.responses, &self.provider) {
            (Some(requests), Some(responses), Some(provider)) if roles.contains(&Role::Backend) => {
                Some(Backend {
                    requests: requests.clone(),
                    responses: responses.clone(),
                    provider: provider.clone(),
                })
            }
            _ => None,
        };

        info!(?roles, "app built");
        Ok(App {
            config: self.config,
            roles,
            frontend,
            backend,
        })
    }
}

struct Frontend {
    bridge: Arc<DispatchBridge>,
    writer: Arc<CacheWriter>,
    responses: Arc<dyn DeliveryQueue>,
}

struct Backend {
    requests: Arc<dyn DeliveryQueue>,
    responses: Arc<dyn DeliveryQueue>,
    provider: Arc<dyn ForecastProvider>,
}

/// A wired, health-checked application.
pub struct App {
    config: Config,
    roles: Vec<Role>,
    frontend: Option<Frontend>,
    backend: Option<Backend>,
}

impl App {
    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The synchronous entry point; present when the frontend role is enabled.
    pub fn bridge(&self) -> Option<Arc<DispatchBridge>> {
        self.frontend.as_ref().map(|f| f.bridge.clone())
    }

    /// Spawn the background loops of every enabled role.
    pub fn start(&self) -> WorkerGroup {
        let mut group = WorkerGroup::new();

        if let Some(frontend) = &self.frontend {
            group.spawn(
                "cache-writer",
                consume_loop(
                    frontend.responses.clone(),
                    frontend.writer.clone(),
                    ConsumerOptions::from_pool("cache-writer", &self.config.pool),
                    group.subscribe(),
                ),
            );
        }

        if let Some(backend) = &self.backend {
            let (commits, pending) = commit_channel(self.config.pool.result_channel_capacity);
            let worker = ForecastWorker::new(&self.config.pool, backend.provider.clone(), commits)
                .with_server_name(self.config.server_name.clone());
            // worker が唯一の sender。consume loop が drain して worker を drop すると committer も終わる
            group.spawn(
                "worker-pool",
                consume_loop(
                    backend.requests.clone(),
                    Arc::new(worker),
                    ConsumerOptions::from_pool("worker-pool", &self.config.pool),
                    group.subscribe(),
                ),
            );
            let committer = ResponseCommitter::new(backend.requests.clone(), backend.responses.clone());
            group.spawn("committer", async move {
                committer.run(pending).await;
            });
        }

        info!(roles = ?self.roles, tasks = group.len(), "background loops started");
        group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryCache, InMemoryDeliveryQueue, StaticForecastProvider};
    use std::time::Duration;

    fn queue() -> Arc<InMemoryDeliveryQueue> {
        Arc::new(InMemoryDeliveryQueue::new(Duration::from_secs(20)))
    }

    #[tokio::test]
    async fn test_build_success() {
        let app = AppBuilder::new(Config::default())
            .cache(Arc::new(InMemoryCache::new()))
            .request_queue(queue())
            .response_queue(queue())
            .provider(Arc::new(StaticForecastProvider::new()))
            .expect_roles(&Role::ALL)
            .build()
            .await
            .unwrap();

        assert_eq!(app.roles(), &[Role::Frontend, Role::Backend]);
        assert!(app.bridge().is_some());
    }

    #[tokio::test]
    async fn test_build_missing_components() {
        let app = AppBuilder::new(Config::default())
            .cache(Arc::new(InMemoryCache::new()))
            .request_queue(queue())
            .response_queue(queue())
            .expect_roles(&[Role::Frontend, Role::Backend])
            .build()
            .await;

        assert!(matches!(
            app,
            Err(BuildError::MissingComponents(missing)) if missing == vec!["provider"]
        ));
    }

    #[tokio::test]
    async fn test_build_no_expect_roles() {
        // provider が無いので frontend だけ
        let app = AppBuilder::new(Config::default())
            .cache(Arc::new(InMemoryCache::new()))
            .request_queue(queue())
            .response_queue(queue())
            .build()
            .await
            .unwrap();

        assert_eq!(app.roles(), &[Role::Frontend]);
    }

    #[tokio::test]
    async fn test_build_unreachable_queue() {
        let requests = queue();
        requests.set_available(false);

        let app = AppBuilder::new(Config::default())
            .cache(Arc::new(InMemoryCache::new()))
            .request_queue(requests)
            .response_queue(queue())
            .expect_roles(&[Role::Frontend])
            .build()
            .await;

        assert!(matches!(
            app,
            Err(BuildError::QueueUnreachable { queue: "request queue", .. })
        ));
    }

    #[tokio::test]
    async fn test_build_unreachable_cache() {
        let cache = Arc::new(InMemoryCache::new());
        cache.set_reads_available(false);

        let app = AppBuilder::new(Config::default())
            .cache(cache)
            .request_queue(queue())
            .response_queue(queue())
            .build()
            .await;

        let err = app.err().unwrap();
        assert!(matches!(err, BuildError::CacheUnreachable(_)));
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[tokio::test(start_paused = true)]
    async fn started_loops_stop_on_shutdown() {
        let app = AppBuilder::new(Config::default())
            .cache(Arc::new(InMemoryCache::new()))
            .request_queue(queue())
            .response_queue(queue())
            .provider(Arc::new(StaticForecastProvider::new()))
            .build()
            .await
            .unwrap();

        let group = app.start();
        assert_eq!(group.len(), 3);
        assert!(group.shutdown_and_join(Duration::from_secs(5)).await);
    }
}
