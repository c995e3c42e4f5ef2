//! Application wiring: stores, collaborators, pipeline, heartbeat, and the
//! HTTP listener.

use crate::messenger::HttpMessenger;
use crate::model::HttpModelClient;
use crate::notifier::LogNotifier;
use crate::routes::{self, AppState};
use anyhow::Context;
use axum::Router;
use kairos_rs_config::KairosConfig;
use kairos_rs_core::{
    ContextBuilder, ContextSettings, DailyLog, Debouncer, DirectiveExecutor, Heartbeat,
    HeartbeatSettings, InboundFilter, MessagePipeline, RetryPolicy, RetryingMessenger,
    RetryingModel, Services, SkillLibrary, StatusWriter, SysinfoStatus, SystemStatusProvider,
};
use kairos_rs_protocol::{Messenger, ModelClient, Notifier};
use kairos_rs_store::{Database, HistoryLimits};
use log::info;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

/// External endpoints the assistant talks to.
pub struct Collaborators {
    pub model: Arc<dyn ModelClient>,
    pub messenger: Arc<dyn Messenger>,
    pub notifier: Arc<dyn Notifier>,
    pub system_status: Arc<dyn SystemStatusProvider>,
}

impl Collaborators {
    /// HTTP clients built from config, with live system status.
    pub fn from_config(config: &KairosConfig) -> anyhow::Result<Self> {
        let model =
            HttpModelClient::new(&config.model).context("failed to build model client")?;
        let messenger =
            HttpMessenger::new(&config.messenger).context("failed to build messenger client")?;
        Ok(Self {
            model: Arc::new(model),
            messenger: Arc::new(messenger),
            notifier: Arc::new(LogNotifier),
            system_status: Arc::new(SysinfoStatus::new()),
        })
    }
}

/// A fully wired assistant, ready to serve.
pub struct App {
    pub config: KairosConfig,
    pub services: Services,
    pub status: StatusWriter,
    pub debouncer: Debouncer,
    pub heartbeat: Arc<Heartbeat>,
    pub state: AppState,
}

impl App {
    /// Wire the assistant with HTTP collaborators.
    pub fn build(config: KairosConfig) -> anyhow::Result<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Self::with_collaborators(config, collaborators)
    }

    /// Wire the assistant around the given collaborators.
    ///
    /// Model and messenger calls are wrapped with the configured retry
    /// policy.
    pub fn with_collaborators(
        config: KairosConfig,
        collaborators: Collaborators,
    ) -> anyhow::Result<Self> {
        let database_path = config.database_path();
        let db = Database::open(&database_path).with_context(|| {
            format!("failed to open database at {}", database_path.display())
        })?;
        let limits = HistoryLimits {
            max_messages: config.history.max_messages,
            compaction_threshold: config.history.compaction_threshold,
            compaction_cooldown: chrono::Duration::from_std(config.history.compaction_cooldown())
                .context("history.compaction_cooldown_secs is out of range")?,
        };
        let history = db.history(limits);
        let skills = SkillLibrary::new(config.skills.path.clone());
        let daily_log = DailyLog::new(config.daily_log_dir());
        let status = StatusWriter::new(
            config.status_path(),
            config.status.enabled,
            db.memory(),
            db.jobs(),
            history.clone(),
            skills.clone(),
        );
        let executor = DirectiveExecutor::new(
            db.memory(),
            db.jobs(),
            skills.clone(),
            daily_log.clone(),
            collaborators.notifier,
        )
        .with_notifications(config.notifications.enabled)
        .with_status(status.clone());
        let context = ContextBuilder::new(
            db.memory(),
            db.jobs(),
            history.clone(),
            skills,
            daily_log,
            collaborators.system_status,
            ContextSettings {
                persona_path: config.persona.path.clone(),
                persona_fallback: config.persona.fallback.clone(),
                checklist_path: config.heartbeat.checklist_path.clone(),
                memory_limit: config.heartbeat.memory_limit,
                recent_log_days: config.daily_log.recent_days,
                home_history_limit: config.heartbeat.home_history_limit,
            },
        );

        let policy = RetryPolicy::from(&config.retry);
        let services = Services {
            memory: db.memory(),
            history,
            jobs: db.jobs(),
            model: Arc::new(RetryingModel::new(collaborators.model, policy)),
            messenger: Arc::new(RetryingMessenger::new(collaborators.messenger, policy)),
            executor,
            context,
            home_conversation_id: config.messenger.home_conversation_id.clone(),
            max_message_chars: config.messenger.max_message_chars,
            prompt_window: config.history.prompt_window,
        };

        let debouncer = Debouncer::new(
            config.debounce.window(),
            Arc::new(MessagePipeline::new(services.clone())),
        );
        let settings = HeartbeatSettings::from_config(&config)?;
        let heartbeat = Arc::new(Heartbeat::new(services.clone(), settings));
        let state = AppState {
            debouncer: debouncer.clone(),
            filter: InboundFilter::new(
                config.messenger.home_conversation_id.clone(),
                config.messenger.bot_name.clone(),
                config.messenger.require_mention_outside_home,
            ),
            home_conversation_id: config.messenger.home_conversation_id.clone(),
            secret: config.webhook.secret.clone(),
        };
        info!(
            "assistant wired (database={}, home={})",
            database_path.display(),
            config.messenger.home_conversation_id
        );
        Ok(Self {
            config,
            services,
            status,
            debouncer,
            heartbeat,
            state,
        })
    }

    pub fn router(&self) -> Router {
        routes::router(self.state.clone()).layer(TraceLayer::new_for_http())
    }

    /// Serve webhooks and drive the heartbeat until ctrl-c.
    pub async fn serve(self) -> anyhow::Result<()> {
        let addr: SocketAddr = self
            .config
            .webhook
            .bind
            .parse()
            .with_context(|| format!("invalid webhook.bind {}", self.config.webhook.bind))?;
        self.status.refresh();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let heartbeat = tokio::spawn(self.heartbeat.clone().run(shutdown_rx));

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!("webhook server listening (addr={addr})");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown requested");
            })
            .await
            .context("webhook server failed")?;

        let _ = shutdown_tx.send(true);
        heartbeat.await.context("heartbeat task panicked")?;
        Ok(())
    }
}
