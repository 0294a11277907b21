mod http;
mod mpv;
mod socket;

use std::sync::Arc;

use matrix_core::coordinator::MatrixCoordinator;
use matrix_core::event::{BroadcastMessage, CoreEvent};
use matrix_core::media::MediaBackend;
use matrix_core::scripted::{Script, ScriptedBackend};
use matrix_proto::config::{BackendKind, Config};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        // Only WARN and ERROR reach clients
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Broadcast channel first so logging can use it
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(256);

    let data_dir = matrix_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,matrix_core=debug,rtspmatrix=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    let backend: Arc<dyn MediaBackend> = match config.mpv.backend {
        BackendKind::Mpv => Arc::new(mpv::MpvBackend::new(config.mpv.clone())?),
        BackendKind::Scripted => {
            info!("Using scripted media backend, no player will be started");
            Arc::new(ScriptedBackend::new(Script::Play))
        }
    };

    // Event channel: all external inputs funnel into the coordinator
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<CoreEvent>(256);

    let coordinator = MatrixCoordinator::new(config.clone(), backend, broadcast_tx.clone())?;
    let state_manager = coordinator.state_manager();
    let cancel = CancellationToken::new();

    let socket_handle = socket::start_server(
        config.control.bind_address.clone(),
        config.control.port,
        state_manager.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
        cancel.clone(),
    );

    let http_handle = config.http.enabled.then(|| {
        http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state_manager.clone(),
            event_tx.clone(),
            cancel.clone(),
        )
    });

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received");
                let _ = shutdown_tx.send(CoreEvent::Shutdown).await;
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });
    drop(event_tx);

    info!("{} initialised, running event loop", config.app.title);
    let result = coordinator.run(event_rx).await;

    cancel.cancel();
    let _ = socket_handle.await;
    if let Some(handle) = http_handle {
        let _ = handle.await;
    }
    info!("Shut down");
    result
}
