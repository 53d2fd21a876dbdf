use std::sync::Arc;
use tracing::{info, warn};

use dom_sentinel::browser::BrowserPool;
use dom_sentinel::core::config::load_sentinel_config;
use dom_sentinel::notify::{ClipboardHost, CommandClipboard, NoClipboard, NotificationHost};
use dom_sentinel::{http, AppState};

fn parse_port_from_args() -> Option<u16> {
    let mut args = std::env::args().peekable();
    while let Some(a) = args.next() {
        if a == "--port" {
            if let Some(v) = args.next() {
                if let Ok(p) = v.parse::<u16>() {
                    return Some(p);
                }
            }
        } else if let Some(rest) = a.strip_prefix("--port=") {
            if let Ok(p) = rest.parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

#[cfg(all(feature = "desktop", target_os = "linux"))]
fn notification_host() -> Arc<dyn NotificationHost> {
    info!("notifications: desktop daemon");
    Arc::new(dom_sentinel::notify::DesktopHost::new("dom-sentinel"))
}

#[cfg(not(all(feature = "desktop", target_os = "linux")))]
fn notification_host() -> Arc<dyn NotificationHost> {
    info!("notifications: in-memory host (build with --features desktop for the OS daemon)");
    Arc::new(dom_sentinel::notify::MemoryHost::new())
}

fn clipboard_host() -> Arc<dyn ClipboardHost> {
    match CommandClipboard::discover() {
        Some(clipboard) => Arc::new(clipboard),
        None => {
            warn!("no clipboard helper found; copy buttons will report failures");
            Arc::new(NoClipboard)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("Starting dom-sentinel {}", env!("CARGO_PKG_VERSION"));

    let config = load_sentinel_config();
    let port = parse_port_from_args().unwrap_or_else(|| config.server.resolve_port());

    let mut state = AppState::new(config, notification_host(), clipboard_host());
    match BrowserPool::new_auto() {
        Some(pool) => {
            info!("browser found; button and testing searches enabled");
            state = state.with_browser_pool(pool);
        }
        None => {
            warn!("No browser found (set CHROME_EXECUTABLE). Searches disabled.");
        }
    }
    let state = Arc::new(state);
    let _host_events = state.spawn_host_events();

    let app = http::router(state.clone());

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Address already in use: {}. Stop the existing process or run with --port {} (or set PORT/DOM_SENTINEL_PORT).",
                bind_addr,
                port.saturating_add(1)
            )
        }
        Err(e) => return Err(e.into()),
    };
    info!("dom-sentinel listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).ok();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(ref mut s) = sigterm {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    let ended = state.end_all().await;
    info!("shutdown: {} session(s) ended", ended);
    if let Some(pool) = state.browser_pool.as_ref() {
        pool.shutdown().await;
    }
}
