//! `sluice dev` command implementation.
//!
//! Serves the client root unbundled, transformed per request, and forwards
//! the configured URL prefixes to the backend. Runs until ctrl-c; the exit
//! code only reflects startup failures.

use super::{report, Context};
use miette::Result;
use sluice_core::{BuildMode, DevServer};
use tracing::warn;

/// Dev server flags; each one overrides the config file.
#[derive(Debug, Clone, Default)]
pub struct DevAction {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub open: bool,
    pub no_strict_port: bool,
}

/// Run the dev server.
pub async fn run(ctx: &Context, action: DevAction) -> Result<()> {
    let mut config = ctx.resolve(BuildMode::Development)?;

    if let Some(port) = action.port {
        config.server.port = port;
    }
    if let Some(host) = action.host {
        config.server.host = host;
    }
    if action.open {
        config.server.open = true;
    }
    if action.no_strict_port {
        config.server.strict_port = false;
    }

    let server = DevServer::bind(&config).await.map_err(report)?;
    let url = server.url();

    if ctx.json {
        let ready = serde_json::json!({
            "ok": true,
            "url": &url,
            "port": server.local_addr().port(),
            "mode": config.mode.as_str(),
        });
        println!("{ready}");
    } else {
        println!();
        println!("  Dev server running at {url}");
        for rule in &config.server.proxy {
            println!("  Proxy {} -> {}", rule.prefix, rule.target);
        }
        println!();
        println!("  Press Ctrl+C to stop");
        println!();
    }

    if config.server.open {
        if let Err(e) = open_browser(&url) {
            warn!(error = %e, url = %url, "failed to open browser");
        }
    }

    server.run(shutdown_signal()).await.map_err(report)
}

/// Resolves on ctrl-c, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Open a URL in the default browser.
fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).spawn()?;
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(url).spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", url])
            .spawn()?;
    }
    Ok(())
}
