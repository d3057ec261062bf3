use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use overlay::{
    AsyncOverlayProps, ErrorMode, OpenOptions, Overlay, OverlayConfig, OverlayHost, OverlayProps,
    Phase, RenderedOverlay, TokioFrameScheduler,
};
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Walk an overlay host through a toast, a confirm dialog and bulk dismissal.
#[derive(Debug, Parser)]
#[command(name = "overlay-demo", version)]
struct Args {
    /// Overlay scope (overrides OVERLAY_SCOPE)
    #[arg(long)]
    scope: Option<String>,

    /// Error mode: strict or logging (overrides OVERLAY_ENV)
    #[arg(long)]
    mode: Option<ErrorMode>,

    /// Frame interval in milliseconds (overrides OVERLAY_FRAME_MS)
    #[arg(long)]
    frame_ms: Option<u64>,

    /// Delay before the confirm dialog answers itself
    #[arg(long, default_value_t = 300)]
    confirm_after_ms: u64,

    /// Reject the confirm dialog instead of answering it
    #[arg(long)]
    reject: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,overlay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Load configuration
    let mut config = OverlayConfig::from_env().context("Failed to load configuration")?;
    if let Some(scope) = args.scope.clone() {
        config.scope = scope;
    }
    if let Some(mode) = args.mode {
        config.error_mode = mode;
    }
    if let Some(ms) = args.frame_ms {
        config.frame_interval = Duration::from_millis(ms);
    }
    tracing::info!(
        scope = %config.scope,
        mode = %config.error_mode,
        frame_ms = config.frame_interval.as_millis() as u64,
        "Configuration loaded"
    );

    let frames = TokioFrameScheduler::current()
        .context("Failed to create frame scheduler")?
        .with_interval(config.frame_interval);
    let host = Arc::new(
        OverlayHost::<String>::builder(config.scope.clone())
            .frames(frames)
            .error_policy(config.error_mode.policy())
            .mount()
            .context("Failed to mount overlay host")?,
    );
    let overlay = Overlay::<String>::new(config.scope.clone());

    // Repaint whenever the registry changes
    let painter = {
        let host = host.clone();
        tokio::spawn(async move {
            let mut changes = host.changes();
            loop {
                paint(&host.render());
                if changes.changed().await.is_err() {
                    break;
                }
            }
        })
    };

    print_banner(&config);

    // Toast
    let toast_id = overlay
        .open(
            |props: OverlayProps| {
                let state = if props.is_open() { "visible" } else { "entering" };
                format!("Toast: changes saved ({state})")
            },
            OpenOptions::with_id("toast"),
        )
        .context("Failed to open toast")?;
    settle(&config).await;

    // Confirm dialog answered from a background task
    let (handoff_tx, handoff_rx) = oneshot::channel::<AsyncOverlayProps<bool>>();
    let handoff = Mutex::new(Some(handoff_tx));
    let pending = overlay
        .open_async(
            move |props: AsyncOverlayProps<bool>| {
                if props.is_open() {
                    let sender = handoff
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take();
                    if let Some(sender) = sender {
                        let _ = sender.send(props.clone());
                    }
                }
                format!("Confirm: discard draft? (open={})", props.is_open())
            },
            OpenOptions::default(),
        )
        .context("Failed to open confirm dialog")?;
    println!(
        "{} {}",
        "Awaiting confirm".bright_blue(),
        pending.overlay_id().dimmed()
    );

    let confirm_after = Duration::from_millis(args.confirm_after_ms);
    let reject = args.reject;
    tokio::spawn(async move {
        let Ok(props) = handoff_rx.await else {
            return;
        };
        tokio::time::sleep(confirm_after).await;
        if reject {
            props.reject(anyhow::anyhow!("user pressed escape"));
        } else {
            props.close(true);
        }
    });

    match pending.await {
        Ok(confirmed) => println!("{} {}", "Confirm resolved:".bright_green().bold(), confirmed),
        Err(e) => println!("{} {}", "Confirm failed:".bright_red().bold(), e),
    }
    settle(&config).await;

    // Opening a live id again is a violation
    match overlay.open(
        |_: OverlayProps| String::from("Toast: duplicate"),
        OpenOptions::with_id(toast_id.clone()),
    ) {
        Ok(_) => println!(
            "{}",
            "Duplicate open ignored (logging mode)".yellow()
        ),
        Err(e) => println!("{} {}", "Duplicate open refused:".bright_red(), e),
    }

    overlay.close_all();
    settle(&config).await;
    println!(
        "{}\n{}",
        "Snapshot after close all:".bright_cyan(),
        serde_json::to_string_pretty(&host.snapshot())?
    );

    overlay.unmount_all();
    settle(&config).await;
    println!(
        "{} {}",
        "Overlays left after unmount all:".bright_cyan(),
        host.len()
    );

    painter.abort();
    Ok(())
}

/// Let a couple of frames elapse so deferred opens land.
async fn settle(config: &OverlayConfig) {
    tokio::time::sleep(config.frame_interval * 3).await;
}

fn paint(rendered: &[RenderedOverlay<String>]) {
    if rendered.is_empty() {
        println!("{}", "  (no overlays)".dimmed());
        return;
    }
    for overlay in rendered {
        let phase = match overlay.phase {
            Phase::Mounted => "mounted".yellow(),
            Phase::Open => "open".bright_green(),
            Phase::Closed => "closed".bright_red(),
            Phase::Removed => "removed".dimmed(),
        };
        println!(
            "  [{:>7}] {} {}",
            phase,
            overlay.view,
            overlay.overlay_id.dimmed()
        );
    }
}

fn print_banner(config: &OverlayConfig) {
    println!(
        "{}",
        "╔════════════════════════════════════════╗".bright_cyan()
    );
    println!(
        "{}",
        "║          Overlay Host Demo             ║".bright_cyan()
    );
    println!(
        "{}",
        "╚════════════════════════════════════════╝".bright_cyan()
    );
    println!(
        "scope {} · mode {} · frame {:?}",
        config.scope.bold(),
        config.error_mode.to_string().bold(),
        config.frame_interval
    );
    println!();
}
