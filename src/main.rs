mod app;
mod cli;
mod config;
mod expansion;
mod filter;
mod graph;
mod input;
mod k8s;
mod model;
mod notify;
mod search;
mod selection;
mod tree;
mod ui;
mod viewport;

use anyhow::{Context, Result};
use app::{App, AppCommand, AppSettings};
use clap::Parser;
use cli::CliArgs;
use config::{AppConfig, ViewState, ViewStateStore};
use crossterm::event::{
    Event, EventStream, KeyEventKind, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
    PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
    supports_keyboard_enhancement,
};
use expansion::{ExpansionController, FetchResult, PendingExpansion};
use filter::Facet;
use futures::{StreamExt, TryStreamExt};
use k8s::KubeGateway;
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::watcher::{Config as WatchConfig, watcher};
use kube::{Api, Client};
use notify::{Notification, NotificationSink, Toasts};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::io::{self, Stdout};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;
const SKELETON_REFRESH_TIMEOUT: Duration = Duration::from_secs(6);
const WATCH_MIN_INTERVAL: Duration = Duration::from_millis(750);
const TOAST_TTL: Duration = Duration::from_secs(5);

/// Long-lived pieces the event loop drives besides the app itself.
struct Runtime {
    gateway: KubeGateway,
    store: Option<ViewStateStore>,
    toasts: Arc<Toasts>,
    expansion_tx: mpsc::UnboundedSender<(PendingExpansion, FetchResult)>,
    watch_tx: mpsc::UnboundedSender<()>,
    watch_task: JoinHandle<()>,
    watch_throttle: WatchThrottle,
}

/// Rate limit for watch-driven refreshes. Events inside the window are
/// remembered and replayed once it closes.
#[derive(Debug, Default)]
struct WatchThrottle {
    last: Option<Instant>,
    pending: bool,
}

impl WatchThrottle {
    fn on_event(&mut self, now: Instant) -> bool {
        match self.last {
            Some(previous) if now.duration_since(previous) < WATCH_MIN_INTERVAL => {
                self.pending = true;
                false
            }
            _ => {
                self.last = Some(now);
                self.pending = false;
                true
            }
        }
    }

    fn take_due(&mut self, now: Instant) -> bool {
        if !self.pending {
            return false;
        }
        self.on_event(now)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args.log_filter, args.log_file.as_deref())?;

    let config = AppConfig::discover()?;
    if let Some(source) = &config.source {
        info!(source = %source, "using config file");
    }
    let max_selection = args.max_selection.unwrap_or(config.max_selection).max(1);

    let gateway =
        KubeGateway::connect(args.context.clone(), config.cluster_wide_kinds.clone()).await?;
    let skeleton = gateway.fetch_skeleton().await?;
    let cluster = gateway.cluster_ref();

    let store = if args.no_persist {
        None
    } else {
        config.state_dir.clone().map(ViewStateStore::new)
    };
    let mut view_state = load_view_state(store.as_ref(), &cluster.id, config.default_zoom);
    if !args.namespace.is_empty() {
        view_state.filters = view_state
            .filters
            .with_facet(Facet::Namespaces, args.namespace.iter().cloned());
    }

    let toasts = Arc::new(Toasts::new(TOAST_TTL));
    let sink: Arc<dyn NotificationSink> = toasts.clone();
    let controller = ExpansionController::new(cluster, &skeleton, Arc::new(gateway.clone()), sink);
    let settings = AppSettings {
        max_selection,
        hide_containers: config.hide_containers,
        zoom: view_state.zoom,
    };
    let mut app = App::new(
        controller,
        gateway.context().to_string(),
        settings,
        view_state.filters,
        toasts.clone(),
    );

    run(&mut app, gateway, store, toasts, args.tick_ms.max(50)).await
}

fn init_tracing(level_filter: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let _ = builder.with_ansi(false).with_writer(Mutex::new(file)).try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::sink).try_init();
        }
    }

    Ok(())
}

fn load_view_state(
    store: Option<&ViewStateStore>,
    cluster_id: &str,
    default_zoom: viewport::ZoomLevel,
) -> ViewState {
    let fallback = ViewState {
        zoom: default_zoom,
        ..ViewState::default()
    };
    let Some(store) = store else {
        return fallback;
    };
    match store.load(cluster_id) {
        Ok(Some(state)) => state,
        Ok(None) => fallback,
        Err(error) => {
            warn!(cluster = %cluster_id, "ignoring unreadable view state: {error:#}");
            fallback
        }
    }
}

async fn run(
    app: &mut App,
    gateway: KubeGateway,
    store: Option<ViewStateStore>,
    toasts: Arc<Toasts>,
    tick_ms: u64,
) -> Result<()> {
    let (expansion_tx, mut expansion_rx) = mpsc::unbounded_channel();
    let (watch_tx, mut watch_rx) = mpsc::unbounded_channel();
    let watch_task = spawn_namespace_watch(gateway.client(), watch_tx.clone());
    let mut runtime = Runtime {
        gateway,
        store,
        toasts,
        expansion_tx,
        watch_tx,
        watch_task,
        watch_throttle: WatchThrottle::default(),
    };

    let (mut terminal, keyboard_enhanced) = init_terminal()?;
    let run_result = run_loop(
        &mut terminal,
        app,
        &mut runtime,
        &mut expansion_rx,
        &mut watch_rx,
        tick_ms,
    )
    .await;
    let restore_result = restore_terminal(&mut terminal, keyboard_enhanced);
    runtime.watch_task.abort();

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow::anyhow!(
            "{run_error:#}\nterminal restore error: {restore_error:#}"
        )),
        (Err(error), _) => Err(error),
        (_, Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn init_terminal() -> Result<(TuiTerminal, bool)> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    let keyboard_enhanced = matches!(supports_keyboard_enhancement(), Ok(true));
    if keyboard_enhanced {
        execute!(
            stdout,
            EnterAlternateScreen,
            PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                    | KeyboardEnhancementFlags::REPORT_ALTERNATE_KEYS
            )
        )
        .context("failed to enter alternate screen with keyboard enhancement")?;
    } else {
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
    terminal.clear().context("failed to clear terminal")?;
    Ok((terminal, keyboard_enhanced))
}

fn restore_terminal(terminal: &mut TuiTerminal, keyboard_enhanced: bool) -> Result<()> {
    if keyboard_enhanced {
        execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags)
            .context("failed to pop keyboard enhancement flags")?;
    }
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

async fn run_loop(
    terminal: &mut TuiTerminal,
    app: &mut App,
    runtime: &mut Runtime,
    expansion_rx: &mut mpsc::UnboundedReceiver<(PendingExpansion, FetchResult)>,
    watch_rx: &mut mpsc::UnboundedReceiver<()>,
    tick_ms: u64,
) -> Result<()> {
    let mut reader = EventStream::new();
    let mut ticker = interval(Duration::from_millis(tick_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        terminal
            .draw(|frame| ui::render(frame, app))
            .context("failed to render terminal frame")?;

        if !app.running() {
            break;
        }

        tokio::select! {
            maybe_event = reader.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        if let Some(action) = input::map_key(app.mode(), key) {
                            debug!("action={action:?}");
                            let command = app.apply_action(action);
                            if !command.is_none() {
                                terminal
                                    .draw(|frame| ui::render(frame, app))
                                    .context("failed to render terminal frame")?;
                                execute_app_command(app, runtime, command).await;
                            }
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        app.set_status(format!("terminal event error: {error}"));
                    }
                    None => {
                        app.set_status("terminal event stream closed");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                app.on_tick(now);
                if runtime.watch_throttle.take_due(now) {
                    refresh_skeleton(app, runtime).await;
                }
            }
            maybe_result = expansion_rx.recv() => {
                if let Some((pending, result)) = maybe_result {
                    app.on_expansion_resolved(&pending, result);
                }
            }
            maybe_change = watch_rx.recv() => {
                if maybe_change.is_some() && runtime.watch_throttle.on_event(Instant::now()) {
                    refresh_skeleton(app, runtime).await;
                }
            }
        }
    }

    Ok(())
}

async fn execute_app_command(app: &mut App, runtime: &mut Runtime, command: AppCommand) {
    match command {
        AppCommand::None => {}
        AppCommand::RefreshSkeleton => refresh_skeleton(app, runtime).await,
        AppCommand::AwaitExpansion(pending) => {
            let tx = runtime.expansion_tx.clone();
            tokio::spawn(async move {
                let result = pending.wait().await;
                let _ = tx.send((pending, result));
            });
        }
        AppCommand::PersistViewState => {
            let Some(store) = &runtime.store else {
                return;
            };
            if let Err(error) = store.save(&app.cluster().id, &app.view_state()) {
                warn!("failed to persist view state: {error:#}");
                runtime.toasts.notify(Notification::error(format!(
                    "Could not save view state: {}",
                    compact_error(&error)
                )));
            }
        }
        AppCommand::SwitchContext { context } => {
            if let Err(error) = switch_context(app, runtime, &context).await {
                warn!(context = %context, "context switch failed: {error:#}");
                app.set_status(format!("Context switch to {context} failed"));
                runtime.toasts.notify(Notification::error(compact_error(&error)));
            }
        }
    }
}

async fn refresh_skeleton(app: &mut App, runtime: &Runtime) {
    match timeout(SKELETON_REFRESH_TIMEOUT, runtime.gateway.fetch_skeleton()).await {
        Ok(Ok(skeleton)) => app.on_skeleton(&skeleton),
        Ok(Err(error)) => {
            warn!("skeleton refresh failed: {error:#}");
            app.set_status(format!("Refresh failed: {}", compact_error(&error)));
        }
        Err(_) => {
            warn!("skeleton refresh timed out");
            app.set_status("Refresh timed out");
        }
    }
}

async fn switch_context(app: &mut App, runtime: &mut Runtime, context: &str) -> Result<()> {
    if !runtime.gateway.available_contexts().is_empty()
        && !runtime
            .gateway
            .available_contexts()
            .iter()
            .any(|name| name == context)
    {
        anyhow::bail!("unknown kube context '{context}'");
    }

    let mut gateway = runtime.gateway.clone();
    gateway.switch_context(context).await?;
    let skeleton = timeout(SKELETON_REFRESH_TIMEOUT, gateway.fetch_skeleton())
        .await
        .context("timed out listing namespaces")??;
    let cluster = gateway.cluster_ref();
    let view_state = load_view_state(runtime.store.as_ref(), &cluster.id, app.view_state().zoom);

    app.switch_cluster(
        gateway.context().to_string(),
        cluster,
        &skeleton,
        Arc::new(gateway.clone()),
        view_state,
    );

    runtime.watch_task.abort();
    runtime.watch_task = spawn_namespace_watch(gateway.client(), runtime.watch_tx.clone());
    runtime.watch_throttle = WatchThrottle::default();
    runtime.gateway = gateway;
    info!(context = %context, "switched kube context");
    Ok(())
}

/// Namespace churn triggers a skeleton refresh; the watcher reconnects on errors.
fn spawn_namespace_watch(client: Client, tx: mpsc::UnboundedSender<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let api: Api<Namespace> = Api::all(client.clone());
            let mut events = watcher(api, WatchConfig::default()).boxed();
            loop {
                match events.try_next().await {
                    Ok(Some(_)) => {
                        if tx.send(()).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        warn!("namespace watch stream error: {error}");
                        break;
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(900)).await;
        }
    })
}

fn compact_error(error: &anyhow::Error) -> String {
    let mut out = Vec::new();
    for (index, cause) in error.chain().enumerate() {
        if index == 0 {
            out.push(cause.to_string());
        } else if index <= 2 {
            out.push(format!("caused by: {cause}"));
        } else {
            break;
        }
    }

    out.join(": ")
}

#[cfg(test)]
mod tests {
    use super::{WATCH_MIN_INTERVAL, WatchThrottle, compact_error};
    use anyhow::anyhow;
    use std::time::{Duration, Instant};

    #[test]
    fn watch_events_inside_the_window_are_deferred_not_dropped() {
        let start = Instant::now();
        let mut throttle = WatchThrottle::default();
        assert!(throttle.on_event(start));
        assert!(!throttle.take_due(start));

        let inside = start + Duration::from_millis(100);
        assert!(!throttle.on_event(inside));
        assert!(!throttle.take_due(inside + Duration::from_millis(100)));

        let after = start + WATCH_MIN_INTERVAL;
        assert!(throttle.take_due(after));
        assert!(!throttle.take_due(after + WATCH_MIN_INTERVAL));
    }

    #[test]
    fn watch_event_after_the_window_refreshes_immediately() {
        let start = Instant::now();
        let mut throttle = WatchThrottle::default();
        assert!(throttle.on_event(start));
        assert!(throttle.on_event(start + WATCH_MIN_INTERVAL + Duration::from_millis(1)));
        assert!(!throttle.take_due(start + WATCH_MIN_INTERVAL * 4));
    }

    #[test]
    fn error_chain_is_truncated_to_three_causes() {
        let error = anyhow!("root")
            .context("middle")
            .context("outer")
            .context("top");
        assert_eq!(
            compact_error(&error),
            "top: caused by: outer: caused by: middle"
        );
    }
}
