//! Render worker: one URL in, one PDF (or one error) out
//!
//! The worker runs in its own process, started by the orchestrator through
//! the `render` subcommand. Its steps are strictly sequential:
//! probe, normalize, session setup, style override, navigation, settle wait,
//! geometry discovery, viewport re-fit, naming, emission, teardown.
//!
//! The settle wait is a blind timer: the dashboard signals nothing when its
//! visualizations are done drawing.

use crate::config::Credentials;
use crate::layout;
use crate::protocol::{WorkerMessage, WorkerOptions};
use crate::request::{ensure_kiosk, is_single_panel};
use crate::session::{PageSession, PdfLayout, SessionConfig, INITIAL_VIEWPORT_HEIGHT};
use crate::{probe, Error, Result};
use chrono::{NaiveDate, Utc};
use log::{error, info, warn};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Element whose presence suggests the panels have been mounted.
const CONTENT_SELECTOR: &str = ".panel-container";
const CONTENT_WAIT: Duration = Duration::from_secs(5);
/// Layout settle time after the viewport is resized to the content.
const RESIZE_SETTLE: Duration = Duration::from_secs(1);
/// Slack on top of the known waits before Chrome counts as idle.
const IDLE_SLACK: Duration = Duration::from_secs(60);

/// Print overrides for a page built for interactive browsing: navigation
/// chrome hidden, grid transforms neutralized, scrollbars hidden, panels full
/// width.
pub const PRINT_STYLESHEET: &str = r#"
.sidemenu, .navbar-page-btn, .navbar, .dashboard-header, .submenu-controls {
    display: none !important;
}
.react-grid-layout {
    width: 100% !important;
    margin: 0 !important;
    padding: 0 !important;
    transform: none !important;
}
.panel-container {
    border: none !important;
    box-shadow: none !important;
    background: transparent !important;
    margin: 0 !important;
    width: 100% !important;
}
::-webkit-scrollbar { display: none !important; }
* { scrollbar-width: none !important; }
@page { margin: 0; }
.main-view, .scroll-canvas, .dashboard-container {
    width: 100% !important;
    margin: 0 !important;
    padding: 0 !important;
    transform: none !important;
}
.graph-panel__chart, .panel-content {
    overflow: visible !important;
    width: 100% !important;
}
text { font-weight: 500 !important; }
.panel-content {
    padding: 0 !important;
    height: auto !important;
}
.graph-panel {
    height: 100% !important;
    width: 100% !important;
}
.react-grid-item {
    position: relative !important;
    transform: none !important;
    margin: 0 !important;
    width: 100% !important;
}
.panel-info-corner,
.panel-info-corner--info,
.panel-info-corner--links,
.react-resizable-handle,
.panel-header:hover .panel-info-corner,
.panel-info-corner--info:hover,
.panel-info-corner--links:hover {
    display: none !important;
    opacity: 0 !important;
    visibility: hidden !important;
}
"#;

/// Everything a worker needs for one render
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub target: Url,
    pub credentials: Credentials,
    pub options: WorkerOptions,
    pub chrome_path: Option<PathBuf>,
}

impl RenderJob {
    /// Decode the three positional worker arguments.
    pub fn from_args(url: &str, credentials: &str, options: &str) -> Result<Self> {
        let target = Url::parse(url).map_err(|e| Error::InvalidRequest(format!("invalid URL '{}': {}", url, e)))?;
        let credentials = Credentials::parse(credentials)?;
        // The orchestrator encodes these; a bad bag is our bug, not the caller's.
        let options: WorkerOptions = serde_json::from_str(options)
            .map_err(|e| Error::RenderFailure(format!("invalid worker options: {}", e)))?;
        Ok(Self {
            target,
            credentials,
            options,
            chrome_path: None,
        })
    }

    /// Fixed print stylesheet plus whatever the caller asked to inject.
    pub fn stylesheet(&self) -> String {
        let extra = self.options.css_inject.trim();
        if extra.is_empty() {
            PRINT_STYLESHEET.to_string()
        } else {
            format!("{}\n{}\n", PRINT_STYLESHEET, extra)
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let params = &self.options.params;
        let mut headers = HashMap::new();
        headers.insert(
            "Authorization".to_string(),
            probe::basic_auth_header(&self.credentials),
        );
        SessionConfig {
            headers,
            chrome_path: self.chrome_path.clone(),
            idle_timeout: params.navigation_timeout() + params.render_wait() + IDLE_SLACK,
        }
    }
}

/// Render one job. `launch` is only called once the probe has passed, and
/// the session it returns is closed before this function returns.
pub fn render<S, L>(job: &RenderJob, launch: L, today: NaiveDate) -> Result<PathBuf>
where
    S: PageSession,
    L: FnOnce(&SessionConfig) -> Result<S>,
{
    info!("Checking URL accessibility: {}", job.target);
    probe::check_target(
        job.target.as_str(),
        &job.credentials,
        job.options.params.navigation_timeout(),
    )?;

    let url = ensure_kiosk(&job.target);
    let single_panel = is_single_panel(&url);

    info!("Starting browser...");
    let mut session = launch(&job.session_config())?;
    let outcome = drive(&mut session, job, &url, single_panel, today);

    if let Err(e) = session.close() {
        warn!("Failed to close browser: {}", e);
    }
    info!("Browser closed.");
    outcome
}

fn drive<S: PageSession>(
    session: &mut S,
    job: &RenderJob,
    url: &Url,
    single_panel: bool,
    today: NaiveDate,
) -> Result<PathBuf> {
    let params = &job.options.params;

    session.set_viewport(params.width_px, INITIAL_VIEWPORT_HEIGHT, params.device_scale_factor)?;
    session.add_style(&job.stylesheet())?;

    info!("Navigating to {}", url);
    session.navigate(url.as_str(), params.navigation_timeout())?;

    info!("Page loaded, waiting {}ms for visualizations", params.render_wait_ms);
    session.pause(params.render_wait());
    if !session.wait_for_selector(CONTENT_SELECTOR, CONTENT_WAIT)? {
        info!("Panel container not found, continuing...");
    }

    let discovery = layout::discover(&*session, single_panel)?;
    let size = layout::fit(params.width_px, discovery.size, single_panel);
    info!(
        "Content measured via '{}': {}x{} (single panel: {})",
        discovery.source, size.width, size.height, single_panel
    );

    session.set_viewport(size.width, size.height, params.device_scale_factor)?;
    session.pause(RESIZE_SETTLE);

    let title = layout::find_title(&*session)?;
    let path = job
        .options
        .output_dir
        .join(layout::output_file_name(&title, today));

    info!("Generating PDF...");
    let bytes = session.print_pdf(&PdfLayout {
        size,
        landscape: job.options.landscape().unwrap_or(false),
    })?;
    write_output(&path, &bytes)?;
    info!("PDF generated: {} ({} bytes)", path.display(), bytes.len());

    Ok(path)
}

/// Write next to the destination and rename, so the Output Store never holds
/// a half-written PDF.
fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let partial = path.with_extension("pdf.part");
    std::fs::write(&partial, bytes)?;
    std::fs::rename(&partial, path)?;
    Ok(())
}

/// [`render`], with a panic anywhere in the pipeline turned into a
/// `RenderFailure` so the worker still reports.
pub fn render_guarded<S, L>(job: &RenderJob, launch: L, today: NaiveDate) -> Result<PathBuf>
where
    S: PageSession,
    L: FnOnce(&SessionConfig) -> Result<S>,
{
    panic::catch_unwind(AssertUnwindSafe(|| render(job, launch, today)))
        .unwrap_or_else(|payload| Err(Error::RenderFailure(panic_message(&*payload))))
}

/// Entry point of the `render` subcommand. Writes exactly one message to
/// stdout and returns the process exit code.
pub fn run_worker(url: &str, credentials: &str, options: &str) -> i32 {
    let outcome = RenderJob::from_args(url, credentials, options).and_then(|mut job| {
        job.chrome_path = std::env::var_os("CHROME_PATH").map(PathBuf::from);
        render_guarded(&job, launch_browser, Utc::now().date_naive())
    });

    if let Err(e) = &outcome {
        error!("Error: {}", e);
    }

    let message = WorkerMessage::from_outcome(&outcome);
    if let Err(e) = message.write_to(std::io::stdout().lock()) {
        error!("Failed to report result: {}", e);
        return 2;
    }

    if outcome.is_ok() {
        0
    } else {
        1
    }
}

#[cfg(feature = "cdp")]
fn launch_browser(config: &SessionConfig) -> Result<crate::cdp::CdpSession> {
    crate::cdp::CdpSession::launch(config)
}

#[cfg(not(feature = "cdp"))]
fn launch_browser(_config: &SessionConfig) -> Result<NoBrowser> {
    Err(Error::RenderFailure(
        "dashpdf was built without the `cdp` feature".into(),
    ))
}

/// Stand-in session type for builds without a browser backend.
#[cfg(not(feature = "cdp"))]
pub enum NoBrowser {}

#[cfg(not(feature = "cdp"))]
impl PageSession for NoBrowser {
    fn set_viewport(&mut self, _: u32, _: u32, _: f64) -> Result<()> {
        match *self {}
    }
    fn add_style(&mut self, _: &str) -> Result<()> {
        match *self {}
    }
    fn navigate(&mut self, _: &str, _: Duration) -> Result<()> {
        match *self {}
    }
    fn wait_for_selector(&mut self, _: &str, _: Duration) -> Result<bool> {
        match *self {}
    }
    fn measure(&self, _: &str) -> Result<Option<layout::ContentBox>> {
        match *self {}
    }
    fn body_box(&self) -> Result<layout::ContentBox> {
        match *self {}
    }
    fn text_of(&self, _: &str) -> Result<Option<String>> {
        match *self {}
    }
    fn print_pdf(&mut self, _: &PdfLayout) -> Result<Vec<u8>> {
        match *self {}
    }
    fn close(self) -> Result<()> {
        match self {}
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("worker panicked: {}", s)
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{RenderParams, RenderRequest};

    fn job(css: &str) -> RenderJob {
        let mut req = RenderRequest::for_url("http://grafana:3000/d/abc");
        req.css_inject = css.to_string();
        let params = RenderParams {
            width_px: 2400,
            device_scale_factor: 2.0,
            render_wait_ms: 30_000,
            navigation_timeout_ms: 120_000,
        };
        let options = WorkerOptions::new(&req, params, PathBuf::from("output"));
        RenderJob::from_args(
            "http://grafana:3000/d/abc",
            "admin:admin",
            &serde_json::to_string(&options).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn injected_css_follows_the_fixed_stylesheet() {
        assert_eq!(job("").stylesheet(), PRINT_STYLESHEET);
        let css = job(".foo { color: red; }").stylesheet();
        assert!(css.starts_with(PRINT_STYLESHEET));
        assert!(css.contains(".foo { color: red; }"));
    }

    #[test]
    fn session_config_carries_auth_and_outlives_waits() {
        let cfg = job("").session_config();
        assert_eq!(cfg.headers["Authorization"], "Basic YWRtaW46YWRtaW4=");
        assert!(cfg.idle_timeout > Duration::from_secs(150));
    }

    #[test]
    fn bad_worker_arguments_are_rejected() {
        assert!(matches!(RenderJob::from_args("nope", "a:b", "{}"), Err(Error::InvalidRequest(_))));
        assert!(matches!(
            RenderJob::from_args("http://g/d", "nocolon", "{}"),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            RenderJob::from_args("http://g/d", "a:b", "{}"),
            Err(Error::RenderFailure(ref m)) if m.starts_with("invalid worker options")
        ));
    }

    #[test]
    fn output_is_renamed_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ops_2026-10-16.pdf");
        write_output(&path, b"%PDF-1.4").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4");
        assert!(!path.with_extension("pdf.part").exists());
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "worker panicked: boom");
    }
}
