//! Chrome DevTools Protocol session (uses the `headless_chrome` crate)

use crate::layout::{px_to_inches, ContentBox};
use crate::session::{PageSession, PdfLayout, SessionConfig, WINDOW_SIZE};
use crate::{Error, Result};
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::{Emulation, Page};
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fixed flags for containerized, reproducible rendering. The sandbox is
/// turned off through the launch options.
const CHROME_ARGS: &[&str] = &[
    "--disable-setuid-sandbox",
    "--disable-gpu",
    "--font-render-hinting=none",
    "--disable-font-subpixel-positioning",
    "--disable-web-security",
    "--disable-features=IsolateOrigins,site-per-process",
];

/// How long the resource count must stay flat to call the network idle.
const NETWORK_QUIET: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A headless Chrome instance with a single tab
pub struct CdpSession {
    browser: Browser,
    tab: Arc<Tab>,
}

impl CdpSession {
    /// Launch Chrome and open the tab every later call works on.
    pub fn launch(config: &SessionConfig) -> Result<Self> {
        let args: Vec<&OsStr> = CHROME_ARGS.iter().map(OsStr::new).collect();

        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .window_size(Some(WINDOW_SIZE))
            .path(config.chrome_path.clone())
            .idle_browser_timeout(config.idle_timeout)
            .args(args)
            .build()
            .map_err(|e| Error::RenderFailure(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::RenderFailure(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::RenderFailure(format!("Failed to create tab: {}", e)))?;

        if !config.headers.is_empty() {
            // headless_chrome expects a HashMap<&str, &str>
            let headers: std::collections::HashMap<&str, &str> = config
                .headers
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();

            tab.set_extra_http_headers(headers)
                .map_err(|e| Error::RenderFailure(format!("Failed to set headers: {}", e)))?;
        }

        Ok(Self { browser, tab })
    }

    /// Evaluate an expression that returns a JSON string and decode it.
    fn eval_json(&self, expression: &str) -> Result<serde_json::Value> {
        let eval = self
            .tab
            .evaluate(expression, false)
            .map_err(|e| Error::RenderFailure(format!("Evaluation failed: {}", e)))?;

        match eval.value {
            Some(serde_json::Value::String(s)) => serde_json::from_str(&s)
                .map_err(|e| Error::RenderFailure(format!("Malformed evaluation result: {}", e))),
            Some(other) => Ok(other),
            None => Err(Error::RenderFailure("No value returned from evaluation".into())),
        }
    }

    fn wait_for_network_idle(&self, started: Instant, timeout: Duration) -> Result<()> {
        const PROBE: &str = r#"JSON.stringify({
            ready: document.readyState,
            resources: performance.getEntriesByType('resource').length
        })"#;

        let mut last_count: Option<u64> = None;
        let mut quiet_since = Instant::now();

        loop {
            let state = self.eval_json(PROBE)?;
            let ready = state.get("ready").and_then(|v| v.as_str()) == Some("complete");
            let count = state.get("resources").and_then(|v| v.as_u64()).unwrap_or(0);

            if last_count != Some(count) {
                last_count = Some(count);
                quiet_since = Instant::now();
            } else if ready && quiet_since.elapsed() >= NETWORK_QUIET {
                debug!("network idle after {} resources", count);
                return Ok(());
            }

            if started.elapsed() >= timeout {
                return Err(Error::NavigationTimeout(format!(
                    "page did not become idle within {}ms",
                    timeout.as_millis()
                )));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

/// `(function(){ ... })()` with the selector spliced in as a JS string literal.
fn selector_script(selector: &str, body: &str) -> String {
    let literal = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "(function(){{ const el = document.querySelector({}); {} }})()",
        literal, body
    )
}

const BOX_BODY: &str = r#"
    if (!el || !(el.offsetHeight > 0)) return 'null';
    const r = el.getBoundingClientRect();
    return JSON.stringify({ width: r.width, height: r.height });
"#;

fn to_box(value: &serde_json::Value) -> Option<ContentBox> {
    Some(ContentBox {
        width: value.get("width")?.as_f64()?,
        height: value.get("height")?.as_f64()?,
    })
}

impl PageSession for CdpSession {
    fn set_viewport(&mut self, width: u32, height: u32, device_scale_factor: f64) -> Result<()> {
        self.tab
            .call_method(Emulation::SetDeviceMetricsOverride {
                width,
                height,
                device_scale_factor,
                mobile: false,
                scale: None,
                screen_width: None,
                screen_height: None,
                position_x: None,
                position_y: None,
                dont_set_visible_size: None,
                screen_orientation: None,
                viewport: None,
                display_feature: None,
                device_posture: None,
            })
            .map_err(|e| Error::RenderFailure(format!("Failed to set viewport: {}", e)))?;
        Ok(())
    }

    fn add_style(&mut self, css: &str) -> Result<()> {
        let literal = serde_json::to_string(css)
            .map_err(|e| Error::RenderFailure(format!("Failed to encode stylesheet: {}", e)))?;

        // Runs before any page script; the style is attached once the DOM exists.
        let source = format!(
            r#"(function(){{
                const css = {};
                const apply = function(){{
                    const style = document.createElement('style');
                    style.setAttribute('data-dashpdf', '');
                    style.textContent = css;
                    (document.head || document.documentElement).appendChild(style);
                }};
                if (document.readyState === 'loading') {{
                    document.addEventListener('DOMContentLoaded', apply);
                }} else {{
                    apply();
                }}
            }})();"#,
            literal
        );

        self.tab
            .call_method(Page::AddScriptToEvaluateOnNewDocument {
                source,
                world_name: None,
                include_command_line_api: None,
                run_immediately: None,
            })
            .map_err(|e| Error::RenderFailure(format!("Failed to inject stylesheet: {}", e)))?;
        Ok(())
    }

    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        self.tab.set_default_timeout(timeout);

        let timed_out = |e: anyhow::Error| {
            if started.elapsed() >= timeout {
                Error::NavigationTimeout(format!("{} ({}ms)", e, timeout.as_millis()))
            } else {
                Error::RenderFailure(format!("Navigation failed: {}", e))
            }
        };

        self.tab.navigate_to(url).map_err(timed_out)?;
        self.tab.wait_until_navigated().map_err(timed_out)?;
        self.wait_for_network_idle(started, timeout)
    }

    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<bool> {
        match self.tab.wait_for_element_with_custom_timeout(selector, timeout) {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!("wait for '{}' ended: {}", selector, e);
                Ok(false)
            }
        }
    }

    fn measure(&self, selector: &str) -> Result<Option<ContentBox>> {
        let value = self.eval_json(&selector_script(selector, BOX_BODY))?;
        Ok(to_box(&value))
    }

    fn body_box(&self) -> Result<ContentBox> {
        let value = self.eval_json(
            r#"(function(){
                const el = document.body;
                if (!el) return JSON.stringify({ width: 0, height: 0 });
                const r = el.getBoundingClientRect();
                return JSON.stringify({ width: r.width, height: r.height });
            })()"#,
        )?;
        Ok(to_box(&value).unwrap_or(ContentBox {
            width: 0.0,
            height: 0.0,
        }))
    }

    fn text_of(&self, selector: &str) -> Result<Option<String>> {
        let value = self.eval_json(&selector_script(
            selector,
            "return JSON.stringify(el ? el.textContent : null);",
        ))?;
        Ok(value.as_str().map(str::to_string))
    }

    fn print_pdf(&mut self, layout: &PdfLayout) -> Result<Vec<u8>> {
        let options = PrintToPdfOptions {
            landscape: Some(layout.landscape),
            display_header_footer: Some(false),
            print_background: Some(true),
            scale: Some(1.0),
            paper_width: Some(px_to_inches(layout.size.width)),
            paper_height: Some(px_to_inches(layout.size.height)),
            margin_top: Some(0.0),
            margin_bottom: Some(0.0),
            margin_left: Some(0.0),
            margin_right: Some(0.0),
            prefer_css_page_size: Some(false),
            ..Default::default()
        };

        self.tab
            .print_to_pdf(Some(options))
            .map_err(|e| Error::RenderFailure(format!("PDF generation failed: {}", e)))
    }

    fn close(self) -> Result<()> {
        // Dropping the browser terminates the Chrome child process.
        if let Err(e) = self.tab.close(false) {
            warn!("Failed to close tab cleanly: {}", e);
        }
        drop(self.tab);
        drop(self.browser);
        Ok(())
    }
}
