//! Render requests, derived render parameters and URL normalization

use crate::config::{ServiceConfig, SINGLE_PAGE_SCALE, SINGLE_PAGE_WIDTH};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use url::{Host, Url};

/// Query key that switches the dashboard into presentation mode.
pub const KIOSK_PARAM: &str = "kiosk";

/// What kind of page is being rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Dashboard,
    Panel,
}

pub(crate) fn default_true() -> bool {
    true
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

/// Body of a render submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default = "empty_object")]
    pub pdf_options: serde_json::Value,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default = "default_true")]
    pub high_quality: bool,
    #[serde(default = "default_true")]
    pub single_page: bool,
    #[serde(default)]
    pub css_inject: String,
}

impl RenderRequest {
    /// A request for `url` with every other field at its default.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            from: None,
            to: None,
            pdf_options: empty_object(),
            content_type: ContentType::Dashboard,
            high_quality: true,
            single_page: true,
            css_inject: String::new(),
        }
    }
}

/// Per-render browser parameters handed to exactly one worker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderParams {
    pub width_px: u32,
    pub device_scale_factor: f64,
    pub render_wait_ms: u64,
    pub navigation_timeout_ms: u64,
}

impl RenderParams {
    /// Resolve parameters for a request. Single-page mode overrides the
    /// content-type width and the quality scale.
    pub fn resolve(request: &RenderRequest, config: &ServiceConfig) -> Self {
        let mut width_px = match request.content_type {
            ContentType::Panel => config.panel_width,
            ContentType::Dashboard => config.dashboard_width,
        };
        let mut device_scale_factor = if request.high_quality {
            config.high_quality_scale
        } else {
            1.0
        };

        if request.single_page {
            width_px = SINGLE_PAGE_WIDTH;
            device_scale_factor = SINGLE_PAGE_SCALE;
        }

        Self {
            width_px,
            device_scale_factor,
            render_wait_ms: config.render_wait.as_millis() as u64,
            navigation_timeout_ms: config.navigation_timeout.as_millis() as u64,
        }
    }

    pub fn render_wait(&self) -> Duration {
        Duration::from_millis(self.render_wait_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }
}

/// Parse and normalize the target URL on the orchestrator side: loopback
/// hosts are pointed at `internal_host`, and `from`/`to` are merged in only
/// when the caller's URL doesn't already carry them.
pub fn normalize_target(request: &RenderRequest, internal_host: &str) -> Result<Url> {
    let raw = request
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| Error::InvalidRequest("URL is required".into()))?;

    let mut url = Url::parse(raw).map_err(|e| Error::InvalidRequest(format!("invalid URL '{}': {}", raw, e)))?;

    if is_loopback(&url) {
        url.set_host(Some(internal_host))
            .map_err(|e| Error::ConfigError(format!("invalid internal host '{}': {}", internal_host, e)))?;
    }

    for (key, value) in [("from", request.from.as_deref()), ("to", request.to.as_deref())] {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            if !has_query_key(&url, key) {
                url.query_pairs_mut().append_pair(key, value);
            }
        }
    }

    Ok(url)
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(d)) => d.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}

fn has_query_key(url: &Url, key: &str) -> bool {
    url.query_pairs().any(|(k, _)| k == key)
}

/// Make sure the URL carries the kiosk flag exactly once.
pub fn ensure_kiosk(url: &Url) -> Url {
    let mut url = url.clone();
    if !has_query_key(&url, KIOSK_PARAM) {
        url.query_pairs_mut().append_pair(KIOSK_PARAM, "tv");
    }
    url
}

/// Single-panel pages are recognised by their URL markers.
pub fn is_single_panel(url: &Url) -> bool {
    url.query_pairs().any(|(k, _)| k == "viewPanel" || k == "panelId")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credentials, OutputStore};

    fn config() -> ServiceConfig {
        ServiceConfig {
            credentials: Credentials::new("admin", "admin"),
            internal_host: "grafana".into(),
            port: 3001,
            dashboard_width: 2400,
            panel_width: 1200,
            high_quality_scale: 2.0,
            render_wait: Duration::from_secs(30),
            navigation_timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(300),
            store: OutputStore {
                dir: "output".into(),
                ttl: Duration::from_secs(3600),
                sweep_interval: Duration::from_secs(3600),
            },
        }
    }

    fn kiosk_count(url: &Url) -> usize {
        url.query_pairs().filter(|(k, _)| k == KIOSK_PARAM).count()
    }

    #[test]
    fn request_defaults_from_json() {
        let req: RenderRequest = serde_json::from_str(r#"{"url":"http://x/d/abc"}"#).unwrap();
        assert_eq!(req.content_type, ContentType::Dashboard);
        assert!(req.high_quality);
        assert!(req.single_page);
        assert!(req.pdf_options.is_object());
        assert!(req.css_inject.is_empty());
    }

    #[test]
    fn missing_or_blank_url_is_invalid() {
        let mut req = RenderRequest::for_url("  ");
        assert!(matches!(normalize_target(&req, "grafana"), Err(Error::InvalidRequest(_))));
        req.url = None;
        assert!(matches!(normalize_target(&req, "grafana"), Err(Error::InvalidRequest(_))));
        req.url = Some("not a url".into());
        assert!(matches!(normalize_target(&req, "grafana"), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn localhost_dashboard_is_rewritten_to_internal_host() {
        let mut req = RenderRequest::for_url("http://localhost:3000/d/abc");
        req.single_page = false;
        let url = normalize_target(&req, "grafana").unwrap();
        assert_eq!(url.host_str(), Some("grafana"));
        assert_eq!(url.port(), Some(3000));
        assert_eq!(url.path(), "/d/abc");
        assert!(!is_single_panel(&url));
        assert_eq!(RenderParams::resolve(&req, &config()).width_px, 2400);
    }

    #[test]
    fn loopback_ips_are_rewritten_but_other_hosts_are_not() {
        let url = normalize_target(&RenderRequest::for_url("http://127.0.0.1/d/a"), "grafana").unwrap();
        assert_eq!(url.host_str(), Some("grafana"));
        let url = normalize_target(&RenderRequest::for_url("http://[::1]:3000/d/a"), "grafana").unwrap();
        assert_eq!(url.host_str(), Some("grafana"));
        let url = normalize_target(&RenderRequest::for_url("http://metrics.internal/d/a"), "grafana").unwrap();
        assert_eq!(url.host_str(), Some("metrics.internal"));
    }

    #[test]
    fn time_range_never_overrides_caller_bounds() {
        let mut req = RenderRequest::for_url("http://g/d/a?from=now-1h");
        req.from = Some("now-7d".into());
        req.to = Some("now".into());
        let url = normalize_target(&req, "grafana").unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![("from".into(), "now-1h".into()), ("to".into(), "now".into())]
        );
    }

    #[test]
    fn kiosk_flag_is_added_exactly_once() {
        for raw in [
            "http://g/d/a",
            "http://g/d/a?orgId=1",
            "http://g/d/a?kiosk",
            "http://g/d/a?orgId=1&kiosk=tv#panel",
        ] {
            let url = Url::parse(raw).unwrap();
            let once = ensure_kiosk(&url);
            assert_eq!(kiosk_count(&once), 1, "{}", raw);
            assert_eq!(kiosk_count(&ensure_kiosk(&once)), 1, "{}", raw);
        }
        let kept = ensure_kiosk(&Url::parse("http://g/d/a?orgId=1#frag").unwrap());
        assert_eq!(kept.as_str(), "http://g/d/a?orgId=1&kiosk=tv#frag");
    }

    #[test]
    fn single_page_overrides_content_type_and_quality() {
        let cfg = config();
        let mut req = RenderRequest::for_url("http://g/d/a");
        req.content_type = ContentType::Panel;
        req.single_page = false;
        req.high_quality = false;
        let p = RenderParams::resolve(&req, &cfg);
        assert_eq!((p.width_px, p.device_scale_factor), (1200, 1.0));

        req.high_quality = true;
        let p = RenderParams::resolve(&req, &cfg);
        assert_eq!((p.width_px, p.device_scale_factor), (1200, 2.0));

        req.single_page = true;
        let p = RenderParams::resolve(&req, &cfg);
        assert_eq!((p.width_px, p.device_scale_factor), (3000, 1.5));
        assert_eq!(p.render_wait(), Duration::from_secs(30));
    }

    #[test]
    fn panel_markers_select_single_panel_mode() {
        assert!(is_single_panel(&Url::parse("http://g/d/a?viewPanel=2").unwrap()));
        assert!(is_single_panel(&Url::parse("http://g/d-solo/a?panelId=4").unwrap()));
        assert!(!is_single_panel(&Url::parse("http://g/d/a?orgId=1").unwrap()));
    }
}
