//! Content geometry discovery and output naming
//!
//! The target page gives no structural hints beyond its DOM, so the content
//! area is found by trying a prioritized list of named probes. Each probe is a
//! CSS selector; the first one that matches a rendered (non-zero height)
//! element wins and the document body is the fallback.

use crate::session::PageSession;
use crate::Result;
use chrono::NaiveDate;
use log::{debug, info};

/// Smallest page the renderer will ever emit.
pub const MIN_WIDTH: u32 = 800;
pub const MIN_HEIGHT: u32 = 600;

/// Title used when the page has no usable heading.
pub const DEFAULT_TITLE: &str = "dashboard";

/// A named content probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub name: &'static str,
    pub selector: &'static str,
}

const fn probe(name: &'static str, selector: &'static str) -> Probe {
    Probe { name, selector }
}

/// Probes for a page that shows one visualization.
pub const PANEL_PROBES: &[Probe] = &[
    probe("panel-container", ".panel-container"),
    probe("grid-item", ".react-grid-item"),
    probe("dashboard-container", ".dashboard-container"),
    probe("panel-content", ".panel-content"),
    probe("grafana-panel", ".grafana-panel"),
];

/// Probes for a full dashboard.
pub const DASHBOARD_PROBES: &[Probe] = &[
    probe("grid-layout", ".react-grid-layout"),
    probe("dashboard-container", ".dashboard-container"),
    probe("dashboard-page", ".dashboard-page"),
    probe("dashboard-scroll", ".dashboard-scroll"),
];

/// Title-like elements, in order of preference.
pub const TITLE_SELECTORS: &[&str] = &[
    ".dashboard-title",
    ".panel-title",
    "h1",
    ".page-toolbar h1",
    ".page-header h1",
];

/// Bounding box of an element as reported by the page, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentBox {
    pub width: f64,
    pub height: f64,
}

/// Whole-pixel page dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSize {
    pub width: u32,
    pub height: u32,
}

impl ContentBox {
    /// Round up and enforce the minimum page size.
    pub fn clamped(&self) -> PageSize {
        PageSize {
            width: ceil_px(self.width).max(MIN_WIDTH),
            height: ceil_px(self.height).max(MIN_HEIGHT),
        }
    }
}

fn ceil_px(v: f64) -> u32 {
    if v.is_finite() && v > 0.0 {
        v.ceil().min(u32::MAX as f64) as u32
    } else {
        0
    }
}

/// Geometry found on the page and which probe produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    pub size: PageSize,
    /// Probe name, or `"body"` for the fallback
    pub source: &'static str,
}

pub fn probes_for(single_panel: bool) -> &'static [Probe] {
    if single_panel {
        PANEL_PROBES
    } else {
        DASHBOARD_PROBES
    }
}

/// Run the probes in order against the live page.
pub fn discover<S: PageSession + ?Sized>(session: &S, single_panel: bool) -> Result<Discovery> {
    for p in probes_for(single_panel) {
        match session.measure(p.selector)? {
            Some(b) => {
                debug!("probe '{}' matched: {}x{}", p.name, b.width, b.height);
                return Ok(Discovery {
                    size: b.clamped(),
                    source: p.name,
                });
            }
            None => debug!("probe '{}' did not match", p.name),
        }
    }

    info!("no content container matched, measuring document body");
    let body = session.body_box()?;
    Ok(Discovery {
        size: body.clamped(),
        source: "body",
    })
}

/// Final page size: the discovered height always, the discovered width only
/// for single panels so multi-column dashboards keep their requested width.
pub fn fit(requested_width: u32, discovered: PageSize, single_panel: bool) -> PageSize {
    PageSize {
        width: if single_panel {
            discovered.width
        } else {
            requested_width
        },
        height: discovered.height,
    }
}

/// First non-empty title-like text on the page.
pub fn find_title<S: PageSession + ?Sized>(session: &S) -> Result<String> {
    for selector in TITLE_SELECTORS {
        if let Some(text) = session.text_of(selector)? {
            let text = text.trim();
            if !text.is_empty() {
                return Ok(text.to_string());
            }
        }
    }
    Ok(DEFAULT_TITLE.to_string())
}

/// Replace everything outside `[A-Za-z0-9]` with `_` and lowercase.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// `<title>_<YYYY-MM-DD>.pdf`
pub fn output_file_name(title: &str, date: NaiveDate) -> String {
    format!("{}_{}.pdf", sanitize_title(title), date.format("%Y-%m-%d"))
}

/// CSS pixels to inches at 96 dpi, the unit the PDF printer takes.
pub fn px_to_inches(px: u32) -> f64 {
    px as f64 / 96.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny_boxes_clamp_to_minimum() {
        let b = ContentBox { width: 10.2, height: 0.0 };
        assert_eq!(b.clamped(), PageSize { width: 800, height: 600 });
        let b = ContentBox { width: f64::NAN, height: -5.0 };
        assert_eq!(b.clamped(), PageSize { width: 800, height: 600 });
    }

    #[test]
    fn large_boxes_round_up() {
        let b = ContentBox { width: 1200.1, height: 3400.0 };
        assert_eq!(b.clamped(), PageSize { width: 1201, height: 3400 });
    }

    #[test]
    fn fit_keeps_requested_width_for_dashboards() {
        let found = PageSize { width: 900, height: 5000 };
        assert_eq!(fit(2400, found, false), PageSize { width: 2400, height: 5000 });
        assert_eq!(fit(2400, found, true), PageSize { width: 900, height: 5000 });
    }

    #[test]
    fn sanitized_names() {
        assert_eq!(sanitize_title("Node Exporter / Full"), "node_exporter___full");
        assert_eq!(sanitize_title("CPU-Usage 2"), "cpu_usage_2");
        assert_eq!(sanitize_title("Überblick"), "_berblick");
    }

    #[test]
    fn names_are_stable_per_day() {
        let d1 = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let d2 = d1.succ_opt().unwrap();
        assert_eq!(output_file_name("Ops", d1), output_file_name("Ops", d1));
        assert_eq!(output_file_name("Ops", d1), "ops_2026-10-16.pdf");
        assert_ne!(output_file_name("Ops", d1), output_file_name("Ops", d2));
    }

    #[test]
    fn probe_lists_depend_on_mode() {
        assert_eq!(probes_for(true)[0].selector, ".panel-container");
        assert_eq!(probes_for(false)[0].selector, ".react-grid-layout");
    }
}
