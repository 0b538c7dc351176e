//! Browser session abstraction used by the render worker
//!
//! The worker only needs a handful of page operations. Keeping them behind a
//! trait lets the render pipeline run against the CDP backend in production
//! and against a scripted session in tests.

use crate::layout::{ContentBox, PageSize};
use crate::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Initial window size every session is launched with.
pub const WINDOW_SIZE: (u32, u32) = (2400, 1600);

/// Height used for the first viewport, before the content is measured.
pub const INITIAL_VIEWPORT_HEIGHT: u32 = 1600;

/// Launch-time configuration of a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Headers sent with every request of the session
    pub headers: HashMap<String, String>,
    /// Chrome binary to use instead of the auto-detected one
    pub chrome_path: Option<PathBuf>,
    /// How long the browser may go without protocol traffic before it is
    /// considered dead. Must outlive the longest blind wait.
    pub idle_timeout: Duration,
}

/// Paper settings for PDF emission
#[derive(Debug, Clone, PartialEq)]
pub struct PdfLayout {
    pub size: PageSize,
    pub landscape: bool,
}

/// The page operations the render pipeline drives
pub trait PageSession {
    /// Set the emulated viewport
    fn set_viewport(&mut self, width: u32, height: u32, device_scale_factor: f64) -> Result<()>;

    /// Apply a stylesheet to every document loaded from now on
    fn add_style(&mut self, css: &str) -> Result<()>;

    /// Navigate and wait until the page is loaded, DOM-ready and the network
    /// is idle, or fail once `timeout` has elapsed.
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// Blind wait
    fn pause(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }

    /// Wait for a selector to appear. `Ok(false)` when it didn't in time.
    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<bool>;

    /// Bounding box of the first element matching `selector`, if it exists
    /// and is rendered with a positive height.
    fn measure(&self, selector: &str) -> Result<Option<ContentBox>>;

    /// Bounding box of the document body
    fn body_box(&self) -> Result<ContentBox>;

    /// Text content of the first element matching `selector`
    fn text_of(&self, selector: &str) -> Result<Option<String>>;

    /// Print the current page to PDF bytes
    fn print_pdf(&mut self, layout: &PdfLayout) -> Result<Vec<u8>>;

    /// Close the browser
    fn close(self) -> Result<()>
    where
        Self: Sized;
}
