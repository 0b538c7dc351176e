//! dashpdf
//!
//! Renders monitoring dashboards to PDF by driving headless Chrome, and
//! serves that capability over HTTP.
//!
//! # Design
//!
//! - **Process isolation**: every render runs in its own worker process
//!   (`dashpdf render ...`), supervised by the [`Orchestrator`] under a hard
//!   timeout. A browser crash or hang never reaches the server.
//! - **Explicit parameters**: page width, scale and timeouts are resolved per
//!   request into [`RenderParams`] and handed to the worker as arguments.
//! - **Adapter seam**: the worker drives the page through the
//!   [`session::PageSession`] trait; the CDP backend (`cdp` feature, default)
//!   implements it with `headless_chrome`.
//!
//! # Example
//!
//! ```no_run
//! use dashpdf::{Orchestrator, RenderRequest, ServiceConfig, WorkerCommand};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServiceConfig::from_env()?;
//! let orchestrator = Orchestrator::new(config, WorkerCommand::current_exe()?);
//!
//! let path = orchestrator
//!     .submit(RenderRequest::for_url("http://localhost:3000/d/abc"))
//!     .await?;
//! println!("PDF written to {}", path.display());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub use error::{Error, ErrorKind, Result};

pub mod config;
pub mod layout;
pub mod orchestrator;
pub mod probe;
pub mod protocol;
pub mod request;
pub mod server;
pub mod session;
pub mod sweeper;
pub mod worker;

#[cfg(feature = "cdp")]
pub mod cdp;

pub use config::{Credentials, OutputStore, ServiceConfig};
pub use orchestrator::{Orchestrator, WorkerCommand};
pub use protocol::{WorkerMessage, WorkerOptions};
pub use request::{ContentType, RenderParams, RenderRequest};
