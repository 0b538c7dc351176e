//! Contract between the orchestrator and a render worker process
//!
//! A worker is started with three positional arguments: the target URL, a
//! `user:password` pair and a JSON-encoded [`WorkerOptions`]. It answers with
//! a single JSON line ([`WorkerMessage`]) on stdout and exits. Everything else
//! the worker prints goes to stderr.

use crate::request::{default_true, ContentType, RenderParams, RenderRequest};
use crate::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;

/// The options bag handed to a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerOptions {
    #[serde(default)]
    pub pdf_options: serde_json::Value,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default = "default_true")]
    pub high_quality: bool,
    #[serde(default = "default_true")]
    pub single_page: bool,
    #[serde(default)]
    pub css_inject: String,
    pub params: RenderParams,
    pub output_dir: PathBuf,
}

impl WorkerOptions {
    pub fn new(request: &RenderRequest, params: RenderParams, output_dir: PathBuf) -> Self {
        Self {
            pdf_options: request.pdf_options.clone(),
            content_type: request.content_type,
            high_quality: request.high_quality,
            single_page: request.single_page,
            css_inject: request.css_inject.clone(),
            params,
            output_dir,
        }
    }

    /// `pdfOptions.landscape`, the only key of the bag the worker interprets.
    pub fn landscape(&self) -> Option<bool> {
        self.pdf_options.get("landscape").and_then(|v| v.as_bool())
    }
}

/// The single message a worker reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMessage {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl WorkerMessage {
    pub fn from_outcome(outcome: &Result<PathBuf>) -> Self {
        match outcome {
            Ok(path) => Self {
                success: true,
                path: Some(path.to_string_lossy().into_owned()),
                error: None,
                kind: None,
            },
            Err(e) => Self {
                success: false,
                path: None,
                error: Some(e.message()),
                kind: Some(e.kind()),
            },
        }
    }

    /// Turn a report back into an outcome. Reports that carry neither a path
    /// nor an error are a process failure.
    pub fn into_outcome(self) -> Result<PathBuf> {
        match (self.success, self.path, self.error) {
            (true, Some(path), _) => Ok(PathBuf::from(path)),
            (false, _, Some(error)) => Err(Error::from_report(
                self.kind.unwrap_or(ErrorKind::RenderFailure),
                error,
            )),
            _ => Err(Error::ProcessFailure("worker sent an incomplete report".into())),
        }
    }

    /// Parse one stdout line; anything that isn't a message yields `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        serde_json::from_str(line).ok()
    }

    /// Write the message as one line and flush.
    pub fn write_to<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        let json = serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"success":false,"error":"serialization failed"}"#.to_string());
        writeln!(out, "{}", json)?;
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_message_shape() {
        let msg = WorkerMessage::from_outcome(&Ok(PathBuf::from("output/ops_2026-10-16.pdf")));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "path": "output/ops_2026-10-16.pdf"}));
    }

    #[test]
    fn failure_message_keeps_kind_and_text() {
        let err = Error::UnreachableTarget("Unable to access URL. HTTP status: 404".into());
        let msg = WorkerMessage::from_outcome(&Err(err));
        let mut buf = Vec::new();
        msg.write_to(&mut buf).unwrap();
        let line = String::from_utf8(buf).unwrap();
        assert!(line.ends_with('\n'));

        let parsed = WorkerMessage::parse_line(&line).unwrap();
        match parsed.into_outcome() {
            Err(Error::UnreachableTarget(m)) => assert!(m.contains("404")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn incomplete_reports_are_process_failures() {
        let msg = WorkerMessage::parse_line(r#"{"success":true}"#).unwrap();
        assert!(matches!(msg.into_outcome(), Err(Error::ProcessFailure(_))));
        let msg = WorkerMessage::parse_line(r#"{"success":false,"error":"boom"}"#).unwrap();
        assert!(matches!(msg.into_outcome(), Err(Error::RenderFailure(_))));
    }

    #[test]
    fn noise_lines_are_ignored() {
        assert!(WorkerMessage::parse_line("DevTools listening on ws://...").is_none());
        assert!(WorkerMessage::parse_line("{not json").is_none());
        assert!(WorkerMessage::parse_line("").is_none());
    }

    #[test]
    fn options_round_trip_through_json_argument() {
        let mut req = RenderRequest::for_url("http://g/d/a");
        req.pdf_options = serde_json::json!({"landscape": true, "anything": [1, 2]});
        let params = RenderParams {
            width_px: 3000,
            device_scale_factor: 1.5,
            render_wait_ms: 10,
            navigation_timeout_ms: 1000,
        };
        let opts = WorkerOptions::new(&req, params, PathBuf::from("out"));
        let arg = serde_json::to_string(&opts).unwrap();
        let back: WorkerOptions = serde_json::from_str(&arg).unwrap();
        assert_eq!(back.params, params);
        assert_eq!(back.landscape(), Some(true));
        assert_eq!(back.pdf_options["anything"], serde_json::json!([1, 2]));
    }

    #[test]
    fn omitted_flags_default_like_the_request() {
        let opts: WorkerOptions = serde_json::from_str(
            r#"{"params":{"width_px":2400,"device_scale_factor":2.0,"render_wait_ms":0,"navigation_timeout_ms":1000},"outputDir":"out"}"#,
        )
        .unwrap();
        let req: RenderRequest = serde_json::from_str(r#"{"url":"http://g/d/a"}"#).unwrap();
        assert!(opts.high_quality && req.high_quality);
        assert!(opts.single_page && req.single_page);
    }
}
