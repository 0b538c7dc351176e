//! End-to-end render through a real headless Chrome
#![cfg(feature = "cdp")]

use chrono::NaiveDate;
use dashpdf::cdp::CdpSession;
use dashpdf::worker::{render, RenderJob};
use dashpdf::{Credentials, RenderParams, RenderRequest, WorkerOptions};
use tiny_http::{Header, Response, Server};
use url::Url;

const PAGE: &str = r#"<html><head><title>stub</title></head>
<body>
  <div class="dashboard-title">Chrome Smoke</div>
  <div class="react-grid-layout" style="width:900px;height:1300px">
    <div class="panel-container" style="height:400px">panel</div>
  </div>
</body></html>"#;

fn start_dashboard() -> String {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let resp = Response::from_string(PAGE)
                .with_header(Header::from_bytes(&b"Content-Type"[..], &b"text/html"[..]).unwrap());
            let _ = request.respond(resp);
        }
    });
    format!("http://{}", addr)
}

#[test]
#[ignore]
fn renders_stub_dashboard_to_pdf() {
    let base = start_dashboard();
    let out = tempfile::tempdir().unwrap();
    let url = format!("{}/d/smoke", base);

    let mut req = RenderRequest::for_url(url.as_str());
    req.single_page = false;
    let params = RenderParams {
        width_px: 1200,
        device_scale_factor: 1.0,
        render_wait_ms: 500,
        navigation_timeout_ms: 30_000,
    };
    let job = RenderJob {
        target: Url::parse(&url).unwrap(),
        credentials: Credentials::new("admin", "admin"),
        options: WorkerOptions::new(&req, params, out.path().to_path_buf()),
        chrome_path: std::env::var_os("CHROME_PATH").map(Into::into),
    };

    let today = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
    let path = render(&job, CdpSession::launch, today).expect("render");

    assert_eq!(path, out.path().join("chrome_smoke_2026-10-16.pdf"));
    let bytes = std::fs::read(&path).unwrap();
    assert!(bytes.starts_with(b"%PDF"));
}
