#![allow(dead_code)]

use std::{collections::BTreeMap, io::Cursor, io::Read, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response, StatusCode, header},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use mdport::{
    application::{export::ExportService, sessions::SessionService, title::TitleFetcher},
    infra::{
        http::{AppState, build_router},
        uploads::UploadStorage,
    },
};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOUNDARY: &str = "mdport-test-boundary";

pub struct TestApp {
    pub router: Router,
    pub root: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let root = TempDir::new().expect("storage root");
        let uploads = UploadStorage::new(
            root.path().join("uploads"),
            "/uploads",
            64 * 1024,
            ["png", "jpg", "jpeg", "webp", "gif"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        )
        .expect("upload storage");
        let export = ExportService::new(root.path().to_path_buf(), root.path().join("output"));
        let sessions = Arc::new(SessionService::new(Duration::from_secs(300)));
        let titles = TitleFetcher::new(Duration::from_secs(2), "mdport-test").expect("client");

        let state = AppState::new(
            sessions,
            Arc::new(export),
            Arc::new(uploads),
            Arc::new(titles),
            1024 * 1024,
        );

        Self {
            router: build_router(state),
            root,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond")
    }

    /// Log in (registering on first use) and return the `Cookie` header value.
    pub async fn login(&self, username: &str) -> String {
        let response = self
            .send(json_request(
                Method::POST,
                "/login",
                None,
                &serde_json::json!({ "username": username, "password": "secret" }),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .expect("session cookie");
        set_cookie
            .split(';')
            .next()
            .expect("cookie pair")
            .to_string()
    }

    pub fn write_file(&self, relative: &str, contents: &[u8]) {
        let path = self.root.path().join(relative);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("parent dir");
        std::fs::write(path, contents).expect("fixture");
    }

    /// Files left in the staging directory; must always be empty between requests.
    pub fn staging_leftovers(&self) -> Vec<String> {
        let staging = self.root.path().join("output/.staging");
        match std::fs::read_dir(staging) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

pub fn json_request(
    method: Method,
    uri: &str,
    cookie: Option<&str>,
    body: &Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

pub fn get_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).expect("request should build")
}

pub fn multipart_request(cookie: &str, field: &str, file_name: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/upload_image")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(header::COOKIE, cookie)
        .body(Body::from(body))
        .expect("request should build")
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("body should be readable")
        .to_bytes()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

/// Archive entries by name, in archive order.
pub fn zip_entries(bytes: &[u8]) -> BTreeMap<String, Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("valid zip");
    let mut entries = BTreeMap::new();
    for index in 0..archive.len() {
        let mut file = archive.by_index(index).expect("entry");
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).expect("entry contents");
        entries.insert(file.name().to_string(), contents);
    }
    entries
}

pub fn markdown_entry(entries: &BTreeMap<String, Vec<u8>>) -> (String, String) {
    let (name, contents) = entries
        .iter()
        .find(|(name, _)| name.starts_with("export_") && name.ends_with(".md"))
        .expect("markdown entry");
    (
        name.clone(),
        String::from_utf8(contents.clone()).expect("utf-8 markdown"),
    )
}
