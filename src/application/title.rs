//! Page title lookup used when inserting links into a document.

use std::{cell::RefCell, rc::Rc, time::Duration};

use lol_html::{RewriteStrSettings, element, rewrite_str, text};
use reqwest::{
    Client, StatusCode,
    header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue},
    redirect::Policy,
};
use thiserror::Error;
use tracing::warn;
use url::Url;

const SOURCE: &str = "application::title";
const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Error)]
pub enum TitleError {
    #[error("url must not be empty")]
    EmptyUrl,
    #[error("url must start with http:// or https://")]
    InvalidUrl,
    #[error("request timed out")]
    Timeout,
    #[error("could not connect to the server")]
    Connect,
    #[error("page does not exist")]
    NotFound,
    #[error("access was denied")]
    Forbidden,
    #[error("server answered with HTTP {0}")]
    Status(u16),
    #[error("request failed")]
    Request(#[source] reqwest::Error),
    #[error("page could not be parsed")]
    Parse(#[source] lol_html::errors::RewritingError),
    #[error("page has no title")]
    Missing,
}

#[derive(Debug, Clone)]
pub struct TitleFetcher {
    client: Client,
}

impl TitleFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .default_headers(headers)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self { client })
    }

    pub async fn fetch(&self, raw_url: &str) -> Result<String, TitleError> {
        let url = validate_url(raw_url)?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TitleError::NotFound);
        }
        if status == StatusCode::FORBIDDEN {
            return Err(TitleError::Forbidden);
        }
        if status.is_client_error() || status.is_server_error() {
            return Err(TitleError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(classify_request_error)?;
        match extract_title(&body) {
            Ok(Some(title)) => Ok(title),
            Ok(None) => Err(TitleError::Missing),
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "title::fetch",
                    url = %url,
                    error = %err,
                    "failed to parse fetched page"
                );
                Err(TitleError::Parse(err))
            }
        }
    }
}

pub fn validate_url(raw: &str) -> Result<Url, TitleError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TitleError::EmptyUrl);
    }

    let url = Url::parse(trimmed).map_err(|_| TitleError::InvalidUrl)?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(TitleError::InvalidUrl),
    }
}

fn classify_request_error(err: reqwest::Error) -> TitleError {
    if err.is_timeout() {
        TitleError::Timeout
    } else if err.is_connect() {
        TitleError::Connect
    } else {
        TitleError::Request(err)
    }
}

#[derive(Debug, Default)]
struct TitleCandidates {
    titles: Vec<String>,
    og_title: Option<String>,
    headings: Vec<String>,
}

/// Pick the first non-empty `<title>`, then `og:title`, then the first `<h1>`.
pub fn extract_title(html: &str) -> Result<Option<String>, lol_html::errors::RewritingError> {
    let candidates = Rc::new(RefCell::new(TitleCandidates::default()));

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("title", {
                    let candidates = Rc::clone(&candidates);
                    move |_| {
                        candidates.borrow_mut().titles.push(String::new());
                        Ok(())
                    }
                }),
                text!("title", {
                    let candidates = Rc::clone(&candidates);
                    move |chunk| {
                        if let Some(current) = candidates.borrow_mut().titles.last_mut() {
                            current.push_str(chunk.as_str());
                        }
                        Ok(())
                    }
                }),
                element!(r#"meta[property="og:title"]"#, {
                    let candidates = Rc::clone(&candidates);
                    move |el| {
                        let mut candidates = candidates.borrow_mut();
                        if candidates.og_title.is_none() {
                            candidates.og_title = el.get_attribute("content");
                        }
                        Ok(())
                    }
                }),
                element!("h1", {
                    let candidates = Rc::clone(&candidates);
                    move |_| {
                        candidates.borrow_mut().headings.push(String::new());
                        Ok(())
                    }
                }),
                text!("h1", {
                    let candidates = Rc::clone(&candidates);
                    move |chunk| {
                        if let Some(current) = candidates.borrow_mut().headings.last_mut() {
                            current.push_str(chunk.as_str());
                        }
                        Ok(())
                    }
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )?;

    let candidates = candidates.borrow();
    let title = candidates
        .titles
        .iter()
        .map(|title| title.trim())
        .find(|title| !title.is_empty())
        .or_else(|| {
            candidates
                .og_title
                .as_deref()
                .map(str::trim)
                .filter(|title| !title.is_empty())
        })
        .or_else(|| {
            candidates
                .headings
                .first()
                .map(|heading| heading.trim())
                .filter(|heading| !heading.is_empty())
        })
        .map(collapse_whitespace);

    Ok(title)
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
