/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The production [`RemoteStore`]: a blocking client for an OAuth cloud-disk
//! REST API.
//!
//! Endpoints, relative to the base URL:
//!   - `GET  resources?path=<p>` — metadata; `_embedded.items` when listing
//!   - `GET  resources/download?path=<p>` — returns an `href` to fetch
//!   - `GET  resources/upload?path=<p>&overwrite=<b>` — returns an `href`
//!     accepting a `PUT` of the raw bytes
//!   - `POST resources/move?from=<src>&path=<dst>&overwrite=<b>`
//!   - `PUT  resources?path=<p>` — create directory
//!
//! Every request carries `Authorization: OAuth <token>`; the token is read
//! from shared state per request so a refreshed token takes effect without
//! restarting the worker. The agent-wide timeout is the per-operation
//! deadline; expiry surfaces as a transport error and maps to `Transient`.

use crate::error::Result;
use crate::remote::{RemoteError, RemoteFile, RemoteResult, RemoteStore};
use crate::types::Timestamp;
use parking_lot::RwLock;
use serde_derive::Deserialize;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://cloud-api.yandex.net/v1/disk";

/// Listing page size; the engine never depends on ordering, only coverage.
const LIST_PAGE_LIMIT: usize = 100;

/// Cap on how much of an error body we quote back in messages.
const ERROR_BODY_LIMIT: usize = 256;

pub struct HttpRemoteStore {
    agent: ureq::Agent,
    base_url: Url,
    access_token: Arc<RwLock<String>>,
}

#[derive(Deserialize)]
struct ResourceMeta {
    name: String,
    path: String,
    modified: Option<String>,
    #[serde(rename = "_embedded")]
    embedded: Option<Embedded>,
}

#[derive(Deserialize)]
struct Embedded {
    items: Vec<ResourceMeta>,
    total: usize,
}

#[derive(Deserialize)]
struct Href {
    href: String,
}

impl HttpRemoteStore {
    pub fn new(
        base_url: &str,
        access_token: Arc<RwLock<String>>,
        deadline: Duration,
    ) -> Result<Self> {
        let agent = ureq::AgentBuilder::new().timeout(deadline).build();
        Ok(Self {
            agent,
            base_url: Url::parse(base_url)?,
            access_token,
        })
    }

    fn auth_header(&self) -> String {
        format!("OAuth {}", self.access_token.read())
    }

    fn endpoint(&self, suffix: &str, query: &[(&str, &str)]) -> RemoteResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Other(format!("base URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(suffix.split('/'));
        url.query_pairs_mut().extend_pairs(query);
        Ok(url)
    }

    fn call(&self, method: &str, url: &Url) -> RemoteResult<ureq::Response> {
        self.agent
            .request_url(method, url)
            .set("Authorization", &self.auth_header())
            .call()
            .map_err(map_error)
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &Url) -> RemoteResult<T> {
        let resp = self.call("GET", url)?;
        let body = resp
            .into_string()
            .map_err(|e| RemoteError::Transient(format!("reading response body: {}", e)))?;
        serde_json::from_str(&body)
            .map_err(|e| RemoteError::Other(format!("unexpected response shape: {}", e)))
    }

    fn meta_to_file(&self, meta: ResourceMeta) -> RemoteResult<RemoteFile> {
        let modified = match meta.modified.as_deref() {
            Some(s) => parse_modified(s)?,
            None => Timestamp(0),
        };
        Ok(RemoteFile {
            name: meta.name,
            path: meta.path,
            modified,
        })
    }
}

impl RemoteStore for HttpRemoteStore {
    fn head(&self, path: &str) -> RemoteResult<RemoteFile> {
        let url = self.endpoint(
            "resources",
            &[("path", path), ("fields", "name,path,modified")],
        )?;
        let meta: ResourceMeta = self.get_json(&url)?;
        self.meta_to_file(meta)
    }

    fn get(&self, path: &str) -> RemoteResult<Vec<u8>> {
        let url = self.endpoint("resources/download", &[("path", path)])?;
        let href: Href = self.get_json(&url)?;
        let target = Url::parse(&href.href)
            .map_err(|e| RemoteError::Other(format!("bad download href: {}", e)))?;
        let resp = self.call("GET", &target)?;
        let mut bytes = Vec::new();
        resp.into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| RemoteError::Transient(format!("reading download body: {}", e)))?;
        Ok(bytes)
    }

    fn put(&self, path: &str, bytes: &[u8], overwrite: bool) -> RemoteResult<()> {
        let url = self.endpoint(
            "resources/upload",
            &[("path", path), ("overwrite", bool_str(overwrite))],
        )?;
        let href: Href = self.get_json(&url)?;
        let target = Url::parse(&href.href)
            .map_err(|e| RemoteError::Other(format!("bad upload href: {}", e)))?;
        self.agent
            .request_url("PUT", &target)
            .set("Authorization", &self.auth_header())
            .send_bytes(bytes)
            .map_err(map_error)?;
        Ok(())
    }

    fn mv(&self, src: &str, dst: &str, overwrite: bool) -> RemoteResult<()> {
        let url = self.endpoint(
            "resources/move",
            &[
                ("from", src),
                ("path", dst),
                ("overwrite", bool_str(overwrite)),
            ],
        )?;
        self.call("POST", &url)?;
        Ok(())
    }

    fn mkdir(&self, path: &str) -> RemoteResult<()> {
        let url = self.endpoint("resources", &[("path", path)])?;
        match self.call("PUT", &url) {
            Ok(_) => Ok(()),
            // Already exists, or the (flat) parent is missing; both fine.
            Err(RemoteError::NotFound) => Ok(()),
            Err(RemoteError::Other(msg)) if msg.starts_with("HTTP 409") => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn ls(&self, path: &str, on_entry: &mut dyn FnMut(RemoteFile)) -> RemoteResult<()> {
        let mut offset = 0usize;
        let limit_str = LIST_PAGE_LIMIT.to_string();
        loop {
            let offset_str = offset.to_string();
            let url = self.endpoint(
                "resources",
                &[
                    ("path", path),
                    ("limit", &limit_str),
                    ("offset", &offset_str),
                ],
            )?;
            let meta: ResourceMeta = self.get_json(&url)?;
            let embedded = match meta.embedded {
                Some(e) => e,
                // Not a directory; nothing to stream.
                None => return Ok(()),
            };
            let count = embedded.items.len();
            for item in embedded.items {
                on_entry(self.meta_to_file(item)?);
            }
            offset += count;
            if count == 0 || offset >= embedded.total {
                return Ok(());
            }
        }
    }
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

fn parse_modified(s: &str) -> RemoteResult<Timestamp> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| Timestamp(dt.timestamp()))
        .map_err(|e| RemoteError::Other(format!("bad modified time {:?}: {}", s, e)))
}

fn map_error(err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(code, resp) => {
            let body = resp.into_string().unwrap_or_default();
            error_for_status(code, &body)
        }
        ureq::Error::Transport(t) => RemoteError::Transient(t.to_string()),
    }
}

fn error_for_status(code: u16, body: &str) -> RemoteError {
    match code {
        401 | 403 => RemoteError::Unauthorized,
        404 => RemoteError::NotFound,
        408 | 429 | 500..=599 => RemoteError::Transient(format!("HTTP {}", code)),
        _ => {
            let mut body = body.to_string();
            body.truncate(ERROR_BODY_LIMIT);
            RemoteError::Other(format!("HTTP {}: {}", code, body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_for_status() {
        assert!(matches!(error_for_status(401, ""), RemoteError::Unauthorized));
        assert!(matches!(error_for_status(403, ""), RemoteError::Unauthorized));
        assert!(matches!(error_for_status(404, ""), RemoteError::NotFound));
        assert!(matches!(error_for_status(429, ""), RemoteError::Transient(_)));
        assert!(matches!(error_for_status(503, ""), RemoteError::Transient(_)));
        assert!(matches!(error_for_status(400, "nope"), RemoteError::Other(_)));
    }

    #[test]
    fn test_parse_modified() {
        assert_eq!(
            parse_modified("2023-11-14T22:13:20+00:00").unwrap(),
            Timestamp(1_700_000_000)
        );
        assert_eq!(
            parse_modified("2023-11-15T01:13:20+03:00").unwrap(),
            Timestamp(1_700_000_000)
        );
        assert!(parse_modified("yesterday").is_err());
    }

    #[test]
    fn test_endpoint_building() {
        let client = HttpRemoteStore::new(
            DEFAULT_BASE_URL,
            Arc::new(RwLock::new("token".into())),
            Duration::from_secs(30),
        )
        .unwrap();
        let url = client
            .endpoint("resources", &[("path", "app:/kdata_database/u-1")])
            .unwrap();
        assert_eq!(url.path(), "/v1/disk/resources");
        assert!(url
            .query()
            .unwrap()
            .contains("path=app%3A%2Fkdata_database%2Fu-1"));
        let url = client.endpoint("resources/download", &[]).unwrap();
        assert_eq!(url.path(), "/v1/disk/resources/download");
    }

    #[test]
    fn test_token_replacement_is_visible() {
        let token = Arc::new(RwLock::new("old".to_string()));
        let client = HttpRemoteStore::new(
            DEFAULT_BASE_URL,
            Arc::clone(&token),
            Duration::from_secs(30),
        )
        .unwrap();
        assert_eq!(client.auth_header(), "OAuth old");
        *token.write() = "new".to_string();
        assert_eq!(client.auth_header(), "OAuth new");
    }
}
