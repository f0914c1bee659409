use super::{GEOJSON, JSON};
use crate::config::ServerConfig;
use crate::encoder::Link;
use crate::error::{Error, Result};
use axum::http::{HeaderMap, header};
use std::collections::{BTreeMap, HashMap};
use url::Url;

/// Public base URL: `UrlBase` when configured, else derived from `Host`.
///
/// A `Host` that is not a bare authority falls back to the listen address.
pub(crate) fn base_url(server: &ServerConfig, headers: &HeaderMap) -> String {
    if let Some(base) = &server.url_base {
        return base.trim_end_matches('/').to_string();
    }
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|host| format!("http://{host}"))
        .filter(|base| is_authority_only(base))
        .unwrap_or_else(|| format!("http://{}", server.socket_addr()))
}

fn is_authority_only(base: &str) -> bool {
    let authority = base.trim_start_matches("http://");
    !authority.contains(['/', '\\', '?', '#', '@'])
        && Url::parse(base).is_ok_and(|url| url.has_host())
}

/// `base` with `segments` appended, each percent-encoded.
pub(crate) fn url(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url =
        Url::parse(base).map_err(|err| Error::Config(format!("invalid base URL {base}: {err}")))?;
    url.path_segments_mut()
        .map_err(|_| Error::Config(format!("base URL cannot have a path: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub(crate) fn href(base: &str, segments: &[&str]) -> Result<String> {
    Ok(url(base, segments)?.to_string())
}

/// Links of one page of items; `next` is only emitted when the page is full.
#[derive(Clone, Debug)]
pub(crate) struct PageLinks {
    this: Link,
    next: Link,
    collection: Link,
    limit: u64,
}

impl PageLinks {
    pub(crate) fn new(
        base: &str,
        collection_id: &str,
        params: &HashMap<String, String>,
        limit: u64,
        offset: u64,
    ) -> Result<Self> {
        let items = url(base, &["collections", collection_id, "items"])?;
        let sorted: BTreeMap<&str, &str> = params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let page = |offset: u64| {
            let mut url = items.clone();
            {
                let mut query = url.query_pairs_mut();
                for (key, value) in &sorted {
                    if *key != "limit" && *key != "offset" {
                        query.append_pair(key, value);
                    }
                }
                query.append_pair("limit", &limit.to_string());
                query.append_pair("offset", &offset.to_string());
            }
            url.to_string()
        };

        Ok(Self {
            this: Link::new(page(offset), "self", GEOJSON).with_title("This document"),
            next: Link::new(page(offset.saturating_add(limit)), "next", GEOJSON)
                .with_title("Next page"),
            collection: Link::new(href(base, &["collections", collection_id])?, "collection", JSON)
                .with_title("The collection"),
            limit,
        })
    }

    pub(crate) fn links(&self, returned: u64) -> Vec<Link> {
        let mut links = vec![self.this.clone(), self.collection.clone()];
        if self.limit > 0 && returned == self.limit {
            links.push(self.next.clone());
        }
        links
    }
}
