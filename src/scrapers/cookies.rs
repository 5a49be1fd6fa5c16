//! Session cookies for sites that gate listings behind a login.
//!
//! Cookies come from a Netscape-format cookie file, either on disk or
//! downloaded from a URL. A downloaded file ending in `.enc` is a Fernet token
//! over a gzip-compressed cookie file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::cookie::Jar;
use tracing::{debug, info, warn};

use crate::crypto::{self, SecretKey};

/// Where to load session cookies from.
#[derive(Debug, Clone)]
pub enum CookieSource {
    Local(PathBuf),
    Remote { url: String, key: Option<SecretKey> },
}

/// One line of a Netscape cookie file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetscapeCookie {
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub name: String,
    pub value: String,
}

impl NetscapeCookie {
    fn origin(&self) -> Option<reqwest::Url> {
        let host = self.domain.trim_start_matches('.');
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}{}", scheme, host, self.path).parse().ok()
    }

    fn header_value(&self) -> String {
        let mut cookie = format!("{}={}; Domain={}; Path={}", self.name, self.value, self.domain, self.path);
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Parse Netscape cookie file content. Malformed lines are skipped.
pub fn parse_netscape(content: &str) -> Vec<NetscapeCookie> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            // curl marks HttpOnly cookies with a comment-like prefix.
            let line = line.strip_prefix("#HttpOnly_").unwrap_or(line);
            if line.trim().is_empty() || line.starts_with('#') {
                return None;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 7 {
                debug!("Skipping malformed cookie line");
                return None;
            }
            Some(NetscapeCookie {
                domain: fields[0].to_string(),
                path: fields[2].to_string(),
                secure: fields[3].eq_ignore_ascii_case("TRUE"),
                name: fields[5].to_string(),
                value: fields[6].to_string(),
            })
        })
        .collect()
}

/// Fill a reqwest cookie jar from parsed cookies.
pub fn build_jar(cookies: &[NetscapeCookie]) -> Jar {
    let jar = Jar::default();
    for cookie in cookies {
        match cookie.origin() {
            Some(url) => jar.add_cookie_str(&cookie.header_value(), &url),
            None => warn!("Skipping cookie {} with unusable domain", cookie.name),
        }
    }
    jar
}

/// Load a cookie jar from the configured source.
pub async fn load_cookie_jar(source: &CookieSource) -> Result<Arc<Jar>> {
    let content = match source {
        CookieSource::Local(path) => {
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Could not read cookies from {:?}", path))?
        }
        CookieSource::Remote { url, key } => fetch_remote_cookies(url, key.as_ref()).await?,
    };

    let cookies = parse_netscape(&content);
    info!("Loaded {} cookies", cookies.len());
    Ok(Arc::new(build_jar(&cookies)))
}

async fn fetch_remote_cookies(url: &str, key: Option<&SecretKey>) -> Result<String> {
    info!("Downloading cookies");
    // Strip the URL from errors; it may embed an access token.
    let body = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| e.without_url())
        .context("Could not download cookies")?
        .bytes()
        .await
        .map_err(|e| e.without_url())?;

    let raw = match (url.ends_with(".enc"), key) {
        (true, Some(key)) => {
            debug!("Decrypting cookies");
            let compressed = crypto::decrypt(&body, key).context("Could not decrypt cookies")?;
            crypto::gunzip(&compressed).context("Could not decompress cookies")?
        }
        (true, None) => anyhow::bail!("Cookies file is encrypted but no cookies key was given"),
        (false, _) => body.to_vec(),
    };

    String::from_utf8(raw).context("Cookies file is not valid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore;

    const SAMPLE: &str = "# Netscape HTTP Cookie File\n\
        .nyaa.si\tTRUE\t/\tTRUE\t0\tsession\tabc123\n\
        #HttpOnly_sukebei.nyaa.si\tFALSE\t/\tTRUE\t0\tremember\txyz\n\
        broken line\n";

    #[test]
    fn test_parse_netscape() {
        let cookies = parse_netscape(SAMPLE);
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].name, "session");
        assert_eq!(cookies[0].domain, ".nyaa.si");
        assert_eq!(cookies[1].name, "remember");
        assert_eq!(cookies[1].domain, "sukebei.nyaa.si");
    }

    #[test]
    fn test_jar_sends_cookie_to_domain() {
        let jar = build_jar(&parse_netscape(SAMPLE));
        let url: reqwest::Url = "https://nyaa.si/view/1".parse().unwrap();
        let header = jar.cookies(&url).unwrap();
        assert!(header.to_str().unwrap().contains("session=abc123"));
    }

    #[tokio::test]
    async fn test_load_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        std::fs::write(&path, SAMPLE).unwrap();
        let jar = load_cookie_jar(&CookieSource::Local(path)).await.unwrap();
        let url: reqwest::Url = "https://sukebei.nyaa.si/".parse().unwrap();
        assert!(jar.cookies(&url).is_some());
    }
}
