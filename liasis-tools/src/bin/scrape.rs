//! Standalone tracker-scrape probe: given one or more info-hashes, issues a
//! BEP-48 scrape request against a tracker's announce URL and prints the
//! seeder/leecher/downloaded counts it reports. Generalizes the teacher's
//! HTTP/bencode announce client from `announce` to `scrape`, using the same
//! URL-substitution convention (the last `announce` path segment becomes
//! `scrape`).

use std::collections::BTreeMap;
use std::fmt;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, Url};
use serde::Deserialize;
use structopt::StructOpt;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(StructOpt, Debug)]
#[structopt(name = "liasis-scrape", about = "Issue a BEP-48 scrape request against a tracker")]
struct Args {
    /// The tracker's announce URL, e.g. `http://tracker.example.com:6969/announce`.
    #[structopt(short, long)]
    tracker: String,

    /// One or more 40-character hex info-hashes to scrape.
    #[structopt(required = true)]
    info_hashes: Vec<String>,
}

/// Errors that may occur while scraping a tracker.
#[derive(Debug)]
#[non_exhaustive]
enum ScrapeError {
    /// The announce URL has no final path segment to rewrite into `scrape`.
    NotScrapable,
    Hex(hex::FromHexError),
    Bencode(serde_bencode::Error),
    Http(reqwest::Error),
}

impl From<hex::FromHexError> for ScrapeError {
    fn from(e: hex::FromHexError) -> Self {
        ScrapeError::Hex(e)
    }
}

impl From<serde_bencode::Error> for ScrapeError {
    fn from(e: serde_bencode::Error) -> Self {
        ScrapeError::Bencode(e)
    }
}

impl From<reqwest::Error> for ScrapeError {
    fn from(e: reqwest::Error) -> Self {
        ScrapeError::Http(e)
    }
}

impl fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrapeError::NotScrapable => write!(f, "announce URL has no final 'announce' path segment to rewrite"),
            ScrapeError::Hex(e) => write!(f, "invalid info-hash: {e}"),
            ScrapeError::Bencode(e) => write!(f, "bencode error: {e}"),
            ScrapeError::Http(e) => write!(f, "HTTP error: {e}"),
        }
    }
}

impl std::error::Error for ScrapeError {}

/// One tracker's scrape reply for a single info-hash.
#[derive(Debug, Deserialize, PartialEq)]
struct FileStats {
    #[serde(rename = "complete")]
    seeder_count: u64,
    #[serde(rename = "incomplete")]
    leecher_count: u64,
    #[serde(rename = "downloaded")]
    downloaded_count: u64,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    files: BTreeMap<serde_bytes::ByteBuf, FileStats>,
    #[serde(default, rename = "failure reason")]
    failure_reason: Option<String>,
}

/// Rewrites an announce URL's final path segment `announce` into `scrape`,
/// per BEP-48. Trackers whose announce URL doesn't end in `announce` don't
/// support scrape this way.
fn scrape_url(announce: &Url) -> std::result::Result<Url, ScrapeError> {
    let mut url = announce.clone();
    let last_ok = {
        let mut segments = url.path_segments().ok_or(ScrapeError::NotScrapable)?;
        segments.next_back() == Some("announce")
    };
    if !last_ok {
        return Err(ScrapeError::NotScrapable);
    }
    {
        let mut segments = url.path_segments_mut().map_err(|_| ScrapeError::NotScrapable)?;
        segments.pop();
        segments.push("scrape");
    }
    Ok(url)
}

const URL_ENCODE_RESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

async fn scrape(tracker: &str, info_hashes: &[[u8; 20]]) -> std::result::Result<ScrapeResponse, ScrapeError> {
    let announce = Url::parse(tracker).map_err(|_| ScrapeError::NotScrapable)?;
    let mut url = scrape_url(&announce)?;
    {
        let mut q = url.query_pairs_mut();
        for hash in info_hashes {
            q.append_pair(
                "info_hash",
                &percent_encoding::percent_encode(hash, URL_ENCODE_RESERVED).to_string(),
            );
        }
    }

    let client = Client::new();
    let bytes = client.get(url).send().await?.error_for_status()?.bytes().await?;
    let resp: ScrapeResponse = serde_bencode::from_bytes(&bytes)?;
    Ok(resp)
}

fn parse_info_hash(hex_str: &str) -> std::result::Result<[u8; 20], ScrapeError> {
    let bytes = hex::decode(hex_str)?;
    bytes.try_into().map_err(|_| ScrapeError::NotScrapable)
}

#[tokio::main]
async fn main() -> Result<()> {
    flexi_logger::Logger::try_with_env_or_str("info")?.start()?;

    let args = Args::from_args();
    let info_hashes: std::result::Result<Vec<[u8; 20]>, ScrapeError> =
        args.info_hashes.iter().map(|s| parse_info_hash(s)).collect();
    let info_hashes = info_hashes?;

    log::info!("scraping {} ({} info-hash(es))", args.tracker, info_hashes.len());

    let resp = scrape(&args.tracker, &info_hashes).await?;
    if let Some(reason) = resp.failure_reason {
        println!("tracker refused scrape: {reason}");
        std::process::exit(1);
    }

    for (hash_bytes, stats) in &resp.files {
        println!(
            "{}: seeders={} leechers={} downloaded={}{}",
            hex::encode(hash_bytes.as_slice()),
            stats.seeder_count,
            stats.leecher_count,
            stats.downloaded_count,
            stats.name.as_deref().map(|n| format!(" name={n}")).unwrap_or_default(),
        );
    }
    if resp.files.is_empty() {
        println!("tracker returned no entries for the requested info-hash(es)");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_announce_to_scrape() {
        let url = Url::parse("http://tracker.example.com:6969/announce").unwrap();
        let scraped = scrape_url(&url).unwrap();
        assert_eq!(scraped.as_str(), "http://tracker.example.com:6969/scrape");
    }

    #[test]
    fn preserves_path_prefix() {
        let url = Url::parse("http://tracker.example.com/a/b/announce").unwrap();
        let scraped = scrape_url(&url).unwrap();
        assert_eq!(scraped.as_str(), "http://tracker.example.com/a/b/scrape");
    }

    #[test]
    fn rejects_non_announce_suffix() {
        let url = Url::parse("http://tracker.example.com/tracker").unwrap();
        assert!(scrape_url(&url).is_err());
    }

    #[test]
    fn parses_valid_info_hash() {
        let hash = parse_info_hash("0102030405060708090a0b0c0d0e0f1011121314").unwrap();
        assert_eq!(hash[0], 0x01);
        assert_eq!(hash[19], 0x14);
    }

    #[test]
    fn rejects_short_info_hash() {
        assert!(parse_info_hash("0102").is_err());
    }
}
