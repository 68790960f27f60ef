//! Client for nodejs-pool deployments (supportxmr, moneroocean, ...).

use super::{PoolClient, PoolTotals};
use crate::contribution::Amount;
use crate::error::{MinerHatError, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;

/// Connection timeout for pool requests.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Queries `GET {base}/miner/{wallet}/stats`.
pub struct NodeJsPoolClient {
    base_url: String,
    coin_decimals: u32,
    client: Client,
}

impl NodeJsPoolClient {
    pub fn new(base_url: impl Into<String>, coin_decimals: u32, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url)
            .map_err(|e| MinerHatError::Config(format!("invalid pool API URL '{}': {}", base_url, e)))?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(timeout))
            .timeout(timeout)
            .user_agent(concat!("minerhat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MinerHatError::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            coin_decimals,
            client,
        })
    }

    pub fn stats_url(&self, wallet: &str) -> String {
        format!(
            "{}/miner/{}/stats",
            self.base_url,
            urlencoding::encode(wallet)
        )
    }
}

impl PoolClient for NodeJsPoolClient {
    fn fetch(&self, wallet: &str) -> Result<PoolTotals> {
        let url = self.stats_url(wallet);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| MinerHatError::PoolUnavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(map_status_error(status));
        }

        let body = response
            .text()
            .map_err(|e| MinerHatError::PoolUnavailable(format!("cannot read response: {}", e)))?;
        parse_stats(&body, self.coin_decimals)
    }
}

fn map_status_error(status: StatusCode) -> MinerHatError {
    match status {
        StatusCode::NOT_FOUND => {
            MinerHatError::PoolUnavailable("wallet unknown to the pool".to_string())
        }
        StatusCode::TOO_MANY_REQUESTS => {
            MinerHatError::PoolUnavailable("rate limited by the pool".to_string())
        }
        _ => MinerHatError::PoolUnavailable(format!("HTTP error: {}", status)),
    }
}

/// Parse a nodejs-pool `/miner/{wallet}/stats` body.
///
/// `amtPaid` and `amtDue` are in atomic units.
pub fn parse_stats(body: &str, coin_decimals: u32) -> Result<PoolTotals> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| MinerHatError::PoolUnavailable(format!("malformed pool response: {}", e)))?;

    let paid = atomic_field(&value, "amtPaid")?;
    let unpaid = atomic_field(&value, "amtDue")?;

    Ok(PoolTotals {
        paid: Amount::from_atomic(paid, coin_decimals)
            .map_err(|e| MinerHatError::PoolUnavailable(e.to_string()))?,
        unpaid: Amount::from_atomic(unpaid, coin_decimals)
            .map_err(|e| MinerHatError::PoolUnavailable(e.to_string()))?,
    })
}

fn atomic_field(value: &Value, field: &str) -> Result<u64> {
    let raw = value.get(field).ok_or_else(|| {
        MinerHatError::PoolUnavailable(format!("malformed pool response: missing {}", field))
    })?;
    if let Some(n) = raw.as_u64() {
        return Ok(n);
    }
    match raw.as_f64() {
        Some(f) if f.is_finite() && f >= 0.0 && f < u64::MAX as f64 => Ok(f.round() as u64),
        _ => Err(MinerHatError::PoolUnavailable(format!(
            "malformed pool response: {} is {}",
            field, raw
        ))),
    }
}

mod urlencoding {
    pub fn encode(s: &str) -> String {
        let mut result = String::with_capacity(s.len() * 3);
        for c in s.chars() {
            match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' => result.push(c),
                _ => {
                    let mut buf = [0u8; 4];
                    for b in c.encode_utf8(&mut buf).as_bytes() {
                        result.push_str(&format!("%{:02X}", b));
                    }
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Serve one canned HTTP response on a random port.
    fn serve_once(status: &'static str, body: &'static str) -> (String, std::thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let n = stream.read(&mut buf).unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            request
        });
        (format!("http://{}", addr), handle)
    }

    #[test]
    fn test_parse_stats() {
        let totals = parse_stats(
            r#"{"hash":1200,"identifier":"global","lastHash":1700000000,"totalHashes":5,"validShares":3,"invalidShares":0,"amtPaid":1500000000000,"amtDue":250000000,"txnCount":1}"#,
            12,
        )
        .unwrap();
        assert_eq!(totals.paid, "1.5".parse().unwrap());
        assert_eq!(totals.unpaid, "0.00025".parse().unwrap());
    }

    #[test]
    fn test_parse_stats_float_fields() {
        let totals = parse_stats(r#"{"amtPaid":0,"amtDue":1000.0}"#, 12).unwrap();
        assert_eq!(totals.paid, Amount::ZERO);
        assert_eq!(totals.unpaid, Amount::from_units(1000));
    }

    #[test]
    fn test_parse_stats_malformed() {
        assert!(matches!(
            parse_stats("<html>", 12),
            Err(MinerHatError::PoolUnavailable(_))
        ));
        assert!(parse_stats(r#"{"amtPaid":1}"#, 12).is_err());
        assert!(parse_stats(r#"{"amtPaid":-1,"amtDue":0}"#, 12).is_err());
        assert!(parse_stats(r#"{"amtPaid":"lots","amtDue":0}"#, 12).is_err());
    }

    #[test]
    fn test_new_rejects_invalid_url() {
        let err = NodeJsPoolClient::new("not a url", 12, Duration::from_secs(5))
            .err()
            .unwrap();
        assert!(matches!(err, MinerHatError::Config(_)));
        assert!(err.to_string().contains("not a url"));
    }

    #[test]
    fn test_urlencoding() {
        assert_eq!(urlencoding::encode("44AbC"), "44AbC");
        assert_eq!(urlencoding::encode("a b/c"), "a%20b%2Fc");
    }

    #[test]
    fn test_fetch_from_server() {
        let (base, server) = serve_once("200 OK", r#"{"amtPaid":2000000000000,"amtDue":0}"#);
        let client = NodeJsPoolClient::new(format!("{}/", base), 12, Duration::from_secs(5)).unwrap();
        let totals = client.fetch("44wallet").unwrap();
        assert_eq!(totals.paid, Amount::from_whole(2));

        let request = server.join().unwrap();
        assert!(request.starts_with("GET /miner/44wallet/stats"));
    }

    #[test]
    fn test_fetch_http_error() {
        let (base, server) = serve_once("404 Not Found", "{}");
        let client = NodeJsPoolClient::new(base, 12, Duration::from_secs(5)).unwrap();
        let err = client.fetch("unknown").unwrap_err();
        assert!(err.to_string().contains("unknown to the pool"));
        server.join().unwrap();
    }

    #[test]
    fn test_fetch_connection_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = NodeJsPoolClient::new(
            format!("http://127.0.0.1:{}", port),
            12,
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(matches!(
            client.fetch("w"),
            Err(MinerHatError::PoolUnavailable(_))
        ));
    }
}
