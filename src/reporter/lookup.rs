use anyhow::{Context, Result, bail};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApproxLocation {
    pub city: String,
    pub region: String,
    pub country: String,
    pub country_code: String,
    pub timezone: String,
}

#[derive(Debug, Deserialize)]
struct IpResponse {
    ip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,
    timezone: Option<String>,
    #[serde(default)]
    bogon: bool,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    city: Option<String>,
    region: Option<String>,
    country_name: Option<String>,
    country_code: Option<String>,
    timezone: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

/// Returns `None` on any failure; the caller decides what an absent IP means.
pub async fn fetch_public_ip(client: &Client, url: &str) -> Option<String> {
    match request_public_ip(client, url).await {
        Ok(ip) => Some(ip),
        Err(error) => {
            warn!(error = %format!("{error:#}"), url, "public IP lookup failed");
            None
        }
    }
}

async fn request_public_ip(client: &Client, url: &str) -> Result<String> {
    let body = client
        .get(url)
        .send()
        .await
        .context("IP lookup request failed")?
        .error_for_status()
        .context("IP lookup returned an error status")?
        .json::<IpResponse>()
        .await
        .context("Failed to parse IP lookup response")?;

    body.ip
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .context("IP lookup response had no ip field")
}

/// Tries each provider in order and stops at the first usable answer.
pub async fn fetch_approx_location(client: &Client, urls: &[String]) -> Option<ApproxLocation> {
    for url in urls {
        match request_location(client, url).await {
            Ok(location) => {
                debug!(url = %url, city = %location.city, "location resolved");
                return Some(location);
            }
            Err(error) => {
                warn!(error = %format!("{error:#}"), url = %url, "location provider failed");
            }
        }
    }

    None
}

async fn request_location(client: &Client, url: &str) -> Result<ApproxLocation> {
    let body = client
        .get(url)
        .send()
        .await
        .context("Location request failed")?
        .error_for_status()
        .context("Location provider returned an error status")?
        .json::<Value>()
        .await
        .context("Failed to parse location response")?;

    // ipinfo sends a two-letter `country`; ipapi sends `country_name` and `country_code`.
    if ["country_name", "country_code", "reason"]
        .iter()
        .any(|key| body.get(key).is_some())
    {
        parse_ipapi(body)
    } else {
        parse_ipinfo(body)
    }
}

fn parse_ipinfo(body: Value) -> Result<ApproxLocation> {
    let parsed: IpInfoResponse =
        serde_json::from_value(body).context("Unexpected ipinfo response shape")?;

    if parsed.error.is_some() {
        bail!("ipinfo reported an error");
    }
    if parsed.bogon {
        bail!("ipinfo reported a bogon address");
    }

    let country_code = text_or_placeholder(parsed.country);

    Ok(ApproxLocation {
        city: text_or_placeholder(parsed.city),
        region: text_or_placeholder(parsed.region),
        country: country_display_name(&country_code),
        country_code,
        timezone: text_or_placeholder(parsed.timezone),
    })
}

fn parse_ipapi(body: Value) -> Result<ApproxLocation> {
    let parsed: IpApiResponse =
        serde_json::from_value(body).context("Unexpected ipapi response shape")?;

    // ipapi sends `"error": true` alongside a `reason` when it refuses a lookup.
    if parsed
        .error
        .as_ref()
        .is_some_and(|error| error.as_bool() != Some(false))
    {
        bail!("ipapi reported an error");
    }

    Ok(ApproxLocation {
        city: text_or_placeholder(parsed.city),
        region: text_or_placeholder(parsed.region),
        country: text_or_placeholder(parsed.country_name),
        country_code: text_or_placeholder(parsed.country_code),
        timezone: text_or_placeholder(parsed.timezone),
    })
}

fn text_or_placeholder(value: Option<String>) -> String {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| crate::ledger::PLACEHOLDER.to_string())
}

pub fn country_display_name(code: &str) -> String {
    match code {
        "KR" => "South Korea".to_string(),
        "US" => "United States".to_string(),
        "JP" => "Japan".to_string(),
        "CN" => "China".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{country_display_name, fetch_approx_location, fetch_public_ip};
    use reqwest::Client;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn public_ip_is_read_from_ip_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ip": "203.0.113.7" })))
            .mount(&server)
            .await;

        let ip = fetch_public_ip(&Client::new(), &format!("{}/json", server.uri())).await;
        assert_eq!(ip.as_deref(), Some("203.0.113.7"));
    }

    #[tokio::test]
    async fn public_ip_failure_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let ip = fetch_public_ip(&Client::new(), &format!("{}/json", server.uri())).await;
        assert_eq!(ip, None);
    }

    #[tokio::test]
    async fn ipinfo_country_code_is_expanded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ipinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ip": "203.0.113.7",
                "city": "Seoul",
                "region": "Seoul",
                "country": "KR",
                "timezone": "Asia/Seoul"
            })))
            .mount(&server)
            .await;

        let location = fetch_approx_location(
            &Client::new(),
            &[format!("{}/ipinfo", server.uri())],
        )
        .await
        .expect("location");

        assert_eq!(location.city, "Seoul");
        assert_eq!(location.country, "South Korea");
        assert_eq!(location.country_code, "KR");
        assert_eq!(location.timezone, "Asia/Seoul");
    }

    #[tokio::test]
    async fn falls_through_to_next_provider_on_reported_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ipinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ip": "10.0.0.1",
                "bogon": true
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ipapi"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "city": "Osaka",
                "region": "Osaka",
                "country_name": "Japan",
                "country_code": "JP",
                "timezone": "Asia/Tokyo"
            })))
            .mount(&server)
            .await;

        let location = fetch_approx_location(
            &Client::new(),
            &[
                format!("{}/ipinfo", server.uri()),
                format!("{}/ipapi", server.uri()),
            ],
        )
        .await
        .expect("location from backup");

        assert_eq!(location.city, "Osaka");
        assert_eq!(location.country, "Japan");
    }

    #[tokio::test]
    async fn every_provider_failing_yields_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ipinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>rate limited</html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ipapi"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": true,
                "reason": "RateLimited"
            })))
            .mount(&server)
            .await;

        let location = fetch_approx_location(
            &Client::new(),
            &[
                format!("{}/ipinfo", server.uri()),
                format!("{}/ipapi", server.uri()),
            ],
        )
        .await;

        assert_eq!(location, None);
    }

    #[test]
    fn unknown_country_codes_pass_through() {
        assert_eq!(country_display_name("US"), "United States");
        assert_eq!(country_display_name("DE"), "DE");
    }
}
