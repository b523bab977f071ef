use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

const REVERSE_URL: &str = "https://nominatim.openstreetmap.org/reverse";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

fn client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(reqwest::Client::new)
}

/// Best-effort reverse geocoding. Every failure maps to `None` so a
/// location lookup can never fail or stall a query.
pub async fn reverse(lat: f64, lon: f64) -> Option<String> {
    let response = client()
        .get(REVERSE_URL)
        .query(&[
            ("lat", lat.to_string()),
            ("lon", lon.to_string()),
            ("format", "jsonv2".to_string()),
        ])
        .header("User-Agent", "rag-backend")
        .timeout(LOOKUP_TIMEOUT)
        .send()
        .await
        .map_err(|e| warn!(error = %e, "Reverse geocoding request failed"))
        .ok()?;

    if !response.status().is_success() {
        warn!(status = %response.status(), "Reverse geocoding returned an error");
        return None;
    }

    let value: serde_json::Value = response.json().await.ok()?;
    value["display_name"].as_str().map(|s| s.to_string())
}
