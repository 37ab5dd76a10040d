use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, de::DeserializeOwned};

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    access_key: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub error: Option<String>,
}

impl ApiClient {
    pub fn new(server: &str, access_key: &str) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let base_url = Url::parse(server.trim_end_matches('/'))
            .map_err(|e| anyhow::anyhow!("Invalid server URL '{}': {}", server, e))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Invalid server URL '{}'", server);
        }
        Ok(Self {
            client,
            base_url,
            access_key: access_key.to_string(),
        })
    }

    /// Builds `<server>/api/v1/<segments...>`, percent-encoding each segment
    /// so branch names containing `/` stay a single path segment.
    pub fn url(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| anyhow::anyhow!("Invalid server URL '{}'", self.base_url))?;
            path.pop_if_empty().extend(["api", "v1"]).extend(segments);
        }
        Ok(url)
    }

    /// GET that maps `204 No Content` to `None`.
    pub fn get_optional<T: DeserializeOwned>(&self, url: Url) -> anyhow::Result<Option<T>> {
        let resp = self.send(self.client.get(url))?;
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        self.handle_response(resp).map(Some)
    }

    pub fn get<T: DeserializeOwned>(&self, url: Url) -> anyhow::Result<T> {
        let resp = self.send(self.client.get(url))?;
        self.handle_response(resp)
    }

    pub fn post<T: DeserializeOwned>(&self, url: Url) -> anyhow::Result<T> {
        let resp = self.send(self.client.post(url))?;
        self.handle_response(resp)
    }

    fn send(&self, request: RequestBuilder) -> anyhow::Result<Response> {
        Ok(request.bearer_auth(&self.access_key).send()?)
    }

    fn handle_response<T: DeserializeOwned>(&self, resp: Response) -> anyhow::Result<T> {
        let status = resp.status();
        if status.is_success() {
            let api_resp: ApiResponse<T> = resp.json()?;
            api_resp
                .data
                .ok_or_else(|| anyhow::anyhow!("Server returned an empty response"))
        } else {
            let message = resp
                .json::<ApiResponse<serde_json::Value>>()
                .ok()
                .and_then(|r| r.error)
                .unwrap_or_else(|| "Server error (no details provided)".into());
            Err(anyhow::anyhow!("{} ({})", message, status))
        }
    }
}
