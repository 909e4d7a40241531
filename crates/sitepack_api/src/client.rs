use reqwest::{header, Body, RequestBuilder};
use serde::de::DeserializeOwned;
use sitepack_archive::FileEntry;
use sitepack_config::{AppConfig, SiteConfig};
use tracing::debug;
use url::Url;

use crate::{
    models::{
        ConfigureAppRequest, CreateSiteRequest, ErrorBody, SetupDeploymentRequest,
        SitePatchRequest,
    },
    ApiError, App, Deployment, Site,
};

/// A client for a single deployment server.
#[derive(Debug, Clone)]
pub struct Client {
    client: reqwest::Client,
    endpoint: Url,
}

impl Client {
    /// Constructs a client for the server at `endpoint`.
    pub fn new(endpoint: Url) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .user_agent(format!("sitepack/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Self::with_client(client, endpoint)
    }

    /// Constructs a client that sends its requests through `client`.
    pub fn with_client(client: reqwest::Client, endpoint: Url) -> Result<Self, ApiError> {
        if endpoint.cannot_be_a_base() {
            return Err(ApiError::InvalidEndpoint(endpoint.to_string()));
        }
        Ok(Self { client, endpoint })
    }

    /// The URL of the server.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Builds `<endpoint>/api/v1/apps/<segments...>`. Segments are percent
    /// encoded, so names can never escape their position in the path.
    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .extend(["api", "v1", "apps"])
            .extend(segments);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => parsed.into_message(),
            Err(_) if !body.trim().is_empty() => body.trim().to_string(),
            Err(_) => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
        };
        debug!("request failed with {status}: {message}");
        Err(ApiError::Upstream { status, message })
    }

    /// Creates the site `name` of an app. Creating a site that already exists
    /// returns the existing site.
    pub async fn create_site(&self, app_id: &str, name: &str) -> Result<Site, ApiError> {
        let url = self.url(&[app_id, "sites"])?;
        debug!("creating site {app_id}/{name}");
        self.send(self.client.post(url).json(&CreateSiteRequest { name }))
            .await
    }

    /// Applies `patch` to the site `name` of an app.
    pub async fn update_site(
        &self,
        app_id: &str,
        name: &str,
        patch: &SitePatchRequest,
    ) -> Result<Site, ApiError> {
        let url = self.url(&[app_id, "sites", name])?;
        debug!("updating site {app_id}/{name}");
        self.send(self.client.patch(url).json(patch)).await
    }

    /// Registers a new deployment together with its manifest.
    pub async fn setup_deployment(
        &self,
        app_id: &str,
        name: &str,
        files: &[FileEntry],
        site_config: &SiteConfig,
    ) -> Result<Deployment, ApiError> {
        let url = self.url(&[app_id, "deployments"])?;
        debug!(
            "setting up deployment {app_id}/{name} with {} entries",
            files.len()
        );
        let request = SetupDeploymentRequest {
            name,
            files,
            site_config,
        };
        self.send(self.client.post(url).json(&request)).await
    }

    /// Uploads the archive of a deployment. `size` must be the exact length of
    /// the body.
    pub async fn upload_deployment_tarball(
        &self,
        app_id: &str,
        deployment_name: &str,
        tarball: impl Into<Body>,
        size: u64,
    ) -> Result<Deployment, ApiError> {
        let url = self.url(&[app_id, "deployments", deployment_name, "tarball"])?;
        debug!("uploading {size} bytes for deployment {app_id}/{deployment_name}");
        let request = self
            .client
            .put(url)
            .header(header::CONTENT_TYPE, "application/zstd")
            .header(header::CONTENT_LENGTH, size)
            .body(tarball);
        self.send(request).await
    }

    /// Replaces the configuration of an app.
    pub async fn configure_app(&self, app_id: &str, config: &AppConfig) -> Result<App, ApiError> {
        let url = self.url(&[app_id, "config"])?;
        debug!("configuring app {app_id}");
        self.send(self.client.put(url).json(&ConfigureAppRequest { config }))
            .await
    }

    /// Fetches a deployment by name.
    pub async fn get_deployment(&self, app_id: &str, name: &str) -> Result<Deployment, ApiError> {
        let url = self.url(&[app_id, "deployments", name])?;
        self.send(self.client.get(url)).await
    }
}

#[cfg(test)]
mod test {
    use super::Client;
    use url::Url;

    #[test]
    fn test_url_joining() {
        let client = Client::new(Url::parse("https://deploy.example.com").unwrap()).unwrap();
        assert_eq!(
            client.url(&["blog", "sites"]).unwrap().as_str(),
            "https://deploy.example.com/api/v1/apps/blog/sites"
        );

        let client = Client::new(Url::parse("https://example.com/sitepack/").unwrap()).unwrap();
        assert_eq!(
            client.url(&["blog", "deployments", "a b"]).unwrap().as_str(),
            "https://example.com/sitepack/api/v1/apps/blog/deployments/a%20b"
        );
    }

    #[test]
    fn test_rejects_opaque_endpoints() {
        let err = Client::new(Url::parse("mailto:ops@example.com").unwrap()).unwrap_err();
        assert!(matches!(err, crate::ApiError::InvalidEndpoint(_)));
    }
}
