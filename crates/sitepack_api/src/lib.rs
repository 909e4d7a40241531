//! A typed client for the HTTP API of a sitepack deployment server.
//!
//! Every endpoint lives below `<endpoint>/api/v1/apps/<app id>/`. Requests and
//! responses are JSON except for the deployment tarball, which is uploaded as a
//! raw `application/zstd` body.

mod client;
mod models;

pub use client::Client;
pub use models::{
    App, ConfigureAppRequest, CreateSiteRequest, Deployment, SetupDeploymentRequest, Site,
    SitePatchRequest,
};
pub use reqwest::{Body, StatusCode};

/// An error returned by [`Client`].
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The endpoint URL cannot have paths appended to it.
    #[error("'{0}' cannot be used as an API endpoint")]
    InvalidEndpoint(String),

    /// The request could not be sent or the response could not be read.
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("the server responded with {status}: {message}")]
    Upstream {
        /// The status code of the response.
        status: StatusCode,
        /// The error message reported by the server.
        message: String,
    },
}

impl ApiError {
    /// Returns the status code if the server rejected the request.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            ApiError::Upstream { status, .. } => Some(*status),
            ApiError::Request(err) => err.status(),
            ApiError::InvalidEndpoint(_) => None,
        }
    }
}
