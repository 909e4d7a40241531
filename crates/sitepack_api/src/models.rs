use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitepack_archive::FileEntry;
use sitepack_config::{AppConfig, SiteConfig};

#[derive(Debug, Clone, Serialize)]
pub struct SetupDeploymentRequest<'a> {
    pub name: &'a str,
    pub files: &'a [FileEntry],
    pub site_config: &'a SiteConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSiteRequest<'a> {
    pub name: &'a str,
}

/// A partial update of a site. Fields that are `None` are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SitePatchRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigureAppRequest<'a> {
    pub config: &'a AppConfig,
}

/// A deployment as known by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub app_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Set once the tarball of the deployment has been received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Where the deployment can be previewed, if the server exposes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub name: String,
    /// The name of the active deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub id: String,
}

/// The body of an error response.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ErrorBody {
    Nested { error: ErrorMessage },
    Flat { error: String },
    Message { message: String },
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorMessage {
    message: String,
}

impl ErrorBody {
    pub(crate) fn into_message(self) -> String {
        match self {
            ErrorBody::Nested { error } => error.message,
            ErrorBody::Flat { error } => error,
            ErrorBody::Message { message } => message,
        }
    }
}
