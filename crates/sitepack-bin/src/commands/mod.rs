pub mod deploy;
pub mod pack;

use std::{io::Write, path::Path};

use chrono::Utc;
use miette::{Context, IntoDiagnostic};
use sitepack_archive::{Collector, Manifest};
use sitepack_config::{Config, CONFIG_NAME};

/// The directory the published files are mounted at inside an archive.
const PUBLIC_MOUNT: &str = "/public";

/// Returns the configuration as it is shipped with a deployment: the public
/// directory is relative to the archive instead of the project.
pub(crate) fn deployed_config(config: &Config) -> Config {
    let mut deployed = config.clone();
    deployed.site.public = PUBLIC_MOUNT.trim_start_matches('/').to_string();
    deployed
}

/// Packs the site in `dir` into `sink`.
///
/// The archive starts with the root directory and the deployed configuration
/// document, followed by the public directory of the project mounted at
/// `/public`.
pub(crate) fn pack_site<W: Write>(
    dir: &Path,
    config: &Config,
    sink: W,
) -> miette::Result<(Manifest, W)> {
    let public_dir = dir.join(&config.site.public);
    let document = serde_json::to_vec_pretty(&deployed_config(config)).into_diagnostic()?;

    let mut collector =
        Collector::open_with_options(Utc::now(), sink, config.deploy.collector_options())
            .into_diagnostic()?;
    collector.add_directory("/").into_diagnostic()?;
    collector
        .add_file(&format!("/{CONFIG_NAME}.json"), &document)
        .into_diagnostic()?;
    collector.add_directory(PUBLIC_MOUNT).into_diagnostic()?;
    collector
        .collect(&public_dir, PUBLIC_MOUNT)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to collect files from {}", public_dir.display()))?;

    let files = collector.files().to_vec();
    let sink = collector.into_sink().into_diagnostic()?;
    Ok((files, sink))
}
