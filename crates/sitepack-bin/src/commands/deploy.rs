use std::{fmt::Write, path::PathBuf};

use futures::TryStreamExt;
use indicatif::{HumanBytes, ProgressBar, ProgressState, ProgressStyle};
use miette::{Context, IntoDiagnostic};
use rand::Rng;
use sitepack_api::{Body, Client, SitePatchRequest, StatusCode};
use sitepack_config::{validate_dns_label, Config};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use url::Url;

use crate::global_multi_progress;

use super::{deployed_config, pack_site};

#[derive(Debug, clap::Parser)]
pub struct Opt {
    /// The project directory containing `sitepack.toml`
    #[clap(default_value = ".")]
    dir: PathBuf,

    /// The site to activate the deployment on
    #[clap(long)]
    site: Option<String>,

    /// The name of the deployment, generated if not set
    #[clap(long)]
    name: Option<String>,

    /// The URL of the deployment server
    #[clap(long, env = "SITEPACK_ENDPOINT")]
    endpoint: Url,
}

/// Returns a random id that is a valid DNS label.
fn random_id(len: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

fn bytes_style() -> miette::Result<ProgressStyle> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix:20!} [{elapsed_precise}] [{bar:40!.bright.yellow/dim.white}] {bytes:>8} @ {smoothed_bytes_per_sec:8}")
        .into_diagnostic()?
        .progress_chars("━━╾─")
        .with_key(
            "smoothed_bytes_per_sec",
            |s: &ProgressState, w: &mut dyn Write| match (s.pos(), s.elapsed().as_millis()) {
                (pos, elapsed_ms) if elapsed_ms > 0 => {
                    _ = write!(w, "{}/s", HumanBytes((pos as f64 * 1000_f64 / elapsed_ms as f64) as u64));
                }
                _ => {
                    _ = write!(w, "-");
                }
            },
        ))
}

pub async fn deploy(opt: Opt) -> miette::Result<()> {
    let dir = std::path::absolute(&opt.dir)
        .into_diagnostic()
        .wrap_err("invalid deploy directory")?;

    let name = opt.name.unwrap_or_else(|| random_id(4));
    if !validate_dns_label(&name) {
        miette::bail!("invalid deployment name '{name}': must be a valid DNS label");
    }

    let config = Config::load(&dir)
        .into_diagnostic()
        .wrap_err("failed to load config")?;
    let app_id = config.app.id.as_str();
    if let Some(site) = &opt.site {
        if config.app.resolve_site(site).is_none() {
            miette::bail!("site is not defined: {site}");
        }
    }

    let client = Client::new(opt.endpoint).into_diagnostic()?;

    // The temporary file is removed when it goes out of scope, also on error.
    let tarball = tempfile::Builder::new()
        .prefix(&format!("sitepack-{app_id}-{name}-"))
        .suffix(".tar.zst")
        .tempfile()
        .into_diagnostic()
        .wrap_err("failed to create temp file")?;

    info!("Collecting files...");
    debug!("Tarball: {}", tarball.path().display());
    let (files, tarball) = pack_site(&dir, &config, tarball).wrap_err("failed to collect files")?;
    let size = tarball.as_file().metadata().into_diagnostic()?.len();
    info!(
        "{} files found. Tarball size: {}",
        files.len(),
        HumanBytes(size)
    );

    info!("Setting up deployment '{name}'...");
    match &opt.site {
        Some(site) => {
            let site = client
                .create_site(app_id, site)
                .await
                .into_diagnostic()
                .wrap_err("failed to set up site")?;
            debug!("Site ID: {}", site.id);
            debug!(
                "Last deployment name: {}",
                site.deployment_name.as_deref().unwrap_or("-")
            );
        }
        None => info!("Site not specified; the deployment will not be assigned to a site"),
    }

    let deployed = deployed_config(&config);
    let deployment = client
        .setup_deployment(app_id, &name, &files, &deployed.site)
        .await
        .into_diagnostic()
        .wrap_err("failed to set up deployment")?;
    debug!("Deployment ID: {}", deployment.id);

    let progress_bar = global_multi_progress().add(
        ProgressBar::new(size)
            .with_prefix("Uploading")
            .with_style(bytes_style()?),
    );
    let file = tokio::fs::File::from_std(tarball.reopen().into_diagnostic()?);
    let progress_bar_clone = progress_bar.clone();
    let reader_stream = ReaderStream::new(file).inspect_ok(move |bytes| {
        progress_bar_clone.inc(bytes.len() as u64);
    });
    let deployment = client
        .upload_deployment_tarball(
            app_id,
            &deployment.name,
            Body::wrap_stream(reader_stream),
            size,
        )
        .await
        .into_diagnostic()
        .wrap_err("failed to upload tarball")?;
    progress_bar.finish_and_clear();

    debug!("Configuring app...");
    match client.configure_app(app_id, &config.app).await {
        Ok(_) => {}
        Err(err) if err.status_code() == Some(StatusCode::FORBIDDEN) => {
            warn!("Insufficient permission; skipped configuring the app");
        }
        Err(err) => {
            return Err(err)
                .into_diagnostic()
                .wrap_err("failed to configure app")
        }
    }

    if let Some(site) = &opt.site {
        info!("Activating deployment...");
        client
            .update_site(
                app_id,
                site,
                &SitePatchRequest {
                    deployment_name: Some(deployment.name.clone()),
                },
            )
            .await
            .into_diagnostic()
            .wrap_err("failed to activate deployment")?;
    }

    let deployment = client
        .get_deployment(app_id, &deployment.name)
        .await
        .into_diagnostic()
        .wrap_err("failed to get deployment")?;
    if let Some(url) = &deployment.url {
        info!(
            "You can access the deployment at: {}",
            console::style(url).bold()
        );
    }

    info!("Done!");
    Ok(())
}

#[cfg(test)]
mod test {
    use std::{
        future::IntoFuture,
        path::Path,
        sync::{Arc, Mutex},
    };

    use axum::{
        body::Bytes,
        extract::{Path as UrlPath, State},
        http::StatusCode,
        response::IntoResponse,
        routing::{get, patch, post, put},
        Json, Router,
    };
    use serde_json::{json, Value};
    use sitepack_archive::{read::list_entries, FileEntry};
    use sitepack_config::validate_dns_label;
    use url::Url;

    use super::{deploy, random_id, Opt};

    #[derive(Default)]
    struct Server {
        manifest: Mutex<Vec<FileEntry>>,
        tarball: Mutex<Vec<u8>>,
        activated: Mutex<Option<String>>,
    }

    async fn spawn() -> (Url, Arc<Server>) {
        let server = Arc::new(Server::default());
        let router = Router::new()
            .route(
                "/api/v1/apps/{app}/sites",
                post(|Json(body): Json<Value>| async move {
                    Json(json!({ "id": "s1", "name": body["name"] }))
                }),
            )
            .route(
                "/api/v1/apps/{app}/sites/{site}",
                patch(
                    |UrlPath((_app, site)): UrlPath<(String, String)>,
                     State(server): State<Arc<Server>>,
                     Json(body): Json<Value>| async move {
                        let name = body["deployment_name"].as_str().map(str::to_string);
                        *server.activated.lock().unwrap() = name;
                        Json(json!({ "id": "s1", "name": site, "deployment_name": body["deployment_name"] }))
                    },
                ),
            )
            .route(
                "/api/v1/apps/{app}/deployments",
                post(
                    |UrlPath(app): UrlPath<String>,
                     State(server): State<Arc<Server>>,
                     Json(body): Json<Value>| async move {
                        *server.manifest.lock().unwrap() =
                            serde_json::from_value(body["files"].clone()).unwrap();
                        Json(json!({ "id": "d1", "app_id": app, "name": body["name"] }))
                    },
                ),
            )
            .route(
                "/api/v1/apps/{app}/deployments/{name}/tarball",
                put(
                    |UrlPath((app, name)): UrlPath<(String, String)>,
                     State(server): State<Arc<Server>>,
                     body: Bytes| async move {
                        *server.tarball.lock().unwrap() = body.to_vec();
                        Json(json!({ "id": "d1", "app_id": app, "name": name }))
                    },
                ),
            )
            .route(
                "/api/v1/apps/{app}/deployments/{name}",
                get(|UrlPath((app, name)): UrlPath<(String, String)>| async move {
                    Json(json!({
                        "id": "d1",
                        "app_id": app,
                        "name": name,
                        "url": format!("http://{name}.{app}.localhost"),
                    }))
                }),
            )
            .route(
                "/api/v1/apps/{app}/config",
                put(|| async {
                    (
                        StatusCode::FORBIDDEN,
                        Json(json!({ "error": { "message": "forbidden" } })),
                    )
                        .into_response()
                }),
            )
            .with_state(server.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, router.into_make_service()).into_future());
        (Url::parse(&format!("http://{addr}/")).unwrap(), server)
    }

    fn write_project(dir: &Path) {
        std::fs::write(
            dir.join("sitepack.toml"),
            "[app]\nid = \"blog\"\nsites = [{ name = \"main\" }]\n[site]\npublic = \"dist\"\n",
        )
        .unwrap();
        std::fs::create_dir(dir.join("dist")).unwrap();
        std::fs::write(dir.join("dist/index.html"), "<h1>hello</h1>").unwrap();
    }

    #[tokio::test]
    async fn test_deploy_to_site() {
        let (endpoint, server) = spawn().await;
        let project = tempfile::tempdir().unwrap();
        write_project(project.path());

        deploy(Opt {
            dir: project.path().to_path_buf(),
            site: Some("main".to_string()),
            name: Some("ab12".to_string()),
            endpoint,
        })
        .await
        .unwrap();

        let manifest = server.manifest.lock().unwrap().clone();
        let paths: Vec<_> = manifest.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["/sitepack.json", "/public/index.html"]);

        let tarball = server.tarball.lock().unwrap().clone();
        let entries = list_entries(tarball.as_slice()).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[1..2], manifest[..1]);
        assert_eq!(entries[3], manifest[1]);

        assert_eq!(server.activated.lock().unwrap().as_deref(), Some("ab12"));
    }

    #[tokio::test]
    async fn test_deploy_rejects_bad_input() {
        let (endpoint, server) = spawn().await;
        let project = tempfile::tempdir().unwrap();
        write_project(project.path());

        let err = deploy(Opt {
            dir: project.path().to_path_buf(),
            site: Some("staging".to_string()),
            name: None,
            endpoint: endpoint.clone(),
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "site is not defined: staging");

        let err = deploy(Opt {
            dir: project.path().to_path_buf(),
            site: None,
            name: Some("Not_A_Label".to_string()),
            endpoint,
        })
        .await
        .unwrap_err();
        assert!(err.to_string().starts_with("invalid deployment name"));

        assert!(server.manifest.lock().unwrap().is_empty());
    }

    #[test]
    fn test_random_ids_are_dns_labels() {
        for _ in 0..100 {
            let id = random_id(4);
            assert_eq!(id.len(), 4);
            assert!(validate_dns_label(&id), "{id}");
        }
    }
}
