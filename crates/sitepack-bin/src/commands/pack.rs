use std::{io::BufWriter, path::PathBuf};

use indicatif::HumanBytes;
use miette::{Context, IntoDiagnostic};
use sitepack_archive::write_manifest;
use sitepack_config::Config;
use tracing::info;

use super::pack_site;

#[derive(Debug, clap::Parser)]
pub struct Opt {
    /// The project directory containing `sitepack.toml`
    #[clap(default_value = ".")]
    dir: PathBuf,

    /// Where to write the archive
    #[clap(short, long)]
    output: PathBuf,

    /// Where to write the manifest, defaults to the archive path with a
    /// `.json` extension
    #[clap(short, long)]
    manifest: Option<PathBuf>,
}

pub fn pack(opt: Opt) -> miette::Result<()> {
    let config = Config::load(&opt.dir)
        .into_diagnostic()
        .wrap_err("failed to load config")?;

    let archive = fs_err::File::create(&opt.output).into_diagnostic()?;
    let (files, archive) =
        pack_site(&opt.dir, &config, archive).wrap_err("failed to collect files")?;
    let size = archive.metadata().into_diagnostic()?.len();

    let manifest_path = opt
        .manifest
        .unwrap_or_else(|| opt.output.with_extension("json"));
    let manifest = BufWriter::new(fs_err::File::create(&manifest_path).into_diagnostic()?);
    write_manifest(manifest, &files).into_diagnostic()?;

    info!(
        "Packed {} files into {} ({})",
        files.len(),
        opt.output.display(),
        HumanBytes(size)
    );
    info!("Manifest written to {}", manifest_path.display());
    Ok(())
}
