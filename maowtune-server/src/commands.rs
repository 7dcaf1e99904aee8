// File: maowtune-server/src/commands.rs

use std::path::Path;

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use url::Url;

use maowtune_core::converter::{ConversionEngine, TranscoderCommand};
use maowtune_core::sources::SourceFactory;
use maowtune_core::utils::time::{format_size, format_time_span};

fn web_url(input: &str) -> Option<Url> {
    Url::parse(input)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

/// Accepts either an http(s) URL or a local path.
fn source_for(input: &str) -> SourceFactory {
    match web_url(input) {
        Some(url) => SourceFactory::http(reqwest::Client::new(), url),
        None => SourceFactory::file(input),
    }
}

pub fn check(command: &TranscoderCommand) {
    println!("transcoder: {}", command.program);
    println!("convert:    {}", command.convert_args.join(" "));
    println!("probe:      {}", command.probe_args.join(" "));
}

pub async fn probe(engine: &ConversionEngine, input: &str) -> anyhow::Result<()> {
    let meta = engine
        .probe_metadata(source_for(input).open())
        .await
        .with_context(|| format!("probing {input}"))?;

    println!("artist:   {}", meta.artist);
    println!("title:    {}", meta.title);
    println!("duration: {}", format_time_span(meta.duration_secs));
    if let Some(display_title) = meta.display_title() {
        info!("(Probe) {input} => {display_title}");
    }
    Ok(())
}

pub async fn convert(engine: &ConversionEngine, input: &str, output: &Path) -> anyhow::Result<()> {
    let mut handle = engine.convert(source_for(input).open())?;
    let mut file = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("creating {}", output.display()))?;
    info!("(Convert) {} started: {input} -> {}", handle.id, output.display());

    let copied = tokio::select! {
        res = tokio::io::copy(&mut handle.output, &mut file) => res,
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("Error waiting for Ctrl-C: {e}");
            }
            info!("Ctrl-C detected; aborting conversions ...");
            let aborted = engine.shutdown();
            warn!("(Convert) aborted {aborted} conversion(s), {} left incomplete", output.display());
            return Ok(());
        }
    };

    let written = copied.with_context(|| format!("converting {input}"))?;
    file.flush().await?;
    info!("(Convert) {} finished, wrote {}", handle.id, format_size(written));
    Ok(())
}
