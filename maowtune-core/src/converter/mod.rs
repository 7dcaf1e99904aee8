// File: maowtune-core/src/converter/mod.rs
//
// Conversion of arbitrary audio input into Opus-in-Ogg (stereo, 48 kHz)
// through an external transcoder process.

pub mod probe;
pub mod stream;

use std::collections::HashMap;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use maowtune_common::models::AudioMetadata;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::Error;
use crate::config::TranscoderConfig;
use crate::sources::SourceStream;

pub use probe::parse_probe_output;
pub use stream::{ConversionFailure, ConversionId, ConvertedStream, FailureWatch};

use stream::FailureSlot;

const OUTPUT_CHUNK_BYTES: usize = 16 * 1024;
const INPUT_CHUNK_BYTES: usize = 16 * 1024;

const CONVERT_ARGS: &[&str] = &[
    "-i", "pipe:0", "-vn", "-hide_banner", "-analyzeduration", "0", "-loglevel", "0", "-acodec",
    "libopus", "-f", "opus", "-ac", "2", "-ar", "48000", "pipe:1",
];
const PROBE_ARGS: &[&str] = &["-i", "pipe:0", "-vn", "-f", "null", "-"];

/// How to invoke the transcoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscoderCommand {
    pub program: String,
    pub convert_args: Vec<String>,
    pub probe_args: Vec<String>,
}

impl TranscoderCommand {
    /// ffmpeg/avconv style invocation.
    pub fn ffmpeg_compatible(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            convert_args: CONVERT_ARGS.iter().map(|s| s.to_string()).collect(),
            probe_args: PROBE_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn custom<I, J, S, T>(program: impl Into<String>, convert_args: I, probe_args: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            program: program.into(),
            convert_args: convert_args.into_iter().map(Into::into).collect(),
            probe_args: probe_args.into_iter().map(Into::into).collect(),
        }
    }
}

/// A started conversion. The engine keeps the process and both pipes; the
/// caller only gets the converted output.
#[derive(Debug)]
pub struct ConversionHandle {
    pub id: ConversionId,
    pub pid: Option<u32>,
    pub output: ConvertedStream,
}

struct ConversionEntry {
    pid: Option<u32>,
    input_task: JoinHandle<()>,
    output_task: JoinHandle<()>,
    kill_tx: Option<oneshot::Sender<()>>,
}

struct EngineInner {
    config: TranscoderConfig,
    command: RwLock<Option<TranscoderCommand>>,
    registry: Mutex<HashMap<ConversionId, ConversionEntry>>,
    next_id: AtomicU64,
}

impl EngineInner {
    fn abort(&self, id: ConversionId) -> bool {
        let Some(mut entry) = self.registry.lock().remove(&id) else {
            trace!("(ConversionEngine) {id} already gone");
            return false;
        };
        entry.input_task.abort();
        entry.output_task.abort();
        if let Some(kill) = entry.kill_tx.take() {
            let _ = kill.send(());
        }
        debug!("(ConversionEngine) {id} aborted (pid {:?})", entry.pid);
        true
    }

    /// Drops the entry of a process that exited on its own.
    fn release(&self, id: ConversionId) -> bool {
        self.registry.lock().remove(&id).is_some()
    }
}

/// Shared handle to the transcoder and its in-flight registry.
#[derive(Clone)]
pub struct ConversionEngine {
    inner: Arc<EngineInner>,
}

impl ConversionEngine {
    /// Engine that still needs `initialize()`.
    pub fn new(config: TranscoderConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                command: RwLock::new(None),
                registry: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Engine with a known command, skipping discovery.
    pub fn with_command(config: TranscoderConfig, command: TranscoderCommand) -> Self {
        let engine = Self::new(config);
        *engine.inner.command.write() = Some(command);
        engine
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.inner.config
    }

    pub fn command(&self) -> Option<TranscoderCommand> {
        self.inner.command.read().clone()
    }

    /// Tries each configured candidate with `-h`; the first one that can be
    /// spawned becomes the transcoder.
    pub async fn initialize(&self) -> Result<TranscoderCommand, Error> {
        for candidate in &self.inner.config.candidates {
            let attempt = Command::new(candidate)
                .arg("-h")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status()
                .await;

            match attempt {
                Ok(_) => {
                    info!("(ConversionEngine) Using transcoder '{candidate}'");
                    let command = TranscoderCommand::ffmpeg_compatible(candidate.as_str());
                    *self.inner.command.write() = Some(command.clone());
                    return Ok(command);
                }
                Err(e) => trace!("(ConversionEngine) '{candidate}' unavailable: {e}"),
            }
        }

        Err(Error::TranscoderNotFound(self.inner.config.candidates.join(", ")))
    }

    /// Starts converting `source`. Returns as soon as the process is
    /// running; must be called from within the tokio runtime.
    pub fn convert(&self, source: SourceStream) -> Result<ConversionHandle, Error> {
        let command = self.command().ok_or(Error::TranscoderNotInitialized)?;

        let mut child = Command::new(&command.program)
            .args(&command.convert_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Conversion("transcoder stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Conversion("transcoder stdout not captured".into()))?;

        let id = ConversionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let capacity = (self.inner.config.output_buffer_bytes / OUTPUT_CHUNK_BYTES).max(1);
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (failure, failure_rx) = FailureSlot::new();
        let (kill_tx, kill_rx) = oneshot::channel();

        {
            // Held until the entry is in place, so a pump that fails right
            // away still finds it.
            let mut registry = self.inner.registry.lock();
            let output_task = tokio::spawn(pump_output(id, stdout, out_tx));
            let input_task = tokio::spawn(pump_input(
                self.inner.clone(),
                id,
                source,
                stdin,
                failure.clone(),
            ));
            tokio::spawn(supervise(self.inner.clone(), id, child, kill_rx));
            registry.insert(
                id,
                ConversionEntry {
                    pid,
                    input_task,
                    output_task,
                    kill_tx: Some(kill_tx),
                },
            );
        }

        debug!("(ConversionEngine) {id} started (pid {pid:?})");
        Ok(ConversionHandle {
            id,
            pid,
            output: ConvertedStream::new(id, out_rx, failure, failure_rx),
        })
    }

    /// Tears a conversion down. Returns false if it was not registered.
    pub fn abort(&self, id: ConversionId) -> bool {
        self.inner.abort(id)
    }

    /// Aborts every in-flight conversion and returns how many there were.
    pub fn shutdown(&self) -> usize {
        let ids: Vec<ConversionId> = self.inner.registry.lock().keys().copied().collect();
        let aborted = ids.into_iter().filter(|id| self.inner.abort(*id)).count();
        if aborted > 0 {
            info!("(ConversionEngine) Shutdown aborted {aborted} conversion(s)");
        }
        aborted
    }

    pub fn in_flight(&self) -> usize {
        self.inner.registry.lock().len()
    }

    pub fn is_in_flight(&self, id: ConversionId) -> bool {
        self.inner.registry.lock().contains_key(&id)
    }

    /// Runs the transcoder in analyze-only mode over `source` and parses
    /// its diagnostics. Not registered, so `abort`/`shutdown` never see it;
    /// it ends when its input does.
    pub async fn probe_metadata(&self, mut source: SourceStream) -> Result<AudioMetadata, Error> {
        let command = self.command().ok_or(Error::TranscoderNotInitialized)?;

        let mut child = Command::new(&command.program)
            .args(&command.probe_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Conversion("probe stdin not captured".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Conversion("probe stderr not captured".into()))?;

        let feed = async move {
            match tokio::io::copy(&mut source, &mut stdin).await {
                Ok(n) => trace!("(ConversionEngine) probe consumed {n} bytes"),
                Err(e) => trace!("(ConversionEngine) probe input ended early: {e}"),
            }
        };
        let collect = async move {
            let mut raw = Vec::new();
            stderr.read_to_end(&mut raw).await.map(|_| raw)
        };

        let ((), diagnostics) = tokio::join!(feed, collect);
        let status = child.wait().await?;
        let text = String::from_utf8_lossy(&diagnostics?).into_owned();

        let meta = parse_probe_output(&text);
        debug!(
            "(ConversionEngine) probe exited with {status}: artist='{}' title='{}' duration={}s",
            meta.artist, meta.title, meta.duration_secs
        );
        Ok(meta)
    }
}

async fn pump_output(
    id: ConversionId,
    mut stdout: ChildStdout,
    tx: mpsc::Sender<io::Result<Bytes>>,
) {
    let mut buf = BytesMut::with_capacity(OUTPUT_CHUNK_BYTES);
    loop {
        buf.reserve(OUTPUT_CHUNK_BYTES);
        match stdout.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(Ok(buf.split().freeze())).await.is_err() {
                    trace!("(ConversionEngine) {id} output reader dropped");
                    break;
                }
            }
            Err(e) => {
                warn!("(ConversionEngine) {id} error reading transcoder output: {e}");
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
}

async fn pump_input(
    inner: Arc<EngineInner>,
    id: ConversionId,
    mut source: SourceStream,
    mut stdin: ChildStdin,
    failure: Arc<FailureSlot>,
) {
    let mut buf = vec![0u8; INPUT_CHUNK_BYTES];
    loop {
        match source.read(&mut buf).await {
            Ok(0) => {
                trace!("(ConversionEngine) {id} source finished, closing transcoder input");
                let _ = stdin.shutdown().await;
                return;
            }
            Ok(n) => {
                if let Err(e) = stdin.write_all(&buf[..n]).await {
                    // The transcoder stopped reading; its exit is handled by
                    // the supervisor.
                    debug!("(ConversionEngine) {id} transcoder input closed: {e}");
                    return;
                }
            }
            Err(e) => {
                let f = ConversionFailure::from_source_error(&e);
                if f.is_truncation() {
                    warn!("(ConversionEngine) {id} source closed early: {e}");
                } else {
                    warn!("(ConversionEngine) {id} source error: {e}");
                }
                failure.fail(f);
                drop(stdin);
                inner.abort(id);
                return;
            }
        }
    }
}

async fn supervise(
    inner: Arc<EngineInner>,
    id: ConversionId,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => debug!("(ConversionEngine) {id} transcoder exited with {status}"),
            Err(e) => warn!("(ConversionEngine) {id} could not wait on transcoder: {e}"),
        },
        _ = kill_rx => {
            if let Err(e) = child.kill().await {
                debug!("(ConversionEngine) {id} kill failed, already exited? {e}");
            }
        }
    }
    if inner.release(id) {
        trace!("(ConversionEngine) {id} released");
    }
}
