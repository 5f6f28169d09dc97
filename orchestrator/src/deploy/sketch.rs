//! Microcontroller sketch toolchain

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tempfile::TempDir;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::deploy::process;
use crate::deploy::stream::LineSink;
use crate::errors::{OrchestratorError, Result};
use crate::filesys::dir::Dir;

const EMPTY_SKETCH: &str = "void setup() {}\nvoid loop() {}\n";

/// A board able to receive a sketch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    pub name: String,
    pub fqbn: String,
    pub port: Option<String>,
}

#[async_trait]
pub trait SketchToolchain: Send + Sync {
    /// First connected Arduino board
    async fn detect_board(&self, cancel: &CancellationToken) -> Result<Board>;

    async fn compile(
        &self,
        sketch: &Path,
        build_dir: &Path,
        fqbn: &str,
        sink: &dyn LineSink,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn upload(
        &self,
        sketch: &Path,
        build_dir: &Path,
        fqbn: &str,
        port: Option<&str>,
        sink: &dyn LineSink,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Board selection; anything left unset is discovered
#[derive(Debug, Clone, Default)]
pub struct SketchTarget {
    pub fqbn: Option<String>,
    pub port: Option<String>,
}

/// Compile `sketch` into `build_dir` and flash it
pub async fn compile_and_upload(
    toolchain: &dyn SketchToolchain,
    target: &SketchTarget,
    sketch: &Path,
    build_dir: &Path,
    sink: &dyn LineSink,
    cancel: &CancellationToken,
) -> Result<()> {
    let (fqbn, port) = match &target.fqbn {
        Some(fqbn) => (fqbn.clone(), target.port.clone()),
        None => {
            let board = toolchain.detect_board(cancel).await?;
            info!(board = %board.name, fqbn = %board.fqbn, port = ?board.port, "auto selected board");
            (board.fqbn, target.port.clone().or(board.port))
        }
    };

    Dir::new(build_dir).create().await?;
    toolchain
        .compile(sketch, build_dir, &fqbn, sink, cancel)
        .await?;
    toolchain
        .upload(sketch, build_dir, &fqbn, port.as_deref(), sink, cancel)
        .await
}

/// A sketch doing nothing, in its own temp directory removed on drop
pub struct EmptySketch {
    root: TempDir,
}

impl EmptySketch {
    /// Sketch folder; its name matches the `.ino` file as arduino-cli wants
    pub fn sketch_dir(&self) -> PathBuf {
        self.root.path().join("empty_sketch")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root.path().join("build")
    }
}

pub async fn empty_sketch() -> Result<EmptySketch> {
    let root = tempfile::Builder::new().prefix("empty-sketch-").tempdir()?;
    let sketch = EmptySketch { root };
    Dir::new(sketch.sketch_dir())
        .file("empty_sketch.ino")
        .write_atomic(EMPTY_SKETCH.as_bytes())
        .await?;
    Ok(sketch)
}

/// Drives the `arduino-cli` binary
#[derive(Debug, Clone)]
pub struct ArduinoCli {
    binary: PathBuf,
}

impl Default for ArduinoCli {
    fn default() -> Self {
        Self::new("arduino-cli")
    }
}

impl ArduinoCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BoardList {
    Wrapped {
        #[serde(default)]
        detected_ports: Vec<DetectedPort>,
    },
    Bare(Vec<DetectedPort>),
}

#[derive(Debug, Deserialize)]
struct DetectedPort {
    #[serde(default)]
    matching_boards: Vec<MatchingBoard>,
    #[serde(default)]
    port: Option<PortAddress>,
}

#[derive(Debug, Deserialize)]
struct MatchingBoard {
    #[serde(default)]
    name: String,
    #[serde(default)]
    fqbn: String,
}

#[derive(Debug, Deserialize)]
struct PortAddress {
    address: String,
}

fn select_board(output: &str) -> Result<Board> {
    let ports = match serde_json::from_str::<BoardList>(output)? {
        BoardList::Wrapped { detected_ports } => detected_ports,
        BoardList::Bare(ports) => ports,
    };
    ports
        .into_iter()
        .find_map(|detected| {
            let board = detected
                .matching_boards
                .into_iter()
                .find(|b| b.fqbn.starts_with("arduino"))?;
            Some(Board {
                name: board.name,
                fqbn: board.fqbn,
                port: detected.port.map(|p| p.address),
            })
        })
        .ok_or_else(|| OrchestratorError::RuntimeOperationFailed("no board detected".to_string()))
}

#[async_trait]
impl SketchToolchain for ArduinoCli {
    async fn detect_board(&self, cancel: &CancellationToken) -> Result<Board> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["board", "list", "--format", "json"]);
        let captured = process::run_captured(cmd, cancel).await?;
        select_board(&captured.stdout)
    }

    async fn compile(
        &self,
        sketch: &Path,
        build_dir: &Path,
        fqbn: &str,
        sink: &dyn LineSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["compile", "--fqbn", fqbn])
            .arg("--build-path")
            .arg(build_dir);
        // libraries shared by the apps of a folder
        if let Some(libraries) = sketch.parent().and_then(Path::parent).map(|p| p.join("sketch-libraries")) {
            if Dir::new(&libraries).exists().await {
                debug!(path = %libraries.display(), "using shared sketch libraries");
                cmd.arg("--libraries").arg(libraries);
            }
        }
        cmd.arg(sketch);
        process::run_streaming(cmd, sink, cancel).await
    }

    async fn upload(
        &self,
        sketch: &Path,
        build_dir: &Path,
        fqbn: &str,
        port: Option<&str>,
        sink: &dyn LineSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["upload", "--fqbn", fqbn]);
        if let Some(port) = port {
            cmd.args(["--port", port]);
        }
        cmd.arg("--input-dir").arg(build_dir).arg(sketch);
        process::run_streaming(cmd, sink, cancel).await
    }
}
