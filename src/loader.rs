use crate::environment::{BakeSettings, EnvironmentMaps, HdrImage};
use crate::model::{load_model_from_bytes, ModelAsset};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use thiserror::Error;

const READ_CHUNK: usize = 64 * 1024;

/// Terminal failure of an asset load. The viewer logs these and carries on
/// without the asset.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("failed to load environment map {path}: {reason}")]
    Environment { path: PathBuf, reason: String },
    #[error("failed to load model {path}: {reason}")]
    Model { path: PathBuf, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetKind {
    Environment,
    Model,
}

impl AssetKind {
    pub fn error(self, path: impl Into<PathBuf>, reason: impl Into<String>) -> LoadError {
        let (path, reason) = (path.into(), reason.into());
        match self {
            AssetKind::Environment => LoadError::Environment { path, reason },
            AssetKind::Model => LoadError::Model { path, reason },
        }
    }
}

impl LoadError {
    pub fn kind(&self) -> AssetKind {
        match self {
            LoadError::Environment { .. } => AssetKind::Environment,
            LoadError::Model { .. } => AssetKind::Model,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            LoadError::Environment { path, .. } | LoadError::Model { path, .. } => path,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadProgress {
    pub loaded: u64,
    pub total: u64,
}

impl LoadProgress {
    /// Percentage in `0.0..=100.0`; unknown totals report 0.
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        (self.loaded.min(self.total) as f64 / self.total as f64 * 100.0) as f32
    }
}

pub enum LoadEvent<T> {
    Progress(LoadProgress),
    Finished(Result<T, LoadError>),
}

pub enum TaskPoll<T> {
    Pending,
    Ready(Result<T, LoadError>),
}

/// Sending half handed to a load job.
#[derive(Clone)]
pub struct ProgressReporter<T> {
    tx: mpsc::Sender<LoadEvent<T>>,
}

impl<T> ProgressReporter<T> {
    pub fn report(&self, progress: LoadProgress) {
        let _ = self.tx.send(LoadEvent::Progress(progress));
    }
}

/// A load running on a named worker thread. Events are consumed with
/// [`AssetTask::poll`], which never blocks.
pub struct AssetTask<T> {
    kind: AssetKind,
    path: PathBuf,
    label: String,
    rx: mpsc::Receiver<LoadEvent<T>>,
    last_progress: Option<LoadProgress>,
    logged_percent: Option<u32>,
    finished: bool,
}

impl<T: Send + 'static> AssetTask<T> {
    pub fn spawn<F>(kind: AssetKind, path: PathBuf, job: F) -> Self
    where
        F: FnOnce(&ProgressReporter<T>) -> Result<T, LoadError> + Send + 'static,
    {
        let label = file_label(&path);
        let (tx, rx) = mpsc::channel();
        let reporter = ProgressReporter { tx: tx.clone() };
        let spawned = thread::Builder::new().name(format!("load-{label}")).spawn(move || {
            let result = job(&reporter);
            let _ = reporter.tx.send(LoadEvent::Finished(result));
        });
        if let Err(err) = spawned {
            log::error!("[assets] failed to spawn loader thread for {label}: {err}");
        }
        drop(tx);
        Self { kind, path, label, rx, last_progress: None, logged_percent: None, finished: false }
    }

    #[cfg(test)]
    pub(crate) fn progress(&self) -> Option<LoadProgress> {
        self.last_progress
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    /// Drains pending events. Returns `Ready` exactly once.
    pub fn poll(&mut self) -> TaskPoll<T> {
        if self.finished {
            return TaskPoll::Pending;
        }
        loop {
            match self.rx.try_recv() {
                Ok(LoadEvent::Progress(progress)) => self.record_progress(progress),
                Ok(LoadEvent::Finished(result)) => {
                    self.finished = true;
                    return TaskPoll::Ready(result);
                }
                Err(mpsc::TryRecvError::Empty) => return TaskPoll::Pending,
                Err(mpsc::TryRecvError::Disconnected) => {
                    self.finished = true;
                    return TaskPoll::Ready(Err(self.worker_lost()));
                }
            }
        }
    }

    /// Blocks until the task finishes.
    pub fn join(mut self) -> Result<T, LoadError> {
        loop {
            match self.rx.recv() {
                Ok(LoadEvent::Progress(progress)) => self.record_progress(progress),
                Ok(LoadEvent::Finished(result)) => return result,
                Err(_) => return Err(self.worker_lost()),
            }
        }
    }

    fn record_progress(&mut self, progress: LoadProgress) {
        self.last_progress = Some(progress);
        let percent = progress.percent();
        let whole = percent.floor() as u32;
        if self.logged_percent != Some(whole) {
            self.logged_percent = Some(whole);
            log::info!("[assets] {} Loading: {:.2}%", self.label, percent);
        }
    }

    fn worker_lost(&self) -> LoadError {
        self.kind.error(self.path.clone(), "loader thread exited without a result")
    }
}

/// Reads a whole file, reporting byte progress after every chunk.
pub fn read_with_progress<T>(path: &Path, reporter: &ProgressReporter<T>) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let total = file.metadata().map(|meta| meta.len()).unwrap_or(0);
    let mut bytes = Vec::with_capacity(total as usize);
    let mut chunk = vec![0u8; READ_CHUNK];
    reporter.report(LoadProgress { loaded: 0, total });
    loop {
        let read = file.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..read]);
        reporter.report(LoadProgress { loaded: bytes.len() as u64, total: total.max(bytes.len() as u64) });
    }
    Ok(bytes)
}

pub fn spawn_environment_load(path: PathBuf, settings: BakeSettings) -> AssetTask<EnvironmentMaps> {
    AssetTask::spawn(AssetKind::Environment, path.clone(), move |reporter| {
        let fail = |reason: String| AssetKind::Environment.error(path.clone(), reason);
        let bytes = read_with_progress(&path, reporter).map_err(|err| fail(err.to_string()))?;
        let image = HdrImage::decode(&bytes).map_err(|err| fail(format!("{err:#}")))?;
        Ok(EnvironmentMaps::bake(path.display().to_string(), &image, &settings))
    })
}

pub fn spawn_model_load(path: PathBuf) -> AssetTask<ModelAsset> {
    AssetTask::spawn(AssetKind::Model, path.clone(), move |reporter| {
        let fail = |reason: String| AssetKind::Model.error(path.clone(), reason);
        let bytes = read_with_progress(&path, reporter).map_err(|err| fail(err.to_string()))?;
        load_model_from_bytes(&bytes, path.parent(), &path.display().to_string())
            .map_err(|err| fail(format!("{err:#}")))
    })
}

fn file_label(path: &Path) -> String {
    path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn percent_handles_unknown_and_partial_totals() {
        assert_eq!(LoadProgress { loaded: 10, total: 0 }.percent(), 0.0);
        assert_eq!(LoadProgress { loaded: 50, total: 200 }.percent(), 25.0);
        assert_eq!(LoadProgress { loaded: 300, total: 200 }.percent(), 100.0);
    }

    #[test]
    fn read_reports_full_progress() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(&vec![7u8; READ_CHUNK * 2 + 10]).expect("write");
        let path = file.path().to_path_buf();
        let task = AssetTask::spawn(AssetKind::Model, path.clone(), move |reporter| {
            read_with_progress(&path, reporter).map_err(|err| AssetKind::Model.error(path.clone(), err.to_string()))
        });
        let bytes = task.join().expect("read");
        assert_eq!(bytes.len(), READ_CHUNK * 2 + 10);
    }

    #[test]
    fn poll_yields_result_once() {
        let mut task = AssetTask::spawn(AssetKind::Model, PathBuf::from("answer.bin"), |reporter: &ProgressReporter<u32>| {
            reporter.report(LoadProgress { loaded: 1, total: 2 });
            Ok(42)
        });
        let result = loop {
            match task.poll() {
                TaskPoll::Pending => std::thread::yield_now(),
                TaskPoll::Ready(result) => break result,
            }
        };
        assert_eq!(result.expect("value"), 42);
        assert!(task.is_finished());
        assert_eq!(task.progress(), Some(LoadProgress { loaded: 1, total: 2 }));
        assert!(matches!(task.poll(), TaskPoll::Pending));
    }

    #[test]
    fn missing_environment_reports_environment_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = dir.path().join("absent.hdr");
        let err = spawn_environment_load(missing.clone(), BakeSettings::preview()).join().err().expect("error");
        assert!(matches!(err, LoadError::Environment { .. }));
        assert_eq!(err.kind(), AssetKind::Environment);
        assert_eq!(err.path(), missing.as_path());
    }

    #[test]
    fn malformed_model_reports_model_error() {
        let mut file = tempfile::Builder::new().suffix(".gltf").tempfile().expect("temp file");
        file.write_all(b"{ not json").expect("write");
        let err = spawn_model_load(file.path().to_path_buf()).join().err().expect("error");
        assert!(matches!(err, LoadError::Model { .. }), "{err}");
    }
}
