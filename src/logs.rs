//! Log aggregation: multiplexed stdout/stderr capture, per-process ring
//! buffers, size-based rotation and the `recent` read API.
use chrono::Utc;
use flate2::{Compression, write::GzEncoder};
use std::{
    collections::{HashMap, VecDeque},
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread,
};
use tracing::{debug, warn};

use crate::{
    config::LogSpec,
    events::{BusEvent, EventBus, LogLine, StreamKind},
    process::ProcessId,
};

/// Shared log aggregator. Cloning shares the underlying state.
#[derive(Clone)]
pub struct LogAggregator {
    inner: Arc<AggregatorInner>,
}

struct AggregatorInner {
    root: PathBuf,
    bus: EventBus,
    procs: Mutex<HashMap<ProcessId, Arc<Mutex<ProcessLogs>>>>,
}

struct ProcessLogs {
    name: String,
    spec: LogSpec,
    ring: VecDeque<LogLine>,
    stdout: StreamFile,
    stderr: StreamFile,
    write_warned: bool,
}

struct StreamFile {
    path: PathBuf,
    file: Option<File>,
    size: u64,
}

impl StreamFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            size: 0,
        }
    }

    fn handle(&mut self) -> std::io::Result<&mut File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.size = file.metadata().map(|m| m.len()).unwrap_or(0);
            self.file = Some(file);
        }
        Ok(self.file.as_mut().expect("handle just set"))
    }
}

impl LogAggregator {
    /// Creates an aggregator writing under `root` (the `logs/` directory).
    pub fn new(root: PathBuf, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(AggregatorInner {
                root,
                bus,
                procs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers a process before its first container spawns. Re-registering
    /// refreshes the name and log policy but keeps the ring buffer.
    pub fn register(&self, id: ProcessId, name: &str, spec: &LogSpec) {
        let mut procs = self.inner.procs.lock().unwrap_or_else(|e| e.into_inner());
        match procs.get(&id) {
            Some(existing) => {
                let mut logs = existing.lock().unwrap_or_else(|e| e.into_inner());
                logs.name = name.to_string();
                logs.spec = spec.clone();
            }
            None => {
                let stdout = StreamFile::new(self.inner.root.join(format!("{name}.out")));
                let stderr = StreamFile::new(self.inner.root.join(format!("{name}.err")));
                procs.insert(
                    id,
                    Arc::new(Mutex::new(ProcessLogs {
                        name: name.to_string(),
                        spec: spec.clone(),
                        ring: VecDeque::with_capacity(spec.max_lines.min(4096)),
                        stdout,
                        stderr,
                        write_warned: false,
                    })),
                );
            }
        }
    }

    /// Drops in-memory state for a process. Files on disk are kept.
    pub fn deregister(&self, id: ProcessId) {
        let mut procs = self.inner.procs.lock().unwrap_or_else(|e| e.into_inner());
        procs.remove(&id);
    }

    /// Spawns a line-splitting reader thread over one child stream.
    pub fn capture(
        &self,
        id: ProcessId,
        stream: StreamKind,
        reader: impl Read + Send + 'static,
    ) {
        let aggregator = self.clone();
        thread::spawn(move || {
            let reader = BufReader::new(reader);
            for line in reader.lines().map_while(Result::ok) {
                aggregator.append(id, stream, line);
            }
            debug!("log stream {} for process {id} closed", stream.as_str());
        });
    }

    /// Tags, buffers, persists and publishes one line.
    pub fn append(&self, id: ProcessId, stream: StreamKind, line: String) {
        let entry = {
            let procs = self.inner.procs.lock().unwrap_or_else(|e| e.into_inner());
            match procs.get(&id) {
                Some(entry) => Arc::clone(entry),
                None => return,
            }
        };

        let (event_line, warning) = {
            let mut logs = entry.lock().unwrap_or_else(|e| e.into_inner());
            let tagged = LogLine {
                process_id: id,
                process_name: logs.name.clone(),
                stream,
                line,
                ts: Utc::now(),
            };

            if logs.ring.len() >= logs.spec.max_lines {
                logs.ring.pop_front();
            }
            logs.ring.push_back(tagged.clone());

            let mut warning = None;
            if let Err(err) = logs.write_line(stream, &tagged.line) {
                if !logs.write_warned {
                    logs.write_warned = true;
                    warning = Some(format!(
                        "falling back to degraded log writes for '{}': {err}",
                        logs.name
                    ));
                }
                warn!("failed to append log line for process {id}: {err}");
            }

            (tagged, warning)
        };

        if let Some(message) = warning {
            self.inner.bus.publish(BusEvent::Warning {
                source: "logs".to_string(),
                message,
            });
        }
        self.inner.bus.publish(BusEvent::Log(event_line));
    }

    /// Returns the last `n` lines for a process: from the ring buffer when it
    /// holds enough, otherwise from the files on disk.
    pub fn recent(&self, id: ProcessId, n: usize) -> Vec<LogLine> {
        let entry = {
            let procs = self.inner.procs.lock().unwrap_or_else(|e| e.into_inner());
            match procs.get(&id) {
                Some(entry) => Arc::clone(entry),
                None => return Vec::new(),
            }
        };

        let logs = entry.lock().unwrap_or_else(|e| e.into_inner());
        if logs.ring.len() >= n {
            return logs
                .ring
                .iter()
                .skip(logs.ring.len() - n)
                .cloned()
                .collect();
        }

        let mut lines = read_tail(&logs.stdout.path, id, &logs.name, StreamKind::Stdout, n);
        lines.extend(read_tail(
            &logs.stderr.path,
            id,
            &logs.name,
            StreamKind::Stderr,
            n,
        ));
        if lines.len() > n {
            lines.drain(..lines.len() - n);
        }
        if lines.is_empty() {
            lines = logs.ring.iter().cloned().collect();
        }
        lines
    }

    /// Forces pending writes for every process to disk. Invoked on shutdown.
    pub fn flush(&self) {
        let entries: Vec<_> = {
            let procs = self.inner.procs.lock().unwrap_or_else(|e| e.into_inner());
            procs.values().cloned().collect()
        };
        for entry in entries {
            let mut guard = entry.lock().unwrap_or_else(|e| e.into_inner());
            let logs = &mut *guard;
            for stream in [&mut logs.stdout, &mut logs.stderr] {
                if let Some(file) = stream.file.as_mut() {
                    let _ = file.flush();
                    let _ = file.sync_data();
                }
            }
        }
    }

    /// Path of the active log file for one stream, mainly for the CLI.
    pub fn file_path(&self, name: &str, stream: StreamKind) -> PathBuf {
        self.inner.root.join(format!("{name}.{}", stream.file_ext()))
    }
}

impl ProcessLogs {
    fn write_line(&mut self, stream: StreamKind, line: &str) -> std::io::Result<()> {
        let spec = self.spec.clone();
        let target = match stream {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        };

        if target.size >= spec.rotate_size {
            rotate(target, &spec)?;
        }

        let file = target.handle()?;
        writeln!(file, "{line}")?;
        target.size += line.len() as u64 + 1;
        Ok(())
    }
}

/// Rolls `<name>.<ext>` to `.1`, shifting older suffixes up and dropping
/// anything beyond `rotate_keep`. Compresses the fresh `.1` when configured.
fn rotate(target: &mut StreamFile, spec: &LogSpec) -> std::io::Result<()> {
    target.file = None;

    if spec.rotate_keep == 0 {
        fs::remove_file(&target.path).ok();
        target.size = 0;
        return Ok(());
    }

    let suffix = |index: usize, compressed: bool| {
        let mut path = target.path.clone();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let ext = if compressed { ".gz" } else { "" };
        path.set_file_name(format!("{name}.{index}{ext}"));
        path
    };

    // Drop the oldest slot, then shift the chain upward.
    for compressed in [false, true] {
        fs::remove_file(suffix(spec.rotate_keep, compressed)).ok();
    }
    for index in (1..spec.rotate_keep).rev() {
        for compressed in [false, true] {
            let from = suffix(index, compressed);
            if from.exists() {
                fs::rename(&from, suffix(index + 1, compressed)).ok();
            }
        }
    }

    if spec.compress {
        gzip_file(&target.path, &suffix(1, true))?;
        fs::remove_file(&target.path)?;
    } else {
        fs::rename(&target.path, suffix(1, false))?;
    }

    target.size = 0;
    Ok(())
}

fn gzip_file(from: &Path, to: &Path) -> std::io::Result<()> {
    let mut input = File::open(from)?;
    let output = File::create(to)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    std::io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}

/// Reads the last `n` lines of a log file, tagging them for the read API.
fn read_tail(
    path: &Path,
    id: ProcessId,
    name: &str,
    stream: StreamKind,
    n: usize,
) -> Vec<LogLine> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(_) => return Vec::new(),
    };
    let reader = BufReader::new(file);
    let mut window: VecDeque<String> = VecDeque::with_capacity(n + 1);
    for line in reader.lines().map_while(Result::ok) {
        if window.len() >= n {
            window.pop_front();
        }
        window.push_back(line);
    }
    window
        .into_iter()
        .map(|line| LogLine {
            process_id: id,
            process_name: name.to_string(),
            stream,
            line,
            ts: Utc::now(),
        })
        .collect()
}
