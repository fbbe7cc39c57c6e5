//! Fixed-size pool of conversion units.
//!
//! Each unit runs on its own OS thread and owns its caches outright. Requests are dispatched
//! round-robin and every request carries its own reply channel, so completion order across
//! units does not matter.
//!
//! A unit that panics with a request in hand fails that request only. Its job queue is handed
//! to a replacement unit started in the same slot, so requests already queued behind the
//! failed one are still served.

use crate::config::ConverterConfig;
use crate::constants::UNIT_THREAD_PREFIX;
use crate::request::{ControlSignal, ConvertRequest, ConvertResponse};
use crate::unit::ConversionUnit;
use crate::{ConvertResult, PoolError};
use converter_files::FsTemplateStore;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

enum Job {
    Convert {
        request: Box<ConvertRequest>,
        reply: oneshot::Sender<ConvertResult<ConvertResponse>>,
    },
    Control {
        signal: ControlSignal,
        ack: oneshot::Sender<ConvertResult<()>>,
    },
    #[cfg(test)]
    Crash { reply: oneshot::Sender<ConvertResult<ConvertResponse>> },
}

struct Slot {
    jobs: Option<mpsc::UnboundedSender<Job>>,
    handle: Option<JoinHandle<()>>,
}

struct Shared {
    slots: Vec<Mutex<Slot>>,
    /// Configuration replacement units start with.
    config: RwLock<ConverterConfig>,
    closed: AtomicBool,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    next: AtomicUsize,
}

impl WorkerPool {
    /// Starts `config.pool_size()` units.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ConvertError::Store`] when the template directory is unusable and
    /// [`PoolError::Spawn`] when a unit thread cannot be started.
    pub fn new(config: ConverterConfig) -> ConvertResult<Self> {
        FsTemplateStore::new(config.template_dir())?;

        let size = config.pool_size();
        let mut receivers = Vec::with_capacity(size);
        let mut slots = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, rx) = mpsc::unbounded_channel();
            receivers.push(rx);
            slots.push(Mutex::new(Slot {
                jobs: Some(tx),
                handle: None,
            }));
        }

        let shared = Arc::new(Shared {
            slots,
            config: RwLock::new(config),
            closed: AtomicBool::new(false),
        });
        for (slot, jobs) in receivers.into_iter().enumerate() {
            let handle = spawn_unit(&shared, slot, jobs)?;
            shared.slots[slot].lock().handle = Some(handle);
        }

        info!(units = size, "started worker pool");
        Ok(Self {
            shared,
            next: AtomicUsize::new(0),
        })
    }

    pub fn size(&self) -> usize {
        self.shared.slots.len()
    }

    /// Converts `request` on the next unit in turn.
    ///
    /// # Errors
    ///
    /// Returns the conversion's own error, or [`PoolError::UnitFailed`] when the unit died
    /// before replying.
    pub async fn convert(&self, request: ConvertRequest) -> ConvertResult<ConvertResponse> {
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.size();
        let (reply, response) = oneshot::channel();
        self.send(
            slot,
            Job::Convert {
                request: Box::new(request),
                reply,
            },
        )?;
        response
            .await
            .map_err(|_| PoolError::UnitFailed { slot })?
    }

    /// Delivers `signal` to every unit and resolves once all of them applied it.
    ///
    /// A `ConstantsChanged` configuration is also kept for units started later. The pool size
    /// is fixed at construction; a different size in the new configuration is ignored.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by a unit.
    pub async fn broadcast(&self, signal: ControlSignal) -> ConvertResult<()> {
        if let ControlSignal::ConstantsChanged(config) = &signal {
            FsTemplateStore::new(config.template_dir())?;
            *self.shared.config.write() = config.clone();
        }

        let mut acks = Vec::with_capacity(self.size());
        for slot in 0..self.size() {
            let (ack, done) = oneshot::channel();
            self.send(
                slot,
                Job::Control {
                    signal: signal.clone(),
                    ack,
                },
            )?;
            acks.push((slot, done));
        }

        let mut first_error = None;
        for (slot, done) in acks {
            let applied = match done.await {
                Ok(applied) => applied,
                Err(_) => Err(PoolError::UnitFailed { slot }.into()),
            };
            if let Err(e) = applied {
                warn!(slot, error = %e, "unit failed to apply control signal");
                first_error.get_or_insert(e);
            }
        }
        info!(?signal, units = self.size(), "broadcast control signal");
        first_error.map_or(Ok(()), Err)
    }

    /// Stops every unit once it has drained its queue. Units stopped this way are not replaced.
    pub async fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let handles: Vec<JoinHandle<()>> = self
            .shared
            .slots
            .iter()
            .filter_map(|slot| {
                let mut slot = slot.lock();
                slot.jobs = None;
                slot.handle.take()
            })
            .collect();

        let joined = tokio::task::spawn_blocking(move || {
            for handle in handles {
                if handle.join().is_err() {
                    warn!("conversion unit panicked during shutdown");
                }
            }
        })
        .await;
        if let Err(e) = joined {
            error!(error = %e, "failed to join conversion units");
        }
        info!("worker pool shut down");
    }

    fn send(&self, slot: usize, job: Job) -> Result<(), PoolError> {
        let guard = self.shared.slots[slot].lock();
        let jobs = guard.jobs.as_ref().ok_or(PoolError::Closed)?;
        jobs.send(job).map_err(|_| PoolError::Closed)
    }

    #[cfg(test)]
    fn crash(&self, slot: usize) -> oneshot::Receiver<ConvertResult<ConvertResponse>> {
        let (reply, response) = oneshot::channel();
        self.send(slot, Job::Crash { reply })
            .expect("pool is running");
        response
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        for slot in &self.shared.slots {
            slot.lock().jobs = None;
        }
    }
}

fn spawn_unit(
    shared: &Arc<Shared>,
    slot: usize,
    jobs: mpsc::UnboundedReceiver<Job>,
) -> Result<JoinHandle<()>, PoolError> {
    let config = shared.config.read().clone();
    let guard = Respawn {
        shared: Arc::downgrade(shared),
        slot,
        jobs: Some(jobs),
    };
    std::thread::Builder::new()
        .name(format!("{UNIT_THREAD_PREFIX}-{slot}"))
        .spawn(move || run_unit(config, guard))
        .map_err(PoolError::Spawn)
}

fn run_unit(config: ConverterConfig, mut guard: Respawn) {
    let slot = guard.slot;
    let mut unit = match ConversionUnit::new(config) {
        Ok(unit) => Some(unit),
        Err(e) => {
            error!(slot, error = %e, "conversion unit could not start");
            None
        }
    };
    info!(slot, "conversion unit started");

    let Some(jobs) = guard.jobs.as_mut() else {
        return;
    };
    while let Some(job) = jobs.blocking_recv() {
        match job {
            Job::Convert { request, reply } => {
                let result = match unit.as_mut() {
                    Some(unit) => unit.convert(&request),
                    None => Err(unavailable(slot)),
                };
                // the caller may have gone away; nothing to do then
                let _ = reply.send(result);
            }
            Job::Control { signal, ack } => {
                let result = match unit.as_mut() {
                    Some(unit) => unit.apply(&signal),
                    None => Err(unavailable(slot)),
                };
                let _ = ack.send(result);
            }
            #[cfg(test)]
            Job::Crash { reply } => {
                let _held = reply;
                panic!("conversion unit {slot} crashed on request");
            }
        }
    }
    info!(slot, "conversion unit stopped");
}

fn unavailable(slot: usize) -> crate::ConvertError {
    PoolError::UnitUnavailable {
        slot,
        reason: "template directory could not be opened".into(),
    }
    .into()
}

/// Owns a unit's job queue and restarts the unit if its thread unwinds.
struct Respawn {
    shared: Weak<Shared>,
    slot: usize,
    jobs: Option<mpsc::UnboundedReceiver<Job>>,
}

impl Drop for Respawn {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        let (Some(shared), Some(jobs)) = (self.shared.upgrade(), self.jobs.take()) else {
            return;
        };
        if shared.closed.load(Ordering::SeqCst) {
            return;
        }

        warn!(slot = self.slot, "conversion unit died, starting a replacement");
        match spawn_unit(&shared, self.slot, jobs) {
            Ok(handle) => shared.slots[self.slot].lock().handle = Some(handle),
            Err(e) => error!(slot = self.slot, error = %e, "failed to replace conversion unit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::TemplateSource;
    use crate::ConvertError;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;
    use template_engine::DataType;

    const ADT: &str = "MSH|^~\\&|LAB\rPID|1||123||Doe^Jane";

    fn write(root: &Path, key: &str, content: &str) {
        let path = root.join(key);
        fs::create_dir_all(path.parent().expect("key has a parent")).expect("Failed to create dir");
        fs::write(path, content).expect("Failed to write template");
    }

    fn pool_with(size: usize, template: &str) -> (TempDir, WorkerPool) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        write(dir.path(), "hl7v2/ADT_A01.hbs", template);
        let config = ConverterConfig::new(dir.path().to_path_buf(), size).expect("config");
        let pool = WorkerPool::new(config).expect("Failed to start pool");
        (dir, pool)
    }

    fn request(patient: &str) -> ConvertRequest {
        ConvertRequest::new(
            DataType::Hl7v2,
            ADT,
            TemplateSource::Stored("ADT_A01.hbs".into()),
        )
        .with_patient_id(patient)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_more_tasks_than_units_all_resolve_to_their_callers() {
        let (_dir, pool) = pool_with(2, r#"{"id": "{{@patientId}}"}"#);
        let pool = Arc::new(pool);

        let mut tasks = Vec::new();
        for i in 0..9 {
            let pool = Arc::clone(&pool);
            tasks.push(tokio::spawn(async move {
                let response = pool.convert(request(&format!("p-{i}"))).await;
                (i, response)
            }));
        }
        for task in tasks {
            let (i, response) = task.await.expect("task joined");
            let response = response.expect("Failed to convert");
            assert_eq!(response.fhir_resource["id"], format!("p-{i}"));
        }
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_crashed_unit_fails_only_its_task_and_is_replaced() {
        let (_dir, pool) = pool_with(1, r#"{"id": "{{@patientId}}"}"#);

        let crashed = pool.crash(0).await.map_err(|_| PoolError::UnitFailed { slot: 0 });
        assert!(matches!(crashed, Err(PoolError::UnitFailed { slot: 0 })));

        let response = pool.convert(request("after")).await.expect("replacement serves");
        assert_eq!(response.fhir_resource["id"], "after");
        assert_eq!(pool.size(), 1);
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_queued_tasks_survive_a_crash() {
        let (_dir, pool) = pool_with(1, r#"{"id": "{{@patientId}}"}"#);
        let crashed = pool.crash(0);
        let (reply, queued) = oneshot::channel();
        pool.send(
            0,
            Job::Convert {
                request: Box::new(request("queued")),
                reply,
            },
        )
        .expect("pool is running");

        assert!(crashed.await.is_err());
        let response = queued
            .await
            .expect("queued task is served")
            .expect("Failed to convert");
        assert_eq!(response.fhir_resource["id"], "queued");
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_broadcast_reaches_every_unit() {
        let (dir, pool) = pool_with(3, r#"{"v": 1}"#);
        for _ in 0..3 {
            let response = pool.convert(request("p")).await.expect("convert");
            assert_eq!(response.fhir_resource["v"], 1);
        }

        write(dir.path(), "hl7v2/ADT_A01.hbs", r#"{"v": 2}"#);
        pool.broadcast(ControlSignal::TemplatesChanged)
            .await
            .expect("Failed to broadcast");
        for _ in 0..3 {
            let response = pool.convert(request("p")).await.expect("convert");
            assert_eq!(response.fhir_resource["v"], 2);
        }
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_constants_changed_rejects_missing_directory() {
        let (dir, pool) = pool_with(1, "{}");
        let config = ConverterConfig::new(dir.path().join("missing"), 1).expect("config");
        let result = pool.broadcast(ControlSignal::ConstantsChanged(config)).await;
        assert!(matches!(result, Err(ConvertError::Store(_))));
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_closes_the_pool() {
        let (_dir, pool) = pool_with(2, "{}");
        pool.shutdown().await;
        let result = pool.convert(request("p")).await;
        assert!(matches!(result, Err(ConvertError::Pool(PoolError::Closed))));
    }

    #[test]
    fn test_new_rejects_missing_template_dir() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = ConverterConfig::new(dir.path().join("missing"), 1).expect("config");
        assert!(matches!(WorkerPool::new(config), Err(ConvertError::Store(_))));
    }
}
