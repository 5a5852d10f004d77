//! Core-pinned worker threads for ESP32-S3 dual-core.
//!
//! Wraps `esp_pthread_set_cfg()` so that `std::thread` creates a FreeRTOS
//! task pinned to a specific CPU core with explicit priority and stack
//! size.  On non-ESP targets, falls back to a plain named thread.
//!
//! Every transport owns exactly one [`Worker`]: a thread plus a shared
//! run flag.  Dropping the worker clears the flag and joins the thread,
//! so worker loops must poll [`RunFlag::is_set`] at least every few tens
//! of milliseconds.
//!
//! # ESP-IDF Threading Model
//!
//! `esp_pthread_set_cfg()` sets thread-local configuration that applies to
//! the *next* `pthread_create()` call from the calling thread, so the
//! config→spawn pair must not be interleaved with other thread creation
//! on the same thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{info, warn};

use crate::error::{Error, Result};

/// CPU core identifiers for the ESP32-S3 Xtensa LX7 dual-core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Core {
    /// Core 0 (PRO_CPU): WiFi and lwIP stacks.
    Pro = 0,
    /// Core 1 (APP_CPU): radio and modem workers.
    App = 1,
}

/// Static description of a worker task.
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec {
    /// Null-terminated name, e.g. `"lora-rx\0"`.
    pub name: &'static str,
    pub core: Core,
    pub priority: u8,
    pub stack_kb: usize,
}

impl TaskSpec {
    pub fn display_name(&self) -> &'static str {
        self.name.trim_end_matches('\0')
    }
}

/// Spawn a thread pinned to a specific core with explicit priority and stack.
#[cfg(target_os = "espidf")]
pub fn spawn_on_core(
    spec: &TaskSpec,
    f: impl FnOnce() + Send + 'static,
) -> std::io::Result<JoinHandle<()>> {
    // SAFETY: the config struct is fully initialised by
    // esp_create_default_pthread_config() and `name` is 'static and
    // null-terminated, so the pointer outlives the pthread_create call.
    unsafe {
        let mut cfg = esp_idf_sys::esp_create_default_pthread_config();
        cfg.pin_to_core = spec.core as i32;
        cfg.prio = spec.priority as i32;
        cfg.stack_size = (spec.stack_kb * 1024) as i32;
        cfg.thread_name = spec.name.as_ptr() as *const _;
        let ret = esp_idf_sys::esp_pthread_set_cfg(&cfg);
        if ret != esp_idf_sys::ESP_OK as i32 {
            return Err(std::io::Error::other(format!("esp_pthread_set_cfg failed: {ret}")));
        }
    }

    info!(
        "Spawning '{}' on {:?} (pri={}, stack={}KB)",
        spec.display_name(),
        spec.core,
        spec.priority,
        spec.stack_kb
    );

    std::thread::Builder::new()
        .name(spec.display_name().into())
        .spawn(f)
}

/// Simulation fallback; ignores core affinity and priority.
#[cfg(not(target_os = "espidf"))]
pub fn spawn_on_core(
    spec: &TaskSpec,
    f: impl FnOnce() + Send + 'static,
) -> std::io::Result<JoinHandle<()>> {
    info!(
        "Spawning '{}' (sim, no core pinning, stack={}KB)",
        spec.display_name(),
        spec.stack_kb
    );

    std::thread::Builder::new()
        .name(spec.display_name().into())
        .stack_size(spec.stack_kb * 1024)
        .spawn(f)
}

// ── Worker handle ─────────────────────────────────────────────

/// Cooperative stop signal shared between a [`Worker`] and its loop.
#[derive(Debug, Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Sleep for `total`, waking early if the flag is cleared.
    pub fn sleep(&self, total: Duration) {
        const SLICE: Duration = Duration::from_millis(20);
        let mut left = total;
        while !left.is_zero() && self.is_set() {
            let step = left.min(SLICE);
            std::thread::sleep(step);
            left -= step;
        }
    }
}

/// A running worker thread that is stopped and joined on drop.
pub struct Worker {
    flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    name: &'static str,
}

impl Worker {
    pub fn spawn(spec: &TaskSpec, body: impl FnOnce(RunFlag) + Send + 'static) -> Result<Self> {
        let flag = Arc::new(AtomicBool::new(true));
        let run = RunFlag(Arc::clone(&flag));
        let handle = spawn_on_core(spec, move || body(run)).map_err(|e| {
            warn!("{}: thread creation failed: {}", spec.display_name(), e);
            Error::Init("worker thread creation failed")
        })?;
        Ok(Self {
            flag,
            handle: Some(handle),
            name: spec.display_name(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.flag.load(Ordering::Acquire)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Clear the run flag and join the thread.
    pub fn stop(&mut self) {
        self.flag.store(false, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return;
        };
        // A worker that drops its own owner must not join itself.
        if handle.thread().id() == std::thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("{}: worker panicked", self.name);
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    const TEST_TASK: TaskSpec = TaskSpec {
        name: "test-worker\0",
        core: Core::App,
        priority: 5,
        stack_kb: 64,
    };

    #[test]
    fn display_name_strips_terminator() {
        assert_eq!(TEST_TASK.display_name(), "test-worker");
    }

    #[test]
    fn worker_loops_until_stopped() {
        let ticks = Arc::new(AtomicU32::new(0));
        let t = Arc::clone(&ticks);
        let mut worker = Worker::spawn(&TEST_TASK, move |run| {
            while run.is_set() {
                t.fetch_add(1, Ordering::Relaxed);
                run.sleep(Duration::from_millis(5));
            }
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert!(worker.is_running());
        worker.stop();
        assert!(!worker.is_running());
        let after = ticks.load(Ordering::Relaxed);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(ticks.load(Ordering::Relaxed), after);
        assert!(after > 0);
    }
}
