#![allow(unsafe_code)]
//! ==============================================================================
//! ipc.rs - single-slot cross-process snapshot mailbox
//! ==============================================================================
//!
//! purpose:
//!     hands the CombinedSnapshot from the ingest process to the analyzer
//!     process through a named shared-memory segment plus a named POSIX
//!     semaphore ("snapshot ready").
//!
//! semantics:
//!     - capacity one: a send overwrites whatever is in the slot, consumed or not
//!     - send never blocks the producer
//!     - receive blocks until at least one message is pending
//!     - at most one message is ever pending: the semaphore is only posted when
//!       it reads zero, and a receive drains any surplus count
//!     - no torn reads: the record is guarded by a sequence counter (seqlock)
//!
//! segment layout:
//!
//!     ┌──────────────────┬────────────────────────────────────────┐
//!     │ seq: AtomicU64   │ CombinedSnapshot record (WIRE_LEN)     │
//!     │ odd = writing    │ cycle_id[N] vrms[N] irms[N] active[N]  │
//!     └──────────────────┴────────────────────────────────────────┘
//!
//! relationships:
//!     - producer side: merger.rs (via SnapshotSink)
//!     - consumer side: analyzer.rs (blocking receive loop)
//!
//! ==============================================================================

use memmap2::MmapMut;
use parking_lot::Mutex;
use std::ffi::CString;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::config::IpcConfig;
use crate::domain::CombinedSnapshot;

const HEADER_LEN: usize = 8;
const SEGMENT_LEN: usize = HEADER_LEN + CombinedSnapshot::WIRE_LEN;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("ipc channel not initialized")]
    NotInitialized,
    #[error("ipc {op} failed: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl IpcError {
    fn last_os(op: &'static str) -> Self {
        IpcError::Os { op, source: io::Error::last_os_error() }
    }
}

/// anything that accepts a full snapshot push (the ipc channel, or a test double)
pub trait SnapshotSink: Send + Sync {
    fn send(&self, snapshot: &CombinedSnapshot) -> Result<(), IpcError>;
}

// ==============================================================================
// mapped segment + semaphore
// ==============================================================================

struct Segment {
    /// keeps the mapping alive; all access goes through `base`
    _mmap: MmapMut,
    base: *mut u8,
    sem: *mut libc::sem_t,
    write_lock: Mutex<()>,
}

// SAFETY: the mapping and the semaphore handle are owned by the Segment and
// outlive every pointer derived from them. Writes are serialised by
// `write_lock` within the process and published through the seq counter.
unsafe impl Send for Segment {}
// SAFETY: see above; readers only copy bytes out and validate with `seq`.
unsafe impl Sync for Segment {}

impl Segment {
    fn seq(&self) -> &AtomicU64 {
        // SAFETY: the mapping is page aligned and at least HEADER_LEN long.
        unsafe { &*(self.base as *const AtomicU64) }
    }

    fn write(&self, snapshot: &CombinedSnapshot) {
        let _guard = self.write_lock.lock();
        let bytes = snapshot.to_bytes();
        let seq = self.seq();
        // an odd value left by a producer that died mid-write must not flip parity
        let start = seq.load(Ordering::Relaxed) & !1;

        seq.store(start.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        // SAFETY: destination range lies inside the SEGMENT_LEN mapping.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.add(HEADER_LEN), bytes.len());
        }
        seq.store(start.wrapping_add(2), Ordering::Release);
    }

    fn read(&self) -> CombinedSnapshot {
        let seq = self.seq();
        loop {
            let before = seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }

            let mut bytes = [0u8; CombinedSnapshot::WIRE_LEN];
            // SAFETY: source range lies inside the SEGMENT_LEN mapping.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.base.add(HEADER_LEN),
                    bytes.as_mut_ptr(),
                    bytes.len(),
                );
            }
            fence(Ordering::Acquire);

            if seq.load(Ordering::Relaxed) == before {
                return CombinedSnapshot::from_bytes(&bytes);
            }
        }
    }

    /// post only when nothing is pending
    fn signal(&self) -> Result<(), IpcError> {
        let mut value: libc::c_int = 0;
        // SAFETY: `sem` is a live handle returned by sem_open.
        if unsafe { libc::sem_getvalue(self.sem, &mut value) } != 0 {
            return Err(IpcError::last_os("sem_getvalue"));
        }
        if value <= 0 && unsafe { libc::sem_post(self.sem) } != 0 {
            return Err(IpcError::last_os("sem_post"));
        }
        Ok(())
    }

    fn wait(&self) -> Result<(), IpcError> {
        loop {
            // SAFETY: `sem` is a live handle returned by sem_open.
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(IpcError::Os { op: "sem_wait", source: err });
            }
        }
    }

    fn try_wait(&self) -> Result<bool, IpcError> {
        // SAFETY: `sem` is a live handle returned by sem_open.
        if unsafe { libc::sem_trywait(self.sem) } == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::EINTR) => Ok(false),
            _ => Err(IpcError::Os { op: "sem_trywait", source: err }),
        }
    }

    /// swallow counts posted between our wait and the copy
    fn drain(&self) {
        while let Ok(true) = self.try_wait() {}
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        // SAFETY: handle came from sem_open and is closed exactly once.
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

// ==============================================================================
// public channel
// ==============================================================================

struct Names {
    shm_path: PathBuf,
    sem_name: CString,
}

pub struct IpcChannel {
    segment: Mutex<Option<Arc<Segment>>>,
    names: Option<Names>,
    misuse_reported: AtomicBool,
}

impl IpcChannel {
    /// Open (creating if missing) the named segment and semaphore.
    ///
    /// Both processes call this; whichever starts first creates the objects.
    pub fn attach(config: &IpcConfig) -> Result<Self, IpcError> {
        let shm_path = config.shm_dir.join(config.shm_name.trim_start_matches('/'));
        let sem_name = CString::new(config.sem_name.as_str()).map_err(|e| IpcError::Os {
            op: "sem_name",
            source: io::Error::new(io::ErrorKind::InvalidInput, e),
        })?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o666)
            .open(&shm_path)
            .map_err(|source| IpcError::Os { op: "shm_open", source })?;
        file.set_len(SEGMENT_LEN as u64)
            .map_err(|source| IpcError::Os { op: "ftruncate", source })?;

        // SAFETY: the file is sized to SEGMENT_LEN above and is only ever
        // accessed through this module's seqlock protocol.
        let mut mmap = unsafe { MmapMut::map_mut(&file) }
            .map_err(|source| IpcError::Os { op: "mmap", source })?;
        let base = mmap.as_mut_ptr();

        // SAFETY: valid NUL-terminated name; variadic mode/value are c_uint as sem_open expects.
        let sem = unsafe {
            libc::sem_open(
                sem_name.as_ptr(),
                libc::O_CREAT,
                0o666 as libc::c_uint,
                0 as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(IpcError::last_os("sem_open"));
        }

        tracing::info!(shm = %shm_path.display(), sem = %config.sem_name, "[IPC] Initialized");

        Ok(Self {
            segment: Mutex::new(Some(Arc::new(Segment {
                _mmap: mmap,
                base,
                sem,
                write_lock: Mutex::new(()),
            }))),
            names: Some(Names { shm_path, sem_name }),
            misuse_reported: AtomicBool::new(false),
        })
    }

    /// a channel whose resources were never set up; every call reports NotInitialized
    pub fn detached() -> Self {
        Self {
            segment: Mutex::new(None),
            names: None,
            misuse_reported: AtomicBool::new(false),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.segment.lock().is_some()
    }

    fn segment(&self) -> Result<Arc<Segment>, IpcError> {
        match self.segment.lock().as_ref() {
            Some(seg) => Ok(Arc::clone(seg)),
            None => {
                if !self.misuse_reported.swap(true, Ordering::Relaxed) {
                    tracing::error!("[IPC] Not initialized");
                }
                Err(IpcError::NotInitialized)
            }
        }
    }

    /// overwrite the slot and raise the ready signal; never blocks
    pub fn send(&self, snapshot: &CombinedSnapshot) -> Result<(), IpcError> {
        let seg = self.segment()?;
        seg.write(snapshot);
        seg.signal()
    }

    /// block until a snapshot is pending, then copy it out
    pub fn receive(&self) -> Result<CombinedSnapshot, IpcError> {
        let seg = self.segment()?;
        seg.wait()?;
        seg.drain();
        Ok(seg.read())
    }

    /// non-blocking receive
    pub fn try_receive(&self) -> Result<Option<CombinedSnapshot>, IpcError> {
        let seg = self.segment()?;
        if !seg.try_wait()? {
            return Ok(None);
        }
        seg.drain();
        Ok(Some(seg.read()))
    }

    /// Unlink both names and detach this handle.
    ///
    /// The mapping itself is released once the last in-flight call returns.
    pub fn close(&self) {
        let had_segment = self.segment.lock().take().is_some();
        if !had_segment {
            return;
        }
        if let Some(names) = &self.names {
            if let Err(e) = std::fs::remove_file(&names.shm_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("[IPC] failed to unlink {}: {}", names.shm_path.display(), e);
                }
            }
            // SAFETY: valid NUL-terminated name.
            unsafe {
                libc::sem_unlink(names.sem_name.as_ptr());
            }
        }
        tracing::info!("[IPC] Cleaned up");
    }
}

impl SnapshotSink for IpcChannel {
    fn send(&self, snapshot: &CombinedSnapshot) -> Result<(), IpcError> {
        IpcChannel::send(self, snapshot)
    }
}
