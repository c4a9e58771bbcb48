use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::models::error::{EngineError, RecordingFailure};
use crate::models::route::{Interruption, RecordPermission};
use crate::traits::audio_session::{AudioSession, InterruptionHandler};

/// Free space required on the output volume before capture may start.
pub const MIN_FREE_STORAGE_BYTES: u64 = 50 * 1024 * 1024;

/// Refuse capture unless at least [`MIN_FREE_STORAGE_BYTES`] are free.
pub fn check_storage<S: AudioSession>(session: &S, directory: &Path) -> Result<u64, EngineError> {
    let available = session.available_storage_bytes(directory)?;
    if available < MIN_FREE_STORAGE_BYTES {
        log::warn!(
            "Insufficient storage in {}: {} bytes free",
            directory.display(),
            available
        );
        return Err(RecordingFailure::InsufficientStorage {
            available_bytes: available,
            required_bytes: MIN_FREE_STORAGE_BYTES,
        }
        .into());
    }
    Ok(available)
}

/// Ask for microphone access if undetermined; fail if denied.
pub fn ensure_record_permission<S: AudioSession>(session: &mut S) -> Result<(), EngineError> {
    let granted = match session.record_permission() {
        RecordPermission::Granted => true,
        RecordPermission::Denied => false,
        RecordPermission::Undetermined => {
            log::info!("Requesting microphone permission");
            session.request_record_permission()
        }
    };
    if granted {
        Ok(())
    } else {
        log::warn!("Microphone permission denied");
        Err(RecordingFailure::PermissionDenied.into())
    }
}

/// Refuse capture through a speaker, which would feed back into the mic.
pub fn check_monitoring_output<S: AudioSession>(session: &S) -> Result<(), EngineError> {
    if session.current_route().has_monitoring_output() {
        Ok(())
    } else {
        log::warn!("No headphones connected, capture refused");
        Err(EngineError::HeadphonesRequired)
    }
}

/// All capture gates, cheapest first. Nothing on the session changes unless
/// a permission prompt is needed.
pub fn preflight<S: AudioSession>(session: &mut S, output_directory: &Path) -> Result<(), EngineError> {
    check_storage(session, output_directory)?;
    ensure_record_permission(session)?;
    check_monitoring_output(session)
}

/// Queues interruption notifications from the platform until the engine's
/// owning thread drains them.
pub struct InterruptionGuard {
    tx: Sender<Interruption>,
    rx: Receiver<Interruption>,
}

impl Default for InterruptionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptionGuard {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Callback to register with the session. Safe to invoke from any thread.
    pub fn handler(&self) -> InterruptionHandler {
        let tx = self.tx.clone();
        Arc::new(move |interruption: Interruption| {
            if tx.send(interruption).is_err() {
                log::debug!("Interruption {:?} dropped: engine gone", interruption);
            }
        })
    }

    /// Pending notifications, oldest first.
    pub fn drain(&self) -> Vec<Interruption> {
        self.rx.try_iter().collect()
    }
}
