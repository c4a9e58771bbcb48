use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, TryRecvError};

use crate::models::config::SessionConfig;
use crate::models::error::EngineError;
use crate::models::route::{AudioRoute, PortKind, RoutePort, SessionOptions, StreamFormat};
use crate::traits::audio_session::AudioSession;
use crate::traits::clock::Clock;

/// Wait between input-route polls while a wireless route settles.
pub const ROUTE_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Polls before a wireless route is declared unstable.
pub const ROUTE_POLL_ATTEMPTS: u32 = 6;

/// Acquires and validates the hardware route before the graph or capture
/// may run.
pub struct SessionNegotiator {
    clock: Arc<dyn Clock>,
    options: SessionOptions,
}

impl SessionNegotiator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            options: SessionOptions::default(),
        }
    }

    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    /// Select a playback+capture category, activate the route, and apply
    /// the preferred input if it is present.
    pub fn configure<S: AudioSession>(&self, session: &mut S, config: &SessionConfig) -> Result<(), EngineError> {
        session
            .configure_for_overdub(&self.options)
            .map_err(|e| match e {
                EngineError::ConfigurationFailed(_) => e,
                other => EngineError::ConfigurationFailed(other.to_string()),
            })?;
        session.set_active(true)?;

        if let Some(port_id) = config.preferred_input_id.as_deref() {
            if let Err(e) = session.set_preferred_input(port_id) {
                log::warn!("Preferred input {} not applied: {}", port_id, e);
            }
        }

        let route = session.current_route();
        log::info!(
            "Session configured for {:?}: inputs [{}], outputs [{}]",
            config.quality,
            port_names(&route.inputs),
            port_names(&route.outputs)
        );
        Ok(())
    }

    /// Check for a usable input, or start waiting for one on a wireless
    /// route.
    ///
    /// Wired routes are checked once. Wireless routes are re-activated and
    /// handed to a [`RouteStabilizer`], which the owning thread polls; the
    /// calling thread never sleeps.
    pub fn stabilize_route<S: AudioSession>(
        &self,
        session: &mut S,
        is_wireless: bool,
    ) -> Result<Stabilization, EngineError> {
        if !is_wireless {
            return if session.current_route().has_input() {
                Ok(Stabilization::Settled)
            } else {
                Err(EngineError::NoInputAvailable)
            };
        }

        session.set_active(true)?;
        let stabilizer = RouteStabilizer::spawn(Arc::clone(&self.clock))?;
        log::info!(
            "Waiting for wireless input: {} polls every {:?}",
            ROUTE_POLL_ATTEMPTS,
            ROUTE_POLL_INTERVAL
        );
        Ok(Stabilization::Pending(stabilizer))
    }

    /// Read the active input format and reject non-positive rate or channels.
    ///
    /// Must be called after every graph reset; the route may have changed.
    pub fn validate_input_format<S: AudioSession>(&self, session: &S) -> Result<StreamFormat, EngineError> {
        let format = session.input_format();
        if !format.is_valid() {
            log::error!(
                "Invalid input format: {} Hz, {} channels",
                format.sample_rate,
                format.channels
            );
            return Err(EngineError::InvalidInputFormat {
                sample_rate: format.sample_rate,
                channels: format.channels,
            });
        }
        log::debug!("Input format: {} Hz, {} channels", format.sample_rate, format.channels);
        Ok(format)
    }

    /// Make sure a microphone is reachable on the current route.
    ///
    /// A stereo-only wireless output that never produces an input is reported
    /// as a device without a microphone rather than an unstable route.
    pub fn negotiate_for_capture<S: AudioSession>(&self, session: &mut S) -> Result<Stabilization, EngineError> {
        let route = session.current_route();
        let stabilization = self.stabilize_route(session, route.is_wireless_output())?;
        Ok(match stabilization {
            Stabilization::Pending(mut stabilizer) => {
                stabilizer.playback_only = is_playback_only_wireless(&route);
                Stabilization::Pending(stabilizer)
            }
            settled => settled,
        })
    }
}

/// Outcome of a route check.
pub enum Stabilization {
    /// An input is available now.
    Settled,
    /// A wireless route is still negotiating its microphone.
    Pending(RouteStabilizer),
}

/// Bounded wait for a wireless route to expose an input.
///
/// A worker thread sleeps out the poll cadence and sends one tick per
/// attempt. The route is only queried on the owning thread, from
/// [`RouteStabilizer::poll`]. Dropping the stabilizer cancels the wait.
pub struct RouteStabilizer {
    ticks: Receiver<u32>,
    playback_only: bool,
}

impl RouteStabilizer {
    fn spawn(clock: Arc<dyn Clock>) -> Result<Self, EngineError> {
        let (tx, ticks) = bounded(ROUTE_POLL_ATTEMPTS as usize);
        thread::Builder::new()
            .name("route-stabilizer".into())
            .spawn(move || {
                for attempt in 1..=ROUTE_POLL_ATTEMPTS {
                    clock.sleep(ROUTE_POLL_INTERVAL);
                    if tx.send(attempt).is_err() {
                        return;
                    }
                }
            })
            .map_err(|e| EngineError::ConfigurationFailed(format!("route polling unavailable: {}", e)))?;
        Ok(Self {
            ticks,
            playback_only: false,
        })
    }

    /// Check the route once for every poll interval that has elapsed.
    ///
    /// Returns `None` while still waiting, the number of polls it took once
    /// an input appears, or the failure after the last poll.
    pub fn poll<S: AudioSession>(&mut self, session: &S) -> Option<Result<u32, EngineError>> {
        loop {
            match self.ticks.try_recv() {
                Ok(attempt) => {
                    let route = session.current_route();
                    if route.has_input() {
                        log::info!(
                            "Wireless route stable after {} poll(s): input {}",
                            attempt,
                            port_names(&route.inputs)
                        );
                        return Some(Ok(attempt));
                    }
                    log::debug!("Wireless route poll {}/{}: no input yet", attempt, ROUTE_POLL_ATTEMPTS);
                    if attempt >= ROUTE_POLL_ATTEMPTS {
                        return Some(Err(self.failure()));
                    }
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => return Some(Err(self.failure())),
            }
        }
    }

    fn failure(&self) -> EngineError {
        log::warn!("Wireless route did not stabilize after {} polls", ROUTE_POLL_ATTEMPTS);
        if self.playback_only {
            EngineError::WirelessDeviceWithoutMicrophone
        } else {
            EngineError::WirelessRouteUnstable {
                attempts: ROUTE_POLL_ATTEMPTS,
            }
        }
    }
}

fn is_playback_only_wireless(route: &AudioRoute) -> bool {
    let mut wireless = route.outputs.iter().filter(|p| p.kind.is_wireless()).peekable();
    wireless.peek().is_some() && wireless.all(|p| p.kind == PortKind::BluetoothA2dp)
}

fn port_names(ports: &[RoutePort]) -> String {
    ports.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ")
}
