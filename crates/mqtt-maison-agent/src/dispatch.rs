//! Maison action dispatch.
//!
//! Drives zigbee2mqtt devices from the canonical actions arriving on the
//! application topic:
//!
//! | Action        | Effect                                               |
//! |---------------|------------------------------------------------------|
//! | `up`/`down`   | switch the power group on/off, waiting for each      |
//! | `main`        | group toggle of the main devices, one run at a time  |
//! | `dot_double`  | group toggle of the lights                           |
//! | `next`/`prev` | move the light selection and blink the new selection |
//! | `dots`        | blink the selected light                             |
//! | `dots_double` | toggle the selected light                            |
//!
//! A group toggle reads every member first. Members that disagree are
//! reported and all driven to the inverse of the first member's state.

use crate::config::DeviceGroups;
use anyhow::Result;
use mqtt_maison_adapter_z2m::DeviceToggler;
use mqtt_maison_core::{MaisonAction, TargetState};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// State flips per blink are twice this.
const BLINKS: u32 = 2;

/// What became of one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Devices driven
    Handled,
    /// Same action still running; this one was skipped
    Busy,
    /// No behavior bound to the action
    Unhandled,
}

#[derive(Debug, Clone, Copy)]
enum Seek {
    Next,
    Prev,
}

/// Maps maison actions onto device operations.
pub struct ActionDispatcher {
    toggler: Arc<DeviceToggler>,
    groups: DeviceGroups,
    selected: Mutex<usize>,
    main_running: AtomicBool,
    blink_interval: Duration,
}

impl ActionDispatcher {
    /// Create a dispatcher. The first light starts selected.
    pub fn new(
        toggler: Arc<DeviceToggler>,
        groups: DeviceGroups,
        blink_interval: Duration,
    ) -> Self {
        Self {
            toggler,
            groups,
            selected: Mutex::new(0),
            main_running: AtomicBool::new(false),
            blink_interval,
        }
    }

    /// Dispatch one action and log the outcome.
    pub async fn handle(&self, action: MaisonAction) {
        let started = Instant::now();
        match self.dispatch(action).await {
            Ok(Dispatch::Handled) => {
                let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                tracing::debug!(%action, elapsed_ms, "Action handled");
            }
            Ok(Dispatch::Busy) => tracing::info!(%action, "Action already in progress"),
            Ok(Dispatch::Unhandled) => tracing::info!(%action, "Unhandled action"),
            Err(err) => tracing::error!(%action, error = %err, "Action failed"),
        }
    }

    /// Run the device operations bound to `action`.
    ///
    /// # Errors
    ///
    /// Returns error if a device exchange fails at the broker.
    pub async fn dispatch(&self, action: MaisonAction) -> Result<Dispatch> {
        match action {
            MaisonAction::Main => self.main().await,
            MaisonAction::Up => self.switch_power(TargetState::On).await,
            MaisonAction::Down => self.switch_power(TargetState::Off).await,
            MaisonAction::Next => self.seek(Seek::Next).await,
            MaisonAction::Prev => self.seek(Seek::Prev).await,
            MaisonAction::Dot => {
                tracing::info!("Dot pressed");
                Ok(Dispatch::Handled)
            }
            MaisonAction::DotDouble => {
                self.group_toggle(&self.groups.lights).await?;
                Ok(Dispatch::Handled)
            }
            MaisonAction::Dots => {
                if let Some(light) = self.selected_light() {
                    self.blink(&light).await?;
                }
                Ok(Dispatch::Handled)
            }
            MaisonAction::DotsDouble => {
                if let Some(light) = self.selected_light() {
                    self.toggler.toggle(&light).await?;
                }
                Ok(Dispatch::Handled)
            }
            MaisonAction::UpHold
            | MaisonAction::DownHold
            | MaisonAction::DotLong
            | MaisonAction::DotsLong => Ok(Dispatch::Unhandled),
        }
    }

    async fn main(&self) -> Result<Dispatch> {
        let Some(_running) = RunningFlag::claim(&self.main_running) else {
            return Ok(Dispatch::Busy);
        };
        self.group_toggle(&self.groups.main).await?;
        Ok(Dispatch::Handled)
    }

    async fn switch_power(&self, target: TargetState) -> Result<Dispatch> {
        let confirmed = for_each_device(&self.groups.power, |device| {
            let toggler = Arc::clone(&self.toggler);
            async move { Ok::<_, anyhow::Error>(toggler.set_state(&device, target).await?) }
        })
        .await?;

        let confirmed = confirmed.iter().filter(|ok| **ok).count();
        tracing::info!(
            %target,
            confirmed,
            devices = self.groups.power.len(),
            "Switched power group"
        );
        Ok(Dispatch::Handled)
    }

    async fn group_toggle(&self, devices: &[String]) -> Result<()> {
        let states = for_each_device(devices, |device| {
            let toggler = Arc::clone(&self.toggler);
            async move { Ok::<_, anyhow::Error>(toggler.query_state(&device).await?) }
        })
        .await?;

        let Some(&leader) = states.first() else {
            return Ok(());
        };
        if states.iter().any(|state| *state != leader) {
            tracing::warn!(?devices, ?states, "Devices out of sync");
        }

        let target = leader.inverted();
        for_each_device(devices, |device| {
            let toggler = Arc::clone(&self.toggler);
            async move { Ok::<_, anyhow::Error>(toggler.set_state(&device, target).await?) }
        })
        .await?;

        tracing::info!(?devices, %target, "Toggled group");
        Ok(())
    }

    async fn seek(&self, direction: Seek) -> Result<Dispatch> {
        let light = {
            let lights = &self.groups.lights;
            if lights.is_empty() {
                return Ok(Dispatch::Handled);
            }
            let mut selected = self.selected.lock().unwrap_or_else(PoisonError::into_inner);
            *selected = match direction {
                Seek::Next => (*selected + 1) % lights.len(),
                Seek::Prev => (*selected + lights.len() - 1) % lights.len(),
            };
            lights[*selected].clone()
        };

        tracing::info!(light = %light, "Selected light");
        self.blink(&light).await?;
        Ok(Dispatch::Handled)
    }

    fn selected_light(&self) -> Option<String> {
        let selected = *self.selected.lock().unwrap_or_else(PoisonError::into_inner);
        self.groups.lights.get(selected).cloned()
    }

    /// Flip a device `2 * BLINKS` times, one flip per interval.
    async fn blink(&self, device: &str) -> Result<()> {
        let flips = BLINKS * 2;
        for flip in 1..=flips {
            let started = Instant::now();
            let current = self.toggler.query_state(device).await?;
            self.toggler.set_state(device, current.inverted()).await?;

            if flip < flips {
                if let Some(rest) = self.blink_interval.checked_sub(started.elapsed()) {
                    tokio::time::sleep(rest).await;
                }
            }
        }
        Ok(())
    }
}

/// Cleared when dropped, so an aborted run does not block later ones.
struct RunningFlag<'a>(&'a AtomicBool);

impl<'a> RunningFlag<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(Self(flag))
    }
}

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Run `op` for every device concurrently. Results keep the device order.
async fn for_each_device<T, F, Fut>(devices: &[String], op: F) -> Result<Vec<T>>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let mut tasks = JoinSet::new();
    for (index, device) in devices.iter().enumerate() {
        let run = op(device.clone());
        tasks.spawn(async move { (index, run.await) });
    }

    let mut results: Vec<Option<T>> = devices.iter().map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        let (index, result) = joined?;
        results[index] = Some(result?);
    }
    Ok(results.into_iter().flatten().collect())
}
