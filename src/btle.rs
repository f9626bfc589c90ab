//! btleplug-backed implementation of the adapter capability.
//!
//! Translates the platform `CentralEvent` stream and per-peripheral
//! notification streams into [`AdapterEvent`]s, and runs the slow GATT
//! operations on spawned tasks so command initiation always returns
//! quickly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc::Sender;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::adapter::{
    AdapterError, AdapterEvent, AdapterState, BleAdapter, CharacteristicHandle, PeripheralId,
    ServiceHandle,
};
use crate::uuids;

pub struct BtleplugAdapter {
    central: Adapter,
    events: Sender<AdapterEvent>,
    /// Peripherals seen so far, keyed by the opaque id we hand out.
    known: Arc<Mutex<HashMap<PeripheralId, Peripheral>>>,
    /// Cancels the notification forwarder of the current connection.
    notify_guard: Mutex<Option<CancellationToken>>,
}

impl BtleplugAdapter {
    /// Open the first platform adapter and start pumping its events into
    /// `events`.
    pub async fn new(events: Sender<AdapterEvent>) -> Result<Self, AdapterError> {
        let manager = Manager::new().await.map_err(backend)?;
        let adapters = manager.adapters().await.map_err(backend)?;
        let central = adapters
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::Unavailable("no bluetooth adapter found".into()))?;

        let known = Arc::new(Mutex::new(HashMap::new()));
        let central_events = central.events().await.map_err(backend)?;
        tokio::spawn(pump_central_events(
            central_events,
            central.clone(),
            events.clone(),
            Arc::clone(&known),
        ));

        Ok(Self {
            central,
            events,
            known,
            notify_guard: Mutex::new(None),
        })
    }

    async fn lookup(&self, id: &PeripheralId) -> Result<Peripheral, AdapterError> {
        self.known
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownPeripheral(id.clone()))
    }

    async fn find_characteristic(
        &self,
        peripheral: &PeripheralId,
        uuid: Uuid,
    ) -> Result<(Peripheral, Characteristic), AdapterError> {
        let p = self.lookup(peripheral).await?;
        let c = p
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(AdapterError::UnknownCharacteristic(uuid))?;
        Ok((p, c))
    }
}

#[async_trait]
impl BleAdapter for BtleplugAdapter {
    async fn start_scan(&self, service: Uuid) -> Result<(), AdapterError> {
        self.central
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await
            .map_err(|e| AdapterError::Unavailable(e.to_string()))
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        self.central.stop_scan().await.map_err(backend)
    }

    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), AdapterError> {
        let p = self.lookup(peripheral).await?;
        let events = self.events.clone();
        let pid = peripheral.clone();
        tokio::spawn(async move {
            match p.connect().await {
                Ok(()) => {
                    let _ = events.send(AdapterEvent::Connected(pid)).await;
                }
                Err(e) => {
                    let _ = events
                        .send(AdapterEvent::ConnectFailed {
                            peripheral: pid,
                            error: e.to_string(),
                        })
                        .await;
                }
            }
        });
        Ok(())
    }

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<(), AdapterError> {
        if let Some(token) = self.notify_guard.lock().await.take() {
            token.cancel();
        }
        let p = self.lookup(peripheral).await?;
        p.disconnect().await.map_err(backend)
    }

    async fn discover_services(
        &self,
        peripheral: &PeripheralId,
        filter: Uuid,
    ) -> Result<(), AdapterError> {
        let p = self.lookup(peripheral).await?;
        let events = self.events.clone();
        let pid = peripheral.clone();
        tokio::spawn(async move {
            match p.discover_services().await {
                Ok(()) => {
                    let services = p
                        .services()
                        .into_iter()
                        .filter(|s| s.uuid == filter)
                        .map(|s| ServiceHandle { uuid: s.uuid })
                        .collect();
                    let _ = events
                        .send(AdapterEvent::ServicesDiscovered {
                            peripheral: pid,
                            services,
                        })
                        .await;
                }
                Err(e) => {
                    let _ = events
                        .send(AdapterEvent::ServiceDiscoveryFailed {
                            peripheral: pid,
                            error: e.to_string(),
                        })
                        .await;
                }
            }
        });
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: &ServiceHandle,
    ) -> Result<(), AdapterError> {
        // btleplug populates the characteristic table during service
        // discovery; read it back out of the cached GATT tree.
        let p = self.lookup(peripheral).await?;
        let event = match p.services().into_iter().find(|s| s.uuid == service.uuid) {
            Some(service) => AdapterEvent::CharacteristicsDiscovered {
                peripheral: peripheral.clone(),
                characteristics: service
                    .characteristics
                    .into_iter()
                    .map(|c| CharacteristicHandle {
                        uuid: c.uuid,
                        can_notify: c.properties.contains(CharPropFlags::NOTIFY),
                    })
                    .collect(),
            },
            None => AdapterEvent::CharacteristicDiscoveryFailed {
                peripheral: peripheral.clone(),
                error: format!("service {} not present after discovery", service.uuid),
            },
        };
        let _ = self.events.send(event).await;
        Ok(())
    }

    async fn set_notify(
        &self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicHandle,
        enabled: bool,
    ) -> Result<(), AdapterError> {
        let (p, c) = self.find_characteristic(peripheral, characteristic.uuid).await?;
        let events = self.events.clone();
        let pid = peripheral.clone();
        let uuid = characteristic.uuid;

        if !enabled {
            if let Some(token) = self.notify_guard.lock().await.take() {
                token.cancel();
            }
            tokio::spawn(async move {
                let result = p.unsubscribe(&c).await.map_err(|e| e.to_string());
                let _ = events
                    .send(AdapterEvent::NotifyCompleted {
                        peripheral: pid,
                        characteristic: uuid,
                        enabled: false,
                        result,
                    })
                    .await;
            });
            return Ok(());
        }

        let token = CancellationToken::new();
        if let Some(old) = self.notify_guard.lock().await.replace(token.clone()) {
            old.cancel();
        }
        tokio::spawn(async move {
            if let Err(e) = p.subscribe(&c).await {
                let _ = events
                    .send(AdapterEvent::NotifyCompleted {
                        peripheral: pid,
                        characteristic: uuid,
                        enabled: true,
                        result: Err(e.to_string()),
                    })
                    .await;
                return;
            }
            let _ = events
                .send(AdapterEvent::NotifyCompleted {
                    peripheral: pid.clone(),
                    characteristic: uuid,
                    enabled: true,
                    result: Ok(()),
                })
                .await;

            let mut stream = match p.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "could not open notification stream");
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    notification = stream.next() => match notification {
                        Some(n) => {
                            let _ = events
                                .send(AdapterEvent::Notification {
                                    peripheral: pid.clone(),
                                    characteristic: n.uuid,
                                    value: n.value,
                                })
                                .await;
                        }
                        None => break,
                    },
                }
            }
            debug!("notification forwarder stopped");
        });
        Ok(())
    }

    async fn read_value(
        &self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), AdapterError> {
        let (p, c) = self.find_characteristic(peripheral, characteristic.uuid).await?;
        let events = self.events.clone();
        let pid = peripheral.clone();
        let uuid = characteristic.uuid;
        tokio::spawn(async move {
            let result = p.read(&c).await.map_err(|e| e.to_string());
            let _ = events
                .send(AdapterEvent::ValueRead {
                    peripheral: pid,
                    characteristic: uuid,
                    result,
                })
                .await;
        });
        Ok(())
    }

    async fn write_value(
        &self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicHandle,
        value: &[u8],
        with_response: bool,
    ) -> Result<(), AdapterError> {
        let (p, c) = self.find_characteristic(peripheral, characteristic.uuid).await?;
        let events = self.events.clone();
        let pid = peripheral.clone();
        let uuid = characteristic.uuid;
        let value = value.to_vec();
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        tokio::spawn(async move {
            let result = p.write(&c, &value, write_type).await.map_err(|e| e.to_string());
            let _ = events
                .send(AdapterEvent::WriteCompleted {
                    peripheral: pid,
                    characteristic: uuid,
                    result,
                })
                .await;
        });
        Ok(())
    }
}

/// Forward the platform central events the coordinator cares about.
///
/// Connect completions are reported by the spawned connect task, not
/// forwarded from here, so the coordinator sees exactly one report per
/// attempt.
async fn pump_central_events(
    mut central_events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
    central: Adapter,
    events: Sender<AdapterEvent>,
    known: Arc<Mutex<HashMap<PeripheralId, Peripheral>>>,
) {
    while let Some(event) = central_events.next().await {
        match event {
            CentralEvent::StateUpdate(state) => {
                let _ = events
                    .send(AdapterEvent::StateChanged(map_state(state)))
                    .await;
            }
            // Some platforms only report an already-seen peripheral as
            // updated when scanning restarts; treat both the same.
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let Ok(peripheral) = central.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(properties)) = peripheral.properties().await else {
                    continue;
                };
                if !properties.services.contains(&uuids::HEART_RATE_SERVICE) {
                    trace!(%id, "peripheral without heart rate service ignored");
                    continue;
                }
                let pid = PeripheralId::new(id.to_string());
                known.lock().await.insert(pid.clone(), peripheral);
                let _ = events
                    .send(AdapterEvent::PeripheralDiscovered {
                        peripheral: pid,
                        local_name: properties.local_name,
                    })
                    .await;
            }
            CentralEvent::DeviceDisconnected(id) => {
                let pid = PeripheralId::new(id.to_string());
                known.lock().await.remove(&pid);
                let _ = events
                    .send(AdapterEvent::Disconnected {
                        peripheral: pid,
                        reason: None,
                    })
                    .await;
            }
            _ => {}
        }
    }
    debug!("central event stream ended");
}

fn map_state(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::PoweredOff,
        _ => AdapterState::Unknown,
    }
}

fn backend(e: btleplug::Error) -> AdapterError {
    AdapterError::Backend(e.to_string())
}
