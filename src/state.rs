//! In-memory view of the amplifier.
//!
//! The reader task applies decoded broadcasts here and the command path applies
//! optimistic updates. Each zone sits behind its own mutex so updates to
//! different zones never contend; input names and device identity have their
//! own locks.

use crate::protocol::{Frame, NameKind, NameTable, ZoneStatus};
use crate::subscription::{StateUpdate, ZoneChange};
use crate::types::{
    default_input_name, DeviceInfo, DeviceSnapshot, InputId, Setting, ZoneField, ZoneId,
    ZoneState,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Thread-safe zone state cache with change notifications
pub struct StateCache {
    zones: BTreeMap<ZoneId, Mutex<ZoneState>>,
    inputs: RwLock<BTreeMap<InputId, String>>,
    device: RwLock<DeviceInfo>,
    stale: AtomicBool,
    input_count: u8,
    update_tx: broadcast::Sender<StateUpdate>,
}

impl StateCache {
    /// Create a cache with default values for every zone, marked stale until
    /// the first status burst arrives.
    pub fn new(zone_count: u8, input_count: u8, device: DeviceInfo) -> Self {
        let zones = (1..=zone_count)
            .map(|id| (id, Mutex::new(ZoneState::new(id))))
            .collect();
        let inputs = (1..=input_count)
            .map(|id| (id, default_input_name(id, input_count)))
            .collect();
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        Self {
            zones,
            inputs: RwLock::new(inputs),
            device: RwLock::new(device),
            stale: AtomicBool::new(true),
            input_count,
            update_tx,
        }
    }

    /// Last known state of a zone (possibly stale)
    pub fn get(&self, zone: ZoneId) -> Option<ZoneState> {
        self.zones.get(&zone).map(|z| lock(z).clone())
    }

    /// Copy of the whole device state
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            device: read(&self.device).clone(),
            zones: self
                .zones
                .iter()
                .map(|(id, z)| (*id, lock(z).clone()))
                .collect(),
            inputs: read(&self.inputs).clone(),
            stale: self.is_stale(),
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    pub fn device_info(&self) -> DeviceInfo {
        read(&self.device).clone()
    }

    pub fn input_names(&self) -> BTreeMap<InputId, String> {
        read(&self.inputs).clone()
    }

    /// Look up an input id by its exact name
    pub fn input_id(&self, name: &str) -> Option<InputId> {
        read(&self.inputs)
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| *id)
    }

    pub(crate) fn zone_count(&self) -> u8 {
        self.zones.len() as u8
    }

    pub(crate) fn input_count(&self) -> u8 {
        self.input_count
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StateUpdate> {
        self.update_tx.subscribe()
    }

    /// Apply an authoritative frame from the device.
    ///
    /// Returns the zones whose visible fields changed. Applying the same frame
    /// again returns an empty set.
    pub fn apply_broadcast(&self, frame: &Frame) -> BTreeSet<ZoneId> {
        match frame {
            Frame::Control { selector, setting } => {
                let mut changed = BTreeSet::new();
                for zone in selector.zones() {
                    if self.apply_settings(zone, &[*setting]) {
                        changed.insert(zone);
                    }
                }
                changed
            }
            Frame::Status(statuses) => {
                let changed = self.apply_status(statuses);
                self.clear_stale();
                changed
            }
            Frame::Names(table) => self.apply_names(table),
            Frame::Rename { kind, id, name } => self.apply_rename(*kind, *id, name),
            Frame::StatusQuery | Frame::Unknown { .. } => BTreeSet::new(),
        }
    }

    /// Reflect a just-issued command before the device confirms it.
    ///
    /// The next broadcast for the same field overwrites this value.
    pub fn apply_optimistic(&self, zone: ZoneId, setting: Setting) {
        if self.apply_settings(zone, &[setting]) {
            tracing::trace!(zone, field = %setting.field(), "Optimistic update");
        }
    }

    pub(crate) fn apply_optimistic_name(&self, kind: NameKind, id: u8, name: &str) {
        self.apply_rename(kind, id, name);
    }

    /// Flag the cache as possibly out of date (connection lost)
    pub(crate) fn mark_stale(&self) {
        if !self.stale.swap(true, Ordering::AcqRel) {
            tracing::debug!("State cache marked stale");
            let _ = self.update_tx.send(StateUpdate::Staleness(true));
        }
    }

    fn clear_stale(&self) {
        if self.stale.swap(false, Ordering::AcqRel) {
            tracing::debug!("State cache resynchronized");
            let _ = self.update_tx.send(StateUpdate::Staleness(false));
        }
    }

    /// Apply settings to one zone under its lock and notify once for all changed fields.
    fn apply_settings(&self, zone: ZoneId, settings: &[Setting]) -> bool {
        let Some(entry) = self.zones.get(&zone) else {
            tracing::debug!(zone, "Ignoring update for unknown zone");
            return false;
        };

        let fields: Vec<ZoneField> = {
            let mut state = lock(entry);
            settings
                .iter()
                .filter(|s| state.apply(**s, self.input_count))
                .map(Setting::field)
                .collect()
        };

        self.notify_zone(zone, fields)
    }

    fn apply_status(&self, statuses: &[ZoneStatus]) -> BTreeSet<ZoneId> {
        statuses
            .iter()
            .filter(|status| self.apply_settings(status.zone, &status.settings()))
            .map(|status| status.zone)
            .collect()
    }

    fn apply_names(&self, table: &NameTable) -> BTreeSet<ZoneId> {
        let mut changed = BTreeSet::new();
        for (index, name) in table.zones.iter().enumerate() {
            let zone = (index + 1) as ZoneId;
            if self.set_zone_name(zone, name) {
                changed.insert(zone);
            }
        }

        let inputs: BTreeMap<InputId, String> = (1..=self.input_count)
            .map(|id| {
                let name = table
                    .inputs
                    .get(id as usize - 1)
                    .cloned()
                    .unwrap_or_else(|| default_input_name(id, self.input_count));
                (id, name)
            })
            .collect();
        self.replace_inputs(inputs);

        let device = {
            let mut device = write(&self.device);
            if device.device_name.as_deref() == Some(table.device_name.as_str()) {
                None
            } else {
                device.device_name = Some(table.device_name.clone());
                Some(device.clone())
            }
        };
        if let Some(device) = device {
            tracing::info!(device_name = %table.device_name, "Device identified");
            let _ = self.update_tx.send(StateUpdate::Device(Box::new(device)));
        }

        changed
    }

    fn apply_rename(&self, kind: NameKind, id: u8, name: &str) -> BTreeSet<ZoneId> {
        match kind {
            NameKind::Zone => {
                if self.set_zone_name(id, name) {
                    return BTreeSet::from([id]);
                }
            }
            NameKind::Input => {
                let renamed = {
                    let mut inputs = write(&self.inputs);
                    match inputs.get_mut(&id) {
                        Some(current) if current.as_str() != name => {
                            *current = name.to_string();
                            Some(inputs.clone())
                        }
                        _ => None,
                    }
                };
                if let Some(inputs) = renamed {
                    let _ = self.update_tx.send(StateUpdate::InputNames(inputs));
                }
            }
        }
        BTreeSet::new()
    }

    fn set_zone_name(&self, zone: ZoneId, name: &str) -> bool {
        let Some(entry) = self.zones.get(&zone) else {
            return false;
        };
        let changed = lock(entry).set_name(name);
        if changed {
            self.notify_zone(zone, vec![ZoneField::Name]);
        }
        changed
    }

    fn replace_inputs(&self, inputs: BTreeMap<InputId, String>) {
        {
            let mut current = write(&self.inputs);
            if *current == inputs {
                return;
            }
            *current = inputs.clone();
        }
        let _ = self.update_tx.send(StateUpdate::InputNames(inputs));
    }

    fn notify_zone(&self, zone: ZoneId, fields: Vec<ZoneField>) -> bool {
        if fields.is_empty() {
            return false;
        }
        tracing::debug!(zone, ?fields, "Zone state changed");
        let _ = self
            .update_tx
            .send(StateUpdate::Zone(ZoneChange { zone, fields }));
        true
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BALANCE_MAX, TONE_MIN, VOLUME_MAX};
    use crate::zones::ZoneSelector;

    fn cache() -> StateCache {
        StateCache::new(8, 8, DeviceInfo::new("Amp", "127.0.0.1:8899"))
    }

    fn volume(zones: &[ZoneId], value: u8) -> Frame {
        Frame::control(
            ZoneSelector::for_zones(zones.iter().copied(), 8).unwrap(),
            Setting::Volume(value),
        )
    }

    fn status(volume: u8) -> Frame {
        Frame::Status(
            (1..=8)
                .map(|zone| ZoneStatus {
                    zone,
                    power: true,
                    volume,
                    mute: false,
                    balance: 0,
                    bass: 0,
                    treble: 0,
                    input: 1,
                })
                .collect(),
        )
    }

    #[test]
    fn broadcast_updates_zone_and_notifies_once() {
        let cache = cache();
        let mut rx = cache.subscribe();

        let changed = cache.apply_broadcast(&volume(&[3], 25));
        assert_eq!(changed, BTreeSet::from([3]));
        assert_eq!(cache.get(3).unwrap().volume, 25);

        assert_eq!(
            rx.try_recv().unwrap(),
            StateUpdate::Zone(ZoneChange {
                zone: 3,
                fields: vec![ZoneField::Volume],
            })
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn applying_the_same_frame_twice_is_idempotent() {
        let cache = cache();
        let frame = volume(&[1, 2], 10);
        assert_eq!(cache.apply_broadcast(&frame).len(), 2);
        assert!(cache.apply_broadcast(&frame).is_empty());

        let burst = status(12);
        assert_eq!(cache.apply_broadcast(&burst).len(), 8);
        assert!(cache.apply_broadcast(&burst).is_empty());
    }

    #[test]
    fn group_frame_updates_every_selected_zone() {
        let cache = cache();
        let frame = Frame::control(ZoneSelector::all(8), Setting::Mute(true));
        assert_eq!(cache.apply_broadcast(&frame), (1..=8).collect());
        assert!((1..=8).all(|z| cache.get(z).unwrap().mute));
    }

    #[test]
    fn adversarial_values_are_clamped() {
        let cache = cache();
        let selector = ZoneSelector::single(4, 8).unwrap();
        cache.apply_broadcast(&Frame::control(selector, Setting::Volume(254)));
        cache.apply_broadcast(&Frame::control(selector, Setting::Balance(127)));
        cache.apply_broadcast(&Frame::control(selector, Setting::Bass(-128)));
        cache.apply_optimistic(4, Setting::Treble(100));

        let zone = cache.get(4).unwrap();
        assert_eq!(zone.volume, VOLUME_MAX);
        assert_eq!(zone.balance, BALANCE_MAX);
        assert_eq!(zone.bass, TONE_MIN);
        assert_eq!(zone.treble, 12);
    }

    #[test]
    fn broadcast_overwrites_optimistic_value() {
        let cache = cache();
        cache.apply_optimistic(2, Setting::Volume(30));
        assert_eq!(cache.get(2).unwrap().volume, 30);
        cache.apply_broadcast(&volume(&[2], 28));
        assert_eq!(cache.get(2).unwrap().volume, 28);
    }

    #[test]
    fn status_burst_clears_staleness() {
        let cache = cache();
        let mut rx = cache.subscribe();
        assert!(cache.is_stale());

        cache.apply_broadcast(&status(5));
        assert!(!cache.is_stale());

        cache.mark_stale();
        assert!(cache.snapshot().stale);

        let updates: Vec<StateUpdate> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(updates.contains(&StateUpdate::Staleness(false)));
        assert_eq!(updates.last(), Some(&StateUpdate::Staleness(true)));
    }

    #[test]
    fn name_table_fills_missing_inputs_with_defaults() {
        let cache = cache();
        let table = NameTable {
            device_name: "DAX 88_616E".to_string(),
            zones: vec!["Living Room".to_string(), "Kitchen".to_string()],
            inputs: vec!["TV".to_string(), "Google Music".to_string()],
        };
        let changed = cache.apply_broadcast(&Frame::Names(table.clone()));
        assert_eq!(changed, BTreeSet::from([1, 2]));

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.zone(1).unwrap().name, "Living Room");
        assert_eq!(snapshot.zone(3).unwrap().name, "Zone 3");
        assert_eq!(snapshot.input_name(2), Some("Google Music"));
        assert_eq!(snapshot.input_name(3), Some("Input3"));
        assert_eq!(snapshot.input_name(8), Some("Wi-Fi"));
        assert_eq!(snapshot.device.device_name.as_deref(), Some("DAX 88_616E"));
        assert_eq!(cache.input_id("TV"), Some(1));

        assert!(cache.apply_broadcast(&Frame::Names(table)).is_empty());
    }

    #[test]
    fn rename_echo_updates_names() {
        let cache = cache();
        cache.apply_broadcast(&Frame::Rename {
            kind: NameKind::Input,
            id: 3,
            name: "Vinyl".to_string(),
        });
        assert_eq!(cache.input_id("Vinyl"), Some(3));

        let changed = cache.apply_broadcast(&Frame::Rename {
            kind: NameKind::Zone,
            id: 6,
            name: "Patio".to_string(),
        });
        assert_eq!(changed, BTreeSet::from([6]));
        assert_eq!(cache.get(6).unwrap().name, "Patio");
    }

    #[test]
    fn input_rename_keeps_other_names_and_notifies_once() {
        let cache = cache();
        cache.apply_broadcast(&Frame::Names(NameTable {
            device_name: "Amp".to_string(),
            zones: Vec::new(),
            inputs: vec!["TV".to_string(), "Phono".to_string()],
        }));
        let mut rx = cache.subscribe();

        let rename = Frame::Rename {
            kind: NameKind::Input,
            id: 2,
            name: "Vinyl".to_string(),
        };
        cache.apply_broadcast(&rename);
        cache.apply_broadcast(&rename);
        cache.apply_optimistic_name(NameKind::Input, 9, "Nowhere");

        let names = cache.input_names();
        assert_eq!(names.get(&1).map(String::as_str), Some("TV"));
        assert_eq!(names.get(&2).map(String::as_str), Some("Vinyl"));
        assert_eq!(names.len(), 8);

        assert_eq!(rx.try_recv().unwrap(), StateUpdate::InputNames(names));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unknown_zone_is_ignored() {
        let cache = StateCache::new(4, 8, DeviceInfo::new("Amp", "host:1"));
        let frame = volume(&[7], 10);
        assert!(cache.apply_broadcast(&frame).is_empty());
        assert!(cache.get(7).is_none());
    }
}
