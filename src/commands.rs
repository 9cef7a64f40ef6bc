use crate::connection::ConnectionManager;
use crate::error::{MatrioError, Result};
use crate::protocol::{quantize_balance, Frame, NameKind};
use crate::state::StateCache;
use crate::types::{
    InputId, Setting, ZoneId, BALANCE_MAX, BALANCE_MIN, MAX_NAME_LEN, TONE_MAX, TONE_MIN,
    VOLUME_MAX, VOLUME_MIN,
};
use crate::zones::ZoneSelector;
use std::sync::Arc;

/// Issues commands to the amplifier
///
/// Every command is validated before any I/O, reflected in the state cache as
/// an optimistic update, and then queued on the connection's writer. No
/// command waits for the device to confirm; the next broadcast for the same
/// field is authoritative.
///
/// Commands take any collection of zone ids, so one call can address a group:
///
/// ```no_run
/// # use matrio_control::{ClientConfig, MatrioClient};
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = MatrioClient::connect(ClientConfig::new("192.168.1.50")).await?;
/// let commands = client.commands();
/// commands.set_power([1, 2], true)?;
/// commands.set_volume([1, 2], 18)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CommandDispatcher {
    manager: Arc<ConnectionManager>,
    cache: Arc<StateCache>,
}

impl CommandDispatcher {
    pub(crate) fn new(manager: Arc<ConnectionManager>, cache: Arc<StateCache>) -> Self {
        Self { manager, cache }
    }

    // ========== Zone Controls ==========

    pub fn set_power<I>(&self, zones: I, on: bool) -> Result<()>
    where
        I: IntoIterator<Item = ZoneId>,
    {
        self.dispatch(zones, Setting::Power(on))
    }

    /// Set volume on the 0-38 scale
    pub fn set_volume<I>(&self, zones: I, volume: u8) -> Result<()>
    where
        I: IntoIterator<Item = ZoneId>,
    {
        check_range("volume", volume as i32, (VOLUME_MIN as i32, VOLUME_MAX as i32))?;
        self.dispatch(zones, Setting::Volume(volume))
    }

    pub fn set_mute<I>(&self, zones: I, muted: bool) -> Result<()>
    where
        I: IntoIterator<Item = ZoneId>,
    {
        self.dispatch(zones, Setting::Mute(muted))
    }

    /// Set balance from -100 (full left) to 100 (full right)
    ///
    /// The device has 30 steps per side; the cache records the step the device
    /// will actually report.
    pub fn set_balance<I>(&self, zones: I, balance: i8) -> Result<()>
    where
        I: IntoIterator<Item = ZoneId>,
    {
        check_range("balance", balance as i32, (BALANCE_MIN as i32, BALANCE_MAX as i32))?;
        self.dispatch(zones, Setting::Balance(balance))
    }

    pub fn set_bass<I>(&self, zones: I, bass: i8) -> Result<()>
    where
        I: IntoIterator<Item = ZoneId>,
    {
        check_range("bass", bass as i32, (TONE_MIN as i32, TONE_MAX as i32))?;
        self.dispatch(zones, Setting::Bass(bass))
    }

    pub fn set_treble<I>(&self, zones: I, treble: i8) -> Result<()>
    where
        I: IntoIterator<Item = ZoneId>,
    {
        check_range("treble", treble as i32, (TONE_MIN as i32, TONE_MAX as i32))?;
        self.dispatch(zones, Setting::Treble(treble))
    }

    pub fn set_input<I>(&self, zones: I, input: InputId) -> Result<()>
    where
        I: IntoIterator<Item = ZoneId>,
    {
        self.check_input(input)?;
        self.dispatch(zones, Setting::Input(input))
    }

    /// Select an input by its current name (exact, case-sensitive match)
    pub fn select_input_by_name<I>(&self, zones: I, name: &str) -> Result<()>
    where
        I: IntoIterator<Item = ZoneId>,
    {
        let input = self
            .cache
            .input_id(name)
            .ok_or_else(|| MatrioError::UnknownInput(name.to_string()))?;
        self.set_input(zones, input)
    }

    // ========== Names ==========

    pub fn set_zone_name(&self, zone: ZoneId, name: &str) -> Result<()> {
        if zone == 0 || zone > self.cache.zone_count() {
            return Err(MatrioError::InvalidZone(zone));
        }
        self.rename(NameKind::Zone, zone, name)
    }

    pub fn set_input_name(&self, input: InputId, name: &str) -> Result<()> {
        self.check_input(input)?;
        self.rename(NameKind::Input, input, name)
    }

    // ========== Status ==========

    /// Ask the device for a full status burst and name table
    pub fn refresh(&self) -> Result<()> {
        self.manager.send(&Frame::StatusQuery)
    }

    fn dispatch<I>(&self, zones: I, setting: Setting) -> Result<()>
    where
        I: IntoIterator<Item = ZoneId>,
    {
        let selector = ZoneSelector::for_zones(zones, self.cache.zone_count())?;
        let applied = match setting {
            Setting::Balance(v) => Setting::Balance(quantize_balance(v)),
            other => other,
        };

        self.manager.send_with(&Frame::control(selector, setting), || {
            for zone in selector.zones() {
                self.cache.apply_optimistic(zone, applied);
            }
        })
    }

    fn rename(&self, kind: NameKind, id: u8, name: &str) -> Result<()> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(MatrioError::InvalidName(name.to_string()));
        }
        let frame = Frame::Rename {
            kind,
            id,
            name: name.to_string(),
        };
        self.manager
            .send_with(&frame, || self.cache.apply_optimistic_name(kind, id, name))
    }

    fn check_input(&self, input: InputId) -> Result<()> {
        if input == 0 || input > self.cache.input_count() {
            return Err(MatrioError::InvalidInput(input));
        }
        Ok(())
    }
}

fn check_range(field: &'static str, value: i32, range: (i32, i32)) -> Result<()> {
    if value < range.0 || value > range.1 {
        return Err(MatrioError::out_of_range(field, value, range));
    }
    Ok(())
}
