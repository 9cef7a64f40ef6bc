use crate::commands::CommandDispatcher;
use crate::error::Result;
use crate::state::StateCache;
use crate::types::{InputId, ZoneId, ZoneState};
use std::sync::Arc;

/// Interface for controlling one zone
///
/// A `Zone` is a thin handle: reads come from the shared state cache and
/// writes go through the client's [`CommandDispatcher`], so any number of
/// handles for the same zone stay consistent.
#[derive(Clone)]
pub struct Zone {
    id: ZoneId,
    commands: CommandDispatcher,
    cache: Arc<StateCache>,
}

impl Zone {
    pub(crate) fn new(id: ZoneId, commands: CommandDispatcher, cache: Arc<StateCache>) -> Self {
        Self {
            id,
            commands,
            cache,
        }
    }

    pub fn id(&self) -> ZoneId {
        self.id
    }

    /// Get a snapshot of the zone's last known state
    pub fn state(&self) -> ZoneState {
        self.cache
            .get(self.id)
            .unwrap_or_else(|| ZoneState::new(self.id))
    }

    pub fn name(&self) -> String {
        self.state().name
    }

    /// Name of the input this zone is playing
    pub fn input_name(&self) -> Option<String> {
        let input = self.state().input;
        self.cache.input_names().get(&input).cloned()
    }

    // ========== Power & Volume ==========

    /// Turn the zone on or off
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use matrio_control::{ClientConfig, MatrioClient};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let client = MatrioClient::connect(ClientConfig::new("192.168.1.50")).await?;
    /// let kitchen = client.zone(2)?;
    /// kitchen.set_power(true)?;
    /// kitchen.set_volume(15)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn set_power(&self, on: bool) -> Result<()> {
        self.commands.set_power([self.id], on)
    }

    pub fn set_volume(&self, volume: u8) -> Result<()> {
        self.commands.set_volume([self.id], volume)
    }

    pub fn set_mute(&self, muted: bool) -> Result<()> {
        self.commands.set_mute([self.id], muted)
    }

    // ========== Tone ==========

    pub fn set_balance(&self, balance: i8) -> Result<()> {
        self.commands.set_balance([self.id], balance)
    }

    pub fn set_bass(&self, bass: i8) -> Result<()> {
        self.commands.set_bass([self.id], bass)
    }

    pub fn set_treble(&self, treble: i8) -> Result<()> {
        self.commands.set_treble([self.id], treble)
    }

    // ========== Input Selection ==========

    pub fn set_input(&self, input: InputId) -> Result<()> {
        self.commands.set_input([self.id], input)
    }

    /// Select an input by name, e.g. `"TV"`
    pub fn select_input_by_name(&self, name: &str) -> Result<()> {
        self.commands.select_input_by_name([self.id], name)
    }

    pub fn set_name(&self, name: &str) -> Result<()> {
        self.commands.set_zone_name(self.id, name)
    }
}
