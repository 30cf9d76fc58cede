use crate::config::ActuatorConfig;
use crate::hardware::OutputLine;

/// One relay and the output line that drives it.
#[derive(Debug)]
pub struct Actuator<O> {
    id: u32,
    line: O,
    state: bool,
}

impl<O: OutputLine> Actuator<O> {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> bool {
        self.state
    }

    pub fn line(&self) -> &O {
        &self.line
    }
}

/// The fixed set of relays, built once from the wiring table.
#[derive(Debug)]
pub struct ActuatorBank<O> {
    actuators: Vec<Actuator<O>>,
}

impl<O: OutputLine> ActuatorBank<O> {
    /// Builds every actuator from its config entry and drives it low.
    pub fn new(config: &[ActuatorConfig], mut open_line: impl FnMut(u8) -> O) -> Self {
        let actuators = config
            .iter()
            .map(|entry| {
                let mut line = open_line(entry.line);
                line.set_level(false);
                Actuator {
                    id: entry.id,
                    line,
                    state: false,
                }
            })
            .collect();
        Self { actuators }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: u32) -> Option<&Actuator<O>> {
        self.actuators.iter().find(|actuator| actuator.id == id)
    }

    pub fn state(&self, id: u32) -> Option<bool> {
        self.get(id).map(Actuator::state)
    }

    pub fn states(&self) -> Vec<(u32, bool)> {
        self.actuators.iter().map(|a| (a.id, a.state)).collect()
    }

    pub fn len(&self) -> usize {
        self.actuators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actuators.is_empty()
    }

    /// Drives the actuator's line to `state`, even when it already holds it.
    /// Returns `None` for an unknown id, otherwise whether the state changed.
    pub fn set(&mut self, id: u32, state: bool) -> Option<bool> {
        let actuator = self.actuators.iter_mut().find(|a| a.id == id)?;
        actuator.line.set_level(state);
        let changed = actuator.state != state;
        actuator.state = state;
        Some(changed)
    }
}
