use alloy_primitives::{map::AddressHashMap, Address};

use crate::{ControlConfig, ControlRegistry};

/// A fixed set of approved controllers.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    controls: AddressHashMap<ControlConfig>,
}

impl StaticRegistry {
    /// Approves `control` with `config`.
    pub fn set_control(&mut self, control: Address, config: ControlConfig) {
        self.controls.insert(control, config);
    }

    /// Approves `control` with `config`.
    pub fn control(mut self, control: Address, config: ControlConfig) -> Self {
        self.set_control(control, config);
        self
    }
}

impl ControlRegistry for StaticRegistry {
    fn control_config(&self, control: Address) -> Option<ControlConfig> {
        self.controls.get(&control).copied()
    }
}
