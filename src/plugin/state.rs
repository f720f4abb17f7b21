use crate::protocol::HookState;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a toggle-capable feature.
///
/// `NotInstalled` is left on the first successful mutation and never re-entered.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum FeatureState {
    NotInstalled = 0,
    Enabled = 1,
    Disabled = 2,
}

impl From<u8> for FeatureState {
    fn from(value: u8) -> Self {
        match value {
            1 => FeatureState::Enabled,
            2 => FeatureState::Disabled,
            _ => FeatureState::NotInstalled,
        }
    }
}

impl FeatureState {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            FeatureState::Enabled
        } else {
            FeatureState::Disabled
        }
    }

    pub fn hook_state(self) -> HookState {
        match self {
            FeatureState::NotInstalled => HookState::NotInstalled,
            FeatureState::Enabled => HookState::Enabled,
            FeatureState::Disabled => HookState::Disabled,
        }
    }
}

/// Last known feature state, written only after a successful mutation.
#[derive(Debug, Default)]
pub struct FeatureStateCell(AtomicU8);

impl FeatureStateCell {
    pub fn load(&self) -> FeatureState {
        FeatureState::from(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: FeatureState) {
        self.0.store(state as u8, Ordering::Release)
    }

    pub fn is_installed(&self) -> bool {
        self.load() != FeatureState::NotInstalled
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_feature_state_cell() {
        let cell = FeatureStateCell::default();
        assert_eq!(cell.load(), FeatureState::NotInstalled);
        assert!(!cell.is_installed());

        cell.store(FeatureState::from_enabled(false));
        assert_eq!(cell.load(), FeatureState::Disabled);
        assert_eq!(cell.load().hook_state(), HookState::Disabled);

        cell.store(FeatureState::from_enabled(true));
        assert_eq!(cell.load(), FeatureState::Enabled);
        assert!(cell.is_installed());
    }
}
