use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// Feature catalog known to the bridge.
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum FeatureId {
    Health,
    ProbeCapabilities,
    SetCredits,
    FreezeTimer,
    ToggleFogReveal,
    ToggleAi,
    SetUnitCap,
    ToggleInstantBuildPatch,
    SpawnUnitHelper,
    SetHeroStateHelper,
    ToggleRoeRespawnHelper,
}

impl FeatureId {
    /// Features served by plugins (everything except bridge-level commands).
    pub const PLUGIN_FEATURES: [FeatureId; 9] = [
        FeatureId::SetCredits,
        FeatureId::FreezeTimer,
        FeatureId::ToggleFogReveal,
        FeatureId::ToggleAi,
        FeatureId::SetUnitCap,
        FeatureId::ToggleInstantBuildPatch,
        FeatureId::SpawnUnitHelper,
        FeatureId::SetHeroStateHelper,
        FeatureId::ToggleRoeRespawnHelper,
    ];

    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Anchor names that may address this feature, in priority order.
    pub fn anchor_candidates(self) -> &'static [&'static str] {
        match self {
            FeatureId::SetCredits => &["credits", "set_credits"],
            FeatureId::FreezeTimer => &["game_timer_freeze", "freeze_timer"],
            FeatureId::ToggleFogReveal => &["fog_reveal", "toggle_fog_reveal"],
            FeatureId::ToggleAi => &["ai_enabled", "toggle_ai"],
            FeatureId::SetUnitCap => &["unit_cap", "set_unit_cap"],
            FeatureId::ToggleInstantBuildPatch => {
                &["instant_build_patch", "toggle_instant_build_patch"]
            }
            _ => &[],
        }
    }
}
