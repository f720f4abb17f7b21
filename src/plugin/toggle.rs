use crate::diagnostics;
use crate::memory::{ProcessMemory, WriteMode};
use crate::plugin::state::{FeatureState, FeatureStateCell};
use crate::plugin::{
    resolve_target, unsupported_feature, write_failed, Plugin, PluginRequest, PluginResult,
};
use crate::probe::{probe_memory_feature, ProbeContext};
use crate::protocol::{CapabilityEntry, CapabilitySnapshot, FeatureId, ReasonCode};
use std::sync::Arc;

const FEATURES: &[FeatureId] = &[
    FeatureId::FreezeTimer,
    FeatureId::ToggleFogReveal,
    FeatureId::ToggleAi,
];

/// Single byte on/off switches, applied once per request.
pub struct GlobalTogglePlugin {
    memory: Arc<dyn ProcessMemory>,
    freeze_timer: FeatureStateCell,
    fog_reveal: FeatureStateCell,
    ai: FeatureStateCell,
}

impl GlobalTogglePlugin {
    pub fn new(memory: Arc<dyn ProcessMemory>) -> Self {
        Self {
            memory,
            freeze_timer: FeatureStateCell::default(),
            fog_reveal: FeatureStateCell::default(),
            ai: FeatureStateCell::default(),
        }
    }

    pub fn state(&self, feature: FeatureId) -> Option<FeatureState> {
        self.cell(feature).map(FeatureStateCell::load)
    }

    fn cell(&self, feature: FeatureId) -> Option<&FeatureStateCell> {
        match feature {
            FeatureId::FreezeTimer => Some(&self.freeze_timer),
            FeatureId::ToggleFogReveal => Some(&self.fog_reveal),
            FeatureId::ToggleAi => Some(&self.ai),
            _ => None,
        }
    }

    fn toggle(
        &self,
        request: &PluginRequest,
        cell: &FeatureStateCell,
    ) -> Result<PluginResult, PluginResult> {
        let target = resolve_target(self.id(), request)?;
        let enabled = request.bool_value;

        let write = self
            .memory
            .write(
                target.pid,
                target.address,
                &[u8::from(enabled)],
                WriteMode::Data,
            )
            .map_err(|err| write_failed(request.feature, &target, &err))?;

        let state = FeatureState::from_enabled(enabled);
        cell.store(state);
        log::info!(
            target: "plugin",
            "{} switched {} at {:#X} (process {})",
            request.feature,
            if enabled { "on" } else { "off" },
            target.address,
            target.pid
        );

        let mut diagnostics = target.diagnostics(request.feature);
        diagnostics.insert("boolValue".to_string(), enabled.to_string());
        diagnostics.extend(write.entries().into_iter().map(|(k, v)| (k.to_string(), v)));

        Ok(PluginResult::success(
            ReasonCode::CapabilityProbePass,
            state.hook_state(),
            "Global toggle mutation applied by extender plugin.",
            diagnostics,
        ))
    }
}

impl Plugin for GlobalTogglePlugin {
    fn id(&self) -> &'static str {
        "global_toggle"
    }

    fn features(&self) -> &'static [FeatureId] {
        FEATURES
    }

    fn execute(&self, request: &PluginRequest) -> PluginResult {
        let Some(cell) = self.cell(request.feature) else {
            return unsupported_feature(self.id(), request);
        };

        match self.toggle(request, cell) {
            Ok(result) | Err(result) => result,
        }
    }

    fn capability_snapshot(&self) -> CapabilitySnapshot {
        FEATURES
            .iter()
            .filter_map(|&feature| {
                let state = self.state(feature)?;
                let entry = CapabilityEntry::verified()
                    .with_diagnostics(diagnostics! {"hookState" => state.hook_state()});
                Some((feature, entry))
            })
            .collect()
    }

    fn probe(&self, context: &ProbeContext) -> CapabilitySnapshot {
        FEATURES
            .iter()
            .map(|&feature| {
                (
                    feature,
                    probe_memory_feature(self.memory.as_ref(), context, feature),
                )
            })
            .collect()
    }
}
