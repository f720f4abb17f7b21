//! Feature routing: bridge-level commands and the static feature to plugin table.

use crate::diagnostics;
use crate::memory::ProcessMemory;
use crate::plugin::{
    BuildPatchPlugin, EconomyPlugin, GlobalTogglePlugin, HelperPlugin, Plugin, PluginRequest,
};
use crate::probe::ProbeContext;
use crate::protocol::{
    BridgeResult, CapabilityEntry, CapabilitySnapshot, Command, FeatureId, HookState, ReasonCode,
};
use crate::transport::CommandHandler;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum PluginKind {
    Economy,
    GlobalToggle,
    BuildPatch,
    Helper,
}

static FEATURE_TABLE: [(FeatureId, PluginKind); 9] = [
    (FeatureId::SetCredits, PluginKind::Economy),
    (FeatureId::FreezeTimer, PluginKind::GlobalToggle),
    (FeatureId::ToggleFogReveal, PluginKind::GlobalToggle),
    (FeatureId::ToggleAi, PluginKind::GlobalToggle),
    (FeatureId::SetUnitCap, PluginKind::BuildPatch),
    (FeatureId::ToggleInstantBuildPatch, PluginKind::BuildPatch),
    (FeatureId::SpawnUnitHelper, PluginKind::Helper),
    (FeatureId::SetHeroStateHelper, PluginKind::Helper),
    (FeatureId::ToggleRoeRespawnHelper, PluginKind::Helper),
];

/// Owns the plugin set and turns commands into results.
pub struct Dispatcher {
    economy: EconomyPlugin,
    global_toggle: GlobalTogglePlugin,
    build_patch: BuildPatchPlugin,
    helper: HelperPlugin,
    started: Instant,
}

impl Dispatcher {
    pub fn new(memory: Arc<dyn ProcessMemory>) -> Self {
        Self {
            economy: EconomyPlugin::new(memory.clone()),
            global_toggle: GlobalTogglePlugin::new(memory.clone()),
            build_patch: BuildPatchPlugin::new(memory),
            helper: HelperPlugin::new(),
            started: Instant::now(),
        }
    }

    pub fn economy(&self) -> &EconomyPlugin {
        &self.economy
    }

    pub fn global_toggle(&self) -> &GlobalTogglePlugin {
        &self.global_toggle
    }

    pub fn build_patch(&self) -> &BuildPatchPlugin {
        &self.build_patch
    }

    pub fn helper(&self) -> &HelperPlugin {
        &self.helper
    }

    fn plugins(&self) -> [&dyn Plugin; 4] {
        [
            &self.economy,
            &self.global_toggle,
            &self.build_patch,
            &self.helper,
        ]
    }

    /// Plugin serving a feature, none for bridge-level features.
    pub fn plugin_for(&self, feature: FeatureId) -> Option<&dyn Plugin> {
        let (_, kind) = FEATURE_TABLE.iter().find(|(f, _)| *f == feature)?;
        let plugin: &dyn Plugin = match kind {
            PluginKind::Economy => &self.economy,
            PluginKind::GlobalToggle => &self.global_toggle,
            PluginKind::BuildPatch => &self.build_patch,
            PluginKind::Helper => &self.helper,
        };
        Some(plugin)
    }

    pub fn dispatch(&self, command: &Command) -> BridgeResult {
        log::debug!(
            target: "dispatch",
            "command {} feature '{}' (profile: '{}', mode: '{}', requested by: '{}', at: '{}')",
            command.command_id,
            command.feature_id,
            command.profile_id,
            command.mode,
            command.requested_by,
            command.timestamp_utc,
        );

        let Ok(feature) = FeatureId::from_str(&command.feature_id) else {
            log::warn!(target: "dispatch", "unsupported feature '{}'", command.feature_id);
            return BridgeResult::new(
                &command.command_id,
                false,
                ReasonCode::CapabilityRequiredMissing,
                HookState::Denied,
                "Feature not supported by current extender host.",
                diagnostics! {"featureId" => command.feature_id},
            );
        };

        match feature {
            FeatureId::Health => self.health(command),
            FeatureId::ProbeCapabilities => self.probe_capabilities(command),
            _ => self.execute(feature, command),
        }
    }

    fn health(&self, command: &Command) -> BridgeResult {
        BridgeResult::new(
            &command.command_id,
            true,
            ReasonCode::CapabilityProbePass,
            HookState::Running,
            "Extender bridge is healthy.",
            diagnostics! {
                "bridge" => "active",
                "uptimeSecs" => self.started.elapsed().as_secs(),
            },
        )
    }

    fn probe_capabilities(&self, command: &Command) -> BridgeResult {
        let context = ProbeContext::from_command(command);

        let mut capabilities: CapabilitySnapshot = FeatureId::PLUGIN_FEATURES
            .iter()
            .map(|&feature| (feature, CapabilityEntry::unknown()))
            .collect();

        for plugin in self.plugins() {
            let last_known = plugin.capability_snapshot();
            for (feature, mut entry) in plugin.probe(&context) {
                if let Some(hook_state) = last_known
                    .get(&feature)
                    .and_then(|known| known.diagnostics.get("hookState"))
                {
                    entry
                        .diagnostics
                        .insert("lastHookState".to_string(), hook_state.clone());
                }
                capabilities.insert(feature, entry);
            }
        }

        let available = capabilities.values().filter(|entry| entry.available).count();
        let hook_state = if available > 0 {
            HookState::Ready
        } else {
            HookState::NotInstalled
        };
        log::info!(
            target: "dispatch",
            "probe for process {}: {available} of {} features available",
            context.process_id,
            capabilities.len()
        );

        let mut result = BridgeResult::new(
            &command.command_id,
            true,
            ReasonCode::CapabilityProbePass,
            hook_state,
            "Capability probe completed.",
            diagnostics! {
                "bridge" => "active",
                "processId" => context.process_id,
                "anchorCount" => context.anchors.len(),
                "availableCount" => available,
            },
        );
        result.capabilities = Some(capabilities);
        result
    }

    fn execute(&self, feature: FeatureId, command: &Command) -> BridgeResult {
        let Some(plugin) = self.plugin_for(feature) else {
            return BridgeResult::new(
                &command.command_id,
                false,
                ReasonCode::CapabilityRequiredMissing,
                HookState::Denied,
                "Feature not supported by current extender host.",
                diagnostics! {"featureId" => feature},
            );
        };

        let request = PluginRequest::from_command(feature, command);
        let outcome = plugin.execute(&request);
        if outcome.succeeded {
            log::info!(target: "dispatch", "{feature} via {}: {}", plugin.id(), outcome.reason_code);
        } else {
            log::warn!(
                target: "dispatch",
                "{feature} via {} rejected: {} ({})",
                plugin.id(),
                outcome.reason_code,
                outcome.message
            );
        }

        BridgeResult::new(
            &command.command_id,
            outcome.succeeded,
            outcome.reason_code,
            outcome.hook_state,
            outcome.message,
            outcome.diagnostics,
        )
    }
}

impl CommandHandler for Dispatcher {
    fn handle(&self, command: &Command) -> BridgeResult {
        self.dispatch(command)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::memory::ProcMemory;

    #[test]
    fn test_feature_table_matches_plugins() {
        let dispatcher = Dispatcher::new(Arc::new(ProcMemory));
        for feature in FeatureId::PLUGIN_FEATURES {
            let plugin = dispatcher.plugin_for(feature).unwrap();
            assert!(plugin.features().contains(&feature), "{feature}");
        }
        assert!(dispatcher.plugin_for(FeatureId::Health).is_none());
        assert!(dispatcher.plugin_for(FeatureId::ProbeCapabilities).is_none());
    }
}
