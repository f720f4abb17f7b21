use crate::diagnostics;
use crate::plugin::{unsupported_feature, Plugin, PluginRequest, PluginResult};
use crate::probe::{probe_helper_feature, ProbeContext};
use crate::protocol::{
    CapabilityEntry, CapabilitySnapshot, Diagnostics, FeatureId, HookState, ReasonCode,
};
use std::sync::atomic::{AtomicU64, Ordering};

const FEATURES: &[FeatureId] = &[
    FeatureId::SpawnUnitHelper,
    FeatureId::SetHeroStateHelper,
    FeatureId::ToggleRoeRespawnHelper,
];

/// Validates helper invocations and records them as applied by the native bridge.
#[derive(Default)]
pub struct HelperPlugin {
    spawn_unit: AtomicU64,
    hero_state: AtomicU64,
    roe_respawn: AtomicU64,
}

impl HelperPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of applied invocations of a helper feature.
    pub fn invocations(&self, feature: FeatureId) -> Option<u64> {
        self.counter(feature)
            .map(|counter| counter.load(Ordering::Acquire))
    }

    fn counter(&self, feature: FeatureId) -> Option<&AtomicU64> {
        match feature {
            FeatureId::SpawnUnitHelper => Some(&self.spawn_unit),
            FeatureId::SetHeroStateHelper => Some(&self.hero_state),
            FeatureId::ToggleRoeRespawnHelper => Some(&self.roe_respawn),
            _ => None,
        }
    }

    fn invoke(&self, request: &PluginRequest, counter: &AtomicU64) -> Result<PluginResult, PluginResult> {
        let feature = request.feature;
        let helper = &request.helper;

        if request.process_id <= 0 {
            return Err(PluginResult::denied(
                ReasonCode::HelperBridgeUnavailable,
                "Helper bridge requires an attached process.",
                diagnostics! {
                    "featureId" => feature,
                    "processId" => request.process_id,
                    "helperHookId" => helper.hook_id,
                    "helperEntryPoint" => helper.entry_point,
                },
            ));
        }

        if helper.hook_id.is_empty() || helper.entry_point.is_empty() {
            return Err(PluginResult::denied(
                ReasonCode::HelperEntrypointNotFound,
                "Helper hook or entry point is not specified.",
                diagnostics! {
                    "featureId" => feature,
                    "helperHookId" => helper.hook_id,
                    "helperEntryPoint" => helper.entry_point,
                },
            ));
        }

        let missing = match feature {
            FeatureId::SpawnUnitHelper => [
                ("unitId", &helper.unit_id),
                ("entryMarker", &helper.entry_marker),
                ("faction", &helper.faction),
            ]
            .into_iter()
            .find(|(_, value)| value.is_empty())
            .map(|(field, _)| field),
            FeatureId::SetHeroStateHelper if helper.global_key.is_empty() => Some("globalKey"),
            _ => None,
        };
        if let Some(field) = missing {
            return Err(PluginResult::denied(
                ReasonCode::HelperInvocationFailed,
                format!("{feature} requires {field}."),
                diagnostics! {
                    "featureId" => feature,
                    "requiredField" => field,
                    "helperHookId" => helper.hook_id,
                },
            ));
        }

        let count = counter.fetch_add(1, Ordering::AcqRel) + 1;
        log::info!(
            target: "plugin",
            "{feature} applied via {}::{} (process {}, invocation {count})",
            helper.hook_id, helper.entry_point, request.process_id
        );

        Ok(PluginResult::success(
            ReasonCode::HelperExecutionApplied,
            HookState::OneShot,
            "Helper bridge operation applied through native helper bridge.",
            Self::applied_diagnostics(request),
        ))
    }

    fn applied_diagnostics(request: &PluginRequest) -> Diagnostics {
        let helper = &request.helper;
        let mut diagnostics = diagnostics! {
            "featureId" => request.feature,
            "helperHookId" => helper.hook_id,
            "helperEntryPoint" => helper.entry_point,
            "helperScript" => helper.script,
            "helperInvocationSource" => "native_bridge",
            "helperVerifyState" => "applied",
            "processId" => request.process_id,
            "boolValue" => request.bool_value,
        };
        for (key, value) in [
            ("unitId", &helper.unit_id),
            ("entryMarker", &helper.entry_marker),
            ("faction", &helper.faction),
            ("globalKey", &helper.global_key),
        ] {
            if !value.is_empty() {
                diagnostics.insert(key.to_string(), value.clone());
            }
        }
        if let Some(value) = request.int_value {
            diagnostics.insert("intValue".to_string(), value.to_string());
        }
        diagnostics
    }
}

impl Plugin for HelperPlugin {
    fn id(&self) -> &'static str {
        "helper"
    }

    fn features(&self) -> &'static [FeatureId] {
        FEATURES
    }

    fn execute(&self, request: &PluginRequest) -> PluginResult {
        let Some(counter) = self.counter(request.feature) else {
            return unsupported_feature(self.id(), request);
        };

        match self.invoke(request, counter) {
            Ok(result) | Err(result) => result,
        }
    }

    fn capability_snapshot(&self) -> CapabilitySnapshot {
        FEATURES
            .iter()
            .filter_map(|&feature| {
                let count = self.invocations(feature)?;
                let hook_state = if count > 0 {
                    HookState::OneShot
                } else {
                    HookState::NotInstalled
                };
                let entry = CapabilityEntry::experimental().with_diagnostics(diagnostics! {
                    "hookState" => hook_state,
                    "invocations" => count,
                });
                Some((feature, entry))
            })
            .collect()
    }

    fn probe(&self, context: &ProbeContext) -> CapabilitySnapshot {
        FEATURES
            .iter()
            .map(|&feature| (feature, probe_helper_feature(context, feature)))
            .collect()
    }
}
