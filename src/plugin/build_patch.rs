//! Reversible build patches.
//!
//! Every enabled patch is backed by a restore record with the bytes found at
//! the patched location before the first enabling write. Disabling writes those
//! bytes back; without a record nothing is written.

use crate::diagnostics;
use crate::memory::{ProcessMemory, WriteMode};
use crate::plugin::restore::RestoreStore;
use crate::plugin::state::{FeatureState, FeatureStateCell};
use crate::plugin::{
    hex_bytes, resolve_target, unsupported_feature, write_failed, Plugin, PluginRequest,
    PluginResult, Target,
};
use crate::probe::{probe_memory_feature, ProbeContext};
use crate::protocol::{CapabilityEntry, CapabilitySnapshot, FeatureId, HookState, ReasonCode};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

const FEATURES: &[FeatureId] = &[FeatureId::SetUnitCap, FeatureId::ToggleInstantBuildPatch];

pub const MIN_UNIT_CAP: i32 = 1;
pub const MAX_UNIT_CAP: i32 = 100_000;

/// Byte width of the patched value.
fn patch_width(feature: FeatureId) -> usize {
    match feature {
        FeatureId::SetUnitCap => 4,
        _ => 1,
    }
}

pub struct BuildPatchPlugin {
    memory: Arc<dyn ProcessMemory>,
    restore: RestoreStore,
    unit_cap: FeatureStateCell,
    unit_cap_value: AtomicI32,
    instant_build: FeatureStateCell,
}

impl BuildPatchPlugin {
    pub fn new(memory: Arc<dyn ProcessMemory>) -> Self {
        Self {
            memory,
            restore: RestoreStore::default(),
            unit_cap: FeatureStateCell::default(),
            unit_cap_value: AtomicI32::new(0),
            instant_build: FeatureStateCell::default(),
        }
    }

    pub fn restore_store(&self) -> &RestoreStore {
        &self.restore
    }

    pub fn state(&self, feature: FeatureId) -> Option<FeatureState> {
        self.cell(feature).map(FeatureStateCell::load)
    }

    fn cell(&self, feature: FeatureId) -> Option<&FeatureStateCell> {
        match feature {
            FeatureId::SetUnitCap => Some(&self.unit_cap),
            FeatureId::ToggleInstantBuildPatch => Some(&self.instant_build),
            _ => None,
        }
    }

    fn patch(&self, request: &PluginRequest) -> Result<PluginResult, PluginResult> {
        let target = resolve_target(self.id(), request)?;
        let enable = request.enable || request.bool_value;

        if enable {
            let patch_bytes = match request.feature {
                FeatureId::SetUnitCap => {
                    let cap = Self::validate_unit_cap(request)?;
                    cap.to_le_bytes().to_vec()
                }
                _ => vec![1],
            };
            self.enable(request, &target, &patch_bytes)
        } else {
            self.disable(request, &target)
        }
    }

    fn validate_unit_cap(request: &PluginRequest) -> Result<i32, PluginResult> {
        match request.int_value {
            Some(value) if (MIN_UNIT_CAP..=MAX_UNIT_CAP).contains(&value) => Ok(value),
            value => Err(PluginResult::denied(
                ReasonCode::SafetyMutationBlocked,
                "set_unit_cap requires intValue within safe bounds when enabled.",
                diagnostics! {
                    "featureId" => request.feature,
                    "intValue" => value.map(|v| v.to_string()).unwrap_or_else(|| "none".to_string()),
                    "minIntValue" => MIN_UNIT_CAP,
                    "maxIntValue" => MAX_UNIT_CAP,
                },
            )),
        }
    }

    fn enable(
        &self,
        request: &PluginRequest,
        target: &Target,
        patch_bytes: &[u8],
    ) -> Result<PluginResult, PluginResult> {
        let feature = request.feature;
        let key = RestoreStore::key(target.pid, feature, &target.anchor.key, target.address);

        let created = if self.restore.contains(&key) {
            false
        } else {
            let original = self
                .memory
                .read(target.pid, target.address, patch_width(feature))
                .map_err(|err| {
                    let mut diagnostics = target.diagnostics(feature);
                    diagnostics.insert("restoreKey".to_string(), key.clone());
                    diagnostics.insert("error".to_string(), err.to_string());
                    PluginResult::denied(
                        ReasonCode::SafetyMutationBlocked,
                        format!("{feature} could not snapshot original bytes: {err}"),
                        diagnostics,
                    )
                })?;
            self.restore.insert_if_absent(key.clone(), original)
        };

        let write = match self
            .memory
            .write(target.pid, target.address, patch_bytes, WriteMode::Patch)
        {
            Ok(write) => write,
            Err(err) => {
                // a record is only dropped when the target still holds the original bytes
                let discard = created && err.error.target_untouched();
                if discard {
                    self.restore.remove(&key);
                }
                let mut result = write_failed(feature, target, &err);
                result.diagnostics.extend(diagnostics! {
                    "restoreKey" => key,
                    "restoreRecord" => match (created, discard) {
                        (_, true) => "discarded",
                        (true, false) => "kept",
                        (false, false) => "reused",
                    },
                });
                return Err(result);
            }
        };

        if let (FeatureId::SetUnitCap, Some(value)) = (feature, request.int_value) {
            self.unit_cap_value.store(value, Ordering::Release);
        }
        if let Some(cell) = self.cell(feature) {
            cell.store(FeatureState::Enabled);
        }
        log::info!(
            target: "plugin",
            "{feature} patch enabled at {:#X} (process {})",
            target.address, target.pid
        );

        let mut diagnostics = target.diagnostics(feature);
        diagnostics.extend(diagnostics! {
            "enable" => true,
            "patchBytes" => hex_bytes(patch_bytes),
            "restoreKey" => key,
            "restoreRecord" => if created { "created" } else { "reused" },
        });
        if let Some(value) = request.int_value {
            diagnostics.insert("intValue".to_string(), value.to_string());
        }
        diagnostics.extend(write.entries().into_iter().map(|(k, v)| (k.to_string(), v)));

        Ok(PluginResult::success(
            ReasonCode::CapabilityProbePass,
            HookState::PatchEnabled,
            "Build patch enabled by extender plugin.",
            diagnostics,
        ))
    }

    fn disable(
        &self,
        request: &PluginRequest,
        target: &Target,
    ) -> Result<PluginResult, PluginResult> {
        let feature = request.feature;
        let key = RestoreStore::key(target.pid, feature, &target.anchor.key, target.address);

        let Some(original) = self.restore.get(&key) else {
            let mut diagnostics = target.diagnostics(feature);
            diagnostics.insert("restoreKey".to_string(), key);
            return Err(PluginResult::denied(
                ReasonCode::PatchRestoreStateMissing,
                format!("{feature} has no saved original bytes for this anchor, refusing to restore."),
                diagnostics,
            ));
        };

        if original.len() != patch_width(feature) {
            let mut diagnostics = target.diagnostics(feature);
            diagnostics.extend(diagnostics! {
                "restoreKey" => key,
                "restoreBytes" => hex_bytes(&original),
                "expectedLen" => patch_width(feature),
            });
            return Err(PluginResult::denied(
                ReasonCode::SafetyFailClosed,
                format!("{feature} restore record has unexpected width, refusing to restore."),
                diagnostics,
            ));
        }

        let write = self
            .memory
            .write(target.pid, target.address, &original, WriteMode::Patch)
            .map_err(|err| write_failed(feature, target, &err))?;

        self.restore.remove(&key);
        if let Some(cell) = self.cell(feature) {
            cell.store(FeatureState::Disabled);
        }
        log::info!(
            target: "plugin",
            "{feature} patch disabled at {:#X} (process {}), original bytes restored",
            target.address, target.pid
        );

        let mut diagnostics = target.diagnostics(feature);
        diagnostics.extend(diagnostics! {
            "enable" => false,
            "restoredBytes" => hex_bytes(&original),
            "restoreKey" => key,
        });
        diagnostics.extend(write.entries().into_iter().map(|(k, v)| (k.to_string(), v)));

        Ok(PluginResult::success(
            ReasonCode::CapabilityProbePass,
            HookState::PatchDisabled,
            "Build patch disabled, original bytes restored.",
            diagnostics,
        ))
    }
}

impl Plugin for BuildPatchPlugin {
    fn id(&self) -> &'static str {
        "build_patch"
    }

    fn features(&self) -> &'static [FeatureId] {
        FEATURES
    }

    fn execute(&self, request: &PluginRequest) -> PluginResult {
        if self.cell(request.feature).is_none() {
            return unsupported_feature(self.id(), request);
        }

        match self.patch(request) {
            Ok(result) | Err(result) => result,
        }
    }

    fn capability_snapshot(&self) -> CapabilitySnapshot {
        FEATURES
            .iter()
            .filter_map(|&feature| {
                let state = self.state(feature)?;
                let hook_state = match state {
                    FeatureState::NotInstalled => HookState::NotInstalled,
                    FeatureState::Enabled => HookState::PatchEnabled,
                    FeatureState::Disabled => HookState::PatchDisabled,
                };
                let mut entry = CapabilityEntry::verified()
                    .with_diagnostics(diagnostics! {"hookState" => hook_state});
                if feature == FeatureId::SetUnitCap && state == FeatureState::Enabled {
                    entry.diagnostics.insert(
                        "unitCap".to_string(),
                        self.unit_cap_value.load(Ordering::Acquire).to_string(),
                    );
                }
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
