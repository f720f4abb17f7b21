use crate::diagnostics;
use crate::memory::{ProcessMemory, WriteMode};
use crate::plugin::{
    resolve_target, unsupported_feature, write_failed, Plugin, PluginRequest, PluginResult,
};
use crate::probe::{probe_memory_feature, ProbeContext};
use crate::protocol::{CapabilityEntry, CapabilitySnapshot, FeatureId, HookState, ReasonCode};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

const FEATURES: &[FeatureId] = &[FeatureId::SetCredits];

/// Credits mutation, one-shot or locked.
pub struct EconomyPlugin {
    memory: Arc<dyn ProcessMemory>,
    hook_installed: AtomicBool,
    lock_enabled: AtomicBool,
    locked_value: AtomicI32,
}

impl EconomyPlugin {
    pub fn new(memory: Arc<dyn ProcessMemory>) -> Self {
        Self {
            memory,
            hook_installed: AtomicBool::new(false),
            lock_enabled: AtomicBool::new(false),
            locked_value: AtomicI32::new(0),
        }
    }

    /// Credits value and lock flag of the last successful mutation.
    pub fn last_applied(&self) -> Option<(i32, bool)> {
        if !self.hook_installed.load(Ordering::Acquire) {
            return None;
        }
        Some((
            self.locked_value.load(Ordering::Acquire),
            self.lock_enabled.load(Ordering::Acquire),
        ))
    }

    fn hook_state(&self) -> HookState {
        match self.last_applied() {
            None => HookState::NotInstalled,
            Some((_, true)) => HookState::Lock,
            Some((_, false)) => HookState::OneShot,
        }
    }

    fn set_credits(&self, request: &PluginRequest) -> Result<PluginResult, PluginResult> {
        let Some(value) = request.int_value else {
            return Err(PluginResult::denied(
                ReasonCode::CapabilityRequiredMissing,
                "Payload is missing required intValue.",
                diagnostics! {"featureId" => request.feature, "requiredField" => "intValue"},
            ));
        };

        if value < 0 {
            return Err(PluginResult::denied(
                ReasonCode::SafetyMutationBlocked,
                "intValue must be non-negative for set_credits.",
                diagnostics! {"featureId" => request.feature, "intValue" => value},
            ));
        }

        let target = resolve_target(self.id(), request)?;
        let write = self
            .memory
            .write(target.pid, target.address, &value.to_le_bytes(), WriteMode::Data)
            .map_err(|err| write_failed(request.feature, &target, &err))?;

        self.lock_enabled.store(request.lock_value, Ordering::Release);
        self.locked_value.store(value, Ordering::Release);
        self.hook_installed.store(true, Ordering::Release);
        log::info!(
            target: "plugin",
            "credits set to {value} at {:#X} (process {}, lock: {})",
            target.address, target.pid, request.lock_value
        );

        let mut diagnostics = target.diagnostics(request.feature);
        diagnostics.extend(diagnostics! {
            "intValue" => value,
            "lockCredits" => request.lock_value,
            "hookInstalled" => true,
        });
        diagnostics.extend(write.entries().into_iter().map(|(k, v)| (k.to_string(), v)));

        let (hook_state, message) = if request.lock_value {
            (
                HookState::Lock,
                "Credits lock activated via extender economy plugin.",
            )
        } else {
            (
                HookState::OneShot,
                "Credits one-shot applied via extender economy plugin.",
            )
        };
        Ok(PluginResult::success(
            ReasonCode::CapabilityProbePass,
            hook_state,
            message,
            diagnostics,
        ))
    }
}

impl Plugin for EconomyPlugin {
    fn id(&self) -> &'static str {
        "economy"
    }

    fn features(&self) -> &'static [FeatureId] {
        FEATURES
    }

    fn execute(&self, request: &PluginRequest) -> PluginResult {
        if !FEATURES.contains(&request.feature) {
            let mut result = unsupported_feature(self.id(), request);
            result.hook_state = HookState::None;
            return result;
        }

        match self.set_credits(request) {
            Ok(result) | Err(result) => result,
        }
    }

    fn capability_snapshot(&self) -> CapabilitySnapshot {
        let mut entry = CapabilityEntry::verified()
            .with_diagnostics(diagnostics! {"hookState" => self.hook_state()});
        if let Some((value, _)) = self.last_applied() {
            entry.diagnostics.insert("lastValue".to_string(), value.to_string());
        }
        CapabilitySnapshot::from([(FeatureId::SetCredits, entry)])
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
