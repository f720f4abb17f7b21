//! Feature plugins: typed requests in, typed results out.

pub mod build_patch;
pub mod economy;
pub mod helper;
pub mod restore;
pub mod state;
pub mod toggle;

pub use build_patch::BuildPatchPlugin;
pub use economy::EconomyPlugin;
pub use helper::HelperPlugin;
pub use toggle::GlobalTogglePlugin;

use crate::diagnostics;
use crate::memory::{self, WriteError};
use crate::probe::ProbeContext;
use crate::protocol::{
    CapabilitySnapshot, Command, Diagnostics, FeatureId, HookState, ReasonCode,
};
use nix::unistd::Pid;
use std::collections::BTreeMap;

/// Helper invocation fields of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelperFields {
    pub hook_id: String,
    pub entry_point: String,
    pub script: String,
    pub unit_id: String,
    pub entry_marker: String,
    pub faction: String,
    pub global_key: String,
}

/// Request as seen by a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRequest {
    pub feature: FeatureId,
    pub profile_id: String,
    /// Zero when the command carries no process id.
    pub process_id: i32,
    pub anchors: BTreeMap<String, String>,
    pub int_value: Option<i32>,
    pub bool_value: bool,
    pub enable: bool,
    /// Continuous re-enforcement requested (credits lock).
    pub lock_value: bool,
    pub helper: HelperFields,
}

impl PluginRequest {
    pub fn new(feature: FeatureId) -> Self {
        Self {
            feature,
            profile_id: String::new(),
            process_id: 0,
            anchors: BTreeMap::new(),
            int_value: None,
            bool_value: false,
            enable: false,
            lock_value: false,
            helper: HelperFields::default(),
        }
    }

    pub fn from_command(feature: FeatureId, command: &Command) -> Self {
        let payload = &command.payload;
        let lock_value = match payload.lock_credits {
            Some(lock) => lock,
            None => payload.force_patch_hook.unwrap_or(false),
        };

        Self {
            feature,
            profile_id: command.profile_id.clone(),
            process_id: command.process_id.unwrap_or(0),
            anchors: command.anchors(),
            int_value: payload.int_value,
            bool_value: payload.bool_value.unwrap_or(false),
            enable: payload.enable.unwrap_or(false),
            lock_value,
            helper: HelperFields {
                hook_id: payload.helper_hook_id.clone(),
                entry_point: payload.helper_entry_point.clone(),
                script: payload.helper_script.clone(),
                unit_id: payload.unit_id.clone(),
                entry_marker: payload.entry_marker.clone(),
                faction: payload.faction.clone(),
                global_key: payload.global_key.clone(),
            },
        }
    }
}

/// Outcome of a plugin execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginResult {
    pub succeeded: bool,
    pub reason_code: ReasonCode,
    pub hook_state: HookState,
    pub message: String,
    pub diagnostics: Diagnostics,
}

impl PluginResult {
    pub fn success(
        reason_code: ReasonCode,
        hook_state: HookState,
        message: impl Into<String>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            succeeded: true,
            reason_code,
            hook_state,
            message: message.into(),
            diagnostics,
        }
    }

    /// Failed result with `DENIED` hook state.
    pub fn denied(
        reason_code: ReasonCode,
        message: impl Into<String>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            succeeded: false,
            reason_code,
            hook_state: HookState::Denied,
            message: message.into(),
            diagnostics,
        }
    }
}

/// Feature plugin.
pub trait Plugin: Send + Sync {
    /// Stable plugin identifier.
    fn id(&self) -> &'static str;

    /// Features owned by this plugin.
    fn features(&self) -> &'static [FeatureId];

    fn execute(&self, request: &PluginRequest) -> PluginResult;

    /// Last known state of owned features, no target process access.
    fn capability_snapshot(&self) -> CapabilitySnapshot;

    /// Check whether owned features are addressable right now. Never mutates the target.
    fn probe(&self, context: &ProbeContext) -> CapabilitySnapshot;
}

/// Anchor selected for a feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorMatch {
    pub key: String,
    pub value: String,
}

/// First present and non-empty anchor among the feature candidates.
pub fn find_anchor(anchors: &BTreeMap<String, String>, feature: FeatureId) -> Option<AnchorMatch> {
    feature.anchor_candidates().iter().find_map(|key| {
        anchors
            .get(*key)
            .filter(|value| !value.is_empty())
            .map(|value| AnchorMatch {
                key: key.to_string(),
                value: value.clone(),
            })
    })
}

/// Resolved destination of a memory mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub pid: Pid,
    pub anchor: AnchorMatch,
    pub address: usize,
}

impl Target {
    pub fn diagnostics(&self, feature: FeatureId) -> Diagnostics {
        diagnostics! {
            "featureId" => feature,
            "processId" => self.pid,
            "anchorKey" => self.anchor.key,
            "anchorValue" => self.anchor.value,
        }
    }
}

/// Unsupported feature result.
pub(crate) fn unsupported_feature(plugin: &str, request: &PluginRequest) -> PluginResult {
    PluginResult::denied(
        ReasonCode::CapabilityRequiredMissing,
        format!("{plugin} plugin does not handle {}.", request.feature),
        diagnostics! {"featureId" => request.feature},
    )
}

/// Resolve process, anchor and address of a mutating request, in that order.
pub(crate) fn resolve_target(plugin: &str, request: &PluginRequest) -> Result<Target, PluginResult> {
    if request.process_id <= 0 {
        return Err(PluginResult::denied(
            ReasonCode::CapabilityRequiredMissing,
            format!("processId is required for {plugin} mutations."),
            diagnostics! {
                "featureId" => request.feature,
                "requiredField" => "processId",
                "processId" => request.process_id,
            },
        ));
    }

    let Some(anchor) = find_anchor(&request.anchors, request.feature) else {
        return Err(PluginResult::denied(
            ReasonCode::CapabilityRequiredMissing,
            "anchors map missing required symbol anchor for feature.",
            diagnostics! {
                "featureId" => request.feature,
                "requiredField" => "anchors",
                "anchorCandidates" => request.feature.anchor_candidates().join(","),
                "anchorCount" => request.anchors.len(),
            },
        ));
    };

    let address = match memory::parse_address(&anchor.value) {
        Ok(address) => address,
        Err(err) => {
            return Err(PluginResult::denied(
                ReasonCode::CapabilityAnchorInvalid,
                "anchor value is not a hexadecimal address.",
                diagnostics! {
                    "featureId" => request.feature,
                    "anchorKey" => anchor.key,
                    "anchorValue" => anchor.value,
                    "error" => err,
                },
            ))
        }
    };

    Ok(Target {
        pid: Pid::from_raw(request.process_id),
        anchor,
        address,
    })
}

/// Result of a failed target process write.
pub(crate) fn write_failed(feature: FeatureId, target: &Target, err: &WriteError) -> PluginResult {
    let mut diagnostics = target.diagnostics(feature);
    diagnostics.insert("error".to_string(), err.error.to_string());
    diagnostics.extend(
        err.diagnostics
            .entries()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v)),
    );

    let reason_code = if err.error.is_local() {
        // nothing was attempted against the target
        ReasonCode::SafetyFailClosed
    } else {
        ReasonCode::SafetyMutationBlocked
    };
    log::warn!(target: "plugin", "{feature} write at {:#X} failed: {}", target.address, err.error);

    PluginResult::denied(
        reason_code,
        format!("{feature} memory write failed: {}", err.error),
        diagnostics,
    )
}

/// Upper-case hex dump, bytes separated by spaces.
pub(crate) fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod test {
    use super::*;

    fn anchors(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_find_anchor_priority() {
        let map = anchors(&[("credits", "0x10"), ("set_credits", "0x20")]);
        assert_eq!(
            find_anchor(&map, FeatureId::SetCredits),
            Some(AnchorMatch {
                key: "credits".to_string(),
                value: "0x10".to_string()
            })
        );

        // empty value falls through to the next candidate
        let map = anchors(&[("credits", ""), ("set_credits", "0x20")]);
        assert_eq!(
            find_anchor(&map, FeatureId::SetCredits).map(|a| a.key),
            Some("set_credits".to_string())
        );

        let map = anchors(&[("fog_reveal", "0x20")]);
        assert_eq!(find_anchor(&map, FeatureId::SetCredits), None);
        assert_eq!(find_anchor(&map, FeatureId::SpawnUnitHelper), None);
    }

    #[test]
    fn test_resolve_target_order() {
        let mut request = PluginRequest::new(FeatureId::ToggleAi);
        let err = resolve_target("test", &request).unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::CapabilityRequiredMissing);
        assert_eq!(err.diagnostics["requiredField"], "processId");

        request.process_id = 77;
        let err = resolve_target("test", &request).unwrap_err();
        assert_eq!(err.diagnostics["requiredField"], "anchors");
        assert_eq!(err.diagnostics["anchorCandidates"], "ai_enabled,toggle_ai");

        request.anchors = anchors(&[("toggle_ai", "0xZZ")]);
        let err = resolve_target("test", &request).unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::CapabilityAnchorInvalid);
        assert_eq!(err.hook_state, HookState::Denied);

        request.anchors = anchors(&[("toggle_ai", "0x7F00")]);
        let target = resolve_target("test", &request).unwrap();
        assert_eq!(target.pid, Pid::from_raw(77));
        assert_eq!(target.address, 0x7F00);
        assert_eq!(target.anchor.key, "toggle_ai");
    }

    #[test]
    fn test_request_lock_legacy_alias() {
        let command = Command::decode(
            r#"{"commandId":"c","featureId":"set_credits","payload":{"intValue":5,"forcePatchHook":true}}"#,
        );
        let request = PluginRequest::from_command(FeatureId::SetCredits, &command);
        assert!(request.lock_value);
        assert_eq!(request.int_value, Some(5));
        assert_eq!(request.process_id, 0);

        // explicit lockCredits wins over the legacy flag
        let command = Command::decode(
            r#"{"commandId":"c","payload":{"lockCredits":false,"forcePatchHook":true}}"#,
        );
        let request = PluginRequest::from_command(FeatureId::SetCredits, &command);
        assert!(!request.lock_value);
    }

    #[test]
    fn test_hex_bytes() {
        assert_eq!(hex_bytes(&[0xF4, 0x01, 0x00, 0x00]), "F4 01 00 00");
        assert_eq!(hex_bytes(&[]), "");
    }
}
