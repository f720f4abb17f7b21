//! Request and response contract of the bridge.

mod feature;
pub mod json;

pub use feature::FeatureId;

use std::collections::BTreeMap;
use std::fmt::Write;
use strum_macros::{Display, EnumString, IntoStaticStr};

/// Constant backend identifier reported in every response.
pub const BACKEND: &str = "extender";

/// Diagnostics key holding the capability snapshot of a probe result.
pub const CAPABILITIES_KEY: &str = "capabilities";

/// Free-form evidence attached to results.
pub type Diagnostics = BTreeMap<String, String>;

/// Build [`Diagnostics`] from `key => value` pairs.
#[macro_export]
macro_rules! diagnostics {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut map = $crate::protocol::Diagnostics::new();
        $( map.insert(($key).to_string(), ($value).to_string()); )*
        map
    }};
}

/// Machine-readable outcome tags.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    CapabilityProbePass,
    CapabilityRequiredMissing,
    CapabilityBackendUnavailable,
    CapabilityAnchorInvalid,
    CapabilityAnchorUnreadable,
    CapabilityFeatureExperimental,
    SafetyMutationBlocked,
    SafetyFailClosed,
    PatchRestoreStateMissing,
    HelperBridgeUnavailable,
    HelperEntrypointNotFound,
    HelperInvocationFailed,
    HelperExecutionApplied,
}

/// Coarse operability tag of a response.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumString, IntoStaticStr)]
pub enum HookState {
    #[strum(serialize = "none")]
    None,
    #[strum(serialize = "DENIED")]
    Denied,
    #[strum(serialize = "RUNNING")]
    Running,
    #[strum(serialize = "HOOK_READY")]
    Ready,
    #[strum(serialize = "HOOK_NOT_INSTALLED")]
    NotInstalled,
    #[strum(serialize = "HOOK_LOCK")]
    Lock,
    #[strum(serialize = "HOOK_ONESHOT")]
    OneShot,
    #[strum(serialize = "HOOK_ENABLED")]
    Enabled,
    #[strum(serialize = "HOOK_DISABLED")]
    Disabled,
    #[strum(serialize = "HOOK_PATCH_ENABLED")]
    PatchEnabled,
    #[strum(serialize = "HOOK_PATCH_DISABLED")]
    PatchDisabled,
    #[strum(serialize = "invalid_command")]
    InvalidCommand,
    #[strum(serialize = "handler_missing")]
    HandlerMissing,
}

/// Typed fields of a request payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub int_value: Option<i32>,
    pub bool_value: Option<bool>,
    pub enable: Option<bool>,
    pub lock_credits: Option<bool>,
    /// Legacy alias of `lock_credits`.
    pub force_patch_hook: Option<bool>,
    pub anchors: BTreeMap<String, String>,
    /// Legacy single-anchor alias, bound to the feature id name.
    pub symbol: String,
    pub helper_hook_id: String,
    pub helper_entry_point: String,
    pub helper_script: String,
    pub unit_id: String,
    pub entry_marker: String,
    pub faction: String,
    pub global_key: String,
}

impl Payload {
    pub fn decode(object: &str) -> Self {
        Self {
            int_value: json::read_int(object, "intValue"),
            bool_value: json::read_bool(object, "boolValue"),
            enable: json::read_bool(object, "enable"),
            lock_credits: json::read_bool(object, "lockCredits"),
            force_patch_hook: json::read_bool(object, "forcePatchHook"),
            anchors: json::extract_string_map(object, "anchors"),
            symbol: json::extract_string(object, "symbol"),
            helper_hook_id: json::extract_string(object, "helperHookId"),
            helper_entry_point: json::extract_string(object, "helperEntryPoint"),
            helper_script: json::extract_string(object, "helperScript"),
            unit_id: json::extract_string(object, "unitId"),
            entry_marker: json::extract_string(object, "entryMarker"),
            faction: json::extract_string(object, "faction"),
            global_key: json::extract_string(object, "globalKey"),
        }
    }
}

/// One decoded request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    pub command_id: String,
    pub feature_id: String,
    pub profile_id: String,
    pub process_id: Option<i32>,
    pub resolved_anchors: BTreeMap<String, String>,
    pub payload: Payload,
    pub mode: String,
    pub requested_by: String,
    pub timestamp_utc: String,
}

impl Command {
    /// Decode a request line. Never fails: missing fields stay empty.
    pub fn decode(line: &str) -> Self {
        let payload = json::extract_object(line, "payload");
        Self {
            command_id: json::extract_string(line, "commandId"),
            feature_id: json::extract_string(line, "featureId"),
            profile_id: json::extract_string(line, "profileId"),
            process_id: json::read_int(line, "processId"),
            resolved_anchors: json::extract_string_map(line, "resolvedAnchors"),
            payload: Payload::decode(payload),
            mode: json::extract_string(line, "mode"),
            requested_by: json::extract_string(line, "requestedBy"),
            timestamp_utc: json::extract_string(line, "timestampUtc"),
        }
    }

    /// Anchor map seen by plugins: payload anchors, overridden by resolved anchors,
    /// plus the legacy `symbol` bound to the feature id name if that name is free.
    pub fn anchors(&self) -> BTreeMap<String, String> {
        let mut anchors = self.payload.anchors.clone();
        anchors.extend(
            self.resolved_anchors
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        if !self.payload.symbol.is_empty() && !self.feature_id.is_empty() {
            anchors
                .entry(self.feature_id.clone())
                .or_insert_with(|| self.payload.symbol.clone());
        }
        anchors
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumString)]
pub enum CapabilityState {
    Unknown,
    Experimental,
    Verified,
    Unavailable,
}

/// Availability of a single feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityEntry {
    pub available: bool,
    pub state: CapabilityState,
    pub reason_code: ReasonCode,
    pub diagnostics: Diagnostics,
}

impl CapabilityEntry {
    pub fn unknown() -> Self {
        Self {
            available: false,
            state: CapabilityState::Unknown,
            reason_code: ReasonCode::CapabilityBackendUnavailable,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn verified() -> Self {
        Self {
            available: true,
            state: CapabilityState::Verified,
            reason_code: ReasonCode::CapabilityProbePass,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn experimental() -> Self {
        Self {
            available: true,
            state: CapabilityState::Experimental,
            reason_code: ReasonCode::CapabilityFeatureExperimental,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn unavailable(reason_code: ReasonCode, diagnostics: Diagnostics) -> Self {
        Self {
            available: false,
            state: CapabilityState::Unavailable,
            reason_code,
            diagnostics,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics.extend(diagnostics);
        self
    }
}

/// Feature id to capability entry.
pub type CapabilitySnapshot = BTreeMap<FeatureId, CapabilityEntry>;

/// One response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeResult {
    pub command_id: String,
    pub succeeded: bool,
    pub reason_code: ReasonCode,
    pub backend: String,
    pub hook_state: HookState,
    pub message: String,
    pub diagnostics: Diagnostics,
    /// Rendered as `diagnostics.capabilities` object.
    pub capabilities: Option<CapabilitySnapshot>,
}

impl BridgeResult {
    pub fn new(
        command_id: impl Into<String>,
        succeeded: bool,
        reason_code: ReasonCode,
        hook_state: HookState,
        message: impl Into<String>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            command_id: command_id.into(),
            succeeded,
            reason_code,
            backend: BACKEND.to_string(),
            hook_state,
            message: message.into(),
            diagnostics,
            capabilities: None,
        }
    }

    /// Encode as a single JSON line (without trailing newline).
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(256);
        out.push('{');
        _ = write!(out, "\"commandId\":\"{}\",", json::escape(&self.command_id));
        _ = write!(out, "\"succeeded\":{},", self.succeeded);
        _ = write!(out, "\"reasonCode\":\"{}\",", self.reason_code);
        _ = write!(out, "\"backend\":\"{}\",", json::escape(&self.backend));
        _ = write!(out, "\"hookState\":\"{}\",", self.hook_state);
        _ = write!(out, "\"message\":\"{}\",", json::escape(&self.message));
        out.push_str("\"diagnostics\":{");
        let capabilities = self.capabilities.as_ref();
        // snapshot owns the capabilities key, a plain diagnostic with that name is dropped
        let written = json::write_string_entries(
            &mut out,
            self.diagnostics
                .iter()
                .filter(|(key, _)| capabilities.is_none() || key.as_str() != CAPABILITIES_KEY),
        );
        if let Some(capabilities) = capabilities {
            if written > 0 {
                out.push(',');
            }
            _ = write!(out, "\"{CAPABILITIES_KEY}\":");
            write_capabilities(&mut out, capabilities);
        }
        out.push_str("}}");
        out
    }
}

fn write_capabilities(out: &mut String, capabilities: &CapabilitySnapshot) {
    out.push('{');
    for (i, (feature, entry)) in capabilities.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        _ = write!(
            out,
            "\"{feature}\":{{\"available\":{},\"state\":\"{}\",\"reasonCode\":\"{}\"",
            entry.available, entry.state, entry.reason_code
        );
        if !entry.diagnostics.is_empty() {
            out.push_str(",\"diagnostics\":");
            out.push_str(&json::string_map_to_json(&entry.diagnostics));
        }
        out.push('}');
    }
    out.push('}');
}
