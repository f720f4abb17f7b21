//! Non-mutating addressability probes.

use crate::diagnostics;
use crate::memory::{self, ProcessMemory};
use crate::plugin::find_anchor;
use crate::protocol::{CapabilityEntry, Command, FeatureId, ReasonCode};
use nix::unistd::Pid;
use std::collections::BTreeMap;

/// Inputs of a capability probe, built from a `probe_capabilities` command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeContext {
    pub process_id: i32,
    pub anchors: BTreeMap<String, String>,
}

impl ProbeContext {
    pub fn from_command(command: &Command) -> Self {
        Self {
            process_id: command.process_id.unwrap_or(0),
            anchors: command.anchors(),
        }
    }
}

/// Probe a feature backed by a memory anchor: process attached, anchor present,
/// anchor parsable and a single byte at it readable.
pub fn probe_memory_feature(
    memory: &dyn ProcessMemory,
    context: &ProbeContext,
    feature: FeatureId,
) -> CapabilityEntry {
    if context.process_id <= 0 {
        return CapabilityEntry::unavailable(
            ReasonCode::CapabilityRequiredMissing,
            diagnostics! {"requiredField" => "processId", "probeFailure" => "no_process"},
        );
    }

    let Some(anchor) = find_anchor(&context.anchors, feature) else {
        return CapabilityEntry::unavailable(
            ReasonCode::CapabilityRequiredMissing,
            diagnostics! {
                "requiredField" => "anchors",
                "probeFailure" => "no_anchor",
                "anchorCandidates" => feature.anchor_candidates().join(","),
            },
        );
    };

    let address = match memory::parse_address(&anchor.value) {
        Ok(address) => address,
        Err(err) => {
            return CapabilityEntry::unavailable(
                ReasonCode::CapabilityAnchorInvalid,
                diagnostics! {
                    "probeFailure" => "invalid_anchor",
                    "anchorKey" => anchor.key,
                    "anchorValue" => anchor.value,
                    "error" => err,
                },
            )
        }
    };

    match memory.read(Pid::from_raw(context.process_id), address, 1) {
        Ok(_) => CapabilityEntry::verified().with_diagnostics(diagnostics! {
            "anchorKey" => anchor.key,
            "anchorValue" => anchor.value,
        }),
        Err(err) => {
            log::debug!(target: "dispatch", "probe {feature}: anchor {} unreadable: {err}", anchor.key);
            CapabilityEntry::unavailable(
                ReasonCode::CapabilityAnchorUnreadable,
                diagnostics! {
                    "probeFailure" => "unreadable_anchor",
                    "anchorKey" => anchor.key,
                    "anchorValue" => anchor.value,
                    "error" => err,
                },
            )
        }
    }
}

/// Probe a helper-backed feature. The helper bridge cannot be verified without
/// invoking it, so an attached process is reported as experimental.
pub fn probe_helper_feature(context: &ProbeContext, _feature: FeatureId) -> CapabilityEntry {
    if context.process_id <= 0 {
        return CapabilityEntry::unavailable(
            ReasonCode::HelperBridgeUnavailable,
            diagnostics! {"requiredField" => "processId", "probeFailure" => "no_process"},
        );
    }
    CapabilityEntry::experimental()
}
