use std::env;
use std::path::PathBuf;

/// Channel name used when neither a flag nor the environment names one.
pub const DEFAULT_CHANNEL_NAME: &str = "SwfocExtenderBridge";

/// Environment variable overriding the channel name.
pub const CHANNEL_ENV: &str = "SWFOC_EXTENDER_PIPE_NAME";

/// Channel name from the environment, default name if unset or empty.
pub fn channel_name_from_env() -> String {
    env::var(CHANNEL_ENV)
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_CHANNEL_NAME.to_string())
}

/// Socket path of a channel. A name containing `/` is a path already,
/// other names live in the runtime directory (temp dir if there is none).
pub fn socket_path(channel: &str) -> PathBuf {
    if channel.contains('/') {
        return PathBuf::from(channel);
    }

    let dir = env::var_os("XDG_RUNTIME_DIR")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir);
    dir.join(format!("{channel}.sock"))
}
