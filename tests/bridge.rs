mod common;

use common::FakeMemory;
use extender_bridge::dispatch::Dispatcher;
use extender_bridge::transport::{
    channel_name_from_env, socket_path, BridgeClient, BridgeServer, ExchangeTracer, ServerHandle,
    CHANNEL_ENV,
};
use serial_test::serial;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::{env, fs};

fn test_channel(name: &str) -> String {
    let path: PathBuf = env::temp_dir().join(format!(
        "extender-bridge-{}-{name}.sock",
        std::process::id()
    ));
    _ = fs::remove_file(&path);
    path.to_string_lossy().into_owned()
}

fn start(channel: &str, memory: &FakeMemory) -> ServerHandle {
    BridgeServer::new(channel)
        .with_handler(Arc::new(Dispatcher::new(memory.shared())))
        .start()
        .unwrap()
}

fn send(channel: &str, line: &str) -> serde_json::Value {
    let response = BridgeClient::new(channel).send_line(line).unwrap();
    serde_json::from_str(&response).unwrap()
}

#[test]
fn test_health_round_trip() {
    let channel = test_channel("health");
    let mut server = start(&channel, &FakeMemory::new());
    assert!(server.is_running());
    assert!(server.socket_path().exists());

    let response = send(&channel, r#"{"commandId":"cmd-1","featureId":"health"}"#);
    assert_eq!(response["commandId"], "cmd-1");
    assert_eq!(response["succeeded"], true);
    assert_eq!(response["reasonCode"], "CAPABILITY_PROBE_PASS");
    assert_eq!(response["backend"], "extender");
    assert_eq!(response["hookState"], "RUNNING");
    assert_eq!(response["diagnostics"]["bridge"], "active");

    server.stop();
    assert!(!server.is_running());
    assert!(!PathBuf::from(&channel).exists());
}

#[test]
fn test_escaped_command_id_echoed() {
    let channel = test_channel("escaped-id");
    let _server = start(&channel, &FakeMemory::new());

    let response = send(
        &channel,
        r#"{"commandId":"c\"1 \\ tab\t","featureId":"health"}"#,
    );
    assert_eq!(response["commandId"], "c\"1 \\ tab\t");
    assert_eq!(response["succeeded"], true);
}

#[test]
fn test_sequential_requests() {
    let channel = test_channel("sequential");
    let memory = FakeMemory::new();
    memory.poke(0x7000, &64i32.to_le_bytes());
    let _server = start(&channel, &memory);

    let enable = send(
        &channel,
        r#"{"commandId":"a","featureId":"set_unit_cap","processId":99,"payload":{"intValue":500,"enable":true,"anchors":{"unit_cap":"0x7000"}}}"#,
    );
    assert_eq!(enable["hookState"], "HOOK_PATCH_ENABLED");
    assert_eq!(enable["diagnostics"]["restoreProtectOk"], "true");

    let disable = send(
        &channel,
        r#"{"commandId":"b","featureId":"set_unit_cap","processId":99,"payload":{"enable":false,"anchors":{"unit_cap":"0x7000"}}}"#,
    );
    assert_eq!(disable["hookState"], "HOOK_PATCH_DISABLED");
    assert_eq!(memory.peek(0x7000, 4), 64i32.to_le_bytes());

    let again = send(
        &channel,
        r#"{"commandId":"c","featureId":"set_unit_cap","processId":99,"payload":{"enable":false,"anchors":{"unit_cap":"0x7000"}}}"#,
    );
    assert_eq!(again["reasonCode"], "PATCH_RESTORE_STATE_MISSING");
}

#[test]
fn test_invalid_requests_keep_server_alive() {
    let channel = test_channel("invalid");
    let _server = start(&channel, &FakeMemory::new());

    for line in ["not json at all", r#"{"featureId":"health"}"#, "{}"] {
        let response = send(&channel, line);
        assert_eq!(response["succeeded"], false);
        assert_eq!(response["reasonCode"], "CAPABILITY_BACKEND_UNAVAILABLE");
        assert_eq!(response["hookState"], "invalid_command");
        assert_eq!(response["diagnostics"]["parseError"], "missing_commandId");
    }

    // connection closed without a request
    drop(UnixStream::connect(&channel).unwrap());

    // CRLF terminated request
    let mut stream = UnixStream::connect(&channel).unwrap();
    stream
        .write_all(b"{\"commandId\":\"crlf\",\"featureId\":\"health\"}\r\n")
        .unwrap();
    let mut response = String::new();
    BufReader::new(stream).read_line(&mut response).unwrap();
    assert!(response.ends_with('\n'));
    let response: serde_json::Value = serde_json::from_str(response.trim_end()).unwrap();
    assert_eq!(response["commandId"], "crlf");
    assert_eq!(response["hookState"], "RUNNING");
}

#[test]
fn test_handler_missing() {
    let channel = test_channel("no-handler");
    let _server = BridgeServer::new(channel.as_str()).start().unwrap();

    let response = send(&channel, r#"{"commandId":"x","featureId":"health"}"#);
    assert_eq!(response["commandId"], "x");
    assert_eq!(response["reasonCode"], "CAPABILITY_BACKEND_UNAVAILABLE");
    assert_eq!(response["hookState"], "handler_missing");
}

#[test]
fn test_channel_in_use() {
    let channel = test_channel("in-use");
    let _server = start(&channel, &FakeMemory::new());

    assert!(BridgeServer::new(channel.as_str()).start().is_err());
    // first server is unaffected
    let response = send(&channel, r#"{"commandId":"ok","featureId":"health"}"#);
    assert_eq!(response["succeeded"], true);
}

#[test]
fn test_stale_socket_replaced() {
    let channel = test_channel("stale");
    drop(UnixListener::bind(&channel).unwrap());
    assert!(PathBuf::from(&channel).exists());

    let _server = start(&channel, &FakeMemory::new());
    let response = send(&channel, r#"{"commandId":"s","featureId":"health"}"#);
    assert_eq!(response["hookState"], "RUNNING");
}

#[test]
fn test_drop_stops_server() {
    let channel = test_channel("drop");
    {
        let _server = start(&channel, &FakeMemory::new());
    }
    assert!(!PathBuf::from(&channel).exists());
    assert!(BridgeClient::new(&channel).send_line("{}").is_err());

    // channel is reusable after stop
    let _server = start(&channel, &FakeMemory::new());
    let response = send(&channel, r#"{"commandId":"r","featureId":"health"}"#);
    assert_eq!(response["succeeded"], true);
}

#[test]
fn test_stop_without_socket_file() {
    let channel = test_channel("unlinked");
    let mut server = start(&channel, &FakeMemory::new());
    fs::remove_file(server.socket_path()).unwrap();

    // worker cannot be reached anymore, stop must still return
    server.stop();
    assert!(!server.is_running());
    assert!(!PathBuf::from(&channel).exists());
}

#[test]
fn test_trace_file() {
    let channel = test_channel("trace");
    let trace_path = env::temp_dir().join(format!(
        "extender-bridge-{}-trace.log",
        std::process::id()
    ));
    _ = fs::remove_file(&trace_path);

    let mut server = BridgeServer::new(channel.as_str())
        .with_handler(Arc::new(Dispatcher::new(FakeMemory::new().shared())))
        .with_tracer(ExchangeTracer::create(&trace_path).unwrap())
        .start()
        .unwrap();
    send(&channel, r#"{"commandId":"t1","featureId":"health"}"#);
    server.stop();

    let trace = fs::read_to_string(&trace_path).unwrap();
    let lines: Vec<&str> = trace.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], r#"<- {"commandId":"t1","featureId":"health"}"#);
    assert!(lines[1].starts_with(r#"-> {"commandId":"t1","succeeded":true"#));
    _ = fs::remove_file(&trace_path);
}

#[test]
#[serial]
fn test_channel_from_environment() {
    let runtime_dir = env::temp_dir().join(format!("extender-bridge-{}-rt", std::process::id()));
    fs::create_dir_all(&runtime_dir).unwrap();
    let old_runtime = env::var_os("XDG_RUNTIME_DIR");
    let old_channel = env::var_os(CHANNEL_ENV);
    env::set_var("XDG_RUNTIME_DIR", &runtime_dir);
    env::set_var(CHANNEL_ENV, "EnvBridge");

    let channel = channel_name_from_env();
    assert_eq!(channel, "EnvBridge");
    assert_eq!(socket_path(&channel), runtime_dir.join("EnvBridge.sock"));

    let mut server = start(&channel, &FakeMemory::new());
    assert_eq!(server.socket_path(), runtime_dir.join("EnvBridge.sock"));
    let response = send(&channel, r#"{"commandId":"env","featureId":"health"}"#);
    assert_eq!(response["commandId"], "env");
    server.stop();

    match old_runtime {
        Some(value) => env::set_var("XDG_RUNTIME_DIR", value),
        None => env::remove_var("XDG_RUNTIME_DIR"),
    }
    match old_channel {
        Some(value) => env::set_var(CHANNEL_ENV, value),
        None => env::remove_var(CHANNEL_ENV),
    }
    _ = fs::remove_dir_all(&runtime_dir);
}
