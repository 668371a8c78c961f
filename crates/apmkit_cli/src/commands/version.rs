//! Version command implementation.

/// Wire protocol version and agent version reported in every beacon.
pub fn describe() -> Vec<String> {
    vec![
        format!("apmkit CLI v{}", env!("CARGO_PKG_VERSION")),
        format!(
            "Beacon protocol v{} (agent {})",
            apmkit_protocol::keys::PROTOCOL_VERSION,
            apmkit_protocol::keys::AGENT_VERSION
        ),
    ]
}

/// Runs the version command.
pub fn run() {
    for line in describe() {
        println!("{line}");
    }
}
