//! Walks the guarded executor through a small lab.
//!
//! Offline by default: devices come from `tests/fixtures/lab_registry.json`
//! and answer from `tests/fixtures/lab_scripts.json`. Pass `--live` to use
//! SSH against devices from `ROUTER_IP`/`ROUTER_USERNAME`/`ROUTER_PASSWORD`
//! (and the `SWITCH1_*`, `SWITCH2_*` equivalents).

use anyhow::Context;
use netwarden::executor::CommandExecutor;
use netwarden::registry::DeviceRegistry;
use netwarden::request::{CommandRequest, request_schema_json};
use netwarden::session::{
    ConnectionSecurityOptions, ScriptedProvider, SecurityLevel, SessionManager, SessionProvider,
    SshSessionProvider,
};
use std::sync::Arc;

const LAB_REGISTRY: &str = include_str!("../tests/fixtures/lab_registry.json");
const LAB_SCRIPTS: &str = include_str!("../tests/fixtures/lab_scripts.json");

fn requests() -> Vec<CommandRequest> {
    vec![
        CommandRequest::read("router", "show ip interface brief"),
        CommandRequest::read("core9", "show version"),
        CommandRequest::config("router", ["interface GigabitEthernet0/0", "shutdown"]),
        CommandRequest::config("router", ["line vty 0 4", "transport input telnet"]),
        CommandRequest::config(
            "router",
            ["interface Loopback1", "ip address 10.1.1.1", "no shutdown"],
        ),
        CommandRequest::config(
            "router",
            ["interface Loopback1", "description lab loopback", "no shutdown"],
        ),
        CommandRequest::read("switch2", "show version"),
    ]
}

async fn run<P: SessionProvider>(executor: &CommandExecutor<P>) -> anyhow::Result<()> {
    for request in requests() {
        println!(
            "==> {} {:?}: {}",
            request.device_name,
            request.kind,
            request.command().replace('\n', " | ")
        );
        let result = executor.execute(&request).await;
        println!("{}", result.summary());
        if !result.output.is_empty() {
            println!("--- output ---\n{}", result.output);
        }
        println!("{}", serde_json::to_string(&result).context("serialize result")?);
        println!();
    }
    executor.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().any(|a| a == "--schema") {
        println!("{}", request_schema_json()?);
        return Ok(());
    }

    if std::env::args().any(|a| a == "--live") {
        let registry = DeviceRegistry::from_env(&["router", "switch1", "switch2"])
            .context("device environment variables")?;
        let level = std::env::var("NETWARDEN_SSH_LEVEL")
            .ok()
            .map(|raw| raw.parse::<SecurityLevel>())
            .transpose()
            .map_err(anyhow::Error::msg)?
            .unwrap_or_default();
        let provider = SshSessionProvider::new(ConnectionSecurityOptions::for_level(level));
        let executor = CommandExecutor::new(
            Arc::new(registry),
            SessionManager::new(Arc::new(provider)),
        );
        return run(&executor).await;
    }

    let registry = DeviceRegistry::from_json_str(LAB_REGISTRY).context("lab registry")?;
    let provider = ScriptedProvider::from_json_str(LAB_SCRIPTS).context("lab scripts")?;
    let provider = Arc::new(provider);
    let executor = CommandExecutor::new(
        Arc::new(registry),
        SessionManager::new(Arc::clone(&provider)),
    );
    run(&executor).await?;

    let stats = provider.stats();
    println!(
        "sessions opened={} closed={} open_attempts={}",
        stats.opened, stats.closed, stats.open_attempts
    );
    Ok(())
}
