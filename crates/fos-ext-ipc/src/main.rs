//! fOS Extension Relay
//!
//! Runs a host with one background page and one content script, opens a
//! port between them and logs the traffic.
//!
//! Usage: `fos-ext-relay [extension-id] [message-count]`

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{anyhow, Context};
use fos_ext_ipc::{HostHandle, HostProcess, IpcConfig};
use fos_extensions::{ConnectOptions, MessageOptions, Port};
use serde_json::json;
use tracing_subscriber::EnvFilter;

const RELAY_TAB: u32 = 1;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let extension_id = args.next().unwrap_or_else(|| "fos-demo".to_string());
    let count: usize = match args.next() {
        Some(arg) => arg
            .parse()
            .with_context(|| format!("invalid message count: {}", arg))?,
        None => 3,
    };

    let (host, handle) = HostProcess::new(IpcConfig::default());
    let host = host.with_script_runner(|tab_id, extension_id, details| {
        json!({ "tab": tab_id, "extension": extension_id, "script": details })
    });
    let host_thread = host.spawn().context("failed to start extension host")?;

    let result = run_session(&handle, &extension_id, count);

    handle.shutdown();
    host_thread
        .join()
        .map_err(|_| anyhow!("extension host thread panicked"))?;

    result
}

fn run_session(handle: &HostHandle, extension_id: &str, count: usize) -> anyhow::Result<()> {
    let wait = handle.config().pump_timeout * 5;

    let background = Rc::new(handle.attach_background(extension_id)?);
    let content = Rc::new(handle.attach_content_script(extension_id, RELAY_TAB)?);
    let background_api = background.inject_api();
    let content_api = content.inject_api();

    // Background page: echo everything back on the same port
    background_api.runtime.on_connect().subscribe(|port| {
        tracing::info!("[background] port {} opened by {:?}", port.name(), port.sender().tab);

        let echo = port.clone();
        port.on_message().subscribe(move |(message, _, _)| {
            echo.post_message(json!({ "echo": message }));
        });
        port.on_disconnect().subscribe(|_| tracing::info!("[background] port closed"));
    });
    background_api
        .runtime
        .on_message()
        .subscribe(|(message, sender)| {
            tracing::info!("[background] message {} from {:?}", message, sender.tab)
        });

    let port: Port = content_api
        .runtime
        .connect(ConnectOptions::new().named("relay"))?;
    let echoes = Rc::new(RefCell::new(Vec::new()));
    let e = echoes.clone();
    port.on_message()
        .subscribe(move |(message, _, _)| e.borrow_mut().push(message.clone()));

    for n in 0..count {
        port.post_message(json!({ "seq": n }));
    }

    let pump_both = || {
        background.pump();
        content.pump_timeout(handle.config().pump_timeout / 10);
    };

    let start = std::time::Instant::now();
    while echoes.borrow().len() < count && start.elapsed() < wait {
        pump_both();
    }
    for echo in echoes.borrow().iter() {
        tracing::info!("[content] {}", echo);
    }
    if echoes.borrow().len() < count {
        return Err(anyhow!(
            "received {} of {} echoes",
            echoes.borrow().len(),
            count
        ));
    }

    content_api
        .runtime
        .send_message(json!("done"), MessageOptions::default())?;

    port.disconnect();

    let script_result = Rc::new(RefCell::new(None));
    let r = script_result.clone();
    background_api
        .tabs
        .execute_script(RELAY_TAB, json!({ "code": "document.title" }), move |results| {
            *r.borrow_mut() = Some(results);
        });

    background.pump_until(wait, || script_result.borrow().is_some());
    if let Some(results) = script_result.borrow().as_ref() {
        tracing::info!("[background] executeScript -> {:?}", results);
    }

    Ok(())
}
