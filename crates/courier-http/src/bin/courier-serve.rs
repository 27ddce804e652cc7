//! A small demonstration server exposing the same sample procedures over
//! the binary protocol, XML-RPC and JSON-RPC at once.

use anyhow::Context;
use clap::Parser;
use courier::{procedure1, procedure2, RemoteError, RpcServer, ServiceRegistry};
use std::sync::Arc;

/// Serve a few arithmetic procedures over every supported protocol.
#[derive(Debug, Parser)]
#[command(about, version)]
struct Cli {
    /// Address to bind all listeners on.
    #[arg(long, default_value = "127.0.0.1", env = "BIND_HOST")]
    host: String,
    /// Port for the binary RPC protocol.
    #[arg(long, default_value = "7002", env = "BINARY_PORT")]
    binary_port: u16,
    /// Port for XML-RPC over HTTP.
    #[arg(long, default_value = "7003", env = "XMLRPC_PORT")]
    xmlrpc_port: u16,
    /// Port for JSON-RPC over HTTP.
    #[arg(long, default_value = "7004", env = "JSONRPC_PORT")]
    jsonrpc_port: u16,
    /// How long an idle connection is kept before it is closed.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s", env = "KEEP_ALIVE_TIMEOUT")]
    keep_alive_timeout: std::time::Duration,
    /// Worker pool bounds.
    #[arg(long, default_value = "5")]
    min_threads: usize,
    #[arg(long, default_value = "200")]
    max_threads: usize,
}

fn sample_registry() -> Arc<ServiceRegistry> {
    let registry = ServiceRegistry::new();
    registry.register_procedure("multiply", procedure2(|a: i64, b: i64| Ok(a * b)));
    registry.register_procedure("add", procedure2(|a: i64, b: i64| Ok(a + b)));
    registry.register_procedure(
        "div",
        procedure2(|a: f64, b: f64| {
            if b == 0.0 {
                Err(RemoteError::new(1, "division by zero").into())
            } else {
                Ok(a / b)
            }
        }),
    );
    registry.register_procedure(
        "echo",
        procedure1(|v: sinfo::SerializationInfo| Ok(v)),
    );
    Arc::new(registry)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    courier::logging::install();

    let cli = Cli::parse();
    let registry = sample_registry();

    let mut server = RpcServer::new(registry.clone());
    server.set_min_threads(cli.min_threads);
    server.set_max_threads(cli.max_threads);
    server.set_keep_alive_timeout(cli.keep_alive_timeout);
    server
        .listen(&cli.host, cli.binary_port)
        .context("failed to bind binary listener")?;
    server.start()?;

    let xml_listener = tokio::net::TcpListener::bind((cli.host.as_str(), cli.xmlrpc_port))
        .await
        .context("failed to bind xml-rpc port")?;
    let json_listener = tokio::net::TcpListener::bind((cli.host.as_str(), cli.jsonrpc_port))
        .await
        .context("failed to bind json-rpc port")?;
    tracing::info!(
        binary = cli.binary_port,
        xmlrpc = cli.xmlrpc_port,
        jsonrpc = cli.jsonrpc_port,
        "courier-serve up"
    );

    let xml_task = axum::serve(xml_listener, courier_http::xmlrpc::router(registry.clone()));
    let json_task = axum::serve(json_listener, courier_http::jsonrpc::router(registry));
    tokio::spawn(async move { xml_task.await.unwrap() });
    tokio::spawn(async move { json_task.await.unwrap() });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");
    server.terminate().await?;
    Ok(())
}
