//! Minimal host binary exercising a PSHELL server end to end: registers a
//! couple of commands and serves them over UDP. Start it, then drive it
//! with any UDP-speaking control client (or `nc -u`, packing the wire
//! header by hand) to see `hello`/`status` dispatch.
//!
//! Full demo programs (the aggregator, the interactive `pshell` client UI)
//! are out of scope for this crate; this binary exists only so the crate
//! has something runnable to smoke-test against.

use pshell::server::{Server, ServerType, Transport, UdpTransport};
use pshell::sink::OutputSink;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn install_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .event_format(pshell::logging::ColorizedFormatter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_logging();

    let mut demo_server = Server::new("demo", ServerType::Udp);
    demo_server.apply_config_file();

    let hello_count: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    let hello_count_cb = hello_count.clone();
    demo_server.add_command(
        "hello",
        "hello [arg ...]",
        "greets the caller with its arguments",
        0,
        20,
        true,
        Box::new(move |args: &[String], sink: &OutputSink| {
            let n = hello_count_cb.fetch_add(1, Ordering::Relaxed) + 1;
            sink.printf(&format!("hello command dispatched ({n} times so far):"));
            for (i, arg) in args.iter().enumerate() {
                sink.printf(&format!("  argv[{i}]: '{arg}'"));
            }
            Ok(())
        }),
    )?;

    demo_server.add_command(
        "status",
        "status",
        "show how many times 'hello' has run",
        0,
        0,
        true,
        Box::new(move |_args: &[String], sink: &OutputSink| {
            sink.printf(&format!("hello has been called {} times", hello_count.load(Ordering::Relaxed)));
            Ok(())
        }),
    )?;

    let sink = OutputSink::discard();
    demo_server.run_startup_file(&sink);

    UdpTransport {
        host: "localhost".to_string(),
        port: 6002,
    }
    .run(&mut demo_server)
    .await?;
    Ok(())
}
