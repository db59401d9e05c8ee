#![allow(dead_code)]

use std::sync::{Arc, Once};

use tether_host::{Dispatcher, FunctionTable, Registry, RemoteObject, ScriptEngine};
use tether_runtime::Evaluator;
use tether_runtime::transport::PipeTransport;

static TRACING: Once = Once::new();

/// Installs the env-filtered subscriber once, so failing runs can be
/// replayed with RUST_LOG=debug.
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Root object for tests that only need ObjectId 0 to resolve.
pub struct TestRoot;

impl RemoteObject for TestRoot {}

/// Wires a driver evaluator to a host dispatcher over an in-memory duplex
/// channel - the same topology as a real deployment, minus the sockets.
pub fn launch(root: Arc<dyn RemoteObject>, functions: FunctionTable) -> Arc<Evaluator> {
    init_tracing();

    let (driver_io, host_io) = tokio::io::duplex(64 * 1024);
    let (driver_read, driver_write) = tokio::io::split(driver_io);
    let (host_read, host_write) = tokio::io::split(host_io);

    let registry = Arc::new(Registry::new(root));
    let (host_transport, host_rx) = PipeTransport::new(host_write, host_read);
    let dispatcher = Dispatcher::new(
        registry,
        Arc::new(functions) as Arc<dyn ScriptEngine>,
        host_transport.into_transport_parts(host_rx),
    );
    tokio::spawn(dispatcher.run());

    let (transport, message_rx) = PipeTransport::new(driver_write, driver_read);
    let evaluator = Arc::new(Evaluator::new(transport.into_transport_parts(message_rx)));
    let run = Arc::clone(&evaluator);
    tokio::spawn(async move { run.run().await });

    evaluator
}

/// Polls until `condition` holds, failing the test after about a second.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not met within 1s");
}
