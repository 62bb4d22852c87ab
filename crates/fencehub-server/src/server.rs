use std::{io, net::SocketAddr, sync::Arc};

use tracing::info;

use crate::{
    MAX_CONNECTIONS, ServerError,
    backend::{FenceBackend, PluginBackend},
    config::ServerConfig,
    selector::Selector,
    signals::{StopSignal, WakePipe},
    state::ServerShared,
    workers::WorkerPool,
};

/// Human-readable release version.
pub const VERSION_STRING: &str = env!("CARGO_PKG_VERSION");

/// A fully initialized but not yet running server instance.
///
/// Splitting construction from `run` lets callers learn the bound
/// address (the tests bind port 0) and keep a stop handle before the
/// selector takes over the calling thread.
pub struct Server {
    shared: Arc<ServerShared>,
    backend: Arc<dyn FenceBackend>,
    selector: Selector,
}

impl Server {
    /// Loads the fence module and binds the listening socket per the
    /// command line. Any failure here is fatal to startup.
    pub fn from_config(config: &ServerConfig) -> Result<Self, ServerError> {
        let addr = config.socket_addr()?;
        let fence_module = config.fence_module()?;
        info!(path = %fence_module.display(), "loading fence module");
        let backend: Arc<dyn FenceBackend> = Arc::new(PluginBackend::load(fence_module)?);
        Self::bind(addr, backend)
    }

    /// Binds the listener and wires up the shared state with the given
    /// back-end. Used directly by the integration tests.
    pub fn bind(addr: SocketAddr, backend: Arc<dyn FenceBackend>) -> Result<Self, ServerError> {
        let stop = StopSignal::install().map_err(ServerError::Signals)?;
        let wake = WakePipe::new().map_err(ServerError::Wakeup)?;
        let shared = Arc::new(ServerShared::new(MAX_CONNECTIONS, wake, stop));
        let selector = Selector::bind(addr, Arc::clone(&shared))?;
        Ok(Self { shared, backend, selector })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.selector.local_addr()
    }

    /// Handle for tripping a shutdown from another thread, equivalent
    /// to delivering a stop signal.
    pub fn shared(&self) -> Arc<ServerShared> {
        Arc::clone(&self.shared)
    }

    /// Starts the worker pool and runs the selector loop on the calling
    /// thread until a stop signal arrives, then joins the workers.
    pub fn run(mut self) -> Result<(), ServerError> {
        info!("starting worker threads");
        let workers = WorkerPool::start(MAX_CONNECTIONS, &self.shared, &self.backend);

        info!("initialization complete, ready to process requests");
        let result = self.selector.run();

        info!("stopping worker threads");
        workers.stop(&self.shared);
        info!("end application");
        result
    }
}
