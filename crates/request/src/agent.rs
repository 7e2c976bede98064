//! The agent owns the pooled machinery requests are executed with.

use crate::client::Client;
use crate::pool::Pool;
use crate::transport::{ReqwestTransport, Transport};
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;

static GLOBAL_AGENT: Lazy<Arc<Agent>> = Lazy::new(|| Agent::builder().build());

type TransportFactory = Box<dyn Fn() -> Box<dyn Transport> + Send + Sync>;

/// Transport and client pools shared by every request run through the agent.
pub struct Agent {
    transports: Arc<Pool<Box<dyn Transport>>>,
    clients: Arc<Pool<Client>>,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    /// The process wide agent, backed by [`ReqwestTransport`].
    pub fn global() -> Arc<Agent> {
        Arc::clone(&GLOBAL_AGENT)
    }

    pub fn transports(&self) -> &Arc<Pool<Box<dyn Transport>>> {
        &self.transports
    }

    pub fn clients(&self) -> &Arc<Pool<Client>> {
        &self.clients
    }

    /// Transports and clients currently checked out.
    pub fn outstanding(&self) -> usize {
        self.transports.outstanding() + self.clients.outstanding()
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent").field("transports", &self.transports).field("clients", &self.clients).finish()
    }
}

pub struct AgentBuilder {
    transport_factory: Option<TransportFactory>,
}

impl AgentBuilder {
    fn new() -> Self {
        Self { transport_factory: None }
    }

    /// Builds transports with `factory` instead of [`ReqwestTransport::new`].
    pub fn transport<F, T>(mut self, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Transport + 'static,
    {
        self.transport_factory = Some(Box::new(move || Box::new(factory()) as Box<dyn Transport>));
        self
    }

    pub fn build(self) -> Arc<Agent> {
        let factory = self.transport_factory.unwrap_or_else(|| Box::new(|| Box::new(ReqwestTransport::new()) as Box<dyn Transport>));
        Arc::new(Agent { transports: Pool::new("transport", factory), clients: Pool::new("client", Client::new) })
    }
}

impl fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentBuilder").field("custom_transport", &self.transport_factory.is_some()).finish()
    }
}
