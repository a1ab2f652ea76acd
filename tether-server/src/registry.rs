//! The service registry: name → (descriptor, factory, lifetime).

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use tether_proto::descriptor::InterfaceDescriptor;
use tether_proto::{ErrorKind, RemotingError};

use crate::service::RemoteService;
use crate::session::ServerSession;

/// How long a resolved service instance lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceLifetime {
    /// A fresh instance per invocation.
    SingleCall,
    /// One instance per session, destroyed with it.
    Scoped,
    /// One instance for the server's lifetime, created on first resolve.
    Singleton,
}

/// Produces service instances on demand.
pub type ServiceFactory = Arc<dyn Fn() -> Arc<dyn RemoteService> + Send + Sync>;

/// One registered service.
pub struct ServiceRegistration {
    name: String,
    descriptor: Arc<InterfaceDescriptor>,
    factory: ServiceFactory,
    lifetime: ServiceLifetime,
    singleton: OnceLock<Arc<dyn RemoteService>>,
}

impl ServiceRegistration {
    /// Register under the descriptor's own (fully qualified interface) name.
    pub fn new(
        descriptor: InterfaceDescriptor,
        factory: ServiceFactory,
        lifetime: ServiceLifetime,
    ) -> Self {
        let name = descriptor.name.clone();
        Self::named(name, descriptor, factory, lifetime)
    }

    /// Register under an explicit name.
    pub fn named(
        name: impl Into<String>,
        descriptor: InterfaceDescriptor,
        factory: ServiceFactory,
        lifetime: ServiceLifetime,
    ) -> Self {
        Self {
            name: name.into(),
            descriptor: Arc::new(descriptor),
            factory,
            lifetime,
            singleton: OnceLock::new(),
        }
    }

    /// Convenience for services that are one shared instance.
    pub fn singleton(
        descriptor: InterfaceDescriptor,
        instance: Arc<dyn RemoteService>,
    ) -> Self {
        Self::new(descriptor, Arc::new(move || instance.clone()), ServiceLifetime::Singleton)
    }

    /// The registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The interface contract.
    pub fn descriptor(&self) -> &Arc<InterfaceDescriptor> {
        &self.descriptor
    }

    /// The configured lifetime.
    pub fn lifetime(&self) -> ServiceLifetime {
        self.lifetime
    }

    fn instance(&self, session: Option<&ServerSession>) -> Arc<dyn RemoteService> {
        match self.lifetime {
            ServiceLifetime::SingleCall => (self.factory)(),
            // Creation races once per name at most; OnceLock serializes them.
            ServiceLifetime::Singleton => self.singleton.get_or_init(|| (self.factory)()).clone(),
            ServiceLifetime::Scoped => match session {
                Some(session) => session.scoped_instance(&self.name, &*self.factory),
                None => (self.factory)(),
            },
        }
    }
}

/// Name → registration map. Read-mostly; writes are serialized by the lock.
#[derive(Default)]
pub struct ServiceRegistry {
    entries: RwLock<HashMap<String, Arc<ServiceRegistration>>>,
}

impl ServiceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registration; names are unique per server.
    pub fn register(&self, registration: ServiceRegistration) -> Result<(), RemotingError> {
        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(registration.name()) {
            return Err(RemotingError::new(
                ErrorKind::DuplicateRegistration,
                format!("service '{}' is already registered", registration.name()),
            ));
        }
        entries.insert(registration.name().to_owned(), Arc::new(registration));
        Ok(())
    }

    /// Look up a registration by name.
    pub fn get(&self, name: &str) -> Option<Arc<ServiceRegistration>> {
        self.entries.read().unwrap().get(name).cloned()
    }

    /// Resolve a service instance according to its lifetime.
    pub fn resolve(
        &self,
        name: &str,
        session: Option<&ServerSession>,
    ) -> Result<(Arc<ServiceRegistration>, Arc<dyn RemoteService>), RemotingError> {
        let registration = self.get(name).ok_or_else(|| {
            RemotingError::new(ErrorKind::ServiceUnknown, format!("no service named '{name}'"))
        })?;
        let instance = registration.instance(session);
        Ok((registration, instance))
    }

    /// The interface descriptor registered under `name`.
    pub fn interface_of(&self, name: &str) -> Option<Arc<InterfaceDescriptor>> {
        self.get(name).map(|r| r.descriptor.clone())
    }

    /// Snapshot of all registrations.
    pub fn list(&self) -> Vec<Arc<ServiceRegistration>> {
        self.entries.read().unwrap().values().cloned().collect()
    }
}
