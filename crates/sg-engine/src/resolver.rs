//! Asynchronous CNAME resolution abstraction
//!
//! The resolver is an injected collaborator: the engine decides *when* to
//! resolve (the uncloaking policy lives in the pipeline), the resolver only
//! answers "what does this hostname alias to". A failed or unavailable
//! lookup is a first-class result, not an error - the pipeline fails open to
//! the literal-host verdict.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Outcome of one alias lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The ordered CNAME alias chain (possibly empty).
    Resolved(Vec<String>),
    /// The resolver failed or is unreachable; callers fail open.
    Unavailable,
}

impl Resolution {
    /// The terminal alias of the chain, if there is a usable one.
    pub fn canonical_host(&self) -> Option<&str> {
        match self {
            Resolution::Resolved(aliases) => {
                aliases.iter().rev().find(|a| !a.is_empty()).map(|a| a.as_str())
            }
            Resolution::Unavailable => None,
        }
    }
}

pub type ResolveFuture = Pin<Box<dyn Future<Output = Resolution> + Send + 'static>>;

/// DNS alias resolution, async and injectable.
pub trait CnameResolver: Send + Sync + 'static {
    fn resolve(&self, host: &str) -> ResolveFuture;
}

/// Resolver stub for hosts without DNS access; always unavailable.
pub struct NoopResolver;

impl CnameResolver for NoopResolver {
    fn resolve(&self, _host: &str) -> ResolveFuture {
        Box::pin(std::future::ready(Resolution::Unavailable))
    }
}

/// Scripted resolver for tests; counts lookups.
#[derive(Default)]
pub struct MockResolver {
    aliases: Mutex<HashMap<String, Vec<String>>>,
    unavailable: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a hostname to its alias chain.
    pub fn map_host(&self, host: &str, aliases: &[&str]) {
        self.aliases.lock().unwrap().insert(
            host.to_string(),
            aliases.iter().map(|a| a.to_string()).collect(),
        );
    }

    /// Make lookups for a hostname fail.
    pub fn make_unavailable(&self, host: &str) {
        self.unavailable.lock().unwrap().push(host.to_string());
    }

    /// Number of `resolve` calls observed.
    pub fn num_resolves(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CnameResolver for MockResolver {
    fn resolve(&self, host: &str) -> ResolveFuture {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.lock().unwrap().iter().any(|h| h == host) {
            return Box::pin(std::future::ready(Resolution::Unavailable));
        }

        let aliases = self
            .aliases
            .lock()
            .unwrap()
            .get(host)
            .cloned()
            .unwrap_or_default();
        Box::pin(std::future::ready(Resolution::Resolved(aliases)))
    }
}
