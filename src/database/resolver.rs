//! Read/write routing across source and replica endpoints.

use std::fmt;
use std::sync::Arc;

use rand::Rng;

/// Kind of database operation being routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

/// Picks one endpoint among `len` candidates of the same role.
///
/// Implementations must return an index in `0..len`; `len` is never zero.
pub trait LoadBalancePolicy: Send + Sync + fmt::Debug {
    fn pick(&self, len: usize) -> usize;
}

/// Uniform random choice per operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomPolicy;

impl LoadBalancePolicy for RandomPolicy {
    fn pick(&self, len: usize) -> usize {
        rand::rng().random_range(0..len)
    }
}

/// Routes operations to sources (writes) and replicas (reads).
///
/// Reads use replicas, falling back to sources when there are none. Writes
/// use sources. [`Resolver::resolve`] returns `None` when the role has no
/// candidates, in which case the caller uses its primary connection.
pub struct Resolver<T> {
    sources: Vec<T>,
    replicas: Vec<T>,
    policy: Arc<dyn LoadBalancePolicy>,
}

impl<T> Resolver<T> {
    pub fn new(sources: Vec<T>, replicas: Vec<T>) -> Self {
        Self::with_policy(sources, replicas, Arc::new(RandomPolicy))
    }

    pub fn with_policy(
        sources: Vec<T>,
        replicas: Vec<T>,
        policy: Arc<dyn LoadBalancePolicy>,
    ) -> Self {
        Self {
            sources,
            replicas,
            policy,
        }
    }

    pub fn resolve(&self, operation: Operation) -> Option<&T> {
        let candidates = match operation {
            Operation::Write => &self.sources,
            Operation::Read if self.replicas.is_empty() => &self.sources,
            Operation::Read => &self.replicas,
        };

        if candidates.is_empty() {
            return None;
        }

        let index = self.policy.pick(candidates.len());
        candidates.get(index)
    }

    pub fn sources(&self) -> &[T] {
        &self.sources
    }

    pub fn replicas(&self) -> &[T] {
        &self.replicas
    }

    pub fn policy(&self) -> &Arc<dyn LoadBalancePolicy> {
        &self.policy
    }
}

impl<T: fmt::Debug> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("sources", &self.sources)
            .field("replicas", &self.replicas)
            .field("policy", &self.policy)
            .finish()
    }
}
