use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::checker::Checker;
use crate::error::{WardenError, WardenResult};
use crate::inquiry::Inquiry;
use crate::policy::Policy;

/// Policy storage collaborator consumed by the guard.
///
/// `find_for_inquiry` may return every stored policy or a narrowed subset
/// when the backend can exploit the checker's dialect for an index-assisted
/// query; a backend that maps checkers to query strategies fails with
/// [`WardenError::UnknownCheckerType`] for one it cannot map. Implementors
/// must be safe for concurrent reads.
pub trait Storage: Send + Sync {
    /// Store a new policy; a duplicate uid fails with
    /// [`WardenError::PolicyExists`].
    fn add(&self, policy: Policy) -> WardenResult<()>;

    fn get(&self, uid: &str) -> WardenResult<Option<Policy>>;

    /// Page through all stored policies in a stable order.
    fn get_all(&self, limit: usize, offset: usize) -> WardenResult<Vec<Policy>>;

    /// Candidate policies for an inquiry, in the order the guard should
    /// scan them.
    fn find_for_inquiry(
        &self,
        inquiry: &Inquiry,
        checker: Option<&dyn Checker>,
    ) -> WardenResult<Vec<Policy>>;

    /// Replace a stored policy; a no-op when the uid is absent.
    fn update(&self, policy: Policy) -> WardenResult<()>;

    /// Remove a stored policy; a no-op when the uid is absent.
    fn delete(&self, uid: &str) -> WardenResult<()>;
}

/// In-memory storage keyed by policy uid, ordered by uid for deterministic
/// pagination. Useful for testing and for scenarios where persistence
/// isn't needed. Returns all policies for any inquiry (a linear-scan
/// backend has no index to narrow with, so any checker is acceptable).
#[derive(Default)]
pub struct MemoryStorage {
    policies: Mutex<BTreeMap<String, Policy>>,
}

fn lock_policies(
    mutex: &Mutex<BTreeMap<String, Policy>>,
) -> WardenResult<MutexGuard<'_, BTreeMap<String, Policy>>> {
    mutex
        .lock()
        .map_err(|e| WardenError::Storage(format!("lock poisoned: {}", e)))
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored policies (for testing/inspection).
    pub fn count(&self) -> usize {
        lock_policies(&self.policies).map(|p| p.len()).unwrap_or(0)
    }
}

impl Storage for MemoryStorage {
    fn add(&self, policy: Policy) -> WardenResult<()> {
        let mut policies = lock_policies(&self.policies)?;
        if policies.contains_key(policy.uid()) {
            return Err(WardenError::PolicyExists(policy.uid().to_string()));
        }
        policies.insert(policy.uid().to_string(), policy);
        Ok(())
    }

    fn get(&self, uid: &str) -> WardenResult<Option<Policy>> {
        let policies = lock_policies(&self.policies)?;
        Ok(policies.get(uid).cloned())
    }

    fn get_all(&self, limit: usize, offset: usize) -> WardenResult<Vec<Policy>> {
        let policies = lock_policies(&self.policies)?;
        Ok(policies.values().skip(offset).take(limit).cloned().collect())
    }

    fn find_for_inquiry(
        &self,
        _inquiry: &Inquiry,
        _checker: Option<&dyn Checker>,
    ) -> WardenResult<Vec<Policy>> {
        let policies = lock_policies(&self.policies)?;
        Ok(policies.values().cloned().collect())
    }

    fn update(&self, policy: Policy) -> WardenResult<()> {
        let mut policies = lock_policies(&self.policies)?;
        if let Some(stored) = policies.get_mut(policy.uid()) {
            *stored = policy;
        }
        Ok(())
    }

    fn delete(&self, uid: &str) -> WardenResult<()> {
        let mut policies = lock_policies(&self.policies)?;
        policies.remove(uid);
        Ok(())
    }
}
