//! In-memory credential store.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::{CredentialStore, StoreError, TokenUser};

/// Process-local [`CredentialStore`].
///
/// Useful for short-lived tools and for tests; nothing survives a restart.
#[derive(Debug)]
pub struct MemoryCredentialStore {
    inner: RwLock<Inner>,
}

#[derive(Debug)]
struct Inner {
    next_id: u64,
    users: HashMap<String, TokenUser>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_id: 1,
                users: HashMap::new(),
            }),
        }
    }

    /// Number of stored credentials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .users
            .len()
    }

    /// Returns `true` if the store holds no credentials.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn find_by_member_id(&self, member_id: &str) -> Result<Option<TokenUser>, StoreError> {
        Ok(self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .users
            .get(member_id)
            .cloned())
    }

    async fn save(&self, user: &TokenUser) -> Result<TokenUser, StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut user = user.clone();

        let existing_id = inner.users.get(&user.member_id).and_then(|u| u.id);
        let id = match existing_id.or(user.id) {
            Some(id) => id,
            None => inner.next_id,
        };
        inner.next_id = inner.next_id.max(id + 1);
        user.id = Some(id);
        inner.users.insert(user.member_id.clone(), user.clone());

        Ok(user)
    }

    async fn delete_by_member_id(&self, member_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .users
            .remove(member_id)
            .is_some())
    }
}
