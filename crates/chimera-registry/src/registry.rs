//! The personality set and its alias map.
//!
//! Reads serve a snapshot behind a read-many/write-one lock; mutations take
//! the write lock and push a JSON snapshot to the single persistence writer
//! task, so file writes can never interleave.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;
use tracing::{debug, info};

use chimera_core::types::{PersonalityId, UserId};

use crate::error::{RegistryError, Result};
use crate::store::{PersonalityStore, StoreDocument};
use crate::types::{fold, Personality};

#[derive(Default)]
struct RegistryInner {
    personalities: HashMap<PersonalityId, Personality>,
    /// Insertion order, oldest first. Ties within a lookup rank resolve to
    /// the most-recently-added, i.e. the last hit scanning this in reverse.
    order: Vec<PersonalityId>,
    /// Auto-aliases derived from display names. Globally visible.
    global_aliases: HashMap<String, PersonalityId>,
    /// Explicit aliases, visible only to the creating user. Key is folded.
    user_aliases: HashMap<(UserId, String), PersonalityId>,
}

pub struct PersonalityRegistry {
    inner: RwLock<RegistryInner>,
    persist_tx: Option<mpsc::UnboundedSender<StoreDocument>>,
}

impl PersonalityRegistry {
    /// In-memory registry with no persistence. Used by tests.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            persist_tx: None,
        }
    }

    /// Load from the store (migrating legacy shapes) and spawn the writer task.
    pub fn with_store(store: PersonalityStore) -> Result<Self> {
        let doc = store.load()?;
        let mut inner = RegistryInner::default();
        for p in doc.personalities {
            inner.order.push(p.id.clone());
            inner.personalities.insert(p.id.clone(), p);
        }
        for (alias, pid) in doc.aliases.global {
            inner
                .global_aliases
                .insert(alias, PersonalityId::from(pid.as_str()));
        }
        for (user, aliases) in doc.aliases.user {
            for (alias, pid) in aliases {
                inner.user_aliases.insert(
                    (UserId::from(user.as_str()), alias),
                    PersonalityId::from(pid.as_str()),
                );
            }
        }
        info!(count = inner.personalities.len(), "personality registry loaded");
        Ok(Self {
            inner: RwLock::new(inner),
            persist_tx: Some(store.spawn_writer()),
        })
    }

    // ── lookups ───────────────────────────────────────────────────────────────

    /// Resolve a name-or-alias for a given user.
    ///
    /// Precedence: canonical id → display name → user alias → global alias,
    /// then the same four ranks case-folded. First hit wins; ties within a
    /// rank go to the most-recently-added personality.
    pub fn lookup(&self, query: &str, user: &UserId) -> Option<Personality> {
        let inner = self.inner.read().unwrap();

        // Rank 1: exact canonical id.
        let as_id = PersonalityId::from(query);
        if let Some(p) = inner.personalities.get(&as_id) {
            return Some(p.clone());
        }

        // Rank 2: exact display name, most-recently-added first.
        for pid in inner.order.iter().rev() {
            if let Some(p) = inner.personalities.get(pid) {
                if p.display_name == query {
                    return Some(p.clone());
                }
            }
        }

        // Rank 3: user-scoped alias (stored folded; exact hit only when the
        // query is already folded).
        if let Some(pid) = inner.user_aliases.get(&(user.clone(), query.to_string())) {
            if let Some(p) = inner.personalities.get(pid) {
                return Some(p.clone());
            }
        }

        // Rank 4: global alias.
        if let Some(pid) = inner.global_aliases.get(query) {
            if let Some(p) = inner.personalities.get(pid) {
                return Some(p.clone());
            }
        }

        // Rank 5: case-folded fallback over ranks 1–4.
        let folded = fold(query);
        for pid in inner.order.iter().rev() {
            if fold(pid.as_str()) == folded {
                if let Some(p) = inner.personalities.get(pid) {
                    return Some(p.clone());
                }
            }
        }
        for pid in inner.order.iter().rev() {
            if let Some(p) = inner.personalities.get(pid) {
                if fold(&p.display_name) == folded {
                    return Some(p.clone());
                }
            }
        }
        if let Some(pid) = inner.user_aliases.get(&(user.clone(), folded.clone())) {
            if let Some(p) = inner.personalities.get(pid) {
                return Some(p.clone());
            }
        }
        if let Some(pid) = inner.global_aliases.get(&folded) {
            if let Some(p) = inner.personalities.get(pid) {
                return Some(p.clone());
            }
        }

        None
    }

    pub fn get(&self, id: &PersonalityId) -> Option<Personality> {
        self.inner.read().unwrap().personalities.get(id).cloned()
    }

    /// All personalities in insertion order.
    pub fn list(&self) -> Vec<Personality> {
        let inner = self.inner.read().unwrap();
        inner
            .order
            .iter()
            .filter_map(|id| inner.personalities.get(id).cloned())
            .collect()
    }

    /// Active display names — own-webhook recognition signal (d) and the
    /// reference-chain author classifier both key off this set.
    pub fn display_names(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        inner
            .order
            .iter()
            .filter_map(|id| inner.personalities.get(id).map(|p| p.display_name.clone()))
            .collect()
    }

    /// Map display name → personality id, most-recently-added winning on
    /// duplicate names.
    pub fn display_name_owners(&self) -> HashMap<String, PersonalityId> {
        let inner = self.inner.read().unwrap();
        let mut map = HashMap::new();
        for pid in &inner.order {
            if let Some(p) = inner.personalities.get(pid) {
                map.insert(p.display_name.clone(), pid.clone());
            }
        }
        map
    }

    // ── mutations ─────────────────────────────────────────────────────────────

    /// Register a personality. Auto-aliases (the folded display name and, for
    /// multi-word names, the folded first word) become globally visible; on
    /// collision the newest registration wins the alias.
    pub fn add(&self, personality: Personality) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if inner.personalities.contains_key(&personality.id) {
            return Err(RegistryError::IdExists(personality.id.to_string()));
        }

        let folded_name = fold(&personality.display_name);
        inner
            .global_aliases
            .insert(folded_name.clone(), personality.id.clone());
        if let Some(first_word) = folded_name.split_whitespace().next() {
            if first_word != folded_name {
                inner
                    .global_aliases
                    .insert(first_word.to_string(), personality.id.clone());
            }
        }

        debug!(id = %personality.id, name = %personality.display_name, "personality added");
        inner.order.push(personality.id.clone());
        inner
            .personalities
            .insert(personality.id.clone(), personality);
        self.persist(&inner);
        Ok(())
    }

    /// Create a user-scoped alias. Rejected when a global alias with the same
    /// folded form already points at a *different* personality.
    pub fn add_user_alias(
        &self,
        user: &UserId,
        alias: &str,
        personality_id: &PersonalityId,
    ) -> Result<()> {
        let folded = fold(alias);
        let mut inner = self.inner.write().unwrap();
        if !inner.personalities.contains_key(personality_id) {
            return Err(RegistryError::NotFound(personality_id.to_string()));
        }
        if let Some(existing) = inner.global_aliases.get(&folded) {
            if existing != personality_id {
                return Err(RegistryError::AliasCollision { alias: folded });
            }
        }
        inner
            .user_aliases
            .insert((user.clone(), folded), personality_id.clone());
        self.persist(&inner);
        Ok(())
    }

    /// Hard-delete a personality. Authorization: the owner, or a platform
    /// admin. Every alias pointing at it, in either scope, is purged.
    pub fn remove(
        &self,
        personality_id: &PersonalityId,
        by_user: &UserId,
        is_admin: bool,
    ) -> Result<Personality> {
        let mut inner = self.inner.write().unwrap();
        let personality = inner
            .personalities
            .get(personality_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(personality_id.to_string()))?;

        if personality.owner_user_id != *by_user && !is_admin {
            return Err(RegistryError::NotAuthorized {
                reason: "only the owner or an admin can remove a personality".to_string(),
            });
        }

        inner.personalities.remove(personality_id);
        inner.order.retain(|id| id != personality_id);
        inner.global_aliases.retain(|_, pid| pid != personality_id);
        inner.user_aliases.retain(|_, pid| pid != personality_id);

        info!(id = %personality_id, name = %personality.display_name, "personality removed");
        self.persist(&inner);
        Ok(personality)
    }

    // ── persistence ───────────────────────────────────────────────────────────

    fn persist(&self, inner: &RegistryInner) {
        let Some(tx) = &self.persist_tx else {
            return;
        };
        let _ = tx.send(snapshot(inner));
    }
}

impl Default for PersonalityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot(inner: &RegistryInner) -> StoreDocument {
    let mut doc = StoreDocument::default();
    for pid in &inner.order {
        if let Some(p) = inner.personalities.get(pid) {
            doc.personalities.push(p.clone());
        }
    }
    for (alias, pid) in &inner.global_aliases {
        doc.aliases.global.insert(alias.clone(), pid.to_string());
    }
    for ((user, alias), pid) in &inner.user_aliases {
        doc.aliases
            .user
            .entry(user.to_string())
            .or_default()
            .insert(alias.clone(), pid.to_string());
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str, owner: &str) -> Personality {
        Personality::new(name, UserId::from(owner))
    }

    #[test]
    fn add_rejects_duplicate_id() {
        let registry = PersonalityRegistry::new();
        let p = named("Lilith", "U1");
        let dup = p.clone();
        registry.add(p).unwrap();
        assert!(matches!(
            registry.add(dup),
            Err(RegistryError::IdExists(_))
        ));
    }

    #[test]
    fn lookup_by_display_name_and_auto_alias() {
        let registry = PersonalityRegistry::new();
        let p = named("Dark Lilith", "U1");
        let id = p.id.clone();
        registry.add(p).unwrap();

        let user = UserId::from("U2");
        // Exact display name.
        assert_eq!(registry.lookup("Dark Lilith", &user).unwrap().id, id);
        // Folded full-name auto-alias.
        assert_eq!(registry.lookup("dark lilith", &user).unwrap().id, id);
        // First-word auto-alias.
        assert_eq!(registry.lookup("dark", &user).unwrap().id, id);
    }

    #[test]
    fn user_alias_wins_for_its_creator_only() {
        let registry = PersonalityRegistry::new();
        let a = named("Alpha", "U1");
        let b = named("Beta", "U1");
        let a_id = a.id.clone();
        let b_id = b.id.clone();
        registry.add(a).unwrap();
        registry.add(b).unwrap();

        let creator = UserId::from("U2");
        let other = UserId::from("U3");
        registry.add_user_alias(&creator, "buddy", &b_id).unwrap();

        assert_eq!(registry.lookup("buddy", &creator).unwrap().id, b_id);
        assert!(registry.lookup("buddy", &other).is_none());

        // Global auto-aliases resolve for everyone.
        assert_eq!(registry.lookup("alpha", &other).unwrap().id, a_id);
    }

    #[test]
    fn user_alias_rejected_when_global_points_elsewhere() {
        let registry = PersonalityRegistry::new();
        let a = named("Alpha", "U1");
        let b = named("Beta", "U1");
        let b_id = b.id.clone();
        registry.add(a).unwrap();
        registry.add(b).unwrap();

        let user = UserId::from("U2");
        // "alpha" is Alpha's global auto-alias; pointing it at Beta must fail.
        assert!(matches!(
            registry.add_user_alias(&user, "Alpha", &b_id),
            Err(RegistryError::AliasCollision { .. })
        ));
    }

    #[test]
    fn recency_breaks_display_name_ties() {
        let registry = PersonalityRegistry::new();
        let first = named("Echo", "U1");
        let second = named("Echo", "U1");
        let second_id = second.id.clone();
        registry.add(first).unwrap();
        registry.add(second).unwrap();

        let user = UserId::from("U2");
        assert_eq!(registry.lookup("Echo", &user).unwrap().id, second_id);
    }

    #[test]
    fn remove_requires_owner_or_admin() {
        let registry = PersonalityRegistry::new();
        let p = named("Lilith", "U1");
        let id = p.id.clone();
        registry.add(p).unwrap();

        let stranger = UserId::from("U9");
        assert!(matches!(
            registry.remove(&id, &stranger, false),
            Err(RegistryError::NotAuthorized { .. })
        ));
        // Admin override.
        registry.remove(&id, &stranger, true).unwrap();
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn remove_purges_every_alias() {
        let registry = PersonalityRegistry::new();
        let p = named("Dark Lilith", "U1");
        let id = p.id.clone();
        registry.add(p).unwrap();

        let owner = UserId::from("U1");
        registry.add_user_alias(&owner, "dl", &id).unwrap();
        registry.remove(&id, &owner, false).unwrap();

        assert!(registry.lookup("dark lilith", &owner).is_none());
        assert!(registry.lookup("dark", &owner).is_none());
        assert!(registry.lookup("dl", &owner).is_none());
        assert!(registry.list().is_empty());
    }
}
