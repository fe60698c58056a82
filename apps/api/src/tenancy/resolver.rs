//! Active Tenant Resolver — the single source of truth for which company is
//! active for one client profile.
//!
//! Combines the latest membership fetch with the persisted selection slot.
//! The externally visible active company is always `None` or an element of the
//! most recently applied membership list.

use std::fmt::Display;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::company::CompanyMembership;
use crate::tenancy::selection_store::SelectionStore;

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// No membership fetch has been applied for the current identity.
    Uninitialized,
    /// Signed out, or the user belongs to no company.
    NoMemberships,
    Active(CompanyMembership),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    Uninitialized,
    NoMemberships,
    Active,
}

impl Resolution {
    pub fn state(&self) -> ResolutionState {
        match self {
            Resolution::Uninitialized => ResolutionState::Uninitialized,
            Resolution::NoMemberships => ResolutionState::NoMemberships,
            Resolution::Active(_) => ResolutionState::Active,
        }
    }
}

/// Issued by [`ActiveTenantResolver::begin_fetch`]; identifies which request a
/// membership response belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    user_id: Uuid,
    seq: u64,
}

impl FetchTicket {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied,
    /// Response belonged to a previous identity or was overtaken by a newer one.
    Discarded,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("company {0} is not among the loaded memberships")]
    NotAMember(Uuid),
}

impl From<SelectError> for AppError {
    fn from(e: SelectError) -> Self {
        AppError::NotFound(e.to_string())
    }
}

/// What downstream screens read: the active company, the full list for a
/// switcher, and the error of the last fetch if it failed.
#[derive(Debug, Clone, Serialize)]
pub struct ResolverSnapshot {
    pub state: ResolutionState,
    pub active: Option<CompanyMembership>,
    pub memberships: Vec<CompanyMembership>,
    pub last_error: Option<String>,
}

pub struct ActiveTenantResolver<S> {
    store: S,
    /// Mirror of the slot. The resolver is its only writer.
    persisted: Option<String>,
    identity: Option<Uuid>,
    memberships: Vec<CompanyMembership>,
    resolution: Resolution,
    next_seq: u64,
    settled_seq: Option<u64>,
    last_error: Option<String>,
}

impl<S: SelectionStore> ActiveTenantResolver<S> {
    /// Reads the slot once; afterwards the in-memory mirror is authoritative.
    pub fn new(store: S) -> Self {
        let persisted = store.read();
        Self {
            store,
            persisted,
            identity: None,
            memberships: Vec::new(),
            resolution: Resolution::Uninitialized,
            next_seq: 0,
            settled_seq: None,
            last_error: None,
        }
    }

    pub fn identity(&self) -> Option<Uuid> {
        self.identity
    }

    #[cfg(test)]
    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn active(&self) -> Option<&CompanyMembership> {
        match &self.resolution {
            Resolution::Active(m) => Some(m),
            _ => None,
        }
    }

    pub fn memberships(&self) -> &[CompanyMembership] {
        &self.memberships
    }

    #[cfg(test)]
    pub fn persisted_selection(&self) -> Option<&str> {
        self.persisted.as_deref()
    }

    #[cfg(test)]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// True once a fetch for `user_id` has been applied.
    pub fn is_resolved_for(&self, user_id: Uuid) -> bool {
        self.identity == Some(user_id) && self.resolution != Resolution::Uninitialized
    }

    /// Switches the identity the resolver serves. Memberships of a previous
    /// identity are dropped immediately so they can never surface for the new one.
    pub fn set_identity(&mut self, user_id: Option<Uuid>) {
        match user_id {
            None => {
                if self.identity.is_some() {
                    debug!("Identity cleared");
                }
                self.identity = None;
                self.memberships.clear();
                self.resolution = Resolution::NoMemberships;
                self.retire_issued_tickets();
                self.last_error = None;
            }
            Some(id) if self.identity != Some(id) => {
                debug!("Identity changed to {id}");
                self.identity = Some(id);
                self.memberships.clear();
                self.resolution = Resolution::Uninitialized;
                self.retire_issued_tickets();
                self.last_error = None;
            }
            Some(_) => {}
        }
    }

    /// Every ticket issued so far belongs to an earlier identity stint, so none
    /// of them may settle the new one (A → B → A must not apply A's first ticket).
    fn retire_issued_tickets(&mut self) {
        self.settled_seq = self.next_seq.checked_sub(1);
    }

    /// Starts a membership fetch for `user_id`. Returns `None` when signed
    /// out: the query is disabled and the state is `NoMemberships`.
    pub fn begin_fetch(&mut self, user_id: Option<Uuid>) -> Option<FetchTicket> {
        self.set_identity(user_id);
        let user_id = user_id?;
        let seq = self.next_seq;
        self.next_seq += 1;
        Some(FetchTicket { user_id, seq })
    }

    fn is_current(&self, ticket: &FetchTicket) -> bool {
        self.identity == Some(ticket.user_id) && self.settled_seq.map_or(true, |s| ticket.seq > s)
    }

    /// Applies the outcome of a fetch started with `begin_fetch`.
    ///
    /// A failed fetch is returned unchanged and leaves the previous resolution
    /// in place. Stale responses are dropped without touching state.
    pub fn apply_fetch<E: Display>(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<CompanyMembership>, E>,
    ) -> Result<FetchOutcome, E> {
        if !self.is_current(&ticket) {
            debug!(
                "Discarding membership response #{} for user {}",
                ticket.seq, ticket.user_id
            );
            return Ok(FetchOutcome::Discarded);
        }
        self.settled_seq = Some(ticket.seq);

        match result {
            Err(e) => {
                warn!("Membership fetch failed for user {}: {e}", ticket.user_id);
                self.last_error = Some(e.to_string());
                Err(e)
            }
            Ok(memberships) => {
                self.last_error = None;
                self.memberships = memberships;
                self.reconcile();
                Ok(FetchOutcome::Applied)
            }
        }
    }

    fn reconcile(&mut self) {
        let Some(first) = self.memberships.first().cloned() else {
            // The slot is left alone: an empty answer may be transient.
            self.resolution = Resolution::NoMemberships;
            return;
        };

        let persisted_match = self
            .persisted
            .as_deref()
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .and_then(|id| self.memberships.iter().find(|m| m.company_id == id))
            .cloned();

        match persisted_match {
            Some(membership) => {
                self.resolution = Resolution::Active(membership);
            }
            None => {
                if let Some(stale) = &self.persisted {
                    info!(
                        "Persisted company '{stale}' not among memberships, falling back to {}",
                        first.company_id
                    );
                }
                self.persist(first.company_id);
                self.resolution = Resolution::Active(first);
            }
        }
    }

    fn persist(&mut self, company_id: Uuid) {
        let value = company_id.to_string();
        self.store.write(&value);
        self.persisted = Some(value);
    }

    /// Explicit switch to one of the loaded memberships. No fetch involved.
    pub fn select(&mut self, company_id: Uuid) -> Result<CompanyMembership, SelectError> {
        let membership = self
            .memberships
            .iter()
            .find(|m| m.company_id == company_id)
            .cloned()
            .ok_or(SelectError::NotAMember(company_id))?;

        self.persist(company_id);
        self.resolution = Resolution::Active(membership.clone());
        info!("Active company switched to {company_id}");
        Ok(membership)
    }

    /// Sign-out: forget the identity and clear the slot.
    pub fn sign_out(&mut self) {
        self.store.clear();
        self.persisted = None;
        self.set_identity(None);
    }

    pub fn snapshot(&self) -> ResolverSnapshot {
        ResolverSnapshot {
            state: self.resolution.state(),
            active: self.active().cloned(),
            memberships: self.memberships.clone(),
            last_error: self.last_error.clone(),
        }
    }
}
