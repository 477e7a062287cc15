//! Reconciliation Engine.
//!
//! Walks the local history and the executor's applied list in lockstep.
//! Ephemeral remote entries are dropped first; every remaining remote entry
//! must carry the same id as the local migration at its position.

use crate::error::{LiftError, LiftResult};
use crate::migration::{Migration, MigrationId, RemoteMigration};
use crate::selector::Selector;

/// Split of the local history into applied and pending parts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reconciliation<'a> {
    /// Position in the local history of the last migration applied remotely.
    pub last_applied_index: Option<usize>,
    pub applied: &'a [Migration],
    pub pending: &'a [Migration],
}

impl Reconciliation<'_> {
    /// Position in the local history of the first pending migration.
    pub fn first_pending(&self) -> usize {
        self.applied.len()
    }

    pub fn last_applied(&self) -> Option<&Migration> {
        self.applied.last()
    }
}

/// Compare `local` against `remote`, ignoring remote ids matching `is_ephemeral`.
///
/// Fails with [`LiftError::HistoryInversion`] when the database knows more
/// permanent migrations than exist locally, and with
/// [`LiftError::LockstepViolation`] when ids diverge at the same position.
pub fn reconcile<'a>(
    local: &'a [Migration],
    remote: &[RemoteMigration],
    is_ephemeral: impl Fn(&MigrationId) -> bool,
) -> LiftResult<Reconciliation<'a>> {
    let permanent: Vec<&MigrationId> = remote
        .iter()
        .map(|r| &r.id)
        .filter(|id| !is_ephemeral(id))
        .collect();

    if permanent.len() > local.len() {
        return Err(LiftError::HistoryInversion {
            local: local.iter().map(|m| m.id.clone()).collect(),
            remote: permanent.into_iter().cloned().collect(),
        });
    }

    let mut last_applied_index = None;
    for (position, (migration, remote_id)) in local.iter().zip(&permanent).enumerate() {
        if migration.id != **remote_id {
            return Err(LiftError::LockstepViolation {
                position,
                local: migration.id.clone(),
                remote: (*remote_id).clone(),
            });
        }
        last_applied_index = Some(position);
    }

    let (applied, pending) = local.split_at(permanent.len());
    Ok(Reconciliation {
        last_applied_index,
        applied,
        pending,
    })
}

/// Narrow `pending` with an optional selector.
///
/// A selector that matches none of a non-empty pending list is an error
/// rather than a silent no-op.
pub fn select_pending<'a>(
    pending: &'a [Migration],
    selector: Option<&Selector>,
) -> LiftResult<&'a [Migration]> {
    let Some(selector) = selector else {
        return Ok(pending);
    };
    let selected = selector.resolve(pending);
    if selected.is_empty() && !pending.is_empty() {
        return Err(LiftError::InvalidSelector {
            selector: selector.to_string(),
            target: "pending",
        });
    }
    Ok(selected)
}
