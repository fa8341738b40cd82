// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Roles and the access policy enforced by the data manager.
//!
//! | Role   | leads                                  | users                          |
//! |--------|----------------------------------------|--------------------------------|
//! | admin  | everything                             | everything                     |
//! | master | assigned to self or team, incl. delete | own team (`masterId` = self)   |
//! | user   | read/update assigned to self           | read/update own profile        |
//!
//! Operational collections (`rate_limits`, `backups`, ...) are admin-only.
//! Activity logs are readable by their actor (and a master's team).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collections;
use crate::document::{Document, Fields};
use crate::error::DataError;
use crate::query::{FilterOperator, QueryOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Master,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Master => "master",
            Role::User => "user",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Role::Admin),
            "master" => Some(Role::Master),
            "user" => Some(Role::User),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated panel user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub uid: String,
    pub role: Role,
    /// For masters: uids of the users they manage
    #[serde(default)]
    pub team: Vec<String>,
}

impl Actor {
    pub fn admin(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            role: Role::Admin,
            team: Vec::new(),
        }
    }

    pub fn master(uid: impl Into<String>, team: Vec<String>) -> Self {
        Self {
            uid: uid.into(),
            role: Role::Master,
            team,
        }
    }

    pub fn user(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            role: Role::User,
            team: Vec::new(),
        }
    }

    /// Self plus team
    fn reach(&self) -> Vec<String> {
        let mut uids = Vec::with_capacity(self.team.len() + 1);
        uids.push(self.uid.clone());
        uids.extend(self.team.iter().cloned());
        uids
    }

    fn reaches(&self, uid: Option<&str>) -> bool {
        uid.is_some_and(|uid| uid == self.uid || self.team.iter().any(|t| t == uid))
    }
}

/// Who is performing an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Internal writes (activity log, maintenance)
    System,
    Actor(Actor),
    /// No session, or the session expired
    Anonymous,
}

impl Principal {
    /// Uid stamped into `createdBy` / `updatedBy`
    #[must_use]
    pub fn uid(&self) -> Option<&str> {
        match self {
            Principal::Actor(actor) => Some(&actor.uid),
            Principal::System => Some("system"),
            Principal::Anonymous => None,
        }
    }

    /// System or admin: no per-document rules apply
    #[must_use]
    pub fn is_privileged(&self) -> bool {
        match self {
            Principal::System => true,
            Principal::Actor(actor) => actor.role == Role::Admin,
            Principal::Anonymous => false,
        }
    }
}

/// Source of the current principal.
pub trait AuthContext: Send + Sync {
    fn principal(&self) -> Principal;

    /// Called after every operation performed on the principal's behalf
    fn record_activity(&self) {}
}

/// Always [`Principal::System`]; for trusted back-office jobs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemContext;

impl AuthContext for SystemContext {
    fn principal(&self) -> Principal {
        Principal::System
    }
}

impl AuthContext for Actor {
    fn principal(&self) -> Principal {
        Principal::Actor(self.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

fn denied(actor: &Actor, action: Action, collection: &str, id: Option<&str>) -> DataError {
    DataError::PermissionDenied(match id {
        Some(id) => format!("{} cannot {} {}/{}", actor.role, action.as_str(), collection, id),
        None => format!("{} cannot {} {}", actor.role, action.as_str(), collection),
    })
}

fn str_of<'a>(fields: Option<&'a Fields>, name: &str) -> Option<&'a str> {
    fields.and_then(|f| f.get(name)).and_then(Value::as_str)
}

/// Role-based access rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicy;

impl AccessPolicy {
    /// Check one operation. `existing` is the stored document for
    /// read/update/delete; `incoming` the sanitized fields for create/update.
    pub fn check(
        &self,
        principal: &Principal,
        action: Action,
        collection: &str,
        existing: Option<&Document>,
        incoming: Option<&Fields>,
    ) -> Result<(), DataError> {
        let actor = match principal {
            Principal::System => return Ok(()),
            Principal::Anonymous => return Err(DataError::Unauthenticated),
            Principal::Actor(actor) if actor.role == Role::Admin => return Ok(()),
            Principal::Actor(actor) => actor,
        };
        let id = existing.map(|d| d.id.as_str());
        let allowed = match collection {
            collections::LEADS => Self::lead_rule(actor, action, existing, incoming),
            collections::USERS => Self::user_rule(actor, action, existing, incoming),
            collections::ACTIVITY_LOGS => {
                action == Action::Read && actor.reaches(existing.and_then(|d| d.str_field("actorId")))
            }
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(denied(actor, action, collection, id))
        }
    }

    fn lead_rule(actor: &Actor, action: Action, existing: Option<&Document>, incoming: Option<&Fields>) -> bool {
        let assignee_ok = |uid: Option<&str>| match actor.role {
            Role::Master => actor.reaches(uid),
            _ => uid == Some(actor.uid.as_str()),
        };
        // Reassigning is only allowed within reach; absent means unchanged
        let incoming_ok = str_of(incoming, "assignedTo").map_or(true, |uid| assignee_ok(Some(uid)));
        let existing_ok = || assignee_ok(existing.and_then(|d| d.str_field("assignedTo")));

        match action {
            Action::Create => incoming_ok,
            Action::Read => existing_ok(),
            Action::Update => existing_ok() && incoming_ok,
            Action::Delete => actor.role == Role::Master && existing_ok(),
        }
    }

    fn user_rule(actor: &Actor, action: Action, existing: Option<&Document>, incoming: Option<&Fields>) -> bool {
        let is_self = existing.is_some_and(|d| d.id == actor.uid);
        let managed = actor.role == Role::Master
            && existing.and_then(|d| d.str_field("masterId")) == Some(actor.uid.as_str());
        let role_change = str_of(incoming, "role");
        let master_change = str_of(incoming, "masterId");

        match action {
            Action::Read => is_self || managed,
            Action::Create => {
                actor.role == Role::Master
                    && role_change == Some(Role::User.as_str())
                    && master_change.map_or(true, |m| m == actor.uid)
            }
            Action::Update if is_self => role_change.is_none() && master_change.is_none(),
            Action::Update => {
                managed
                    && role_change.map_or(true, |r| r == Role::User.as_str())
                    && master_change.map_or(true, |m| m == actor.uid)
            }
            Action::Delete => managed,
        }
    }

    /// Narrow a list query to what `principal` may read.
    pub fn scope_query(&self, principal: &Principal, collection: &str, query: QueryOptions) -> Result<QueryOptions, DataError> {
        let actor = match principal {
            Principal::System => return Ok(query),
            Principal::Anonymous => return Err(DataError::Unauthenticated),
            Principal::Actor(actor) if actor.role == Role::Admin => return Ok(query),
            Principal::Actor(actor) => actor,
        };

        let within = |field: &str, query: QueryOptions| match actor.role {
            Role::Master => query.filter(field, FilterOperator::In, Value::from(actor.reach())),
            _ => query.where_eq(field, actor.uid.as_str()),
        };

        match collection {
            collections::LEADS => Ok(within("assignedTo", query)),
            collections::ACTIVITY_LOGS => Ok(within("actorId", query)),
            collections::USERS => match actor.role {
                Role::Master => Ok(query.where_eq("masterId", actor.uid.as_str())),
                _ => Ok(query.where_eq("id", actor.uid.as_str())),
            },
            _ => Err(denied(actor, Action::Read, collection, None)),
        }
    }

    /// Fill ownership fields a non-admin must not leave blank on create:
    /// `assignedTo` on leads, `masterId` on users created by a master.
    pub fn stamp_ownership(&self, principal: &Principal, collection: &str, fields: &mut Fields) {
        let Principal::Actor(actor) = principal else {
            return;
        };
        let owner_field = match (actor.role, collection) {
            (Role::Admin, _) => return,
            (_, collections::LEADS) => "assignedTo",
            (Role::Master, collections::USERS) => "masterId",
            _ => return,
        };
        let blank = fields
            .get(owner_field)
            .map_or(true, |v| v.is_null() || v.as_str().is_some_and(str::is_empty));
        if blank {
            fields.insert(owner_field.to_string(), Value::String(actor.uid.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lead(id: &str, assigned: &str) -> Document {
        Document::new("leads", id, json!({"assignedTo": assigned}).as_object().cloned().unwrap())
    }

    fn user_doc(id: &str, master: &str) -> Document {
        Document::new("users", id, json!({"masterId": master, "role": "user"}).as_object().cloned().unwrap())
    }

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn check(p: &Principal, action: Action, collection: &str, doc: Option<&Document>, incoming: Option<Value>) -> bool {
        let incoming = incoming.map(fields);
        AccessPolicy.check(p, action, collection, doc, incoming.as_ref()).is_ok()
    }

    #[test]
    fn test_admin_and_system_unrestricted() {
        let admin = Actor::admin("root").principal();
        assert!(check(&admin, Action::Delete, "backups", None, None));
        assert!(check(&Principal::System, Action::Create, "activity_logs", None, None));
        assert!(admin.is_privileged());
        assert!(Principal::System.is_privileged());
        assert!(!Actor::master("m", vec![]).principal().is_privileged());
    }

    #[test]
    fn test_anonymous_rejected() {
        let err = AccessPolicy
            .check(&Principal::Anonymous, Action::Read, "leads", None, None)
            .unwrap_err();
        assert_eq!(err, DataError::Unauthenticated);
    }

    #[test]
    fn test_user_lead_access() {
        let user = Actor::user("u1").principal();
        assert!(check(&user, Action::Read, "leads", Some(&lead("a", "u1")), None));
        assert!(!check(&user, Action::Read, "leads", Some(&lead("b", "u2")), None));
        assert!(check(&user, Action::Update, "leads", Some(&lead("a", "u1")), Some(json!({"notes": "x"}))));
        assert!(!check(&user, Action::Update, "leads", Some(&lead("a", "u1")), Some(json!({"assignedTo": "u2"}))));
        assert!(!check(&user, Action::Delete, "leads", Some(&lead("a", "u1")), None));
    }

    #[test]
    fn test_master_team_leads() {
        let master = Actor::master("m1", vec!["u1".into()]).principal();
        assert!(check(&master, Action::Read, "leads", Some(&lead("a", "u1")), None));
        assert!(check(&master, Action::Delete, "leads", Some(&lead("a", "m1")), None));
        assert!(!check(&master, Action::Read, "leads", Some(&lead("b", "u9")), None));
        assert!(check(&master, Action::Create, "leads", None, Some(json!({"assignedTo": "u1"}))));
    }

    #[test]
    fn test_master_manages_own_users_only() {
        let master = Actor::master("m1", vec![]).principal();
        assert!(check(&master, Action::Update, "users", Some(&user_doc("u1", "m1")), Some(json!({"phone": "1"}))));
        assert!(!check(&master, Action::Update, "users", Some(&user_doc("u2", "m2")), None));
        assert!(!check(&master, Action::Update, "users", Some(&user_doc("u1", "m1")), Some(json!({"role": "admin"}))));
        assert!(check(&master, Action::Create, "users", None, Some(json!({"role": "user"}))));
        assert!(!check(&master, Action::Create, "users", None, Some(json!({"role": "master"}))));
    }

    #[test]
    fn test_user_cannot_promote_self() {
        let user = Actor::user("u1").principal();
        let me = user_doc("u1", "m1");
        assert!(check(&user, Action::Update, "users", Some(&me), Some(json!({"phone": "1"}))));
        assert!(!check(&user, Action::Update, "users", Some(&me), Some(json!({"role": "admin"}))));
        assert!(!check(&user, Action::Create, "users", None, Some(json!({"role": "user"}))));
    }

    #[test]
    fn test_operational_collections_admin_only() {
        let master = Actor::master("m1", vec![]).principal();
        assert!(!check(&master, Action::Read, "rate_limits", None, None));
        assert!(AccessPolicy.scope_query(&master, "backups", QueryOptions::new()).is_err());
    }

    #[test]
    fn test_scope_query() {
        let user = Actor::user("u1").principal();
        let scoped = AccessPolicy.scope_query(&user, "leads", QueryOptions::new()).unwrap();
        assert_eq!(scoped.filters[0].field, "assignedTo");
        assert_eq!(scoped.filters[0].value, json!("u1"));

        let master = Actor::master("m1", vec!["u1".into()]).principal();
        let scoped = AccessPolicy.scope_query(&master, "leads", QueryOptions::new()).unwrap();
        assert_eq!(scoped.filters[0].operator, FilterOperator::In);
        assert_eq!(scoped.filters[0].value, json!(["m1", "u1"]));

        let admin = Actor::admin("a").principal();
        let scoped = AccessPolicy.scope_query(&admin, "leads", QueryOptions::new()).unwrap();
        assert!(scoped.filters.is_empty());
    }

    #[test]
    fn test_stamp_ownership() {
        let user = Actor::user("u1").principal();
        let mut lead_fields = fields(json!({"name": "x"}));
        AccessPolicy.stamp_ownership(&user, "leads", &mut lead_fields);
        assert_eq!(lead_fields["assignedTo"], "u1");

        let admin = Actor::admin("a").principal();
        let mut lead_fields = fields(json!({}));
        AccessPolicy.stamp_ownership(&admin, "leads", &mut lead_fields);
        assert!(lead_fields.get("assignedTo").is_none());

        let master = Actor::master("m1", vec![]).principal();
        let mut user_fields = fields(json!({"masterId": ""}));
        AccessPolicy.stamp_ownership(&master, "users", &mut user_fields);
        assert_eq!(user_fields["masterId"], "m1");
    }
}
