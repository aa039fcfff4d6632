//! Seed helpers shared by the service test modules.
//!
//! Entity lifecycle (directory sync, enrollment, registration) lives outside
//! the admission core, so tests write entity rows directly.

use std::sync::Arc;

use chrono::{Duration, Utc};

use flowgate_core::{new_id, now_rfc3339};
use flowgate_sql::{SqliteStore, Value};

use crate::model::{
    Actor, ActorGroup, Client, Condition, Gateway, Identity, Permission, Policy, Resource,
    Subject, SubjectContext,
};
use crate::service::lifecycle::policy_indexes;
use crate::service::{AdmissionConfig, AdmissionService};

pub(crate) fn test_service() -> Arc<AdmissionService> {
    let sql = Arc::new(SqliteStore::open_in_memory().unwrap());
    AdmissionService::new(sql, AdmissionConfig::default()).unwrap()
}

pub(crate) fn seed_resource(svc: &AdmissionService, account_id: &str, name: &str) -> Resource {
    let resource = Resource {
        id: new_id(),
        account_id: account_id.to_string(),
        name: name.to_string(),
        deleted_at: None,
        inserted_at: Utc::now(),
    };
    svc.insert_record(
        svc.sql.as_ref(),
        "resources",
        &resource.id,
        &resource,
        &[
            ("account_id", Value::Text(resource.account_id.clone())),
            ("name", Value::Text(resource.name.clone())),
            ("inserted_at", Value::Text(resource.inserted_at.to_rfc3339())),
        ],
    )
    .unwrap();
    resource
}

pub(crate) fn seed_group(svc: &AdmissionService, account_id: &str, name: &str) -> ActorGroup {
    seed_group_with_provider(svc, account_id, name, None)
}

pub(crate) fn seed_group_with_provider(
    svc: &AdmissionService,
    account_id: &str,
    name: &str,
    provider_id: Option<&str>,
) -> ActorGroup {
    let group = ActorGroup {
        id: new_id(),
        account_id: account_id.to_string(),
        name: name.to_string(),
        provider_id: provider_id.map(|p| p.to_string()),
        deleted_at: None,
        inserted_at: Utc::now(),
    };
    let mut indexes = vec![
        ("account_id", Value::Text(group.account_id.clone())),
        ("inserted_at", Value::Text(group.inserted_at.to_rfc3339())),
    ];
    if let Some(ref pid) = group.provider_id {
        indexes.push(("provider_id", Value::Text(pid.clone())));
    }
    svc.insert_record(svc.sql.as_ref(), "actor_groups", &group.id, &group, &indexes)
        .unwrap();
    group
}

pub(crate) fn seed_actor(svc: &AdmissionService, account_id: &str) -> Actor {
    let actor = Actor {
        id: new_id(),
        account_id: account_id.to_string(),
        deleted_at: None,
        inserted_at: Utc::now(),
    };
    svc.insert_record(
        svc.sql.as_ref(),
        "actors",
        &actor.id,
        &actor,
        &[
            ("account_id", Value::Text(actor.account_id.clone())),
            ("inserted_at", Value::Text(actor.inserted_at.to_rfc3339())),
        ],
    )
    .unwrap();
    actor
}

pub(crate) fn seed_membership(svc: &AdmissionService, group_id: &str, actor_id: &str) {
    svc.sql
        .exec(
            "INSERT INTO memberships (group_id, actor_id, added_at) VALUES (?1, ?2, ?3)",
            &[
                Value::Text(group_id.to_string()),
                Value::Text(actor_id.to_string()),
                Value::Text(now_rfc3339()),
            ],
        )
        .unwrap();
}

pub(crate) fn seed_identity(
    svc: &AdmissionService,
    account_id: &str,
    actor_id: &str,
    provider_id: &str,
) -> Identity {
    let identity = Identity {
        id: new_id(),
        account_id: account_id.to_string(),
        actor_id: actor_id.to_string(),
        provider_id: provider_id.to_string(),
        deleted_at: None,
        inserted_at: Utc::now(),
    };
    svc.insert_record(
        svc.sql.as_ref(),
        "identities",
        &identity.id,
        &identity,
        &[
            ("account_id", Value::Text(identity.account_id.clone())),
            ("actor_id", Value::Text(identity.actor_id.clone())),
            ("provider_id", Value::Text(identity.provider_id.clone())),
            ("inserted_at", Value::Text(identity.inserted_at.to_rfc3339())),
        ],
    )
    .unwrap();
    identity
}

pub(crate) fn seed_client(svc: &AdmissionService, account_id: &str, actor_id: &str) -> Client {
    let client = Client {
        id: new_id(),
        account_id: account_id.to_string(),
        actor_id: actor_id.to_string(),
        last_seen_remote_ip: Some("10.1.2.3".parse().unwrap()),
        deleted_at: None,
        inserted_at: Utc::now(),
    };
    svc.insert_record(
        svc.sql.as_ref(),
        "clients",
        &client.id,
        &client,
        &[
            ("account_id", Value::Text(client.account_id.clone())),
            ("actor_id", Value::Text(client.actor_id.clone())),
            ("inserted_at", Value::Text(client.inserted_at.to_rfc3339())),
        ],
    )
    .unwrap();
    client
}

pub(crate) fn seed_gateway(svc: &AdmissionService, account_id: &str) -> Gateway {
    let gateway = Gateway {
        id: new_id(),
        account_id: account_id.to_string(),
        last_seen_remote_ip: Some("203.0.113.10".parse().unwrap()),
        deleted_at: None,
        inserted_at: Utc::now(),
    };
    svc.insert_record(
        svc.sql.as_ref(),
        "gateways",
        &gateway.id,
        &gateway,
        &[
            ("account_id", Value::Text(gateway.account_id.clone())),
            ("inserted_at", Value::Text(gateway.inserted_at.to_rfc3339())),
        ],
    )
    .unwrap();
    gateway
}

/// A subject holding every permission, expiring in an hour, connecting from
/// 10.1.2.3 in region US through provider-1.
pub(crate) fn seed_subject(account_id: &str, actor_id: &str) -> Subject {
    Subject {
        account_id: account_id.to_string(),
        actor_id: actor_id.to_string(),
        identity_id: None,
        provider_id: Some("provider-1".to_string()),
        permissions: [
            Permission::CreateFlows,
            Permission::ViewAvailableResources,
            Permission::ManagePolicies,
        ]
        .into_iter()
        .collect(),
        expires_at: Utc::now() + Duration::hours(1),
        context: SubjectContext {
            remote_ip: Some("10.1.2.3".parse().unwrap()),
            user_agent: Some("flowgate-test/1.0".to_string()),
            remote_ip_location_region: Some("US".to_string()),
        },
    }
}

/// Insert a policy row directly, bypassing lifecycle broadcasts.
pub(crate) fn seed_policy(
    svc: &AdmissionService,
    account_id: &str,
    actor_group_id: &str,
    resource_id: &str,
    conditions: Vec<Condition>,
) -> Policy {
    let policy = Policy {
        id: new_id(),
        account_id: account_id.to_string(),
        actor_group_id: actor_group_id.to_string(),
        resource_id: resource_id.to_string(),
        persistent_id: new_id(),
        description: None,
        conditions,
        disabled_at: None,
        deleted_at: None,
        inserted_at: Utc::now(),
    };
    svc.insert_record(
        svc.sql.as_ref(),
        "policies",
        &policy.id,
        &policy,
        &policy_indexes(&policy),
    )
    .unwrap();
    policy
}

/// A full admission setup in one account: resource, group with the actor as
/// a member, client owned by the actor, gateway, and an all-permissions
/// subject. Policies are left to each test.
pub(crate) struct World {
    pub svc: Arc<AdmissionService>,
    pub resource: Resource,
    pub group: ActorGroup,
    pub actor: Actor,
    pub client: Client,
    pub gateway: Gateway,
    pub subject: Subject,
}

pub(crate) fn seed_world(account_id: &str) -> World {
    let svc = test_service();
    let resource = seed_resource(&svc, account_id, "prod-db");
    let group = seed_group(&svc, account_id, "engineering");
    let actor = seed_actor(&svc, account_id);
    seed_membership(&svc, &group.id, &actor.id);
    let client = seed_client(&svc, account_id, &actor.id);
    let gateway = seed_gateway(&svc, account_id);
    let subject = seed_subject(account_id, &actor.id);
    World {
        svc,
        resource,
        group,
        actor,
        client,
        gateway,
        subject,
    }
}
