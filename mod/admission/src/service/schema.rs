use flowgate_sql::SQLStore;

use crate::service::AdmissionError;

/// Initialize the SQLite schema for the admission core.
///
/// Entity and policy tables follow the JSON `data` + indexed columns
/// convention. Flows are fully columnar: the revoker's conditional bulk
/// update must flip `expires_at` and report the flipped rows in one
/// statement, which a JSON document row cannot do.
pub fn init_schema(sql: &dyn SQLStore) -> Result<(), AdmissionError> {
    let statements = [
        // Resources: what policies grant access to
        "CREATE TABLE IF NOT EXISTS resources (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            name TEXT NOT NULL,
            deleted_at TEXT,
            data TEXT NOT NULL,
            inserted_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_resources_account ON resources(account_id)",

        // Actor groups, possibly synced from an identity provider
        "CREATE TABLE IF NOT EXISTS actor_groups (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            provider_id TEXT,
            deleted_at TEXT,
            data TEXT NOT NULL,
            inserted_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_actor_groups_account ON actor_groups(account_id)",
        "CREATE INDEX IF NOT EXISTS idx_actor_groups_provider ON actor_groups(provider_id)",

        // Group membership
        "CREATE TABLE IF NOT EXISTS memberships (
            group_id TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            added_at TEXT NOT NULL,
            PRIMARY KEY (group_id, actor_id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_memberships_actor ON memberships(actor_id)",

        // Actors
        "CREATE TABLE IF NOT EXISTS actors (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            deleted_at TEXT,
            data TEXT NOT NULL,
            inserted_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_actors_account ON actors(account_id)",

        // Identities: an actor's handle at an identity provider
        "CREATE TABLE IF NOT EXISTS identities (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            provider_id TEXT NOT NULL,
            deleted_at TEXT,
            data TEXT NOT NULL,
            inserted_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_identities_actor ON identities(actor_id)",
        "CREATE INDEX IF NOT EXISTS idx_identities_provider ON identities(provider_id)",

        // Clients: enrolled devices
        "CREATE TABLE IF NOT EXISTS clients (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            deleted_at TEXT,
            data TEXT NOT NULL,
            inserted_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_clients_account ON clients(account_id)",
        "CREATE INDEX IF NOT EXISTS idx_clients_actor ON clients(actor_id)",

        // Gateways
        "CREATE TABLE IF NOT EXISTS gateways (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            deleted_at TEXT,
            data TEXT NOT NULL,
            inserted_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_gateways_account ON gateways(account_id)",

        // Policies: the grant rules
        "CREATE TABLE IF NOT EXISTS policies (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            actor_group_id TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            persistent_id TEXT NOT NULL,
            disabled_at TEXT,
            deleted_at TEXT,
            data TEXT NOT NULL,
            inserted_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_policies_account ON policies(account_id)",
        "CREATE INDEX IF NOT EXISTS idx_policies_group ON policies(actor_group_id)",
        "CREATE INDEX IF NOT EXISTS idx_policies_resource ON policies(resource_id)",
        "CREATE INDEX IF NOT EXISTS idx_policies_persistent ON policies(persistent_id)",

        // Flows: time-bounded grants, columnar
        "CREATE TABLE IF NOT EXISTS flows (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            policy_id TEXT NOT NULL,
            client_id TEXT NOT NULL,
            gateway_id TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            client_remote_ip TEXT,
            client_user_agent TEXT,
            gateway_remote_ip TEXT,
            expires_at TEXT NOT NULL,
            inserted_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_flows_account ON flows(account_id)",
        "CREATE INDEX IF NOT EXISTS idx_flows_policy ON flows(policy_id)",
        "CREATE INDEX IF NOT EXISTS idx_flows_client ON flows(client_id)",
        "CREATE INDEX IF NOT EXISTS idx_flows_resource ON flows(resource_id)",
        "CREATE INDEX IF NOT EXISTS idx_flows_expires ON flows(expires_at)",
    ];

    for stmt in &statements {
        sql.exec(stmt, &[])
            .map_err(|e| AdmissionError::Storage(e.to_string()))?;
    }

    Ok(())
}
