//! Portable DDL shared by SQLite and Postgres.
//!
//! Timestamps are RFC 3339 text and grant contexts are JSON text so that both
//! dialects use identical column types. Every statement is idempotent.

pub(crate) const SCHEMA: &[&str] = &[
    // Clients
    r#"
    CREATE TABLE IF NOT EXISTS clients (
        tenant TEXT NOT NULL,
        id TEXT NOT NULL,
        client_id TEXT NOT NULL,
        client_secret TEXT NOT NULL,
        redirect_uris TEXT NOT NULL,
        scope TEXT NOT NULL,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (tenant, client_id)
    )
    "#,
    // Resource owners
    r#"
    CREATE TABLE IF NOT EXISTS resource_owners (
        tenant TEXT NOT NULL,
        id TEXT NOT NULL,
        username TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        email TEXT NOT NULL,
        scope TEXT NOT NULL,
        enabled BOOLEAN NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (tenant, username)
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS idx_resource_owners_email ON resource_owners(tenant, email)"#,
    // Grants: one namespace per token kind. Revoked rows stay as tombstones.
    r#"
    CREATE TABLE IF NOT EXISTS grants (
        tenant TEXT NOT NULL,
        kind TEXT NOT NULL,
        token TEXT NOT NULL,
        client_id TEXT NOT NULL,
        subject TEXT NOT NULL,
        context TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        revoked BOOLEAN NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (tenant, kind, token)
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS idx_grants_client_id ON grants(tenant, client_id)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_grants_subject ON grants(tenant, subject)"#,
];

pub(crate) const INSERT_CLIENT: &str = r#"
    INSERT INTO clients (tenant, id, client_id, client_secret, redirect_uris, scope, name, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

pub(crate) const SELECT_CLIENT: &str = r#"
    SELECT id, client_id, client_secret, redirect_uris, scope, name, created_at, updated_at
    FROM clients WHERE tenant = ? AND client_id = ?
"#;

pub(crate) const INSERT_RESOURCE_OWNER: &str = r#"
    INSERT INTO resource_owners (tenant, id, username, password_hash, email, scope, enabled, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

pub(crate) const SELECT_RESOURCE_OWNER: &str = r#"
    SELECT id, username, password_hash, email, scope, enabled, created_at, updated_at
    FROM resource_owners WHERE tenant = ? AND username = ?
"#;

/// Insert, or replace a live grant. A tombstoned row is left untouched, which
/// shows up as zero affected rows.
pub(crate) const UPSERT_GRANT: &str = r#"
    INSERT INTO grants (tenant, kind, token, client_id, subject, context, expires_at, revoked, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (tenant, kind, token) DO UPDATE SET
        client_id = excluded.client_id,
        subject = excluded.subject,
        context = excluded.context,
        expires_at = excluded.expires_at
    WHERE grants.revoked = ?
"#;

pub(crate) const SELECT_GRANT: &str = r#"
    SELECT context, revoked FROM grants WHERE tenant = ? AND kind = ? AND token = ?
"#;

pub(crate) const REVOKE_GRANT: &str = r#"
    UPDATE grants SET revoked = ? WHERE tenant = ? AND kind = ? AND token = ?
"#;

/// Rewrite `?` placeholders into Postgres' numbered `$n` form.
pub(crate) fn postgres_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 16);
    let mut n = 0;
    for ch in sql.chars() {
        if ch == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_placeholders_in_order() {
        assert_eq!(
            postgres_placeholders("UPDATE t SET a = ? WHERE b = ? AND c = ?"),
            "UPDATE t SET a = $1 WHERE b = $2 AND c = $3"
        );
    }

    #[test]
    fn upsert_binds_ten_parameters() {
        assert!(postgres_placeholders(UPSERT_GRANT).contains("grants.revoked = $10"));
    }
}
