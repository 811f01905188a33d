use sqlx::PgPool;

/// Session variable the isolation policies read.
pub const SCOPE_SETTING: &str = "app.current_tenant";

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tenants (
        id          BIGINT PRIMARY KEY,
        name        TEXT NOT NULL,
        owner_id    BIGINT NOT NULL,
        type        TEXT NOT NULL CHECK (type IN ('ROOT', 'GROUP', 'NORMAL', 'SUB')),
        parent_id   BIGINT REFERENCES tenants(id),
        path        TEXT NOT NULL,
        level       INTEGER NOT NULL CHECK (level >= 0),
        status      TEXT NOT NULL DEFAULT 'PENDING'
                    CHECK (status IN ('ACTIVE', 'DISABLED', 'EXPIRED', 'PENDING')),
        expired_at  TIMESTAMPTZ,
        attributes  JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_by  BIGINT NOT NULL,
        updated_by  BIGINT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        deleted_at  TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS tenants_single_root
        ON tenants (type) WHERE type = 'ROOT' AND deleted_at IS NULL
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS tenants_parent_idx
        ON tenants (parent_id) WHERE deleted_at IS NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS departments (
        id          BIGINT PRIMARY KEY,
        tenant_id   BIGINT NOT NULL REFERENCES tenants(id),
        parent_id   BIGINT REFERENCES departments(id),
        name        TEXT NOT NULL,
        path        TEXT NOT NULL,
        attributes  JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_by  BIGINT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        deleted_at  TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS departments_single_top
        ON departments (tenant_id) WHERE parent_id IS NULL AND deleted_at IS NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id          BIGINT PRIMARY KEY,
        username    TEXT NOT NULL,
        full_name   TEXT NOT NULL DEFAULT '',
        status      TEXT NOT NULL DEFAULT 'ACTIVE' CHECK (status IN ('ACTIVE', 'DISABLED')),
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        CONSTRAINT users_username_key UNIQUE (username)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS roles (
        id          BIGINT PRIMARY KEY,
        code        TEXT NOT NULL,
        name        TEXT NOT NULL,
        tenant_id   BIGINT REFERENCES tenants(id),
        is_system   BOOLEAN NOT NULL DEFAULT false,
        description TEXT NOT NULL DEFAULT '',
        is_active   BOOLEAN NOT NULL DEFAULT true,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS roles_tenant_code_key
        ON roles (tenant_id, code) WHERE tenant_id IS NOT NULL
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS roles_platform_code_key
        ON roles (code) WHERE tenant_id IS NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_roles (
        id          BIGINT PRIMARY KEY,
        user_id     BIGINT NOT NULL REFERENCES users(id),
        role_id     BIGINT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        tenant_id   BIGINT REFERENCES tenants(id),
        granted_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        expires_at  TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS user_roles_tenant_grant_key
        ON user_roles (user_id, role_id, tenant_id) WHERE tenant_id IS NOT NULL
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS user_roles_platform_grant_key
        ON user_roles (user_id, role_id) WHERE tenant_id IS NULL
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS user_roles_user_idx ON user_roles (user_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS policies (
        id          BIGINT PRIMARY KEY,
        role_code   TEXT NOT NULL,
        domain      TEXT NOT NULL,
        operation   TEXT NOT NULL,
        method      TEXT NOT NULL,
        CONSTRAINT policies_rule_key UNIQUE (role_code, domain, operation, method)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS policies_role_idx ON policies (role_code)
    "#,
];

const PLATFORM: &str = "current_setting('app.current_tenant', true) = '*'";

/// Row isolation of one table: which rows the scope reads and which rows it
/// may insert, update or delete. An unset scope compares against NULL and
/// matches no tenant-owned row.
struct Isolation {
    table: &'static str,
    read: &'static str,
    write: &'static str,
}

const OWN_ROWS: &str = "tenant_id::text = current_setting('app.current_tenant', true)";

const TENANT_SUBTREE: &str = "('.' || path || '.') \
     LIKE ('%.' || current_setting('app.current_tenant', true) || '.%')";

const ISOLATION: &[Isolation] = &[
    Isolation {
        table: "tenants",
        read: TENANT_SUBTREE,
        write: TENANT_SUBTREE,
    },
    Isolation {
        table: "departments",
        read: OWN_ROWS,
        write: OWN_ROWS,
    },
    Isolation {
        table: "roles",
        read: "tenant_id IS NULL OR tenant_id::text = current_setting('app.current_tenant', true)",
        write: OWN_ROWS,
    },
    Isolation {
        table: "user_roles",
        read: "tenant_id IS NULL OR tenant_id::text = current_setting('app.current_tenant', true)",
        write: OWN_ROWS,
    },
    Isolation {
        table: "policies",
        read: "true",
        write: "domain = current_setting('app.current_tenant', true)",
    },
];

/// Policy names installed per table, including the single policy of earlier
/// schema versions so a re-run replaces it.
const POLICY_NAMES: &[&str] = &[
    "tenant_isolation",
    "scope_read",
    "scope_insert",
    "scope_update",
    "scope_delete",
];

fn policy_statements(iso: &Isolation) -> Vec<String> {
    let table = iso.table;
    let read = format!("{PLATFORM} OR {}", iso.read);
    let write = format!("{PLATFORM} OR {}", iso.write);
    let mut statements = vec![
        format!("ALTER TABLE {table} ENABLE ROW LEVEL SECURITY"),
        format!("ALTER TABLE {table} FORCE ROW LEVEL SECURITY"),
    ];
    statements.extend(
        POLICY_NAMES
            .iter()
            .map(|name| format!("DROP POLICY IF EXISTS {name} ON {table}")),
    );
    statements.extend([
        format!("CREATE POLICY scope_read ON {table} FOR SELECT USING ({read})"),
        format!("CREATE POLICY scope_insert ON {table} FOR INSERT WITH CHECK ({write})"),
        format!(
            "CREATE POLICY scope_update ON {table} FOR UPDATE USING ({write}) WITH CHECK ({write})"
        ),
        format!("CREATE POLICY scope_delete ON {table} FOR DELETE USING ({write})"),
    ]);
    statements
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    for statement in TABLES {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    for iso in ISOLATION {
        for statement in policy_statements(iso) {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }
    }

    tx.commit().await?;
    tracing::info!(tables = ISOLATION.len(), "migrations applied, row isolation enabled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_write_rule_reads_the_scope_setting() {
        for iso in ISOLATION {
            for statement in policy_statements(iso) {
                if statement.starts_with("CREATE POLICY") {
                    assert!(
                        statement.contains(SCOPE_SETTING),
                        "{} policy ignores the scope",
                        iso.table
                    );
                    assert!(statement.contains("= '*'"), "{} has no platform bypass", iso.table);
                }
            }
        }
    }

    #[test]
    fn platform_rows_are_never_writable_from_a_tenant() {
        for iso in ISOLATION {
            assert!(
                !iso.write.contains("IS NULL"),
                "{} lets a tenant scope write platform rows",
                iso.table
            );
        }
    }

    #[test]
    fn isolated_tables_are_created() {
        for iso in ISOLATION {
            let create = format!("CREATE TABLE IF NOT EXISTS {} ", iso.table);
            assert!(
                TABLES.iter().any(|s| s.contains(&create)),
                "{} is not created",
                iso.table
            );
        }
    }

    #[test]
    fn schema_avoids_nulls_not_distinct() {
        assert!(TABLES.iter().all(|s| !s.contains("NULLS NOT DISTINCT")));
    }
}
