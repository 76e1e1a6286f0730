use rusqlite::{OptionalExtension, params};

use super::{Database, StoreError};
use crate::vault::SecretVault;

/// A resolved tenant/configuration row with secrets already decrypted.
///
/// The out-of-scope admin API owns full user/configuration CRUD; the core
/// only needs a flattened view where each row already carries one complete
/// set of platform credentials, addressable either by its own `glconfig_`
/// opaque token or, for legacy non-prefixed tokens, via the owning user's
/// token (see SPEC_FULL.md section 3.1 and DESIGN.md for this simplification).
#[derive(Debug, Clone)]
pub struct TenantRecord {
    pub id: String,
    pub opaque_token: String,
    pub platform_base_url: String,
    pub platform_access_token: String,
    pub webhook_secret: String,
    pub display_name: Option<String>,
}

/// Input for inserting/updating a tenant/configuration row. Plaintext
/// secrets are encrypted by the vault before they touch the database.
pub struct NewTenant<'a> {
    pub id: &'a str,
    pub opaque_token: &'a str,
    pub user_token: Option<&'a str>,
    pub is_default: bool,
    pub platform_base_url: &'a str,
    pub platform_access_token: &'a str,
    pub webhook_secret: &'a str,
    pub display_name: Option<&'a str>,
}

impl Database {
    pub fn insert_tenant(&self, vault: &SecretVault, rec: &NewTenant<'_>) -> Result<(), StoreError> {
        let encrypted_token = vault.encrypt(rec.platform_access_token)?;
        let encrypted_secret = vault.encrypt(rec.webhook_secret)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tenants
                (id, opaque_token, user_token, is_default, platform_base_url,
                 platform_access_token, webhook_secret, display_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                opaque_token = excluded.opaque_token,
                user_token = excluded.user_token,
                is_default = excluded.is_default,
                platform_base_url = excluded.platform_base_url,
                platform_access_token = excluded.platform_access_token,
                webhook_secret = excluded.webhook_secret,
                display_name = excluded.display_name",
            params![
                rec.id,
                rec.opaque_token,
                rec.user_token,
                rec.is_default,
                rec.platform_base_url,
                encrypted_token,
                encrypted_secret,
                rec.display_name,
            ],
        )?;
        Ok(())
    }

    /// Looks up a tenant/configuration by its own opaque token, covering
    /// both `glconfig_`-prefixed config tokens and (as a convenience for a
    /// single-config-per-user deployment) plain tenant tokens.
    pub fn find_tenant_by_opaque_token(
        &self,
        vault: &SecretVault,
        token: &str,
    ) -> Result<Option<TenantRecord>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, opaque_token, platform_base_url, platform_access_token,
                        webhook_secret, display_name
                 FROM tenants WHERE opaque_token = ?1",
                params![token],
                map_row,
            )
            .optional()?;
        drop(conn);
        row.map(|r| decrypt_row(vault, r)).transpose()
    }

    /// Finds the default configuration for a user token, falling back to
    /// the first configuration owned by that user if none is marked
    /// default, per SPEC_FULL.md section 4.1's resolution order.
    pub fn find_config_for_user(
        &self,
        vault: &SecretVault,
        user_token: &str,
    ) -> Result<Option<TenantRecord>, StoreError> {
        let conn = self.conn.lock();
        let default_row = conn
            .query_row(
                "SELECT id, opaque_token, platform_base_url, platform_access_token,
                        webhook_secret, display_name
                 FROM tenants WHERE user_token = ?1 AND is_default = 1
                 ORDER BY rowid LIMIT 1",
                params![user_token],
                map_row,
            )
            .optional()?;

        let row = match default_row {
            Some(r) => Some(r),
            None => conn
                .query_row(
                    "SELECT id, opaque_token, platform_base_url, platform_access_token,
                            webhook_secret, display_name
                     FROM tenants WHERE user_token = ?1
                     ORDER BY rowid LIMIT 1",
                    params![user_token],
                    map_row,
                )
                .optional()?,
        };
        drop(conn);
        row.map(|r| decrypt_row(vault, r)).transpose()
    }
}

type RawRow = (String, String, String, String, String, Option<String>);

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decrypt_row(vault: &SecretVault, row: RawRow) -> Result<TenantRecord, StoreError> {
    let (id, opaque_token, platform_base_url, encrypted_token, encrypted_secret, display_name) =
        row;
    Ok(TenantRecord {
        id,
        opaque_token,
        platform_base_url,
        platform_access_token: vault.decrypt(&encrypted_token)?,
        webhook_secret: vault.decrypt(&encrypted_secret)?,
        display_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> SecretVault {
        SecretVault::new(&[3u8; 32]).unwrap()
    }

    #[test]
    fn round_trips_a_tenant_by_opaque_token() {
        let db = Database::open(":memory:").unwrap();
        let vault = vault();
        db.insert_tenant(
            &vault,
            &NewTenant {
                id: "t1",
                opaque_token: "glconfig_abc",
                user_token: None,
                is_default: false,
                platform_base_url: "https://gitlab.example.com",
                platform_access_token: "glpat-secret",
                webhook_secret: "whsec",
                display_name: Some("Demo Tenant"),
            },
        )
        .unwrap();

        let found = db
            .find_tenant_by_opaque_token(&vault, "glconfig_abc")
            .unwrap()
            .expect("tenant should resolve");
        assert_eq!(found.platform_access_token, "glpat-secret");
        assert_eq!(found.webhook_secret, "whsec");
        assert_eq!(found.display_name.as_deref(), Some("Demo Tenant"));
    }

    #[test]
    fn unknown_token_resolves_to_none() {
        let db = Database::open(":memory:").unwrap();
        let vault = vault();
        assert!(
            db.find_tenant_by_opaque_token(&vault, "does-not-exist")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn prefers_default_config_for_user_then_falls_back_to_first() {
        let db = Database::open(":memory:").unwrap();
        let vault = vault();
        db.insert_tenant(
            &vault,
            &NewTenant {
                id: "c1",
                opaque_token: "glconfig_c1",
                user_token: Some("user_1"),
                is_default: false,
                platform_base_url: "https://gitlab.example.com",
                platform_access_token: "tok1",
                webhook_secret: "sec1",
                display_name: None,
            },
        )
        .unwrap();
        db.insert_tenant(
            &vault,
            &NewTenant {
                id: "c2",
                opaque_token: "glconfig_c2",
                user_token: Some("user_1"),
                is_default: true,
                platform_base_url: "https://gitlab.example.com",
                platform_access_token: "tok2",
                webhook_secret: "sec2",
                display_name: None,
            },
        )
        .unwrap();

        let found = db.find_config_for_user(&vault, "user_1").unwrap().unwrap();
        assert_eq!(found.id, "c2");
    }
}
