use crate::store::Store;
use anyhow::{anyhow, bail};
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Local stand-in for the hosted identity provider. Identities live beside
/// the document collections but are addressed only through this module; the
/// rest of the system sees an opaque uid plus an email.
#[derive(Debug, Clone)]
pub struct Identity {
    pub uid: String,
    pub email: String,
}

/// Creates an identity and returns its uid. Never touches any signed-in
/// session; the admin-creates-user flow depends on that.
pub fn create_identity(store: &Store, email: &str, password: &str) -> anyhow::Result<String> {
    let email = email.trim();
    if email.is_empty() {
        bail!("email must not be empty");
    }
    if password.is_empty() {
        bail!("password must not be empty");
    }

    let uid = Uuid::new_v4().to_string();
    let salt = Uuid::new_v4().simple().to_string();
    let hash = format!("{}${}", salt, digest(&salt, password));
    let created_at = chrono::Utc::now().to_rfc3339();

    store
        .raw()
        .execute(
            "INSERT INTO identities(uid, email, password_hash, created_at)
             VALUES(?, ?, ?, ?)",
            (&uid, email, &hash, &created_at),
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                anyhow!("email already registered: {}", email)
            }
            other => anyhow!(other),
        })?;

    Ok(uid)
}

/// Checks a credential pair. `Ok(None)` means the email is unknown or the
/// password does not match; callers cannot tell the two apart.
pub fn verify(store: &Store, email: &str, password: &str) -> anyhow::Result<Option<Identity>> {
    let row: Option<(String, String)> = store
        .raw()
        .query_row(
            "SELECT uid, password_hash FROM identities WHERE email = ?",
            [email.trim()],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    let Some((uid, stored)) = row else {
        return Ok(None);
    };
    let Some((salt, expected)) = stored.split_once('$') else {
        bail!("corrupt identity record for {}", email);
    };
    if digest(salt, password) != expected {
        return Ok(None);
    }
    Ok(Some(Identity {
        uid,
        email: email.trim().to_string(),
    }))
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
