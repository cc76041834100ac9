//! Content-derived identities for materialized actions.
//!
//! An identity depends only on the action text, never on the pod that ran it
//! or on when it ran. The caller persists it and a later apply with the same
//! logical action sees the same identity.

use sha2::{Digest, Sha256};

/// Prefix of identities produced by [`crate::exec::PodExecutor`].
pub const EXEC_IDENTITY_PREFIX: &str = "exec-run-";

/// Prefix of identities produced by [`crate::sql::PodSqlRunner`].
pub const SQL_IDENTITY_PREFIX: &str = "sql-run-";

/// Hashes `parts` as if they were concatenated, and prefixes the hex digest.
///
/// `["ab", "c"]` and `["a", "bc"]` share an identity, matching how `diff`
/// compares action text.
pub fn derive_identity<I, S>(prefix: &str, parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref().as_bytes());
    }

    format!("{prefix}{}", hex::encode(hasher.finalize()))
}

/// Identity of an exec action running `command`.
pub fn exec_identity(command: &[String]) -> String {
    derive_identity(EXEC_IDENTITY_PREFIX, command)
}

/// Identity of a SQL action running `statements`.
pub fn sql_identity(statements: &[String]) -> String {
    derive_identity(SQL_IDENTITY_PREFIX, statements)
}

/// Prefix of password digests recorded in place of passwords.
pub const PASSWORD_DIGEST_PREFIX: &str = "sha256:";

/// Returns the digest a recorded password is replaced with.
///
/// A value that already is a digest is returned unchanged, so recorded and
/// fresh credentials compare through the same function.
pub fn password_digest(password: &str) -> String {
    if password.starts_with(PASSWORD_DIGEST_PREFIX) {
        return password.to_owned();
    }

    format!(
        "{PASSWORD_DIGEST_PREFIX}{}",
        hex::encode(Sha256::digest(password.as_bytes()))
    )
}

/// Concatenates the parts of an action the way identities and diffs see it.
pub(crate) fn concatenated(parts: &[String]) -> String {
    parts.concat()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn identity_is_sha256_of_concatenation() {
        let command = strings(&["psql", "-c", "CREATE DATABASE grafana;"]);
        let expected = hex::encode(Sha256::digest(b"psql-cCREATE DATABASE grafana;"));

        assert_eq!(exec_identity(&command), format!("exec-run-{expected}"));
    }

    #[test]
    fn same_content_same_identity() {
        let a = strings(&["SELECT 1", "SELECT 2"]);
        let b = strings(&["SELECT 1", "SELECT 2"]);
        assert_eq!(sql_identity(&a), sql_identity(&b));
    }

    #[test]
    fn different_content_different_identity() {
        let a = strings(&["psql", "-c", "CREATE DATABASE grafana;"]);
        let b = strings(&["psql", "-v", "-c", "CREATE DATABASE grafana;"]);
        assert_ne!(exec_identity(&a), exec_identity(&b));
    }

    #[test]
    fn token_boundaries_do_not_matter() {
        assert_eq!(
            exec_identity(&strings(&["ab", "c"])),
            exec_identity(&strings(&["a", "bc"]))
        );
    }

    #[test]
    fn password_digest_is_stable_once_applied() {
        let digest = password_digest("S3cretPw!");

        assert!(digest.starts_with(PASSWORD_DIGEST_PREFIX));
        assert!(!digest.contains("S3cretPw!"));
        assert_eq!(password_digest(&digest), digest);
        assert_ne!(password_digest("S3cretPw?"), digest);
    }

    #[test]
    fn kinds_do_not_collide() {
        let parts = strings(&["SELECT 1"]);
        assert_ne!(exec_identity(&parts), sql_identity(&parts));
        assert!(sql_identity(&parts).starts_with(SQL_IDENTITY_PREFIX));
    }
}
