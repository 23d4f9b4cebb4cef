//! The operations the CLI exposes: resolve a URL to its secret, create a
//! store, and import or generate an entry.
//!
//! Each call owns its [`Passphrase`] and every decrypted buffer it touches;
//! all of them are zeroed when the call returns, on success or failure.

use std::fs;
use std::io::{BufRead, ErrorKind};
use std::path::Path;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::crypto::KdfParams;
use crate::entry::{build_index, encode, Entry, StorePayload};
use crate::error::{PastorError, Result};
use crate::generator::{self, PasswordPolicy};
use crate::matcher::{find, Query};
use crate::store::{self, WriterLock};

/// Master passphrase bytes, zeroed on drop.
pub struct Passphrase(Zeroizing<Vec<u8>>);

impl Passphrase {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Passphrase {
    fn from(value: String) -> Self {
        Self(Zeroizing::new(value.into_bytes()))
    }
}

impl From<&str> for Passphrase {
    fn from(value: &str) -> Self {
        Self(Zeroizing::new(value.as_bytes().to_vec()))
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

/// A resolved password, zeroed on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Where the URL to look up comes from. The browser side owns tab
/// discovery; the tool only needs the resulting string.
pub trait UrlSource {
    fn current_url(&mut self) -> Result<String>;
}

/// A URL already known to the caller, e.g. a command-line argument.
#[derive(Debug, Clone)]
pub struct StaticUrl(pub String);

impl UrlSource for StaticUrl {
    fn current_url(&mut self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Reads the URL as the first line of a stream such as stdin.
#[derive(Debug)]
pub struct LineUrl<R>(pub R);

impl<R: BufRead> UrlSource for LineUrl<R> {
    fn current_url(&mut self) -> Result<String> {
        let mut line = String::new();
        self.0
            .read_line(&mut line)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidData => PastorError::invalid("query URL is not valid UTF-8"),
                _ => PastorError::io("<stdin>", e),
            })?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Resolves `query` against the store at `db_path`.
///
/// Stages run strictly in order (parse, decrypt, decode, match) and the
/// first failure is returned unchanged.
pub fn run(db_path: &Path, passphrase: Passphrase, query: &str) -> Result<Secret> {
    let query = Query::parse(query)?;
    let plaintext = store::open(db_path, passphrase.as_bytes())?;
    let payload = build_index(&plaintext)?;
    debug!(entries = payload.entries.len(), "index built");
    let entry = find(&payload.entries, &query)?;
    info!(host = query.host(), "secret resolved");
    Ok(Secret(Zeroizing::new(entry.secret.clone())))
}

pub fn run_with(
    db_path: &Path,
    passphrase: Passphrase,
    source: &mut dyn UrlSource,
) -> Result<Secret> {
    let url = source.current_url()?;
    run(db_path, passphrase, &url)
}

/// Writes a new, empty store. Never overwrites an existing file.
pub fn create_store(db_path: &Path, passphrase: Passphrase, kdf: &KdfParams) -> Result<()> {
    if passphrase.is_empty() {
        return Err(PastorError::invalid("passphrase must not be empty"));
    }
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PastorError::io(parent, e))?;
    }
    let lock = WriterLock::acquire(db_path)?;
    if store::exists(db_path) {
        return Err(PastorError::invalid(format!(
            "store already exists at {}",
            db_path.display()
        )));
    }
    let encoded = encode(&StorePayload::empty())?;
    store::save_locked(&lock, &encoded, passphrase.as_bytes(), kdf)?;
    info!(path = %db_path.display(), "store created");
    Ok(())
}

#[derive(Debug)]
pub struct ImportRequest {
    /// URL or hostname; only the hostname is stored as the key.
    pub domain: String,
    pub secret: Zeroizing<String>,
    pub metadata: Option<String>,
    /// Replace existing entries for the same key instead of refusing.
    pub force: bool,
}

/// Adds an entry, holding the writer lock from decrypt to rename so
/// concurrent importers cannot lose each other's updates.
pub fn import(db_path: &Path, passphrase: Passphrase, request: ImportRequest) -> Result<()> {
    let secret = request.secret.as_str();
    if secret.is_empty() {
        return Err(PastorError::invalid("password must not be empty"));
    }
    if secret.contains(['\n', '\r']) {
        return Err(PastorError::invalid("password must be a single line"));
    }
    let key = Query::parse(&request.domain)?.host().to_string();
    if !store::exists(db_path) {
        return Err(PastorError::io(db_path, ErrorKind::NotFound.into()));
    }

    let lock = WriterLock::acquire(db_path)?;
    let (header, plaintext) = store::open_with_header(db_path, passphrase.as_bytes())?;
    let mut payload = build_index(&plaintext)?;
    if payload.contains_key(&key) {
        if !request.force {
            return Err(PastorError::invalid(format!(
                "an entry for {key} already exists; use --force to replace it"
            )));
        }
        let removed = payload.remove_key(&key);
        debug!(removed, "replacing existing entries");
    }
    payload.push(Entry::new(key.as_str(), secret, request.metadata));
    let encoded = encode(&payload)?;
    store::save_locked(&lock, &encoded, passphrase.as_bytes(), &header.kdf)?;
    info!(key = %key, "entry imported");
    Ok(())
}

/// Generates a password for `domain`, stores it and returns it.
pub fn generate(
    db_path: &Path,
    passphrase: Passphrase,
    domain: &str,
    policy: &PasswordPolicy,
    force: bool,
) -> Result<Secret> {
    let password = generator::generate(policy)?;
    import(
        db_path,
        passphrase,
        ImportRequest {
            domain: domain.to_string(),
            secret: password.clone(),
            metadata: None,
            force,
        },
    )?;
    Ok(Secret(password))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cheap_params;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn store_with(path: &Path, passphrase: &str, entries: &[(&str, &str)]) {
        let mut payload = StorePayload::empty();
        for (key, secret) in entries {
            payload.push(Entry::new(*key, *secret, None));
        }
        let encoded = encode(&payload).unwrap();
        store::save(path, &encoded, passphrase.as_bytes(), &cheap_params()).unwrap();
    }

    fn request(domain: &str, secret: &str, force: bool) -> ImportRequest {
        ImportRequest {
            domain: domain.into(),
            secret: Zeroizing::new(secret.into()),
            metadata: None,
            force,
        }
    }

    #[test]
    fn sealed_entries_come_back_in_order() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("database.db");
        let mut payload = StorePayload::empty();
        payload.push(Entry::new("example.com", "A", Some("personal".into())));
        payload.push(Entry::new("mail.example.com", "M", None));
        payload.push(Entry::new("example.com", "B", None));
        let encoded = encode(&payload).unwrap();
        store::save(&db, &encoded, b"pw", &cheap_params()).unwrap();

        let rebuilt = build_index(&store::open(&db, b"pw").unwrap()).unwrap();
        assert_eq!(rebuilt, payload);
    }

    #[test]
    fn github_scenario() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("database.db");
        store_with(&db, "correctpass", &[("github.com", "s3cr3t")]);

        let secret = run(&db, "correctpass".into(), "https://github.com/login").unwrap();
        assert_eq!(secret.expose(), "s3cr3t");

        let err = run(&db, "wrongpass".into(), "https://github.com/login").unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let err = run(&db, "correctpass".into(), "https://gitlab.com").unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("gitlab.com"));
    }

    #[test]
    fn run_is_idempotent_and_read_only() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("database.db");
        store_with(&db, "pw", &[("example.com", "one")]);
        let before = fs::read(&db).unwrap();
        let first = run(&db, "pw".into(), "https://example.com/").unwrap();
        let second = run(&db, "pw".into(), "https://example.com/").unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read(&db).unwrap(), before);
    }

    #[test]
    fn empty_query_is_invalid() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("database.db");
        let err = run(&db, "pw".into(), "").unwrap_err();
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn missing_store_is_io() {
        let dir = tempdir().unwrap();
        let err = run(&dir.path().join("nope.db"), "pw".into(), "github.com").unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn undecodable_payload_is_corrupt() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("database.db");
        store::save(&db, b"pastor 1804289383", b"pw", &cheap_params()).unwrap();
        let err = run(&db, "pw".into(), "github.com").unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn url_sources() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("database.db");
        store_with(&db, "pw", &[("example.com", "abc")]);

        let mut stdin = LineUrl(Cursor::new("https://mail.example.com/inbox\n"));
        let secret = run_with(&db, "pw".into(), &mut stdin).unwrap();
        assert_eq!(secret.expose(), "abc");

        let mut fixed = StaticUrl("example.com".into());
        assert_eq!(run_with(&db, "pw".into(), &mut fixed).unwrap().expose(), "abc");

        let mut garbled = LineUrl(Cursor::new(vec![0xff, 0xfe, b'\n']));
        assert_eq!(
            run_with(&db, "pw".into(), &mut garbled).unwrap_err().exit_code(),
            5
        );

        let mut empty = LineUrl(Cursor::new(""));
        assert_eq!(
            run_with(&db, "pw".into(), &mut empty).unwrap_err().exit_code(),
            5
        );
    }

    #[test]
    fn create_then_import_then_lookup() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("nested").join("database.db");
        create_store(&db, "pw".into(), &cheap_params()).unwrap();
        assert_eq!(
            run(&db, "pw".into(), "github.com").unwrap_err().exit_code(),
            1
        );

        import(&db, "pw".into(), request("https://www.Google.com/blabla?x", "g00gle", false))
            .unwrap();
        let secret = run(&db, "pw".into(), "https://www.google.com/search").unwrap();
        assert_eq!(secret.expose(), "g00gle");
    }

    #[test]
    fn create_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("database.db");
        create_store(&db, "pw".into(), &cheap_params()).unwrap();
        let before = fs::read(&db).unwrap();
        let err = create_store(&db, "other".into(), &cheap_params()).unwrap_err();
        assert!(matches!(err, PastorError::InvalidArgument(_)));
        assert_eq!(fs::read(&db).unwrap(), before);
        assert!(create_store(&dir.path().join("x.db"), "".into(), &cheap_params()).is_err());
    }

    #[test]
    fn import_requires_force_to_replace() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("database.db");
        create_store(&db, "pw".into(), &cheap_params()).unwrap();
        import(&db, "pw".into(), request("example.com", "first", false)).unwrap();

        let err = import(&db, "pw".into(), request("example.com", "second", false)).unwrap_err();
        assert!(err.to_string().contains("--force"));
        assert_eq!(run(&db, "pw".into(), "example.com").unwrap().expose(), "first");

        import(&db, "pw".into(), request("https://EXAMPLE.com/", "second", true)).unwrap();
        assert_eq!(run(&db, "pw".into(), "example.com").unwrap().expose(), "second");

        let plaintext = store::open(&db, b"pw").unwrap();
        assert_eq!(build_index(&plaintext).unwrap().entries.len(), 1);
    }

    #[test]
    fn import_keeps_store_kdf_cost() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("database.db");
        let kdf = KdfParams::new(128, 2, 1);
        create_store(&db, "pw".into(), &kdf).unwrap();
        import(&db, "pw".into(), request("example.com", "x", false)).unwrap();
        let (header, _) = store::open_with_header(&db, b"pw").unwrap();
        assert_eq!(header.kdf, kdf);
    }

    #[test]
    fn import_rejects_bad_secrets_and_wrong_passphrase() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("database.db");
        create_store(&db, "pw".into(), &cheap_params()).unwrap();
        assert!(import(&db, "pw".into(), request("a.com", "", false)).is_err());
        assert!(import(&db, "pw".into(), request("a.com", "two\nlines", false)).is_err());
        let err = import(&db, "nope".into(), request("a.com", "x", false)).unwrap_err();
        assert!(matches!(err, PastorError::AuthenticationFailed));
    }

    #[test]
    fn generate_stores_what_it_returns() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("database.db");
        create_store(&db, "pw".into(), &cheap_params()).unwrap();
        let policy = PasswordPolicy {
            min: Some(16),
            max: Some(16),
            ..Default::default()
        };
        let generated = generate(&db, "pw".into(), "https://example.org/", &policy, false).unwrap();
        assert_eq!(generated.expose().len(), 16);
        let looked_up = run(&db, "pw".into(), "example.org").unwrap();
        assert_eq!(looked_up, generated);
    }

    #[test]
    fn writes_to_a_missing_store_leave_no_files() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("absent.db");
        let err = import(&db, "pw".into(), request("example.com", "x", false)).unwrap_err();
        assert_eq!(err.exit_code(), PastorError::EXIT_IO);
        let err = generate(&db, "pw".into(), "example.com", &PasswordPolicy::default(), false)
            .unwrap_err();
        assert_eq!(err.exit_code(), PastorError::EXIT_IO);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn debug_output_is_redacted() {
        let passphrase = Passphrase::from("asd");
        assert!(!format!("{passphrase:?}").contains("asd"));
        let secret = Secret(Zeroizing::new("hunter2".into()));
        assert!(!format!("{secret:?}").contains("hunter2"));
    }
}
