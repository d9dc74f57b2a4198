//! Turns the raw payload of the credential Secret into a [`CredentialTable`].
//!
//! Parsing is all-or-nothing: the first unknown key or incomplete entry fails
//! the whole payload, and no partially populated table is ever returned.
use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use snafu::{OptionExt, Snafu, ensure};
use tracing::debug;

use crate::credential::{Credential, CredentialTable};

pub const USERNAME_SUFFIX: &str = ".username";
pub const PASSWORD_SUFFIX: &str = ".password";
pub const SESSION_MANAGER_URL_SUFFIX: &str = ".vc-session-manager-url";
pub const SESSION_MANAGER_TOKEN_SUFFIX: &str = ".vc-session-manager-token";

pub const USERNAME_PREFIX: &str = "username_";
pub const PASSWORD_PREFIX: &str = "password_";
pub const SERVER_PREFIX: &str = "server_";

type Result<T, E = ParseError> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum ParseError {
    #[snafu(display("unknown secret key {key:?}"))]
    UnknownSecretKey { key: String },

    #[snafu(display(
        "credentials missing{}",
        server.as_ref().map(|server| format!(" for server {server:?}")).unwrap_or_default()
    ))]
    CredentialMissing { server: Option<String> },

    #[snafu(display("incomplete credential set for index {index:?}, expected username, password and server"))]
    IncompleteCredentialSet { index: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LegacyField {
    Username,
    Password,
    SessionManagerUrl,
    SessionManagerToken,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IndexedField {
    Username,
    Password,
    Server,
}

const LEGACY_FIELDS: [(&str, LegacyField); 4] = [
    (USERNAME_SUFFIX, LegacyField::Username),
    (PASSWORD_SUFFIX, LegacyField::Password),
    (SESSION_MANAGER_URL_SUFFIX, LegacyField::SessionManagerUrl),
    (SESSION_MANAGER_TOKEN_SUFFIX, LegacyField::SessionManagerToken),
];

const INDEXED_FIELDS: [(&str, IndexedField); 3] = [
    (USERNAME_PREFIX, IndexedField::Username),
    (PASSWORD_PREFIX, IndexedField::Password),
    (SERVER_PREFIX, IndexedField::Server),
];

#[derive(Debug, PartialEq, Eq)]
enum SecretKey<'a> {
    Legacy { server: &'a str, field: LegacyField },
    Indexed { index: &'a str, field: IndexedField },
}

impl<'a> SecretKey<'a> {
    fn classify(key: &'a str) -> Option<Self> {
        let legacy = LEGACY_FIELDS.iter().find_map(|(suffix, field)| {
            key.strip_suffix(suffix)
                .filter(|server| !server.is_empty())
                .map(|server| Self::Legacy {
                    server,
                    field: *field,
                })
        });

        legacy.or_else(|| {
            INDEXED_FIELDS.iter().find_map(|(prefix, field)| {
                key.strip_prefix(prefix)
                    .filter(|index| !index.is_empty())
                    .map(|index| Self::Indexed {
                        index,
                        field: *field,
                    })
            })
        })
    }
}

/// The `username_<idx>`, `password_<idx>` and `server_<idx>` triple sharing
/// one index.
#[derive(Debug, Default)]
struct IndexedCredential {
    server: String,
    username: String,
    password: String,
}

/// Parses the data of the credential Secret into a fresh [`CredentialTable`].
///
/// Values loaded from mounted files usually carry a trailing newline, which is
/// stripped.
pub fn parse_secret_data(data: &BTreeMap<String, ByteString>) -> Result<CredentialTable> {
    ensure!(
        !data.is_empty(),
        CredentialMissingSnafu {
            server: None::<String>
        }
    );

    let mut table = CredentialTable::new();
    let mut indexed: BTreeMap<&str, IndexedCredential> = BTreeMap::new();

    for (key, value) in data {
        let value = decode_value(value);

        match SecretKey::classify(key).context(UnknownSecretKeySnafu { key })? {
            SecretKey::Legacy { server, field } => {
                let credential = table.entry(server.to_owned()).or_default();
                match field {
                    LegacyField::Username => credential.user = value,
                    LegacyField::Password => credential.password = value,
                    LegacyField::SessionManagerUrl => credential.vc_session_manager_url = value,
                    LegacyField::SessionManagerToken => {
                        credential.vc_session_manager_token = value
                    }
                }
            }
            SecretKey::Indexed { index, field } => {
                let entry = indexed.entry(index).or_default();
                match field {
                    IndexedField::Username => entry.username = value,
                    IndexedField::Password => entry.password = value,
                    IndexedField::Server => entry.server = value,
                }
            }
        }
    }

    for (index, entry) in indexed {
        ensure!(
            !entry.server.is_empty(),
            IncompleteCredentialSetSnafu { index }
        );
        ensure!(
            !entry.username.is_empty() && !entry.password.is_empty(),
            CredentialMissingSnafu {
                server: Some(entry.server),
            }
        );

        let credential = table.entry(entry.server).or_default();
        credential.user = entry.username;
        credential.password = entry.password;
    }

    for (server, credential) in &table {
        validate(server, credential)?;
    }

    debug!(servers = ?table.keys().collect::<Vec<_>>(), "parsed credential secret");
    Ok(table)
}

fn decode_value(value: &ByteString) -> String {
    String::from_utf8_lossy(&value.0)
        .trim_end_matches('\n')
        .to_owned()
}

/// A credential must carry a complete username/password pair, a complete
/// session manager URL/token pair, or both. One-sided pairs are rejected.
fn validate(server: &str, credential: &Credential) -> Result<()> {
    let has_login = !credential.user.is_empty() || !credential.password.is_empty();
    let has_session_manager = !credential.vc_session_manager_url.is_empty()
        || !credential.vc_session_manager_token.is_empty();
    let missing = || CredentialMissingSnafu {
        server: Some(server.to_owned()),
    };

    ensure!(has_login || has_session_manager, missing());
    if has_login {
        ensure!(
            !credential.user.is_empty() && !credential.password.is_empty(),
            missing()
        );
    }
    if has_session_manager {
        ensure!(
            !credential.vc_session_manager_url.is_empty()
                && !credential.vc_session_manager_token.is_empty(),
            missing()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const USERNAME: &str = "Admin";
    const PASSWORD: &str = "Password";
    const IPV4: &str = "10.20.30.40";
    const IPV6: &str = "fd01::1";

    fn data(entries: &[(&str, &str)]) -> BTreeMap<String, ByteString> {
        entries
            .iter()
            .map(|(key, value)| ((*key).to_owned(), ByteString(value.as_bytes().to_vec())))
            .collect()
    }

    fn login(user: &str, password: &str) -> Credential {
        Credential {
            user: user.to_owned(),
            password: password.to_owned(),
            ..Credential::default()
        }
    }

    #[rstest]
    #[case::username_and_password(
        &[("10.20.30.40.username", USERNAME), ("10.20.30.40.password", PASSWORD)],
        &[(IPV4, login(USERNAME, PASSWORD))],
    )]
    #[case::trailing_newlines_from_mounted_files(
        &[("10.20.30.40.username", "Admin\n"), ("10.20.30.40.password", "Password\n")],
        &[(IPV4, login(USERNAME, PASSWORD))],
    )]
    #[case::session_manager(
        &[
            ("10.20.30.40.vc-session-manager-url", "https://something.tld/session"),
            ("10.20.30.40.vc-session-manager-token", "token"),
        ],
        &[(IPV4, Credential {
            vc_session_manager_url: "https://something.tld/session".to_owned(),
            vc_session_manager_token: "token".to_owned(),
            ..Credential::default()
        })],
    )]
    #[case::indexed_form(
        &[
            ("username_0", USERNAME), ("password_0", PASSWORD), ("server_0", IPV6),
            ("username_foo", "Adminfoo"), ("password_foo", "Passwordfoo"), ("server_foo", IPV4),
        ],
        &[(IPV6, login(USERNAME, PASSWORD)), (IPV4, login("Adminfoo", "Passwordfoo"))],
    )]
    #[case::legacy_and_indexed_form_mixed(
        &[
            ("10.20.30.40.username", USERNAME), ("10.20.30.40.password", PASSWORD),
            ("username_0", "Adminalt"), ("password_0", "Passwordalt"), ("server_0", IPV6),
        ],
        &[(IPV4, login(USERNAME, PASSWORD)), (IPV6, login("Adminalt", "Passwordalt"))],
    )]
    #[case::ipv6_with_legacy_suffix(
        &[("fd01::1.username", USERNAME), ("fd01::1.password", PASSWORD)],
        &[(IPV6, login(USERNAME, PASSWORD))],
    )]
    fn parse_valid_secret_data(
        #[case] entries: &[(&str, &str)],
        #[case] expected: &[(&str, Credential)],
    ) {
        let table = parse_secret_data(&data(entries)).expect("secret data must parse");
        let expected: CredentialTable = expected
            .iter()
            .map(|(server, credential)| ((*server).to_owned(), credential.clone()))
            .collect();

        assert_eq!(table, expected);
    }

    #[rstest]
    #[case::misspelled_username_key(
        &[("10.20.30.40.usernam", USERNAME), ("10.20.30.40.password", PASSWORD)],
        ParseError::UnknownSecretKey { key: "10.20.30.40.usernam".to_owned() },
    )]
    #[case::bare_server_key(
        &[("10.20.30.40", USERNAME)],
        ParseError::UnknownSecretKey { key: "10.20.30.40".to_owned() },
    )]
    #[case::missing_username(
        &[("10.20.30.40.password", PASSWORD)],
        ParseError::CredentialMissing { server: Some(IPV4.to_owned()) },
    )]
    #[case::missing_password(
        &[("10.20.30.40.username", USERNAME)],
        ParseError::CredentialMissing { server: Some(IPV4.to_owned()) },
    )]
    #[case::missing_session_manager_token(
        &[("10.20.30.40.vc-session-manager-url", "https://something.tld/session")],
        ParseError::CredentialMissing { server: Some(IPV4.to_owned()) },
    )]
    #[case::missing_session_manager_url(
        &[("10.20.30.40.vc-session-manager-token", "token")],
        ParseError::CredentialMissing { server: Some(IPV4.to_owned()) },
    )]
    #[case::empty_value(
        &[("10.20.30.40.username", "\n"), ("10.20.30.40.password", PASSWORD)],
        ParseError::CredentialMissing { server: Some(IPV4.to_owned()) },
    )]
    #[case::indexed_missing_password(
        &[("username_0", USERNAME), ("server_0", IPV6)],
        ParseError::CredentialMissing { server: Some(IPV6.to_owned()) },
    )]
    #[case::indexed_missing_username(
        &[("password_0", PASSWORD), ("server_0", IPV6)],
        ParseError::CredentialMissing { server: Some(IPV6.to_owned()) },
    )]
    #[case::indexed_password_without_server(
        &[("username_0", USERNAME), ("password_0", PASSWORD), ("server_0", IPV6), ("password_1", PASSWORD)],
        ParseError::IncompleteCredentialSet { index: "1".to_owned() },
    )]
    #[case::indexed_username_without_server(
        &[("username_0", USERNAME), ("password_0", PASSWORD), ("server_0", IPV6), ("username_1", USERNAME)],
        ParseError::IncompleteCredentialSet { index: "1".to_owned() },
    )]
    #[case::indexed_missing_suffixes(
        &[("password_", PASSWORD), ("server_", IPV6), ("username_", USERNAME)],
        ParseError::UnknownSecretKey { key: "password_".to_owned() },
    )]
    #[case::indexed_server_missing_suffix(
        &[("server_", IPV6)],
        ParseError::UnknownSecretKey { key: "server_".to_owned() },
    )]
    #[case::typo_blocks_other_servers(
        &[
            ("10.0.0.1.username", USERNAME), ("10.0.0.1.password", PASSWORD),
            ("10.0.0.2.pasword", PASSWORD),
        ],
        ParseError::UnknownSecretKey { key: "10.0.0.2.pasword".to_owned() },
    )]
    #[case::empty_data(&[], ParseError::CredentialMissing { server: None })]
    fn parse_invalid_secret_data(#[case] entries: &[(&str, &str)], #[case] expected: ParseError) {
        let error = parse_secret_data(&data(entries)).expect_err("secret data must not parse");
        assert_eq!(error, expected);
    }

    #[test]
    fn parse_is_idempotent() {
        let data = data(&[
            ("10.20.30.40.username", USERNAME),
            ("10.20.30.40.password", PASSWORD),
            ("username_a", "other"),
            ("password_a", "secret"),
            ("server_a", IPV6),
        ]);

        let first = parse_secret_data(&data).expect("secret data must parse");
        let second = parse_secret_data(&data).expect("secret data must parse");
        assert_eq!(first, second);
    }

    #[rstest]
    #[case("10.20.30.40.username", Some(SecretKey::Legacy { server: IPV4, field: LegacyField::Username }))]
    #[case("vc.example.com.vc-session-manager-token", Some(SecretKey::Legacy { server: "vc.example.com", field: LegacyField::SessionManagerToken }))]
    #[case("server_42", Some(SecretKey::Indexed { index: "42", field: IndexedField::Server }))]
    #[case(".username", None)]
    #[case("username_", None)]
    #[case("token", None)]
    fn classify_keys(#[case] key: &str, #[case] expected: Option<SecretKey<'_>>) {
        assert_eq!(SecretKey::classify(key), expected);
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            ParseError::CredentialMissing { server: None }.to_string(),
            "credentials missing"
        );
        assert_eq!(
            ParseError::CredentialMissing {
                server: Some(IPV6.to_owned())
            }
            .to_string(),
            "credentials missing for server \"fd01::1\""
        );
    }
}
