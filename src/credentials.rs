use md4::{Digest, Md4};

/// Operator-supplied administrative credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How the password is carried in the create-scan payload.
///
/// Windows targets are scanned with an NTLM hash; every other platform sends
/// the password as typed. The asymmetry is part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialEncoding {
    Plain,
    NtlmHash,
}

impl CredentialEncoding {
    pub fn encode(self, password: &str) -> String {
        match self {
            Self::Plain => password.to_string(),
            Self::NtlmHash => ntlm_hash(password),
        }
    }
}

/// MD4 over the UTF-16LE password, upper-case hex.
pub fn ntlm_hash(password: &str) -> String {
    let utf16: Vec<u8> = password.encode_utf16().flat_map(u16::to_le_bytes).collect();
    hex::encode_upper(Md4::digest(&utf16))
}

/// Username/password fields as sent.
///
/// Empty values are omitted, except that a hashed password is always sent:
/// an empty password still has an NTLM hash.
pub fn wire_fields(
    credentials: Option<&Credentials>,
    encoding: CredentialEncoding,
) -> (Option<String>, Option<String>) {
    let Some(c) = credentials else {
        return (None, None);
    };
    let username = (!c.username.is_empty()).then(|| c.username.clone());
    let password = match encoding {
        CredentialEncoding::NtlmHash => Some(encoding.encode(&c.password)),
        CredentialEncoding::Plain => (!c.password.is_empty()).then(|| c.password.clone()),
    };
    (username, password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ntlm_known_vector() {
        assert_eq!(ntlm_hash("password"), "8846F7EAEE8FB117AD06BDD830B7586C");
        assert_eq!(ntlm_hash(""), "31D6CFE0D16AE931B73C59D7E0C089C0");
    }

    #[test]
    fn plain_passes_through() {
        assert_eq!(CredentialEncoding::Plain.encode("hunter2"), "hunter2");
    }

    #[test]
    fn empty_plain_fields_are_dropped() {
        let c = Credentials {
            username: String::new(),
            password: String::new(),
        };
        assert_eq!(wire_fields(Some(&c), CredentialEncoding::Plain), (None, None));
        assert_eq!(wire_fields(None, CredentialEncoding::Plain), (None, None));
    }

    #[test]
    fn empty_password_is_still_hashed() {
        let c = Credentials {
            username: "admin".into(),
            password: String::new(),
        };
        let (u, p) = wire_fields(Some(&c), CredentialEncoding::NtlmHash);
        assert_eq!(u.as_deref(), Some("admin"));
        assert_eq!(p.as_deref(), Some("31D6CFE0D16AE931B73C59D7E0C089C0"));
    }

    #[test]
    fn debug_hides_password() {
        let c = Credentials {
            username: "root".into(),
            password: "s3cret".into(),
        };
        assert!(!format!("{c:?}").contains("s3cret"));
    }
}
