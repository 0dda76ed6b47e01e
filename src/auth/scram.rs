//! SCRAM-SHA-256 authentication, server side
//!
//! Implements the verifier half of SCRAM-SHA-256 (Salted Challenge Response
//! Authentication Mechanism) as defined in RFC 5802 and used by PostgreSQL 10+.
//! Channel binding is not offered, so clients may send the `n` or `y` GS2 flag
//! but never `p=`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Mechanism name advertised in AuthenticationSASL
pub const MECHANISM: &str = "SCRAM-SHA-256";

/// PBKDF2 iteration count used for generated secrets (PostgreSQL's default)
pub const DEFAULT_ITERATIONS: u32 = 4096;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 18;

/// SCRAM authentication error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScramError {
    /// Client proof did not match the stored key
    InvalidClientProof,
    /// Invalid client message format
    InvalidClientMessage(String),
    /// Client asked for channel binding, which is not offered
    UnsupportedChannelBinding(String),
    /// UTF-8 encoding/decoding error
    Utf8Error(String),
    /// Base64 decoding error
    Base64Error(String),
}

impl fmt::Display for ScramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScramError::InvalidClientProof => write!(f, "invalid client proof"),
            ScramError::InvalidClientMessage(msg) => write!(f, "invalid client message: {}", msg),
            ScramError::UnsupportedChannelBinding(kind) => {
                write!(f, "channel binding not supported: {}", kind)
            }
            ScramError::Utf8Error(msg) => write!(f, "UTF-8 error: {}", msg),
            ScramError::Base64Error(msg) => write!(f, "Base64 error: {}", msg),
        }
    }
}

impl std::error::Error for ScramError {}

/// Stored SCRAM verifier for one user.
///
/// Holds what PostgreSQL keeps in `pg_authid`: salt, iteration count,
/// `StoredKey` and `ServerKey`. The password itself is not retained.
#[derive(Clone, PartialEq, Eq)]
pub struct ScramSecret {
    salt: Vec<u8>,
    iterations: u32,
    stored_key: Vec<u8>,
    server_key: Vec<u8>,
}

impl fmt::Debug for ScramSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScramSecret")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl ScramSecret {
    /// Derive a verifier from a password with a fresh random salt
    pub fn generate(password: &str) -> Self {
        let mut salt = vec![0u8; SALT_LEN];
        rand::thread_rng().fill(&mut salt[..]);
        Self::derive(password, &salt, DEFAULT_ITERATIONS)
    }

    /// Derive a verifier from a password with the given salt and iteration count
    pub fn derive(password: &str, salt: &[u8], iterations: u32) -> Self {
        let salted = salted_password(password, salt, iterations);
        let client_key = hmac(&salted, b"Client Key");
        Self {
            salt: salt.to_vec(),
            iterations,
            stored_key: Sha256::digest(&client_key).to_vec(),
            server_key: hmac(&salted, b"Server Key"),
        }
    }

    /// Verifier standing in for a user that does not exist.
    ///
    /// Every value is derived from `key` and the user name, so repeated
    /// attempts for one name see the same salt while different names see
    /// different ones. No password matches it.
    pub fn mock(key: &[u8], user: &str) -> Self {
        let derive = |label: &[u8]| hmac(key, &[user.as_bytes(), &b"\0"[..], label].concat());
        let mut salt = derive(b"salt");
        salt.truncate(SALT_LEN);
        Self {
            salt,
            iterations: DEFAULT_ITERATIONS,
            stored_key: derive(b"stored key"),
            server_key: derive(b"server key"),
        }
    }

    /// Check a cleartext password against this verifier
    pub fn verify_password(&self, password: &str) -> bool {
        let salted = salted_password(password, &self.salt, self.iterations);
        let client_key = hmac(&salted, b"Client Key");
        constant_time_compare(&Sha256::digest(&client_key), &self.stored_key)
    }

    /// Iteration count
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Salt sent to the client in server-first-message
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }
}

/// Parsed client-first-message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFirst {
    /// GS2 header including the trailing comma (e.g. `n,,`)
    pub gs2_header: String,
    /// Username attribute (PostgreSQL clients leave it empty)
    pub username: String,
    /// Client nonce
    pub nonce: String,
    /// client-first-message-bare, needed for the AuthMessage
    pub bare: String,
}

/// Parse client first message format: gs2-header,n=<user>,r=<nonce>[,ext...]
pub fn parse_client_first(msg: &str) -> Result<ClientFirst, ScramError> {
    let mut parts = msg.splitn(3, ',');
    let cbind_flag = parts.next().unwrap_or_default();
    let authzid = parts
        .next()
        .ok_or_else(|| ScramError::InvalidClientMessage("missing GS2 header".to_string()))?;
    let bare = parts
        .next()
        .ok_or_else(|| ScramError::InvalidClientMessage("missing message body".to_string()))?;

    match cbind_flag {
        "n" | "y" => {}
        flag if flag.starts_with("p=") => {
            return Err(ScramError::UnsupportedChannelBinding(flag[2..].to_string()))
        }
        other => {
            return Err(ScramError::InvalidClientMessage(format!(
                "invalid channel binding flag: {:?}",
                other
            )))
        }
    }
    if !authzid.is_empty() && !authzid.starts_with("a=") {
        return Err(ScramError::InvalidClientMessage(
            "invalid authorization identity".to_string(),
        ));
    }

    let mut username = None;
    let mut nonce = None;
    for part in bare.split(',') {
        if let Some(value) = part.strip_prefix("n=") {
            username = Some(value.to_string());
        } else if let Some(value) = part.strip_prefix("r=") {
            nonce = Some(value.to_string());
        } else if part.starts_with("m=") {
            return Err(ScramError::InvalidClientMessage(
                "mandatory extensions are not supported".to_string(),
            ));
        }
    }

    let username = username
        .ok_or_else(|| ScramError::InvalidClientMessage("missing username".to_string()))?;
    let nonce = nonce
        .filter(|n| !n.is_empty() && n.bytes().all(|b| (0x21..=0x7e).contains(&b) && b != b','))
        .ok_or_else(|| ScramError::InvalidClientMessage("missing or invalid nonce".to_string()))?;

    Ok(ClientFirst {
        gs2_header: format!("{},{},", cbind_flag, authzid),
        username,
        nonce,
        bare: bare.to_string(),
    })
}

/// Parsed client-final-message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFinal {
    /// Decoded `c=` attribute
    pub channel_binding: Vec<u8>,
    /// Full nonce echoed back by the client
    pub nonce: String,
    /// Decoded client proof
    pub proof: Vec<u8>,
    /// client-final-message-without-proof, needed for the AuthMessage
    pub without_proof: String,
}

/// Parse client final message format: c=<binding>,r=<nonce>[,ext...],p=<proof>
pub fn parse_client_final(msg: &str) -> Result<ClientFinal, ScramError> {
    let proof_pos = msg
        .rfind(",p=")
        .ok_or_else(|| ScramError::InvalidClientMessage("missing proof".to_string()))?;
    let without_proof = &msg[..proof_pos];
    let proof = BASE64
        .decode(&msg[proof_pos + 3..])
        .map_err(|_| ScramError::Base64Error("invalid proof encoding".to_string()))?;

    let mut channel_binding = None;
    let mut nonce = None;
    for part in without_proof.split(',') {
        if let Some(value) = part.strip_prefix("c=") {
            channel_binding = Some(BASE64.decode(value).map_err(|_| {
                ScramError::Base64Error("invalid channel binding encoding".to_string())
            })?);
        } else if let Some(value) = part.strip_prefix("r=") {
            nonce = Some(value.to_string());
        }
    }

    Ok(ClientFinal {
        channel_binding: channel_binding.ok_or_else(|| {
            ScramError::InvalidClientMessage("missing channel binding".to_string())
        })?,
        nonce: nonce
            .ok_or_else(|| ScramError::InvalidClientMessage("missing nonce".to_string()))?,
        proof,
        without_proof: without_proof.to_string(),
    })
}

/// SCRAM-SHA-256 server implementation
pub struct ScramServer {
    secret: ScramSecret,
    nonce: String,
}

/// State carried from the server-first to the server-final step
#[derive(Clone, Debug)]
pub struct ScramExchange {
    secret: ScramSecret,
    gs2_header: String,
    nonce: String,
    client_first_bare: String,
    server_first: String,
}

impl ScramServer {
    /// Create a server for one exchange against `secret`
    pub fn new(secret: ScramSecret) -> Self {
        let mut rng = rand::thread_rng();
        let nonce_bytes: Vec<u8> = (0..NONCE_LEN).map(|_| rng.gen()).collect();
        Self {
            secret,
            nonce: BASE64.encode(&nonce_bytes),
        }
    }

    /// Process client first message and generate server first message
    ///
    /// Returns (server_first_message, exchange_state)
    pub fn server_first(self, client_first: &[u8]) -> Result<(String, ScramExchange), ScramError> {
        let client_first = std::str::from_utf8(client_first)
            .map_err(|e| ScramError::Utf8Error(e.to_string()))?;
        let parsed = parse_client_first(client_first)?;

        let nonce = format!("{}{}", parsed.nonce, self.nonce);
        let server_first = format!(
            "r={},s={},i={}",
            nonce,
            BASE64.encode(&self.secret.salt),
            self.secret.iterations
        );

        let exchange = ScramExchange {
            secret: self.secret,
            gs2_header: parsed.gs2_header,
            nonce,
            client_first_bare: parsed.bare,
            server_first: server_first.clone(),
        };
        Ok((server_first, exchange))
    }
}

impl ScramExchange {
    /// Verify client final message and generate server final message
    pub fn server_final(&self, client_final: &[u8]) -> Result<String, ScramError> {
        let client_final = std::str::from_utf8(client_final)
            .map_err(|e| ScramError::Utf8Error(e.to_string()))?;
        let parsed = parse_client_final(client_final)?;

        if parsed.channel_binding != self.gs2_header.as_bytes() {
            return Err(ScramError::InvalidClientMessage(
                "channel binding does not match GS2 header".to_string(),
            ));
        }
        if parsed.nonce != self.nonce {
            return Err(ScramError::InvalidClientMessage(
                "nonce does not match".to_string(),
            ));
        }

        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, self.server_first, parsed.without_proof
        );

        // ClientKey := ClientProof XOR HMAC(StoredKey, AuthMessage)
        let client_signature = hmac(&self.secret.stored_key, auth_message.as_bytes());
        if parsed.proof.len() != client_signature.len() {
            return Err(ScramError::InvalidClientProof);
        }
        let client_key: Vec<u8> = parsed
            .proof
            .iter()
            .zip(client_signature.iter())
            .map(|(p, s)| p ^ s)
            .collect();

        if !constant_time_compare(&Sha256::digest(&client_key), &self.secret.stored_key) {
            return Err(ScramError::InvalidClientProof);
        }

        let server_signature = hmac(&self.secret.server_key, auth_message.as_bytes());
        Ok(format!("v={}", BASE64.encode(server_signature)))
    }
}

/// SaltedPassword := PBKDF2(password, salt, iterations, HMAC-SHA256)
fn salted_password(password: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut salted = vec![0u8; 32]; // SHA256 produces 32 bytes
    let _ = pbkdf2::<HmacSha256>(password.as_bytes(), salt, iterations, &mut salted);
    salted
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key should be valid");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Client half of the exchange, as libpq computes it
    fn client_final_for(
        password: &str,
        client_first_bare: &str,
        server_first: &str,
        gs2_header: &str,
    ) -> String {
        let mut nonce = "";
        let mut salt = Vec::new();
        let mut iterations = 0;
        for part in server_first.split(',') {
            if let Some(v) = part.strip_prefix("r=") {
                nonce = v;
            } else if let Some(v) = part.strip_prefix("s=") {
                salt = BASE64.decode(v).unwrap();
            } else if let Some(v) = part.strip_prefix("i=") {
                iterations = v.parse().unwrap();
            }
        }

        let without_proof = format!("c={},r={}", BASE64.encode(gs2_header), nonce);
        let auth_message = format!("{},{},{}", client_first_bare, server_first, without_proof);

        let salted = salted_password(password, &salt, iterations);
        let client_key = hmac(&salted, b"Client Key");
        let stored_key = Sha256::digest(&client_key);
        let client_signature = hmac(&stored_key, auth_message.as_bytes());
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        format!("{},p={}", without_proof, BASE64.encode(proof))
    }

    fn run_exchange(stored: &str, attempted: &str) -> Result<String, ScramError> {
        let server = ScramServer::new(ScramSecret::derive(stored, b"salty", 4096));
        let (server_first, exchange) = server.server_first(b"n,,n=,r=clientnonce").unwrap();
        let client_final = client_final_for(attempted, "n=,r=clientnonce", &server_first, "n,,");
        exchange.server_final(client_final.as_bytes())
    }

    #[test]
    fn test_server_first_message_format() {
        let server = ScramServer::new(ScramSecret::derive("pw", b"salty", 4096));
        let (first, _) = server.server_first(b"n,,n=,r=abc").unwrap();

        assert!(first.starts_with("r=abc"));
        assert!(first.contains(&format!(",s={},", BASE64.encode(b"salty"))));
        assert!(first.ends_with(",i=4096"));
    }

    #[test]
    fn test_exchange_with_correct_password() {
        let server_final = run_exchange("password", "password").unwrap();
        assert!(server_final.starts_with("v="));
    }

    #[test]
    fn test_exchange_with_wrong_password() {
        assert_eq!(
            run_exchange("password", "wrong"),
            Err(ScramError::InvalidClientProof)
        );
    }

    #[test]
    fn test_exchange_unicode_password() {
        assert!(run_exchange("pässwörd™", "pässwörd™").is_ok());
    }

    #[test]
    fn test_server_signature_matches_client_expectation() {
        let secret = ScramSecret::derive("password", b"salty", 4096);
        let server = ScramServer::new(secret);
        let (server_first, exchange) = server.server_first(b"n,,n=,r=cn").unwrap();
        let client_final = client_final_for("password", "n=,r=cn", &server_first, "n,,");
        let server_final = exchange.server_final(client_final.as_bytes()).unwrap();

        let without_proof = client_final.rsplit_once(",p=").unwrap().0;
        let auth_message = format!("n=,r=cn,{},{}", server_first, without_proof);
        let salted = salted_password("password", b"salty", 4096);
        let expected = hmac(&hmac(&salted, b"Server Key"), auth_message.as_bytes());
        assert_eq!(server_final, format!("v={}", BASE64.encode(expected)));
    }

    #[test]
    fn test_y_flag_accepted_with_matching_binding() {
        let server = ScramServer::new(ScramSecret::derive("pw", b"salty", 4096));
        let (server_first, exchange) = server.server_first(b"y,,n=,r=cn").unwrap();
        let client_final = client_final_for("pw", "n=,r=cn", &server_first, "y,,");
        assert!(exchange.server_final(client_final.as_bytes()).is_ok());
    }

    #[test]
    fn test_channel_binding_mismatch_rejected() {
        let server = ScramServer::new(ScramSecret::derive("pw", b"salty", 4096));
        let (server_first, exchange) = server.server_first(b"n,,n=,r=cn").unwrap();
        // Client claims "y" in the final message after sending "n"
        let client_final = client_final_for("pw", "n=,r=cn", &server_first, "y,,");
        assert!(matches!(
            exchange.server_final(client_final.as_bytes()),
            Err(ScramError::InvalidClientMessage(_))
        ));
    }

    #[test]
    fn test_nonce_tampering_rejected() {
        let server = ScramServer::new(ScramSecret::derive("pw", b"salty", 4096));
        let (server_first, exchange) = server.server_first(b"n,,n=,r=cn").unwrap();
        let tampered = server_first.replacen("r=cn", "r=XX", 1);
        let client_final = client_final_for("pw", "n=,r=cn", &tampered, "n,,");
        assert!(matches!(
            exchange.server_final(client_final.as_bytes()),
            Err(ScramError::InvalidClientMessage(_))
        ));
    }

    #[test]
    fn test_parse_client_first_valid() {
        let parsed = parse_client_first("n,,n=alice,r=fyko+d2lbbFgONRv9qkxdawL").unwrap();
        assert_eq!(parsed.gs2_header, "n,,");
        assert_eq!(parsed.username, "alice");
        assert_eq!(parsed.nonce, "fyko+d2lbbFgONRv9qkxdawL");
        assert_eq!(parsed.bare, "n=alice,r=fyko+d2lbbFgONRv9qkxdawL");
    }

    #[test]
    fn test_parse_client_first_rejects_channel_binding() {
        let result = parse_client_first("p=tls-server-end-point,,n=,r=abc");
        assert_eq!(
            result,
            Err(ScramError::UnsupportedChannelBinding(
                "tls-server-end-point".to_string()
            ))
        );
    }

    #[test]
    fn test_parse_client_first_missing_nonce() {
        let result = parse_client_first("n,,n=alice");
        assert!(matches!(result, Err(ScramError::InvalidClientMessage(_))));
    }

    #[test]
    fn test_parse_client_first_empty_string() {
        let result = parse_client_first("");
        assert!(matches!(result, Err(ScramError::InvalidClientMessage(_))));
    }

    #[test]
    fn test_parse_client_first_mandatory_extension() {
        let result = parse_client_first("n,,m=ext,n=,r=abc");
        assert!(matches!(result, Err(ScramError::InvalidClientMessage(_))));
    }

    #[test]
    fn test_parse_client_final_missing_proof() {
        let result = parse_client_final("c=biws,r=abc");
        assert!(matches!(result, Err(ScramError::InvalidClientMessage(_))));
    }

    #[test]
    fn test_parse_client_final_invalid_base64_proof() {
        let result = parse_client_final("c=biws,r=abc,p=!!!not-base64!!!");
        assert!(matches!(result, Err(ScramError::Base64Error(_))));
    }

    #[test]
    fn test_server_first_rejects_invalid_utf8() {
        let server = ScramServer::new(ScramSecret::generate("pw"));
        let result = server.server_first(&[0xff, 0xfe]);
        assert!(matches!(result, Err(ScramError::Utf8Error(_))));
    }

    #[test]
    fn test_verify_password() {
        let secret = ScramSecret::generate("secret");
        assert!(secret.verify_password("secret"));
        assert!(!secret.verify_password("Secret"));
        assert!(!secret.verify_password(""));
    }

    #[test]
    fn test_secret_debug_hides_keys() {
        let rendered = format!("{:?}", ScramSecret::generate("secret"));
        assert!(!rendered.contains("stored_key"));
        assert!(rendered.contains("4096"));
    }

    #[test]
    fn test_constant_time_compare_different_length() {
        assert!(!constant_time_compare(b"test", b"test_longer"));
    }

    #[test]
    fn test_constant_time_compare_single_bit_flip() {
        let a = vec![0b1010_1010; 32];
        let mut b = a.clone();
        b[15] ^= 0b0000_0001; // flip one bit
        assert!(!constant_time_compare(&a, &b));
        assert!(constant_time_compare(&a, &a));
    }
}
