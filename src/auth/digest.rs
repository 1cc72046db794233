//! RFC 2617 MD5 Digest authentication
//!
//! Computes the `Authorization` header value for a `Digest` challenge.
//! Only the MD5 algorithm with optional `qop=auth` is supported, which is
//! what MJPEG cameras in the field actually speak.

use axum::http::StatusCode;
use rand::RngCore;

use crate::error::ConnectError;

/// Fixed nonce count; we never reuse a server nonce across requests.
const NONCE_COUNT: &str = "00000001";

/// A parsed `WWW-Authenticate: Digest ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    /// Protection realm
    pub realm: String,
    /// Server nonce
    pub nonce: String,
    /// Whether the server offered `qop=auth`
    pub qop_auth: bool,
    /// Opaque value to echo back, if the server sent one
    pub opaque: Option<String>,
}

/// Check whether a response is asking for Digest authentication
pub fn digest_requested(status: StatusCode, www_authenticate: Option<&str>) -> bool {
    status == StatusCode::UNAUTHORIZED
        && www_authenticate.map_or(false, |v| v.starts_with("Digest "))
}

/// Parse a `WWW-Authenticate` header value into a [`DigestChallenge`]
///
/// The challenge must carry at least `realm` and `nonce`.
pub fn parse_challenge(header: &str) -> Result<DigestChallenge, ConnectError> {
    let params = header
        .strip_prefix("Digest ")
        .ok_or_else(|| ConnectError::MalformedChallenge(header.to_string()))?;

    let mut realm = None;
    let mut nonce = None;
    let mut qop_auth = false;
    let mut opaque = None;

    for part in params.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        let value = value.trim_matches('"');
        match key {
            "realm" => realm = Some(value.to_string()),
            "nonce" => nonce = Some(value.to_string()),
            "opaque" => opaque = Some(value.to_string()),
            "qop" => qop_auth = value.split(',').any(|q| q.trim() == "auth"),
            _ => {}
        }
    }

    match (realm, nonce) {
        (Some(realm), Some(nonce)) => Ok(DigestChallenge {
            realm,
            nonce,
            qop_auth,
            opaque,
        }),
        _ => Err(ConnectError::MalformedChallenge(header.to_string())),
    }
}

/// Build the `Authorization` value (without the `Digest ` prefix) for a
/// challenge, generating a fresh random cnonce.
pub fn authorization(
    challenge: &DigestChallenge,
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
) -> String {
    let mut cnonce_bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut cnonce_bytes);
    let cnonce = hex(&cnonce_bytes);

    authorization_with_cnonce(challenge, username, password, method, uri, &cnonce)
}

/// Deterministic core of [`authorization`]; the cnonce is the only source
/// of randomness, so injecting it makes the output reproducible.
pub fn authorization_with_cnonce(
    challenge: &DigestChallenge,
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
    cnonce: &str,
) -> String {
    let ha1 = md5_hex(&format!("{}:{}:{}", username, challenge.realm, password));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));

    let response = if challenge.qop_auth {
        md5_hex(&format!(
            "{}:{}:{}:{}:auth:{}",
            ha1, challenge.nonce, NONCE_COUNT, cnonce, ha2
        ))
    } else {
        md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2))
    };

    let mut result = format!(
        r#"username="{}", realm="{}", nonce="{}", response="{}", uri="{}""#,
        username, challenge.realm, challenge.nonce, response, uri
    );

    if challenge.qop_auth {
        result.push_str(&format!(
            r#", nc={}, cnonce="{}", qop=auth, algorithm=MD5"#,
            NONCE_COUNT, cnonce
        ));
    }

    if let Some(ref opaque) = challenge.opaque {
        result.push_str(&format!(r#", opaque="{}""#, opaque));
    }

    result
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
