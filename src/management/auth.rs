//! Server-side SCRAM-SHA-256 (RFC 7677) for the remote management port: the
//! mirror image of [`crate::pg::scram::Client`], run here against the
//! `admins` credential file instead of a PostgreSQL server.

use base64::Engine;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};
use snafu::Snafu;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Snafu)]
pub enum ScramServerError {
    #[snafu(display("i/o error: {}", source))]
    Io { source: std::io::Error },
    #[snafu(display("malformed client-first-message: {}", reason))]
    MalformedClientFirst { reason: String },
    #[snafu(display("malformed client-final-message: {}", reason))]
    MalformedClientFinal { reason: String },
    #[snafu(display("client nonce does not match the issued nonce"))]
    NonceMismatch,
    #[snafu(display("client proof did not verify"))]
    BadClientProof,
    #[snafu(display("unknown admin user: {}", username))]
    UnknownUser { username: String },
    #[snafu(display("invalid base64 in scram message: {}", source))]
    Base64 { source: base64::DecodeError },
}

impl From<std::io::Error> for ScramServerError {
    fn from(source: std::io::Error) -> Self {
        ScramServerError::Io { source }
    }
}

impl From<base64::DecodeError> for ScramServerError {
    fn from(source: base64::DecodeError) -> Self {
        ScramServerError::Base64 { source }
    }
}

/// Server-held state for one in-progress exchange.
pub struct Exchange {
    client_first_bare: String,
    server_first: String,
    combined_nonce: String,
    stored_key: [u8; 32],
    server_key: [u8; 32],
}

impl Exchange {
    /// Parse `client-first-message` (`n,,n=,r=<client-nonce>`), derive
    /// salted-password material from `password`, and produce the
    /// `server-first-message` to send back.
    pub fn begin(client_first_message: &str, password: &str) -> Result<(Self, String), ScramServerError> {
        let bare =
            client_first_message
                .strip_prefix("n,,")
                .ok_or_else(|| ScramServerError::MalformedClientFirst {
                    reason: "missing gs2 header".into(),
                })?;
        let client_nonce = bare
            .split(',')
            .find_map(|p| p.strip_prefix("r="))
            .ok_or_else(|| ScramServerError::MalformedClientFirst {
                reason: "missing r=".into(),
            })?;

        let mut rng = rand::thread_rng();
        let server_nonce_suffix: [u8; 18] = rng.gen();
        let combined_nonce = format!(
            "{}{}",
            client_nonce,
            base64::engine::general_purpose::STANDARD.encode(server_nonce_suffix)
        );

        let mut salt = [0u8; 16];
        rng.fill(&mut salt);
        let iterations = 4096u32;

        let salted_password = pbkdf2::pbkdf2_hmac_array::<Sha256, 32>(password.as_bytes(), &salt, iterations);
        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();
        let server_key = hmac_sha256(&salted_password, b"Server Key");

        let server_first = format!(
            "r={},s={},i={}",
            combined_nonce,
            base64::engine::general_purpose::STANDARD.encode(salt),
            iterations
        );

        Ok((
            Exchange {
                client_first_bare: bare.to_string(),
                server_first: server_first.clone(),
                combined_nonce,
                stored_key,
                server_key,
            },
            server_first,
        ))
    }

    /// Verify `client-final-message` (`c=<binding>,r=<nonce>,p=<proof>`) and
    /// produce the `server-final-message` (`v=<signature>`).
    pub fn verify_client_final(&self, client_final_message: &str) -> Result<String, ScramServerError> {
        let (without_proof, proof_b64) = client_final_message
            .rsplit_once(",p=")
            .ok_or_else(|| ScramServerError::MalformedClientFinal {
                reason: "missing p=".into(),
            })?;
        let nonce = without_proof
            .split(',')
            .find_map(|p| p.strip_prefix("r="))
            .ok_or_else(|| ScramServerError::MalformedClientFinal {
                reason: "missing r=".into(),
            })?;
        if nonce != self.combined_nonce {
            return Err(ScramServerError::NonceMismatch);
        }
        let proof = base64::engine::general_purpose::STANDARD.decode(proof_b64)?;

        let gs2_b64 = base64::engine::general_purpose::STANDARD.encode(b"n,,");
        let auth_message = format!(
            "{},{},c={},r={},{}",
            self.client_first_bare, self.server_first, gs2_b64, self.combined_nonce, without_proof
        );

        let client_signature = hmac_sha256(&self.stored_key, auth_message.as_bytes());
        let recovered_client_key: Vec<u8> = proof
            .iter()
            .zip(client_signature.iter())
            .map(|(a, b)| a ^ b)
            .collect();
        if Sha256::digest(&recovered_client_key).as_slice() != self.stored_key {
            return Err(ScramServerError::BadClientProof);
        }

        let server_signature = hmac_sha256(&self.server_key, auth_message.as_bytes());
        Ok(format!(
            "v={}",
            base64::engine::general_purpose::STANDARD.encode(server_signature)
        ))
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

async fn read_string<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String, ScramServerError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn write_string<S: AsyncWrite + Unpin>(stream: &mut S, message: &str) -> Result<(), ScramServerError> {
    let bytes = message.as_bytes();
    stream.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    stream.write_all(bytes).await?;
    stream.flush().await?;
    Ok(())
}

/// Drive the full server side of one remote-management authentication
/// handshake over `stream`, gating on `lookup_password`. Returns once the
/// peer's proof has verified and the server's signature has been sent; the
/// caller proceeds to frame/dispatch [`super::Envelope`]s on the same
/// stream. A username unknown to `lookup_password` still runs a dummy
/// exchange against a random password so the two failure modes take the
/// same amount of round trips.
pub async fn authenticate<S, F>(stream: &mut S, lookup_password: F) -> Result<(), ScramServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnOnce(&str) -> Option<String>,
{
    let username = read_string(stream).await?;
    let client_first = read_string(stream).await?;

    let password = lookup_password(&username);
    let effective_password = password
        .clone()
        .unwrap_or_else(|| random_decoy_password());

    let (exchange, server_first) = Exchange::begin(&client_first, &effective_password)?;
    write_string(stream, &server_first).await?;

    let client_final = read_string(stream).await?;
    if password.is_none() {
        write_string(stream, "e=unknown-user").await?;
        return Err(ScramServerError::UnknownUser { username });
    }

    match exchange.verify_client_final(&client_final) {
        Ok(server_final) => {
            write_string(stream, &server_final).await?;
            Ok(())
        }
        Err(err) => {
            write_string(stream, "e=authentication-failed").await?;
            Err(err)
        }
    }
}

fn random_decoy_password() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pg::scram::Client;

    #[test]
    fn full_dialogue_verifies_both_directions() {
        let client = Client::new();
        let client_first = client.client_first_message();

        let (exchange, server_first) = Exchange::begin(&client_first, "s3cret").unwrap();
        let parsed = client.handle_server_first(&server_first).unwrap();
        let client_final = client.compute_client_final(&parsed, "s3cret");

        let server_final = exchange.verify_client_final(&client_final.message).unwrap();
        client_final.verify_server_final(&server_final).unwrap();
    }

    #[test]
    fn wrong_password_is_rejected() {
        let client = Client::new();
        let client_first = client.client_first_message();

        let (exchange, server_first) = Exchange::begin(&client_first, "s3cret").unwrap();
        let parsed = client.handle_server_first(&server_first).unwrap();
        let client_final = client.compute_client_final(&parsed, "wrong-password");

        let err = exchange.verify_client_final(&client_final.message).unwrap_err();
        assert!(matches!(err, ScramServerError::BadClientProof));
    }
}
