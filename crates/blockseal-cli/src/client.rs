//! Client identities on disk and the requests a client sends to a node.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine as _;
use blockseal_core::signature::{generate_keypair, sign, signing_message, ClientKeys};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub(crate) const PUBLIC_KEY_FILE: &str = "public.pub";
pub(crate) const PRIVATE_KEY_FILE: &str = "private.pem";
pub(crate) const CLIENT_KEY_BITS: usize = 2048;

fn client_dir(clients_dir: &Path, name: &str) -> Result<PathBuf> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        bail!("invalid client name {name:?}");
    }
    Ok(clients_dir.join(name))
}

/// Generate a key pair for `name` under `clients_dir/name/`. An existing client is never
/// overwritten.
pub(crate) fn create_client(clients_dir: &Path, name: &str, bits: usize) -> Result<PathBuf> {
    let dir = client_dir(clients_dir, name)?;
    if dir.exists() {
        bail!("Client {name} already exists");
    }
    let keys = generate_keypair(bits)?;
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    fs::write(dir.join(PUBLIC_KEY_FILE), &keys.public_openssh)?;
    fs::write(dir.join(PRIVATE_KEY_FILE), &keys.private_pem)?;
    info!(client = name, dir = %dir.display(), "client created");
    Ok(dir)
}

pub(crate) fn load_client(clients_dir: &Path, name: &str) -> Result<ClientKeys> {
    let dir = client_dir(clients_dir, name)?;
    if !dir.is_dir() {
        bail!("Client {name} does not exist");
    }
    let public_openssh = fs::read_to_string(dir.join(PUBLIC_KEY_FILE))
        .with_context(|| format!("reading {name}'s public key"))?;
    let private_pem = fs::read_to_string(dir.join(PRIVATE_KEY_FILE))
        .with_context(|| format!("reading {name}'s private key"))?;
    Ok(ClientKeys {
        public_openssh: public_openssh.trim().to_string(),
        private_pem,
    })
}

/// The signed `add-transaction` form.
pub(crate) fn transaction_form(
    keys: &ClientKeys,
    sender: &str,
    receiver: &str,
    amount: f64,
) -> Result<Vec<(&'static str, String)>> {
    let signature = sign(&keys.private_pem, sender, receiver, amount)?;
    let message = String::from_utf8(signing_message(sender, receiver, amount)?)?;
    Ok(vec![
        ("sender", sender.to_string()),
        ("receiver", receiver.to_string()),
        ("amount", amount.to_string()),
        ("message", message),
        ("publicKey", BASE64_ENGINE.encode(&keys.public_openssh)),
        ("signature", BASE64_ENGINE.encode(signature)),
    ])
}

fn endpoint(node: &str, path: &str) -> String {
    format!("{}/{path}", node.trim_end_matches('/'))
}

async fn read_reply(response: reqwest::Response) -> Result<String> {
    let status = response.status();
    let body = response.text().await?;
    debug!(%status, "node replied");
    if !status.is_success() {
        bail!("node answered {status}: {body}");
    }
    Ok(body)
}

pub(crate) async fn create_transaction(
    http: &reqwest::Client,
    node: &str,
    keys: &ClientKeys,
    sender: &str,
    receiver: &str,
    amount: f64,
) -> Result<String> {
    let form = transaction_form(keys, sender, receiver, amount)?;
    let response = http
        .post(endpoint(node, "add-transaction"))
        .form(&form)
        .send()
        .await
        .with_context(|| format!("posting transaction to {node}"))?;
    read_reply(response).await
}

pub(crate) async fn request_block(http: &reqwest::Client, node: &str) -> Result<String> {
    let response = http
        .post(endpoint(node, "create-block"))
        .send()
        .await
        .with_context(|| format!("requesting a block from {node}"))?;
    read_reply(response).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockseal_core::signature::verify;
    use tempfile::tempdir;

    #[test]
    fn create_load_and_sign() {
        let temp_dir = tempdir().unwrap();
        let dir = create_client(temp_dir.path(), "alice", CLIENT_KEY_BITS).unwrap();
        assert!(dir.join(PUBLIC_KEY_FILE).is_file());
        assert!(dir.join(PRIVATE_KEY_FILE).is_file());

        let err = create_client(temp_dir.path(), "alice", CLIENT_KEY_BITS).unwrap_err();
        assert_eq!(err.to_string(), "Client alice already exists");

        let keys = load_client(temp_dir.path(), "alice").unwrap();
        assert!(keys.public_openssh.starts_with("ssh-rsa "));

        let form = transaction_form(&keys, "alice", "bob", 7.25).unwrap();
        let field = |name: &str| {
            form.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(field("amount"), "7.25");
        let public_key = BASE64_ENGINE.decode(field("publicKey")).unwrap();
        let signature = BASE64_ENGINE.decode(field("signature")).unwrap();
        assert_eq!(field("message").as_bytes(), signing_message("alice", "bob", 7.25).unwrap());
        verify(field("message").as_bytes(), &public_key, &signature).unwrap();
    }

    #[test]
    fn unknown_and_invalid_clients() {
        let temp_dir = tempdir().unwrap();
        let err = load_client(temp_dir.path(), "nobody").unwrap_err();
        assert_eq!(err.to_string(), "Client nobody does not exist");
        assert!(create_client(temp_dir.path(), "../escape", CLIENT_KEY_BITS).is_err());
        assert!(create_client(temp_dir.path(), "", CLIENT_KEY_BITS).is_err());
    }

    #[test]
    fn endpoints_ignore_trailing_slash() {
        assert_eq!(
            endpoint("http://127.0.0.1:5000/", "create-block"),
            "http://127.0.0.1:5000/create-block"
        );
        assert_eq!(
            endpoint("http://node", "add-transaction"),
            "http://node/add-transaction"
        );
    }
}
