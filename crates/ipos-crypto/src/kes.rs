//! Remote KMS client for a KES server
//!
//! KES generates and decrypts data keys on behalf of the gateway. The
//! gateway authenticates with a client certificate (mTLS); key material and
//! contexts travel base64-encoded in JSON bodies:
//!
//! ```text
//! POST /v1/key/generate/{name}  {"context"}               -> {"plaintext","ciphertext"}
//! POST /v1/key/decrypt/{name}   {"ciphertext","context"}  -> {"plaintext"}
//! ```

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::blocking::Client;
use reqwest::{Certificate, Identity, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::config::KesConfig;
use crate::error::{Error, Result};
use crate::kms::{Context, DataKey, Kms, KmsInfo};
use crate::KEY_SIZE;

/// Response size limit for key generation.
const GENERATE_RESPONSE_LIMIT: u64 = 1 << 20;

/// Response size limit for key decryption and error bodies.
const DECRYPT_RESPONSE_LIMIT: u64 = 32 * 1024;

#[derive(Serialize)]
struct GenerateRequest {
    context: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    plaintext: String,
    ciphertext: String,
}

#[derive(Serialize)]
struct DecryptRequest {
    ciphertext: String,
    context: String,
}

#[derive(Deserialize)]
struct DecryptResponse {
    plaintext: String,
}

/// A [`Kms`] that delegates to a KES server.
pub struct KesClient {
    http: Client,
    endpoint: Url,
    default_key_id: String,
}

impl KesClient {
    /// Build a client with mTLS from the certificate, key, and CA paths in `config`.
    pub fn new(config: &KesConfig) -> Result<Self> {
        config.verify()?;

        let mut pem = fs::read(&config.cert_file)?;
        pem.push(b'\n');
        pem.extend_from_slice(&fs::read(&config.key_file)?);
        let identity = Identity::from_pem(&pem)?;

        let mut builder = Client::builder().use_rustls_tls().identity(identity);
        for cert in load_ca_certificates(config.ca_path.as_deref())? {
            builder = builder.add_root_certificate(cert);
        }
        Self::with_http_client(&config.endpoint, &config.default_key_id, builder.build()?)
    }

    /// Use a preconfigured HTTP client, e.g. a plain-HTTP client in tests.
    pub fn with_http_client(
        endpoint: &str,
        default_key_id: impl Into<String>,
        http: Client,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("invalid KES endpoint '{endpoint}': {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::Config(format!("invalid KES endpoint '{endpoint}'")));
        }
        Ok(Self {
            http,
            endpoint,
            default_key_id: default_key_id.into(),
        })
    }

    /// Ask KES for a new data key. Returns `(plaintext, ciphertext)`.
    pub fn generate_data_key(
        &self,
        name: &str,
        context: &[u8],
    ) -> Result<(Zeroizing<Vec<u8>>, Vec<u8>)> {
        let request = GenerateRequest {
            context: STANDARD.encode(context),
        };
        let response: GenerateResponse =
            self.post(&["generate", name], &request, GENERATE_RESPONSE_LIMIT)?;
        let plaintext = Zeroizing::new(decode_field("plaintext", &response.plaintext)?);
        let ciphertext = decode_field("ciphertext", &response.ciphertext)?;
        Ok((plaintext, ciphertext))
    }

    /// Ask KES to decrypt a data key sealed under `name`.
    pub fn decrypt_data_key(
        &self,
        name: &str,
        ciphertext: &[u8],
        context: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        let request = DecryptRequest {
            ciphertext: STANDARD.encode(ciphertext),
            context: STANDARD.encode(context),
        };
        let response: DecryptResponse =
            self.post(&["decrypt", name], &request, DECRYPT_RESPONSE_LIMIT)?;
        Ok(Zeroizing::new(decode_field("plaintext", &response.plaintext)?))
    }

    fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &[&str],
        body: &B,
        limit: u64,
    ) -> Result<T> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config("invalid KES endpoint".into()))?
            .pop_if_empty()
            .extend(["v1", "key"])
            .extend(path);
        debug!(%url, "KES request");

        let response = self.http.post(url).json(body).send()?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(error_response(status, response));
        }

        let mut buf = Vec::new();
        response.take(limit).read_to_end(&mut buf)?;
        serde_json::from_slice(&buf).map_err(|e| Error::Kms(format!("invalid KES response: {e}")))
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| Error::Kms(format!("invalid base64 in KES response field '{name}': {e}")))
}

fn error_response(status: StatusCode, response: reqwest::blocking::Response) -> Error {
    let mut body = String::new();
    if let Err(e) = response.take(DECRYPT_RESPONSE_LIMIT).read_to_string(&mut body) {
        return Error::Io(e);
    }
    let reason = status.canonical_reason().unwrap_or("");
    Error::Kms(format!("{reason}: {body}"))
}

fn data_key(plaintext: &[u8]) -> Result<DataKey> {
    if plaintext.len() != KEY_SIZE {
        return Err(Error::Kms("received invalid plaintext key size from KMS".into()));
    }
    let mut key: DataKey = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(plaintext);
    Ok(key)
}

impl Kms for KesClient {
    fn key_id(&self) -> &str {
        &self.default_key_id
    }

    fn generate_key(&self, key_id: &str, ctx: &Context) -> Result<(DataKey, Vec<u8>)> {
        let (plaintext, sealed) = self.generate_data_key(key_id, ctx.canonical().as_bytes())?;
        Ok((data_key(&plaintext)?, sealed))
    }

    fn unseal_key(&self, key_id: &str, sealed_key: &[u8], ctx: &Context) -> Result<DataKey> {
        let plaintext = self.decrypt_data_key(key_id, sealed_key, ctx.canonical().as_bytes())?;
        data_key(&plaintext)
    }

    fn info(&self) -> KmsInfo {
        KmsInfo {
            endpoint: self.endpoint.to_string(),
            name: self.default_key_id.clone(),
            auth_type: "TLS".to_string(),
        }
    }
}

/// Load additional trust roots from a PEM file or a directory of PEM files.
///
/// A missing or unreadable path adds nothing. Inside a directory, files that
/// cannot be read or parsed are skipped.
pub fn load_ca_certificates(path: Option<&Path>) -> Result<Vec<Certificate>> {
    let Some(path) = path.filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(Vec::new());
    };
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied) => {
            warn!(path = %path.display(), "CA path is not accessible, using default trust roots");
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(Error::Config(format!("cannot open '{}': {e}", path.display())));
        }
    };

    if !meta.is_dir() {
        let pem = fs::read(path)?;
        return match Certificate::from_pem_bundle(&pem) {
            Ok(certs) if !certs.is_empty() => Ok(certs),
            _ => Err(Error::Config(format!(
                "'{}' is not a valid PEM-encoded certificate",
                path.display()
            ))),
        };
    }

    let mut certs = Vec::new();
    for entry in fs::read_dir(path)? {
        let Ok(entry) = entry else { continue };
        let Ok(pem) = fs::read(entry.path()) else { continue };
        if let Ok(found) = Certificate::from_pem_bundle(&pem) {
            certs.extend(found);
        }
    }
    debug!(path = %path.display(), count = certs.len(), "loaded CA certificates");
    Ok(certs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_validation() {
        let http = Client::new();
        assert!(KesClient::with_http_client("not a url", "key", http.clone()).is_err());
        assert!(KesClient::with_http_client("mailto:kes@example.com", "key", http.clone()).is_err());
        assert!(KesClient::with_http_client("https://kes.example.com:7373", "key", http).is_ok());
    }

    #[test]
    fn test_info() {
        let kes =
            KesClient::with_http_client("https://kes.example.com:7373", "my-key", Client::new())
                .unwrap();
        let info = kes.info();
        assert_eq!(info.auth_type, "TLS");
        assert_eq!(info.name, "my-key");
        assert_eq!(kes.key_id(), "my-key");
        assert!(info.endpoint.starts_with("https://kes.example.com:7373"));
    }

    #[test]
    fn test_missing_ca_path_is_ignored() {
        let certs = load_ca_certificates(Some(Path::new("/nonexistent/ca.pem"))).unwrap();
        assert!(certs.is_empty());
        assert!(load_ca_certificates(None).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_ca_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ca.pem");
        fs::write(&file, b"not a certificate").unwrap();
        assert!(matches!(
            load_ca_certificates(Some(&file)),
            Err(Error::Config(_))
        ));
        // inside a directory, unparsable files are skipped
        assert!(load_ca_certificates(Some(dir.path())).unwrap().is_empty());
    }

    #[test]
    fn test_data_key_size() {
        assert!(data_key(&[0u8; 31]).is_err());
        assert!(data_key(&[0u8; 32]).is_ok());
    }
}
