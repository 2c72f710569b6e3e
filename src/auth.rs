use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use rand::{distributions::Alphanumeric, Rng};
use sha1::Sha1;

use crate::error::AuthError;
use crate::transport::{SignedRequest, StreamRequest};

type HmacSha1 = Hmac<Sha1>;

/// OAuth 1.0a credential material supplied by the host. Never persisted here.
#[derive(Debug, Clone)]
pub struct CredentialKeys {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_secret: String,
}

impl CredentialKeys {
    pub fn validate(&self) -> Result<(), AuthError> {
        let fields: [(&'static str, &str); 4] = [
            ("consumer_key", &self.consumer_key),
            ("consumer_secret", &self.consumer_secret),
            ("access_token", &self.access_token),
            ("access_secret", &self.access_secret),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(AuthError::MissingCredential { field });
            }
        }
        Ok(())
    }
}

/// Source of the per-request timestamp and nonce, injected so signing stays
/// deterministic under test.
pub trait NonceProvider: Send + Sync {
    fn nonce(&self) -> String;
    fn timestamp(&self) -> u64;
}

/// Default provider: random alphanumeric nonce, wall-clock timestamp.
pub struct SystemNonce;

impl NonceProvider for SystemNonce {
    fn nonce(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect()
    }

    fn timestamp(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Signs outbound requests with OAuth 1.0a HMAC-SHA1.
///
/// Pure transform: no network or disk access; given identical nonce and
/// timestamp inputs the produced header is identical.
pub struct OauthSigner {
    keys: CredentialKeys,
    nonces: Box<dyn NonceProvider>,
}

impl OauthSigner {
    pub fn new(keys: CredentialKeys) -> Self {
        Self::with_nonce_provider(keys, Box::new(SystemNonce))
    }

    pub fn with_nonce_provider(keys: CredentialKeys, nonces: Box<dyn NonceProvider>) -> Self {
        Self { keys, nonces }
    }

    pub fn sign(&self, request: &StreamRequest) -> Result<SignedRequest, AuthError> {
        let authorization =
            self.authorization(request, self.nonces.timestamp(), &self.nonces.nonce())?;
        Ok(SignedRequest {
            request: request.clone(),
            authorization,
        })
    }

    /// Build the `Authorization` header value for the given timestamp/nonce.
    pub fn authorization(
        &self,
        request: &StreamRequest,
        timestamp: u64,
        nonce: &str,
    ) -> Result<String, AuthError> {
        self.keys.validate()?;

        let url = reqwest::Url::parse(&request.url).map_err(|e| AuthError::Unsignable {
            reason: format!("invalid URL {}: {}", request.url, e),
        })?;

        let timestamp = timestamp.to_string();
        let oauth_params: [(&str, &str); 6] = [
            ("oauth_consumer_key", &self.keys.consumer_key),
            ("oauth_nonce", nonce),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", &timestamp),
            ("oauth_token", &self.keys.access_token),
            ("oauth_version", "1.0"),
        ];

        // All request parameters participate: URL query, form body, protocol.
        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (percent(&k), percent(&v)))
            .collect();
        if let Some(form) = &request.form {
            params.extend(form.iter().map(|(k, v)| (percent(k), percent(v))));
        }
        params.extend(oauth_params.iter().map(|&(k, v)| (percent(k), percent(v))));
        params.sort();

        let param_string = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let mut base_url = url;
        base_url.set_query(None);
        base_url.set_fragment(None);

        let base_string = format!(
            "{}&{}&{}",
            request.method.as_str().to_uppercase(),
            percent(base_url.as_str()),
            percent(&param_string),
        );

        let signing_key = format!(
            "{}&{}",
            percent(&self.keys.consumer_secret),
            percent(&self.keys.access_secret),
        );

        let mut mac =
            HmacSha1::new_from_slice(signing_key.as_bytes()).expect("HMAC accepts any key length");
        mac.update(base_string.as_bytes());
        let signature = general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        let mut header_params: Vec<(&str, String)> = oauth_params
            .iter()
            .map(|(k, v)| (*k, v.to_string()))
            .collect();
        header_params.push(("oauth_signature", signature));
        header_params.sort();

        let rendered = header_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, percent(v)))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!("OAuth {}", rendered))
    }
}

// RFC 3986 unreserved-set percent encoding, which is the OAuth rule.
fn percent(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedNonce;

    impl NonceProvider for FixedNonce {
        fn nonce(&self) -> String {
            "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg".to_string()
        }

        fn timestamp(&self) -> u64 {
            1318622958
        }
    }

    // The worked example from the Twitter API signing documentation.
    fn doc_keys() -> CredentialKeys {
        CredentialKeys {
            consumer_key: "xvz1evFS4wEEPTGEFPHBog".to_string(),
            consumer_secret: "kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw".to_string(),
            access_token: "370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb".to_string(),
            access_secret: "LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE".to_string(),
        }
    }

    fn doc_request() -> StreamRequest {
        StreamRequest::streaming_form(
            "https://api.twitter.com/1.1/statuses/update.json?include_entities=true",
            vec![(
                "status".to_string(),
                "Hello Ladies + Gentlemen, a signed OAuth request!".to_string(),
            )],
        )
    }

    #[test]
    fn test_documented_signature_vector() {
        let signer = OauthSigner::new(doc_keys());
        let header = signer
            .authorization(&doc_request(), 1318622958, "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg")
            .unwrap();

        // base64 "tnnArxj06cWHq44gCs1OSKk/jLY=" percent-encoded inside the header
        assert!(
            header.contains("oauth_signature=\"tnnArxj06cWHq44gCs1OSKk%2FjLY%3D\""),
            "unexpected header: {header}"
        );
        assert!(header.starts_with("OAuth "));
        assert!(header.contains("oauth_signature_method=\"HMAC-SHA1\""));
        assert!(header.contains("oauth_version=\"1.0\""));
    }

    #[test]
    fn test_signing_is_deterministic() {
        let signer = OauthSigner::with_nonce_provider(doc_keys(), Box::new(FixedNonce));
        let first = signer.sign(&doc_request()).unwrap();
        let second = signer.sign(&doc_request()).unwrap();
        assert_eq!(first.authorization, second.authorization);
    }

    #[test]
    fn test_nonce_changes_signature() {
        let signer = OauthSigner::new(doc_keys());
        let a = signer
            .authorization(&doc_request(), 1318622958, "nonce-a")
            .unwrap();
        let b = signer
            .authorization(&doc_request(), 1318622958, "nonce-b")
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_missing_credential() {
        let mut keys = doc_keys();
        keys.access_secret = String::new();
        let signer = OauthSigner::new(keys);
        let err = signer.sign(&doc_request()).unwrap_err();
        assert!(matches!(
            err,
            AuthError::MissingCredential {
                field: "access_secret"
            }
        ));
    }

    #[test]
    fn test_unparsable_url() {
        let signer = OauthSigner::new(doc_keys());
        let request = StreamRequest::get("not a url");
        assert!(matches!(
            signer.sign(&request).unwrap_err(),
            AuthError::Unsignable { .. }
        ));
    }
}
