// Copyright 2025 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::context::Context;
use crate::error::{DependencySnafu, Error, TlsSnafu};
use crate::types::v1::ResourceIdentity;
use crate::types::v1::object_store::CephObjectStore;
use crate::utils::tls;
use k8s_openapi::api::core::v1 as corev1;
use snafu::ResultExt;

pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY: &str = "tls.key";

/// Certificate and key bytes of a TLS secret.
pub fn key_pair(secret: &corev1::Secret) -> Option<(&[u8], &[u8])> {
    let data = secret.data.as_ref()?;
    let cert = data.get(TLS_CERT_KEY)?;
    let key = data.get(TLS_PRIVATE_KEY)?;
    Some((&cert.0[..], &key.0[..]))
}

/// Validates the gateway certificate secret and returns the hash of its
/// content, or `None` when the store serves plain HTTP.
pub async fn gateway_cert_hash(ctx: &Context, store: &CephObjectStore) -> Result<Option<String>, Error> {
    let Some(name) = store.spec.gateway.ssl_certificate_ref.as_deref() else {
        return Ok(None);
    };
    let ns = store.require_namespace()?;
    let Some(secret) = ctx.get_opt::<corev1::Secret>(name, &ns).await? else {
        return DependencySnafu {
            kind: "Secret",
            name,
            reason: "gateway certificate secret not found",
        }
        .fail();
    };
    verify(&secret).map(Some)
}

fn verify(secret: &corev1::Secret) -> Result<String, Error> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    let Some((cert, key)) = key_pair(secret) else {
        return DependencySnafu {
            kind: "Secret",
            name,
            reason: format!("missing {TLS_CERT_KEY} or {TLS_PRIVATE_KEY}"),
        }
        .fail();
    };
    tls::x509_key_pair(cert, key).context(TlsSnafu { secret: name })?;

    let data = secret.data.iter().flatten();
    Ok(tls::material_hash(data.map(|(k, v)| (k, &v.0[..]))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret(entries: &[(&str, &str)]) -> corev1::Secret {
        corev1::Secret {
            metadata: kube::api::ObjectMeta {
                name: Some("rgw-tls".to_owned()),
                ..Default::default()
            },
            data: Some(
                entries
                    .iter()
                    .map(|(k, v)| ((*k).to_owned(), ByteString(v.as_bytes().to_vec())))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_key_pair_requires_both_entries() {
        assert!(key_pair(&secret(&[(TLS_CERT_KEY, "c")])).is_none());
        let s = secret(&[(TLS_CERT_KEY, "c"), (TLS_PRIVATE_KEY, "k")]);
        assert_eq!(key_pair(&s), Some((&b"c"[..], &b"k"[..])));
    }

    #[test]
    fn test_missing_entries_wait() {
        let err = verify(&secret(&[(TLS_CERT_KEY, "c")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Dependency);
    }

    #[test]
    fn test_invalid_material_is_invariant() {
        let err = verify(&secret(&[(TLS_CERT_KEY, "garbage"), (TLS_PRIVATE_KEY, "garbage")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invariant);
        assert!(err.to_string().contains("rgw-tls"));
    }
}
