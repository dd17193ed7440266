// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::domain::models::probe_result::TlsData;
use crate::engines::traits::{ProbeError, TlsProber};

/// 基于reqwest的TLS探测
///
/// 发起一次HEAD请求完成握手，从 `TlsInfo` 中取出服务端叶子证书。
/// 指定SNI时把SNI主机名直接解析到目标地址，使握手携带该名称。
pub struct ReqwestTlsProber;

#[async_trait]
impl TlsProber for ReqwestTlsProber {
    async fn probe(
        &self,
        host: &str,
        port: u16,
        sni: Option<&str>,
        timeout: Duration,
    ) -> Result<TlsData, ProbeError> {
        let server_name = sni.unwrap_or(host);

        let mut builder = reqwest::Client::builder()
            .tls_info(true)
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout);

        if server_name != host {
            let addr = tokio::net::lookup_host((host, port))
                .await
                .map_err(|e| ProbeError::Connection(format!("resolve {}: {}", host, e)))?
                .next()
                .ok_or_else(|| ProbeError::Connection(format!("no address for {}", host)))?;
            builder = builder.resolve(server_name, addr);
        }

        let client = builder
            .build()
            .map_err(|e| ProbeError::Other(e.to_string()))?;
        let response = client
            .head(format!("https://{}:{}/", server_name, port))
            .send()
            .await?;

        let mut negotiated = BTreeMap::new();
        negotiated.insert("http_version".to_string(), format!("{:?}", response.version()));

        let leaf = response
            .extensions()
            .get::<reqwest::tls::TlsInfo>()
            .and_then(|info| info.peer_certificate())
            .map(|der| der.to_vec());

        Ok(tls_data(host, port, sni, leaf, negotiated))
    }
}

/// 由叶子证书构造TLS数据
pub fn tls_data(
    host: &str,
    port: u16,
    sni: Option<&str>,
    leaf: Option<Vec<u8>>,
    negotiated: BTreeMap<String, String>,
) -> TlsData {
    let fingerprint_sha256 = leaf.as_ref().map(|der| hex::encode(Sha256::digest(der)));
    TlsData {
        host: host.to_string(),
        port,
        sni: sni.map(str::to_string),
        certificate_chain: leaf.iter().map(|der| BASE64.encode(der)).collect(),
        fingerprint_sha256,
        negotiated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_data_from_leaf() {
        let data = tls_data(
            "example.com",
            443,
            Some("alt.example.com"),
            Some(vec![1, 2, 3]),
            BTreeMap::new(),
        );

        assert_eq!(data.certificate_chain, vec!["AQID".to_string()]);
        assert_eq!(
            data.fingerprint_sha256.as_deref(),
            Some("039058c6f2c0cb492c533b0a4d14ef77cc0f78abccced5287d84a1a2011cfb81")
        );
        assert_eq!(data.sni.as_deref(), Some("alt.example.com"));
    }

    #[tokio::test]
    async fn test_refused_port_is_a_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = ReqwestTlsProber
            .probe("127.0.0.1", port, None, Duration::from_secs(2))
            .await;
        assert!(matches!(result, Err(ProbeError::Connection(_))));
    }
}
