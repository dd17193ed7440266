// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioResolver;
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use tracing::warn;

use crate::domain::models::probe_result::{AsnInfo, CdnInfo, DnsRecords};
use crate::engines::traits::{CdnResolver, DnsResolver, ProbeError};

/// 基于hickory的DNS解析
///
/// 使用系统解析配置，查询A/AAAA/CNAME记录
pub struct HickoryDnsResolver {
    resolver: TokioResolver,
}

impl HickoryDnsResolver {
    /// 读取系统解析配置，读取失败时退回默认上游
    pub fn new() -> Self {
        let builder = match TokioResolver::builder(TokioConnectionProvider::default()) {
            Ok(builder) => builder,
            Err(e) => {
                warn!("System resolver config unavailable ({}), using defaults", e);
                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
            }
        };
        Self {
            resolver: builder.build(),
        }
    }
}

impl Default for HickoryDnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DnsResolver for HickoryDnsResolver {
    async fn resolve(&self, host: &str) -> Result<DnsRecords, ProbeError> {
        let mut records = DnsRecords::default();

        // IP literals have nothing to look up
        if let Ok(ip) = host.parse::<IpAddr>() {
            match ip {
                IpAddr::V4(_) => records.a.push(ip.to_string()),
                IpAddr::V6(_) => records.aaaa.push(ip.to_string()),
            }
            return Ok(records);
        }

        let ips = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| ProbeError::Connection(format!("dns lookup {}: {}", host, e)))?;
        for ip in ips.iter() {
            match ip {
                IpAddr::V4(_) => records.a.push(ip.to_string()),
                IpAddr::V6(_) => records.aaaa.push(ip.to_string()),
            }
        }

        // A missing CNAME is the common case, not an error.
        if let Ok(response) = self.resolver.lookup(host, RecordType::CNAME).await {
            for record in response.iter() {
                if let Some(cname) = record.as_cname() {
                    records
                        .cname
                        .push(cname.0.to_string().trim_end_matches('.').to_string());
                }
            }
        }

        Ok(records)
    }
}

/// 已知CDN/WAF提供商
struct Provider {
    name: &'static str,
    kind: &'static str,
    asn: &'static str,
    asn_name: &'static str,
    country: &'static str,
    ranges: &'static [&'static str],
}

const PROVIDERS: &[Provider] = &[
    Provider {
        name: "cloudflare",
        kind: "cdn",
        asn: "AS13335",
        asn_name: "CLOUDFLARENET",
        country: "US",
        ranges: &[
            "173.245.48.0/20",
            "103.21.244.0/22",
            "103.22.200.0/22",
            "141.101.64.0/18",
            "108.162.192.0/18",
            "190.93.240.0/20",
            "188.114.96.0/20",
            "197.234.240.0/22",
            "198.41.128.0/17",
            "162.158.0.0/15",
            "104.16.0.0/13",
            "104.24.0.0/14",
            "172.64.0.0/13",
            "2606:4700::/32",
            "2803:f800::/32",
            "2a06:98c0::/29",
        ],
    },
    Provider {
        name: "fastly",
        kind: "cdn",
        asn: "AS54113",
        asn_name: "FASTLY",
        country: "US",
        ranges: &["151.101.0.0/16", "199.232.0.0/16", "2a04:4e40::/32"],
    },
    Provider {
        name: "cloudfront",
        kind: "cdn",
        asn: "AS16509",
        asn_name: "AMAZON-02",
        country: "US",
        ranges: &[
            "13.32.0.0/15",
            "13.224.0.0/14",
            "52.84.0.0/15",
            "54.182.0.0/16",
            "54.192.0.0/16",
            "54.230.0.0/16",
            "54.239.128.0/18",
            "99.84.0.0/16",
            "143.204.0.0/16",
            "205.251.192.0/19",
        ],
    },
    Provider {
        name: "akamai",
        kind: "cdn",
        asn: "AS20940",
        asn_name: "AKAMAI-ASN1",
        country: "NL",
        ranges: &["2.16.0.0/13", "23.0.0.0/12", "23.32.0.0/11", "23.64.0.0/14", "23.192.0.0/11"],
    },
    Provider {
        name: "incapsula",
        kind: "waf",
        asn: "AS19551",
        asn_name: "INCAPSULA",
        country: "US",
        ranges: &["45.64.64.0/22", "107.154.0.0/16", "192.230.64.0/18", "199.83.128.0/21"],
    },
    Provider {
        name: "sucuri",
        kind: "waf",
        asn: "AS30148",
        asn_name: "SUCURI-SEC",
        country: "US",
        ranges: &["192.88.134.0/23", "185.93.228.0/22", "66.248.200.0/22"],
    },
];

/// 基于已知网段的CDN/ASN识别
pub struct StaticCdnResolver {
    networks: Vec<(IpNetwork, &'static Provider)>,
}

impl Default for StaticCdnResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticCdnResolver {
    pub fn new() -> Self {
        let mut networks = Vec::new();
        for provider in PROVIDERS {
            for range in provider.ranges {
                match range.parse::<IpNetwork>() {
                    Ok(network) => networks.push((network, provider)),
                    Err(e) => warn!(provider = provider.name, range, "Invalid CDN range: {}", e),
                }
            }
        }
        Self { networks }
    }

    fn matching(&self, ip: IpAddr) -> Option<(&IpNetwork, &'static Provider)> {
        self.networks
            .iter()
            .find(|(network, _)| network.contains(ip))
            .map(|(network, provider)| (network, *provider))
    }
}

impl CdnResolver for StaticCdnResolver {
    fn cdn(&self, ip: IpAddr) -> Option<CdnInfo> {
        self.matching(ip).map(|(_, provider)| CdnInfo {
            name: provider.name.to_string(),
            kind: provider.kind.to_string(),
        })
    }

    fn asn(&self, ip: IpAddr) -> Option<AsnInfo> {
        self.matching(ip).map(|(network, provider)| AsnInfo {
            number: provider.asn.to_string(),
            name: provider.asn_name.to_string(),
            country: Some(provider.country.to_string()),
            ranges: vec![network.to_string()],
        })
    }
}
