//! Contains logic for hostname resolution against explicit name servers.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use futures::future::join_all;
use hickory_resolver::{
	config::{NameServerConfigGroup, ResolverConfig, ResolverOpts},
	error::ResolveErrorKind,
	proto::rr::{RData, RecordType},
	TokioAsyncResolver,
};

use crate::error::DnsError;

/// Record types the resolver knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
	/// IPv4 host address.
	A,
	/// IPv6 host address.
	Aaaa,
	/// Canonical name.
	Cname,
	/// Mail exchange.
	Mx,
	/// Text record.
	Txt,
}

impl RecordKind {
	fn record_type(self) -> RecordType {
		match self {
			Self::A => RecordType::A,
			Self::Aaaa => RecordType::AAAA,
			Self::Cname => RecordType::CNAME,
			Self::Mx => RecordType::MX,
			Self::Txt => RecordType::TXT,
		}
	}
}

/// One decoded DNS record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsRecord {
	/// IPv4 host address.
	A(Ipv4Addr),
	/// IPv6 host address.
	Aaaa(Ipv6Addr),
	/// Canonical name target.
	Cname(String),
	/// Mail exchange entry.
	Mx {
		/// Preference value; lower is preferred.
		preference: u16,
		/// Exchange host name.
		exchange: String,
	},
	/// Text record payload.
	Txt(String),
}

/// Resolver over an explicit, ordered list of name servers.
///
/// A query runs all requested record types concurrently against one
/// server and falls back to the next server only when the current one
/// fails.
#[derive(Debug, Clone)]
pub struct DnsResolver {
	servers: Vec<IpAddr>,
	port: u16,
}

impl DnsResolver {
	/// Build a resolver from name server IP strings and a shared port.
	pub fn new(resolver_addrs: &[String], port: u16) -> Result<Self, DnsError> {
		if resolver_addrs.is_empty() {
			return Err(DnsError::NoResolversSpecified);
		}

		let servers = resolver_addrs
			.iter()
			.map(|resolver_address| resolver_address.parse::<IpAddr>())
			.collect::<Result<Vec<IpAddr>, _>>()?;

		Ok(Self { servers, port })
	}

	/// Resolve `hostname` for every kind in `kinds`, concurrently, with
	/// per-server fallback.
	pub async fn lookup(
		&self,
		hostname: &str,
		kinds: &[RecordKind],
	) -> Result<Vec<DnsRecord>, DnsError> {
		let mut last_err = DnsError::EmptyResponse(format!(
			"Empty response when querying for host {hostname}"
		));

		for server in &self.servers {
			match self.lookup_on(*server, hostname, kinds).await {
				Ok(records) => return Ok(records),
				Err(err) => {
					eprintln!(
						"DnsResolver: server {server} failed with {err:?}, falling back"
					);
					last_err = err;
				}
			}
		}

		Err(last_err)
	}

	/// Resolve a hostname to its first IP address, querying A and AAAA
	/// concurrently.
	pub async fn lookup_ip(&self, hostname: &str) -> Result<IpAddr, DnsError> {
		let records = self
			.lookup(hostname, &[RecordKind::A, RecordKind::Aaaa])
			.await?;

		records
			.iter()
			.find_map(|record| match record {
				DnsRecord::A(ip) => Some(IpAddr::V4(*ip)),
				DnsRecord::Aaaa(ip) => Some(IpAddr::V6(*ip)),
				_ => None,
			})
			.ok_or_else(|| {
				DnsError::EmptyResponse(format!(
					"Empty response when querying for host {hostname}"
				))
			})
	}

	async fn lookup_on(
		&self,
		server: IpAddr,
		hostname: &str,
		kinds: &[RecordKind],
	) -> Result<Vec<DnsRecord>, DnsError> {
		let resolver = self.resolver_for(server);

		let queries = kinds
			.iter()
			.map(|kind| resolver.lookup(hostname, kind.record_type()));
		let outcomes = join_all(queries).await;

		let mut records = Vec::new();
		for outcome in outcomes {
			match outcome {
				Ok(lookup) => {
					records.extend(lookup.iter().filter_map(decode));
				}
				// A record type with no answers is an empty answer, not a
				// server failure; fallback is for failing servers only.
				Err(err)
					if matches!(
						err.kind(),
						ResolveErrorKind::NoRecordsFound { .. }
					) => {}
				Err(err) => return Err(err.into()),
			}
		}

		if records.is_empty() {
			return Err(DnsError::EmptyResponse(format!(
				"Empty response when querying for host {hostname}"
			)));
		}

		Ok(records)
	}

	fn resolver_for(&self, server: IpAddr) -> TokioAsyncResolver {
		let resolver_config = ResolverConfig::from_parts(
			None,
			vec![],
			NameServerConfigGroup::from_ips_clear(&[server], self.port, true),
		);

		TokioAsyncResolver::tokio(resolver_config, ResolverOpts::default())
	}
}

fn decode(rdata: &RData) -> Option<DnsRecord> {
	match rdata {
		RData::A(a) => Some(DnsRecord::A(a.0)),
		RData::AAAA(aaaa) => Some(DnsRecord::Aaaa(aaaa.0)),
		RData::CNAME(cname) => Some(DnsRecord::Cname(cname.0.to_utf8())),
		RData::MX(mx) => Some(DnsRecord::Mx {
			preference: mx.preference(),
			exchange: mx.exchange().to_utf8(),
		}),
		RData::TXT(txt) => {
			let joined = txt
				.txt_data()
				.iter()
				.map(|part| String::from_utf8_lossy(part).into_owned())
				.collect::<Vec<String>>()
				.join("");
			Some(DnsRecord::Txt(joined))
		}
		_ => None,
	}
}
