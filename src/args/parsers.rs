use tracing::debug;

use crate::error::ConfigError;

/// Expand a host specification into an ordered host list.
///
/// Accepts a comma-separated list, a `file:<path>` reference (one host per
/// line or comma separated) or ellipsis range patterns such as
/// `10.10.1.{1...3}`. Patterns may carry more than one range.
pub fn parse_hosts(spec: &str) -> Result<Vec<String>, ConfigError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(ConfigError::EmptyHosts);
    }

    if let Some(path) = spec.strip_prefix("file:") {
        if path.is_empty() {
            return Err(ConfigError::MissingHostsFilePath);
        }
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::HostsFile {
            path: path.to_owned(),
            source: err,
        })?;
        // Strip carriage returns so CRLF host files behave.
        let raw = raw.replace('\r', "");
        let hosts: Vec<String> = raw
            .split(|c| c == ',' || c == '\n')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        if hosts.is_empty() {
            return Err(ConfigError::EmptyHostsFile {
                path: path.to_owned(),
            });
        }
        return Ok(hosts);
    }

    let mut hosts = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        expand_ellipses(part, &mut hosts)?;
    }
    if hosts.is_empty() {
        return Err(ConfigError::EmptyHosts);
    }
    Ok(hosts)
}

fn expand_ellipses(pattern: &str, out: &mut Vec<String>) -> Result<(), ConfigError> {
    let Some(open) = pattern.find('{') else {
        out.push(pattern.to_owned());
        return Ok(());
    };
    let invalid = || ConfigError::InvalidEllipsis {
        pattern: pattern.to_owned(),
    };
    let close = pattern[open..].find('}').map(|i| i + open).ok_or_else(invalid)?;
    let (start, end) = pattern[open + 1..close].split_once("...").ok_or_else(invalid)?;
    let start: u64 = start.trim().parse().map_err(|_| invalid())?;
    let end: u64 = end.trim().parse().map_err(|_| invalid())?;
    if start > end {
        return Err(invalid());
    }
    for value in start..=end {
        let expanded = format!("{}{}{}", &pattern[..open], value, &pattern[close + 1..]);
        expand_ellipses(&expanded, out)?;
    }
    Ok(())
}

/// Resolve non-IP hosts when a DNS server was configured.
///
/// Resolution goes through the system resolver; the configured server is
/// surfaced for operators but not dialled directly.
pub async fn resolve_hosts(
    hosts: Vec<String>,
    dns_server: Option<&str>,
) -> Result<Vec<String>, ConfigError> {
    let Some(server) = dns_server else {
        return Ok(hosts);
    };
    debug!("Using DNS server: {}", server);

    let mut resolved = Vec::with_capacity(hosts.len());
    for host in hosts {
        if host.parse::<std::net::IpAddr>().is_ok() {
            resolved.push(host);
            continue;
        }
        let mut addrs = tokio::net::lookup_host((host.as_str(), 0))
            .await
            .map_err(|err| ConfigError::Resolve {
                host: host.clone(),
                source: err,
            })?;
        let next_addr = addrs.next();
        match next_addr {
            Some(addr) => resolved.push(addr.ip().to_string()),
            None => return Err(ConfigError::NoAddresses { host: host.clone() }),
        }
    }
    debug!("Final host list: {:?}", resolved);
    Ok(resolved)
}
