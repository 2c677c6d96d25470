//! Mapping of remote instance reports onto tunnel rows

use chrono::{DateTime, Utc};
use sea_orm::ConnectionTrait;
use tunneldeck_db::{ReportedCounters, StoreError, TrafficCounters, TunnelRecord, TunnelStore};
use tunneldeck_proto::{
    generated_name, is_generated_name, parse_descriptor, resolve_name, NameState, RemoteInstance,
    TunnelMode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    Updated,
    Unchanged,
    /// Not a tunnel (no id or unknown type)
    Skipped,
}

/// Absolute traffic counters carried by a report
pub fn reported_counters(instance: &RemoteInstance) -> ReportedCounters {
    ReportedCounters {
        tcp_rx: instance.tcprx,
        tcp_tx: instance.tcptx,
        udp_rx: instance.udprx,
        udp_tx: instance.udptx,
    }
}

/// Row fields derived from a remote report.
///
/// Counters the report leaves out keep their `stored` values.
pub fn tunnel_record(
    instance: &RemoteInstance,
    mode: TunnelMode,
    stored: TrafficCounters,
) -> TunnelRecord {
    let parsed = parse_descriptor(&instance.url, mode);
    TunnelRecord {
        mode: mode.as_str().to_string(),
        tunnel_port: parsed.tunnel_port_number(),
        target_port: parsed.target_port_number(),
        min: parsed.min_pool(),
        max: parsed.max_pool(),
        tls_mode: parsed.tls_mode.as_str().to_string(),
        cert_path: Some(parsed.cert_path).filter(|path| !path.is_empty()),
        key_path: Some(parsed.key_path).filter(|path| !path.is_empty()),
        tunnel_address: parsed.tunnel_address,
        target_address: parsed.target_address,
        log_level: parsed.log_level,
        password: parsed.password,
        command_line: instance.url.clone(),
        counters: stored.merge(&reported_counters(instance)),
        restart: instance.restart,
        status: instance.status.clone(),
    }
}

/// Insert or update the row of one reported instance.
///
/// The caller holds the endpoint's write lock.
pub async fn apply_instance<C: ConnectionTrait>(
    conn: &C,
    endpoint_id: i64,
    instance: &RemoteInstance,
    now: DateTime<Utc>,
) -> Result<ApplyOutcome, StoreError> {
    let Some(mode) = instance.mode() else {
        return Ok(ApplyOutcome::Skipped);
    };
    if instance.id.is_empty() {
        return Ok(ApplyOutcome::Skipped);
    }

    let store = TunnelStore::new(conn);

    match store.find(endpoint_id, &instance.id).await? {
        None => {
            let record = tunnel_record(instance, mode, TrafficCounters::default());
            let name = resolve_name(None, instance.alias(), &instance.id)
                .map(|state| state.name)
                .unwrap_or_else(|| generated_name(&instance.id));
            store
                .insert(endpoint_id, &instance.id, &name, &record, now)
                .await?;
            Ok(ApplyOutcome::Inserted)
        }
        Some(row) => {
            let record = tunnel_record(instance, mode, TrafficCounters::from_model(&row));
            let current = NameState::new(
                row.name.clone(),
                is_generated_name(&row.name, &row.instance_id),
            );
            let rename = resolve_name(Some(&current), instance.alias(), &instance.id);
            let updated = store
                .update(row, rename.as_ref().map(|state| state.name.as_str()), &record, now)
                .await?;
            Ok(match updated {
                Some(_) => ApplyOutcome::Updated,
                None => ApplyOutcome::Unchanged,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(kind: &str, url: &str) -> RemoteInstance {
        RemoteInstance {
            id: "i1".to_string(),
            kind: kind.to_string(),
            status: "running".to_string(),
            url: url.to_string(),
            tcprx: Some(1),
            tcptx: Some(2),
            udprx: Some(3),
            udptx: Some(4),
            ..Default::default()
        }
    }

    #[test]
    fn test_record_from_server_descriptor() {
        let report = instance(
            "server",
            "server://pass@[2001:db8::1]:9000/10.0.0.1:8080?tls=1&min=4&max=16&log=DEBUG",
        );
        let record = tunnel_record(&report, TunnelMode::Server, TrafficCounters::default());

        assert_eq!(record.mode, "server");
        assert_eq!(record.tunnel_address, "[2001:db8::1]");
        assert_eq!(record.tunnel_port, 9000);
        assert_eq!(record.target_address, "10.0.0.1");
        assert_eq!(record.target_port, 8080);
        assert_eq!(record.tls_mode, "mode1");
        assert_eq!(record.log_level, "debug");
        assert_eq!(record.password, "pass");
        assert_eq!(record.min, Some(4));
        assert_eq!(record.max, Some(16));
        assert_eq!(record.cert_path, None);
        assert_eq!(record.command_line, report.url);
        assert_eq!(record.counters.udp_total(), 7);
        assert_eq!(record.status, "running");
    }

    #[test]
    fn test_client_descriptor_ignores_tls() {
        let record = tunnel_record(
            &instance("client", "client://:2000/10.0.0.2:22?tls=2"),
            TunnelMode::Client,
            TrafficCounters::default(),
        );
        assert_eq!(record.tls_mode, "inherit");
        assert_eq!(record.tunnel_port, 2000);
        assert_eq!(record.min, None);
    }

    #[test]
    fn test_unreported_counters_keep_stored_values() {
        let report = RemoteInstance {
            tcprx: Some(900),
            tcptx: None,
            udprx: None,
            udptx: None,
            ..instance("client", "client://:2000/10.0.0.2:22")
        };
        let stored = TrafficCounters {
            tcp_rx: 500,
            tcp_tx: 60,
            udp_rx: 7,
            udp_tx: 8,
        };

        let record = tunnel_record(&report, TunnelMode::Client, stored);
        assert_eq!(record.counters.tcp_rx, 900);
        assert_eq!(record.counters.tcp_tx, 60);
        assert_eq!(record.counters.udp_total(), 15);
    }
}
