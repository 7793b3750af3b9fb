//! HAProxy config text generation.
//!
//! Each port becomes one `frontend` stanza followed by one `backend` stanza
//! per hostname. The default (non-SNI) route on a port is wired with
//! `default_backend`; SNI routes use `use_backend ... if { req.ssl_sni ... }`.

use std::fmt::Write;

use super::config::{HaproxyBackend, HaproxyConfig, HaproxyFrontend};

/// Serialize a rendered config into HAProxy configuration text.
pub fn marshal(config: &HaproxyConfig) -> String {
    let mut output = String::new();
    for (port, frontend) in config.iter() {
        marshal_frontend(&mut output, port, frontend);
    }
    output
}

fn marshal_frontend(output: &mut String, port: u16, frontend: &HaproxyFrontend) {
    let mut backend_stanzas = String::new();

    let _ = write!(output, "\nfrontend frontend_{port}");
    output.push_str("\n  mode tcp");
    let _ = write!(output, "\n  bind :{port}");

    if frontend.contains_sni_routes() {
        output.push_str("\n  tcp-request inspect-delay 5s");
        output.push_str("\n  tcp-request content accept if { req.ssl_hello_type gt 0 }");
    }

    for (hostname, backend) in frontend.iter() {
        let backend_name = if hostname.is_empty() {
            // No use_backend predicate matches a non-SNI connection.
            let name = format!("backend_{port}");
            let _ = write!(output, "\n  default_backend {name}");
            name
        } else {
            let name = format!("backend_{port}_{hostname}");
            let _ = write!(output, "\n  use_backend {name} if {{ req.ssl_sni {hostname} }}");
            name
        };

        marshal_backend(&mut backend_stanzas, &backend_name, backend);
    }

    output.push('\n');
    output.push_str(&backend_stanzas);
}

fn marshal_backend(output: &mut String, name: &str, backend: &HaproxyBackend) {
    let _ = write!(output, "\nbackend {name}");
    output.push_str("\n  mode tcp");

    for server in backend {
        let _ = write!(
            output,
            "\n  server server_{addr}_{port} {addr}:{port}",
            addr = server.address,
            port = server.port
        );
    }

    output.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing_table::{BackendServerInfo, RoutingKey, RoutingTable};
    use tcp_routing_api::ModificationTag;

    fn table(routes: &[(u16, &str, &str, u16)]) -> RoutingTable {
        let mut table = RoutingTable::new();
        for (port, sni, address, backend_port) in routes {
            table.upsert_backend_server_key(
                RoutingKey::new(*port, *sni),
                BackendServerInfo::new(*address, *backend_port, ModificationTag::new("g", 0), 0),
            );
        }
        table
    }

    #[test]
    fn test_marshal_empty_config() {
        assert_eq!(marshal(&HaproxyConfig::default()), "");
    }

    #[test]
    fn test_marshal_single_default_route() {
        let config = HaproxyConfig::from_routing_table(&table(&[
            (80, "", "some-ip-1", 1111),
            (80, "", "some-ip-2", 2222),
        ]));

        let expected = "
frontend frontend_80
  mode tcp
  bind :80
  default_backend backend_80

backend backend_80
  mode tcp
  server server_some-ip-1_1111 some-ip-1:1111
  server server_some-ip-2_2222 some-ip-2:2222
";
        assert_eq!(marshal(&config), expected);
    }

    #[test]
    fn test_marshal_sni_routes() {
        let config = HaproxyConfig::from_routing_table(&table(&[
            (443, "", "default-host", 1111),
            (443, "b.example.com", "some-ip-2", 2222),
            (443, "a.example.com", "some-ip-1", 1111),
        ]));

        let expected = "
frontend frontend_443
  mode tcp
  bind :443
  tcp-request inspect-delay 5s
  tcp-request content accept if { req.ssl_hello_type gt 0 }
  default_backend backend_443
  use_backend backend_443_a.example.com if { req.ssl_sni a.example.com }
  use_backend backend_443_b.example.com if { req.ssl_sni b.example.com }

backend backend_443
  mode tcp
  server server_default-host_1111 default-host:1111

backend backend_443_a.example.com
  mode tcp
  server server_some-ip-1_1111 some-ip-1:1111

backend backend_443_b.example.com
  mode tcp
  server server_some-ip-2_2222 some-ip-2:2222
";
        assert_eq!(marshal(&config), expected);
    }

    #[test]
    fn test_marshal_orders_ports() {
        let config = HaproxyConfig::from_routing_table(&table(&[
            (9000, "", "10.0.0.1", 1),
            (80, "", "10.0.0.1", 1),
        ]));

        let output = marshal(&config);
        let first = output.find("frontend frontend_80").unwrap();
        let second = output.find("frontend frontend_9000").unwrap();
        assert!(first < second);
    }
}
