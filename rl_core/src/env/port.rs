// Free-port discovery for the communicator.

use std::io::ErrorKind;
use std::net::TcpListener;

use tracing::debug;

use crate::error::EnvError;
use crate::grpc_server::BIND_ADDR;

/// Whether `port` is taken on the address the communicator binds.
pub fn port_in_use(port: u16) -> Result<bool, EnvError> {
    match TcpListener::bind((BIND_ADDR, port)) {
        Ok(_) => Ok(false),
        Err(e) if e.kind() == ErrorKind::AddrInUse => Ok(true),
        Err(e) => Err(EnvError::PortCheck { port, source: e }),
    }
}

/// Scans upward from `base_port` and returns the first free port.
pub fn find_free_port(base_port: u16) -> Result<u16, EnvError> {
    let mut port = base_port;
    while port_in_use(port)? {
        debug!("Port {} is in use, trying the next one", port);
        port = port
            .checked_add(1)
            .ok_or(EnvError::PortsExhausted(base_port))?;
    }
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_occupied_port_is_reported_in_use() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(port_in_use(port).unwrap());
    }

    #[test]
    fn test_port_held_on_all_interfaces_is_in_use() {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(port_in_use(port).unwrap());
        assert!(find_free_port(port).unwrap() > port);
    }
}
